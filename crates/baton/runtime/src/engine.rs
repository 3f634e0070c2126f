//! Engine facade: definition registry, per-instance write serialization,
//! persistence, and event publication composed behind one API.
//!
//! Every mutation follows the same path: take the instance's async lock,
//! load a mutable copy from the store, run the synchronous state-machine
//! operation, persist on success, then publish the drained events. A failed
//! operation discards the copy, so the store never sees a partial mutation.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use baton_definition::{CorrelationValue, ProcessDefinition};
use baton_types::{
    ElementId, EngineError, EngineResult, InstanceStatus, NodeInstanceId, ProcessInstanceId,
    ReadMode, Signal, WorkItem, WorkItemId,
};

use crate::actions::ActionRegistry;
use crate::emitter::EventPublisher;
use crate::instance::ProcessInstance;
use crate::store::ProcessInstances;
use crate::work_items::WorkItemPolicy;

// ── Definition registry ──────────────────────────────────────────────────

/// Versioned process definitions keyed by definition id. Registering an id
/// again replaces the stored definition.
#[derive(Default)]
pub struct DefinitionRegistry {
    definitions: RwLock<HashMap<String, Arc<ProcessDefinition>>>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, definition: ProcessDefinition) -> Arc<ProcessDefinition> {
        let definition = Arc::new(definition);
        let mut definitions = self.definitions.write().await;
        let replaced = definitions
            .insert(definition.id.clone(), Arc::clone(&definition))
            .is_some();
        info!(
            definition_id = %definition.id,
            version = %definition.version,
            replaced,
            "process definition registered"
        );
        definition
    }

    pub async fn get(&self, id: &str) -> EngineResult<Arc<ProcessDefinition>> {
        let definitions = self.definitions.read().await;
        definitions
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::DefinitionNotFound(id.to_string()))
    }

    pub async fn ids(&self) -> Vec<String> {
        self.definitions.read().await.keys().cloned().collect()
    }
}

// ── Start request ────────────────────────────────────────────────────────

/// Everything a caller can hand to `ProcessEngine::start`.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub definition_id: String,
    pub business_key: Option<String>,
    pub trigger: Option<String>,
    pub payload: Value,
    pub reference_id: Option<String>,
    pub headers: HashMap<String, String>,
    pub variables: HashMap<String, Value>,
    /// Correlation key to subscribe the new instance under.
    pub correlation: Option<(String, CorrelationValue)>,
}

impl StartRequest {
    pub fn new(definition_id: impl Into<String>) -> Self {
        Self {
            definition_id: definition_id.into(),
            business_key: None,
            trigger: None,
            payload: Value::Null,
            reference_id: None,
            headers: HashMap::new(),
            variables: HashMap::new(),
            correlation: None,
        }
    }

    pub fn with_business_key(mut self, key: impl Into<String>) -> Self {
        self.business_key = Some(key.into());
        self
    }

    pub fn with_trigger(mut self, trigger: impl Into<String>) -> Self {
        self.trigger = Some(trigger.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_reference_id(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = Some(reference_id.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    pub fn with_correlation(mut self, key_name: impl Into<String>, value: CorrelationValue) -> Self {
        self.correlation = Some((key_name.into(), value));
        self
    }
}

// ── Engine ───────────────────────────────────────────────────────────────

pub struct ProcessEngine {
    definitions: DefinitionRegistry,
    store: Arc<dyn ProcessInstances>,
    actions: Arc<ActionRegistry>,
    publisher: EventPublisher,
    /// Per-instance write locks; one writer per instance id at a time.
    locks: Mutex<HashMap<ProcessInstanceId, Arc<Mutex<()>>>>,
}

impl ProcessEngine {
    pub fn new(
        store: Arc<dyn ProcessInstances>,
        actions: Arc<ActionRegistry>,
        publisher: EventPublisher,
    ) -> Self {
        Self {
            definitions: DefinitionRegistry::new(),
            store,
            actions,
            publisher,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    pub fn definitions(&self) -> &DefinitionRegistry {
        &self.definitions
    }

    pub async fn register(&self, definition: ProcessDefinition) -> Arc<ProcessDefinition> {
        self.definitions.register(definition).await
    }

    // ── Lifecycle operations ─────────────────────────────────────────────

    /// Build, start, persist, and publish a new instance. Nothing is
    /// persisted when start resolution fails.
    pub async fn start(&self, request: StartRequest) -> EngineResult<ProcessInstanceId> {
        let def = self.definitions.get(&request.definition_id).await?;
        let mut instance = ProcessInstance::new(&def);
        if let Some(key) = request.business_key {
            instance = instance.with_business_key(key);
        }
        for (name, value) in request.variables {
            instance = instance.with_variable(name, value);
        }
        if let Some((key_name, value)) = &request.correlation {
            instance.subscribe_correlation(&def, key_name, value)?;
        }
        instance.start(
            &def,
            &self.actions,
            request.trigger.as_deref(),
            &request.payload,
            request.reference_id,
            request.headers,
        )?;
        let id = instance.id.clone();
        self.commit(&id, &mut instance).await?;
        Ok(id)
    }

    pub async fn signal(&self, id: &ProcessInstanceId, signal: &Signal) -> EngineResult<()> {
        self.with_instance(id, |instance, def, actions| instance.send(def, actions, signal))
            .await
    }

    /// Signal the instance stored under a business key.
    pub async fn signal_by_business_key(
        &self,
        key: &str,
        signal: &Signal,
    ) -> EngineResult<ProcessInstanceId> {
        let id = self
            .store
            .find_by_business_key(key, ReadMode::ReadOnly)
            .await?
            .map(|instance| instance.id)
            .ok_or_else(|| {
                EngineError::NotFound(format!("process instance with business key '{key}'"))
            })?;
        self.signal(&id, signal).await?;
        Ok(id)
    }

    /// Route a signal to every active instance whose recorded correlation
    /// value for `key_name` matches the inbound payload. Returns the matched
    /// instance ids; a per-instance rejection is logged, not propagated.
    pub async fn signal_by_correlation(
        &self,
        key_name: &str,
        payload: &Value,
        channel: &str,
    ) -> EngineResult<Vec<ProcessInstanceId>> {
        let mut matched = Vec::new();
        let mut stream = self.store.stream(ReadMode::ReadOnly).await?;
        while let Some(item) = stream.next().await {
            let instance = item?;
            if instance.status != InstanceStatus::Active {
                continue;
            }
            let Ok(def) = self.definitions.get(&instance.definition_id).await else {
                continue;
            };
            let Some(value) = def.correlations().evaluate(key_name, payload) else {
                continue;
            };
            if instance.correlates(key_name, &value) {
                matched.push(instance.id);
            }
        }
        for id in &matched {
            let signal = Signal::new(channel, payload.clone());
            if let Err(error) = self.signal(id, &signal).await {
                warn!(process_instance_id = %id, %error, "correlated signal rejected");
            }
        }
        Ok(matched)
    }

    pub async fn suspend(&self, id: &ProcessInstanceId) -> EngineResult<()> {
        self.with_instance(id, |instance, _def, _actions| instance.suspend())
            .await
    }

    pub async fn resume(&self, id: &ProcessInstanceId) -> EngineResult<()> {
        self.with_instance(id, |instance, _def, _actions| instance.resume())
            .await
    }

    pub async fn abort(&self, id: &ProcessInstanceId) -> EngineResult<()> {
        self.with_instance(id, |instance, _def, _actions| instance.abort())
            .await
    }

    /// Remove an instance from the store and drop its lock entry.
    pub async fn remove(&self, id: &ProcessInstanceId) -> EngineResult<()> {
        self.store.remove(id).await?;
        self.locks.lock().await.remove(id);
        Ok(())
    }

    // ── Node and work-item operations ────────────────────────────────────

    pub async fn trigger_node(
        &self,
        id: &ProcessInstanceId,
        node_id: &ElementId,
    ) -> EngineResult<()> {
        self.with_instance(id, |instance, def, actions| {
            instance.trigger_node(def, actions, node_id)
        })
        .await
    }

    pub async fn cancel_node_instance(
        &self,
        id: &ProcessInstanceId,
        node_instance_id: &NodeInstanceId,
    ) -> EngineResult<()> {
        self.with_instance(id, |instance, _def, _actions| {
            instance.cancel_node_instance(node_instance_id)
        })
        .await
    }

    pub async fn retrigger_node_instance(
        &self,
        id: &ProcessInstanceId,
        node_instance_id: &NodeInstanceId,
    ) -> EngineResult<()> {
        self.with_instance(id, |instance, def, actions| {
            instance.retrigger_node_instance(def, actions, node_instance_id)
        })
        .await
    }

    pub async fn complete_work_item(
        &self,
        id: &ProcessInstanceId,
        work_item_id: &WorkItemId,
        results: HashMap<String, Value>,
        policies: &[&dyn WorkItemPolicy],
    ) -> EngineResult<()> {
        self.with_instance(id, |instance, def, actions| {
            instance.complete_work_item(def, actions, work_item_id, results, policies)
        })
        .await
    }

    pub async fn abort_work_item(
        &self,
        id: &ProcessInstanceId,
        work_item_id: &WorkItemId,
        policies: &[&dyn WorkItemPolicy],
    ) -> EngineResult<()> {
        self.with_instance(id, |instance, def, actions| {
            instance.abort_work_item(def, actions, work_item_id, policies)
        })
        .await
    }

    pub async fn transition_work_item(
        &self,
        id: &ProcessInstanceId,
        work_item_id: &WorkItemId,
        phase: &str,
        data: HashMap<String, Value>,
        policies: &[&dyn WorkItemPolicy],
    ) -> EngineResult<()> {
        self.with_instance(id, |instance, _def, _actions| {
            instance.transition_work_item(work_item_id, phase, data, policies)
        })
        .await
    }

    pub async fn update_work_item(
        &self,
        id: &ProcessInstanceId,
        work_item_id: &WorkItemId,
        parameters: HashMap<String, Value>,
        policies: &[&dyn WorkItemPolicy],
    ) -> EngineResult<WorkItem> {
        self.with_instance(id, |instance, _def, _actions| {
            instance.update_work_item(work_item_id, parameters, policies)
        })
        .await
    }

    pub async fn set_variable(
        &self,
        id: &ProcessInstanceId,
        name: &str,
        value: Value,
    ) -> EngineResult<()> {
        self.with_instance(id, |instance, _def, _actions| {
            instance.set_variable(name, value)
        })
        .await
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub async fn find(
        &self,
        id: &ProcessInstanceId,
        mode: ReadMode,
    ) -> EngineResult<Option<ProcessInstance>> {
        self.store.find_by_id(id, mode).await
    }

    pub async fn find_by_business_key(
        &self,
        key: &str,
        mode: ReadMode,
    ) -> EngineResult<Option<ProcessInstance>> {
        self.store.find_by_business_key(key, mode).await
    }

    // ── Internals ────────────────────────────────────────────────────────

    async fn instance_lock(&self, id: &ProcessInstanceId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(
            locks
                .entry(id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Run one serialized mutation: load mutable, operate, persist, publish.
    async fn with_instance<R, F>(&self, id: &ProcessInstanceId, op: F) -> EngineResult<R>
    where
        F: FnOnce(&mut ProcessInstance, &ProcessDefinition, &ActionRegistry) -> EngineResult<R>,
    {
        let lock = self.instance_lock(id).await;
        let _guard = lock.lock().await;
        let mut instance = self
            .store
            .find_by_id(id, ReadMode::Mutable)
            .await?
            .ok_or_else(|| EngineError::InstanceNotFound(id.clone()))?;
        let def = self.definitions.get(&instance.definition_id).await?;
        let outcome = op(&mut instance, &def, &self.actions)?;
        self.commit(id, &mut instance).await?;
        Ok(outcome)
    }

    /// Persist the mutated instance, then publish the events the mutation
    /// drained. Draining happens before the store write so a stored copy
    /// never carries unpublished events back into a later mutation.
    async fn commit(
        &self,
        id: &ProcessInstanceId,
        instance: &mut ProcessInstance,
    ) -> EngineResult<()> {
        let events = instance.drain_events();
        self.store.update(id, instance).await?;
        if instance.status.is_terminal() {
            // Terminal instances take no further mutations; drop the lock
            // entry instead of keeping it for the engine's lifetime.
            self.locks.lock().await.remove(id);
        }
        for event in events {
            self.publisher.emit(event).await;
        }
        Ok(())
    }
}
