//! Process instances: durable, signal-driven executions of a definition.
//!
//! A [`ProcessInstance`] owns its node instances and work items and mutates
//! them through a work-queue walk over the shared, read-only definition.
//! Lifecycle: `Pending -> Active -> {Completed, Aborted, Error}` with
//! `Active <-> Suspended`; `Completed` and `Aborted` are terminal. Faults a
//! matching exception-scope handler absorbs never reach `Error`.
//!
//! Every mutation records [`ProcessEvent`]s on the instance; the engine
//! drains and publishes them after persisting, so publication stays off the
//! mutation path.

use std::collections::{BTreeSet, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use baton_definition::{
    error_channel, timer_channel, BoundaryEvent, CorrelationValue, ExitAction, GatewayKind,
    HandlerAction, Node, NodeKind, ProcessDefinition,
};
use baton_types::{
    ElementId, EngineError, EngineResult, InstanceStatus, Milestone, NodeInstanceId, ProcessError,
    ProcessInstanceId, ReadMode, Signal, WorkItem, WorkItemId, WorkItemState,
};

use crate::actions::{ActionContext, ActionRegistry, NodeFault};
use crate::events::ProcessEvent;
use crate::work_items::{enforce_policies, WorkItemPolicy, ACTOR_PARAM};

/// Node metadata key naming the variable an inbound event payload lands in.
pub const EVENT_VARIABLE_KEY: &str = "event_variable";

/// Node metadata key naming the swimlane a work-item task belongs to.
pub const SWIMLANE_KEY: &str = "swimlane";

// ── Node instances ───────────────────────────────────────────────────────

/// Runtime status of one node instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeInstanceStatus {
    Active,
    Completed,
    Cancelled,
    Failed,
}

/// What an active node instance is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Await {
    /// An external event on one of the node's accepted channels.
    Event,
    /// Completion or abort of the owning work item.
    WorkItem,
    /// Completion of every node instance inside the node's container.
    Children,
    /// Arrival of every executable incoming connection.
    Join,
}

/// One runtime occurrence of a definition node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInstance {
    pub id: NodeInstanceId,
    pub node_id: ElementId,
    pub status: NodeInstanceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub awaiting: Option<Await>,
    pub entered_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sla_due_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_item_id: Option<WorkItemId>,
    /// Source nodes whose executable connections have arrived, for joins.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub arrivals: BTreeSet<ElementId>,
}

impl NodeInstance {
    fn new(node_id: ElementId) -> Self {
        Self {
            id: NodeInstanceId::generate(),
            node_id,
            status: NodeInstanceStatus::Active,
            awaiting: None,
            entered_at: Utc::now(),
            left_at: None,
            sla_due_date: None,
            work_item_id: None,
            arrivals: BTreeSet::new(),
        }
    }

    pub fn is_live(&self) -> bool {
        self.status == NodeInstanceStatus::Active
    }
}

// ── Work queue ───────────────────────────────────────────────────────────

/// One pending step of the advance walk.
enum Arrival {
    /// Control flow along an executable connection.
    Flow { node_id: ElementId, from: ElementId },
    /// Direct trigger with no incoming edge: start nodes, boundary events,
    /// exception handlers, ad-hoc node triggering.
    Trigger { node_id: ElementId },
    /// Resume a node instance waiting on an event.
    Resume {
        node_instance_id: NodeInstanceId,
        payload: Value,
    },
    /// Spawn an event subprocess for a matched channel.
    Subprocess {
        node_id: ElementId,
        channel: String,
        payload: Value,
    },
}

fn node_within(def: &ProcessDefinition, node_id: &ElementId, container_id: &ElementId) -> bool {
    let mut current = def.node(node_id).and_then(|n| n.container.clone());
    while let Some(cid) = current {
        if &cid == container_id {
            return true;
        }
        current = def.node(&cid).and_then(|n| n.container.clone());
    }
    false
}

fn boundary_accepts(node: &Node, channel: &str) -> bool {
    let NodeKind::Boundary {
        attached_to, event, ..
    } = &node.kind
    else {
        return false;
    };
    match event {
        BoundaryEvent::Signal { channel: wanted } => wanted == channel,
        BoundaryEvent::Error { code, .. } => {
            channel == error_channel(attached_to, code.as_deref())
        }
        BoundaryEvent::Timer { .. } => channel == timer_channel(&node.id),
    }
}

// ── Process instance ─────────────────────────────────────────────────────

/// One running execution of a process definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInstance {
    pub id: ProcessInstanceId,
    pub definition_id: String,
    pub definition_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_key: Option<String>,
    pub status: InstanceStatus,
    /// View mode of this copy; a read-only view rejects every mutation.
    /// Set by the store on load, never persisted.
    #[serde(skip, default)]
    pub read_mode: ReadMode,
    pub variables: HashMap<String, Value>,
    pub node_instances: HashMap<NodeInstanceId, NodeInstance>,
    pub work_items: HashMap<WorkItemId, WorkItem>,
    /// Present exactly while `status` is `Error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ProcessError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub milestones: Vec<Milestone>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    /// Correlation keys this instance subscribed to, at most once each.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub correlation_subscriptions: BTreeSet<String>,
    /// Key name to recorded composite correlation value, in key form.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub correlation_values: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sla_due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Events accumulated during the current mutation; drained by the engine.
    #[serde(skip, default)]
    pending_events: Vec<ProcessEvent>,
}

impl ProcessInstance {
    pub fn new(definition: &ProcessDefinition) -> Self {
        Self {
            id: ProcessInstanceId::generate(),
            definition_id: definition.id.clone(),
            definition_version: definition.version.clone(),
            business_key: None,
            status: InstanceStatus::Pending,
            read_mode: ReadMode::Mutable,
            variables: HashMap::new(),
            node_instances: HashMap::new(),
            work_items: HashMap::new(),
            error: None,
            milestones: Vec::new(),
            headers: HashMap::new(),
            reference_id: None,
            correlation_subscriptions: BTreeSet::new(),
            correlation_values: HashMap::new(),
            sla_due_date: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            pending_events: Vec::new(),
        }
    }

    /// Empty shell for stores that rebuild an instance from a snapshot.
    ///
    /// Every field other than the identity triple starts at its default;
    /// the caller fills the public fields afterwards.
    pub fn shell(
        id: ProcessInstanceId,
        definition_id: impl Into<String>,
        definition_version: impl Into<String>,
    ) -> Self {
        Self {
            id,
            definition_id: definition_id.into(),
            definition_version: definition_version.into(),
            business_key: None,
            status: InstanceStatus::Pending,
            read_mode: ReadMode::Mutable,
            variables: HashMap::new(),
            node_instances: HashMap::new(),
            work_items: HashMap::new(),
            error: None,
            milestones: Vec::new(),
            headers: HashMap::new(),
            reference_id: None,
            correlation_subscriptions: BTreeSet::new(),
            correlation_values: HashMap::new(),
            sla_due_date: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            pending_events: Vec::new(),
        }
    }

    pub fn with_business_key(mut self, key: impl Into<String>) -> Self {
        self.business_key = Some(key.into());
        self
    }

    /// Seed a variable before start; start applies declared defaults only
    /// where no value is present.
    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Start the instance by resolving a start node against the trigger.
    ///
    /// Resolution order: with no trigger, the first start node carrying no
    /// event or timer trigger; with `"timer"`, the first timer start; then
    /// the first start whose event filter accepts the trigger; with
    /// `"conditional"`, the first conditional start. No match fails with
    /// `NotFound` and the instance stays `Pending`.
    pub fn start(
        &mut self,
        def: &ProcessDefinition,
        actions: &ActionRegistry,
        trigger: Option<&str>,
        payload: &Value,
        reference_id: Option<String>,
        headers: HashMap<String, String>,
    ) -> EngineResult<()> {
        self.ensure_mutable("start")?;
        self.ensure_pending()?;
        let start_id = select_start_node(def, trigger)
            .ok_or_else(|| match trigger {
                Some(t) => EngineError::NotFound(format!("start node accepting trigger '{t}'")),
                None => EngineError::NotFound("start node".to_string()),
            })?
            .id
            .clone();
        self.begin(def, reference_id, headers);
        if let Some(node) = def.node(&start_id) {
            if let Some(var) = node.metadata.get(EVENT_VARIABLE_KEY) {
                if !payload.is_null() {
                    self.set_variable_internal(var.clone(), payload.clone());
                }
            }
        }
        self.run_queue(
            def,
            actions,
            VecDeque::from([Arrival::Trigger { node_id: start_id }]),
        )
    }

    /// Start the instance directly at the given definition node.
    pub fn start_from(
        &mut self,
        def: &ProcessDefinition,
        actions: &ActionRegistry,
        node_id: &ElementId,
        reference_id: Option<String>,
        headers: HashMap<String, String>,
    ) -> EngineResult<()> {
        self.ensure_mutable("start_from")?;
        self.ensure_pending()?;
        if def.node(node_id).is_none() {
            return Err(EngineError::NodeNotFound {
                process_instance_id: self.id.clone(),
                node_id: node_id.clone(),
            });
        }
        self.begin(def, reference_id, headers);
        self.run_queue(
            def,
            actions,
            VecDeque::from([Arrival::Trigger {
                node_id: node_id.clone(),
            }]),
        )
    }

    fn begin(
        &mut self,
        def: &ProcessDefinition,
        reference_id: Option<String>,
        headers: HashMap<String, String>,
    ) {
        self.status = InstanceStatus::Active;
        self.started_at = Some(Utc::now());
        self.reference_id = reference_id;
        self.headers = headers;
        if let Some(root) = def.container(None) {
            for var in &root.scopes.variables.variables {
                if let Some(default) = &var.default {
                    self.variables
                        .entry(var.name.clone())
                        .or_insert_with(|| default.clone());
                }
            }
        }
        info!(
            process_instance_id = %self.id,
            definition_id = %self.definition_id,
            "process instance started"
        );
        self.record(ProcessEvent::InstanceStarted {
            process_instance_id: self.id.clone(),
            definition_id: self.definition_id.clone(),
        });
    }

    /// Dispatch a signal to every matching receiver: waiting event nodes,
    /// boundary events armed on live host activities, and event subprocesses.
    ///
    /// Fails with `IllegalSignal` when the instance is not active or nothing
    /// listens on the channel; the failure leaves state untouched.
    pub fn send(
        &mut self,
        def: &ProcessDefinition,
        actions: &ActionRegistry,
        signal: &Signal,
    ) -> EngineResult<()> {
        self.ensure_mutable("send")?;
        if self.status != InstanceStatus::Active {
            return Err(EngineError::IllegalSignal {
                process_instance_id: self.id.clone(),
                channel: signal.channel.clone(),
            });
        }
        let mut queue = VecDeque::new();
        let receivers = self.dispatch_channel(def, &signal.channel, &signal.payload, &mut queue);
        if receivers == 0 {
            return Err(EngineError::IllegalSignal {
                process_instance_id: self.id.clone(),
                channel: signal.channel.clone(),
            });
        }
        debug!(
            process_instance_id = %self.id,
            channel = %signal.channel,
            receivers,
            "signal dispatched"
        );
        self.record(ProcessEvent::SignalReceived {
            process_instance_id: self.id.clone(),
            channel: signal.channel.clone(),
        });
        self.run_queue(def, actions, queue)
    }

    /// Move an active instance to `Suspended`; signals are rejected until
    /// `resume`.
    pub fn suspend(&mut self) -> EngineResult<()> {
        self.ensure_mutable("suspend")?;
        self.ensure_not_terminal()?;
        if self.status != InstanceStatus::Active {
            return Err(EngineError::IllegalState(format!(
                "cannot suspend a {} process instance",
                self.status
            )));
        }
        self.status = InstanceStatus::Suspended;
        self.record(ProcessEvent::InstanceSuspended {
            process_instance_id: self.id.clone(),
        });
        Ok(())
    }

    pub fn resume(&mut self) -> EngineResult<()> {
        self.ensure_mutable("resume")?;
        if self.status != InstanceStatus::Suspended {
            return Err(EngineError::IllegalState(format!(
                "cannot resume a {} process instance",
                self.status
            )));
        }
        self.status = InstanceStatus::Active;
        self.record(ProcessEvent::InstanceResumed {
            process_instance_id: self.id.clone(),
        });
        Ok(())
    }

    /// Cancel every live node instance, abort their work items, and move the
    /// instance to the terminal `Aborted` status.
    pub fn abort(&mut self) -> EngineResult<()> {
        self.ensure_mutable("abort")?;
        self.ensure_not_terminal()?;
        self.cancel_all_live();
        self.status = InstanceStatus::Aborted;
        self.completed_at = Some(Utc::now());
        info!(process_instance_id = %self.id, "process instance aborted");
        self.record(ProcessEvent::InstanceAborted {
            process_instance_id: self.id.clone(),
        });
        Ok(())
    }

    /// Fail fast when the instance carries a captured fault.
    pub fn check_error(&self) -> EngineResult<()> {
        match &self.error {
            Some(error) => Err(EngineError::Faulted {
                process_instance_id: self.id.clone(),
                failed_node_id: error.failed_node_id.clone(),
                message: error.error_message.clone(),
            }),
            None => Ok(()),
        }
    }

    // ── Node instance operations ─────────────────────────────────────────

    /// Trigger a definition node ad hoc.
    pub fn trigger_node(
        &mut self,
        def: &ProcessDefinition,
        actions: &ActionRegistry,
        node_id: &ElementId,
    ) -> EngineResult<()> {
        self.ensure_mutable("trigger_node")?;
        self.ensure_not_terminal()?;
        if self.status != InstanceStatus::Active {
            return Err(EngineError::IllegalState(format!(
                "cannot trigger a node on a {} process instance",
                self.status
            )));
        }
        if def.node(node_id).is_none() {
            return Err(EngineError::NodeNotFound {
                process_instance_id: self.id.clone(),
                node_id: node_id.clone(),
            });
        }
        self.run_queue(
            def,
            actions,
            VecDeque::from([Arrival::Trigger {
                node_id: node_id.clone(),
            }]),
        )
    }

    /// Cancel one node instance by id. Does not advance the flow and runs no
    /// completion check; pair with `trigger_node` to reroute manually.
    pub fn cancel_node_instance(&mut self, node_instance_id: &NodeInstanceId) -> EngineResult<()> {
        self.ensure_mutable("cancel_node_instance")?;
        if !self.node_instances.contains_key(node_instance_id) {
            return Err(EngineError::NodeInstanceNotFound {
                process_instance_id: self.id.clone(),
                node_instance_id: node_instance_id.clone(),
            });
        }
        self.cancel_record(node_instance_id);
        Ok(())
    }

    /// Cancel a node instance and trigger its definition node fresh.
    ///
    /// On an `Error` instance this is the recovery path: the captured fault
    /// is cleared and the instance returns to `Active` before the node runs.
    pub fn retrigger_node_instance(
        &mut self,
        def: &ProcessDefinition,
        actions: &ActionRegistry,
        node_instance_id: &NodeInstanceId,
    ) -> EngineResult<()> {
        self.ensure_mutable("retrigger_node_instance")?;
        self.ensure_not_terminal()?;
        let node_id = self
            .node_instances
            .get(node_instance_id)
            .map(|ni| ni.node_id.clone())
            .ok_or_else(|| EngineError::NodeInstanceNotFound {
                process_instance_id: self.id.clone(),
                node_instance_id: node_instance_id.clone(),
            })?;
        self.cancel_record(node_instance_id);
        if self.status == InstanceStatus::Error {
            self.error = None;
            self.status = InstanceStatus::Active;
            info!(
                process_instance_id = %self.id,
                node_id = %node_id,
                "recovering faulted instance by retrigger"
            );
        }
        if self.status != InstanceStatus::Active {
            return Err(EngineError::IllegalState(format!(
                "cannot retrigger a node on a {} process instance",
                self.status
            )));
        }
        self.run_queue(
            def,
            actions,
            VecDeque::from([Arrival::Trigger { node_id }]),
        )
    }

    // ── Work item operations ─────────────────────────────────────────────

    /// Complete a work item: record results, merge them into the instance
    /// variables, and advance the flow past the owning node.
    pub fn complete_work_item(
        &mut self,
        def: &ProcessDefinition,
        actions: &ActionRegistry,
        work_item_id: &WorkItemId,
        results: HashMap<String, Value>,
        policies: &[&dyn WorkItemPolicy],
    ) -> EngineResult<()> {
        self.ensure_mutable("complete_work_item")?;
        self.ensure_not_terminal()?;
        let node_instance_id = self.claim_work_item(work_item_id, policies)?;
        if let Some(wi) = self.work_items.get_mut(work_item_id) {
            wi.state = WorkItemState::Completed;
            wi.results = results.clone();
        }
        self.record(ProcessEvent::WorkItemCompleted {
            process_instance_id: self.id.clone(),
            work_item_id: work_item_id.clone(),
        });
        for (name, value) in results {
            self.set_variable_internal(name, value);
        }
        self.leave_work_item_node(def, actions, &node_instance_id)
    }

    /// Abort a work item. The flow continues past the owning node, but no
    /// results are recorded.
    pub fn abort_work_item(
        &mut self,
        def: &ProcessDefinition,
        actions: &ActionRegistry,
        work_item_id: &WorkItemId,
        policies: &[&dyn WorkItemPolicy],
    ) -> EngineResult<()> {
        self.ensure_mutable("abort_work_item")?;
        self.ensure_not_terminal()?;
        let node_instance_id = self.claim_work_item(work_item_id, policies)?;
        if let Some(wi) = self.work_items.get_mut(work_item_id) {
            wi.state = WorkItemState::Aborted;
        }
        self.record(ProcessEvent::WorkItemAborted {
            process_instance_id: self.id.clone(),
            work_item_id: work_item_id.clone(),
        });
        self.leave_work_item_node(def, actions, &node_instance_id)
    }

    /// Record a lifecycle phase on a work item without advancing the flow.
    pub fn transition_work_item(
        &mut self,
        work_item_id: &WorkItemId,
        phase: impl Into<String>,
        data: HashMap<String, Value>,
        policies: &[&dyn WorkItemPolicy],
    ) -> EngineResult<()> {
        self.ensure_mutable("transition_work_item")?;
        self.ensure_not_terminal()?;
        self.claim_work_item(work_item_id, policies)?;
        let phase = phase.into();
        if let Some(wi) = self.work_items.get_mut(work_item_id) {
            debug!(work_item_id = %work_item_id, phase = %phase, "work item transitioned");
            wi.phase = Some(phase);
            wi.parameters.extend(data);
        }
        Ok(())
    }

    /// Merge parameters into a work item and return the updated copy.
    pub fn update_work_item(
        &mut self,
        work_item_id: &WorkItemId,
        parameters: HashMap<String, Value>,
        policies: &[&dyn WorkItemPolicy],
    ) -> EngineResult<WorkItem> {
        self.ensure_mutable("update_work_item")?;
        self.ensure_not_terminal()?;
        self.claim_work_item(work_item_id, policies)?;
        match self.work_items.get_mut(work_item_id) {
            Some(wi) => {
                wi.parameters.extend(parameters);
                Ok(wi.clone())
            }
            None => Err(EngineError::WorkItemNotFound {
                process_instance_id: self.id.clone(),
                work_item_id: work_item_id.clone(),
            }),
        }
    }

    /// Shared guard for work-item mutations: instance status, then existence,
    /// then policies, then liveness. Returns the owning node instance id.
    ///
    /// A suspended or faulted instance rejects the mutation outright; letting
    /// it through would consume the item while `run_queue` drops the
    /// continuation, stranding the flow after `resume`.
    fn claim_work_item(
        &self,
        work_item_id: &WorkItemId,
        policies: &[&dyn WorkItemPolicy],
    ) -> EngineResult<NodeInstanceId> {
        if self.status != InstanceStatus::Active {
            return Err(EngineError::IllegalState(format!(
                "cannot mutate a work item on a {} process instance",
                self.status
            )));
        }
        let wi = self
            .work_items
            .get(work_item_id)
            .ok_or_else(|| EngineError::WorkItemNotFound {
                process_instance_id: self.id.clone(),
                work_item_id: work_item_id.clone(),
            })?;
        enforce_policies(wi, policies)?;
        if wi.state.is_terminal() {
            return Err(EngineError::IllegalState(format!(
                "work item {} is already {:?}",
                wi.id, wi.state
            )));
        }
        Ok(wi.node_instance_id.clone())
    }

    fn leave_work_item_node(
        &mut self,
        def: &ProcessDefinition,
        actions: &ActionRegistry,
        node_instance_id: &NodeInstanceId,
    ) -> EngineResult<()> {
        let Some(ni) = self.node_instances.get(node_instance_id) else {
            return Ok(());
        };
        if !ni.is_live() {
            return Ok(());
        }
        let node_id = ni.node_id.clone();
        let Some(node) = def.node(&node_id) else {
            return Ok(());
        };
        let mut queue = VecDeque::new();
        self.finish_node(def, node, node_instance_id, &mut queue);
        self.run_queue(def, actions, queue)
    }

    // ── Variables, SLA, correlation ──────────────────────────────────────

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) -> EngineResult<()> {
        self.ensure_mutable("set_variable")?;
        self.ensure_not_terminal()?;
        self.set_variable_internal(name.into(), value);
        Ok(())
    }

    fn set_variable_internal(&mut self, name: String, value: Value) {
        self.record(ProcessEvent::VariableChanged {
            process_instance_id: self.id.clone(),
            name: name.clone(),
            value: value.clone(),
        });
        self.variables.insert(name, value);
    }

    /// Set the SLA due date watched by the external timer service.
    pub fn update_process_instance_sla(&mut self, due: DateTime<Utc>) -> EngineResult<()> {
        self.ensure_mutable("update_process_instance_sla")?;
        self.ensure_not_terminal()?;
        self.sla_due_date = Some(due);
        self.record(ProcessEvent::SlaUpdated {
            process_instance_id: self.id.clone(),
            node_instance_id: None,
            due,
        });
        Ok(())
    }

    pub fn update_node_instance_sla(
        &mut self,
        node_instance_id: &NodeInstanceId,
        due: DateTime<Utc>,
    ) -> EngineResult<()> {
        self.ensure_mutable("update_node_instance_sla")?;
        self.ensure_not_terminal()?;
        match self.node_instances.get_mut(node_instance_id) {
            Some(ni) => {
                ni.sla_due_date = Some(due);
                self.record(ProcessEvent::SlaUpdated {
                    process_instance_id: self.id.clone(),
                    node_instance_id: Some(node_instance_id.clone()),
                    due,
                });
                Ok(())
            }
            None => Err(EngineError::NodeInstanceNotFound {
                process_instance_id: self.id.clone(),
                node_instance_id: node_instance_id.clone(),
            }),
        }
    }

    /// Subscribe to a correlation key and record the composite value used to
    /// locate this instance later. Re-subscription is a no-op.
    pub fn subscribe_correlation(
        &mut self,
        def: &ProcessDefinition,
        key_name: &str,
        value: &CorrelationValue,
    ) -> EngineResult<()> {
        self.ensure_mutable("subscribe_correlation")?;
        if def.correlations().key(key_name).is_none() {
            return Err(EngineError::NotFound(format!(
                "correlation key '{key_name}'"
            )));
        }
        if self.correlation_subscriptions.contains(key_name) {
            return Ok(());
        }
        self.correlation_subscriptions.insert(key_name.to_string());
        self.correlation_values
            .insert(key_name.to_string(), value.as_key());
        Ok(())
    }

    /// Whether a candidate correlation value matches this instance's
    /// recorded value for the key.
    pub fn correlates(&self, key_name: &str, candidate: &CorrelationValue) -> bool {
        self.correlation_values
            .get(key_name)
            .is_some_and(|recorded| recorded == &candidate.as_key())
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn node_instance(&self, id: &NodeInstanceId) -> Option<&NodeInstance> {
        self.node_instances.get(id)
    }

    pub fn live_node_instances(&self) -> Vec<&NodeInstance> {
        self.node_instances.values().filter(|ni| ni.is_live()).collect()
    }

    pub fn node_instances_for(&self, node_id: &ElementId) -> Vec<&NodeInstance> {
        self.node_instances
            .values()
            .filter(|ni| &ni.node_id == node_id)
            .collect()
    }

    pub fn work_item(&self, id: &WorkItemId) -> Option<&WorkItem> {
        self.work_items.get(id)
    }

    pub fn active_work_items(&self) -> Vec<&WorkItem> {
        self.work_items
            .values()
            .filter(|wi| wi.state == WorkItemState::Active)
            .collect()
    }

    pub fn milestone(&self, name: &str) -> Option<&Milestone> {
        self.milestones.iter().find(|m| m.name == name)
    }

    /// Take the events accumulated since the last drain.
    pub fn drain_events(&mut self) -> Vec<ProcessEvent> {
        std::mem::take(&mut self.pending_events)
    }

    // ── Guards ───────────────────────────────────────────────────────────

    fn ensure_mutable(&self, op: &str) -> EngineResult<()> {
        if self.read_mode == ReadMode::ReadOnly {
            return Err(EngineError::UnsupportedOperation(format!(
                "{op} on a read-only process instance"
            )));
        }
        Ok(())
    }

    fn ensure_not_terminal(&self) -> EngineResult<()> {
        if self.status.is_terminal() {
            return Err(EngineError::TerminalInstance {
                process_instance_id: self.id.clone(),
                status: self.status,
            });
        }
        Ok(())
    }

    fn ensure_pending(&self) -> EngineResult<()> {
        if self.status != InstanceStatus::Pending {
            return Err(EngineError::IllegalState(format!(
                "process instance {} was already started",
                self.id
            )));
        }
        Ok(())
    }

    fn record(&mut self, event: ProcessEvent) {
        self.pending_events.push(event);
    }

    // ── Advance walk ─────────────────────────────────────────────────────

    fn run_queue(
        &mut self,
        def: &ProcessDefinition,
        actions: &ActionRegistry,
        mut queue: VecDeque<Arrival>,
    ) -> EngineResult<()> {
        while let Some(arrival) = queue.pop_front() {
            if self.status != InstanceStatus::Active {
                break;
            }
            match arrival {
                Arrival::Flow { node_id, from } => {
                    self.enter(def, actions, &node_id, Some(from), &mut queue)?
                }
                Arrival::Trigger { node_id } => {
                    self.enter(def, actions, &node_id, None, &mut queue)?
                }
                Arrival::Resume {
                    node_instance_id,
                    payload,
                } => self.resume_event_node(def, &node_instance_id, &payload, &mut queue),
                Arrival::Subprocess {
                    node_id,
                    channel,
                    payload,
                } => self.spawn_event_subprocess(def, &node_id, &channel, &payload, &mut queue),
            }
        }
        self.try_complete();
        Ok(())
    }

    fn enter(
        &mut self,
        def: &ProcessDefinition,
        actions: &ActionRegistry,
        node_id: &ElementId,
        from: Option<ElementId>,
        queue: &mut VecDeque<Arrival>,
    ) -> EngineResult<()> {
        let Some(node) = def.node(node_id) else {
            return Err(EngineError::NodeNotFound {
                process_instance_id: self.id.clone(),
                node_id: node_id.clone(),
            });
        };
        if matches!(
            node.kind,
            NodeKind::Gateway {
                gateway: GatewayKind::Parallel
            }
        ) && def.executable_incoming_sources(node_id).len() > 1
        {
            self.arrive_at_join(def, node, from, queue);
            return Ok(());
        }
        self.execute_node(def, actions, node, queue);
        Ok(())
    }

    fn execute_node(
        &mut self,
        def: &ProcessDefinition,
        actions: &ActionRegistry,
        node: &Node,
        queue: &mut VecDeque<Arrival>,
    ) {
        let ni_id = self.spawn_node_instance(node);
        match &node.kind {
            NodeKind::Start => self.finish_node(def, node, &ni_id, queue),

            NodeKind::End { terminating } => {
                self.finish_node(def, node, &ni_id, queue);
                if *terminating {
                    self.cancel_all_live();
                    queue.clear();
                }
            }

            NodeKind::Task { action } => match action {
                None => self.finish_node(def, node, &ni_id, queue),
                Some(name) => match actions.action(name) {
                    None => self.handle_fault(
                        def,
                        node,
                        &ni_id,
                        NodeFault::new(format!("no action registered under '{name}'")),
                        queue,
                    ),
                    Some(callable) => {
                        let callable = callable.clone();
                        let mut scratch = self.variables.clone();
                        let outcome = {
                            let mut ctx = ActionContext {
                                process_instance_id: &self.id,
                                node_id: &node.id,
                                variables: &mut scratch,
                                headers: &self.headers,
                            };
                            callable(&mut ctx)
                        };
                        match outcome {
                            Ok(()) => {
                                self.variables = scratch;
                                self.finish_node(def, node, &ni_id, queue);
                            }
                            Err(fault) => self.handle_fault(def, node, &ni_id, fault, queue),
                        }
                    }
                },
            },

            NodeKind::WorkItemTask { work_item_name } => {
                let parameters = self.work_item_parameters(def, node);
                let wi = WorkItem::new(
                    self.id.clone(),
                    node.id.clone(),
                    ni_id.clone(),
                    work_item_name.clone(),
                    parameters,
                );
                let work_item_id = wi.id.clone();
                self.record(ProcessEvent::WorkItemCreated {
                    process_instance_id: self.id.clone(),
                    work_item_id: work_item_id.clone(),
                    name: wi.name.clone(),
                });
                self.work_items.insert(work_item_id.clone(), wi);
                if let Some(ni) = self.node_instances.get_mut(&ni_id) {
                    ni.awaiting = Some(Await::WorkItem);
                    ni.work_item_id = Some(work_item_id);
                }
            }

            NodeKind::Gateway {
                gateway: GatewayKind::Exclusive,
            } => self.leave_exclusive_gateway(def, actions, node, &ni_id, queue),

            NodeKind::Gateway {
                gateway: GatewayKind::Parallel,
            } => self.finish_node(def, node, &ni_id, queue),

            NodeKind::Event => {
                if let Some(ni) = self.node_instances.get_mut(&ni_id) {
                    ni.awaiting = Some(Await::Event);
                }
            }

            NodeKind::Boundary { .. } => {
                self.finish_node(def, node, &ni_id, queue);
                for action in &node.exit_actions {
                    match action {
                        ExitAction::CancelNodeInstance { node_id } => {
                            self.cancel_live_instances_of(def, node_id, queue);
                        }
                    }
                }
            }

            NodeKind::Composite => {
                if let Some(ni) = self.node_instances.get_mut(&ni_id) {
                    ni.awaiting = Some(Await::Children);
                }
                for start in def.start_nodes(Some(&node.id)) {
                    if !start.has_event_trigger() && !start.has_timer_trigger() {
                        queue.push_back(Arrival::Trigger {
                            node_id: start.id.clone(),
                        });
                    }
                }
            }

            // Entered only through signal dispatch; a flow arrival leaves it
            // waiting for its event starts.
            NodeKind::EventSubprocess => {
                if let Some(ni) = self.node_instances.get_mut(&ni_id) {
                    ni.awaiting = Some(Await::Children);
                }
            }
        }
    }

    fn leave_exclusive_gateway(
        &mut self,
        def: &ProcessDefinition,
        actions: &ActionRegistry,
        node: &Node,
        ni_id: &NodeInstanceId,
        queue: &mut VecDeque<Arrival>,
    ) {
        let outgoing = def.executable_outgoing(&node.id);
        let mut chosen: Option<ElementId> = None;
        for conn in &outgoing {
            let Some(name) = &conn.condition else {
                continue;
            };
            let Some(condition) = actions.condition(name) else {
                self.handle_fault(
                    def,
                    node,
                    ni_id,
                    NodeFault::new(format!("no condition registered under '{name}'")),
                    queue,
                );
                return;
            };
            let condition = condition.clone();
            if condition(&self.variables) {
                chosen = Some(conn.to.clone());
                break;
            }
        }
        // Fall back to the first unconditional connection as the default path.
        let target = chosen.or_else(|| {
            outgoing
                .iter()
                .find(|c| c.condition.is_none())
                .map(|c| c.to.clone())
        });
        match target {
            Some(target) => {
                self.mark_completed(node, ni_id);
                self.continue_from(def, node, &[target], queue);
            }
            None => self.handle_fault(
                def,
                node,
                ni_id,
                NodeFault::new(format!(
                    "no outgoing connection satisfied at gateway '{}'",
                    node.id
                )),
                queue,
            ),
        }
    }

    fn arrive_at_join(
        &mut self,
        def: &ProcessDefinition,
        node: &Node,
        from: Option<ElementId>,
        queue: &mut VecDeque<Arrival>,
    ) {
        let required: BTreeSet<ElementId> = def
            .executable_incoming_sources(&node.id)
            .into_iter()
            .cloned()
            .collect();
        let existing = self
            .node_instances
            .values()
            .find(|ni| ni.is_live() && ni.node_id == node.id)
            .map(|ni| ni.id.clone());
        let ni_id = match existing {
            Some(id) => id,
            None => {
                let id = self.spawn_node_instance(node);
                if let Some(ni) = self.node_instances.get_mut(&id) {
                    ni.awaiting = Some(Await::Join);
                }
                id
            }
        };
        let complete = match self.node_instances.get_mut(&ni_id) {
            Some(ni) => {
                if let Some(from) = from {
                    ni.arrivals.insert(from);
                }
                required.is_subset(&ni.arrivals)
            }
            None => false,
        };
        if complete {
            self.finish_node(def, node, &ni_id, queue);
        }
    }

    // ── Node instance bookkeeping ────────────────────────────────────────

    fn spawn_node_instance(&mut self, node: &Node) -> NodeInstanceId {
        let ni = NodeInstance::new(node.id.clone());
        let id = ni.id.clone();
        debug!(
            process_instance_id = %self.id,
            node_id = %node.id,
            node_instance_id = %id,
            "node triggered"
        );
        self.record(ProcessEvent::NodeTriggered {
            process_instance_id: self.id.clone(),
            node_instance_id: id.clone(),
            node_id: node.id.clone(),
        });
        self.node_instances.insert(id.clone(), ni);
        id
    }

    /// Complete a node instance and continue along its executable outgoing
    /// connections.
    fn finish_node(
        &mut self,
        def: &ProcessDefinition,
        node: &Node,
        ni_id: &NodeInstanceId,
        queue: &mut VecDeque<Arrival>,
    ) {
        self.mark_completed(node, ni_id);
        let targets: Vec<ElementId> = def
            .executable_outgoing(&node.id)
            .iter()
            .map(|c| c.to.clone())
            .collect();
        self.continue_from(def, node, &targets, queue);
    }

    fn mark_completed(&mut self, node: &Node, ni_id: &NodeInstanceId) {
        if let Some(ni) = self.node_instances.get_mut(ni_id) {
            ni.status = NodeInstanceStatus::Completed;
            ni.awaiting = None;
            ni.left_at = Some(Utc::now());
        }
        self.record(ProcessEvent::NodeCompleted {
            process_instance_id: self.id.clone(),
            node_instance_id: ni_id.clone(),
            node_id: node.id.clone(),
        });
        if let Some(name) = node.milestone_name() {
            if self.milestone(name).is_none() {
                self.milestones.push(Milestone::reached(name));
                self.record(ProcessEvent::MilestoneReached {
                    process_instance_id: self.id.clone(),
                    name: name.to_string(),
                });
            }
        }
    }

    fn continue_from(
        &mut self,
        def: &ProcessDefinition,
        node: &Node,
        targets: &[ElementId],
        queue: &mut VecDeque<Arrival>,
    ) {
        for target in targets {
            queue.push_back(Arrival::Flow {
                node_id: target.clone(),
                from: node.id.clone(),
            });
        }
        if let Some(container_id) = node.container.clone() {
            self.check_container_completion(def, &container_id, queue);
        }
    }

    /// Complete a composite once nothing inside it is live or queued.
    fn check_container_completion(
        &mut self,
        def: &ProcessDefinition,
        container_id: &ElementId,
        queue: &mut VecDeque<Arrival>,
    ) {
        let pending_inside = queue.iter().any(|arrival| {
            self.arrival_node(arrival)
                .map(|node_id| node_within(def, &node_id, container_id))
                .unwrap_or(false)
        });
        if pending_inside {
            return;
        }
        let live_inside = self
            .node_instances
            .values()
            .any(|ni| ni.is_live() && node_within(def, &ni.node_id, container_id));
        if live_inside {
            return;
        }
        let Some(ni_id) = self
            .node_instances
            .values()
            .find(|ni| ni.is_live() && ni.node_id == *container_id)
            .map(|ni| ni.id.clone())
        else {
            return;
        };
        let Some(node) = def.node(container_id) else {
            return;
        };
        debug!(
            process_instance_id = %self.id,
            container_id = %container_id,
            "container completed"
        );
        self.finish_node(def, node, &ni_id, queue);
    }

    fn arrival_node(&self, arrival: &Arrival) -> Option<ElementId> {
        match arrival {
            Arrival::Flow { node_id, .. }
            | Arrival::Trigger { node_id }
            | Arrival::Subprocess { node_id, .. } => Some(node_id.clone()),
            Arrival::Resume {
                node_instance_id, ..
            } => self
                .node_instances
                .get(node_instance_id)
                .map(|ni| ni.node_id.clone()),
        }
    }

    fn cancel_record(&mut self, ni_id: &NodeInstanceId) {
        let Some(ni) = self.node_instances.get_mut(ni_id) else {
            return;
        };
        if !ni.is_live() {
            return;
        }
        ni.status = NodeInstanceStatus::Cancelled;
        ni.awaiting = None;
        ni.left_at = Some(Utc::now());
        let node_id = ni.node_id.clone();
        let work_item_id = ni.work_item_id.clone();
        self.record(ProcessEvent::NodeCancelled {
            process_instance_id: self.id.clone(),
            node_instance_id: ni_id.clone(),
            node_id,
        });
        if let Some(work_item_id) = work_item_id {
            if let Some(wi) = self.work_items.get_mut(&work_item_id) {
                if wi.state == WorkItemState::Active {
                    wi.state = WorkItemState::Aborted;
                    self.record(ProcessEvent::WorkItemAborted {
                        process_instance_id: self.id.clone(),
                        work_item_id,
                    });
                }
            }
        }
    }

    /// Cancel every live instance of one definition node, then re-check the
    /// node's container. Used by boundary exit actions and handlers.
    ///
    /// Cancelling a composite cascades: everything live inside its container,
    /// transitively, is cancelled with it, and queued arrivals headed into
    /// the scope are dropped so no token re-enters it.
    fn cancel_live_instances_of(
        &mut self,
        def: &ProcessDefinition,
        node_id: &ElementId,
        queue: &mut VecDeque<Arrival>,
    ) {
        let targets: Vec<NodeInstanceId> = self
            .node_instances
            .values()
            .filter(|ni| {
                ni.is_live() && (&ni.node_id == node_id || node_within(def, &ni.node_id, node_id))
            })
            .map(|ni| ni.id.clone())
            .collect();
        for ni_id in &targets {
            self.cancel_record(ni_id);
        }
        if targets.is_empty() {
            return;
        }
        queue.retain(|arrival| {
            self.arrival_node(arrival)
                .map(|target| !node_within(def, &target, node_id))
                .unwrap_or(false)
        });
        if let Some(container_id) = def.node(node_id).and_then(|n| n.container.clone()) {
            self.check_container_completion(def, &container_id, queue);
        }
    }

    fn cancel_all_live(&mut self) {
        let live: Vec<NodeInstanceId> = self
            .node_instances
            .values()
            .filter(|ni| ni.is_live())
            .map(|ni| ni.id.clone())
            .collect();
        for ni_id in &live {
            self.cancel_record(ni_id);
        }
    }

    fn try_complete(&mut self) {
        if self.status == InstanceStatus::Active
            && self.started_at.is_some()
            && !self.node_instances.values().any(|ni| ni.is_live())
        {
            self.status = InstanceStatus::Completed;
            self.completed_at = Some(Utc::now());
            info!(process_instance_id = %self.id, "process instance completed");
            self.record(ProcessEvent::InstanceCompleted {
                process_instance_id: self.id.clone(),
            });
        }
    }

    // ── Signal dispatch ──────────────────────────────────────────────────

    /// Enqueue every receiver of a channel without mutating anything, so a
    /// zero-receiver dispatch can fail cleanly.
    fn dispatch_channel(
        &self,
        def: &ProcessDefinition,
        channel: &str,
        payload: &Value,
        queue: &mut VecDeque<Arrival>,
    ) -> usize {
        let mut receivers = 0;

        // Waiting intermediate catch events.
        for ni in self.node_instances.values() {
            if ni.is_live() && ni.awaiting == Some(Await::Event) {
                let accepts = def
                    .node(&ni.node_id)
                    .map(|n| n.accepts_channel(channel))
                    .unwrap_or(false);
                if accepts {
                    queue.push_back(Arrival::Resume {
                        node_instance_id: ni.id.clone(),
                        payload: payload.clone(),
                    });
                    receivers += 1;
                }
            }
        }

        // Boundary events armed on live host activities.
        let mut seen = BTreeSet::new();
        for ni in self.node_instances.values().filter(|ni| ni.is_live()) {
            for boundary in def.boundary_nodes_for(&ni.node_id) {
                if boundary_accepts(boundary, channel) && seen.insert(boundary.id.clone()) {
                    queue.push_back(Arrival::Trigger {
                        node_id: boundary.id.clone(),
                    });
                    receivers += 1;
                }
            }
        }

        // Event subprocesses whose propagated filters accept the channel.
        for es in def.event_subprocess_nodes() {
            if !es.accepts_channel(channel) {
                continue;
            }
            let scope_live = match &es.container {
                None => true,
                Some(container_id) => self
                    .node_instances
                    .values()
                    .any(|ni| ni.is_live() && ni.node_id == *container_id),
            };
            if scope_live {
                queue.push_back(Arrival::Subprocess {
                    node_id: es.id.clone(),
                    channel: channel.to_string(),
                    payload: payload.clone(),
                });
                receivers += 1;
            }
        }

        receivers
    }

    fn resume_event_node(
        &mut self,
        def: &ProcessDefinition,
        node_instance_id: &NodeInstanceId,
        payload: &Value,
        queue: &mut VecDeque<Arrival>,
    ) {
        // The waiter may have been cancelled earlier in this same walk.
        let Some(ni) = self.node_instances.get(node_instance_id) else {
            return;
        };
        if !ni.is_live() {
            return;
        }
        let node_id = ni.node_id.clone();
        let Some(node) = def.node(&node_id) else {
            return;
        };
        if let Some(var) = node.metadata.get(EVENT_VARIABLE_KEY) {
            if !payload.is_null() {
                self.set_variable_internal(var.clone(), payload.clone());
            }
        }
        self.finish_node(def, node, node_instance_id, queue);
    }

    fn spawn_event_subprocess(
        &mut self,
        def: &ProcessDefinition,
        es_id: &ElementId,
        channel: &str,
        payload: &Value,
        queue: &mut VecDeque<Arrival>,
    ) {
        let Some(es_node) = def.node(es_id) else {
            return;
        };
        let ni_id = self.spawn_node_instance(es_node);
        if let Some(ni) = self.node_instances.get_mut(&ni_id) {
            ni.awaiting = Some(Await::Children);
        }
        for start in def.start_nodes(Some(es_id)) {
            if start.accepts_channel(channel) {
                if let Some(var) = start.metadata.get(EVENT_VARIABLE_KEY) {
                    if !payload.is_null() {
                        self.set_variable_internal(var.clone(), payload.clone());
                    }
                }
                queue.push_back(Arrival::Trigger {
                    node_id: start.id.clone(),
                });
            }
        }
    }

    // ── Fault handling ───────────────────────────────────────────────────

    /// Route a node fault through the exception-scope chain; an unabsorbed
    /// fault moves the instance to `Error` and stops the walk.
    fn handle_fault(
        &mut self,
        def: &ProcessDefinition,
        node: &Node,
        ni_id: &NodeInstanceId,
        fault: NodeFault,
        queue: &mut VecDeque<Arrival>,
    ) {
        warn!(
            process_instance_id = %self.id,
            node_id = %node.id,
            error = %fault,
            "node execution faulted"
        );
        let handler = def
            .scope_chain(&node.id)
            .into_iter()
            .find_map(|scopes| {
                scopes
                    .exception
                    .as_ref()
                    .and_then(|ex| ex.handler_for(fault.code.as_deref()))
            })
            .cloned();
        match handler {
            Some(action) => {
                // The faulted host is still live here, so its boundary
                // events stay armed for the handler's signal.
                self.apply_handler_action(def, &action, node, &fault, queue);
                if let Some(ni) = self.node_instances.get_mut(ni_id) {
                    if ni.is_live() {
                        ni.status = NodeInstanceStatus::Failed;
                        ni.awaiting = None;
                        ni.left_at = Some(Utc::now());
                    }
                }
            }
            None => {
                if let Some(ni) = self.node_instances.get_mut(ni_id) {
                    ni.status = NodeInstanceStatus::Failed;
                    ni.awaiting = None;
                    ni.left_at = Some(Utc::now());
                }
                self.status = InstanceStatus::Error;
                self.error = Some(ProcessError::new(node.id.clone(), fault.message.clone()));
                self.record(ProcessEvent::InstanceFaulted {
                    process_instance_id: self.id.clone(),
                    failed_node_id: node.id.clone(),
                    message: fault.message,
                });
                queue.clear();
            }
        }
    }

    fn apply_handler_action(
        &mut self,
        def: &ProcessDefinition,
        action: &HandlerAction,
        origin: &Node,
        fault: &NodeFault,
        queue: &mut VecDeque<Arrival>,
    ) {
        match action {
            HandlerAction::Signal { channel } => {
                let payload = json!({
                    "nodeId": origin.id.to_string(),
                    "code": fault.code,
                    "message": fault.message,
                });
                let receivers = self.dispatch_channel(def, channel, &payload, queue);
                if receivers == 0 {
                    debug!(channel = %channel, "exception handler signal had no receiver");
                }
            }
            HandlerAction::Cancel { node_id } => {
                self.cancel_live_instances_of(def, node_id, queue);
            }
            HandlerAction::Compensate { target } => {
                let handler = def
                    .scope_chain(&origin.id)
                    .into_iter()
                    .find_map(|scopes| {
                        scopes
                            .compensation
                            .as_ref()
                            .and_then(|comp| comp.handler_for(target))
                    })
                    .cloned();
                match handler {
                    Some(handler_node) => queue.push_back(Arrival::Trigger {
                        node_id: handler_node,
                    }),
                    None => debug!(target = %target, "no compensation handler registered"),
                }
            }
        }
    }

    fn work_item_parameters(
        &self,
        def: &ProcessDefinition,
        node: &Node,
    ) -> HashMap<String, Value> {
        let mut parameters: HashMap<String, Value> = node
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        // A swimlane with an assigned actor restricts the work item to them.
        if let Some(lane) = node.metadata.get(SWIMLANE_KEY) {
            for scopes in def.scope_chain(&node.id) {
                if let Some(lanes) = &scopes.swimlanes {
                    if let Some(swimlane) = lanes.lanes.get(lane) {
                        if let Some(actor) = &swimlane.actor {
                            parameters
                                .insert(ACTOR_PARAM.to_string(), Value::String(actor.clone()));
                        }
                        break;
                    }
                }
            }
        }
        parameters
    }
}

fn select_start_node<'d>(def: &'d ProcessDefinition, trigger: Option<&str>) -> Option<&'d Node> {
    let starts = def.start_nodes(None);
    match trigger {
        None => starts
            .iter()
            .find(|n| !n.has_event_trigger() && !n.has_timer_trigger())
            .copied(),
        Some(trigger) => {
            if trigger == "timer" {
                if let Some(node) = starts.iter().find(|n| n.has_timer_trigger()) {
                    return Some(node);
                }
            }
            if let Some(node) = starts.iter().find(|n| n.accepts_channel(trigger)) {
                return Some(node);
            }
            if trigger == "conditional" {
                if let Some(node) = starts.iter().find(|n| n.has_conditional_trigger()) {
                    return Some(node);
                }
            }
            None
        }
    }
}
