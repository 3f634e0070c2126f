//! Snapshot writer and reader.
//!
//! Write path: encode the payload message, assemble the strategy table that
//! one write session used, optionally sign the payload bytes, then wrap the
//! lot in a [`SnapshotEnvelope`]. Read path, in order: preload the whole
//! stream, parse the envelope, verify the signature, rebuild the strategy
//! table by name, and only then decode the payload. A failure at any step
//! aborts the whole operation; a snapshot is never partially applied.
//!
//! The instance and its pending work items travel in separate envelopes so
//! a store can persist and expire them independently.

use std::collections::HashMap;
use std::io::Read;

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, Verifier};
use prost::Message;
use serde_json::Value;
use tracing::{debug, warn};

use baton_types::{
    ElementId, InstanceStatus, Milestone, NodeInstanceId, ProcessError, ProcessInstanceId,
    WorkItem, WorkItemId, WorkItemState,
};

use baton_runtime::{Await, NodeInstance, NodeInstanceStatus, ProcessInstance};

use crate::error::{MarshalError, MarshalResult};
use crate::strategy::{ReadTable, StrategyRegistry, WriteTable};
use crate::wire::{
    InstanceRecord, MilestoneRecord, NodeInstanceRecord, SignatureBlock, SnapshotEnvelope,
    VariableRecord, VersionTriple, WorkItemRecord, WorkItemSetRecord,
};

/// Engine version written into every envelope.
pub const VERSION_MAJOR: u32 = 1;
pub const VERSION_MINOR: u32 = 0;
pub const VERSION_REVISION: u32 = 0;

pub fn engine_version() -> VersionTriple {
    VersionTriple {
        major: VERSION_MAJOR,
        minor: VERSION_MINOR,
        revision: VERSION_REVISION,
    }
}

// ── Configuration ────────────────────────────────────────────────────────

/// Signing key material, held by the embedding application and referenced
/// on the wire by alias only.
#[derive(Clone)]
pub struct SigningConfig {
    pub key_alias: String,
    pub signing_key: ed25519_dalek::SigningKey,
}

impl SigningConfig {
    pub fn new(key_alias: impl Into<String>, signing_key: ed25519_dalek::SigningKey) -> Self {
        Self {
            key_alias: key_alias.into(),
            signing_key,
        }
    }
}

impl std::fmt::Debug for SigningConfig {
    // Key material never reaches logs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningConfig")
            .field("key_alias", &self.key_alias)
            .finish_non_exhaustive()
    }
}

/// Environment variable toggling work-item variable serialization.
pub const WORK_ITEM_VARIABLES_ENV: &str = "BATON_MARSHAL_WORK_ITEM_VARIABLES";

/// Marshalling configuration, constructed by the embedding application.
#[derive(Clone, Debug)]
pub struct MarshalConfig {
    /// When set, written payloads are signed and read payloads must carry a
    /// matching signature.
    pub signing: Option<SigningConfig>,
    /// When off, work-item snapshots keep identity and state fields but
    /// drop parameters and results.
    pub serialize_work_item_variables: bool,
}

impl Default for MarshalConfig {
    fn default() -> Self {
        Self {
            signing: None,
            serialize_work_item_variables: true,
        }
    }
}

impl MarshalConfig {
    /// Default configuration with the work-item variable toggle read from
    /// [`WORK_ITEM_VARIABLES_ENV`]. Absent or unrecognized values leave the
    /// toggle on.
    pub fn from_env() -> Self {
        let serialize = match std::env::var(WORK_ITEM_VARIABLES_ENV) {
            Ok(raw) => !matches!(
                raw.trim().to_ascii_lowercase().as_str(),
                "false" | "0" | "off" | "no"
            ),
            Err(_) => true,
        };
        Self {
            signing: None,
            serialize_work_item_variables: serialize,
        }
    }

    pub fn with_signing(mut self, signing: SigningConfig) -> Self {
        self.signing = Some(signing);
        self
    }

    pub fn without_work_item_variables(mut self) -> Self {
        self.serialize_work_item_variables = false;
        self
    }
}

// ── Write path ───────────────────────────────────────────────────────────

/// Snapshot one instance, without its work items.
pub fn marshal_instance(
    registry: &StrategyRegistry,
    config: &MarshalConfig,
    instance: &ProcessInstance,
) -> MarshalResult<Vec<u8>> {
    let mut table = WriteTable::new(registry);
    let record = instance_record(&mut table, instance)?;
    let bytes = seal(&table, config, record.encode_to_vec());
    debug!(
        process_instance_id = %instance.id,
        bytes = bytes.len(),
        "marshalled instance snapshot"
    );
    Ok(bytes)
}

/// Snapshot one instance's work items as their own top-level envelope.
pub fn marshal_work_items(
    registry: &StrategyRegistry,
    config: &MarshalConfig,
    instance: &ProcessInstance,
) -> MarshalResult<Vec<u8>> {
    let mut table = WriteTable::new(registry);

    let mut items: Vec<&WorkItem> = instance.work_items.values().collect();
    items.sort_by(|a, b| a.id.cmp(&b.id));
    let mut records = Vec::with_capacity(items.len());
    for item in items {
        records.push(work_item_record(&mut table, config, item)?);
    }

    let record = WorkItemSetRecord {
        work_items: records,
    };
    Ok(seal(&table, config, record.encode_to_vec()))
}

fn seal(table: &WriteTable<'_>, config: &MarshalConfig, payload: Vec<u8>) -> Vec<u8> {
    let signature = config.signing.as_ref().map(|signing| {
        let signature = signing.signing_key.sign(&payload);
        SignatureBlock {
            key_alias: signing.key_alias.clone(),
            signature: signature.to_bytes().to_vec(),
        }
    });
    let envelope = SnapshotEnvelope {
        version: Some(engine_version()),
        strategies: table.entries(),
        signature,
        payload,
    };
    envelope.encode_to_vec()
}

// ── Read path ────────────────────────────────────────────────────────────

/// Read a whole snapshot stream into memory.
///
/// Parsing always happens against an in-memory buffer; decoding straight
/// from a stream would subject the payload to a message-size ceiling.
pub fn preload(reader: &mut dyn Read) -> MarshalResult<Vec<u8>> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// Restore an instance from snapshot bytes. Work items are restored
/// separately via [`unmarshal_work_items`].
pub fn unmarshal_instance(
    registry: &StrategyRegistry,
    config: &MarshalConfig,
    bytes: &[u8],
) -> MarshalResult<ProcessInstance> {
    let (table, payload) = open(registry, config, bytes)?;
    let record = InstanceRecord::decode(payload.as_slice())?;
    instance_from_record(&table, record)
}

pub fn unmarshal_work_items(
    registry: &StrategyRegistry,
    config: &MarshalConfig,
    bytes: &[u8],
) -> MarshalResult<Vec<WorkItem>> {
    let (table, payload) = open(registry, config, bytes)?;
    let record = WorkItemSetRecord::decode(payload.as_slice())?;
    record
        .work_items
        .into_iter()
        .map(|item| work_item_from_record(&table, item))
        .collect()
}

fn open(
    registry: &StrategyRegistry,
    config: &MarshalConfig,
    bytes: &[u8],
) -> MarshalResult<(ReadTable, Vec<u8>)> {
    let envelope = SnapshotEnvelope::decode(bytes)?;
    verify_signature(config, &envelope)?;
    // Resolve the whole table before touching the payload.
    let table = ReadTable::rebuild(registry, &envelope.strategies)?;
    Ok((table, envelope.payload))
}

fn verify_signature(config: &MarshalConfig, envelope: &SnapshotEnvelope) -> MarshalResult<()> {
    match (&config.signing, &envelope.signature) {
        (None, None) => Ok(()),
        (None, Some(_)) => {
            warn!("snapshot carries a signature but signing is not configured");
            Err(MarshalError::SignatureUnexpected)
        }
        (Some(_), None) => {
            warn!("signing is configured but the snapshot carries no signature");
            Err(MarshalError::SignatureAbsent)
        }
        (Some(signing), Some(block)) => {
            if block.key_alias != signing.key_alias {
                warn!(key_alias = %block.key_alias, "snapshot signed under unknown key alias");
                return Err(MarshalError::UnknownKeyAlias(block.key_alias.clone()));
            }
            let signature = Signature::from_bytes(
                block
                    .signature
                    .as_slice()
                    .try_into()
                    .map_err(|_| MarshalError::SignatureInvalid(block.key_alias.clone()))?,
            );
            signing
                .signing_key
                .verifying_key()
                .verify(&envelope.payload, &signature)
                .map_err(|_| {
                    warn!(key_alias = %block.key_alias, "snapshot signature verification failed");
                    MarshalError::SignatureInvalid(block.key_alias.clone())
                })
        }
    }
}

// ── Record building ──────────────────────────────────────────────────────

fn encode_variables(
    table: &mut WriteTable<'_>,
    variables: &HashMap<String, Value>,
) -> MarshalResult<Vec<VariableRecord>> {
    let mut names: Vec<&String> = variables.keys().collect();
    names.sort();
    let mut records = Vec::with_capacity(names.len());
    for name in names {
        records.push(table.encode_variable(name, &variables[name])?);
    }
    Ok(records)
}

fn instance_record(
    table: &mut WriteTable<'_>,
    instance: &ProcessInstance,
) -> MarshalResult<InstanceRecord> {
    let mut node_instances: Vec<NodeInstanceRecord> = instance
        .node_instances
        .values()
        .map(node_instance_record)
        .collect();
    node_instances.sort_by(|a, b| a.id.cmp(&b.id));

    Ok(InstanceRecord {
        id: instance.id.0.clone(),
        definition_id: instance.definition_id.clone(),
        definition_version: instance.definition_version.clone(),
        business_key: instance.business_key.clone(),
        status: instance.status.code(),
        variables: encode_variables(table, &instance.variables)?,
        node_instances,
        failed_node_id: instance.error.as_ref().map(|e| e.failed_node_id.0.clone()),
        error_message: instance.error.as_ref().map(|e| e.error_message.clone()),
        milestones: instance
            .milestones
            .iter()
            .map(|m| MilestoneRecord {
                name: m.name.clone(),
                reached_at_ms: to_ms(m.reached_at),
            })
            .collect(),
        headers: instance.headers.clone(),
        reference_id: instance.reference_id.clone(),
        correlation_subscriptions: instance
            .correlation_subscriptions
            .iter()
            .cloned()
            .collect(),
        correlation_values: instance.correlation_values.clone(),
        sla_due_ms: instance.sla_due_date.map(to_ms),
        created_at_ms: to_ms(instance.created_at),
        started_at_ms: instance.started_at.map(to_ms),
        completed_at_ms: instance.completed_at.map(to_ms),
    })
}

fn node_instance_record(ni: &NodeInstance) -> NodeInstanceRecord {
    NodeInstanceRecord {
        id: ni.id.0.clone(),
        node_id: ni.node_id.0.clone(),
        status: node_status_code(ni.status),
        awaiting: ni.awaiting.map(await_code),
        entered_at_ms: to_ms(ni.entered_at),
        left_at_ms: ni.left_at.map(to_ms),
        sla_due_ms: ni.sla_due_date.map(to_ms),
        work_item_id: ni.work_item_id.as_ref().map(|id| id.0.clone()),
        arrivals: ni.arrivals.iter().map(|id| id.0.clone()).collect(),
    }
}

fn work_item_record(
    table: &mut WriteTable<'_>,
    config: &MarshalConfig,
    item: &WorkItem,
) -> MarshalResult<WorkItemRecord> {
    let (parameters, results) = if config.serialize_work_item_variables {
        (
            encode_variables(table, &item.parameters)?,
            encode_variables(table, &item.results)?,
        )
    } else {
        (Vec::new(), Vec::new())
    };

    Ok(WorkItemRecord {
        id: item.id.0.clone(),
        process_instance_id: item.process_instance_id.0.clone(),
        node_id: item.node_id.0.clone(),
        node_instance_id: item.node_instance_id.0.clone(),
        name: item.name.clone(),
        state: item.state.code(),
        phase: item.phase.clone(),
        parameters,
        results,
        created_at_ms: to_ms(item.created_at),
    })
}

// ── Record reading ───────────────────────────────────────────────────────

fn decode_variables(
    table: &ReadTable,
    records: &[VariableRecord],
) -> MarshalResult<HashMap<String, Value>> {
    let mut variables = HashMap::with_capacity(records.len());
    for record in records {
        let (name, value) = table.decode_variable(record)?;
        variables.insert(name, value);
    }
    Ok(variables)
}

fn instance_from_record(table: &ReadTable, record: InstanceRecord) -> MarshalResult<ProcessInstance> {
    let mut instance = ProcessInstance::shell(
        ProcessInstanceId::new(record.id),
        record.definition_id,
        record.definition_version,
    );

    instance.business_key = record.business_key;
    instance.status = InstanceStatus::from_code(record.status)
        .ok_or_else(|| MarshalError::Malformed(format!("instance status code {}", record.status)))?;
    instance.variables = decode_variables(table, &record.variables)?;

    for ni_record in record.node_instances {
        let ni = node_instance_from_record(ni_record)?;
        instance.node_instances.insert(ni.id.clone(), ni);
    }

    if let Some(failed_node_id) = record.failed_node_id {
        instance.error = Some(ProcessError::new(
            ElementId::new(failed_node_id),
            record.error_message.unwrap_or_default(),
        ));
    }

    instance.milestones = record
        .milestones
        .into_iter()
        .map(|m| {
            Ok(Milestone {
                name: m.name,
                reached_at: from_ms(m.reached_at_ms)?,
            })
        })
        .collect::<MarshalResult<Vec<_>>>()?;

    instance.headers = record.headers;
    instance.reference_id = record.reference_id;
    instance.correlation_subscriptions = record.correlation_subscriptions.into_iter().collect();
    instance.correlation_values = record.correlation_values;
    instance.sla_due_date = record.sla_due_ms.map(from_ms).transpose()?;
    instance.created_at = from_ms(record.created_at_ms)?;
    instance.started_at = record.started_at_ms.map(from_ms).transpose()?;
    instance.completed_at = record.completed_at_ms.map(from_ms).transpose()?;

    Ok(instance)
}

fn node_instance_from_record(record: NodeInstanceRecord) -> MarshalResult<NodeInstance> {
    Ok(NodeInstance {
        id: NodeInstanceId::new(record.id),
        node_id: ElementId::new(record.node_id),
        status: node_status_from_code(record.status)?,
        awaiting: record.awaiting.map(await_from_code).transpose()?,
        entered_at: from_ms(record.entered_at_ms)?,
        left_at: record.left_at_ms.map(from_ms).transpose()?,
        sla_due_date: record.sla_due_ms.map(from_ms).transpose()?,
        work_item_id: record.work_item_id.map(WorkItemId::new),
        arrivals: record.arrivals.into_iter().map(ElementId::new).collect(),
    })
}

fn work_item_from_record(table: &ReadTable, record: WorkItemRecord) -> MarshalResult<WorkItem> {
    Ok(WorkItem {
        id: WorkItemId::new(record.id),
        process_instance_id: ProcessInstanceId::new(record.process_instance_id),
        node_id: ElementId::new(record.node_id),
        node_instance_id: NodeInstanceId::new(record.node_instance_id),
        name: record.name,
        state: WorkItemState::from_code(record.state).ok_or_else(|| {
            MarshalError::Malformed(format!("work item state code {}", record.state))
        })?,
        phase: record.phase,
        parameters: decode_variables(table, &record.parameters)?,
        results: decode_variables(table, &record.results)?,
        created_at: from_ms(record.created_at_ms)?,
    })
}

// ── Wire codes ───────────────────────────────────────────────────────────

// Fixed codes, independent of variant declaration order.

fn node_status_code(status: NodeInstanceStatus) -> i32 {
    match status {
        NodeInstanceStatus::Active => 0,
        NodeInstanceStatus::Completed => 1,
        NodeInstanceStatus::Cancelled => 2,
        NodeInstanceStatus::Failed => 3,
    }
}

fn node_status_from_code(code: i32) -> MarshalResult<NodeInstanceStatus> {
    match code {
        0 => Ok(NodeInstanceStatus::Active),
        1 => Ok(NodeInstanceStatus::Completed),
        2 => Ok(NodeInstanceStatus::Cancelled),
        3 => Ok(NodeInstanceStatus::Failed),
        other => Err(MarshalError::Malformed(format!(
            "node instance status code {other}"
        ))),
    }
}

fn await_code(awaiting: Await) -> i32 {
    match awaiting {
        Await::Event => 0,
        Await::WorkItem => 1,
        Await::Children => 2,
        Await::Join => 3,
    }
}

fn await_from_code(code: i32) -> MarshalResult<Await> {
    match code {
        0 => Ok(Await::Event),
        1 => Ok(Await::WorkItem),
        2 => Ok(Await::Children),
        3 => Ok(Await::Join),
        other => Err(MarshalError::Malformed(format!("await code {other}"))),
    }
}

fn to_ms(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_ms(ms: i64) -> MarshalResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| MarshalError::Malformed(format!("timestamp {ms} out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use rand::Rng;
    use serde_json::json;

    use baton_definition::{EventFilter, Node, ProcessBuilder, ProcessDefinition, Trigger};
    use baton_runtime::{ActionRegistry, NodeFault, EVENT_VARIABLE_KEY};
    use baton_types::Signal;

    fn make_registry() -> StrategyRegistry {
        StrategyRegistry::with_defaults()
    }

    fn make_actions() -> ActionRegistry {
        let mut registry = ActionRegistry::new();
        registry.register_action("record", |ctx| {
            ctx.set_var("done", json!(true));
            Ok(())
        });
        registry.register_action("boom", |_ctx| Err(NodeFault::new("exploded")));
        registry
    }

    fn make_event_wait() -> ProcessDefinition {
        let mut b = ProcessBuilder::new("wait", "Wait");
        b.add_node(Node::start("start", "Start")).unwrap();
        b.add_node(
            Node::event("catch", "Catch")
                .with_trigger(Trigger::event(vec![EventFilter::new("payment")]))
                .with_metadata(EVENT_VARIABLE_KEY, "payment"),
        )
        .unwrap();
        b.add_node(Node::end("end", "End")).unwrap();
        b.connection("start", "catch", "c1").unwrap();
        b.connection("catch", "end", "c2").unwrap();
        b.build().unwrap()
    }

    fn make_work_item_def() -> ProcessDefinition {
        let mut b = ProcessBuilder::new("approval", "Approval");
        b.add_node(Node::start("start", "Start")).unwrap();
        b.add_node(
            Node::work_item_task("approve", "Approve", "Human Task")
                .with_metadata("actor", "alice"),
        )
        .unwrap();
        b.add_node(Node::end("end", "End")).unwrap();
        b.connection("start", "approve", "c1").unwrap();
        b.connection("approve", "end", "c2").unwrap();
        b.build().unwrap()
    }

    fn make_faulty() -> ProcessDefinition {
        let mut b = ProcessBuilder::new("faulty", "Faulty");
        b.add_node(Node::start("start", "Start")).unwrap();
        b.add_node(Node::script_task("work", "Work", "boom")).unwrap();
        b.add_node(Node::end("end", "End")).unwrap();
        b.connection("start", "work", "c1").unwrap();
        b.connection("work", "end", "c2").unwrap();
        b.build().unwrap()
    }

    fn make_waiting_instance() -> (ProcessDefinition, ProcessInstance) {
        let def = make_event_wait();
        let actions = make_actions();
        let mut inst = ProcessInstance::new(&def)
            .with_business_key("bk-41")
            .with_variable("total", json!(99.5))
            .with_variable("customer", json!({"name": "Ada", "tier": 2}))
            .with_variable("note", Value::Null);
        inst.start(
            &def,
            &actions,
            None,
            &Value::Null,
            Some("ref-7".to_string()),
            HashMap::from([("origin".to_string(), "api".to_string())]),
        )
        .unwrap();
        inst.drain_events();
        (def, inst)
    }

    fn random_signing() -> SigningConfig {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill(&mut secret);
        SigningConfig::new("prod", ed25519_dalek::SigningKey::from_bytes(&secret))
    }

    #[test]
    fn test_round_trip_preserves_identity_status_and_variables() {
        let (_, inst) = make_waiting_instance();
        let registry = make_registry();
        let config = MarshalConfig::default();

        let bytes = marshal_instance(&registry, &config, &inst).unwrap();
        let restored = unmarshal_instance(&registry, &config, &bytes).unwrap();

        assert_eq!(restored.id, inst.id);
        assert_eq!(restored.status, InstanceStatus::Active);
        assert_eq!(restored.variables, inst.variables);
        assert_eq!(restored.variables.get("note"), Some(&Value::Null));
        assert_eq!(restored.business_key.as_deref(), Some("bk-41"));
        assert_eq!(restored.reference_id.as_deref(), Some("ref-7"));
        assert_eq!(restored.headers, inst.headers);
        assert_eq!(restored.definition_id, "wait");
        assert_eq!(
            restored.created_at.timestamp_millis(),
            inst.created_at.timestamp_millis()
        );
        assert_eq!(
            restored.started_at.map(|t| t.timestamp_millis()),
            inst.started_at.map(|t| t.timestamp_millis())
        );
    }

    #[test]
    fn test_restored_instance_resumes_where_it_left_off() {
        let (def, inst) = make_waiting_instance();
        let registry = make_registry();
        let config = MarshalConfig::default();
        let actions = make_actions();

        let bytes = marshal_instance(&registry, &config, &inst).unwrap();
        let mut restored = unmarshal_instance(&registry, &config, &bytes).unwrap();

        let waiting = restored
            .node_instances
            .values()
            .find(|ni| ni.node_id.0 == "catch")
            .unwrap();
        assert_eq!(waiting.status, NodeInstanceStatus::Active);
        assert_eq!(waiting.awaiting, Some(Await::Event));

        restored
            .send(&def, &actions, &Signal::new("payment", json!(42)))
            .unwrap();
        assert_eq!(restored.status, InstanceStatus::Completed);
        assert_eq!(restored.variable("payment"), Some(&json!(42)));
    }

    #[test]
    fn test_error_state_round_trips_with_wire_code() {
        let def = make_faulty();
        let actions = make_actions();
        let mut inst = ProcessInstance::new(&def);
        inst.start(&def, &actions, None, &Value::Null, None, HashMap::new())
            .unwrap();
        assert_eq!(inst.status, InstanceStatus::Error);

        let registry = make_registry();
        let config = MarshalConfig::default();
        let bytes = marshal_instance(&registry, &config, &inst).unwrap();

        // ERROR pins to wire code 5.
        let envelope = SnapshotEnvelope::decode(bytes.as_slice()).unwrap();
        let record = InstanceRecord::decode(envelope.payload.as_slice()).unwrap();
        assert_eq!(record.status, 5);

        let restored = unmarshal_instance(&registry, &config, &bytes).unwrap();
        assert_eq!(restored.status, InstanceStatus::Error);
        let error = restored.error.unwrap();
        assert_eq!(error.failed_node_id, ElementId::from("work"));
        assert!(error.error_message.contains("exploded"));
    }

    #[test]
    fn test_milestones_and_correlations_survive() {
        let (_, mut inst) = make_waiting_instance();
        inst.milestones.push(Milestone::reached("halfway"));
        inst.correlation_subscriptions
            .insert("order-key".to_string());
        inst.correlation_values
            .insert("order-key".to_string(), "o-77".to_string());

        let registry = make_registry();
        let config = MarshalConfig::default();
        let bytes = marshal_instance(&registry, &config, &inst).unwrap();
        let restored = unmarshal_instance(&registry, &config, &bytes).unwrap();

        assert_eq!(restored.milestones.len(), 1);
        assert_eq!(restored.milestones[0].name, "halfway");
        assert_eq!(
            restored.correlation_subscriptions,
            inst.correlation_subscriptions
        );
        assert_eq!(restored.correlation_values, inst.correlation_values);
    }

    #[test]
    fn test_missing_strategy_fails_before_payload_decode() {
        let (_, inst) = make_waiting_instance();
        let config = MarshalConfig::default();
        let bytes = marshal_instance(&make_registry(), &config, &inst).unwrap();

        let err = unmarshal_instance(&StrategyRegistry::new(), &config, &bytes).unwrap_err();
        assert!(matches!(err, MarshalError::UnknownStrategy(name) if name == "json"));
    }

    #[test]
    fn test_signed_snapshot_round_trips() {
        let (_, inst) = make_waiting_instance();
        let registry = make_registry();
        let config = MarshalConfig::default().with_signing(random_signing());

        let bytes = marshal_instance(&registry, &config, &inst).unwrap();
        let restored = unmarshal_instance(&registry, &config, &bytes).unwrap();
        assert_eq!(restored.id, inst.id);
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let (_, inst) = make_waiting_instance();
        let registry = make_registry();
        let config = MarshalConfig::default().with_signing(random_signing());

        let bytes = marshal_instance(&registry, &config, &inst).unwrap();
        let mut envelope = SnapshotEnvelope::decode(bytes.as_slice()).unwrap();
        let last = envelope.payload.len() - 1;
        envelope.payload[last] ^= 0xFF;
        let tampered = envelope.encode_to_vec();

        let err = unmarshal_instance(&registry, &config, &tampered).unwrap_err();
        assert!(matches!(err, MarshalError::SignatureInvalid(alias) if alias == "prod"));
    }

    #[test]
    fn test_unsigned_snapshot_rejected_when_signing_configured() {
        let (_, inst) = make_waiting_instance();
        let registry = make_registry();

        let bytes = marshal_instance(&registry, &MarshalConfig::default(), &inst).unwrap();
        let reading = MarshalConfig::default().with_signing(random_signing());
        let err = unmarshal_instance(&registry, &reading, &bytes).unwrap_err();
        assert!(matches!(err, MarshalError::SignatureAbsent));
    }

    #[test]
    fn test_signed_snapshot_rejected_without_signing_config() {
        let (_, inst) = make_waiting_instance();
        let registry = make_registry();

        let writing = MarshalConfig::default().with_signing(random_signing());
        let bytes = marshal_instance(&registry, &writing, &inst).unwrap();
        let err = unmarshal_instance(&registry, &MarshalConfig::default(), &bytes).unwrap_err();
        assert!(matches!(err, MarshalError::SignatureUnexpected));
    }

    #[test]
    fn test_unknown_key_alias_rejected() {
        let (_, inst) = make_waiting_instance();
        let registry = make_registry();

        let key = random_signing().signing_key;
        let writing =
            MarshalConfig::default().with_signing(SigningConfig::new("prod", key.clone()));
        let reading = MarshalConfig::default().with_signing(SigningConfig::new("staging", key));

        let bytes = marshal_instance(&registry, &writing, &inst).unwrap();
        let err = unmarshal_instance(&registry, &reading, &bytes).unwrap_err();
        assert!(matches!(err, MarshalError::UnknownKeyAlias(alias) if alias == "prod"));
    }

    #[test]
    fn test_work_items_travel_in_their_own_envelope() {
        let def = make_work_item_def();
        let actions = make_actions();
        let mut inst = ProcessInstance::new(&def);
        inst.start(&def, &actions, None, &Value::Null, None, HashMap::new())
            .unwrap();
        assert_eq!(inst.work_items.len(), 1);

        let registry = make_registry();
        let config = MarshalConfig::default();

        let instance_bytes = marshal_instance(&registry, &config, &inst).unwrap();
        let restored = unmarshal_instance(&registry, &config, &instance_bytes).unwrap();
        assert!(restored.work_items.is_empty());

        let item_bytes = marshal_work_items(&registry, &config, &inst).unwrap();
        let items = unmarshal_work_items(&registry, &config, &item_bytes).unwrap();
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.name, "Human Task");
        assert_eq!(item.state, WorkItemState::Active);
        assert_eq!(item.process_instance_id, inst.id);
        assert_eq!(item.parameters.get("actor"), Some(&json!("alice")));
    }

    #[test]
    fn test_work_item_variable_toggle_keeps_identity_fields() {
        let def = make_work_item_def();
        let actions = make_actions();
        let mut inst = ProcessInstance::new(&def);
        inst.start(&def, &actions, None, &Value::Null, None, HashMap::new())
            .unwrap();

        let registry = make_registry();
        let config = MarshalConfig::default().without_work_item_variables();

        let bytes = marshal_work_items(&registry, &config, &inst).unwrap();
        let items = unmarshal_work_items(&registry, &config, &bytes).unwrap();
        assert_eq!(items.len(), 1);
        assert!(items[0].parameters.is_empty());
        assert!(items[0].results.is_empty());
        assert_eq!(items[0].name, "Human Task");
        assert_eq!(items[0].state, WorkItemState::Active);
        assert_eq!(items[0].node_id, ElementId::from("approve"));
    }

    #[test]
    fn test_from_env_reads_work_item_toggle() {
        std::env::set_var(WORK_ITEM_VARIABLES_ENV, "false");
        assert!(!MarshalConfig::from_env().serialize_work_item_variables);

        std::env::set_var(WORK_ITEM_VARIABLES_ENV, "1");
        assert!(MarshalConfig::from_env().serialize_work_item_variables);

        std::env::remove_var(WORK_ITEM_VARIABLES_ENV);
        assert!(MarshalConfig::from_env().serialize_work_item_variables);
    }

    #[test]
    fn test_preload_reads_whole_stream() {
        let (_, inst) = make_waiting_instance();
        let registry = make_registry();
        let config = MarshalConfig::default();
        let bytes = marshal_instance(&registry, &config, &inst).unwrap();

        let loaded = preload(&mut bytes.as_slice()).unwrap();
        assert_eq!(loaded, bytes);
        let restored = unmarshal_instance(&registry, &config, &loaded).unwrap();
        assert_eq!(restored.id, inst.id);
    }

    #[test]
    fn test_garbage_bytes_are_malformed() {
        let registry = make_registry();
        let config = MarshalConfig::default();
        let err = unmarshal_instance(&registry, &config, &[0xFF, 0x13, 0x37]).unwrap_err();
        assert!(matches!(err, MarshalError::Decode(_)));
    }

    #[test]
    fn test_signing_config_debug_redacts_key() {
        let signing = random_signing();
        let text = format!("{signing:?}");
        assert!(text.contains("prod"));
        assert!(!text.contains("signing_key"));
    }

    mod round_trip_prop {
        use super::*;
        use proptest::prelude::*;

        fn value_strategy() -> impl Strategy<Value = Value> {
            prop_oneof![
                Just(Value::Null),
                any::<bool>().prop_map(Value::Bool),
                any::<i64>().prop_map(Value::from),
                "[a-zA-Z0-9 ]{0,16}".prop_map(Value::from),
            ]
        }

        proptest! {
            #[test]
            fn prop_variable_maps_round_trip(
                variables in proptest::collection::hash_map("[a-z]{1,8}", value_strategy(), 0..8)
            ) {
                let registry = StrategyRegistry::with_defaults();
                let config = MarshalConfig::default();

                let mut instance = ProcessInstance::shell(
                    ProcessInstanceId::new("pi-prop"),
                    "def",
                    "1.0.0",
                );
                instance.status = InstanceStatus::Active;
                instance.variables = variables.clone();

                let bytes = marshal_instance(&registry, &config, &instance).unwrap();
                let restored = unmarshal_instance(&registry, &config, &bytes).unwrap();

                prop_assert_eq!(restored.id, instance.id);
                prop_assert_eq!(restored.status, InstanceStatus::Active);
                prop_assert_eq!(restored.variables, variables);
            }
        }
    }
}
