//! Protobuf wire messages for the snapshot protocol.
//!
//! These structs are hand-written with explicit field tags; the tag layout is
//! the binary compatibility surface and must never be renumbered. New fields
//! get new tags, removed fields leave their tag reserved in a comment.
//!
//! A snapshot is one [`SnapshotEnvelope`]: engine version, the strategy table
//! assembled during the write, an optional signature over the payload bytes,
//! then the payload itself (an encoded [`InstanceRecord`] or
//! [`WorkItemSetRecord`]). Variables travel as [`VariableRecord`]s whose
//! `value` field is absent when the variable is `null`.

use std::collections::HashMap;

/// Engine version triple written at the head of every envelope.
#[derive(Clone, PartialEq, prost::Message)]
pub struct VersionTriple {
    #[prost(uint32, tag = "1")]
    pub major: u32,
    #[prost(uint32, tag = "2")]
    pub minor: u32,
    #[prost(uint32, tag = "3")]
    pub revision: u32,
}

/// One entry of the strategy index table.
///
/// `id` is assigned by first use while writing, starting at 0. `data` is
/// strategy-specific context, present only when the strategy produces one.
#[derive(Clone, PartialEq, prost::Message)]
pub struct StrategyEntry {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub data: Option<Vec<u8>>,
}

/// Detached signature over the envelope's payload bytes.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SignatureBlock {
    /// Alias of the signing key held by the embedding application.
    #[prost(string, tag = "1")]
    pub key_alias: String,
    #[prost(bytes = "vec", tag = "2")]
    pub signature: Vec<u8>,
}

/// Top-level snapshot container.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SnapshotEnvelope {
    #[prost(message, optional, tag = "1")]
    pub version: Option<VersionTriple>,
    #[prost(message, repeated, tag = "2")]
    pub strategies: Vec<StrategyEntry>,
    #[prost(message, optional, tag = "3")]
    pub signature: Option<SignatureBlock>,
    /// Encoded `InstanceRecord` or `WorkItemSetRecord`.
    #[prost(bytes = "vec", tag = "4")]
    pub payload: Vec<u8>,
}

/// One variable, encoded through the strategy named by `strategy_index`.
///
/// An absent `value` encodes a `null` variable and decodes back to `null`
/// regardless of strategy; an empty byte string is a present, zero-length
/// value and is not the same thing.
#[derive(Clone, PartialEq, prost::Message)]
pub struct VariableRecord {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(uint32, tag = "2")]
    pub strategy_index: u32,
    /// Logical type tag recorded by the writing strategy.
    #[prost(string, tag = "3")]
    pub data_type: String,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub value: Option<Vec<u8>>,
}

/// Snapshot of one node instance.
#[derive(Clone, PartialEq, prost::Message)]
pub struct NodeInstanceRecord {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub node_id: String,
    /// `NodeInstanceStatus` wire code.
    #[prost(int32, tag = "3")]
    pub status: i32,
    /// `Await` wire code, absent when the node instance waits on nothing.
    #[prost(int32, optional, tag = "4")]
    pub awaiting: Option<i32>,
    #[prost(int64, tag = "5")]
    pub entered_at_ms: i64,
    #[prost(int64, optional, tag = "6")]
    pub left_at_ms: Option<i64>,
    #[prost(int64, optional, tag = "7")]
    pub sla_due_ms: Option<i64>,
    #[prost(string, optional, tag = "8")]
    pub work_item_id: Option<String>,
    /// Join arrivals, sorted by source element id.
    #[prost(string, repeated, tag = "9")]
    pub arrivals: Vec<String>,
}

/// A milestone the instance has reached.
#[derive(Clone, PartialEq, prost::Message)]
pub struct MilestoneRecord {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(int64, tag = "2")]
    pub reached_at_ms: i64,
}

/// Payload message of an instance snapshot.
///
/// Work items are deliberately not here; they travel in their own envelope
/// as a [`WorkItemSetRecord`].
#[derive(Clone, PartialEq, prost::Message)]
pub struct InstanceRecord {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub definition_id: String,
    #[prost(string, tag = "3")]
    pub definition_version: String,
    #[prost(string, optional, tag = "4")]
    pub business_key: Option<String>,
    /// `InstanceStatus` wire code: PENDING=0, ACTIVE=1, COMPLETED=2,
    /// ABORTED=3, SUSPENDED=4, ERROR=5.
    #[prost(int32, tag = "5")]
    pub status: i32,
    /// Sorted by variable name.
    #[prost(message, repeated, tag = "6")]
    pub variables: Vec<VariableRecord>,
    /// Sorted by node instance id.
    #[prost(message, repeated, tag = "7")]
    pub node_instances: Vec<NodeInstanceRecord>,
    #[prost(string, optional, tag = "8")]
    pub failed_node_id: Option<String>,
    #[prost(string, optional, tag = "9")]
    pub error_message: Option<String>,
    #[prost(message, repeated, tag = "10")]
    pub milestones: Vec<MilestoneRecord>,
    #[prost(map = "string, string", tag = "11")]
    pub headers: HashMap<String, String>,
    #[prost(string, optional, tag = "12")]
    pub reference_id: Option<String>,
    #[prost(string, repeated, tag = "13")]
    pub correlation_subscriptions: Vec<String>,
    #[prost(map = "string, string", tag = "14")]
    pub correlation_values: HashMap<String, String>,
    #[prost(int64, optional, tag = "15")]
    pub sla_due_ms: Option<i64>,
    #[prost(int64, tag = "16")]
    pub created_at_ms: i64,
    #[prost(int64, optional, tag = "17")]
    pub started_at_ms: Option<i64>,
    #[prost(int64, optional, tag = "18")]
    pub completed_at_ms: Option<i64>,
}

/// Snapshot of one work item.
#[derive(Clone, PartialEq, prost::Message)]
pub struct WorkItemRecord {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub process_instance_id: String,
    #[prost(string, tag = "3")]
    pub node_id: String,
    #[prost(string, tag = "4")]
    pub node_instance_id: String,
    #[prost(string, tag = "5")]
    pub name: String,
    /// `WorkItemState` wire code: ACTIVE=0, COMPLETED=1, ABORTED=2.
    #[prost(int32, tag = "6")]
    pub state: i32,
    #[prost(string, optional, tag = "7")]
    pub phase: Option<String>,
    /// Sorted by parameter name; empty when work-item variable
    /// serialization is toggled off.
    #[prost(message, repeated, tag = "8")]
    pub parameters: Vec<VariableRecord>,
    #[prost(message, repeated, tag = "9")]
    pub results: Vec<VariableRecord>,
    #[prost(int64, tag = "10")]
    pub created_at_ms: i64,
}

/// Payload message of a work-item snapshot: the instance's pending work
/// items as a separate top-level collection.
#[derive(Clone, PartialEq, prost::Message)]
pub struct WorkItemSetRecord {
    #[prost(message, repeated, tag = "1")]
    pub work_items: Vec<WorkItemRecord>,
}
