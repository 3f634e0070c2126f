//! Domain events emitted by the instance state machine.
//!
//! Events accumulate on the instance while a mutation runs and are drained
//! by the engine after the store update, keeping publication decoupled from
//! the mutation itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use baton_types::{ElementId, NodeInstanceId, ProcessInstanceId, WorkItemId};

/// One state change observed on a process instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProcessEvent {
    InstanceStarted {
        process_instance_id: ProcessInstanceId,
        definition_id: String,
    },
    InstanceCompleted {
        process_instance_id: ProcessInstanceId,
    },
    InstanceAborted {
        process_instance_id: ProcessInstanceId,
    },
    InstanceSuspended {
        process_instance_id: ProcessInstanceId,
    },
    InstanceResumed {
        process_instance_id: ProcessInstanceId,
    },
    InstanceFaulted {
        process_instance_id: ProcessInstanceId,
        failed_node_id: ElementId,
        message: String,
    },
    NodeTriggered {
        process_instance_id: ProcessInstanceId,
        node_instance_id: NodeInstanceId,
        node_id: ElementId,
    },
    NodeCompleted {
        process_instance_id: ProcessInstanceId,
        node_instance_id: NodeInstanceId,
        node_id: ElementId,
    },
    NodeCancelled {
        process_instance_id: ProcessInstanceId,
        node_instance_id: NodeInstanceId,
        node_id: ElementId,
    },
    VariableChanged {
        process_instance_id: ProcessInstanceId,
        name: String,
        value: Value,
    },
    MilestoneReached {
        process_instance_id: ProcessInstanceId,
        name: String,
    },
    WorkItemCreated {
        process_instance_id: ProcessInstanceId,
        work_item_id: WorkItemId,
        name: String,
    },
    WorkItemCompleted {
        process_instance_id: ProcessInstanceId,
        work_item_id: WorkItemId,
    },
    WorkItemAborted {
        process_instance_id: ProcessInstanceId,
        work_item_id: WorkItemId,
    },
    SignalReceived {
        process_instance_id: ProcessInstanceId,
        channel: String,
    },
    SlaUpdated {
        process_instance_id: ProcessInstanceId,
        node_instance_id: Option<NodeInstanceId>,
        due: DateTime<Utc>,
    },
}

impl ProcessEvent {
    /// Stable event-type name, used for logging and subscriber routing.
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessEvent::InstanceStarted { .. } => "instance_started",
            ProcessEvent::InstanceCompleted { .. } => "instance_completed",
            ProcessEvent::InstanceAborted { .. } => "instance_aborted",
            ProcessEvent::InstanceSuspended { .. } => "instance_suspended",
            ProcessEvent::InstanceResumed { .. } => "instance_resumed",
            ProcessEvent::InstanceFaulted { .. } => "instance_faulted",
            ProcessEvent::NodeTriggered { .. } => "node_triggered",
            ProcessEvent::NodeCompleted { .. } => "node_completed",
            ProcessEvent::NodeCancelled { .. } => "node_cancelled",
            ProcessEvent::VariableChanged { .. } => "variable_changed",
            ProcessEvent::MilestoneReached { .. } => "milestone_reached",
            ProcessEvent::WorkItemCreated { .. } => "work_item_created",
            ProcessEvent::WorkItemCompleted { .. } => "work_item_completed",
            ProcessEvent::WorkItemAborted { .. } => "work_item_aborted",
            ProcessEvent::SignalReceived { .. } => "signal_received",
            ProcessEvent::SlaUpdated { .. } => "sla_updated",
        }
    }

    /// The instance this event belongs to.
    pub fn process_instance_id(&self) -> &ProcessInstanceId {
        match self {
            ProcessEvent::InstanceStarted {
                process_instance_id, ..
            }
            | ProcessEvent::InstanceCompleted { process_instance_id }
            | ProcessEvent::InstanceAborted { process_instance_id }
            | ProcessEvent::InstanceSuspended { process_instance_id }
            | ProcessEvent::InstanceResumed { process_instance_id }
            | ProcessEvent::InstanceFaulted {
                process_instance_id, ..
            }
            | ProcessEvent::NodeTriggered {
                process_instance_id, ..
            }
            | ProcessEvent::NodeCompleted {
                process_instance_id, ..
            }
            | ProcessEvent::NodeCancelled {
                process_instance_id, ..
            }
            | ProcessEvent::VariableChanged {
                process_instance_id, ..
            }
            | ProcessEvent::MilestoneReached {
                process_instance_id, ..
            }
            | ProcessEvent::WorkItemCreated {
                process_instance_id, ..
            }
            | ProcessEvent::WorkItemCompleted {
                process_instance_id, ..
            }
            | ProcessEvent::WorkItemAborted {
                process_instance_id, ..
            }
            | ProcessEvent::SignalReceived {
                process_instance_id, ..
            }
            | ProcessEvent::SlaUpdated {
                process_instance_id, ..
            } => process_instance_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_are_stable() {
        let event = ProcessEvent::InstanceStarted {
            process_instance_id: ProcessInstanceId::new("pi-1"),
            definition_id: "order".to_string(),
        };
        assert_eq!(event.kind(), "instance_started");
        assert_eq!(event.process_instance_id(), &ProcessInstanceId::new("pi-1"));
    }

    #[test]
    fn test_events_serialize_round_trip() {
        let event = ProcessEvent::VariableChanged {
            process_instance_id: ProcessInstanceId::new("pi-2"),
            name: "amount".to_string(),
            value: serde_json::json!(42),
        };
        let text = serde_json::to_string(&event).unwrap();
        let back: ProcessEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(back, event);
    }
}
