//! Engine-wide error taxonomy.
//!
//! Build-time definition errors are aggregated into a single `Validation`
//! variant; runtime dispatch errors are per-call and leave instance state
//! intact. Persistence has its own error enum in `baton-marshal`.

use crate::{ElementId, InstanceStatus, NodeInstanceId, ProcessInstanceId, WorkItemId};

/// Errors surfaced by the definition builder and the instance runtime.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A referenced element could not be resolved.
    #[error("element not found: {0}")]
    NotFound(String),

    #[error("duplicate element id: {0}")]
    DuplicateElementId(ElementId),

    #[error("duplicate correlation key: '{0}'")]
    DuplicateCorrelationKey(String),

    #[error("definition not found: {0}")]
    DefinitionNotFound(String),

    /// Structural validation failures, all of them at once.
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("process instance not found: {0}")]
    InstanceNotFound(ProcessInstanceId),

    /// The instance's current state does not accept the signal.
    #[error("process instance {process_instance_id} cannot accept signal on channel '{channel}'")]
    IllegalSignal {
        process_instance_id: ProcessInstanceId,
        channel: String,
    },

    #[error("node instance {node_instance_id} not found in process instance {process_instance_id}")]
    NodeInstanceNotFound {
        process_instance_id: ProcessInstanceId,
        node_instance_id: NodeInstanceId,
    },

    #[error("node {node_id} not found in definition used by process instance {process_instance_id}")]
    NodeNotFound {
        process_instance_id: ProcessInstanceId,
        node_id: ElementId,
    },

    #[error("work item {work_item_id} not found in process instance {process_instance_id}")]
    WorkItemNotFound {
        process_instance_id: ProcessInstanceId,
        work_item_id: WorkItemId,
    },

    /// A work-item policy rejected the mutation. Distinct from not-found.
    #[error("policy violation on work item {work_item_id}: {reason}")]
    PolicyViolation {
        work_item_id: WorkItemId,
        reason: String,
    },

    /// Mutation attempted through a read-only view.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("process instance {process_instance_id} is {status} and no longer accepts mutations")]
    TerminalInstance {
        process_instance_id: ProcessInstanceId,
        status: InstanceStatus,
    },

    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Raised by `check_error` when the instance carries a captured fault.
    #[error("process instance {process_instance_id} failed at node {failed_node_id}: {message}")]
    Faulted {
        process_instance_id: ProcessInstanceId,
        failed_node_id: ElementId,
        message: String,
    },
}

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_lists_every_problem() {
        let err = EngineError::Validation(vec![
            "node 'a' has no incoming connections".to_string(),
            "node 'b' has no outgoing connections".to_string(),
        ]);
        let text = err.to_string();
        assert!(text.contains("node 'a'"));
        assert!(text.contains("node 'b'"));
    }

    #[test]
    fn test_illegal_signal_names_instance_and_channel() {
        let err = EngineError::IllegalSignal {
            process_instance_id: ProcessInstanceId::new("pi-9"),
            channel: "order-placed".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("pi-9"));
        assert!(text.contains("order-placed"));
    }

    #[test]
    fn test_terminal_instance_names_status() {
        let err = EngineError::TerminalInstance {
            process_instance_id: ProcessInstanceId::new("pi-1"),
            status: InstanceStatus::Completed,
        };
        assert!(err.to_string().contains("COMPLETED"));
    }
}
