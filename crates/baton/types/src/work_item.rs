//! Work items: units of externally-performed work tracked by an instance.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ElementId, NodeInstanceId, ProcessInstanceId, WorkItemId};

/// Lifecycle state of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkItemState {
    Active,
    Completed,
    Aborted,
}

impl WorkItemState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkItemState::Completed | WorkItemState::Aborted)
    }

    /// Fixed numeric code used on the snapshot wire.
    pub fn code(&self) -> i32 {
        match self {
            WorkItemState::Active => 0,
            WorkItemState::Completed => 1,
            WorkItemState::Aborted => 2,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(WorkItemState::Active),
            1 => Some(WorkItemState::Completed),
            2 => Some(WorkItemState::Aborted),
            _ => None,
        }
    }
}

/// A unit of external or human work owned by one process instance.
///
/// State moves only through the owning instance's work-item operations; the
/// fields here are plain data so stores and marshallers can carry them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: WorkItemId,
    pub process_instance_id: ProcessInstanceId,
    pub node_id: ElementId,
    pub node_instance_id: NodeInstanceId,
    /// Work item kind, e.g. the registered handler name ("Human Task").
    pub name: String,
    pub state: WorkItemState,
    /// Last lifecycle phase recorded by `transition_work_item`.
    pub phase: Option<String>,
    pub parameters: HashMap<String, Value>,
    pub results: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl WorkItem {
    pub fn new(
        process_instance_id: ProcessInstanceId,
        node_id: ElementId,
        node_instance_id: NodeInstanceId,
        name: impl Into<String>,
        parameters: HashMap<String, Value>,
    ) -> Self {
        Self {
            id: WorkItemId::generate(),
            process_instance_id,
            node_id,
            node_instance_id,
            name: name.into(),
            state: WorkItemState::Active,
            phase: None,
            parameters,
            results: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_work_item() -> WorkItem {
        let mut parameters = HashMap::new();
        parameters.insert("priority".to_string(), json!("high"));
        WorkItem::new(
            ProcessInstanceId::new("pi-1"),
            ElementId::new("approve"),
            NodeInstanceId::new("ni-1"),
            "Human Task",
            parameters,
        )
    }

    #[test]
    fn test_new_work_item_is_active() {
        let wi = make_work_item();
        assert_eq!(wi.state, WorkItemState::Active);
        assert!(!wi.state.is_terminal());
        assert!(wi.results.is_empty());
        assert!(wi.phase.is_none());
        assert_eq!(wi.parameter("priority"), Some(&json!("high")));
    }

    #[test]
    fn test_state_codes_round_trip() {
        for state in [
            WorkItemState::Active,
            WorkItemState::Completed,
            WorkItemState::Aborted,
        ] {
            assert_eq!(WorkItemState::from_code(state.code()), Some(state));
        }
        assert_eq!(WorkItemState::from_code(9), None);
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = make_work_item();
        let b = make_work_item();
        assert_ne!(a.id, b.id);
    }
}
