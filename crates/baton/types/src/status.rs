//! Process instance status model, captured errors, and milestones.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ElementId;

/// Lifecycle status of a process instance.
///
/// `Pending` is the in-memory pre-start state; `Active` is entered by
/// `start`/`start_from`. `Completed` and `Aborted` are terminal. `Error` is
/// entered when node execution raises a fault no exception scope absorbs and
/// always carries a [`ProcessError`]. `Suspended` is reachable from `Active`
/// only, and only `resume` leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceStatus {
    Pending,
    Active,
    Completed,
    Aborted,
    Suspended,
    Error,
}

impl InstanceStatus {
    /// Terminal statuses never accept another mutation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceStatus::Completed | InstanceStatus::Aborted)
    }

    /// Fixed numeric code used on the snapshot wire; independent of variant
    /// declaration order.
    pub fn code(&self) -> i32 {
        match self {
            InstanceStatus::Pending => 0,
            InstanceStatus::Active => 1,
            InstanceStatus::Completed => 2,
            InstanceStatus::Aborted => 3,
            InstanceStatus::Suspended => 4,
            InstanceStatus::Error => 5,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(InstanceStatus::Pending),
            1 => Some(InstanceStatus::Active),
            2 => Some(InstanceStatus::Completed),
            3 => Some(InstanceStatus::Aborted),
            4 => Some(InstanceStatus::Suspended),
            5 => Some(InstanceStatus::Error),
            _ => None,
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstanceStatus::Pending => "PENDING",
            InstanceStatus::Active => "ACTIVE",
            InstanceStatus::Completed => "COMPLETED",
            InstanceStatus::Aborted => "ABORTED",
            InstanceStatus::Suspended => "SUSPENDED",
            InstanceStatus::Error => "ERROR",
        };
        write!(f, "{name}")
    }
}

/// Failure captured when an instance enters [`InstanceStatus::Error`].
///
/// Present exactly while the instance status is `Error`; cleared when the
/// failed node is retriggered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessError {
    pub failed_node_id: ElementId,
    pub error_message: String,
}

impl ProcessError {
    pub fn new(failed_node_id: ElementId, error_message: impl Into<String>) -> Self {
        Self {
            failed_node_id,
            error_message: error_message.into(),
        }
    }
}

/// A named milestone reached by an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    pub name: String,
    pub reached_at: DateTime<Utc>,
}

impl Milestone {
    pub fn reached(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reached_at: Utc::now(),
        }
    }
}

/// Access mode under which an instance was loaded from a store.
///
/// A `ReadOnly` view deterministically rejects every mutating call instead of
/// silently ignoring it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReadMode {
    Mutable,
    ReadOnly,
}

impl Default for ReadMode {
    fn default() -> Self {
        ReadMode::Mutable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(InstanceStatus::Completed.is_terminal());
        assert!(InstanceStatus::Aborted.is_terminal());
        assert!(!InstanceStatus::Pending.is_terminal());
        assert!(!InstanceStatus::Active.is_terminal());
        assert!(!InstanceStatus::Suspended.is_terminal());
        assert!(!InstanceStatus::Error.is_terminal());
    }

    #[test]
    fn test_wire_codes_round_trip() {
        for status in [
            InstanceStatus::Pending,
            InstanceStatus::Active,
            InstanceStatus::Completed,
            InstanceStatus::Aborted,
            InstanceStatus::Suspended,
            InstanceStatus::Error,
        ] {
            assert_eq!(InstanceStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(InstanceStatus::from_code(42), None);
    }

    #[test]
    fn test_wire_codes_are_fixed() {
        assert_eq!(InstanceStatus::Pending.code(), 0);
        assert_eq!(InstanceStatus::Active.code(), 1);
        assert_eq!(InstanceStatus::Completed.code(), 2);
        assert_eq!(InstanceStatus::Aborted.code(), 3);
        assert_eq!(InstanceStatus::Suspended.code(), 4);
        assert_eq!(InstanceStatus::Error.code(), 5);
    }

    #[test]
    fn test_display_is_uppercase() {
        assert_eq!(InstanceStatus::Active.to_string(), "ACTIVE");
        assert_eq!(InstanceStatus::Error.to_string(), "ERROR");
    }

    #[test]
    fn test_process_error_holds_failed_node() {
        let err = ProcessError::new(ElementId::new("script-1"), "boom");
        assert_eq!(err.failed_node_id, ElementId::new("script-1"));
        assert_eq!(err.error_message, "boom");
    }
}
