//! Stable identifiers for graph elements and runtime objects.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of one element (node, connection, container) of a process
/// definition graph.
///
/// The external string form is the identity: two identifiers are equal exactly
/// when their string forms are equal, and ordering follows string ordering.
/// Once assigned to an element the identifier never changes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ElementId(pub String);

impl ElementId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ElementId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Identifier of one running process instance.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProcessInstanceId(pub String);

impl ProcessInstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh unique instance id.
    pub fn generate() -> Self {
        Self(format!("pi-{}", Uuid::new_v4()))
    }

    /// Short form for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(11)]
    }
}

impl fmt::Display for ProcessInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one runtime occurrence of a node within an instance.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeInstanceId(pub String);

impl NodeInstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(format!("ni-{}", Uuid::new_v4()))
    }
}

impl fmt::Display for NodeInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one work item.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkItemId(pub String);

impl WorkItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(format!("wi-{}", Uuid::new_v4()))
    }
}

impl fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_id_equality_follows_string_form() {
        let a = ElementId::new("task-1");
        let b = ElementId::from("task-1");
        let c = ElementId::new("task-2");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a < c);
    }

    #[test]
    fn test_generated_instance_ids_are_unique() {
        let a = ProcessInstanceId::generate();
        let b = ProcessInstanceId::generate();
        assert_ne!(a, b);
        assert!(a.0.starts_with("pi-"));
    }

    #[test]
    fn test_short_form_is_prefix() {
        let id = ProcessInstanceId::generate();
        assert!(id.0.starts_with(id.short()));

        let tiny = ProcessInstanceId::new("abc");
        assert_eq!(tiny.short(), "abc");
    }

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let id = ElementId::new("start");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"start\"");
        let back: ElementId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
