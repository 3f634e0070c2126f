//! Work-item mutation policies.
//!
//! Policies are open predicates checked before any work-item mutation; all
//! of them must pass. A rejection surfaces as `PolicyViolation`, which is
//! deliberately distinct from `WorkItemNotFound`.

use serde_json::Value;

use baton_types::{EngineError, EngineResult, WorkItem};

/// Work-item parameter naming the actor allowed to act on it.
pub const ACTOR_PARAM: &str = "actor";

/// A predicate that must hold before a work item may be mutated.
pub trait WorkItemPolicy: Send + Sync {
    fn name(&self) -> &str;

    /// `Err` carries the human-readable rejection reason.
    fn enforce(&self, work_item: &WorkItem) -> Result<(), String>;
}

/// Check every policy; the first rejection wins.
pub fn enforce_policies(
    work_item: &WorkItem,
    policies: &[&dyn WorkItemPolicy],
) -> EngineResult<()> {
    for policy in policies {
        if let Err(reason) = policy.enforce(work_item) {
            return Err(EngineError::PolicyViolation {
                work_item_id: work_item.id.clone(),
                reason: format!("{}: {}", policy.name(), reason),
            });
        }
    }
    Ok(())
}

/// Restricts mutation to the actor named in the work item's `actor`
/// parameter. Work items without that parameter are unrestricted.
pub struct ActorPolicy {
    actor: String,
}

impl ActorPolicy {
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
        }
    }
}

impl WorkItemPolicy for ActorPolicy {
    fn name(&self) -> &str {
        "actor"
    }

    fn enforce(&self, work_item: &WorkItem) -> Result<(), String> {
        match work_item.parameter(ACTOR_PARAM).and_then(Value::as_str) {
            Some(owner) if owner != self.actor => Err(format!(
                "work item is assigned to '{}', not '{}'",
                owner, self.actor
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use serde_json::json;

    use baton_types::{ElementId, NodeInstanceId, ProcessInstanceId};

    fn make_work_item(actor: Option<&str>) -> WorkItem {
        let mut parameters = HashMap::new();
        if let Some(actor) = actor {
            parameters.insert(ACTOR_PARAM.to_string(), json!(actor));
        }
        WorkItem::new(
            ProcessInstanceId::new("pi-1"),
            ElementId::new("approve"),
            NodeInstanceId::new("ni-1"),
            "Human Task",
            parameters,
        )
    }

    #[test]
    fn test_matching_actor_passes() {
        let wi = make_work_item(Some("alice"));
        let policy = ActorPolicy::new("alice");
        assert!(enforce_policies(&wi, &[&policy]).is_ok());
    }

    #[test]
    fn test_wrong_actor_is_a_policy_violation() {
        let wi = make_work_item(Some("alice"));
        let policy = ActorPolicy::new("mallory");
        let result = enforce_policies(&wi, &[&policy]);
        assert!(matches!(
            result,
            Err(EngineError::PolicyViolation { work_item_id, reason })
                if work_item_id == wi.id && reason.contains("alice")
        ));
    }

    #[test]
    fn test_unassigned_work_item_is_unrestricted() {
        let wi = make_work_item(None);
        let policy = ActorPolicy::new("anyone");
        assert!(enforce_policies(&wi, &[&policy]).is_ok());
    }

    #[test]
    fn test_empty_policy_set_passes() {
        let wi = make_work_item(Some("alice"));
        assert!(enforce_policies(&wi, &[]).is_ok());
    }
}
