//! Action and condition registry.
//!
//! Definitions reference task scripts and gateway conditions by name only;
//! the closures live here, registered by the embedding application. This
//! keeps the definition graph pure data while the runtime interprets it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use baton_types::{ElementId, ProcessInstanceId};

/// A fault raised by a task action. The code selects an exception-scope
/// handler; an uncoded fault only matches the any-error handler.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeFault {
    pub code: Option<String>,
    pub message: String,
}

impl NodeFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }
}

impl fmt::Display for NodeFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{}] {}", code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Execution context handed to a task action.
///
/// `variables` is a scratch copy of the instance variables; the runtime
/// commits it only when the action returns `Ok`, so a fault leaves the
/// stored variables untouched.
pub struct ActionContext<'a> {
    pub process_instance_id: &'a ProcessInstanceId,
    pub node_id: &'a ElementId,
    pub variables: &'a mut HashMap<String, Value>,
    pub headers: &'a HashMap<String, String>,
}

impl ActionContext<'_> {
    pub fn var(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn set_var(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }
}

/// A task script registered under a name.
pub type Action = Arc<dyn Fn(&mut ActionContext<'_>) -> Result<(), NodeFault> + Send + Sync>;

/// A gateway condition evaluated against the instance variables.
pub type Condition = Arc<dyn Fn(&HashMap<String, Value>) -> bool + Send + Sync>;

/// Named closures resolved at runtime.
#[derive(Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Action>,
    conditions: HashMap<String, Condition>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_action<F>(&mut self, name: impl Into<String>, action: F)
    where
        F: Fn(&mut ActionContext<'_>) -> Result<(), NodeFault> + Send + Sync + 'static,
    {
        self.actions.insert(name.into(), Arc::new(action));
    }

    pub fn register_condition<F>(&mut self, name: impl Into<String>, condition: F)
    where
        F: Fn(&HashMap<String, Value>) -> bool + Send + Sync + 'static,
    {
        self.conditions.insert(name.into(), Arc::new(condition));
    }

    pub fn action(&self, name: &str) -> Option<&Action> {
        self.actions.get(name)
    }

    pub fn condition(&self, name: &str) -> Option<&Condition> {
        self.conditions.get(name)
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .field("conditions", &self.conditions.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_runs_against_context() {
        let mut registry = ActionRegistry::new();
        registry.register_action("double", |ctx| {
            let amount = ctx.var("amount").and_then(Value::as_i64).unwrap_or(0);
            ctx.set_var("amount", json!(amount * 2));
            Ok(())
        });

        let pi = ProcessInstanceId::new("pi-1");
        let node = ElementId::new("calc");
        let mut variables = HashMap::from([("amount".to_string(), json!(21))]);
        let headers = HashMap::new();
        let mut ctx = ActionContext {
            process_instance_id: &pi,
            node_id: &node,
            variables: &mut variables,
            headers: &headers,
        };

        let action = registry.action("double").unwrap().clone();
        action(&mut ctx).unwrap();
        assert_eq!(variables["amount"], json!(42));
    }

    #[test]
    fn test_fault_carries_optional_code() {
        let coded = NodeFault::with_code("E42", "boom");
        assert_eq!(coded.to_string(), "[E42] boom");
        let plain = NodeFault::new("boom");
        assert_eq!(plain.to_string(), "boom");
        assert!(plain.code.is_none());
    }

    #[test]
    fn test_unknown_names_resolve_to_none() {
        let registry = ActionRegistry::new();
        assert!(registry.action("missing").is_none());
        assert!(registry.condition("missing").is_none());
    }

    #[test]
    fn test_condition_reads_variables() {
        let mut registry = ActionRegistry::new();
        registry.register_condition("approved", |vars| {
            vars.get("decision").and_then(Value::as_str) == Some("approved")
        });

        let vars = HashMap::from([("decision".to_string(), json!("approved"))]);
        assert!(registry.condition("approved").unwrap()(&vars));
        assert!(!registry.condition("approved").unwrap()(&HashMap::new()));
    }
}
