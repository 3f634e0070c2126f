//! Context scopes attached to a container: variables, exception handlers,
//! compensation handlers, swimlanes.
//!
//! Exception and compensation scopes are created lazily: the first handler
//! registration instantiates the scope as the container's default; later
//! registrations reuse it. The `Option` fields make "at most one default scope
//! per type per container" hold by construction.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use baton_types::ElementId;

/// A declared process variable with an optional default value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDef {
    pub name: String,
    pub default: Option<Value>,
}

/// Default variable scope of a container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableScope {
    pub variables: Vec<VariableDef>,
}

impl VariableScope {
    pub fn declare(&mut self, name: impl Into<String>, default: Option<Value>) {
        self.variables.push(VariableDef {
            name: name.into(),
            default,
        });
    }
}

/// What an exception handler does when it absorbs a fault. Data interpreted
/// by the runtime, never a closure stored in the definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HandlerAction {
    /// Dispatch a synthetic signal on the given channel.
    Signal { channel: String },
    /// Cancel every live node instance of the given definition node.
    Cancel { node_id: ElementId },
    /// Trigger the compensation handler registered for the given node.
    Compensate { target: ElementId },
}

/// Exception handlers of one container, keyed by error code.
///
/// The `None` key is the "any error" handler used when a fault carries no
/// code, or no code-specific handler matches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExceptionScope {
    pub handlers: BTreeMap<Option<String>, HandlerAction>,
}

impl ExceptionScope {
    pub fn register(&mut self, code: Option<String>, action: HandlerAction) {
        self.handlers.insert(code, action);
    }

    /// Resolve the handler for a fault code: exact code first, then the
    /// any-error handler.
    pub fn handler_for(&self, code: Option<&str>) -> Option<&HandlerAction> {
        if let Some(code) = code {
            if let Some(action) = self.handlers.get(&Some(code.to_string())) {
                return Some(action);
            }
        }
        self.handlers.get(&None)
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Compensation handlers of one container: target node to handler node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompensationScope {
    pub handlers: BTreeMap<ElementId, ElementId>,
}

impl CompensationScope {
    pub fn register(&mut self, target: ElementId, handler: ElementId) {
        self.handlers.insert(target, handler);
    }

    pub fn handler_for(&self, target: &ElementId) -> Option<&ElementId> {
        self.handlers.get(target)
    }
}

/// A named lane with an optional assigned actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Swimlane {
    pub name: String,
    pub actor: Option<String>,
}

/// Swimlanes of one container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwimlaneScope {
    pub lanes: BTreeMap<String, Swimlane>,
}

impl SwimlaneScope {
    pub fn register(&mut self, name: impl Into<String>, actor: Option<String>) {
        let name = name.into();
        self.lanes.insert(
            name.clone(),
            Swimlane { name, actor },
        );
    }
}

/// The scope set of one container. One default scope per type at most.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopeSet {
    pub variables: VariableScope,
    pub exception: Option<ExceptionScope>,
    pub compensation: Option<CompensationScope>,
    pub swimlanes: Option<SwimlaneScope>,
}

impl ScopeSet {
    /// The container's exception scope, created on first use.
    pub fn exception_scope_mut(&mut self) -> &mut ExceptionScope {
        self.exception.get_or_insert_with(ExceptionScope::default)
    }

    /// The container's compensation scope, created on first use.
    pub fn compensation_scope_mut(&mut self) -> &mut CompensationScope {
        self.compensation.get_or_insert_with(CompensationScope::default)
    }

    /// The container's swimlane scope, created on first use.
    pub fn swimlane_scope_mut(&mut self) -> &mut SwimlaneScope {
        self.swimlanes.get_or_insert_with(SwimlaneScope::default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_exception_scope_created_lazily_and_reused() {
        let mut scopes = ScopeSet::default();
        assert!(scopes.exception.is_none());

        scopes.exception_scope_mut().register(
            Some("E1".to_string()),
            HandlerAction::Signal {
                channel: "Error-task-E1".to_string(),
            },
        );
        assert!(scopes.exception.is_some());

        scopes.exception_scope_mut().register(
            None,
            HandlerAction::Cancel {
                node_id: ElementId::new("task"),
            },
        );
        let scope = scopes.exception.as_ref().unwrap();
        assert_eq!(scope.handlers.len(), 2);
    }

    #[test]
    fn test_handler_resolution_falls_back_to_any_error() {
        let mut scope = ExceptionScope::default();
        scope.register(
            Some("E1".to_string()),
            HandlerAction::Signal {
                channel: "specific".to_string(),
            },
        );
        scope.register(
            None,
            HandlerAction::Signal {
                channel: "fallback".to_string(),
            },
        );

        assert!(matches!(
            scope.handler_for(Some("E1")),
            Some(HandlerAction::Signal { channel }) if channel == "specific"
        ));
        assert!(matches!(
            scope.handler_for(Some("E2")),
            Some(HandlerAction::Signal { channel }) if channel == "fallback"
        ));
        assert!(matches!(
            scope.handler_for(None),
            Some(HandlerAction::Signal { channel }) if channel == "fallback"
        ));
    }

    #[test]
    fn test_no_fallback_without_any_error_handler() {
        let mut scope = ExceptionScope::default();
        scope.register(
            Some("E1".to_string()),
            HandlerAction::Signal {
                channel: "specific".to_string(),
            },
        );
        assert!(scope.handler_for(Some("E2")).is_none());
        assert!(scope.handler_for(None).is_none());
    }

    #[test]
    fn test_variable_scope_declares_defaults() {
        let mut scope = VariableScope::default();
        scope.declare("count", Some(json!(0)));
        scope.declare("note", None);
        assert_eq!(scope.variables.len(), 2);
        assert_eq!(scope.variables[0].default, Some(json!(0)));
    }

    #[test]
    fn test_compensation_scope_maps_target_to_handler() {
        let mut scope = CompensationScope::default();
        scope.register(ElementId::new("book-hotel"), ElementId::new("cancel-hotel"));
        assert_eq!(
            scope.handler_for(&ElementId::new("book-hotel")),
            Some(&ElementId::new("cancel-hotel"))
        );
        assert!(scope.handler_for(&ElementId::new("other")).is_none());
    }
}
