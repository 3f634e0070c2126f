//! Assembly API for process definitions.
//!
//! The builder keeps a container stack: nodes and connections land in the
//! container opened by the most recent `begin_composite`. `validate()` runs
//! the linker first and then structural validation, reporting every problem
//! in one `Validation` error rather than stopping at the first.

use serde_json::Value;
use tracing::debug;

use baton_types::{ElementId, EngineError, EngineResult};

use crate::correlation::CorrelationKey;
use crate::graph::{Connection, ProcessDefinition};
use crate::link;
use crate::node::Node;
use crate::scope::HandlerAction;

pub struct ProcessBuilder {
    def: ProcessDefinition,
    container_stack: Vec<ElementId>,
}

impl ProcessBuilder {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            def: ProcessDefinition::new(id, name, "1.0"),
            container_stack: Vec::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.def.version = version.into();
        self
    }

    /// The definition as assembled so far.
    pub fn definition(&self) -> &ProcessDefinition {
        &self.def
    }

    fn current_key(&self) -> Option<ElementId> {
        self.container_stack.last().cloned()
    }

    // ── Nodes and containers ─────────────────────────────────────────────

    /// Add a node to the current container.
    pub fn add_node(&mut self, mut node: Node) -> EngineResult<()> {
        node.container = self.current_key();
        self.def.insert_node(node)
    }

    /// Add a composite or event-subprocess node and make its body the
    /// current container until `end_composite`.
    pub fn begin_composite(&mut self, node: Node) -> EngineResult<()> {
        if !node.is_container() {
            return Err(EngineError::IllegalState(format!(
                "node '{}' is not a composite or event subprocess",
                node.id
            )));
        }
        let id = node.id.clone();
        self.add_node(node)?;
        self.container_stack.push(id);
        Ok(())
    }

    pub fn end_composite(&mut self) -> EngineResult<()> {
        match self.container_stack.pop() {
            Some(_) => Ok(()),
            None => Err(EngineError::IllegalState(
                "end_composite without begin_composite".to_string(),
            )),
        }
    }

    // ── Connections ──────────────────────────────────────────────────────

    /// Create a directed edge between two nodes of the current container.
    pub fn connection(
        &mut self,
        from: impl Into<ElementId>,
        to: impl Into<ElementId>,
        unique_id: impl Into<String>,
    ) -> EngineResult<()> {
        self.add_connection(Connection::new(from, to, unique_id))
    }

    /// A connection guarded by a named condition, for exclusive gateway exits.
    pub fn conditional_connection(
        &mut self,
        from: impl Into<ElementId>,
        to: impl Into<ElementId>,
        unique_id: impl Into<String>,
        condition: impl Into<String>,
    ) -> EngineResult<()> {
        self.add_connection(Connection::new(from, to, unique_id).with_condition(condition))
    }

    /// A documentation-only edge: hidden and excluded from execution-order
    /// validation.
    pub fn association(
        &mut self,
        from: impl Into<ElementId>,
        to: impl Into<ElementId>,
        unique_id: impl Into<String>,
    ) -> EngineResult<()> {
        self.add_connection(Connection::association(from, to, unique_id))
    }

    fn add_connection(&mut self, conn: Connection) -> EngineResult<()> {
        let key = self.current_key();
        let container = self
            .def
            .container(key.as_ref())
            .ok_or_else(|| EngineError::NotFound("current container".to_string()))?;
        for endpoint in [&conn.from, &conn.to] {
            if !container.contains(endpoint) {
                return Err(EngineError::NotFound(format!(
                    "node '{}' referenced by connection '{}'",
                    endpoint, conn.unique_id
                )));
            }
        }
        self.def.connections.push(conn);
        Ok(())
    }

    // ── Scopes ───────────────────────────────────────────────────────────

    /// Register an exception handler on the current container, creating its
    /// exception scope on first use.
    pub fn exception_handler(
        &mut self,
        code: Option<String>,
        action: HandlerAction,
    ) -> EngineResult<()> {
        let key = self.current_key();
        let container = self
            .def
            .container_mut(key.as_ref())
            .ok_or_else(|| EngineError::NotFound("current container".to_string()))?;
        container.scopes.exception_scope_mut().register(code, action);
        Ok(())
    }

    /// Register a compensation handler on the current container, creating its
    /// compensation scope on first use. Both nodes must exist in the current
    /// container.
    pub fn compensation_handler(
        &mut self,
        target: impl Into<ElementId>,
        handler: impl Into<ElementId>,
    ) -> EngineResult<()> {
        let target = target.into();
        let handler = handler.into();
        let key = self.current_key();
        let container = self
            .def
            .container(key.as_ref())
            .ok_or_else(|| EngineError::NotFound("current container".to_string()))?;
        for node in [&target, &handler] {
            if !container.contains(node) {
                return Err(EngineError::NotFound(format!(
                    "node '{}' referenced by compensation handler",
                    node
                )));
            }
        }
        let container = self
            .def
            .container_mut(key.as_ref())
            .ok_or_else(|| EngineError::NotFound("current container".to_string()))?;
        container
            .scopes
            .compensation_scope_mut()
            .register(target, handler);
        Ok(())
    }

    /// Declare a process variable on the current container's variable scope.
    pub fn variable(&mut self, name: impl Into<String>, default: Option<Value>) -> EngineResult<()> {
        let key = self.current_key();
        let container = self
            .def
            .container_mut(key.as_ref())
            .ok_or_else(|| EngineError::NotFound("current container".to_string()))?;
        container.scopes.variables.declare(name, default);
        Ok(())
    }

    /// Register a swimlane on the current container, creating the lane scope
    /// on first use.
    pub fn swimlane(&mut self, name: impl Into<String>, actor: Option<String>) -> EngineResult<()> {
        let key = self.current_key();
        let container = self
            .def
            .container_mut(key.as_ref())
            .ok_or_else(|| EngineError::NotFound("current container".to_string()))?;
        container.scopes.swimlane_scope_mut().register(name, actor);
        Ok(())
    }

    /// Register a correlation key; key names are unique per definition.
    pub fn correlation_key(&mut self, correlation_key: CorrelationKey) -> EngineResult<()> {
        self.def.correlations.register_key(correlation_key)
    }

    // ── Validation and build ─────────────────────────────────────────────

    /// Link boundary events, then validate structure. Every problem found is
    /// reported; a clean pass leaves the definition linked.
    pub fn validate(&mut self) -> EngineResult<()> {
        let mut errors = Vec::new();
        if let Some(open) = self.container_stack.last() {
            errors.push(format!("composite '{}' was never closed", open));
        }
        errors.extend(link::link_pass(&mut self.def));
        errors.extend(self.def.validate_structure());
        if errors.is_empty() {
            debug!(process_id = %self.def.id, "definition validated");
            Ok(())
        } else {
            Err(EngineError::Validation(errors))
        }
    }

    /// Validate and hand over the finished definition.
    pub fn build(mut self) -> EngineResult<ProcessDefinition> {
        self.validate()?;
        Ok(self.def)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{BoundaryEvent, Node};
    use crate::trigger::TimerSpec;

    fn straight_line() -> ProcessBuilder {
        let mut builder = ProcessBuilder::new("order", "Order process");
        builder.add_node(Node::start("start", "Start")).unwrap();
        builder.add_node(Node::task("work", "Work")).unwrap();
        builder.add_node(Node::end("end", "End")).unwrap();
        builder.connection("start", "work", "c1").unwrap();
        builder.connection("work", "end", "c2").unwrap();
        builder
    }

    #[test]
    fn test_connection_to_unknown_node_fails_immediately() {
        let mut builder = ProcessBuilder::new("p", "Process");
        builder.add_node(Node::start("start", "Start")).unwrap();

        let result = builder.connection("start", "ghost", "c1");
        assert!(matches!(
            result,
            Err(EngineError::NotFound(msg)) if msg.contains("ghost") && msg.contains("c1")
        ));
    }

    #[test]
    fn test_association_is_hidden_and_non_executable() {
        let mut builder = straight_line();
        builder.add_node(Node::task("doc", "Docs")).unwrap();
        builder.association("work", "doc", "a1").unwrap();

        let conn = builder
            .definition()
            .connections()
            .iter()
            .find(|c| c.unique_id == "a1")
            .unwrap();
        assert!(conn.hidden);
        assert!(conn.association);
        assert!(!conn.is_executable());
    }

    #[test]
    fn test_nodes_land_in_the_open_composite() {
        let mut builder = straight_line();
        builder
            .begin_composite(Node::composite("sub", "Sub"))
            .unwrap();
        builder.add_node(Node::start("s-start", "Inner start")).unwrap();
        builder.add_node(Node::end("s-end", "Inner end")).unwrap();
        builder.connection("s-start", "s-end", "s1").unwrap();

        // Inner nodes are invisible from the root container.
        let result = builder.connection("work", "s-start", "bad");
        assert!(matches!(result, Err(EngineError::NotFound(_))));

        builder.end_composite().unwrap();
        builder.connection("work", "sub", "c3").unwrap();

        let def = builder.definition();
        let inner = def.node(&ElementId::new("s-start")).unwrap();
        assert_eq!(inner.container, Some(ElementId::new("sub")));
    }

    #[test]
    fn test_end_composite_without_begin_fails() {
        let mut builder = straight_line();
        assert!(matches!(
            builder.end_composite(),
            Err(EngineError::IllegalState(_))
        ));
    }

    #[test]
    fn test_begin_composite_rejects_plain_nodes() {
        let mut builder = straight_line();
        assert!(matches!(
            builder.begin_composite(Node::task("t", "Task")),
            Err(EngineError::IllegalState(_))
        ));
    }

    #[test]
    fn test_exception_handler_creates_scope_lazily() {
        let mut builder = straight_line();
        assert!(builder.definition().container(None).unwrap().scopes.exception.is_none());

        builder
            .exception_handler(
                Some("E1".to_string()),
                HandlerAction::Cancel {
                    node_id: ElementId::new("work"),
                },
            )
            .unwrap();
        builder
            .exception_handler(
                None,
                HandlerAction::Signal {
                    channel: "any".to_string(),
                },
            )
            .unwrap();

        let scope = builder
            .definition()
            .container(None)
            .unwrap()
            .scopes
            .exception
            .as_ref()
            .unwrap();
        assert_eq!(scope.handlers.len(), 2);
    }

    #[test]
    fn test_validate_reports_every_problem_at_once() {
        let mut builder = ProcessBuilder::new("p", "Process");
        builder.add_node(Node::task("floating", "Floating")).unwrap();

        let result = builder.validate();
        let Err(EngineError::Validation(errors)) = result else {
            panic!("expected aggregated validation failure");
        };
        assert!(errors.iter().any(|e| e.contains("no start node")));
        assert!(errors.iter().any(|e| e.contains("no end node")));
        assert!(errors.iter().any(|e| e.contains("'floating' has no incoming")));
        assert!(errors.len() >= 3);
    }

    #[test]
    fn test_validate_links_exactly_once() {
        let mut builder = straight_line();
        builder
            .add_node(Node::boundary(
                "b1",
                "Deadline",
                "work",
                BoundaryEvent::Timer {
                    spec: TimerSpec::duration("PT1H"),
                },
                true,
            ))
            .unwrap();
        builder.add_node(Node::end("b-end", "Escalated")).unwrap();
        builder.connection("b1", "b-end", "c4").unwrap();

        builder.validate().unwrap();
        builder.validate().unwrap();

        let event_node = builder.definition().node(&ElementId::new("b1")).unwrap();
        assert_eq!(event_node.exit_actions.len(), 1);
    }

    #[test]
    fn test_unclosed_composite_is_a_validation_error() {
        let mut builder = straight_line();
        builder
            .begin_composite(Node::composite("sub", "Sub"))
            .unwrap();

        let result = builder.validate();
        assert!(matches!(
            result,
            Err(EngineError::Validation(errors))
                if errors.iter().any(|e| e.contains("'sub' was never closed"))
        ));
    }

    #[test]
    fn test_build_hands_over_a_linked_definition() {
        let def = straight_line().build().unwrap();
        assert!(def.is_linked());
        assert_eq!(def.version, "1.0");
    }

    #[test]
    fn test_duplicate_node_id_fails_at_add() {
        let mut builder = straight_line();
        let result = builder.add_node(Node::task("work", "Work again"));
        assert!(matches!(result, Err(EngineError::DuplicateElementId(_))));
    }
}
