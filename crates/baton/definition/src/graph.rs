//! The definition arena: a flat node table keyed by element id, connections
//! as id pairs, and containers holding ordered id lists.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use baton_types::{ElementId, EngineError, EngineResult};

use crate::correlation::CorrelationManager;
use crate::node::{Node, NodeKind};
use crate::scope::ScopeSet;

/// Directed edge between two nodes of the same container.
///
/// `hidden` edges are excluded from structural validation but followed at
/// runtime; `association` edges are documentation-only and excluded from
/// both. An association is always also hidden.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub from: ElementId,
    pub to: ElementId,
    pub unique_id: String,
    pub hidden: bool,
    pub association: bool,
    /// Condition name evaluated on exclusive gateway exits; `None` marks the
    /// default branch.
    pub condition: Option<String>,
}

impl Connection {
    pub fn new(
        from: impl Into<ElementId>,
        to: impl Into<ElementId>,
        unique_id: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            unique_id: unique_id.into(),
            hidden: false,
            association: false,
            condition: None,
        }
    }

    pub fn association(
        from: impl Into<ElementId>,
        to: impl Into<ElementId>,
        unique_id: impl Into<String>,
    ) -> Self {
        let mut conn = Self::new(from, to, unique_id);
        conn.hidden = true;
        conn.association = true;
        conn
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Whether the runtime follows this edge.
    pub fn is_executable(&self) -> bool {
        !self.association
    }

    /// Whether structural validation counts this edge.
    pub fn counts_for_validation(&self) -> bool {
        !self.hidden
    }
}

/// A container of nodes: either the process root or the body of a
/// composite/event sub-process node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Container {
    /// Member node ids in insertion order. Ordering matters: start-node
    /// resolution walks members in authoring order.
    nodes: Vec<ElementId>,
    pub scopes: ScopeSet,
}

impl Container {
    pub fn contains(&self, id: &ElementId) -> bool {
        self.nodes.contains(id)
    }

    pub fn node_ids(&self) -> &[ElementId] {
        &self.nodes
    }

    pub(crate) fn push(&mut self, id: ElementId) {
        self.nodes.push(id);
    }
}

/// An immutable-after-build process definition graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessDefinition {
    pub id: String,
    pub name: String,
    pub version: String,
    pub(crate) nodes: BTreeMap<ElementId, Node>,
    pub(crate) connections: Vec<Connection>,
    pub(crate) root: Container,
    pub(crate) containers: BTreeMap<ElementId, Container>,
    pub(crate) correlations: CorrelationManager,
    pub(crate) linked: bool,
}

impl ProcessDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            nodes: BTreeMap::new(),
            connections: Vec::new(),
            root: Container::default(),
            containers: BTreeMap::new(),
            correlations: CorrelationManager::new(),
            linked: false,
        }
    }

    // ── Arena access ─────────────────────────────────────────────────────

    pub fn node(&self, id: &ElementId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// The container keyed by a composite node id, or the root for `None`.
    pub fn container(&self, key: Option<&ElementId>) -> Option<&Container> {
        match key {
            None => Some(&self.root),
            Some(id) => self.containers.get(id),
        }
    }

    pub(crate) fn container_mut(&mut self, key: Option<&ElementId>) -> Option<&mut Container> {
        match key {
            None => Some(&mut self.root),
            Some(id) => self.containers.get_mut(id),
        }
    }

    pub fn correlations(&self) -> &CorrelationManager {
        &self.correlations
    }

    pub fn is_linked(&self) -> bool {
        self.linked
    }

    /// Insert a node into the arena and its container's member list.
    /// The node's `container` field decides membership.
    pub(crate) fn insert_node(&mut self, node: Node) -> EngineResult<()> {
        if self.nodes.contains_key(&node.id) {
            return Err(EngineError::DuplicateElementId(node.id));
        }
        let container_key = node.container.clone();
        let id = node.id.clone();
        if node.is_container() {
            self.containers.entry(id.clone()).or_default();
        }
        match self.container_mut(container_key.as_ref()) {
            Some(container) => container.push(id.clone()),
            None => {
                return Err(EngineError::NotFound(format!(
                    "container '{}' for node '{}'",
                    container_key
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "<root>".to_string()),
                    id
                )))
            }
        }
        self.nodes.insert(id, node);
        Ok(())
    }

    // ── Graph queries ────────────────────────────────────────────────────

    pub fn outgoing<'a>(&'a self, id: &'a ElementId) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections.iter().filter(move |c| &c.from == id)
    }

    pub fn incoming<'a>(&'a self, id: &'a ElementId) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections.iter().filter(move |c| &c.to == id)
    }

    /// Outgoing edges the runtime follows, in authoring order.
    pub fn executable_outgoing<'a>(&'a self, id: &'a ElementId) -> Vec<&'a Connection> {
        self.outgoing(id).filter(|c| c.is_executable()).collect()
    }

    /// Source node ids of the executable incoming edges, for join bookkeeping.
    pub fn executable_incoming_sources<'a>(&'a self, id: &'a ElementId) -> Vec<&'a ElementId> {
        self.incoming(id)
            .filter(|c| c.is_executable())
            .map(|c| &c.from)
            .collect()
    }

    /// Start nodes of a container, in authoring order.
    pub fn start_nodes(&self, key: Option<&ElementId>) -> Vec<&Node> {
        let Some(container) = self.container(key) else {
            return Vec::new();
        };
        container
            .node_ids()
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .filter(|n| n.is_start())
            .collect()
    }

    /// Boundary nodes attached to a host activity.
    pub fn boundary_nodes_for(&self, host: &ElementId) -> Vec<&Node> {
        self.nodes
            .values()
            .filter(|n| matches!(&n.kind, NodeKind::Boundary { attached_to, .. } if attached_to == host))
            .collect()
    }

    pub fn event_subprocess_nodes(&self) -> Vec<&Node> {
        self.nodes
            .values()
            .filter(|n| matches!(n.kind, NodeKind::EventSubprocess))
            .collect()
    }

    /// Scope sets visible from a node, innermost container first, root last.
    pub fn scope_chain(&self, node_id: &ElementId) -> Vec<&ScopeSet> {
        let mut chain = Vec::new();
        let mut key = self.nodes.get(node_id).and_then(|n| n.container.clone());
        loop {
            match key {
                Some(container_id) => {
                    if let Some(container) = self.containers.get(&container_id) {
                        chain.push(&container.scopes);
                    }
                    key = self
                        .nodes
                        .get(&container_id)
                        .and_then(|n| n.container.clone());
                }
                None => {
                    chain.push(&self.root.scopes);
                    break;
                }
            }
        }
        chain
    }

    // ── Structural validation ────────────────────────────────────────────

    /// Collect every structural problem. Hidden edges do not count; an
    /// association can therefore neither satisfy nor violate an
    /// execution-order rule.
    pub(crate) fn validate_structure(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let mut seen_connection_ids = HashSet::new();
        for conn in &self.connections {
            if !seen_connection_ids.insert(conn.unique_id.as_str()) {
                errors.push(format!("duplicate connection id '{}'", conn.unique_id));
            }
            let from = self.nodes.get(&conn.from);
            let to = self.nodes.get(&conn.to);
            if from.is_none() {
                errors.push(format!(
                    "connection '{}' references unknown source node '{}'",
                    conn.unique_id, conn.from
                ));
            }
            if to.is_none() {
                errors.push(format!(
                    "connection '{}' references unknown target node '{}'",
                    conn.unique_id, conn.to
                ));
            }
            if let (Some(from), Some(to)) = (from, to) {
                if from.container != to.container {
                    errors.push(format!(
                        "connection '{}' crosses container boundaries",
                        conn.unique_id
                    ));
                }
            }
        }

        if self.start_nodes(None).is_empty() {
            errors.push("process has no start node".to_string());
        }
        if !self
            .root
            .node_ids()
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .any(|n| n.is_end())
        {
            errors.push("process has no end node".to_string());
        }

        for node in self.nodes.values() {
            let incoming = self
                .incoming(&node.id)
                .filter(|c| c.counts_for_validation())
                .count();
            let outgoing = self
                .outgoing(&node.id)
                .filter(|c| c.counts_for_validation())
                .count();

            match &node.kind {
                NodeKind::Start => {
                    if incoming > 0 {
                        errors.push(format!(
                            "start node '{}' must not have incoming connections",
                            node.id
                        ));
                    }
                    if outgoing == 0 {
                        errors.push(format!("start node '{}' has no outgoing connection", node.id));
                    }
                }
                NodeKind::End { .. } => {
                    if outgoing > 0 {
                        errors.push(format!(
                            "end node '{}' must not have outgoing connections",
                            node.id
                        ));
                    }
                    if incoming == 0 {
                        errors.push(format!("end node '{}' has no incoming connection", node.id));
                    }
                }
                NodeKind::Boundary { attached_to, .. } => {
                    match self.nodes.get(attached_to) {
                        None => errors.push(format!(
                            "boundary event '{}' is attached to unknown node '{}'",
                            node.id, attached_to
                        )),
                        Some(host) => {
                            if host.container != node.container {
                                errors.push(format!(
                                    "boundary event '{}' and its host '{}' are in different containers",
                                    node.id, attached_to
                                ));
                            }
                            if !matches!(
                                host.kind,
                                NodeKind::Task { .. }
                                    | NodeKind::WorkItemTask { .. }
                                    | NodeKind::Composite
                            ) {
                                errors.push(format!(
                                    "boundary event '{}' cannot attach to node '{}'",
                                    node.id, attached_to
                                ));
                            }
                        }
                    }
                    if incoming > 0 {
                        errors.push(format!(
                            "boundary event '{}' must not have incoming connections",
                            node.id
                        ));
                    }
                    if outgoing == 0 {
                        errors.push(format!(
                            "boundary event '{}' has no outgoing connection",
                            node.id
                        ));
                    }
                }
                NodeKind::EventSubprocess => {
                    if incoming > 0 || outgoing > 0 {
                        errors.push(format!(
                            "event subprocess '{}' must not have sequence connections",
                            node.id
                        ));
                    }
                    let starts = self.start_nodes(Some(&node.id));
                    if starts.is_empty() {
                        errors.push(format!("event subprocess '{}' has no start node", node.id));
                    }
                    for start in starts {
                        if !start.has_event_trigger() && !start.has_timer_trigger() {
                            errors.push(format!(
                                "event subprocess '{}' start node '{}' must declare an event or timer trigger",
                                node.id, start.id
                            ));
                        }
                    }
                }
                NodeKind::Composite => {
                    if incoming == 0 {
                        errors.push(format!(
                            "composite node '{}' has no incoming connection",
                            node.id
                        ));
                    }
                    if outgoing == 0 {
                        errors.push(format!(
                            "composite node '{}' has no outgoing connection",
                            node.id
                        ));
                    }
                    if self.start_nodes(Some(&node.id)).is_empty() {
                        errors.push(format!("composite node '{}' has no start node", node.id));
                    }
                }
                NodeKind::Task { .. }
                | NodeKind::WorkItemTask { .. }
                | NodeKind::Gateway { .. }
                | NodeKind::Event => {
                    if incoming == 0 {
                        errors.push(format!("node '{}' has no incoming connection", node.id));
                    }
                    if outgoing == 0 {
                        errors.push(format!("node '{}' has no outgoing connection", node.id));
                    }
                }
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;

    fn minimal() -> ProcessDefinition {
        let mut def = ProcessDefinition::new("p", "Process", "1.0");
        def.insert_node(Node::start("start", "Start")).unwrap();
        def.insert_node(Node::task("work", "Work")).unwrap();
        def.insert_node(Node::end("end", "End")).unwrap();
        def.connections.push(Connection::new("start", "work", "c1"));
        def.connections.push(Connection::new("work", "end", "c2"));
        def
    }

    #[test]
    fn test_arena_lookup_and_duplicate_rejection() {
        let mut def = minimal();
        assert!(def.node(&ElementId::new("work")).is_some());
        assert!(def.node(&ElementId::new("nope")).is_none());

        let result = def.insert_node(Node::task("work", "Again"));
        assert!(matches!(result, Err(EngineError::DuplicateElementId(_))));
    }

    #[test]
    fn test_minimal_graph_validates_clean() {
        let def = minimal();
        assert!(def.validate_structure().is_empty());
    }

    #[test]
    fn test_edge_queries_follow_direction() {
        let mut def = minimal();
        def.connections
            .push(Connection::association("work", "end", "a1"));
        let work = ElementId::new("work");

        let outgoing: Vec<&Connection> = def.outgoing(&work).collect();
        assert_eq!(outgoing.len(), 2);
        assert!(def.incoming(&work).all(|c| c.from == ElementId::new("start")));

        // Association edges drop out of the executable views.
        assert_eq!(def.executable_outgoing(&work).len(), 1);
        assert_eq!(
            def.executable_incoming_sources(&ElementId::new("end")),
            vec![&ElementId::new("work")]
        );
    }

    #[test]
    fn test_validation_collects_every_problem() {
        let mut def = ProcessDefinition::new("p", "Process", "1.0");
        def.insert_node(Node::task("orphan", "Orphan")).unwrap();
        def.connections
            .push(Connection::new("orphan", "missing", "c1"));

        let errors = def.validate_structure();
        assert!(errors.iter().any(|e| e.contains("no start node")));
        assert!(errors.iter().any(|e| e.contains("no end node")));
        assert!(errors.iter().any(|e| e.contains("unknown target node 'missing'")));
        assert!(errors.iter().any(|e| e.contains("'orphan' has no incoming")));
        assert!(errors.len() >= 4);
    }

    #[test]
    fn test_associations_do_not_count_for_validation() {
        let mut def = minimal();
        // Documentation edge out of the end node: allowed.
        def.insert_node(Node::task("note", "Note")).unwrap();
        def.connections
            .push(Connection::association("end", "note", "a1"));
        def.connections
            .push(Connection::association("note", "work", "a2"));

        let errors = def.validate_structure();
        // The association neither violates the end-node rule nor satisfies
        // the note task's execution-order requirements.
        assert!(!errors.iter().any(|e| e.contains("end node 'end'")));
        assert!(errors.iter().any(|e| e.contains("'note' has no incoming")));
        assert!(errors.iter().any(|e| e.contains("'note' has no outgoing")));
    }

    #[test]
    fn test_cross_container_connection_is_flagged() {
        let mut def = minimal();
        def.insert_node(Node::composite("sub", "Sub")).unwrap();
        let mut inner = Node::task("inner", "Inner");
        inner.container = Some(ElementId::new("sub"));
        def.insert_node(inner).unwrap();
        def.connections.push(Connection::new("work", "inner", "x1"));

        let errors = def.validate_structure();
        assert!(errors.iter().any(|e| e.contains("crosses container boundaries")));
    }

    #[test]
    fn test_scope_chain_walks_to_root() {
        let mut def = ProcessDefinition::new("p", "Process", "1.0");
        def.insert_node(Node::composite("sub", "Sub")).unwrap();
        let mut inner = Node::task("inner", "Inner");
        inner.container = Some(ElementId::new("sub"));
        def.insert_node(inner).unwrap();

        assert_eq!(def.scope_chain(&ElementId::new("inner")).len(), 2);
        assert_eq!(def.scope_chain(&ElementId::new("sub")).len(), 1);
    }

    #[test]
    fn test_duplicate_connection_ids_are_flagged() {
        let mut def = minimal();
        def.connections.push(Connection::new("start", "end", "c1"));
        let errors = def.validate_structure();
        assert!(errors.iter().any(|e| e.contains("duplicate connection id 'c1'")));
    }
}
