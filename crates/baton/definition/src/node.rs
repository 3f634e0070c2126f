//! Graph vertices: the closed [`NodeKind`] variant set and per-node data.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use baton_types::ElementId;

use crate::trigger::{EventFilter, TimerSpec, Trigger};

/// Metadata key marking a node as a milestone; the value is the milestone name.
pub const MILESTONE_KEY: &str = "milestone";

/// One vertex of a process definition graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: ElementId,
    pub name: String,
    pub kind: NodeKind,
    /// Free-form authoring metadata (`milestone`, tool annotations, ...).
    pub metadata: BTreeMap<String, String>,
    /// Start conditions; a node may carry any number of them.
    pub triggers: Vec<Trigger>,
    /// Actions run when the node's instance leaves the node. Appended by the
    /// linker; additive, every entry runs.
    pub exit_actions: Vec<ExitAction>,
    /// Boundary timers registered on this node as a host activity.
    pub boundary_timers: Vec<BoundaryTimer>,
    /// Container this node belongs to; `None` means the process root.
    pub container: Option<ElementId>,
}

/// Closed set of node behaviors. Each variant carries only its own fields;
/// the runtime matches exhaustively instead of inspecting types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    Start,
    End {
        /// A terminating end cancels every other live path in the instance.
        terminating: bool,
    },
    /// Script-style task; `action` names a closure registered with the
    /// runtime's action registry.
    Task { action: Option<String> },
    /// Task performed outside the engine and tracked as a work item.
    WorkItemTask { work_item_name: String },
    Gateway { gateway: GatewayKind },
    /// Intermediate catch event; its filters live in `triggers`.
    Event,
    /// Event attached to a host activity.
    Boundary {
        attached_to: ElementId,
        cancel_activity: bool,
        event: BoundaryEvent,
    },
    /// Embedded sub-process; owns a container of inner nodes.
    Composite,
    /// Sub-process started by an event instead of control flow.
    EventSubprocess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatewayKind {
    /// Pick exactly one outgoing path.
    Exclusive,
    /// Fork all outgoing paths / join all incoming paths.
    Parallel,
}

/// What a boundary event reacts to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BoundaryEvent {
    Timer { spec: TimerSpec },
    Signal { channel: String },
    Error {
        /// Error code the boundary catches; `None` catches any code.
        code: Option<String>,
        /// Structural error-type reference, registered as an extra handler key.
        error_ref: Option<String>,
    },
}

/// Exit-time action appended to an event node by the linker. Data, not a
/// closure: the runtime interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExitAction {
    /// Cancel every live node instance of the given definition node.
    CancelNodeInstance { node_id: ElementId },
}

/// A timer registered on a host activity by the linker. The external
/// scheduler reads these off the definition and injects a synthetic signal
/// on the boundary node's timer channel when firing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryTimer {
    pub event_node_id: ElementId,
    pub spec: TimerSpec,
}

impl Node {
    fn bare(id: impl Into<ElementId>, name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            metadata: BTreeMap::new(),
            triggers: Vec::new(),
            exit_actions: Vec::new(),
            boundary_timers: Vec::new(),
            container: None,
        }
    }

    pub fn start(id: impl Into<ElementId>, name: impl Into<String>) -> Self {
        Self::bare(id, name, NodeKind::Start)
    }

    pub fn end(id: impl Into<ElementId>, name: impl Into<String>) -> Self {
        Self::bare(id, name, NodeKind::End { terminating: false })
    }

    pub fn terminating_end(id: impl Into<ElementId>, name: impl Into<String>) -> Self {
        Self::bare(id, name, NodeKind::End { terminating: true })
    }

    pub fn task(id: impl Into<ElementId>, name: impl Into<String>) -> Self {
        Self::bare(id, name, NodeKind::Task { action: None })
    }

    pub fn script_task(
        id: impl Into<ElementId>,
        name: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self::bare(
            id,
            name,
            NodeKind::Task {
                action: Some(action.into()),
            },
        )
    }

    pub fn work_item_task(
        id: impl Into<ElementId>,
        name: impl Into<String>,
        work_item_name: impl Into<String>,
    ) -> Self {
        Self::bare(
            id,
            name,
            NodeKind::WorkItemTask {
                work_item_name: work_item_name.into(),
            },
        )
    }

    pub fn gateway(id: impl Into<ElementId>, name: impl Into<String>, gateway: GatewayKind) -> Self {
        Self::bare(id, name, NodeKind::Gateway { gateway })
    }

    pub fn event(id: impl Into<ElementId>, name: impl Into<String>) -> Self {
        Self::bare(id, name, NodeKind::Event)
    }

    pub fn boundary(
        id: impl Into<ElementId>,
        name: impl Into<String>,
        attached_to: impl Into<ElementId>,
        event: BoundaryEvent,
        cancel_activity: bool,
    ) -> Self {
        Self::bare(
            id,
            name,
            NodeKind::Boundary {
                attached_to: attached_to.into(),
                cancel_activity,
                event,
            },
        )
    }

    pub fn composite(id: impl Into<ElementId>, name: impl Into<String>) -> Self {
        Self::bare(id, name, NodeKind::Composite)
    }

    pub fn event_subprocess(id: impl Into<ElementId>, name: impl Into<String>) -> Self {
        Self::bare(id, name, NodeKind::EventSubprocess)
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Mark this node as a milestone with the given name.
    pub fn with_milestone(self, name: impl Into<String>) -> Self {
        self.with_metadata(MILESTONE_KEY, name)
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn is_container(&self) -> bool {
        matches!(self.kind, NodeKind::Composite | NodeKind::EventSubprocess)
    }

    pub fn is_start(&self) -> bool {
        matches!(self.kind, NodeKind::Start)
    }

    pub fn is_end(&self) -> bool {
        matches!(self.kind, NodeKind::End { .. })
    }

    pub fn has_event_trigger(&self) -> bool {
        self.triggers.iter().any(|t| matches!(t, Trigger::Event { .. }))
    }

    pub fn has_timer_trigger(&self) -> bool {
        self.triggers.iter().any(|t| matches!(t, Trigger::Timer { .. }))
    }

    pub fn has_conditional_trigger(&self) -> bool {
        self.triggers
            .iter()
            .any(|t| matches!(t, Trigger::Conditional { .. }))
    }

    /// All event filters across this node's triggers.
    pub fn event_filters(&self) -> impl Iterator<Item = &EventFilter> {
        self.triggers.iter().filter_map(|t| match t {
            Trigger::Event { filters } => Some(filters.iter()),
            _ => None,
        })
        .flatten()
    }

    /// Whether any event filter on this node accepts the channel.
    pub fn accepts_channel(&self, channel: &str) -> bool {
        self.event_filters().any(|f| f.accepts(channel))
    }

    pub fn milestone_name(&self) -> Option<&str> {
        self.metadata.get(MILESTONE_KEY).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_set_kind() {
        assert!(Node::start("s", "Start").is_start());
        assert!(Node::end("e", "End").is_end());
        assert!(matches!(
            Node::terminating_end("t", "Terminate").kind,
            NodeKind::End { terminating: true }
        ));
        assert!(Node::composite("c", "Sub").is_container());
        assert!(Node::event_subprocess("es", "Handler").is_container());
        assert!(!Node::task("t", "Work").is_container());
    }

    #[test]
    fn test_event_filters_flatten_across_triggers() {
        let node = Node::event("ev", "Catch")
            .with_trigger(Trigger::event(vec![EventFilter::new("a")]))
            .with_trigger(Trigger::event(vec![
                EventFilter::new("b"),
                EventFilter::new("c"),
            ]));
        let types: Vec<_> = node.event_filters().map(|f| f.event_type.clone()).collect();
        assert_eq!(types, vec!["a", "b", "c"]);
        assert!(node.accepts_channel("b"));
        assert!(!node.accepts_channel("d"));
    }

    #[test]
    fn test_trigger_queries() {
        let node = Node::start("s", "Start")
            .with_trigger(Trigger::timer(TimerSpec::duration("PT1M")));
        assert!(node.has_timer_trigger());
        assert!(!node.has_event_trigger());
        assert!(!node.has_conditional_trigger());
    }

    #[test]
    fn test_milestone_metadata() {
        let node = Node::task("t", "Review").with_milestone("reviewed");
        assert_eq!(node.milestone_name(), Some("reviewed"));
        assert_eq!(Node::task("u", "Other").milestone_name(), None);
    }
}
