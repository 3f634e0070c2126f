//! Boundary-event wiring, run exactly once after the raw graph is built.
//!
//! For every node attached to a host activity the linker registers timers on
//! the host, wires error handlers into the host's exception scope, and
//! appends cancel-on-exit actions. Re-running it would duplicate those
//! actions, so it is gated behind the definition's `linked` flag; `validate()`
//! invokes it before structural validation.

use tracing::debug;

use baton_types::{ElementId, EngineError, EngineResult};

use crate::graph::ProcessDefinition;
use crate::node::{BoundaryEvent, BoundaryTimer, ExitAction, NodeKind};
use crate::scope::HandlerAction;
use crate::trigger::{EventFilter, TimerSpec, Trigger, CYCLE_REPEAT_SEPARATOR};

/// Channel of the synthetic event a matched exception handler dispatches.
/// With no configured code the suffix is empty.
pub fn error_channel(host: &ElementId, code: Option<&str>) -> String {
    format!("Error-{}-{}", host, code.unwrap_or(""))
}

/// Channel the external scheduler fires when a boundary timer elapses.
pub fn timer_channel(event_node_id: &ElementId) -> String {
    format!("Timer-{}", event_node_id)
}

/// Link boundary events and event-subprocess triggers into the graph.
///
/// A no-op when the definition is already linked. Problems found while
/// linking are aggregated into a single `Validation` error.
pub fn link_boundary_events(def: &mut ProcessDefinition) -> EngineResult<()> {
    let errors = link_pass(def);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(EngineError::Validation(errors))
    }
}

struct BoundaryLink {
    event_node_id: ElementId,
    host_id: ElementId,
    cancel_activity: bool,
    wiring: Wiring,
}

enum Wiring {
    Timer { spec: TimerSpec },
    Signal,
    Error {
        code: Option<String>,
        error_ref: Option<String>,
        /// Container whose exception scope takes the handler: the host's own
        /// body when the host is a composite, else the container holding it.
        scope_key: Option<ElementId>,
    },
}

/// Inner linking pass; returns problems instead of failing fast so the
/// builder can report them together with structural validation.
pub(crate) fn link_pass(def: &mut ProcessDefinition) -> Vec<String> {
    if def.linked {
        return Vec::new();
    }
    let mut errors = Vec::new();

    // Phase 1: read-only scan.
    let mut links = Vec::new();
    for node in def.nodes() {
        let NodeKind::Boundary {
            attached_to,
            cancel_activity,
            event,
        } = &node.kind
        else {
            continue;
        };
        let Some(host) = def.node(attached_to) else {
            errors.push(format!(
                "boundary event '{}' is attached to unknown node '{}'",
                node.id, attached_to
            ));
            continue;
        };
        let wiring = match event {
            BoundaryEvent::Timer { spec } => Wiring::Timer {
                spec: split_repeat_limit(spec.clone(), &node.id, &mut errors),
            },
            BoundaryEvent::Signal { .. } => Wiring::Signal,
            BoundaryEvent::Error { code, error_ref } => Wiring::Error {
                code: code.clone(),
                error_ref: error_ref.clone(),
                scope_key: if host.is_container() {
                    Some(host.id.clone())
                } else {
                    host.container.clone()
                },
            },
        };
        links.push(BoundaryLink {
            event_node_id: node.id.clone(),
            host_id: attached_to.clone(),
            cancel_activity: *cancel_activity,
            wiring,
        });
    }

    // Phase 2: apply.
    for link in links {
        match link.wiring {
            Wiring::Timer { spec } => {
                if let Some(host) = def.nodes.get_mut(&link.host_id) {
                    host.boundary_timers.push(BoundaryTimer {
                        event_node_id: link.event_node_id.clone(),
                        spec,
                    });
                }
            }
            Wiring::Signal => {}
            Wiring::Error {
                code,
                error_ref,
                scope_key,
            } => {
                let channel = error_channel(&link.host_id, code.as_deref());
                match def.container_mut(scope_key.as_ref()) {
                    Some(container) => {
                        let scope = container.scopes.exception_scope_mut();
                        scope.register(
                            code,
                            HandlerAction::Signal {
                                channel: channel.clone(),
                            },
                        );
                        if let Some(error_ref) = error_ref {
                            scope.register(Some(error_ref), HandlerAction::Signal { channel });
                        }
                    }
                    None => errors.push(format!(
                        "boundary event '{}' has no container to hold its error handler",
                        link.event_node_id
                    )),
                }
            }
        }
        if link.cancel_activity {
            if let Some(event_node) = def.nodes.get_mut(&link.event_node_id) {
                event_node.exit_actions.push(ExitAction::CancelNodeInstance {
                    node_id: link.host_id.clone(),
                });
            }
        }
    }

    // Event-subprocess start filters propagate up to the subprocess node so
    // the runtime matches external triggers without opening the container.
    let mut propagated = Vec::new();
    for es in def.event_subprocess_nodes() {
        let filters: Vec<EventFilter> = def
            .start_nodes(Some(&es.id))
            .iter()
            .flat_map(|start| start.event_filters().cloned())
            .collect();
        if !filters.is_empty() {
            propagated.push((es.id.clone(), filters));
        }
    }
    for (es_id, filters) in propagated {
        if let Some(node) = def.nodes.get_mut(&es_id) {
            node.triggers.push(Trigger::Event { filters });
        }
    }

    def.linked = true;
    debug!(process_id = %def.id, "boundary events linked");
    errors
}

/// Split an embedded repeat-limit suffix off a cycle expression.
fn split_repeat_limit(spec: TimerSpec, node_id: &ElementId, errors: &mut Vec<String>) -> TimerSpec {
    match spec {
        TimerSpec::Cycle {
            expression,
            repeat_limit: None,
        } if expression.contains(CYCLE_REPEAT_SEPARATOR) => {
            match expression.split_once(CYCLE_REPEAT_SEPARATOR) {
                Some((head, tail)) => match tail.parse::<u32>() {
                    Ok(limit) => TimerSpec::Cycle {
                        expression: head.to_string(),
                        repeat_limit: Some(limit),
                    },
                    Err(_) => {
                        errors.push(format!(
                            "timer boundary '{}' has invalid repeat limit '{}'",
                            node_id, tail
                        ));
                        TimerSpec::Cycle {
                            expression,
                            repeat_limit: None,
                        }
                    }
                },
                None => TimerSpec::Cycle {
                    expression,
                    repeat_limit: None,
                },
            }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Connection;
    use crate::node::Node;

    fn def_with_boundary(event: BoundaryEvent, cancel: bool) -> ProcessDefinition {
        let mut def = ProcessDefinition::new("p", "Process", "1.0");
        def.insert_node(Node::start("start", "Start")).unwrap();
        def.insert_node(Node::task("task-1", "Task")).unwrap();
        def.insert_node(Node::end("end", "End")).unwrap();
        def.insert_node(Node::boundary("b1", "Boundary", "task-1", event, cancel))
            .unwrap();
        def.insert_node(Node::end("b-end", "After boundary")).unwrap();
        def.connections.push(Connection::new("start", "task-1", "c1"));
        def.connections.push(Connection::new("task-1", "end", "c2"));
        def.connections.push(Connection::new("b1", "b-end", "c3"));
        def
    }

    #[test]
    fn test_timer_boundary_registers_on_host_and_splits_repeat_limit() {
        let mut def = def_with_boundary(
            BoundaryEvent::Timer {
                spec: TimerSpec::cycle("PT5M###3"),
            },
            false,
        );
        link_boundary_events(&mut def).unwrap();

        let host = def.node(&ElementId::new("task-1")).unwrap();
        assert_eq!(host.boundary_timers.len(), 1);
        assert_eq!(
            host.boundary_timers[0].spec,
            TimerSpec::Cycle {
                expression: "PT5M".to_string(),
                repeat_limit: Some(3),
            }
        );
        assert_eq!(host.boundary_timers[0].event_node_id, ElementId::new("b1"));
    }

    #[test]
    fn test_invalid_repeat_limit_is_reported() {
        let mut def = def_with_boundary(
            BoundaryEvent::Timer {
                spec: TimerSpec::cycle("PT5M###soon"),
            },
            false,
        );
        let result = link_boundary_events(&mut def);
        assert!(matches!(
            result,
            Err(EngineError::Validation(errors))
                if errors.iter().any(|e| e.contains("invalid repeat limit 'soon'"))
        ));
    }

    #[test]
    fn test_cancel_activity_appends_exactly_one_action_per_link() {
        let mut def = def_with_boundary(
            BoundaryEvent::Timer {
                spec: TimerSpec::duration("PT30S"),
            },
            true,
        );
        link_boundary_events(&mut def).unwrap();
        // Linking again is gated and must not duplicate the action.
        link_boundary_events(&mut def).unwrap();

        let event_node = def.node(&ElementId::new("b1")).unwrap();
        assert_eq!(event_node.exit_actions.len(), 1);
        assert_eq!(
            event_node.exit_actions[0],
            ExitAction::CancelNodeInstance {
                node_id: ElementId::new("task-1"),
            }
        );
    }

    #[test]
    fn test_error_boundary_registers_handler_under_code_and_reference() {
        let mut def = def_with_boundary(
            BoundaryEvent::Error {
                code: Some("E1".to_string()),
                error_ref: Some("err-type".to_string()),
            },
            true,
        );
        link_boundary_events(&mut def).unwrap();

        let scope = def
            .container(None)
            .unwrap()
            .scopes
            .exception
            .as_ref()
            .expect("exception scope created lazily");
        let expected = HandlerAction::Signal {
            channel: "Error-task-1-E1".to_string(),
        };
        assert_eq!(scope.handlers[&Some("E1".to_string())], expected);
        assert_eq!(scope.handlers[&Some("err-type".to_string())], expected);
    }

    #[test]
    fn test_error_boundary_without_code_registers_any_error_handler() {
        let mut def = def_with_boundary(
            BoundaryEvent::Error {
                code: None,
                error_ref: None,
            },
            false,
        );
        link_boundary_events(&mut def).unwrap();

        let scope = def.container(None).unwrap().scopes.exception.as_ref().unwrap();
        assert_eq!(
            scope.handlers[&None],
            HandlerAction::Signal {
                channel: "Error-task-1-".to_string(),
            }
        );
    }

    #[test]
    fn test_signal_boundary_changes_nothing_structural() {
        let mut def = def_with_boundary(
            BoundaryEvent::Signal {
                channel: "halt".to_string(),
            },
            false,
        );
        link_boundary_events(&mut def).unwrap();

        let host = def.node(&ElementId::new("task-1")).unwrap();
        assert!(host.boundary_timers.is_empty());
        assert!(def.container(None).unwrap().scopes.exception.is_none());
        let event_node = def.node(&ElementId::new("b1")).unwrap();
        assert!(event_node.exit_actions.is_empty());
    }

    #[test]
    fn test_unknown_host_is_reported() {
        let mut def = ProcessDefinition::new("p", "Process", "1.0");
        def.insert_node(Node::boundary(
            "b1",
            "Boundary",
            "ghost",
            BoundaryEvent::Signal {
                channel: "halt".to_string(),
            },
            false,
        ))
        .unwrap();

        let result = link_boundary_events(&mut def);
        assert!(matches!(
            result,
            Err(EngineError::Validation(errors))
                if errors.iter().any(|e| e.contains("unknown node 'ghost'"))
        ));
    }

    #[test]
    fn test_event_subprocess_filters_propagate_up() {
        let mut def = ProcessDefinition::new("p", "Process", "1.0");
        def.insert_node(Node::event_subprocess("es", "Handler")).unwrap();
        let mut start = Node::start("es-start", "On event")
            .with_trigger(Trigger::event(vec![EventFilter::new("alarm")]));
        start.container = Some(ElementId::new("es"));
        def.insert_node(start).unwrap();

        link_boundary_events(&mut def).unwrap();

        let es = def.node(&ElementId::new("es")).unwrap();
        assert!(es.accepts_channel("alarm"));
    }

    #[test]
    fn test_channel_formats() {
        assert_eq!(
            error_channel(&ElementId::new("task-9"), Some("E2")),
            "Error-task-9-E2"
        );
        assert_eq!(error_channel(&ElementId::new("task-9"), None), "Error-task-9-");
        assert_eq!(timer_channel(&ElementId::new("b1")), "Timer-b1");
    }
}
