//! Process definition model for the Baton engine.
//!
//! A definition is a directed, possibly nested graph of typed nodes plus the
//! context scopes and correlation keys attached to its containers. It is built
//! once through [`ProcessBuilder`], linked and validated, and from then on
//! shared read-only across every instance that runs it.
//!
//! Architecture:
//! - `node` - the closed [`NodeKind`] variant set and per-node data
//! - `trigger` - start conditions: event filters, timer specs, conditionals
//! - `scope` - variable/exception/compensation/swimlane scopes per container
//! - `correlation` - correlation keys, messages, and property extraction
//! - `graph` - the arena: flat node table, connections, containers
//! - `builder` - assembly API with aggregate validation
//! - `link` - boundary-event wiring, run exactly once per build

#![deny(unsafe_code)]

pub mod builder;
pub mod correlation;
pub mod graph;
pub mod link;
pub mod node;
pub mod scope;
pub mod trigger;

pub use builder::ProcessBuilder;
pub use correlation::{
    CorrelationKey, CorrelationManager, CorrelationMessage, CorrelationProperty, CorrelationValue,
};
pub use graph::{Connection, Container, ProcessDefinition};
pub use link::{error_channel, link_boundary_events, timer_channel};
pub use node::{BoundaryEvent, BoundaryTimer, ExitAction, GatewayKind, Node, NodeKind};
pub use scope::{
    CompensationScope, ExceptionScope, HandlerAction, ScopeSet, Swimlane, SwimlaneScope,
    VariableDef, VariableScope,
};
pub use trigger::{EventFilter, TimerSpec, Trigger, CYCLE_REPEAT_SEPARATOR};
