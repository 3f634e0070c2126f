//! Process instance runtime for the Baton engine.
//!
//! Runs instances of `baton-definition` graphs: a synchronous, signal-driven
//! state machine per instance, with asynchrony only at the seams - the store,
//! the event publisher, and the engine facade that serializes writes per
//! instance id.
//!
//! Architecture:
//! - `instance` - the [`ProcessInstance`] state machine and node instances
//! - `actions` - named task actions and gateway conditions, resolved at runtime
//! - `work_items` - external work tracking and pluggable mutation policies
//! - `events` - domain events recorded during mutation, published after persist
//! - `store` - the [`ProcessInstances`] contract and an in-memory store
//! - `emitter` - bounded worker-pool publisher with caller-runs backpressure
//! - `engine` - definition registry + store + publisher behind one facade

#![deny(unsafe_code)]

pub mod actions;
pub mod emitter;
pub mod engine;
pub mod events;
pub mod instance;
pub mod store;
pub mod work_items;

pub use actions::{Action, ActionContext, ActionRegistry, Condition, NodeFault};
pub use emitter::{
    EventConsumer, EventPublisher, PublisherConfig, PublisherStats, TypedConsumer,
};
pub use engine::{DefinitionRegistry, ProcessEngine, StartRequest};
pub use events::ProcessEvent;
pub use instance::{
    Await, NodeInstance, NodeInstanceStatus, ProcessInstance, EVENT_VARIABLE_KEY, SWIMLANE_KEY,
};
pub use store::{InMemoryProcessInstances, ProcessInstances};
pub use work_items::{enforce_policies, ActorPolicy, WorkItemPolicy, ACTOR_PARAM};
