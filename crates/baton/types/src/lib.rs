//! Shared domain types for the Baton process engine.
//!
//! Everything that crosses a crate boundary lives here: stable identifiers for
//! graph elements and runtime objects, the process instance status model, the
//! signal value object, work items, and the engine-wide error taxonomy.

#![deny(unsafe_code)]

pub mod error;
pub mod id;
pub mod signal;
pub mod status;
pub mod work_item;

pub use error::{EngineError, EngineResult};
pub use id::{ElementId, NodeInstanceId, ProcessInstanceId, WorkItemId};
pub use signal::Signal;
pub use status::{InstanceStatus, Milestone, ProcessError, ReadMode};
pub use work_item::{WorkItem, WorkItemState};
