//! Binary snapshot protocol for Baton process instances.
//!
//! Serializes a live [`baton_runtime::ProcessInstance`] to protobuf bytes
//! and back, surviving process restarts and engine upgrades. An instance
//! and its work items travel in separate envelopes; each envelope carries
//! the engine version, the table of marshalling strategies its variables
//! used, and an optional ed25519 signature over the payload.
//!
//! - `wire` - hand-written prost messages; the tag layout is the
//!   compatibility surface
//! - `strategy` - pluggable per-value codecs and the registry selecting them
//! - `snapshot` - envelope writer/reader, signing, configuration
//! - `error` - fatal-by-construction error taxonomy
//! - `store` - a `ProcessInstances` store holding only snapshot bytes

#![deny(unsafe_code)]

pub mod error;
pub mod snapshot;
pub mod store;
pub mod strategy;
pub mod wire;

pub use error::{MarshalError, MarshalResult};
pub use snapshot::{
    engine_version, marshal_instance, marshal_work_items, preload, unmarshal_instance,
    unmarshal_work_items, MarshalConfig, SigningConfig, VERSION_MAJOR, VERSION_MINOR,
    VERSION_REVISION, WORK_ITEM_VARIABLES_ENV,
};
pub use store::SnapshotProcessInstances;
pub use strategy::{JsonStrategy, ObjectStrategy, StrategyRegistry};
