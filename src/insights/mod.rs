//! Insight aggregation engine.
//!
//! - `partial` - per-shard reducers producing mergeable state
//! - `combine` - merging partials into final metric values
//! - `engine` - sharding, worker scheduling and result assembly
//! - `gate` - dataset version comparison

pub mod combine;
pub mod engine;
pub mod gate;
pub mod partial;

pub use engine::{EngineConfig, InsightsEngine};
pub use gate::{should_run, VersionScheme};
