//! Engine and pipeline configuration files.
//!
//! [`EngineConfig`] holds run settings (workers, failure policy, retry,
//! directories). [`PipelineDefinition`] is the serde model of a declared
//! pipeline and builds the [`crate::graph::Graph`] and the unit inputs.

mod engine;
mod pipeline;

pub use engine::{EngineConfig, WORKERS_ENV};
pub use pipeline::{
    ConnectionDefinition, ExportDefinition, InputDefinition, PipelineDefinition, TaskDefinition,
};
