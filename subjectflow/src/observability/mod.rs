//! Observability utilities.
//!
//! Runs and nodes are traced with `tracing` spans named `run` and `node`.
//! Installing a subscriber is left to the binary.

mod tracing;

pub use tracing::{NodeSpanAttributes, RunSpanAttributes, SpanTimer};
