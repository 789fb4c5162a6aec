//! Dependency-ordered execution of expanded graphs.
//!
//! The [`Scheduler`] dispatches a node as soon as every producer it binds
//! to is done and a worker of the [`WorkerPool`] is idle. Node failures are
//! isolated: they skip the failed node's descendants and are recorded in
//! the [`RunReport`], while independent units keep running under
//! [`FailurePolicy::BestEffort`].

mod context;
mod engine;
mod executor;
mod integration_tests;
mod plan;
mod policy;
mod report;
mod resolve;
mod retry;

pub use context::{RunContext, RunContextBuilder, WorkerPool};
pub(crate) use context::default_workers;
pub use engine::Engine;
pub use executor::Scheduler;
pub use plan::{plan, Plan, PlannedNode};
pub use policy::{FailureCollector, FailurePolicy, FailureRecord, NodeFailure};
pub use report::{ExportFailure, NodeReport, RunReport, RunSummary, SkipReason, SkippedNode};
pub use retry::{BackoffStrategy, JitterStrategy, RetryConfig, RetryState};
