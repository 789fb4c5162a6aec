//! # Subjectflow
//!
//! A pipeline-execution engine for per-subject processing.
//!
//! A graph of processing steps is declared once, replicated across a set of
//! independent units (subjects), joined back together at designated
//! points, and executed with bounded parallelism. Subjectflow provides:
//!
//! - **Typed graphs**: tasks with named, kinded ports, validated before running
//! - **Per-unit expansion**: iterated tasks are replicated for every unit
//! - **Deterministic joins**: per-unit outputs are collected in domain order
//! - **Content-addressed caching**: unchanged work is never re-run, even
//!   across runs and under concurrency
//! - **Failure isolation**: a failing unit skips only its own descendants
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use subjectflow::prelude::*;
//!
//! let mut graph = Graph::new("dwi");
//! let subject = graph.add_node(TaskSpec::source("subject").with_output(OutputPort::new("dwi", "image")))?;
//! let response = graph.add_node(response_task())?;
//! let average = graph.add_join(average_task(), "responses")?;
//! graph.connect(subject, "dwi", response, "dwi")?;
//! graph.connect(response, "wm", average, "responses")?;
//!
//! let domain = IterationDomain::new(["sub-01", "sub-02"])?;
//! let expanded = IterableExpander::expand(&graph, &domain, &["subject", "response"])?;
//!
//! let ctx = RunContext::builder(domain).with_workers(4).build();
//! let report = Scheduler::new(CommandInvoker::new(), NoOpOutputSink)
//!     .run(&expanded, &ctx, &inputs)
//!     .await?;
//! println!("{report}");
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cache;
pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod expand;
pub mod graph;
pub mod inputs;
pub mod invoke;
pub mod observability;
pub mod scheduler;
pub mod sink;
pub mod task;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cache::{ArtifactCache, Fingerprint, FsArtifactStore, InMemoryArtifactStore};
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{EngineConfig, PipelineDefinition};
    pub use crate::core::{Artifact, ArtifactId, ArtifactKind, ArtifactSet, NodeState};
    pub use crate::errors::{
        CacheError, ContractErrorInfo, GraphError, InvocationError, JoinIncompleteError,
        MissingUnitInputError, SinkError, SubjectflowError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink, RunEvent};
    pub use crate::expand::{ExpandedGraph, IterableExpander, IterationDomain, UnitId};
    pub use crate::graph::{Graph, NodeId};
    pub use crate::inputs::{RunInputs, TemplateInputSource};
    pub use crate::invoke::{CommandInvoker, InvocationRequest, InvokerRegistry, ProcessInvoker};
    pub use crate::scheduler::{
        plan, Engine, FailurePolicy, RetryConfig, RunContext, RunReport, Scheduler, SkipReason,
        WorkerPool,
    };
    pub use crate::sink::{ExportSlot, FsOutputSink, NoOpOutputSink, OutputSink};
    pub use crate::task::{CommandContract, InputPort, InvocationContract, OutputPort, TaskSpec};
}
