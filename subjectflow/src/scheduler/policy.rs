//! Failure policies and failure bookkeeping.

use crate::errors::{CacheError, InvocationError};
use crate::expand::UnitId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// What the scheduler does after a node fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop dispatching; in-flight nodes finish, everything else is skipped.
    FailFast,
    /// Skip only the failed node's descendants and keep running the rest.
    #[default]
    BestEffort,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FailFast => write!(f, "fail_fast"),
            Self::BestEffort => write!(f, "best_effort"),
        }
    }
}

impl std::str::FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "fail_fast" => Ok(Self::FailFast),
            "best_effort" => Ok(Self::BestEffort),
            other => Err(format!("unknown failure policy '{other}'")),
        }
    }
}

/// Why a node failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NodeFailure {
    /// The external invocation failed.
    #[error(transparent)]
    Invocation(#[from] InvocationError),
    /// The cache could not be read or written.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl NodeFailure {
    /// Short type name for reports.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Invocation(_) => "invocation",
            Self::Cache(_) => "cache",
        }
    }

    /// Exit code of the failed process, when there was one.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Invocation(e) => e.exit_code,
            Self::Cache(_) => None,
        }
    }
}

/// Record of a node failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Node label.
    pub node: String,
    /// Task name.
    pub task: String,
    /// Unit of the node, if iterated.
    pub unit: Option<UnitId>,
    /// Error message.
    pub error: String,
    /// Error type name.
    pub error_type: String,
    /// Process exit code, if any.
    pub exit_code: Option<i32>,
    /// Tail of the process' standard error.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr_excerpt: String,
    /// When the failure was recorded.
    pub timestamp: DateTime<Utc>,
}

impl FailureRecord {
    /// Creates a new failure record.
    #[must_use]
    pub fn new(
        node: impl Into<String>,
        task: impl Into<String>,
        unit: Option<UnitId>,
        failure: &NodeFailure,
    ) -> Self {
        let stderr_excerpt = match failure {
            NodeFailure::Invocation(e) => e.stderr_excerpt.clone(),
            NodeFailure::Cache(_) => String::new(),
        };
        Self {
            node: node.into(),
            task: task.into(),
            unit,
            error: failure.to_string(),
            error_type: failure.kind().to_string(),
            exit_code: failure.exit_code(),
            stderr_excerpt,
            timestamp: Utc::now(),
        }
    }
}

/// Collects failures during a run and decides when dispatching stops.
#[derive(Debug)]
pub struct FailureCollector {
    /// Failure policy.
    pub policy: FailurePolicy,
    failures: Vec<FailureRecord>,
    halted: bool,
}

impl FailureCollector {
    /// Creates a new failure collector.
    #[must_use]
    pub fn new(policy: FailurePolicy) -> Self {
        Self {
            policy,
            failures: Vec::new(),
            halted: false,
        }
    }

    /// Records a node failure.
    pub fn record_failure(&mut self, record: FailureRecord) {
        if self.policy == FailurePolicy::FailFast {
            self.halted = true;
        }
        self.failures.push(record);
    }

    /// Stops dispatching regardless of policy, e.g. on cancellation.
    pub fn halt(&mut self) {
        self.halted = true;
    }

    /// Returns true if no further nodes may be dispatched.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.halted
    }

    /// Failures in the order they were recorded.
    #[must_use]
    pub fn failures(&self) -> &[FailureRecord] {
        &self.failures
    }

    /// Consumes the collector.
    #[must_use]
    pub fn into_failures(self) -> Vec<FailureRecord> {
        self.failures
    }
}
