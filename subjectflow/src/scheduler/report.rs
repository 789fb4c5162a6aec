//! Run results.

use super::{FailureRecord, NodeFailure};
use crate::cache::Fingerprint;
use crate::core::NodeState;
use crate::errors::JoinIncompleteError;
use crate::expand::UnitId;
use crate::graph::NodeId;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Why a node never ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// An ancestor failed.
    UpstreamFailed {
        /// Label of the failed ancestor.
        ancestor: String,
    },
    /// A join lost one or more of its per-unit producers.
    JoinIncomplete(JoinIncompleteError),
    /// Dispatch stopped before the node became eligible.
    Halted,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpstreamFailed { ancestor } => write!(f, "upstream failed: {ancestor}"),
            Self::JoinIncomplete(e) => write!(f, "{e}"),
            Self::Halted => write!(f, "run halted"),
        }
    }
}

/// Final state of one node.
#[derive(Debug, Clone)]
pub struct NodeReport {
    /// Expanded node id.
    pub id: NodeId,
    /// Node label, `task` or `task[unit]`.
    pub label: String,
    /// Task name.
    pub task: String,
    /// Unit of an iterated node.
    pub unit: Option<UnitId>,
    /// Terminal state.
    pub state: NodeState,
    /// True when the outputs came from the cache.
    pub cached: bool,
    /// Fingerprint, once the node's inputs were known.
    pub fingerprint: Option<Fingerprint>,
    /// Failure detail for `Failed` nodes.
    pub failure: Option<NodeFailure>,
    /// Reason for `Skipped` nodes.
    pub skip_reason: Option<SkipReason>,
    /// Invocation attempts made.
    pub attempts: usize,
    /// Time spent executing.
    pub duration: Duration,
}

/// An export that could not be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportFailure {
    /// Node label.
    pub node: String,
    /// Slot key.
    pub slot: String,
    /// Error message.
    pub error: String,
}

/// Outcome of a scheduler run.
///
/// Every node appears exactly once, in expansion order.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Run id.
    pub run_id: Uuid,
    /// Graph name.
    pub graph: String,
    /// Units of the run, in domain order.
    pub units: Vec<UnitId>,
    /// Per-node results.
    pub nodes: Vec<NodeReport>,
    /// Failures in the order they happened.
    pub failures: Vec<FailureRecord>,
    /// Exports that could not be delivered.
    pub export_failures: Vec<ExportFailure>,
    /// Cancellation reason, if the run was cancelled.
    pub cancelled: Option<String>,
    /// Wall clock duration.
    pub duration: Duration,
}

impl RunReport {
    fn in_state(&self, state: NodeState) -> impl Iterator<Item = &NodeReport> {
        self.nodes.iter().filter(move |n| n.state == state)
    }

    /// Nodes that finished.
    pub fn done(&self) -> impl Iterator<Item = &NodeReport> {
        self.in_state(NodeState::Done)
    }

    /// Nodes that failed.
    pub fn failed(&self) -> impl Iterator<Item = &NodeReport> {
        self.in_state(NodeState::Failed)
    }

    /// Nodes that never ran.
    pub fn skipped(&self) -> impl Iterator<Item = &NodeReport> {
        self.in_state(NodeState::Skipped)
    }

    /// Nodes whose outputs came from the cache.
    pub fn cached(&self) -> impl Iterator<Item = &NodeReport> {
        self.nodes.iter().filter(|n| n.cached)
    }

    /// Total invocation attempts across all nodes.
    #[must_use]
    pub fn invocations(&self) -> usize {
        self.nodes.iter().map(|n| n.attempts).sum()
    }

    /// True when every node is done and every export was delivered.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.nodes.iter().all(|n| n.state == NodeState::Done) && self.export_failures.is_empty()
    }

    /// Process exit status for the run.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.is_success())
    }

    /// Looks a node up by task and unit.
    #[must_use]
    pub fn find(&self, task: &str, unit: Option<&str>) -> Option<&NodeReport> {
        self.nodes
            .iter()
            .find(|n| n.task == task && n.unit.as_ref().map(UnitId::as_str) == unit)
    }

    /// Units with at least one failed or skipped node, in domain order.
    ///
    /// A failed node that belongs to no unit affects every unit. A skipped
    /// one does not: its cause is already attributed to some unit.
    #[must_use]
    pub fn units_to_rerun(&self) -> Vec<UnitId> {
        let mut affected = HashSet::new();
        for node in self.failed().chain(self.skipped()) {
            match &node.unit {
                Some(unit) => {
                    affected.insert(unit);
                }
                None if node.failure.is_some() => return self.units.clone(),
                None => {}
            }
        }
        self.units
            .iter()
            .filter(|u| affected.contains(u))
            .cloned()
            .collect()
    }

    /// Serializable summary of the run.
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id,
            graph: self.graph.clone(),
            success: self.is_success(),
            total: self.nodes.len(),
            done: self.done().count(),
            cached: self.cached().count(),
            failed: self.failed().count(),
            skipped: self.skipped().count(),
            invocations: self.invocations(),
            duration_ms: u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX),
            failures: self.failures.clone(),
            skips: self
                .skipped()
                .map(|n| SkippedNode {
                    node: n.label.clone(),
                    unit: n.unit.clone(),
                    reason: n.skip_reason.clone().unwrap_or(SkipReason::Halted),
                })
                .collect(),
            export_failures: self.export_failures.clone(),
            units_to_rerun: self.units_to_rerun(),
            cancelled: self.cancelled.clone(),
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summary = self.summary();
        writeln!(
            f,
            "Run {} of '{}': {} done ({} cached), {} failed, {} skipped in {:.1}s",
            self.run_id,
            self.graph,
            summary.done,
            summary.cached,
            summary.failed,
            summary.skipped,
            self.duration.as_secs_f64()
        )?;
        if let Some(reason) = &self.cancelled {
            writeln!(f, "Cancelled: {reason}")?;
        }
        for node in self.failed() {
            let error = node
                .failure
                .as_ref()
                .map_or_else(String::new, ToString::to_string);
            writeln!(f, "  FAILED  {}: {error}", node.label)?;
        }
        for skip in &summary.skips {
            writeln!(f, "  SKIPPED {}: {}", skip.node, skip.reason)?;
        }
        for export in &self.export_failures {
            writeln!(f, "  EXPORT  {} -> {}: {}", export.node, export.slot, export.error)?;
        }
        if !summary.units_to_rerun.is_empty() {
            let units: Vec<&str> = summary.units_to_rerun.iter().map(UnitId::as_str).collect();
            writeln!(f, "Units to re-run: {}", units.join(", "))?;
        }
        Ok(())
    }
}

/// A skipped node in a [`RunSummary`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedNode {
    /// Node label.
    pub node: String,
    /// Unit, if iterated.
    pub unit: Option<UnitId>,
    /// Why it was skipped.
    pub reason: SkipReason,
}

/// Serializable run summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Run id.
    pub run_id: Uuid,
    /// Graph name.
    pub graph: String,
    /// Whether the run succeeded.
    pub success: bool,
    /// Node count.
    pub total: usize,
    /// Done nodes.
    pub done: usize,
    /// Done nodes served from the cache.
    pub cached: usize,
    /// Failed nodes.
    pub failed: usize,
    /// Skipped nodes.
    pub skipped: usize,
    /// Invocation attempts.
    pub invocations: usize,
    /// Wall clock duration.
    pub duration_ms: u64,
    /// Failure records.
    pub failures: Vec<FailureRecord>,
    /// Skipped nodes with reasons.
    pub skips: Vec<SkippedNode>,
    /// Undelivered exports.
    pub export_failures: Vec<ExportFailure>,
    /// Units that need another run.
    pub units_to_rerun: Vec<UnitId>,
    /// Cancellation reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled: Option<String>,
}
