//! Assertions over run reports.

use crate::core::NodeState;
use crate::scheduler::{NodeReport, RunReport, SkipReason};

fn node<'a>(report: &'a RunReport, task: &str, unit: Option<&str>) -> &'a NodeReport {
    report.find(task, unit).unwrap_or_else(|| {
        panic!(
            "No node '{task}' for unit {unit:?}. Nodes: {:?}",
            report.nodes.iter().map(|n| &n.label).collect::<Vec<_>>()
        )
    })
}

/// Asserts that a node finished, whether invoked or cached.
pub fn assert_done(report: &RunReport, task: &str, unit: Option<&str>) {
    let node = node(report, task, unit);
    assert_eq!(
        node.state,
        NodeState::Done,
        "Expected {} to be done, got {} ({:?})",
        node.label,
        node.state,
        node.failure
    );
}

/// Asserts that a node failed.
pub fn assert_failed(report: &RunReport, task: &str, unit: Option<&str>) {
    let node = node(report, task, unit);
    assert_eq!(
        node.state,
        NodeState::Failed,
        "Expected {} to have failed, got {}",
        node.label,
        node.state
    );
}

/// Asserts that a node was skipped and returns why.
pub fn assert_skipped<'a>(report: &'a RunReport, task: &str, unit: Option<&str>) -> &'a SkipReason {
    let node = node(report, task, unit);
    assert_eq!(
        node.state,
        NodeState::Skipped,
        "Expected {} to be skipped, got {}",
        node.label,
        node.state
    );
    node.skip_reason
        .as_ref()
        .unwrap_or_else(|| panic!("Skipped node {} has no reason", node.label))
}

/// Asserts that a node was served from the cache.
pub fn assert_cached(report: &RunReport, task: &str, unit: Option<&str>) {
    let node = node(report, task, unit);
    assert!(
        node.state == NodeState::Done && node.cached,
        "Expected {} to be a cache hit, got {} (cached: {})",
        node.label,
        node.state,
        node.cached
    );
}
