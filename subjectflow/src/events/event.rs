//! Lifecycle events emitted during a run.

use serde::Serialize;
use uuid::Uuid;

/// A run or node lifecycle event.
///
/// Serializes with a `type` field holding [`RunEvent::event_type`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum RunEvent {
    /// The scheduler accepted the graph.
    #[serde(rename = "run.started")]
    RunStarted {
        /// Run id.
        run_id: Uuid,
        /// Graph name.
        graph: String,
        /// Expanded node count.
        nodes: usize,
        /// Units in the domain.
        units: usize,
    },
    /// Every node reached a terminal state.
    #[serde(rename = "run.completed")]
    RunCompleted {
        /// Run id.
        run_id: Uuid,
        /// Nodes in `Done`.
        done: usize,
        /// Nodes in `Failed`.
        failed: usize,
        /// Nodes in `Skipped`.
        skipped: usize,
        /// Wall clock duration.
        duration_ms: u64,
    },
    /// A node's inputs became available.
    #[serde(rename = "node.ready")]
    NodeReady {
        /// Node label.
        node: String,
    },
    /// A node reserved its fingerprint and is invoking.
    #[serde(rename = "node.started")]
    NodeStarted {
        /// Node label.
        node: String,
        /// Execution fingerprint.
        fingerprint: String,
        /// 1-based attempt number.
        attempt: usize,
    },
    /// A node's outputs were found in the cache.
    #[serde(rename = "node.cache_hit")]
    NodeCacheHit {
        /// Node label.
        node: String,
        /// Execution fingerprint.
        fingerprint: String,
    },
    /// A node committed its outputs.
    #[serde(rename = "node.completed")]
    NodeCompleted {
        /// Node label.
        node: String,
        /// Execution fingerprint.
        fingerprint: String,
        /// Time spent invoking.
        duration_ms: u64,
    },
    /// A node failed.
    #[serde(rename = "node.failed")]
    NodeFailed {
        /// Node label.
        node: String,
        /// Error message.
        error: String,
        /// Process exit code, if any.
        exit_code: Option<i32>,
    },
    /// A node will not run.
    #[serde(rename = "node.skipped")]
    NodeSkipped {
        /// Node label.
        node: String,
        /// Why it was skipped.
        reason: String,
    },
    /// An output was delivered to the output sink.
    #[serde(rename = "node.exported")]
    NodeExported {
        /// Node label.
        node: String,
        /// Slot key.
        slot: String,
    },
}

impl RunEvent {
    /// Dotted event type, e.g. `node.completed`.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run.started",
            Self::RunCompleted { .. } => "run.completed",
            Self::NodeReady { .. } => "node.ready",
            Self::NodeStarted { .. } => "node.started",
            Self::NodeCacheHit { .. } => "node.cache_hit",
            Self::NodeCompleted { .. } => "node.completed",
            Self::NodeFailed { .. } => "node.failed",
            Self::NodeSkipped { .. } => "node.skipped",
            Self::NodeExported { .. } => "node.exported",
        }
    }

    /// Node label for node events.
    #[must_use]
    pub fn node(&self) -> Option<&str> {
        match self {
            Self::NodeReady { node }
            | Self::NodeStarted { node, .. }
            | Self::NodeCacheHit { node, .. }
            | Self::NodeCompleted { node, .. }
            | Self::NodeFailed { node, .. }
            | Self::NodeSkipped { node, .. }
            | Self::NodeExported { node, .. } => Some(node),
            Self::RunStarted { .. } | Self::RunCompleted { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_matches_serialized_tag() {
        let event = RunEvent::NodeCacheHit {
            node: "extract[u1]".into(),
            fingerprint: "ab".into(),
        };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], event.event_type());
        assert_eq!(json["node"], "extract[u1]");
        assert_eq!(event.node(), Some("extract[u1]"));
    }

    #[test]
    fn test_run_events_have_no_node() {
        let event = RunEvent::RunStarted {
            run_id: Uuid::nil(),
            graph: "g".into(),
            nodes: 3,
            units: 1,
        };
        assert_eq!(event.node(), None);
        assert_eq!(event.event_type(), "run.started");
    }
}
