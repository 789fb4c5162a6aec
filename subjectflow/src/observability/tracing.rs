//! Span attributes and timing helpers for runs and nodes.

use crate::expand::{Node, UnitId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::Span;
use uuid::Uuid;

/// Span attributes for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSpanAttributes {
    /// Graph name.
    pub graph: String,
    /// Run id.
    pub run_id: Option<Uuid>,
    /// Expanded node count.
    pub nodes: usize,
    /// Units in the domain.
    pub units: usize,
    /// Failure policy name.
    pub policy: Option<String>,
}

impl RunSpanAttributes {
    /// Creates run attributes for a graph.
    #[must_use]
    pub fn new(graph: impl Into<String>) -> Self {
        Self {
            graph: graph.into(),
            ..Self::default()
        }
    }

    /// Sets the run id.
    #[must_use]
    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    /// Sets node and unit counts.
    #[must_use]
    pub fn with_size(mut self, nodes: usize, units: usize) -> Self {
        self.nodes = nodes;
        self.units = units;
        self
    }

    /// Sets the failure policy.
    #[must_use]
    pub fn with_policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = Some(policy.into());
        self
    }

    /// Opens the `run` span.
    #[must_use]
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "run",
            graph = %self.graph,
            run_id = %self.run_id.map(|id| id.to_string()).unwrap_or_default(),
            nodes = self.nodes,
            units = self.units,
            policy = self.policy.as_deref().unwrap_or(""),
        )
    }

    /// Flat key/value form for exporters.
    #[must_use]
    pub fn to_attributes(&self) -> HashMap<String, String> {
        let mut attrs = HashMap::new();
        attrs.insert("run.graph".to_string(), self.graph.clone());
        if let Some(id) = self.run_id {
            attrs.insert("run.id".to_string(), id.to_string());
        }
        attrs.insert("run.nodes".to_string(), self.nodes.to_string());
        attrs.insert("run.units".to_string(), self.units.to_string());
        if let Some(ref v) = self.policy {
            attrs.insert("run.policy".to_string(), v.clone());
        }
        attrs
    }
}

/// Span attributes for one node execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeSpanAttributes {
    /// Node label.
    pub node: String,
    /// Task name.
    pub task: String,
    /// Unit, if iterated.
    pub unit: Option<UnitId>,
    /// Execution fingerprint.
    pub fingerprint: Option<String>,
}

impl NodeSpanAttributes {
    /// Attributes describing an expanded node.
    #[must_use]
    pub fn for_node(node: &Node) -> Self {
        Self {
            node: node.label(),
            task: node.spec().name().to_string(),
            unit: node.unit().cloned(),
            fingerprint: None,
        }
    }

    /// Sets the fingerprint.
    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    /// Opens the `node` span.
    #[must_use]
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "node",
            node = %self.node,
            task = %self.task,
            unit = self.unit.as_ref().map_or("", UnitId::as_str),
            fingerprint = self.fingerprint.as_deref().unwrap_or(""),
        )
    }

    /// Flat key/value form for exporters.
    #[must_use]
    pub fn to_attributes(&self) -> HashMap<String, String> {
        let mut attrs = HashMap::new();
        attrs.insert("node.label".to_string(), self.node.clone());
        attrs.insert("node.task".to_string(), self.task.clone());
        if let Some(ref v) = self.unit {
            attrs.insert("node.unit".to_string(), v.to_string());
        }
        if let Some(ref v) = self.fingerprint {
            attrs.insert("node.fingerprint".to_string(), v.clone());
        }
        attrs
    }
}

/// Simple span timing helper.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new span timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Returns the elapsed time in whole milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Returns the span name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Finishes the span and returns the duration.
    #[must_use]
    pub fn finish(self) -> Duration {
        self.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_attributes() {
        let attrs = RunSpanAttributes::new("dwi-preproc")
            .with_run_id(Uuid::nil())
            .with_size(10, 3)
            .with_policy("best_effort");

        let flat = attrs.to_attributes();
        assert_eq!(flat.get("run.graph"), Some(&"dwi-preproc".to_string()));
        assert_eq!(flat.get("run.units"), Some(&"3".to_string()));
        assert_eq!(flat.get("run.policy"), Some(&"best_effort".to_string()));
        let _span = attrs.span();
    }

    #[test]
    fn test_node_span_attributes() {
        let attrs = NodeSpanAttributes {
            node: "extract[u1]".into(),
            task: "extract".into(),
            unit: Some("u1".into()),
            fingerprint: None,
        }
        .with_fingerprint("abc123");

        let flat = attrs.to_attributes();
        assert_eq!(flat.get("node.unit"), Some(&"u1".to_string()));
        assert_eq!(flat.get("node.fingerprint"), Some(&"abc123".to_string()));
        let _span = attrs.span();
    }

    #[test]
    fn test_span_timer() {
        let timer = SpanTimer::start("node");
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(timer.name(), "node");
        assert!(timer.elapsed_ms() >= 10);
        assert!(timer.finish() >= Duration::from_millis(10));
    }
}
