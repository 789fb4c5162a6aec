//! Dry-run planning.
//!
//! Fingerprints are derived from input artifact ids only, so every node's
//! fingerprint is known before anything runs. A plan reports which nodes
//! the next run would take from the cache and which it would invoke.

use super::resolve::{resolve_bindings, InputGap};
use crate::cache::{ArtifactCache, Fingerprint};
use crate::core::ArtifactId;
use crate::errors::SubjectflowError;
use crate::expand::{ExpandedGraph, UnitId};
use crate::graph::NodeId;
use crate::inputs::RunInputs;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// What the next run would do with one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedNode {
    /// Node id.
    pub id: NodeId,
    /// Node label.
    pub label: String,
    /// Task name.
    pub task: String,
    /// Unit, for iterated nodes.
    pub unit: Option<UnitId>,
    /// Execution fingerprint.
    pub fingerprint: Fingerprint,
    /// Outputs already committed under this fingerprint.
    pub cached: bool,
    /// Supplied by the run inputs rather than invoked.
    pub source: bool,
}

/// Fingerprints and cache status of every node, in topological order.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    /// Graph name.
    pub graph: String,
    /// Planned nodes.
    pub nodes: Vec<PlannedNode>,
}

impl Plan {
    /// Nodes the next run would invoke.
    pub fn to_invoke(&self) -> impl Iterator<Item = &PlannedNode> {
        self.nodes.iter().filter(|n| !n.source && !n.cached)
    }

    /// Nodes the next run would take from the cache.
    pub fn cached(&self) -> impl Iterator<Item = &PlannedNode> {
        self.nodes.iter().filter(|n| !n.source && n.cached)
    }

    /// Looks up a planned node by task and unit.
    #[must_use]
    pub fn find(&self, task: &str, unit: Option<&str>) -> Option<&PlannedNode> {
        self.nodes
            .iter()
            .find(|n| n.task == task && n.unit.as_ref().map(UnitId::as_str) == unit)
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Plan for '{}': {} to invoke, {} cached",
            self.graph,
            self.to_invoke().count(),
            self.cached().count()
        )?;
        for node in &self.nodes {
            let status = if node.source {
                "source"
            } else if node.cached {
                "cached"
            } else {
                "invoke"
            };
            writeln!(f, "  {:<7} {} {}", status, node.fingerprint.short(), node.label)?;
        }
        Ok(())
    }
}

/// Computes the plan for running `graph` over `inputs` against `cache`.
///
/// # Errors
///
/// Returns [`SubjectflowError::MissingUnitInput`] if a source node lacks an
/// input, or a cache error if the store cannot be read.
pub async fn plan(
    graph: &ExpandedGraph,
    inputs: &RunInputs,
    cache: &ArtifactCache,
) -> Result<Plan, SubjectflowError> {
    let mut fingerprints: Vec<Option<Fingerprint>> = vec![None; graph.len()];
    let mut nodes = Vec::with_capacity(graph.len());

    for &id in graph.topological_order() {
        let node = &graph.nodes()[id.index()];
        let source = node.spec().is_source();

        let fingerprint = if source {
            Fingerprint::for_source(node.spec(), &inputs.resolve(node)?)
        } else {
            let lookup = |output: &crate::expand::OutputRef| -> Option<ArtifactId> {
                fingerprints[output.node.index()]
                    .as_ref()
                    .map(|fp| fp.output_id(&output.port))
            };
            let resolved = resolve_bindings(node, lookup).map_err(|gap| {
                let detail = match gap {
                    InputGap::Join(e) => e.to_string(),
                    InputGap::Missing(output) => {
                        format!("no producer for {}.{}", output.node, output.port)
                    }
                };
                SubjectflowError::Internal(format!("cannot plan {}: {detail}", node.label()))
            })?;
            let ids: BTreeMap<String, Vec<ArtifactId>> = resolved
                .into_iter()
                .map(|(port, (_, ids))| (port, ids))
                .collect();
            Fingerprint::compute(node.spec(), &ids)
        };

        let cached = !source && cache.peek(&fingerprint).await?.is_some();
        nodes.push(PlannedNode {
            id,
            label: node.label(),
            task: node.spec().name().to_string(),
            unit: node.unit().cloned(),
            fingerprint: fingerprint.clone(),
            cached,
            source,
        });
        fingerprints[id.index()] = Some(fingerprint);
    }

    Ok(Plan {
        graph: graph.name().to_string(),
        nodes,
    })
}
