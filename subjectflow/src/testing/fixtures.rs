//! Ready-made graphs and inputs.

use crate::core::{Artifact, ArtifactId, ArtifactKind};
use crate::errors::GraphError;
use crate::expand::{ExpandedGraph, IterableExpander, IterationDomain};
use crate::graph::Graph;
use crate::inputs::RunInputs;
use crate::task::{InputPort, OutputPort, TaskSpec};

/// A declared graph plus the names of its iterated nodes.
#[derive(Debug, Clone)]
pub struct PipelineFixture {
    /// The declared graph.
    pub graph: Graph,
    /// Iterated node names.
    pub iterated: Vec<String>,
}

impl PipelineFixture {
    /// Expands the fixture over `domain`.
    ///
    /// # Errors
    ///
    /// Returns the expander's errors.
    pub fn expand(&self, domain: &IterationDomain) -> Result<ExpandedGraph, GraphError> {
        IterableExpander::expand(&self.graph, domain, &self.iterated)
    }
}

/// `subject -> extract -> summarize`, per unit, joined by `aggregate`.
///
/// `subject` is the per-unit source (`dwi`). `summarize.stats` is exported
/// per unit as `stats` and `aggregate.table` at group level as `table`.
pub fn two_stage_with_join() -> Result<PipelineFixture, GraphError> {
    let mut graph = Graph::new("two-stage");

    let subject = graph.add_node(TaskSpec::source("subject").with_output(OutputPort::new("dwi", "image")))?;
    let extract = graph.add_node(
        TaskSpec::new("extract")
            .with_input(InputPort::required("dwi", "image"))
            .with_output(OutputPort::new("mask", "mask"))
            .with_param("threshold", 0.5),
    )?;
    let summarize = graph.add_node(
        TaskSpec::new("summarize")
            .with_input(InputPort::required("mask", "mask"))
            .with_output(OutputPort::new("stats", "stats")),
    )?;
    let aggregate = graph.add_join(
        TaskSpec::new("aggregate")
            .with_input(InputPort::required("stats", "stats"))
            .with_output(OutputPort::new("table", "table")),
        "stats",
    )?;

    graph.connect(subject, "dwi", extract, "dwi")?;
    graph.connect(extract, "mask", summarize, "mask")?;
    graph.connect(summarize, "stats", aggregate, "stats")?;
    graph.export(summarize, "stats", "stats")?;
    graph.export(aggregate, "table", "table")?;

    Ok(PipelineFixture {
        graph,
        iterated: vec![
            "subject".to_string(),
            "extract".to_string(),
            "summarize".to_string(),
        ],
    })
}

/// Domain over `units`.
pub fn domain(units: &[&str]) -> Result<IterationDomain, GraphError> {
    IterationDomain::new(units.iter().copied())
}

/// Inputs for the `subject` source of [`two_stage_with_join`].
///
/// Each unit's `dwi` artifact id is `<unit>@<version>`, so bumping the
/// version of one unit changes only that unit's fingerprints.
pub fn subject_inputs(units: &[(&str, &str)]) -> RunInputs {
    units
        .iter()
        .fold(RunInputs::new(), |inputs, (unit, version)| {
            inputs.with_unit_input(
                *unit,
                "subject",
                "dwi",
                Artifact::new(
                    ArtifactId::new(format!("{unit}@{version}")),
                    format!("/data/{unit}/dwi.nii.gz"),
                    ArtifactKind::new("image"),
                ),
            )
        })
}
