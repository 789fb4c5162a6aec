//! Inputs supplied to source nodes.
//!
//! Source tasks declare output ports but are never invoked. Their artifacts
//! come from the caller: per unit for iterated sources, once for shared
//! ones.

mod template;

pub use template::TemplateInputSource;

use crate::core::{Artifact, ArtifactSet};
use crate::errors::MissingUnitInputError;
use crate::expand::{ExpandedGraph, Node, UnitId};
use std::collections::BTreeMap;

/// Artifacts for every source node of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunInputs {
    per_unit: BTreeMap<UnitId, BTreeMap<String, ArtifactSet>>,
    shared: BTreeMap<String, ArtifactSet>,
}

impl RunInputs {
    /// Creates an empty set of inputs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Supplies one port of an iterated source for one unit.
    pub fn insert_unit(
        &mut self,
        unit: impl Into<UnitId>,
        source: impl Into<String>,
        port: impl Into<String>,
        artifact: Artifact,
    ) {
        self.per_unit
            .entry(unit.into())
            .or_default()
            .entry(source.into())
            .or_default()
            .insert(port.into(), artifact);
    }

    /// Supplies one port of a shared source.
    pub fn insert_shared(
        &mut self,
        source: impl Into<String>,
        port: impl Into<String>,
        artifact: Artifact,
    ) {
        self.shared
            .entry(source.into())
            .or_default()
            .insert(port.into(), artifact);
    }

    /// Builder form of [`RunInputs::insert_unit`].
    #[must_use]
    pub fn with_unit_input(
        mut self,
        unit: impl Into<UnitId>,
        source: impl Into<String>,
        port: impl Into<String>,
        artifact: Artifact,
    ) -> Self {
        self.insert_unit(unit, source, port, artifact);
        self
    }

    /// Builder form of [`RunInputs::insert_shared`].
    #[must_use]
    pub fn with_shared_input(
        mut self,
        source: impl Into<String>,
        port: impl Into<String>,
        artifact: Artifact,
    ) -> Self {
        self.insert_shared(source, port, artifact);
        self
    }

    /// Artifacts supplied to `source` for `unit`.
    #[must_use]
    pub fn unit_inputs(&self, unit: &UnitId, source: &str) -> Option<&ArtifactSet> {
        self.per_unit.get(unit).and_then(|sources| sources.get(source))
    }

    /// Artifacts supplied to a shared `source`.
    #[must_use]
    pub fn shared_inputs(&self, source: &str) -> Option<&ArtifactSet> {
        self.shared.get(source)
    }

    /// Units that have at least one supplied input.
    pub fn units(&self) -> impl Iterator<Item = &UnitId> {
        self.per_unit.keys()
    }

    /// Artifacts for a source node, restricted to its declared outputs.
    ///
    /// # Errors
    ///
    /// Returns [`MissingUnitInputError`] for the first declared output port
    /// with no supplied artifact.
    pub fn resolve(&self, node: &Node) -> Result<ArtifactSet, MissingUnitInputError> {
        let spec = node.spec();
        let supplied = match node.unit() {
            Some(unit) => self.unit_inputs(unit, spec.name()),
            None => self.shared_inputs(spec.name()),
        };

        spec.outputs()
            .iter()
            .map(|port| {
                supplied
                    .and_then(|set| set.get(&port.name))
                    .map(|artifact| (port.name.clone(), artifact.clone()))
                    .ok_or_else(|| MissingUnitInputError {
                        unit: node.unit().map(ToString::to_string),
                        source_node: spec.name().to_string(),
                        port: port.name.clone(),
                    })
            })
            .collect()
    }

    /// Verifies that every source node of the graph is fully supplied.
    ///
    /// # Errors
    ///
    /// Returns [`MissingUnitInputError`] for the first gap, in node order.
    pub fn check(&self, graph: &ExpandedGraph) -> Result<(), MissingUnitInputError> {
        graph
            .nodes()
            .iter()
            .filter(|node| node.spec().is_source())
            .try_for_each(|node| self.resolve(node).map(|_| ()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ArtifactId, ArtifactKind};
    use crate::expand::{IterableExpander, IterationDomain};
    use crate::graph::Graph;
    use crate::task::{InputPort, OutputPort, TaskSpec};

    fn artifact(name: &str) -> Artifact {
        Artifact::new(
            ArtifactId::from_bytes(name.as_bytes()),
            format!("/data/{name}"),
            ArtifactKind::any(),
        )
    }

    fn graph() -> ExpandedGraph {
        let mut g = Graph::new("inputs");
        let subject = g
            .add_node(
                TaskSpec::source("subject")
                    .with_output(OutputPort::new("dwi", "any"))
                    .with_output(OutputPort::new("bvec", "any")),
            )
            .unwrap();
        let atlas = g
            .add_node(TaskSpec::source("atlas").with_output(OutputPort::new("image", "any")))
            .unwrap();
        let fit = g
            .add_node(
                TaskSpec::new("fit")
                    .with_input(InputPort::required("dwi", "any"))
                    .with_input(InputPort::required("atlas", "any"))
                    .with_output(OutputPort::new("out", "any")),
            )
            .unwrap();
        g.connect(subject, "dwi", fit, "dwi").unwrap();
        g.connect(atlas, "image", fit, "atlas").unwrap();

        let domain = IterationDomain::new(["s1", "s2"]).unwrap();
        IterableExpander::expand(&g, &domain, &["subject", "fit"]).unwrap()
    }

    fn complete() -> RunInputs {
        let mut inputs = RunInputs::new().with_shared_input("atlas", "image", artifact("atlas"));
        for unit in ["s1", "s2"] {
            inputs.insert_unit(unit, "subject", "dwi", artifact(&format!("{unit}-dwi")));
            inputs.insert_unit(unit, "subject", "bvec", artifact(&format!("{unit}-bvec")));
        }
        inputs
    }

    #[test]
    fn test_resolve_per_unit_and_shared() {
        let graph = graph();
        let inputs = complete();
        inputs.check(&graph).unwrap();

        let s2 = graph.find("subject", Some(&UnitId::from("s2"))).unwrap();
        let set = inputs.resolve(s2).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set["dwi"].location.to_str(), Some("/data/s2-dwi"));

        let atlas = graph.find("atlas", None).unwrap();
        assert_eq!(inputs.resolve(atlas).unwrap()["image"], artifact("atlas"));
    }

    #[test]
    fn test_missing_port_for_one_unit() {
        let graph = graph();
        let mut inputs = RunInputs::new().with_shared_input("atlas", "image", artifact("atlas"));
        inputs.insert_unit("s1", "subject", "dwi", artifact("a"));
        inputs.insert_unit("s1", "subject", "bvec", artifact("b"));
        inputs.insert_unit("s2", "subject", "dwi", artifact("c"));

        let err = inputs.check(&graph).unwrap_err();
        assert_eq!(err.unit.as_deref(), Some("s2"));
        assert_eq!(err.source_node, "subject");
        assert_eq!(err.port, "bvec");
    }

    #[test]
    fn test_missing_shared_source() {
        let graph = graph();
        let mut inputs = complete();
        inputs.shared.clear();

        let err = inputs.check(&graph).unwrap_err();
        assert_eq!(err.unit, None);
        assert_eq!(err.source_node, "atlas");
    }
}
