//! Declarative pipeline files.

use crate::core::ArtifactKind;
use crate::errors::SubjectflowError;
use crate::expand::IterationDomain;
use crate::graph::Graph;
use crate::inputs::{RunInputs, TemplateInputSource};
use crate::task::TaskSpec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// One task of a pipeline file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// The task declaration.
    #[serde(flatten)]
    pub spec: TaskSpec,
    /// Input port collecting one value per unit, for join tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join: Option<String>,
}

/// A connection between two `node.port` references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDefinition {
    /// Producer output, `node.port`.
    pub from: String,
    /// Consumer input, `node.port`.
    pub to: String,
}

/// An exported output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportDefinition {
    /// Exported output, `node.port`.
    pub output: String,
    /// Slot name.
    pub slot: String,
}

/// Where a source port's files live, relative to the input directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDefinition {
    /// Source task name.
    pub source: String,
    /// Output port of the source task.
    pub port: String,
    /// Path template; `{unit}` is replaced by the unit id.
    pub template: String,
    /// Artifact kind.
    #[serde(default)]
    pub kind: ArtifactKind,
}

/// A pipeline as written in a JSON file.
///
/// ```json
/// {
///   "name": "dwi",
///   "tasks": [
///     { "name": "subject", "outputs": [{ "name": "dwi" }], "contract": { "type": "source" } },
///     { "name": "denoise", "inputs": [{ "name": "dwi" }], "outputs": [{ "name": "out" }],
///       "contract": { "type": "command", "program": "dwidenoise",
///                     "args": ["{dwi} {out}"], "outputs": { "out": "denoised.mif" } } }
///   ],
///   "connections": [{ "from": "subject.dwi", "to": "denoise.dwi" }],
///   "iterated": ["subject", "denoise"],
///   "exports": [{ "output": "denoise.out", "slot": "denoised" }],
///   "inputs": [{ "source": "subject", "port": "dwi", "template": "{unit}/dwi.mif" }]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// Pipeline name.
    pub name: String,
    /// Tasks in declaration order.
    pub tasks: Vec<TaskDefinition>,
    /// Connections.
    #[serde(default)]
    pub connections: Vec<ConnectionDefinition>,
    /// Names of tasks replicated per unit.
    #[serde(default)]
    pub iterated: Vec<String>,
    /// Exported outputs.
    #[serde(default)]
    pub exports: Vec<ExportDefinition>,
    /// Input templates for source tasks.
    #[serde(default)]
    pub inputs: Vec<InputDefinition>,
}

fn split_port_ref(reference: &str) -> Result<(&str, &str), SubjectflowError> {
    reference
        .rsplit_once('.')
        .filter(|(node, port)| !node.is_empty() && !port.is_empty())
        .ok_or_else(|| {
            SubjectflowError::Config(format!(
                "invalid port reference '{reference}', expected 'node.port'"
            ))
        })
}

impl PipelineDefinition {
    /// Parses a JSON pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`SubjectflowError::Serialization`] for malformed JSON.
    pub fn from_json_str(json: &str) -> Result<Self, SubjectflowError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a JSON pipeline file.
    ///
    /// # Errors
    ///
    /// Returns [`SubjectflowError::Io`] if the file cannot be read and
    /// [`SubjectflowError::Serialization`] for malformed JSON.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SubjectflowError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Builds and validates the declared graph.
    ///
    /// # Errors
    ///
    /// Returns [`SubjectflowError::Config`] for malformed `node.port`
    /// references and [`SubjectflowError::Graph`] for structural errors.
    pub fn build_graph(&self) -> Result<Graph, SubjectflowError> {
        let mut graph = Graph::new(&self.name);
        for task in &self.tasks {
            match &task.join {
                Some(port) => graph.add_join(task.spec.clone(), port)?,
                None => graph.add_node(task.spec.clone())?,
            };
        }

        for connection in &self.connections {
            let (src, src_port) = split_port_ref(&connection.from)?;
            let (dst, dst_port) = split_port_ref(&connection.to)?;
            graph.connect_names(src, src_port, dst, dst_port)?;
        }

        for export in &self.exports {
            let (node, port) = split_port_ref(&export.output)?;
            let id = graph.node_id(node)?;
            graph.export(id, port, &export.slot)?;
        }

        graph.validate()?;
        debug!(
            pipeline = %self.name,
            tasks = graph.len(),
            connections = self.connections.len(),
            "Built pipeline graph"
        );
        Ok(graph)
    }

    /// Template sources for every source task with declared inputs, rooted
    /// at `base_dir`.
    #[must_use]
    pub fn input_sources(&self, base_dir: &Path) -> Vec<TemplateInputSource> {
        let mut sources: Vec<TemplateInputSource> = Vec::new();
        for input in &self.inputs {
            let position = sources.iter().position(|s| s.source() == input.source);
            let source = match position {
                Some(i) => sources.remove(i),
                None => TemplateInputSource::new(base_dir, &input.source),
            };
            let source = source.with_port(&input.port, &input.template, input.kind.clone());
            match position {
                Some(i) => sources.insert(i, source),
                None => sources.push(source),
            }
        }
        sources
    }

    /// Locates and hashes every declared input for `domain`.
    ///
    /// Sources named in `iterated` are resolved per unit, the others once.
    ///
    /// # Errors
    ///
    /// Returns [`SubjectflowError::MissingUnitInput`] for the first file
    /// that does not exist.
    pub async fn resolve_inputs(
        &self,
        base_dir: &Path,
        domain: &IterationDomain,
    ) -> Result<RunInputs, SubjectflowError> {
        let mut inputs = RunInputs::new();
        for source in self.input_sources(base_dir) {
            if self.iterated.iter().any(|name| name == source.source()) {
                source.resolve(domain, &mut inputs).await?;
            } else {
                source.resolve_shared(&mut inputs).await?;
            }
        }
        Ok(inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::GraphError;
    use crate::expand::IterableExpander;
    use crate::task::InvocationContract;

    const PIPELINE: &str = r#"{
        "name": "dwi",
        "tasks": [
            { "name": "subject", "outputs": [{ "name": "dwi", "kind": "image" }],
              "contract": { "type": "source" } },
            { "name": "atlas", "outputs": [{ "name": "labels", "kind": "image" }],
              "contract": { "type": "source" } },
            { "name": "response", "inputs": [{ "name": "dwi", "kind": "image" }],
              "outputs": [{ "name": "wm", "kind": "txt" }],
              "params": { "lmax": 8 },
              "contract": { "type": "command", "program": "dwi2response",
                            "args": ["tournier {dwi} {wm} -lmax {lmax}"],
                            "outputs": { "wm": "wm.txt" } } },
            { "name": "average", "inputs": [{ "name": "responses", "kind": "txt" }],
              "outputs": [{ "name": "wm", "kind": "txt" }],
              "join": "responses",
              "contract": { "type": "named", "invoker": "average" } },
            { "name": "fod", "inputs": [
                  { "name": "dwi", "kind": "image" },
                  { "name": "wm", "kind": "txt" },
                  { "name": "labels", "kind": "image", "required": false }
              ],
              "outputs": [{ "name": "fod", "kind": "image" }],
              "contract": { "type": "named", "invoker": "fod" } }
        ],
        "connections": [
            { "from": "subject.dwi", "to": "response.dwi" },
            { "from": "response.wm", "to": "average.responses" },
            { "from": "subject.dwi", "to": "fod.dwi" },
            { "from": "average.wm", "to": "fod.wm" },
            { "from": "atlas.labels", "to": "fod.labels" }
        ],
        "iterated": ["subject", "response", "fod"],
        "exports": [
            { "output": "fod.fod", "slot": "wm_fod" },
            { "output": "average.wm", "slot": "group_response" }
        ],
        "inputs": [
            { "source": "subject", "port": "dwi", "template": "{unit}/dwi.mif", "kind": "image" },
            { "source": "atlas", "port": "labels", "template": "atlas.mif" }
        ]
    }"#;

    #[test]
    fn test_parse_and_build() {
        let definition = PipelineDefinition::from_json_str(PIPELINE).unwrap();
        assert_eq!(definition.tasks.len(), 5);
        assert_eq!(definition.tasks[3].join.as_deref(), Some("responses"));
        assert!(matches!(
            definition.tasks[2].spec.contract(),
            InvocationContract::Command(c) if c.program == "dwi2response"
        ));

        let graph = definition.build_graph().unwrap();
        assert_eq!(graph.len(), 5);
        assert_eq!(graph.exports().len(), 2);

        // The join result is fed back into every unit's chain.
        let domain = IterationDomain::new(["sub-01", "sub-02"]).unwrap();
        let expanded = IterableExpander::expand(&graph, &domain, &definition.iterated).unwrap();
        assert_eq!(expanded.len(), 2 + 1 + 2 + 1 + 2);
    }

    #[test]
    fn test_bad_port_reference() {
        let mut definition = PipelineDefinition::from_json_str(PIPELINE).unwrap();
        definition.connections[0].from = "subject".to_string();
        let err = definition.build_graph().unwrap_err();
        assert!(matches!(err, SubjectflowError::Config(_)));
    }

    #[test]
    fn test_unknown_node_is_graph_error() {
        let mut definition = PipelineDefinition::from_json_str(PIPELINE).unwrap();
        definition.exports[0].output = "nope.fod".to_string();
        let err = definition.build_graph().unwrap_err();
        assert!(matches!(
            err,
            SubjectflowError::Graph(GraphError::UnknownNode { .. })
        ));
    }

    #[tokio::test]
    async fn test_resolve_inputs_per_unit_and_shared() {
        let dir = tempfile::tempdir().unwrap();
        for unit in ["sub-01", "sub-02"] {
            let folder = dir.path().join(unit);
            tokio::fs::create_dir_all(&folder).await.unwrap();
            tokio::fs::write(folder.join("dwi.mif"), unit).await.unwrap();
        }
        tokio::fs::write(dir.path().join("atlas.mif"), b"atlas").await.unwrap();

        let definition = PipelineDefinition::from_json_str(PIPELINE).unwrap();
        let domain = IterationDomain::new(["sub-01", "sub-02"]).unwrap();
        let inputs = definition.resolve_inputs(dir.path(), &domain).await.unwrap();

        let sub1 = inputs.unit_inputs(&"sub-01".into(), "subject").unwrap();
        let sub2 = inputs.unit_inputs(&"sub-02".into(), "subject").unwrap();
        assert_ne!(sub1["dwi"].id, sub2["dwi"].id);
        assert!(inputs.shared_inputs("atlas").unwrap().contains_key("labels"));
    }

    #[tokio::test]
    async fn test_missing_input_file() {
        let dir = tempfile::tempdir().unwrap();
        let definition = PipelineDefinition::from_json_str(PIPELINE).unwrap();
        let domain = IterationDomain::new(["sub-01"]).unwrap();
        let err = definition.resolve_inputs(dir.path(), &domain).await.unwrap_err();
        assert!(matches!(err, SubjectflowError::MissingUnitInput(_)));
    }
}
