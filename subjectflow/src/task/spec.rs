//! Immutable task declarations.

use crate::core::ArtifactKind;
use crate::errors::GraphError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

fn default_true() -> bool {
    true
}

/// A named input of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputPort {
    /// Port name, unique among the task's inputs.
    pub name: String,
    /// Whether validation requires a producer for this port.
    #[serde(default = "default_true")]
    pub required: bool,
    /// Accepted artifact kind.
    #[serde(default)]
    pub kind: ArtifactKind,
    /// Whether several producers may bind to this port.
    #[serde(default)]
    pub multi: bool,
}

impl InputPort {
    /// A required single-valued port.
    #[must_use]
    pub fn required(name: impl Into<String>, kind: impl Into<ArtifactKind>) -> Self {
        Self {
            name: name.into(),
            required: true,
            kind: kind.into(),
            multi: false,
        }
    }

    /// An optional single-valued port.
    #[must_use]
    pub fn optional(name: impl Into<String>, kind: impl Into<ArtifactKind>) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind)
        }
    }

    /// Marks the port as accepting several producers.
    #[must_use]
    pub fn multi(mut self) -> Self {
        self.multi = true;
        self
    }
}

/// A named output of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputPort {
    /// Port name, unique among the task's outputs.
    pub name: String,
    /// Produced artifact kind.
    #[serde(default)]
    pub kind: ArtifactKind,
}

impl OutputPort {
    /// Creates a new output port.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: impl Into<ArtifactKind>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
        }
    }
}

/// A task parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// A boolean flag.
    Bool(bool),
    /// An integer.
    Int(i64),
    /// A floating point number.
    Float(f64),
    /// A string.
    Str(String),
    /// A list of values.
    List(Vec<ParamValue>),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => f.write_str(v),
            Self::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// Command line contract rendered by [`crate::invoke::CommandInvoker`].
///
/// `args` entries are templates. Each entry is split on whitespace into
/// argv tokens, and `{name}` placeholders resolve to input paths, output
/// paths, parameters or `{unit}`. An entry that mentions an unbound
/// optional input is dropped as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandContract {
    /// Program to execute.
    pub program: String,
    /// Argument templates.
    #[serde(default)]
    pub args: Vec<String>,
    /// Output port name to file name inside the node's working directory.
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
}

impl CommandContract {
    /// Creates a contract for a program.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Appends an argument template.
    #[must_use]
    pub fn arg(mut self, template: impl Into<String>) -> Self {
        self.args.push(template.into());
        self
    }

    /// Declares the file an output port is written to.
    #[must_use]
    pub fn output(mut self, port: impl Into<String>, file_name: impl Into<String>) -> Self {
        self.outputs.insert(port.into(), file_name.into());
        self
    }
}

/// How a task is executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InvocationContract {
    /// Run an external command.
    Command(CommandContract),
    /// Dispatch to an invoker registered under a name.
    Named {
        /// Registered invoker name.
        invoker: String,
    },
    /// Outputs are supplied by the caller per unit; never invoked.
    Source,
}

/// Immutable declaration of one unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    name: String,
    #[serde(default)]
    inputs: Vec<InputPort>,
    #[serde(default)]
    outputs: Vec<OutputPort>,
    #[serde(default)]
    params: BTreeMap<String, ParamValue>,
    contract: InvocationContract,
}

impl TaskSpec {
    /// Creates a task dispatched to the invoker registered under its own name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            contract: InvocationContract::Named {
                invoker: name.clone(),
            },
            name,
            inputs: Vec::new(),
            outputs: Vec::new(),
            params: BTreeMap::new(),
        }
    }

    /// Creates a source task whose outputs come from run inputs.
    #[must_use]
    pub fn source(name: impl Into<String>) -> Self {
        Self::new(name).with_contract(InvocationContract::Source)
    }

    /// Adds an input port.
    #[must_use]
    pub fn with_input(mut self, port: InputPort) -> Self {
        self.inputs.push(port);
        self
    }

    /// Adds an output port.
    #[must_use]
    pub fn with_output(mut self, port: OutputPort) -> Self {
        self.outputs.push(port);
        self
    }

    /// Sets a parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Sets the invocation contract.
    #[must_use]
    pub fn with_contract(mut self, contract: InvocationContract) -> Self {
        self.contract = contract;
        self
    }

    /// Sets a command contract.
    #[must_use]
    pub fn with_command(self, command: CommandContract) -> Self {
        self.with_contract(InvocationContract::Command(command))
    }

    /// Task name, unique within a graph.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared input ports in declaration order.
    #[must_use]
    pub fn inputs(&self) -> &[InputPort] {
        &self.inputs
    }

    /// Declared output ports in declaration order.
    #[must_use]
    pub fn outputs(&self) -> &[OutputPort] {
        &self.outputs
    }

    /// Parameters in key order.
    #[must_use]
    pub fn params(&self) -> &BTreeMap<String, ParamValue> {
        &self.params
    }

    /// The invocation contract.
    #[must_use]
    pub fn contract(&self) -> &InvocationContract {
        &self.contract
    }

    /// Returns true for source tasks.
    #[must_use]
    pub fn is_source(&self) -> bool {
        matches!(self.contract, InvocationContract::Source)
    }

    /// Looks up an input port.
    #[must_use]
    pub fn input(&self, name: &str) -> Option<&InputPort> {
        self.inputs.iter().find(|p| p.name == name)
    }

    /// Looks up an output port.
    #[must_use]
    pub fn output(&self, name: &str) -> Option<&OutputPort> {
        self.outputs.iter().find(|p| p.name == name)
    }

    /// Rejects duplicate port names.
    pub fn check_ports(&self) -> Result<(), GraphError> {
        let mut seen = HashSet::new();
        for name in self.inputs.iter().map(|p| &p.name) {
            if !seen.insert(name) {
                return Err(GraphError::DuplicatePort {
                    node: self.name.clone(),
                    port: name.clone(),
                });
            }
        }
        seen.clear();
        for name in self.outputs.iter().map(|p| &p.name) {
            if !seen.insert(name) {
                return Err(GraphError::DuplicatePort {
                    node: self.name.clone(),
                    port: name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Stable digest of what the task does: name, ports and contract.
    ///
    /// Parameters are hashed separately by the fingerprint.
    #[must_use]
    pub fn identity_digest(&self) -> String {
        let value = serde_json::json!({
            "name": self.name,
            "inputs": self.inputs,
            "outputs": self.outputs,
            "contract": self.contract,
        });
        let canonical = crate::cache::canonical_json(&value);
        hex::encode(Sha256::digest(canonical.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract() -> TaskSpec {
        TaskSpec::new("extract")
            .with_input(InputPort::required("in_file", "nifti"))
            .with_output(OutputPort::new("out_file", "nifti"))
            .with_param("bval_scale", "yes")
    }

    #[test]
    fn test_builder_and_lookup() {
        let spec = extract();

        assert_eq!(spec.name(), "extract");
        assert!(spec.input("in_file").is_some_and(|p| p.required));
        assert!(spec.output("out_file").is_some());
        assert!(spec.input("missing").is_none());
        assert_eq!(
            spec.contract(),
            &InvocationContract::Named {
                invoker: "extract".into()
            }
        );
        assert!(!spec.is_source());
        assert!(TaskSpec::source("subject").is_source());
    }

    #[test]
    fn test_duplicate_ports_rejected() {
        let spec = extract().with_input(InputPort::optional("in_file", "nifti"));
        let err = spec.check_ports().unwrap_err();
        assert!(matches!(err, GraphError::DuplicatePort { port, .. } if port == "in_file"));
    }

    #[test]
    fn test_identity_digest_ignores_params() {
        let a = extract();
        let b = extract().with_param("bval_scale", "no");
        let c = extract().with_output(OutputPort::new("log", "text"));

        assert_eq!(a.identity_digest(), b.identity_digest());
        assert_ne!(a.identity_digest(), c.identity_digest());
    }

    #[test]
    fn test_param_display() {
        assert_eq!(ParamValue::from(3).to_string(), "3");
        assert_eq!(ParamValue::from(true).to_string(), "true");
        let list = ParamValue::List(vec![ParamValue::from(0.5), ParamValue::from("x")]);
        assert_eq!(list.to_string(), "0.5 x");
    }

    #[test]
    fn test_spec_deserializes_with_defaults() {
        let json = r#"{
            "name": "dwi2mask",
            "inputs": [{"name": "in_file", "kind": "mif"}],
            "outputs": [{"name": "out_file"}],
            "params": {"threshold": 0.2},
            "contract": {
                "type": "command",
                "program": "dwi2mask",
                "args": ["{in_file}", "{out_file}"],
                "outputs": {"out_file": "mask.mif"}
            }
        }"#;

        let spec: TaskSpec = serde_json::from_str(json).unwrap();
        assert!(spec.inputs()[0].required);
        assert!(!spec.inputs()[0].multi);
        assert!(spec.outputs()[0].kind.is_any());
        assert_eq!(spec.params().get("threshold"), Some(&ParamValue::Float(0.2)));
        assert!(matches!(spec.contract(), InvocationContract::Command(c) if c.program == "dwi2mask"));
    }
}
