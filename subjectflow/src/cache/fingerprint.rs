//! Content-addressed node fingerprints.

use crate::core::{ArtifactId, ArtifactSet};
use crate::task::TaskSpec;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Serializes a JSON value with object keys sorted and no whitespace.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(_) => value.to_string(),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        Value::Object(map) => {
            let sorted: BTreeMap<&String, String> =
                map.iter().map(|(k, v)| (k, canonical_json(v))).collect();
            let items: Vec<String> = sorted
                .into_iter()
                .map(|(k, v)| format!("{}:{v}", Value::String(k.clone())))
                .collect();
            format!("{{{}}}", items.join(","))
        }
    }
}

fn sha256_hex(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

/// Deterministic identity of a node execution.
///
/// Two executions with the same task identity, parameters and input
/// artifact ids share a fingerprint; any change to one of them yields a
/// different one. The unit a node belongs to is deliberately absent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint of a computed node.
    ///
    /// `inputs` maps bound input ports to their artifact ids in binding
    /// order. Ports are folded in the task's declaration order.
    #[must_use]
    pub fn compute(spec: &TaskSpec, inputs: &BTreeMap<String, Vec<ArtifactId>>) -> Self {
        let ports: Vec<Value> = spec
            .inputs()
            .iter()
            .filter_map(|port| inputs.get(&port.name).map(|ids| json!([port.name, ids])))
            .collect();
        let value = json!({
            "task": spec.identity_digest(),
            "params": spec.params(),
            "inputs": ports,
        });
        Self(sha256_hex(&canonical_json(&value)))
    }

    /// Fingerprint of a source node over the artifacts supplied to it.
    #[must_use]
    pub fn for_source(spec: &TaskSpec, artifacts: &ArtifactSet) -> Self {
        let supplied: Vec<Value> = artifacts
            .iter()
            .map(|(port, artifact)| json!([port, artifact.id]))
            .collect();
        let value = json!({
            "task": spec.identity_digest(),
            "source": supplied,
        });
        Self(sha256_hex(&canonical_json(&value)))
    }

    /// Identifier of the artifact this execution produces on `port`.
    ///
    /// Derived from the fingerprint so downstream fingerprints are known
    /// before anything runs.
    #[must_use]
    pub fn output_id(&self, port: &str) -> ArtifactId {
        ArtifactId::new(sha256_hex(&format!("{}:{port}", self.0)))
    }

    /// Wraps a stored fingerprint string.
    #[must_use]
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Returns the hex string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex digits, for directory names and logs.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
