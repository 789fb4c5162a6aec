//! Error types for the subjectflow engine.
//!
//! Structural problems with a pipeline are [`GraphError`]s and are fatal at
//! build time. Failures of individual nodes ([`InvocationError`],
//! [`CacheError`]) never abort a run; the scheduler records them and turns
//! them into state transitions. [`SubjectflowError`] is reserved for
//! run-level faults.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// The main error type for run-level subjectflow operations.
#[derive(Debug, Error)]
pub enum SubjectflowError {
    /// The pipeline graph is structurally invalid.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// A required per-unit input was not supplied.
    #[error(transparent)]
    MissingUnitInput(#[from] MissingUnitInputError),

    /// The artifact cache could not be used at all.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Invalid engine or pipeline configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "GRAPH-005-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Which side of a node a port lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDirection {
    /// An input port.
    Input,
    /// An output port.
    Output,
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
        }
    }
}

/// Structural errors raised while building, validating or expanding a graph.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    /// A node with the same name is already registered.
    #[error("Node '{name}' already exists in the graph")]
    DuplicateNode {
        /// The duplicated name.
        name: String,
    },

    /// A task declares the same port name twice.
    #[error("Task '{node}' declares port '{port}' more than once")]
    DuplicatePort {
        /// The task name.
        node: String,
        /// The duplicated port.
        port: String,
    },

    /// A node name or id does not belong to the graph.
    #[error("Unknown node '{name}'")]
    UnknownNode {
        /// The requested name.
        name: String,
    },

    /// A port is not declared on the node.
    #[error("Node '{node}' has no {direction} port '{port}'")]
    UnknownPort {
        /// The node name.
        node: String,
        /// The port name.
        port: String,
        /// Input or output.
        direction: PortDirection,
    },

    /// The artifact kinds on both ends of a connection are incompatible.
    #[error(
        "Cannot connect '{src_node}.{src_port}' ({src_kind}) to '{dst_node}.{dst_port}' ({dst_kind})"
    )]
    TypeMismatch {
        /// Producer node.
        src_node: String,
        /// Producer port.
        src_port: String,
        /// Producer artifact kind.
        src_kind: String,
        /// Consumer node.
        dst_node: String,
        /// Consumer port.
        dst_port: String,
        /// Consumer artifact kind.
        dst_kind: String,
    },

    /// A single-valued input port already has a producer.
    #[error("Input port '{node}.{port}' is already bound")]
    PortAlreadyBound {
        /// The node name.
        node: String,
        /// The port name.
        port: String,
    },

    /// The graph contains a dependency cycle.
    #[error("Cycle detected in graph: {}", path.join(" -> "))]
    Cycle {
        /// Node names forming the cycle, first node repeated at the end.
        path: Vec<String>,
    },

    /// A required input port has no producer.
    #[error("Required input '{node}.{port}' is not bound")]
    UnboundRequiredInput {
        /// The node name.
        node: String,
        /// The port name.
        port: String,
    },

    /// A join node is declared or fed incorrectly.
    #[error("Invalid join '{node}': {reason}")]
    InvalidJoin {
        /// The join node name.
        node: String,
        /// What is wrong with it.
        reason: String,
    },

    /// An iterated node feeds a non-iterated node outside of a join port.
    #[error("Iterated node '{src}' feeds non-iterated node '{dst}' without a join")]
    IterationBoundary {
        /// The iterated producer.
        src: String,
        /// The non-iterated consumer.
        dst: String,
    },

    /// The iteration domain has no units.
    #[error("Iteration domain is empty")]
    EmptyDomain,

    /// A unit appears twice in the iteration domain.
    #[error("Unit '{unit}' appears more than once in the iteration domain")]
    DuplicateUnit {
        /// The duplicated unit.
        unit: String,
    },

    /// An export slot name is used more than once.
    #[error("Export slot '{slot}' is already used")]
    DuplicateExport {
        /// The duplicated slot name.
        slot: String,
    },

    /// The graph has no nodes.
    #[error("Graph has no nodes")]
    EmptyGraph,
}

impl GraphError {
    /// Returns the stable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::DuplicateNode { .. } => "GRAPH-001-DUPLICATE_NODE",
            Self::DuplicatePort { .. } => "GRAPH-002-DUPLICATE_PORT",
            Self::UnknownNode { .. } => "GRAPH-003-UNKNOWN_NODE",
            Self::UnknownPort { .. } => "GRAPH-004-UNKNOWN_PORT",
            Self::TypeMismatch { .. } => "GRAPH-005-TYPE_MISMATCH",
            Self::PortAlreadyBound { .. } => "GRAPH-006-PORT_BOUND",
            Self::Cycle { .. } => "GRAPH-007-CYCLE",
            Self::UnboundRequiredInput { .. } => "GRAPH-008-UNBOUND_INPUT",
            Self::InvalidJoin { .. } => "GRAPH-009-INVALID_JOIN",
            Self::IterationBoundary { .. } => "GRAPH-010-ITERATION_BOUNDARY",
            Self::EmptyDomain => "GRAPH-011-EMPTY_DOMAIN",
            Self::DuplicateUnit { .. } => "GRAPH-012-DUPLICATE_UNIT",
            Self::DuplicateExport { .. } => "GRAPH-013-DUPLICATE_EXPORT",
            Self::EmptyGraph => "GRAPH-014-EMPTY",
        }
    }

    /// Builds diagnostic info with a fix hint.
    #[must_use]
    pub fn error_info(&self) -> ContractErrorInfo {
        let info = ContractErrorInfo::new(self.code(), self.to_string());
        match self {
            Self::Cycle { path } => info
                .with_fix_hint("Remove one of the connections in the cycle to break it.")
                .with_context_entry("cycle", path.join(" -> ")),
            Self::UnboundRequiredInput { node, port } => info
                .with_fix_hint("Connect a producer to the port or declare it optional.")
                .with_context_entry("port", format!("{node}.{port}")),
            Self::TypeMismatch { .. } => info
                .with_fix_hint("Declare matching artifact kinds on both ports, or use the 'any' kind."),
            Self::PortAlreadyBound { .. } => {
                info.with_fix_hint("Declare the input port as multi to accept several producers.")
            }
            Self::IterationBoundary { .. } => info.with_fix_hint(
                "Iterate the consumer as well, or declare it as a join over the connecting port.",
            ),
            Self::DuplicateNode { .. } | Self::DuplicateExport { .. } => {
                info.with_fix_hint("Names must be unique within a graph.")
            }
            _ => info,
        }
    }
}

/// Failure of a single external invocation.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}{}", exit_suffix(.exit_code))]
pub struct InvocationError {
    /// Process exit code; `None` when killed by a signal, timed out or never started.
    pub exit_code: Option<i32>,
    /// Tail of the process' standard error.
    pub stderr_excerpt: String,
    /// Human readable description.
    pub message: String,
}

fn exit_suffix(code: &Option<i32>) -> String {
    code.map(|c| format!(" (exit code {c})")).unwrap_or_default()
}

impl InvocationError {
    /// Creates an error with only a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            exit_code: None,
            stderr_excerpt: String::new(),
            message: message.into(),
        }
    }

    /// A process that exited unsuccessfully.
    #[must_use]
    pub fn exit(exit_code: Option<i32>, stderr_excerpt: impl Into<String>) -> Self {
        Self {
            exit_code,
            stderr_excerpt: stderr_excerpt.into(),
            message: "process exited unsuccessfully".to_string(),
        }
    }

    /// A process that could not be started.
    #[must_use]
    pub fn spawn(err: &std::io::Error) -> Self {
        Self::new(format!("failed to start process: {err}"))
    }

    /// A node that exceeded its time budget.
    #[must_use]
    pub fn timed_out(after: std::time::Duration) -> Self {
        Self::new(format!("timed out after {}s", after.as_secs_f64()))
    }

    /// A declared output that was not produced.
    #[must_use]
    pub fn missing_output(port: &str, location: &std::path::Path) -> Self {
        Self {
            exit_code: Some(0),
            stderr_excerpt: String::new(),
            message: format!("output '{port}' was not produced at {}", location.display()),
        }
    }
}

/// A join could not run because some per-unit sources did not complete.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("Join '{join}' is incomplete: missing units [{}]", missing_units.join(", "))]
pub struct JoinIncompleteError {
    /// The join node label.
    pub join: String,
    /// Units whose source did not finish successfully, in domain order.
    pub missing_units: Vec<String>,
}

/// Errors from the artifact cache and its backing store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    /// Storage I/O failed.
    #[error("Cache storage failed for {fingerprint}: {message}")]
    Io {
        /// Affected fingerprint or record key.
        fingerprint: String,
        /// Error description.
        message: String,
    },

    /// A record could not be encoded or decoded.
    #[error("Cache record for {fingerprint} is unreadable: {message}")]
    Serialization {
        /// Affected fingerprint or record key.
        fingerprint: String,
        /// Error description.
        message: String,
    },

    /// The caller that reserved this fingerprint failed; waiters share the failure.
    #[error("Computation for {fingerprint} failed: {reason}")]
    ComputationFailed {
        /// Affected fingerprint.
        fingerprint: String,
        /// The reserving caller's failure.
        reason: String,
    },

    /// A reservation was dropped without commit or abort.
    #[error("Reservation for {fingerprint} was dropped before it was settled")]
    Abandoned {
        /// Affected fingerprint.
        fingerprint: String,
    },
}

impl CacheError {
    /// Wraps an IO error.
    #[must_use]
    pub fn io(fingerprint: impl Into<String>, err: &std::io::Error) -> Self {
        Self::Io {
            fingerprint: fingerprint.into(),
            message: err.to_string(),
        }
    }
}

/// A source node has no artifact for one of its ports.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("Missing input '{source_node}.{port}' for unit {}", unit.as_deref().unwrap_or("<shared>"))]
pub struct MissingUnitInputError {
    /// The unit, or `None` for inputs shared by all units.
    pub unit: Option<String>,
    /// The source node name.
    pub source_node: String,
    /// The missing port.
    pub port: String,
}

/// Failure to place an exported artifact.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("Failed to export slot '{slot}': {message}")]
pub struct SinkError {
    /// The slot key.
    pub slot: String,
    /// Error description.
    pub message: String,
}
