//! Node, edge and export records of a declared graph.

use crate::task::TaskSpec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Arena index of a node within the graph that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Returns the arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a declared node consumes its inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeRole {
    /// One instance per producer instance (or a single instance).
    Ordinary,
    /// Collects the per-unit outputs arriving on `port` into one ordered list.
    Join {
        /// The input port that fans in.
        port: String,
    },
}

/// A task placed in a graph.
#[derive(Debug, Clone)]
pub struct DeclaredNode {
    pub(crate) id: NodeId,
    pub(crate) spec: Arc<TaskSpec>,
    pub(crate) role: NodeRole,
}

impl DeclaredNode {
    /// The node id.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The node name, equal to its task name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.spec.name()
    }

    /// The task declaration.
    #[must_use]
    pub fn spec(&self) -> &Arc<TaskSpec> {
        &self.spec
    }

    /// The node role.
    #[must_use]
    pub fn role(&self) -> &NodeRole {
        &self.role
    }

    /// The join port, if this is a join node.
    #[must_use]
    pub fn join_port(&self) -> Option<&str> {
        match &self.role {
            NodeRole::Join { port } => Some(port),
            NodeRole::Ordinary => None,
        }
    }
}

/// One end of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortRef {
    /// The node.
    pub node: NodeId,
    /// The port on that node.
    pub port: String,
}

impl PortRef {
    /// Creates a port reference.
    #[must_use]
    pub fn new(node: NodeId, port: impl Into<String>) -> Self {
        Self {
            node,
            port: port.into(),
        }
    }
}

/// A connection from an output port to an input port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    /// Producer side.
    pub src: PortRef,
    /// Consumer side.
    pub dst: PortRef,
}

/// An output port delivered to the output sink under a slot name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    /// The producing output.
    pub output: PortRef,
    /// Destination slot name.
    pub slot: String,
}
