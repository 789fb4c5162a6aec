//! The flat, executable graph produced by expansion.

use super::{IterationDomain, JoinBinding, UnitId};
use crate::graph::NodeId;
use crate::task::TaskSpec;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// What a node stands for after expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// A single instance shared by every unit.
    Ordinary,
    /// The instance of an iterated task for one unit.
    Iterated {
        /// The unit.
        unit: UnitId,
    },
    /// A fan-in over every unit on `port`.
    Join {
        /// The join port.
        port: String,
    },
}

/// An output port of an expanded node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutputRef {
    /// The producing node.
    pub node: NodeId,
    /// The output port.
    pub port: String,
}

impl OutputRef {
    /// Creates an output reference.
    #[must_use]
    pub fn new(node: NodeId, port: impl Into<String>) -> Self {
        Self {
            node,
            port: port.into(),
        }
    }
}

/// Producers bound to one input port of an expanded node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// A single producer.
    One(OutputRef),
    /// Several producers on a multi-valued port, in connection order.
    Many(Vec<OutputRef>),
    /// One producer per unit, in domain order.
    Join(JoinBinding),
}

impl Binding {
    /// Every producer referenced by the binding.
    #[must_use]
    pub fn sources(&self) -> Vec<&OutputRef> {
        match self {
            Self::One(r) => vec![r],
            Self::Many(refs) => refs.iter().collect(),
            Self::Join(join) => join.sources().iter().map(|(_, r)| r).collect(),
        }
    }
}

/// An export attached to an expanded node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeExport {
    /// The exported output port.
    pub port: String,
    /// The slot name.
    pub slot: String,
}

/// A concrete, schedulable node.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) decl: NodeId,
    pub(crate) spec: Arc<TaskSpec>,
    pub(crate) kind: NodeKind,
    pub(crate) inputs: BTreeMap<String, Binding>,
    pub(crate) exports: Vec<NodeExport>,
}

impl Node {
    /// The expanded node id.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The declared node this instance was expanded from.
    #[must_use]
    pub fn decl(&self) -> NodeId {
        self.decl
    }

    /// The task declaration.
    #[must_use]
    pub fn spec(&self) -> &Arc<TaskSpec> {
        &self.spec
    }

    /// The node kind.
    #[must_use]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// The unit of an iterated node.
    #[must_use]
    pub fn unit(&self) -> Option<&UnitId> {
        match &self.kind {
            NodeKind::Iterated { unit } => Some(unit),
            _ => None,
        }
    }

    /// Returns true for join nodes.
    #[must_use]
    pub fn is_join(&self) -> bool {
        matches!(self.kind, NodeKind::Join { .. })
    }

    /// Input bindings keyed by port name. Unbound optional ports are absent.
    #[must_use]
    pub fn inputs(&self) -> &BTreeMap<String, Binding> {
        &self.inputs
    }

    /// Exports of this node.
    #[must_use]
    pub fn exports(&self) -> &[NodeExport] {
        &self.exports
    }

    /// Human readable label, `task` or `task[unit]`.
    #[must_use]
    pub fn label(&self) -> String {
        match self.unit() {
            Some(unit) => format!("{}[{unit}]", self.spec.name()),
            None => self.spec.name().to_string(),
        }
    }

    /// Distinct producers of this node, sorted by id.
    #[must_use]
    pub fn upstream(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .inputs
            .values()
            .flat_map(Binding::sources)
            .map(|r| r.node)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// The result of expansion: a DAG of concrete nodes over one domain.
#[derive(Debug, Clone)]
pub struct ExpandedGraph {
    pub(crate) name: String,
    pub(crate) domain: IterationDomain,
    pub(crate) nodes: Vec<Node>,
    pub(crate) downstream: Vec<Vec<NodeId>>,
    pub(crate) order: Vec<NodeId>,
}

impl ExpandedGraph {
    /// The name of the declared graph.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The domain the graph was expanded over.
    #[must_use]
    pub fn domain(&self) -> &IterationDomain {
        &self.domain
    }

    /// All nodes, indexed by [`NodeId::index`].
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Returns a node by id.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if there are no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Consumers of a node, sorted by id.
    #[must_use]
    pub fn downstream(&self, id: NodeId) -> &[NodeId] {
        self.downstream.get(id.index()).map_or(&[], Vec::as_slice)
    }

    /// Nodes in a deterministic topological order.
    #[must_use]
    pub fn topological_order(&self) -> &[NodeId] {
        &self.order
    }

    /// Finds the instance of `task` for `unit`, or its single instance when `unit` is `None`.
    #[must_use]
    pub fn find(&self, task: &str, unit: Option<&UnitId>) -> Option<&Node> {
        self.nodes
            .iter()
            .find(|n| n.spec.name() == task && n.unit() == unit)
    }

    /// Renders the expanded graph in Graphviz DOT format.
    #[must_use]
    pub fn to_dot(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let _ = writeln!(out, "digraph \"{}\" {{", crate::graph::escape(&self.name));
        let _ = writeln!(out, "  rankdir=LR;");
        for node in &self.nodes {
            let style = if node.is_join() { ", peripheries=2" } else { "" };
            let _ = writeln!(
                out,
                "  n{} [label=\"{}\"{style}];",
                node.id.index(),
                crate::graph::escape(&node.label())
            );
        }
        for node in &self.nodes {
            for (port, binding) in &node.inputs {
                for source in binding.sources() {
                    let _ = writeln!(
                        out,
                        "  n{} -> n{} [label=\"{} -> {}\"];",
                        source.node.index(),
                        node.id.index(),
                        crate::graph::escape(&source.port),
                        crate::graph::escape(port)
                    );
                }
            }
        }
        out.push_str("}\n");
        out
    }
}
