//! Declared pipeline graph with typed connections.

use super::{DeclaredNode, Edge, Export, NodeId, NodeRole, PortRef};
use crate::errors::{GraphError, PortDirection};
use crate::task::TaskSpec;
use std::collections::HashMap;
use std::sync::Arc;

/// A declared pipeline: task nodes connected through typed ports.
///
/// Connections are checked as they are added. Whole-graph properties
/// (acyclicity, bound required inputs) are checked by [`Graph::validate`].
#[derive(Debug, Clone, Default)]
pub struct Graph {
    name: String,
    nodes: Vec<DeclaredNode>,
    index: HashMap<String, NodeId>,
    edges: Vec<Edge>,
    exports: Vec<Export>,
}

impl Graph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Returns the graph name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds an ordinary node.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateNode`] if the task name is taken, or
    /// [`GraphError::DuplicatePort`] if the task repeats a port name.
    pub fn add_node(&mut self, spec: impl Into<Arc<TaskSpec>>) -> Result<NodeId, GraphError> {
        self.insert(spec.into(), NodeRole::Ordinary)
    }

    /// Adds a join node that collects per-unit outputs on `join_port`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownPort`] if the task has no such input,
    /// [`GraphError::InvalidJoin`] for source tasks, and the errors of [`Graph::add_node`].
    pub fn add_join(
        &mut self,
        spec: impl Into<Arc<TaskSpec>>,
        join_port: &str,
    ) -> Result<NodeId, GraphError> {
        let spec = spec.into();
        if spec.input(join_port).is_none() {
            return Err(GraphError::UnknownPort {
                node: spec.name().to_string(),
                port: join_port.to_string(),
                direction: PortDirection::Input,
            });
        }
        if spec.is_source() {
            return Err(GraphError::InvalidJoin {
                node: spec.name().to_string(),
                reason: "a source task cannot be a join".to_string(),
            });
        }
        self.insert(
            spec,
            NodeRole::Join {
                port: join_port.to_string(),
            },
        )
    }

    fn insert(&mut self, spec: Arc<TaskSpec>, role: NodeRole) -> Result<NodeId, GraphError> {
        spec.check_ports()?;
        if self.index.contains_key(spec.name()) {
            return Err(GraphError::DuplicateNode {
                name: spec.name().to_string(),
            });
        }

        let id = NodeId(self.nodes.len());
        self.index.insert(spec.name().to_string(), id);
        self.nodes.push(DeclaredNode { id, spec, role });
        Ok(id)
    }

    /// Resolves a node name.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownNode`] if no node has that name.
    pub fn node_id(&self, name: &str) -> Result<NodeId, GraphError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::UnknownNode {
                name: name.to_string(),
            })
    }

    /// Returns a node by id.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&DeclaredNode> {
        self.nodes.get(id.0)
    }

    fn checked(&self, id: NodeId) -> Result<&DeclaredNode, GraphError> {
        self.node(id).ok_or_else(|| GraphError::UnknownNode {
            name: id.to_string(),
        })
    }

    /// All nodes in declaration order.
    #[must_use]
    pub fn nodes(&self) -> &[DeclaredNode] {
        &self.nodes
    }

    /// All connections in declaration order.
    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// All exports in declaration order.
    #[must_use]
    pub fn exports(&self) -> &[Export] {
        &self.exports
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Connects `src.src_port` to `dst.dst_port`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownPort`] for undeclared ports,
    /// [`GraphError::TypeMismatch`] for incompatible kinds and
    /// [`GraphError::PortAlreadyBound`] when a single-valued port, or the
    /// join port of a join node, already has a producer.
    pub fn connect(
        &mut self,
        src: NodeId,
        src_port: &str,
        dst: NodeId,
        dst_port: &str,
    ) -> Result<(), GraphError> {
        let producer = self.checked(src)?;
        let consumer = self.checked(dst)?;

        let output = producer
            .spec
            .output(src_port)
            .ok_or_else(|| GraphError::UnknownPort {
                node: producer.name().to_string(),
                port: src_port.to_string(),
                direction: PortDirection::Output,
            })?;
        let input = consumer
            .spec
            .input(dst_port)
            .ok_or_else(|| GraphError::UnknownPort {
                node: consumer.name().to_string(),
                port: dst_port.to_string(),
                direction: PortDirection::Input,
            })?;

        if !output.kind.compatible_with(&input.kind) {
            return Err(GraphError::TypeMismatch {
                src_node: producer.name().to_string(),
                src_port: src_port.to_string(),
                src_kind: output.kind.to_string(),
                dst_node: consumer.name().to_string(),
                dst_port: dst_port.to_string(),
                dst_kind: input.kind.to_string(),
            });
        }

        let single_producer = !input.multi || consumer.join_port() == Some(dst_port);
        if single_producer && self.bindings(dst, dst_port).next().is_some() {
            return Err(GraphError::PortAlreadyBound {
                node: consumer.name().to_string(),
                port: dst_port.to_string(),
            });
        }

        self.edges.push(Edge {
            src: PortRef::new(src, src_port),
            dst: PortRef::new(dst, dst_port),
        });
        Ok(())
    }

    /// Same as [`Graph::connect`], resolving nodes by name.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownNode`] and the errors of [`Graph::connect`].
    pub fn connect_names(
        &mut self,
        src: &str,
        src_port: &str,
        dst: &str,
        dst_port: &str,
    ) -> Result<(), GraphError> {
        let src = self.node_id(src)?;
        let dst = self.node_id(dst)?;
        self.connect(src, src_port, dst, dst_port)
    }

    /// Delivers `node.port` to the output sink under `slot`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownPort`] for an undeclared output and
    /// [`GraphError::DuplicateExport`] if the slot name is already used.
    pub fn export(&mut self, node: NodeId, port: &str, slot: &str) -> Result<(), GraphError> {
        let producer = self.checked(node)?;
        if producer.spec.output(port).is_none() {
            return Err(GraphError::UnknownPort {
                node: producer.name().to_string(),
                port: port.to_string(),
                direction: PortDirection::Output,
            });
        }
        if self.exports.iter().any(|e| e.slot == slot) {
            return Err(GraphError::DuplicateExport {
                slot: slot.to_string(),
            });
        }

        self.exports.push(Export {
            output: PortRef::new(node, port),
            slot: slot.to_string(),
        });
        Ok(())
    }

    /// Edges that feed `node.port`, in declaration order.
    pub fn bindings<'a>(&'a self, node: NodeId, port: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges
            .iter()
            .filter(move |e| e.dst.node == node && e.dst.port == port)
    }

    /// Exports declared on `node`.
    pub fn exports_of(&self, node: NodeId) -> impl Iterator<Item = &Export> + '_ {
        self.exports.iter().filter(move |e| e.output.node == node)
    }

    /// Distinct producers of `node`, sorted by id.
    #[must_use]
    pub fn dependencies(&self, node: NodeId) -> Vec<NodeId> {
        let mut deps: Vec<NodeId> = self
            .edges
            .iter()
            .filter(|e| e.dst.node == node)
            .map(|e| e.src.node)
            .collect();
        deps.sort_unstable();
        deps.dedup();
        deps
    }

    /// Distinct consumers of `node`, sorted by id.
    #[must_use]
    pub fn dependents(&self, node: NodeId) -> Vec<NodeId> {
        let mut deps: Vec<NodeId> = self
            .edges
            .iter()
            .filter(|e| e.src.node == node)
            .map(|e| e.dst.node)
            .collect();
        deps.sort_unstable();
        deps.dedup();
        deps
    }
}
