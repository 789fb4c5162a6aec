//! Graphviz rendering of the declared graph.

use super::{Graph, NodeRole};
use std::fmt::Write;

impl Graph {
    /// Renders the graph in Graphviz DOT format.
    ///
    /// Join nodes are drawn with a double border and edges are labelled
    /// `output -> input`.
    #[must_use]
    pub fn to_dot(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "digraph \"{}\" {{", escape(self.name()));
        let _ = writeln!(out, "  rankdir=LR;");
        for node in self.nodes() {
            let shape = match node.role() {
                NodeRole::Join { .. } => ", peripheries=2",
                NodeRole::Ordinary if node.spec().is_source() => ", shape=folder",
                NodeRole::Ordinary => "",
            };
            let _ = writeln!(
                out,
                "  n{} [label=\"{}\"{shape}];",
                node.id().index(),
                escape(node.name())
            );
        }
        for edge in self.edges() {
            let _ = writeln!(
                out,
                "  n{} -> n{} [label=\"{} -> {}\"];",
                edge.src.node.index(),
                edge.dst.node.index(),
                escape(&edge.src.port),
                escape(&edge.dst.port)
            );
        }
        out.push_str("}\n");
        out
    }
}

pub(crate) fn escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}
