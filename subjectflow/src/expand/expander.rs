//! Replication of iterated subgraphs over an iteration domain.

use super::{
    Binding, ExpandedGraph, IterationDomain, JoinAggregator, Node, NodeExport, NodeKind,
    OutputRef,
};
use crate::errors::GraphError;
use crate::graph::{Graph, NodeId, NodeRole};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

/// Expands a declared graph into concrete per-unit nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct IterableExpander;

impl IterableExpander {
    /// Replicates every node named in `iterated` once per unit of `domain`.
    ///
    /// Connections between two iterated nodes become per-unit connections.
    /// A non-iterated producer feeding iterated consumers is shared by all
    /// units. An iterated producer may only feed a non-iterated node through
    /// that node's join port; the join receives one producer per unit in
    /// domain order.
    ///
    /// The result depends only on the inputs, so expanding the same graph
    /// over the same domain twice yields identical node sets.
    ///
    /// # Errors
    ///
    /// Returns any [`Graph::validate`] error,
    /// [`GraphError::IterationBoundary`] for an iterated producer feeding a
    /// non-iterated node outside a join port, and
    /// [`GraphError::InvalidJoin`] for a join that is iterated itself or
    /// whose join port is fed by a non-iterated producer.
    pub fn expand<S: AsRef<str>>(
        graph: &Graph,
        domain: &IterationDomain,
        iterated: &[S],
    ) -> Result<ExpandedGraph, GraphError> {
        graph.validate()?;

        let iterated: HashSet<NodeId> = iterated
            .iter()
            .map(|name| graph.node_id(name.as_ref()))
            .collect::<Result<_, _>>()?;

        Self::check_boundaries(graph, &iterated)?;

        // Expanded ids for every declared node: one per unit when iterated.
        let mut instances: Vec<Vec<NodeId>> = Vec::with_capacity(graph.len());
        let mut next = 0;
        for decl in graph.nodes() {
            let count = if iterated.contains(&decl.id()) {
                domain.len()
            } else {
                1
            };
            instances.push((next..next + count).map(NodeId).collect());
            next += count;
        }

        let mut nodes = Vec::with_capacity(next);
        for decl in graph.nodes() {
            let is_iterated = iterated.contains(&decl.id());
            let exports: Vec<NodeExport> = graph
                .exports_of(decl.id())
                .map(|e| NodeExport {
                    port: e.output.port.clone(),
                    slot: e.slot.clone(),
                })
                .collect();

            for (position, &id) in instances[decl.id().index()].iter().enumerate() {
                let kind = match decl.role() {
                    NodeRole::Join { port } => NodeKind::Join { port: port.clone() },
                    NodeRole::Ordinary if is_iterated => NodeKind::Iterated {
                        unit: domain.units()[position].clone(),
                    },
                    NodeRole::Ordinary => NodeKind::Ordinary,
                };

                let mut inputs = BTreeMap::new();
                for port in decl.spec().inputs() {
                    let edges: Vec<_> = graph.bindings(decl.id(), &port.name).collect();
                    if edges.is_empty() {
                        continue;
                    }

                    let binding = if decl.join_port() == Some(port.name.as_str()) {
                        let edge = edges[0];
                        let per_unit = domain
                            .iter()
                            .cloned()
                            .zip(instances[edge.src.node.index()].iter().copied())
                            .map(|(unit, node)| (unit, OutputRef::new(node, edge.src.port.clone())));
                        Binding::Join(JoinAggregator::join(decl.name(), domain, per_unit).map_err(
                            |e| GraphError::InvalidJoin {
                                node: decl.name().to_string(),
                                reason: e.to_string(),
                            },
                        )?)
                    } else {
                        let refs: Vec<OutputRef> = edges
                            .iter()
                            .map(|edge| {
                                let producers = &instances[edge.src.node.index()];
                                let node = if producers.len() == 1 {
                                    producers[0]
                                } else {
                                    producers[position]
                                };
                                OutputRef::new(node, edge.src.port.clone())
                            })
                            .collect();
                        if port.multi {
                            Binding::Many(refs)
                        } else {
                            Binding::One(refs[0].clone())
                        }
                    };
                    inputs.insert(port.name.clone(), binding);
                }

                nodes.push(Node {
                    id,
                    decl: decl.id(),
                    spec: decl.spec().clone(),
                    kind,
                    inputs,
                    exports: exports.clone(),
                });
            }
        }

        let mut downstream = vec![Vec::new(); nodes.len()];
        for node in &nodes {
            for upstream in node.upstream() {
                downstream[upstream.index()].push(node.id);
            }
        }
        for consumers in &mut downstream {
            consumers.sort_unstable();
            consumers.dedup();
        }

        let order = topological(&nodes, &downstream);

        debug!(
            graph = graph.name(),
            declared = graph.len(),
            expanded = nodes.len(),
            units = domain.len(),
            "Expanded graph"
        );

        Ok(ExpandedGraph {
            name: graph.name().to_string(),
            domain: domain.clone(),
            nodes,
            downstream,
            order,
        })
    }

    fn check_boundaries(graph: &Graph, iterated: &HashSet<NodeId>) -> Result<(), GraphError> {
        for decl in graph.nodes() {
            if decl.join_port().is_some() && iterated.contains(&decl.id()) {
                return Err(GraphError::InvalidJoin {
                    node: decl.name().to_string(),
                    reason: "a join cannot be iterated".to_string(),
                });
            }
        }

        let mut fed_joins = HashSet::new();
        for edge in graph.edges() {
            let src_iterated = iterated.contains(&edge.src.node);
            let dst_iterated = iterated.contains(&edge.dst.node);
            let (Some(src), Some(dst)) = (graph.node(edge.src.node), graph.node(edge.dst.node))
            else {
                continue;
            };
            let into_join_port = dst.join_port() == Some(edge.dst.port.as_str());

            if into_join_port && !fed_joins.insert(edge.dst.node) {
                return Err(GraphError::InvalidJoin {
                    node: dst.name().to_string(),
                    reason: format!("join port '{}' has more than one producer", edge.dst.port),
                });
            }
            if into_join_port && !src_iterated {
                return Err(GraphError::InvalidJoin {
                    node: dst.name().to_string(),
                    reason: format!("join port '{}' is fed by non-iterated '{}'", edge.dst.port, src.name()),
                });
            }
            if src_iterated && !dst_iterated && !into_join_port {
                return Err(GraphError::IterationBoundary {
                    src: src.name().to_string(),
                    dst: dst.name().to_string(),
                });
            }
        }

        Ok(())
    }
}

fn topological(nodes: &[Node], downstream: &[Vec<NodeId>]) -> Vec<NodeId> {
    let mut in_degree: Vec<usize> = nodes.iter().map(|n| n.upstream().len()).collect();
    let mut ready: BTreeSet<NodeId> = nodes
        .iter()
        .filter(|n| in_degree[n.id.index()] == 0)
        .map(|n| n.id)
        .collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(id) = ready.pop_first() {
        order.push(id);
        for &next in &downstream[id.index()] {
            in_degree[next.index()] -= 1;
            if in_degree[next.index()] == 0 {
                ready.insert(next);
            }
        }
    }
    order
}
