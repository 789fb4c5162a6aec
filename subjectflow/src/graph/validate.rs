//! Whole-graph validation and ordering.

use super::{Graph, NodeId};
use crate::errors::GraphError;
use std::collections::{BTreeSet, HashMap};

impl Graph {
    /// Checks that the graph is non-empty, acyclic and that every required
    /// input port has a producer.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.is_empty() {
            return Err(GraphError::EmptyGraph);
        }

        self.detect_cycles()?;

        for node in self.nodes() {
            for port in node.spec().inputs() {
                if port.required && self.bindings(node.id(), &port.name).next().is_none() {
                    return Err(GraphError::UnboundRequiredInput {
                        node: node.name().to_string(),
                        port: port.name.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Returns nodes so that every producer precedes its consumers.
    ///
    /// Ties are broken by declaration order, so the result is deterministic.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Cycle`] if the graph is cyclic.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, GraphError> {
        let order = self.kahn();
        if order.len() == self.len() {
            Ok(order)
        } else {
            Err(self.cycle_error(&order))
        }
    }

    fn detect_cycles(&self) -> Result<(), GraphError> {
        let order = self.kahn();
        if order.len() == self.len() {
            Ok(())
        } else {
            Err(self.cycle_error(&order))
        }
    }

    /// Kahn's algorithm; nodes on or behind a cycle are left out.
    fn kahn(&self) -> Vec<NodeId> {
        let mut in_degree: Vec<usize> = self
            .nodes()
            .iter()
            .map(|n| self.dependencies(n.id()).len())
            .collect();
        let mut ready: BTreeSet<NodeId> = self
            .nodes()
            .iter()
            .map(|n| n.id())
            .filter(|id| in_degree[id.index()] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.len());

        while let Some(id) = ready.pop_first() {
            order.push(id);
            for dependent in self.dependents(id) {
                in_degree[dependent.index()] -= 1;
                if in_degree[dependent.index()] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        order
    }

    /// Names one cycle among the nodes Kahn's pass could not order.
    ///
    /// Every unordered node has an unordered producer, so walking producers
    /// from any of them must revisit a node.
    fn cycle_error(&self, ordered: &[NodeId]) -> GraphError {
        let mut blocked = vec![true; self.len()];
        for id in ordered {
            blocked[id.index()] = false;
        }

        let Some(start) = self.nodes().iter().map(|n| n.id()).find(|id| blocked[id.index()])
        else {
            return GraphError::Cycle { path: Vec::new() };
        };

        let mut walk = vec![start];
        let mut seen = HashMap::from([(start, 0usize)]);
        let mut current = start;
        loop {
            let Some(producer) = self
                .dependencies(current)
                .into_iter()
                .find(|id| blocked[id.index()])
            else {
                return GraphError::Cycle { path: Vec::new() };
            };
            if let Some(&at) = seen.get(&producer) {
                let mut cycle = walk.split_off(at);
                cycle.push(producer);
                cycle.reverse();
                let path = cycle
                    .into_iter()
                    .filter_map(|id| self.node(id).map(|n| n.name().to_string()))
                    .collect();
                return GraphError::Cycle { path };
            }
            seen.insert(producer, walk.len());
            walk.push(producer);
            current = producer;
        }
    }
}
