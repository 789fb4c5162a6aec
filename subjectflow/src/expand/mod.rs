//! Expansion of a declared graph over an iteration domain.
//!
//! Iterated nodes are replicated once per [`UnitId`]; join nodes collect
//! the per-unit outputs back into one ordered list. The resulting
//! [`ExpandedGraph`] is what the scheduler executes.

mod domain;
mod expanded;
mod expander;
mod join;

pub use domain::{IterationDomain, UnitId};
pub use expanded::{Binding, ExpandedGraph, Node, NodeExport, NodeKind, OutputRef};
pub use expander::IterableExpander;
pub use join::{JoinAggregator, JoinBinding};
