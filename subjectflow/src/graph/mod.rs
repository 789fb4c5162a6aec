//! Declared pipeline graphs.
//!
//! A [`Graph`] is built once from [`crate::task::TaskSpec`]s and typed
//! connections, validated, and then handed to the
//! [`crate::expand::IterableExpander`]. It is never mutated during a run.

mod builder;
mod dot;
mod node;
mod validate;

pub use builder::Graph;
pub(crate) use dot::escape;
pub use node::{DeclaredNode, Edge, Export, NodeId, NodeRole, PortRef};
