//! Execution of task contracts.
//!
//! The scheduler hands every reserved node to a [`ProcessInvoker`]. The
//! invoker runs the work, typically an external program, and reports where
//! each declared output was written.

mod command;
mod registry;
mod template;

pub use command::CommandInvoker;
pub use registry::InvokerRegistry;
pub use template::render_args;

use crate::errors::InvocationError;
use crate::expand::UnitId;
use crate::task::TaskSpec;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Locations bound to one input port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum InputValue {
    /// A single-valued port.
    One(PathBuf),
    /// A multi-valued or join port, in binding order.
    Many(Vec<PathBuf>),
}

impl InputValue {
    /// Locations in binding order.
    #[must_use]
    pub fn paths(&self) -> Vec<&PathBuf> {
        match self {
            Self::One(p) => vec![p],
            Self::Many(ps) => ps.iter().collect(),
        }
    }
}

/// Everything an invoker needs to execute one node.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    /// Node label, `task` or `task[unit]`.
    pub node: String,
    /// Unit of an iterated node.
    pub unit: Option<UnitId>,
    /// The task declaration.
    pub spec: Arc<TaskSpec>,
    /// Input locations keyed by port; unbound optional ports are absent.
    pub inputs: BTreeMap<String, InputValue>,
    /// Private working directory, unique per fingerprint.
    pub work_dir: PathBuf,
    /// 1-based attempt number.
    pub attempt: usize,
}

/// Runs the work behind a node.
///
/// Implementations must be safe to call concurrently from several workers.
#[async_trait]
pub trait ProcessInvoker: Send + Sync {
    /// Executes the request and returns the location of every declared output port.
    async fn invoke(
        &self,
        request: InvocationRequest,
    ) -> Result<BTreeMap<String, PathBuf>, InvocationError>;
}

#[async_trait]
impl<T: ProcessInvoker + ?Sized> ProcessInvoker for Arc<T> {
    async fn invoke(
        &self,
        request: InvocationRequest,
    ) -> Result<BTreeMap<String, PathBuf>, InvocationError> {
        (**self).invoke(request).await
    }
}
