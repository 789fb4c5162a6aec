//! Dispatch of requests to named invokers.

use super::{CommandInvoker, InvocationRequest, ProcessInvoker};
use crate::errors::InvocationError;
use crate::task::InvocationContract;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Routes each request to the invoker its contract names.
///
/// Command contracts go to the built-in [`CommandInvoker`]; `named`
/// contracts go to the invoker registered under that name.
#[derive(Clone)]
pub struct InvokerRegistry {
    command: Arc<dyn ProcessInvoker>,
    named: HashMap<String, Arc<dyn ProcessInvoker>>,
}

impl Default for InvokerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvokerRegistry {
    /// Creates a registry with the default command invoker and no named invokers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            command: Arc::new(CommandInvoker::new()),
            named: HashMap::new(),
        }
    }

    /// Replaces the invoker used for command contracts.
    #[must_use]
    pub fn with_command_invoker(mut self, invoker: impl ProcessInvoker + 'static) -> Self {
        self.command = Arc::new(invoker);
        self
    }

    /// Registers an invoker under a name.
    #[must_use]
    pub fn with_invoker(
        mut self,
        name: impl Into<String>,
        invoker: impl ProcessInvoker + 'static,
    ) -> Self {
        self.named.insert(name.into(), Arc::new(invoker));
        self
    }

    /// Returns true if a named invoker is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.named.contains_key(name)
    }

    /// Registered invoker names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.named.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for InvokerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvokerRegistry")
            .field("named", &self.names())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ProcessInvoker for InvokerRegistry {
    async fn invoke(
        &self,
        request: InvocationRequest,
    ) -> Result<BTreeMap<String, PathBuf>, InvocationError> {
        match request.spec.contract() {
            InvocationContract::Command(_) => self.command.invoke(request).await,
            InvocationContract::Named { invoker } => match self.named.get(invoker) {
                Some(target) => target.invoke(request).await,
                None => Err(InvocationError::new(format!(
                    "no invoker registered as '{invoker}'"
                ))),
            },
            InvocationContract::Source => Err(InvocationError::new(format!(
                "source task '{}' cannot be invoked",
                request.spec.name()
            ))),
        }
    }
}
