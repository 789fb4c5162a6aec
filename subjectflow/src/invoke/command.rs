//! Invoker that runs command contracts as child processes.

use super::{render_args, InvocationRequest, ProcessInvoker};
use crate::errors::InvocationError;
use crate::task::InvocationContract;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

const DEFAULT_EXCERPT_BYTES: usize = 2048;

/// Runs [`InvocationContract::Command`] tasks with `tokio::process`.
///
/// Each invocation runs inside the request's working directory. Standard
/// output and error are captured to `stdout.log` and `stderr.log` there.
/// The child is killed if the invocation future is dropped, which only
/// happens when a node timeout fires; halted runs let it finish.
#[derive(Debug, Clone)]
pub struct CommandInvoker {
    env: Vec<(String, String)>,
    excerpt_bytes: usize,
}

impl Default for CommandInvoker {
    fn default() -> Self {
        Self {
            env: Vec::new(),
            excerpt_bytes: DEFAULT_EXCERPT_BYTES,
        }
    }
}

impl CommandInvoker {
    /// Creates a new command invoker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an environment variable for every child process.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Sets how much of the tail of stderr is kept in errors.
    #[must_use]
    pub fn with_excerpt_bytes(mut self, bytes: usize) -> Self {
        self.excerpt_bytes = bytes;
        self
    }

    fn excerpt(&self, stderr: &[u8]) -> String {
        let start = stderr.len().saturating_sub(self.excerpt_bytes);
        String::from_utf8_lossy(&stderr[start..]).trim().to_string()
    }

    async fn write_log(dir: &Path, name: &str, bytes: &[u8]) {
        if let Err(e) = tokio::fs::write(dir.join(name), bytes).await {
            warn!(dir = %dir.display(), file = name, error = %e, "Failed to write process log");
        }
    }
}

#[async_trait]
impl ProcessInvoker for CommandInvoker {
    async fn invoke(
        &self,
        request: InvocationRequest,
    ) -> Result<BTreeMap<String, PathBuf>, InvocationError> {
        let InvocationContract::Command(contract) = request.spec.contract() else {
            return Err(InvocationError::new(format!(
                "task '{}' has no command contract",
                request.spec.name()
            )));
        };

        let mut outputs = BTreeMap::new();
        for port in request.spec.outputs() {
            let file = contract.outputs.get(&port.name).ok_or_else(|| {
                InvocationError::new(format!(
                    "no output file declared for port '{}' of '{}'",
                    port.name,
                    request.spec.name()
                ))
            })?;
            outputs.insert(port.name.clone(), request.work_dir.join(file));
        }

        let args = render_args(contract, &request, &outputs)?;

        tokio::fs::create_dir_all(&request.work_dir)
            .await
            .map_err(|e| InvocationError::spawn(&e))?;

        debug!(
            node = %request.node,
            program = %contract.program,
            args = ?args,
            attempt = request.attempt,
            "Spawning process"
        );

        let mut command = Command::new(&contract.program);
        command
            .args(&args)
            .current_dir(&request.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.env {
            command.env(key, value);
        }

        let output = command
            .output()
            .await
            .map_err(|e| InvocationError::spawn(&e))?;

        Self::write_log(&request.work_dir, "stdout.log", &output.stdout).await;
        Self::write_log(&request.work_dir, "stderr.log", &output.stderr).await;

        if !output.status.success() {
            return Err(InvocationError::exit(
                output.status.code(),
                self.excerpt(&output.stderr),
            ));
        }

        for (port, location) in &outputs {
            if !tokio::fs::try_exists(location).await.unwrap_or(false) {
                return Err(InvocationError::missing_output(port, location));
            }
        }

        Ok(outputs)
    }
}
