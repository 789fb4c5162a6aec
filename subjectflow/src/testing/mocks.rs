//! Scripted collaborators for scheduler tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::core::Artifact;
use crate::errors::{InvocationError, SinkError};
use crate::expand::UnitId;
use crate::invoke::{InputValue, InvocationRequest, ProcessInvoker};
use crate::sink::{ExportSlot, OutputSink};

/// One recorded invocation.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// Node label.
    pub node: String,
    /// Task name.
    pub task: String,
    /// Unit of an iterated node.
    pub unit: Option<UnitId>,
    /// Input locations by port.
    pub inputs: BTreeMap<String, InputValue>,
    /// Working directory.
    pub work_dir: PathBuf,
    /// Attempt number.
    pub attempt: usize,
}

#[derive(Debug, Clone)]
struct Failure {
    exit_code: i32,
    stderr: String,
    /// Only the first `attempts` attempts fail; `None` fails every attempt.
    attempts: Option<usize>,
}

/// An invoker that writes synthetic outputs instead of running programs.
///
/// Every declared output port gets a small file in the node's working
/// directory. Failures, delays and panics are scripted per task name or per
/// node label (`task[unit]`); label rules win over task rules.
#[derive(Debug, Default)]
pub struct ScriptedInvoker {
    calls: Mutex<Vec<RecordedCall>>,
    failures: Mutex<HashMap<String, Failure>>,
    delays: Mutex<HashMap<String, Duration>>,
    panics: Mutex<HashSet<String>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl ScriptedInvoker {
    /// Creates an invoker that succeeds everywhere.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails every attempt of `target` with `exit_code`.
    #[must_use]
    pub fn failing(self, target: impl Into<String>, exit_code: i32) -> Self {
        self.failures.lock().insert(
            target.into(),
            Failure {
                exit_code,
                stderr: format!("scripted failure (exit {exit_code})"),
                attempts: None,
            },
        );
        self
    }

    /// Fails only the first `attempts` attempts of `target`.
    #[must_use]
    pub fn flaky(self, target: impl Into<String>, attempts: usize, exit_code: i32) -> Self {
        self.failures.lock().insert(
            target.into(),
            Failure {
                exit_code,
                stderr: "transient failure".to_string(),
                attempts: Some(attempts),
            },
        );
        self
    }

    /// Delays every invocation of `target`.
    #[must_use]
    pub fn delayed(self, target: impl Into<String>, delay: Duration) -> Self {
        self.delays.lock().insert(target.into(), delay);
        self
    }

    /// Panics inside every invocation of `target`.
    #[must_use]
    pub fn panicking(self, target: impl Into<String>) -> Self {
        self.panics.lock().insert(target.into());
        self
    }

    /// Stops failing `target`.
    pub fn heal(&self, target: &str) {
        self.failures.lock().remove(target);
    }

    /// All recorded calls, in start order.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Number of invocations.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Labels of invoked nodes, in start order.
    #[must_use]
    pub fn invoked(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.node.clone()).collect()
    }

    /// Calls for one task.
    #[must_use]
    pub fn calls_for(&self, task: &str) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.task == task)
            .cloned()
            .collect()
    }

    /// Highest number of simultaneous invocations seen.
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    /// Clears recorded calls and the concurrency high-water mark.
    pub fn reset(&self) {
        self.calls.lock().clear();
        self.max_running.store(0, Ordering::SeqCst);
    }

    fn rule<T: Clone>(rules: &Mutex<HashMap<String, T>>, request: &InvocationRequest) -> Option<T> {
        let rules = rules.lock();
        rules
            .get(&request.node)
            .or_else(|| rules.get(request.spec.name()))
            .cloned()
    }

    async fn produce(&self, request: &InvocationRequest) -> Result<BTreeMap<String, PathBuf>, InvocationError> {
        if let Some(delay) = Self::rule(&self.delays, request) {
            tokio::time::sleep(delay).await;
        }

        let panics = {
            let panics = self.panics.lock();
            panics.contains(&request.node) || panics.contains(request.spec.name())
        };
        if panics {
            panic!("scripted panic in {}", request.node);
        }

        if let Some(failure) = Self::rule(&self.failures, request) {
            if failure.attempts.map_or(true, |n| request.attempt <= n) {
                return Err(InvocationError::exit(Some(failure.exit_code), failure.stderr));
            }
        }

        tokio::fs::create_dir_all(&request.work_dir)
            .await
            .map_err(|e| InvocationError::spawn(&e))?;
        let mut outputs = BTreeMap::new();
        for port in request.spec.outputs() {
            let path = request.work_dir.join(format!("{}.out", port.name));
            let inputs: Vec<String> = request
                .inputs
                .values()
                .flat_map(InputValue::paths)
                .map(|p| p.display().to_string())
                .collect();
            let body = format!("{} {} <- {}\n", request.node, port.name, inputs.join(","));
            tokio::fs::write(&path, body)
                .await
                .map_err(|e| InvocationError::spawn(&e))?;
            outputs.insert(port.name.clone(), path);
        }
        Ok(outputs)
    }
}

#[async_trait]
impl ProcessInvoker for ScriptedInvoker {
    async fn invoke(
        &self,
        request: InvocationRequest,
    ) -> Result<BTreeMap<String, PathBuf>, InvocationError> {
        self.calls.lock().push(RecordedCall {
            node: request.node.clone(),
            task: request.spec.name().to_string(),
            unit: request.unit.clone(),
            inputs: request.inputs.clone(),
            work_dir: request.work_dir.clone(),
            attempt: request.attempt,
        });

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        let result = self.produce(&request).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// An output sink that records deliveries in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<(String, Artifact)>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects deliveries to the slot with key `slot_key`.
    #[must_use]
    pub fn failing(self, slot_key: impl Into<String>) -> Self {
        self.failing.lock().insert(slot_key.into());
        self
    }

    /// Slot keys delivered so far, in delivery order.
    #[must_use]
    pub fn slots(&self) -> Vec<String> {
        self.delivered.lock().iter().map(|(k, _)| k.clone()).collect()
    }

    /// Every delivery.
    #[must_use]
    pub fn deliveries(&self) -> Vec<(String, Artifact)> {
        self.delivered.lock().clone()
    }

    /// Number of deliveries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.delivered.lock().len()
    }

    /// True if nothing was delivered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.delivered.lock().is_empty()
    }
}

#[async_trait]
impl OutputSink for RecordingSink {
    async fn deliver(&self, slot: &ExportSlot, artifact: &Artifact) -> Result<(), SinkError> {
        let key = slot.key();
        if self.failing.lock().contains(&key) {
            return Err(SinkError {
                slot: key,
                message: "scripted sink failure".to_string(),
            });
        }
        self.delivered.lock().push((key, artifact.clone()));
        Ok(())
    }
}
