//! Per-run execution context and the worker pool.

use super::{FailurePolicy, RetryConfig};
use crate::cache::ArtifactCache;
use crate::cancellation::CancellationToken;
use crate::errors::SubjectflowError;
use crate::events::{EventSink, NoOpEventSink};
use crate::expand::IterationDomain;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

/// Fixed-size pool of execution slots.
///
/// A permit is held for the full duration of a node execution. Clones
/// share the same slots, so several runs can share one pool.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Creates a pool with `size` workers (at least one).
    #[must_use]
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// A pool sized to the available parallelism.
    #[must_use]
    pub fn from_available_parallelism() -> Self {
        Self::new(default_workers())
    }

    /// Total number of workers.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Workers currently idle.
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Takes an idle worker, if there is one.
    #[must_use]
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.semaphore.clone().try_acquire_owned().ok()
    }

    /// Waits for an idle worker.
    ///
    /// # Errors
    ///
    /// Returns [`SubjectflowError::Internal`] if the pool was closed.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, SubjectflowError> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| SubjectflowError::Internal(format!("worker pool closed: {e}")))
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::from_available_parallelism()
    }
}

pub(crate) fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

/// Everything one scheduler run needs besides the graph.
///
/// Runs never share hidden global state; two contexts with different
/// caches or pools are fully independent.
pub struct RunContext {
    run_id: Uuid,
    domain: IterationDomain,
    policy: FailurePolicy,
    cache: Arc<ArtifactCache>,
    pool: WorkerPool,
    retry: RetryConfig,
    node_timeout: Option<Duration>,
    work_dir: PathBuf,
    events: Arc<dyn EventSink>,
    cancel: Arc<CancellationToken>,
}

impl RunContext {
    /// Starts building a context for `domain`.
    #[must_use]
    pub fn builder(domain: IterationDomain) -> RunContextBuilder {
        RunContextBuilder::new(domain)
    }

    /// Run id.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Iteration domain.
    #[must_use]
    pub fn domain(&self) -> &IterationDomain {
        &self.domain
    }

    /// Failure policy.
    #[must_use]
    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Artifact cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<ArtifactCache> {
        &self.cache
    }

    /// Worker pool.
    #[must_use]
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Retry configuration.
    #[must_use]
    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    /// Per-node invocation timeout.
    #[must_use]
    pub fn node_timeout(&self) -> Option<Duration> {
        self.node_timeout
    }

    /// Root of the per-node working directories.
    #[must_use]
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Event sink.
    #[must_use]
    pub fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    /// Cancellation token.
    #[must_use]
    pub fn cancellation(&self) -> &Arc<CancellationToken> {
        &self.cancel
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("units", &self.domain.len())
            .field("policy", &self.policy)
            .field("workers", &self.pool.size())
            .field("work_dir", &self.work_dir)
            .finish_non_exhaustive()
    }
}

/// Builder for [`RunContext`].
pub struct RunContextBuilder {
    domain: IterationDomain,
    run_id: Option<Uuid>,
    policy: FailurePolicy,
    cache: Option<Arc<ArtifactCache>>,
    pool: Option<WorkerPool>,
    retry: RetryConfig,
    node_timeout: Option<Duration>,
    work_dir: Option<PathBuf>,
    events: Arc<dyn EventSink>,
    cancel: Option<Arc<CancellationToken>>,
}

impl RunContextBuilder {
    /// Creates a builder with default settings.
    #[must_use]
    pub fn new(domain: IterationDomain) -> Self {
        Self {
            domain,
            run_id: None,
            policy: FailurePolicy::default(),
            cache: None,
            pool: None,
            retry: RetryConfig::default(),
            node_timeout: None,
            work_dir: None,
            events: Arc::new(NoOpEventSink),
            cancel: None,
        }
    }

    /// Uses a fixed run id.
    #[must_use]
    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    /// Sets the failure policy.
    #[must_use]
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Uses a shared cache.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<ArtifactCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Uses a shared worker pool.
    #[must_use]
    pub fn with_pool(mut self, pool: WorkerPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Uses a private pool of `workers` workers.
    #[must_use]
    pub fn with_workers(self, workers: usize) -> Self {
        self.with_pool(WorkerPool::new(workers))
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Fails invocations that run longer than `timeout`.
    #[must_use]
    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = Some(timeout);
        self
    }

    /// Sets the working directory root.
    #[must_use]
    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(work_dir.into());
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Uses an external cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Builds the context.
    #[must_use]
    pub fn build(self) -> RunContext {
        RunContext {
            run_id: self.run_id.unwrap_or_else(Uuid::new_v4),
            domain: self.domain,
            policy: self.policy,
            cache: self
                .cache
                .unwrap_or_else(|| Arc::new(ArtifactCache::in_memory())),
            pool: self.pool.unwrap_or_default(),
            retry: self.retry,
            node_timeout: self.node_timeout,
            work_dir: self
                .work_dir
                .unwrap_or_else(|| std::env::temp_dir().join("subjectflow")),
            events: self.events,
            cancel: self.cancel.unwrap_or_default(),
        }
    }
}
