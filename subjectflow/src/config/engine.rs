//! Engine settings.

use crate::cache::{ArtifactCache, FsArtifactStore};
use crate::errors::SubjectflowError;
use crate::expand::IterationDomain;
use crate::scheduler::{default_workers, FailurePolicy, RetryConfig, RunContext, RunContextBuilder};
use crate::sink::{FsOutputSink, NoOpOutputSink, OutputSink};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Environment variable overriding [`EngineConfig::workers`].
pub const WORKERS_ENV: &str = "SUBJECTFLOW_WORKERS";

fn default_work_dir() -> PathBuf {
    PathBuf::from("work")
}

/// Settings for one engine run.
///
/// Every field has a default, so a config file only needs the keys it
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of concurrent node executions.
    pub workers: usize,
    /// What happens after a node fails.
    pub failure_policy: FailurePolicy,
    /// Re-invocation of failed nodes.
    pub retry: RetryConfig,
    /// Per-node invocation timeout in seconds.
    pub node_timeout_secs: Option<u64>,
    /// Root of the per-node working directories.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// Directory of the persistent artifact cache; in-memory when unset.
    pub cache_dir: Option<PathBuf>,
    /// Directory exported outputs are copied to; exports are discarded when
    /// unset.
    pub output_dir: Option<PathBuf>,
    /// Ordered replacements applied to export paths.
    pub substitutions: Vec<(String, String)>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            failure_policy: FailurePolicy::default(),
            retry: RetryConfig::default(),
            node_timeout_secs: None,
            work_dir: default_work_dir(),
            cache_dir: None,
            output_dir: None,
            substitutions: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SubjectflowError::Serialization`] for malformed JSON.
    pub fn from_json_str(json: &str) -> Result<Self, SubjectflowError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`SubjectflowError::Io`] if the file cannot be read and
    /// [`SubjectflowError::Serialization`] for malformed JSON.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SubjectflowError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Applies overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`SubjectflowError::Config`] for an unparsable value.
    pub fn with_env_overrides(self) -> Result<Self, SubjectflowError> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides looked up through `var`.
    ///
    /// # Errors
    ///
    /// Returns [`SubjectflowError::Config`] for an unparsable value.
    pub fn with_overrides_from(
        mut self,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, SubjectflowError> {
        if let Some(value) = var(WORKERS_ENV) {
            self.workers = value.trim().parse().map_err(|_| {
                SubjectflowError::Config(format!("{WORKERS_ENV} must be a positive integer, got '{value}'"))
            })?;
        }
        Ok(self)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`SubjectflowError::Config`] describing the first problem.
    pub fn validate(&self) -> Result<(), SubjectflowError> {
        if self.workers == 0 {
            return Err(SubjectflowError::Config("workers must be at least 1".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(SubjectflowError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.node_timeout_secs == Some(0) {
            return Err(SubjectflowError::Config(
                "node_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Per-node timeout as a duration.
    #[must_use]
    pub fn node_timeout(&self) -> Option<Duration> {
        self.node_timeout_secs.map(Duration::from_secs)
    }

    /// Opens the configured artifact cache.
    ///
    /// # Errors
    ///
    /// Returns [`SubjectflowError::Cache`] if the cache directory cannot be
    /// created.
    pub async fn open_cache(&self) -> Result<ArtifactCache, SubjectflowError> {
        Ok(match &self.cache_dir {
            Some(dir) => ArtifactCache::new(Arc::new(FsArtifactStore::open(dir).await?)),
            None => ArtifactCache::in_memory(),
        })
    }

    /// Builds the configured output sink.
    #[must_use]
    pub fn output_sink(&self) -> Arc<dyn OutputSink> {
        match &self.output_dir {
            Some(dir) => Arc::new(
                FsOutputSink::new(dir).with_substitutions(self.substitutions.iter().cloned()),
            ),
            None => Arc::new(NoOpOutputSink),
        }
    }

    /// A run context builder carrying these settings.
    ///
    /// The cache, event sink and cancellation token are left to the caller.
    #[must_use]
    pub fn context_builder(&self, domain: IterationDomain) -> RunContextBuilder {
        let builder = RunContext::builder(domain)
            .with_workers(self.workers)
            .with_policy(self.failure_policy)
            .with_retry(self.retry.clone())
            .with_work_dir(&self.work_dir);
        match self.node_timeout() {
            Some(timeout) => builder.with_node_timeout(timeout),
            None => builder,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::BackoffStrategy;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{
                "workers": 3,
                "failure_policy": "fail_fast",
                "retry": { "max_attempts": 2, "backoff": "linear" },
                "substitutions": [["sub-", "subject-"]]
            }"#,
        )
        .unwrap();

        assert_eq!(config.workers, 3);
        assert_eq!(config.failure_policy, FailurePolicy::FailFast);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.backoff, BackoffStrategy::Linear);
        assert_eq!(config.work_dir, PathBuf::from("work"));
        assert!(config.cache_dir.is_none());
        assert_eq!(
            config.substitutions,
            vec![("sub-".to_string(), "subject-".to_string())]
        );
    }

    #[test]
    fn test_default_policy_is_best_effort() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config.failure_policy, FailurePolicy::BestEffort);
        assert_eq!(config.retry.max_attempts, 1);
        assert!(config.workers >= 1);
    }

    #[test]
    fn test_workers_override() {
        let config = EngineConfig::new()
            .with_overrides_from(|key| (key == WORKERS_ENV).then(|| "7".to_string()))
            .unwrap();
        assert_eq!(config.workers, 7);

        let err = EngineConfig::new()
            .with_overrides_from(|_| Some("many".to_string()))
            .unwrap_err();
        assert!(matches!(err, SubjectflowError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = EngineConfig {
            workers: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{ "node_timeout_secs": 60, "output_dir": "out" }"#).unwrap();

        let config = EngineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.node_timeout(), Some(Duration::from_secs(60)));
        assert_eq!(config.output_dir, Some(PathBuf::from("out")));

        let domain = IterationDomain::new(["a"]).unwrap();
        let ctx = config.context_builder(domain).build();
        assert_eq!(ctx.node_timeout(), Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_open_persistent_cache() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            cache_dir: Some(dir.path().join("cache")),
            ..EngineConfig::default()
        };
        config.open_cache().await.unwrap();
        assert!(dir.path().join("cache/entries").is_dir());
    }
}
