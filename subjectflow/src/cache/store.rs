//! Persistent backends for cache entries and the export ledger.

use super::Fingerprint;
use crate::core::{ArtifactId, ArtifactSet};
use crate::errors::CacheError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Outputs of one committed execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The execution fingerprint.
    pub fingerprint: Fingerprint,
    /// Name of the task that produced the entry.
    pub task: String,
    /// Produced artifacts keyed by output port.
    pub artifacts: ArtifactSet,
    /// When the entry was committed.
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Creates a new entry stamped with the current time.
    #[must_use]
    pub fn new(fingerprint: Fingerprint, task: impl Into<String>, artifacts: ArtifactSet) -> Self {
        Self {
            fingerprint,
            task: task.into(),
            artifacts,
            created_at: Utc::now(),
        }
    }
}

/// Storage backend for the artifact cache.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Loads the entry for a fingerprint, if one is stored and still usable.
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>, CacheError>;

    /// Stores an entry, replacing any previous one.
    async fn put(&self, entry: &CacheEntry) -> Result<(), CacheError>;

    /// Removes the entry for a fingerprint.
    async fn remove(&self, fingerprint: &Fingerprint) -> Result<(), CacheError>;

    /// The artifact last delivered to an export slot.
    async fn exported(&self, slot_key: &str) -> Result<Option<ArtifactId>, CacheError>;

    /// Records that `artifact` was delivered to an export slot.
    async fn record_export(&self, slot_key: &str, artifact: &ArtifactId) -> Result<(), CacheError>;
}

/// In-memory store, lost when the process exits.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    entries: Arc<Mutex<HashMap<Fingerprint, CacheEntry>>>,
    exports: Arc<Mutex<HashMap<String, ArtifactId>>>,
}

impl InMemoryArtifactStore {
    /// Creates a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.entries.lock().get(fingerprint).cloned())
    }

    async fn put(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        self.entries
            .lock()
            .insert(entry.fingerprint.clone(), entry.clone());
        Ok(())
    }

    async fn remove(&self, fingerprint: &Fingerprint) -> Result<(), CacheError> {
        self.entries.lock().remove(fingerprint);
        Ok(())
    }

    async fn exported(&self, slot_key: &str) -> Result<Option<ArtifactId>, CacheError> {
        Ok(self.exports.lock().get(slot_key).cloned())
    }

    async fn record_export(&self, slot_key: &str, artifact: &ArtifactId) -> Result<(), CacheError> {
        self.exports
            .lock()
            .insert(slot_key.to_string(), artifact.clone());
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ExportRecord {
    slot: String,
    artifact: ArtifactId,
}

/// Directory-backed store: one JSON record per fingerprint.
///
/// Layout under the root:
/// - `entries/<fingerprint>.json`
/// - `exports/<sha256(slot key)>.json`
///
/// An entry whose artifact files no longer exist is treated as a miss.
/// Records are written to a temporary file and renamed into place.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Opens (and creates) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        for dir in ["entries", "exports"] {
            tokio::fs::create_dir_all(root.join(dir))
                .await
                .map_err(|e| CacheError::io(root.display().to_string(), &e))?;
        }
        Ok(Self { root })
    }

    /// The store root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root
            .join("entries")
            .join(format!("{}.json", fingerprint.as_str()))
    }

    fn export_path(&self, slot_key: &str) -> PathBuf {
        let name = hex::encode(Sha256::digest(slot_key.as_bytes()));
        self.root.join("exports").join(format!("{name}.json"))
    }

    async fn write_atomic(&self, path: &Path, key: &str, bytes: Vec<u8>) -> Result<(), CacheError> {
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| CacheError::io(key, &e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| CacheError::io(key, &e))
    }

    async fn read_optional(path: &Path, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::io(key, &e)),
        }
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>, CacheError> {
        let Some(bytes) = Self::read_optional(&self.entry_path(fingerprint), fingerprint.as_str()).await?
        else {
            return Ok(None);
        };

        let entry: CacheEntry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(fingerprint = %fingerprint, error = %e, "Ignoring unreadable cache record");
                return Ok(None);
            }
        };

        for artifact in entry.artifacts.values() {
            if !tokio::fs::try_exists(&artifact.location).await.unwrap_or(false) {
                debug!(
                    fingerprint = %fingerprint,
                    location = %artifact.location.display(),
                    "Cached artifact is gone, treating as miss"
                );
                return Ok(None);
            }
        }

        Ok(Some(entry))
    }

    async fn put(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let key = entry.fingerprint.as_str();
        let bytes = serde_json::to_vec_pretty(entry).map_err(|e| CacheError::Serialization {
            fingerprint: key.to_string(),
            message: e.to_string(),
        })?;
        self.write_atomic(&self.entry_path(&entry.fingerprint), key, bytes)
            .await
    }

    async fn remove(&self, fingerprint: &Fingerprint) -> Result<(), CacheError> {
        match tokio::fs::remove_file(self.entry_path(fingerprint)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::io(fingerprint.as_str(), &e)),
        }
    }

    async fn exported(&self, slot_key: &str) -> Result<Option<ArtifactId>, CacheError> {
        let Some(bytes) = Self::read_optional(&self.export_path(slot_key), slot_key).await? else {
            return Ok(None);
        };
        let record: ExportRecord =
            serde_json::from_slice(&bytes).map_err(|e| CacheError::Serialization {
                fingerprint: slot_key.to_string(),
                message: e.to_string(),
            })?;
        Ok(Some(record.artifact))
    }

    async fn record_export(&self, slot_key: &str, artifact: &ArtifactId) -> Result<(), CacheError> {
        let record = ExportRecord {
            slot: slot_key.to_string(),
            artifact: artifact.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&record).map_err(|e| CacheError::Serialization {
            fingerprint: slot_key.to_string(),
            message: e.to_string(),
        })?;
        self.write_atomic(&self.export_path(slot_key), slot_key, bytes)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Artifact, ArtifactKind};

    fn entry(fp: &str, location: &Path) -> CacheEntry {
        let artifacts: ArtifactSet = [(
            "out".to_string(),
            Artifact::new(ArtifactId::new("a1"), location, ArtifactKind::any()),
        )]
        .into();
        CacheEntry::new(Fingerprint::from_hex(fp), "extract", artifacts)
    }

    #[tokio::test]
    async fn test_in_memory_store_roundtrip() {
        let store = InMemoryArtifactStore::new();
        let e = entry("f1", Path::new("/tmp/x"));

        assert!(store.get(&e.fingerprint).await.unwrap().is_none());
        store.put(&e).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&e.fingerprint).await.unwrap(), Some(e.clone()));

        store.remove(&e.fingerprint).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_in_memory_export_ledger() {
        let store = InMemoryArtifactStore::new();
        assert!(store.exported("sub-01/fod").await.unwrap().is_none());

        store
            .record_export("sub-01/fod", &ArtifactId::new("a1"))
            .await
            .unwrap();
        assert_eq!(
            store.exported("sub-01/fod").await.unwrap(),
            Some(ArtifactId::new("a1"))
        );
    }

    #[tokio::test]
    async fn test_fs_store_persists_entries() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("out.mif");
        tokio::fs::write(&artifact, b"data").await.unwrap();
        let e = entry("f2", &artifact);

        let store = FsArtifactStore::open(dir.path().join("cache")).await.unwrap();
        store.put(&e).await.unwrap();

        let reopened = FsArtifactStore::open(dir.path().join("cache")).await.unwrap();
        assert_eq!(reopened.get(&e.fingerprint).await.unwrap(), Some(e.clone()));

        reopened.remove(&e.fingerprint).await.unwrap();
        assert!(reopened.get(&e.fingerprint).await.unwrap().is_none());
        reopened.remove(&e.fingerprint).await.unwrap();
    }

    #[tokio::test]
    async fn test_fs_store_misses_when_artifact_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("out.mif");
        tokio::fs::write(&artifact, b"data").await.unwrap();
        let e = entry("f3", &artifact);

        let store = FsArtifactStore::open(dir.path().join("cache")).await.unwrap();
        store.put(&e).await.unwrap();
        tokio::fs::remove_file(&artifact).await.unwrap();

        assert!(store.get(&e.fingerprint).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fs_store_ignores_corrupt_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::open(dir.path()).await.unwrap();
        let fp = Fingerprint::from_hex("f4");
        tokio::fs::write(store.entry_path(&fp), b"{not json")
            .await
            .unwrap();

        assert!(store.get(&fp).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fs_export_ledger_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::open(dir.path()).await.unwrap();
        store
            .record_export("group/wm_response", &ArtifactId::new("r1"))
            .await
            .unwrap();

        let reopened = FsArtifactStore::open(dir.path()).await.unwrap();
        assert_eq!(
            reopened.exported("group/wm_response").await.unwrap(),
            Some(ArtifactId::new("r1"))
        );
        assert!(reopened.exported("group/other").await.unwrap().is_none());
    }
}
