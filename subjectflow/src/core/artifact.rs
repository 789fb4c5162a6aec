//! Artifact identity and location types.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;

/// Semantic type tag of an artifact, checked when ports are connected.
///
/// The special kind `any` is compatible with every other kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactKind(String);

impl ArtifactKind {
    /// Name of the wildcard kind.
    pub const ANY: &'static str = "any";

    /// Creates a kind from a tag.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    /// The wildcard kind.
    #[must_use]
    pub fn any() -> Self {
        Self(Self::ANY.to_string())
    }

    /// Returns true for the wildcard kind.
    #[must_use]
    pub fn is_any(&self) -> bool {
        self.0 == Self::ANY
    }

    /// Returns true when a producer of `self` may feed a consumer of `other`.
    #[must_use]
    pub fn compatible_with(&self, other: &Self) -> bool {
        self.is_any() || other.is_any() || self == other
    }

    /// Returns the tag.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ArtifactKind {
    fn default() -> Self {
        Self::any()
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ArtifactKind {
    fn from(kind: &str) -> Self {
        Self::new(kind)
    }
}

impl From<String> for ArtifactKind {
    fn from(kind: String) -> Self {
        Self::new(kind)
    }
}

/// Content-derived identifier of an artifact (lowercase hex SHA-256).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(String);

impl ArtifactId {
    /// Wraps an already computed identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Hashes raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    /// Hashes the content of a file without loading it whole.
    pub async fn from_file(path: &Path) -> std::io::Result<Self> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0_u8; 64 * 1024];
        loop {
            let read = file.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            hasher.update(&buf[..read]);
        }
        Ok(Self(hex::encode(hasher.finalize())))
    }

    /// Returns the identifier string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A produced or supplied file, identified by content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Identifier that feeds downstream fingerprints.
    pub id: ArtifactId,
    /// Where the artifact lives on disk.
    pub location: PathBuf,
    /// Kind declared by the producing port.
    #[serde(default)]
    pub kind: ArtifactKind,
}

impl Artifact {
    /// Creates a new artifact.
    #[must_use]
    pub fn new(id: ArtifactId, location: impl Into<PathBuf>, kind: ArtifactKind) -> Self {
        Self {
            id,
            location: location.into(),
            kind,
        }
    }

    /// Creates an artifact by hashing the file at `location`.
    pub async fn from_file(location: impl Into<PathBuf>, kind: ArtifactKind) -> std::io::Result<Self> {
        let location = location.into();
        let id = ArtifactId::from_file(&location).await?;
        Ok(Self { id, location, kind })
    }
}

/// Artifacts keyed by output port name.
pub type ArtifactSet = BTreeMap<String, Artifact>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_compatibility() {
        let volume = ArtifactKind::new("nifti");
        let table = ArtifactKind::new("tsv");

        assert!(volume.compatible_with(&volume));
        assert!(!volume.compatible_with(&table));
        assert!(ArtifactKind::any().compatible_with(&table));
        assert!(table.compatible_with(&ArtifactKind::default()));
    }

    #[test]
    fn test_artifact_id_from_bytes_is_stable() {
        let a = ArtifactId::from_bytes(b"hello");
        let b = ArtifactId::from_bytes(b"hello");
        let c = ArtifactId::from_bytes(b"hello!");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);
    }

    #[tokio::test]
    async fn test_artifact_id_from_file_matches_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.txt");
        tokio::fs::write(&path, b"voxel data").await.unwrap();

        let id = ArtifactId::from_file(&path).await.unwrap();
        assert_eq!(id, ArtifactId::from_bytes(b"voxel data"));
    }

    #[tokio::test]
    async fn test_artifact_from_missing_file_fails() {
        let err = Artifact::from_file("/nonexistent/file.nii", ArtifactKind::any()).await;
        assert!(err.is_err());
    }
}
