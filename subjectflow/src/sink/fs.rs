//! Filesystem output sink.

use super::{ExportSlot, OutputSink, SlotScope};
use crate::core::Artifact;
use crate::errors::SinkError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Copies exported artifacts below a base directory.
///
/// Unit slots land in `<base>/<unit>/<slot>/<file>`, group slots in
/// `<base>/group/<slot>/<file>`. Substitutions are applied in order to the
/// relative path before it is joined to the base.
#[derive(Debug, Clone)]
pub struct FsOutputSink {
    base_dir: PathBuf,
    substitutions: Vec<(String, String)>,
}

impl FsOutputSink {
    /// Creates a sink writing below `base_dir`.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            substitutions: Vec::new(),
        }
    }

    /// Adds a path substitution.
    #[must_use]
    pub fn with_substitution(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.substitutions.push((from.into(), to.into()));
        self
    }

    /// Adds several path substitutions, applied after existing ones.
    #[must_use]
    pub fn with_substitutions(mut self, pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        self.substitutions.extend(pairs);
        self
    }

    /// The base directory.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Destination of `artifact` in `slot`.
    #[must_use]
    pub fn destination(&self, slot: &ExportSlot, artifact: &Artifact) -> PathBuf {
        let file = artifact
            .location
            .file_name()
            .map_or_else(|| slot.name.clone(), |f| f.to_string_lossy().into_owned());
        let scope = match &slot.scope {
            SlotScope::Unit(unit) => unit.as_str(),
            SlotScope::Group => "group",
        };

        let mut relative = format!("{scope}/{}/{file}", slot.name);
        for (from, to) in &self.substitutions {
            relative = relative.replace(from.as_str(), to);
        }
        self.base_dir.join(relative)
    }
}

#[async_trait]
impl OutputSink for FsOutputSink {
    async fn deliver(&self, slot: &ExportSlot, artifact: &Artifact) -> Result<(), SinkError> {
        let error = |message: String| SinkError {
            slot: slot.key(),
            message,
        };

        let destination = self.destination(slot, artifact);
        let parent = destination
            .parent()
            .ok_or_else(|| error(format!("invalid destination {}", destination.display())))?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| error(format!("cannot create {}: {e}", parent.display())))?;

        let tmp = parent.join(format!(".{}.tmp", Uuid::new_v4()));
        if let Err(e) = tokio::fs::copy(&artifact.location, &tmp).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(error(format!(
                "cannot copy {}: {e}",
                artifact.location.display()
            )));
        }
        tokio::fs::rename(&tmp, &destination)
            .await
            .map_err(|e| error(format!("cannot write {}: {e}", destination.display())))?;

        debug!(slot = %slot, destination = %destination.display(), "Delivered export");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ArtifactId, ArtifactKind};

    fn artifact(path: PathBuf) -> Artifact {
        Artifact::new(ArtifactId::new("id"), path, ArtifactKind::any())
    }

    #[tokio::test]
    async fn test_unit_and_group_layout() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let file = src.path().join("fod.mif");
        tokio::fs::write(&file, b"fod").await.unwrap();

        let sink = FsOutputSink::new(out.path());
        sink.deliver(&ExportSlot::unit("sub-01".into(), "wm_fod"), &artifact(file.clone()))
            .await
            .unwrap();
        sink.deliver(&ExportSlot::group("response"), &artifact(file))
            .await
            .unwrap();

        let unit = out.path().join("sub-01/wm_fod/fod.mif");
        assert_eq!(tokio::fs::read(&unit).await.unwrap(), b"fod");
        assert!(out.path().join("group/response/fod.mif").exists());
    }

    #[test]
    fn test_substitutions_apply_in_order() {
        let sink = FsOutputSink::new("/out")
            .with_substitution("wm_fod/", "")
            .with_substitution("sub-01", "sub-01/dwi");
        let dest = sink.destination(
            &ExportSlot::unit("sub-01".into(), "wm_fod"),
            &artifact(PathBuf::from("/work/fit/abc/fod.mif")),
        );
        assert_eq!(dest, PathBuf::from("/out/sub-01/dwi/fod.mif"));
    }

    #[tokio::test]
    async fn test_missing_artifact_is_sink_error() {
        let out = tempfile::tempdir().unwrap();
        let sink = FsOutputSink::new(out.path());
        let err = sink
            .deliver(
                &ExportSlot::group("x"),
                &artifact(out.path().join("does-not-exist")),
            )
            .await
            .unwrap_err();
        assert_eq!(err.slot, "group/x");
        assert!(err.message.starts_with("cannot copy"));
    }
}
