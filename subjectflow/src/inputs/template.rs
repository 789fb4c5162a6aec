//! File-name templates that locate source artifacts for each unit.

use super::RunInputs;
use crate::core::{Artifact, ArtifactKind};
use crate::errors::{MissingUnitInputError, SubjectflowError};
use crate::expand::{IterationDomain, UnitId};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Locates the outputs of one source task under a base directory.
///
/// Templates are relative paths in which `{unit}` is replaced by the unit
/// id, e.g. `{unit}/dwi/{unit}_dwi.nii.gz`. Located files are hashed, so
/// editing a file changes every downstream fingerprint.
#[derive(Debug, Clone)]
pub struct TemplateInputSource {
    base_dir: PathBuf,
    source: String,
    ports: BTreeMap<String, (String, ArtifactKind)>,
}

impl TemplateInputSource {
    /// Creates a source for the task named `source`.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>, source: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            source: source.into(),
            ports: BTreeMap::new(),
        }
    }

    /// Adds a port located by `template`.
    #[must_use]
    pub fn with_port(
        mut self,
        port: impl Into<String>,
        template: impl Into<String>,
        kind: impl Into<ArtifactKind>,
    ) -> Self {
        self.ports.insert(port.into(), (template.into(), kind.into()));
        self
    }

    /// The source task name.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The base directory.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Where `port` lives for `unit`, or for the shared source when `unit`
    /// is `None`.
    #[must_use]
    pub fn path_for(&self, unit: Option<&UnitId>, port: &str) -> Option<PathBuf> {
        let (template, _) = self.ports.get(port)?;
        let relative = match unit {
            Some(unit) => template.replace("{unit}", unit.as_str()),
            None => template.clone(),
        };
        Some(self.base_dir.join(relative))
    }

    /// Hashes every port for every unit of `domain` into `inputs`.
    ///
    /// # Errors
    ///
    /// Returns [`SubjectflowError::MissingUnitInput`] for the first file that
    /// does not exist, or an I/O error when a file cannot be read.
    pub async fn resolve(
        &self,
        domain: &IterationDomain,
        inputs: &mut RunInputs,
    ) -> Result<(), SubjectflowError> {
        for unit in domain {
            for port in self.ports.keys() {
                let artifact = self.load(Some(unit), port).await?;
                inputs.insert_unit(unit.clone(), self.source.clone(), port.clone(), artifact);
            }
        }
        Ok(())
    }

    /// Hashes every port once and supplies them as a shared source.
    ///
    /// # Errors
    ///
    /// Same as [`TemplateInputSource::resolve`].
    pub async fn resolve_shared(&self, inputs: &mut RunInputs) -> Result<(), SubjectflowError> {
        for port in self.ports.keys() {
            let artifact = self.load(None, port).await?;
            inputs.insert_shared(self.source.clone(), port.clone(), artifact);
        }
        Ok(())
    }

    async fn load(&self, unit: Option<&UnitId>, port: &str) -> Result<Artifact, SubjectflowError> {
        let missing = || MissingUnitInputError {
            unit: unit.map(ToString::to_string),
            source_node: self.source.clone(),
            port: port.to_string(),
        };
        let (path, kind) = match (self.path_for(unit, port), self.ports.get(port)) {
            (Some(path), Some((_, kind))) => (path, kind.clone()),
            _ => return Err(missing().into()),
        };

        if !tokio::fs::try_exists(&path).await? {
            return Err(missing().into());
        }

        let artifact = Artifact::from_file(&path, kind).await?;
        debug!(
            source = %self.source,
            port,
            unit = unit.map(UnitId::as_str),
            id = %artifact.id,
            "Resolved unit input"
        );
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ArtifactId;

    #[tokio::test]
    async fn test_resolves_files_per_unit() {
        let dir = tempfile::tempdir().unwrap();
        for unit in ["sub-01", "sub-02"] {
            let folder = dir.path().join(unit);
            tokio::fs::create_dir_all(&folder).await.unwrap();
            tokio::fs::write(folder.join(format!("{unit}_dwi.mif")), unit)
                .await
                .unwrap();
        }

        let source = TemplateInputSource::new(dir.path(), "subject").with_port(
            "dwi",
            "{unit}/{unit}_dwi.mif",
            "image",
        );
        let domain = IterationDomain::new(["sub-01", "sub-02"]).unwrap();
        let mut inputs = RunInputs::new();
        source.resolve(&domain, &mut inputs).await.unwrap();

        let set = inputs.unit_inputs(&"sub-02".into(), "subject").unwrap();
        let dwi = &set["dwi"];
        assert_eq!(dwi.location, dir.path().join("sub-02/sub-02_dwi.mif"));
        assert_eq!(dwi.id, ArtifactId::from_bytes(b"sub-02"));
        assert_eq!(dwi.kind.as_str(), "image");
    }

    #[tokio::test]
    async fn test_missing_file_names_unit_and_port() {
        let dir = tempfile::tempdir().unwrap();
        let source =
            TemplateInputSource::new(dir.path(), "subject").with_port("dwi", "{unit}.mif", "any");
        let domain = IterationDomain::new(["sub-09"]).unwrap();

        let err = source
            .resolve(&domain, &mut RunInputs::new())
            .await
            .unwrap_err();
        match err {
            SubjectflowError::MissingUnitInput(e) => {
                assert_eq!(e.unit.as_deref(), Some("sub-09"));
                assert_eq!(e.port, "dwi");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_shared_template() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("atlas.nii"), b"atlas")
            .await
            .unwrap();

        let source =
            TemplateInputSource::new(dir.path(), "atlas").with_port("image", "atlas.nii", "any");
        let mut inputs = RunInputs::new();
        source.resolve_shared(&mut inputs).await.unwrap();

        assert!(inputs.shared_inputs("atlas").unwrap().contains_key("image"));
        assert_eq!(source.path_for(None, "image"), Some(dir.path().join("atlas.nii")));
    }
}
