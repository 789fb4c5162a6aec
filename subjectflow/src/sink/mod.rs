//! Delivery of exported artifacts to persistent storage.

mod fs;

pub use fs::FsOutputSink;

use crate::core::Artifact;
use crate::errors::SinkError;
use crate::expand::UnitId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Namespace of an export slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotScope {
    /// Output of an iterated node, namespaced by its unit.
    Unit(UnitId),
    /// Output of a shared or join node.
    Group,
}

/// A logical output location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExportSlot {
    /// Namespace.
    pub scope: SlotScope,
    /// Slot name as declared on the graph.
    pub name: String,
}

impl ExportSlot {
    /// A unit-scoped slot.
    #[must_use]
    pub fn unit(unit: UnitId, name: impl Into<String>) -> Self {
        Self {
            scope: SlotScope::Unit(unit),
            name: name.into(),
        }
    }

    /// A group-scoped slot.
    #[must_use]
    pub fn group(name: impl Into<String>) -> Self {
        Self {
            scope: SlotScope::Group,
            name: name.into(),
        }
    }

    /// Stable key, `unit/<id>/<name>` or `group/<name>`.
    #[must_use]
    pub fn key(&self) -> String {
        match &self.scope {
            SlotScope::Unit(unit) => format!("unit/{unit}/{}", self.name),
            SlotScope::Group => format!("group/{}", self.name),
        }
    }
}

impl fmt::Display for ExportSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Receives exported artifacts.
///
/// The scheduler calls `deliver` at most once per slot and artifact, also
/// across runs that share a persistent cache, so implementations need not
/// deduplicate.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Places `artifact` into `slot`.
    async fn deliver(&self, slot: &ExportSlot, artifact: &Artifact) -> Result<(), SinkError>;
}

/// Sink that accepts and discards every artifact.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpOutputSink;

#[async_trait]
impl OutputSink for NoOpOutputSink {
    async fn deliver(&self, _slot: &ExportSlot, _artifact: &Artifact) -> Result<(), SinkError> {
        Ok(())
    }
}
