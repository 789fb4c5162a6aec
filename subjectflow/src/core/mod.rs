//! Core domain model types for subjectflow.
//!
//! This module contains the value types shared by every layer:
//! - Artifact identity, kind and location
//! - Node lifecycle states

mod artifact;
mod status;

pub use artifact::{Artifact, ArtifactId, ArtifactKind, ArtifactSet};
pub use status::NodeState;
