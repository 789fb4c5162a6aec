//! Content-addressed artifact cache.
//!
//! Nodes are identified by a [`Fingerprint`] over their task identity,
//! parameters and input artifact ids. The [`ArtifactCache`] guarantees that
//! each fingerprint is computed at most once, even under concurrency, and
//! persists committed outputs through an [`ArtifactStore`].

mod artifact_cache;
mod fingerprint;
mod store;

pub use artifact_cache::{ArtifactCache, CacheLookup, Reservation};
pub use fingerprint::{canonical_json, Fingerprint};
pub use store::{ArtifactStore, CacheEntry, FsArtifactStore, InMemoryArtifactStore};
