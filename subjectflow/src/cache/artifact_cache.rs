//! Fingerprint-keyed cache with at-most-once computation.
//!
//! Every fingerprint has a slot holding a `tokio::sync::watch` channel.
//! The first caller to look a fingerprint up owns the slot and either
//! finds a stored entry or receives a [`Reservation`]. Concurrent callers
//! subscribe to the slot and park until the owner commits or aborts.

use super::{ArtifactStore, CacheEntry, Fingerprint, InMemoryArtifactStore};
use crate::core::{ArtifactId, ArtifactSet};
use crate::errors::CacheError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
enum SlotState {
    Pending,
    Ready(Arc<CacheEntry>),
    Failed(CacheError),
}

type Slot = Arc<watch::Sender<SlotState>>;
type Slots = Arc<DashMap<Fingerprint, Slot>>;

/// Result of [`ArtifactCache::lookup_or_reserve`].
#[derive(Debug)]
pub enum CacheLookup {
    /// The outputs already exist.
    Hit(Arc<CacheEntry>),
    /// The caller must compute the outputs and then commit or abort.
    Reserved(Reservation),
}

/// Exclusive right to compute one fingerprint.
///
/// Dropping a reservation without settling it releases every parked waiter
/// with [`CacheError::Abandoned`].
pub struct Reservation {
    fingerprint: Fingerprint,
    slot: Slot,
    slots: Slots,
    settled: bool,
}

impl Reservation {
    /// The reserved fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    fn settle(&mut self, state: SlotState) {
        self.settled = true;
        self.slot.send_replace(state);
    }

    fn fail(&mut self, error: CacheError) {
        self.settle(SlotState::Failed(error));
        // Later lookups may retry the computation.
        self.slots
            .remove_if(&self.fingerprint, |_, slot| Arc::ptr_eq(slot, &self.slot));
    }
}

impl fmt::Debug for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("fingerprint", &self.fingerprint)
            .field("settled", &self.settled)
            .finish_non_exhaustive()
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.settled {
            let fingerprint = self.fingerprint.to_string();
            self.fail(CacheError::Abandoned { fingerprint });
        }
    }
}

/// Content-addressed artifact cache shared by every worker of a run.
pub struct ArtifactCache {
    slots: Slots,
    store: Arc<dyn ArtifactStore>,
}

impl ArtifactCache {
    /// Creates a cache over a store.
    #[must_use]
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            store,
        }
    }

    /// Creates a cache backed by an [`InMemoryArtifactStore`].
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryArtifactStore::new()))
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// Returns stored outputs, or reserves the fingerprint for the caller.
    ///
    /// For any fingerprint, at most one concurrent caller receives
    /// [`CacheLookup::Reserved`]. Everyone else waits for that caller and
    /// then observes its committed entry, or its failure.
    ///
    /// # Errors
    ///
    /// Returns the reserving caller's failure
    /// ([`CacheError::ComputationFailed`] or [`CacheError::Abandoned`]), or a
    /// storage error from the backing store.
    pub async fn lookup_or_reserve(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<CacheLookup, CacheError> {
        let (slot, owner) = match self.slots.entry(fingerprint.clone()) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let (tx, _rx) = watch::channel(SlotState::Pending);
                let slot = Arc::new(tx);
                entry.insert(slot.clone());
                (slot, true)
            }
        };

        if owner {
            let mut reservation = Reservation {
                fingerprint: fingerprint.clone(),
                slot,
                slots: self.slots.clone(),
                settled: false,
            };
            return match self.store.get(fingerprint).await {
                Ok(Some(entry)) => {
                    trace!(fingerprint = %fingerprint, "Loaded entry from store");
                    let entry = Arc::new(entry);
                    reservation.settle(SlotState::Ready(entry.clone()));
                    Ok(CacheLookup::Hit(entry))
                }
                Ok(None) => {
                    debug!(fingerprint = %fingerprint, "Reserved fingerprint");
                    Ok(CacheLookup::Reserved(reservation))
                }
                Err(e) => {
                    reservation.fail(e.clone());
                    Err(e)
                }
            };
        }

        let mut rx = slot.subscribe();
        trace!(fingerprint = %fingerprint, "Waiting on in-flight computation");
        let state = rx
            .wait_for(|state| !matches!(state, SlotState::Pending))
            .await
            .map_err(|_| CacheError::Abandoned {
                fingerprint: fingerprint.to_string(),
            })?
            .clone();

        match state {
            SlotState::Ready(entry) => Ok(CacheLookup::Hit(entry)),
            SlotState::Failed(e) => Err(e),
            SlotState::Pending => Err(CacheError::Abandoned {
                fingerprint: fingerprint.to_string(),
            }),
        }
    }

    /// Stores outputs for a reservation and wakes its waiters.
    ///
    /// # Errors
    ///
    /// Returns a storage error; waiters then observe the same error.
    pub async fn commit(
        &self,
        mut reservation: Reservation,
        task: &str,
        artifacts: ArtifactSet,
    ) -> Result<Arc<CacheEntry>, CacheError> {
        let entry = CacheEntry::new(reservation.fingerprint.clone(), task, artifacts);
        if let Err(e) = self.store.put(&entry).await {
            reservation.fail(e.clone());
            return Err(e);
        }

        debug!(fingerprint = %entry.fingerprint, task, "Committed cache entry");
        let entry = Arc::new(entry);
        reservation.settle(SlotState::Ready(entry.clone()));
        Ok(entry)
    }

    /// Releases a reservation after a failed computation.
    ///
    /// Parked waiters receive [`CacheError::ComputationFailed`]; nothing is
    /// stored, so a later lookup may try again.
    pub fn abort(&self, mut reservation: Reservation, reason: impl fmt::Display) {
        let fingerprint = reservation.fingerprint.to_string();
        debug!(fingerprint = %fingerprint, reason = %reason, "Aborted reservation");
        reservation.fail(CacheError::ComputationFailed {
            fingerprint,
            reason: reason.to_string(),
        });
    }

    /// Returns the committed entry for a fingerprint without reserving it.
    ///
    /// # Errors
    ///
    /// Returns a storage error from the backing store.
    pub async fn peek(&self, fingerprint: &Fingerprint) -> Result<Option<Arc<CacheEntry>>, CacheError> {
        if let Some(slot) = self.slots.get(fingerprint) {
            if let SlotState::Ready(entry) = &*slot.borrow() {
                return Ok(Some(entry.clone()));
            }
        }
        Ok(self.store.get(fingerprint).await?.map(Arc::new))
    }

    /// Returns true if `artifact` was already delivered to `slot_key`.
    ///
    /// # Errors
    ///
    /// Returns a storage error from the backing store.
    pub async fn is_exported(&self, slot_key: &str, artifact: &ArtifactId) -> Result<bool, CacheError> {
        Ok(self.store.exported(slot_key).await?.as_ref() == Some(artifact))
    }

    /// Records a successful delivery to `slot_key`.
    ///
    /// # Errors
    ///
    /// Returns a storage error from the backing store.
    pub async fn record_export(&self, slot_key: &str, artifact: &ArtifactId) -> Result<(), CacheError> {
        self.store.record_export(slot_key, artifact).await
    }
}

impl fmt::Debug for ArtifactCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactCache")
            .field("slots", &self.slots.len())
            .finish_non_exhaustive()
    }
}

impl Default for ArtifactCache {
    fn default() -> Self {
        Self::in_memory()
    }
}
