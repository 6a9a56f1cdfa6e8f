//! Operation registry: identifier -> in-flight handle.
//!
//! The registry also owns the poller's activity flag so that "registry is
//! empty" and "poller is inactive" always change together under one lock.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use pollbridge_core::OperationHandle;

/// Outcome of inserting an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Insertion {
    /// An entry with the same identifier was overwritten.
    pub replaced: bool,
    /// The poller was inactive; the caller must start the poller with this generation.
    pub start_generation: Option<u64>,
}

/// Settled entries removed by one scan.
#[derive(Debug, Default)]
pub(crate) struct Sweep {
    /// Removed entries in identifier order.
    pub settled: Vec<(String, OperationHandle)>,
    /// The registry is empty after this scan and the poller was deactivated.
    pub drained: bool,
    /// The scanning poller generation is no longer current; nothing was scanned.
    pub stale: bool,
}

#[derive(Debug, Default)]
struct RegistryInner {
    entries: BTreeMap<String, OperationHandle>,
    poller_active: bool,
    generation: u64,
}

/// Lock-guarded map of in-flight operations.
///
/// Every method takes the lock for the duration of a single lookup, insert
/// or scan. Nothing is ever dispatched while the lock is held.
#[derive(Debug, Default)]
pub struct OperationRegistry {
    inner: Mutex<RegistryInner>,
}

impl OperationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites `identifier` and activates the poller if needed.
    pub(crate) fn insert(&self, identifier: String, handle: OperationHandle) -> Insertion {
        let mut inner = self.inner.lock();
        let replaced = inner.entries.insert(identifier, handle).is_some();
        let start_generation = if inner.poller_active {
            None
        } else {
            inner.poller_active = true;
            inner.generation += 1;
            Some(inner.generation)
        };
        Insertion {
            replaced,
            start_generation,
        }
    }

    /// Removes every settled entry.
    ///
    /// With `Some(generation)` the scan only runs if that poller generation is
    /// still the active one. A scan that leaves the registry empty deactivates
    /// the poller.
    pub(crate) fn sweep(&self, generation: Option<u64>) -> Sweep {
        let mut inner = self.inner.lock();
        if let Some(generation) = generation {
            if !inner.poller_active || inner.generation != generation {
                return Sweep {
                    stale: true,
                    ..Sweep::default()
                };
            }
        }

        let keys: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, handle)| !handle.status().is_pending())
            .map(|(key, _)| key.clone())
            .collect();

        let mut settled = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(handle) = inner.entries.remove(&key) {
                settled.push((key, handle));
            }
        }

        let drained = inner.entries.is_empty() && inner.poller_active;
        if drained {
            inner.poller_active = false;
        }

        Sweep {
            settled,
            drained,
            stale: false,
        }
    }

    /// Marks the poller of `generation` inactive (it failed to start or was stopped).
    pub(crate) fn deactivate(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation == generation {
            inner.poller_active = false;
        }
    }

    /// Deactivates whatever poller generation is current.
    pub(crate) fn deactivate_all(&self) {
        self.inner.lock().poller_active = false;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    #[must_use]
    pub fn contains(&self, identifier: &str) -> bool {
        self.inner.lock().entries.contains_key(identifier)
    }

    /// Returns the handle currently registered under `identifier`.
    #[must_use]
    pub fn get(&self, identifier: &str) -> Option<OperationHandle> {
        self.inner.lock().entries.get(identifier).cloned()
    }

    #[must_use]
    pub fn is_poller_active(&self) -> bool {
        self.inner.lock().poller_active
    }
}
