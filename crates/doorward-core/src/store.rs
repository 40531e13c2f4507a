//! Published gallery holder.
//!
//! Readers get an `Arc` to a complete snapshot; a publish swaps the pointer
//! under a write lock held only for the swap itself.

use crate::types::Snapshot;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Clone)]
struct Published {
    generation: u64,
    snapshot: Arc<Snapshot>,
}

/// Holds the currently published [`Snapshot`].
pub struct GalleryStore {
    current: RwLock<Published>,
}

impl GalleryStore {
    /// Store publishing `initial` as generation 0.
    pub fn new(initial: Snapshot) -> Self {
        Self {
            current: RwLock::new(Published {
                generation: 0,
                snapshot: Arc::new(initial),
            }),
        }
    }

    pub fn empty() -> Self {
        Self::new(Snapshot::empty())
    }

    /// The current snapshot. Never blocks on a rebuild in progress.
    pub fn read(&self) -> Arc<Snapshot> {
        self.read_versioned().1
    }

    /// The current snapshot together with its generation.
    pub fn read_versioned(&self) -> (u64, Arc<Snapshot>) {
        // The guarded value is always a whole `Published`, so a poisoned lock
        // still holds a consistent snapshot.
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        (guard.generation, Arc::clone(&guard.snapshot))
    }

    pub fn generation(&self) -> u64 {
        self.read_versioned().0
    }

    /// Replace the published snapshot and return the new generation.
    pub fn publish(&self, snapshot: impl Into<Arc<Snapshot>>) -> u64 {
        let next = snapshot.into();
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let generation = guard.generation + 1;
        let previous = std::mem::replace(
            &mut *guard,
            Published {
                generation,
                snapshot: next,
            },
        );
        drop(guard);
        // Last reference to the old snapshot may be freed here, outside the lock.
        drop(previous);
        generation
    }
}

impl Default for GalleryStore {
    fn default() -> Self {
        Self::empty()
    }
}
