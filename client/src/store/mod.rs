//! Durable per-user snapshot storage.
//!
//! A [`SnapshotStore`] persists one [`Snapshot`] per owner. [`Snapshots`]
//! sits in front of it and serializes every read-modify-write for a given
//! owner, so queue appends from the UI and the coordinator's bookkeeping
//! never overwrite each other.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tally_engine::{OwnerId, Snapshot};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::StoreError;

/// Persistent key-value storage for snapshots, keyed by owner.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Load the snapshot for `owner`, or an empty one if none was saved.
    async fn load(&self, owner: &str) -> Result<Snapshot, StoreError>;

    /// Durably replace the snapshot for `owner`.
    async fn save(&self, owner: &str, snapshot: &Snapshot) -> Result<(), StoreError>;

    /// Forget everything stored for `owner`.
    async fn clear(&self, owner: &str) -> Result<(), StoreError>;
}

/// Identifies one lifetime of an owner's snapshot, from first use until
/// [`Snapshots::clear`].
pub type Generation = u64;

struct Slot {
    generation: Generation,
    retired: bool,
    snapshot: Option<Snapshot>,
}

type Cell = Arc<Mutex<Slot>>;

/// Cached, lock-protected access to a [`SnapshotStore`].
///
/// The cached copy always equals what was last persisted: an update works
/// on a clone and only replaces the cache after the store accepted it.
pub struct Snapshots {
    store: Arc<dyn SnapshotStore>,
    cells: DashMap<OwnerId, Cell>,
    next_generation: AtomicU64,
}

impl Snapshots {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            store,
            cells: DashMap::new(),
            next_generation: AtomicU64::new(0),
        }
    }

    pub fn new_shared(store: Arc<dyn SnapshotStore>) -> Arc<Self> {
        Arc::new(Self::new(store))
    }

    fn cell(&self, owner: &str) -> Cell {
        Arc::clone(&self.cells.entry(owner.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(Slot {
                generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
                retired: false,
                snapshot: None,
            }))
        }))
    }

    /// Lock the live slot for `owner`. A slot retired by `clear` while we
    /// waited is skipped in favour of its replacement.
    async fn lock(&self, owner: &str) -> (Cell, OwnedMutexGuard<Slot>) {
        loop {
            let cell = self.cell(owner);
            let slot = Arc::clone(&cell).lock_owned().await;
            if !slot.retired {
                return (cell, slot);
            }
        }
    }

    async fn current(&self, owner: &str, slot: &mut Slot) -> Result<Snapshot, StoreError> {
        match slot.snapshot.as_ref() {
            Some(snapshot) => Ok(snapshot.clone()),
            None => {
                let snapshot = self.store.load(owner).await?;
                slot.snapshot = Some(snapshot.clone());
                Ok(snapshot)
            }
        }
    }

    /// Current snapshot for `owner`.
    pub async fn read(&self, owner: &str) -> Result<Snapshot, StoreError> {
        Ok(self.checkout(owner).await?.0)
    }

    /// Current snapshot for `owner` and the generation it belongs to.
    pub async fn checkout(&self, owner: &str) -> Result<(Snapshot, Generation), StoreError> {
        let (_, mut slot) = self.lock(owner).await;
        let snapshot = self.current(owner, &mut slot).await?;
        Ok((snapshot, slot.generation))
    }

    async fn modify<T, E, F>(&self, owner: &str, slot: &mut Slot, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Snapshot) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut working = match slot.snapshot.as_ref() {
            Some(snapshot) => snapshot.clone(),
            None => self.store.load(owner).await?,
        };

        let value = f(&mut working)?;
        self.store.save(owner, &working).await?;
        slot.snapshot = Some(working);

        Ok(value)
    }

    /// Apply `f` to the snapshot for `owner` and persist the result.
    ///
    /// If `f` or the save fails, neither the cache nor the store changes.
    pub async fn update<T, E, F>(&self, owner: &str, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Snapshot) -> Result<T, E>,
        E: From<StoreError>,
    {
        let (_, mut slot) = self.lock(owner).await;
        self.modify(owner, &mut slot, f).await
    }

    /// Like [`update`](Self::update), but only while `owner` is still on
    /// `generation`. Returns `Ok(None)` without calling `f` once the
    /// snapshot has been cleared since `generation` was checked out.
    pub async fn update_if_current<T, E, F>(
        &self,
        owner: &str,
        generation: Generation,
        f: F,
    ) -> Result<Option<T>, E>
    where
        F: FnOnce(&mut Snapshot) -> Result<T, E>,
        E: From<StoreError>,
    {
        let (_, mut slot) = self.lock(owner).await;
        if slot.generation != generation {
            return Ok(None);
        }
        self.modify(owner, &mut slot, f).await.map(Some)
    }

    /// Drop the stored and cached snapshot for `owner`.
    ///
    /// Ends the owner's current generation.
    pub async fn clear(&self, owner: &str) -> Result<(), StoreError> {
        let (cell, mut slot) = self.lock(owner).await;

        self.store.clear(owner).await?;
        slot.retired = true;
        slot.snapshot = None;
        self.cells.remove_if(owner, |_, current| Arc::ptr_eq(current, &cell));

        tracing::info!(owner = %owner, "Snapshot cleared");
        Ok(())
    }
}
