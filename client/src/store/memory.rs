//! In-memory snapshot store.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tally_engine::{OwnerId, Snapshot};

use super::SnapshotStore;
use crate::error::StoreError;

/// Keeps serialized snapshots in memory.
///
/// Snapshots are stored as the same JSON a [`FileStore`](super::FileStore)
/// would write, so tests can compare persisted bytes directly.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: DashMap<OwnerId, String>,
    fail_saves: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The persisted JSON for `owner`, if any.
    pub fn raw(&self, owner: &str) -> Option<String> {
        self.documents.get(owner).map(|doc| doc.value().clone())
    }

    /// Make every subsequent save fail until switched off again.
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn load(&self, owner: &str) -> Result<Snapshot, StoreError> {
        match self.documents.get(owner) {
            Some(doc) => Ok(Snapshot::from_json(doc.value())?),
            None => Ok(Snapshot::new(owner)),
        }
    }

    async fn save(&self, owner: &str, snapshot: &Snapshot) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store rejected save".into()));
        }
        let json = snapshot.to_json()?;
        self.documents.insert(owner.to_string(), json);
        Ok(())
    }

    async fn clear(&self, owner: &str) -> Result<(), StoreError> {
        self.documents.remove(owner);
        Ok(())
    }
}
