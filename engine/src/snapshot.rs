//! Per-user snapshots: the unit of durable offline state.
//!
//! A snapshot bundles a user's known entities, the FIFO queue of mutations
//! not yet confirmed by the remote store, the last successful sync time,
//! and the temporary ids that have already been exchanged for server ids.
//! Snapshots serialize deterministically so stores can diff and persist them.

use crate::{error::Result, Entities, EntityId, Error, MutationRecord, OwnerId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Everything one user has locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Owner of this snapshot
    pub owner_id: OwnerId,
    /// Last-known local copy of expenses, subscriptions and budget
    pub entities: Entities,
    /// When the last full refresh completed
    pub last_sync_at: Option<Timestamp>,
    /// Mutations awaiting remote application, in creation order
    pub pending_mutations: Vec<MutationRecord>,
    /// Temporary ids already exchanged for server ids
    #[serde(default)]
    pub id_aliases: BTreeMap<EntityId, EntityId>,
}

impl Snapshot {
    /// Create the empty default snapshot for a user.
    pub fn new(owner_id: impl Into<OwnerId>) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            owner_id: owner_id.into(),
            entities: Entities::new(),
            last_sync_at: None,
            pending_mutations: Vec::new(),
            id_aliases: BTreeMap::new(),
        }
    }

    /// Record a local mutation: apply it optimistically and queue it.
    ///
    /// The mutation must belong to this snapshot's owner and carry a
    /// well-formed payload. Nothing is changed if validation fails.
    pub fn record(&mut self, mutation: MutationRecord, timestamp: Timestamp) -> Result<()> {
        if mutation.owner_id != self.owner_id {
            return Err(Error::OwnerMismatch {
                mutation: mutation.id,
                expected: self.owner_id.clone(),
                actual: mutation.owner_id,
            });
        }
        mutation.validate()?;

        self.entities
            .apply_local(&mutation, &self.id_aliases, timestamp)?;
        self.pending_mutations.push(mutation);
        Ok(())
    }

    /// Remember that `temp_id` is now `server_id` and rewrite local entities.
    pub fn confirm_create(
        &mut self,
        mutation: &MutationRecord,
        server_id: impl Into<EntityId>,
    ) -> Result<()> {
        let temp_id = mutation.entity_id()?.to_string();
        let server_id = server_id.into();

        self.entities
            .reassign_id(mutation.collection, &temp_id, &server_id);
        self.id_aliases.insert(temp_id, server_id);
        Ok(())
    }

    /// Find a queued mutation by its id.
    pub fn pending(&self, mutation_id: &str) -> Option<&MutationRecord> {
        self.pending_mutations.iter().find(|m| m.id == mutation_id)
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        // Validate format version
        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }

    /// Summary counts for status displays.
    pub fn metadata(&self) -> SnapshotMetadata {
        self.into()
    }
}

/// Metadata about a snapshot (without the full data).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    /// Snapshot format version
    pub format_version: u32,
    /// Owner of the snapshot
    pub owner_id: OwnerId,
    /// Total entity count
    pub entity_count: usize,
    /// Entities still carrying a temporary id
    pub unconfirmed_count: usize,
    /// Pending mutation count
    pub pending_count: usize,
    /// Last successful full refresh
    pub last_sync_at: Option<Timestamp>,
}

impl From<&Snapshot> for SnapshotMetadata {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            format_version: snapshot.format_version,
            owner_id: snapshot.owner_id.clone(),
            entity_count: snapshot.entities.len(),
            unconfirmed_count: snapshot.entities.pending_count(),
            pending_count: snapshot.pending_mutations.len(),
            last_sync_at: snapshot.last_sync_at,
        }
    }
}
