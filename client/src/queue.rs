//! Recording local writes.
//!
//! Every write lands in the user's snapshot (entity plus queued mutation)
//! and is persisted before the call returns. Nothing here touches the
//! network.

use std::sync::Arc;

use serde_json::Value;
use tally_engine::{
    Collection, MutationKind, MutationRecord, Snapshot, SnapshotMetadata, TEMP_ID_PREFIX,
};

use crate::error::{Result, SyncError};
use crate::store::Snapshots;
use crate::telemetry::Telemetry;

/// A fresh temporary entity id.
pub fn new_temp_id() -> String {
    format!("{}{}", TEMP_ID_PREFIX, uuid::Uuid::new_v4())
}

fn new_mutation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Entry point for local writes.
pub struct MutationQueue {
    snapshots: Arc<Snapshots>,
    telemetry: Arc<dyn Telemetry>,
}

impl MutationQueue {
    pub fn new(snapshots: Arc<Snapshots>, telemetry: Arc<dyn Telemetry>) -> Self {
        Self {
            snapshots,
            telemetry,
        }
    }

    /// Apply a write locally and queue it for the remote store.
    ///
    /// `payload.id` names the target entity. On error nothing was queued.
    pub async fn record_mutation(
        &self,
        owner: &str,
        kind: MutationKind,
        collection: Collection,
        payload: Value,
    ) -> Result<MutationRecord> {
        let now = crate::now_millis();
        let record = MutationRecord::new(new_mutation_id(), kind, collection, payload, now, owner);
        let queued = record.clone();

        let result = self
            .snapshots
            .update(owner, move |snapshot| -> Result<()> {
                snapshot.record(queued, now)?;
                Ok(())
            })
            .await;

        if let Err(e) = result {
            tracing::error!(
                owner = %owner,
                mutation = %record.id,
                kind = %record.kind,
                error = %e,
                "Failed to record mutation"
            );
            if matches!(e, SyncError::LocalStorage(_)) {
                self.telemetry.record_error(&e);
            }
            return Err(e);
        }

        tracing::debug!(
            owner = %owner,
            mutation = %record.id,
            kind = %record.kind,
            %collection,
            "Mutation queued"
        );
        Ok(record)
    }

    /// Queue a create under a fresh temporary id.
    ///
    /// Any `id` already in `data` is replaced.
    pub async fn create(
        &self,
        owner: &str,
        collection: Collection,
        data: Value,
    ) -> Result<MutationRecord> {
        let payload = with_id(data, &new_temp_id());
        self.record_mutation(owner, MutationKind::Create, collection, payload)
            .await
    }

    /// Queue a partial update of entity `id`.
    pub async fn update(
        &self,
        owner: &str,
        collection: Collection,
        id: &str,
        changes: Value,
    ) -> Result<MutationRecord> {
        self.record_mutation(owner, MutationKind::Update, collection, with_id(changes, id))
            .await
    }

    pub async fn delete(
        &self,
        owner: &str,
        collection: Collection,
        id: &str,
    ) -> Result<MutationRecord> {
        let payload = serde_json::json!({ "id": id });
        self.record_mutation(owner, MutationKind::Delete, collection, payload)
            .await
    }

    /// The user's current snapshot.
    pub async fn snapshot(&self, owner: &str) -> Result<Snapshot> {
        Ok(self.snapshots.read(owner).await?)
    }

    pub async fn pending(&self, owner: &str) -> Result<Vec<MutationRecord>> {
        Ok(self.snapshots.read(owner).await?.pending_mutations)
    }

    pub async fn metadata(&self, owner: &str) -> Result<SnapshotMetadata> {
        Ok(self.snapshots.read(owner).await?.metadata())
    }

    /// Discard everything stored locally for `owner`, queued writes included.
    pub async fn clear(&self, owner: &str) -> Result<()> {
        Ok(self.snapshots.clear(owner).await?)
    }
}

/// Non-object payloads pass through untouched and fail validation later.
fn with_id(mut payload: Value, id: &str) -> Value {
    if let Some(fields) = payload.as_object_mut() {
        fields.insert("id".into(), Value::String(id.to_string()));
    }
    payload
}
