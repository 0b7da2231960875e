//! The reconciliation pass.
//!
//! A pass for one user runs in three steps:
//!
//! 1. **Dispatch**: send each queued mutation to the remote store in FIFO
//!    order, one at a time. A failure is recorded and the pass moves on.
//!    A mutation that still names a temporary id whose create has not been
//!    confirmed is withheld and counts as failed.
//! 2. **Commit**: under the snapshot lock, swap confirmed temporary ids for
//!    server ids and drop synced mutations from the queue by id. Mutations
//!    recorded while the pass was dispatching are kept. This is persisted
//!    before anything else happens.
//! 3. **Refresh**: list every collection and rebuild local entities from the
//!    server view, replaying whatever is still queued on top. A failed
//!    refresh is reported, not raised; the commit from step 2 stands.
//!
//! Clearing the user's snapshot while a pass runs abandons the pass: its
//! commit and refresh are dropped and it ends with
//! [`SyncError::SnapshotCleared`].
//!
//! At most one pass per user runs at a time. A second caller gets
//! [`SyncError::AlreadyInProgress`] instead of waiting.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tally_engine::{
    rebase, resolve_references, retain_failed, unconfirmed_dependency, Collection, Entities,
    Entity, EntityId, MutationKind, MutationRecord, OwnerId, RefreshStatus, SyncReport, Timestamp,
};

use crate::connectivity::{ConnectivityMonitor, NetworkState};
use crate::error::{Result, SyncError};
use crate::gateway::RemoteGateway;
use crate::store::Snapshots;
use crate::telemetry::Telemetry;

/// What a status display needs to know about one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub network: NetworkState,
    pub in_progress: bool,
    pub pending: usize,
    pub last_sync_at: Option<Timestamp>,
}

/// Marks a user's pass as running until dropped.
struct InFlight<'a> {
    passes: &'a DashMap<OwnerId, ()>,
    owner: OwnerId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.passes.remove(&self.owner);
    }
}

/// Confirmed creates, to be folded into the snapshot at commit.
type Confirmed = Vec<(MutationRecord, EntityId)>;

/// Drains queued mutations against a [`RemoteGateway`].
pub struct Coordinator {
    snapshots: Arc<Snapshots>,
    gateway: Arc<dyn RemoteGateway>,
    monitor: Arc<ConnectivityMonitor>,
    telemetry: Arc<dyn Telemetry>,
    passes: DashMap<OwnerId, ()>,
}

impl Coordinator {
    pub fn new(
        snapshots: Arc<Snapshots>,
        gateway: Arc<dyn RemoteGateway>,
        monitor: Arc<ConnectivityMonitor>,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        Self {
            snapshots,
            gateway,
            monitor,
            telemetry,
            passes: DashMap::new(),
        }
    }

    pub fn new_shared(
        snapshots: Arc<Snapshots>,
        gateway: Arc<dyn RemoteGateway>,
        monitor: Arc<ConnectivityMonitor>,
        telemetry: Arc<dyn Telemetry>,
    ) -> Arc<Self> {
        Arc::new(Self::new(snapshots, gateway, monitor, telemetry))
    }

    /// Whether a pass for `owner` is running right now.
    pub fn is_syncing(&self, owner: &str) -> bool {
        self.passes.contains_key(owner)
    }

    pub async fn status(&self, owner: &str) -> Result<SyncStatus> {
        let (snapshot, generation) = self.snapshots.checkout(owner).await?;
        tracing::info!(
            owner = %owner,
            pending = snapshot.pending_mutations.len(),
            "Sync pass started"
        );

        let mut report = SyncReport::new();
        let mut aliases = snapshot.id_aliases.clone();
        let mut confirmed = Confirmed::new();

        for mutation in &snapshot.pending_mutations {
            self.dispatch(owner, mutation, &mut aliases, &mut confirmed, &mut report)
                .await;
        }

        let remaining = self
            .snapshots
            .update_if_current(owner, generation, |current| -> Result<usize> {
                for (mutation, server_id) in &confirmed {
                    current.confirm_create(mutation, server_id.clone())?;
                }
                retain_failed(&mut current.pending_mutations, &report);
                Ok(current.pending_mutations.len())
            })
            .await
            .inspect_err(|e| self.telemetry.record_error(e))?
            .ok_or_else(|| Self::abandoned(owner))?;

        report.refresh = match self.refresh(owner).await {
            Ok(server_view) => {
                let now = crate::now_millis();
                self.snapshots
                    .update_if_current(owner, generation, |current| -> Result<()> {
                        current.entities = rebase(
                            server_view,
                            &current.pending_mutations,
                            &current.id_aliases,
                            now,
                        );
                        current.last_sync_at = Some(now);
                        Ok(())
                    })
                    .await
                    .inspect_err(|e| self.telemetry.record_error(e))?
                    .ok_or_else(|| Self::abandoned(owner))?;
                RefreshStatus::Completed
            }
            Err(e) => {
                tracing::warn!(owner = %owner, error = %e, "Full refresh failed");
                self.telemetry.record_error(&e);
                RefreshStatus::Failed {
                    error: e.to_string(),
                }
            }
        };

        report.completed_at = Some(crate::now_millis());
        tracing::info!(
            owner = %owner,
            synced = report.synced_count,
            failed = report.failed_count,
            remaining,
            refreshed = report.refresh == RefreshStatus::Completed,
            "Sync pass finished"
        );
        Ok(report)
    }

    /// The snapshot was cleared under a running pass; nothing it learned
    /// may be written back.
    fn abandoned(owner: &str) -> SyncError {
        tracing::info!(owner = %owner, "Snapshot cleared during sync, results discarded");
        SyncError::SnapshotCleared(owner.to_string())
    }

    /// Send one mutation and record its outcome.
    async fn dispatch(
        &self,
        owner: &str,
        mutation: &MutationRecord,
        aliases: &mut BTreeMap<EntityId, EntityId>,
        confirmed: &mut Confirmed,
        report: &mut SyncReport,
    ) {
        let target = match mutation.resolved_entity_id(aliases) {
            Ok(id) => id.to_string(),
            Err(e) => {
                report.record_failed(mutation, "", e.to_string());
                return;
            }
        };

        if let Some(dependency) = unconfirmed_dependency(mutation, aliases) {
            tracing::debug!(
                owner = %owner,
                mutation = %mutation.id,
                dependency = %dependency,
                "Mutation withheld"
            );
            report.record_failed(
                mutation,
                &target,
                format!("blocked by unsynced create {dependency}"),
            );
            return;
        }

        let payload = resolve_references(&mutation.dispatch_payload(), aliases);
        let collection = mutation.collection;
        let result = match mutation.kind {
            MutationKind::Create => self
                .gateway
                .create(owner, collection, &payload)
                .await
                .map(Some),
            MutationKind::Update => self
                .gateway
                .update(owner, collection, &target, &payload)
                .await
                .map(|()| None),
            MutationKind::Delete => self
                .gateway
                .delete(owner, collection, &target)
                .await
                .map(|()| None),
        };

        match result {
            Ok(server_id) => {
                if let Some(server_id) = &server_id {
                    aliases.insert(target.clone(), server_id.clone());
                    confirmed.push((mutation.clone(), server_id.clone()));
                }
                tracing::debug!(
                    owner = %owner,
                    mutation = %mutation.id,
                    kind = %mutation.kind,
                    %collection,
                    "Mutation synced"
                );
                report.record_synced(mutation, &target, server_id);
            }
            Err(source) => {
                let error = SyncError::RemoteOperation {
                    mutation: mutation.id.clone(),
                    source,
                };
                tracing::warn!(owner = %owner, error = %error, "Mutation rejected");
                self.telemetry.record_error(&error);
                report.record_failed(mutation, &target, error.to_string());
            }
        }
    }

    /// Fetch the server's view of every collection.
    async fn refresh(&self, owner: &str) -> Result<Entities> {
        let now = crate::now_millis();
        let mut view = Entities::new();

        for collection in Collection::ALL {
            let documents = self
                .gateway
                .list(owner, collection)
                .await
                .map_err(SyncError::FullRefresh)?;

            for document in documents {
                view.insert(Entity::remote(document.id, collection, document.data, now));
            }
        }
        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryGateway;
    use crate::store::MemoryStore;
    use crate::telemetry::TracingTelemetry;
    use serde_json::json;

    fn coordinator(state: NetworkState) -> (Coordinator, Arc<Snapshots>, Arc<MemoryGateway>) {
        let snapshots = Snapshots::new_shared(Arc::new(MemoryStore::new()));
        let gateway = Arc::new(MemoryGateway::new());
        let coordinator = Coordinator::new(
            snapshots.clone(),
            gateway.clone(),
            Arc::new(ConnectivityMonitor::new(state)),
            Arc::new(TracingTelemetry),
        );
        (coordinator, snapshots, gateway)
    }

    #[tokio::test]
    async fn in_flight_flag_is_released_on_drop() {
        let (coordinator, _, _) = coordinator(NetworkState::Online);

        let guard = coordinator.begin("alice").unwrap();
        assert!(coordinator.is_syncing("alice"));
        assert!(matches!(
            coordinator.begin("alice"),
            Err(SyncError::AlreadyInProgress(owner)) if owner == "alice"
        ));
        assert!(coordinator.begin("bob").is_ok());

        drop(guard);
        assert!(!coordinator.is_syncing("alice"));
    }

    #[tokio::test]
    async fn empty_queue_still_refreshes() {
        let (coordinator, snapshots, gateway) = coordinator(NetworkState::Online);
        gateway
            .insert("alice", Collection::Budget, "b1", json!({"limit": 500}))
            .await;

        let report = coordinator.sync("alice").await.unwrap();

        assert_eq!(report.synced_count, 0);
        assert!(report.is_clean());
        let snapshot = snapshots.read("alice").await.unwrap();
        assert!(snapshot.last_sync_at.is_some());
        assert_eq!(
            snapshot.entities.get(Collection::Budget, "b1").unwrap().data["limit"],
            500
        );
    }

    #[tokio::test]
    async fn status_reflects_queue_and_network() {
        let (coordinator, snapshots, _) = coordinator(NetworkState::Offline);
        snapshots
            .update("alice", |s| -> Result<()> {
                s.record(
                    MutationRecord::new(
                        "m1",
                        MutationKind::Create,
                        Collection::Expenses,
                        json!({"id": "local-a"}),
                        1,
                        "alice",
                    ),
                    1,
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let status = coordinator.status("alice").await.unwrap();
        assert_eq!(
            status,
            SyncStatus {
                network: NetworkState::Offline,
                in_progress: false,
                pending: 1,
                last_sync_at: None,
            }
        );
    }
}
