//! Background sync on reconnect.
//!
//! [`SyncTrigger`] watches the connectivity monitor. Every offline to online
//! transition starts a detached pass for the active user, if there is one.
//! Background passes never surface errors to a caller: they go to telemetry
//! and are published as [`BackgroundSync`] events.

use std::sync::Arc;

use tally_engine::{OwnerId, SyncReport};
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::connectivity::ConnectivityMonitor;
use crate::coordinator::Coordinator;
use crate::error::{Result, SyncError};
use crate::telemetry::Telemetry;

const EVENT_CAPACITY: usize = 16;

/// Outcome of one background pass.
#[derive(Debug, Clone)]
pub struct BackgroundSync {
    pub owner: OwnerId,
    /// The report, or the error's display form.
    pub result: std::result::Result<SyncReport, String>,
}

struct Shared {
    coordinator: Arc<Coordinator>,
    telemetry: Arc<dyn Telemetry>,
    owner: RwLock<Option<OwnerId>>,
    events: broadcast::Sender<BackgroundSync>,
}

impl Shared {
    async fn background_sync(self: Arc<Self>) {
        let Some(owner) = self.owner.read().await.clone() else {
            tracing::debug!("Reconnected with no active user");
            return;
        };

        let result = match self.coordinator.sync(&owner).await {
            Ok(report) => Ok(report),
            Err(SyncError::AlreadyInProgress(_)) => {
                tracing::debug!(owner = %owner, "Background sync skipped, pass already running");
                return;
            }
            Err(SyncError::SnapshotCleared(_)) => {
                tracing::debug!(owner = %owner, "Background sync abandoned after sign-out");
                return;
            }
            Err(e) => {
                tracing::warn!(owner = %owner, error = %e, "Background sync failed");
                self.telemetry.record_error(&e);
                Err(e.to_string())
            }
        };

        // No subscribers is fine
        let _ = self.events.send(BackgroundSync { owner, result });
    }
}

/// Starts a sync pass whenever the network comes back.
pub struct SyncTrigger {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl SyncTrigger {
    /// Subscribe to `monitor` and begin watching for reconnects.
    pub fn start(
        coordinator: Arc<Coordinator>,
        monitor: &ConnectivityMonitor,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            coordinator,
            telemetry,
            owner: RwLock::new(None),
            events,
        });
        let (shutdown, mut stop) = watch::channel(false);
        let mut transitions = monitor.subscribe();

        let watcher = tokio::spawn({
            let shared = shared.clone();
            async move {
                loop {
                    tokio::select! {
                        transition = transitions.next() => match transition {
                            Some(t) if t.is_reconnect() => {
                                tokio::spawn(shared.clone().background_sync());
                            }
                            Some(_) => {}
                            None => break,
                        },
                        changed = stop.changed() => {
                            if changed.is_err() || *stop.borrow() {
                                break;
                            }
                        }
                    }
                }
                tracing::debug!("Sync trigger stopped");
            }
        });

        Self {
            shared,
            shutdown,
            watcher: Mutex::new(Some(watcher)),
        }
    }

    /// Make `owner` the user whose queue background passes drain.
    pub async fn set_owner(&self, owner: impl Into<OwnerId>) {
        let owner = owner.into();
        tracing::info!(owner = %owner, "Active user set");
        *self.shared.owner.write().await = Some(owner);
    }

    /// Stop background passes; signing out does not clear local data.
    pub async fn clear_owner(&self) {
        *self.shared.owner.write().await = None;
    }

    pub async fn owner(&self) -> Option<OwnerId> {
        self.shared.owner.read().await.clone()
    }

    /// Run a pass now and hand every error back to the caller.
    pub async fn force_sync(&self, owner: &str) -> Result<SyncReport> {
        self.shared.coordinator.sync(owner).await
    }

    /// Events for background passes started after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<BackgroundSync> {
        self.shared.events.subscribe()
    }

    /// Stop watching for reconnects. Passes already running finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        if let Some(watcher) = self.watcher.lock().await.take() {
            if let Err(e) = watcher.await {
                tracing::error!(error = %e, "Sync trigger task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::NetworkState;
    use crate::gateway::MemoryGateway;
    use crate::store::{MemoryStore, Snapshots};
    use crate::telemetry::TracingTelemetry;
    use std::time::Duration;

    fn trigger() -> (SyncTrigger, Arc<ConnectivityMonitor>) {
        let monitor = Arc::new(ConnectivityMonitor::new(NetworkState::Offline));
        let coordinator = Coordinator::new_shared(
            Snapshots::new_shared(Arc::new(MemoryStore::new())),
            Arc::new(MemoryGateway::new()),
            monitor.clone(),
            Arc::new(TracingTelemetry),
        );
        let trigger = SyncTrigger::start(coordinator, &monitor, Arc::new(TracingTelemetry));
        (trigger, monitor)
    }

    #[tokio::test]
    async fn reconnect_without_owner_does_nothing() {
        let (trigger, monitor) = trigger();
        let mut events = trigger.subscribe();

        monitor.set_status(NetworkState::Online);

        let event = tokio::time::timeout(Duration::from_millis(100), events.recv()).await;
        assert!(event.is_err());
        trigger.shutdown().await;
    }

    #[tokio::test]
    async fn force_sync_reports_no_connection() {
        let (trigger, _monitor) = trigger();

        let result = trigger.force_sync("alice").await;
        assert!(matches!(result, Err(SyncError::NoConnection)));
        trigger.shutdown().await;
    }

    #[tokio::test]
    async fn owner_can_be_set_and_cleared() {
        let (trigger, _monitor) = trigger();

        trigger.set_owner("alice").await;
        assert_eq!(trigger.owner().await.as_deref(), Some("alice"));
        trigger.clear_owner().await;
        assert!(trigger.owner().await.is_none());

        trigger.shutdown().await;
        // A second shutdown is a no-op
        trigger.shutdown().await;
    }
}
