//! Integration tests for background sync on reconnect.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tally_client::{
    BackgroundSync, ConnectivityMonitor, Coordinator, MemoryGateway, MemoryStore, MutationQueue,
    NetworkState, Snapshots, SyncError, SyncTrigger, Telemetry,
};
use tally_engine::Collection;
use tokio::sync::broadcast;

#[derive(Default)]
struct RecordingTelemetry {
    kinds: Mutex<Vec<&'static str>>,
}

impl Telemetry for RecordingTelemetry {
    fn record_error(&self, error: &SyncError) {
        self.kinds.lock().unwrap().push(error.kind());
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    monitor: Arc<ConnectivityMonitor>,
    telemetry: Arc<RecordingTelemetry>,
    queue: MutationQueue,
    trigger: SyncTrigger,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let monitor = Arc::new(ConnectivityMonitor::new(NetworkState::Offline));
    let telemetry = Arc::new(RecordingTelemetry::default());
    let snapshots = Snapshots::new_shared(store.clone());

    let coordinator = Coordinator::new_shared(
        snapshots.clone(),
        Arc::new(MemoryGateway::new()),
        monitor.clone(),
        telemetry.clone(),
    );
    let trigger = SyncTrigger::start(coordinator, &monitor, telemetry.clone());

    Harness {
        queue: MutationQueue::new(snapshots, telemetry.clone()),
        store,
        monitor,
        telemetry,
        trigger,
    }
}

async fn next_event(events: &mut broadcast::Receiver<BackgroundSync>) -> Option<BackgroundSync> {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .ok()
        .and_then(Result::ok)
}

async fn no_event(events: &mut broadcast::Receiver<BackgroundSync>) -> bool {
    tokio::time::timeout(Duration::from_millis(100), events.recv())
        .await
        .is_err()
}

#[cfg(test)]
mod trigger_tests {
    use super::*;

    #[tokio::test]
    async fn test_reconnect_drains_active_users_queue() {
        let h = harness();
        h.trigger.set_owner("alice").await;
        h.queue
            .create("alice", Collection::Expenses, json!({"amount": 8}))
            .await
            .unwrap();
        let mut events = h.trigger.subscribe();

        h.monitor.set_status(NetworkState::Online);

        let event = next_event(&mut events).await.unwrap();
        assert_eq!(event.owner, "alice");
        assert_eq!(event.result.unwrap().synced_count, 1);
        assert!(h.queue.pending("alice").await.unwrap().is_empty());

        h.trigger.shutdown().await;
    }

    #[tokio::test]
    async fn test_going_offline_does_not_sync() {
        let h = harness();
        h.trigger.set_owner("alice").await;
        let mut events = h.trigger.subscribe();
        h.monitor.set_status(NetworkState::Online);
        assert!(next_event(&mut events).await.is_some());

        h.monitor.set_status(NetworkState::Offline);

        assert!(no_event(&mut events).await);
        h.trigger.shutdown().await;
    }

    #[tokio::test]
    async fn test_background_failure_is_swallowed_and_reported() {
        let h = harness();
        h.trigger.set_owner("alice").await;
        h.queue
            .create("alice", Collection::Expenses, json!({"amount": 8}))
            .await
            .unwrap();
        h.store.fail_saves(true);
        let mut events = h.trigger.subscribe();

        h.monitor.set_status(NetworkState::Online);

        let event = next_event(&mut events).await.unwrap();
        assert!(event.result.unwrap_err().contains("Local storage failure"));
        assert!(h
            .telemetry
            .kinds
            .lock()
            .unwrap()
            .contains(&"local_storage"));

        h.trigger.shutdown().await;
    }

    #[tokio::test]
    async fn test_repeated_online_notifications_sync_once() {
        let h = harness();
        h.trigger.set_owner("alice").await;
        let mut events = h.trigger.subscribe();

        h.monitor.set_status(NetworkState::Online);
        h.monitor.set_status(NetworkState::Online);

        assert!(next_event(&mut events).await.is_some());
        assert!(no_event(&mut events).await);
        h.trigger.shutdown().await;
    }

    #[tokio::test]
    async fn test_signed_out_user_is_not_synced() {
        let h = harness();
        h.trigger.set_owner("alice").await;
        h.trigger.clear_owner().await;
        let mut events = h.trigger.subscribe();

        h.monitor.set_status(NetworkState::Online);

        assert!(no_event(&mut events).await);
        h.trigger.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_watching() {
        let h = harness();
        h.trigger.set_owner("alice").await;
        let mut events = h.trigger.subscribe();

        h.trigger.shutdown().await;
        h.monitor.set_status(NetworkState::Online);

        assert!(no_event(&mut events).await);
    }

    #[tokio::test]
    async fn test_force_sync_surfaces_errors() {
        let h = harness();

        let offline = h.trigger.force_sync("alice").await;
        assert!(matches!(offline, Err(SyncError::NoConnection)));

        h.monitor.set_status(NetworkState::Online);
        let report = h.trigger.force_sync("alice").await.unwrap();
        assert!(report.is_clean());

        h.trigger.shutdown().await;
    }
}
