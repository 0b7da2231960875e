//! tally-sync - keeps one user's offline queue drained against the remote
//! store.
//!
//! Loads the user's snapshot from the data directory, polls the health
//! endpoint, and runs a reconciliation pass on startup (when online) and on
//! every reconnect until interrupted.

use std::sync::Arc;

use tally_client::{
    spawn_poller, BackgroundSync, Config, ConnectivityMonitor, Coordinator, FileStore,
    HttpGateway, HttpProbe, MutationQueue, NetworkStatusSource, Snapshots, SyncTrigger, Telemetry,
    TracingTelemetry,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tally_client=debug,tally_sync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!(
        owner = %config.owner_id,
        remote = %config.remote_url,
        data_dir = %config.data_dir.display(),
        "Starting tally-sync"
    );

    let telemetry: Arc<dyn Telemetry> = Arc::new(TracingTelemetry);
    let snapshots = Snapshots::new_shared(Arc::new(FileStore::new(&config.data_dir)));

    let mut gateway = HttpGateway::new(&config.remote_url, config.request_timeout)?;
    if let Some(token) = &config.auth_token {
        gateway = gateway.with_token(token);
    }

    let probe: Arc<dyn NetworkStatusSource> =
        Arc::new(HttpProbe::new(&config.health_url, config.request_timeout)?);
    let monitor = Arc::new(ConnectivityMonitor::start(probe.as_ref()).await);

    let (stop_poller, poller_stop) = watch::channel(false);
    let poller = spawn_poller(
        monitor.clone(),
        probe,
        config.probe_interval,
        poller_stop,
    );

    let coordinator = Coordinator::new_shared(
        snapshots.clone(),
        Arc::new(gateway),
        monitor.clone(),
        telemetry.clone(),
    );
    let trigger = SyncTrigger::start(coordinator.clone(), &monitor, telemetry.clone());
    trigger.set_owner(config.owner_id.clone()).await;

    let queue = MutationQueue::new(snapshots, telemetry.clone());
    let metadata = queue.metadata(&config.owner_id).await?;
    tracing::info!(
        pending = metadata.pending_count,
        entities = metadata.entity_count,
        "Snapshot loaded"
    );

    if monitor.is_online() {
        match trigger.force_sync(&config.owner_id).await {
            Ok(report) => tracing::info!(
                synced = report.synced_count,
                failed = report.failed_count,
                "Initial sync complete"
            ),
            Err(e) => {
                tracing::warn!(error = %e, "Initial sync failed");
                telemetry.record_error(&e);
            }
        }
    } else {
        tracing::info!("Offline, waiting for connectivity");
    }

    let events = trigger.subscribe();
    let log_events = tokio::spawn(log_background_syncs(events));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    trigger.shutdown().await;
    let _ = stop_poller.send(true);
    poller.await?;
    log_events.abort();

    if let Ok(status) = coordinator.status(&config.owner_id).await {
        tracing::info!(pending = status.pending, "Stopped");
    }

    Ok(())
}

/// Log background pass outcomes until the trigger goes away. Returns how
/// many were logged.
async fn log_background_syncs(mut events: broadcast::Receiver<BackgroundSync>) -> usize {
    let mut logged = 0;
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "Background sync events dropped");
                continue;
            }
            Err(RecvError::Closed) => return logged,
        };

        match event.result {
            Ok(report) => tracing::info!(
                owner = %event.owner,
                synced = report.synced_count,
                failed = report.failed_count,
                "Background sync complete"
            ),
            Err(error) => tracing::warn!(owner = %event.owner, %error, "Background sync failed"),
        }
        logged += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(owner: &str) -> BackgroundSync {
        BackgroundSync {
            owner: owner.to_string(),
            result: Err("No network connection".into()),
        }
    }

    #[tokio::test]
    async fn logging_survives_a_lagged_receiver() {
        let (tx, rx) = broadcast::channel(1);
        for owner in ["alice", "bob", "carol"] {
            tx.send(failed(owner)).unwrap();
        }
        drop(tx);

        assert_eq!(log_background_syncs(rx).await, 1);
    }
}
