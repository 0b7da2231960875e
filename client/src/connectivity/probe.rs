//! HTTP health probe and the poll loop that feeds the monitor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{ConnectivityMonitor, NetworkState, NetworkStatusSource};
use crate::error::ConnectivityError;

/// Treats the remote as reachable when a GET on its health URL succeeds.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ConnectivityError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NetworkStatusSource for HttpProbe {
    async fn query(&self) -> Result<NetworkState, ConnectivityError> {
        match self.client.get(&self.url).send().await {
            Ok(response) if response.status().is_success() => Ok(NetworkState::Online),
            Ok(response) => {
                tracing::debug!(status = %response.status(), "Health probe returned non-success");
                Ok(NetworkState::Offline)
            }
            Err(e) if e.is_builder() => Err(e.into()),
            Err(e) => {
                tracing::debug!(error = %e, "Health probe unreachable");
                Ok(NetworkState::Offline)
            }
        }
    }
}

/// Query `source` every `interval` and push the answer into `monitor`.
///
/// A failed query counts as offline. The loop exits when `shutdown` flips
/// to true or its sender is dropped.
pub fn spawn_poller(
    monitor: Arc<ConnectivityMonitor>,
    source: Arc<dyn NetworkStatusSource>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let state = match source.query().await {
                        Ok(state) => state,
                        Err(e) => {
                            tracing::warn!(error = %e, "Network status query failed");
                            NetworkState::Offline
                        }
                    };
                    monitor.set_status(state);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::debug!("Connectivity poller stopped");
                        break;
                    }
                }
            }
        }
    })
}
