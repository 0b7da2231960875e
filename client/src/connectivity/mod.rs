//! Network reachability tracking.
//!
//! [`ConnectivityMonitor`] owns the current [`NetworkState`] in a
//! `tokio::sync::watch` cell and publishes every actual change on a
//! `tokio::sync::broadcast` channel, so a quick offline-online flap still
//! reaches subscribers as two transitions. Setting the state it already has
//! is a no-op.

mod probe;

pub use probe::{spawn_poller, HttpProbe};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::ConnectivityError;

/// Whether the remote store is reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkState {
    Online,
    Offline,
}

impl NetworkState {
    pub fn is_online(self) -> bool {
        self == NetworkState::Online
    }
}

impl std::fmt::Display for NetworkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkState::Online => write!(f, "online"),
            NetworkState::Offline => write!(f, "offline"),
        }
    }
}

/// Platform query for the current network status.
#[async_trait]
pub trait NetworkStatusSource: Send + Sync {
    async fn query(&self) -> Result<NetworkState, ConnectivityError>;
}

/// A change in network state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: NetworkState,
    pub to: NetworkState,
}

impl Transition {
    /// Offline to online.
    pub fn is_reconnect(&self) -> bool {
        self.from == NetworkState::Offline && self.to == NetworkState::Online
    }
}

/// Transitions a slow subscriber may fall behind by before it misses some.
const TRANSITION_BUFFER: usize = 64;

/// Holds the current [`NetworkState`] and fans out changes.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    state: watch::Sender<NetworkState>,
    transitions: broadcast::Sender<Transition>,
}

impl ConnectivityMonitor {
    pub fn new(initial: NetworkState) -> Self {
        let (state, _) = watch::channel(initial);
        let (transitions, _) = broadcast::channel(TRANSITION_BUFFER);
        Self { state, transitions }
    }

    /// Ask `source` once for the initial state.
    ///
    /// A failed query starts the monitor offline; it is not retried here.
    pub async fn start(source: &dyn NetworkStatusSource) -> Self {
        let initial = match source.query().await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(error = %e, "Network status query failed, assuming offline");
                NetworkState::Offline
            }
        };
        tracing::info!(state = %initial, "Connectivity monitor started");
        Self::new(initial)
    }

    pub fn status(&self) -> NetworkState {
        *self.state.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.status().is_online()
    }

    /// Record a platform notification.
    ///
    /// Returns true if the state actually changed.
    pub fn set_status(&self, next: NetworkState) -> bool {
        let mut previous = next;
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            previous = *current;
            *current = next;
            // Published under the watch lock so subscribers see changes in order
            let _ = self.transitions.send(Transition {
                from: previous,
                to: next,
            });
            true
        });

        if changed {
            tracing::info!(from = %previous, to = %next, "Network state changed");
        }
        changed
    }

    /// Stream of every transition from now on.
    pub fn subscribe(&self) -> Transitions {
        Transitions {
            rx: self.transitions.subscribe(),
        }
    }

    /// Run `callback` for every transition until the monitor is dropped.
    pub fn on_change<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: Fn(Transition) + Send + 'static,
    {
        let mut transitions = self.subscribe();
        tokio::spawn(async move {
            while let Some(transition) = transitions.next().await {
                callback(transition);
            }
        })
    }
}

/// Receiver half of [`ConnectivityMonitor::subscribe`].
#[derive(Debug)]
pub struct Transitions {
    rx: broadcast::Receiver<Transition>,
}

impl Transitions {
    /// Wait for the next change. `None` once the monitor is gone.
    ///
    /// Cancel-safe: dropping the future never loses a transition.
    pub async fn next(&mut self) -> Option<Transition> {
        loop {
            match self.rx.recv().await {
                Ok(transition) => return Some(transition),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Connectivity subscriber fell behind");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Wait for the next offline to online transition.
    pub async fn next_reconnect(&mut self) -> Option<Transition> {
        loop {
            let transition = self.next().await?;
            if transition.is_reconnect() {
                return Some(transition);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct FixedSource(Result<NetworkState, ()>);

    #[async_trait]
    impl NetworkStatusSource for FixedSource {
        async fn query(&self) -> Result<NetworkState, ConnectivityError> {
            self.0
                .map_err(|_| ConnectivityError::Query("platform unavailable".into()))
        }
    }

    #[tokio::test]
    async fn start_uses_queried_state() {
        let monitor = ConnectivityMonitor::start(&FixedSource(Ok(NetworkState::Online))).await;
        assert!(monitor.is_online());
    }

    #[tokio::test]
    async fn failed_query_starts_offline() {
        let monitor = ConnectivityMonitor::start(&FixedSource(Err(()))).await;
        assert_eq!(monitor.status(), NetworkState::Offline);
    }

    #[tokio::test]
    async fn repeated_state_is_not_a_transition() {
        let monitor = ConnectivityMonitor::new(NetworkState::Offline);
        let mut transitions = monitor.subscribe();

        assert!(!monitor.set_status(NetworkState::Offline));
        assert!(monitor.set_status(NetworkState::Online));
        assert!(!monitor.set_status(NetworkState::Online));

        let transition = transitions.next().await.unwrap();
        assert!(transition.is_reconnect());

        let pending = tokio::time::timeout(Duration::from_millis(50), transitions.next()).await;
        assert!(pending.is_err(), "no second notification expected");
    }

    #[tokio::test]
    async fn next_reconnect_skips_disconnects() {
        let monitor = ConnectivityMonitor::new(NetworkState::Online);
        let mut transitions = monitor.subscribe();

        monitor.set_status(NetworkState::Offline);
        let first = transitions.next().await.unwrap();
        assert_eq!(first.to, NetworkState::Offline);

        monitor.set_status(NetworkState::Online);
        let reconnect = transitions.next_reconnect().await.unwrap();
        assert_eq!(reconnect.from, NetworkState::Offline);
    }

    #[tokio::test]
    async fn quick_flap_delivers_both_transitions() {
        let monitor = ConnectivityMonitor::new(NetworkState::Online);
        let mut transitions = monitor.subscribe();

        assert!(monitor.set_status(NetworkState::Offline));
        assert!(monitor.set_status(NetworkState::Online));

        let first = transitions.next().await.unwrap();
        assert_eq!(first.to, NetworkState::Offline);
        let second = transitions.next().await.unwrap();
        assert!(second.is_reconnect());
    }

    #[tokio::test]
    async fn flap_between_polls_still_reconnects() {
        let monitor = ConnectivityMonitor::new(NetworkState::Online);
        let mut transitions = monitor.subscribe();

        monitor.set_status(NetworkState::Offline);
        monitor.set_status(NetworkState::Online);

        let reconnect =
            tokio::time::timeout(Duration::from_millis(100), transitions.next_reconnect()).await;
        assert!(matches!(reconnect, Ok(Some(t)) if t.is_reconnect()));
    }

    #[tokio::test]
    async fn dropping_monitor_ends_stream() {
        let monitor = ConnectivityMonitor::new(NetworkState::Offline);
        let mut transitions = monitor.subscribe();
        drop(monitor);

        assert!(transitions.next().await.is_none());
    }

    #[tokio::test]
    async fn on_change_sees_each_transition() {
        let monitor = ConnectivityMonitor::new(NetworkState::Offline);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let handle = monitor.on_change({
            let seen = seen.clone();
            move |t| seen.lock().unwrap().push(t.to)
        });

        monitor.set_status(NetworkState::Online);
        tokio::time::sleep(Duration::from_millis(20)).await;
        monitor.set_status(NetworkState::Offline);
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(monitor);
        handle.await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![NetworkState::Online, NetworkState::Offline]
        );
    }
}
