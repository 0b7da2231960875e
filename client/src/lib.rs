//! # Tally Client
//!
//! The IO half of Tally's offline sync: everything that talks to disk, the
//! network, or a clock.
//!
//! Local writes go through [`MutationQueue`], which applies them to the
//! user's [`Snapshot`](tally_engine::Snapshot) and persists it before
//! returning. When the device is online, [`Coordinator::sync`] drains the
//! queue against a [`RemoteGateway`], swaps temporary ids for server ids,
//! refreshes every collection and rebuilds the snapshot. [`SyncTrigger`]
//! runs a pass in the background each time the [`ConnectivityMonitor`]
//! reports a reconnect.
//!
//! ```text
//!  UI ──> MutationQueue ──> Snapshots ──> SnapshotStore (file / memory)
//!                              ^
//!  ConnectivityMonitor ──> SyncTrigger ──> Coordinator ──> RemoteGateway
//! ```

pub mod config;
pub mod connectivity;
pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod queue;
pub mod store;
pub mod telemetry;
pub mod trigger;

pub use config::{Config, ConfigError};
pub use connectivity::{
    spawn_poller, ConnectivityMonitor, HttpProbe, NetworkState, NetworkStatusSource, Transition,
    Transitions,
};
pub use coordinator::{Coordinator, SyncStatus};
pub use error::{ConnectivityError, Result, StoreError, SyncError};
pub use gateway::{
    GatewayCall, GatewayError, HttpGateway, MemoryGateway, RemoteEntity, RemoteGateway,
};
pub use queue::MutationQueue;
pub use store::{FileStore, Generation, MemoryStore, SnapshotStore, Snapshots};
pub use telemetry::{Telemetry, TracingTelemetry};
pub use trigger::{BackgroundSync, SyncTrigger};

use tally_engine::Timestamp;

/// Wall-clock time in milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as Timestamp
}
