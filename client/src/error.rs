//! Error types for the sync runtime.

use tally_engine::{MutationId, OwnerId};

use crate::gateway::GatewayError;

/// Failure reading or writing a persisted snapshot.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot error: {0}")]
    Engine(#[from] tally_engine::Error),

    #[error("Snapshot for {path} belongs to {actual}, expected {expected}")]
    OwnerMismatch {
        path: String,
        expected: OwnerId,
        actual: OwnerId,
    },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Failure asking the platform for network status.
#[derive(Debug, thiserror::Error)]
pub enum ConnectivityError {
    #[error("Status query failed: {0}")]
    Query(String),

    #[error("Probe request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Everything a caller of the queue or the coordinator can see go wrong.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Local storage failure: {0}")]
    LocalStorage(#[from] StoreError),

    #[error("No network connection")]
    NoConnection,

    #[error("A sync pass is already running for {0}")]
    AlreadyInProgress(OwnerId),

    #[error("Remote operation for mutation {mutation} failed: {source}")]
    RemoteOperation {
        mutation: MutationId,
        #[source]
        source: GatewayError,
    },

    #[error("Full refresh failed: {0}")]
    FullRefresh(#[source] GatewayError),

    #[error("Invalid mutation: {0}")]
    InvalidMutation(#[from] tally_engine::Error),

    #[error("Snapshot for {0} was cleared during the sync pass")]
    SnapshotCleared(OwnerId),
}

impl SyncError {
    /// Short stable name for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::LocalStorage(_) => "local_storage",
            SyncError::NoConnection => "no_connection",
            SyncError::AlreadyInProgress(_) => "already_in_progress",
            SyncError::RemoteOperation { .. } => "remote_operation",
            SyncError::FullRefresh(_) => "full_refresh",
            SyncError::InvalidMutation(_) => "invalid_mutation",
            SyncError::SnapshotCleared(_) => "snapshot_cleared",
        }
    }
}

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
