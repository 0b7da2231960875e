//! Access to the remote document store.
//!
//! The store is organized as `users/{owner}/{collection}/{id}`. Creates
//! return the id the server assigned; the payload never carries one.

mod http;
mod memory;

pub use http::HttpGateway;
pub use memory::{GatewayCall, MemoryGateway};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tally_engine::{Collection, EntityId};

/// Failure talking to the remote store.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("{collection} document {id} not found")]
    NotFound { collection: Collection, id: EntityId },

    #[error("Rejected by remote: {0}")]
    Rejected(String),

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("Invalid remote URL: {0}")]
    InvalidUrl(String),
}

/// A document as listed by the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntity {
    pub id: EntityId,
    pub data: serde_json::Value,
}

/// Operations the coordinator needs from the remote store.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Add a document and return its server-assigned id.
    async fn create(
        &self,
        owner: &str,
        collection: Collection,
        payload: &serde_json::Value,
    ) -> Result<EntityId, GatewayError>;

    /// Merge `payload` into an existing document.
    async fn update(
        &self,
        owner: &str,
        collection: Collection,
        id: &str,
        payload: &serde_json::Value,
    ) -> Result<(), GatewayError>;

    async fn delete(&self, owner: &str, collection: Collection, id: &str)
        -> Result<(), GatewayError>;

    /// Every document the owner has in `collection`.
    async fn list(&self, owner: &str, collection: Collection)
        -> Result<Vec<RemoteEntity>, GatewayError>;
}
