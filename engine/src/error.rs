//! Error types for the Tally engine.

use crate::{MutationId, OwnerId};
use thiserror::Error;

/// All possible errors from the Tally engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Mutation errors
    #[error("invalid payload for mutation {mutation}: {reason}")]
    InvalidPayload { mutation: MutationId, reason: String },

    #[error("mutation {0} does not name a target entity")]
    MissingEntityId(MutationId),

    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    #[error("mutation {mutation} belongs to {actual}, not {expected}")]
    OwnerMismatch {
        mutation: MutationId,
        expected: OwnerId,
        actual: OwnerId,
    },

    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
