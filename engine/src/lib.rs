//! # Tally Engine
//!
//! The deterministic core of Tally's offline mutation queue.
//!
//! This crate holds everything about offline sync that can be expressed
//! without IO: the shape of queued mutations, the per-user snapshot, how a
//! local write is applied optimistically, and how temporary identifiers are
//! swapped for server-assigned ones once a create is confirmed.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine never touches files, sockets or clocks; callers
//!   pass timestamps in
//! - **Deterministic**: snapshots serialize with stable ordering
//! - **Identity over position**: queue bookkeeping always keys on the
//!   mutation's own id
//!
//! ## Core Concepts
//!
//! ### Mutations
//!
//! A [`MutationRecord`] is one local change waiting for the remote store:
//! a [`MutationKind`] (create, update, delete) against a [`Collection`]
//! with an opaque JSON payload. The payload's `id` field names the target
//! entity; for creates it is a temporary id (see [`TEMP_ID_PREFIX`]).
//!
//! ### Snapshots
//!
//! A [`Snapshot`] is everything one user has locally: known [`Entities`],
//! the FIFO queue of pending mutations, the last sync time, and the table
//! of temporary ids that have already been exchanged for server ids.
//!
//! ### Reconciliation
//!
//! The [`reconcile`] module holds the bookkeeping for a reconciliation
//! pass: per-mutation outcomes keyed by mutation id, the aggregated
//! [`SyncReport`], [`retain_failed`] for shortening the queue, and
//! [`rebase`] for rebuilding entities after a full refresh.
//!
//! ## Quick Start
//!
//! ```rust
//! use tally_engine::{Collection, MutationKind, MutationRecord, Snapshot};
//! use serde_json::json;
//!
//! let mut snapshot = Snapshot::new("user-1");
//!
//! let record = MutationRecord::new(
//!     "mut-1",
//!     MutationKind::Create,
//!     Collection::Expenses,
//!     json!({"id": "local-a", "amount": 12.5, "category": "food"}),
//!     1706745600000,
//!     "user-1",
//! );
//!
//! snapshot.record(record, 1706745600000).unwrap();
//! assert_eq!(snapshot.pending_mutations.len(), 1);
//! assert!(snapshot.entities.get(Collection::Expenses, "local-a").is_some());
//!
//! // The server confirmed the create as "srv-9".
//! snapshot.entities.reassign_id(Collection::Expenses, "local-a", "srv-9");
//! assert!(!snapshot.entities.contains_reference("local-a"));
//! ```

pub mod collection;
pub mod entity;
pub mod error;
pub mod mutation;
pub mod reconcile;
pub mod snapshot;

// Re-export main types at crate root
pub use collection::Collection;
pub use entity::{Entities, Entity, Origin};
pub use error::Error;
pub use mutation::{is_temporary_id, MutationKind, MutationRecord, TEMP_ID_PREFIX};
pub use reconcile::{
    rebase, resolve_references, retain_failed, unconfirmed_dependency, MutationOutcome,
    OutcomeStatus, RefreshStatus, SyncReport,
};
pub use snapshot::{Snapshot, SnapshotMetadata, SNAPSHOT_FORMAT_VERSION};

/// Type aliases for clarity
pub type OwnerId = String;
pub type EntityId = String;
pub type MutationId = String;
/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;
