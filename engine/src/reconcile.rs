//! Bookkeeping for reconciliation passes.
//!
//! A pass drains a user's queue against the remote store in FIFO order.
//! The IO happens elsewhere; this module holds the pure parts:
//!
//! 1. Rewrite temporary ids the server has already replaced
//!    ([`resolve_references`]) and detect mutations that still depend on an
//!    unconfirmed create ([`unconfirmed_dependency`])
//! 2. Record one [`MutationOutcome`] per attempted mutation, keyed by the
//!    mutation's own id
//! 3. Shorten the queue by identity ([`retain_failed`]), never by position
//! 4. Rebuild entities from the server view with the still-pending local
//!    writes replayed on top ([`rebase`])

use crate::{
    is_temporary_id, Collection, Entities, EntityId, MutationId, MutationKind, MutationRecord,
    Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// What happened to one mutation during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum OutcomeStatus {
    /// The remote store applied the mutation
    #[serde(rename_all = "camelCase")]
    Synced {
        /// Server-assigned id, for creates
        #[serde(skip_serializing_if = "Option::is_none")]
        server_id: Option<EntityId>,
    },
    /// The mutation was not applied and stays queued
    Failed { error: String },
}

/// The outcome of one mutation, tagged with the mutation's id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationOutcome {
    /// Id of the mutation record this outcome belongs to
    pub mutation_id: MutationId,
    pub kind: MutationKind,
    pub collection: Collection,
    /// Target entity as dispatched (after alias resolution)
    pub entity_id: EntityId,
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

impl MutationOutcome {
    /// Whether the remote store applied the mutation.
    pub fn is_synced(&self) -> bool {
        matches!(self.status, OutcomeStatus::Synced { .. })
    }
}

/// Whether the post-loop full refresh completed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum RefreshStatus {
    /// Entities were replaced by the server view
    #[default]
    Completed,
    /// The refresh failed; queue changes were still persisted
    Failed { error: String },
}

/// Aggregated result of a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Mutations the remote store applied
    pub synced_count: usize,
    /// Mutations that failed and stay queued
    pub failed_count: usize,
    /// One outcome per attempted mutation, in dispatch order
    pub outcomes: Vec<MutationOutcome>,
    /// Result of the consistency refresh
    pub refresh: RefreshStatus,
    /// When the pass completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
}

impl SyncReport {
    /// Create an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful dispatch.
    pub fn record_synced(
        &mut self,
        mutation: &MutationRecord,
        entity_id: &str,
        server_id: Option<EntityId>,
    ) {
        self.synced_count += 1;
        self.outcomes.push(MutationOutcome {
            mutation_id: mutation.id.clone(),
            kind: mutation.kind,
            collection: mutation.collection,
            entity_id: entity_id.to_string(),
            status: OutcomeStatus::Synced { server_id },
        });
    }

    /// Record a failed or withheld dispatch.
    pub fn record_failed(
        &mut self,
        mutation: &MutationRecord,
        entity_id: &str,
        error: impl Into<String>,
    ) {
        self.failed_count += 1;
        self.outcomes.push(MutationOutcome {
            mutation_id: mutation.id.clone(),
            kind: mutation.kind,
            collection: mutation.collection,
            entity_id: entity_id.to_string(),
            status: OutcomeStatus::Failed {
                error: error.into(),
            },
        });
    }

    /// Ids of mutations the remote store applied.
    pub fn synced_ids(&self) -> HashSet<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.is_synced())
            .map(|o| o.mutation_id.as_str())
            .collect()
    }

    /// Look up the outcome for a mutation.
    pub fn outcome(&self, mutation_id: &str) -> Option<&MutationOutcome> {
        self.outcomes.iter().find(|o| o.mutation_id == mutation_id)
    }

    /// True when every mutation synced and the refresh completed.
    pub fn is_clean(&self) -> bool {
        self.failed_count == 0 && self.refresh == RefreshStatus::Completed
    }
}

/// Remove every mutation the report marks as synced, keeping the rest in
/// their original relative order.
///
/// Matching is by mutation id. Mutations the pass never attempted (for
/// example ones appended while it was running) are kept.
///
/// Returns the number of mutations removed.
pub fn retain_failed(queue: &mut Vec<MutationRecord>, report: &SyncReport) -> usize {
    let synced = report.synced_ids();
    let before = queue.len();
    queue.retain(|m| !synced.contains(m.id.as_str()));
    before - queue.len()
}

/// Rewrite every string in `payload` that names an aliased temporary id.
pub fn resolve_references(
    payload: &serde_json::Value,
    aliases: &BTreeMap<EntityId, EntityId>,
) -> serde_json::Value {
    if aliases.is_empty() {
        return payload.clone();
    }

    match payload {
        serde_json::Value::String(s) => match aliases.get(s) {
            Some(server_id) => serde_json::Value::String(server_id.clone()),
            None => payload.clone(),
        },
        serde_json::Value::Array(items) => serde_json::Value::Array(
            items.iter().map(|v| resolve_references(v, aliases)).collect(),
        ),
        serde_json::Value::Object(fields) => serde_json::Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), resolve_references(v, aliases)))
                .collect(),
        ),
        _ => payload.clone(),
    }
}

/// Find a temporary id this mutation depends on that the server has not
/// confirmed yet.
///
/// A create's own temporary id is not a dependency. Any other temporary id,
/// as the target or anywhere in the payload, must already be aliased for the
/// mutation to be sent.
pub fn unconfirmed_dependency(
    mutation: &MutationRecord,
    aliases: &BTreeMap<EntityId, EntityId>,
) -> Option<EntityId> {
    let own_id = if mutation.is_create() {
        mutation.entity_id().ok()
    } else {
        None
    };

    let mut found = None;
    visit_strings(&mutation.payload, &mut |s| {
        if found.is_none()
            && is_temporary_id(s)
            && Some(s) != own_id
            && !aliases.contains_key(s)
        {
            found = Some(s.to_string());
        }
    });
    found
}

fn visit_strings<'a>(value: &'a serde_json::Value, f: &mut impl FnMut(&'a str)) {
    match value {
        serde_json::Value::String(s) => f(s),
        serde_json::Value::Array(items) => {
            for item in items {
                visit_strings(item, f);
            }
        }
        serde_json::Value::Object(fields) => {
            for item in fields.values() {
                visit_strings(item, f);
            }
        }
        _ => {}
    }
}

/// Rebuild local entities after a full refresh.
///
/// The server view wins for everything it contains; mutations still queued
/// are replayed on top so unconfirmed local writes stay visible.
pub fn rebase(
    server_view: Entities,
    pending: &[MutationRecord],
    aliases: &BTreeMap<EntityId, EntityId>,
    timestamp: Timestamp,
) -> Entities {
    let mut entities = server_view;
    for mutation in pending {
        // Queued records were validated when recorded
        let _ = entities.apply_local(mutation, aliases, timestamp);
    }
    entities
}
