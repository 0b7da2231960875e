//! Mutation records: queued local changes awaiting remote application.
//!
//! Local changes are expressed as mutations rather than direct writes to the
//! remote store. A mutation is immutable once recorded; it leaves the queue
//! only after the remote store confirms it.

use crate::{error::Result, Collection, EntityId, Error, MutationId, OwnerId, Timestamp};
use serde::{Deserialize, Serialize};

/// Prefix of locally generated entity ids.
///
/// Any id with this prefix has not been issued by the remote store.
pub const TEMP_ID_PREFIX: &str = "local-";

/// Payload field that names the target entity.
pub(crate) const ID_FIELD: &str = "id";

/// Whether an entity id is a temporary, locally generated one.
pub fn is_temporary_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// The kind of change a mutation applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MutationKind::Create => write!(f, "create"),
            MutationKind::Update => write!(f, "update"),
            MutationKind::Delete => write!(f, "delete"),
        }
    }
}

/// A single queued local change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationRecord {
    /// Client-generated token, unique within the queue
    pub id: MutationId,
    /// What the mutation does
    pub kind: MutationKind,
    /// Target collection
    pub collection: Collection,
    /// Entity data; `payload.id` names the target entity
    pub payload: serde_json::Value,
    /// When the mutation was recorded locally
    pub created_at: Timestamp,
    /// The user this mutation belongs to
    pub owner_id: OwnerId,
}

impl MutationRecord {
    /// Create a new mutation record.
    pub fn new(
        id: impl Into<MutationId>,
        kind: MutationKind,
        collection: Collection,
        payload: serde_json::Value,
        created_at: Timestamp,
        owner_id: impl Into<OwnerId>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            collection,
            payload,
            created_at,
            owner_id: owner_id.into(),
        }
    }

    /// The id of the entity this mutation targets.
    pub fn entity_id(&self) -> Result<&str> {
        self.payload
            .get(ID_FIELD)
            .and_then(|v| v.as_str())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::MissingEntityId(self.id.clone()))
    }

    /// Whether this mutation creates a new entity.
    pub fn is_create(&self) -> bool {
        self.kind == MutationKind::Create
    }

    /// The payload as sent to the remote store: the entity id is removed,
    /// since the remote store either assigns it (create) or receives it
    /// out of band (update/delete).
    pub fn dispatch_payload(&self) -> serde_json::Value {
        let mut payload = self.payload.clone();
        if let Some(fields) = payload.as_object_mut() {
            fields.remove(ID_FIELD);
        }
        payload
    }

    /// Check the payload has the shape the engine expects.
    ///
    /// Payloads must be JSON objects carrying a non-empty `id`. A create must
    /// carry a temporary id so it can be told apart from confirmed entities.
    pub fn validate(&self) -> Result<()> {
        if !self.payload.is_object() {
            return Err(Error::InvalidPayload {
                mutation: self.id.clone(),
                reason: "payload must be a JSON object".to_string(),
            });
        }

        let entity_id = self.entity_id()?;
        if self.is_create() && !is_temporary_id(entity_id) {
            return Err(Error::InvalidPayload {
                mutation: self.id.clone(),
                reason: format!("create must carry a temporary id, got '{}'", entity_id),
            });
        }

        Ok(())
    }

    /// The entity id this mutation would target once `aliases` are applied.
    pub fn resolved_entity_id<'a>(
        &'a self,
        aliases: &'a std::collections::BTreeMap<EntityId, EntityId>,
    ) -> Result<&'a str> {
        let id = self.entity_id()?;
        Ok(aliases.get(id).map(String::as_str).unwrap_or(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn create_expense() -> MutationRecord {
        MutationRecord::new(
            "mut-1",
            MutationKind::Create,
            Collection::Expenses,
            json!({"id": "local-1", "amount": 42.0, "category": "rent"}),
            1000,
            "alice",
        )
    }

    #[test]
    fn entity_id_from_payload() {
        let record = create_expense();
        assert_eq!(record.entity_id().unwrap(), "local-1");
        assert!(record.is_create());
    }

    #[test]
    fn missing_entity_id() {
        let record = MutationRecord::new(
            "mut-2",
            MutationKind::Update,
            Collection::Budget,
            json!({"limit": 500}),
            1000,
            "alice",
        );
        assert_eq!(
            record.entity_id(),
            Err(Error::MissingEntityId("mut-2".into()))
        );
    }

    #[test]
    fn dispatch_payload_strips_id() {
        let record = create_expense();
        assert_eq!(
            record.dispatch_payload(),
            json!({"amount": 42.0, "category": "rent"})
        );
        // The stored record is untouched
        assert_eq!(record.payload["id"], "local-1");
    }

    #[test]
    fn validate_rejects_non_object() {
        let record = MutationRecord::new(
            "mut-3",
            MutationKind::Update,
            Collection::Expenses,
            json!([1, 2, 3]),
            1000,
            "alice",
        );
        assert!(matches!(
            record.validate(),
            Err(Error::InvalidPayload { .. })
        ));
    }

    #[test]
    fn validate_rejects_create_with_server_id() {
        let record = MutationRecord::new(
            "mut-4",
            MutationKind::Create,
            Collection::Expenses,
            json!({"id": "srv-1", "amount": 1}),
            1000,
            "alice",
        );
        assert!(matches!(
            record.validate(),
            Err(Error::InvalidPayload { .. })
        ));
        assert!(create_expense().validate().is_ok());
    }

    #[test]
    fn resolved_entity_id_follows_aliases() {
        let record = MutationRecord::new(
            "mut-5",
            MutationKind::Update,
            Collection::Expenses,
            json!({"id": "local-1", "amount": 50.0}),
            2000,
            "alice",
        );

        let mut aliases = BTreeMap::new();
        assert_eq!(record.resolved_entity_id(&aliases).unwrap(), "local-1");

        aliases.insert("local-1".to_string(), "srv-7".to_string());
        assert_eq!(record.resolved_entity_id(&aliases).unwrap(), "srv-7");
    }

    #[test]
    fn temporary_ids() {
        assert!(is_temporary_id("local-abc"));
        assert!(!is_temporary_id("abc"));
        assert!(!is_temporary_id("srv-local-abc"));
    }

    #[test]
    fn serialization_format() {
        let record = create_expense();
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"kind\":\"create\""));
        assert!(json.contains("\"collection\":\"expenses\""));
        assert!(json.contains("\"createdAt\":1000"));
        assert!(json.contains("\"ownerId\":\"alice\""));

        let parsed: MutationRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, parsed);
    }
}
