//! Entities: the last-known local copy of a user's finance data.

use crate::{
    error::Result, mutation::ID_FIELD, reconcile::resolve_references, Collection, EntityId,
    MutationKind, MutationRecord, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where an entity's current state came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Written locally and not yet confirmed by the remote store
    Local,
    /// As last seen on the remote store
    Remote,
}

/// A single expense, subscription or budget document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Temporary id until the create is confirmed, then the server id
    pub id: EntityId,
    /// Collection this entity belongs to
    pub collection: Collection,
    /// Entity fields, including `id`
    pub data: serde_json::Value,
    /// Local optimistic write or remote state
    pub origin: Origin,
    /// Last local modification time
    pub updated_at: Timestamp,
}

impl Entity {
    /// Create an entity as received from the remote store.
    pub fn remote(
        id: impl Into<EntityId>,
        collection: Collection,
        mut data: serde_json::Value,
        timestamp: Timestamp,
    ) -> Self {
        let id = id.into();
        set_id_field(&mut data, &id);
        Self {
            id,
            collection,
            data,
            origin: Origin::Remote,
            updated_at: timestamp,
        }
    }

    /// Whether this entity still carries a temporary id.
    pub fn is_pending(&self) -> bool {
        crate::is_temporary_id(&self.id)
    }
}

fn set_id_field(data: &mut serde_json::Value, id: &str) {
    if let Some(fields) = data.as_object_mut() {
        fields.insert(ID_FIELD.to_string(), serde_json::Value::String(id.to_string()));
    }
}

/// All entities of one user, organized by collection then id.
///
/// Uses BTreeMap for deterministic serialization order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entities {
    collections: BTreeMap<Collection, BTreeMap<EntityId, Entity>>,
}

impl Entities {
    /// Create an empty entity set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get an entity by collection and id.
    pub fn get(&self, collection: Collection, id: &str) -> Option<&Entity> {
        self.collections.get(&collection)?.get(id)
    }

    /// Insert or replace an entity.
    pub fn insert(&mut self, entity: Entity) {
        self.collections
            .entry(entity.collection)
            .or_default()
            .insert(entity.id.clone(), entity);
    }

    /// Remove an entity, returning it if present.
    pub fn remove(&mut self, collection: Collection, id: &str) -> Option<Entity> {
        self.collections.get_mut(&collection)?.remove(id)
    }

    /// Iterate the entities of one collection in id order.
    pub fn iter(&self, collection: Collection) -> impl Iterator<Item = &Entity> {
        self.collections
            .get(&collection)
            .into_iter()
            .flat_map(|c| c.values())
    }

    /// Iterate every entity across all collections.
    pub fn all(&self) -> impl Iterator<Item = &Entity> {
        self.collections.values().flat_map(|c| c.values())
    }

    /// Total entity count.
    pub fn len(&self) -> usize {
        self.collections.values().map(|c| c.len()).sum()
    }

    /// Check if there are no entities.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply a mutation optimistically, before the remote store has seen it.
    ///
    /// Create inserts the payload under its temporary id, update shallow-merges
    /// the payload's fields into the existing entity, delete removes it.
    /// Ids already exchanged for server ids are resolved through `aliases`.
    ///
    /// Returns whether the entity set changed. An update or delete of an
    /// unknown entity changes nothing.
    pub fn apply_local(
        &mut self,
        mutation: &MutationRecord,
        aliases: &BTreeMap<EntityId, EntityId>,
        timestamp: Timestamp,
    ) -> Result<bool> {
        let target = mutation.resolved_entity_id(aliases)?.to_string();
        let mut data = resolve_references(&mutation.payload, aliases);
        set_id_field(&mut data, &target);

        match mutation.kind {
            MutationKind::Create => {
                self.insert(Entity {
                    id: target,
                    collection: mutation.collection,
                    data,
                    origin: Origin::Local,
                    updated_at: timestamp,
                });
                Ok(true)
            }
            MutationKind::Update => {
                let Some(entity) = self
                    .collections
                    .get_mut(&mutation.collection)
                    .and_then(|c| c.get_mut(&target))
                else {
                    return Ok(false);
                };

                match data {
                    serde_json::Value::Object(changes) if entity.data.is_object() => {
                        if let Some(existing) = entity.data.as_object_mut() {
                            existing.extend(changes);
                        }
                    }
                    replacement => entity.data = replacement,
                }
                entity.origin = Origin::Local;
                entity.updated_at = timestamp;
                Ok(true)
            }
            MutationKind::Delete => Ok(self.remove(mutation.collection, &target).is_some()),
        }
    }

    /// Replace a temporary id with the server-assigned one.
    ///
    /// The entity moves to its new key and every string value equal to
    /// `temp_id` anywhere in any entity's data is rewritten, so references
    /// from other entities follow the rename. The confirmed entity is marked
    /// [`Origin::Remote`].
    ///
    /// Returns whether an entity was stored under `temp_id`.
    pub fn reassign_id(&mut self, collection: Collection, temp_id: &str, server_id: &str) -> bool {
        let moved = match self.remove(collection, temp_id) {
            Some(mut entity) => {
                entity.id = server_id.to_string();
                entity.origin = Origin::Remote;
                self.insert(entity);
                true
            }
            None => false,
        };

        for entity in self.collections.values_mut().flat_map(|c| c.values_mut()) {
            replace_string(&mut entity.data, temp_id, server_id);
        }

        moved
    }

    /// Whether `id` is used as an entity key or appears as a value anywhere.
    pub fn contains_reference(&self, id: &str) -> bool {
        self.all()
            .any(|entity| entity.id == id || value_contains(&entity.data, id))
    }

    /// Count of entities still carrying a temporary id.
    pub fn pending_count(&self) -> usize {
        self.all().filter(|e| e.is_pending()).count()
    }
}

fn replace_string(value: &mut serde_json::Value, from: &str, to: &str) {
    match value {
        serde_json::Value::String(s) if s == from => *s = to.to_string(),
        serde_json::Value::Array(items) => {
            for item in items {
                replace_string(item, from, to);
            }
        }
        serde_json::Value::Object(fields) => {
            for item in fields.values_mut() {
                replace_string(item, from, to);
            }
        }
        _ => {}
    }
}

fn value_contains(value: &serde_json::Value, needle: &str) -> bool {
    match value {
        serde_json::Value::String(s) => s == needle,
        serde_json::Value::Array(items) => items.iter().any(|v| value_contains(v, needle)),
        serde_json::Value::Object(fields) => fields.values().any(|v| value_contains(v, needle)),
        _ => false,
    }
}
