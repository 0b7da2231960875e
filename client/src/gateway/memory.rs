//! In-memory remote store with failure injection.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tally_engine::{Collection, EntityId, OwnerId};
use tokio::sync::Mutex;

use super::{GatewayError, RemoteEntity, RemoteGateway};

/// One request as the gateway received it.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
    Create {
        owner: OwnerId,
        collection: Collection,
        payload: serde_json::Value,
    },
    Update {
        owner: OwnerId,
        collection: Collection,
        id: EntityId,
        payload: serde_json::Value,
    },
    Delete {
        owner: OwnerId,
        collection: Collection,
        id: EntityId,
    },
    List {
        owner: OwnerId,
        collection: Collection,
    },
}

impl GatewayCall {
    pub fn collection(&self) -> Collection {
        match self {
            GatewayCall::Create { collection, .. }
            | GatewayCall::Update { collection, .. }
            | GatewayCall::Delete { collection, .. }
            | GatewayCall::List { collection, .. } => *collection,
        }
    }

    pub fn payload(&self) -> Option<&serde_json::Value> {
        match self {
            GatewayCall::Create { payload, .. } | GatewayCall::Update { payload, .. } => {
                Some(payload)
            }
            _ => None,
        }
    }

    /// Anything but a list.
    pub fn is_write(&self) -> bool {
        !matches!(self, GatewayCall::List { .. })
    }
}

type FailureRule = Box<dyn Fn(&GatewayCall) -> bool + Send + Sync>;

#[derive(Default)]
struct State {
    documents: BTreeMap<(OwnerId, Collection), BTreeMap<EntityId, serde_json::Value>>,
    calls: Vec<GatewayCall>,
    rules: Vec<(FailureRule, String)>,
    fail_lists: bool,
    latency: Option<Duration>,
}

/// [`RemoteGateway`] backed by a map, for tests and local development.
///
/// Server ids are `srv-1`, `srv-2`, ... in creation order.
#[derive(Default)]
pub struct MemoryGateway {
    state: Mutex<State>,
    next_id: AtomicU64,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every call matching `rule` with `message`.
    pub async fn fail_when<F>(&self, rule: F, message: impl Into<String>)
    where
        F: Fn(&GatewayCall) -> bool + Send + Sync + 'static,
    {
        self.state
            .lock()
            .await
            .rules
            .push((Box::new(rule), message.into()));
    }

    pub async fn clear_failures(&self) {
        let mut state = self.state.lock().await;
        state.rules.clear();
        state.fail_lists = false;
    }

    /// Make every list call fail with a 503.
    pub async fn fail_lists(&self, fail: bool) {
        self.state.lock().await.fail_lists = fail;
    }

    /// Delay every call, so overlapping passes can be observed.
    pub async fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().await.latency = latency;
    }

    /// Store a document directly, as another device would.
    pub async fn insert(
        &self,
        owner: &str,
        collection: Collection,
        id: &str,
        mut data: serde_json::Value,
    ) {
        if let Some(fields) = data.as_object_mut() {
            fields.insert("id".into(), id.into());
        }
        self.state
            .lock()
            .await
            .documents
            .entry((owner.to_string(), collection))
            .or_default()
            .insert(id.to_string(), data);
    }

    pub async fn document(
        &self,
        owner: &str,
        collection: Collection,
        id: &str,
    ) -> Option<serde_json::Value> {
        self.state
            .lock()
            .await
            .documents
            .get(&(owner.to_string(), collection))
            .and_then(|docs| docs.get(id).cloned())
    }

    pub async fn document_count(&self, owner: &str, collection: Collection) -> usize {
        self.state
            .lock()
            .await
            .documents
            .get(&(owner.to_string(), collection))
            .map_or(0, BTreeMap::len)
    }

    /// Every call received so far, in order.
    pub async fn calls(&self) -> Vec<GatewayCall> {
        self.state.lock().await.calls.clone()
    }

    /// Log the call, wait out any latency, and apply failure rules.
    async fn begin(&self, call: GatewayCall) -> Result<(), GatewayError> {
        let latency = {
            let mut state = self.state.lock().await;
            state.calls.push(call.clone());
            state.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let state = self.state.lock().await;
        if state.fail_lists && !call.is_write() {
            return Err(GatewayError::Status {
                status: 503,
                body: "list unavailable".into(),
            });
        }
        match state.rules.iter().find(|(rule, _)| rule(&call)) {
            Some((_, message)) => Err(GatewayError::Rejected(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteGateway for MemoryGateway {
    async fn create(
        &self,
        owner: &str,
        collection: Collection,
        payload: &serde_json::Value,
    ) -> Result<EntityId, GatewayError> {
        self.begin(GatewayCall::Create {
            owner: owner.to_string(),
            collection,
            payload: payload.clone(),
        })
        .await?;

        if !payload.is_object() {
            return Err(GatewayError::Rejected("payload must be an object".into()));
        }

        let id = format!("srv-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.insert(owner, collection, &id, payload.clone()).await;
        Ok(id)
    }

    async fn update(
        &self,
        owner: &str,
        collection: Collection,
        id: &str,
        payload: &serde_json::Value,
    ) -> Result<(), GatewayError> {
        self.begin(GatewayCall::Update {
            owner: owner.to_string(),
            collection,
            id: id.to_string(),
            payload: payload.clone(),
        })
        .await?;

        let mut state = self.state.lock().await;
        let document = state
            .documents
            .get_mut(&(owner.to_string(), collection))
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| GatewayError::NotFound {
                collection,
                id: id.to_string(),
            })?;

        if let (Some(fields), Some(changes)) = (document.as_object_mut(), payload.as_object()) {
            for (key, value) in changes {
                if key != "id" {
                    fields.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(())
    }

    async fn delete(
        &self,
        owner: &str,
        collection: Collection,
        id: &str,
    ) -> Result<(), GatewayError> {
        self.begin(GatewayCall::Delete {
            owner: owner.to_string(),
            collection,
            id: id.to_string(),
        })
        .await?;

        // Deleting a missing document succeeds
        if let Some(docs) = self
            .state
            .lock()
            .await
            .documents
            .get_mut(&(owner.to_string(), collection))
        {
            docs.remove(id);
        }
        Ok(())
    }

    async fn list(
        &self,
        owner: &str,
        collection: Collection,
    ) -> Result<Vec<RemoteEntity>, GatewayError> {
        self.begin(GatewayCall::List {
            owner: owner.to_string(),
            collection,
        })
        .await?;

        let state = self.state.lock().await;
        Ok(state
            .documents
            .get(&(owner.to_string(), collection))
            .map(|docs| {
                docs.iter()
                    .map(|(id, data)| RemoteEntity {
                        id: id.clone(),
                        data: data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn create_assigns_sequential_ids() {
        let gateway = MemoryGateway::new();

        let a = gateway
            .create("alice", Collection::Expenses, &json!({"amount": 1}))
            .await
            .unwrap();
        let b = gateway
            .create("alice", Collection::Expenses, &json!({"amount": 2}))
            .await
            .unwrap();

        assert_eq!(a, "srv-1");
        assert_eq!(b, "srv-2");
        assert_eq!(
            gateway.document("alice", Collection::Expenses, "srv-2").await.unwrap(),
            json!({"id": "srv-2", "amount": 2})
        );
    }

    #[tokio::test]
    async fn update_merges_and_requires_existing_document() {
        let gateway = MemoryGateway::new();
        gateway
            .insert("alice", Collection::Budget, "b1", json!({"limit": 100, "month": "2024-01"}))
            .await;

        gateway
            .update("alice", Collection::Budget, "b1", &json!({"limit": 150}))
            .await
            .unwrap();
        assert_eq!(
            gateway.document("alice", Collection::Budget, "b1").await.unwrap(),
            json!({"id": "b1", "limit": 150, "month": "2024-01"})
        );

        let missing = gateway
            .update("alice", Collection::Budget, "b2", &json!({"limit": 1}))
            .await;
        assert!(matches!(missing, Err(GatewayError::NotFound { .. })));
    }

    #[tokio::test]
    async fn failure_rules_reject_matching_calls() {
        let gateway = MemoryGateway::new();
        gateway
            .fail_when(
                |call| call.payload().is_some_and(|p| p["amount"] == json!(-1)),
                "amount must be positive",
            )
            .await;

        let rejected = gateway
            .create("alice", Collection::Expenses, &json!({"amount": -1}))
            .await;
        assert!(matches!(
            rejected,
            Err(GatewayError::Rejected(m)) if m == "amount must be positive"
        ));

        gateway
            .create("alice", Collection::Expenses, &json!({"amount": 1}))
            .await
            .unwrap();

        assert_eq!(gateway.calls().await.len(), 2);
        assert_eq!(gateway.document_count("alice", Collection::Expenses).await, 1);
    }

    #[tokio::test]
    async fn list_is_scoped_to_owner_and_collection() {
        let gateway = MemoryGateway::new();
        gateway.insert("alice", Collection::Expenses, "e1", json!({})).await;
        gateway.insert("bob", Collection::Expenses, "e2", json!({})).await;
        gateway.insert("alice", Collection::Subscriptions, "s1", json!({})).await;

        let listed = gateway.list("alice", Collection::Expenses).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "e1");

        gateway.fail_lists(true).await;
        assert!(gateway.list("alice", Collection::Expenses).await.is_err());
    }
}
