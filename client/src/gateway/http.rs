//! REST client for the remote document store.
//!
//! | Operation | Request                                    |
//! |-----------|--------------------------------------------|
//! | create    | `POST   {base}/users/{owner}/{collection}`      |
//! | update    | `PATCH  {base}/users/{owner}/{collection}/{id}` |
//! | delete    | `DELETE {base}/users/{owner}/{collection}/{id}` |
//! | list      | `GET    {base}/users/{owner}/{collection}`      |
//!
//! Create answers `{"id": "..."}`; list answers an array of documents, each
//! carrying its `id` field. Owner and document ids are percent-encoded as
//! single path segments.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use tally_engine::{Collection, EntityId};

use super::{GatewayError, RemoteEntity, RemoteGateway};

#[derive(Debug, Deserialize)]
struct CreatedDocument {
    id: EntityId,
}

/// [`RemoteGateway`] over HTTP and JSON.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpGateway {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| GatewayError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(GatewayError::InvalidUrl(base_url.to_string()));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            token: None,
        })
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn url(&self, owner: &str, collection: Collection, id: Option<&str>) -> Url {
        let mut url = self.base_url.clone();
        // `new` rejects cannot-be-a-base URLs, so segments are always available
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push("users")
                .push(owner)
                .push(collection.as_str());
            if let Some(id) = id {
                segments.push(id);
            }
        }
        url
    }

    fn collection_url(&self, owner: &str, collection: Collection) -> Url {
        self.url(owner, collection, None)
    }

    fn document_url(&self, owner: &str, collection: Collection, id: &str) -> Url {
        self.url(owner, collection, Some(id))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(
        &self,
        request: RequestBuilder,
        collection: Collection,
        id: Option<&str>,
    ) -> Result<Response, GatewayError> {
        let response = self.authorized(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(match (status, id) {
            (StatusCode::NOT_FOUND, Some(id)) => GatewayError::NotFound {
                collection,
                id: id.to_string(),
            },
            (s, _) if s.is_client_error() => GatewayError::Rejected(if body.is_empty() {
                s.to_string()
            } else {
                body
            }),
            (s, _) => GatewayError::Status {
                status: s.as_u16(),
                body,
            },
        })
    }
}

fn to_remote_entity(document: serde_json::Value) -> Result<RemoteEntity, GatewayError> {
    let id = document
        .get("id")
        .and_then(|v| v.as_str())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| GatewayError::Decode("document without an id".into()))?
        .to_string();

    if !document.is_object() {
        return Err(GatewayError::Decode(format!("document {id} is not an object")));
    }

    Ok(RemoteEntity { id, data: document })
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn create(
        &self,
        owner: &str,
        collection: Collection,
        payload: &serde_json::Value,
    ) -> Result<EntityId, GatewayError> {
        let request = self
            .client
            .post(self.collection_url(owner, collection))
            .json(payload);
        let response = self.send(request, collection, None).await?;

        let created: CreatedDocument = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;

        tracing::debug!(owner = %owner, %collection, id = %created.id, "Document created");
        Ok(created.id)
    }

    async fn update(
        &self,
        owner: &str,
        collection: Collection,
        id: &str,
        payload: &serde_json::Value,
    ) -> Result<(), GatewayError> {
        let request = self
            .client
            .patch(self.document_url(owner, collection, id))
            .json(payload);
        self.send(request, collection, Some(id)).await?;
        Ok(())
    }

    async fn delete(
        &self,
        owner: &str,
        collection: Collection,
        id: &str,
    ) -> Result<(), GatewayError> {
        let request = self.client.delete(self.document_url(owner, collection, id));
        self.send(request, collection, Some(id)).await?;
        Ok(())
    }

    async fn list(
        &self,
        owner: &str,
        collection: Collection,
    ) -> Result<Vec<RemoteEntity>, GatewayError> {
        let request = self.client.get(self.collection_url(owner, collection));
        let response = self.send(request, collection, None).await?;

        let documents: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;

        documents.into_iter().map(to_remote_entity).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn urls_follow_document_hierarchy() {
        let gateway = HttpGateway::new("https://api.tally.test/", Duration::from_secs(5)).unwrap();

        assert_eq!(
            gateway.collection_url("alice", Collection::Budget).as_str(),
            "https://api.tally.test/users/alice/budget"
        );
        assert_eq!(
            gateway.document_url("alice", Collection::Expenses, "srv-1").as_str(),
            "https://api.tally.test/users/alice/expenses/srv-1"
        );
    }

    #[test]
    fn base_path_is_kept() {
        let gateway =
            HttpGateway::new("http://localhost:8080/api", Duration::from_secs(5)).unwrap();

        assert_eq!(
            gateway.collection_url("alice", Collection::Subscriptions).as_str(),
            "http://localhost:8080/api/users/alice/subscriptions"
        );
    }

    #[test]
    fn ids_cannot_escape_their_path_segment() {
        let gateway = HttpGateway::new("https://api.tally.test", Duration::from_secs(5)).unwrap();

        let url = gateway.document_url("a/b", Collection::Expenses, "x?y#z");
        assert_eq!(url.as_str(), "https://api.tally.test/users/a%2Fb/expenses/x%3Fy%23z");
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
    }

    #[test]
    fn malformed_base_url_is_rejected() {
        assert!(matches!(
            HttpGateway::new("not a url", Duration::from_secs(5)),
            Err(GatewayError::InvalidUrl(_))
        ));
        assert!(matches!(
            HttpGateway::new("mailto:ops@tally.test", Duration::from_secs(5)),
            Err(GatewayError::InvalidUrl(_))
        ));
    }

    #[test]
    fn listed_documents_need_an_id() {
        let entity = to_remote_entity(json!({"id": "srv-1", "amount": 3})).unwrap();
        assert_eq!(entity.id, "srv-1");
        assert_eq!(entity.data["amount"], 3);

        assert!(matches!(
            to_remote_entity(json!({"amount": 3})),
            Err(GatewayError::Decode(_))
        ));
        assert!(matches!(
            to_remote_entity(json!({"id": ""})),
            Err(GatewayError::Decode(_))
        ));
    }
}
