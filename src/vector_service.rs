//! # Encrypted vector service client
//!
//! The encrypted index lives in a remote service; this module only describes the contract
//! ([`VectorServiceClient`]) and ships one HTTP implementation ([`HttpVectorClient`]).
//! Similarity search, encryption at rest and storage layout all belong to the service.
//!
//! ## Wire format
//! JSON over REST, authenticated with an `X-API-Key` header. Index keys travel as base64.
//!
//! ```text
//! GET  /v1/indexes/list       -> {"indexes": ["support_tickets", ...]}
//! POST /v1/indexes/create     {index_name, index_key, index_config}
//! POST /v1/indexes/describe   {index_name, index_key}
//! POST /v1/indexes/delete     {index_name}
//! POST /v1/vectors/upsert     {index_name, index_key, items}
//! POST /v1/vectors/query      {index_name, index_key, query_vector, top_k, include}
//!                             -> {"results": [{id, metadata, distance}, ...]}
//! ```
//!
//! ## Status mapping
//! | status | error |
//! |---|---|
//! | 401 | [`SupportError::Unauthorized`] |
//! | 403 | [`SupportError::KeyMismatch`] |
//! | 404 | [`SupportError::IndexNotFound`] |
//! | 5xx, connect, timeout | [`SupportError::RemoteUnavailable`] |
//! | anything else | [`SupportError::Remote`] |
//!
//! A rejected API key (401) is never a mismatch; only 403 routes into index recovery.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rand::RngCore;
use rand::rngs::OsRng;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::error::{SupportError, SupportResult};
use crate::key_store::{EncryptionKey, KEY_LENGTH};

/// Similarity metric the service uses when ranking results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Euclidean,
    SquaredEuclidean,
}

/// Parameters fixed when an index is created.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    pub dimension: usize,
    pub metric: DistanceMetric,
}

/// A live, key-bound reference to a remote index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHandle {
    pub index_name: String,
    pub key: EncryptionKey,
}

impl IndexHandle {
    pub fn new(index_name: impl Into<String>, key: EncryptionKey) -> Self {
        Self {
            index_name: index_name.into(),
            key,
        }
    }
}

/// Payload stored next to every vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketMetadata {
    pub text: String,
    pub category: String,
}

/// One vector sent to the service. `id` is the only addressing mechanism.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertItem {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: TicketMetadata,
}

/// Optional fields a query may ask the service to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryField {
    Metadata,
    Distance,
}

/// One ranked hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub id: String,
    #[serde(default)]
    pub metadata: Option<TicketMetadata>,
    #[serde(default)]
    pub distance: Option<f32>,
}

/// Contract of the remote encrypted vector service.
///
/// Every method is a network round trip. None of them retry.
#[async_trait]
pub trait VectorServiceClient: Send + Sync {
    /// Produce a fresh key of the length the service expects.
    async fn generate_key(&self) -> SupportResult<EncryptionKey>;

    async fn list_indexes(&self) -> SupportResult<BTreeSet<String>>;

    async fn create_index(
        &self,
        index_name: &str,
        key: &EncryptionKey,
        config: &IndexConfig,
    ) -> SupportResult<IndexHandle>;

    /// Open an existing index. Fails with [`SupportError::KeyMismatch`] when `key` is not
    /// the key the index was created with.
    async fn load_index(&self, index_name: &str, key: &EncryptionKey)
    -> SupportResult<IndexHandle>;

    async fn delete_index(&self, index_name: &str) -> SupportResult<()>;

    /// Insert or overwrite items by id.
    async fn upsert(&self, handle: &IndexHandle, items: Vec<UpsertItem>) -> SupportResult<()>;

    /// Rank stored items against `vector`, best first.
    async fn query(
        &self,
        handle: &IndexHandle,
        vector: &[f32],
        top_k: usize,
        include: &[QueryField],
    ) -> SupportResult<Vec<QueryResult>>;
}

#[derive(Deserialize)]
struct ListIndexesResponse {
    indexes: Vec<String>,
}

#[derive(Deserialize)]
struct QueryResponse {
    results: Vec<QueryResult>,
}

/// REST client for the hosted encrypted vector service.
#[derive(Debug, Clone)]
pub struct HttpVectorClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl HttpVectorClient {
    /// Build a client for `base_url`. `timeout` is applied to every request; `None` keeps
    /// reqwest's default of waiting indefinitely.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Option<Duration>,
    ) -> SupportResult<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| SupportError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn encode_key(key: &EncryptionKey) -> String {
        BASE64.encode(key.as_bytes())
    }

    /// Send a request and turn transport errors and non-success statuses into
    /// [`SupportError`] variants. `index_name` is only used for error messages.
    async fn send(&self, request: RequestBuilder, index_name: &str) -> SupportResult<String> {
        let response = request
            .header("X-API-Key", &self.api_key)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        debug!(status = status.as_u16(), "Vector service responded");

        if status.is_success() {
            return Ok(body);
        }

        Err(match status {
            StatusCode::UNAUTHORIZED => SupportError::Unauthorized(body),
            StatusCode::FORBIDDEN => SupportError::KeyMismatch(index_name.to_string()),
            StatusCode::NOT_FOUND => SupportError::IndexNotFound(index_name.to_string()),
            s if s.is_server_error() => {
                SupportError::RemoteUnavailable(format!("{} {}", s.as_u16(), body))
            }
            s => SupportError::Remote(format!("{} {}", s.as_u16(), body)),
        })
    }
}

fn transport_error(err: reqwest::Error) -> SupportError {
    if err.is_connect() || err.is_timeout() || err.is_request() {
        SupportError::RemoteUnavailable(err.to_string())
    } else {
        SupportError::Remote(err.to_string())
    }
}

#[async_trait]
impl VectorServiceClient for HttpVectorClient {
    async fn generate_key(&self) -> SupportResult<EncryptionKey> {
        let mut bytes = vec![0u8; KEY_LENGTH];
        OsRng.fill_bytes(&mut bytes);
        Ok(EncryptionKey::new(bytes))
    }

    async fn list_indexes(&self) -> SupportResult<BTreeSet<String>> {
        let body = self
            .send(self.http.get(self.url("/v1/indexes/list")), "")
            .await?;
        let parsed: ListIndexesResponse = serde_json::from_str(&body)?;
        Ok(parsed.indexes.into_iter().collect())
    }

    async fn create_index(
        &self,
        index_name: &str,
        key: &EncryptionKey,
        config: &IndexConfig,
    ) -> SupportResult<IndexHandle> {
        let payload = json!({
            "index_name": index_name,
            "index_key": Self::encode_key(key),
            "index_config": config,
        });
        self.send(
            self.http.post(self.url("/v1/indexes/create")).json(&payload),
            index_name,
        )
        .await?;
        Ok(IndexHandle::new(index_name, key.clone()))
    }

    async fn load_index(
        &self,
        index_name: &str,
        key: &EncryptionKey,
    ) -> SupportResult<IndexHandle> {
        let payload = json!({
            "index_name": index_name,
            "index_key": Self::encode_key(key),
        });
        self.send(
            self.http
                .post(self.url("/v1/indexes/describe"))
                .json(&payload),
            index_name,
        )
        .await?;
        Ok(IndexHandle::new(index_name, key.clone()))
    }

    async fn delete_index(&self, index_name: &str) -> SupportResult<()> {
        let payload = json!({ "index_name": index_name });
        self.send(
            self.http.post(self.url("/v1/indexes/delete")).json(&payload),
            index_name,
        )
        .await?;
        Ok(())
    }

    async fn upsert(&self, handle: &IndexHandle, items: Vec<UpsertItem>) -> SupportResult<()> {
        let payload = json!({
            "index_name": handle.index_name,
            "index_key": Self::encode_key(&handle.key),
            "items": items,
        });
        self.send(
            self.http.post(self.url("/v1/vectors/upsert")).json(&payload),
            &handle.index_name,
        )
        .await?;
        Ok(())
    }

    async fn query(
        &self,
        handle: &IndexHandle,
        vector: &[f32],
        top_k: usize,
        include: &[QueryField],
    ) -> SupportResult<Vec<QueryResult>> {
        let payload = json!({
            "index_name": handle.index_name,
            "index_key": Self::encode_key(&handle.key),
            "query_vector": vector,
            "top_k": top_k,
            "include": include,
        });
        let body = self
            .send(
                self.http.post(self.url("/v1/vectors/query")).json(&payload),
                &handle.index_name,
            )
            .await?;
        let parsed: QueryResponse = serde_json::from_str(&body)?;
        Ok(parsed.results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    const API_KEY: &str = "test-api-key";

    fn client_for(server: &MockServer) -> HttpVectorClient {
        HttpVectorClient::new(server.base_url(), API_KEY, Some(Duration::from_secs(5))).unwrap()
    }

    fn key() -> EncryptionKey {
        EncryptionKey::new(vec![42; KEY_LENGTH])
    }

    #[tokio::test]
    async fn test_generate_key_has_service_length() {
        let client = HttpVectorClient::new("http://localhost:8000", API_KEY, None).unwrap();
        let first = client.generate_key().await.unwrap();
        let second = client.generate_key().await.unwrap();
        assert_eq!(first.len(), KEY_LENGTH);
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_list_indexes() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v1/indexes/list")
                    .header("X-API-Key", API_KEY);
                then.status(200)
                    .json_body(json!({ "indexes": ["support_tickets", "other"] }));
            })
            .await;

        let indexes = client_for(&server).list_indexes().await.unwrap();

        mock.assert_async().await;
        assert!(indexes.contains("support_tickets"));
        assert_eq!(indexes.len(), 2);
    }

    #[tokio::test]
    async fn test_load_index_forbidden_is_key_mismatch() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/indexes/describe");
                then.status(403).body("invalid index key");
            })
            .await;

        let err = client_for(&server)
            .load_index("support_tickets", &key())
            .await
            .unwrap_err();
        assert!(matches!(err, SupportError::KeyMismatch(ref name) if name == "support_tickets"));
    }

    #[tokio::test]
    async fn test_unauthorized_is_not_key_mismatch() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/indexes/describe");
                then.status(401).body("bad api key");
            })
            .await;

        let err = client_for(&server)
            .load_index("support_tickets", &key())
            .await
            .unwrap_err();
        assert!(matches!(err, SupportError::Unauthorized(_)));
        assert!(!err.is_key_mismatch());
    }

    #[tokio::test]
    async fn test_server_error_is_remote_unavailable() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/indexes/describe");
                then.status(503).body("maintenance");
            })
            .await;

        let err = client_for(&server)
            .load_index("support_tickets", &key())
            .await
            .unwrap_err();
        assert!(matches!(err, SupportError::RemoteUnavailable(_)));
    }

    #[tokio::test]
    async fn test_missing_index_is_not_found() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/indexes/describe");
                then.status(404);
            })
            .await;

        let err = client_for(&server)
            .load_index("support_tickets", &key())
            .await
            .unwrap_err();
        assert!(matches!(err, SupportError::IndexNotFound(_)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_remote_unavailable() {
        // Nothing listens on port 9 on a test machine.
        let client = HttpVectorClient::new(
            "http://127.0.0.1:9",
            API_KEY,
            Some(Duration::from_secs(2)),
        )
        .unwrap();
        let err = client.list_indexes().await.unwrap_err();
        assert!(matches!(err, SupportError::RemoteUnavailable(_)));
    }

    #[tokio::test]
    async fn test_create_index_sends_encoded_key() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/indexes/create")
                    .body_includes(BASE64.encode([42u8; KEY_LENGTH]))
                    .body_includes("\"metric\":\"cosine\"");
                then.status(200).json_body(json!({ "status": "success" }));
            })
            .await;

        let config = IndexConfig {
            dimension: 384,
            metric: DistanceMetric::Cosine,
        };
        let handle = client_for(&server)
            .create_index("support_tickets", &key(), &config)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(handle.index_name, "support_tickets");
        assert_eq!(handle.key, key());
    }

    #[tokio::test]
    async fn test_query_parses_ranked_results() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/vectors/query");
                then.status(200).json_body(json!({
                    "results": [
                        {
                            "id": "ticket_4",
                            "metadata": { "text": "Issue: Cannot receive SMS codes", "category": "technical" },
                            "distance": 0.12
                        },
                        { "id": "ticket_9" }
                    ]
                }));
            })
            .await;

        let handle = IndexHandle::new("support_tickets", key());
        let results = client_for(&server)
            .query(&handle, &[0.1, 0.2, 0.3], 2, &[QueryField::Metadata])
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "ticket_4");
        assert_eq!(
            results[0].metadata.as_ref().map(|m| m.category.as_str()),
            Some("technical")
        );
        assert!(results[1].metadata.is_none());
    }
}
