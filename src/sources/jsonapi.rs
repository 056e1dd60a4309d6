//! The concrete networked source (§6 "Wire protocol (JSON:API source)").
//!
//! Mirrors the teacher's `SyncTransport` pattern: the network layer is a
//! user-provided trait object, not a concrete HTTP client baked into the
//! crate, so the source itself stays runtime-agnostic (no dependency on a
//! particular async HTTP stack).

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{OrbitError, Result};
use crate::schema::Schema;
use crate::source::{Capabilities, FullResponse, Hints, Source, SourceSettings, UpdateDetails};
use crate::types::{Operation, Query, QueryExpression, QueryResultData, Record, RequestOptions, Transform};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
    Delete,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Option<Value>,
}

/// User-implemented transport. Implementations handle the actual request
/// (reqwest, hyper, a WASM `fetch` shim, …); this source only ever deals
/// in verbs, paths, and JSON bodies.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn request(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<Value>,
    ) -> std::result::Result<HttpResponse, String>;
}

pub struct JsonApiHandlers<C: HttpClient> {
    client: C,
    timeout_ms: u64,
}

impl<C: HttpClient> JsonApiHandlers<C> {
    pub fn new(client: C, timeout_ms: u64) -> Self {
        Self { client, timeout_ms }
    }

    async fn send(&self, method: HttpMethod, path: &str, body: Option<Value>) -> Result<HttpResponse> {
        let outcome = tokio::time::timeout(
            std::time::Duration::from_millis(self.timeout_ms),
            self.client.request(method, path, body),
        )
        .await;

        let response = match outcome {
            Err(_) => return Err(OrbitError::timeout(self.timeout_ms)),
            Ok(Err(message)) => return Err(OrbitError::Network(message)),
            Ok(Ok(response)) => response,
        };

        match response.status {
            200..=299 => Ok(response),
            400..=499 => Err(OrbitError::Client {
                status: response.status,
                description: format!("request to {path} failed"),
                data: response.body,
            }),
            500..=599 => Err(OrbitError::Server {
                status: response.status,
                description: format!("request to {path} failed"),
            }),
            other => Err(OrbitError::Network(format!("unexpected status {other}"))),
        }
    }

    /// Verb + path selection for one operation, per §6's table.
    fn request_for(op: &Operation) -> (HttpMethod, String, Option<Value>) {
        match op {
            Operation::AddRecord { record } => (
                HttpMethod::Post,
                format!("/{}", record.type_),
                serde_json::to_value(record).ok(),
            ),
            Operation::UpdateRecord { record } => (
                HttpMethod::Patch,
                format!("/{}/{}", record.type_, record.id),
                serde_json::to_value(record).ok(),
            ),
            Operation::RemoveRecord { record } => {
                (HttpMethod::Delete, format!("/{}/{}", record.type_, record.id), None)
            }
            Operation::ReplaceAttribute { record, attribute, value } => (
                HttpMethod::Patch,
                format!("/{}/{}", record.type_, record.id),
                Some(serde_json::json!({ "attributes": { attribute: value } })),
            ),
            Operation::ReplaceKey { record, key, value } => (
                HttpMethod::Patch,
                format!("/{}/{}", record.type_, record.id),
                Some(serde_json::json!({ "keys": { key: value } })),
            ),
            Operation::ReplaceRelatedRecord { record, relationship, related_record } => (
                HttpMethod::Patch,
                format!("/{}/{}/relationships/{}", record.type_, record.id, relationship),
                Some(serde_json::json!({ "data": related_record })),
            ),
            Operation::ReplaceRelatedRecords { record, relationship, related_records } => (
                HttpMethod::Patch,
                format!("/{}/{}/relationships/{}", record.type_, record.id, relationship),
                Some(serde_json::json!({ "data": related_records })),
            ),
            Operation::AddToRelatedRecords { record, relationship, related_record } => (
                HttpMethod::Post,
                format!("/{}/{}/relationships/{}", record.type_, record.id, relationship),
                Some(serde_json::json!({ "data": related_record })),
            ),
            Operation::RemoveFromRelatedRecords { record, relationship, related_record } => (
                HttpMethod::Delete,
                format!("/{}/{}/relationships/{}", record.type_, record.id, relationship),
                Some(serde_json::json!({ "data": related_record })),
            ),
        }
    }

    /// If the primary operation was an `addRecord` and the server echoed a
    /// different id, produce the follow-on `replaceKey('remoteId', ...)`
    /// transform (§6, S6).
    fn reconcile_remote_id(op: &Operation, response_body: &Option<Value>) -> Option<Transform> {
        let Operation::AddRecord { record } = op else {
            return None;
        };
        let server_id = response_body
            .as_ref()
            .and_then(|b| b.get("id"))
            .and_then(Value::as_str)?;
        if server_id == record.id {
            return None;
        }
        Some(Transform::new(vec![Operation::ReplaceKey {
            record: record.identity(),
            key: "remoteId".into(),
            value: Some(server_id.to_string()),
        }]))
    }
}

#[async_trait]
impl<C: HttpClient + Send + Sync> crate::source::SourceHandlers for JsonApiHandlers<C> {
    async fn handle_update(
        &self,
        transform: &Transform,
        _hints: &Hints,
    ) -> Result<FullResponse<Vec<Operation>, UpdateDetails>> {
        let mut produced_transforms = Vec::new();
        for op in &transform.operations {
            let (method, path, body) = Self::request_for(op);
            let response = self.send(method, &path, body).await?;
            if let Some(follow_on) = Self::reconcile_remote_id(op, &response.body) {
                produced_transforms.push(follow_on);
            }
        }

        let mut response = FullResponse::new(transform.operations.clone());
        response.transforms = produced_transforms;
        Ok(response)
    }

    async fn handle_query(&self, query: &Query, _hints: &Hints) -> Result<FullResponse<QueryResultData, ()>> {
        let (path, is_collection) = match &query.expression {
            QueryExpression::FindRecord { record } => (format!("/{}/{}", record.type_, record.id), false),
            QueryExpression::FindRecords { type_: Some(t), .. } => (format!("/{t}"), true),
            QueryExpression::FindRelatedRecord { record, relationship } => {
                (format!("/{}/{}/{}", record.type_, record.id, relationship), false)
            }
            QueryExpression::FindRelatedRecords { record, relationship, .. } => {
                (format!("/{}/{}/{}", record.type_, record.id, relationship), true)
            }
            QueryExpression::FindRecords { type_: None, .. } => {
                return Err(OrbitError::Assertion("findRecords requires a type for the JSON:API source".into()))
            }
        };

        let response = self.send(HttpMethod::Get, &path, None).await?;
        let data = if is_collection {
            let records: Vec<Record> = response
                .body
                .and_then(|b| serde_json::from_value(b).ok())
                .unwrap_or_default();
            QueryResultData::Many(records)
        } else {
            let record: Option<Record> = response.body.and_then(|b| serde_json::from_value(b).ok());
            QueryResultData::One(record)
        };

        Ok(FullResponse::new(data))
    }

    async fn handle_push(&self, transform: &Transform, hints: &Hints) -> Result<Vec<Transform>> {
        let response = self.handle_update(transform, hints).await?;
        Ok(response.transforms)
    }

    async fn handle_pull(&self, query: &Query, hints: &Hints) -> Result<Vec<Transform>> {
        let response = self.handle_query(query, hints).await?;
        let records = match response.data {
            Some(QueryResultData::Many(records)) => records,
            Some(QueryResultData::One(Some(record))) => vec![record],
            _ => Vec::new(),
        };
        Ok(records
            .into_iter()
            .map(|r| Transform::new(vec![Operation::AddRecord { record: r }]))
            .collect())
    }
}

/// Construct a `Source` backed by the JSON:API transport, with
/// `updatable`, `queryable`, `pullable`, and `pushable` installed.
pub fn jsonapi_source<C: HttpClient>(
    name: impl Into<String>,
    schema: Schema,
    client: C,
    timeout_ms: u64,
) -> Source<JsonApiHandlers<C>> {
    let settings = SourceSettings {
        name: name.into(),
        schema,
        capabilities: Capabilities {
            updatable: true,
            queryable: true,
            pullable: true,
            pushable: true,
            ..Default::default()
        },
        default_max_requests: None,
    };
    let source = Source::new(settings, JsonApiHandlers::new(client, timeout_ms));
    source.mark_activated();
    source
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as SyncMutex;

    struct StubClient {
        responses: SyncMutex<Vec<HttpResponse>>,
        requests: SyncMutex<Vec<(HttpMethod, String)>>,
    }

    impl StubClient {
        fn new(responses: Vec<HttpResponse>) -> Self {
            Self {
                responses: SyncMutex::new(responses),
                requests: SyncMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl HttpClient for StubClient {
        async fn request(
            &self,
            method: HttpMethod,
            path: &str,
            _body: Option<Value>,
        ) -> std::result::Result<HttpResponse, String> {
            self.requests.lock().push((method, path.to_string()));
            Ok(self.responses.lock().remove(0))
        }
    }

    #[tokio::test]
    async fn add_record_posts_to_type_collection() {
        let client = StubClient::new(vec![HttpResponse {
            status: 201,
            body: Some(serde_json::json!({ "id": "jupiter" })),
        }]);
        let source = jsonapi_source("remote", Schema::new(), client, 1000);

        let transform = Transform::new(vec![Operation::AddRecord { record: Record::shell("planet", "jupiter") }]);
        let response = source.update(transform, RequestOptions::new()).await.unwrap();
        assert!(response.transforms.is_empty());
    }

    #[tokio::test]
    async fn s6_remote_id_reconciliation_produces_replace_key_transform() {
        let client = StubClient::new(vec![HttpResponse {
            status: 201,
            body: Some(serde_json::json!({ "id": "12345" })),
        }]);
        let source = jsonapi_source("remote", Schema::new(), client, 1000);

        let mut options = RequestOptions::new();
        options.full_response = true;
        let transform = Transform::with_id("t1", vec![Operation::AddRecord { record: Record::shell("planet", "jupiter") }]);
        let response = source.update(transform, options).await.unwrap();

        assert_eq!(response.transforms.len(), 1);
        match &response.transforms[0].operations[0] {
            Operation::ReplaceKey { key, value, .. } => {
                assert_eq!(key, "remoteId");
                assert_eq!(value, &Some("12345".to_string()));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_error_status_maps_to_server_error() {
        let client = StubClient::new(vec![HttpResponse { status: 503, body: None }]);
        let source = jsonapi_source("remote", Schema::new(), client, 1000);

        let transform = Transform::new(vec![Operation::AddRecord { record: Record::shell("planet", "jupiter") }]);
        let result = source.update(transform, RequestOptions::new()).await;
        assert!(matches!(result, Err(OrbitError::Server { status: 503, .. })));
    }
}
