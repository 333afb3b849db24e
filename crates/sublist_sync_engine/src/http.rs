//! HTTP remote store implementation.
//!
//! Each [`RemoteStore`] operation maps to a JSON POST endpoint. The actual
//! HTTP client is abstracted via a trait to allow different implementations
//! (reqwest, hyper, etc.).
//!
//! Every response body is an envelope:
//!
//! ```json
//! { "status": "ok", "result": { ... } }
//! { "status": "error", "kind": "rejected", "message": "quota exceeded" }
//! ```

use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteStore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use sublist_store::RemoteId;
use sublist_sync_protocol::{
    PageCursor, Query, RecordFields, RecordPage, RemoteRecord, SubscriptionHandle,
    SubscriptionSpec,
};
use tracing::debug;

/// Endpoint for by-id lookups.
pub const LOOKUP_PATH: &str = "/records/lookup";
/// Endpoint for paged queries.
pub const QUERY_PATH: &str = "/records/query";
/// Endpoint for creates and updates.
pub const MODIFY_PATH: &str = "/records/modify";
/// Endpoint for deletes.
pub const DELETE_PATH: &str = "/records/delete";
/// Endpoint for saving subscriptions.
pub const SUBSCRIPTION_PATH: &str = "/subscriptions/modify";

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport. A transport
/// failure is reported as `Err`; remote-side errors travel inside the
/// response envelope.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the response body.
    fn post(
        &self,
        url: &str,
        body: Vec<u8>,
    ) -> impl Future<Output = Result<Vec<u8>, String>> + Send;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

/// Body of a lookup request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupRequest {
    /// Records to look up.
    pub record_names: Vec<RemoteId>,
}

/// Body of a lookup response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupResponse {
    /// Records found.
    pub records: Vec<RemoteRecord>,
}

/// Body of a query request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    /// The query.
    pub query: Query,
    /// Where to continue from.
    #[serde(default)]
    pub cursor: Option<PageCursor>,
    /// Maximum records to return.
    pub limit: usize,
}

/// Body of a create or update request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyRequest {
    /// Record type, used on create.
    pub record_type: String,
    /// Record to update, or `None` to create.
    #[serde(default)]
    pub record_name: Option<RemoteId>,
    /// New field values.
    pub fields: RecordFields,
}

/// Body of a modify or delete response, and of a delete request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordRef {
    /// The affected record.
    pub record_name: RemoteId,
}

/// Class of a remote-side error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// The remote could not serve the request right now.
    Unavailable,
    /// The remote refused the request.
    Rejected,
    /// The request was malformed.
    BadRequest,
}

/// Response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Reply<T> {
    /// Success.
    Ok {
        /// Response payload.
        result: T,
    },
    /// Failure.
    Error {
        /// Error class.
        kind: ErrorKind,
        /// Error message.
        message: String,
    },
}

impl<T> Reply<T> {
    /// Wraps an operation result for the wire.
    pub fn from_result(result: SyncResult<T>) -> Self {
        match result {
            Ok(result) => Reply::Ok { result },
            Err(error) => {
                let kind = match &error {
                    SyncError::RemoteRejected { .. } => ErrorKind::Rejected,
                    SyncError::Protocol(_) => ErrorKind::BadRequest,
                    _ => ErrorKind::Unavailable,
                };
                let message = match error {
                    SyncError::RemoteRejected { reason } => reason,
                    other => other.to_string(),
                };
                Reply::Error { kind, message }
            }
        }
    }

    /// Unwraps a reply into an operation result.
    pub fn into_result(self) -> SyncResult<T> {
        match self {
            Reply::Ok { result } => Ok(result),
            Reply::Error { kind, message } => Err(match kind {
                ErrorKind::Unavailable => SyncError::network(message),
                ErrorKind::Rejected => SyncError::rejected(message),
                ErrorKind::BadRequest => SyncError::Protocol(message),
            }),
        }
    }
}

/// HTTP-based remote store.
///
/// Uses JSON encoding for request/response bodies.
pub struct HttpRemoteStore<C: HttpClient> {
    /// Base URL of the record service (e.g., "https://records.example.com").
    base_url: String,
    /// HTTP client implementation.
    client: C,
    /// Connection state.
    connected: AtomicBool,
}

impl<C: HttpClient> HttpRemoteStore<C> {
    /// Creates a new HTTP remote store.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into(),
            client,
            connected: AtomicBool::new(true),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Marks the store disconnected until [`reconnect`](Self::reconnect).
    pub fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Marks the store connected again.
    pub fn reconnect(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    async fn post_json<Req, Res>(&self, endpoint: &str, request: &Req) -> SyncResult<Res>
    where
        Req: Serialize + Sync,
        Res: DeserializeOwned,
    {
        if !self.is_reachable() {
            return Err(SyncError::network("not connected to record service"));
        }

        let body = serde_json::to_vec(request)
            .map_err(|e| SyncError::Protocol(format!("failed to encode request: {e}")))?;

        let url = format!("{}{}", self.base_url, endpoint);
        debug!(%url, bytes = body.len(), "posting request");
        let response = self
            .client
            .post(&url, body)
            .await
            .map_err(SyncError::network)?;

        let reply: Reply<Res> = serde_json::from_slice(&response)
            .map_err(|e| SyncError::Protocol(format!("failed to decode response: {e}")))?;
        reply.into_result()
    }
}

impl<C: HttpClient> RemoteStore for HttpRemoteStore<C> {
    async fn fetch_by_id(&self, remote_id: &RemoteId) -> SyncResult<Option<RemoteRecord>> {
        let records = self.fetch_by_ids(std::slice::from_ref(remote_id)).await?;
        Ok(records.into_iter().next())
    }

    async fn fetch_by_ids(&self, remote_ids: &[RemoteId]) -> SyncResult<Vec<RemoteRecord>> {
        let request = LookupRequest {
            record_names: remote_ids.to_vec(),
        };
        let response: LookupResponse = self.post_json(LOOKUP_PATH, &request).await?;
        Ok(response.records)
    }

    async fn fetch_page(
        &self,
        query: &Query,
        cursor: Option<PageCursor>,
        limit: usize,
    ) -> SyncResult<RecordPage> {
        let request = QueryRequest {
            query: query.clone(),
            cursor,
            limit,
        };
        self.post_json(QUERY_PATH, &request).await
    }

    async fn create(&self, record_type: &str, fields: RecordFields) -> SyncResult<RemoteId> {
        let request = ModifyRequest {
            record_type: record_type.to_string(),
            record_name: None,
            fields,
        };
        let response: RecordRef = self.post_json(MODIFY_PATH, &request).await?;
        Ok(response.record_name)
    }

    async fn update(&self, remote_id: &RemoteId, fields: RecordFields) -> SyncResult<()> {
        let request = ModifyRequest {
            record_type: String::new(),
            record_name: Some(remote_id.clone()),
            fields,
        };
        let _: RecordRef = self.post_json(MODIFY_PATH, &request).await?;
        Ok(())
    }

    async fn delete(&self, remote_id: &RemoteId) -> SyncResult<()> {
        let request = RecordRef {
            record_name: remote_id.clone(),
        };
        let _: RecordRef = self.post_json(DELETE_PATH, &request).await?;
        Ok(())
    }

    async fn save_subscription(&self, spec: &SubscriptionSpec) -> SyncResult<SubscriptionHandle> {
        self.post_json(SUBSCRIPTION_PATH, spec).await
    }

    fn is_reachable(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer: Send + Sync {
    /// Handles a POST request and returns the response body.
    fn handle_post(
        &self,
        path: &str,
        body: &[u8],
    ) -> impl Future<Output = Result<Vec<u8>, String>> + Send;

    /// Returns true if the server is accepting requests.
    fn is_up(&self) -> bool {
        true
    }
}

/// A loopback HTTP client that routes requests directly to a server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }
}

impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    async fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String> {
        // Strip scheme and host
        let path = ["/records/", "/subscriptions/"]
            .iter()
            .find_map(|prefix| url.find(prefix))
            .map(|i| &url[i..])
            .unwrap_or(url);

        self.server.handle_post(path, &body).await
    }

    fn is_healthy(&self) -> bool {
        self.server.is_up()
    }
}

/// Serves the HTTP endpoints from any [`RemoteStore`], typically a
/// [`crate::MemoryRemoteStore`].
pub struct RecordService<R: RemoteStore> {
    store: Arc<R>,
}

impl<R: RemoteStore> RecordService<R> {
    /// Serves `store`.
    pub fn new(store: Arc<R>) -> Self {
        Self { store }
    }

    async fn dispatch(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        match path {
            LOOKUP_PATH => {
                let request: LookupRequest = parse(body)?;
                let result = self
                    .store
                    .fetch_by_ids(&request.record_names)
                    .await
                    .map(|records| LookupResponse { records });
                reply(result)
            }
            QUERY_PATH => {
                let request: QueryRequest = parse(body)?;
                let result = self
                    .store
                    .fetch_page(&request.query, request.cursor, request.limit)
                    .await;
                reply(result)
            }
            MODIFY_PATH => {
                let request: ModifyRequest = parse(body)?;
                let result = match request.record_name {
                    Some(record_name) => self
                        .store
                        .update(&record_name, request.fields)
                        .await
                        .map(|()| RecordRef { record_name }),
                    None => self
                        .store
                        .create(&request.record_type, request.fields)
                        .await
                        .map(|record_name| RecordRef { record_name }),
                };
                reply(result)
            }
            DELETE_PATH => {
                let request: RecordRef = parse(body)?;
                let result = self
                    .store
                    .delete(&request.record_name)
                    .await
                    .map(|()| request);
                reply(result)
            }
            SUBSCRIPTION_PATH => {
                let spec: SubscriptionSpec = parse(body)?;
                let result = self.store.save_subscription(&spec).await;
                reply(result)
            }
            other => reply::<()>(Err(SyncError::Protocol(format!("no such endpoint {other}")))),
        }
    }
}

impl<R: RemoteStore> LoopbackServer for RecordService<R> {
    fn handle_post(
        &self,
        path: &str,
        body: &[u8],
    ) -> impl Future<Output = Result<Vec<u8>, String>> + Send {
        self.dispatch(path, body)
    }

    fn is_up(&self) -> bool {
        self.store.is_reachable()
    }
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> Result<T, String> {
    serde_json::from_slice(body).map_err(|e| format!("malformed request body: {e}"))
}

fn reply<T: Serialize>(result: SyncResult<T>) -> Result<Vec<u8>, String> {
    serde_json::to_vec(&Reply::from_result(result)).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemoteStore;
    use parking_lot::RwLock;
    use sublist_store::EventFields;
    use sublist_sync_protocol::EVENT_RECORD_TYPE;

    struct TestClient {
        response: RwLock<Option<Vec<u8>>>,
        healthy: AtomicBool,
    }

    impl TestClient {
        fn new() -> Self {
            Self {
                response: RwLock::new(None),
                healthy: AtomicBool::new(true),
            }
        }

        fn set_response(&self, resp: Vec<u8>) {
            *self.response.write() = Some(resp);
        }

        fn set_healthy(&self, healthy: bool) {
            self.healthy.store(healthy, Ordering::SeqCst);
        }
    }

    impl HttpClient for TestClient {
        async fn post(&self, _url: &str, _body: Vec<u8>) -> Result<Vec<u8>, String> {
            self.response
                .read()
                .clone()
                .ok_or_else(|| "No response set".into())
        }

        fn is_healthy(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }
    }

    fn loopback(
        remote: Arc<MemoryRemoteStore>,
    ) -> HttpRemoteStore<LoopbackClient<RecordService<MemoryRemoteStore>>> {
        HttpRemoteStore::new(
            "https://records.example.com",
            LoopbackClient::new(RecordService::new(remote)),
        )
    }

    #[test]
    fn store_creation() {
        let store = HttpRemoteStore::new("https://records.example.com", TestClient::new());
        assert_eq!(store.base_url(), "https://records.example.com");
        assert!(store.is_reachable());
    }

    #[test]
    fn store_disconnect() {
        let store = HttpRemoteStore::new("https://records.example.com", TestClient::new());
        store.close();
        assert!(!store.is_reachable());
        store.reconnect();
        assert!(store.is_reachable());
    }

    #[test]
    fn unhealthy_client() {
        let client = TestClient::new();
        client.set_healthy(false);
        let store = HttpRemoteStore::new("https://records.example.com", client);
        assert!(!store.is_reachable());
    }

    #[tokio::test]
    async fn transport_failure_is_retryable() {
        let store = HttpRemoteStore::new("https://records.example.com", TestClient::new());
        let result = store.fetch_by_id(&RemoteId::new("r1")).await;
        assert!(matches!(result, Err(ref e) if e.is_retryable()));
        assert!(store.is_reachable());
    }

    #[tokio::test]
    async fn garbage_response_is_protocol_error() {
        let client = TestClient::new();
        client.set_response(b"<html>".to_vec());
        let store = HttpRemoteStore::new("https://records.example.com", client);

        let result = store.delete(&RemoteId::new("r1")).await;
        assert!(matches!(result, Err(SyncError::Protocol(_))));
    }

    #[tokio::test]
    async fn rejection_travels_in_envelope() {
        let client = TestClient::new();
        let body = serde_json::to_vec(&Reply::<RecordRef>::from_result(Err(
            SyncError::rejected("quota exceeded"),
        )))
        .unwrap();
        client.set_response(body);
        let store = HttpRemoteStore::new("https://records.example.com", client);

        match store.create(EVENT_RECORD_TYPE, RecordFields::new()).await {
            Err(SyncError::RemoteRejected { reason }) => assert_eq!(reason, "quota exceeded"),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn loopback_serves_every_endpoint() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let http = loopback(remote.clone());

        let id = http
            .create(
                EVENT_RECORD_TYPE,
                sublist_sync_protocol::encode_fields(&EventFields::titled("gig")),
            )
            .await
            .unwrap();
        assert_eq!(remote.len(), 1);

        let fetched = http.fetch_by_id(&id).await.unwrap().unwrap();
        assert_eq!(fetched.field("title").unwrap().as_text(), Some("gig"));

        let page = http
            .fetch_page(&Query::all(EVENT_RECORD_TYPE), None, 10)
            .await
            .unwrap();
        assert_eq!(page.records.len(), 1);
        assert!(page.is_last());

        http.update(
            &id,
            sublist_sync_protocol::encode_fields(&EventFields::titled("moved")),
        )
        .await
        .unwrap();
        assert_eq!(
            remote.record(&id).unwrap().field("title").unwrap().as_text(),
            Some("moved")
        );

        let handle = http
            .save_subscription(&SubscriptionSpec::default())
            .await
            .unwrap();
        assert_eq!(handle.id, "Event:all:cud");
        assert_eq!(remote.subscription_saves(), 1);

        http.delete(&id).await.unwrap();
        assert!(remote.is_empty());
        assert!(http.fetch_by_id(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn loopback_maps_remote_errors() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let http = loopback(remote.clone());

        remote.fail_next(SyncError::network("overloaded"));
        assert!(matches!(
            http.fetch_by_ids(&[RemoteId::new("x")]).await,
            Err(SyncError::Network { .. })
        ));

        assert!(matches!(
            http.update(&RemoteId::new("missing"), RecordFields::new())
                .await,
            Err(SyncError::RemoteRejected { .. })
        ));

        remote.set_reachable(false);
        assert!(!http.is_reachable());
    }
}
