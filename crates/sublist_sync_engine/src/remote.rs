//! Remote record store abstraction.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use sublist_store::RemoteId;
use sublist_sync_protocol::{
    PageCursor, Query, RecordFields, RecordPage, RemoteRecord, SubscriptionHandle,
    SubscriptionSpec,
};
use tracing::debug;

/// The authoritative remote record collection.
///
/// This trait abstracts the raw remote protocol, allowing for different
/// implementations (HTTP, in-memory for testing, etc.). Implementations do
/// not time out or retry; [`crate::RemoteClient`] layers timeouts on top and
/// the pipeline owns the retry policy.
pub trait RemoteStore: Send + Sync {
    /// Fetches one record. `None` if it does not exist.
    fn fetch_by_id(
        &self,
        remote_id: &RemoteId,
    ) -> impl Future<Output = SyncResult<Option<RemoteRecord>>> + Send;

    /// Fetches several records. Missing ids are omitted from the result.
    fn fetch_by_ids(
        &self,
        remote_ids: &[RemoteId],
    ) -> impl Future<Output = SyncResult<Vec<RemoteRecord>>> + Send;

    /// Fetches one page of a query.
    fn fetch_page(
        &self,
        query: &Query,
        cursor: Option<PageCursor>,
        limit: usize,
    ) -> impl Future<Output = SyncResult<RecordPage>> + Send;

    /// Creates a record and returns its remote id.
    fn create(
        &self,
        record_type: &str,
        fields: RecordFields,
    ) -> impl Future<Output = SyncResult<RemoteId>> + Send;

    /// Replaces the fields of a record.
    fn update(
        &self,
        remote_id: &RemoteId,
        fields: RecordFields,
    ) -> impl Future<Output = SyncResult<()>> + Send;

    /// Deletes a record. Deleting a missing record succeeds.
    fn delete(&self, remote_id: &RemoteId) -> impl Future<Output = SyncResult<()>> + Send;

    /// Saves a change-notification subscription.
    fn save_subscription(
        &self,
        spec: &SubscriptionSpec,
    ) -> impl Future<Output = SyncResult<SubscriptionHandle>> + Send;

    /// Returns true if the remote is believed reachable.
    fn is_reachable(&self) -> bool;
}

#[derive(Default)]
struct MemoryState {
    records: Vec<RemoteRecord>,
    failures: VecDeque<SyncError>,
    subscriptions: HashMap<String, SubscriptionHandle>,
}

/// An in-memory remote store for testing and demos.
///
/// Records are kept in insertion order and paged by offset. Faults can be
/// queued with [`fail_next`](Self::fail_next), reachability toggled, and an
/// artificial latency added to every call.
pub struct MemoryRemoteStore {
    state: Mutex<MemoryState>,
    reachable: AtomicBool,
    latency: Mutex<Duration>,
    page_fetches: AtomicU64,
    record_fetches: AtomicU64,
    writes: AtomicU64,
    subscription_saves: AtomicU64,
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemoteStore {
    /// Creates an empty, reachable store.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            reachable: AtomicBool::new(true),
            latency: Mutex::new(Duration::ZERO),
            page_fetches: AtomicU64::new(0),
            record_fetches: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            subscription_saves: AtomicU64::new(0),
        }
    }

    /// Creates a store holding `records`, in order.
    pub fn with_records(records: impl IntoIterator<Item = RemoteRecord>) -> Self {
        let store = Self::new();
        store.state.lock().records.extend(records);
        store
    }

    /// Adds a record as-is, replacing any record with the same name.
    ///
    /// Nameless or otherwise malformed records are accepted so that parse
    /// tolerance can be exercised.
    pub fn insert_record(&self, record: RemoteRecord) {
        let mut state = self.state.lock();
        let existing = record.record_name.as_ref().and_then(|name| {
            state
                .records
                .iter()
                .position(|r| r.record_name.as_ref() == Some(name))
        });
        match existing {
            Some(index) => state.records[index] = record,
            None => state.records.push(record),
        }
    }

    /// Removes a record without going through the remote API.
    pub fn remove_record(&self, remote_id: &RemoteId) -> bool {
        let mut state = self.state.lock();
        let before = state.records.len();
        state
            .records
            .retain(|r| r.record_name.as_ref() != Some(remote_id));
        state.records.len() != before
    }

    /// Returns a copy of a record.
    pub fn record(&self, remote_id: &RemoteId) -> Option<RemoteRecord> {
        self.state
            .lock()
            .records
            .iter()
            .find(|r| r.record_name.as_ref() == Some(remote_id))
            .cloned()
    }

    /// Returns a copy of every record.
    pub fn records(&self) -> Vec<RemoteRecord> {
        self.state.lock().records.clone()
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Returns true if no records are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Makes the next call fail with `error`. Queued errors fire in order.
    pub fn fail_next(&self, error: SyncError) {
        self.state.lock().failures.push_back(error);
    }

    /// Sets whether the store is reachable.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Number of page requests served.
    pub fn page_fetches(&self) -> u64 {
        self.page_fetches.load(Ordering::SeqCst)
    }

    /// Number of by-id lookups served.
    pub fn record_fetches(&self) -> u64 {
        self.record_fetches.load(Ordering::SeqCst)
    }

    /// Number of create, update and delete calls served.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of subscription saves served.
    pub fn subscription_saves(&self) -> u64 {
        self.subscription_saves.load(Ordering::SeqCst)
    }

    /// Returns the saved subscriptions.
    pub fn subscriptions(&self) -> Vec<SubscriptionHandle> {
        self.state.lock().subscriptions.values().cloned().collect()
    }

    /// Sleeps for the configured latency, then checks reachability and
    /// queued faults.
    async fn enter(&self) -> SyncResult<()> {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(SyncError::network("remote store unreachable"));
        }
        match self.state.lock().failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl RemoteStore for MemoryRemoteStore {
    async fn fetch_by_id(&self, remote_id: &RemoteId) -> SyncResult<Option<RemoteRecord>> {
        self.enter().await?;
        self.record_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.record(remote_id))
    }

    async fn fetch_by_ids(&self, remote_ids: &[RemoteId]) -> SyncResult<Vec<RemoteRecord>> {
        self.enter().await?;
        self.record_fetches.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        Ok(remote_ids
            .iter()
            .filter_map(|id| {
                state
                    .records
                    .iter()
                    .find(|r| r.record_name.as_ref() == Some(id))
                    .cloned()
            })
            .collect())
    }

    async fn fetch_page(
        &self,
        query: &Query,
        cursor: Option<PageCursor>,
        limit: usize,
    ) -> SyncResult<RecordPage> {
        self.enter().await?;
        self.page_fetches.fetch_add(1, Ordering::SeqCst);

        let offset = match &cursor {
            Some(cursor) => cursor
                .as_str()
                .parse::<usize>()
                .map_err(|_| SyncError::Protocol(format!("invalid page cursor {cursor}")))?,
            None => 0,
        };
        let limit = limit.max(1);

        let state = self.state.lock();
        let matching: Vec<&RemoteRecord> =
            state.records.iter().filter(|r| query.matches(r)).collect();
        let end = offset.saturating_add(limit).min(matching.len());
        let records = matching
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .map(|r| (*r).clone())
            .collect();
        let next_cursor = (end < matching.len()).then(|| PageCursor::new(end.to_string()));

        debug!(offset, returned = end.saturating_sub(offset), "served record page");
        Ok(RecordPage {
            records,
            next_cursor,
        })
    }

    async fn create(&self, record_type: &str, fields: RecordFields) -> SyncResult<RemoteId> {
        self.enter().await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        let remote_id = RemoteId::new(uuid::Uuid::new_v4().to_string());
        self.state
            .lock()
            .records
            .push(RemoteRecord::new(remote_id.clone(), record_type, fields));
        Ok(remote_id)
    }

    async fn update(&self, remote_id: &RemoteId, fields: RecordFields) -> SyncResult<()> {
        self.enter().await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        let record = state
            .records
            .iter_mut()
            .find(|r| r.record_name.as_ref() == Some(remote_id))
            .ok_or_else(|| SyncError::rejected(format!("unknown record {remote_id}")))?;
        record.fields = fields;
        Ok(())
    }

    async fn delete(&self, remote_id: &RemoteId) -> SyncResult<()> {
        self.enter().await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.remove_record(remote_id);
        Ok(())
    }

    async fn save_subscription(&self, spec: &SubscriptionSpec) -> SyncResult<SubscriptionHandle> {
        self.enter().await?;
        self.subscription_saves.fetch_add(1, Ordering::SeqCst);
        let handle = SubscriptionHandle::for_spec(spec.clone());
        self.state
            .lock()
            .subscriptions
            .insert(handle.id.clone(), handle.clone());
        Ok(handle)
    }

    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sublist_store::EventFields;
    use sublist_sync_protocol::EVENT_RECORD_TYPE;

    fn seeded(n: usize) -> MemoryRemoteStore {
        MemoryRemoteStore::with_records((0..n).map(|i| {
            RemoteRecord::event(
                RemoteId::new(format!("r{i}")),
                &EventFields::titled(format!("e{i}")),
            )
        }))
    }

    #[tokio::test]
    async fn pages_by_offset() {
        let store = seeded(5);
        let query = Query::all(EVENT_RECORD_TYPE);

        let first = store.fetch_page(&query, None, 2).await.unwrap();
        assert_eq!(first.records.len(), 2);
        let second = store
            .fetch_page(&query, first.next_cursor, 2)
            .await
            .unwrap();
        let third = store
            .fetch_page(&query, second.next_cursor, 2)
            .await
            .unwrap();

        assert_eq!(third.records.len(), 1);
        assert!(third.is_last());
        assert_eq!(store.page_fetches(), 3);
    }

    #[tokio::test]
    async fn bad_cursor_is_a_protocol_error() {
        let store = seeded(1);
        let result = store
            .fetch_page(
                &Query::all(EVENT_RECORD_TYPE),
                Some(PageCursor::new("nope")),
                10,
            )
            .await;
        assert!(matches!(result, Err(SyncError::Protocol(_))));
    }

    #[tokio::test]
    async fn queued_failures_fire_once_in_order() {
        let store = seeded(1);
        store.fail_next(SyncError::network("reset"));
        store.fail_next(SyncError::rejected("quota"));

        let id = RemoteId::new("r0");
        assert!(matches!(
            store.fetch_by_id(&id).await,
            Err(SyncError::Network { .. })
        ));
        assert!(matches!(
            store.fetch_by_id(&id).await,
            Err(SyncError::RemoteRejected { .. })
        ));
        assert!(store.fetch_by_id(&id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unreachable_store_fails_calls() {
        let store = seeded(1);
        store.set_reachable(false);
        assert!(!store.is_reachable());
        assert!(matches!(
            store.fetch_by_ids(&[RemoteId::new("r0")]).await,
            Err(SyncError::Network { .. })
        ));
    }

    #[tokio::test]
    async fn create_update_delete() {
        let store = MemoryRemoteStore::new();
        let id = store
            .create(EVENT_RECORD_TYPE, RecordFields::new())
            .await
            .unwrap();
        assert_eq!(store.len(), 1);

        let mut fields = RecordFields::new();
        fields.insert("title".into(), "renamed".into());
        store.update(&id, fields).await.unwrap();
        assert_eq!(
            store.record(&id).unwrap().field("title").unwrap().as_text(),
            Some("renamed")
        );

        store.delete(&id).await.unwrap();
        store.delete(&id).await.unwrap();
        assert!(store.is_empty());
        assert!(matches!(
            store.update(&id, RecordFields::new()).await,
            Err(SyncError::RemoteRejected { .. })
        ));
        assert_eq!(store.writes(), 5);
    }

    #[tokio::test]
    async fn fetch_by_ids_omits_missing() {
        let store = seeded(3);
        let found = store
            .fetch_by_ids(&[RemoteId::new("r2"), RemoteId::new("gone"), RemoteId::new("r0")])
            .await
            .unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|r| r.record_name.clone().unwrap())
            .collect();
        assert_eq!(names, vec![RemoteId::new("r2"), RemoteId::new("r0")]);
    }

    #[tokio::test]
    async fn subscription_saves_are_counted() {
        let store = MemoryRemoteStore::new();
        let spec = SubscriptionSpec::default();
        let handle = store.save_subscription(&spec).await.unwrap();
        assert_eq!(handle.id, spec.handle_id());
        assert_eq!(store.subscription_saves(), 1);
        assert_eq!(store.subscriptions(), vec![handle]);
    }
}
