//! Timed, budgeted access to the remote store.

use crate::config::{FetchBudget, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteStore;
use crate::subscription::{MemorySubscriptionStore, SubscriptionStore};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use sublist_store::RemoteId;
use sublist_sync_protocol::{
    PageCursor, Query, RecordFields, RecordPage, RemoteRecord, SubscriptionHandle,
    SubscriptionSpec,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Result of a paginated fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchAll {
    /// Every record received, in page order.
    pub records: Vec<RemoteRecord>,
    /// Number of pages requested.
    pub pages: usize,
    /// False if the budget ran out before the last page.
    pub complete: bool,
}

/// The remote-store surface the pipeline talks to.
///
/// Every call is bounded by a per-operation timeout from [`SyncConfig`].
/// The client never retries.
pub struct RemoteClient<R: RemoteStore> {
    remote: Arc<R>,
    config: SyncConfig,
    subscriptions: Box<dyn SubscriptionStore>,
}

impl<R: RemoteStore> RemoteClient<R> {
    /// Creates a client that remembers its subscription in memory.
    pub fn new(remote: Arc<R>, config: SyncConfig) -> Self {
        Self {
            remote,
            config,
            subscriptions: Box::new(MemorySubscriptionStore::new()),
        }
    }

    /// Replaces the subscription handle store.
    pub fn with_subscription_store(mut self, store: impl SubscriptionStore + 'static) -> Self {
        self.subscriptions = Box::new(store);
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the underlying store.
    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    /// Returns true if the remote is believed reachable.
    pub fn is_reachable(&self) -> bool {
        self.remote.is_reachable()
    }

    /// Fetches one record. `None` if it does not exist.
    pub async fn fetch_by_id(&self, remote_id: &RemoteId) -> SyncResult<Option<RemoteRecord>> {
        timed(self.config.record_timeout, self.remote.fetch_by_id(remote_id)).await
    }

    /// Fetches several records. Missing ids are omitted.
    pub async fn fetch_by_ids(&self, remote_ids: &[RemoteId]) -> SyncResult<Vec<RemoteRecord>> {
        if remote_ids.is_empty() {
            return Ok(Vec::new());
        }
        timed(self.config.record_timeout, self.remote.fetch_by_ids(remote_ids)).await
    }

    /// Fetches one page of the configured record type.
    pub async fn fetch_page(
        &self,
        query: &Query,
        cursor: Option<PageCursor>,
    ) -> SyncResult<RecordPage> {
        timed(
            self.config.page_timeout,
            self.remote.fetch_page(query, cursor, self.config.page_size),
        )
        .await
    }

    /// Fetches every record of the configured type, page by page.
    ///
    /// Stops at the last page or when `budget` runs out, whichever comes
    /// first. An exhausted budget is not an error: the records fetched so
    /// far are returned with `complete` set to false.
    pub async fn fetch_all(&self, budget: FetchBudget) -> SyncResult<FetchAll> {
        let started = Instant::now();
        let query = Query::all(self.config.record_type.clone());
        let mut result = FetchAll::default();
        let mut cursor = None;

        loop {
            if result.pages >= budget.max_pages || started.elapsed() >= budget.deadline {
                warn!(
                    pages = result.pages,
                    records = result.records.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "fetch budget exhausted, returning partial result"
                );
                return Ok(result);
            }

            let page = self.fetch_page(&query, cursor.take()).await?;
            result.pages += 1;
            result.records.extend(page.records);
            debug!(
                page = result.pages,
                total = result.records.len(),
                "fetched record page"
            );

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => {
                    result.complete = true;
                    return Ok(result);
                }
            }
        }
    }

    /// Creates a record of the configured type.
    pub async fn create(&self, fields: RecordFields) -> SyncResult<RemoteId> {
        timed(
            self.config.record_timeout,
            self.remote.create(&self.config.record_type, fields),
        )
        .await
    }

    /// Replaces the fields of a record.
    pub async fn update(&self, remote_id: &RemoteId, fields: RecordFields) -> SyncResult<()> {
        timed(self.config.record_timeout, self.remote.update(remote_id, fields)).await
    }

    /// Deletes a record.
    pub async fn delete(&self, remote_id: &RemoteId) -> SyncResult<()> {
        timed(self.config.record_timeout, self.remote.delete(remote_id)).await
    }

    /// Makes sure `spec` is saved remotely.
    ///
    /// If the persisted handle was saved for an identical spec it is
    /// returned with no remote call. Otherwise the spec is saved and the new
    /// handle persisted.
    pub async fn ensure_subscription(
        &self,
        spec: &SubscriptionSpec,
    ) -> SyncResult<SubscriptionHandle> {
        if let Some(handle) = self.subscriptions.load()? {
            if handle.matches(spec) {
                debug!(subscription = %handle.id, "subscription already saved");
                return Ok(handle);
            }
        }

        let handle = timed(self.config.record_timeout, self.remote.save_subscription(spec)).await?;
        self.subscriptions.save(&handle)?;
        info!(subscription = %handle.id, "subscription saved");
        Ok(handle)
    }
}

async fn timed<T>(limit: Duration, op: impl Future<Output = SyncResult<T>>) -> SyncResult<T> {
    tokio::time::timeout(limit, op)
        .await
        .map_err(|_| SyncError::Timeout)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemoteStore;
    use sublist_store::EventFields;

    fn remote_with(n: usize) -> Arc<MemoryRemoteStore> {
        Arc::new(MemoryRemoteStore::with_records((0..n).map(|i| {
            RemoteRecord::event(
                RemoteId::new(format!("r{i}")),
                &EventFields::titled(format!("e{i}")),
            )
        })))
    }

    #[tokio::test]
    async fn fetch_all_walks_every_page() {
        let remote = remote_with(250);
        let client = RemoteClient::new(remote.clone(), SyncConfig::default());

        let all = client.fetch_all(FetchBudget::unbounded()).await.unwrap();
        assert!(all.complete);
        assert_eq!(all.pages, 3);
        assert_eq!(all.records.len(), 250);
        assert_eq!(remote.page_fetches(), 3);
    }

    #[tokio::test]
    async fn fetch_all_on_empty_remote_takes_one_page() {
        let remote = remote_with(0);
        let client = RemoteClient::new(remote.clone(), SyncConfig::default());

        let all = client.fetch_all(FetchBudget::unbounded()).await.unwrap();
        assert!(all.complete);
        assert!(all.records.is_empty());
        assert_eq!(remote.page_fetches(), 1);
    }

    #[tokio::test]
    async fn exhausted_page_budget_returns_partial() {
        let remote = remote_with(250);
        let client = RemoteClient::new(remote.clone(), SyncConfig::default());

        let budget = FetchBudget {
            max_pages: 2,
            deadline: Duration::from_secs(60),
        };
        let all = client.fetch_all(budget).await.unwrap();
        assert!(!all.complete);
        assert_eq!(all.records.len(), 200);
        assert_eq!(remote.page_fetches(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_deadline_returns_partial() {
        let remote = remote_with(250);
        remote.set_latency(Duration::from_secs(10));
        let client = RemoteClient::new(remote.clone(), SyncConfig::default());

        let budget = FetchBudget {
            max_pages: 100,
            deadline: Duration::from_secs(15),
        };
        let all = client.fetch_all(budget).await.unwrap();
        assert!(!all.complete);
        assert_eq!(all.pages, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_remote_times_out() {
        let remote = remote_with(1);
        remote.set_latency(Duration::from_secs(60));
        let client = RemoteClient::new(remote, SyncConfig::default());

        let result = client.fetch_by_id(&RemoteId::new("r0")).await;
        assert!(matches!(result, Err(SyncError::Timeout)));
    }

    #[tokio::test]
    async fn ensure_subscription_is_idempotent() {
        let remote = remote_with(0);
        let client = RemoteClient::new(remote.clone(), SyncConfig::default());
        let spec = SubscriptionSpec::default();

        let first = client.ensure_subscription(&spec).await.unwrap();
        let second = client.ensure_subscription(&spec).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(remote.subscription_saves(), 1);
    }

    #[tokio::test]
    async fn changed_spec_is_saved_again() {
        let remote = remote_with(0);
        let client = RemoteClient::new(remote.clone(), SyncConfig::default());

        client
            .ensure_subscription(&SubscriptionSpec::default())
            .await
            .unwrap();
        let narrower = SubscriptionSpec::default().with_fires_on(sublist_sync_protocol::FiresOn {
            create: true,
            update: false,
            delete: false,
        });
        let handle = client.ensure_subscription(&narrower).await.unwrap();

        assert_eq!(handle.id, "Event:all:c");
        assert_eq!(remote.subscription_saves(), 2);
    }

    #[tokio::test]
    async fn empty_id_list_skips_the_remote() {
        let remote = remote_with(1);
        let client = RemoteClient::new(remote.clone(), SyncConfig::default());
        assert!(client.fetch_by_ids(&[]).await.unwrap().is_empty());
        assert_eq!(remote.record_fetches(), 0);
    }
}
