//! The sync pipeline state machine.
//!
//! One run walks `Downloading → Parsing → Deduping → Merging` and ends in
//! `Done` or `Failed`. At most one run is active at a time; a trigger that
//! arrives while a run is active is coalesced into it.

use crate::client::RemoteClient;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteStore;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sublist_store::{EventFields, EventId, LocalStore, RemoteId, StoreError};
use sublist_sync_protocol::{
    encode_fields, parse_event, ChangeKind, ParsedEvent, RemoteRecord, SubscriptionHandle,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// The current state of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No run has started, or the last one was cancelled.
    Idle,
    /// Fetching records from the remote store.
    Downloading,
    /// Turning raw records into event fields.
    Parsing,
    /// Dropping records already present locally.
    Deduping,
    /// Writing the remainder to the local store.
    Merging,
    /// The last run completed.
    Done,
    /// The last run failed.
    Failed,
}

impl SyncState {
    /// Returns true while a run is in progress.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Downloading | SyncState::Parsing | SyncState::Deduping | SyncState::Merging
        )
    }

    /// Returns true if a new run may start.
    pub fn can_start_sync(&self) -> bool {
        !self.is_active()
    }
}

/// What started a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Full paginated fetch, e.g. pull-to-refresh.
    Refresh,
    /// Targeted fetch of one record, from a push notification.
    Record {
        /// The changed record.
        remote_id: RemoteId,
        /// What happened to it.
        kind: ChangeKind,
    },
}

/// Summary of a completed run.
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// What started the run.
    pub trigger: SyncTrigger,
    /// Raw records received.
    pub fetched: usize,
    /// Records rejected by the parser.
    pub dropped: usize,
    /// Records skipped because they were already present.
    pub skipped_existing: usize,
    /// Records skipped because a delete for them arrived mid-run.
    pub skipped_deleted: usize,
    /// Rows written to the local store.
    pub merged: usize,
    /// False if a full fetch stopped early on its budget.
    pub complete: bool,
    /// Wall time of the run.
    pub duration: Duration,
}

/// Outcome of [`SyncPipeline::trigger`].
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    /// The run completed.
    Completed(SyncReport),
    /// Another run was active; this trigger was folded into it.
    Coalesced,
}

impl SyncOutcome {
    /// Returns the report of a completed run.
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncOutcome::Completed(report) => Some(report),
            SyncOutcome::Coalesced => None,
        }
    }
}

/// Statistics about sync runs.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Runs that completed.
    pub runs_completed: u64,
    /// Runs that failed.
    pub runs_failed: u64,
    /// Runs abandoned because a remote call timed out.
    pub runs_timed_out: u64,
    /// Triggers folded into an active run.
    pub runs_coalesced: u64,
    /// Rows written by completed runs.
    pub records_merged: u64,
    /// Remote records rejected by the parser.
    pub records_dropped: u64,
    /// Retries performed by [`SyncPipeline::trigger_with_retry`].
    pub retries: u64,
    /// When the last run completed.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Error of the last failed or timed-out run.
    pub last_error: Option<String>,
}

/// Clears the running flag on every exit path.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Keeps a [`LocalStore`] in sync with a remote store.
pub struct SyncPipeline<R: RemoteStore> {
    store: Arc<LocalStore>,
    client: RemoteClient<R>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    running: AtomicBool,
    root: CancellationToken,
    current: Mutex<Option<CancellationToken>>,
    /// Remote ids deleted locally since the current run started.
    deleted_during_run: Mutex<HashSet<RemoteId>>,
}

impl<R: RemoteStore> SyncPipeline<R> {
    /// Creates a pipeline over a local store and a remote client.
    pub fn new(store: Arc<LocalStore>, client: RemoteClient<R>) -> Self {
        Self {
            store,
            client,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            running: AtomicBool::new(false),
            root: CancellationToken::new(),
            current: Mutex::new(None),
            deleted_during_run: Mutex::new(HashSet::new()),
        }
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns true while a run holds the pipeline.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Returns the local store.
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// Returns the remote client.
    pub fn client(&self) -> &RemoteClient<R> {
        &self.client
    }

    fn config(&self) -> &SyncConfig {
        self.client.config()
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    /// Cancels the in-flight run, if any.
    ///
    /// The run returns [`SyncError::Cancelled`] and the pipeline goes back
    /// to [`SyncState::Idle`] without writing locally.
    pub fn cancel(&self) {
        if let Some(token) = self.current.lock().as_ref() {
            token.cancel();
        }
    }

    /// Cancels the in-flight run and every future one.
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    /// Registers the configured change-notification subscription.
    pub async fn ensure_subscription(&self) -> SyncResult<SubscriptionHandle> {
        self.client
            .ensure_subscription(&self.config().subscription)
            .await
    }

    /// Runs one sync.
    ///
    /// Returns [`SyncOutcome::Coalesced`] immediately if a run is already
    /// active. A storage failure during merge fails the run with nothing
    /// committed. A remote timeout abandons the run and returns the pipeline
    /// to [`SyncState::Idle`]; the error is still returned so callers can
    /// retry.
    pub async fn trigger(&self, trigger: SyncTrigger) -> SyncResult<SyncOutcome> {
        let Some(_guard) = RunGuard::acquire(&self.running) else {
            debug!(?trigger, "sync already running, trigger coalesced");
            self.stats.write().runs_coalesced += 1;
            return Ok(SyncOutcome::Coalesced);
        };

        self.deleted_during_run.lock().clear();
        let token = self.root.child_token();
        *self.current.lock() = Some(token.clone());

        let span = info_span!("sync_run", trigger = ?trigger);
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(SyncError::Cancelled),
            result = self.run(&trigger).instrument(span) => result,
        };

        *self.current.lock() = None;

        match result {
            Ok(report) => {
                self.set_state(SyncState::Done);
                let mut stats = self.stats.write();
                stats.runs_completed += 1;
                stats.records_merged += report.merged as u64;
                stats.records_dropped += report.dropped as u64;
                stats.last_sync_time = Some(Utc::now());
                stats.last_error = None;
                Ok(SyncOutcome::Completed(report))
            }
            Err(SyncError::Cancelled) => {
                info!(?trigger, "sync run cancelled");
                self.set_state(SyncState::Idle);
                Err(SyncError::Cancelled)
            }
            Err(SyncError::Timeout) => {
                warn!(?trigger, "sync run timed out");
                self.set_state(SyncState::Idle);
                let mut stats = self.stats.write();
                stats.runs_timed_out += 1;
                stats.last_error = Some(SyncError::Timeout.to_string());
                Err(SyncError::Timeout)
            }
            Err(error) => {
                warn!(?trigger, %error, "sync run failed");
                self.set_state(SyncState::Failed);
                let mut stats = self.stats.write();
                stats.runs_failed += 1;
                stats.last_error = Some(error.to_string());
                Err(error)
            }
        }
    }

    /// Runs one sync, retrying network failures and timeouts with backoff.
    ///
    /// Remote rejections, storage failures and cancellation are returned
    /// immediately.
    pub async fn trigger_with_retry(&self, trigger: SyncTrigger) -> SyncResult<SyncOutcome> {
        let retry = self.config().retry.clone();
        let mut attempt = 0u32;

        loop {
            match self.trigger(trigger.clone()).await {
                Err(error) if error.is_retryable() && attempt + 1 < retry.max_attempts => {
                    attempt += 1;
                    self.stats.write().retries += 1;
                    let delay = retry.delay_for_attempt(attempt);
                    warn!(%error, attempt, delay_ms = delay.as_millis() as u64, "retrying sync");

                    tokio::select! {
                        _ = self.root.cancelled() => return Err(SyncError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                other => return other,
            }
        }
    }

    async fn run(&self, trigger: &SyncTrigger) -> SyncResult<SyncReport> {
        let started = Instant::now();

        if !self.client.is_reachable() {
            return Err(SyncError::network("remote store unreachable"));
        }

        self.set_state(SyncState::Downloading);
        let (raw, complete) = match trigger {
            SyncTrigger::Refresh => {
                let all = self.client.fetch_all(self.config().fetch_budget()).await?;
                (all.records, all.complete)
            }
            SyncTrigger::Record { remote_id, .. } => {
                let record = self.client.fetch_by_id(remote_id).await?;
                if record.is_none() {
                    debug!(%remote_id, "notified record no longer exists remotely");
                }
                (record.into_iter().collect(), true)
            }
        };

        self.set_state(SyncState::Parsing);
        let fetched = raw.len();
        let (parsed, dropped) = parse_batch(&raw, &self.config().record_type);

        self.set_state(SyncState::Deduping);
        let bypass = matches!(
            trigger,
            SyncTrigger::Record {
                kind: ChangeKind::Updated,
                ..
            }
        );
        let (mut batch, skipped_existing) = self.dedupe(parsed, bypass);

        self.set_state(SyncState::Merging);
        // Held through the write so a concurrent remote delete lands either
        // before the filter or after the merge.
        let deleted = self.deleted_during_run.lock();
        let before = batch.len();
        batch.retain(|event| !deleted.contains(&event.remote_id));
        let skipped_deleted = before - batch.len();
        let merged = batch.len();
        if !batch.is_empty() {
            self.store.upsert_batch(
                batch
                    .into_iter()
                    .map(|event| (event.remote_id, event.fields))
                    .collect(),
            )?;
        }
        drop(deleted);

        let report = SyncReport {
            trigger: trigger.clone(),
            fetched,
            dropped,
            skipped_existing,
            skipped_deleted,
            merged,
            complete,
            duration: started.elapsed(),
        };
        info!(
            fetched,
            dropped,
            skipped_existing,
            skipped_deleted,
            merged,
            complete,
            "sync run complete"
        );
        Ok(report)
    }

    /// Collapses repeats within the batch, then drops records the store
    /// already holds unless `bypass` is set.
    fn dedupe(&self, parsed: Vec<ParsedEvent>, bypass: bool) -> (Vec<ParsedEvent>, usize) {
        let mut batch = collapse_repeats(parsed);
        if bypass || batch.is_empty() {
            return (batch, 0);
        }

        let bound = dedupe_bound(&batch);
        let existing = self.store.existing_remote_ids_created_after(bound);
        let before = batch.len();
        batch.retain(|event| !existing.contains(&event.remote_id));
        let dropped = before - batch.len();
        (batch, dropped)
    }

    /// Removes the row mirroring a record deleted remotely.
    ///
    /// Does not wait for an active run. The id is remembered until the next
    /// run starts, so an active run whose download still holds the record
    /// does not merge it back. Returns false if no row mirrored it.
    pub fn apply_remote_delete(&self, remote_id: &RemoteId) -> SyncResult<bool> {
        let mut deleted = self.deleted_during_run.lock();
        let removed = self.store.delete_by_remote_id(remote_id)?;
        deleted.insert(remote_id.clone());
        Ok(removed)
    }

    /// Creates an event locally, then remotely, then confirms the local row.
    ///
    /// A missing occurrence time defaults to now. If the remote create fails
    /// the row stays pending and the error is returned; see
    /// [`publish_pending`](Self::publish_pending).
    pub async fn create_event(&self, mut fields: EventFields) -> SyncResult<EventId> {
        if fields.occurs_at.is_none() {
            fields.occurs_at = Some(Utc::now());
        }
        let id = self.store.insert(fields.clone(), None)?;
        self.publish(id, &fields).await
    }

    /// Publishes every pending row. Returns how many were confirmed.
    ///
    /// Stops at the first failure; rows confirmed before it stay confirmed.
    pub async fn publish_pending(&self) -> SyncResult<usize> {
        let pending = self.store.pending();
        let mut published = 0;
        for event in pending {
            self.publish(event.id, &event.fields).await?;
            published += 1;
        }
        Ok(published)
    }

    async fn publish(&self, id: EventId, fields: &EventFields) -> SyncResult<EventId> {
        let remote_id = match self.client.create(encode_fields(fields)).await {
            Ok(remote_id) => remote_id,
            Err(error) => {
                warn!(%id, %error, "remote create failed, event stays pending");
                return Err(error);
            }
        };

        match self.store.assign_remote_id(id, remote_id.clone()) {
            Ok(()) => {
                debug!(%id, %remote_id, "event confirmed");
                Ok(id)
            }
            Err(StoreError::DuplicateRemoteId { existing, .. }) => {
                // A notification already mirrored the new record into its
                // own row; the pending row is redundant.
                self.store.delete(id)?;
                debug!(%id, %existing, %remote_id, "event confirmed by an earlier merge");
                Ok(existing)
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Updates an event, remotely first if it has been confirmed.
    pub async fn update_event(&self, id: EventId, fields: EventFields) -> SyncResult<()> {
        let event = self.store.get(id).ok_or(StoreError::NotFound(id))?;
        if let Some(remote_id) = &event.remote_id {
            self.client.update(remote_id, encode_fields(&fields)).await?;
        }
        self.store.update_fields(id, fields)?;
        Ok(())
    }

    /// Deletes an event, remotely first if it has been confirmed.
    ///
    /// Returns false if no such row exists.
    pub async fn delete_event(&self, id: EventId) -> SyncResult<bool> {
        let Some(event) = self.store.get(id) else {
            return Ok(false);
        };
        if let Some(remote_id) = &event.remote_id {
            self.client.delete(remote_id).await?;
        }
        Ok(self.store.delete(id)?)
    }
}

/// Parses raw records, dropping the ones that cannot become events.
fn parse_batch(raw: &[RemoteRecord], record_type: &str) -> (Vec<ParsedEvent>, usize) {
    let mut parsed = Vec::with_capacity(raw.len());
    let mut dropped = 0;
    for record in raw {
        match parse_event(record, record_type) {
            Ok(event) => parsed.push(event),
            Err(reason) => {
                dropped += 1;
                debug!(record = ?record.record_name, %reason, "dropping remote record");
            }
        }
    }
    (parsed, dropped)
}

/// Keeps the last occurrence of each remote id, in first-seen order.
fn collapse_repeats(parsed: Vec<ParsedEvent>) -> Vec<ParsedEvent> {
    let mut slots: HashMap<RemoteId, usize> = HashMap::with_capacity(parsed.len());
    let mut out: Vec<ParsedEvent> = Vec::with_capacity(parsed.len());
    for event in parsed {
        match slots.get(&event.remote_id) {
            Some(&slot) => out[slot] = event,
            None => {
                slots.insert(event.remote_id.clone(), out.len());
                out.push(event);
            }
        }
    }
    out
}

/// Oldest occurrence time in a non-empty batch, or the minimum timestamp if
/// any record has none.
fn dedupe_bound(batch: &[ParsedEvent]) -> DateTime<Utc> {
    batch
        .iter()
        .map(|event| event.fields.occurs_at)
        .try_fold(None::<DateTime<Utc>>, |oldest, at| {
            at.map(|at| Some(oldest.map_or(at, |o: DateTime<Utc>| o.min(at))))
        })
        .flatten()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
