//! The local event store.

use crate::backend::{FileBackend, InMemoryBackend, JournalBackend};
use crate::change_feed::{ChangeFeed, ChangeKind, StoreChange};
use crate::error::{StoreError, StoreResult};
use crate::event::{Event, EventFields, EventId, RemoteId};
use crate::journal::{self, JournalEntry};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::mpsc::Receiver;
use tracing::{debug, warn};

/// Durable, ordered collection of events.
///
/// The store is the single writer of its journal. Every mutation is encoded
/// as one journal frame, appended and synced before the in-memory index is
/// touched, so a failed write leaves both the journal and the index as they
/// were. Readers get owned copies.
///
/// # Example
///
/// ```rust
/// use sublist_store::{EventFields, LocalStore, RemoteId};
///
/// let store = LocalStore::in_memory();
/// let id = store
///     .upsert_by_remote_id(RemoteId::new("rec-1"), EventFields::titled("launch"))
///     .unwrap();
/// assert_eq!(store.get(id).unwrap().fields.title.as_deref(), Some("launch"));
/// ```
pub struct LocalStore {
    inner: Mutex<Inner>,
    feed: ChangeFeed,
    degraded: bool,
}

struct Inner {
    backend: Box<dyn JournalBackend>,
    rows: HashMap<EventId, Event>,
    by_remote: HashMap<RemoteId, EventId>,
    sequence: u64,
    /// Journal length to restore before the next append, set when a failed
    /// write could not be rolled back.
    rollback_to: Option<u64>,
}

impl LocalStore {
    /// Opens the journal at `path`, falling back to an ephemeral store.
    ///
    /// If the durable journal cannot be opened (missing permissions, locked
    /// by another process, unreadable), a warning is logged and an in-memory
    /// store is returned instead with [`is_degraded`](Self::is_degraded) set.
    /// Writes to a degraded store succeed but each one logs a warning.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::open_durable(path) {
            Ok(store) => store,
            Err(error) => {
                warn!(
                    path = %path.display(),
                    %error,
                    "durable event journal unavailable, continuing with an ephemeral store"
                );
                Self {
                    degraded: true,
                    ..Self::in_memory()
                }
            }
        }
    }

    /// Opens the journal at `path` with no fallback.
    pub fn open_durable(path: impl AsRef<Path>) -> StoreResult<Self> {
        let backend = FileBackend::open(path.as_ref())?;
        Self::with_backend(Box::new(backend))
    }

    /// Creates an empty ephemeral store.
    pub fn in_memory() -> Self {
        Self::from_parts(Box::new(InMemoryBackend::new()), HashMap::new(), 0)
    }

    /// Opens a store over an arbitrary backend, replaying its journal.
    ///
    /// A torn or corrupt tail frame is truncated away with a warning; every
    /// frame before it is kept.
    pub fn with_backend(mut backend: Box<dyn JournalBackend>) -> StoreResult<Self> {
        let bytes = backend.read_all()?;
        let replay = journal::replay(&bytes);

        if let Some(reason) = &replay.torn_tail {
            warn!(
                %reason,
                kept_bytes = replay.valid_len,
                dropped_bytes = bytes.len() as u64 - replay.valid_len,
                "discarding torn journal tail"
            );
            backend.truncate(replay.valid_len)?;
        }

        let mut rows = HashMap::new();
        let sequence = replay.batches.len() as u64;
        for batch in replay.batches {
            for entry in batch {
                match entry {
                    JournalEntry::Put(event) => {
                        rows.insert(event.id, event);
                    }
                    JournalEntry::Delete(id) => {
                        rows.remove(&id);
                    }
                }
            }
        }

        debug!(rows = rows.len(), frames = sequence, "event journal replayed");
        Ok(Self::from_parts(backend, rows, sequence))
    }

    fn from_parts(
        backend: Box<dyn JournalBackend>,
        rows: HashMap<EventId, Event>,
        sequence: u64,
    ) -> Self {
        let by_remote = rows
            .values()
            .filter_map(|e| e.remote_id.clone().map(|r| (r, e.id)))
            .collect();

        Self {
            inner: Mutex::new(Inner {
                backend,
                rows,
                by_remote,
                sequence,
                rollback_to: None,
            }),
            feed: ChangeFeed::new(),
            degraded: false,
        }
    }

    /// Returns true if the store fell back to ephemeral storage on open.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Returns true if writes survive a restart.
    pub fn is_durable(&self) -> bool {
        self.inner.lock().backend.is_durable()
    }

    /// Subscribes to committed changes.
    pub fn subscribe(&self) -> Receiver<StoreChange> {
        self.feed.subscribe()
    }

    /// Inserts a new row.
    ///
    /// Pass `remote_id: None` for a locally created event awaiting remote
    /// confirmation.
    pub fn insert(&self, fields: EventFields, remote_id: Option<RemoteId>) -> StoreResult<EventId> {
        let mut inner = self.inner.lock();

        if let Some(remote_id) = &remote_id {
            if let Some(existing) = inner.by_remote.get(remote_id) {
                return Err(StoreError::duplicate(remote_id.clone(), *existing));
            }
        }

        let event = Event {
            id: EventId::new(),
            remote_id,
            fields,
        };
        let id = event.id;
        self.commit(&mut inner, vec![JournalEntry::Put(event)])?;
        Ok(id)
    }

    /// Overwrites the row holding `remote_id`, or inserts one.
    pub fn upsert_by_remote_id(
        &self,
        remote_id: RemoteId,
        fields: EventFields,
    ) -> StoreResult<EventId> {
        self.upsert_batch(vec![(remote_id, fields)])?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::corrupted("upsert of one entry returned no id"))
    }

    /// Upserts a batch atomically.
    ///
    /// The whole batch is one journal frame: either every entry is
    /// committed or none is. Repeated remote ids within the batch resolve to
    /// the same row, last entry wins. Returns the row id for each input, in
    /// order.
    pub fn upsert_batch(&self, items: Vec<(RemoteId, EventFields)>) -> StoreResult<Vec<EventId>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let mut inner = self.inner.lock();
        let mut assigned: HashMap<RemoteId, EventId> = HashMap::new();
        let mut ids = Vec::with_capacity(items.len());
        let mut entries = Vec::with_capacity(items.len());

        for (remote_id, fields) in items {
            let id = match inner.by_remote.get(&remote_id).or(assigned.get(&remote_id)) {
                Some(id) => *id,
                None => {
                    let id = EventId::new();
                    assigned.insert(remote_id.clone(), id);
                    id
                }
            };
            ids.push(id);
            entries.push(JournalEntry::Put(Event {
                id,
                remote_id: Some(remote_id),
                fields,
            }));
        }

        self.commit(&mut inner, entries)?;
        Ok(ids)
    }

    /// Fills in the remote id of a locally created row.
    pub fn assign_remote_id(&self, id: EventId, remote_id: RemoteId) -> StoreResult<()> {
        let mut inner = self.inner.lock();

        let event = inner.rows.get(&id).ok_or(StoreError::NotFound(id))?;
        if let Some(current) = &event.remote_id {
            return Err(StoreError::AlreadyConfirmed {
                id,
                remote_id: current.clone(),
            });
        }
        if let Some(existing) = inner.by_remote.get(&remote_id) {
            return Err(StoreError::duplicate(remote_id, *existing));
        }

        let mut confirmed = event.clone();
        confirmed.remote_id = Some(remote_id);
        self.commit(&mut inner, vec![JournalEntry::Put(confirmed)])
            .map(|_| ())
    }

    /// Replaces the fields of an existing row.
    pub fn update_fields(&self, id: EventId, fields: EventFields) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let event = inner.rows.get(&id).ok_or(StoreError::NotFound(id))?;
        let updated = Event {
            fields,
            ..event.clone()
        };
        self.commit(&mut inner, vec![JournalEntry::Put(updated)])
            .map(|_| ())
    }

    /// Removes a row. Returns false if it did not exist.
    pub fn delete(&self, id: EventId) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        if !inner.rows.contains_key(&id) {
            return Ok(false);
        }
        self.commit(&mut inner, vec![JournalEntry::Delete(id)])?;
        Ok(true)
    }

    /// Removes the row mirroring `remote_id`. Returns false if none did.
    pub fn delete_by_remote_id(&self, remote_id: &RemoteId) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        let Some(id) = inner.by_remote.get(remote_id).copied() else {
            return Ok(false);
        };
        self.commit(&mut inner, vec![JournalEntry::Delete(id)])?;
        Ok(true)
    }

    /// Returns a copy of a row.
    pub fn get(&self, id: EventId) -> Option<Event> {
        self.inner.lock().rows.get(&id).cloned()
    }

    /// Returns a copy of the row mirroring `remote_id`.
    pub fn get_by_remote_id(&self, remote_id: &RemoteId) -> Option<Event> {
        let inner = self.inner.lock();
        inner
            .by_remote
            .get(remote_id)
            .and_then(|id| inner.rows.get(id))
            .cloned()
    }

    /// Remote ids of rows occurring at or after `after`, plus rows with no
    /// occurrence time.
    ///
    /// Used to dedupe an incoming batch without scanning the whole table.
    /// The result is only complete for that purpose if `after` is no later
    /// than the oldest record in the batch.
    pub fn existing_remote_ids_created_after(&self, after: DateTime<Utc>) -> HashSet<RemoteId> {
        self.inner
            .lock()
            .rows
            .values()
            .filter(|e| e.fields.occurs_at.map_or(true, |at| at >= after))
            .filter_map(|e| e.remote_id.clone())
            .collect()
    }

    /// Every remote id currently mirrored.
    pub fn remote_ids(&self) -> HashSet<RemoteId> {
        self.inner.lock().by_remote.keys().cloned().collect()
    }

    /// Snapshot of up to `limit` rows, most recent first.
    ///
    /// Rows without an occurrence time come last; ties are ordered by id.
    pub fn query(&self, limit: usize) -> Vec<Event> {
        let inner = self.inner.lock();
        let mut events: Vec<Event> = inner.rows.values().cloned().collect();
        drop(inner);

        sort_most_recent_first(&mut events);
        events.truncate(limit);
        events
    }

    /// Rows still awaiting remote confirmation, most recent first.
    pub fn pending(&self) -> Vec<Event> {
        let mut events: Vec<Event> = self
            .inner
            .lock()
            .rows
            .values()
            .filter(|e| e.is_pending())
            .cloned()
            .collect();
        sort_most_recent_first(&mut events);
        events
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.inner.lock().rows.len()
    }

    /// Returns true if the store holds no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes one frame, then applies it to the index and notifies observers.
    fn commit(&self, inner: &mut Inner, entries: Vec<JournalEntry>) -> StoreResult<Vec<StoreChange>> {
        let frame = journal::encode_frame(&entries)?;

        if let Some(len) = inner.rollback_to {
            inner.backend.truncate(len)?;
            inner.rollback_to = None;
        }

        let start = inner.backend.size()?;
        let written = match inner.backend.append(&frame) {
            Ok(_) => inner.backend.sync(),
            Err(error) => Err(error),
        };
        if let Err(error) = written {
            // A partial or unsynced frame must not stay ahead of later ones:
            // replay stops at the first torn frame.
            if let Err(truncate_error) = inner.backend.truncate(start) {
                warn!(%truncate_error, "failed to roll back journal frame");
                inner.rollback_to = Some(start);
            }
            return Err(error);
        }

        if self.degraded {
            warn!(
                entries = entries.len(),
                "event write accepted by ephemeral fallback store and will not survive restart"
            );
        }

        inner.sequence += 1;
        let sequence = inner.sequence;
        let changes: Vec<StoreChange> = entries
            .into_iter()
            .map(|entry| StoreChange {
                sequence,
                id: entry_id(&entry),
                kind: inner.apply(entry),
            })
            .collect();

        debug!(sequence, changes = changes.len(), "journal frame committed");
        self.feed.emit_batch(&changes);
        Ok(changes)
    }
}

impl Inner {
    fn apply(&mut self, entry: JournalEntry) -> ChangeKind {
        match entry {
            JournalEntry::Put(event) => {
                let previous = self.rows.insert(event.id, event.clone());
                if let Some(old_remote) = previous.as_ref().and_then(|p| p.remote_id.as_ref()) {
                    if event.remote_id.as_ref() != Some(old_remote) {
                        self.by_remote.remove(old_remote);
                    }
                }
                if let Some(remote_id) = event.remote_id {
                    self.by_remote.insert(remote_id, event.id);
                }
                if previous.is_some() {
                    ChangeKind::Updated
                } else {
                    ChangeKind::Inserted
                }
            }
            JournalEntry::Delete(id) => {
                if let Some(removed) = self.rows.remove(&id) {
                    if let Some(remote_id) = removed.remote_id {
                        self.by_remote.remove(&remote_id);
                    }
                }
                ChangeKind::Deleted
            }
        }
    }
}

fn entry_id(entry: &JournalEntry) -> EventId {
    match entry {
        JournalEntry::Put(event) => event.id,
        JournalEntry::Delete(id) => *id,
    }
}

fn sort_most_recent_first(events: &mut [Event]) {
    events.sort_by(|a, b| {
        b.occurs_at()
            .cmp(&a.occurs_at())
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Location;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn at(hours: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(hours)
    }

    fn fields(title: &str, hours: i64) -> EventFields {
        EventFields::titled(title).at(at(hours))
    }

    #[test]
    fn insert_and_get() {
        let store = LocalStore::in_memory();
        let id = store
            .insert(fields("a", 1).located(Location::new(1.0, 2.0)), None)
            .unwrap();

        let event = store.get(id).unwrap();
        assert!(event.is_pending());
        assert_eq!(event.fields.location, Some(Location::new(1.0, 2.0)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn insert_rejects_duplicate_remote_id() {
        let store = LocalStore::in_memory();
        let first = store
            .insert(fields("a", 1), Some(RemoteId::new("r1")))
            .unwrap();

        let err = store
            .insert(fields("b", 2), Some(RemoteId::new("r1")))
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateRemoteId { existing, .. } if existing == first));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn upsert_overwrites_existing_row() {
        let store = LocalStore::in_memory();
        let id = store
            .upsert_by_remote_id(RemoteId::new("r1"), fields("old", 1))
            .unwrap();
        let again = store
            .upsert_by_remote_id(RemoteId::new("r1"), fields("new", 2))
            .unwrap();

        assert_eq!(id, again);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(id).unwrap().fields.title.as_deref(), Some("new"));
    }

    #[test]
    fn upsert_batch_collapses_repeats() {
        let store = LocalStore::in_memory();
        let ids = store
            .upsert_batch(vec![
                (RemoteId::new("r1"), fields("first", 1)),
                (RemoteId::new("r2"), fields("other", 2)),
                (RemoteId::new("r1"), fields("second", 3)),
            ])
            .unwrap();

        assert_eq!(ids[0], ids[2]);
        assert_eq!(store.len(), 2);
        let row = store.get_by_remote_id(&RemoteId::new("r1")).unwrap();
        assert_eq!(row.fields.title.as_deref(), Some("second"));
    }

    #[test]
    fn failed_batch_commits_nothing() {
        let backend = InMemoryBackend::new();
        let handle = backend.clone();
        let store = LocalStore::with_backend(Box::new(backend)).unwrap();
        store
            .upsert_by_remote_id(RemoteId::new("r0"), fields("kept", 0))
            .unwrap();
        let journal_before = handle.data();
        let rx = store.subscribe();

        handle.set_refuse_writes(true);
        let result = store.upsert_batch(vec![
            (RemoteId::new("r1"), fields("a", 1)),
            (RemoteId::new("r2"), fields("b", 2)),
        ]);

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(store.len(), 1);
        assert!(store.get_by_remote_id(&RemoteId::new("r1")).is_none());
        assert_eq!(handle.data(), journal_before);
        assert!(rx.try_recv().is_err());
    }

    /// Writes half of its `tear_at`-th append, then fails it.
    struct TearingBackend {
        inner: InMemoryBackend,
        appends: usize,
        tear_at: usize,
    }

    impl JournalBackend for TearingBackend {
        fn read_all(&self) -> StoreResult<Vec<u8>> {
            self.inner.read_all()
        }

        fn append(&mut self, data: &[u8]) -> StoreResult<u64> {
            self.appends += 1;
            if self.appends == self.tear_at {
                self.inner.append(&data[..data.len() / 2])?;
                return Err(StoreError::Unavailable("device full".into()));
            }
            self.inner.append(data)
        }

        fn sync(&mut self) -> StoreResult<()> {
            self.inner.sync()
        }

        fn size(&self) -> StoreResult<u64> {
            self.inner.size()
        }

        fn truncate(&mut self, new_size: u64) -> StoreResult<()> {
            self.inner.truncate(new_size)
        }

        fn is_durable(&self) -> bool {
            true
        }
    }

    #[test]
    fn partial_append_does_not_shadow_later_commits() {
        let backend = InMemoryBackend::new();
        let handle = backend.clone();
        let store = LocalStore::with_backend(Box::new(TearingBackend {
            inner: backend,
            appends: 0,
            tear_at: 2,
        }))
        .unwrap();
        let rx = store.subscribe();

        store
            .upsert_by_remote_id(RemoteId::new("r1"), fields("a", 1))
            .unwrap();
        let journal_before = handle.data();

        assert!(store
            .upsert_by_remote_id(RemoteId::new("r2"), fields("b", 2))
            .is_err());
        assert_eq!(handle.data(), journal_before);

        store
            .upsert_by_remote_id(RemoteId::new("r3"), fields("c", 3))
            .unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(rx.try_iter().count(), 2);
        drop(store);

        let reopened = LocalStore::with_backend(Box::new(handle)).unwrap();
        assert_eq!(reopened.len(), 2);
        assert!(reopened.get_by_remote_id(&RemoteId::new("r2")).is_none());
        assert!(reopened.get_by_remote_id(&RemoteId::new("r3")).is_some());
    }

    #[test]
    fn assign_remote_id_confirms_same_row() {
        let store = LocalStore::in_memory();
        let id = store.insert(fields("local", 1), None).unwrap();
        assert_eq!(store.pending().len(), 1);

        store.assign_remote_id(id, RemoteId::new("r9")).unwrap();

        assert_eq!(store.len(), 1);
        assert!(store.pending().is_empty());
        assert_eq!(store.get_by_remote_id(&RemoteId::new("r9")).unwrap().id, id);
    }

    #[test]
    fn assign_remote_id_errors() {
        let store = LocalStore::in_memory();
        let taken = store
            .insert(fields("a", 1), Some(RemoteId::new("taken")))
            .unwrap();
        let local = store.insert(fields("b", 2), None).unwrap();

        assert!(matches!(
            store.assign_remote_id(EventId::new(), RemoteId::new("x")),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.assign_remote_id(taken, RemoteId::new("y")),
            Err(StoreError::AlreadyConfirmed { .. })
        ));
        assert!(matches!(
            store.assign_remote_id(local, RemoteId::new("taken")),
            Err(StoreError::DuplicateRemoteId { .. })
        ));
    }

    #[test]
    fn delete_by_remote_id_removes_exactly_one() {
        let store = LocalStore::in_memory();
        store
            .upsert_batch(vec![
                (RemoteId::new("r1"), fields("a", 1)),
                (RemoteId::new("r2"), fields("b", 2)),
            ])
            .unwrap();

        assert!(store.delete_by_remote_id(&RemoteId::new("r1")).unwrap());
        assert_eq!(store.len(), 1);
        assert!(store.get_by_remote_id(&RemoteId::new("r2")).is_some());

        assert!(!store.delete_by_remote_id(&RemoteId::new("missing")).unwrap());
        assert_eq!(store.len(), 1);
        assert!(!store.delete(EventId::new()).unwrap());
    }

    #[test]
    fn remote_id_can_be_reused_after_delete() {
        let store = LocalStore::in_memory();
        store
            .upsert_by_remote_id(RemoteId::new("r1"), fields("a", 1))
            .unwrap();
        store.delete_by_remote_id(&RemoteId::new("r1")).unwrap();
        assert!(store.remote_ids().is_empty());

        store
            .insert(fields("again", 2), Some(RemoteId::new("r1")))
            .unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn existing_ids_respect_time_window() {
        let store = LocalStore::in_memory();
        store
            .upsert_batch(vec![
                (RemoteId::new("old"), fields("old", 1)),
                (RemoteId::new("edge"), fields("edge", 5)),
                (RemoteId::new("new"), fields("new", 9)),
                (RemoteId::new("undated"), EventFields::titled("undated")),
            ])
            .unwrap();
        store.insert(fields("local", 10), None).unwrap();

        let ids = store.existing_remote_ids_created_after(at(5));
        let expected: HashSet<RemoteId> = ["edge", "new", "undated"]
            .into_iter()
            .map(RemoteId::from)
            .collect();
        assert_eq!(ids, expected);
        assert_eq!(store.remote_ids().len(), 4);
    }

    #[test]
    fn query_orders_most_recent_first_with_undated_last() {
        let store = LocalStore::in_memory();
        store.insert(EventFields::titled("undated"), None).unwrap();
        store.insert(fields("mid", 5), None).unwrap();
        store.insert(fields("late", 9), None).unwrap();
        store.insert(fields("early", 1), None).unwrap();

        let titles: Vec<_> = store
            .query(10)
            .into_iter()
            .map(|e| e.fields.title.unwrap())
            .collect();
        assert_eq!(titles, ["late", "mid", "early", "undated"]);

        assert_eq!(store.query(2).len(), 2);
        assert!(store.query(0).is_empty());
    }

    #[test]
    fn change_feed_reports_kinds() {
        let store = LocalStore::in_memory();
        let rx = store.subscribe();

        let id = store
            .upsert_by_remote_id(RemoteId::new("r1"), fields("a", 1))
            .unwrap();
        store
            .upsert_by_remote_id(RemoteId::new("r1"), fields("b", 1))
            .unwrap();
        store.delete(id).unwrap();

        let kinds: Vec<_> = rx.try_iter().map(|c| (c.id, c.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                (id, ChangeKind::Inserted),
                (id, ChangeKind::Updated),
                (id, ChangeKind::Deleted),
            ]
        );
    }

    #[test]
    fn journal_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.journal");

        let (kept, local) = {
            let store = LocalStore::open_durable(&path).unwrap();
            assert!(store.is_durable());
            let kept = store
                .upsert_by_remote_id(RemoteId::new("r1"), fields("kept", 1))
                .unwrap();
            let gone = store
                .upsert_by_remote_id(RemoteId::new("r2"), fields("gone", 2))
                .unwrap();
            let local = store.insert(fields("local", 3), None).unwrap();
            store.delete(gone).unwrap();
            (kept, local)
        };

        let store = LocalStore::open_durable(&path).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get_by_remote_id(&RemoteId::new("r1")).unwrap().id, kept);
        assert!(store.get(local).unwrap().is_pending());
        assert!(store.get_by_remote_id(&RemoteId::new("r2")).is_none());
    }

    #[test]
    fn torn_tail_is_truncated_on_open() {
        let backend = InMemoryBackend::new();
        let handle = backend.clone();
        {
            let store = LocalStore::with_backend(Box::new(backend)).unwrap();
            store
                .upsert_by_remote_id(RemoteId::new("r1"), fields("whole", 1))
                .unwrap();
        }
        let whole_len = handle.data().len();

        let torn = journal::encode_frame(&[JournalEntry::Delete(EventId::new())]).unwrap();
        let mut bytes = handle.data();
        bytes.extend_from_slice(&torn[..torn.len() / 2]);
        let damaged = InMemoryBackend::with_data(bytes);
        let damaged_handle = damaged.clone();

        let store = LocalStore::with_backend(Box::new(damaged)).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(damaged_handle.data().len(), whole_len);

        store
            .upsert_by_remote_id(RemoteId::new("r2"), fields("after", 2))
            .unwrap();
        let reopened = LocalStore::with_backend(Box::new(damaged_handle)).unwrap();
        assert_eq!(reopened.len(), 2);
    }

    #[test]
    fn open_falls_back_when_journal_is_locked() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.journal");

        let _owner = LocalStore::open_durable(&path).unwrap();
        let fallback = LocalStore::open(&path);

        assert!(fallback.is_degraded());
        assert!(!fallback.is_durable());
        assert!(fallback.insert(fields("ephemeral", 1), None).is_ok());
    }

    #[test]
    fn open_uses_durable_journal_when_available() {
        let dir = tempdir().unwrap();
        let store = LocalStore::open(dir.path().join("events.journal"));
        assert!(!store.is_degraded());
        assert!(store.is_durable());
    }

    proptest! {
        #[test]
        fn query_is_non_increasing_and_bounded(
            hours in proptest::collection::vec(proptest::option::of(-1000i64..1000), 0..40),
            limit in 0usize..50,
        ) {
            let store = LocalStore::in_memory();
            for (i, h) in hours.iter().enumerate() {
                let mut f = EventFields::titled(format!("e{i}"));
                f.occurs_at = h.map(at);
                store.insert(f, Some(RemoteId::new(format!("r{i}")))).unwrap();
            }

            let result = store.query(limit);
            prop_assert!(result.len() <= limit);
            prop_assert_eq!(result.len(), limit.min(hours.len()));
            for pair in result.windows(2) {
                prop_assert!(pair[0].occurs_at() >= pair[1].occurs_at());
            }
        }
    }
}
