//! # SubscribedList Store
//!
//! Durable local event store for SubscribedList.
//!
//! This crate provides:
//! - The [`Event`] entity and its identifiers
//! - An append-only journal over pluggable [`JournalBackend`]s
//! - [`LocalStore`], the single writer of the persisted collection
//! - A [`ChangeFeed`] for observers of committed changes
//!
//! ## Key Invariants
//!
//! - At most one row per non-null remote id
//! - A local-only row is confirmed in place, never duplicated
//! - A batch is one journal frame: committed whole or not at all
//! - Observers hear about a change only after its frame is durable
//!
//! ## Example
//!
//! ```rust
//! use sublist_store::{EventFields, LocalStore};
//!
//! let store = LocalStore::in_memory();
//! let id = store.insert(EventFields::titled("standup"), None).unwrap();
//! assert_eq!(store.pending().len(), 1);
//! assert_eq!(store.query(10)[0].id, id);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

pub mod backend;
mod change_feed;
mod error;
mod event;
pub mod journal;
mod store;

pub use backend::{FileBackend, InMemoryBackend, JournalBackend};
pub use change_feed::{ChangeFeed, ChangeKind, StoreChange};
pub use error::{StoreError, StoreResult};
pub use event::{Event, EventFields, EventId, Location, RemoteId};
pub use store::LocalStore;
