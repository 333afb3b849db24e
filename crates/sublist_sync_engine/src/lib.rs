//! # SubscribedList Sync Engine
//!
//! Keeps the local event store in sync with a remote record store.
//!
//! This crate provides:
//! - The `RemoteStore` abstraction, with in-memory and HTTP implementations
//! - `RemoteClient`: per-call timeouts, budgeted pagination and idempotent
//!   subscription registration
//! - `SyncPipeline`: the download → parse → dedupe → merge state machine
//! - `NotificationRouter`: push payloads in, local changes out
//! - Retry with exponential backoff and cancellation
//!
//! ## Architecture
//!
//! A sync run is started by a manual refresh or by a push notification:
//! 1. Fetch from the remote (one record, or every page of the query)
//! 2. Parse, dropping records that cannot become events
//! 3. Dedupe against rows the local store already holds
//! 4. Merge the remainder in one atomic batch
//!
//! ## Key Invariants
//!
//! - The remote store is authoritative
//! - At most one run is active; concurrent triggers are coalesced
//! - A failed or cancelled run commits nothing locally
//! - Merges key on the remote id, so replays never duplicate rows

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod client;
mod config;
mod error;
pub mod http;
mod pipeline;
mod remote;
mod router;
mod subscription;

pub use client::{FetchAll, RemoteClient};
pub use config::{Backoff, FetchBudget, RetryConfig, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpRemoteStore, LoopbackClient, LoopbackServer, RecordService};
pub use pipeline::{SyncOutcome, SyncPipeline, SyncReport, SyncState, SyncStats, SyncTrigger};
pub use remote::{MemoryRemoteStore, RemoteStore};
pub use router::{NotificationRouter, RouteOutcome};
pub use subscription::{FileSubscriptionStore, MemorySubscriptionStore, SubscriptionStore};
