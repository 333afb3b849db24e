//! # SubscribedList Sync Protocol
//!
//! Wire types shared by the sync engine and remote store implementations.
//!
//! This crate provides:
//! - `RemoteRecord` and tolerant parsing into local event fields
//! - `Query`, `PageCursor` and `RecordPage` for cursor paging
//! - `SubscriptionSpec` and `SubscriptionHandle`
//! - Push payload decoding into `ChangeNotification`
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

pub mod notification;
mod query;
mod record;
mod subscription;

pub use notification::{ChangeKind, ChangeNotification, DecodeError};
pub use query::{PageCursor, Predicate, Query, RecordPage};
pub use record::{
    encode_fields, parse_event, FieldValue, ParsedEvent, RecordError, RecordFields, RemoteRecord,
    EVENT_RECORD_TYPE, FIELD_DATE, FIELD_DATE_ALIAS, FIELD_LOCATION, FIELD_TITLE,
};
pub use subscription::{
    FiresOn, NotificationInfo, SubscriptionHandle, SubscriptionSpec, DEFAULT_ALERT_BODY,
};
