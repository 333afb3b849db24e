//! Record queries and cursor paging.

use crate::record::RemoteRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which records of a type a query or subscription selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "after", rename_all = "camelCase")]
pub enum Predicate {
    /// Every record.
    All,
    /// Records occurring at or after the given time.
    OccursAfter(DateTime<Utc>),
}

impl Predicate {
    /// Returns true if `record` is selected.
    ///
    /// Records with no occurrence time never match [`Predicate::OccursAfter`].
    pub fn matches(&self, record: &RemoteRecord) -> bool {
        match self {
            Predicate::All => true,
            Predicate::OccursAfter(after) => record.occurs_at().is_some_and(|at| at >= *after),
        }
    }
}

/// A query over one record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    /// Record type to select from.
    pub record_type: String,
    /// Selection predicate.
    pub predicate: Predicate,
}

impl Query {
    /// Selects every record of `record_type`.
    pub fn all(record_type: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            predicate: Predicate::All,
        }
    }

    /// Narrows the query with a predicate.
    #[must_use]
    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }

    /// Returns true if `record` belongs to this query's result.
    pub fn matches(&self, record: &RemoteRecord) -> bool {
        record.record_type == self.record_type && self.predicate.matches(record)
    }
}

/// Opaque continuation token for the next page of a query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageCursor(String);

impl PageCursor {
    /// Wraps a server-issued token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PageCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One page of query results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPage {
    /// Records on this page.
    pub records: Vec<RemoteRecord>,
    /// Cursor for the next page, `None` on the last page.
    #[serde(default)]
    pub next_cursor: Option<PageCursor>,
}

impl RecordPage {
    /// Returns true if no further page follows.
    pub fn is_last(&self) -> bool {
        self.next_cursor.is_none()
    }
}
