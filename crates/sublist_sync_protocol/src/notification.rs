//! Push notification decoding.
//!
//! A query-subscription push looks like:
//!
//! ```json
//! {
//!   "aps": { "content-available": 1 },
//!   "ck": { "qry": { "rid": "record-name", "fo": 1, "sid": "Event:all:cud" } }
//! }
//! ```
//!
//! `fo` is the firing reason: 1 created, 2 updated, 3 deleted.

use serde_json::Value;
use sublist_store::RemoteId;
use thiserror::Error;

/// What happened to the record a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// The record was created.
    Created,
    /// The record was updated.
    Updated,
    /// The record was deleted.
    Deleted,
}

impl ChangeKind {
    /// Maps a firing-reason code.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Created),
            2 => Some(Self::Updated),
            3 => Some(Self::Deleted),
            _ => None,
        }
    }

    /// Returns the firing-reason code.
    pub fn code(&self) -> i64 {
        match self {
            Self::Created => 1,
            Self::Updated => 2,
            Self::Deleted => 3,
        }
    }
}

/// A decoded record-change push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
    /// What happened.
    pub kind: ChangeKind,
    /// Which record.
    pub remote_id: RemoteId,
    /// Subscription that fired, if the payload names it.
    pub subscription_id: Option<String>,
    /// Whether the push is a background wake-up.
    pub content_available: bool,
}

/// Why a push payload could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The payload is not valid JSON.
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(String),

    /// The payload is not a JSON object.
    #[error("payload is not an object")]
    NotAnObject,

    /// No `ck` dictionary: not a record-store push.
    #[error("payload has no \"ck\" section")]
    MissingCloudSection,

    /// A record-store push that is not a query notification.
    #[error("payload is not a query notification")]
    NotQueryNotification,

    /// The query notification names no record.
    #[error("query notification has no record id")]
    MissingRecordId,

    /// The firing reason is absent or not one of the known codes.
    #[error("unknown firing reason {0}")]
    UnknownReason(String),
}

/// Decodes a push payload.
pub fn decode(payload: &Value) -> Result<ChangeNotification, DecodeError> {
    let root = payload.as_object().ok_or(DecodeError::NotAnObject)?;
    let ck = root
        .get("ck")
        .and_then(Value::as_object)
        .ok_or(DecodeError::MissingCloudSection)?;
    let qry = ck
        .get("qry")
        .and_then(Value::as_object)
        .ok_or(DecodeError::NotQueryNotification)?;

    let remote_id = qry
        .get("rid")
        .and_then(Value::as_str)
        .filter(|rid| !rid.is_empty())
        .map(RemoteId::new)
        .ok_or(DecodeError::MissingRecordId)?;

    let reason = qry.get("fo").cloned().unwrap_or(Value::Null);
    let kind = reason
        .as_i64()
        .and_then(ChangeKind::from_code)
        .ok_or_else(|| DecodeError::UnknownReason(reason.to_string()))?;

    let subscription_id = qry.get("sid").and_then(Value::as_str).map(str::to_string);

    let content_available = root
        .get("aps")
        .and_then(|aps| aps.get("content-available"))
        .and_then(Value::as_i64)
        .is_some_and(|flag| flag == 1);

    Ok(ChangeNotification {
        kind,
        remote_id,
        subscription_id,
        content_available,
    })
}

/// Decodes a push payload from raw JSON bytes.
pub fn decode_slice(bytes: &[u8]) -> Result<ChangeNotification, DecodeError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;
    decode(&value)
}

/// Builds the payload a query subscription push carries.
pub fn encode(notification: &ChangeNotification) -> Value {
    let mut qry = serde_json::json!({
        "rid": notification.remote_id.as_str(),
        "fo": notification.kind.code(),
    });
    if let (Some(sid), Some(map)) = (&notification.subscription_id, qry.as_object_mut()) {
        map.insert("sid".to_string(), Value::String(sid.clone()));
    }
    let aps = if notification.content_available {
        serde_json::json!({ "content-available": 1 })
    } else {
        serde_json::json!({})
    };
    serde_json::json!({ "aps": aps, "ck": { "qry": qry } })
}
