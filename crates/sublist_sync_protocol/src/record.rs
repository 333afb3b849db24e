//! Remote records and their mapping onto local event fields.
//!
//! The remote store speaks in loosely typed records: a name, a type and a
//! bag of fields. Parsing is tolerant. A record without a name, or of a type
//! other than the one being synced, is rejected as a whole; a field holding
//! the wrong kind of value is treated as absent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use sublist_store::{EventFields, Location, RemoteId};
use thiserror::Error;

/// Default record type for events.
pub const EVENT_RECORD_TYPE: &str = "Event";

/// Field holding the title.
pub const FIELD_TITLE: &str = "title";
/// Field holding the occurrence time.
pub const FIELD_DATE: &str = "date";
/// Accepted alias of [`FIELD_DATE`].
pub const FIELD_DATE_ALIAS: &str = "occursAt";
/// Field holding the location.
pub const FIELD_LOCATION: &str = "location";

/// A loosely typed field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Explicit null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer.
    Integer(i64),
    /// Floating point number.
    Float(f64),
    /// Text, including timestamps in RFC 3339 form.
    Text(String),
    /// Ordered list.
    List(Vec<FieldValue>),
    /// Nested map.
    Map(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    /// Returns the text, if this is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as a float if it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(f) => Some(*f),
            FieldValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Returns the nested map, if this is a map.
    pub fn as_map(&self) -> Option<&BTreeMap<String, FieldValue>> {
        match self {
            FieldValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Interprets the value as an RFC 3339 timestamp.
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        self.as_text()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Interprets the value as a `{latitude, longitude}` map.
    pub fn as_location(&self) -> Option<Location> {
        let map = self.as_map()?;
        let latitude = map.get("latitude")?.as_f64()?;
        let longitude = map.get("longitude")?.as_f64()?;
        Some(Location::new(latitude, longitude))
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(dt: DateTime<Utc>) -> Self {
        FieldValue::Text(dt.to_rfc3339())
    }
}

impl From<Location> for FieldValue {
    fn from(loc: Location) -> Self {
        FieldValue::Map(BTreeMap::from([
            ("latitude".to_string(), FieldValue::Float(loc.latitude)),
            ("longitude".to_string(), FieldValue::Float(loc.longitude)),
        ]))
    }
}

/// Named fields of a remote record.
pub type RecordFields = BTreeMap<String, FieldValue>;

/// A record as the remote store returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecord {
    /// Record name. `None` only for malformed records.
    #[serde(default)]
    pub record_name: Option<RemoteId>,
    /// Record type.
    #[serde(default)]
    pub record_type: String,
    /// Field values.
    #[serde(default)]
    pub fields: RecordFields,
}

impl RemoteRecord {
    /// Creates a record.
    pub fn new(record_name: RemoteId, record_type: impl Into<String>, fields: RecordFields) -> Self {
        Self {
            record_name: Some(record_name),
            record_type: record_type.into(),
            fields,
        }
    }

    /// Creates an event record from local fields.
    pub fn event(record_name: RemoteId, fields: &EventFields) -> Self {
        Self::new(record_name, EVENT_RECORD_TYPE, encode_fields(fields))
    }

    /// Returns a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Occurrence time, read the same way [`parse_event`] reads it.
    pub fn occurs_at(&self) -> Option<DateTime<Utc>> {
        self.field(FIELD_DATE)
            .or_else(|| self.field(FIELD_DATE_ALIAS))
            .and_then(FieldValue::as_timestamp)
    }
}

/// Why a remote record could not become an event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// The record carries no usable name.
    #[error("record has no id")]
    MissingId,

    /// The record is of a different type.
    #[error("record type {found:?} is not {expected:?}")]
    ForeignType {
        /// Type on the record.
        found: String,
        /// Type being synced.
        expected: String,
    },
}

/// A remote record reduced to what the local store keeps.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEvent {
    /// Remote identifier.
    pub remote_id: RemoteId,
    /// Parsed payload.
    pub fields: EventFields,
}

/// Parses a remote record of type `record_type` into event fields.
///
/// Fields of the wrong shape are treated as absent rather than rejected.
pub fn parse_event(record: &RemoteRecord, record_type: &str) -> Result<ParsedEvent, RecordError> {
    let remote_id = record
        .record_name
        .clone()
        .filter(|id| !id.as_str().is_empty())
        .ok_or(RecordError::MissingId)?;

    if record.record_type != record_type {
        return Err(RecordError::ForeignType {
            found: record.record_type.clone(),
            expected: record_type.to_string(),
        });
    }

    let fields = EventFields {
        title: record
            .field(FIELD_TITLE)
            .and_then(FieldValue::as_text)
            .map(str::to_string),
        occurs_at: record.occurs_at(),
        location: record.field(FIELD_LOCATION).and_then(FieldValue::as_location),
    };

    Ok(ParsedEvent { remote_id, fields })
}

/// Encodes local event fields as remote record fields. Absent fields are
/// omitted.
pub fn encode_fields(fields: &EventFields) -> RecordFields {
    let mut out = RecordFields::new();
    if let Some(title) = &fields.title {
        out.insert(FIELD_TITLE.to_string(), title.as_str().into());
    }
    if let Some(at) = fields.occurs_at {
        out.insert(FIELD_DATE.to_string(), at.into());
    }
    if let Some(location) = fields.location {
        out.insert(FIELD_LOCATION.to_string(), location.into());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn when() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 18, 30, 0).unwrap()
    }

    #[test]
    fn parses_well_formed_record() {
        let fields = EventFields::titled("gig")
            .at(when())
            .located(Location::new(51.5, -0.12));
        let record = RemoteRecord::event(RemoteId::new("r1"), &fields);

        let parsed = parse_event(&record, EVENT_RECORD_TYPE).unwrap();
        assert_eq!(parsed.remote_id, RemoteId::new("r1"));
        assert_eq!(parsed.fields, fields);
    }

    #[test]
    fn missing_or_empty_name_is_rejected() {
        let mut record = RemoteRecord::event(RemoteId::new(""), &EventFields::titled("x"));
        assert_eq!(parse_event(&record, EVENT_RECORD_TYPE), Err(RecordError::MissingId));

        record.record_name = None;
        assert_eq!(parse_event(&record, EVENT_RECORD_TYPE), Err(RecordError::MissingId));
    }

    #[test]
    fn foreign_type_is_rejected() {
        let record = RemoteRecord::new(RemoteId::new("r1"), "CKEvent", RecordFields::new());
        assert!(matches!(
            parse_event(&record, EVENT_RECORD_TYPE),
            Err(RecordError::ForeignType { .. })
        ));
    }

    #[test]
    fn mistyped_fields_are_absent() {
        let record: RemoteRecord = serde_json::from_value(json!({
            "recordName": "r1",
            "recordType": "Event",
            "fields": {
                "title": 42,
                "date": "yesterday",
                "location": {"latitude": "north", "longitude": 1.0}
            }
        }))
        .unwrap();

        let parsed = parse_event(&record, EVENT_RECORD_TYPE).unwrap();
        assert_eq!(parsed.fields, EventFields::default());
    }

    #[test]
    fn date_alias_and_integer_coordinates() {
        let record: RemoteRecord = serde_json::from_value(json!({
            "recordName": "r1",
            "recordType": "Event",
            "fields": {
                "occursAt": "2024-03-01T18:30:00Z",
                "location": {"latitude": 10, "longitude": 20}
            }
        }))
        .unwrap();

        let parsed = parse_event(&record, EVENT_RECORD_TYPE).unwrap();
        assert_eq!(parsed.fields.occurs_at, Some(when()));
        assert_eq!(parsed.fields.location, Some(Location::new(10.0, 20.0)));
    }

    #[test]
    fn json_without_name_deserializes() {
        let record: RemoteRecord =
            serde_json::from_value(json!({"recordType": "Event", "fields": {}})).unwrap();
        assert!(record.record_name.is_none());
    }

    #[test]
    fn encode_omits_absent_fields() {
        let encoded = encode_fields(&EventFields::titled("only title"));
        assert_eq!(encoded.len(), 1);
        assert_eq!(encoded[FIELD_TITLE].as_text(), Some("only title"));
    }
}
