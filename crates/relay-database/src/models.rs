//! Model types for staged relay records.

use crate::{DatabaseError, DatabaseResult};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

/// Identifier assigned by the store when a record is appended.
pub type RecordId = i64;

/// A message staged for delivery to the primary service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayRecord {
    pub id: RecordId,
    /// Delivery destination.
    pub room_id: String,
    /// Originating identity.
    pub sender_handle: String,
    /// Opaque encoded blob, passed through untouched.
    pub payload: String,
    pub schema_version: i32,
    pub queued_at: DateTime<Utc>,
    /// Set once, when the primary service accepted the record.
    pub delivered_at: Option<DateTime<Utc>>,
    /// Tombstone owned by the external retention process.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl RelayRecord {
    /// Pending means neither delivered nor tombstoned.
    pub fn is_pending(&self) -> bool {
        self.delivered_at.is_none() && self.deleted_at.is_none()
    }
}

/// Input for appending a record to the staging store.
///
/// `queued_at` is stamped by the store at insert time.
#[derive(Debug, Clone)]
pub struct NewRelayRecord {
    pub room_id: String,
    pub sender_handle: String,
    pub payload: String,
    pub schema_version: i32,
}

impl NewRelayRecord {
    pub fn new(
        room_id: impl Into<String>,
        sender_handle: impl Into<String>,
        payload: impl Into<String>,
        schema_version: i32,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            sender_handle: sender_handle.into(),
            payload: payload.into(),
            schema_version,
        }
    }
}

/// A pending row whose columns could not be decoded into a `RelayRecord`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("row {id} could not be decoded: {reason}")]
pub struct MalformedRow {
    pub id: RecordId,
    pub reason: String,
}

/// One entry of a pending selection: a decoded record or an undecodable row.
pub type PendingRow = Result<RelayRecord, MalformedRow>;

/// Format a timestamp for storage.
///
/// Fixed microsecond precision with a `Z` suffix keeps lexical order equal
/// to chronological order, which `ORDER BY queued_at` relies on.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp.
pub fn parse_timestamp(raw: &str) -> DatabaseResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::InvalidData(format!("bad timestamp {:?}: {}", raw, e)))
}
