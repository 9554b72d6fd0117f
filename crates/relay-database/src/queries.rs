//! Standalone query functions over the `relay_outbox` table.
//!
//! Each function takes a `&Connection` as its first parameter, so it runs
//! equally inside `AsyncDatabase::call` and against a bare connection in tests.

use crate::migrations::TIMESTAMP_GLOB;
use crate::{
    format_timestamp, parse_timestamp, DatabaseResult, MalformedRow, NewRelayRecord, PendingRow,
    RecordId, RelayRecord,
};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use tracing::{debug, warn};

/// Ids per UPDATE statement, kept below SQLite's bound parameter limit.
const MARK_CHUNK_SIZE: usize = 500;

const RECORD_COLUMNS: &str =
    "id, room_id, sender_handle, payload, schema_version, queued_at, delivered_at, deleted_at";

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn optional_timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => timestamp_column(row, idx).map(Some),
        None => Ok(None),
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<RelayRecord> {
    Ok(RelayRecord {
        id: row.get(0)?,
        room_id: row.get(1)?,
        sender_handle: row.get(2)?,
        payload: row.get(3)?,
        schema_version: row.get(4)?,
        queued_at: timestamp_column(row, 5)?,
        delivered_at: optional_timestamp_column(row, 6)?,
        deleted_at: optional_timestamp_column(row, 7)?,
    })
}

fn is_decode_error(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::IntegralValueOutOfRange(..)
    )
}

/// Decode a row, keeping column-level failures scoped to that row.
fn pending_row_from_row(row: &Row<'_>) -> rusqlite::Result<PendingRow> {
    let id: RecordId = row.get(0)?;
    match record_from_row(row) {
        Ok(record) => Ok(Ok(record)),
        Err(e) if is_decode_error(&e) => Ok(Err(MalformedRow {
            id,
            reason: e.to_string(),
        })),
        Err(e) => Err(e),
    }
}

/// Append a record to the staging table and return its id.
///
/// `queued_at` is stamped here as the later of now and the newest stored
/// `queued_at`, so queue order never disagrees with id order.
pub fn append_record(conn: &Connection, record: &NewRelayRecord) -> DatabaseResult<RecordId> {
    let sql = format!(
        "INSERT INTO relay_outbox (room_id, sender_handle, payload, schema_version, queued_at)
         VALUES (?1, ?2, ?3, ?4, MAX(?5, COALESCE(
             (SELECT MAX(queued_at) FROM relay_outbox WHERE queued_at GLOB '{}'), ?5)))",
        TIMESTAMP_GLOB
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    stmt.execute(params![
        record.room_id,
        record.sender_handle,
        record.payload,
        record.schema_version,
        format_timestamp(Utc::now()),
    ])?;
    Ok(conn.last_insert_rowid())
}

/// Get a record by id, in any state.
pub fn get_record(conn: &Connection, id: RecordId) -> DatabaseResult<Option<RelayRecord>> {
    let sql = format!("SELECT {} FROM relay_outbox WHERE id = ?1", RECORD_COLUMNS);
    let mut stmt = conn.prepare_cached(&sql)?;

    match stmt.query_row(params![id], record_from_row) {
        Ok(record) => Ok(Some(record)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Select up to `limit` pending rows, oldest first.
///
/// Ties on `queued_at` are broken by id, so the order is total. A row whose
/// columns cannot be decoded is returned as a `MalformedRow` in its place
/// instead of failing the whole selection.
pub fn select_pending(conn: &Connection, limit: usize) -> DatabaseResult<Vec<PendingRow>> {
    let sql = format!(
        "SELECT {} FROM relay_outbox
         WHERE delivered_at IS NULL AND deleted_at IS NULL
         ORDER BY queued_at ASC, id ASC
         LIMIT ?1",
        RECORD_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);

    let rows = stmt
        .query_map(params![limit], pending_row_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    for malformed in rows.iter().filter_map(|row| row.as_ref().err()) {
        warn!(id = malformed.id, reason = %malformed.reason, "Pending row could not be decoded");
    }

    Ok(rows)
}

/// Count records that are neither delivered nor tombstoned.
pub fn count_pending(conn: &Connection) -> DatabaseResult<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM relay_outbox WHERE delivered_at IS NULL AND deleted_at IS NULL",
        [],
        |row| row.get(0),
    )?;
    Ok(u64::try_from(count).unwrap_or(0))
}

/// Stamp `delivered_at` on the given records in one transaction.
///
/// Only pending records are touched, so ids that are already delivered or
/// tombstoned keep their state. Returns the number of rows updated.
pub fn mark_delivered(
    conn: &Connection,
    ids: &[RecordId],
    delivered_at: DateTime<Utc>,
) -> DatabaseResult<usize> {
    if ids.is_empty() {
        return Ok(0);
    }

    let stamp = format_timestamp(delivered_at);
    let tx = conn.unchecked_transaction()?;
    let mut updated = 0;

    for chunk in ids.chunks(MARK_CHUNK_SIZE) {
        let placeholders = std::iter::repeat("?")
            .take(chunk.len())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE relay_outbox
             SET delivered_at = ?
             WHERE delivered_at IS NULL AND deleted_at IS NULL AND id IN ({})",
            placeholders
        );

        let mut params_vec: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(chunk.len() + 1);
        params_vec.push(&stamp);
        for id in chunk {
            params_vec.push(id);
        }

        updated += tx.execute(&sql, params_vec.as_slice())?;
    }

    tx.commit()?;
    debug!(requested = ids.len(), updated, "Marked records delivered");
    Ok(updated)
}
