//! Database migrations.
//!
//! Migrations run in order and are tracked in the `migrations` table.

use crate::DatabaseResult;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> DatabaseResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM migrations",
        [],
        |row| row.get(0),
    )?;

    info!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_relay_outbox(conn)?;
    }
    if current_version < 2 {
        migrate_v2_write_once_delivery(conn)?;
    }

    info!("Migrations complete");
    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> DatabaseResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// GLOB matching the stored timestamp shape, `YYYY-MM-DDTHH:MM:SS.ffffffZ`.
pub(crate) const TIMESTAMP_GLOB: &str = "[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]T[0-9][0-9]:[0-9][0-9]:[0-9][0-9].[0-9][0-9][0-9][0-9][0-9][0-9]Z";

/// V1: Staging table for records awaiting relay to the primary service.
fn migrate_v1_relay_outbox(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v1: relay outbox");

    // AUTOINCREMENT: ids are never reused, even after rows are purged.
    // The queued_at default pads SQLite's millisecond %f to six digits.
    conn.execute_batch(&format!(
        "
        CREATE TABLE IF NOT EXISTS relay_outbox (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            room_id TEXT NOT NULL CHECK (typeof(room_id) = 'text'),
            sender_handle TEXT NOT NULL CHECK (typeof(sender_handle) = 'text'),
            payload TEXT NOT NULL CHECK (typeof(payload) = 'text'),
            schema_version INTEGER NOT NULL DEFAULT 1
                CHECK (typeof(schema_version) = 'integer'),
            queued_at TEXT NOT NULL
                DEFAULT (strftime('%Y-%m-%dT%H:%M:%f', 'now') || '000Z')
                CHECK (queued_at GLOB '{glob}'),
            delivered_at TEXT,
            deleted_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_relay_outbox_pending
            ON relay_outbox(delivered_at, deleted_at, queued_at, id);
        CREATE INDEX IF NOT EXISTS idx_relay_outbox_room_id
            ON relay_outbox(room_id);
        ",
        glob = TIMESTAMP_GLOB
    ))?;

    record_migration(conn, 1, "relay_outbox")?;
    Ok(())
}

/// V2: Reject any update that changes an already-set `delivered_at`.
fn migrate_v2_write_once_delivery(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v2: write-once delivered_at");

    conn.execute_batch(
        "
        CREATE TRIGGER IF NOT EXISTS trg_relay_outbox_delivered_write_once
        BEFORE UPDATE OF delivered_at ON relay_outbox
        WHEN OLD.delivered_at IS NOT NULL
             AND NEW.delivered_at IS NOT OLD.delivered_at
        BEGIN
            SELECT RAISE(ABORT, 'delivered_at is write-once');
        END;
        ",
    )?;

    record_migration(conn, 2, "write_once_delivery")?;
    Ok(())
}
