//! Async SQLite executor on a dedicated background thread.
//!
//! All statements go through one connection owned by the `tokio_rusqlite`
//! worker thread, so callers await results without blocking the runtime and
//! queries execute in FIFO order.

use crate::{migrations, DatabaseError, DatabaseResult};
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

const PRAGMAS: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    PRAGMA foreign_keys = ON;
    PRAGMA temp_store = MEMORY;
    PRAGMA busy_timeout = 5000;
";

fn from_tokio_rusqlite(e: tokio_rusqlite::Error) -> DatabaseError {
    match e {
        tokio_rusqlite::Error::Rusqlite(e) => DatabaseError::Sqlite(e),
        tokio_rusqlite::Error::Close(_) => DatabaseError::Connection("Connection closed".to_string()),
        other => DatabaseError::Connection(other.to_string()),
    }
}

/// Async handle to the staging database.
///
/// Cloning is cheap; every clone shares the same executor thread.
#[derive(Clone)]
pub struct AsyncDatabase {
    conn: Connection,
    path: String,
}

impl AsyncDatabase {
    /// Open (or create) the database file, apply pragmas and run migrations.
    pub async fn open(path: &Path) -> DatabaseResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let path_str = path.to_string_lossy().to_string();
        info!(path = %path_str, "Opening staging database");

        let conn = Connection::open(path_str.clone())
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        let db = Self {
            conn,
            path: path_str,
        };
        db.initialize().await?;

        info!(path = %db.path, "Staging database initialized with WAL mode");
        Ok(db)
    }

    /// Open a private in-memory database. Used by tests.
    pub async fn open_in_memory() -> DatabaseResult<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        let db = Self {
            conn,
            path: ":memory:".to_string(),
        };
        db.initialize().await?;
        Ok(db)
    }

    async fn initialize(&self) -> DatabaseResult<()> {
        self.call_sqlite(|conn| conn.execute_batch(PRAGMAS)).await?;
        self.call(|conn| {
            migrations::run_migrations(conn).map_err(|e| DatabaseError::Migration(e.to_string()))
        })
        .await
    }

    /// Execute a closure on the database connection.
    ///
    /// The closure runs on the dedicated SQLite thread. Keep it to SQL and
    /// row mapping; anything slow inside it stalls every other query.
    pub async fn call<F, T>(&self, f: F) -> DatabaseResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> DatabaseResult<T> + Send + 'static,
        T: Send + 'static,
    {
        // Our result rides inside tokio_rusqlite's Ok and is flattened here.
        let outer = self.conn.call(move |conn| Ok(f(conn))).await;

        match outer {
            Ok(inner) => inner,
            Err(e) => Err(from_tokio_rusqlite(e)),
        }
    }

    /// Execute a closure that only produces rusqlite errors.
    pub async fn call_sqlite<F, T>(&self, f: F) -> DatabaseResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.conn
            .call(move |conn| Ok(f(conn)?))
            .await
            .map_err(from_tokio_rusqlite)
    }

    /// Database file path, or `:memory:`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Run a trivial query to confirm the store is reachable.
    pub async fn health_check(&self) -> DatabaseResult<()> {
        self.call_sqlite(|conn| conn.execute_batch("SELECT 1")).await?;
        debug!("Database health check passed");
        Ok(())
    }

    /// Close the connection after pending operations finish.
    ///
    /// Clones that outlive this call get `Connection` errors.
    pub async fn close(self) -> DatabaseResult<()> {
        self.conn
            .close()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to close database: {:?}", e)))?;
        info!(path = %self.path, "Database closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{queries, NewRelayRecord};
    use tempfile::tempdir;

    #[tokio::test]
    async fn open_creates_file_and_parent_dirs() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("staging.sqlite");

        let db = AsyncDatabase::open(&db_path).await.unwrap();
        assert!(db_path.exists());
        assert!(db.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn open_enables_wal() {
        let dir = tempdir().unwrap();
        let db = AsyncDatabase::open(&dir.path().join("wal.sqlite")).await.unwrap();

        let mode: String = db
            .call_sqlite(|conn| conn.query_row("PRAGMA journal_mode", [], |row| row.get(0)))
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("reopen.sqlite");

        let db = AsyncDatabase::open(&db_path).await.unwrap();
        let id = db
            .call(|conn| queries::append_record(conn, &NewRelayRecord::new("room", "alice", "p", 1)))
            .await
            .unwrap();
        db.close().await.unwrap();

        let db = AsyncDatabase::open(&db_path).await.unwrap();
        let record = db
            .call(move |conn| queries::get_record(conn, id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.room_id, "room");
        assert!(record.is_pending());
    }

    #[tokio::test]
    async fn in_memory_database_is_migrated() {
        let db = AsyncDatabase::open_in_memory().await.unwrap();
        assert_eq!(db.path(), ":memory:");

        let pending = db.call(queries::count_pending).await.unwrap();
        assert_eq!(pending, 0);
    }

    #[tokio::test]
    async fn calls_after_close_fail_with_connection_error() {
        let db = AsyncDatabase::open_in_memory().await.unwrap();
        let clone = db.clone();
        db.close().await.unwrap();

        let result = clone.health_check().await;
        assert!(matches!(result, Err(DatabaseError::Connection(_))));
    }
}
