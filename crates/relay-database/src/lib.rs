//! SQLite staging store for relay records.
//!
//! This crate provides:
//! - The `relay_outbox` schema and its migrations
//! - Model types for staged records
//! - Query helpers operating on a plain `rusqlite::Connection`
//! - An async executor that runs every query on one dedicated thread
//!
//! ```ignore
//! let db = AsyncDatabase::open(path).await?;
//! let pending = db.call(|conn| queries::count_pending(conn)).await?;
//! ```
//!
//! Only SQL should run inside `db.call()`. Network calls and other slow
//! work belong outside, otherwise they stall every other query.

mod error;
mod executor;
mod migrations;
mod models;
pub mod queries;

pub use error::{DatabaseError, DatabaseResult};
pub use executor::AsyncDatabase;
pub use migrations::{run_migrations, CURRENT_VERSION};
pub use models::{
    format_timestamp, parse_timestamp, MalformedRow, NewRelayRecord, PendingRow, RecordId,
    RelayRecord,
};
