//! Staging store seam used by the drain cycle.

use crate::DrainResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_database::{queries, AsyncDatabase, NewRelayRecord, PendingRow, RecordId};

/// Durable table of relay records.
///
/// Every failure of the underlying store surfaces as
/// `DrainError::StorageUnavailable`; callers assume nothing was applied.
#[async_trait]
pub trait StagingStore: Send + Sync {
    /// Append a record and return its newly assigned id.
    ///
    /// The store stamps `queued_at`; later appends never sort earlier.
    async fn append(&self, record: NewRelayRecord) -> DrainResult<RecordId>;

    /// Up to `limit` pending rows ordered by `(queued_at, id)`.
    ///
    /// A row that cannot be decoded comes back as `Err(MalformedRow)` in its
    /// slot; only store-level failures fail the call.
    async fn select_pending(&self, limit: usize) -> DrainResult<Vec<PendingRow>>;

    /// Set `delivered_at` on the still-pending subset of `ids`, atomically.
    async fn mark_delivered(
        &self,
        ids: &[RecordId],
        delivered_at: DateTime<Utc>,
    ) -> DrainResult<usize>;

    /// Number of pending records.
    async fn count_pending(&self) -> DrainResult<u64>;
}

#[async_trait]
impl StagingStore for AsyncDatabase {
    async fn append(&self, record: NewRelayRecord) -> DrainResult<RecordId> {
        Ok(self
            .call(move |conn| queries::append_record(conn, &record))
            .await?)
    }

    async fn select_pending(&self, limit: usize) -> DrainResult<Vec<PendingRow>> {
        Ok(self
            .call(move |conn| queries::select_pending(conn, limit))
            .await?)
    }

    async fn mark_delivered(
        &self,
        ids: &[RecordId],
        delivered_at: DateTime<Utc>,
    ) -> DrainResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids = ids.to_vec();
        Ok(self
            .call(move |conn| queries::mark_delivered(conn, &ids, delivered_at))
            .await?)
    }

    async fn count_pending(&self) -> DrainResult<u64> {
        Ok(self.call(queries::count_pending).await?)
    }
}
