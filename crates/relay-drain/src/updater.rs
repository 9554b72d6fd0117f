//! Durable bookkeeping of delivered records.

use crate::{DrainResult, StagingStore};
use chrono::Utc;
use relay_database::RecordId;
use std::sync::Arc;
use tracing::debug;

/// Marks a cycle's delivered records in one bulk update.
///
/// Failed records are left alone; they stay pending for the next cycle.
pub struct StateUpdater {
    store: Arc<dyn StagingStore>,
}

impl StateUpdater {
    pub fn new(store: Arc<dyn StagingStore>) -> Self {
        Self { store }
    }

    /// Stamp `delivered_at = now` on `delivered`. Returns the updated count.
    ///
    /// An empty list performs no write.
    pub async fn commit(&self, delivered: &[RecordId]) -> DrainResult<usize> {
        if delivered.is_empty() {
            return Ok(0);
        }
        let updated = self.store.mark_delivered(delivered, Utc::now()).await?;
        debug!(requested = delivered.len(), updated, "Committed delivered records");
        Ok(updated)
    }
}
