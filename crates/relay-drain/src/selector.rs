//! Batch selection policy.

use crate::{DrainError, DrainResult, StagingStore};
use relay_database::PendingRow;
use std::sync::Arc;

/// Chooses which pending records a drain cycle processes.
///
/// The oldest `batch_size` pending records, re-evaluated every cycle. No
/// lease is taken, so two overlapping cycles would see the same batch.
pub struct BatchSelector {
    store: Arc<dyn StagingStore>,
    batch_size: usize,
}

impl BatchSelector {
    /// Create a selector. A batch size of zero is rejected.
    pub fn new(store: Arc<dyn StagingStore>, batch_size: usize) -> DrainResult<Self> {
        if batch_size == 0 {
            return Err(DrainError::Config(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        Ok(Self { store, batch_size })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Select the next batch, malformed rows included in their slots.
    pub async fn next_batch(&self) -> DrainResult<Vec<PendingRow>> {
        self.store.select_pending(self.batch_size).await
    }
}
