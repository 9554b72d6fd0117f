//! Drain cycle orchestration.
//!
//! One cycle is `Selecting -> Delivering -> Updating -> Idle`. A cycle guard
//! keeps cycles from overlapping, since the selector takes no lease and two
//! concurrent cycles would deliver the same batch twice.

use crate::{
    validate_record, BatchSelector, Deliverer, DrainError, DrainResult, StagingStore,
    StateUpdater,
};
use futures_util::{stream, StreamExt};
use parking_lot::Mutex;
use relay_database::{PendingRow, RecordId, RelayRecord};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Where the current cycle is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Idle,
    Selecting,
    Delivering,
    Updating,
}

/// Outcome counts of one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Rows selected, undecodable ones included.
    pub processed: usize,
    /// Records marked delivered.
    pub delivered: usize,
    /// `processed - delivered`.
    pub failed: usize,
}

/// Read-only snapshot of the drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DrainStatus {
    pub pending_messages: u64,
    pub batch_size: usize,
    pub interval_seconds: u64,
}

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub batch_size: usize,
    /// Reported in status; scheduling is owned by the caller.
    pub interval_seconds: u64,
    /// Delivery calls in flight per cycle. 1 means sequential.
    pub delivery_concurrency: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            interval_seconds: 5,
            delivery_concurrency: 1,
        }
    }
}

/// Resets the phase to `Idle` however the cycle ends, including when the
/// cycle future is dropped mid-flight.
struct PhaseReset<'a>(&'a Mutex<CyclePhase>);

impl Drop for PhaseReset<'_> {
    fn drop(&mut self) {
        *self.0.lock() = CyclePhase::Idle;
    }
}

/// Drives select, deliver, update cycles against an injected store and
/// delivery client.
pub struct DrainOrchestrator {
    store: Arc<dyn StagingStore>,
    deliverer: Arc<dyn Deliverer>,
    selector: BatchSelector,
    updater: StateUpdater,
    interval_seconds: u64,
    delivery_concurrency: usize,
    cycle_guard: tokio::sync::Mutex<()>,
    phase: Mutex<CyclePhase>,
}

impl DrainOrchestrator {
    pub fn new(
        store: Arc<dyn StagingStore>,
        deliverer: Arc<dyn Deliverer>,
        config: OrchestratorConfig,
    ) -> DrainResult<Self> {
        if config.delivery_concurrency == 0 {
            return Err(DrainError::Config(
                "delivery_concurrency must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            selector: BatchSelector::new(store.clone(), config.batch_size)?,
            updater: StateUpdater::new(store.clone()),
            store,
            deliverer,
            interval_seconds: config.interval_seconds,
            delivery_concurrency: config.delivery_concurrency,
            cycle_guard: tokio::sync::Mutex::new(()),
            phase: Mutex::new(CyclePhase::Idle),
        })
    }

    /// Run exactly one cycle, waiting for any cycle already in progress.
    pub async fn run_once(&self) -> DrainResult<DrainReport> {
        let _guard = self.cycle_guard.lock().await;
        self.run_cycle().await
    }

    /// Run one cycle, or fail with `CycleInProgress` if one is running.
    pub async fn try_run_once(&self) -> DrainResult<DrainReport> {
        let _guard = self
            .cycle_guard
            .try_lock()
            .map_err(|_| DrainError::CycleInProgress)?;
        self.run_cycle().await
    }

    /// Pending count plus the configured batch size and interval.
    pub async fn status(&self) -> DrainResult<DrainStatus> {
        let pending_messages = self.store.count_pending().await?;
        Ok(DrainStatus {
            pending_messages,
            batch_size: self.selector.batch_size(),
            interval_seconds: self.interval_seconds,
        })
    }

    pub fn phase(&self) -> CyclePhase {
        *self.phase.lock()
    }

    fn set_phase(&self, phase: CyclePhase) {
        *self.phase.lock() = phase;
    }

    async fn run_cycle(&self) -> DrainResult<DrainReport> {
        let started = Instant::now();
        let _reset = PhaseReset(&self.phase);

        let result = self.drive_cycle().await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(report) if report.processed == 0 => {}
            Ok(report) => info!(
                processed = report.processed,
                delivered = report.delivered,
                failed = report.failed,
                elapsed_ms,
                "Drain cycle complete"
            ),
            Err(e) => error!(
                error = %e,
                phase = ?self.phase(),
                elapsed_ms,
                "Drain cycle aborted"
            ),
        }
        result
    }

    async fn drive_cycle(&self) -> DrainResult<DrainReport> {
        self.set_phase(CyclePhase::Selecting);
        let batch = self.selector.next_batch().await?;
        if batch.is_empty() {
            return Ok(DrainReport::default());
        }
        let processed = batch.len();
        let records = decoded_records(batch);

        self.set_phase(CyclePhase::Delivering);
        let delivered_ids = self.deliver_batch(records).await;

        self.set_phase(CyclePhase::Updating);
        let delivered = self.updater.commit(&delivered_ids).await?;
        if delivered < delivered_ids.len() {
            warn!(
                accepted = delivered_ids.len(),
                marked = delivered,
                "Some delivered records were no longer pending when marked"
            );
        }

        Ok(DrainReport {
            processed,
            delivered,
            failed: processed.saturating_sub(delivered),
        })
    }

    /// Attempt every record; return the ids the primary service accepted.
    async fn deliver_batch(&self, batch: Vec<RelayRecord>) -> Vec<RecordId> {
        let outcomes: Vec<(RecordId, DrainResult<()>)> = stream::iter(batch)
            .map(|record| async move { (record.id, self.attempt(&record).await) })
            .buffer_unordered(self.delivery_concurrency)
            .collect()
            .await;

        let mut delivered = Vec::with_capacity(outcomes.len());
        for (id, outcome) in outcomes {
            match outcome {
                Ok(()) => delivered.push(id),
                Err(e) => warn!(record_id = id, error = %e, "Record not delivered"),
            }
        }
        delivered
    }

    async fn attempt(&self, record: &RelayRecord) -> DrainResult<()> {
        validate_record(record)?;
        self.deliverer
            .deliver(record)
            .await
            .map_err(|source| DrainError::DeliveryFailed {
                id: record.id,
                source,
            })
    }
}

/// Keep the decodable records; undecodable rows count as failed and stay
/// pending without a delivery attempt.
fn decoded_records(batch: Vec<PendingRow>) -> Vec<RelayRecord> {
    let mut records = Vec::with_capacity(batch.len());
    for row in batch {
        match row {
            Ok(record) => records.push(record),
            Err(malformed) => {
                let id = malformed.id;
                warn!(record_id = id, error = %DrainError::from(malformed), "Record not delivered");
            }
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DeliveryError;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use relay_database::{AsyncDatabase, DatabaseError, NewRelayRecord};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Fails the ids in `fail`, accepts everything else.
    #[derive(Default)]
    struct ScriptedDeliverer {
        fail: Mutex<HashSet<RecordId>>,
        calls: Mutex<Vec<RecordId>>,
    }

    impl ScriptedDeliverer {
        fn failing(ids: &[RecordId]) -> Self {
            let deliverer = Self::default();
            deliverer.fail.lock().extend(ids.iter().copied());
            deliverer
        }

        fn calls(&self) -> Vec<RecordId> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl Deliverer for ScriptedDeliverer {
        async fn deliver(&self, record: &RelayRecord) -> Result<(), DeliveryError> {
            self.calls.lock().push(record.id);
            if self.fail.lock().contains(&record.id) {
                Err(DeliveryError::Status {
                    status: 500,
                    body: "boom".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    /// Blocks every delivery until released.
    struct GatedDeliverer {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl Deliverer for GatedDeliverer {
        async fn deliver(&self, _record: &RelayRecord) -> Result<(), DeliveryError> {
            self.gate.notified().await;
            Ok(())
        }
    }

    /// Counts peak concurrent deliveries.
    #[derive(Default)]
    struct ConcurrencyGauge {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Deliverer for ConcurrencyGauge {
        async fn deliver(&self, _record: &RelayRecord) -> Result<(), DeliveryError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Wraps a real store and fails selected operations on demand.
    struct FlakyStore {
        inner: AsyncDatabase,
        fail_select: AtomicBool,
        fail_mark: AtomicBool,
    }

    impl FlakyStore {
        fn new(inner: AsyncDatabase) -> Self {
            Self {
                inner,
                fail_select: AtomicBool::new(false),
                fail_mark: AtomicBool::new(false),
            }
        }

        fn outage() -> DrainError {
            DrainError::StorageUnavailable(DatabaseError::Connection("disk offline".to_string()))
        }
    }

    #[async_trait]
    impl StagingStore for FlakyStore {
        async fn append(&self, record: NewRelayRecord) -> DrainResult<RecordId> {
            self.inner.append(record).await
        }

        async fn select_pending(&self, limit: usize) -> DrainResult<Vec<PendingRow>> {
            if self.fail_select.load(Ordering::SeqCst) {
                return Err(Self::outage());
            }
            self.inner.select_pending(limit).await
        }

        async fn mark_delivered(
            &self,
            ids: &[RecordId],
            delivered_at: DateTime<Utc>,
        ) -> DrainResult<usize> {
            if self.fail_mark.load(Ordering::SeqCst) {
                return Err(Self::outage());
            }
            self.inner.mark_delivered(ids, delivered_at).await
        }

        async fn count_pending(&self) -> DrainResult<u64> {
            self.inner.count_pending().await
        }
    }

    async fn seeded_store(count: usize) -> (Arc<AsyncDatabase>, Vec<RecordId>) {
        let db = Arc::new(AsyncDatabase::open_in_memory().await.unwrap());
        let mut ids = Vec::with_capacity(count);
        for i in 0..count {
            let record = NewRelayRecord::new(format!("room-{}", i % 3), "alice", "blob", 1);
            ids.push(db.append(record).await.unwrap());
        }
        (db, ids)
    }

    /// Write a row the table's CHECK constraints would otherwise reject.
    async fn insert_unchecked(
        db: &AsyncDatabase,
        payload_sql: &'static str,
        queued_at: &'static str,
    ) -> RecordId {
        let sql = format!(
            "INSERT INTO relay_outbox (room_id, sender_handle, payload, queued_at)
             VALUES ('room-9', 'alice', {}, ?1)",
            payload_sql
        );
        db.call_sqlite(move |conn| {
            conn.execute_batch("PRAGMA ignore_check_constraints = ON")?;
            conn.execute(&sql, [queued_at])?;
            conn.execute_batch("PRAGMA ignore_check_constraints = OFF")?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .unwrap()
    }

    fn orchestrator(
        store: Arc<dyn StagingStore>,
        deliverer: Arc<dyn Deliverer>,
        batch_size: usize,
    ) -> DrainOrchestrator {
        DrainOrchestrator::new(
            store,
            deliverer,
            OrchestratorConfig {
                batch_size,
                ..OrchestratorConfig::default()
            },
        )
        .unwrap()
    }

    fn report(processed: usize, delivered: usize, failed: usize) -> DrainReport {
        DrainReport {
            processed,
            delivered,
            failed,
        }
    }

    #[tokio::test]
    async fn drains_150_records_in_batches_of_100() {
        let (db, _) = seeded_store(150).await;
        let deliverer = Arc::new(ScriptedDeliverer::default());
        let drain = orchestrator(db.clone(), deliverer.clone(), 100);

        assert_eq!(drain.run_once().await.unwrap(), report(100, 100, 0));
        assert_eq!(drain.status().await.unwrap().pending_messages, 50);

        assert_eq!(drain.run_once().await.unwrap(), report(50, 50, 0));
        assert_eq!(drain.status().await.unwrap().pending_messages, 0);

        assert_eq!(drain.run_once().await.unwrap(), report(0, 0, 0));
        assert_eq!(deliverer.calls().len(), 150);
        assert_eq!(drain.phase(), CyclePhase::Idle);
    }

    #[tokio::test]
    async fn full_batch_marks_exactly_the_selected_ids() {
        let (db, ids) = seeded_store(5).await;
        let drain = orchestrator(db.clone(), Arc::new(ScriptedDeliverer::default()), 3);

        drain.run_once().await.unwrap();

        for (i, id) in ids.iter().enumerate() {
            let id = *id;
            let record = db
                .call(move |conn| relay_database::queries::get_record(conn, id))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(record.delivered_at.is_some(), i < 3, "record {}", id);
        }
    }

    #[tokio::test]
    async fn empty_store_reports_zeros() {
        let (db, _) = seeded_store(0).await;
        let deliverer = Arc::new(ScriptedDeliverer::default());
        let drain = orchestrator(db, deliverer.clone(), 10);

        assert_eq!(drain.run_once().await.unwrap(), DrainReport::default());
        assert!(deliverer.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_record_stays_pending_and_is_retried() {
        let (db, ids) = seeded_store(2).await;
        let deliverer = Arc::new(ScriptedDeliverer::failing(&[ids[1]]));
        let drain = orchestrator(db.clone(), deliverer.clone(), 10);

        assert_eq!(drain.run_once().await.unwrap(), report(2, 1, 1));

        let pending = db.select_pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].as_ref().unwrap().id, ids[1]);

        // Only the failed record is attempted again.
        assert_eq!(drain.run_once().await.unwrap(), report(1, 0, 1));
        assert_eq!(deliverer.calls(), vec![ids[0], ids[1], ids[1]]);

        deliverer.fail.lock().clear();
        assert_eq!(drain.run_once().await.unwrap(), report(1, 1, 0));
        assert_eq!(drain.status().await.unwrap().pending_messages, 0);
    }

    #[tokio::test]
    async fn record_failing_shape_checks_is_not_sent() {
        let db = Arc::new(AsyncDatabase::open_in_memory().await.unwrap());
        let good = db
            .append(NewRelayRecord::new("room-1", "alice", "blob", 1))
            .await
            .unwrap();
        let bad = db
            .append(NewRelayRecord::new("", "alice", "blob", 1))
            .await
            .unwrap();

        let deliverer = Arc::new(ScriptedDeliverer::default());
        let drain = orchestrator(db.clone(), deliverer.clone(), 10);

        assert_eq!(drain.run_once().await.unwrap(), report(2, 1, 1));
        assert_eq!(deliverer.calls(), vec![good]);

        let pending = db.select_pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].as_ref().unwrap().id, bad);
    }

    #[tokio::test]
    async fn undecodable_rows_fail_without_aborting_the_cycle() {
        let cases = [
            ("'blob'", "2024-01-01 00:00:00"),
            ("x'00ff'", "2024-01-01T00:00:00.000000Z"),
        ];
        for (payload_sql, queued_at) in cases {
            let db = Arc::new(AsyncDatabase::open_in_memory().await.unwrap());
            let bad = insert_unchecked(&db, payload_sql, queued_at).await;
            let good = db
                .append(NewRelayRecord::new("room-1", "alice", "blob", 1))
                .await
                .unwrap();

            let deliverer = Arc::new(ScriptedDeliverer::default());
            let drain = orchestrator(db.clone(), deliverer.clone(), 10);

            assert_eq!(drain.run_once().await.unwrap(), report(2, 1, 1), "{}", payload_sql);
            assert_eq!(deliverer.calls(), vec![good]);

            let pending = db.select_pending(10).await.unwrap();
            assert_eq!(pending.len(), 1);
            assert_eq!(pending[0].as_ref().unwrap_err().id, bad);

            // The bad row keeps failing on its own; later cycles still run.
            assert_eq!(drain.run_once().await.unwrap(), report(1, 0, 1));
            assert_eq!(deliverer.calls(), vec![good]);
            assert_eq!(drain.phase(), CyclePhase::Idle);
        }
    }

    #[tokio::test]
    async fn select_outage_aborts_cycle_without_delivery() {
        let (db, _) = seeded_store(3).await;
        let store = Arc::new(FlakyStore::new((*db).clone()));
        store.fail_select.store(true, Ordering::SeqCst);
        let deliverer = Arc::new(ScriptedDeliverer::default());
        let drain = orchestrator(store.clone(), deliverer.clone(), 10);

        let err = drain.run_once().await.unwrap_err();
        assert!(matches!(err, DrainError::StorageUnavailable(_)));
        assert!(deliverer.calls().is_empty());
        assert_eq!(drain.phase(), CyclePhase::Idle);

        store.fail_select.store(false, Ordering::SeqCst);
        assert_eq!(drain.run_once().await.unwrap(), report(3, 3, 0));
    }

    #[tokio::test]
    async fn mark_outage_leaves_delivered_records_pending() {
        let (db, ids) = seeded_store(2).await;
        let store = Arc::new(FlakyStore::new((*db).clone()));
        store.fail_mark.store(true, Ordering::SeqCst);
        let deliverer = Arc::new(ScriptedDeliverer::default());
        let drain = orchestrator(store.clone(), deliverer.clone(), 10);

        let err = drain.run_once().await.unwrap_err();
        assert!(matches!(err, DrainError::StorageUnavailable(_)));
        assert_eq!(deliverer.calls(), ids);
        assert_eq!(db.count_pending().await.unwrap(), 2);

        // At-least-once: the next cycle delivers them again.
        store.fail_mark.store(false, Ordering::SeqCst);
        assert_eq!(drain.run_once().await.unwrap(), report(2, 2, 0));
        assert_eq!(deliverer.calls().len(), 4);
        assert_eq!(db.count_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn overlapping_trigger_is_rejected_while_cycle_runs() {
        let (db, _) = seeded_store(1).await;
        let gate = Arc::new(Notify::new());
        let drain = Arc::new(orchestrator(
            db.clone(),
            Arc::new(GatedDeliverer { gate: gate.clone() }),
            10,
        ));

        let running = drain.clone();
        let handle = tokio::spawn(async move { running.run_once().await });

        while drain.phase() != CyclePhase::Delivering {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        assert!(matches!(
            drain.try_run_once().await,
            Err(DrainError::CycleInProgress)
        ));

        gate.notify_one();
        assert_eq!(handle.await.unwrap().unwrap(), report(1, 1, 0));
        assert_eq!(drain.try_run_once().await.unwrap(), report(0, 0, 0));
    }

    #[tokio::test]
    async fn delivery_concurrency_is_bounded() {
        let (db, _) = seeded_store(8).await;
        let gauge = Arc::new(ConcurrencyGauge::default());
        let drain = DrainOrchestrator::new(
            db,
            gauge.clone(),
            OrchestratorConfig {
                batch_size: 8,
                interval_seconds: 5,
                delivery_concurrency: 3,
            },
        )
        .unwrap();

        assert_eq!(drain.run_once().await.unwrap(), report(8, 8, 0));
        let peak = gauge.peak.load(Ordering::SeqCst);
        assert!(peak >= 2 && peak <= 3, "peak {}", peak);
    }

    #[tokio::test]
    async fn status_reports_configuration() {
        let (db, _) = seeded_store(4).await;
        let drain = DrainOrchestrator::new(
            db,
            Arc::new(ScriptedDeliverer::default()),
            OrchestratorConfig {
                batch_size: 25,
                interval_seconds: 9,
                delivery_concurrency: 1,
            },
        )
        .unwrap();

        assert_eq!(
            drain.status().await.unwrap(),
            DrainStatus {
                pending_messages: 4,
                batch_size: 25,
                interval_seconds: 9,
            }
        );
    }

    #[tokio::test]
    async fn invalid_settings_are_rejected() {
        let (db, _) = seeded_store(0).await;
        let deliverer: Arc<dyn Deliverer> = Arc::new(ScriptedDeliverer::default());

        let zero_batch = DrainOrchestrator::new(
            db.clone(),
            deliverer.clone(),
            OrchestratorConfig {
                batch_size: 0,
                ..OrchestratorConfig::default()
            },
        );
        assert!(matches!(zero_batch, Err(DrainError::Config(_))));

        let zero_concurrency = DrainOrchestrator::new(
            db,
            deliverer,
            OrchestratorConfig {
                delivery_concurrency: 0,
                ..OrchestratorConfig::default()
            },
        );
        assert!(matches!(zero_concurrency, Err(DrainError::Config(_))));
    }
}
