//! Drain subsystem for staged relay records.
//!
//! This crate provides:
//! - StagingStore: async seam over the staging table, implemented for `AsyncDatabase`
//! - BatchSelector: picks the oldest pending records for a cycle
//! - PrimaryClient: one HTTP delivery attempt per record against the primary service
//! - StateUpdater: bulk-marks delivered records in one transaction
//! - DrainOrchestrator: runs select, deliver, update cycles one at a time

mod delivery;
mod error;
mod orchestrator;
mod selector;
mod store;
mod updater;

pub use delivery::{
    validate_record, DeliveryConfig, Deliverer, PrimaryClient, MAX_ROOM_ID_LEN,
    MAX_SENDER_HANDLE_LEN,
};
pub use error::{DeliveryError, DrainError, DrainResult};
pub use orchestrator::{CyclePhase, DrainOrchestrator, DrainReport, DrainStatus, OrchestratorConfig};
pub use selector::BatchSelector;
pub use store::StagingStore;
pub use updater::StateUpdater;
