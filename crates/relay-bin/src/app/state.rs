//! Shared service state.

use relay_config_and_utils::Config;
use relay_database::AsyncDatabase;
use relay_drain::DrainOrchestrator;
use std::sync::Arc;

/// Shared service state (cheap to clone).
#[derive(Clone)]
pub struct RelayState {
    pub config: Arc<Config>,
    /// Staging database, also used for readiness checks.
    pub db: AsyncDatabase,
    pub drain: Arc<DrainOrchestrator>,
}

impl RelayState {
    pub fn new(config: Config, db: AsyncDatabase, drain: DrainOrchestrator) -> Self {
        Self {
            config: Arc::new(config),
            db,
            drain: Arc::new(drain),
        }
    }
}
