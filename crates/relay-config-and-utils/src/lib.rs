//! Configuration, paths, and logging setup for the relay drain service.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, DrainSettings, PrimarySettings, DEFAULT_BATCH_SIZE, DEFAULT_DELIVERY_TIMEOUT_SECS,
    DEFAULT_INTERVAL_SECS, DEFAULT_LOG_LEVEL, DEFAULT_PRIMARY_URL,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level, SERVICE_NAME};
pub use paths::Paths;
