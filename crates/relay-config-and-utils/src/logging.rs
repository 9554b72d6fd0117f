//! Logging initialization for the relay drain service.
//!
//! Wraps the observability crate: structured JSONL goes to
//! `<base_dir>/logs/relay-drain.jsonl`, a compact copy goes to stderr.

use crate::Paths;

/// Service name written into every log line.
pub const SERVICE_NAME: &str = "relay-drain";

/// Initialize the logging system.
///
/// The level comes from `RUST_LOG` when set, otherwise from `level`.
///
/// ```ignore
/// init_logging("info", &paths);
/// tracing::info!("relay drain started");
/// ```
pub fn init_logging(level: &str, paths: &Paths) {
    observability::init_with_config(observability::LogConfig {
        service_name: SERVICE_NAME.into(),
        default_level: level.into(),
        log_path: Some(paths.log_file(SERVICE_NAME)),
        also_stderr: true,
    });
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
