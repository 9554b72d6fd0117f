//! Configuration management for the relay drain service.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use url::Url;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";
/// Default maximum records per drain cycle.
pub const DEFAULT_BATCH_SIZE: usize = 100;
/// Default scheduling period between drain cycles.
pub const DEFAULT_INTERVAL_SECS: u64 = 5;
/// Default per-record delivery timeout.
pub const DEFAULT_DELIVERY_TIMEOUT_SECS: u64 = 10;
/// Default primary message service URL.
pub const DEFAULT_PRIMARY_URL: &str = "http://localhost:3000";

const DEFAULT_SHARED_SECRET: &str = "change-me-now";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8000;

/// Drain cycle settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrainSettings {
    /// Maximum records selected per cycle.
    pub batch_size: usize,
    /// Suggested period for the external scheduler, in seconds.
    pub interval_seconds: u64,
    /// Timeout for a single delivery call, in seconds.
    pub delivery_timeout_seconds: u64,
    /// Maximum delivery calls in flight within one cycle.
    pub delivery_concurrency: usize,
}

impl Default for DrainSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            interval_seconds: DEFAULT_INTERVAL_SECS,
            delivery_timeout_seconds: DEFAULT_DELIVERY_TIMEOUT_SECS,
            delivery_concurrency: 1,
        }
    }
}

/// Primary message service connection settings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrimarySettings {
    /// Base URL of the primary message service.
    pub endpoint_url: String,
    /// Shared secret sent with every delivery call.
    pub shared_secret: String,
}

impl Default for PrimarySettings {
    fn default() -> Self {
        Self {
            endpoint_url: DEFAULT_PRIMARY_URL.to_string(),
            shared_secret: DEFAULT_SHARED_SECRET.to_string(),
        }
    }
}

impl std::fmt::Debug for PrimarySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrimarySettings")
            .field("endpoint_url", &self.endpoint_url)
            .field("shared_secret", &"<redacted>")
            .finish()
    }
}

/// Main service configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// HTTP listen host.
    pub host: String,
    /// HTTP listen port.
    pub port: u16,
    /// Staging database path. Defaults to `<base_dir>/staging.sqlite`.
    pub database_path: Option<PathBuf>,
    /// Drain cycle settings.
    pub drain: DrainSettings,
    /// Primary message service settings.
    pub primary: PrimarySettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            database_path: None,
            drain: DrainSettings::default(),
            primary: PrimarySettings::default(),
        }
    }
}

impl Config {
    /// Load configuration: defaults, then the config file (if present),
    /// then environment overrides, then validation.
    ///
    /// `config_file` overrides the default `<base_dir>/config.json`; an
    /// explicitly named file that does not exist is an error.
    pub fn load(paths: &Paths, config_file: Option<&Path>) -> CoreResult<Self> {
        let mut config = match config_file {
            Some(path) => Self::load_from_file(path)?,
            None => {
                let default_path = paths.config_file();
                if default_path.exists() {
                    Self::load_from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Override fields from environment-style key lookups.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> CoreResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(level) = get("RELAY_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(host) = get("RELAY_HOST") {
            self.host = host;
        }
        if let Some(port) = get("RELAY_PORT") {
            self.port = parse_env("RELAY_PORT", &port)?;
        }
        if let Some(path) = get("RELAY_DATABASE_PATH") {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Some(size) = get("DRAIN_BATCH_SIZE") {
            self.drain.batch_size = parse_env("DRAIN_BATCH_SIZE", &size)?;
        }
        if let Some(secs) = get("DRAIN_INTERVAL_SECONDS") {
            self.drain.interval_seconds = parse_env("DRAIN_INTERVAL_SECONDS", &secs)?;
        }
        if let Some(secs) = get("DRAIN_DELIVERY_TIMEOUT_SECONDS") {
            self.drain.delivery_timeout_seconds =
                parse_env("DRAIN_DELIVERY_TIMEOUT_SECONDS", &secs)?;
        }
        if let Some(n) = get("DRAIN_DELIVERY_CONCURRENCY") {
            self.drain.delivery_concurrency = parse_env("DRAIN_DELIVERY_CONCURRENCY", &n)?;
        }
        if let Some(url) = get("PRIMARY_SERVER_URL") {
            self.primary.endpoint_url = url;
        }
        if let Some(secret) = get("API_SECRET") {
            self.primary.shared_secret = secret;
        }
        Ok(())
    }

    /// Check that every setting is usable.
    pub fn validate(&self) -> CoreResult<()> {
        if self.drain.batch_size == 0 {
            return Err(CoreError::Config("batch_size must be positive".to_string()));
        }
        if self.drain.interval_seconds == 0 {
            return Err(CoreError::Config(
                "interval_seconds must be positive".to_string(),
            ));
        }
        if self.drain.delivery_timeout_seconds == 0 {
            return Err(CoreError::Config(
                "delivery_timeout_seconds must be positive".to_string(),
            ));
        }
        if self.drain.delivery_concurrency == 0 {
            return Err(CoreError::Config(
                "delivery_concurrency must be positive".to_string(),
            ));
        }
        if self.primary.shared_secret.is_empty() {
            return Err(CoreError::Config("shared_secret must be set".to_string()));
        }
        let url = self.primary_url()?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(CoreError::Config(format!(
                "primary endpoint must be http or https, got {}",
                url.scheme()
            )));
        }
        Ok(())
    }

    /// Get the primary endpoint as a parsed URL.
    pub fn primary_url(&self) -> CoreResult<Url> {
        Url::parse(&self.primary.endpoint_url).map_err(CoreError::from)
    }

    /// Resolve the staging database path.
    pub fn database_path(&self, paths: &Paths) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| paths.database_file())
    }

    /// HTTP listen address as `host:port`.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env<T: FromStr>(key: &str, raw: &str) -> CoreResult<T> {
    raw.parse()
        .map_err(|_| CoreError::Config(format!("invalid value for {}: {:?}", key, raw)))
}
