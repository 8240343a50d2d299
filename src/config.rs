//! Configuration loader and validator for the queue server.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub dispatch: Dispatch,
    pub reaper: Reaper,
    pub analytics: Analytics,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

/// Dispatcher heartbeat and worker invocation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dispatch {
    pub interval_seconds: u64,
    /// Items a worker may hold locked at once before it stops being
    /// eligible for new work.
    pub worker_concurrency: i64,
    /// Externally-reachable base URL workers call back to report completion.
    pub queue_url: String,
    pub invoke_timeout_seconds: u64,
    /// An idle tick with every worker busy is a normal steady state; this
    /// controls whether it is still reported as an event.
    #[serde(default = "default_true")]
    pub report_no_free_workers: bool,
}

/// Stale-lock recovery settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reaper {
    pub interval_seconds: u64,
    pub lock_timeout_minutes: i64,
}

/// Analytics warehouse connection and source tables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Analytics {
    pub endpoint_url: String,
    pub token: String,
    pub tables: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }

    if cfg.dispatch.interval_seconds == 0 {
        return Err(ConfigError::Invalid("dispatch.interval_seconds must be > 0"));
    }
    if cfg.dispatch.worker_concurrency < 1 {
        return Err(ConfigError::Invalid("dispatch.worker_concurrency must be >= 1"));
    }
    if cfg.dispatch.queue_url.trim().is_empty() {
        return Err(ConfigError::Invalid("dispatch.queue_url must be non-empty"));
    }
    if cfg.dispatch.invoke_timeout_seconds == 0 {
        return Err(ConfigError::Invalid("dispatch.invoke_timeout_seconds must be > 0"));
    }

    if cfg.reaper.interval_seconds == 0 {
        return Err(ConfigError::Invalid("reaper.interval_seconds must be > 0"));
    }
    if cfg.reaper.lock_timeout_minutes < 1 {
        return Err(ConfigError::Invalid("reaper.lock_timeout_minutes must be >= 1"));
    }

    if cfg.analytics.endpoint_url.trim().is_empty() {
        return Err(ConfigError::Invalid("analytics.endpoint_url must be non-empty"));
    }
    if cfg.analytics.token.trim().is_empty() {
        return Err(ConfigError::Invalid("analytics.token must be non-empty"));
    }
    if cfg.analytics.tables.is_empty() {
        return Err(ConfigError::Invalid("analytics.tables must be non-empty"));
    }
    if cfg.analytics.tables.iter().any(|t| t.trim().is_empty()) {
        return Err(ConfigError::Invalid("analytics.tables entries must be non-empty"));
    }

    Ok(())
}

/// Example YAML configuration with default intervals.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

dispatch:
  interval_seconds: 20
  worker_concurrency: 1
  queue_url: "http://localhost:4000/api/queue"
  invoke_timeout_seconds: 10
  report_no_free_workers: true

reaper:
  interval_seconds: 60
  lock_timeout_minutes: 15

analytics:
  endpoint_url: "https://adb-0000000000000000.0.azuredatabricks.net/api/2.0/sql/statements"
  token: "YOUR_WAREHOUSE_TOKEN"
  tables:
    - "exports.partition_a"
    - "exports.partition_b"
"#
}
