//! Daemon settings
//!
//! Layered with the `config` crate: built-in defaults, then an optional TOML
//! file (`JOBQ_CONFIG`, default `~/.jobq/jobq.toml`), then `JOBQ_*`
//! environment variables where `__` separates sections
//! (`JOBQ_WORKER__CONCURRENCY=8`).

use jobq_api_rpc::RpcServerConfig;
use jobq_core::application::{BackoffPolicy, StallConfig, WorkerConfig};
use jobq_core::error::{AppError, Result};
use jobq_core::port::RetentionPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "~/.jobq/jobq.toml";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://~/.jobq/jobq.db";

/// Database URL selecting the in-process store
pub const MEMORY_STORE_URL: &str = "memory";

const ENV_PREFIX: &str = "JOBQ";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: 8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RpcSettings {
    pub host: String,
    pub port: u16,
    pub rate_limit_burst: u32,
    pub rate_limit_per_sec: u32,
}

impl Default for RpcSettings {
    fn default() -> Self {
        let rpc = RpcServerConfig::default();
        Self {
            host: rpc.host,
            port: rpc.port,
            rate_limit_burst: rpc.rate_limit_burst,
            rate_limit_per_sec: rpc.rate_limit_per_sec,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub concurrency: usize,
    pub poll_interval_ms: u64,
    pub job_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub drain_timeout_ms: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        let worker = WorkerConfig::default();
        Self {
            concurrency: worker.concurrency,
            poll_interval_ms: worker.poll_interval.as_millis() as u64,
            job_timeout_ms: worker.job_timeout.as_millis() as u64,
            heartbeat_interval_ms: worker.heartbeat_interval.as_millis() as u64,
            drain_timeout_ms: worker.drain_timeout.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub base_delay_ms: i64,
    pub max_delay_ms: i64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let backoff = BackoffPolicy::default();
        Self {
            base_delay_ms: backoff.base_delay_ms,
            max_delay_ms: backoff.max_delay_ms,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StallSettings {
    pub threshold_ms: i64,
    pub max_stalled_count: i32,
    pub interval_ms: u64,
}

impl Default for StallSettings {
    fn default() -> Self {
        let stall = StallConfig::default();
        Self {
            threshold_ms: stall.threshold_ms,
            max_stalled_count: stall.max_stalled_count,
            interval_ms: stall.interval.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetentionSettings {
    pub enabled: bool,
    pub interval_ms: u64,
    pub completed_max_count: Option<i64>,
    pub completed_max_age_ms: Option<i64>,
    pub failed_max_count: Option<i64>,
    pub failed_max_age_ms: Option<i64>,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        let policy = RetentionPolicy::default();
        Self {
            enabled: true,
            interval_ms: jobq_core::application::maintenance::DEFAULT_RETENTION_INTERVAL.as_millis()
                as u64,
            completed_max_count: policy.completed_max_count,
            completed_max_age_ms: policy.completed_max_age_ms,
            failed_max_count: policy.failed_max_count,
            failed_max_age_ms: policy.failed_max_age_ms,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// `JOBQ_LOG_FORMAT`
    pub log_format: LogFormat,
    /// Write logs to daily files here instead of stdout
    pub log_dir: Option<String>,
    pub database: DatabaseSettings,
    pub rpc: RpcSettings,
    pub worker: WorkerSettings,
    pub retry: RetrySettings,
    pub stall: StallSettings,
    pub retention: RetentionSettings,
}

/// Where jobs live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    Memory,
    Sqlite(String),
}

fn config_error(err: config::ConfigError) -> AppError {
    AppError::Config(err.to_string())
}

impl Settings {
    /// Load from `JOBQ_CONFIG` (or the default path) and the process environment
    pub fn load() -> Result<Self> {
        let path = std::env::var("JOBQ_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let path = PathBuf::from(shellexpand::tilde(&path).into_owned());
        Self::build(Some(&path), None)
    }

    /// `env` replaces the process environment when given
    pub fn build(file: Option<&Path>, env: Option<config::Map<String, String>>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let settings: Settings = builder
            .build()
            .map_err(config_error)?
            .try_deserialize()
            .map_err(config_error)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(AppError::Config(msg.to_string()));

        if self.database.url.trim().is_empty() {
            return invalid("database.url must not be empty");
        }
        if self.database.max_connections == 0 {
            return invalid("database.max_connections must be >= 1");
        }
        if self.worker.concurrency == 0 {
            return invalid("worker.concurrency must be >= 1");
        }
        if self.worker.poll_interval_ms == 0 || self.worker.heartbeat_interval_ms == 0 {
            return invalid("worker intervals must be > 0");
        }
        if self.worker.job_timeout_ms == 0 {
            return invalid("worker.job_timeout_ms must be > 0");
        }
        if self.retry.base_delay_ms <= 0 || self.retry.max_delay_ms < self.retry.base_delay_ms {
            return invalid("retry delays must satisfy 0 < base_delay_ms <= max_delay_ms");
        }
        if self.stall.threshold_ms <= 0 || self.stall.interval_ms == 0 {
            return invalid("stall.threshold_ms and stall.interval_ms must be > 0");
        }
        if self.stall.max_stalled_count < 0 {
            return invalid("stall.max_stalled_count must be >= 0");
        }
        // Heartbeats must land well inside the stall window
        if self.worker.heartbeat_interval_ms as i64 >= self.stall.threshold_ms {
            return invalid("worker.heartbeat_interval_ms must be below stall.threshold_ms");
        }
        if self.retention.enabled && self.retention.interval_ms == 0 {
            return invalid("retention.interval_ms must be > 0");
        }
        Ok(())
    }

    pub fn store_location(&self) -> StoreLocation {
        let url = self.database.url.trim();
        if url == MEMORY_STORE_URL {
            return StoreLocation::Memory;
        }
        match url.strip_prefix("sqlite://") {
            Some(path) => StoreLocation::Sqlite(format!("sqlite://{}", shellexpand::tilde(path))),
            // `sqlite::memory:` and friends pass through untouched
            None if url.starts_with("sqlite:") => StoreLocation::Sqlite(url.to_string()),
            None => StoreLocation::Sqlite(format!("sqlite://{}", shellexpand::tilde(url))),
        }
    }

    /// Directory the SQLite file lives in, if any
    pub fn database_dir(&self) -> Option<PathBuf> {
        match self.store_location() {
            StoreLocation::Sqlite(url) => url
                .strip_prefix("sqlite://")
                .map(|path| path.split('?').next().unwrap_or(path))
                .and_then(|path| Path::new(path).parent().map(Path::to_path_buf))
                .filter(|dir| !dir.as_os_str().is_empty()),
            StoreLocation::Memory => None,
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            concurrency: self.worker.concurrency,
            poll_interval: Duration::from_millis(self.worker.poll_interval_ms),
            job_timeout: Duration::from_millis(self.worker.job_timeout_ms),
            heartbeat_interval: Duration::from_millis(self.worker.heartbeat_interval_ms),
            drain_timeout: Duration::from_millis(self.worker.drain_timeout_ms),
        }
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.retry.base_delay_ms, self.retry.max_delay_ms)
    }

    pub fn stall_config(&self) -> StallConfig {
        StallConfig {
            threshold_ms: self.stall.threshold_ms,
            max_stalled_count: self.stall.max_stalled_count,
            interval: Duration::from_millis(self.stall.interval_ms),
        }
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            completed_max_count: self.retention.completed_max_count,
            completed_max_age_ms: self.retention.completed_max_age_ms,
            failed_max_count: self.retention.failed_max_count,
            failed_max_age_ms: self.retention.failed_max_age_ms,
        }
    }

    pub fn rpc_config(&self) -> RpcServerConfig {
        RpcServerConfig {
            host: self.rpc.host.clone(),
            port: self.rpc.port,
            rate_limit_burst: self.rpc.rate_limit_burst,
            rate_limit_per_sec: self.rpc.rate_limit_per_sec,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(vars: &[(&str, &str)]) -> Option<config::Map<String, String>> {
        Some(
            vars.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::build(None, env(&[])).unwrap();

        assert_eq!(settings.log_format, LogFormat::Pretty);
        assert_eq!(settings.worker.concurrency, 5);
        assert_eq!(settings.retry.base_delay_ms, 2_000);
        assert_eq!(settings.stall.threshold_ms, 30_000);
        assert_eq!(settings.stall.max_stalled_count, 3);
        assert_eq!(settings.worker_config().job_timeout, Duration::from_secs(300));
        assert_eq!(
            settings.retention_policy().completed_max_count,
            Some(100)
        );
    }

    #[test]
    fn test_environment_overrides() {
        let settings = Settings::build(
            None,
            env(&[
                ("JOBQ_WORKER__CONCURRENCY", "8"),
                ("JOBQ_RETRY__BASE_DELAY_MS", "500"),
                ("JOBQ_DATABASE__URL", "memory"),
                ("JOBQ_LOG_FORMAT", "json"),
            ]),
        )
        .unwrap();

        assert_eq!(settings.worker.concurrency, 8);
        assert_eq!(settings.backoff().delay_for(2), 1_000);
        assert_eq!(settings.store_location(), StoreLocation::Memory);
        assert_eq!(settings.log_format, LogFormat::Json);
    }

    #[test]
    fn test_file_then_environment() {
        let path = std::env::temp_dir().join(format!("jobq-settings-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            "[rpc]\nport = 9999\n\n[stall]\nthreshold_ms = 60000\nmax_stalled_count = 1\n",
        )
        .unwrap();

        let settings =
            Settings::build(Some(&path), env(&[("JOBQ_RPC__PORT", "9100")])).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(settings.rpc.port, 9100);
        assert_eq!(settings.stall_config().threshold_ms, 60_000);
        assert_eq!(settings.stall_config().max_stalled_count, 1);
    }

    #[test]
    fn test_missing_file_is_fine() {
        let path = std::env::temp_dir().join("jobq-settings-does-not-exist.toml");
        tokio_test::assert_ok!(Settings::build(Some(&path), env(&[])));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let zero = Settings::build(None, env(&[("JOBQ_WORKER__CONCURRENCY", "0")]));
        assert!(matches!(zero, Err(AppError::Config(_))));

        let slow_heartbeat = Settings::build(
            None,
            env(&[("JOBQ_WORKER__HEARTBEAT_INTERVAL_MS", "60000")]),
        );
        assert!(matches!(slow_heartbeat, Err(AppError::Config(_))));

        let garbage = Settings::build(None, env(&[("JOBQ_RPC__PORT", "not-a-port")]));
        assert!(matches!(garbage, Err(AppError::Config(_))));
    }

    #[test]
    fn test_sqlite_url_is_expanded() {
        let mut settings = Settings::default();
        settings.database.url = "sqlite:///tmp/jobs.db".to_string();
        assert_eq!(
            settings.store_location(),
            StoreLocation::Sqlite("sqlite:///tmp/jobs.db".to_string())
        );
        assert_eq!(settings.database_dir(), Some(PathBuf::from("/tmp")));

        settings.database.url = "sqlite::memory:".to_string();
        assert_eq!(
            settings.store_location(),
            StoreLocation::Sqlite("sqlite::memory:".to_string())
        );
        assert_eq!(settings.database_dir(), None);
    }
}
