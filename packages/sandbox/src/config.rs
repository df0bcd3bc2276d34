// ABOUTME: Runtime configuration loaded from CELLAR_* environment variables
// ABOUTME: Sandbox image and resource ceilings, timeouts, lock window and output thresholds

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value}")]
    InvalidValue { var: String, value: String },

    #[error("{var} is out of range: {value}")]
    OutOfRange { var: String, value: String },
}

/// Ceilings applied to every sandbox container at creation
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxLimits {
    pub memory_mb: u64,
    pub cpu_cores: f64,
    pub pids_limit: i64,
    pub network_mode: String,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            memory_mb: 2048,
            cpu_cores: 1.0,
            pids_limit: 256,
            network_mode: "bridge".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub image: String,
    pub workspace_root: PathBuf,
    pub limits: SandboxLimits,
    pub exec_timeout: Duration,
    /// Locks older than this are treated as abandoned
    pub lock_stale_after: Duration,
    /// Outputs larger than this are moved to blob storage
    pub output_inline_max_bytes: u64,
    /// Per-stream cap on captured stdout/stderr
    pub max_stream_bytes: usize,
    /// `None` disables idle reaping
    pub idle_timeout: Option<Duration>,
    pub database_url: String,
    pub output_dir: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            image: "python:3.11-slim".to_string(),
            workspace_root: PathBuf::from("./data/workspaces"),
            limits: SandboxLimits::default(),
            exec_timeout: Duration::from_secs(120),
            lock_stale_after: Duration::from_secs(60),
            output_inline_max_bytes: 100 * 1024,
            max_stream_bytes: 1024 * 1024,
            idle_timeout: Some(Duration::from_secs(30 * 60)),
            database_url: "sqlite://cellar.db?mode=rwc".to_string(),
            output_dir: PathBuf::from("./data/outputs"),
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source. Unset or empty
    /// variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(image) = get("CELLAR_SANDBOX_IMAGE") {
            config.image = image;
        }
        if let Some(root) = get("CELLAR_WORKSPACE_ROOT") {
            config.workspace_root = PathBuf::from(root);
        }
        if let Some(value) = get("CELLAR_MEMORY_MB") {
            config.limits.memory_mb = parse("CELLAR_MEMORY_MB", &value)?;
        }
        if let Some(value) = get("CELLAR_CPU_CORES") {
            config.limits.cpu_cores = parse("CELLAR_CPU_CORES", &value)?;
        }
        if let Some(value) = get("CELLAR_PIDS_LIMIT") {
            config.limits.pids_limit = parse("CELLAR_PIDS_LIMIT", &value)?;
        }
        if let Some(mode) = get("CELLAR_NETWORK_MODE") {
            config.limits.network_mode = mode;
        }
        if let Some(value) = get("CELLAR_EXEC_TIMEOUT_SECS") {
            config.exec_timeout = Duration::from_secs(parse("CELLAR_EXEC_TIMEOUT_SECS", &value)?);
        }
        if let Some(value) = get("CELLAR_LOCK_STALE_SECS") {
            config.lock_stale_after = Duration::from_secs(parse("CELLAR_LOCK_STALE_SECS", &value)?);
        }
        if let Some(value) = get("CELLAR_OUTPUT_INLINE_MAX_BYTES") {
            config.output_inline_max_bytes = parse("CELLAR_OUTPUT_INLINE_MAX_BYTES", &value)?;
        }
        if let Some(value) = get("CELLAR_MAX_STREAM_BYTES") {
            config.max_stream_bytes = parse("CELLAR_MAX_STREAM_BYTES", &value)?;
        }
        if let Some(value) = get("CELLAR_IDLE_TIMEOUT_MINS") {
            let minutes: u64 = parse("CELLAR_IDLE_TIMEOUT_MINS", &value)?;
            config.idle_timeout = if minutes == 0 {
                None
            } else {
                Some(Duration::from_secs(minutes * 60))
            };
        }
        if let Some(url) = get("CELLAR_DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(dir) = get("CELLAR_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.memory_mb < 64 {
            return Err(out_of_range("CELLAR_MEMORY_MB", self.limits.memory_mb));
        }
        if !(self.limits.cpu_cores > 0.0 && self.limits.cpu_cores.is_finite()) {
            return Err(out_of_range("CELLAR_CPU_CORES", self.limits.cpu_cores));
        }
        if self.limits.pids_limit <= 0 {
            return Err(out_of_range("CELLAR_PIDS_LIMIT", self.limits.pids_limit));
        }
        if self.exec_timeout.is_zero() {
            return Err(out_of_range("CELLAR_EXEC_TIMEOUT_SECS", 0));
        }
        if self.lock_stale_after.is_zero() {
            return Err(out_of_range("CELLAR_LOCK_STALE_SECS", 0));
        }
        if self.max_stream_bytes == 0 {
            return Err(out_of_range("CELLAR_MAX_STREAM_BYTES", 0));
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(var: &str, value: &str) -> Result<T, ConfigError> {
    value.parse::<T>().map_err(|_| ConfigError::InvalidValue {
        var: var.to_string(),
        value: value.to_string(),
    })
}

fn out_of_range(var: &str, value: impl ToString) -> ConfigError {
    ConfigError::OutOfRange {
        var: var.to_string(),
        value: value.to_string(),
    }
}
