//! Configuration for the background-removal runtime
//!
//! Values come from (lowest to highest priority) built-in defaults, an
//! optional config file whose format is detected from its extension, and
//! `CUTOUT__*` environment variables, e.g. `CUTOUT__MAX_BATCH_SIZE=8`.

use config::{Config as Cfg, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RemoverError, Result};

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "CUTOUT";

/// When the model is brought into memory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadPolicy {
    /// Load on first use, evict after the idle timeout
    #[default]
    Lazy,
    /// Load during `initialize()` and keep resident; requests before that
    /// are rejected as not ready
    Eager,
}

/// Configuration for `BackgroundRemover`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoverConfig {
    /// Model identifier handed to the backend
    pub model: String,

    /// Directory the backend downloads/caches model weights into
    pub cache_dir: PathBuf,

    /// Unload the model after this many seconds without requests
    pub idle_timeout_secs: u64,

    /// How often the idle reaper checks for inactivity
    pub reaper_interval_secs: u64,

    /// Upper bound on concurrent compute jobs.
    /// The worker pool is additionally capped at `executor::MAX_WORKERS`.
    pub max_concurrency: usize,

    /// Maximum number of images in one batch call
    pub max_batch_size: usize,

    /// Per-request wait limit in seconds; 0 disables the limit
    pub request_timeout_secs: u64,

    /// How long `cleanup()` waits for in-flight work to drain
    pub shutdown_timeout_secs: u64,

    pub load_policy: LoadPolicy,
}

impl Default for RemoverConfig {
    fn default() -> Self {
        Self {
            model: String::from("isnet-general-use"),
            cache_dir: PathBuf::from(".model_cache"),
            idle_timeout_secs: 600,
            reaper_interval_secs: 60,
            max_concurrency: 4,
            max_batch_size: 5,
            request_timeout_secs: 30,
            shutdown_timeout_secs: 10,
            load_policy: LoadPolicy::Lazy,
        }
    }
}

impl RemoverConfig {
    pub fn new(model: impl Into<String>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            model: model.into(),
            cache_dir: cache_dir.into(),
            ..Default::default()
        }
    }

    /// Load from a config file layered with `CUTOUT__*` environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let format = detect_format(path)?;
        let content = std::fs::read_to_string(path)
            .map_err(|e| RemoverError::Config(format!("{}: {}", path.display(), e)))?;

        Self::build(Cfg::builder().add_source(File::from_str(&content, format)))
    }

    /// Defaults layered with `CUTOUT__*` environment overrides.
    pub fn from_env() -> Result<Self> {
        Self::build(Cfg::builder())
    }

    fn build(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        let cfg: Self = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| RemoverError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| RemoverError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values the runtime cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(RemoverError::Config("model must not be empty".into()));
        }
        if self.max_concurrency == 0 {
            return Err(RemoverError::Config("max_concurrency must be > 0".into()));
        }
        if self.max_batch_size == 0 {
            return Err(RemoverError::Config("max_batch_size must be > 0".into()));
        }
        if self.reaper_interval_secs == 0 {
            return Err(RemoverError::Config("reaper_interval_secs must be > 0".into()));
        }
        Ok(())
    }

    pub fn with_idle_timeout_secs(mut self, secs: u64) -> Self {
        self.idle_timeout_secs = secs;
        self
    }

    pub fn with_reaper_interval_secs(mut self, secs: u64) -> Result<Self> {
        if secs == 0 {
            return Err(RemoverError::Config("reaper_interval_secs must be > 0".into()));
        }
        self.reaper_interval_secs = secs;
        Ok(self)
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Result<Self> {
        if max == 0 {
            return Err(RemoverError::Config("max_concurrency must be > 0".into()));
        }
        self.max_concurrency = max;
        Ok(self)
    }

    pub fn with_max_batch_size(mut self, max: usize) -> Result<Self> {
        if max == 0 {
            return Err(RemoverError::Config("max_batch_size must be > 0".into()));
        }
        self.max_batch_size = max;
        Ok(self)
    }

    pub fn with_request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    pub fn with_shutdown_timeout_secs(mut self, secs: u64) -> Self {
        self.shutdown_timeout_secs = secs;
        self
    }

    pub fn with_load_policy(mut self, policy: LoadPolicy) -> Self {
        self.load_policy = policy;
        self
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn detect_format(path: &Path) -> Result<FileFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| RemoverError::Config(format!("no file extension: {}", path.display())))?;

    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        _ => Err(RemoverError::Config(format!("unsupported config format: {ext}"))),
    }
}
