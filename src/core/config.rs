//! Thread-count configuration.
//!
//! Settings come from three places, later ones overriding earlier ones:
//! built-in defaults, a TOML file, and the `STRATA_NUMBER_OF_THREADS` /
//! `STRATA_MAX_THREADS` environment variables.

use crate::core::error::ConfigError;
use crate::core::sync::SingletonCell;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Upper bound on any thread count, whatever the configuration says.
pub const MAX_THREADS_HARD_CAP: usize = 128;

/// Environment variable overriding [`ThreadingConfig::default_threads`].
pub const ENV_NUMBER_OF_THREADS: &str = "STRATA_NUMBER_OF_THREADS";

/// Environment variable overriding [`ThreadingConfig::max_threads`].
pub const ENV_MAX_THREADS: &str = "STRATA_MAX_THREADS";

/// Worker pool and splitting settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadingConfig {
    /// Threads a filter splits into when it does not ask for a count.
    pub default_threads: usize,
    /// Largest count any request is clamped to.
    pub max_threads: usize,
    /// Prefix for worker thread names.
    pub thread_name_prefix: String,
}

impl Default for ThreadingConfig {
    fn default() -> Self {
        let available = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            default_threads: available.min(MAX_THREADS_HARD_CAP),
            max_threads: MAX_THREADS_HARD_CAP,
            thread_name_prefix: "strata-worker".to_string(),
        }
    }
}

impl ThreadingConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default thread count.
    pub fn with_default_threads(mut self, threads: usize) -> Self {
        self.default_threads = threads;
        self
    }

    /// Set the maximum thread count.
    pub fn with_max_threads(mut self, threads: usize) -> Self {
        self.max_threads = threads;
        self
    }

    /// Set the worker name prefix.
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Defaults overridden by the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env()
    }

    /// Parse a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&source)?.apply_env()?;
        debug!("Loaded threading configuration from {}", path.display());
        Ok(config)
    }

    /// Override fields from the environment, if the variables are set.
    pub fn apply_env(mut self) -> Result<Self, ConfigError> {
        if let Some(max) = read_env_threads(ENV_MAX_THREADS)? {
            self.max_threads = max;
        }
        if let Some(threads) = read_env_threads(ENV_NUMBER_OF_THREADS)? {
            self.default_threads = threads;
        }
        if self.max_threads > MAX_THREADS_HARD_CAP {
            warn!(
                "max_threads {} exceeds the hard cap, using {}",
                self.max_threads, MAX_THREADS_HARD_CAP
            );
            self.max_threads = MAX_THREADS_HARD_CAP;
        }
        self.default_threads = self.default_threads.min(self.max_threads);
        self.validate()?;
        Ok(self)
    }

    /// Check that the counts are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_threads == 0 || self.max_threads > MAX_THREADS_HARD_CAP {
            return Err(ConfigError::Invalid {
                field: "max_threads",
                reason: format!("must be in 1..={}", MAX_THREADS_HARD_CAP),
            });
        }
        if self.default_threads == 0 || self.default_threads > self.max_threads {
            return Err(ConfigError::Invalid {
                field: "default_threads",
                reason: format!("must be in 1..={}", self.max_threads),
            });
        }
        if self.thread_name_prefix.is_empty() {
            return Err(ConfigError::Invalid {
                field: "thread_name_prefix",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Clamp a requested thread count to `[1, max_threads]`.
    pub fn clamp(&self, requested: usize) -> usize {
        requested.clamp(1, self.max_threads.clamp(1, MAX_THREADS_HARD_CAP))
    }
}

fn read_env_threads(var: &str) -> Result<Option<usize>, ConfigError> {
    let Ok(value) = std::env::var(var) else {
        return Ok(None);
    };
    match value.trim().parse::<usize>() {
        Ok(threads) if threads > 0 => Ok(Some(threads)),
        _ => Err(ConfigError::Environment {
            var: var.to_string(),
            value,
        }),
    }
}

static GLOBAL_SETTINGS: SingletonCell<ThreadingConfig> = SingletonCell::new();

/// Process-wide thread settings.
///
/// Built from the environment on first use; an unusable environment falls
/// back to the defaults with a warning.
pub struct GlobalThreadSettings;

impl GlobalThreadSettings {
    /// The current settings.
    pub fn get() -> Arc<ThreadingConfig> {
        GLOBAL_SETTINGS.get_or_init(|| {
            ThreadingConfig::from_env().unwrap_or_else(|e| {
                warn!("Ignoring threading environment: {}", e);
                ThreadingConfig::default()
            })
        })
    }

    /// Replace the settings after validating them.
    pub fn set(config: ThreadingConfig) -> Result<(), ConfigError> {
        config.validate()?;
        debug!(
            "Global threads set to {} (max {})",
            config.default_threads, config.max_threads
        );
        GLOBAL_SETTINGS.set(config);
        Ok(())
    }

    /// Forget the settings; the next access reads the environment again.
    pub fn reset() {
        GLOBAL_SETTINGS.teardown();
    }

    /// Clamp against the global maximum.
    pub fn clamp(requested: usize) -> usize {
        Self::get().clamp(requested)
    }
}
