//! Runtime Configuration Module
//!
//! Provides configuration loading and validation for the actor runtime.
//! Supports loading from TOML files with environment-specific overrides.

use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default configuration file, resolved relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "troupe.toml";

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "TROUPE";

/// Main runtime configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Worker pool and dispatch settings
    pub scheduler: SchedulerConfig,

    /// Log output settings
    pub logging: LoggingConfig,
}

/// Worker pool and dispatch settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Async worker threads of the owned runtime (timers, async utilities)
    pub worker_threads: usize,

    /// Upper bound on pool threads that drain actor queues
    pub max_blocking_threads: usize,

    /// Name prefix given to pool threads
    pub thread_name: String,

    /// Invocations one drain task runs before yielding its worker
    pub drain_batch_limit: usize,

    /// Re-check period while blocked on a deferred actor's construction
    pub deferred_poll_interval_ms: u64,

    /// Default wait budget for deferred construction
    pub deferred_wait_timeout_ms: u64,

    /// Nesting depth searched when looking for a callback's owning actor
    pub capture_search_depth: usize,
}

/// Log output settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set
    pub level: String,

    /// Emit JSON lines instead of human-readable text
    pub json: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            max_blocking_threads: 64,
            thread_name: "troupe-worker".to_string(),
            drain_batch_limit: 64,
            deferred_poll_interval_ms: 50,
            deferred_wait_timeout_ms: 5_000,
            capture_search_depth: 8,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl SchedulerConfig {
    pub fn deferred_poll_interval(&self) -> Duration {
        Duration::from_millis(self.deferred_poll_interval_ms)
    }

    pub fn deferred_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.deferred_wait_timeout_ms)
    }

    /// Reject settings the runtime cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            bail!("scheduler.worker_threads must be at least 1");
        }
        if self.max_blocking_threads == 0 {
            bail!("scheduler.max_blocking_threads must be at least 1");
        }
        if self.drain_batch_limit == 0 {
            bail!("scheduler.drain_batch_limit must be at least 1");
        }
        if self.deferred_poll_interval_ms == 0 {
            bail!("scheduler.deferred_poll_interval_ms must be positive");
        }
        if self.deferred_poll_interval_ms > self.deferred_wait_timeout_ms {
            bail!(
                "scheduler.deferred_poll_interval_ms ({}) exceeds deferred_wait_timeout_ms ({})",
                self.deferred_poll_interval_ms,
                self.deferred_wait_timeout_ms
            );
        }
        if self.thread_name.trim().is_empty() {
            bail!("scheduler.thread_name must not be empty");
        }
        Ok(())
    }
}

impl RuntimeConfig {
    /// Load configuration from files with environment overrides
    ///
    /// A missing base file is tolerated only when no explicit path was given;
    /// defaults fill every unset field.
    pub fn load(base_path: Option<&Path>, environment: Option<&str>) -> Result<Self> {
        let (base, required) = match base_path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };

        let defaults = Config::try_from(&RuntimeConfig::default())
            .context("Failed to seed configuration defaults")?;

        let mut builder = Config::builder()
            .add_source(defaults)
            .add_source(File::from(base.as_path()).required(required));

        // Add environment-specific overrides if specified
        if let Some(env) = environment {
            let env_file = base
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("environments")
                .join(format!("{}.toml", env));

            if env_file.exists() {
                info!("Loading environment config: {:?}", env_file);
                builder = builder.add_source(File::from(env_file));
            } else {
                warn!("Environment config not found: {:?}", env_file);
            }
        }

        // Override with environment variables (TROUPE_SCHEDULER__WORKER_THREADS=8)
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: RuntimeConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        debug!(?config, "Runtime configuration loaded");
        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.scheduler
            .validate()
            .context("Invalid scheduler configuration")?;
        if self.logging.level.trim().is_empty() {
            bail!("logging.level must not be empty");
        }
        Ok(())
    }

    /// Render the configuration as TOML, e.g. to seed a config file
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}

/// Convenience function to load configuration with defaults
pub fn load_config(environment: Option<&str>) -> Result<RuntimeConfig> {
    RuntimeConfig::load(None, environment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.deferred_poll_interval(), Duration::from_millis(50));
        assert_eq!(config.scheduler.capture_search_depth, 8);
    }

    #[test]
    fn test_load_base_config() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("troupe.toml");

        let config_content = r#"
[scheduler]
worker_threads = 3
thread_name = "actors"
deferred_poll_interval_ms = 10

[logging]
level = "debug"
json = true
"#;

        fs::write(&config_path, config_content).unwrap();

        let config = RuntimeConfig::load(Some(&config_path), None).unwrap();

        assert_eq!(config.scheduler.worker_threads, 3);
        assert_eq!(config.scheduler.thread_name, "actors");
        assert_eq!(config.scheduler.deferred_poll_interval_ms, 10);
        // Unset fields keep their defaults
        assert_eq!(config.scheduler.max_blocking_threads, 64);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn test_environment_overlay() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("troupe.toml");
        fs::write(&config_path, "[scheduler]\nworker_threads = 3\n").unwrap();

        fs::create_dir(dir.path().join("environments")).unwrap();
        fs::write(
            dir.path().join("environments").join("staging.toml"),
            "[scheduler]\nworker_threads = 6\n",
        )
        .unwrap();

        let config = RuntimeConfig::load(Some(&config_path), Some("staging")).unwrap();
        assert_eq!(config.scheduler.worker_threads, 6);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(RuntimeConfig::load(Some(&missing), None).is_err());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("troupe.toml");
        fs::write(&config_path, "[scheduler]\ndeferred_poll_interval_ms = 0\n").unwrap();

        let err = RuntimeConfig::load(Some(&config_path), None).unwrap_err();
        assert!(format!("{:#}", err).contains("deferred_poll_interval_ms"));
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = RuntimeConfig::default();
        config.scheduler.drain_batch_limit = 7;

        let rendered = config.to_toml().unwrap();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("troupe.toml");
        fs::write(&config_path, rendered).unwrap();

        let loaded = RuntimeConfig::load(Some(&config_path), None).unwrap();
        assert_eq!(loaded, config);
    }
}
