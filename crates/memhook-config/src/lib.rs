//! # memhook-config
//!
//! Configuration management for the memhook interposer.
//!
//! Loads configuration from:
//! 1. `~/.memhook/config.toml` (global)
//! 2. `.memhook/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)
//!
//! Nothing here runs on the interposed hot path. The interposer reads this
//! once, from `memhook_init`, and copies the values into atomics.

pub mod logging;
pub mod testing;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use logging::LogLevel;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub recorder: RecorderConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(
            Self::global_config_path().as_deref(),
            Some(Path::new(".memhook/config.toml")),
        )?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from explicit global and project files. Missing files are skipped.
    pub fn load_from(global: Option<&Path>, project: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(global_path) = global {
            if global_path.exists() {
                crate::log_config_debug!(
                    "Loading global config",
                    path = tracing::field::debug(global_path)
                );
                let contents = std::fs::read_to_string(global_path)?;
                config = toml::from_str(&contents)?;
            }
        }

        if let Some(project_path) = project {
            if project_path.exists() {
                crate::log_config_debug!(
                    "Loading project config",
                    path = tracing::field::debug(project_path)
                );
                let contents = std::fs::read_to_string(project_path)?;
                let project_config: PartialConfig = toml::from_str(&contents)?;
                config.merge(project_config);
            }
        }

        Ok(config)
    }

    /// Global config path: ~/.memhook/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".memhook/config.toml"))
    }

    /// Merge a project config. Only keys present in the project file win.
    fn merge(&mut self, other: PartialConfig) {
        if let Some(recorder) = other.recorder {
            if let Some(enabled) = recorder.enabled {
                self.recorder.enabled = enabled;
            }
            if let Some(dump) = recorder.dump_on_abort {
                self.recorder.dump_on_abort = dump;
            }
        }
        if let Some(logging) = other.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
        }
    }

    /// Apply environment variable overrides through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MEMHOOK_RECORD").and_then(|v| parse_flag(&v)) {
            self.recorder.enabled = v;
        }
        if let Some(v) = lookup("MEMHOOK_DUMP_ON_ABORT").and_then(|v| parse_flag(&v)) {
            self.recorder.dump_on_abort = v;
        }
        if let Some(level) = lookup("MEMHOOK_LOG").and_then(|v| v.parse().ok()) {
            self.logging.level = level;
        }
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Config::default()).unwrap_or_default()
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Event recorder configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Record map/unmap/break events into the in-process ring
    pub enabled: bool,
    /// Dump the ring to stderr before aborting on a fatal resolution failure
    pub dump_on_abort: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level; `RUST_LOG` takes precedence when set
    pub level: LogLevel,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Warn,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    recorder: Option<PartialRecorder>,
    logging: Option<PartialLogging>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialRecorder {
    enabled: Option<bool>,
    dump_on_abort: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialLogging {
    level: Option<LogLevel>,
}
