//! Structured logging utilities for memhook components.
//!
//! Provides consistent logging with component prefixes and structured fields.
//! These macros are for cold paths only (registration, init, config); the
//! interposed `mmap`/`munmap`/`sbrk` path never logs.
//!
//! # Usage
//!
//! ```ignore
//! use memhook_config::logging::*;
//!
//! log_hooks_debug!("Hook registered", list = "pre_mmap", slot = 0);
//! log_interpose_info!("memhook initialised", recorder = true);
//! ```

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown log level: {0}")]
pub struct ParseLogLevelError(String);

impl FromStr for LogLevel {
    type Err = ParseLogLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(ParseLogLevelError(other.to_string())),
        }
    }
}

// === INTERPOSE logging macros ===

#[macro_export]
macro_rules! log_interpose_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "INTERPOSE", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_interpose_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "INTERPOSE", $($key = $value,)* $msg)
    };
}

// === HOOKS logging macros ===

#[macro_export]
macro_rules! log_hooks_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "HOOKS", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_hooks_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "HOOKS", $($key = $value,)* $msg)
    };
}

// === CONFIG logging macros ===

#[macro_export]
macro_rules! log_config_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "CONFIG", $($key = $value,)* $msg)
    };
}

fn env_filter(level: LogLevel) -> tracing_subscriber::EnvFilter {
    use tracing_subscriber::EnvFilter;
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()))
}

/// Install a stderr fmt subscriber unless the host already has one.
/// Returns `true` if this call installed the subscriber.
pub fn try_init_logging(level: LogLevel) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parse() {
        assert_eq!("DEBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!(" warning ".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_second_try_init_is_noop() {
        let _ = try_init_logging(LogLevel::Error);
        assert!(!try_init_logging(LogLevel::Trace));
    }
}
