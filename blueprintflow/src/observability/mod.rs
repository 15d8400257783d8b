//! Logging setup and timing helpers.
//!
//! The library only emits `tracing` events. Binaries and tests that want to
//! see them call [`init_tracing`] once.

mod tracing;

pub use self::tracing::{stage_span, SpanTimer};

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: trace, debug, info, warn, error, off.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
    /// Per-module level overrides, e.g. `blueprintflow::pipeline = "debug"`.
    pub modules: BTreeMap<String, String>,
    /// Colored output (text format only).
    pub color: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            modules: BTreeMap::new(),
            color: true,
        }
    }
}

impl LogConfig {
    /// Creates a config with the given level.
    #[must_use]
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Self::default()
        }
    }

    /// Sets the format.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Adds a per-module level.
    #[must_use]
    pub fn with_module(mut self, module: impl Into<String>, level: impl Into<String>) -> Self {
        self.modules.insert(module.into(), level.into());
        self
    }

    /// Builds the filter. `RUST_LOG` takes precedence over the config.
    pub fn env_filter(&self) -> Result<EnvFilter, ConfigError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }

        let mut filter = EnvFilter::try_new(&self.level)
            .map_err(|e| ConfigError::Logging(format!("invalid level '{}': {e}", self.level)))?;
        for (module, level) in &self.modules {
            let directive = format!("{module}={level}")
                .parse::<Directive>()
                .map_err(|e| ConfigError::Logging(format!("invalid directive for '{module}': {e}")))?;
            filter = filter.add_directive(directive);
        }
        Ok(filter)
    }
}

/// Installs a global tracing subscriber.
///
/// Fails if a subscriber is already installed or the filter is invalid.
pub fn init_tracing(config: &LogConfig) -> Result<(), ConfigError> {
    let filter = config.env_filter()?;
    let registry = Registry::default().with(filter);

    let result = match config.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true))
            .try_init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true).with_ansi(config.color))
            .try_init(),
    };

    result.map_err(|e| ConfigError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_defaults() {
        let config = LogConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::Text);
    }

    #[test]
    fn test_log_config_deserializes() {
        let config: LogConfig =
            serde_json::from_str(r#"{"level": "debug", "format": "json"}"#).unwrap();
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.color);
    }

    #[test]
    fn test_env_filter_with_modules() {
        let config = LogConfig::new("warn").with_module("blueprintflow::pipeline", "debug");
        assert!(config.env_filter().is_ok());
    }
}
