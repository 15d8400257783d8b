//! Run configuration.
//!
//! Every field has a default, so a config file only needs the values it
//! changes. Stages and workers are bounded by a timeout unless the config
//! sets it to `null`:
//!
//! ```json
//! {
//!   "default_max_retries": 2,
//!   "max_retries": { "assets": 1 },
//!   "worker_timeout_ms": 30000,
//!   "stage_timeout_ms": null,
//!   "logging": { "level": "debug" }
//! }
//! ```

use crate::errors::ConfigError;
use crate::observability::LogConfig;
use crate::pipeline::{RetryBackoff, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Default bound on one stage invocation (5 minutes).
pub const DEFAULT_STAGE_TIMEOUT_MS: u64 = 300_000;

/// Default bound on one dispatched item (2 minutes).
pub const DEFAULT_WORKER_TIMEOUT_MS: u64 = 120_000;

/// Configuration of one engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Retry rounds allowed per phase unless overridden.
    pub default_max_retries: u32,
    /// Per-phase overrides of `default_max_retries`.
    pub max_retries: BTreeMap<String, u32>,
    /// Timeout for a single stage invocation; `None` waits indefinitely.
    pub stage_timeout_ms: Option<u64>,
    /// Timeout for a single dispatched item; `None` waits indefinitely.
    pub worker_timeout_ms: Option<u64>,
    /// Maximum items in flight per dispatch.
    pub max_concurrency: usize,
    /// Step bound for a run.
    pub max_steps: usize,
    /// Entry stages; the builder's first stage when empty.
    pub entry: Vec<String>,
    /// Delay between retry rounds.
    pub retry_backoff: RetryBackoff,
    /// Degrade a phase after this many identical consecutive rounds.
    pub stagnation_limit: Option<u32>,
    /// Logging setup.
    pub logging: LogConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            default_max_retries: 2,
            max_retries: BTreeMap::new(),
            stage_timeout_ms: Some(DEFAULT_STAGE_TIMEOUT_MS),
            worker_timeout_ms: Some(DEFAULT_WORKER_TIMEOUT_MS),
            max_concurrency: 8,
            max_steps: 256,
            entry: Vec::new(),
            retry_backoff: RetryBackoff::default(),
            stagnation_limit: None,
            logging: LogConfig::default(),
        }
    }
}

impl RunConfig {
    /// Creates a default config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the JSON is malformed or has the
    /// wrong shape, and [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise the
    /// errors of [`RunConfig::from_json_str`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Sets the default retry budget.
    #[must_use]
    pub fn with_default_max_retries(mut self, max_retries: u32) -> Self {
        self.default_max_retries = max_retries;
        self
    }

    /// Sets a phase's retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, phase: impl Into<String>, max_retries: u32) -> Self {
        self.max_retries.insert(phase.into(), max_retries);
        self
    }

    /// Sets the stage timeout.
    #[must_use]
    pub fn with_stage_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.stage_timeout_ms = Some(timeout_ms);
        self
    }

    /// Sets the worker timeout.
    #[must_use]
    pub fn with_worker_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.worker_timeout_ms = Some(timeout_ms);
        self
    }

    /// Lets stages run without a time limit.
    #[must_use]
    pub fn without_stage_timeout(mut self) -> Self {
        self.stage_timeout_ms = None;
        self
    }

    /// Lets workers run without a time limit.
    #[must_use]
    pub fn without_worker_timeout(mut self) -> Self {
        self.worker_timeout_ms = None;
        self
    }

    /// Sets the dispatch concurrency bound.
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Sets the step bound.
    #[must_use]
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Adds an entry stage.
    #[must_use]
    pub fn with_entry(mut self, stage: impl Into<String>) -> Self {
        self.entry.push(stage.into());
        self
    }

    /// Sets the retry backoff.
    #[must_use]
    pub fn with_retry_backoff(mut self, backoff: RetryBackoff) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Enables stagnation detection.
    #[must_use]
    pub fn with_stagnation_limit(mut self, limit: u32) -> Self {
        self.stagnation_limit = Some(limit);
        self
    }

    /// Sets the logging config.
    #[must_use]
    pub fn with_logging(mut self, logging: LogConfig) -> Self {
        self.logging = logging;
        self
    }

    /// Retry budget of a phase.
    #[must_use]
    pub fn max_retries_for(&self, phase: &str) -> u32 {
        self.max_retries
            .get(phase)
            .copied()
            .unwrap_or(self.default_max_retries)
    }

    /// Gate policy of a phase.
    #[must_use]
    pub fn retry_policy(&self, phase: &str) -> RetryPolicy {
        let policy = RetryPolicy::new(self.max_retries_for(phase));
        match self.stagnation_limit {
            Some(limit) => policy.with_stagnation_limit(limit),
            None => policy,
        }
    }

    /// Stage timeout as a duration.
    #[must_use]
    pub fn stage_timeout(&self) -> Option<Duration> {
        self.stage_timeout_ms.map(Duration::from_millis)
    }

    /// Worker timeout as a duration.
    #[must_use]
    pub fn worker_timeout(&self) -> Option<Duration> {
        self.worker_timeout_ms.map(Duration::from_millis)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first out-of-range value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid("max_concurrency must be >= 1".to_string()));
        }
        if self.max_steps == 0 {
            return Err(ConfigError::Invalid("max_steps must be >= 1".to_string()));
        }
        if self.stage_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid("stage_timeout_ms must be positive when provided".to_string()));
        }
        if self.worker_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid("worker_timeout_ms must be positive when provided".to_string()));
        }
        if let Some(limit) = self.stagnation_limit {
            if limit < 2 {
                return Err(ConfigError::Invalid("stagnation_limit must be >= 2".to_string()));
            }
        }
        if self.retry_backoff.max_delay_ms < self.retry_backoff.base_delay_ms {
            return Err(ConfigError::Invalid(
                "retry_backoff.max_delay_ms must be >= base_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}
