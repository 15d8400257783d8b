//! Phase bookkeeping: merged results, retry counters, reports and errors.

use super::result::WorkResult;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Output of merging a phase's raw results.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MergedResults {
    /// Winning successful results, sorted by key.
    pub successes: Vec<WorkResult>,
    /// Winning failed results, sorted by key.
    pub failures: Vec<WorkResult>,
    /// Number of raw results that went into the merge.
    pub raw_count: usize,
}

impl MergedResults {
    /// Returns the winning result for a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&WorkResult> {
        self.successes
            .iter()
            .chain(self.failures.iter())
            .find(|r| r.key == key)
    }

    /// Returns the successful result for a key.
    #[must_use]
    pub fn success(&self, key: &str) -> Option<&WorkResult> {
        self.successes.iter().find(|r| r.key == key)
    }

    /// Returns the keys of the failed results.
    pub fn failed_keys(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|r| r.key.as_str())
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    /// Returns true if no key was merged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Phase-scoped round counter.
///
/// `rounds` counts completed attempts of the phase. It starts at 0 when the
/// phase is entered and is bumped by the phase's merge stage or, for a
/// single-stage phase, by its gate.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RetryCounter {
    /// Completed rounds.
    pub rounds: u32,
    /// Fingerprint of the last round's validation outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fingerprint: Option<String>,
    /// Consecutive rounds whose fingerprint matched the previous one.
    #[serde(default)]
    pub stagnant_rounds: u32,
}

impl RetryCounter {
    /// Returns the counter advanced by one round.
    #[must_use]
    pub fn incremented(&self) -> Self {
        Self {
            rounds: self.rounds.saturating_add(1),
            ..self.clone()
        }
    }

    /// Records a round fingerprint and returns the updated counter.
    #[must_use]
    pub fn observe(&self, fingerprint: String) -> Self {
        let stagnant_rounds = if self.last_fingerprint.as_deref() == Some(fingerprint.as_str()) {
            self.stagnant_rounds.saturating_add(1)
        } else {
            0
        };
        Self {
            rounds: self.rounds,
            last_fingerprint: Some(fingerprint),
            stagnant_rounds,
        }
    }

    /// Number of retry rounds run (rounds beyond the first).
    #[must_use]
    pub fn retries(&self) -> u32 {
        self.rounds.saturating_sub(1)
    }
}

/// How a phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseOutcome {
    /// Validation passed.
    Clean,
    /// Retries were exhausted or stagnated; the run continued anyway.
    Degraded,
    /// There was nothing to do.
    Skipped,
}

impl fmt::Display for PhaseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clean => write!(f, "clean"),
            Self::Degraded => write!(f, "degraded"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Summary of a closed phase; replaces its retry counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseReport {
    /// Phase name.
    pub phase: String,
    /// Rounds run.
    pub rounds: u32,
    /// Retry rounds run.
    pub retries: u32,
    /// How the phase ended.
    pub outcome: PhaseOutcome,
    /// Score of the last validation.
    pub score: f64,
}

impl PhaseReport {
    /// Builds a report from a counter.
    #[must_use]
    pub fn from_counter(
        phase: impl Into<String>,
        counter: &RetryCounter,
        outcome: PhaseOutcome,
        score: f64,
    ) -> Self {
        Self {
            phase: phase.into(),
            rounds: counter.rounds,
            retries: counter.retries(),
            outcome,
            score,
        }
    }

    /// Report for a phase that had no work.
    #[must_use]
    pub fn skipped(phase: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            rounds: 0,
            retries: 0,
            outcome: PhaseOutcome::Skipped,
            score: 1.0,
        }
    }
}

/// Category of a recorded stage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseErrorKind {
    /// The stage returned an error.
    Failed,
    /// The stage exceeded its timeout.
    Timeout,
    /// The stage panicked.
    Panicked,
    /// The run hit `max_steps`.
    StepLimit,
    /// A router named a stage that is not registered.
    UnknownRoute,
}

/// A stage failure absorbed by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseError {
    /// The stage (or router) that failed.
    pub stage: String,
    /// Failure category.
    pub kind: PhaseErrorKind,
    /// Error message.
    pub message: String,
    /// When it was recorded (ISO 8601).
    pub timestamp: String,
}

impl PhaseError {
    /// Records a failure now.
    #[must_use]
    pub fn new(stage: impl Into<String>, kind: PhaseErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            kind,
            message: message.into(),
            timestamp: crate::utils::iso_timestamp(),
        }
    }
}

impl fmt::Display for PhaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.stage, self.message)
    }
}
