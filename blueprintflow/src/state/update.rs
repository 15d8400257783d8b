//! Partial state updates returned by stages and router effects.

use crate::core::{Artifact, MergedResults, PhaseError, PhaseOutcome, Plan, RetryCounter, WorkResult};
use crate::validation::ValidationResult;
use serde_json::Value;
use std::collections::BTreeMap;

/// A phase the update closes, and how.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ClosedPhase {
    pub(crate) phase: String,
    pub(crate) outcome: PhaseOutcome,
    pub(crate) score: f64,
}

/// A partial update to the shared state.
///
/// Present keys overwrite; `raw_results`, `phase_errors` and `warnings`
/// append; `degraded` can only switch the run flag on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub(crate) question: Option<String>,
    pub(crate) plan: Option<Plan>,
    pub(crate) fields: BTreeMap<String, Value>,
    pub(crate) entered_phases: Vec<String>,
    pub(crate) raw_results: BTreeMap<String, Vec<WorkResult>>,
    pub(crate) merged: BTreeMap<String, MergedResults>,
    pub(crate) counters: BTreeMap<String, RetryCounter>,
    pub(crate) validations: BTreeMap<String, ValidationResult>,
    pub(crate) closed_phases: Vec<ClosedPhase>,
    pub(crate) phase_errors: Vec<PhaseError>,
    pub(crate) warnings: Vec<String>,
    pub(crate) degraded: bool,
    pub(crate) artifact: Option<Artifact>,
}

impl StateUpdate {
    /// Creates an empty update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the question.
    #[must_use]
    pub fn with_question(mut self, question: impl Into<String>) -> Self {
        self.question = Some(question.into());
        self
    }

    /// Replaces the plan.
    #[must_use]
    pub fn with_plan(mut self, plan: Plan) -> Self {
        self.plan = Some(plan);
        self
    }

    /// Sets an open field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Resets a phase's raw results, merged results, validation and counter.
    #[must_use]
    pub fn enter_phase(mut self, phase: impl Into<String>) -> Self {
        self.entered_phases.push(phase.into());
        self
    }

    /// Appends raw results to a phase channel.
    #[must_use]
    pub fn with_raw_results(mut self, phase: impl Into<String>, results: Vec<WorkResult>) -> Self {
        self.raw_results.entry(phase.into()).or_default().extend(results);
        self
    }

    /// Sets a phase's merged results.
    #[must_use]
    pub fn with_merged(mut self, phase: impl Into<String>, merged: MergedResults) -> Self {
        self.merged.insert(phase.into(), merged);
        self
    }

    /// Sets a phase's retry counter.
    #[must_use]
    pub fn with_counter(mut self, phase: impl Into<String>, counter: RetryCounter) -> Self {
        self.counters.insert(phase.into(), counter);
        self
    }

    /// Sets a phase's last validation result.
    #[must_use]
    pub fn with_validation(mut self, phase: impl Into<String>, result: ValidationResult) -> Self {
        self.validations.insert(phase.into(), result);
        self
    }

    /// Closes a phase: its counter is folded into a report.
    #[must_use]
    pub fn close_phase(mut self, phase: impl Into<String>, outcome: PhaseOutcome, score: f64) -> Self {
        self.closed_phases.push(ClosedPhase {
            phase: phase.into(),
            outcome,
            score,
        });
        self
    }

    /// Records a stage failure.
    #[must_use]
    pub fn with_phase_error(mut self, error: PhaseError) -> Self {
        self.phase_errors.push(error);
        self
    }

    /// Appends a warning.
    #[must_use]
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    /// Appends several warnings.
    #[must_use]
    pub fn with_warnings<S: Into<String>>(mut self, warnings: impl IntoIterator<Item = S>) -> Self {
        self.warnings.extend(warnings.into_iter().map(Into::into));
        self
    }

    /// Marks the run as degraded.
    #[must_use]
    pub fn degraded(mut self) -> Self {
        self.degraded = true;
        self
    }

    /// Sets the artifact.
    #[must_use]
    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifact = Some(artifact);
        self
    }

    /// Folds a later update into this one.
    ///
    /// Overwriting keys take `other`'s value; append channels concatenate.
    pub fn extend(&mut self, other: Self) {
        if other.question.is_some() {
            self.question = other.question;
        }
        if other.plan.is_some() {
            self.plan = other.plan;
        }
        self.fields.extend(other.fields);
        self.entered_phases.extend(other.entered_phases);
        for (phase, results) in other.raw_results {
            self.raw_results.entry(phase).or_default().extend(results);
        }
        self.merged.extend(other.merged);
        self.counters.extend(other.counters);
        self.validations.extend(other.validations);
        self.closed_phases.extend(other.closed_phases);
        self.phase_errors.extend(other.phase_errors);
        self.warnings.extend(other.warnings);
        self.degraded |= other.degraded;
        if other.artifact.is_some() {
            self.artifact = other.artifact;
        }
    }

    /// Returns true if applying the update would change nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// The plan this update installs, if any.
    #[must_use]
    pub fn plan(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    /// Warnings this update appends.
    #[must_use]
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Raw results this update appends to a phase.
    #[must_use]
    pub fn raw_results(&self, phase: &str) -> &[WorkResult] {
        self.raw_results.get(phase).map_or(&[], Vec::as_slice)
    }

    /// The artifact this update installs, if any.
    #[must_use]
    pub fn artifact(&self) -> Option<&Artifact> {
        self.artifact.as_ref()
    }
}
