//! The typed state shared by every stage of a run.

use super::update::StateUpdate;
use crate::core::{
    Artifact, MergedResults, PhaseError, PhaseReport, Plan, RetryCounter, WorkResult,
};
use crate::validation::ValidationResult;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// State of one run.
///
/// Stages read it through shared references and never mutate it; the engine
/// is the only writer and applies [`StateUpdate`]s between steps.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SharedState {
    question: String,
    plan: Option<Plan>,
    fields: BTreeMap<String, Value>,
    raw_results: BTreeMap<String, Vec<WorkResult>>,
    merged: BTreeMap<String, MergedResults>,
    retry_counters: BTreeMap<String, RetryCounter>,
    validations: BTreeMap<String, ValidationResult>,
    phase_reports: Vec<PhaseReport>,
    phase_errors: Vec<PhaseError>,
    warnings: Vec<String>,
    is_degraded: bool,
    artifact: Option<Artifact>,
}

impl SharedState {
    /// Creates the initial state for a question.
    #[must_use]
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Self::default()
        }
    }

    /// Creates a state with a plan already in place.
    #[must_use]
    pub fn with_plan(mut self, plan: Plan) -> Self {
        self.plan = Some(plan);
        self
    }

    /// Applies a partial update.
    ///
    /// Order: phase resets, then overwrites, then appends, then phase
    /// closures, so an update can enter a phase and seed it at once.
    pub fn apply(&mut self, update: StateUpdate) {
        for phase in &update.entered_phases {
            self.raw_results.remove(phase);
            self.merged.remove(phase);
            self.validations.remove(phase);
            self.retry_counters.insert(phase.clone(), RetryCounter::default());
            self.phase_reports.retain(|r| &r.phase != phase);
        }

        if let Some(question) = update.question {
            self.question = question;
        }
        if let Some(plan) = update.plan {
            self.plan = Some(plan);
        }
        self.fields.extend(update.fields);

        for (phase, results) in update.raw_results {
            self.raw_results.entry(phase).or_default().extend(results);
        }
        self.merged.extend(update.merged);
        self.retry_counters.extend(update.counters);
        self.validations.extend(update.validations);

        for closed in update.closed_phases {
            let counter = self.retry_counters.remove(&closed.phase).unwrap_or_default();
            self.phase_reports.retain(|r| r.phase != closed.phase);
            self.phase_reports.push(PhaseReport::from_counter(
                closed.phase,
                &counter,
                closed.outcome,
                closed.score,
            ));
        }

        self.phase_errors.extend(update.phase_errors);
        self.warnings.extend(update.warnings);
        self.is_degraded |= update.degraded;

        if let Some(artifact) = update.artifact {
            self.artifact = Some(artifact);
        }
    }

    /// The learning question.
    #[must_use]
    pub fn question(&self) -> &str {
        &self.question
    }

    /// The current plan.
    #[must_use]
    pub fn plan(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    /// An open field.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// All raw results of a phase, across every round.
    #[must_use]
    pub fn raw_results(&self, phase: &str) -> &[WorkResult] {
        self.raw_results.get(phase).map_or(&[], Vec::as_slice)
    }

    /// Merged results of a phase.
    #[must_use]
    pub fn merged(&self, phase: &str) -> Option<&MergedResults> {
        self.merged.get(phase)
    }

    /// The live retry counter of an open phase.
    #[must_use]
    pub fn retry_counter(&self, phase: &str) -> Option<&RetryCounter> {
        self.retry_counters.get(phase)
    }

    /// The last validation result of a phase.
    #[must_use]
    pub fn validation(&self, phase: &str) -> Option<&ValidationResult> {
        self.validations.get(phase)
    }

    /// Reports of closed phases, in closing order.
    #[must_use]
    pub fn phase_reports(&self) -> &[PhaseReport] {
        &self.phase_reports
    }

    /// The report of a closed phase.
    #[must_use]
    pub fn phase_report(&self, phase: &str) -> Option<&PhaseReport> {
        self.phase_reports.iter().find(|r| r.phase == phase)
    }

    /// Retry rounds a phase has run, whether it is open or closed.
    #[must_use]
    pub fn retry_count(&self, phase: &str) -> u32 {
        self.retry_counter(phase).map_or_else(
            || self.phase_report(phase).map_or(0, |report| report.retries),
            RetryCounter::retries,
        )
    }

    /// The attempt number the next dispatch of `key` in `phase` should carry.
    #[must_use]
    pub fn next_attempt(&self, phase: &str, key: &str) -> u32 {
        self.raw_results(phase)
            .iter()
            .filter(|r| r.key == key)
            .map(|r| r.attempt_count)
            .max()
            .map_or(1, |attempt| attempt.saturating_add(1))
    }

    /// Recorded stage failures.
    #[must_use]
    pub fn phase_errors(&self) -> &[PhaseError] {
        &self.phase_errors
    }

    /// Run warnings.
    #[must_use]
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// True once any phase degraded.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.is_degraded
    }

    /// The assembled artifact.
    #[must_use]
    pub fn artifact(&self) -> Option<&Artifact> {
        self.artifact.as_ref()
    }

    /// Consumes the state, returning the artifact.
    #[must_use]
    pub fn into_artifact(self) -> Option<Artifact> {
        self.artifact
    }
}
