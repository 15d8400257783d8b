//! Validation-gated retry loops.
//!
//! A [`RetryGate`] closes every phase. It validates the post-merge state and
//! picks one of three transitions:
//!
//! - `CleanProceed` when validation passes
//! - `Retry` when it fails and the phase still has budget
//! - `DegradedProceed` when the budget is spent (or the phase stagnated)
//!
//! The phase's round counter is compared against `max_retries`, so a phase
//! runs at most `max_retries + 1` rounds.

use super::routing::{Decision, DispatchItem, DispatchSet, FanOut, Router};
use crate::core::{PhaseOutcome, RetryCounter};
use crate::state::{SharedState, StateUpdate};
use crate::utils::fingerprint;
use crate::validation::{ValidationResult, Validator};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Retry budget of one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retry rounds allowed after the first round.
    pub max_retries: u32,
    /// Degrade early after this many consecutive identical rounds.
    pub stagnation_limit: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2)
    }
}

impl RetryPolicy {
    /// Creates a policy without stagnation detection.
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            stagnation_limit: None,
        }
    }

    /// Enables stagnation detection.
    #[must_use]
    pub fn with_stagnation_limit(mut self, limit: u32) -> Self {
        self.stagnation_limit = Some(limit);
        self
    }

    fn is_stagnant(&self, counter: &RetryCounter) -> bool {
        self.stagnation_limit
            .is_some_and(|limit| counter.stagnant_rounds.saturating_add(1) >= limit)
    }
}

/// The gate's verdict for a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateTransition {
    /// Run the failing subset again.
    Retry,
    /// Give up on the phase and continue, marking the run degraded.
    DegradedProceed,
    /// Validation passed.
    CleanProceed,
}

impl fmt::Display for GateTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retry => write!(f, "retry"),
            Self::DegradedProceed => write!(f, "degraded_proceed"),
            Self::CleanProceed => write!(f, "clean_proceed"),
        }
    }
}

/// Decides a transition from a validation result and the phase counter.
#[must_use]
pub fn evaluate(
    result: &ValidationResult,
    counter: &RetryCounter,
    policy: &RetryPolicy,
) -> GateTransition {
    if result.passed {
        GateTransition::CleanProceed
    } else if policy.is_stagnant(counter) {
        GateTransition::DegradedProceed
    } else if counter.rounds <= policy.max_retries {
        GateTransition::Retry
    } else {
        GateTransition::DegradedProceed
    }
}

/// What a `Retry` transition re-runs.
#[derive(Clone)]
pub enum RetryTarget {
    /// Re-dispatch the failing items of a fan-out phase.
    Redispatch {
        /// Registered worker name.
        worker: String,
        /// Merge stage of the phase.
        merge_stage: String,
        /// Planner for the phase's items.
        planner: Arc<dyn FanOut>,
    },
    /// Re-invoke a single stage. The gate counts the rounds itself.
    Stage(String),
}

impl fmt::Debug for RetryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Redispatch { worker, merge_stage, .. } => f
                .debug_struct("Redispatch")
                .field("worker", worker)
                .field("merge_stage", merge_stage)
                .finish_non_exhaustive(),
            Self::Stage(stage) => f.debug_tuple("Stage").field(stage).finish(),
        }
    }
}

/// Router closing a phase behind a validator.
pub struct RetryGate {
    name: String,
    phase: String,
    validator: Arc<dyn Validator<SharedState>>,
    policy: RetryPolicy,
    target: RetryTarget,
    proceed: String,
}

impl fmt::Debug for RetryGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryGate")
            .field("name", &self.name)
            .field("phase", &self.phase)
            .field("validator", &self.validator.name())
            .field("policy", &self.policy)
            .field("target", &self.target)
            .field("proceed", &self.proceed)
            .finish()
    }
}

impl RetryGate {
    /// Creates a gate that proceeds to `proceed` once the phase closes.
    pub fn new(
        name: impl Into<String>,
        phase: impl Into<String>,
        validator: Arc<dyn Validator<SharedState>>,
        target: RetryTarget,
        proceed: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            phase: phase.into(),
            validator,
            policy: RetryPolicy::default(),
            target,
            proceed: proceed.into(),
        }
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The phase this gate closes.
    #[must_use]
    pub fn phase(&self) -> &str {
        &self.phase
    }

    /// The gate's retry policy.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn retry_items(&self, state: &SharedState, planner: &dyn FanOut, result: &ValidationResult) -> Vec<DispatchItem> {
        let mut failing: BTreeSet<String> = result.failing_keys();
        // Planned items without a winning success: failed or never returned.
        let planned = planner.items(state);
        if let Some(merged) = state.merged(&self.phase) {
            failing.extend(
                planned
                    .iter()
                    .filter(|item| merged.success(&item.key).is_none())
                    .map(|item| item.key.clone()),
            );
        }

        let subset: Vec<DispatchItem> = planned
            .iter()
            .filter(|item| failing.contains(&item.key))
            .cloned()
            .collect();
        let items = if subset.is_empty() { planned } else { subset };

        items
            .into_iter()
            .map(|item| {
                let attempt = state.next_attempt(&self.phase, &item.key);
                item.with_attempt(attempt)
            })
            .collect()
    }
}

impl Router for RetryGate {
    fn name(&self) -> &str {
        &self.name
    }

    fn decide(&self, state: &SharedState) -> Decision {
        let result = self.validator.validate(state);

        let mut counter = state.retry_counter(&self.phase).cloned().unwrap_or_default();
        if matches!(self.target, RetryTarget::Stage(_)) {
            counter = counter.incremented();
        }
        if self.policy.stagnation_limit.is_some() {
            // Failures carry their attempt number, so only successes count.
            let successes = state.merged(&self.phase).map(|m| &m.successes);
            counter = counter.observe(fingerprint(&(successes, &result.issues)));
        }

        let transition = evaluate(&result, &counter, &self.policy);
        let score = result.score;
        let effects = StateUpdate::new()
            .with_validation(&self.phase, result.clone())
            .with_counter(&self.phase, counter.clone());

        match transition {
            GateTransition::CleanProceed => {
                tracing::info!(
                    phase = %self.phase,
                    round = counter.rounds,
                    score,
                    "Phase passed validation"
                );
                Decision::next(&self.proceed)
                    .with_effects(effects.close_phase(&self.phase, PhaseOutcome::Clean, score))
            }
            GateTransition::DegradedProceed => {
                tracing::warn!(
                    phase = %self.phase,
                    round = counter.rounds,
                    issues = result.issues.len(),
                    stagnant = self.policy.is_stagnant(&counter),
                    "Phase degraded, proceeding"
                );
                let warnings: Vec<String> = result
                    .issues
                    .iter()
                    .map(|issue| format!("{}: {issue}", self.phase))
                    .collect();
                Decision::next(&self.proceed).with_effects(
                    effects
                        .with_warnings(warnings)
                        .degraded()
                        .close_phase(&self.phase, PhaseOutcome::Degraded, score),
                )
            }
            GateTransition::Retry => {
                tracing::info!(
                    phase = %self.phase,
                    round = counter.rounds,
                    max_retries = self.policy.max_retries,
                    "Phase failed validation, retrying"
                );
                let decision = match &self.target {
                    RetryTarget::Stage(stage) => Decision::next(stage),
                    RetryTarget::Redispatch {
                        worker,
                        merge_stage,
                        planner,
                    } => {
                        let items = self.retry_items(state, planner.as_ref(), &result);
                        Decision::dispatch(
                            DispatchSet::new(&self.phase, worker, merge_stage).with_items(items),
                        )
                    }
                };
                decision.with_effects(effects).with_retry_round(counter.rounds)
            }
        }
    }
}
