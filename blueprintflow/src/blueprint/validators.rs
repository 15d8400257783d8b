//! Gate validators for the blueprint phases.

use super::phases;
use crate::pipeline::FanOut;
use crate::state::SharedState;
use crate::validation::{Issue, ValidationResult, Validator};
use std::fmt;
use std::sync::Arc;

/// Checks that a plan exists and holds its invariants.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanValidator;

impl Validator<SharedState> for PlanValidator {
    fn name(&self) -> &str {
        "plan"
    }

    fn validate(&self, state: &SharedState) -> ValidationResult {
        let Some(plan) = state.plan() else {
            return ValidationResult::fail(Issue::error("no plan produced").at(phases::PLAN));
        };
        match plan.check_invariants() {
            Ok(()) => ValidationResult::pass(),
            Err(err) => ValidationResult::fail(Issue::error(err.to_string()).at(err.field_path())),
        }
    }
}

/// Checks that every planned item of a phase has a usable result.
///
/// An item is covered when the merged results hold a success for its key
/// whose payload is a JSON object. The score is the covered fraction.
pub struct PhaseCoverageValidator {
    phase: String,
    planner: Arc<dyn FanOut>,
}

impl fmt::Debug for PhaseCoverageValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseCoverageValidator")
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

impl PhaseCoverageValidator {
    /// Creates a validator for `phase`, planned by `planner`.
    pub fn new(phase: impl Into<String>, planner: Arc<dyn FanOut>) -> Self {
        Self {
            phase: phase.into(),
            planner,
        }
    }
}

impl Validator<SharedState> for PhaseCoverageValidator {
    fn name(&self) -> &str {
        &self.phase
    }

    fn validate(&self, state: &SharedState) -> ValidationResult {
        let planned = self.planner.items(state);
        if planned.is_empty() {
            return ValidationResult::pass();
        }
        let merged = state.merged(&self.phase);

        let mut issues = Vec::new();
        for item in &planned {
            match merged.and_then(|m| m.success(&item.key)) {
                None => issues.push(
                    Issue::error(format!("no successful result for '{}'", item.key)).for_item(&item.key),
                ),
                Some(result) if !result.payload.is_object() => issues.push(
                    Issue::error(format!("result for '{}' is not a JSON object", item.key))
                        .at("payload")
                        .for_item(&item.key),
                ),
                Some(_) => {}
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let score = (planned.len() - issues.len()) as f64 / planned.len() as f64;
        ValidationResult::from_issues(issues, score)
    }
}
