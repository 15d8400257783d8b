//! Final assembly of the blueprint artifact.
//!
//! [`Assembler::assemble`] is deterministic and does no I/O:
//!
//! 1. failed results are dropped, one warning each;
//! 2. the plan and the surviving results are combined into a draft;
//! 3. the draft is checked by the structural validator;
//! 4. if it fails, the repair table runs once and the draft is re-checked once;
//! 5. `generation_complete` is set. Remaining errors mark the artifact
//!    degraded and stay visible as warnings.
//!
//! Only a missing plan yields an incomplete artifact.

pub mod repair;
mod rules;

pub use repair::{apply_repairs, default_repairs, infer_type_from_content, Repair};
pub use rules::structural_rules;

use crate::blueprint::phases;
use crate::core::{Artifact, ArtifactMechanic, ArtifactScene, MergedResults, Plan};
use crate::errors::StageError;
use crate::stages::Stage;
use crate::state::{SharedState, StateUpdate};
use crate::validation::Validator;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Fatal error recorded when assembly has no plan.
pub const NO_PLAN_ERROR: &str = "no plan in state: nothing to assemble";

/// Merged phase results the assembler combines with the plan.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssemblyInputs<'a> {
    /// Mechanic content, keyed by mechanic id.
    pub content: Option<&'a MergedResults>,
    /// Diagram assets, keyed by scene id.
    pub assets: Option<&'a MergedResults>,
    /// Interaction designs, keyed by scene id.
    pub interactions: Option<&'a MergedResults>,
}

impl<'a> AssemblyInputs<'a> {
    /// Reads the merged results of the blueprint phases.
    #[must_use]
    pub fn from_state(state: &'a SharedState) -> Self {
        Self {
            content: state.merged(phases::CONTENT),
            assets: state.merged(phases::ASSETS),
            interactions: state.merged(phases::INTERACTIONS),
        }
    }

    fn by_phase(&self) -> [(&'static str, Option<&'a MergedResults>); 3] {
        [
            (phases::CONTENT, self.content),
            (phases::ASSETS, self.assets),
            (phases::INTERACTIONS, self.interactions),
        ]
    }
}

fn payload_of(results: Option<&MergedResults>, key: &str) -> Option<Value> {
    results
        .and_then(|merged| merged.success(key))
        .map(|result| result.payload.clone())
}

/// Combines plan and phase results into an [`Artifact`].
pub struct Assembler {
    validator: Arc<dyn Validator<Artifact>>,
    repairs: Vec<Repair>,
}

impl fmt::Debug for Assembler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Assembler")
            .field("validator", &self.validator.name())
            .field("repairs", &self.repairs)
            .finish()
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Assembler {
    /// Creates an assembler with the structural rules and default repairs.
    #[must_use]
    pub fn new() -> Self {
        Self {
            validator: Arc::new(structural_rules()),
            repairs: default_repairs(),
        }
    }

    /// Replaces the repair table.
    #[must_use]
    pub fn with_repairs(mut self, repairs: Vec<Repair>) -> Self {
        self.repairs = repairs;
        self
    }

    /// Replaces the structural validator.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn Validator<Artifact>>) -> Self {
        self.validator = validator;
        self
    }

    /// Builds the artifact.
    #[must_use]
    pub fn assemble(&self, plan: Option<&Plan>, question: &str, inputs: &AssemblyInputs<'_>) -> Artifact {
        let Some(plan) = plan else {
            tracing::error!("Assembly started without a plan");
            return Artifact::fatal(question, NO_PLAN_ERROR);
        };

        let mut warnings = Vec::new();
        for (phase, merged) in inputs.by_phase() {
            for failed in merged.map(|m| m.failures.as_slice()).unwrap_or_default() {
                warnings.push(format!(
                    "{phase}: dropped failed result '{}': {}",
                    failed.key,
                    failed.error.as_deref().unwrap_or("unknown error")
                ));
            }
        }

        let mut artifact = draft(plan, question, inputs);
        let mut result = self.validator.validate(&artifact);

        if !result.passed {
            tracing::info!(
                errors = result.errors().count(),
                repairs = self.repairs.len(),
                "Draft failed structural validation, repairing"
            );
            warnings.extend(apply_repairs(&self.repairs, &mut artifact, plan));
            result = self.validator.validate(&artifact);
        }

        artifact.generation_complete = true;
        if !result.passed {
            artifact.is_degraded = true;
        }
        warnings.extend(result.issues.iter().map(|issue| format!("assembly: {issue}")));
        artifact.warnings = warnings;

        tracing::info!(
            scenes = artifact.scenes.len(),
            total_max_score = artifact.total_max_score,
            degraded = artifact.is_degraded,
            warnings = artifact.warnings.len(),
            "Artifact assembled"
        );
        artifact
    }
}

fn draft(plan: &Plan, question: &str, inputs: &AssemblyInputs<'_>) -> Artifact {
    let scenes: Vec<ArtifactScene> = plan
        .scenes
        .iter()
        .map(|scene| ArtifactScene {
            scene_id: scene.scene_id.clone(),
            title: scene.title.clone(),
            labels: scene.labels.clone(),
            needs_diagram: scene.needs_diagram,
            diagram: payload_of(inputs.assets, &scene.scene_id),
            interaction: payload_of(inputs.interactions, &scene.scene_id),
            mechanics: scene
                .mechanics
                .iter()
                .map(|mechanic| ArtifactMechanic {
                    mechanic_id: mechanic.mechanic_id.clone(),
                    mechanic_type: mechanic.mechanic_type.clone(),
                    labels: mechanic.labels.clone(),
                    max_score: mechanic.max_score,
                    content: payload_of(inputs.content, &mechanic.mechanic_id).unwrap_or(Value::Null),
                })
                .collect(),
        })
        .collect();

    let mut artifact = Artifact {
        title: plan.title.clone(),
        question: question.to_string(),
        scenes,
        ..Artifact::default()
    };
    artifact.total_max_score = artifact.computed_max_score();
    artifact
}

/// Terminal stage running the assembler over the run state.
///
/// Run warnings and recorded stage errors are carried into the artifact
/// ahead of the assembly warnings, and a degraded run yields a degraded
/// artifact.
#[derive(Debug)]
pub struct AssemblerStage {
    name: String,
    assembler: Assembler,
}

impl AssemblerStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(name: impl Into<String>, assembler: Assembler) -> Self {
        Self {
            name: name.into(),
            assembler,
        }
    }
}

#[async_trait]
impl Stage for AssemblerStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, state: &SharedState) -> Result<StateUpdate, StageError> {
        let inputs = AssemblyInputs::from_state(state);
        let mut artifact = self.assembler.assemble(state.plan(), state.question(), &inputs);

        if artifact.generation_complete {
            let mut warnings: Vec<String> = state.warnings().to_vec();
            warnings.extend(state.phase_errors().iter().map(ToString::to_string));
            warnings.append(&mut artifact.warnings);
            artifact.warnings = warnings;
            artifact.is_degraded |= state.is_degraded();
        }

        Ok(StateUpdate::new().with_artifact(artifact))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{MechanicPlan, PhaseError, PhaseErrorKind, ScenePlan, WorkResult};
    use crate::pipeline::merge;
    use crate::testing::{
        assert_artifact_clean, assert_artifact_degraded, single_scene_plan, two_diagram_scene_plan,
    };
    use crate::validation::{FnValidator, Issue, ValidationResult};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn content(results: &[WorkResult]) -> MergedResults {
        merge(results)
    }

    #[test]
    fn test_missing_plan_is_fatal() {
        let artifact = Assembler::new().assemble(None, "q", &AssemblyInputs::default());
        assert!(!artifact.generation_complete);
        assert_eq!(artifact.fatal_error.as_deref(), Some(NO_PLAN_ERROR));
        assert!(artifact.warnings.is_empty());
        assert!(artifact.scenes.is_empty());
    }

    #[test]
    fn test_missing_plan_skips_repairs() {
        let called = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&called);
        let validator = FnValidator::new("spy", move |_: &Artifact| {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
            ValidationResult::pass()
        });
        let artifact = Assembler::new()
            .with_validator(Arc::new(validator))
            .assemble(None, "q", &AssemblyInputs::default());
        assert!(!artifact.generation_complete);
        assert!(!called.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn test_clean_assembly() {
        let plan = single_scene_plan();
        let merged = content(&[WorkResult::success("m1", json!({"zones": ["chloroplast"]}), 1)]);
        let inputs = AssemblyInputs {
            content: Some(&merged),
            ..AssemblyInputs::default()
        };

        let artifact = Assembler::new().assemble(Some(&plan), "How do plants eat?", &inputs);
        assert_artifact_clean(&artifact);
        assert_eq!(artifact.title, "Photosynthesis");
        assert_eq!(artifact.total_max_score, 10);
        assert_eq!(artifact.scenes[0].mechanics[0].content, json!({"zones": ["chloroplast"]}));
    }

    #[test]
    fn test_failed_results_are_dropped_with_warning() {
        let plan = two_diagram_scene_plan();
        let mechanics = content(&[
            WorkResult::success("m1", json!({}), 1),
            WorkResult::success("m2", json!({}), 1),
        ]);
        let assets = merge(&[
            WorkResult::success("s1", json!({"image": "s1.png"}), 1),
            WorkResult::failed("s2", "renderer down", 3),
        ]);
        let inputs = AssemblyInputs {
            content: Some(&mechanics),
            assets: Some(&assets),
            interactions: None,
        };

        let artifact = Assembler::new().assemble(Some(&plan), "q", &inputs);
        assert!(artifact.generation_complete);
        assert!(!artifact.is_degraded);
        assert_eq!(
            artifact.warnings,
            vec![
                "assets: dropped failed result 's2': renderer down".to_string(),
                "assembly: scenes[1].diagram: scene 's2' needs a diagram but none was generated"
                    .to_string(),
            ]
        );
        assert!(artifact.scene("s2").unwrap().diagram.is_none());
    }

    #[test]
    fn test_repairable_draft_is_not_degraded() {
        let plan = Plan::new("Untyped").with_labels(["a", "b"]).with_scene(
            ScenePlan::new("s1", "")
                .with_labels(["a", "b"])
                .with_mechanic(MechanicPlan::new("m1", "").with_labels(["a", "b"])),
        );
        let merged = content(&[WorkResult::success("m1", json!({"sequence": ["a", "b"]}), 1)]);
        let inputs = AssemblyInputs {
            content: Some(&merged),
            ..AssemblyInputs::default()
        };

        let artifact = Assembler::new().assemble(Some(&plan), "q", &inputs);
        assert!(artifact.generation_complete);
        assert!(!artifact.is_degraded);
        let mechanic = &artifact.scenes[0].mechanics[0];
        assert_eq!(mechanic.mechanic_type, "sequencing");
        assert_eq!(mechanic.max_score, 20);
        assert_eq!(artifact.total_max_score, 20);
        assert_eq!(artifact.scenes[0].title, "Scene 1");
        assert!(artifact.warnings.iter().all(|w| w.starts_with("repaired")));
    }

    #[test]
    fn test_unrepairable_draft_is_degraded_but_complete() {
        let plan = single_scene_plan();
        let artifact = Assembler::new().assemble(Some(&plan), "q", &AssemblyInputs::default());

        assert_artifact_degraded(&artifact);
        assert!(artifact
            .warnings
            .iter()
            .any(|w| w.contains("mechanic 'm1' has no generated content")));
    }

    #[test]
    fn test_empty_repair_table() {
        let plan = Plan::new("p").with_labels(["a"]).with_scene(
            ScenePlan::new("s1", "Scene")
                .with_labels(["a"])
                .with_mechanic(MechanicPlan::new("m1", "drag_drop")),
        );
        let merged = content(&[WorkResult::success("m1", json!({}), 1)]);
        let inputs = AssemblyInputs {
            content: Some(&merged),
            ..AssemblyInputs::default()
        };

        let artifact = Assembler::new()
            .with_repairs(Vec::new())
            .assemble(Some(&plan), "q", &inputs);
        assert_artifact_degraded(&artifact);
    }

    #[test]
    fn test_custom_validator_warnings_are_kept() {
        let plan = single_scene_plan();
        let merged = content(&[WorkResult::success("m1", json!({}), 1)]);
        let inputs = AssemblyInputs {
            content: Some(&merged),
            ..AssemblyInputs::default()
        };
        let validator = FnValidator::new("soft", |_: &Artifact| {
            ValidationResult::from_issues(vec![Issue::warning("feedback text is short")], 1.0)
        });

        let artifact = Assembler::new()
            .with_validator(Arc::new(validator))
            .assemble(Some(&plan), "q", &inputs);
        assert!(!artifact.is_degraded);
        assert_eq!(artifact.warnings, vec!["assembly: feedback text is short"]);
    }

    #[tokio::test]
    async fn test_stage_carries_run_warnings() {
        let stage = AssemblerStage::new("assemble", Assembler::new());
        let mut state = SharedState::new("q").with_plan(single_scene_plan());
        state.apply(
            StateUpdate::new()
                .with_merged(phases::CONTENT, content(&[WorkResult::success("m1", json!({}), 1)]))
                .with_warning("interactions: no successful result for 's1'")
                .with_phase_error(PhaseError::new("plan", PhaseErrorKind::Failed, "planner flaked"))
                .degraded(),
        );

        state.apply(stage.run(&state).await.unwrap());
        let artifact = state.artifact().unwrap();
        assert!(artifact.generation_complete);
        assert!(artifact.is_degraded);
        assert_eq!(
            artifact.warnings,
            vec![
                "interactions: no successful result for 's1'",
                "plan: planner flaked",
            ]
        );
    }

    #[tokio::test]
    async fn test_stage_without_plan() {
        let stage = AssemblerStage::new("assemble", Assembler::new());
        let mut state = SharedState::new("q");
        state.apply(StateUpdate::new().with_warning("plan: no plan produced").degraded());

        let update = stage.run(&state).await.unwrap();
        let artifact = update.artifact().unwrap();
        assert!(!artifact.generation_complete);
        assert!(artifact.warnings.is_empty());
        assert_eq!(artifact.fatal_error.as_deref(), Some(NO_PLAN_ERROR));
    }
}
