//! Testing utilities for blueprintflow pipelines.
//!
//! This module provides:
//! - Scripted workers and stages
//! - Fixture plans
//! - Assertions for artifacts and phase outcomes

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_artifact_clean, assert_artifact_complete, assert_artifact_degraded,
    assert_no_warning_containing, assert_phase_outcome,
};
pub use fixtures::{chained_mechanics_plan, cyclic_plan, single_scene_plan, two_diagram_scene_plan};
pub use mocks::{RecordingStage, ScriptedWorker, SlowStage, StaticPlanStage};
