//! Test assertions for artifacts and run state.

use crate::core::{Artifact, PhaseOutcome};
use crate::state::SharedState;

/// Asserts that assembly ran against a plan.
pub fn assert_artifact_complete(artifact: &Artifact) {
    assert!(
        artifact.generation_complete,
        "Expected a complete artifact, got fatal error: {:?}",
        artifact.fatal_error
    );
}

/// Asserts a complete artifact with no degradation and no warnings.
pub fn assert_artifact_clean(artifact: &Artifact) {
    assert_artifact_complete(artifact);
    assert!(!artifact.is_degraded, "Expected a clean artifact, it is degraded");
    assert!(
        artifact.warnings.is_empty(),
        "Expected no warnings, got: {:?}",
        artifact.warnings
    );
}

/// Asserts a complete but degraded artifact.
pub fn assert_artifact_degraded(artifact: &Artifact) {
    assert_artifact_complete(artifact);
    assert!(
        artifact.is_degraded,
        "Expected a degraded artifact. Warnings: {:?}",
        artifact.warnings
    );
}

/// Asserts that no warning contains `needle`.
pub fn assert_no_warning_containing(artifact: &Artifact, needle: &str) {
    let hits: Vec<&String> = artifact.warnings.iter().filter(|w| w.contains(needle)).collect();
    assert!(hits.is_empty(), "Expected no warning containing '{needle}', got: {hits:?}");
}

/// Asserts how a phase closed.
pub fn assert_phase_outcome(state: &SharedState, phase: &str, expected: PhaseOutcome) {
    let report = state.phase_report(phase);
    assert!(
        report.is_some(),
        "Expected phase '{phase}' to be closed. Reports: {:?}",
        state.phase_reports()
    );
    assert_eq!(
        report.map(|r| r.outcome),
        Some(expected),
        "Unexpected outcome for phase '{phase}'"
    );
}
