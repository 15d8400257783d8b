//! Core domain model types for blueprintflow.
//!
//! - The plan describing what a run produces
//! - Per-item work results
//! - Phase bookkeeping (merged results, counters, reports, errors)
//! - The assembled artifact

mod artifact;
mod phase;
mod plan;
mod result;

pub use artifact::{Artifact, ArtifactMechanic, ArtifactScene};
pub use phase::{MergedResults, PhaseError, PhaseErrorKind, PhaseOutcome, PhaseReport, RetryCounter};
pub use plan::{MechanicConnection, MechanicPlan, Plan, ScenePlan};
pub use result::{WorkResult, WorkStatus};
