//! # Blueprintflow
//!
//! Orchestration and validation-retry engine for multi-phase generation
//! pipelines that turn a learning question into a scored, interactive
//! blueprint.
//!
//! Blueprintflow provides:
//!
//! - **Superstep execution**: stages read one state snapshot per step and
//!   return partial updates the engine applies in a fixed order
//! - **Fan-out and merge**: bounded parallel dispatch with per-item isolation,
//!   reduced by a deterministic highest-attempt-wins merge
//! - **Validation-gated retries**: per-phase retry budgets that always end in
//!   a clean or degraded proceed
//! - **Assembly with repair**: a deterministic final step that repairs or
//!   degrades instead of failing
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use blueprintflow::prelude::*;
//!
//! let outcome = BlueprintPipeline::new(planner, content_gen, asset_gen, interaction_gen)
//!     .with_config(RunConfig::from_file("blueprintflow.json")?)
//!     .run("How does the heart pump blood?")
//!     .await?;
//!
//! let artifact = outcome.artifact().expect("assembly always runs");
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod assembler;
pub mod blueprint;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod stages;
pub mod state;
pub mod testing;
pub mod utils;
pub mod validation;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::assembler::{Assembler, AssemblerStage, AssemblyInputs, Repair};
    pub use crate::blueprint::{phases, BlueprintPipeline};
    pub use crate::config::RunConfig;
    pub use crate::core::{
        Artifact, MechanicPlan, MergedResults, PhaseOutcome, Plan, ScenePlan, WorkResult,
        WorkStatus,
    };
    pub use crate::errors::{
        BlueprintflowError, ContractErrorInfo, EngineError, PipelineValidationError, PlanError,
        StageError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::{init_tracing, LogConfig, LogFormat};
    pub use crate::pipeline::{
        Decision, DispatchItem, DispatchSet, Engine, EngineBuilder, FanOut, FanOutRouter,
        FnRouter, MergeStage, RetryGate, RetryPolicy, RetryTarget, Route, Router, RunOutcome,
    };
    pub use crate::stages::{FnStage, FnWorker, NoOpStage, Stage, Worker};
    pub use crate::state::{SharedState, StateUpdate};
    pub use crate::validation::{Issue, RuleSet, Severity, ValidationResult, Validator};
}
