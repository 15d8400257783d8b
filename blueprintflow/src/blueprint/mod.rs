//! The blueprint pipeline.
//!
//! Wires caller-supplied generators into the full graph:
//!
//! ```text
//! plan --gate--> enter_content --fan-out--> merge_content --gate-->
//! enter_assets --fan-out--> merge_assets --gate-->
//! enter_interactions --fan-out--> merge_interactions --gate--> assemble
//! ```
//!
//! A fan-out phase with nothing to dispatch is skipped. Every gate either
//! retries its phase within budget or proceeds, so a run always reaches
//! `assemble`. It is also the engine's terminal stage, so a run cut short by
//! `max_steps` still assembles what it has.

mod planners;
mod validators;

pub use planners::{DiagramFanOut, InteractionFanOut, MechanicFanOut};
pub use validators::{PhaseCoverageValidator, PlanValidator};

use crate::assembler::{Assembler, AssemblerStage};
use crate::config::RunConfig;
use crate::errors::{BlueprintflowError, PipelineValidationError};
use crate::events::{EventSink, NoOpEventSink};
use crate::pipeline::{
    Engine, EngineBuilder, FanOut, FanOutRouter, MergeStage, RetryGate, RetryTarget, RunOutcome,
};
use crate::stages::{NoOpStage, Stage, Worker};
use crate::state::SharedState;
use std::fmt;
use std::sync::Arc;

/// Phase names.
pub mod phases {
    /// Plan generation.
    pub const PLAN: &str = "plan";
    /// Per-mechanic content.
    pub const CONTENT: &str = "content";
    /// Per-scene diagram assets.
    pub const ASSETS: &str = "assets";
    /// Per-scene interaction design.
    pub const INTERACTIONS: &str = "interactions";
}

/// Stage names registered by [`BlueprintPipeline`].
pub mod stage_names {
    /// Opens the content phase.
    pub const ENTER_CONTENT: &str = "enter_content";
    /// Merges content results.
    pub const MERGE_CONTENT: &str = "merge_content";
    /// Opens the assets phase.
    pub const ENTER_ASSETS: &str = "enter_assets";
    /// Merges asset results.
    pub const MERGE_ASSETS: &str = "merge_assets";
    /// Opens the interactions phase.
    pub const ENTER_INTERACTIONS: &str = "enter_interactions";
    /// Merges interaction results.
    pub const MERGE_INTERACTIONS: &str = "merge_interactions";
    /// Terminal assembly.
    pub const ASSEMBLE: &str = "assemble";
}

use stage_names::{
    ASSEMBLE, ENTER_ASSETS, ENTER_CONTENT, ENTER_INTERACTIONS, MERGE_ASSETS, MERGE_CONTENT,
    MERGE_INTERACTIONS,
};

/// Builder for the blueprint pipeline.
///
/// The three workers are registered under their own names, which must be
/// distinct.
pub struct BlueprintPipeline {
    planner: Arc<dyn Stage>,
    content: Arc<dyn Worker>,
    assets: Arc<dyn Worker>,
    interactions: Arc<dyn Worker>,
    assembler: Assembler,
    config: RunConfig,
    event_sink: Arc<dyn EventSink>,
}

impl fmt::Debug for BlueprintPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlueprintPipeline")
            .field("planner", &self.planner.name())
            .field("content", &self.content.name())
            .field("assets", &self.assets.name())
            .field("interactions", &self.interactions.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BlueprintPipeline {
    /// Creates the pipeline from its generators.
    pub fn new(
        planner: Arc<dyn Stage>,
        content: Arc<dyn Worker>,
        assets: Arc<dyn Worker>,
        interactions: Arc<dyn Worker>,
    ) -> Self {
        Self {
            planner,
            content,
            assets,
            interactions,
            assembler: Assembler::new(),
            config: RunConfig::default(),
            event_sink: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the run configuration.
    #[must_use]
    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Replaces the assembler.
    #[must_use]
    pub fn with_assembler(mut self, assembler: Assembler) -> Self {
        self.assembler = assembler;
        self
    }

    /// Builds the engine.
    ///
    /// # Errors
    ///
    /// Returns an error if a generator name collides with a pipeline stage
    /// or another generator, or if the config is invalid.
    pub fn build(self) -> Result<Engine, PipelineValidationError> {
        let plan_stage = self.planner.name().to_string();
        let policy = |phase: &str| self.config.retry_policy(phase);

        let plan_gate = RetryGate::new(
            "plan_gate",
            phases::PLAN,
            Arc::new(PlanValidator),
            RetryTarget::Stage(plan_stage.clone()),
            ENTER_CONTENT,
        )
        .with_policy(policy(phases::PLAN));

        let mut builder = EngineBuilder::new("blueprint")
            .with_config(self.config.clone())
            .with_event_sink(Arc::clone(&self.event_sink))
            .stage(Arc::clone(&self.planner))?
            .route(plan_stage, Arc::new(plan_gate))?;

        let fan_outs: [(&str, &str, &str, &str, Arc<dyn FanOut>, &Arc<dyn Worker>); 3] = [
            (phases::CONTENT, ENTER_CONTENT, MERGE_CONTENT, ENTER_ASSETS, Arc::new(MechanicFanOut), &self.content),
            (phases::ASSETS, ENTER_ASSETS, MERGE_ASSETS, ENTER_INTERACTIONS, Arc::new(DiagramFanOut), &self.assets),
            (
                phases::INTERACTIONS,
                ENTER_INTERACTIONS,
                MERGE_INTERACTIONS,
                ASSEMBLE,
                Arc::new(InteractionFanOut),
                &self.interactions,
            ),
        ];

        for (phase, enter, merge_stage, next, planner, worker) in fan_outs {
            let fan_out = FanOutRouter::new(
                format!("{phase}_fanout"),
                phase,
                worker.name(),
                merge_stage,
                Arc::clone(&planner),
                next,
            );
            let gate = RetryGate::new(
                format!("{phase}_gate"),
                phase,
                Arc::new(PhaseCoverageValidator::new(phase, Arc::clone(&planner))),
                RetryTarget::Redispatch {
                    worker: worker.name().to_string(),
                    merge_stage: merge_stage.to_string(),
                    planner,
                },
                next,
            )
            .with_policy(policy(phase));

            builder = builder
                .stage(Arc::new(NoOpStage::new(enter)))?
                .route(enter, Arc::new(fan_out))?
                .stage(Arc::new(MergeStage::new(merge_stage, phase)))?
                .route(merge_stage, Arc::new(gate))?
                .worker(Arc::clone(worker))?;
        }

        builder
            .stage(Arc::new(AssemblerStage::new(ASSEMBLE, self.assembler)))?
            .terminal(ASSEMBLE)
            .build()
    }

    /// Builds the engine and runs it for `question`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the graph cannot be built or started.
    pub async fn run(self, question: impl Into<String>) -> Result<RunOutcome, BlueprintflowError> {
        let engine = self.build()?;
        Ok(engine.run(SharedState::new(question)).await?)
    }
}
