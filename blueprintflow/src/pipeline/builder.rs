//! Engine builder with graph validation.

use super::engine::Engine;
use super::routing::{Decision, FnRouter, Router};
use crate::config::RunConfig;
use crate::errors::{ContractErrorInfo, PipelineValidationError};
use crate::events::{EventSink, NoOpEventSink};
use crate::stages::{Stage, Worker};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Builder for creating validated engines.
///
/// Stages and workers are registered by name. Routers attach to a stage and
/// run after it; a stage without a router ends its branch. References
/// between names are checked when [`EngineBuilder::build`] runs, so loops
/// back to earlier stages can be declared in any order.
pub struct EngineBuilder {
    name: String,
    stages: HashMap<String, Arc<dyn Stage>>,
    stage_order: Vec<String>,
    workers: HashMap<String, Arc<dyn Worker>>,
    routers: HashMap<String, Arc<dyn Router>>,
    edges: Vec<(String, String)>,
    terminal: Option<String>,
    config: RunConfig,
    event_sink: Arc<dyn EventSink>,
}

impl fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("name", &self.name)
            .field("stages", &self.stage_order)
            .field("workers", &self.workers.keys().collect::<Vec<_>>())
            .field("routers", &self.routers.keys().collect::<Vec<_>>())
            .field("edges", &self.edges)
            .field("terminal", &self.terminal)
            .finish_non_exhaustive()
    }
}

fn duplicate(kind: &str, name: &str) -> PipelineValidationError {
    PipelineValidationError::new(format!("Duplicate {kind} '{name}'"))
        .with_stages(vec![name.to_string()])
        .with_error_info(
            ContractErrorInfo::new(
                "CONTRACT-004-DUPLICATE",
                format!("{kind} '{name}' is registered twice"),
            )
            .with_context_entry("kind", kind)
            .with_fix_hint("Give every stage, worker and router a unique name."),
        )
}

fn unknown_stage(referrer: &str, target: &str) -> PipelineValidationError {
    PipelineValidationError::new(format!(
        "'{referrer}' references unknown stage '{target}'"
    ))
    .with_stages(vec![referrer.to_string(), target.to_string()])
    .with_error_info(
        ContractErrorInfo::new(
            "CONTRACT-004-UNKNOWN_STAGE",
            format!("Stage '{target}' not found"),
        )
        .with_fix_hint("Register the stage with `.stage(...)` before building."),
    )
}

impl EngineBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: HashMap::new(),
            stage_order: Vec::new(),
            workers: HashMap::new(),
            routers: HashMap::new(),
            edges: Vec::new(),
            terminal: None,
            config: RunConfig::default(),
            event_sink: Arc::new(NoOpEventSink),
        }
    }

    /// Registers a stage under its own name.
    ///
    /// # Errors
    ///
    /// Returns an error if a stage with the same name exists.
    pub fn stage(mut self, stage: Arc<dyn Stage>) -> Result<Self, PipelineValidationError> {
        let name = stage.name().to_string();
        if self.stages.contains_key(&name) {
            return Err(duplicate("stage", &name));
        }
        self.stage_order.push(name.clone());
        self.stages.insert(name, stage);
        Ok(self)
    }

    /// Registers a worker under its own name.
    ///
    /// # Errors
    ///
    /// Returns an error if a worker with the same name exists.
    pub fn worker(mut self, worker: Arc<dyn Worker>) -> Result<Self, PipelineValidationError> {
        let name = worker.name().to_string();
        if self.workers.contains_key(&name) {
            return Err(duplicate("worker", &name));
        }
        self.workers.insert(name, worker);
        Ok(self)
    }

    /// Attaches a router to a stage.
    ///
    /// # Errors
    ///
    /// Returns an error if the stage already has a router.
    pub fn route(
        mut self,
        stage: impl Into<String>,
        router: Arc<dyn Router>,
    ) -> Result<Self, PipelineValidationError> {
        let stage = stage.into();
        if self.routers.contains_key(&stage) {
            return Err(duplicate("router for stage", &stage));
        }
        self.routers.insert(stage, router);
        Ok(self)
    }

    /// Adds a static edge: `to` always runs after `from`.
    ///
    /// # Errors
    ///
    /// Returns an error if `from` already has a router.
    pub fn edge(
        self,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Result<Self, PipelineValidationError> {
        let from = from.into();
        let to = to.into();
        let target = to.clone();
        let mut builder = self.route(
            from.clone(),
            Arc::new(FnRouter::new(format!("{from}->{to}"), move |_| {
                Decision::next(target.clone())
            })),
        )?;
        builder.edges.push((from, to));
        Ok(builder)
    }

    /// Names the stage that still runs when a run hits `max_steps`.
    ///
    /// It runs for one extra step over the state reached so far; its router
    /// is not consulted.
    #[must_use]
    pub fn terminal(mut self, stage: impl Into<String>) -> Self {
        self.terminal = Some(stage.into());
        self
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

    /// Returns the engine name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Builds the engine.
    ///
    /// # Errors
    ///
    /// Returns an error if there are no stages, the config is invalid, an
    /// edge, router, entry or the terminal stage names an unknown stage.
    pub fn build(self) -> Result<Engine, PipelineValidationError> {
        if self.stages.is_empty() {
            return Err(PipelineValidationError::new("Pipeline has no stages")
                .with_error_info(
                    ContractErrorInfo::new("CONTRACT-004-EMPTY", "Cannot build an empty pipeline")
                        .with_fix_hint("Add at least one stage to the pipeline before building."),
                ));
        }

        if let Err(err) = self.config.validate() {
            return Err(PipelineValidationError::new(err.to_string()).with_error_info(
                ContractErrorInfo::new("CONTRACT-004-CONFIG", "Invalid run configuration")
                    .with_fix_hint("Fix the reported value in the run configuration."),
            ));
        }

        for (from, to) in &self.edges {
            if !self.stages.contains_key(to) {
                return Err(unknown_stage(from, to));
            }
        }

        for stage in self.routers.keys() {
            if !self.stages.contains_key(stage) {
                return Err(unknown_stage("router", stage));
            }
        }

        if let Some(terminal) = &self.terminal {
            if !self.stages.contains_key(terminal) {
                return Err(unknown_stage("terminal", terminal));
            }
        }

        for entry in &self.config.entry {
            if !self.stages.contains_key(entry) {
                return Err(PipelineValidationError::new(format!("Unknown entry stage '{entry}'"))
                    .with_stages(vec![entry.clone()])
                    .with_error_info(
                        ContractErrorInfo::new(
                            "CONTRACT-004-UNKNOWN_ENTRY",
                            format!("Entry stage '{entry}' not found"),
                        )
                        .with_fix_hint("Use the name of a registered stage as the entry point."),
                    ));
            }
        }

        Ok(Engine::new(
            self.name,
            self.stages,
            self.stage_order,
            self.workers,
            self.routers,
            self.terminal,
            self.config,
            self.event_sink,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::NoOpStage;

    fn noop(name: &str) -> Arc<dyn Stage> {
        Arc::new(NoOpStage::new(name))
    }

    #[test]
    fn test_empty_builder_fails() {
        let err = EngineBuilder::new("empty").build().unwrap_err();
        assert_eq!(err.code(), Some("CONTRACT-004-EMPTY"));
    }

    #[test]
    fn test_duplicate_stage_fails() {
        let err = EngineBuilder::new("dup")
            .stage(noop("a"))
            .unwrap()
            .stage(noop("a"))
            .unwrap_err();
        assert_eq!(err.code(), Some("CONTRACT-004-DUPLICATE"));
        assert_eq!(err.stages, vec!["a"]);
    }

    #[test]
    fn test_edge_to_unknown_stage_fails_at_build() {
        let err = EngineBuilder::new("edges")
            .stage(noop("a"))
            .unwrap()
            .edge("a", "ghost")
            .unwrap()
            .build()
            .unwrap_err();
        assert_eq!(err.code(), Some("CONTRACT-004-UNKNOWN_STAGE"));
    }

    #[test]
    fn test_second_router_on_stage_fails() {
        let err = EngineBuilder::new("routes")
            .stage(noop("a"))
            .unwrap()
            .stage(noop("b"))
            .unwrap()
            .edge("a", "b")
            .unwrap()
            .edge("a", "b")
            .unwrap_err();
        assert_eq!(err.code(), Some("CONTRACT-004-DUPLICATE"));
    }

    #[test]
    fn test_unknown_entry_fails() {
        let err = EngineBuilder::new("entry")
            .stage(noop("a"))
            .unwrap()
            .with_config(RunConfig::new().with_entry("zzz"))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), Some("CONTRACT-004-UNKNOWN_ENTRY"));
    }

    #[test]
    fn test_invalid_config_fails() {
        let err = EngineBuilder::new("config")
            .stage(noop("a"))
            .unwrap()
            .with_config(RunConfig::new().with_max_concurrency(0))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), Some("CONTRACT-004-CONFIG"));
    }

    #[test]
    fn test_unknown_terminal_fails() {
        let err = EngineBuilder::new("terminal")
            .stage(noop("a"))
            .unwrap()
            .terminal("finish")
            .build()
            .unwrap_err();
        assert_eq!(err.code(), Some("CONTRACT-004-UNKNOWN_STAGE"));
        assert_eq!(err.stages, vec!["terminal", "finish"]);
    }

    #[test]
    fn test_forward_edges_allowed() {
        let engine = EngineBuilder::new("loop")
            .edge("a", "b")
            .unwrap()
            .stage(noop("a"))
            .unwrap()
            .stage(noop("b"))
            .unwrap()
            .edge("b", "a")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(engine.name(), "loop");
        assert_eq!(engine.stage_names(), ["a", "b"]);
    }
}
