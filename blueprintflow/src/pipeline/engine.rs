//! The superstep execution engine.
//!
//! A run proceeds in steps. Every task pending in a step (a stage
//! invocation or a dispatch) reads the same snapshot of the state. Once they
//! have all settled, their updates are applied in frontier order, then the
//! routers of the completed stages are consulted in the same order against
//! the updated state. Their routes form the next step's frontier.

use super::dispatcher::{panic_message, Dispatcher};
use super::routing::{Decision, DispatchSet, Route, Router};
use crate::config::RunConfig;
use crate::core::{PhaseError, PhaseErrorKind, PhaseOutcome, WorkResult};
use crate::errors::{EngineError, StageError};
use crate::events::{names, EventSink, PipelineEvent};
use crate::observability::{stage_span, SpanTimer};
use crate::stages::{Stage, Worker};
use crate::state::{SharedState, StateUpdate};
use crate::utils::generate_run_id;
use futures::future::join_all;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

/// Name recorded on engine-level phase errors.
pub const ENGINE_STAGE: &str = "engine";

/// Result of a run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Run id.
    pub run_id: Uuid,
    /// Final state.
    pub state: SharedState,
    /// Steps executed.
    pub steps: usize,
    /// Wall time in milliseconds.
    pub duration_ms: f64,
    /// True if the run was stopped by `max_steps`.
    pub step_limit_hit: bool,
}

impl RunOutcome {
    /// The assembled artifact, if the run reached assembly.
    #[must_use]
    pub fn artifact(&self) -> Option<&crate::core::Artifact> {
        self.state.artifact()
    }
}

#[derive(Debug, Clone)]
enum Task {
    Stage(String),
    Dispatch(DispatchSet),
}

enum Settled {
    Stage(String, StateUpdate),
    Dispatch(DispatchSet, StateUpdate),
}

/// An executable pipeline graph.
pub struct Engine {
    name: String,
    stages: HashMap<String, Arc<dyn Stage>>,
    stage_order: Vec<String>,
    workers: HashMap<String, Arc<dyn Worker>>,
    routers: HashMap<String, Arc<dyn Router>>,
    terminal: Option<String>,
    config: RunConfig,
    dispatcher: Dispatcher,
    event_sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("name", &self.name)
            .field("stages", &self.stage_order)
            .field("terminal", &self.terminal)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub(crate) fn new(
        name: String,
        stages: HashMap<String, Arc<dyn Stage>>,
        stage_order: Vec<String>,
        workers: HashMap<String, Arc<dyn Worker>>,
        routers: HashMap<String, Arc<dyn Router>>,
        terminal: Option<String>,
        config: RunConfig,
        event_sink: Arc<dyn EventSink>,
    ) -> Self {
        let mut dispatcher = Dispatcher::new(config.max_concurrency);
        if let Some(timeout) = config.worker_timeout() {
            dispatcher = dispatcher.with_worker_timeout(timeout);
        }
        Self {
            name,
            stages,
            stage_order,
            workers,
            routers,
            terminal,
            config,
            dispatcher,
            event_sink,
        }
    }

    /// Returns the engine name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the stage names in registration order.
    #[must_use]
    pub fn stage_names(&self) -> &[String] {
        &self.stage_order
    }

    /// Returns the run configuration.
    #[must_use]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Returns the stage that runs once more when `max_steps` is hit.
    #[must_use]
    pub fn terminal(&self) -> Option<&str> {
        self.terminal.as_deref()
    }

    /// Runs from the configured entry (or the first registered stage).
    ///
    /// # Errors
    ///
    /// Returns an error only if no valid entry stage exists. Stage failures
    /// are recorded in the returned state.
    pub async fn run(&self, initial: SharedState) -> Result<RunOutcome, EngineError> {
        let entries: Vec<String> = if self.config.entry.is_empty() {
            self.stage_order.first().cloned().into_iter().collect()
        } else {
            self.config.entry.clone()
        };
        self.run_from(&entries, initial).await
    }

    /// Runs from an explicit set of entry stages, all in the first step.
    ///
    /// # Errors
    ///
    /// Returns an error if `entries` is empty or names an unknown stage.
    pub async fn run_from(
        &self,
        entries: &[String],
        initial: SharedState,
    ) -> Result<RunOutcome, EngineError> {
        if entries.is_empty() {
            return Err(EngineError::NoEntry(self.name.clone()));
        }
        if let Some(unknown) = entries.iter().find(|e| !self.stages.contains_key(*e)) {
            return Err(EngineError::UnknownEntry(unknown.clone()));
        }

        let run_id = generate_run_id();
        let timer = SpanTimer::start(&self.name);
        let mut state = Arc::new(initial);
        let mut frontier: Vec<Task> = dedup(entries.iter().cloned().map(Task::Stage).collect());
        let mut steps = 0_usize;
        let mut step_limit_hit = false;
        let mut finishing = false;
        let mut terminal_ran = false;

        tracing::info!(pipeline = %self.name, run_id = %run_id, entries = ?entries, "Pipeline started");
        self.emit(names::PIPELINE_STARTED, run_id, json!({"pipeline": self.name, "entries": entries}));

        while !frontier.is_empty() {
            if !finishing && steps >= self.config.max_steps {
                step_limit_hit = true;
                let pending: Vec<String> = frontier.iter().map(task_label).collect();
                tracing::error!(
                    pipeline = %self.name,
                    max_steps = self.config.max_steps,
                    pending = ?pending,
                    terminal = ?self.terminal,
                    "Step limit reached, stopping run"
                );
                Arc::make_mut(&mut state).apply(
                    StateUpdate::new()
                        .with_phase_error(PhaseError::new(
                            ENGINE_STAGE,
                            PhaseErrorKind::StepLimit,
                            format!(
                                "step limit of {} reached with pending tasks: {}",
                                self.config.max_steps,
                                pending.join(", ")
                            ),
                        ))
                        .degraded(),
                );
                let Some(terminal) = self.terminal.as_ref().filter(|_| !terminal_ran) else {
                    break;
                };
                frontier = vec![Task::Stage(terminal.clone())];
                finishing = true;
            }
            steps += 1;

            let snapshot = Arc::clone(&state);
            let settled = join_all(
                frontier
                    .drain(..)
                    .map(|task| self.run_task(task, Arc::clone(&snapshot), run_id, steps)),
            )
            .await;
            drop(snapshot);

            let mut completed = Vec::with_capacity(settled.len());
            {
                let state = Arc::make_mut(&mut state);
                for outcome in settled {
                    match outcome {
                        Settled::Stage(name, update) => {
                            terminal_ran |= self.terminal.as_ref() == Some(&name);
                            state.apply(update);
                            completed.push(Task::Stage(name));
                        }
                        Settled::Dispatch(set, update) => {
                            state.apply(update);
                            completed.push(Task::Dispatch(set));
                        }
                    }
                }
            }

            if finishing {
                break;
            }

            let mut next = Vec::new();
            let mut backoff = Duration::ZERO;
            for task in completed {
                match task {
                    Task::Stage(name) => {
                        let Some(router) = self.routers.get(&name) else {
                            tracing::debug!(stage = %name, "No router, branch ends");
                            continue;
                        };
                        let decision = router.decide(&state);
                        let delay = self.follow(&name, router.name(), decision, &mut state, &mut next, run_id);
                        backoff = backoff.max(delay);
                    }
                    Task::Dispatch(set) => {
                        let merge_stage = set.merge_stage.clone();
                        self.schedule(&set.worker, Route::Next(merge_stage), &mut state, &mut next);
                    }
                }
            }
            frontier = dedup(next);

            // One wait per step, however many gates retry in it.
            if !backoff.is_zero() && !frontier.is_empty() {
                tracing::debug!(step = steps, delay_ms = millis(backoff), "Backing off before retry");
                tokio::time::sleep(backoff).await;
            }
        }

        let duration_ms = timer.finish();
        let state = Arc::try_unwrap(state).unwrap_or_else(|shared| (*shared).clone());

        tracing::info!(
            pipeline = %self.name,
            run_id = %run_id,
            steps,
            duration_ms,
            degraded = state.is_degraded(),
            phase_errors = state.phase_errors().len(),
            "Pipeline completed"
        );
        self.emit(
            names::PIPELINE_COMPLETED,
            run_id,
            json!({
                "pipeline": self.name,
                "steps": steps,
                "duration_ms": duration_ms,
                "degraded": state.is_degraded(),
                "step_limit_hit": step_limit_hit,
            }),
        );

        Ok(RunOutcome {
            run_id,
            state,
            steps,
            duration_ms,
            step_limit_hit,
        })
    }

    async fn run_task(&self, task: Task, snapshot: Arc<SharedState>, run_id: Uuid, step: usize) -> Settled {
        match task {
            Task::Stage(name) => {
                let update = match self.stages.get(&name) {
                    Some(stage) => {
                        self.run_stage(Arc::clone(stage), snapshot, run_id)
                            .instrument(stage_span(&name, run_id, step))
                            .await
                    }
                    None => StateUpdate::new().with_phase_error(PhaseError::new(
                        &name,
                        PhaseErrorKind::UnknownRoute,
                        format!("stage '{name}' is not registered"),
                    )),
                };
                Settled::Stage(name, update)
            }
            Task::Dispatch(set) => {
                let update = self.run_dispatch(&set, run_id).await;
                Settled::Dispatch(set, update)
            }
        }
    }

    async fn run_stage(&self, stage: Arc<dyn Stage>, snapshot: Arc<SharedState>, run_id: Uuid) -> StateUpdate {
        let name = stage.name().to_string();
        let timeout = self.config.stage_timeout();
        let timer = SpanTimer::start(&name);

        tracing::debug!(stage = %name, "Stage started");
        self.emit(names::STAGE_STARTED, run_id, json!({"stage": name}));

        let handle = tokio::spawn(async move {
            let stage_name = stage.name().to_string();
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, stage.run(&snapshot)).await {
                    Ok(result) => result,
                    Err(_) => Err(StageError::Timeout {
                        stage: stage_name,
                        timeout_ms: millis(limit),
                    }),
                },
                None => stage.run(&snapshot).await,
            }
        });

        let result = match handle.await {
            Ok(result) => result,
            Err(join_err) => Err(StageError::Panicked {
                stage: name.clone(),
                message: panic_message(join_err),
            }),
        };
        let duration_ms = timer.finish();

        match result {
            Ok(update) => {
                tracing::debug!(stage = %name, duration_ms, "Stage completed");
                self.emit(
                    names::STAGE_COMPLETED,
                    run_id,
                    json!({"stage": name, "duration_ms": duration_ms}),
                );
                update
            }
            Err(err) => {
                let kind = if err.is_timeout() {
                    PhaseErrorKind::Timeout
                } else if matches!(err, StageError::Panicked { .. }) {
                    PhaseErrorKind::Panicked
                } else {
                    PhaseErrorKind::Failed
                };
                tracing::warn!(stage = %name, error = %err, duration_ms, "Stage failed");
                self.emit(
                    names::STAGE_FAILED,
                    run_id,
                    json!({"stage": name, "error": err.to_string(), "duration_ms": duration_ms}),
                );
                StateUpdate::new().with_phase_error(PhaseError::new(&name, kind, err.to_string()))
            }
        }
    }

    async fn run_dispatch(&self, set: &DispatchSet, run_id: Uuid) -> StateUpdate {
        self.emit(
            names::DISPATCH_STARTED,
            run_id,
            json!({"phase": set.phase, "worker": set.worker, "items": set.len()}),
        );

        let (results, update) = match self.workers.get(&set.worker) {
            Some(worker) => (self.dispatcher.dispatch(Arc::clone(worker), set).await, StateUpdate::new()),
            None => {
                tracing::error!(worker = %set.worker, phase = %set.phase, "Dispatch to unregistered worker");
                let message = format!("worker '{}' is not registered", set.worker);
                let results = set
                    .items
                    .iter()
                    .map(|item| WorkResult::failed(&item.key, &message, item.attempt))
                    .collect();
                let error = PhaseError::new(&set.worker, PhaseErrorKind::UnknownRoute, &message);
                (results, StateUpdate::new().with_phase_error(error))
            }
        };

        let succeeded = results.iter().filter(|r: &&WorkResult| r.is_success()).count();
        self.emit(
            names::DISPATCH_COMPLETED,
            run_id,
            json!({
                "phase": set.phase,
                "succeeded": succeeded,
                "failed": results.len() - succeeded,
            }),
        );

        update.with_raw_results(&set.phase, results)
    }

    /// Applies a decision and schedules its routes. Returns the backoff the
    /// decision asks for before its retry round.
    fn follow(
        &self,
        stage: &str,
        router: &str,
        decision: Decision,
        state: &mut Arc<SharedState>,
        next: &mut Vec<Task>,
        run_id: Uuid,
    ) -> Duration {
        let Decision {
            routes,
            effects,
            retry_round,
        } = decision;

        for closed in &effects.closed_phases {
            let event = match closed.outcome {
                PhaseOutcome::Clean => names::GATE_CLEAN,
                PhaseOutcome::Degraded => names::GATE_DEGRADED,
                PhaseOutcome::Skipped => continue,
            };
            self.emit(
                event,
                run_id,
                json!({"phase": closed.phase, "router": router, "score": closed.score}),
            );
        }

        if !effects.is_empty() {
            Arc::make_mut(state).apply(effects);
        }

        let delay = retry_round.map_or(Duration::ZERO, |round| {
            self.emit(names::GATE_RETRY, run_id, json!({"stage": stage, "router": router, "round": round}));
            self.config.retry_backoff.delay_for(round)
        });

        tracing::debug!(
            stage,
            router,
            routes = ?routes.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "Routing"
        );

        for route in routes {
            self.schedule(router, route, state, next);
        }
        delay
    }

    fn schedule(&self, referrer: &str, route: Route, state: &mut Arc<SharedState>, next: &mut Vec<Task>) {
        match route {
            Route::Next(stage) if self.stages.contains_key(&stage) => next.push(Task::Stage(stage)),
            Route::Next(stage) => {
                tracing::error!(referrer, stage = %stage, "Route to unregistered stage");
                Arc::make_mut(state).apply(StateUpdate::new().with_phase_error(PhaseError::new(
                    referrer,
                    PhaseErrorKind::UnknownRoute,
                    format!("route to unregistered stage '{stage}'"),
                )));
            }
            Route::Dispatch(set) => next.push(Task::Dispatch(set)),
            Route::End => {}
        }
    }

    fn emit(&self, event_type: &str, run_id: Uuid, data: serde_json::Value) {
        self.event_sink.try_emit(PipelineEvent::new(event_type, run_id, data));
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn task_label(task: &Task) -> String {
    match task {
        Task::Stage(name) => name.clone(),
        Task::Dispatch(set) => format!("dispatch({})", set.phase),
    }
}

/// Collapses repeated stage invocations within one step.
fn dedup(tasks: Vec<Task>) -> Vec<Task> {
    let mut seen = HashSet::new();
    tasks
        .into_iter()
        .filter(|task| match task {
            Task::Stage(name) => seen.insert(name.clone()),
            Task::Dispatch(_) => true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::pipeline::{DispatchItem, EngineBuilder, FnRouter, MergeStage, RetryBackoff};
    use crate::stages::{FnStage, NoOpStage};
    use crate::testing::{RecordingStage, ScriptedWorker, SlowStage};
    use pretty_assertions::assert_eq;

    fn noop(name: &str) -> Arc<dyn Stage> {
        Arc::new(NoOpStage::new(name))
    }

    #[tokio::test]
    async fn test_linear_pipeline_runs_in_order() {
        let a = Arc::new(RecordingStage::new("a"));
        let b = Arc::new(RecordingStage::new("b"));
        let engine = EngineBuilder::new("linear")
            .stage(a.clone())
            .unwrap()
            .stage(b.clone())
            .unwrap()
            .edge("a", "b")
            .unwrap()
            .build()
            .unwrap();

        let outcome = engine.run(SharedState::new("q")).await.unwrap();
        assert_eq!(outcome.steps, 2);
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 1);
        assert!(outcome.state.phase_errors().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_entry_is_an_error() {
        let engine = EngineBuilder::new("e").stage(noop("a")).unwrap().build().unwrap();
        let err = engine
            .run_from(&["zzz".to_string()], SharedState::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownEntry(name) if name == "zzz"));

        let err = engine.run_from(&[], SharedState::default()).await.unwrap_err();
        assert!(matches!(err, EngineError::NoEntry(_)));
    }

    #[tokio::test]
    async fn test_stage_error_is_recorded_and_run_continues() {
        let failing = Arc::new(FnStage::new("failing", |_: &SharedState| {
            Err(StageError::failed("generator unavailable"))
        }));
        let after = Arc::new(RecordingStage::new("after"));
        let engine = EngineBuilder::new("errors")
            .stage(failing)
            .unwrap()
            .stage(after.clone())
            .unwrap()
            .edge("failing", "after")
            .unwrap()
            .build()
            .unwrap();

        let outcome = engine.run(SharedState::new("q")).await.unwrap();
        let errors = outcome.state.phase_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].stage, "failing");
        assert_eq!(errors[0].kind, PhaseErrorKind::Failed);
        assert_eq!(after.calls(), 1);
    }

    #[tokio::test]
    async fn test_stage_panic_is_recorded() {
        let panicking = Arc::new(FnStage::new("boom", |_: &SharedState| -> Result<StateUpdate, StageError> {
            panic!("stage exploded")
        }));
        let engine = EngineBuilder::new("panic").stage(panicking).unwrap().build().unwrap();

        let outcome = engine.run(SharedState::new("q")).await.unwrap();
        let errors = outcome.state.phase_errors();
        assert_eq!(errors[0].kind, PhaseErrorKind::Panicked);
        assert!(errors[0].message.contains("stage exploded"));
    }

    #[tokio::test]
    async fn test_stage_timeout_is_recorded() {
        let engine = EngineBuilder::new("timeout")
            .stage(Arc::new(SlowStage::new("slow", Duration::from_millis(200))))
            .unwrap()
            .with_config(RunConfig::new().with_stage_timeout_ms(10))
            .build()
            .unwrap();

        let outcome = engine.run(SharedState::new("q")).await.unwrap();
        assert_eq!(outcome.state.phase_errors()[0].kind, PhaseErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_step_limit_stops_runaway_loop() {
        let engine = EngineBuilder::new("loop")
            .stage(noop("a"))
            .unwrap()
            .stage(noop("b"))
            .unwrap()
            .edge("a", "b")
            .unwrap()
            .edge("b", "a")
            .unwrap()
            .with_config(RunConfig::new().with_max_steps(5))
            .build()
            .unwrap();

        let outcome = engine.run(SharedState::new("q")).await.unwrap();
        assert!(outcome.step_limit_hit);
        assert_eq!(outcome.steps, 5);
        let errors = outcome.state.phase_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, PhaseErrorKind::StepLimit);
        assert_eq!(errors[0].stage, ENGINE_STAGE);
    }

    #[tokio::test]
    async fn test_step_limit_still_runs_terminal_stage() {
        let finish = Arc::new(RecordingStage::new("finish"));
        let engine = EngineBuilder::new("loop")
            .stage(noop("a"))
            .unwrap()
            .stage(noop("b"))
            .unwrap()
            .stage(finish.clone())
            .unwrap()
            .edge("a", "b")
            .unwrap()
            .edge("b", "a")
            .unwrap()
            .terminal("finish")
            .with_config(RunConfig::new().with_max_steps(5))
            .build()
            .unwrap();

        let outcome = engine.run(SharedState::new("q")).await.unwrap();
        assert!(outcome.step_limit_hit);
        assert_eq!(outcome.steps, 6);
        assert_eq!(finish.calls(), 1);
        assert!(outcome.state.is_degraded());
        assert_eq!(outcome.state.phase_errors()[0].kind, PhaseErrorKind::StepLimit);
    }

    #[tokio::test]
    async fn test_terminal_stage_is_not_repeated_at_step_limit() {
        let finish = Arc::new(RecordingStage::new("finish"));
        let engine = EngineBuilder::new("loop")
            .stage(finish.clone())
            .unwrap()
            .stage(noop("spin"))
            .unwrap()
            .edge("finish", "spin")
            .unwrap()
            .edge("spin", "spin")
            .unwrap()
            .terminal("finish")
            .with_config(RunConfig::new().with_max_steps(3))
            .build()
            .unwrap();

        let outcome = engine.run(SharedState::new("q")).await.unwrap();
        assert!(outcome.step_limit_hit);
        assert_eq!(outcome.steps, 3);
        assert_eq!(finish.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_stage_timeout_bounds_hung_stage() {
        let engine = EngineBuilder::new("hung")
            .stage(Arc::new(SlowStage::new("slow", Duration::from_secs(24 * 60 * 60))))
            .unwrap()
            .build()
            .unwrap();

        let outcome = engine.run(SharedState::new("q")).await.unwrap();
        let errors = outcome.state.phase_errors();
        assert_eq!(errors[0].kind, PhaseErrorKind::Timeout);
        assert_eq!(errors[0].message, "'slow' timed out after 300000ms");
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_worker_timeout_fails_hung_item() {
        let planner = Arc::new(FnRouter::new("fan", |_: &SharedState| {
            Decision::dispatch(DispatchSet::new("content", "gen", "merge_content").with_items(vec![
                DispatchItem::new("m1", json!({})),
                DispatchItem::new("m2", json!({})),
            ]))
        }));
        let engine = EngineBuilder::new("hung")
            .stage(noop("start"))
            .unwrap()
            .stage(Arc::new(MergeStage::new("merge_content", "content")))
            .unwrap()
            .worker(Arc::new(ScriptedWorker::new("gen").hang_on("m1")))
            .unwrap()
            .route("start", planner)
            .unwrap()
            .build()
            .unwrap();

        let outcome = engine.run(SharedState::new("q")).await.unwrap();
        let merged = outcome.state.merged("content").unwrap();
        assert_eq!(merged.failed_keys().collect::<Vec<_>>(), vec!["m1"]);
        assert_eq!(merged.failures[0].error.as_deref(), Some("'gen' timed out after 120000ms"));
        assert!(merged.success("m2").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrying_gates_in_one_step_wait_once() {
        let retry = |name: &str| -> Arc<dyn Router> {
            Arc::new(FnRouter::new(name, |_: &SharedState| Decision::next("join").with_retry_round(1)))
        };
        let join = Arc::new(RecordingStage::new("join"));
        let sink = Arc::new(CollectingEventSink::new());
        let engine = EngineBuilder::new("backoff")
            .stage(noop("left"))
            .unwrap()
            .stage(noop("right"))
            .unwrap()
            .stage(join.clone())
            .unwrap()
            .route("left", retry("left_gate"))
            .unwrap()
            .route("right", retry("right_gate"))
            .unwrap()
            .with_config(RunConfig::new().with_retry_backoff(RetryBackoff::new(100)))
            .with_event_sink(sink.clone())
            .build()
            .unwrap();

        let started = tokio::time::Instant::now();
        let outcome = engine
            .run_from(&["left".to_string(), "right".to_string()], SharedState::new("q"))
            .await
            .unwrap();
        let waited = started.elapsed();

        assert_eq!(sink.events_of_type(names::GATE_RETRY).len(), 2);
        assert_eq!(join.calls(), 1);
        assert_eq!(outcome.steps, 2);
        assert!(waited >= Duration::from_millis(100), "waited {waited:?}");
        assert!(waited < Duration::from_millis(200), "waited {waited:?}");
    }

    #[tokio::test]
    async fn test_parallel_entries_share_a_step_and_join() {
        let join = Arc::new(RecordingStage::new("join"));
        let engine = EngineBuilder::new("fan-in")
            .stage(noop("left"))
            .unwrap()
            .stage(noop("right"))
            .unwrap()
            .stage(join.clone())
            .unwrap()
            .edge("left", "join")
            .unwrap()
            .edge("right", "join")
            .unwrap()
            .build()
            .unwrap();

        let outcome = engine
            .run_from(&["left".to_string(), "right".to_string()], SharedState::new("q"))
            .await
            .unwrap();
        assert_eq!(outcome.steps, 2);
        assert_eq!(join.calls(), 1);
    }

    #[tokio::test]
    async fn test_parallel_stages_read_same_snapshot() {
        let writer = Arc::new(FnStage::new("writer", |_: &SharedState| {
            Ok(StateUpdate::new().with_field("written", json!(true)))
        }));
        let reader = Arc::new(FnStage::new("reader", |state: &SharedState| {
            Ok(StateUpdate::new().with_field("saw_write", json!(state.field("written").is_some())))
        }));
        let engine = EngineBuilder::new("snapshot")
            .stage(writer)
            .unwrap()
            .stage(reader)
            .unwrap()
            .build()
            .unwrap();

        let outcome = engine
            .run_from(&["writer".to_string(), "reader".to_string()], SharedState::new("q"))
            .await
            .unwrap();
        assert_eq!(outcome.state.field("written"), Some(&json!(true)));
        assert_eq!(outcome.state.field("saw_write"), Some(&json!(false)));
    }

    #[tokio::test]
    async fn test_dispatch_then_merge() {
        let planner = Arc::new(FnRouter::new("fan", |_: &SharedState| {
            Decision::dispatch(
                DispatchSet::new("content", "gen", "merge_content").with_items(vec![
                    DispatchItem::new("m1", json!({})),
                    DispatchItem::new("m2", json!({})),
                    DispatchItem::new("m3", json!({})),
                ]),
            )
            .with_effects(StateUpdate::new().enter_phase("content"))
        }));
        let sink = Arc::new(CollectingEventSink::new());
        let engine = EngineBuilder::new("dispatch")
            .stage(noop("start"))
            .unwrap()
            .stage(Arc::new(MergeStage::new("merge_content", "content")))
            .unwrap()
            .worker(Arc::new(ScriptedWorker::new("gen").always_fail("m2")))
            .unwrap()
            .route("start", planner)
            .unwrap()
            .with_event_sink(sink.clone())
            .build()
            .unwrap();

        let outcome = engine.run(SharedState::new("q")).await.unwrap();
        let merged = outcome.state.merged("content").unwrap();
        assert_eq!(merged.successes.len(), 2);
        assert_eq!(merged.failures.len(), 1);
        assert_eq!(outcome.state.retry_counter("content").unwrap().rounds, 1);
        assert_eq!(outcome.steps, 3);

        let types = sink.event_types();
        assert_eq!(types.first().map(String::as_str), Some(names::PIPELINE_STARTED));
        assert_eq!(types.last().map(String::as_str), Some(names::PIPELINE_COMPLETED));
        assert!(types.iter().any(|t| t == names::DISPATCH_COMPLETED));
    }

    #[tokio::test]
    async fn test_dispatch_to_unknown_worker_fails_items() {
        let planner = Arc::new(FnRouter::new("fan", |_: &SharedState| {
            Decision::dispatch(
                DispatchSet::new("content", "ghost", "merge_content")
                    .with_items(vec![DispatchItem::new("m1", json!({}))]),
            )
        }));
        let engine = EngineBuilder::new("dispatch")
            .stage(noop("start"))
            .unwrap()
            .stage(Arc::new(MergeStage::new("merge_content", "content")))
            .unwrap()
            .route("start", planner)
            .unwrap()
            .build()
            .unwrap();

        let outcome = engine.run(SharedState::new("q")).await.unwrap();
        assert_eq!(outcome.state.merged("content").unwrap().failures.len(), 1);
        assert_eq!(outcome.state.phase_errors()[0].kind, PhaseErrorKind::UnknownRoute);
    }

    #[tokio::test]
    async fn test_route_to_unknown_stage_is_recorded() {
        let router = Arc::new(FnRouter::new("lost", |_: &SharedState| Decision::next("nowhere")));
        let engine = EngineBuilder::new("lost")
            .stage(noop("start"))
            .unwrap()
            .route("start", router)
            .unwrap()
            .build()
            .unwrap();

        let outcome = engine.run(SharedState::new("q")).await.unwrap();
        assert_eq!(outcome.state.phase_errors()[0].kind, PhaseErrorKind::UnknownRoute);
        assert_eq!(outcome.steps, 1);
    }

    #[tokio::test]
    async fn test_router_effects_are_applied() {
        let router = Arc::new(FnRouter::new("mark", |_: &SharedState| {
            Decision::end().with_effects(StateUpdate::new().with_warning("noted").degraded())
        }));
        let engine = EngineBuilder::new("effects")
            .stage(noop("start"))
            .unwrap()
            .route("start", router)
            .unwrap()
            .build()
            .unwrap();

        let outcome = engine.run(SharedState::new("q")).await.unwrap();
        assert_eq!(outcome.state.warnings(), ["noted"]);
        assert!(outcome.state.is_degraded());
    }

    #[test]
    fn test_dedup_collapses_repeated_stages_only() {
        let set = DispatchSet::new("p", "w", "m");
        let tasks = dedup(vec![
            Task::Stage("a".into()),
            Task::Dispatch(set.clone()),
            Task::Stage("a".into()),
            Task::Dispatch(set),
        ]);
        assert_eq!(tasks.len(), 3);
    }
}
