//! Routing: dispatch descriptors, decisions and routers.

use crate::core::PhaseOutcome;
use crate::state::{SharedState, StateUpdate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// One unit of fan-out work.
///
/// The payload is a slice of state built by the router. Workers never see
/// the shared state itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchItem {
    /// Item key; the resulting `WorkResult` carries the same key.
    pub key: String,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Input for the worker.
    pub payload: Value,
}

impl DispatchItem {
    /// Creates a first-attempt item.
    #[must_use]
    pub fn new(key: impl Into<String>, payload: Value) -> Self {
        Self {
            key: key.into(),
            attempt: 1,
            payload,
        }
    }

    /// Sets the attempt number.
    #[must_use]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }
}

/// A fan-out request: run `worker` once per item, then schedule
/// `merge_stage`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchSet {
    /// Phase whose raw results channel receives the results.
    pub phase: String,
    /// Registered worker name.
    pub worker: String,
    /// Stage scheduled once every item has settled.
    pub merge_stage: String,
    /// Items to run.
    pub items: Vec<DispatchItem>,
}

impl DispatchSet {
    /// Creates an empty dispatch set.
    #[must_use]
    pub fn new(
        phase: impl Into<String>,
        worker: impl Into<String>,
        merge_stage: impl Into<String>,
    ) -> Self {
        Self {
            phase: phase.into(),
            worker: worker.into(),
            merge_stage: merge_stage.into(),
            items: Vec::new(),
        }
    }

    /// Sets the items.
    #[must_use]
    pub fn with_items(mut self, items: Vec<DispatchItem>) -> Self {
        self.items = items;
        self
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if there are no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Where control goes after a stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Run the named stage next.
    Next(String),
    /// Fan out, then run the set's merge stage.
    Dispatch(DispatchSet),
    /// End this branch.
    End,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Next(stage) => write!(f, "next({stage})"),
            Self::Dispatch(set) => write!(f, "dispatch({}, {} items)", set.worker, set.len()),
            Self::End => write!(f, "end"),
        }
    }
}

/// A router's answer: routes to follow plus effects the engine applies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decision {
    /// Routes to follow, in order. Empty ends the branch.
    pub routes: Vec<Route>,
    /// State changes the engine applies before following the routes.
    pub effects: StateUpdate,
    /// Set when the routes start retry round `n`; the engine applies backoff.
    pub retry_round: Option<u32>,
}

impl Decision {
    /// Routes to a single stage.
    #[must_use]
    pub fn next(stage: impl Into<String>) -> Self {
        Self {
            routes: vec![Route::Next(stage.into())],
            ..Self::default()
        }
    }

    /// Routes to a dispatch.
    #[must_use]
    pub fn dispatch(set: DispatchSet) -> Self {
        Self {
            routes: vec![Route::Dispatch(set)],
            ..Self::default()
        }
    }

    /// Ends the branch.
    #[must_use]
    pub fn end() -> Self {
        Self {
            routes: vec![Route::End],
            ..Self::default()
        }
    }

    /// Adds another route.
    #[must_use]
    pub fn with_route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    /// Sets the effects.
    #[must_use]
    pub fn with_effects(mut self, effects: StateUpdate) -> Self {
        self.effects = effects;
        self
    }

    /// Marks the decision as starting a retry round.
    #[must_use]
    pub fn with_retry_round(mut self, round: u32) -> Self {
        self.retry_round = Some(round);
        self
    }
}

/// Chooses what runs after a stage.
///
/// Routers are pure: they read the post-update state and return a
/// [`Decision`]. Any state change goes in `Decision::effects`.
#[cfg_attr(test, mockall::automock)]
pub trait Router: Send + Sync {
    /// Returns the router name.
    fn name(&self) -> &str;

    /// Decides the next routes.
    fn decide(&self, state: &SharedState) -> Decision;
}

/// A closure-backed router.
pub struct FnRouter<F>
where
    F: Fn(&SharedState) -> Decision + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnRouter<F>
where
    F: Fn(&SharedState) -> Decision + Send + Sync,
{
    /// Creates a new function-based router.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Router for FnRouter<F>
where
    F: Fn(&SharedState) -> Decision + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn decide(&self, state: &SharedState) -> Decision {
        (self.func)(state)
    }
}

/// Derives dispatch items from the state.
pub trait FanOut: Send + Sync {
    /// Returns the items of the phase, in a stable order.
    fn items(&self, state: &SharedState) -> Vec<DispatchItem>;
}

impl<F> FanOut for F
where
    F: Fn(&SharedState) -> Vec<DispatchItem> + Send + Sync,
{
    fn items(&self, state: &SharedState) -> Vec<DispatchItem> {
        self(state)
    }
}

/// Router that opens a fan-out phase.
///
/// It resets the phase and dispatches every planned item with attempt 1.
/// With nothing to dispatch the phase is closed as skipped and control goes
/// to `on_empty`.
pub struct FanOutRouter {
    name: String,
    phase: String,
    worker: String,
    merge_stage: String,
    planner: Arc<dyn FanOut>,
    on_empty: String,
}

impl FanOutRouter {
    /// Creates a fan-out router.
    pub fn new(
        name: impl Into<String>,
        phase: impl Into<String>,
        worker: impl Into<String>,
        merge_stage: impl Into<String>,
        planner: Arc<dyn FanOut>,
        on_empty: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            phase: phase.into(),
            worker: worker.into(),
            merge_stage: merge_stage.into(),
            planner,
            on_empty: on_empty.into(),
        }
    }
}

impl fmt::Debug for FanOutRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanOutRouter")
            .field("name", &self.name)
            .field("phase", &self.phase)
            .field("worker", &self.worker)
            .field("merge_stage", &self.merge_stage)
            .field("on_empty", &self.on_empty)
            .finish_non_exhaustive()
    }
}

impl Router for FanOutRouter {
    fn name(&self) -> &str {
        &self.name
    }

    fn decide(&self, state: &SharedState) -> Decision {
        let items = self.planner.items(state);
        let effects = StateUpdate::new().enter_phase(&self.phase);

        if items.is_empty() {
            tracing::info!(phase = %self.phase, "Nothing to dispatch, skipping phase");
            return Decision::next(&self.on_empty)
                .with_effects(effects.close_phase(&self.phase, PhaseOutcome::Skipped, 1.0));
        }

        let set = DispatchSet::new(&self.phase, &self.worker, &self.merge_stage).with_items(items);
        Decision::dispatch(set).with_effects(effects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Plan;
    use serde_json::json;

    fn two_items(_: &SharedState) -> Vec<DispatchItem> {
        vec![
            DispatchItem::new("a", json!({})),
            DispatchItem::new("b", json!({})),
        ]
    }

    fn no_items(_: &SharedState) -> Vec<DispatchItem> {
        Vec::new()
    }

    #[test]
    fn test_decision_constructors() {
        assert_eq!(Decision::next("x").routes, vec![Route::Next("x".into())]);
        assert_eq!(Decision::end().routes, vec![Route::End]);
        let decision = Decision::next("a").with_route(Route::Next("b".into()));
        assert_eq!(decision.routes.len(), 2);
        assert!(decision.retry_round.is_none());
    }

    #[test]
    fn test_fan_out_router_dispatches_first_attempts() {
        let router = FanOutRouter::new("enter", "content", "gen", "merge", Arc::new(two_items), "after");
        let decision = router.decide(&SharedState::new("q").with_plan(Plan::new("p")));

        match &decision.routes[..] {
            [Route::Dispatch(set)] => {
                assert_eq!(set.phase, "content");
                assert_eq!(set.merge_stage, "merge");
                assert!(set.items.iter().all(|i| i.attempt == 1));
                assert_eq!(set.len(), 2);
            }
            other => panic!("unexpected routes {other:?}"),
        }

        let mut state = SharedState::new("q");
        state.apply(decision.effects);
        assert!(state.retry_counter("content").is_some());
    }

    #[test]
    fn test_fan_out_router_skips_empty_phase() {
        let router = FanOutRouter::new("enter", "assets", "gen", "merge", Arc::new(no_items), "after");
        let decision = router.decide(&SharedState::new("q"));
        assert_eq!(decision.routes, vec![Route::Next("after".into())]);

        let mut state = SharedState::new("q");
        state.apply(decision.effects);
        let report = state.phase_report("assets").unwrap();
        assert_eq!(report.outcome, PhaseOutcome::Skipped);
        assert_eq!(report.rounds, 0);
    }

    #[test]
    fn test_mock_router() {
        let mut router = MockRouter::new();
        router.expect_name().return_const("mock".to_string());
        router.expect_decide().times(1).returning(|_| Decision::end());

        assert_eq!(router.name(), "mock");
        assert_eq!(router.decide(&SharedState::default()).routes, vec![Route::End]);
    }

    #[test]
    fn test_route_display() {
        let set = DispatchSet::new("p", "w", "m").with_items(vec![DispatchItem::new("a", json!(null))]);
        assert_eq!(Route::Dispatch(set).to_string(), "dispatch(w, 1 items)");
        assert_eq!(Route::Next("x".into()).to_string(), "next(x)");
    }
}
