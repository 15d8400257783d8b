//! Scripted stages and workers for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::core::{Plan, WorkResult};
use crate::errors::StageError;
use crate::pipeline::DispatchItem;
use crate::stages::{Stage, Worker};
use crate::state::{SharedState, StateUpdate};

/// A worker whose failures are scripted per key.
///
/// Successful payloads echo the item: `{"key", "attempt", "input"}`.
#[derive(Debug)]
pub struct ScriptedWorker {
    name: String,
    fail_first: HashMap<String, u32>,
    always_fail: HashSet<String>,
    panic_on: HashSet<String>,
    hang_on: HashSet<String>,
    delay: Option<Duration>,
    calls: Mutex<Vec<(String, u32)>>,
}

impl ScriptedWorker {
    /// Creates a worker that always succeeds.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fail_first: HashMap::new(),
            always_fail: HashSet::new(),
            panic_on: HashSet::new(),
            hang_on: HashSet::new(),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fails `key` while its attempt number is at most `attempts`.
    #[must_use]
    pub fn fail_first(mut self, key: impl Into<String>, attempts: u32) -> Self {
        self.fail_first.insert(key.into(), attempts);
        self
    }

    /// Fails `key` on every attempt.
    #[must_use]
    pub fn always_fail(mut self, key: impl Into<String>) -> Self {
        self.always_fail.insert(key.into());
        self
    }

    /// Panics when processing `key`.
    #[must_use]
    pub fn panic_on(mut self, key: impl Into<String>) -> Self {
        self.panic_on.insert(key.into());
        self
    }

    /// Never returns when processing `key`.
    #[must_use]
    pub fn hang_on(mut self, key: impl Into<String>) -> Self {
        self.hang_on.insert(key.into());
        self
    }

    /// Sleeps before every item.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every `(key, attempt)` processed, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<(String, u32)> {
        self.calls.lock().clone()
    }

    /// Number of items processed.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Number of times `key` was processed.
    #[must_use]
    pub fn calls_for(&self, key: &str) -> usize {
        self.calls.lock().iter().filter(|(k, _)| k == key).count()
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn work(&self, item: DispatchItem) -> Result<WorkResult, StageError> {
        self.calls.lock().push((item.key.clone(), item.attempt));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.hang_on.contains(&item.key) {
            std::future::pending::<()>().await;
        }
        assert!(
            !self.panic_on.contains(&item.key),
            "scripted panic for '{}'",
            item.key
        );

        let scripted = self.fail_first.get(&item.key).is_some_and(|n| item.attempt <= *n);
        if scripted || self.always_fail.contains(&item.key) {
            return Err(StageError::failed(format!(
                "scripted failure for '{}' on attempt {}",
                item.key, item.attempt
            )));
        }

        let payload = json!({
            "key": item.key,
            "attempt": item.attempt,
            "input": item.payload,
        });
        Ok(WorkResult::success(item.key, payload, item.attempt))
    }
}

/// A stage that counts its invocations and returns an empty update.
#[derive(Debug)]
pub struct RecordingStage {
    name: String,
    questions: Mutex<Vec<String>>,
}

impl RecordingStage {
    /// Creates a new recording stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            questions: Mutex::new(Vec::new()),
        }
    }

    /// Number of invocations.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.questions.lock().len()
    }

    /// The question seen by each invocation.
    #[must_use]
    pub fn questions(&self) -> Vec<String> {
        self.questions.lock().clone()
    }
}

#[async_trait]
impl Stage for RecordingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, state: &SharedState) -> Result<StateUpdate, StageError> {
        self.questions.lock().push(state.question().to_string());
        Ok(StateUpdate::new())
    }
}

/// A stage that takes time to execute.
#[derive(Debug)]
pub struct SlowStage {
    name: String,
    delay: Duration,
}

impl SlowStage {
    /// Creates a new slow stage.
    #[must_use]
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
        }
    }
}

#[async_trait]
impl Stage for SlowStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _state: &SharedState) -> Result<StateUpdate, StageError> {
        tokio::time::sleep(self.delay).await;
        Ok(StateUpdate::new())
    }
}

/// A planning stage returning scripted plans.
///
/// Each call returns the next plan from the script, then `plan` once the
/// script is exhausted. `None` entries produce a stage error.
#[derive(Debug)]
pub struct StaticPlanStage {
    name: String,
    plan: Plan,
    script: Vec<Option<Plan>>,
    calls: Mutex<usize>,
}

impl StaticPlanStage {
    /// Creates a stage that always returns `plan`.
    #[must_use]
    pub fn new(name: impl Into<String>, plan: Plan) -> Self {
        Self {
            name: name.into(),
            plan,
            script: Vec::new(),
            calls: Mutex::new(0),
        }
    }

    /// Returns these plans first, in order.
    #[must_use]
    pub fn with_script(mut self, script: Vec<Option<Plan>>) -> Self {
        self.script = script;
        self
    }

    /// Number of invocations.
    #[must_use]
    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl Stage for StaticPlanStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _state: &SharedState) -> Result<StateUpdate, StageError> {
        let call = {
            let mut calls = self.calls.lock();
            *calls += 1;
            *calls - 1
        };
        match self.script.get(call) {
            Some(Some(plan)) => Ok(StateUpdate::new().with_plan(plan.clone())),
            Some(None) => Err(StageError::failed(format!("planner unavailable on call {}", call + 1))),
            None => Ok(StateUpdate::new().with_plan(self.plan.clone())),
        }
    }
}
