//! Stage and worker traits and implementations.
//!
//! Stages are the named steps of a pipeline graph. Workers are the per-item
//! functions a dispatch fans out to.

use crate::core::WorkResult;
use crate::errors::StageError;
use crate::pipeline::DispatchItem;
use crate::state::{SharedState, StateUpdate};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;

/// Trait for pipeline stages.
///
/// A stage reads a snapshot of the shared state and returns a partial
/// update. It never mutates the state itself.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the name of the stage.
    fn name(&self) -> &str;

    /// Runs the stage against a state snapshot.
    ///
    /// An `Err` is recorded as a phase error and treated as an empty update.
    async fn run(&self, state: &SharedState) -> Result<StateUpdate, StageError>;
}

/// Trait for dispatched per-item workers.
///
/// A worker only sees its item's payload slice, never the shared state.
#[async_trait]
pub trait Worker: Send + Sync + Debug {
    /// Returns the name of the worker.
    fn name(&self) -> &str;

    /// Processes one item.
    ///
    /// An `Err` becomes a failed `WorkResult` for the item.
    async fn work(&self, item: DispatchItem) -> Result<WorkResult, StageError>;
}

/// A simple function-based stage.
pub struct FnStage<F>
where
    F: Fn(&SharedState) -> Result<StateUpdate, StageError> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&SharedState) -> Result<StateUpdate, StageError> + Send + Sync,
{
    /// Creates a new function-based stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(&SharedState) -> Result<StateUpdate, StageError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&SharedState) -> Result<StateUpdate, StageError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, state: &SharedState) -> Result<StateUpdate, StageError> {
        (self.func)(state)
    }
}

/// An async function-based worker producing the item payload.
///
/// The returned value becomes the payload of a successful `WorkResult`
/// stamped with the item's key and attempt.
pub struct FnWorker<F, Fut>
where
    F: Fn(DispatchItem) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, StageError>> + Send,
{
    name: String,
    func: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnWorker<F, Fut>
where
    F: Fn(DispatchItem) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, StageError>> + Send,
{
    /// Creates a new function-based worker.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> Debug for FnWorker<F, Fut>
where
    F: Fn(DispatchItem) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, StageError>> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnWorker")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<F, Fut> Worker for FnWorker<F, Fut>
where
    F: Fn(DispatchItem) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, StageError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn work(&self, item: DispatchItem) -> Result<WorkResult, StageError> {
        let key = item.key.clone();
        let attempt = item.attempt;
        let payload = (self.func)(item).await?;
        Ok(WorkResult::success(key, payload, attempt))
    }
}

/// A stage that does nothing. Used as a join or phase-entry point.
#[derive(Debug, Clone)]
pub struct NoOpStage {
    name: String,
}

impl NoOpStage {
    /// Creates a new no-op stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Stage for NoOpStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _state: &SharedState) -> Result<StateUpdate, StageError> {
        Ok(StateUpdate::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fn_stage() {
        let stage = FnStage::new("echo", |state: &SharedState| {
            Ok(StateUpdate::new().with_field("echo", json!(state.question())))
        });

        assert_eq!(stage.name(), "echo");

        let update = stage.run(&SharedState::new("q")).await.unwrap();
        assert!(!update.is_empty());
    }

    #[tokio::test]
    async fn test_noop_stage() {
        let stage = NoOpStage::new("noop");

        assert_eq!(stage.name(), "noop");

        let update = stage.run(&SharedState::default()).await.unwrap();
        assert!(update.is_empty());
    }

    #[tokio::test]
    async fn test_fn_worker_stamps_key_and_attempt() {
        let worker = FnWorker::new("double", |item: DispatchItem| async move {
            let n = item.payload["n"].as_i64().unwrap_or_default();
            Ok::<_, StageError>(json!({"n": n * 2}))
        });

        let result = worker
            .work(DispatchItem::new("k1", json!({"n": 21})).with_attempt(3))
            .await
            .unwrap();
        assert_eq!(result.key, "k1");
        assert_eq!(result.attempt_count, 3);
        assert_eq!(result.payload["n"], 42);
    }

    #[tokio::test]
    async fn test_fn_worker_propagates_errors() {
        let worker = FnWorker::new("broken", |_item: DispatchItem| async move {
            Err::<Value, _>(StageError::failed("generator unavailable"))
        });
        let err = worker.work(DispatchItem::new("k1", json!({}))).await.unwrap_err();
        assert_eq!(err.to_string(), "generator unavailable");
    }
}
