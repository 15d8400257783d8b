//! Bounded parallel fan-out with per-item isolation.

use super::routing::DispatchSet;
use crate::core::WorkResult;
use crate::errors::StageError;
use crate::stages::Worker;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinError;

/// Runs a worker over every item of a dispatch set.
///
/// Each item runs in its own task, at most `max_concurrency` at a time. A
/// worker error, panic or timeout becomes a failed `WorkResult` for that
/// item only. `dispatch` returns once every item has settled.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    max_concurrency: usize,
    worker_timeout: Option<Duration>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(8)
    }
}

impl Dispatcher {
    /// Creates a dispatcher with the given concurrency bound (minimum 1).
    #[must_use]
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            worker_timeout: None,
        }
    }

    /// Sets a per-item timeout.
    #[must_use]
    pub fn with_worker_timeout(mut self, timeout: Duration) -> Self {
        self.worker_timeout = Some(timeout);
        self
    }

    /// Returns the concurrency bound.
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Dispatches the set and waits for every item.
    ///
    /// Results come back in item order, each stamped with its item's key
    /// and attempt.
    pub async fn dispatch(&self, worker: Arc<dyn Worker>, set: &DispatchSet) -> Vec<WorkResult> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = FuturesUnordered::new();

        tracing::info!(
            phase = %set.phase,
            worker = worker.name(),
            items = set.len(),
            max_concurrency = self.max_concurrency,
            "Dispatching work items"
        );

        for (index, item) in set.items.iter().cloned().enumerate() {
            let key = item.key.clone();
            let attempt = item.attempt;
            let worker = Arc::clone(&worker);
            let semaphore = Arc::clone(&semaphore);
            let timeout = self.worker_timeout;

            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| StageError::failed(format!("dispatch semaphore closed: {e}")))?;
                run_item(worker.as_ref(), item, timeout).await
            });

            tasks.push(async move { (index, key, attempt, handle.await) });
        }

        let worker_name = worker.name().to_string();
        let mut results = Vec::with_capacity(set.len());

        while let Some((index, key, attempt, joined)) = tasks.next().await {
            let result = match joined {
                Ok(Ok(mut result)) => {
                    result.key = key;
                    result.attempt_count = attempt;
                    result
                }
                Ok(Err(err)) => WorkResult::failed(key, err.to_string(), attempt),
                Err(join_err) => {
                    let err = StageError::Panicked {
                        stage: worker_name.clone(),
                        message: panic_message(join_err),
                    };
                    WorkResult::failed(key, err.to_string(), attempt)
                }
            };

            if !result.is_success() {
                tracing::warn!(
                    phase = %set.phase,
                    key = %result.key,
                    attempt = result.attempt_count,
                    error = result.error.as_deref().unwrap_or_default(),
                    "Work item failed"
                );
            }
            results.push((index, result));
        }

        results.sort_by_key(|(index, _)| *index);
        let results: Vec<WorkResult> = results.into_iter().map(|(_, r)| r).collect();

        tracing::info!(
            phase = %set.phase,
            succeeded = results.iter().filter(|r| r.is_success()).count(),
            failed = results.iter().filter(|r| !r.is_success()).count(),
            "Dispatch settled"
        );

        results
    }
}

async fn run_item(
    worker: &dyn Worker,
    item: super::routing::DispatchItem,
    timeout: Option<Duration>,
) -> Result<WorkResult, StageError> {
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, worker.work(item)).await {
            Ok(result) => result,
            Err(_) => Err(StageError::Timeout {
                stage: worker.name().to_string(),
                timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            }),
        },
        None => worker.work(item).await,
    }
}

/// Extracts a readable message from a failed task.
pub(crate) fn panic_message(err: JoinError) -> String {
    if err.is_cancelled() {
        return "task was cancelled".to_string();
    }
    match err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string()),
        Err(err) => err.to_string(),
    }
}
