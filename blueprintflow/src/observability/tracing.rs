//! Spans and timers for pipeline execution.

use std::time::Instant;
use tracing::Span;
use uuid::Uuid;

/// Opens the span a stage runs in.
#[must_use]
pub fn stage_span(stage: &str, run_id: Uuid, step: usize) -> Span {
    tracing::info_span!("stage", stage = %stage, run_id = %run_id, step)
}

/// A timer for measuring span durations.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new span timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the span name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Finishes the timer and returns the duration in milliseconds.
    #[must_use]
    pub fn finish(self) -> f64 {
        self.elapsed_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_timer() {
        let timer = SpanTimer::start("merge");
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert_eq!(timer.name(), "merge");
        assert!(timer.finish() >= 10.0);
    }

    #[test]
    fn test_stage_span_without_subscriber() {
        let span = stage_span("plan", Uuid::nil(), 0);
        let _guard = span.enter();
    }
}
