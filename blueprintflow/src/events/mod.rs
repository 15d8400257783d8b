//! Lifecycle events emitted by the engine.
//!
//! The engine reports every stage, dispatch and gate decision to an
//! [`EventSink`]. Sinks are injected per engine; the default discards
//! everything.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Event type names.
pub mod names {
    /// A run started.
    pub const PIPELINE_STARTED: &str = "pipeline.started";
    /// A run finished.
    pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
    /// A stage started.
    pub const STAGE_STARTED: &str = "stage.started";
    /// A stage returned an update.
    pub const STAGE_COMPLETED: &str = "stage.completed";
    /// A stage failed, panicked or timed out.
    pub const STAGE_FAILED: &str = "stage.failed";
    /// A fan-out started.
    pub const DISPATCH_STARTED: &str = "dispatch.started";
    /// Every item of a fan-out settled.
    pub const DISPATCH_COMPLETED: &str = "dispatch.completed";
    /// A gate scheduled a retry round.
    pub const GATE_RETRY: &str = "gate.retry";
    /// A gate gave up on a phase.
    pub const GATE_DEGRADED: &str = "gate.degraded";
    /// A phase passed its gate.
    pub const GATE_CLEAN: &str = "gate.clean";
}

/// One lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// Event type, one of [`names`].
    pub event_type: String,
    /// Run the event belongs to.
    pub run_id: Uuid,
    /// When it happened (ISO 8601).
    pub timestamp: String,
    /// Event payload.
    #[serde(default)]
    pub data: Value,
}

impl PipelineEvent {
    /// Creates an event stamped now.
    #[must_use]
    pub fn new(event_type: impl Into<String>, run_id: Uuid, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            run_id,
            timestamp: crate::utils::iso_timestamp(),
            data,
        }
    }
}
