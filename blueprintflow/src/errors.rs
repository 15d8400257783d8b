//! Error types for the blueprintflow engine.
//!
//! Errors are split by the layer that raises them: graph construction
//! (`PipelineValidationError`), engine configuration (`EngineError`), stage and
//! worker execution (`StageError`), plan invariants (`PlanError`) and run
//! configuration (`ConfigError`). Only graph and configuration errors ever
//! reach the caller of a run; everything a stage raises is absorbed by the
//! engine and recorded in the shared state.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The umbrella error type for blueprintflow operations.
#[derive(Debug, Error)]
pub enum BlueprintflowError {
    /// A pipeline graph failed validation while being built.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// The engine refused to start a run.
    #[error("{0}")]
    Engine(#[from] EngineError),

    /// A plan violated one of its invariants.
    #[error("{0}")]
    Plan(#[from] PlanError),

    /// The run configuration is invalid or could not be loaded.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A stage or worker failed.
    #[error("{0}")]
    Stage(#[from] StageError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Metadata about a graph contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "CONTRACT-004-UNKNOWN_STAGE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a pipeline graph fails validation.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the contract error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

/// Error raised when a cycle is detected in a dependency graph.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Cycle detected: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of nodes forming the cycle.
    pub cycle_path: Vec<String>,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        Self { cycle_path }
    }
}

/// Errors that stop the engine before a run starts.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// No entry stage was configured or passed.
    #[error("No entry stage selected for pipeline '{0}'")]
    NoEntry(String),

    /// An entry stage is not registered.
    #[error("Unknown entry stage '{0}'")]
    UnknownEntry(String),
}

/// Failure raised by a stage or a dispatched worker.
///
/// The engine never propagates these: a failing stage becomes a recorded
/// phase error, a failing worker becomes a failed `WorkResult`.
#[derive(Debug, Error)]
pub enum StageError {
    /// The stage did not finish within its time budget.
    #[error("'{stage}' timed out after {timeout_ms}ms")]
    Timeout {
        /// The stage or worker name.
        stage: String,
        /// The budget that was exceeded.
        timeout_ms: u64,
    },

    /// The stage task panicked.
    #[error("'{stage}' panicked: {message}")]
    Panicked {
        /// The stage or worker name.
        stage: String,
        /// The panic or join error message.
        message: String,
    },

    /// The stage reported a failure.
    #[error("{0}")]
    Failed(String),

    /// Any error from an external collaborator.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StageError {
    /// Creates a plain failure.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Returns true if the failure was a timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Violations of the plan invariants.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanError {
    /// The plan has no scenes.
    #[error("Plan has no scenes")]
    NoScenes,

    /// A scene has no mechanics.
    #[error("Scene '{0}' has no mechanics")]
    EmptyScene(String),

    /// Two scenes share an id.
    #[error("Duplicate scene id '{0}'")]
    DuplicateScene(String),

    /// Two mechanics share an id.
    #[error("Duplicate mechanic id '{0}'")]
    DuplicateMechanic(String),

    /// A scene uses a label the plan does not declare.
    #[error("Scene '{scene}' uses label '{label}' which the plan does not declare")]
    UndeclaredSceneLabel {
        /// The scene id.
        scene: String,
        /// The offending label.
        label: String,
    },

    /// A mechanic references a label its scene does not declare.
    #[error("Mechanic '{mechanic}' in scene '{scene}' references undeclared label '{label}'")]
    UndeclaredMechanicLabel {
        /// The scene id.
        scene: String,
        /// The mechanic id.
        mechanic: String,
        /// The offending label.
        label: String,
    },

    /// A connection names a mechanic that is not in the scene.
    #[error("Scene '{scene}' connects unknown mechanic '{mechanic}'")]
    UnknownConnection {
        /// The scene id.
        scene: String,
        /// The unknown mechanic id.
        mechanic: String,
    },

    /// Mechanic connections inside a scene form a cycle.
    #[error("Scene '{scene}': {source}")]
    MechanicCycle {
        /// The scene id.
        scene: String,
        /// The detected cycle.
        #[source]
        source: CycleDetectedError,
    },
}

impl PlanError {
    /// Returns a dotted path to the offending part of the plan.
    #[must_use]
    pub fn field_path(&self) -> String {
        match self {
            Self::NoScenes => "plan.scenes".to_string(),
            Self::EmptyScene(scene) | Self::DuplicateScene(scene) => {
                format!("plan.scenes[{scene}]")
            }
            Self::DuplicateMechanic(mechanic) => format!("plan.mechanics[{mechanic}]"),
            Self::UndeclaredSceneLabel { scene, .. } => format!("plan.scenes[{scene}].labels"),
            Self::UndeclaredMechanicLabel { scene, mechanic, .. } => {
                format!("plan.scenes[{scene}].mechanics[{mechanic}].labels")
            }
            Self::UnknownConnection { scene, .. } | Self::MechanicCycle { scene, .. } => {
                format!("plan.scenes[{scene}].connections")
            }
        }
    }
}

/// Errors loading or validating a run configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// The configuration file could not be read.
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// The tracing subscriber could not be installed.
    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_error_info_builder() {
        let info = ContractErrorInfo::new("CONTRACT-004-EMPTY", "Cannot build an empty pipeline")
            .with_fix_hint("Add a stage")
            .with_context_entry("pipeline", "blueprint");

        assert_eq!(info.code, "CONTRACT-004-EMPTY");
        assert_eq!(info.fix_hint.as_deref(), Some("Add a stage"));
        assert_eq!(info.context.get("pipeline").map(String::as_str), Some("blueprint"));
    }

    #[test]
    fn test_validation_error_code() {
        let err = PipelineValidationError::new("boom")
            .with_error_info(ContractErrorInfo::new("CONTRACT-004-DUPLICATE", "dup"));
        assert_eq!(err.code(), Some("CONTRACT-004-DUPLICATE"));
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_cycle_error_display() {
        let err = CycleDetectedError::new(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "Cycle detected: a -> b -> a");
    }

    #[test]
    fn test_plan_error_field_path() {
        let err = PlanError::UndeclaredMechanicLabel {
            scene: "s1".into(),
            mechanic: "m1".into(),
            label: "x".into(),
        };
        assert_eq!(err.field_path(), "plan.scenes[s1].mechanics[m1].labels");
        assert!(err.to_string().contains("undeclared label 'x'"));
    }

    #[test]
    fn test_stage_error_from_anyhow() {
        let err: StageError = anyhow::anyhow!("upstream 503").into();
        assert_eq!(err.to_string(), "upstream 503");
        assert!(!err.is_timeout());

        let timeout = StageError::Timeout { stage: "plan".into(), timeout_ms: 10 };
        assert!(timeout.is_timeout());
        assert_eq!(timeout.to_string(), "'plan' timed out after 10ms");
    }
}
