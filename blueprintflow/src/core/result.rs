//! Per-item results produced by dispatched workers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Outcome of a single dispatched work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    /// The worker produced a usable payload.
    Success,
    /// The worker failed, panicked or timed out.
    Failed,
}

impl fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// The result of processing one work item.
///
/// `attempt_count` is 1-based and identifies which dispatch round produced
/// the result. Merge keeps the highest attempt per key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkResult {
    /// The work item key (a mechanic or scene id).
    pub key: String,
    /// Success or failure.
    pub status: WorkStatus,
    /// Worker output; `Null` for failures.
    #[serde(default)]
    pub payload: Value,
    /// 1-based attempt number.
    pub attempt_count: u32,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkResult {
    /// Creates a successful result.
    #[must_use]
    pub fn success(key: impl Into<String>, payload: Value, attempt_count: u32) -> Self {
        Self {
            key: key.into(),
            status: WorkStatus::Success,
            payload,
            attempt_count,
            error: None,
        }
    }

    /// Creates a failed result.
    #[must_use]
    pub fn failed(key: impl Into<String>, error: impl Into<String>, attempt_count: u32) -> Self {
        Self {
            key: key.into(),
            status: WorkStatus::Failed,
            payload: Value::Null,
            attempt_count,
            error: Some(error.into()),
        }
    }

    /// Returns true if the result is a success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == WorkStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_failed_result_has_null_payload() {
        let result = WorkResult::failed("m1", "boom", 2);
        assert!(!result.is_success());
        assert_eq!(result.payload, Value::Null);
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert_eq!(result.attempt_count, 2);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let result = WorkResult::success("m1", json!({"a": 1}), 1);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["status"], "success");
        assert!(value.get("error").is_none());
        assert_eq!(WorkStatus::Failed.to_string(), "failed");
    }
}
