//! Small helpers shared across the crate: timestamps, run ids and content
//! fingerprints.

use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Returns the current UTC time as an ISO 8601 string with microsecond
/// precision (`YYYY-MM-DDTHH:MM:SS.ffffff+00:00`).
#[must_use]
pub fn iso_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// Generates a time-ordered run id.
#[must_use]
pub fn generate_run_id() -> Uuid {
    Uuid::now_v7()
}

/// Returns a short, stable hex fingerprint of a serializable value.
///
/// Values that fail to serialize hash as the empty string.
#[must_use]
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> String {
    let json = serde_json::to_string(value).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..16])
}
