//! Merging fan-out results.

use crate::core::{MergedResults, WorkResult};
use crate::errors::StageError;
use crate::stages::Stage;
use crate::state::{SharedState, StateUpdate};
use async_trait::async_trait;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

/// Reduces raw results to one result per key.
///
/// The highest `attempt_count` wins; on a tie the later result wins. Both
/// output lists are sorted by key, so the output depends only on the
/// multiset of inputs up to same-attempt ties.
#[must_use]
pub fn merge(raw: &[WorkResult]) -> MergedResults {
    let mut winners: BTreeMap<&str, &WorkResult> = BTreeMap::new();

    for result in raw {
        match winners.entry(result.key.as_str()) {
            Entry::Vacant(slot) => {
                slot.insert(result);
            }
            Entry::Occupied(mut slot) => {
                if result.attempt_count >= slot.get().attempt_count {
                    slot.insert(result);
                }
            }
        }
    }

    let (successes, failures): (Vec<WorkResult>, Vec<WorkResult>) = winners
        .into_values()
        .cloned()
        .partition(WorkResult::is_success);

    MergedResults {
        successes,
        failures,
        raw_count: raw.len(),
    }
}

/// Stage that merges a phase's raw results and counts the round.
///
/// It runs once per dispatch round and bumps the phase's retry counter by
/// exactly one.
#[derive(Debug, Clone)]
pub struct MergeStage {
    name: String,
    phase: String,
}

impl MergeStage {
    /// Creates a merge stage for a phase.
    #[must_use]
    pub fn new(name: impl Into<String>, phase: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phase: phase.into(),
        }
    }

    /// The phase this stage merges.
    #[must_use]
    pub fn phase(&self) -> &str {
        &self.phase
    }
}

#[async_trait]
impl Stage for MergeStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, state: &SharedState) -> Result<StateUpdate, StageError> {
        let merged = merge(state.raw_results(&self.phase));
        let counter = state
            .retry_counter(&self.phase)
            .cloned()
            .unwrap_or_default()
            .incremented();

        tracing::info!(
            phase = %self.phase,
            round = counter.rounds,
            raw = merged.raw_count,
            successes = merged.successes.len(),
            failures = merged.failures.len(),
            "Merged phase results"
        );

        Ok(StateUpdate::new()
            .with_merged(&self.phase, merged)
            .with_counter(&self.phase, counter))
    }
}
