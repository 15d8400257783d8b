//! Heuristic repairs for draft artifacts.
//!
//! A repair is a `(predicate, fix)` pair. The assembler evaluates the table
//! once, in order, against a draft that failed structural validation. A fix
//! returns one note per change, and each note becomes a warning on the
//! artifact.

use crate::core::{Artifact, Plan};
use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::LazyLock;

type Predicate = fn(&Artifact, &Plan) -> bool;
type Fix = fn(&mut Artifact, &Plan) -> Vec<String>;

/// One entry of the repair table.
#[derive(Clone, Copy)]
pub struct Repair {
    name: &'static str,
    applies: Predicate,
    fix: Fix,
}

impl fmt::Debug for Repair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Repair").field(&self.name).finish()
    }
}

impl Repair {
    /// Creates a repair.
    #[must_use]
    pub const fn new(name: &'static str, applies: Predicate, fix: Fix) -> Self {
        Self { name, applies, fix }
    }

    /// Repair name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// True if the repair has something to fix.
    #[must_use]
    pub fn applies(&self, artifact: &Artifact, plan: &Plan) -> bool {
        (self.applies)(artifact, plan)
    }
}

/// The built-in table. `recompute_total_score` runs last so it sees the
/// scores the other repairs filled in.
#[must_use]
pub fn default_repairs() -> Vec<Repair> {
    vec![
        Repair::new("infer_mechanic_type", missing_mechanic_type, infer_mechanic_type),
        Repair::new("default_max_score", missing_max_score, default_max_score),
        Repair::new("drop_undeclared_labels", has_undeclared_labels, drop_undeclared_labels),
        Repair::new("default_scene_title", missing_scene_title, default_scene_title),
        Repair::new("recompute_total_score", total_score_mismatch, recompute_total_score),
    ]
}

/// Runs every applicable repair once, in order, and returns the notes.
pub fn apply_repairs(repairs: &[Repair], artifact: &mut Artifact, plan: &Plan) -> Vec<String> {
    let mut notes = Vec::new();
    for repair in repairs {
        if !repair.applies(artifact, plan) {
            continue;
        }
        let applied = (repair.fix)(artifact, plan);
        tracing::debug!(repair = repair.name, changes = applied.len(), "Applied repair");
        notes.extend(applied);
    }
    notes
}

static TYPE_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)drag|drop|zone", "drag_drop"),
        (r"(?i)sequenc|\border\b|\bsteps?\b", "sequencing"),
        (r"(?i)\bsort|categor|bucket", "sorting"),
        (r"(?i)click|identify|hotspot", "click_to_identify"),
        (r"(?i)trace|\bpath\b", "trace_path"),
        (r"(?i)match|\bpairs?\b", "matching"),
    ]
    .into_iter()
    .filter_map(|(pattern, kind)| Regex::new(pattern).ok().map(|re| (re, kind)))
    .collect()
});

/// Infers a mechanic type from generated content.
///
/// An explicit `mechanic_type` or `type` string wins, then the first
/// pattern matching the serialized content.
#[must_use]
pub fn infer_type_from_content(content: &Value) -> Option<String> {
    let explicit = ["mechanic_type", "type"]
        .iter()
        .filter_map(|field| content.get(*field).and_then(Value::as_str))
        .find(|s| !s.trim().is_empty());
    if let Some(kind) = explicit {
        return Some(kind.to_string());
    }

    if content.is_null() {
        return None;
    }
    let haystack = content.to_string();
    TYPE_PATTERNS
        .iter()
        .find(|(re, _)| re.is_match(&haystack))
        .map(|(_, kind)| (*kind).to_string())
}

fn missing_mechanic_type(artifact: &Artifact, _: &Plan) -> bool {
    artifact.mechanics().any(|(_, m)| m.mechanic_type.trim().is_empty())
}

fn infer_mechanic_type(artifact: &mut Artifact, _: &Plan) -> Vec<String> {
    let mut notes = Vec::new();
    for scene in &mut artifact.scenes {
        for mechanic in &mut scene.mechanics {
            if !mechanic.mechanic_type.trim().is_empty() {
                continue;
            }
            if let Some(kind) = infer_type_from_content(&mechanic.content) {
                notes.push(format!(
                    "repaired mechanic '{}': inferred type '{kind}'",
                    mechanic.mechanic_id
                ));
                mechanic.mechanic_type = kind;
            }
        }
    }
    notes
}

fn missing_max_score(artifact: &Artifact, _: &Plan) -> bool {
    artifact.mechanics().any(|(_, m)| m.max_score == 0)
}

fn default_max_score(artifact: &mut Artifact, plan: &Plan) -> Vec<String> {
    let mut notes = Vec::new();
    for scene in &mut artifact.scenes {
        for mechanic in &mut scene.mechanics {
            if mechanic.max_score > 0 {
                continue;
            }
            let planned = plan
                .scene(&scene.scene_id)
                .and_then(|s| s.mechanic(&mechanic.mechanic_id))
                .map_or(0, |m| m.max_score);
            let declared = mechanic
                .content
                .get("max_score")
                .and_then(Value::as_u64)
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(0);
            let labels = u32::try_from(mechanic.labels.len()).unwrap_or(u32::MAX);
            let score = [planned, declared]
                .into_iter()
                .find(|v| *v > 0)
                .unwrap_or_else(|| labels.saturating_mul(10).max(10));

            notes.push(format!(
                "repaired mechanic '{}': max_score set to {score}",
                mechanic.mechanic_id
            ));
            mechanic.max_score = score;
        }
    }
    notes
}

fn has_undeclared_labels(artifact: &Artifact, _: &Plan) -> bool {
    artifact
        .mechanics()
        .any(|(scene, m)| m.labels.iter().any(|l| !scene.labels.contains(l)))
}

fn drop_undeclared_labels(artifact: &mut Artifact, _: &Plan) -> Vec<String> {
    let mut notes = Vec::new();
    for scene in &mut artifact.scenes {
        let declared = scene.labels.clone();
        for mechanic in &mut scene.mechanics {
            let before = mechanic.labels.len();
            mechanic.labels.retain(|l| declared.contains(l));
            let dropped = before - mechanic.labels.len();
            if dropped > 0 {
                notes.push(format!(
                    "repaired mechanic '{}': dropped {dropped} undeclared label(s)",
                    mechanic.mechanic_id
                ));
            }
        }
    }
    notes
}

fn missing_scene_title(artifact: &Artifact, _: &Plan) -> bool {
    artifact.scenes.iter().any(|s| s.title.trim().is_empty())
}

fn default_scene_title(artifact: &mut Artifact, _: &Plan) -> Vec<String> {
    let mut notes = Vec::new();
    for (index, scene) in artifact.scenes.iter_mut().enumerate() {
        if scene.title.trim().is_empty() {
            scene.title = format!("Scene {}", index + 1);
            notes.push(format!("repaired scene '{}': default title", scene.scene_id));
        }
    }
    notes
}

fn total_score_mismatch(artifact: &Artifact, _: &Plan) -> bool {
    artifact.total_max_score != artifact.computed_max_score()
}

fn recompute_total_score(artifact: &mut Artifact, _: &Plan) -> Vec<String> {
    let total = artifact.computed_max_score();
    let note = format!(
        "repaired total_max_score: {} -> {total}",
        artifact.total_max_score
    );
    artifact.total_max_score = total;
    vec![note]
}
