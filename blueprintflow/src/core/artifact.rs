//! The assembled blueprint artifact.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A mechanic as it appears in the final artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMechanic {
    /// Mechanic id.
    pub mechanic_id: String,
    /// Mechanic discriminant.
    pub mechanic_type: String,
    /// Labels the mechanic uses.
    pub labels: Vec<String>,
    /// Points awarded.
    pub max_score: u32,
    /// Generated content.
    pub content: Value,
}

/// A scene as it appears in the final artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactScene {
    /// Scene id.
    pub scene_id: String,
    /// Scene title.
    pub title: String,
    /// Labels declared by the scene.
    pub labels: Vec<String>,
    /// Whether the plan asked for a diagram.
    pub needs_diagram: bool,
    /// Generated diagram asset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagram: Option<Value>,
    /// Generated interaction design.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interaction: Option<Value>,
    /// Mechanics of the scene.
    pub mechanics: Vec<ArtifactMechanic>,
}

impl ArtifactScene {
    /// Returns the sum of the scene's mechanic scores.
    #[must_use]
    pub fn max_score(&self) -> u32 {
        self.mechanics.iter().map(|m| m.max_score).sum()
    }
}

/// The final output of a run.
///
/// An artifact is always produced. `generation_complete` is false only when
/// the run could not get far enough to have a plan; in that case
/// `fatal_error` says why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Artifact {
    /// Blueprint title.
    pub title: String,
    /// The learning question the run was started with.
    pub question: String,
    /// Scenes in plan order.
    pub scenes: Vec<ArtifactScene>,
    /// Sum of every mechanic's max score.
    pub total_max_score: u32,
    /// True once assembly ran against a plan.
    pub generation_complete: bool,
    /// True if any phase degraded or structural issues remained.
    pub is_degraded: bool,
    /// Everything that went wrong but did not stop the run.
    pub warnings: Vec<String>,
    /// Set when no artifact content could be produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fatal_error: Option<String>,
}

impl Artifact {
    /// Creates an incomplete artifact carrying a single fatal error.
    #[must_use]
    pub fn fatal(question: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            fatal_error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Sums the mechanic scores.
    #[must_use]
    pub fn computed_max_score(&self) -> u32 {
        self.scenes.iter().map(ArtifactScene::max_score).sum()
    }

    /// Iterates over every mechanic with its scene.
    pub fn mechanics(&self) -> impl Iterator<Item = (&ArtifactScene, &ArtifactMechanic)> {
        self.scenes
            .iter()
            .flat_map(|scene| scene.mechanics.iter().map(move |m| (scene, m)))
    }

    /// Looks up a scene by id.
    #[must_use]
    pub fn scene(&self, scene_id: &str) -> Option<&ArtifactScene> {
        self.scenes.iter().find(|s| s.scene_id == scene_id)
    }
}
