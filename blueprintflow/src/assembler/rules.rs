//! Structural rules for assembled artifacts.

use crate::core::Artifact;
use crate::validation::{Issue, RuleSet};

/// Builds the structural rule set applied to every draft.
#[must_use]
pub fn structural_rules() -> RuleSet<Artifact> {
    RuleSet::new("artifact_structure")
        .rule("scenes_present", |artifact: &Artifact| {
            if artifact.scenes.is_empty() {
                vec![Issue::error("artifact has no scenes").at("scenes")]
            } else {
                Vec::new()
            }
        })
        .rule("scene_titles", |artifact: &Artifact| {
            artifact
                .scenes
                .iter()
                .enumerate()
                .filter(|(_, scene)| scene.title.trim().is_empty())
                .map(|(i, scene)| {
                    Issue::error(format!("scene '{}' has no title", scene.scene_id))
                        .at(format!("scenes[{i}].title"))
                        .for_item(&scene.scene_id)
                })
                .collect()
        })
        .rule("mechanic_types", |artifact: &Artifact| {
            each_mechanic(artifact, |path, mechanic| {
                mechanic.mechanic_type.trim().is_empty().then(|| {
                    Issue::error(format!("mechanic '{}' has no type", mechanic.mechanic_id))
                        .at(format!("{path}.mechanic_type"))
                })
            })
        })
        .rule("mechanic_scores", |artifact: &Artifact| {
            each_mechanic(artifact, |path, mechanic| {
                (mechanic.max_score == 0).then(|| {
                    Issue::error(format!("mechanic '{}' awards no points", mechanic.mechanic_id))
                        .at(format!("{path}.max_score"))
                })
            })
        })
        .rule("mechanic_content", |artifact: &Artifact| {
            each_mechanic(artifact, |path, mechanic| {
                mechanic.content.is_null().then(|| {
                    Issue::error(format!(
                        "mechanic '{}' has no generated content",
                        mechanic.mechanic_id
                    ))
                    .at(format!("{path}.content"))
                })
            })
        })
        .rule("mechanic_labels", |artifact: &Artifact| {
            artifact
                .scenes
                .iter()
                .enumerate()
                .flat_map(|(i, scene)| {
                    scene.mechanics.iter().enumerate().flat_map(move |(j, mechanic)| {
                        mechanic
                            .labels
                            .iter()
                            .filter(|label| !scene.labels.contains(label))
                            .map(move |label| {
                                Issue::error(format!(
                                    "mechanic '{}' uses label '{label}' not declared by scene '{}'",
                                    mechanic.mechanic_id, scene.scene_id
                                ))
                                .at(format!("scenes[{i}].mechanics[{j}].labels"))
                                .for_item(&mechanic.mechanic_id)
                            })
                    })
                })
                .collect()
        })
        .rule("total_score", |artifact: &Artifact| {
            let computed = artifact.computed_max_score();
            if artifact.total_max_score == computed {
                Vec::new()
            } else {
                vec![Issue::error(format!(
                    "total_max_score is {} but mechanics sum to {computed}",
                    artifact.total_max_score
                ))
                .at("total_max_score")]
            }
        })
        .rule("diagrams", |artifact: &Artifact| {
            artifact
                .scenes
                .iter()
                .enumerate()
                .filter(|(_, scene)| scene.needs_diagram && scene.diagram.is_none())
                .map(|(i, scene)| {
                    Issue::warning(format!(
                        "scene '{}' needs a diagram but none was generated",
                        scene.scene_id
                    ))
                    .at(format!("scenes[{i}].diagram"))
                    .for_item(&scene.scene_id)
                })
                .collect()
        })
}

fn each_mechanic<F>(artifact: &Artifact, check: F) -> Vec<Issue>
where
    F: Fn(&str, &crate::core::ArtifactMechanic) -> Option<Issue>,
{
    let mut issues = Vec::new();
    for (i, scene) in artifact.scenes.iter().enumerate() {
        for (j, mechanic) in scene.mechanics.iter().enumerate() {
            let path = format!("scenes[{i}].mechanics[{j}]");
            if let Some(issue) = check(&path, mechanic) {
                issues.push(issue.for_item(&mechanic.mechanic_id));
            }
        }
    }
    issues
}
