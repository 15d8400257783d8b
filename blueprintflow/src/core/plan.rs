//! The plan describing what a run must produce.
//!
//! A [`Plan`] is created once by an upstream generation stage and is read-only
//! from then on. Corrections never edit it in place; a retried plan stage
//! replaces it wholesale.

use crate::errors::{CycleDetectedError, PlanError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// One interactive mechanic inside a scene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MechanicPlan {
    /// Unique mechanic id across the plan.
    pub mechanic_id: String,
    /// Discriminant such as `drag_drop` or `sequencing`. May be empty when the
    /// planner leaves it to the content generator.
    #[serde(default)]
    pub mechanic_type: String,
    /// Labels this mechanic works with; must be declared by the scene.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Points awarded for completing the mechanic.
    #[serde(default)]
    pub max_score: u32,
    /// Free-form guidance for the content generator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl MechanicPlan {
    /// Creates a mechanic plan.
    #[must_use]
    pub fn new(mechanic_id: impl Into<String>, mechanic_type: impl Into<String>) -> Self {
        Self {
            mechanic_id: mechanic_id.into(),
            mechanic_type: mechanic_type.into(),
            labels: Vec::new(),
            max_score: 0,
            instructions: None,
        }
    }

    /// Sets the labels.
    #[must_use]
    pub fn with_labels<S: Into<String>>(mut self, labels: impl IntoIterator<Item = S>) -> Self {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the maximum score.
    #[must_use]
    pub fn with_max_score(mut self, max_score: u32) -> Self {
        self.max_score = max_score;
        self
    }

    /// Sets the generator instructions.
    #[must_use]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }
}

/// A directed connection between two mechanics of the same scene
/// (completing `from` unlocks `to`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MechanicConnection {
    /// Upstream mechanic id.
    pub from: String,
    /// Downstream mechanic id.
    pub to: String,
    /// Optional trigger description (e.g. `on_complete`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
}

impl MechanicConnection {
    /// Creates a connection.
    #[must_use]
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            trigger: None,
        }
    }
}

/// One scene of the blueprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenePlan {
    /// Unique scene id.
    pub scene_id: String,
    /// Scene title.
    #[serde(default)]
    pub title: String,
    /// Labels declared by the scene; a subset of the plan's labels.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Whether the scene needs a generated diagram asset.
    #[serde(default)]
    pub needs_diagram: bool,
    /// Mechanics of the scene, in presentation order.
    #[serde(default)]
    pub mechanics: Vec<MechanicPlan>,
    /// Mechanic-to-mechanic connections. Must be acyclic.
    #[serde(default)]
    pub connections: Vec<MechanicConnection>,
}

impl ScenePlan {
    /// Creates a scene plan.
    #[must_use]
    pub fn new(scene_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            scene_id: scene_id.into(),
            title: title.into(),
            labels: Vec::new(),
            needs_diagram: false,
            mechanics: Vec::new(),
            connections: Vec::new(),
        }
    }

    /// Sets the labels.
    #[must_use]
    pub fn with_labels<S: Into<String>>(mut self, labels: impl IntoIterator<Item = S>) -> Self {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    /// Marks the scene as needing a diagram.
    #[must_use]
    pub fn with_diagram(mut self) -> Self {
        self.needs_diagram = true;
        self
    }

    /// Adds a mechanic.
    #[must_use]
    pub fn with_mechanic(mut self, mechanic: MechanicPlan) -> Self {
        self.mechanics.push(mechanic);
        self
    }

    /// Adds a connection.
    #[must_use]
    pub fn with_connection(mut self, connection: MechanicConnection) -> Self {
        self.connections.push(connection);
        self
    }

    /// Looks up a mechanic by id.
    #[must_use]
    pub fn mechanic(&self, mechanic_id: &str) -> Option<&MechanicPlan> {
        self.mechanics.iter().find(|m| m.mechanic_id == mechanic_id)
    }

    /// Returns the mechanic ids in an order compatible with the connections.
    ///
    /// # Errors
    ///
    /// Returns a `CycleDetectedError` if the connections form a cycle.
    pub fn mechanic_order(&self) -> Result<Vec<String>, CycleDetectedError> {
        let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
        for connection in &self.connections {
            edges
                .entry(connection.from.as_str())
                .or_default()
                .push(connection.to.as_str());
        }

        let mut visited = HashSet::new();
        let mut on_stack = HashSet::new();
        let mut path = Vec::new();
        let mut order = Vec::new();

        // Reverse declaration order so the reversed post-order keeps
        // unconnected mechanics in declaration order.
        for mechanic in self.mechanics.iter().rev() {
            visit(
                mechanic.mechanic_id.as_str(),
                &edges,
                &mut visited,
                &mut on_stack,
                &mut path,
                &mut order,
            )?;
        }

        order.reverse();
        Ok(order)
    }
}

fn visit<'a>(
    node: &'a str,
    edges: &HashMap<&'a str, Vec<&'a str>>,
    visited: &mut HashSet<&'a str>,
    on_stack: &mut HashSet<&'a str>,
    path: &mut Vec<&'a str>,
    order: &mut Vec<String>,
) -> Result<(), CycleDetectedError> {
    if on_stack.contains(node) {
        let start = path.iter().position(|n| *n == node).unwrap_or(0);
        let mut cycle: Vec<String> = path[start..].iter().map(|n| (*n).to_string()).collect();
        cycle.push(node.to_string());
        return Err(CycleDetectedError::new(cycle));
    }
    if !visited.insert(node) {
        return Ok(());
    }

    on_stack.insert(node);
    path.push(node);

    if let Some(next) = edges.get(node) {
        for &child in next.iter().rev() {
            visit(child, edges, visited, on_stack, path, order)?;
        }
    }

    on_stack.remove(node);
    path.pop();
    order.push(node.to_string());
    Ok(())
}

/// The top-level description of what a run must produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Plan {
    /// Blueprint title.
    #[serde(default)]
    pub title: String,
    /// Global label set.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Scenes in presentation order.
    #[serde(default)]
    pub scenes: Vec<ScenePlan>,
}

impl Plan {
    /// Creates an empty plan.
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            labels: Vec::new(),
            scenes: Vec::new(),
        }
    }

    /// Sets the global labels.
    #[must_use]
    pub fn with_labels<S: Into<String>>(mut self, labels: impl IntoIterator<Item = S>) -> Self {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a scene.
    #[must_use]
    pub fn with_scene(mut self, scene: ScenePlan) -> Self {
        self.scenes.push(scene);
        self
    }

    /// Looks up a scene by id.
    #[must_use]
    pub fn scene(&self, scene_id: &str) -> Option<&ScenePlan> {
        self.scenes.iter().find(|s| s.scene_id == scene_id)
    }

    /// Iterates over every mechanic together with its scene.
    pub fn mechanics(&self) -> impl Iterator<Item = (&ScenePlan, &MechanicPlan)> {
        self.scenes
            .iter()
            .flat_map(|scene| scene.mechanics.iter().map(move |m| (scene, m)))
    }

    /// Returns the total number of mechanics.
    #[must_use]
    pub fn mechanic_count(&self) -> usize {
        self.scenes.iter().map(|s| s.mechanics.len()).sum()
    }

    /// Returns the scenes that need a diagram asset.
    pub fn diagram_scenes(&self) -> impl Iterator<Item = &ScenePlan> {
        self.scenes.iter().filter(|s| s.needs_diagram)
    }

    /// Checks the plan invariants.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn check_invariants(&self) -> Result<(), PlanError> {
        if self.scenes.is_empty() {
            return Err(PlanError::NoScenes);
        }

        let global: HashSet<&str> = self.labels.iter().map(String::as_str).collect();
        let mut scene_ids = HashSet::new();
        let mut mechanic_ids = HashSet::new();

        for scene in &self.scenes {
            if !scene_ids.insert(scene.scene_id.as_str()) {
                return Err(PlanError::DuplicateScene(scene.scene_id.clone()));
            }
            if scene.mechanics.is_empty() {
                return Err(PlanError::EmptyScene(scene.scene_id.clone()));
            }

            let declared: HashSet<&str> = scene.labels.iter().map(String::as_str).collect();
            if let Some(label) = scene.labels.iter().find(|l| !global.contains(l.as_str())) {
                return Err(PlanError::UndeclaredSceneLabel {
                    scene: scene.scene_id.clone(),
                    label: label.clone(),
                });
            }

            for mechanic in &scene.mechanics {
                if !mechanic_ids.insert(mechanic.mechanic_id.as_str()) {
                    return Err(PlanError::DuplicateMechanic(mechanic.mechanic_id.clone()));
                }
                if let Some(label) = mechanic.labels.iter().find(|l| !declared.contains(l.as_str())) {
                    return Err(PlanError::UndeclaredMechanicLabel {
                        scene: scene.scene_id.clone(),
                        mechanic: mechanic.mechanic_id.clone(),
                        label: label.clone(),
                    });
                }
            }

            for connection in &scene.connections {
                for endpoint in [&connection.from, &connection.to] {
                    if scene.mechanic(endpoint).is_none() {
                        return Err(PlanError::UnknownConnection {
                            scene: scene.scene_id.clone(),
                            mechanic: endpoint.clone(),
                        });
                    }
                }
            }

            scene
                .mechanic_order()
                .map_err(|source| PlanError::MechanicCycle {
                    scene: scene.scene_id.clone(),
                    source,
                })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn labelled_scene(id: &str) -> ScenePlan {
        ScenePlan::new(id, format!("Scene {id}"))
            .with_labels(["heart", "lung"])
            .with_mechanic(MechanicPlan::new(format!("{id}_m1"), "drag_drop").with_labels(["heart"]))
            .with_mechanic(MechanicPlan::new(format!("{id}_m2"), "sequencing").with_labels(["lung"]))
    }

    fn plan() -> Plan {
        Plan::new("Circulation")
            .with_labels(["heart", "lung", "vein"])
            .with_scene(labelled_scene("s1"))
    }

    #[test]
    fn test_valid_plan_passes() {
        assert!(plan().check_invariants().is_ok());
        assert_eq!(plan().mechanic_count(), 2);
    }

    #[test]
    fn test_empty_plan_rejected() {
        assert_eq!(Plan::new("x").check_invariants(), Err(PlanError::NoScenes));
    }

    #[test]
    fn test_scene_label_must_be_global() {
        let mut plan = plan();
        plan.labels = vec!["heart".into()];
        assert!(matches!(
            plan.check_invariants(),
            Err(PlanError::UndeclaredSceneLabel { label, .. }) if label == "lung"
        ));
    }

    #[test]
    fn test_mechanic_label_must_be_declared_by_scene() {
        let plan = Plan::new("x").with_labels(["a", "b"]).with_scene(
            ScenePlan::new("s1", "S")
                .with_labels(["a"])
                .with_mechanic(MechanicPlan::new("m1", "drag_drop").with_labels(["b"])),
        );
        assert!(matches!(
            plan.check_invariants(),
            Err(PlanError::UndeclaredMechanicLabel { mechanic, .. }) if mechanic == "m1"
        ));
    }

    #[test]
    fn test_duplicate_mechanic_rejected() {
        let plan = Plan::new("x")
            .with_scene(ScenePlan::new("s1", "A").with_mechanic(MechanicPlan::new("m", "t")))
            .with_scene(ScenePlan::new("s2", "B").with_mechanic(MechanicPlan::new("m", "t")));
        assert_eq!(
            plan.check_invariants(),
            Err(PlanError::DuplicateMechanic("m".into()))
        );
    }

    #[test]
    fn test_connection_cycle_rejected() {
        let scene = labelled_scene("s1")
            .with_connection(MechanicConnection::new("s1_m1", "s1_m2"))
            .with_connection(MechanicConnection::new("s1_m2", "s1_m1"));
        let plan = Plan::new("x").with_labels(["heart", "lung"]).with_scene(scene);

        match plan.check_invariants() {
            Err(PlanError::MechanicCycle { scene, source }) => {
                assert_eq!(scene, "s1");
                assert_eq!(source.cycle_path.first(), source.cycle_path.last());
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_connection_rejected() {
        let scene = labelled_scene("s1").with_connection(MechanicConnection::new("s1_m1", "ghost"));
        let plan = Plan::new("x").with_labels(["heart", "lung"]).with_scene(scene);
        assert!(matches!(
            plan.check_invariants(),
            Err(PlanError::UnknownConnection { mechanic, .. }) if mechanic == "ghost"
        ));
    }

    #[test]
    fn test_mechanic_order_respects_connections() {
        let scene = ScenePlan::new("s", "S")
            .with_mechanic(MechanicPlan::new("a", "t"))
            .with_mechanic(MechanicPlan::new("b", "t"))
            .with_mechanic(MechanicPlan::new("c", "t"))
            .with_connection(MechanicConnection::new("c", "a"));

        let order = scene.mechanic_order().unwrap();
        let pos = |id: &str| order.iter().position(|m| m == id).unwrap();
        assert!(pos("c") < pos("a"));
        assert_eq!(order.len(), 3);
    }

    #[test]
    fn test_unconnected_mechanics_keep_declaration_order() {
        let scene = ScenePlan::new("s", "S")
            .with_mechanic(MechanicPlan::new("a", "t"))
            .with_mechanic(MechanicPlan::new("b", "t"))
            .with_mechanic(MechanicPlan::new("c", "t"));
        assert_eq!(scene.mechanic_order().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_plan_deserializes_with_defaults() {
        let plan: Plan = serde_json::from_value(serde_json::json!({
            "title": "T",
            "scenes": [{"scene_id": "s1", "mechanics": [{"mechanic_id": "m1"}]}]
        }))
        .unwrap();
        assert_eq!(plan.scenes[0].mechanics[0].mechanic_type, "");
        assert!(!plan.scenes[0].needs_diagram);
    }
}
