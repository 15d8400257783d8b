//! Fan-out planners for the blueprint phases.
//!
//! Each planner turns the plan into dispatch items whose payload is the
//! slice of state its worker needs. Workers never see the shared state.

use super::phases;
use crate::pipeline::{DispatchItem, FanOut};
use crate::state::SharedState;
use serde_json::{json, Value};

/// One item per mechanic, keyed by mechanic id.
#[derive(Debug, Clone, Copy, Default)]
pub struct MechanicFanOut;

impl FanOut for MechanicFanOut {
    fn items(&self, state: &SharedState) -> Vec<DispatchItem> {
        let Some(plan) = state.plan() else {
            return Vec::new();
        };
        plan.mechanics()
            .map(|(scene, mechanic)| {
                DispatchItem::new(
                    &mechanic.mechanic_id,
                    json!({
                        "question": state.question(),
                        "scene_id": scene.scene_id,
                        "scene_title": scene.title,
                        "scene_labels": scene.labels,
                        "mechanic": mechanic,
                    }),
                )
            })
            .collect()
    }
}

/// One item per scene that needs a diagram, keyed by scene id.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiagramFanOut;

impl FanOut for DiagramFanOut {
    fn items(&self, state: &SharedState) -> Vec<DispatchItem> {
        let Some(plan) = state.plan() else {
            return Vec::new();
        };
        plan.diagram_scenes()
            .map(|scene| {
                DispatchItem::new(
                    &scene.scene_id,
                    json!({
                        "question": state.question(),
                        "scene_id": scene.scene_id,
                        "title": scene.title,
                        "labels": scene.labels,
                    }),
                )
            })
            .collect()
    }
}

/// One item per scene, keyed by scene id.
///
/// The payload carries the scene's mechanics together with whatever content
/// the content phase produced for them, in dependency order.
#[derive(Debug, Clone, Copy, Default)]
pub struct InteractionFanOut;

impl FanOut for InteractionFanOut {
    fn items(&self, state: &SharedState) -> Vec<DispatchItem> {
        let Some(plan) = state.plan() else {
            return Vec::new();
        };
        let content = state.merged(phases::CONTENT);

        plan.scenes
            .iter()
            .map(|scene| {
                let order = scene
                    .mechanic_order()
                    .unwrap_or_else(|_| scene.mechanics.iter().map(|m| m.mechanic_id.clone()).collect());
                let mechanics: Vec<Value> = order
                    .iter()
                    .filter_map(|id| scene.mechanic(id))
                    .map(|mechanic| {
                        json!({
                            "mechanic_id": mechanic.mechanic_id,
                            "mechanic_type": mechanic.mechanic_type,
                            "content": content
                                .and_then(|merged| merged.success(&mechanic.mechanic_id))
                                .map_or(Value::Null, |result| result.payload.clone()),
                        })
                    })
                    .collect();

                DispatchItem::new(
                    &scene.scene_id,
                    json!({
                        "question": state.question(),
                        "scene_id": scene.scene_id,
                        "title": scene.title,
                        "labels": scene.labels,
                        "mechanics": mechanics,
                        "connections": scene.connections,
                    }),
                )
            })
            .collect()
    }
}
