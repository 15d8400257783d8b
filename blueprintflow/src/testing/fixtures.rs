//! Fixture plans.

use crate::core::{MechanicConnection, MechanicPlan, Plan, ScenePlan};

/// One scene with one drag-and-drop mechanic and no diagram.
#[must_use]
pub fn single_scene_plan() -> Plan {
    Plan::new("Photosynthesis")
        .with_labels(["chloroplast", "sunlight", "glucose"])
        .with_scene(
            ScenePlan::new("s1", "Inside the leaf")
                .with_labels(["chloroplast", "sunlight"])
                .with_mechanic(
                    MechanicPlan::new("m1", "drag_drop")
                        .with_labels(["chloroplast", "sunlight"])
                        .with_max_score(10),
                ),
        )
}

/// Two scenes that both need a diagram, one mechanic each.
#[must_use]
pub fn two_diagram_scene_plan() -> Plan {
    Plan::new("The heart")
        .with_labels(["atrium", "ventricle", "valve", "aorta"])
        .with_scene(
            ScenePlan::new("s1", "Chambers")
                .with_labels(["atrium", "ventricle"])
                .with_diagram()
                .with_mechanic(
                    MechanicPlan::new("m1", "drag_drop")
                        .with_labels(["atrium", "ventricle"])
                        .with_max_score(10),
                ),
        )
        .with_scene(
            ScenePlan::new("s2", "Blood flow")
                .with_labels(["valve", "aorta"])
                .with_diagram()
                .with_mechanic(
                    MechanicPlan::new("m2", "sequencing")
                        .with_labels(["valve", "aorta"])
                        .with_max_score(20),
                ),
        )
}

/// A scene with three chained mechanics.
#[must_use]
pub fn chained_mechanics_plan() -> Plan {
    Plan::new("Cell division")
        .with_labels(["prophase", "metaphase", "anaphase"])
        .with_scene(
            ScenePlan::new("s1", "Mitosis")
                .with_labels(["prophase", "metaphase", "anaphase"])
                .with_mechanic(MechanicPlan::new("m1", "drag_drop").with_labels(["prophase"]))
                .with_mechanic(MechanicPlan::new("m2", "sequencing").with_labels(["metaphase"]))
                .with_mechanic(MechanicPlan::new("m3", "click_to_identify").with_labels(["anaphase"]))
                .with_connection(MechanicConnection::new("m1", "m2"))
                .with_connection(MechanicConnection::new("m2", "m3")),
        )
}

/// A plan whose only scene has a mechanic cycle.
#[must_use]
pub fn cyclic_plan() -> Plan {
    Plan::new("Loops")
        .with_labels(["a"])
        .with_scene(
            ScenePlan::new("s1", "Cycle")
                .with_labels(["a"])
                .with_mechanic(MechanicPlan::new("m1", "drag_drop"))
                .with_mechanic(MechanicPlan::new("m2", "drag_drop"))
                .with_connection(MechanicConnection::new("m1", "m2"))
                .with_connection(MechanicConnection::new("m2", "m1")),
        )
}
