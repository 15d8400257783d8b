//! Run state and partial updates.
//!
//! [`SharedState`] has a fixed schema with one slot per pipeline concern.
//! Stages return [`StateUpdate`]s; the engine applies them in a fixed order
//! after every step.

mod shared;
mod update;

pub use shared::SharedState;
pub use update::StateUpdate;
