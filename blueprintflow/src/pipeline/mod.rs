//! Pipeline building and execution.
//!
//! This module provides:
//! - Routing decisions and fan-out planning
//! - Bounded parallel dispatch
//! - Result merging and the retry gate
//! - The engine builder with graph validation
//! - The superstep engine

mod builder;
mod dispatcher;
mod engine;
mod gate;
mod merge;
mod retry;
mod routing;


pub use builder::EngineBuilder;
pub use dispatcher::Dispatcher;
pub use engine::{Engine, RunOutcome, ENGINE_STAGE};
pub use gate::{evaluate, GateTransition, RetryGate, RetryPolicy, RetryTarget};
pub use merge::{merge, MergeStage};
pub use retry::{BackoffStrategy, JitterStrategy, RetryBackoff};
pub use routing::{Decision, DispatchItem, DispatchSet, FanOut, FanOutRouter, FnRouter, Route, Router};

#[cfg(test)]
pub use routing::MockRouter;
