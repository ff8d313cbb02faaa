//! Conversation flow engine
//!
//! Drives each session through the configured step graph. Transition
//! resolution is pure; actions and persistence run inside the caller's
//! unit of work.

mod action;
mod engine;
mod reconcile;
mod step;
mod transition;

#[cfg(test)]
mod proptests;

pub use engine::{FlowEngine, FlowError, Inbound, Outcome};
pub use step::{Action, Step, StepOption};
