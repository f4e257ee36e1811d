//! Simulation engine errors

use crate::lifecycle::StorageError;

/// Errors raised while simulating a plan
///
/// Only structural plan problems abort a simulation; content problems are
/// reported as validation issues and per-step errors are folded into a
/// failed step result.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Main flow '{0}' not found in plan")]
    MainFlowNotFound(String),

    #[error("Step '{step}' in flow '{flow}' depends on unknown step '{dependency}'")]
    UnknownDependency {
        flow: String,
        step: String,
        dependency: String,
    },

    #[error("Invalid connector override for tool '{tool}': {reason}")]
    InvalidOverride { tool: String, reason: String },

    #[error("Report storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
