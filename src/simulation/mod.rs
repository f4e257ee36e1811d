//! Simulation Engine
//!
//! Validates a plan, orders each flow's steps, simulates every step against
//! the mock connector registry, scores risk, and assembles the preflight
//! report. Only structural plan errors are returned as errors; everything
//! else becomes report content.

pub mod analysis;
mod engine;
pub mod graph;

pub use engine::SimulationEngine;
pub use graph::{execution_order, ExecutionOrder};
