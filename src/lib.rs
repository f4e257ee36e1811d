//! GhostRun: preflight simulation for compiled execution plans
//!
//! A plan is dry-run against mock connectors before any real side effect
//! happens. The library validates the plan, orders and simulates each flow,
//! scores risk, and assembles a preflight report with a PASS/FAIL verdict.

pub mod cli;
pub mod connectors;
pub mod errors;
pub mod lifecycle;
pub mod logging;
pub mod risk;
pub mod simulation;
pub mod validation;

// Re-export the data model
pub use ghostrun_core::{
    ExecutablePlan, ExecutionFlow, ExecutionStep, GhostRunConfig, GhostRunRequest,
    GhostRunStatus, OverallStatus, PreflightReport, RiskLevel, RunState, SimulationMode,
};

// Re-export the services
pub use connectors::{ConnectorRegistry, FixedRandom, MockConnector, RandomSource, SeededRandom};
pub use errors::SimulationError;
pub use lifecycle::{EventPublisher, ReportStorage, RunService};
pub use risk::RiskAnalyzer;
pub use simulation::SimulationEngine;
pub use validation::{ValidationEngine, ValidationIssue};
