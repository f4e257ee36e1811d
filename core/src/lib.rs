//! GhostRun Core Module
//!
//! Data model shared by the preflight simulator: the executable plan consumed
//! as input, the request options, per-step and per-flow simulation results,
//! the preflight report, the run status record, and configuration.

pub mod config;
pub mod plan;
pub mod report;
pub mod request;
pub mod risk;
pub mod status;

pub use config::{
    ConnectorSettings, EngineSettings, GhostRunConfig, LifecycleSettings, LoggingConfig,
};
pub use plan::{
    ApprovalRule, BackoffStrategy, ExecutablePlan, ExecutionFlow, ExecutionStep, FailureStrategy,
    ResourceRequirements, RetryPolicy, SecurityContext, StepType,
};
pub use report::{
    FlowSimulationResult, MockConnectorResponse, OverallStatus, PreflightRecommendation,
    PreflightReport, RecommendationCategory, ReportSummary, ResourceEstimate, SimulationMetrics,
    StepSimulationResult,
};
pub use request::{GhostRunRequest, SimulationMode};
pub use risk::RiskLevel;
pub use status::{GhostRunStatus, RunState};
