//! Simulation result and report types

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::risk::RiskLevel;

/// Simulated outcome of one tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockConnectorResponse {
    pub connector_name: String,
    pub tool_name: String,
    pub action: String,
    pub success: bool,
    pub response_data: Value,
    pub response_time_ms: u64,
    pub simulation_notes: Vec<String>,
}

/// Outcome of simulating one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSimulationResult {
    pub step_id: String,
    pub step_name: String,
    pub would_execute: bool,
    pub execution_time_ms: u64,
    pub connector_responses: Vec<MockConnectorResponse>,
    pub validation_passed: bool,
    pub validation_issues: Vec<String>,
    pub risk_level: RiskLevel,
    pub risk_factors: Vec<String>,
    pub dependency_issues: Vec<String>,
    pub simulated_outputs: BTreeMap<String, Value>,
}

impl StepSimulationResult {
    /// Result standing in for a step whose simulation raised an error
    pub fn failed(step_id: impl Into<String>, step_name: impl Into<String>, error: String) -> Self {
        Self {
            step_id: step_id.into(),
            step_name: step_name.into(),
            would_execute: false,
            execution_time_ms: 0,
            connector_responses: Vec::new(),
            validation_passed: false,
            validation_issues: vec![error],
            risk_level: RiskLevel::Critical,
            risk_factors: vec!["Step simulation failed".to_string()],
            dependency_issues: Vec::new(),
            simulated_outputs: BTreeMap::new(),
        }
    }

    /// Whether this step contributed any issue to the report
    pub fn has_issues(&self) -> bool {
        !self.would_execute
            || !self.validation_issues.is_empty()
            || !self.dependency_issues.is_empty()
    }
}

/// Aggregated outcome of one flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSimulationResult {
    pub flow_id: String,
    pub flow_name: String,
    pub would_complete: bool,
    pub execution_order: Vec<String>,
    pub step_results: Vec<StepSimulationResult>,
    pub total_execution_time_ms: u64,
    pub overall_risk_level: RiskLevel,
    /// Slowest steps, at most three
    pub critical_path_steps: Vec<String>,
    pub flow_issues: Vec<String>,
}

/// Final verdict of a preflight run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OverallStatus {
    Pass,
    Fail,
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverallStatus::Pass => write!(f, "PASS"),
            OverallStatus::Fail => write!(f, "FAIL"),
        }
    }
}

/// Kind of recommendation attached to a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationCategory {
    RiskMitigation,
    PerformanceOptimization,
    SecurityHardening,
}

/// Suggested follow-up produced from the simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreflightRecommendation {
    pub category: RecommendationCategory,
    pub priority: RiskLevel,
    pub title: String,
    pub description: String,
    pub affected_steps: Vec<String>,
    pub suggested_actions: Vec<String>,
}

/// Resources the plan is estimated to need, derived from the simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceEstimate {
    pub cpu: String,
    pub memory: String,
    pub concurrent_steps: usize,
    pub external_services: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_cost_usd: Option<f64>,
}

/// Terminal artifact of a preflight run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreflightReport {
    pub report_id: String,
    pub run_id: String,
    pub tenant_id: String,
    pub plan_hash: String,
    pub generated_at: DateTime<Utc>,
    pub simulation_duration_ms: u64,
    pub overall_status: OverallStatus,
    pub overall_risk_level: RiskLevel,
    pub execution_feasible: bool,
    pub flow_results: Vec<FlowSimulationResult>,
    pub total_estimated_duration_ms: u64,
    pub critical_issues: Vec<String>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<PreflightRecommendation>,
    pub resource_requirements: ResourceEstimate,
    pub security_issues: Vec<String>,
    pub policy_violations: Vec<String>,
    pub performance_bottlenecks: Vec<String>,
    pub total_steps: usize,
    pub steps_with_issues: usize,
    pub high_risk_steps: usize,
}

impl PreflightReport {
    /// Look up a flow result by id
    pub fn flow(&self, flow_id: &str) -> Option<&FlowSimulationResult> {
        self.flow_results.iter().find(|f| f.flow_id == flow_id)
    }

    /// Look up a step result by id across all flows
    pub fn step(&self, step_id: &str) -> Option<&StepSimulationResult> {
        self.flow_results
            .iter()
            .flat_map(|f| f.step_results.iter())
            .find(|s| s.step_id == step_id)
    }

    /// Condensed listing entry
    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            report_id: self.report_id.clone(),
            run_id: self.run_id.clone(),
            tenant_id: self.tenant_id.clone(),
            plan_hash: self.plan_hash.clone(),
            generated_at: self.generated_at,
            overall_status: self.overall_status,
            overall_risk_level: self.overall_risk_level,
            total_steps: self.total_steps,
        }
    }
}

/// Listing entry for stored reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub report_id: String,
    pub run_id: String,
    pub tenant_id: String,
    pub plan_hash: String,
    pub generated_at: DateTime<Utc>,
    pub overall_status: OverallStatus,
    pub overall_risk_level: RiskLevel,
    pub total_steps: usize,
}

/// Counters collected while simulating a plan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationMetrics {
    pub flows_simulated: usize,
    pub steps_simulated: usize,
    pub connector_calls: usize,
    pub failed_connector_calls: usize,
    pub validation_errors: usize,
    pub validation_warnings: usize,
    pub steps_by_risk: BTreeMap<RiskLevel, usize>,
    pub simulation_duration_ms: u64,
}

impl SimulationMetrics {
    /// Count a simulated step
    pub fn record_step(&mut self, step: &StepSimulationResult) {
        self.steps_simulated += 1;
        *self.steps_by_risk.entry(step.risk_level).or_insert(0) += 1;
        self.connector_calls += step.connector_responses.len();
        self.failed_connector_calls += step
            .connector_responses
            .iter()
            .filter(|r| !r.success)
            .count();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(success: bool) -> MockConnectorResponse {
        MockConnectorResponse {
            connector_name: "http".to_string(),
            tool_name: "http".to_string(),
            action: "get".to_string(),
            success,
            response_data: json!({}),
            response_time_ms: 10,
            simulation_notes: vec![],
        }
    }

    #[test]
    fn test_failed_step_is_critical_and_not_executable() {
        let result = StepSimulationResult::failed("s1", "Step 1", "boom".to_string());
        assert!(!result.would_execute);
        assert_eq!(result.risk_level, RiskLevel::Critical);
        assert_eq!(result.validation_issues, vec!["boom".to_string()]);
        assert!(result.has_issues());
    }

    #[test]
    fn test_metrics_count_calls_and_failures() {
        let mut step = StepSimulationResult::failed("s1", "Step 1", "x".to_string());
        step.connector_responses = vec![response(true), response(false)];

        let mut metrics = SimulationMetrics::default();
        metrics.record_step(&step);

        assert_eq!(metrics.steps_simulated, 1);
        assert_eq!(metrics.connector_calls, 2);
        assert_eq!(metrics.failed_connector_calls, 1);
        assert_eq!(metrics.steps_by_risk.get(&RiskLevel::Critical), Some(&1));
    }

    #[test]
    fn test_status_serializes_uppercase() {
        assert_eq!(serde_json::to_value(OverallStatus::Pass).unwrap(), json!("PASS"));
        assert_eq!(
            serde_json::to_value(RecommendationCategory::RiskMitigation).unwrap(),
            json!("risk_mitigation")
        );
    }
}
