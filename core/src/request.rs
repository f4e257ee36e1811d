//! Simulation request options

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::plan::ExecutablePlan;

/// How thorough a simulation should be
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SimulationMode {
    /// Everything the request asks for
    Full,
    /// Skips performance analysis and cost estimation
    Fast,
    /// Full run, plus sensitive-parameter advisories reported as security issues
    Security,
    Unknown(String),
}

impl SimulationMode {
    pub const KNOWN: &'static [&'static str] = &["full", "fast", "security"];

    pub fn as_str(&self) -> &str {
        match self {
            SimulationMode::Full => "full",
            SimulationMode::Fast => "fast",
            SimulationMode::Security => "security",
            SimulationMode::Unknown(raw) => raw.as_str(),
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, SimulationMode::Unknown(_))
    }
}

impl Default for SimulationMode {
    fn default() -> Self {
        SimulationMode::Full
    }
}

impl From<String> for SimulationMode {
    fn from(value: String) -> Self {
        match value.as_str() {
            "full" => SimulationMode::Full,
            "fast" => SimulationMode::Fast,
            "security" => SimulationMode::Security,
            _ => SimulationMode::Unknown(value),
        }
    }
}

impl From<SimulationMode> for String {
    fn from(value: SimulationMode) -> Self {
        value.as_str().to_string()
    }
}

impl std::str::FromStr for SimulationMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(SimulationMode::from(s.to_lowercase()))
    }
}

impl fmt::Display for SimulationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options accompanying a plan submitted for preflight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GhostRunRequest {
    /// Must equal the submitted plan's `plan_hash`
    pub plan_hash: String,
    pub simulation_mode: SimulationMode,
    pub include_performance_analysis: bool,
    pub include_cost_estimation: bool,
    pub mock_external_calls: bool,
    /// Tool name -> override object (`response_time_ms`, `success`, `response_data`)
    pub connector_overrides: BTreeMap<String, Value>,
    pub strict_validation: bool,
    pub execution_context: BTreeMap<String, Value>,
}

impl Default for GhostRunRequest {
    fn default() -> Self {
        Self {
            plan_hash: String::new(),
            simulation_mode: SimulationMode::Full,
            include_performance_analysis: true,
            include_cost_estimation: false,
            mock_external_calls: true,
            connector_overrides: BTreeMap::new(),
            strict_validation: false,
            execution_context: BTreeMap::new(),
        }
    }
}

impl GhostRunRequest {
    /// Default request bound to a plan's hash
    pub fn for_plan(plan: &ExecutablePlan) -> Self {
        Self {
            plan_hash: plan.plan_hash.clone(),
            ..Default::default()
        }
    }

    /// Enable or disable mock connector calls
    pub fn with_mock_calls(mut self, enabled: bool) -> Self {
        self.mock_external_calls = enabled;
        self
    }

    /// Set the simulation mode
    pub fn with_mode(mut self, mode: SimulationMode) -> Self {
        self.simulation_mode = mode;
        self
    }

    /// Add a connector override for a tool
    pub fn with_override(mut self, tool: impl Into<String>, overrides: Value) -> Self {
        self.connector_overrides.insert(tool.into(), overrides);
        self
    }

    /// Whether performance analysis should run for this request
    pub fn wants_performance_analysis(&self) -> bool {
        self.include_performance_analysis && self.simulation_mode != SimulationMode::Fast
    }

    /// Whether cost estimation should run for this request
    pub fn wants_cost_estimation(&self) -> bool {
        self.include_cost_estimation && self.simulation_mode != SimulationMode::Fast
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_mock_calls_and_performance() {
        let request = GhostRunRequest::default();
        assert!(request.mock_external_calls);
        assert!(request.wants_performance_analysis());
        assert!(!request.wants_cost_estimation());
        assert_eq!(request.simulation_mode, SimulationMode::Full);
    }

    #[test]
    fn test_fast_mode_skips_analysis() {
        let mut request = GhostRunRequest::default().with_mode(SimulationMode::Fast);
        request.include_cost_estimation = true;
        assert!(!request.wants_performance_analysis());
        assert!(!request.wants_cost_estimation());
    }

    #[test]
    fn test_unknown_mode_deserializes() {
        let request: GhostRunRequest =
            serde_json::from_value(json!({"simulation_mode": "turbo"})).unwrap();
        assert_eq!(
            request.simulation_mode,
            SimulationMode::Unknown("turbo".to_string())
        );
        assert!(request.mock_external_calls);
    }
}
