//! Mock connector registry
//!
//! Simulated stand-ins for external integrations. Each connector declares the
//! tools it serves and, per tool:
//! - the actions it accepts
//! - a risk classification driving the simulated success rate
//! - a typical latency that simulated calls jitter around
//!
//! Connectors are stateless per call; the only shared mutable state is the
//! registry's [`RandomSource`].

mod catalog;
mod random;

pub use catalog::{
    default_connectors, AwsConnector, CatalogConnector, HttpConnector, PostgresConnector,
    RedisConnector, StripeConnector,
};
pub use random::{FixedRandom, RandomSource, SeededRandom};

use std::collections::BTreeMap;
use std::sync::Arc;

use ghostrun_core::{ConnectorSettings, MockConnectorResponse, RiskLevel};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::errors::SimulationError;

/// Declaration of one tool served by a connector
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub actions: Vec<String>,
    pub risk_level: RiskLevel,
    pub typical_latency_ms: u64,
    /// Estimated provider cost of one call
    pub cost_per_call_usd: f64,
}

impl ToolSpec {
    /// Create a tool with no actions
    pub fn new(name: impl Into<String>, risk_level: RiskLevel, typical_latency_ms: u64) -> Self {
        Self {
            name: name.into(),
            actions: Vec::new(),
            risk_level,
            typical_latency_ms,
            cost_per_call_usd: 0.0,
        }
    }

    /// Set accepted actions
    pub fn with_actions(mut self, actions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.actions = actions.into_iter().map(|a| a.into()).collect();
        self
    }

    /// Set per-call cost
    pub fn with_cost(mut self, cost_per_call_usd: f64) -> Self {
        self.cost_per_call_usd = cost_per_call_usd;
        self
    }

    /// Check if the tool accepts an action
    pub fn supports(&self, action: &str) -> bool {
        self.actions.iter().any(|a| a == action)
    }
}

/// Caller-supplied adjustments for a simulated call
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CallOverrides {
    pub response_time_ms: Option<u64>,
    pub success: Option<bool>,
    pub response_data: Option<Value>,
}

impl CallOverrides {
    /// Parse the override object given for `tool`
    pub fn from_value(tool: &str, value: &Value) -> Result<Self, SimulationError> {
        if !value.is_object() {
            return Err(SimulationError::InvalidOverride {
                tool: tool.to_string(),
                reason: "override must be a JSON object".to_string(),
            });
        }
        serde_json::from_value(value.clone()).map_err(|e| SimulationError::InvalidOverride {
            tool: tool.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.response_time_ms.is_none() && self.success.is_none() && self.response_data.is_none()
    }
}

/// A simulated external integration
pub trait MockConnector: Send + Sync {
    /// Registry name, matched exactly and case-sensitively
    fn name(&self) -> &str;

    /// Tools served by this connector, keyed by tool name
    fn tools(&self) -> &BTreeMap<String, ToolSpec>;

    /// Domain-shaped payload for a successful call
    fn generate_response_data(
        &self,
        tool: &ToolSpec,
        action: &str,
        _parameters: &BTreeMap<String, Value>,
    ) -> Value {
        json!({
            "status": "ok",
            "tool": tool.name,
            "action": action,
            "simulated": true,
        })
    }

    fn tool(&self, tool: &str) -> Option<&ToolSpec> {
        self.tools().get(tool)
    }

    /// False when the tool is not registered or does not accept the action
    fn supports_action(&self, tool: &str, action: &str) -> bool {
        self.tool(tool).map(|t| t.supports(action)).unwrap_or(false)
    }

    /// Simulate one call; unsupported calls yield `success = false`, never an error
    fn simulate_call(
        &self,
        tool: &str,
        action: &str,
        parameters: &BTreeMap<String, Value>,
        overrides: &CallOverrides,
        random: &dyn RandomSource,
        latency_jitter: f64,
    ) -> MockConnectorResponse {
        let Some(spec) = self.tool(tool) else {
            return unsupported_response(
                self.name(),
                tool,
                action,
                format!(
                    "Tool '{}' is not registered with connector '{}'",
                    tool,
                    self.name()
                ),
            );
        };
        if !spec.supports(action) {
            return unsupported_response(
                self.name(),
                tool,
                action,
                format!("Action '{}' is not supported by tool '{}'", action, tool),
            );
        }

        let mut notes = vec![format!(
            "Simulated {} call; no external system was contacted",
            self.name()
        )];

        let response_time_ms = match overrides.response_time_ms {
            Some(ms) => {
                notes.push(format!("Response time overridden to {}ms", ms));
                ms
            }
            None => jittered_latency(spec.typical_latency_ms, latency_jitter, random.next_unit()),
        };

        let success = match overrides.success {
            Some(forced) => {
                notes.push(format!("Outcome overridden to success={}", forced));
                forced
            }
            None => random.next_unit() < spec.risk_level.success_probability(),
        };

        let response_data = match (&overrides.response_data, success) {
            (Some(data), _) => data.clone(),
            (None, true) => self.generate_response_data(spec, action, parameters),
            (None, false) => json!({
                "error": {
                    "type": "simulated_failure",
                    "message": format!("Simulated failure of {}.{}", tool, action),
                }
            }),
        };

        if !success && overrides.success.is_none() {
            notes.push(format!(
                "Failure drawn from {} risk profile (success probability {:.2})",
                spec.risk_level,
                spec.risk_level.success_probability()
            ));
        }

        MockConnectorResponse {
            connector_name: self.name().to_string(),
            tool_name: tool.to_string(),
            action: action.to_string(),
            success,
            response_data,
            response_time_ms,
            simulation_notes: notes,
        }
    }
}

/// `typical ± jitter`, from a uniform draw in `[0, 1)`
fn jittered_latency(typical_ms: u64, jitter: f64, draw: f64) -> u64 {
    let factor = 1.0 + (2.0 * draw - 1.0) * jitter;
    ((typical_ms as f64) * factor).round().max(1.0) as u64
}

fn unsupported_response(
    connector: &str,
    tool: &str,
    action: &str,
    reason: String,
) -> MockConnectorResponse {
    MockConnectorResponse {
        connector_name: connector.to_string(),
        tool_name: tool.to_string(),
        action: action.to_string(),
        success: false,
        response_data: json!({ "error": { "type": "unsupported", "message": reason } }),
        response_time_ms: 0,
        simulation_notes: vec![reason],
    }
}

/// Catalog of mock connectors shared by all runs
pub struct ConnectorRegistry {
    connectors: BTreeMap<String, Box<dyn MockConnector>>,
    random: Arc<dyn RandomSource>,
    latency_jitter: f64,
}

impl ConnectorRegistry {
    /// Registry with the default connector catalog
    pub fn new(random: Arc<dyn RandomSource>) -> Self {
        let mut registry = Self::empty(random);
        for connector in default_connectors() {
            registry.register(connector);
        }
        registry
    }

    /// Registry with no connectors
    pub fn empty(random: Arc<dyn RandomSource>) -> Self {
        Self {
            connectors: BTreeMap::new(),
            random,
            latency_jitter: 0.3,
        }
    }

    /// Default catalog with randomness and jitter taken from settings
    pub fn from_settings(settings: &ConnectorSettings) -> Self {
        let random: Arc<dyn RandomSource> = match settings.seed {
            Some(seed) => Arc::new(SeededRandom::new(seed)),
            None => Arc::new(SeededRandom::from_entropy()),
        };
        Self::new(random).with_latency_jitter(settings.latency_jitter)
    }

    /// Set the fractional latency spread
    pub fn with_latency_jitter(mut self, jitter: f64) -> Self {
        self.latency_jitter = jitter;
        self
    }

    /// Add or replace a connector
    pub fn register(&mut self, connector: Box<dyn MockConnector>) {
        self.connectors
            .insert(connector.name().to_string(), connector);
    }

    /// Exact, case-sensitive lookup by connector name
    pub fn get(&self, name: &str) -> Option<&dyn MockConnector> {
        self.connectors.get(name).map(|c| c.as_ref())
    }

    /// Connector serving `tool`: exact name match first, then tool registries
    pub fn connector_for_tool(&self, tool: &str) -> Option<&dyn MockConnector> {
        if let Some(connector) = self.get(tool) {
            if connector.tool(tool).is_some() {
                return Some(connector);
            }
        }
        self.connectors
            .values()
            .find(|c| c.tool(tool).is_some())
            .map(|c| c.as_ref())
    }

    /// Connector names in sorted order
    pub fn names(&self) -> Vec<&str> {
        self.connectors.keys().map(|k| k.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    /// Per-call cost of a tool, zero when unknown
    pub fn call_cost(&self, tool: &str) -> f64 {
        self.connector_for_tool(tool)
            .and_then(|c| c.tool(tool))
            .map(|t| t.cost_per_call_usd)
            .unwrap_or(0.0)
    }

    /// Simulate a call against whichever connector serves `tool`
    pub fn simulate(
        &self,
        tool: &str,
        action: &str,
        parameters: &BTreeMap<String, Value>,
        overrides: &CallOverrides,
    ) -> MockConnectorResponse {
        match self.connector_for_tool(tool) {
            Some(connector) => connector.simulate_call(
                tool,
                action,
                parameters,
                overrides,
                self.random.as_ref(),
                self.latency_jitter,
            ),
            None => unsupported_response(
                "unknown",
                tool,
                action,
                format!("No connector registered for tool '{}'", tool),
            ),
        }
    }
}
