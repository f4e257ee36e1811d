//! Risk Analyzer
//!
//! Scores a single step from five independent signals and folds them to the
//! maximum:
//! - action semantics
//! - tool identity
//! - parameter content
//! - mocked response outcome
//! - step configuration
//!
//! Also classifies flow-level dependency structure (cycles, dangling
//! references, chain depth).

pub mod patterns;

use std::collections::{HashMap, HashSet};

use ghostrun_core::{ExecutionStep, MockConnectorResponse, RiskLevel};
use serde_json::Value;
use tracing::debug;

use patterns::{
    first_match, is_high_risk_tool, sensitive_key_match, CRITICAL_PATTERNS, DATABASE_TOOL_HINTS,
    DESTRUCTIVE_ACTIONS, HIGH_RISK_ACTIONS, MEDIUM_RISK_ACTIONS,
};

/// Responses slower than this raise risk to MEDIUM
pub const SLOW_RESPONSE_MS: u64 = 5000;
/// Retry budgets above this raise risk to MEDIUM
pub const MAX_SAFE_RETRY_ATTEMPTS: i64 = 5;
/// Timeouts above this raise risk to MEDIUM
pub const MAX_SAFE_TIMEOUT_MS: i64 = 300_000;
/// Chains longer than this raise risk to MEDIUM
pub const VERY_LONG_CHAIN: usize = 10;
/// Chains longer than this are noted without escalation
pub const LONG_CHAIN: usize = 5;

/// A risk level with the reasons that produced it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub reasons: Vec<String>,
}

impl RiskAssessment {
    fn raise(&mut self, level: RiskLevel, reason: impl Into<String>) {
        self.level = self.level.max(level);
        self.reasons.push(reason.into());
    }

    fn merge(&mut self, other: RiskAssessment) {
        self.level = self.level.max(other.level);
        self.reasons.extend(other.reasons);
    }

    pub fn into_parts(self) -> (RiskLevel, Vec<String>) {
        (self.level, self.reasons)
    }
}

/// Stateless step and flow risk scoring
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskAnalyzer;

impl RiskAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Overall step risk: the maximum of the five sub-scores
    pub fn analyze_step_risk(
        &self,
        step: &ExecutionStep,
        connector_responses: &[MockConnectorResponse],
    ) -> RiskAssessment {
        let mut assessment = RiskAssessment::default();
        assessment.merge(self.action_risk(step));
        assessment.merge(self.tool_risk(step));
        assessment.merge(self.parameter_risk(step));
        assessment.merge(self.response_risk(connector_responses));
        assessment.merge(self.configuration_risk(step));

        debug!(
            step_id = %step.step_id,
            risk = %assessment.level,
            "Scored step risk"
        );
        assessment
    }

    pub fn action_risk(&self, step: &ExecutionStep) -> RiskAssessment {
        let mut assessment = RiskAssessment::default();
        let action = step.action_lower();
        if action.is_empty() {
            return assessment;
        }

        if let Some(pattern) = first_match(&action, CRITICAL_PATTERNS) {
            assessment.raise(
                RiskLevel::Critical,
                format!("Action '{}' targets critical resource '{}'", action, pattern),
            );
        } else if let Some(verb) = first_match(&action, HIGH_RISK_ACTIONS) {
            assessment.raise(
                RiskLevel::High,
                format!("Action '{}' is a high-risk operation ({})", action, verb),
            );
        } else if let Some(verb) = first_match(&action, MEDIUM_RISK_ACTIONS) {
            assessment.raise(
                RiskLevel::Medium,
                format!("Action '{}' modifies external state ({})", action, verb),
            );
        }
        assessment
    }

    pub fn tool_risk(&self, step: &ExecutionStep) -> RiskAssessment {
        let mut assessment = RiskAssessment::default();
        let tool = step.tool_lower();
        if tool.is_empty() {
            return assessment;
        }

        if let Some(pattern) = first_match(&tool, CRITICAL_PATTERNS) {
            assessment.raise(
                RiskLevel::Critical,
                format!("Tool '{}' targets critical resource '{}'", tool, pattern),
            );
        } else if is_high_risk_tool(&tool) {
            assessment.raise(
                RiskLevel::High,
                format!("Tool '{}' is a high-risk integration", tool),
            );
        } else if let Some(hint) = first_match(&tool, DATABASE_TOOL_HINTS) {
            assessment.raise(
                RiskLevel::Medium,
                format!("Tool '{}' appears to be a data store ({})", tool, hint),
            );
        }
        assessment
    }

    pub fn parameter_risk(&self, step: &ExecutionStep) -> RiskAssessment {
        let mut assessment = RiskAssessment::default();
        if step.parameters.is_empty() {
            return assessment;
        }

        let rendered = serde_json::to_string(&step.parameters)
            .unwrap_or_default()
            .to_lowercase();
        if let Some(pattern) = first_match(&rendered, CRITICAL_PATTERNS) {
            assessment.raise(
                RiskLevel::Critical,
                format!("Parameters reference critical resource '{}'", pattern),
            );
            return assessment;
        }

        for (key, value) in &step.parameters {
            if let Some(pattern) = sensitive_key_match(key) {
                assessment.raise(
                    RiskLevel::High,
                    format!("Parameter '{}' is sensitive ({})", key, pattern),
                );
            }

            let lowered = key.to_lowercase();
            if lowered == "amount" || lowered == "price" {
                if let Some(number) = numeric(value) {
                    if number > 10_000.0 {
                        assessment.raise(
                            RiskLevel::High,
                            format!("Large monetary value {} = {}", key, number),
                        );
                    } else if number > 1_000.0 {
                        assessment.raise(
                            RiskLevel::Medium,
                            format!("Significant monetary value {} = {}", key, number),
                        );
                    }
                }
            }
        }
        assessment
    }

    pub fn response_risk(&self, responses: &[MockConnectorResponse]) -> RiskAssessment {
        let mut assessment = RiskAssessment::default();
        for response in responses {
            if !response.success {
                assessment.raise(
                    RiskLevel::High,
                    format!(
                        "Simulated call {}.{} failed",
                        response.tool_name, response.action
                    ),
                );
            }
            if response.response_time_ms > SLOW_RESPONSE_MS {
                assessment.raise(
                    RiskLevel::Medium,
                    format!(
                        "Simulated call {}.{} is slow ({}ms)",
                        response.tool_name, response.action, response.response_time_ms
                    ),
                );
            }
            if is_high_risk_tool(&response.tool_name) {
                assessment.raise(
                    RiskLevel::High,
                    format!(
                        "Response from high-risk integration '{}'",
                        response.tool_name
                    ),
                );
            }
        }
        assessment
    }

    pub fn configuration_risk(&self, step: &ExecutionStep) -> RiskAssessment {
        let mut assessment = RiskAssessment::default();
        let action = step.action_lower();

        if let Some(verb) = first_match(&action, DESTRUCTIVE_ACTIONS) {
            if step.depends_on.is_empty() {
                assessment.raise(
                    RiskLevel::High,
                    format!(
                        "Destructive operation ({}) has no prerequisite steps",
                        verb
                    ),
                );
            }
        }

        if let Some(policy) = &step.retry_policy {
            if policy.max_attempts > MAX_SAFE_RETRY_ATTEMPTS {
                assessment.raise(
                    RiskLevel::Medium,
                    format!("Excessive retry attempts ({})", policy.max_attempts),
                );
            }
        }

        match step.timeout {
            Some(timeout) if timeout > MAX_SAFE_TIMEOUT_MS => assessment.raise(
                RiskLevel::Medium,
                format!("Very long timeout ({}ms)", timeout),
            ),
            Some(_) => {}
            None => assessment.raise(RiskLevel::Low, "No timeout configured"),
        }
        assessment
    }

    /// Combine step risks into a flow risk
    ///
    /// Two or more MEDIUM steps compound to HIGH.
    pub fn combine_flow_risk(&self, levels: impl IntoIterator<Item = RiskLevel>) -> RiskLevel {
        let mut medium = 0usize;
        let mut highest = RiskLevel::Low;
        for level in levels {
            if level == RiskLevel::Medium {
                medium += 1;
            }
            highest = highest.max(level);
        }

        match highest {
            RiskLevel::Critical => RiskLevel::Critical,
            RiskLevel::High => RiskLevel::High,
            RiskLevel::Medium if medium >= 2 => RiskLevel::High,
            RiskLevel::Medium => RiskLevel::Medium,
            RiskLevel::Low => RiskLevel::Low,
        }
    }

    /// Classify a flow's dependency graph
    ///
    /// A cycle is CRITICAL and returned immediately. Dangling references are
    /// HIGH. Chain depth above [`VERY_LONG_CHAIN`] is MEDIUM and above
    /// [`LONG_CHAIN`] is only noted.
    pub fn analyze_flow_dependencies(&self, steps: &[ExecutionStep]) -> RiskAssessment {
        let mut assessment = RiskAssessment::default();
        let graph: HashMap<&str, Vec<&str>> = steps
            .iter()
            .map(|s| {
                (
                    s.step_id.as_str(),
                    s.depends_on.iter().map(|d| d.as_str()).collect(),
                )
            })
            .collect();

        let mut visited = HashSet::new();
        let mut stack = HashSet::new();
        for step in steps {
            if let Some(node) = find_cycle(&step.step_id, &graph, &mut visited, &mut stack) {
                assessment.raise(
                    RiskLevel::Critical,
                    format!("Circular dependency detected at step '{}'", node),
                );
                return assessment;
            }
        }

        for step in steps {
            for dep in &step.depends_on {
                if !graph.contains_key(dep.as_str()) {
                    assessment.raise(
                        RiskLevel::High,
                        format!(
                            "Step '{}' depends on missing step '{}'",
                            step.step_id, dep
                        ),
                    );
                }
            }
        }

        let mut depths = HashMap::new();
        let longest = steps
            .iter()
            .map(|s| chain_depth(&s.step_id, &graph, &mut depths))
            .max()
            .unwrap_or(0);

        if longest > VERY_LONG_CHAIN {
            assessment.raise(
                RiskLevel::Medium,
                format!("Very long dependency chain ({} steps)", longest),
            );
        } else if longest > LONG_CHAIN {
            assessment.raise(
                RiskLevel::Low,
                format!("Long dependency chain ({} steps)", longest),
            );
        }
        assessment
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// DFS with a recursion stack; returns a node on the first back edge found
fn find_cycle<'a>(
    node: &'a str,
    graph: &HashMap<&'a str, Vec<&'a str>>,
    visited: &mut HashSet<&'a str>,
    stack: &mut HashSet<&'a str>,
) -> Option<&'a str> {
    if stack.contains(node) {
        return Some(node);
    }
    if !visited.insert(node) {
        return None;
    }

    stack.insert(node);
    if let Some(deps) = graph.get(node) {
        for &dep in deps {
            if graph.contains_key(dep) {
                if let Some(found) = find_cycle(dep, graph, visited, stack) {
                    return Some(found);
                }
            }
        }
    }
    stack.remove(node);
    None
}

/// Number of steps on the longest chain ending at `node`; graph must be acyclic
fn chain_depth<'a>(
    node: &'a str,
    graph: &HashMap<&'a str, Vec<&'a str>>,
    memo: &mut HashMap<&'a str, usize>,
) -> usize {
    if let Some(depth) = memo.get(node) {
        return *depth;
    }
    let deepest = graph
        .get(node)
        .map(|deps| {
            deps.iter()
                .copied()
                .filter(|d| graph.contains_key(d))
                .map(|d| chain_depth(d, graph, memo))
                .max()
                .unwrap_or(0)
        })
        .unwrap_or(0);
    memo.insert(node, deepest + 1);
    deepest + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghostrun_core::RetryPolicy;
    use serde_json::json;

    fn step(id: &str) -> ExecutionStep {
        ExecutionStep::new(id, id).with_timeout(1000)
    }

    fn response(tool: &str, success: bool, ms: u64) -> MockConnectorResponse {
        MockConnectorResponse {
            connector_name: tool.to_string(),
            tool_name: tool.to_string(),
            action: "get".to_string(),
            success,
            response_data: json!({}),
            response_time_ms: ms,
            simulation_notes: vec![],
        }
    }

    #[test]
    fn test_critical_action_ignores_tool() {
        let analyzer = RiskAnalyzer::new();
        let s = step("a").with_tool("http", "delete_production_database");
        assert_eq!(analyzer.action_risk(&s).level, RiskLevel::Critical);
        assert_eq!(analyzer.analyze_step_risk(&s, &[]).level, RiskLevel::Critical);
    }

    #[test]
    fn test_action_tiers() {
        let analyzer = RiskAnalyzer::new();
        assert_eq!(
            analyzer.action_risk(&step("a").with_tool("http", "refund_order")).level,
            RiskLevel::High
        );
        assert_eq!(
            analyzer.action_risk(&step("a").with_tool("http", "send_email")).level,
            RiskLevel::Medium
        );
        assert_eq!(
            analyzer.action_risk(&step("a").with_tool("http", "get")).level,
            RiskLevel::Low
        );
    }

    #[test]
    fn test_tool_tiers() {
        let analyzer = RiskAnalyzer::new();
        assert_eq!(
            analyzer.tool_risk(&step("a").with_tool("stripe", "get")).level,
            RiskLevel::High
        );
        assert_eq!(
            analyzer.tool_risk(&step("a").with_tool("redis", "get")).level,
            RiskLevel::Medium
        );
        assert_eq!(
            analyzer.tool_risk(&step("a").with_tool("live-api", "get")).level,
            RiskLevel::Critical
        );
        assert_eq!(
            analyzer.tool_risk(&step("a").with_tool("http", "get")).level,
            RiskLevel::Low
        );
    }

    #[test]
    fn test_parameter_risk() {
        let analyzer = RiskAnalyzer::new();
        let critical = step("a").with_parameter("env", json!("production"));
        assert_eq!(analyzer.parameter_risk(&critical).level, RiskLevel::Critical);

        let sensitive = step("a").with_parameter("api_token", json!("x"));
        assert_eq!(analyzer.parameter_risk(&sensitive).level, RiskLevel::High);

        let plain = step("a").with_parameter("region", json!("us-east-1"));
        assert_eq!(analyzer.parameter_risk(&plain).level, RiskLevel::Low);
    }

    #[test]
    fn test_monetary_thresholds_add_reasons() {
        let analyzer = RiskAnalyzer::new();
        let large = step("a").with_parameter("amount", json!(25_000));
        let reasons = analyzer.parameter_risk(&large).reasons;
        assert!(reasons.iter().any(|r| r.contains("Large monetary value")));

        let medium = step("a").with_parameter("price", json!("1500"));
        let reasons = analyzer.parameter_risk(&medium).reasons;
        assert!(reasons.iter().any(|r| r.contains("Significant monetary value")));
    }

    #[test]
    fn test_response_risk() {
        let analyzer = RiskAnalyzer::new();
        assert_eq!(
            analyzer.response_risk(&[response("http", false, 10)]).level,
            RiskLevel::High
        );
        assert_eq!(
            analyzer.response_risk(&[response("http", true, 6000)]).level,
            RiskLevel::Medium
        );
        assert_eq!(
            analyzer.response_risk(&[response("stripe", true, 10)]).level,
            RiskLevel::High
        );
        assert_eq!(
            analyzer.response_risk(&[response("http", true, 10)]).level,
            RiskLevel::Low
        );
    }

    #[test]
    fn test_configuration_risk() {
        let analyzer = RiskAnalyzer::new();
        let orphan_delete = step("a").with_tool("http", "delete");
        assert_eq!(
            analyzer.configuration_risk(&orphan_delete).level,
            RiskLevel::High
        );

        let guarded_delete = step("b").with_tool("http", "delete").depends_on("a");
        assert_eq!(
            analyzer.configuration_risk(&guarded_delete).level,
            RiskLevel::Low
        );

        let retries = step("a").with_retry(RetryPolicy {
            max_attempts: 8,
            ..RetryPolicy::default()
        });
        assert_eq!(analyzer.configuration_risk(&retries).level, RiskLevel::Medium);

        let slow = step("a").with_timeout(400_000);
        assert_eq!(analyzer.configuration_risk(&slow).level, RiskLevel::Medium);
    }

    #[test]
    fn test_missing_timeout_is_a_low_warning() {
        let analyzer = RiskAnalyzer::new();
        let s = ExecutionStep::new("a", "a");
        let assessment = analyzer.configuration_risk(&s);
        assert_eq!(assessment.level, RiskLevel::Low);
        assert_eq!(assessment.reasons, vec!["No timeout configured".to_string()]);
    }

    #[test]
    fn test_flow_risk_compounding() {
        let analyzer = RiskAnalyzer::new();
        use RiskLevel::*;
        assert_eq!(analyzer.combine_flow_risk([Medium, Medium, Low]), High);
        assert_eq!(analyzer.combine_flow_risk([Medium, Low, Low]), Medium);
        assert_eq!(analyzer.combine_flow_risk([Low, Critical, Medium]), Critical);
        assert_eq!(analyzer.combine_flow_risk([Low, High]), High);
        assert_eq!(analyzer.combine_flow_risk([Low, Low]), Low);
        assert_eq!(analyzer.combine_flow_risk([]), Low);
    }

    #[test]
    fn test_cycle_is_critical() {
        let analyzer = RiskAnalyzer::new();
        let steps = vec![step("a").depends_on("b"), step("b").depends_on("a")];
        let assessment = analyzer.analyze_flow_dependencies(&steps);
        assert_eq!(assessment.level, RiskLevel::Critical);
        assert_eq!(assessment.reasons.len(), 1);
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let analyzer = RiskAnalyzer::new();
        let steps = vec![step("a").depends_on("a")];
        assert_eq!(
            analyzer.analyze_flow_dependencies(&steps).level,
            RiskLevel::Critical
        );
    }

    #[test]
    fn test_missing_dependency_is_high() {
        let analyzer = RiskAnalyzer::new();
        let steps = vec![step("a").depends_on("ghost")];
        let assessment = analyzer.analyze_flow_dependencies(&steps);
        assert_eq!(assessment.level, RiskLevel::High);
        assert!(assessment.reasons[0].contains("ghost"));
    }

    #[test]
    fn test_chain_depth_thresholds() {
        let analyzer = RiskAnalyzer::new();
        let chain = |len: usize| -> Vec<ExecutionStep> {
            (0..len)
                .map(|i| {
                    let s = step(&format!("s{}", i));
                    if i == 0 {
                        s
                    } else {
                        s.depends_on(format!("s{}", i - 1))
                    }
                })
                .collect()
        };

        let short = analyzer.analyze_flow_dependencies(&chain(5));
        assert_eq!(short.level, RiskLevel::Low);
        assert!(short.reasons.is_empty());

        let long = analyzer.analyze_flow_dependencies(&chain(6));
        assert_eq!(long.level, RiskLevel::Low);
        assert_eq!(long.reasons.len(), 1);

        let very_long = analyzer.analyze_flow_dependencies(&chain(11));
        assert_eq!(very_long.level, RiskLevel::Medium);
    }

    #[test]
    fn test_critical_substring_never_lowers_risk() {
        let analyzer = RiskAnalyzer::new();
        let base = step("a")
            .with_tool("redis", "send_update")
            .with_parameter("ttl", json!(60));
        let before = analyzer.analyze_step_risk(&base, &[]).level;

        let variants = [
            step("a")
                .with_tool("redis", "send_update_prod")
                .with_parameter("ttl", json!(60)),
            step("a")
                .with_tool("redis_main", "send_update")
                .with_parameter("ttl", json!(60)),
            base.clone().with_parameter("target", json!("live")),
        ];
        for variant in variants {
            let after = analyzer.analyze_step_risk(&variant, &[]).level;
            assert!(after >= before);
            assert_eq!(after, RiskLevel::Critical);
        }
    }
}
