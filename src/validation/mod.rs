//! Validation Engine
//!
//! Structural checks run before simulation. Content problems are returned as
//! [`ValidationIssue`]s, never raised. Running the engine twice on the same
//! plan yields the same issues in the same order.

mod issue;

pub use issue::{Severity, ValidationIssue};

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use ghostrun_core::{
    ExecutablePlan, ExecutionFlow, ExecutionStep, GhostRunRequest, RetryPolicy,
};
use regex::Regex;
use serde_json::Value;

use crate::risk::patterns::sensitive_key_match;

/// Upper bound on a step timeout
pub const MAX_TIMEOUT_MS: i64 = 3_600_000;
/// Largest accepted string parameter
pub const MAX_STRING_PARAM_BYTES: usize = 10 * 1024;
/// Largest accepted structured parameter, serialized
pub const MAX_STRUCTURED_PARAM_BYTES: usize = 50 * 1024;

const MAX_RETRY_ATTEMPTS: i64 = 10;
const MAX_RETRY_DELAY_MS: i64 = 60_000;

fn quantity_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^\d+(\.\d+)?[mMkKgGtT]?[iI]?$").ok())
        .as_ref()
}

/// Whether `value` is a Kubernetes-style quantity such as `500m` or `2Gi`
pub fn is_valid_quantity(value: &str) -> bool {
    quantity_pattern().is_some_and(|p| p.is_match(value))
}

/// Stateless plan validator
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationEngine;

impl ValidationEngine {
    pub fn new() -> Self {
        Self
    }

    /// Validate a plan against the request that will simulate it
    ///
    /// With `strict_validation` every warning is promoted to an error.
    pub fn validate_plan(
        &self,
        plan: &ExecutablePlan,
        request: &GhostRunRequest,
    ) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        self.check_plan_fields(plan, &mut issues);

        let mut seen_flows = HashSet::new();
        for flow in &plan.flows {
            if !flow.flow_id.is_empty() && !seen_flows.insert(flow.flow_id.as_str()) {
                issues.push(ValidationIssue::error(format!(
                    "Duplicate flow id '{}'",
                    flow.flow_id
                )));
            }
            self.check_flow(flow, &mut issues);
        }

        self.check_security_context(plan, &mut issues);
        self.check_resources(plan, &mut issues);
        self.check_request(plan, request, &mut issues);

        if request.strict_validation {
            for issue in &mut issues {
                issue.severity = Severity::Error;
            }
        }
        issues
    }

    /// Flat list of issue messages; empty means the plan is valid
    pub fn validate_plan_messages(
        &self,
        plan: &ExecutablePlan,
        request: &GhostRunRequest,
    ) -> Vec<String> {
        self.validate_plan(plan, request)
            .into_iter()
            .map(|i| i.message)
            .collect()
    }

    fn check_plan_fields(&self, plan: &ExecutablePlan, issues: &mut Vec<ValidationIssue>) {
        let required = [
            ("plan_id", &plan.plan_id),
            ("plan_hash", &plan.plan_hash),
            ("tenant_id", &plan.tenant_id),
            ("name", &plan.name),
            ("version", &plan.version),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                issues.push(ValidationIssue::error(format!(
                    "Plan is missing required field '{}'",
                    field
                )));
            }
        }

        if plan.flows.is_empty() {
            issues.push(ValidationIssue::error("Plan has no flows"));
        }

        if plan.main_flow.trim().is_empty() {
            issues.push(ValidationIssue::error(
                "Plan is missing required field 'main_flow'",
            ));
        } else if plan.flow(&plan.main_flow).is_none() {
            issues.push(ValidationIssue::error(format!(
                "Main flow '{}' is not defined in plan flows",
                plan.main_flow
            )));
        }
    }

    fn check_flow(&self, flow: &ExecutionFlow, issues: &mut Vec<ValidationIssue>) {
        let label = if flow.flow_id.is_empty() {
            "<unnamed>"
        } else {
            flow.flow_id.as_str()
        };

        if flow.flow_id.trim().is_empty() {
            issues.push(ValidationIssue::error(
                "Flow is missing required field 'flow_id'",
            ));
        }
        if flow.name.trim().is_empty() {
            issues.push(ValidationIssue::error(format!(
                "Flow '{}' is missing required field 'name'",
                label
            )));
        }
        if flow.steps.is_empty() {
            issues.push(ValidationIssue::error(format!(
                "Flow '{}' has no steps",
                label
            )));
        }

        if flow.parallel_execution {
            if let Some(max) = flow.max_concurrency {
                if max <= 0 || max as usize > flow.steps.len() {
                    issues.push(ValidationIssue::error(format!(
                        "Flow '{}' max_concurrency {} must be between 1 and {}",
                        label,
                        max,
                        flow.steps.len()
                    )));
                }
            }
        }

        if !flow.on_failure.is_known() {
            issues.push(ValidationIssue::error(format!(
                "Flow '{}' has invalid on_failure strategy '{}'",
                label, flow.on_failure
            )));
        }

        let mut seen_steps = HashSet::new();
        for step in &flow.steps {
            if !step.step_id.is_empty() && !seen_steps.insert(step.step_id.as_str()) {
                issues.push(ValidationIssue::error(format!(
                    "Duplicate step id '{}' in flow '{}'",
                    step.step_id, label
                )));
            }
            self.check_step(label, step, issues);
        }

        self.check_dependencies(label, flow, issues);
    }

    fn check_step(&self, flow: &str, step: &ExecutionStep, issues: &mut Vec<ValidationIssue>) {
        let label = if step.step_id.is_empty() {
            "<unnamed>"
        } else {
            step.step_id.as_str()
        };

        if step.step_id.trim().is_empty() {
            issues.push(ValidationIssue::error(format!(
                "Step in flow '{}' is missing required field 'step_id'",
                flow
            )));
        }
        if step.name.trim().is_empty() {
            issues.push(ValidationIssue::error(format!(
                "Step '{}' is missing required field 'name'",
                label
            )));
        }
        match &step.step_type {
            None => issues.push(ValidationIssue::error(format!(
                "Step '{}' is missing required field 'step_type'",
                label
            ))),
            Some(step_type) if !step_type.is_known() => {
                issues.push(ValidationIssue::error(format!(
                    "Step '{}' has invalid step_type '{}'",
                    label, step_type
                )))
            }
            Some(_) => {}
        }

        let has_tool = step.tool.as_deref().is_some_and(|t| !t.trim().is_empty());
        let has_action = step.action.as_deref().is_some_and(|a| !a.trim().is_empty());
        if has_action && !has_tool {
            issues.push(ValidationIssue::error(format!(
                "Step '{}' specifies an action without a tool",
                label
            )));
        }

        if let Some(timeout) = step.timeout {
            if timeout <= 0 || timeout > MAX_TIMEOUT_MS {
                issues.push(ValidationIssue::error(format!(
                    "Step '{}' timeout {}ms must be in (0, {}]",
                    label, timeout, MAX_TIMEOUT_MS
                )));
            }
        }

        if let Some(policy) = &step.retry_policy {
            self.check_retry_policy(label, policy, issues);
        }

        for (key, value) in &step.parameters {
            if sensitive_key_match(key).is_some() {
                issues.push(ValidationIssue::warning(format!(
                    "Step '{}' parameter '{}' looks sensitive; pass it by reference",
                    label, key
                )));
            }
            if let Some(size) = oversized(value) {
                issues.push(ValidationIssue::error(format!(
                    "Step '{}' parameter '{}' is too large ({} bytes)",
                    label, key, size
                )));
            }
        }
    }

    fn check_retry_policy(
        &self,
        step: &str,
        policy: &RetryPolicy,
        issues: &mut Vec<ValidationIssue>,
    ) {
        if !(1..=MAX_RETRY_ATTEMPTS).contains(&policy.max_attempts) {
            issues.push(ValidationIssue::error(format!(
                "Step '{}' retry max_attempts {} must be between 1 and {}",
                step, policy.max_attempts, MAX_RETRY_ATTEMPTS
            )));
        }
        if !(0..=MAX_RETRY_DELAY_MS).contains(&policy.delay) {
            issues.push(ValidationIssue::error(format!(
                "Step '{}' retry delay {}ms must be between 0 and {}",
                step, policy.delay, MAX_RETRY_DELAY_MS
            )));
        }
        if !policy.backoff.is_known() {
            issues.push(ValidationIssue::error(format!(
                "Step '{}' has invalid retry backoff '{}'",
                step, policy.backoff
            )));
        }
    }

    fn check_dependencies(
        &self,
        flow_label: &str,
        flow: &ExecutionFlow,
        issues: &mut Vec<ValidationIssue>,
    ) {
        let ids: HashSet<&str> = flow.steps.iter().map(|s| s.step_id.as_str()).collect();
        for step in &flow.steps {
            for dep in &step.depends_on {
                if !ids.contains(dep.as_str()) {
                    issues.push(ValidationIssue::error(format!(
                        "Step '{}' in flow '{}' depends on unknown step '{}'",
                        step.step_id, flow_label, dep
                    )));
                }
            }
        }

        for cycle in find_cycles(flow) {
            issues.push(ValidationIssue::error(format!(
                "Circular dependency in flow '{}': {}",
                flow_label,
                cycle.join(" -> ")
            )));
        }
    }

    fn check_security_context(&self, plan: &ExecutablePlan, issues: &mut Vec<ValidationIssue>) {
        let context = &plan.security_context;
        if context.allowed_tools.is_empty() {
            return;
        }

        let mut reported = HashSet::new();
        for flow in &plan.flows {
            for step in &flow.steps {
                let Some(tool) = step.tool.as_deref() else {
                    continue;
                };
                if !context.allows_tool(tool) && reported.insert(tool) {
                    issues.push(ValidationIssue::error(format!(
                        "Tool '{}' used by step '{}' is not in the allowed tools list",
                        tool, step.step_id
                    )));
                }
            }
        }
    }

    fn check_resources(&self, plan: &ExecutablePlan, issues: &mut Vec<ValidationIssue>) {
        let resources = &plan.resource_requirements;
        let specs = [
            ("cpu", &resources.cpu),
            ("memory", &resources.memory),
            ("storage", &resources.storage),
        ];
        for (field, value) in specs {
            if let Some(value) = value {
                if !is_valid_quantity(value) {
                    issues.push(ValidationIssue::error(format!(
                        "Resource {} '{}' is not a valid quantity",
                        field, value
                    )));
                }
            }
        }
    }

    fn check_request(
        &self,
        plan: &ExecutablePlan,
        request: &GhostRunRequest,
        issues: &mut Vec<ValidationIssue>,
    ) {
        if !request.simulation_mode.is_known() {
            issues.push(ValidationIssue::error(format!(
                "Invalid simulation mode '{}'; expected one of full, fast, security",
                request.simulation_mode
            )));
        }
        if request.plan_hash != plan.plan_hash {
            issues.push(ValidationIssue::error(format!(
                "Request plan_hash '{}' does not match plan '{}'",
                request.plan_hash, plan.plan_hash
            )));
        }
    }
}

/// Serialized size of a parameter when it exceeds its limit
fn oversized(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) if s.len() > MAX_STRING_PARAM_BYTES => Some(s.len()),
        Value::Array(_) | Value::Object(_) => {
            let size = serde_json::to_string(value).map(|s| s.len()).unwrap_or(0);
            (size > MAX_STRUCTURED_PARAM_BYTES).then_some(size)
        }
        _ => None,
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Every cycle reachable by DFS, each as a closed path of step ids
///
/// Iterative three-colour walk; unknown dependencies are ignored here.
fn find_cycles(flow: &ExecutionFlow) -> Vec<Vec<String>> {
    let index: HashMap<&str, usize> = flow
        .steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.step_id.as_str(), i))
        .collect();
    let mut marks = vec![Mark::Unvisited; flow.steps.len()];
    let mut cycles = Vec::new();

    for root in 0..flow.steps.len() {
        if marks[root] != Mark::Unvisited {
            continue;
        }
        // (node, next dependency to explore)
        let mut path: Vec<(usize, usize)> = vec![(root, 0)];
        marks[root] = Mark::InProgress;

        while let Some(top) = path.last_mut() {
            let node = top.0;
            let deps = &flow.steps[node].depends_on;
            if top.1 >= deps.len() {
                marks[node] = Mark::Done;
                path.pop();
                continue;
            }
            let dep = &deps[top.1];
            top.1 += 1;

            let Some(&next) = index.get(dep.as_str()) else {
                continue;
            };
            match marks[next] {
                Mark::Unvisited => {
                    marks[next] = Mark::InProgress;
                    path.push((next, 0));
                }
                Mark::InProgress => {
                    let start = path.iter().position(|(n, _)| *n == next).unwrap_or(0);
                    let mut cycle: Vec<String> = path[start..]
                        .iter()
                        .map(|(n, _)| flow.steps[*n].step_id.clone())
                        .collect();
                    cycle.push(flow.steps[next].step_id.clone());
                    cycles.push(cycle);
                }
                Mark::Done => {}
            }
        }
    }
    cycles
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghostrun_core::{
        BackoffStrategy, FailureStrategy, ResourceRequirements, SecurityContext, SimulationMode,
        StepType,
    };
    use serde_json::json;

    fn step(id: &str) -> ExecutionStep {
        ExecutionStep::new(id, format!("Step {}", id)).with_timeout(1000)
    }

    fn plan_with(flow: ExecutionFlow) -> ExecutablePlan {
        ExecutablePlan::new("plan-1", "hash-1", "tenant-1", "Test plan").with_flow(flow)
    }

    fn messages(plan: &ExecutablePlan) -> Vec<String> {
        let request = GhostRunRequest::for_plan(plan);
        ValidationEngine::new().validate_plan_messages(plan, &request)
    }

    #[test]
    fn test_valid_plan_has_no_issues() {
        let plan = plan_with(
            ExecutionFlow::new("main", "Main")
                .with_step(step("a"))
                .with_step(step("b").depends_on("a")),
        );
        assert!(messages(&plan).is_empty());
    }

    #[test]
    fn test_missing_plan_fields() {
        let mut plan = plan_with(ExecutionFlow::new("main", "Main").with_step(step("a")));
        plan.plan_id.clear();
        plan.version = " ".to_string();
        let found = messages(&plan);
        assert!(found.iter().any(|m| m.contains("'plan_id'")));
        assert!(found.iter().any(|m| m.contains("'version'")));
    }

    #[test]
    fn test_main_flow_must_exist() {
        let mut plan = plan_with(ExecutionFlow::new("main", "Main").with_step(step("a")));
        plan.main_flow = "other".to_string();
        assert!(messages(&plan).iter().any(|m| m.contains("Main flow 'other'")));
    }

    #[test]
    fn test_empty_flow_and_no_flows() {
        let plan = plan_with(ExecutionFlow::new("main", "Main"));
        assert!(messages(&plan).iter().any(|m| m.contains("has no steps")));

        let empty = ExecutablePlan::new("p", "h", "t", "n");
        assert!(messages(&empty).iter().any(|m| m == "Plan has no flows"));
    }

    #[test]
    fn test_concurrency_bounds() {
        let mut flow = ExecutionFlow::new("main", "Main")
            .with_step(step("a"))
            .with_step(step("b"));
        flow.parallel_execution = true;
        flow.max_concurrency = Some(3);
        assert!(messages(&plan_with(flow.clone()))
            .iter()
            .any(|m| m.contains("max_concurrency")));

        flow.max_concurrency = Some(2);
        assert!(messages(&plan_with(flow.clone())).is_empty());

        flow.parallel_execution = false;
        flow.max_concurrency = Some(0);
        assert!(messages(&plan_with(flow)).is_empty());
    }

    #[test]
    fn test_invalid_enums() {
        let mut flow = ExecutionFlow::new("main", "Main")
            .with_step(step("a").with_type(StepType::from("teleport")))
            .with_step(
                step("b").with_retry(RetryPolicy {
                    backoff: BackoffStrategy::from("random"),
                    ..RetryPolicy::default()
                }),
            );
        flow.on_failure = FailureStrategy::from("explode");
        let found = messages(&plan_with(flow));
        assert!(found.iter().any(|m| m.contains("invalid step_type 'teleport'")));
        assert!(found.iter().any(|m| m.contains("invalid retry backoff 'random'")));
        assert!(found.iter().any(|m| m.contains("invalid on_failure strategy 'explode'")));
    }

    #[test]
    fn test_missing_step_type() {
        let mut s = step("a");
        s.step_type = None;
        let found = messages(&plan_with(ExecutionFlow::new("main", "Main").with_step(s)));
        assert!(found.iter().any(|m| m.contains("'step_type'")));
    }

    #[test]
    fn test_action_requires_tool() {
        let mut s = step("a");
        s.action = Some("send".to_string());
        let found = messages(&plan_with(ExecutionFlow::new("main", "Main").with_step(s)));
        assert!(found.iter().any(|m| m.contains("action without a tool")));
    }

    #[test]
    fn test_timeout_and_retry_bounds() {
        let flow = ExecutionFlow::new("main", "Main")
            .with_step(step("a").with_timeout(0))
            .with_step(step("b").with_timeout(MAX_TIMEOUT_MS + 1))
            .with_step(step("c").with_timeout(MAX_TIMEOUT_MS))
            .with_step(step("d").with_retry(RetryPolicy {
                max_attempts: 11,
                delay: -1,
                backoff: BackoffStrategy::Fixed,
            }));
        let found = messages(&plan_with(flow));
        assert!(found.iter().any(|m| m.starts_with("Step 'a' timeout")));
        assert!(found.iter().any(|m| m.starts_with("Step 'b' timeout")));
        assert!(!found.iter().any(|m| m.starts_with("Step 'c' timeout")));
        assert!(found.iter().any(|m| m.contains("max_attempts 11")));
        assert!(found.iter().any(|m| m.contains("delay -1ms")));
    }

    #[test]
    fn test_parameter_hygiene() {
        let flow = ExecutionFlow::new("main", "Main").with_step(
            step("a")
                .with_parameter("api_secret", json!("x"))
                .with_parameter("blob", json!("x".repeat(MAX_STRING_PARAM_BYTES + 1)))
                .with_parameter(
                    "rows",
                    json!(vec!["y".repeat(1024); 60]),
                ),
        );
        let plan = plan_with(flow);
        let issues = ValidationEngine::new().validate_plan(&plan, &GhostRunRequest::for_plan(&plan));

        let sensitive = issues
            .iter()
            .find(|i| i.message.contains("'api_secret'"))
            .unwrap();
        assert_eq!(sensitive.severity, Severity::Warning);
        assert!(issues
            .iter()
            .any(|i| i.is_error() && i.message.contains("'blob' is too large")));
        assert!(issues
            .iter()
            .any(|i| i.is_error() && i.message.contains("'rows' is too large")));
    }

    #[test]
    fn test_strict_mode_promotes_warnings() {
        let plan = plan_with(
            ExecutionFlow::new("main", "Main")
                .with_step(step("a").with_parameter("token", json!("x"))),
        );
        let mut request = GhostRunRequest::for_plan(&plan);
        request.strict_validation = true;
        let issues = ValidationEngine::new().validate_plan(&plan, &request);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].is_error());
    }

    #[test]
    fn test_duplicate_ids() {
        let plan = plan_with(
            ExecutionFlow::new("main", "Main")
                .with_step(step("a"))
                .with_step(step("a")),
        )
        .with_flow(ExecutionFlow::new("main", "Again").with_step(step("x")));
        let found = messages(&plan);
        assert!(found.iter().any(|m| m.contains("Duplicate step id 'a'")));
        assert!(found.iter().any(|m| m.contains("Duplicate flow id 'main'")));
    }

    #[test]
    fn test_missing_dependency_names_both_steps() {
        let plan = plan_with(
            ExecutionFlow::new("main", "Main").with_step(step("A").depends_on("ghost")),
        );
        let found = messages(&plan);
        assert!(found
            .iter()
            .any(|m| m.contains("'A'") && m.contains("'ghost'")));
    }

    #[test]
    fn test_cycle_is_reported_once_with_path() {
        let plan = plan_with(
            ExecutionFlow::new("main", "Main")
                .with_step(step("A").depends_on("B"))
                .with_step(step("B").depends_on("A")),
        );
        let found = messages(&plan);
        let cycles: Vec<_> = found
            .iter()
            .filter(|m| m.contains("Circular dependency"))
            .collect();
        assert_eq!(cycles.len(), 1);
        assert!(cycles[0].ends_with("A -> B -> A"));
    }

    #[test]
    fn test_allowlist_cross_check() {
        let plan = plan_with(
            ExecutionFlow::new("main", "Main")
                .with_step(step("a").with_tool("http", "get"))
                .with_step(step("b").with_tool("stripe", "create_charge")),
        )
        .with_security(SecurityContext {
            allowed_tools: vec!["http".to_string()],
            ..SecurityContext::default()
        });
        let found = messages(&plan);
        assert!(found.iter().any(|m| m.contains("Tool 'stripe'")));
        assert!(!found.iter().any(|m| m.contains("Tool 'http'")));
    }

    #[test]
    fn test_resource_quantities() {
        for good in ["500m", "2", "1.5", "2Gi", "128Mi", "1k"] {
            assert!(is_valid_quantity(good), "{} should be valid", good);
        }
        for bad in ["", "two", "2 Gi", "-1", "1.", "1Gb"] {
            assert!(!is_valid_quantity(bad), "{} should be invalid", bad);
        }

        let mut plan = plan_with(ExecutionFlow::new("main", "Main").with_step(step("a")));
        plan.resource_requirements = ResourceRequirements {
            cpu: Some("lots".to_string()),
            memory: Some("256Mi".to_string()),
            ..ResourceRequirements::default()
        };
        let found = messages(&plan);
        assert_eq!(found, vec!["Resource cpu 'lots' is not a valid quantity".to_string()]);
    }

    #[test]
    fn test_request_checks() {
        let plan = plan_with(ExecutionFlow::new("main", "Main").with_step(step("a")));
        let mut request = GhostRunRequest::for_plan(&plan)
            .with_mode(SimulationMode::Unknown("turbo".to_string()));
        request.plan_hash = "other".to_string();
        let found = ValidationEngine::new().validate_plan_messages(&plan, &request);
        assert!(found.iter().any(|m| m.contains("Invalid simulation mode 'turbo'")));
        assert!(found.iter().any(|m| m.contains("does not match")));
    }

    #[test]
    fn test_validation_is_idempotent() {
        let plan = plan_with(
            ExecutionFlow::new("main", "Main")
                .with_step(step("A").depends_on("B").with_parameter("password", json!("x")))
                .with_step(step("B").depends_on("A").depends_on("ghost")),
        );
        assert_eq!(messages(&plan), messages(&plan));
    }
}
