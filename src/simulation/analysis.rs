//! Report-level analysis over simulated flows

use std::collections::{BTreeSet, HashMap, HashSet};

use ghostrun_core::{
    EngineSettings, ExecutablePlan, ExecutionFlow, FlowSimulationResult, PreflightRecommendation,
    RecommendationCategory, ResourceEstimate, RiskLevel, StepSimulationResult, StepType,
};

use crate::connectors::ConnectorRegistry;
use crate::risk::patterns::sensitive_key_match;

fn all_steps(flows: &[FlowSimulationResult]) -> impl Iterator<Item = &StepSimulationResult> {
    flows.iter().flat_map(|f| f.step_results.iter())
}

/// Recommendations for risky, slow, or insecure plans
pub fn recommendations(
    flows: &[FlowSimulationResult],
    security_issues: &[String],
    policy_violations: &[String],
    analyze_performance: bool,
    settings: &EngineSettings,
) -> Vec<PreflightRecommendation> {
    let mut recommendations = Vec::new();

    let risky: Vec<&StepSimulationResult> = all_steps(flows)
        .filter(|s| s.risk_level.is_high_or_above())
        .collect();
    if !risky.is_empty() {
        let priority = risky
            .iter()
            .map(|s| s.risk_level)
            .max()
            .unwrap_or(RiskLevel::High);
        recommendations.push(PreflightRecommendation {
            category: RecommendationCategory::RiskMitigation,
            priority,
            title: "Mitigate high-risk steps".to_string(),
            description: format!(
                "{} step(s) were rated HIGH or CRITICAL risk",
                risky.len()
            ),
            affected_steps: risky.iter().map(|s| s.step_id.clone()).collect(),
            suggested_actions: vec![
                "Review the configuration of each high-risk step".to_string(),
                "Add approval steps before destructive or financial operations".to_string(),
                "Define rollback procedures for state-changing steps".to_string(),
            ],
        });
    }

    if analyze_performance {
        let slow: Vec<&StepSimulationResult> = all_steps(flows)
            .filter(|s| s.execution_time_ms > settings.slow_step_threshold_ms)
            .collect();
        if !slow.is_empty() {
            recommendations.push(PreflightRecommendation {
                category: RecommendationCategory::PerformanceOptimization,
                priority: RiskLevel::Medium,
                title: "Optimize slow steps".to_string(),
                description: format!(
                    "{} step(s) exceed {}ms of estimated execution time",
                    slow.len(),
                    settings.slow_step_threshold_ms
                ),
                affected_steps: slow.iter().map(|s| s.step_id.clone()).collect(),
                suggested_actions: vec![
                    "Run independent steps in parallel".to_string(),
                    "Optimize or cache the slow operations".to_string(),
                    "Set explicit timeouts on long-running steps".to_string(),
                ],
            });
        }
    }

    if !security_issues.is_empty() || !policy_violations.is_empty() {
        recommendations.push(PreflightRecommendation {
            category: RecommendationCategory::SecurityHardening,
            priority: RiskLevel::High,
            title: "Resolve security and policy findings".to_string(),
            description: format!(
                "{} security issue(s) and {} policy violation(s) found",
                security_issues.len(),
                policy_violations.len()
            ),
            affected_steps: Vec::new(),
            suggested_actions: vec![
                "Restrict tools to the plan's allowlist".to_string(),
                "Require approval for critical operations".to_string(),
                "Move secrets out of step parameters".to_string(),
            ],
        });
    }

    recommendations
}

/// Upper-bound resource estimate from flow sizes
pub fn estimate_resources(
    plan: &ExecutablePlan,
    flows: &[FlowSimulationResult],
    registry: &ConnectorRegistry,
    settings: &EngineSettings,
    estimate_cost: bool,
) -> ResourceEstimate {
    let concurrent_steps = plan
        .flows
        .iter()
        .map(|f| f.steps.len())
        .max()
        .unwrap_or(0);

    let external_services: BTreeSet<String> = plan
        .flows
        .iter()
        .flat_map(|f| f.steps.iter())
        .filter_map(|s| s.tool.as_deref())
        .filter(|t| !t.is_empty())
        .map(|tool| {
            registry
                .connector_for_tool(tool)
                .map(|c| c.name().to_string())
                .unwrap_or_else(|| tool.to_string())
        })
        .collect();

    let estimated_cost_usd = estimate_cost.then(|| {
        all_steps(flows)
            .flat_map(|s| s.connector_responses.iter())
            .map(|r| registry.call_cost(&r.tool_name))
            .sum::<f64>()
    });

    ResourceEstimate {
        cpu: format!(
            "{}m",
            concurrent_steps as u64 * settings.cpu_millicores_per_step
        ),
        memory: format!(
            "{}Mi",
            concurrent_steps as u64 * settings.memory_mib_per_step
        ),
        concurrent_steps,
        external_services: external_services.into_iter().collect(),
        estimated_cost_usd,
    }
}

/// Allowlist, approval, and (optionally) secret-handling findings
pub fn security_issues(
    plan: &ExecutablePlan,
    flows: &[FlowSimulationResult],
    include_parameter_advisories: bool,
) -> Vec<String> {
    let context = &plan.security_context;
    let mut issues = Vec::new();

    for flow in &plan.flows {
        for step in &flow.steps {
            if let Some(tool) = step.tool.as_deref() {
                if !context.allows_tool(tool) {
                    issues.push(format!(
                        "Step '{}' uses tool '{}' outside the allowed tools list",
                        step.step_id, tool
                    ));
                }
            }
        }
    }

    if !context.requires_approval {
        for step in all_steps(flows).filter(|s| s.risk_level == RiskLevel::Critical) {
            issues.push(format!(
                "Critical-risk step '{}' runs without required approval",
                step.step_id
            ));
        }
    }

    if include_parameter_advisories {
        for flow in &plan.flows {
            for step in &flow.steps {
                for key in step.parameters.keys() {
                    if sensitive_key_match(key).is_some() {
                        issues.push(format!(
                            "Step '{}' passes sensitive parameter '{}' in plain text",
                            step.step_id, key
                        ));
                    }
                }
            }
        }
    }

    issues
}

/// Steps matched by an approval rule with no approval step among their dependencies
pub fn policy_violations(plan: &ExecutablePlan) -> Vec<String> {
    let rules = &plan.security_context.approval_rules;
    if rules.is_empty() {
        return Vec::new();
    }

    let mut violations = Vec::new();
    for flow in &plan.flows {
        for step in &flow.steps {
            if step.step_type == Some(StepType::Approval) {
                continue;
            }
            for rule in rules.iter().filter(|r| r.matches(step)) {
                if !has_prior_approval(flow, &step.step_id) {
                    violations.push(format!(
                        "Step '{}' matches approval rule '{}' but no approval step precedes it",
                        step.step_id, rule.name
                    ));
                }
            }
        }
    }
    violations
}

/// Whether any transitive dependency of `step_id` is an approval step
fn has_prior_approval(flow: &ExecutionFlow, step_id: &str) -> bool {
    let by_id: HashMap<&str, _> = flow
        .steps
        .iter()
        .map(|s| (s.step_id.as_str(), s))
        .collect();

    let mut seen = HashSet::new();
    let mut pending: Vec<&str> = by_id
        .get(step_id)
        .map(|s| s.depends_on.iter().map(|d| d.as_str()).collect())
        .unwrap_or_default();

    while let Some(id) = pending.pop() {
        if !seen.insert(id) {
            continue;
        }
        let Some(dep) = by_id.get(id) else {
            continue;
        };
        if dep.step_type == Some(StepType::Approval) {
            return true;
        }
        pending.extend(dep.depends_on.iter().map(|d| d.as_str()));
    }
    false
}

/// Steps taking more than `bottleneck_ratio` of their flow's total time
pub fn performance_bottlenecks(
    flows: &[FlowSimulationResult],
    settings: &EngineSettings,
) -> Vec<String> {
    let mut bottlenecks = Vec::new();
    for flow in flows {
        if flow.total_execution_time_ms == 0 {
            continue;
        }
        let total = flow.total_execution_time_ms as f64;
        for step in &flow.step_results {
            let share = step.execution_time_ms as f64 / total;
            if share > settings.bottleneck_ratio {
                bottlenecks.push(format!(
                    "Step '{}' in flow '{}' takes {}ms of {}ms ({:.0}%)",
                    step.step_id,
                    flow.flow_id,
                    step.execution_time_ms,
                    flow.total_execution_time_ms,
                    share * 100.0
                ));
            }
        }
    }
    bottlenecks
}
