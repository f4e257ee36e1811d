use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use ghostrun_core::{
    EngineSettings, ExecutablePlan, ExecutionFlow, ExecutionStep, FlowSimulationResult,
    GhostRunRequest, MockConnectorResponse, OverallStatus, PreflightReport, RiskLevel,
    SimulationMetrics, SimulationMode, StepSimulationResult,
};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::analysis;
use super::graph::execution_order;
use crate::connectors::{CallOverrides, ConnectorRegistry};
use crate::errors::SimulationError;
use crate::risk::RiskAnalyzer;
use crate::validation::ValidationEngine;

/// Orchestrates validation, ordering, step simulation, and report assembly
pub struct SimulationEngine {
    registry: Arc<ConnectorRegistry>,
    validator: ValidationEngine,
    analyzer: RiskAnalyzer,
    settings: EngineSettings,
}

impl SimulationEngine {
    pub fn new(registry: Arc<ConnectorRegistry>) -> Self {
        Self {
            registry,
            validator: ValidationEngine::new(),
            analyzer: RiskAnalyzer::new(),
            settings: EngineSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn registry(&self) -> &ConnectorRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Minimal structural check; anything this rejects cannot be simulated
    pub fn check_structure(&self, plan: &ExecutablePlan) -> Result<(), SimulationError> {
        if plan.flows.is_empty() {
            return Err(SimulationError::InvalidPlan(
                "plan contains no flows".to_string(),
            ));
        }
        if plan.flow(&plan.main_flow).is_none() {
            return Err(SimulationError::MainFlowNotFound(plan.main_flow.clone()));
        }
        for flow in &plan.flows {
            for step in &flow.steps {
                if let Some(dep) = step.depends_on.iter().find(|d| flow.step(d).is_none()) {
                    return Err(SimulationError::UnknownDependency {
                        flow: flow.flow_id.clone(),
                        step: step.step_id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Simulate every flow of a plan and assemble the preflight report
    pub fn simulate_plan(
        &self,
        run_id: &str,
        plan: &ExecutablePlan,
        request: &GhostRunRequest,
    ) -> Result<(PreflightReport, SimulationMetrics), SimulationError> {
        let started = Instant::now();
        self.check_structure(plan)?;

        if !request.execution_context.is_empty() {
            debug!(
                run_id = %run_id,
                keys = ?request.execution_context.keys().collect::<Vec<_>>(),
                "Execution context supplied"
            );
        }

        let issues = self.validator.validate_plan(plan, request);
        let (errors, warnings): (Vec<_>, Vec<_>) = issues.into_iter().partition(|i| i.is_error());

        let mut metrics = SimulationMetrics {
            validation_errors: errors.len(),
            validation_warnings: warnings.len(),
            ..SimulationMetrics::default()
        };

        let mut flow_results = Vec::with_capacity(plan.flows.len());
        for flow in &plan.flows {
            let result = self.simulate_flow(flow, plan, request);
            for step in &result.step_results {
                metrics.record_step(step);
            }
            metrics.flows_simulated += 1;
            flow_results.push(result);
        }

        let execution_feasible = flow_results.iter().all(|f| f.would_complete);
        let overall_status = if execution_feasible && errors.is_empty() {
            OverallStatus::Pass
        } else {
            OverallStatus::Fail
        };
        let overall_risk_level = flow_results
            .iter()
            .map(|f| f.overall_risk_level)
            .max()
            .unwrap_or(RiskLevel::Low);

        let critical_issues: Vec<String> = errors.into_iter().map(|i| i.message).collect();
        let mut report_warnings: Vec<String> = warnings.into_iter().map(|i| i.message).collect();
        for flow in &flow_results {
            report_warnings.extend(
                flow.flow_issues
                    .iter()
                    .map(|issue| format!("Flow '{}': {}", flow.flow_id, issue)),
            );
        }

        let analyze_performance = request.wants_performance_analysis();
        let security_issues = analysis::security_issues(
            plan,
            &flow_results,
            request.simulation_mode == SimulationMode::Security,
        );
        let policy_violations = analysis::policy_violations(plan);
        let performance_bottlenecks = if analyze_performance {
            analysis::performance_bottlenecks(&flow_results, &self.settings)
        } else {
            Vec::new()
        };
        let recommendations = analysis::recommendations(
            &flow_results,
            &security_issues,
            &policy_violations,
            analyze_performance,
            &self.settings,
        );
        let resource_requirements = analysis::estimate_resources(
            plan,
            &flow_results,
            &self.registry,
            &self.settings,
            request.wants_cost_estimation(),
        );

        let steps = || flow_results.iter().flat_map(|f| f.step_results.iter());
        let total_steps = steps().count();
        let steps_with_issues = steps().filter(|s| s.has_issues()).count();
        let high_risk_steps = steps().filter(|s| s.risk_level.is_high_or_above()).count();
        let total_estimated_duration_ms =
            saturating_total(flow_results.iter().map(|f| f.total_execution_time_ms));

        let simulation_duration_ms = started.elapsed().as_millis() as u64;
        metrics.simulation_duration_ms = simulation_duration_ms;

        let report = PreflightReport {
            report_id: Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            tenant_id: plan.tenant_id.clone(),
            plan_hash: plan.plan_hash.clone(),
            generated_at: Utc::now(),
            simulation_duration_ms,
            overall_status,
            overall_risk_level,
            execution_feasible,
            flow_results,
            total_estimated_duration_ms,
            critical_issues,
            warnings: report_warnings,
            recommendations,
            resource_requirements,
            security_issues,
            policy_violations,
            performance_bottlenecks,
            total_steps,
            steps_with_issues,
            high_risk_steps,
        };

        info!(
            run_id = %run_id,
            plan_hash = %plan.plan_hash,
            status = %report.overall_status,
            risk = %report.overall_risk_level,
            steps = report.total_steps,
            "Plan simulation finished"
        );
        Ok((report, metrics))
    }

    /// Simulate one flow's steps sequentially in dependency order
    ///
    /// `parallel_execution` does not change this: steps are always simulated
    /// one at a time so timings and ordering stay reproducible.
    pub fn simulate_flow(
        &self,
        flow: &ExecutionFlow,
        plan: &ExecutablePlan,
        request: &GhostRunRequest,
    ) -> FlowSimulationResult {
        let order = execution_order(flow);
        let mut outcomes: HashMap<&str, bool> = HashMap::new();
        let mut step_results = Vec::with_capacity(flow.steps.len());

        for position in order.positions() {
            let step = &flow.steps[position];

            let mut dependency_issues = Vec::new();
            if order.is_unplaced(position) {
                dependency_issues.push(format!(
                    "Step '{}' could not be ordered because of a dependency cycle",
                    step.step_id
                ));
            }
            for dep in &step.depends_on {
                match outcomes.get(dep.as_str()) {
                    Some(true) => {}
                    Some(false) => dependency_issues
                        .push(format!("Dependency '{}' would not execute", dep)),
                    None if flow.step(dep).is_some() => dependency_issues.push(format!(
                        "Dependency '{}' is not simulated before this step",
                        dep
                    )),
                    None => {}
                }
            }

            let result = match self.simulate_step(step, plan, request, dependency_issues) {
                Ok(result) => result,
                Err(e) => {
                    warn!(
                        flow_id = %flow.flow_id,
                        step_id = %step.step_id,
                        error = %e,
                        "Step simulation failed"
                    );
                    StepSimulationResult::failed(&step.step_id, &step.name, e.to_string())
                }
            };
            outcomes.insert(step.step_id.as_str(), result.would_execute);
            step_results.push(result);
        }

        let dependency_risk = self.analyzer.analyze_flow_dependencies(&flow.steps);
        let combined = self
            .analyzer
            .combine_flow_risk(step_results.iter().map(|s| s.risk_level));

        FlowSimulationResult {
            flow_id: flow.flow_id.clone(),
            flow_name: flow.name.clone(),
            would_complete: step_results.iter().all(|s| s.would_execute),
            execution_order: order.step_ids(flow),
            total_execution_time_ms: saturating_total(
                step_results.iter().map(|s| s.execution_time_ms),
            ),
            overall_risk_level: combined.max(dependency_risk.level),
            critical_path_steps: slowest_steps(&step_results, self.settings.critical_path_len),
            flow_issues: dependency_risk.reasons,
            step_results,
        }
    }

    fn simulate_step(
        &self,
        step: &ExecutionStep,
        plan: &ExecutablePlan,
        request: &GhostRunRequest,
        dependency_issues: Vec<String>,
    ) -> Result<StepSimulationResult, SimulationError> {
        let mut validation_issues = Vec::new();
        let mut notes = Vec::new();
        let mut responses = Vec::new();

        if let Some(tool) = step.tool.as_deref().filter(|t| !t.is_empty()) {
            if !plan.security_context.allows_tool(tool) {
                validation_issues.push(format!("Tool '{}' is not in the allowed tools list", tool));
            }

            match self.registry.connector_for_tool(tool) {
                None => {
                    validation_issues.push(format!("Unknown connector for tool '{}'", tool));
                }
                Some(connector) => match step.action.as_deref() {
                    None => notes.push(format!(
                        "Tool '{}' declared without an action; no call simulated",
                        tool
                    )),
                    Some(action) => {
                        if !connector.supports_action(tool, action) {
                            validation_issues.push(format!(
                                "Action '{}' is not supported by connector '{}'",
                                action,
                                connector.name()
                            ));
                        }
                        if request.mock_external_calls {
                            let overrides = match request.connector_overrides.get(tool) {
                                Some(value) => CallOverrides::from_value(tool, value)?,
                                None => CallOverrides::default(),
                            };
                            responses.push(self.registry.simulate(
                                tool,
                                action,
                                &step.parameters,
                                &overrides,
                            ));
                        }
                    }
                },
            }
        }

        let base_ms = match step.timeout {
            Some(timeout) if timeout > 0 => timeout as u64,
            _ => self.settings.default_step_time_ms,
        };
        let latency_ms = saturating_total(responses.iter().map(|r| r.response_time_ms));
        let execution_time_ms = base_ms.saturating_add(latency_ms);

        let (risk_level, mut risk_factors) =
            self.analyzer.analyze_step_risk(step, &responses).into_parts();
        risk_factors.extend(notes);

        let validation_passed = validation_issues.is_empty();
        let would_execute =
            validation_passed && dependency_issues.is_empty() && responses.iter().all(|r| r.success);

        debug!(
            step_id = %step.step_id,
            would_execute,
            execution_time_ms,
            risk = %risk_level,
            "Simulated step"
        );

        Ok(StepSimulationResult {
            step_id: step.step_id.clone(),
            step_name: step.name.clone(),
            would_execute,
            execution_time_ms,
            simulated_outputs: simulated_outputs(step, &responses),
            connector_responses: responses,
            validation_passed,
            validation_issues,
            risk_level,
            risk_factors,
            dependency_issues,
        })
    }
}

/// Sum of millisecond timings, pinned at `u64::MAX`
fn saturating_total(times: impl Iterator<Item = u64>) -> u64 {
    times.fold(0u64, |acc, ms| acc.saturating_add(ms))
}

/// Ids of the `limit` slowest steps; ties keep simulation order
fn slowest_steps(results: &[StepSimulationResult], limit: usize) -> Vec<String> {
    let mut ranked: Vec<&StepSimulationResult> = results.iter().collect();
    ranked.sort_by(|a, b| b.execution_time_ms.cmp(&a.execution_time_ms));
    ranked
        .into_iter()
        .take(limit.min(3))
        .map(|s| s.step_id.clone())
        .collect()
}

/// Bind each declared output to a field of the last successful response
fn simulated_outputs(
    step: &ExecutionStep,
    responses: &[MockConnectorResponse],
) -> BTreeMap<String, Value> {
    let data = responses
        .iter()
        .rev()
        .find(|r| r.success)
        .map(|r| &r.response_data);

    step.outputs
        .iter()
        .map(|(name, source)| {
            let value = data
                .and_then(|d| lookup(d, source).or_else(|| lookup(d, name)))
                .cloned()
                .unwrap_or_else(|| json!(format!("<simulated:{}.{}>", step.step_id, name)));
            (name.clone(), value)
        })
        .collect()
}

/// Dotted-path lookup into a JSON object
fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    path.split('.').try_fold(data, |current, segment| current.get(segment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::FixedRandom;

    fn engine(draw: f64) -> SimulationEngine {
        SimulationEngine::new(Arc::new(ConnectorRegistry::new(Arc::new(FixedRandom(draw)))))
    }

    fn plan(flow: ExecutionFlow) -> ExecutablePlan {
        ExecutablePlan::new("plan-1", "hash-1", "tenant-1", "Plan").with_flow(flow)
    }

    #[test]
    fn test_structure_rejects_missing_main_flow() {
        let mut p = plan(ExecutionFlow::new("main", "Main").with_step(ExecutionStep::new("a", "a")));
        p.main_flow = "nope".to_string();
        assert!(matches!(
            engine(0.5).check_structure(&p),
            Err(SimulationError::MainFlowNotFound(_))
        ));
    }

    #[test]
    fn test_structure_rejects_empty_plan() {
        let p = ExecutablePlan::new("p", "h", "t", "n");
        assert!(matches!(
            engine(0.5).check_structure(&p),
            Err(SimulationError::InvalidPlan(_))
        ));
    }

    #[test]
    fn test_step_time_uses_timeout_or_default() {
        let e = engine(0.5);
        let p = plan(
            ExecutionFlow::new("main", "Main")
                .with_step(ExecutionStep::new("a", "a").with_timeout(2500))
                .with_step(ExecutionStep::new("b", "b")),
        );
        let request = GhostRunRequest::for_plan(&p);
        let flow = e.simulate_flow(&p.flows[0], &p, &request);
        let a = flow.step_results.iter().find(|s| s.step_id == "a").unwrap();
        let b = flow.step_results.iter().find(|s| s.step_id == "b").unwrap();
        assert_eq!(a.execution_time_ms, 2500);
        assert_eq!(b.execution_time_ms, 1000);
        assert_eq!(flow.total_execution_time_ms, 3500);
    }

    #[test]
    fn test_connector_latency_adds_to_step_time() {
        let e = engine(0.5);
        let p = plan(
            ExecutionFlow::new("main", "Main")
                .with_step(ExecutionStep::new("a", "a").with_tool("http", "get").with_timeout(100)),
        );
        let flow = e.simulate_flow(&p.flows[0], &p, &GhostRunRequest::for_plan(&p));
        // http typical latency is 200ms
        assert_eq!(flow.step_results[0].execution_time_ms, 300);
        assert!(flow.step_results[0].would_execute);
    }

    #[test]
    fn test_malformed_override_fails_only_that_step() {
        let e = engine(0.5);
        let p = plan(
            ExecutionFlow::new("main", "Main")
                .with_step(ExecutionStep::new("a", "a").with_tool("http", "get"))
                .with_step(ExecutionStep::new("b", "b").with_tool("redis", "get")),
        );
        let request =
            GhostRunRequest::for_plan(&p).with_override("http", json!({"success": "maybe"}));
        let flow = e.simulate_flow(&p.flows[0], &p, &request);

        let a = flow.step_results.iter().find(|s| s.step_id == "a").unwrap();
        assert!(!a.would_execute);
        assert_eq!(a.risk_level, RiskLevel::Critical);
        assert!(a.validation_issues[0].contains("Invalid connector override"));

        let b = flow.step_results.iter().find(|s| s.step_id == "b").unwrap();
        assert!(b.would_execute);
    }

    #[test]
    fn test_failed_dependency_propagates() {
        let e = engine(0.5);
        let p = plan(
            ExecutionFlow::new("main", "Main")
                .with_step(ExecutionStep::new("a", "a").with_tool("nonexistent_service", "run"))
                .with_step(ExecutionStep::new("b", "b").depends_on("a")),
        );
        let flow = e.simulate_flow(&p.flows[0], &p, &GhostRunRequest::for_plan(&p));
        let b = flow.step_results.iter().find(|s| s.step_id == "b").unwrap();
        assert!(!b.would_execute);
        assert_eq!(b.dependency_issues, vec!["Dependency 'a' would not execute"]);
        assert!(!flow.would_complete);
    }

    #[test]
    fn test_critical_path_is_top_three_by_time() {
        let e = engine(0.5);
        let flow = [4000, 1000, 3000, 2000, 5000]
            .iter()
            .enumerate()
            .fold(ExecutionFlow::new("main", "Main"), |f, (i, ms)| {
                f.with_step(ExecutionStep::new(format!("s{}", i), "step").with_timeout(*ms))
            });
        let p = plan(flow);
        let result = e.simulate_flow(&p.flows[0], &p, &GhostRunRequest::for_plan(&p));
        assert_eq!(result.critical_path_steps, vec!["s4", "s0", "s2"]);
    }

    #[test]
    fn test_outputs_bind_response_fields() {
        let e = engine(0.5);
        let p = plan(
            ExecutionFlow::new("main", "Main").with_step(
                ExecutionStep::new("charge", "Charge")
                    .with_tool("stripe", "create_charge")
                    .with_parameter("amount", json!(500))
                    .with_output("charge_id", "id")
                    .with_output("receipt", "receipt_url"),
            ),
        );
        let flow = e.simulate_flow(&p.flows[0], &p, &GhostRunRequest::for_plan(&p));
        let outputs = &flow.step_results[0].simulated_outputs;
        assert!(outputs["charge_id"].as_str().unwrap().starts_with("ch_sim_"));
        assert_eq!(outputs["receipt"], json!("<simulated:charge.receipt>"));
    }

    #[test]
    fn test_huge_timeouts_saturate_instead_of_overflowing() {
        let e = engine(0.5);
        let flow = (0..3).fold(ExecutionFlow::new("main", "Main"), |f, i| {
            f.with_step(ExecutionStep::new(format!("s{}", i), "step").with_timeout(i64::MAX))
        });
        let p = plan(flow);
        let (report, _) = e
            .simulate_plan("run-1", &p, &GhostRunRequest::for_plan(&p))
            .unwrap();
        assert_eq!(report.flow_results[0].step_results[0].execution_time_ms, i64::MAX as u64);
        assert_eq!(report.flow_results[0].total_execution_time_ms, u64::MAX);
        assert_eq!(report.total_estimated_duration_ms, u64::MAX);
        // Timeouts above one hour are validation errors
        assert_eq!(report.overall_status, OverallStatus::Fail);
    }

    #[test]
    fn test_huge_response_time_override_saturates_step_time() {
        let e = engine(0.5);
        let p = plan(
            ExecutionFlow::new("main", "Main")
                .with_step(ExecutionStep::new("a", "a").with_tool("http", "get").with_timeout(100)),
        );
        let request = GhostRunRequest::for_plan(&p)
            .with_override("http", json!({"response_time_ms": u64::MAX}));
        let flow = e.simulate_flow(&p.flows[0], &p, &request);
        assert_eq!(flow.step_results[0].execution_time_ms, u64::MAX);
        assert_eq!(flow.total_execution_time_ms, u64::MAX);
    }

    #[test]
    fn test_saturating_total() {
        assert_eq!(saturating_total([1u64, 2, 3].into_iter()), 6);
        assert_eq!(saturating_total([u64::MAX, 1].into_iter()), u64::MAX);
        assert_eq!(saturating_total(std::iter::empty()), 0);
    }

    #[test]
    fn test_lookup_dotted_path() {
        let data = json!({"a": {"b": {"c": 1}}});
        assert_eq!(lookup(&data, "a.b.c"), Some(&json!(1)));
        assert_eq!(lookup(&data, "a.x"), None);
        assert_eq!(lookup(&data, ""), None);
    }
}
