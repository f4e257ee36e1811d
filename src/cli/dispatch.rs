//! CLI command dispatch
//!
//! Builds the service graph from configuration, runs the selected command,
//! and maps the outcome to a process exit code.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ghostrun_core::{ExecutablePlan, GhostRunConfig, OverallStatus, PreflightReport, RunState};
use tracing::{debug, info};

use crate::cli::args::{Cli, Command, PlanArgs};
use crate::cli::{Error, Result, EXIT_ERROR, EXIT_FAIL, EXIT_PASS};
use crate::connectors::ConnectorRegistry;
use crate::lifecycle::{
    FileReportStorage, InMemoryReportStorage, ReportStorage, RunService, TracingEventPublisher,
};
use crate::logging::init_logging;
use crate::simulation::SimulationEngine;
use crate::validation::{ValidationEngine, ValidationIssue};

/// Exit code wrapper for CLI operations
pub type ExitCode = i32;

/// Run the parsed command and return its exit code
pub async fn run_cli(cli: Cli) -> ExitCode {
    let mut config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_ERROR;
        }
    };

    let outcome = match cli.command {
        Command::Simulate {
            plan,
            seed,
            report_dir,
            timeout_secs,
        } => {
            if seed.is_some() {
                config.connectors.seed = seed;
            }
            init_logging(&config.logging);
            simulate(
                &config,
                &plan,
                report_dir.as_deref(),
                Duration::from_secs(timeout_secs),
                cli.json,
            )
            .await
        }
        Command::Validate { plan } => {
            init_logging(&config.logging);
            validate(&plan, cli.json)
        }
    };

    match outcome {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            EXIT_ERROR
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<GhostRunConfig> {
    let config = match path {
        Some(path) => GhostRunConfig::load(path)?,
        None => GhostRunConfig::from_env()?,
    };
    Ok(config)
}

/// Read and parse a plan file
pub fn load_plan(path: &Path) -> Result<ExecutablePlan> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::InvalidArgs(format!("cannot read plan {:?}: {}", path, e)))?;
    let plan: ExecutablePlan = serde_json::from_str(&content)?;
    debug!("Loaded plan '{}' from {:?}", plan.plan_id, path);
    Ok(plan)
}

async fn simulate(
    config: &GhostRunConfig,
    args: &PlanArgs,
    report_dir: Option<&Path>,
    timeout: Duration,
    json: bool,
) -> Result<ExitCode> {
    let plan = load_plan(&args.plan)?;
    let request = args.request_for(&plan);
    let tenant = args.tenant_for(&plan);

    let registry = Arc::new(ConnectorRegistry::from_settings(&config.connectors));
    let engine = Arc::new(SimulationEngine::new(registry).with_settings(config.engine.clone()));
    let storage: Arc<dyn ReportStorage> = match report_dir {
        Some(dir) => Arc::new(FileReportStorage::new(dir)),
        None => Arc::new(InMemoryReportStorage::new()),
    };
    let service = RunService::new(engine, storage, Arc::new(TracingEventPublisher))
        .with_settings(config.lifecycle.clone());

    let started = service.start_simulation(&tenant, plan, request).await;
    let status = service
        .wait_for_completion(&started.run_id, timeout)
        .await
        .ok_or_else(|| {
            Error::Execution(format!(
                "run {} did not finish within {}s",
                started.run_id,
                timeout.as_secs()
            ))
        })?;

    match status.status {
        RunState::Completed => {
            let report = status
                .report
                .ok_or_else(|| Error::Execution("completed run carries no report".to_string()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", render_report(&report));
            }
            info!("Run {} finished with {}", status.run_id, report.overall_status);
            Ok(match report.overall_status {
                OverallStatus::Pass => EXIT_PASS,
                OverallStatus::Fail => EXIT_FAIL,
            })
        }
        RunState::Failed => {
            let message = status.error_message.unwrap_or_default();
            if json {
                println!("{}", serde_json::json!({ "run_id": status.run_id, "error": message }));
            } else {
                eprintln!("Simulation failed: {}", message);
            }
            Ok(EXIT_ERROR)
        }
        other => Err(Error::Execution(format!(
            "run {} ended in state {}",
            status.run_id, other
        ))),
    }
}

fn validate(args: &PlanArgs, json: bool) -> Result<ExitCode> {
    let plan = load_plan(&args.plan)?;
    let request = args.request_for(&plan);
    let issues = ValidationEngine::new().validate_plan(&plan, &request);

    if json {
        println!("{}", serde_json::to_string_pretty(&issues)?);
    } else {
        print!("{}", render_issues(&issues));
    }

    Ok(if issues.iter().any(ValidationIssue::is_error) {
        EXIT_FAIL
    } else {
        EXIT_PASS
    })
}

/// Human-readable preflight summary
pub fn render_report(report: &PreflightReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Preflight {} for plan {}", report.overall_status, report.plan_hash);
    let _ = writeln!(
        out,
        "  risk: {}  feasible: {}  steps: {} ({} with issues, {} high risk)",
        report.overall_risk_level,
        report.execution_feasible,
        report.total_steps,
        report.steps_with_issues,
        report.high_risk_steps
    );
    let _ = writeln!(
        out,
        "  estimated duration: {}ms",
        report.total_estimated_duration_ms
    );

    for flow in &report.flow_results {
        let _ = writeln!(
            out,
            "Flow {} [{}] order: {}",
            flow.flow_id,
            flow.overall_risk_level,
            flow.execution_order.join(" -> ")
        );
        for step in &flow.step_results {
            let marker = if step.would_execute { "ok" } else { "!!" };
            let _ = writeln!(
                out,
                "  {} {} ({}, {}ms)",
                marker, step.step_id, step.risk_level, step.execution_time_ms
            );
        }
    }

    for (heading, lines) in [
        ("Critical issues", &report.critical_issues),
        ("Warnings", &report.warnings),
        ("Security issues", &report.security_issues),
        ("Policy violations", &report.policy_violations),
        ("Bottlenecks", &report.performance_bottlenecks),
    ] {
        if lines.is_empty() {
            continue;
        }
        let _ = writeln!(out, "{}:", heading);
        for line in lines {
            let _ = writeln!(out, "  - {}", line);
        }
    }

    for rec in &report.recommendations {
        let _ = writeln!(out, "Recommendation [{}]: {}", rec.priority, rec.title);
    }
    out
}

fn render_issues(issues: &[ValidationIssue]) -> String {
    if issues.is_empty() {
        return "No validation issues\n".to_string();
    }
    issues.iter().map(|issue| format!("{}\n", issue)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghostrun_core::{ExecutionFlow, ExecutionStep};
    use std::io::Write;

    fn write_plan(plan: &ExecutablePlan) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", serde_json::to_string(plan).unwrap()).unwrap();
        file
    }

    fn plan_args(path: &Path) -> PlanArgs {
        PlanArgs {
            plan: path.to_path_buf(),
            tenant: None,
            mode: "full".to_string(),
            no_mock: true,
            strict: false,
        }
    }

    fn linear_plan() -> ExecutablePlan {
        ExecutablePlan::new("p1", "hash-1", "acme", "Linear").with_flow(
            ExecutionFlow::new("main", "Main")
                .with_step(ExecutionStep::new("A", "a").with_timeout(1000))
                .with_step(ExecutionStep::new("B", "b").depends_on("A").with_timeout(1000)),
        )
    }

    #[test]
    fn test_load_plan_rejects_missing_file() {
        let result = load_plan(Path::new("/nonexistent/plan.json"));
        assert!(matches!(result, Err(Error::InvalidArgs(_))));
    }

    #[test]
    fn test_load_plan_rejects_malformed_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(load_plan(file.path()), Err(Error::Serialization(_))));
    }

    #[test]
    fn test_validate_clean_plan_passes() {
        let file = write_plan(&linear_plan());
        assert_eq!(validate(&plan_args(file.path()), true).unwrap(), EXIT_PASS);
    }

    #[test]
    fn test_validate_broken_plan_fails() {
        let plan = ExecutablePlan::new("p1", "hash-1", "acme", "Broken").with_flow(
            ExecutionFlow::new("main", "Main")
                .with_step(ExecutionStep::new("A", "a").depends_on("ghost")),
        );
        let file = write_plan(&plan);
        assert_eq!(validate(&plan_args(file.path()), false).unwrap(), EXIT_FAIL);
    }

    #[tokio::test]
    async fn test_simulate_linear_plan_exits_zero() {
        let file = write_plan(&linear_plan());
        let mut config = GhostRunConfig::default();
        config.lifecycle.phase_delay_ms = 0;
        let code = simulate(
            &config,
            &plan_args(file.path()),
            None,
            Duration::from_secs(10),
            true,
        )
        .await
        .unwrap();
        assert_eq!(code, EXIT_PASS);
    }

    #[tokio::test]
    async fn test_simulate_structural_error_exits_two() {
        let plan = ExecutablePlan::new("p1", "hash-1", "acme", "Broken").with_flow(
            ExecutionFlow::new("main", "Main")
                .with_step(ExecutionStep::new("A", "a").depends_on("ghost")),
        );
        let file = write_plan(&plan);
        let mut config = GhostRunConfig::default();
        config.lifecycle.phase_delay_ms = 0;
        let code = simulate(
            &config,
            &plan_args(file.path()),
            None,
            Duration::from_secs(10),
            true,
        )
        .await
        .unwrap();
        assert_eq!(code, EXIT_ERROR);
    }

    #[tokio::test]
    async fn test_simulate_writes_report_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = write_plan(&linear_plan());
        let mut config = GhostRunConfig::default();
        config.lifecycle.phase_delay_ms = 0;
        simulate(
            &config,
            &plan_args(file.path()),
            Some(dir.path()),
            Duration::from_secs(10),
            true,
        )
        .await
        .unwrap();
        let stored = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(stored, 1);
    }

    #[test]
    fn test_render_issues_lists_each_issue() {
        let issues = vec![
            ValidationIssue::error("Plan is missing plan_hash"),
            ValidationIssue::warning("Step 'A' has no timeout"),
        ];
        let rendered = render_issues(&issues);
        assert_eq!(rendered.lines().count(), 2);
        assert!(rendered.contains("plan_hash"));
        assert_eq!(render_issues(&[]), "No validation issues\n");
    }
}
