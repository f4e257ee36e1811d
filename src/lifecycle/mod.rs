//! Run Lifecycle Service
//!
//! Owns simulation runs from submission to a terminal state. Each run is a
//! background tokio task that walks fixed progress phases, calls the
//! simulation engine, stores the report, and publishes lifecycle events.
//!
//! Active and finished runs live in two disjoint maps; a run moves from the
//! first to the second when its task ends.

mod events;
mod storage;

pub use events::{
    ChannelEventPublisher, EventPublisher, LifecycleEvent, PublishError, TracingEventPublisher,
    PREFLIGHT_COMPLETED, SIMULATION_FAILED, SIMULATION_STARTED,
};
pub use storage::{FileReportStorage, InMemoryReportStorage, ReportStorage, StorageError};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ghostrun_core::{
    ExecutablePlan, GhostRunRequest, GhostRunStatus, LifecycleSettings, PreflightReport, RunState,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::SimulationError;
use crate::simulation::SimulationEngine;

/// Progress phases, each with the progress reached when it starts
const PHASES_BEFORE_ENGINE: [(&str, f64); 4] = [
    ("Validating plan", 0.1),
    ("Analyzing dependencies", 0.25),
    ("Assessing risk", 0.4),
    ("Simulating connectors", 0.55),
];
const PHASES_AFTER_ENGINE: [(&str, f64); 2] =
    [("Analyzing performance", 0.8), ("Generating report", 0.9)];

type RunMap = Arc<RwLock<HashMap<String, GhostRunStatus>>>;

/// Manages asynchronous simulation runs
#[derive(Clone)]
pub struct RunService {
    engine: Arc<SimulationEngine>,
    storage: Arc<dyn ReportStorage>,
    publisher: Arc<dyn EventPublisher>,
    active_runs: RunMap,
    completed_runs: RunMap,
    settings: LifecycleSettings,
}

impl RunService {
    pub fn new(
        engine: Arc<SimulationEngine>,
        storage: Arc<dyn ReportStorage>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            engine,
            storage,
            publisher,
            active_runs: Arc::new(RwLock::new(HashMap::new())),
            completed_runs: Arc::new(RwLock::new(HashMap::new())),
            settings: LifecycleSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: LifecycleSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Register a PENDING run and simulate it in the background
    ///
    /// Returns immediately; failures surface only through the run status.
    pub async fn start_simulation(
        &self,
        tenant_id: &str,
        plan: ExecutablePlan,
        request: GhostRunRequest,
    ) -> GhostRunStatus {
        let run_id = Uuid::new_v4().to_string();
        let status = GhostRunStatus::pending(&run_id, tenant_id, &request.plan_hash);

        self.active_runs
            .write()
            .await
            .insert(run_id.clone(), status.clone());
        info!(
            "Started simulation run {} for tenant {} (plan {})",
            run_id, tenant_id, status.plan_hash
        );

        if let Err(e) = self.publisher.publish_simulation_started(&status).await {
            warn!("Failed to publish start event for run {}: {}", run_id, e);
        }

        let worker = self.clone();
        let worker_run_id = run_id.clone();
        let handle = tokio::spawn(async move {
            worker.execute_run(worker_run_id, plan, request).await;
        });

        // A panicked run still has to reach a terminal state
        let supervisor = self.clone();
        tokio::spawn(async move {
            if let Err(e) = handle.await {
                warn!("Simulation task for run {} aborted: {}", run_id, e);
                supervisor
                    .fail(&run_id, format!("simulation panicked: {}", e))
                    .await;
                supervisor.finish(&run_id).await;
            }
        });

        status
    }

    /// Mark a PENDING or RUNNING run as CANCELLED
    ///
    /// Work already in flight is not interrupted; the background task stops
    /// at its next phase boundary.
    pub async fn cancel_simulation(&self, run_id: &str) -> bool {
        let mut active = self.active_runs.write().await;
        let Some(status) = active.get_mut(run_id) else {
            return false;
        };
        if !status.status.can_cancel() {
            return false;
        }
        let cancelled = status.transition(RunState::Cancelled);
        if cancelled {
            info!("Cancelled simulation run {}", run_id);
        }
        cancelled
    }

    /// Current status, looking in active runs first
    pub async fn get_simulation_status(&self, run_id: &str) -> Option<GhostRunStatus> {
        if let Some(status) = self.active_runs.read().await.get(run_id) {
            return Some(status.clone());
        }
        self.completed_runs.read().await.get(run_id).cloned()
    }

    pub async fn get_preflight_report(
        &self,
        run_id: &str,
    ) -> Result<Option<PreflightReport>, StorageError> {
        self.storage.get(run_id).await
    }

    /// A tenant's runs, newest first
    pub async fn list_simulations(
        &self,
        tenant_id: &str,
        status_filter: Option<RunState>,
    ) -> Vec<GhostRunStatus> {
        let mut runs: Vec<GhostRunStatus> = Vec::new();
        for store in [&self.active_runs, &self.completed_runs] {
            let store = store.read().await;
            runs.extend(
                store
                    .values()
                    .filter(|s| s.tenant_id == tenant_id)
                    .filter(|s| status_filter.map_or(true, |f| s.status == f))
                    .cloned(),
            );
        }
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        runs
    }

    /// Drop finished runs created more than `max_age_hours` ago
    pub async fn cleanup_old_runs(&self, max_age_hours: i64) -> usize {
        let Some(cutoff) = chrono::Duration::try_hours(max_age_hours)
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            debug!("Retention window of {}h is out of range; nothing removed", max_age_hours);
            return 0;
        };
        let mut completed = self.completed_runs.write().await;
        let before = completed.len();
        completed.retain(|_, status| status.created_at >= cutoff);
        let removed = before - completed.len();
        if removed > 0 {
            info!("Cleaned up {} finished simulation runs", removed);
        }
        removed
    }

    /// Cleanup using the configured retention window
    pub async fn cleanup_expired_runs(&self) -> usize {
        self.cleanup_old_runs(self.settings.completed_retention_hours)
            .await
    }

    /// Poll until the run has left the active set, or the timeout elapses
    pub async fn wait_for_completion(
        &self,
        run_id: &str,
        timeout: Duration,
    ) -> Option<GhostRunStatus> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(status) = self.completed_runs.read().await.get(run_id) {
                return Some(status.clone());
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn execute_run(&self, run_id: String, plan: ExecutablePlan, request: GhostRunRequest) {
        let started = self
            .update_active(&run_id, |s| s.transition(RunState::Running))
            .await
            .unwrap_or(false);
        if !started {
            warn!("Run {} was cancelled before it started", run_id);
            self.finish(&run_id).await;
            return;
        }
        debug!("Run {} is running", run_id);

        for (label, progress) in PHASES_BEFORE_ENGINE {
            if !self.enter_phase(&run_id, label, progress).await {
                self.finish(&run_id).await;
                return;
            }
        }

        let outcome = self.engine.simulate_plan(&run_id, &plan, &request);

        for (label, progress) in PHASES_AFTER_ENGINE {
            if !self.enter_phase(&run_id, label, progress).await {
                // Cancelled after simulation: the report is still kept
                break;
            }
        }

        let stored = match outcome {
            Ok((report, metrics)) => {
                debug!(
                    "Run {} metrics: {} steps, {} connector calls ({} failed), {}ms",
                    run_id,
                    metrics.steps_simulated,
                    metrics.connector_calls,
                    metrics.failed_connector_calls,
                    metrics.simulation_duration_ms
                );
                self.storage
                    .store(&run_id, &report)
                    .await
                    .map(|_| report)
                    .map_err(SimulationError::from)
            }
            Err(e) => Err(e),
        };

        match stored {
            Ok(report) => self.complete(&run_id, report).await,
            Err(e) => self.fail(&run_id, e.to_string()).await,
        }
        self.finish(&run_id).await;
    }

    /// Returns false once the run has been cancelled
    async fn enter_phase(&self, run_id: &str, label: &str, progress: f64) -> bool {
        let running = self
            .update_active(run_id, |s| {
                if s.status != RunState::Running {
                    return false;
                }
                s.set_phase(label, progress);
                true
            })
            .await
            .unwrap_or(false);

        if !running {
            warn!("Run {} was cancelled; stopping at phase '{}'", run_id, label);
            return false;
        }
        if self.settings.phase_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.settings.phase_delay_ms)).await;
        }
        true
    }

    async fn complete(&self, run_id: &str, report: PreflightReport) {
        let status = self
            .update_active(run_id, |s| {
                if !s.transition(RunState::Completed) {
                    return None;
                }
                s.set_phase("Completed", 1.0);
                s.report = Some(Box::new(report.clone()));
                Some(s.clone())
            })
            .await
            .flatten();

        match status {
            Some(status) => {
                info!(
                    "Run {} completed: {} ({} risk)",
                    run_id, report.overall_status, report.overall_risk_level
                );
                if let Err(e) = self
                    .publisher
                    .publish_preflight_completed(&status, &report)
                    .await
                {
                    warn!("Failed to publish completion event for run {}: {}", run_id, e);
                }
            }
            None => warn!(
                "Run {} finished after cancellation; report stored but status left unchanged",
                run_id
            ),
        }
    }

    async fn fail(&self, run_id: &str, error: String) {
        let status = self
            .update_active(run_id, |s| {
                if !s.transition(RunState::Failed) {
                    return None;
                }
                s.error_message = Some(error.clone());
                Some(s.clone())
            })
            .await
            .flatten();

        match status {
            Some(status) => {
                warn!("Run {} failed: {}", run_id, error);
                if let Err(e) = self.publisher.publish_simulation_failed(&status).await {
                    warn!("Failed to publish failure event for run {}: {}", run_id, e);
                }
            }
            None => warn!("Run {} failed after cancellation: {}", run_id, error),
        }
    }

    /// Move a run from the active to the completed store
    ///
    /// Both locks are held so the run is never missing from both stores.
    async fn finish(&self, run_id: &str) {
        let mut active = self.active_runs.write().await;
        let mut completed = self.completed_runs.write().await;
        if let Some(status) = active.remove(run_id) {
            completed.insert(run_id.to_string(), status);
        }
    }

    async fn update_active<R>(
        &self,
        run_id: &str,
        f: impl FnOnce(&mut GhostRunStatus) -> R,
    ) -> Option<R> {
        let mut active = self.active_runs.write().await;
        active.get_mut(run_id).map(f)
    }
}
