//! Lifecycle event publishing
//!
//! Events are CloudEvents-shaped envelopes. Publishing is fire-and-forget:
//! the run service logs a failed publish and carries on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ghostrun_core::{GhostRunStatus, PreflightReport};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

pub const EVENT_SOURCE: &str = "ghostrun/preflight";
pub const SIMULATION_STARTED: &str = "ghostrun.simulation.started";
pub const PREFLIGHT_COMPLETED: &str = "ghostrun.preflight.completed";
pub const SIMULATION_FAILED: &str = "ghostrun.simulation.failed";

/// Errors raised by event publishers
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Event channel is closed")]
    ChannelClosed,

    #[error("Event publisher error: {0}")]
    Backend(String),
}

/// CloudEvents 1.0 envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub specversion: String,
    pub id: String,
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
    /// Run id
    pub subject: String,
    pub time: DateTime<Utc>,
    pub datacontenttype: String,
    pub data: Value,
}

impl LifecycleEvent {
    fn new(event_type: &str, subject: &str, data: Value) -> Self {
        Self {
            specversion: "1.0".to_string(),
            id: Uuid::new_v4().to_string(),
            source: EVENT_SOURCE.to_string(),
            event_type: event_type.to_string(),
            subject: subject.to_string(),
            time: Utc::now(),
            datacontenttype: "application/json".to_string(),
            data,
        }
    }

    pub fn simulation_started(status: &GhostRunStatus) -> Self {
        Self::new(
            SIMULATION_STARTED,
            &status.run_id,
            json!({
                "run_id": status.run_id,
                "tenant_id": status.tenant_id,
                "plan_hash": status.plan_hash,
                "status": status.status,
            }),
        )
    }

    pub fn preflight_completed(status: &GhostRunStatus, report: &PreflightReport) -> Self {
        Self::new(
            PREFLIGHT_COMPLETED,
            &status.run_id,
            json!({
                "run_id": status.run_id,
                "tenant_id": status.tenant_id,
                "plan_hash": status.plan_hash,
                "status": status.status,
                "report_id": report.report_id,
                "overall_status": report.overall_status,
                "overall_risk_level": report.overall_risk_level,
                "execution_feasible": report.execution_feasible,
            }),
        )
    }

    pub fn simulation_failed(status: &GhostRunStatus) -> Self {
        Self::new(
            SIMULATION_FAILED,
            &status.run_id,
            json!({
                "run_id": status.run_id,
                "tenant_id": status.tenant_id,
                "plan_hash": status.plan_hash,
                "status": status.status,
                "error_message": status.error_message,
            }),
        )
    }
}

/// Sink for run lifecycle notifications
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: LifecycleEvent) -> Result<(), PublishError>;

    async fn publish_simulation_started(&self, status: &GhostRunStatus) -> Result<(), PublishError> {
        self.publish(LifecycleEvent::simulation_started(status)).await
    }

    async fn publish_preflight_completed(
        &self,
        status: &GhostRunStatus,
        report: &PreflightReport,
    ) -> Result<(), PublishError> {
        self.publish(LifecycleEvent::preflight_completed(status, report))
            .await
    }

    async fn publish_simulation_failed(&self, status: &GhostRunStatus) -> Result<(), PublishError> {
        self.publish(LifecycleEvent::simulation_failed(status)).await
    }
}

/// Writes events to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventPublisher;

#[async_trait]
impl EventPublisher for TracingEventPublisher {
    async fn publish(&self, event: LifecycleEvent) -> Result<(), PublishError> {
        info!(
            event_type = %event.event_type,
            event_id = %event.id,
            run_id = %event.subject,
            "Lifecycle event"
        );
        Ok(())
    }
}

/// Forwards events to an unbounded tokio channel
#[derive(Debug, Clone)]
pub struct ChannelEventPublisher {
    sender: mpsc::UnboundedSender<LifecycleEvent>,
}

impl ChannelEventPublisher {
    /// Publisher plus the receiving end of its channel
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl EventPublisher for ChannelEventPublisher {
    async fn publish(&self, event: LifecycleEvent) -> Result<(), PublishError> {
        self.sender
            .send(event)
            .map_err(|_| PublishError::ChannelClosed)
    }
}
