//! Run status record and its state machine
//!
//! ```text
//!   PENDING ──▶ RUNNING ──▶ COMPLETED
//!      │           │  └───▶ FAILED
//!      └───────────┴──────▶ CANCELLED
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::report::PreflightReport;

/// Lifecycle state of a simulation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    /// COMPLETED, FAILED and CANCELLED never change again
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Failed | RunState::Cancelled
        )
    }

    /// Only runs that have not finished may be cancelled
    pub fn can_cancel(self) -> bool {
        matches!(self, RunState::Pending | RunState::Running)
    }

    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(self, next: RunState) -> bool {
        match (self, next) {
            (RunState::Pending, RunState::Running) => true,
            (RunState::Running, RunState::Completed | RunState::Failed) => true,
            (RunState::Pending | RunState::Running, RunState::Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RunState::Pending => "PENDING",
            RunState::Running => "RUNNING",
            RunState::Completed => "COMPLETED",
            RunState::Failed => "FAILED",
            RunState::Cancelled => "CANCELLED",
        };
        f.write_str(text)
    }
}

/// Mutable record tracking one simulation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GhostRunStatus {
    pub run_id: String,
    pub tenant_id: String,
    pub plan_hash: String,
    pub status: RunState,
    /// 0.0 to 1.0
    pub progress: f64,
    pub current_step: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Set only once COMPLETED
    pub report: Option<Box<PreflightReport>>,
    /// Set only once FAILED
    pub error_message: Option<String>,
}

impl GhostRunStatus {
    /// Fresh PENDING record
    pub fn pending(
        run_id: impl Into<String>,
        tenant_id: impl Into<String>,
        plan_hash: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            tenant_id: tenant_id.into(),
            plan_hash: plan_hash.into(),
            status: RunState::Pending,
            progress: 0.0,
            current_step: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            report: None,
            error_message: None,
        }
    }

    /// Apply a transition if legal; returns whether it happened
    pub fn transition(&mut self, next: RunState) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        let now = Utc::now();
        match next {
            RunState::Running => self.started_at = Some(now),
            RunState::Completed | RunState::Failed | RunState::Cancelled => {
                self.completed_at = Some(now)
            }
            RunState::Pending => {}
        }
        true
    }

    /// Record progress through a named phase
    pub fn set_phase(&mut self, label: impl Into<String>, progress: f64) {
        self.current_step = Some(label.into());
        self.progress = progress.clamp(0.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut status = GhostRunStatus::pending("run", "tenant", "hash");
        assert!(status.transition(RunState::Running));
        assert!(status.started_at.is_some());
        assert!(status.transition(RunState::Completed));
        assert!(status.completed_at.is_some());
        assert!(status.status.is_terminal());
    }

    #[test]
    fn test_terminal_states_are_frozen() {
        let mut status = GhostRunStatus::pending("run", "tenant", "hash");
        assert!(status.transition(RunState::Cancelled));
        assert!(!status.transition(RunState::Running));
        assert!(!status.transition(RunState::Completed));
        assert_eq!(status.status, RunState::Cancelled);
    }

    #[test]
    fn test_pending_cannot_complete_directly() {
        let mut status = GhostRunStatus::pending("run", "tenant", "hash");
        assert!(!status.transition(RunState::Completed));
        assert_eq!(status.status, RunState::Pending);
    }

    #[test]
    fn test_cancel_only_from_active_states() {
        assert!(RunState::Pending.can_cancel());
        assert!(RunState::Running.can_cancel());
        assert!(!RunState::Completed.can_cancel());
        assert!(!RunState::Failed.can_cancel());
        assert!(!RunState::Cancelled.can_cancel());
    }

    #[test]
    fn test_progress_is_clamped() {
        let mut status = GhostRunStatus::pending("run", "tenant", "hash");
        status.set_phase("overshoot", 1.7);
        assert_eq!(status.progress, 1.0);
        assert_eq!(status.current_step.as_deref(), Some("overshoot"));
    }
}
