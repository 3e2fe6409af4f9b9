//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Overall status of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Run has not started
    Pending,
    /// Run is currently executing
    Running,
    /// Every reachable stage succeeded
    Succeeded,
    /// At least one stage failed past its attempt budget
    Failed,
    /// Run was aborted externally
    Cancelled,
}

/// Flat per-stage status, used in reports and counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

/// State of a single stage within a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageState {
    /// Waiting for dependencies
    Pending,
    /// Currently executing its steps
    Running { started_at: DateTime<Utc> },
    /// All steps exited 0 and all declared outputs published
    Succeeded {
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    },
    /// A step exhausted its attempt budget, or an artifact/infrastructure error
    Failed {
        error: String,
        started_at: Option<DateTime<Utc>>,
        finished_at: DateTime<Utc>,
    },
    /// An upstream dependency failed (never ran)
    Skipped { reason: String },
    /// The run was aborted while this stage was pending or running
    Cancelled,
}

impl StageState {
    /// Check if the stage is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageState::Succeeded { .. }
                | StageState::Failed { .. }
                | StageState::Skipped { .. }
                | StageState::Cancelled
        )
    }

    /// Flatten to the status enum
    pub fn status(&self) -> StageStatus {
        match self {
            StageState::Pending => StageStatus::Pending,
            StageState::Running { .. } => StageStatus::Running,
            StageState::Succeeded { .. } => StageStatus::Succeeded,
            StageState::Failed { .. } => StageStatus::Failed,
            StageState::Skipped { .. } => StageStatus::Skipped,
            StageState::Cancelled => StageStatus::Cancelled,
        }
    }
}

/// Overall state of a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Unique execution ID
    pub execution_id: Uuid,

    /// Monotonic run number assigned by the trigger
    pub run_number: u64,

    /// Current run status
    pub status: RunStatus,

    /// When execution started
    pub started_at: Option<DateTime<Utc>>,

    /// When execution reached a terminal status
    pub finished_at: Option<DateTime<Utc>>,

    /// Total number of stages
    pub total_stages: usize,

    /// Number of succeeded stages
    pub succeeded_stages: usize,

    /// Number of failed stages
    pub failed_stages: usize,

    /// Number of skipped stages
    pub skipped_stages: usize,
}

impl RunState {
    pub fn new(run_number: u64) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            run_number,
            status: RunStatus::Pending,
            started_at: None,
            finished_at: None,
            total_stages: 0,
            succeeded_stages: 0,
            failed_stages: 0,
            skipped_stages: 0,
        }
    }

    /// Mark the run as started
    pub fn start(&mut self, total_stages: usize) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
        self.total_stages = total_stages;
    }

    /// Settle on a terminal status. Terminal state is never mutated again.
    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    pub fn update_counts(&mut self, succeeded: usize, failed: usize, skipped: usize) {
        self.succeeded_stages = succeeded;
        self.failed_stages = failed;
        self.skipped_stages = skipped;
    }

    /// Fraction of stages that reached a terminal state (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_stages == 0 {
            return 0.0;
        }
        (self.succeeded_stages + self.failed_stages + self.skipped_stages) as f64
            / self.total_stages as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_state_is_terminal() {
        assert!(!StageState::Pending.is_terminal());
        assert!(!StageState::Running {
            started_at: Utc::now()
        }
        .is_terminal());
        assert!(StageState::Succeeded {
            started_at: Utc::now(),
            finished_at: Utc::now()
        }
        .is_terminal());
        assert!(StageState::Failed {
            error: "boom".to_string(),
            started_at: None,
            finished_at: Utc::now()
        }
        .is_terminal());
        assert!(StageState::Skipped {
            reason: "upstream failed".to_string()
        }
        .is_terminal());
        assert!(StageState::Cancelled.is_terminal());
    }

    #[test]
    fn test_run_progress() {
        let mut state = RunState::new(1);
        state.start(4);
        assert_eq!(state.progress(), 0.0);

        state.update_counts(2, 0, 0);
        assert_eq!(state.progress(), 0.5);

        state.update_counts(2, 1, 1);
        assert_eq!(state.progress(), 1.0);
    }
}
