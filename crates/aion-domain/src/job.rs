use crate::task::TaskHandle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Provisioning,
    Running,
    Succeeded,
    Failed,
    Migrating,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// One scheduled execution attempt of a task on a chosen provider.
///
/// Invariant (P2 in spec §8): at most one job per task is non-terminal at
/// any instant. That invariant is enforced by the Scheduler, which is the
/// sole writer of job lifecycle transitions; this type itself is passive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub goal_id: Uuid,
    pub task: TaskHandle,
    pub provider: String,
    pub instance_id: Option<Uuid>,
    pub hourly_rate_usd: f64,
    pub accrued_cost_usd: f64,
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub exit_status: Option<i32>,
    pub artifacts: Vec<String>,
    /// Checkpoint interval required by the spot interruption budget (§4.3),
    /// `None` for on-demand instances.
    pub checkpoint_interval_secs: Option<u64>,
    /// Carried over from the task's planning-time estimate so the Cost
    /// Optimizer's migration trigger (§4.2) can price the remaining
    /// runtime without reaching back into the Goal's task arena.
    pub expected_duration_secs: Option<u64>,
}

impl Job {
    pub fn new(goal_id: Uuid, task: TaskHandle, provider: String, hourly_rate_usd: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            goal_id,
            task,
            provider,
            instance_id: None,
            hourly_rate_usd,
            accrued_cost_usd: 0.0,
            status: JobStatus::Provisioning,
            started_at: None,
            ended_at: None,
            exit_status: None,
            artifacts: Vec::new(),
            checkpoint_interval_secs: None,
            expected_duration_secs: None,
        }
    }

    pub fn is_live(&self) -> bool {
        !self.status.is_terminal()
    }
}
