use crate::task::Task;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Terminal-or-not status of a Goal. A goal is terminal once every root task
/// has reached a terminal [`crate::TaskStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GoalStatus {
    Accepted,
    Planning,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl GoalStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            GoalStatus::Completed | GoalStatus::Failed | GoalStatus::Cancelled
        )
    }
}

/// A user-level unit of intent and the root of a task DAG. The Goal owns its
/// tasks exclusively, addressed by [`crate::TaskHandle`] (see spec §9: "An
/// arena of tasks per goal, addressed by small integer handles").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub id: Uuid,
    pub raw_text: String,
    pub owner: String,
    pub budget_ceiling_usd: Option<f64>,
    pub tasks: Vec<Task>,
    pub aggregate_cost_usd: f64,
    pub status: GoalStatus,
    pub created_at: DateTime<Utc>,
}

impl Goal {
    pub fn new(raw_text: String, owner: String, budget_ceiling_usd: Option<f64>) -> Self {
        Self {
            id: Uuid::new_v4(),
            raw_text,
            owner,
            budget_ceiling_usd,
            tasks: Vec::new(),
            aggregate_cost_usd: 0.0,
            status: GoalStatus::Accepted,
            created_at: Utc::now(),
        }
    }

    pub fn task(&self, handle: crate::TaskHandle) -> Option<&Task> {
        self.tasks.get(handle.0 as usize)
    }

    pub fn task_mut(&mut self, handle: crate::TaskHandle) -> Option<&mut Task> {
        self.tasks.get_mut(handle.0 as usize)
    }

    /// Whether every task has reached a terminal state.
    pub fn all_tasks_terminal(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_terminal())
    }

    pub fn over_budget(&self) -> bool {
        match self.budget_ceiling_usd {
            Some(cap) => self.aggregate_cost_usd > cap,
            None => false,
        }
    }
}
