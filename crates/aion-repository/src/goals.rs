use crate::RepositoryError;
use aion_domain::goal::{Goal, GoalStatus};
use aion_domain::task::{Task, TaskHandle};
use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

#[async_trait]
pub trait GoalRepository: Send + Sync {
    async fn create(&self, goal: Goal) -> Result<(), RepositoryError>;
    async fn fetch(&self, id: Uuid) -> Result<Goal, RepositoryError>;
    async fn list_by_owner(&self, owner: &str) -> Result<Vec<Goal>, RepositoryError>;
    /// Every goal not yet in a terminal status, across all owners — what
    /// a process shutdown walks to cancel in-flight goals (spec §5).
    async fn list_active(&self) -> Result<Vec<Goal>, RepositoryError>;
    async fn update_status(&self, id: Uuid, status: GoalStatus) -> Result<(), RepositoryError>;
    /// Persists the full goal, including its task arena — tasks are owned
    /// by the goal (spec §9) so there is no separate task-write path. Only
    /// safe to call while nothing else is concurrently mutating this
    /// goal's tasks (e.g. the Orchestrator's initial plan registration);
    /// once a goal has live tasks, use `update_task` for per-task writes.
    async fn save(&self, goal: Goal) -> Result<(), RepositoryError>;
    /// Atomically mutates exactly one task inside a goal's arena, leaving
    /// the rest of the goal untouched. The Orchestrator's dispatch pump
    /// and a goal's own driver loop both mutate task state concurrently;
    /// a `fetch` + mutate + `save` round trip would let one clobber the
    /// other's write, so task-level transitions go through here instead.
    async fn update_task(
        &self,
        goal_id: Uuid,
        handle: TaskHandle,
        mutate: Box<dyn FnOnce(&mut Task) + Send>,
    ) -> Result<(), RepositoryError>;
}

#[derive(Default)]
pub struct InMemoryGoalRepository {
    goals: DashMap<Uuid, Goal>,
}

impl InMemoryGoalRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GoalRepository for InMemoryGoalRepository {
    async fn create(&self, goal: Goal) -> Result<(), RepositoryError> {
        self.goals.insert(goal.id, goal);
        Ok(())
    }

    async fn fetch(&self, id: Uuid) -> Result<Goal, RepositoryError> {
        self.goals
            .get(&id)
            .map(|g| g.clone())
            .ok_or_else(|| RepositoryError::NotFound(format!("goal {id}")))
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<Goal>, RepositoryError> {
        Ok(self
            .goals
            .iter()
            .filter(|g| g.owner == owner)
            .map(|g| g.clone())
            .collect())
    }

    async fn list_active(&self) -> Result<Vec<Goal>, RepositoryError> {
        Ok(self
            .goals
            .iter()
            .filter(|g| !g.status.is_terminal())
            .map(|g| g.clone())
            .collect())
    }

    async fn update_status(&self, id: Uuid, status: GoalStatus) -> Result<(), RepositoryError> {
        let mut entry = self
            .goals
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("goal {id}")))?;
        entry.status = status;
        Ok(())
    }

    async fn save(&self, goal: Goal) -> Result<(), RepositoryError> {
        self.goals.insert(goal.id, goal);
        Ok(())
    }

    async fn update_task(
        &self,
        goal_id: Uuid,
        handle: TaskHandle,
        mutate: Box<dyn FnOnce(&mut Task) + Send>,
    ) -> Result<(), RepositoryError> {
        let mut entry = self
            .goals
            .get_mut(&goal_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("goal {goal_id}")))?;
        let task = entry
            .task_mut(handle)
            .ok_or_else(|| RepositoryError::NotFound(format!("task {handle} in goal {goal_id}")))?;
        mutate(task);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_fetch_round_trips() {
        let repo = InMemoryGoalRepository::new();
        let goal = Goal::new("train a model".to_string(), "alice".to_string(), Some(50.0));
        let id = goal.id;
        repo.create(goal).await.unwrap();

        let fetched = repo.fetch(id).await.unwrap();
        assert_eq!(fetched.owner, "alice");
    }

    #[tokio::test]
    async fn fetch_missing_goal_errors() {
        let repo = InMemoryGoalRepository::new();
        let result = repo.fetch(Uuid::new_v4()).await;
        assert!(matches!(result, Err(RepositoryError::NotFound(_))));
    }

    #[tokio::test]
    async fn update_status_changes_stored_goal() {
        let repo = InMemoryGoalRepository::new();
        let goal = Goal::new("infer".to_string(), "bob".to_string(), None);
        let id = goal.id;
        repo.create(goal).await.unwrap();

        repo.update_status(id, GoalStatus::Completed).await.unwrap();
        let fetched = repo.fetch(id).await.unwrap();
        assert_eq!(fetched.status, GoalStatus::Completed);
    }

    #[tokio::test]
    async fn update_task_mutates_only_the_targeted_task() {
        use aion_domain::task::{GpuClass, ResourceDemand, RiskTier, TaskStatus};

        let mut goal = Goal::new("train".to_string(), "alice".to_string(), None);
        let make_task = |handle: u32, status: TaskStatus| Task {
            handle: TaskHandle(handle),
            predecessors: vec![],
            image_reference: "img".to_string(),
            command: vec![],
            env: Default::default(),
            demand: ResourceDemand {
                gpu_class: GpuClass::A100,
                gpu_count: 1,
                vram_gib: 40,
                max_duration_secs: 60,
                max_cost_usd: 1.0,
                interruptible_ok: false,
                p_interrupt_per_hour: 0.0,
            },
            confidence: 1.0,
            risk_tier: RiskTier::Normal,
            status,
            retry_count: 0,
            base_priority: 1.0,
            deadline_at: None,
            expected_duration_secs: 60,
        };
        goal.tasks = vec![
            make_task(0, TaskStatus::Ready),
            make_task(1, TaskStatus::Pending),
        ];
        let id = goal.id;
        let repo = InMemoryGoalRepository::new();
        repo.create(goal).await.unwrap();

        repo.update_task(
            id,
            TaskHandle(0),
            Box::new(|t| t.status = TaskStatus::Succeeded),
        )
        .await
        .unwrap();

        let fetched = repo.fetch(id).await.unwrap();
        assert_eq!(fetched.task(TaskHandle(0)).unwrap().status, TaskStatus::Succeeded);
        assert_eq!(fetched.task(TaskHandle(1)).unwrap().status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn list_by_owner_filters_correctly() {
        let repo = InMemoryGoalRepository::new();
        repo.create(Goal::new("a".to_string(), "alice".to_string(), None))
            .await
            .unwrap();
        repo.create(Goal::new("b".to_string(), "bob".to_string(), None))
            .await
            .unwrap();

        let alice_goals = repo.list_by_owner("alice").await.unwrap();
        assert_eq!(alice_goals.len(), 1);
    }

    #[tokio::test]
    async fn list_active_excludes_terminal_goals() {
        let repo = InMemoryGoalRepository::new();
        let running = Goal::new("a".to_string(), "alice".to_string(), None);
        let running_id = running.id;
        let mut done = Goal::new("b".to_string(), "alice".to_string(), None);
        done.status = GoalStatus::Completed;
        repo.create(running).await.unwrap();
        repo.create(done).await.unwrap();

        let active = repo.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, running_id);
    }
}
