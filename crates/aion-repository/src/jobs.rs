use crate::RepositoryError;
use aion_domain::job::{Job, JobStatus};
use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn create(&self, job: Job) -> Result<(), RepositoryError>;
    async fn fetch(&self, id: Uuid) -> Result<Job, RepositoryError>;
    async fn list_by_goal(&self, goal_id: Uuid) -> Result<Vec<Job>, RepositoryError>;
    /// Every job not yet in a terminal status, across all goals — what the
    /// Cost Optimizer's migration evaluator sweeps each cycle.
    async fn list_live(&self) -> Result<Vec<Job>, RepositoryError>;
    async fn update_status(&self, id: Uuid, status: JobStatus) -> Result<(), RepositoryError>;
}

#[derive(Default)]
pub struct InMemoryJobRepository {
    jobs: DashMap<Uuid, Job>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn create(&self, job: Job) -> Result<(), RepositoryError> {
        self.jobs.insert(job.id, job);
        Ok(())
    }

    async fn fetch(&self, id: Uuid) -> Result<Job, RepositoryError> {
        self.jobs
            .get(&id)
            .map(|j| j.clone())
            .ok_or_else(|| RepositoryError::NotFound(format!("job {id}")))
    }

    async fn list_by_goal(&self, goal_id: Uuid) -> Result<Vec<Job>, RepositoryError> {
        Ok(self
            .jobs
            .iter()
            .filter(|j| j.goal_id == goal_id)
            .map(|j| j.clone())
            .collect())
    }

    async fn list_live(&self) -> Result<Vec<Job>, RepositoryError> {
        Ok(self
            .jobs
            .iter()
            .filter(|j| j.is_live())
            .map(|j| j.clone())
            .collect())
    }

    async fn update_status(&self, id: Uuid, status: JobStatus) -> Result<(), RepositoryError> {
        let mut entry = self
            .jobs
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("job {id}")))?;
        entry.status = status;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aion_domain::task::TaskHandle;

    #[tokio::test]
    async fn list_by_goal_returns_only_matching_jobs() {
        let repo = InMemoryJobRepository::new();
        let goal_a = Uuid::new_v4();
        let goal_b = Uuid::new_v4();

        repo.create(Job::new(goal_a, TaskHandle(0), "aws".to_string(), 1.2))
            .await
            .unwrap();
        repo.create(Job::new(goal_b, TaskHandle(0), "gcp".to_string(), 0.9))
            .await
            .unwrap();

        let jobs = repo.list_by_goal(goal_a).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].provider, "aws");
    }

    #[tokio::test]
    async fn list_live_excludes_terminal_jobs() {
        let repo = InMemoryJobRepository::new();
        let mut running = Job::new(Uuid::new_v4(), TaskHandle(0), "aws".to_string(), 1.0);
        running.status = JobStatus::Running;
        let mut succeeded = Job::new(Uuid::new_v4(), TaskHandle(1), "aws".to_string(), 1.0);
        succeeded.status = JobStatus::Succeeded;
        repo.create(running.clone()).await.unwrap();
        repo.create(succeeded).await.unwrap();

        let live = repo.list_live().await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, running.id);
    }

    #[tokio::test]
    async fn update_status_is_visible_on_fetch() {
        let repo = InMemoryJobRepository::new();
        let job = Job::new(Uuid::new_v4(), TaskHandle(0), "aws".to_string(), 1.0);
        let id = job.id;
        repo.create(job).await.unwrap();

        repo.update_status(id, JobStatus::Running).await.unwrap();
        assert_eq!(repo.fetch(id).await.unwrap().status, JobStatus::Running);
    }
}
