use crate::RepositoryError;
use aion_domain::instance::{Instance, InstanceState};
use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

#[async_trait]
pub trait InstanceRepository: Send + Sync {
    async fn create(&self, instance: Instance) -> Result<(), RepositoryError>;
    async fn fetch(&self, id: Uuid) -> Result<Instance, RepositoryError>;
    async fn list_by_job(&self, job_id: Uuid) -> Result<Vec<Instance>, RepositoryError>;
    async fn update_status(&self, id: Uuid, state: InstanceState) -> Result<(), RepositoryError>;
}

#[derive(Default)]
pub struct InMemoryInstanceRepository {
    instances: DashMap<Uuid, Instance>,
}

impl InMemoryInstanceRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InstanceRepository for InMemoryInstanceRepository {
    async fn create(&self, instance: Instance) -> Result<(), RepositoryError> {
        self.instances.insert(instance.id, instance);
        Ok(())
    }

    async fn fetch(&self, id: Uuid) -> Result<Instance, RepositoryError> {
        self.instances
            .get(&id)
            .map(|i| i.clone())
            .ok_or_else(|| RepositoryError::NotFound(format!("instance {id}")))
    }

    async fn list_by_job(&self, job_id: Uuid) -> Result<Vec<Instance>, RepositoryError> {
        Ok(self
            .instances
            .iter()
            .filter(|i| i.job_id == job_id)
            .map(|i| i.clone())
            .collect())
    }

    async fn update_status(&self, id: Uuid, state: InstanceState) -> Result<(), RepositoryError> {
        let mut entry = self
            .instances
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("instance {id}")))?;
        entry.state = state;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aion_domain::task::GpuClass;
    use chrono::Utc;

    fn sample_instance(job_id: Uuid) -> Instance {
        Instance {
            id: Uuid::new_v4(),
            job_id,
            provider_instance_id: "i-abc123".to_string(),
            provider: "aws".to_string(),
            region: "us-east-1".to_string(),
            gpu_class: GpuClass::A100,
            gpu_count: 1,
            hourly_rate_usd: 3.5,
            state: InstanceState::Provisioning,
            interruptible: false,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn update_status_persists() {
        let repo = InMemoryInstanceRepository::new();
        let job_id = Uuid::new_v4();
        let instance = sample_instance(job_id);
        let id = instance.id;
        repo.create(instance).await.unwrap();

        repo.update_status(id, InstanceState::Running).await.unwrap();
        assert_eq!(repo.fetch(id).await.unwrap().state, InstanceState::Running);
    }

    #[tokio::test]
    async fn list_by_job_scopes_correctly() {
        let repo = InMemoryInstanceRepository::new();
        let job_id = Uuid::new_v4();
        repo.create(sample_instance(job_id)).await.unwrap();
        repo.create(sample_instance(Uuid::new_v4())).await.unwrap();

        assert_eq!(repo.list_by_job(job_id).await.unwrap().len(), 1);
    }
}
