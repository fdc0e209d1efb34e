use crate::RepositoryError;
use aion_domain::audit::AuditBatch;
use async_trait::async_trait;
use dashmap::DashMap;

#[async_trait]
pub trait AuditBatchRepository: Send + Sync {
    async fn create(&self, batch: AuditBatch) -> Result<(), RepositoryError>;
    async fn fetch(&self, batch_index: u64) -> Result<AuditBatch, RepositoryError>;
    /// Batches in `[from, to]` inclusive, ordered by index, used by
    /// verification sweeps (spec §4.6).
    async fn list_range(&self, from: u64, to: u64) -> Result<Vec<AuditBatch>, RepositoryError>;
    async fn latest_index(&self) -> Result<Option<u64>, RepositoryError>;
}

/// Sealed batches are immutable once created (spec §4.6); this repository
/// offers no update path, only `create`.
#[derive(Default)]
pub struct InMemoryAuditBatchRepository {
    batches: DashMap<u64, AuditBatch>,
}

impl InMemoryAuditBatchRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditBatchRepository for InMemoryAuditBatchRepository {
    async fn create(&self, batch: AuditBatch) -> Result<(), RepositoryError> {
        self.batches.insert(batch.batch_index, batch);
        Ok(())
    }

    async fn fetch(&self, batch_index: u64) -> Result<AuditBatch, RepositoryError> {
        self.batches
            .get(&batch_index)
            .map(|b| b.clone())
            .ok_or_else(|| RepositoryError::NotFound(format!("audit batch {batch_index}")))
    }

    async fn list_range(&self, from: u64, to: u64) -> Result<Vec<AuditBatch>, RepositoryError> {
        let mut batches: Vec<AuditBatch> = self
            .batches
            .iter()
            .filter(|entry| *entry.key() >= from && *entry.key() <= to)
            .map(|entry| entry.value().clone())
            .collect();
        batches.sort_by_key(|b| b.batch_index);
        Ok(batches)
    }

    async fn latest_index(&self) -> Result<Option<u64>, RepositoryError> {
        Ok(self.batches.iter().map(|b| *b.key()).max())
    }
}
