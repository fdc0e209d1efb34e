use crate::RepositoryError;
use aion_domain::price::{PriceKey, PricePoint};
use async_trait::async_trait;
use dashmap::DashMap;

#[async_trait]
pub trait PriceRepository: Send + Sync {
    async fn append(&self, point: PricePoint) -> Result<(), RepositoryError>;
    async fn recent(&self, key: &PriceKey, n: usize) -> Result<Vec<PricePoint>, RepositoryError>;
}

/// Keeps every point ever appended per key; the Cost Optimizer's own ring
/// buffer (spec §4.2) is what actually bounds memory in the hot path, this
/// is the durable log behind it.
#[derive(Default)]
pub struct InMemoryPriceRepository {
    points: DashMap<PriceKey, Vec<PricePoint>>,
}

impl InMemoryPriceRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PriceRepository for InMemoryPriceRepository {
    async fn append(&self, point: PricePoint) -> Result<(), RepositoryError> {
        self.points.entry(point.key.clone()).or_default().push(point);
        Ok(())
    }

    async fn recent(&self, key: &PriceKey, n: usize) -> Result<Vec<PricePoint>, RepositoryError> {
        Ok(self
            .points
            .get(key)
            .map(|points| {
                let len = points.len();
                let start = len.saturating_sub(n);
                points[start..].to_vec()
            })
            .unwrap_or_default())
    }
}
