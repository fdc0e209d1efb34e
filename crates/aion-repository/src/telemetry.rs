use crate::RepositoryError;
use aion_domain::telemetry::InstanceSample;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

#[async_trait]
pub trait TelemetryRepository: Send + Sync {
    async fn publish(&self, sample: InstanceSample) -> Result<(), RepositoryError>;
    fn subscribe(&self, instance_id: Uuid) -> broadcast::Receiver<InstanceSample>;
}

/// One broadcast channel per instance. Subscribers that fall behind the
/// channel capacity lose the oldest samples, mirroring the telemetry bus's
/// own per-instance bound (spec §9: "dropping under load is explicit and
/// audited, never silent" — the drop itself is surfaced by the Healing
/// Agent via `RecvError::Lagged`, not swallowed here).
pub struct InMemoryTelemetryRepository {
    channels: DashMap<Uuid, broadcast::Sender<InstanceSample>>,
    capacity: usize,
}

impl InMemoryTelemetryRepository {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity,
        }
    }
}

impl Default for InMemoryTelemetryRepository {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl TelemetryRepository for InMemoryTelemetryRepository {
    async fn publish(&self, sample: InstanceSample) -> Result<(), RepositoryError> {
        let sender = self
            .channels
            .entry(sample.instance_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone();
        // No subscribers yet is not an error; telemetry publication
        // precedes subscription in the common startup ordering.
        let _ = sender.send(sample);
        Ok(())
    }

    fn subscribe(&self, instance_id: Uuid) -> broadcast::Receiver<InstanceSample> {
        self.channels
            .entry(instance_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }
}
