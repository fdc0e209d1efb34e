//! Persistence contracts (spec §6). No concrete database driver lives here
//! — that's out of scope — only the trait each activity programs against,
//! plus an in-memory reference implementation used by tests and by
//! `aion-server` until a real backend is wired in.

pub mod audit_batches;
pub mod goals;
pub mod instances;
pub mod jobs;
pub mod prices;
pub mod telemetry;

pub use audit_batches::{AuditBatchRepository, InMemoryAuditBatchRepository};
pub use goals::{GoalRepository, InMemoryGoalRepository};
pub use instances::{InMemoryInstanceRepository, InstanceRepository};
pub use jobs::{InMemoryJobRepository, JobRepository};
pub use prices::{InMemoryPriceRepository, PriceRepository};
pub use telemetry::{InMemoryTelemetryRepository, TelemetryRepository};

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}
