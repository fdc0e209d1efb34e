use crate::audit::AuditRecord;
use async_trait::async_trait;

/// Handle through which every component appends to the single audit channel
/// (spec §4.6: "All components emit audit records through a single
/// append-only channel"). Implemented by `aion-audit`'s `AuditAgent`; kept
/// as a trait here so components that must emit audit records (the
/// Governor, the Router, the Scheduler) don't need a dependency on the
/// audit crate's internals, only on this contract.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: AuditRecord) -> Result<(), AuditSinkError>;
}

#[derive(Debug, thiserror::Error)]
pub enum AuditSinkError {
    #[error("audit channel closed")]
    ChannelClosed,
    #[error("audit backend unavailable: {0}")]
    Unavailable(String),
}
