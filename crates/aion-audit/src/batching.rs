//! Batch sealing triggers (spec §4.6: "128 records or 5 s wall-clock,
//! whichever first"). Size-triggered sealing happens inline in
//! [`crate::AuditAgent::append`]; this module owns the timeout side.

use crate::AuditAgent;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchSealTrigger {
    SizeReached,
    Timeout,
}

/// Spawns a background task that seals any pending records once per
/// `seal_interval`, regardless of whether `batch_size` has been reached.
/// Sealing an empty buffer is a no-op (see `AuditAgent::seal`).
pub fn spawn_seal_timer(agent: Arc<AuditAgent>, seal_interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(seal_interval);
        loop {
            ticker.tick().await;
            if let Err(error) = agent.seal().await {
                tracing::warn!(%error, "periodic audit batch seal failed");
            }
        }
    })
}
