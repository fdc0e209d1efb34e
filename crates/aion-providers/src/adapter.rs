use aion_domain::instance::Instance;
use aion_domain::price::PricePoint;
use aion_domain::task::{GpuClass, ResourceDemand};
use aion_domain::telemetry::TelemetrySample;
use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

/// Error kinds a caller must distinguish (spec §4.1). These are kinds, not
/// an exhaustive fault taxonomy — adapters map vendor-specific failures
/// onto this set rather than exposing their own error types.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("transient provider error: {0}")]
    Transient(String),
    #[error("rate limited, retry after {retry_after:?}: {message}")]
    RateLimited {
        message: String,
        retry_after: Duration,
    },
    #[error("permanent provider error: {0}")]
    Permanent(String),
    #[error("no capacity available: {0}")]
    Unavailable(String),
    #[error("could not confirm final state: {0}")]
    UnknownState(String),
}

#[derive(Debug, Clone)]
pub struct InstanceRequest {
    pub gpu_class: GpuClass,
    pub region: String,
    pub demand: ResourceDemand,
    /// Caller-supplied idempotency token; identical token must yield an
    /// identical instance (spec §4.1).
    pub provisioning_token: Uuid,
}

/// A cancellable handle to a running remote command; stdout is delivered
/// line by line, exit status resolves once the process exits.
pub struct CommandHandle {
    pub stdout: tokio::sync::mpsc::Receiver<String>,
    pub exit_status: tokio::sync::oneshot::Receiver<i32>,
    cancel: tokio::sync::oneshot::Sender<()>,
}

impl CommandHandle {
    pub fn new(
        stdout: tokio::sync::mpsc::Receiver<String>,
        exit_status: tokio::sync::oneshot::Receiver<i32>,
        cancel: tokio::sync::oneshot::Sender<()>,
    ) -> Self {
        Self {
            stdout,
            exit_status,
            cancel,
        }
    }

    pub fn cancel(self) {
        let _ = self.cancel.send(());
    }
}

/// Uniform facade over one GPU cloud provider (spec §4.1). Every method
/// that cannot confirm its outcome must return `UnknownState` rather than
/// guess; the Router treats that as a possibly-leaked resource and
/// schedules a reconcile sweep.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Never blocks longer than `price_budget`; returns the last cached
    /// value with `stale = true` on timeout rather than erroring.
    async fn price(
        &self,
        gpu_class: &GpuClass,
        region: &str,
        price_budget: Duration,
    ) -> Result<PricePoint, ProviderError>;

    async fn provision(&self, request: InstanceRequest) -> Result<Instance, ProviderError>;

    async fn execute(
        &self,
        instance: &Instance,
        command: Vec<String>,
        env: std::collections::HashMap<String, String>,
    ) -> Result<CommandHandle, ProviderError>;

    async fn metrics(&self, instance: &Instance) -> Result<TelemetrySample, ProviderError>;

    /// Idempotent: succeeds even if the instance has already disappeared
    /// server-side.
    async fn terminate(&self, instance: &Instance) -> Result<(), ProviderError>;

    /// Cooperative pre-migration checkpoint request (spec §4.4). The
    /// default assumes the workload cannot checkpoint; adapters whose
    /// provider supports it override this and the Cost Optimizer treats a
    /// `Permanent` result as "ineligible for migration", not retryable.
    async fn checkpoint(&self, _instance: &Instance) -> Result<(), ProviderError> {
        Err(ProviderError::Permanent(
            "workload does not support cooperative checkpointing".to_string(),
        ))
    }
}
