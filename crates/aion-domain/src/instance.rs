use crate::task::GpuClass;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceState {
    Provisioning,
    Running,
    Draining,
    Terminated,
    Failed,
}

/// Provider-allocated compute resource. Owned by the job that requested it;
/// its lifetime is strictly contained in the job's (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: Uuid,
    pub job_id: Uuid,
    pub provider_instance_id: String,
    pub provider: String,
    pub region: String,
    pub gpu_class: GpuClass,
    pub gpu_count: u32,
    pub hourly_rate_usd: f64,
    pub state: InstanceState,
    pub interruptible: bool,
    pub created_at: DateTime<Utc>,
}
