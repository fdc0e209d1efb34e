use crate::task::GpuClass;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Availability {
    High,
    Medium,
    Low,
    None,
}

/// A key into the per-(provider, region, gpu_class, instance_type) price
/// ring buffers maintained by the Cost Optimizer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PriceKey {
    pub provider: String,
    pub region: String,
    pub gpu_class: GpuClass,
    pub instance_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricePoint {
    pub key: PriceKey,
    pub hourly_rate_usd: f64,
    pub availability: Availability,
    pub observed_at: DateTime<Utc>,
    /// Set when the adapter could not reach the provider within its RPC
    /// budget and returned the last cached value instead (spec §4.1).
    pub stale: bool,
}
