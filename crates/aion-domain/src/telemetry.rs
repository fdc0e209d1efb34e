use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single 1 Hz telemetry observation for one instance. Samples are
/// strictly ordered by `timestamp` per instance (P6 in spec §8); there is no
/// ordering guarantee across instances.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub gpu_utilization_pct: f64,
    pub vram_usage_pct: f64,
    pub temp_celsius: f64,
    pub interconnect_gbps: f64,
    pub timestamp: DateTime<Utc>,
}

impl TelemetrySample {
    pub fn value_of(&self, metric: TelemetryMetric) -> f64 {
        match metric {
            TelemetryMetric::GpuUtilizationPct => self.gpu_utilization_pct,
            TelemetryMetric::VramUsagePct => self.vram_usage_pct,
            TelemetryMetric::TempCelsius => self.temp_celsius,
            TelemetryMetric::InterconnectGbps => self.interconnect_gbps,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TelemetryMetric {
    GpuUtilizationPct,
    VramUsagePct,
    TempCelsius,
    InterconnectGbps,
}

impl TelemetryMetric {
    pub const ALL: [TelemetryMetric; 4] = [
        TelemetryMetric::GpuUtilizationPct,
        TelemetryMetric::VramUsagePct,
        TelemetryMetric::TempCelsius,
        TelemetryMetric::InterconnectGbps,
    ];
}

/// A telemetry sample tagged with the instance it came from, as delivered
/// on the Telemetry Bus.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InstanceSample {
    pub instance_id: Uuid,
    pub sample: TelemetrySample,
}
