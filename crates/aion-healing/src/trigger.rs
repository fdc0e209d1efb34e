//! The trigger table itself (spec §4.5). Kept as a pure function over
//! already-computed window state so it can be unit tested without a
//! telemetry subscription or a live Governor.

use crate::window::InstanceWindow;
use aion_domain::telemetry::{TelemetryMetric, TelemetrySample};
use aion_reasoning::DiagnosisAction;

#[derive(Debug, Clone, PartialEq)]
pub struct TriggerMatch {
    pub action: DiagnosisAction,
    /// Minimum `Diagnosis::confidence` required before the action proceeds
    /// to the Safety Governor. `0.0` for "immediate" rows in the table,
    /// which act on the condition alone.
    pub required_confidence: f64,
    pub reason: String,
}

/// Evaluates the condition rows driven by this sample's arrival, in order
/// of severity: an exhausted restart budget (most severe, terminal) first,
/// then the sustained-temperature alert, then an acute VRAM breach, then a
/// sustained Z-score anomaly. At most one trigger fires per sample; a
/// quieter condition underneath a louder one waits for the next sample.
pub fn evaluate_sample(
    sample: &TelemetrySample,
    window: &InstanceWindow,
    breached_metrics: &[(TelemetryMetric, f64)],
    restart_budget_exhausted: bool,
) -> Option<TriggerMatch> {
    if restart_budget_exhausted {
        return Some(TriggerMatch {
            action: DiagnosisAction::Terminate,
            required_confidence: 0.0,
            reason: "restart count reached 3 within the trailing 10 minutes".to_string(),
        });
    }

    if window.temp_sustained() {
        return Some(TriggerMatch {
            action: DiagnosisAction::ReduceBatchSize,
            required_confidence: 0.0,
            reason: "temp_celsius > 84 sustained for 3 samples".to_string(),
        });
    }

    if sample.vram_usage_pct > 97.0 {
        return Some(TriggerMatch {
            action: DiagnosisAction::RequestPrescale,
            required_confidence: 0.80,
            reason: format!("vram_usage_pct {:.1} > 97", sample.vram_usage_pct),
        });
    }

    if let Some((metric, z)) = breached_metrics.first() {
        return Some(TriggerMatch {
            action: DiagnosisAction::RestartWithBackoff,
            required_confidence: 0.70,
            reason: format!("{metric:?} Z-score {z:.2} sustained for 3 samples"),
        });
    }

    None
}

/// The explicit OOM signal is reported out of band by the job, not derived
/// from a telemetry sample, so it has its own entry point rather than
/// living inside `evaluate_sample`.
pub fn oom_trigger() -> TriggerMatch {
    TriggerMatch {
        action: DiagnosisAction::MigrateToLargerGpu,
        required_confidence: 0.85,
        reason: "explicit OOM signal from job".to_string(),
    }
}
