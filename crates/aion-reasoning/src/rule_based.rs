//! Deterministic fallback engine. Used when no LLM-backed implementation
//! is configured, and as the reference implementation replay can always
//! fall back to since it has no external dependency to go stale.

use crate::{
    Diagnosis, DiagnosisAction, FailureContext, InstanceContext, PlanConstraints, PlannedTask,
    ReasoningEngine, ReasoningError, RepairDecision, RepairResult, TaskPlan,
};
use aion_domain::task::{RiskTier, Task, TaskHandle};
use aion_domain::telemetry::TelemetrySample;
use async_trait::async_trait;

/// Fixed confidences from the Healing trigger table (spec §4.5), used
/// when no model is available to assess anomaly context.
fn fixed_confidence(action: DiagnosisAction) -> f64 {
    match action {
        DiagnosisAction::NoAction => 1.0,
        DiagnosisAction::RequestPrescale => 0.80,
        DiagnosisAction::ReduceBatchSize => 1.0,
        DiagnosisAction::RestartWithBackoff => 0.70,
        DiagnosisAction::MigrateToLargerGpu => 0.85,
        DiagnosisAction::Terminate => 1.0,
    }
}

pub struct RuleBasedReasoningEngine;

impl RuleBasedReasoningEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RuleBasedReasoningEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReasoningEngine for RuleBasedReasoningEngine {
    /// Produces a single-task plan from the raw goal text. This fallback
    /// does not parse natural language; it is a deterministic default
    /// sized to the common case (one container, one GPU) so the core can
    /// run end to end without a model configured.
    async fn plan(
        &self,
        goal_text: &str,
        constraints: &PlanConstraints,
    ) -> Result<TaskPlan, ReasoningError> {
        let task = PlannedTask {
            predecessors: Vec::new(),
            image_reference: "ormind/default-runner:latest".to_string(),
            command: vec!["run".to_string(), goal_text.to_string()],
            env: Default::default(),
            gpu_class: "a100".to_string(),
            gpu_count: 1,
            vram_gib: 40,
            max_duration_secs: constraints.deadline_secs.unwrap_or(3600),
            max_cost_usd: constraints.budget_ceiling_usd.unwrap_or(50.0),
            interruptible_ok: true,
            confidence: 0.5,
            risk_tier: RiskTier::Normal,
        };

        Ok(TaskPlan {
            tasks: vec![task],
            raw_output: serde_json::json!({ "engine": "rule_based", "goal_text": goal_text }),
        })
    }

    async fn diagnose(
        &self,
        instance_context: &InstanceContext,
        metrics_window: &[TelemetrySample],
    ) -> Result<Diagnosis, ReasoningError> {
        let confidence = fixed_confidence(instance_context.candidate_action);
        let reasoning = format!(
            "rule table confidence for {:?} over a {}-sample window",
            instance_context.candidate_action,
            metrics_window.len()
        );

        Ok(Diagnosis {
            action: instance_context.candidate_action,
            confidence,
            reasoning,
        })
    }

    async fn repair(
        &self,
        task: &Task,
        _task_handle: TaskHandle,
        failure: &FailureContext,
    ) -> Result<RepairResult, ReasoningError> {
        let result = match failure.provider_error_kind.as_str() {
            "transient" | "rate_limited" => RepairResult {
                decision: RepairDecision::Retry,
                modified_vram_gib: None,
                rationale: format!(
                    "{} error is retryable, attempt {}",
                    failure.provider_error_kind, failure.retry_count
                ),
            },
            "unavailable" if task.demand.vram_gib > 16 => RepairResult {
                decision: RepairDecision::Modify,
                modified_vram_gib: Some(task.demand.vram_gib / 2),
                rationale: "capacity unavailable at requested VRAM, retrying smaller".to_string(),
            },
            _ => RepairResult {
                decision: RepairDecision::Abandon,
                modified_vram_gib: None,
                rationale: format!(
                    "{} is not recoverable after {} attempts: {}",
                    failure.provider_error_kind, failure.retry_count, failure.last_error_message
                ),
            },
        };
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aion_domain::task::{ResourceDemand, TaskStatus};

    fn sample_task(vram_gib: u32) -> Task {
        Task {
            handle: TaskHandle(0),
            predecessors: Vec::new(),
            image_reference: "img".to_string(),
            command: vec![],
            env: Default::default(),
            demand: ResourceDemand {
                gpu_class: aion_domain::task::GpuClass::A100,
                gpu_count: 1,
                vram_gib,
                max_duration_secs: 3600,
                max_cost_usd: 10.0,
                interruptible_ok: true,
                p_interrupt_per_hour: 0.0,
            },
            confidence: 0.9,
            risk_tier: RiskTier::Normal,
            status: TaskStatus::Running,
            retry_count: 1,
            base_priority: 1.0,
            deadline_at: None,
            expected_duration_secs: 3600,
        }
    }

    #[tokio::test]
    async fn plan_produces_at_least_one_task() {
        let engine = RuleBasedReasoningEngine::new();
        let plan = engine
            .plan("train a model", &PlanConstraints {
                budget_ceiling_usd: Some(20.0),
                deadline_secs: Some(1800),
                allowed_regions: vec![],
                seed: None,
            })
            .await
            .unwrap();
        assert_eq!(plan.tasks.len(), 1);
        assert_eq!(plan.tasks[0].max_cost_usd, 20.0);
    }

    #[tokio::test]
    async fn diagnose_returns_table_confidence() {
        let engine = RuleBasedReasoningEngine::new();
        let context = InstanceContext {
            gpu_class: "a100".to_string(),
            oom_signal: false,
            restart_count_last_10min: 0,
            candidate_action: DiagnosisAction::RequestPrescale,
        };
        let diagnosis = engine.diagnose(&context, &[]).await.unwrap();
        assert_eq!(diagnosis.confidence, 0.80);
    }

    #[tokio::test]
    async fn repair_retries_transient_errors() {
        let engine = RuleBasedReasoningEngine::new();
        let failure = FailureContext {
            provider_error_kind: "transient".to_string(),
            retry_count: 1,
            last_error_message: "timeout".to_string(),
        };
        let result = engine
            .repair(&sample_task(40), TaskHandle(0), &failure)
            .await
            .unwrap();
        assert_eq!(result.decision, RepairDecision::Retry);
    }

    #[tokio::test]
    async fn repair_modifies_demand_on_unavailable_capacity() {
        let engine = RuleBasedReasoningEngine::new();
        let failure = FailureContext {
            provider_error_kind: "unavailable".to_string(),
            retry_count: 2,
            last_error_message: "no capacity".to_string(),
        };
        let result = engine
            .repair(&sample_task(80), TaskHandle(0), &failure)
            .await
            .unwrap();
        assert_eq!(result.decision, RepairDecision::Modify);
        assert_eq!(result.modified_vram_gib, Some(40));
    }

    #[tokio::test]
    async fn repair_abandons_permanent_errors() {
        let engine = RuleBasedReasoningEngine::new();
        let failure = FailureContext {
            provider_error_kind: "permanent".to_string(),
            retry_count: 1,
            last_error_message: "auth failure".to_string(),
        };
        let result = engine
            .repair(&sample_task(40), TaskHandle(0), &failure)
            .await
            .unwrap();
        assert_eq!(result.decision, RepairDecision::Abandon);
    }
}
