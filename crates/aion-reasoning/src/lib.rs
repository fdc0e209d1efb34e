//! Reasoning Engine interface (spec §6): the one place in OrMind where
//! natural-language understanding and non-deterministic model output are
//! allowed to exist. Everything else consumes its typed output and never
//! the model directly (spec §9: "LLM non-determinism is isolated behind
//! the Reasoning Engine interface").

pub mod llm;
pub mod rule_based;

use aion_domain::task::{RiskTier, Task, TaskHandle};
use aion_domain::telemetry::TelemetrySample;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use llm::LlmReasoningEngine;
pub use rule_based::RuleBasedReasoningEngine;

#[derive(Debug, thiserror::Error)]
pub enum ReasoningError {
    #[error("engine backend unavailable: {0}")]
    Unavailable(String),
    #[error("engine returned a plan that cannot be parsed: {0}")]
    MalformedPlan(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanConstraints {
    pub budget_ceiling_usd: Option<f64>,
    pub deadline_secs: Option<u64>,
    pub allowed_regions: Vec<String>,
    /// Engine implementations must be deterministic given the same seed
    /// (spec §6); non-deterministic ones still honor it by recording
    /// their raw output for audit replay rather than ignoring it.
    pub seed: Option<u64>,
}

/// A planned task before it has been assigned a [`TaskHandle`] by the
/// Orchestrator — predecessors are expressed as indices into the plan's
/// own task list, translated to handles once the Goal's arena is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedTask {
    pub predecessors: Vec<usize>,
    pub image_reference: String,
    pub command: Vec<String>,
    pub env: HashMap<String, String>,
    pub gpu_class: String,
    pub gpu_count: u32,
    pub vram_gib: u32,
    pub max_duration_secs: u64,
    pub max_cost_usd: f64,
    pub interruptible_ok: bool,
    pub confidence: f64,
    pub risk_tier: RiskTier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPlan {
    pub tasks: Vec<PlannedTask>,
    /// Raw engine output, recorded verbatim into the audit log so replay
    /// can reconstruct this plan without re-invoking a non-deterministic
    /// model (spec §6, §9).
    pub raw_output: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosisAction {
    NoAction,
    RequestPrescale,
    ReduceBatchSize,
    RestartWithBackoff,
    MigrateToLargerGpu,
    Terminate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnosis {
    pub action: DiagnosisAction,
    pub confidence: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepairDecision {
    Retry,
    Modify,
    Abandon,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairResult {
    pub decision: RepairDecision,
    /// Populated only when `decision == Modify`: the relaxed resource
    /// demand to retry with (e.g. a smaller VRAM footprint).
    pub modified_vram_gib: Option<u32>,
    pub rationale: String,
}

#[derive(Debug, Clone)]
pub struct FailureContext {
    pub provider_error_kind: String,
    pub retry_count: u32,
    pub last_error_message: String,
}

/// Instance-level context accompanying a metrics window into `diagnose`.
/// The Healing Agent evaluates its own trigger table (spec §4.5) and
/// already knows which action the condition maps to; it calls `diagnose`
/// to obtain (and gate on) the required confidence for that action,
/// rather than to pick the action.
#[derive(Debug, Clone)]
pub struct InstanceContext {
    pub gpu_class: String,
    pub oom_signal: bool,
    pub restart_count_last_10min: u32,
    pub candidate_action: DiagnosisAction,
}

#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    async fn plan(
        &self,
        goal_text: &str,
        constraints: &PlanConstraints,
    ) -> Result<TaskPlan, ReasoningError>;

    async fn diagnose(
        &self,
        instance_context: &InstanceContext,
        metrics_window: &[TelemetrySample],
    ) -> Result<Diagnosis, ReasoningError>;

    async fn repair(
        &self,
        task: &Task,
        task_handle: TaskHandle,
        failure: &FailureContext,
    ) -> Result<RepairResult, ReasoningError>;
}
