use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which of the five activities (or the Safety Governor) produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Actor {
    Orchestrator,
    Scheduler,
    CostOptimizer,
    HealingAgent,
    SafetyGovernor,
    ProviderRouter,
    AuditAgent,
}

/// Outcome of the recorded action, independent of whether the Governor
/// approved it — a `Denied` verdict is itself an outcome worth auditing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditOutcome {
    Approved,
    Denied { rationale: String },
    RequiresApproval,
    Succeeded,
    Failed { reason: String },
}

/// One append-only decision record (spec §3, §4.6).
///
/// `index` is monotonic within a batch, assigned by the Audit Agent at
/// append time, not by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub index: u64,
    pub actor: Actor,
    pub action: String,
    pub reasoning: String,
    pub input_payload: serde_json::Value,
    pub outcome: AuditOutcome,
    pub cost_impact_usd: f64,
    pub duration_ms: u64,
    pub safety_approved: bool,
    pub goal_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
}

/// An ordered, HMAC-sealed run of records (spec §4.6).
///
/// `tag` covers `records ∥ previous_digest ∥ batch_index`; `previous_digest`
/// is the hex-encoded tag of the prior batch (empty string for batch 0).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditBatch {
    pub batch_index: u64,
    pub records: Vec<AuditRecord>,
    pub previous_digest: String,
    pub tag: String,
    pub sealed_at: DateTime<Utc>,
}
