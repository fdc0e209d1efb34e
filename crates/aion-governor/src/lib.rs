//! Safety Governor (spec §4.7). Every cost-bearing or state-mutating
//! action carries a preflight `check` call in its signature (spec §9:
//! "Safety as a decorator becomes an explicit synchronous gate call" —
//! there is no way to bypass the gate by forgetting a decorator).

use aion_domain::audit::{Actor, AuditOutcome, AuditRecord};
use aion_domain::policy::{ApprovalRequirement, PolicyWeights};
use aion_domain::sink::AuditSink;
use aion_domain::task::RiskTier;
use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum GovernorVerdict {
    Approve,
    RequireApproval,
    Deny { rationale: String },
}

#[derive(Debug, Clone)]
pub struct CheckRequest {
    pub actor: Actor,
    pub action: String,
    pub estimated_cost_usd: f64,
    pub risk_tier: RiskTier,
    pub region: Option<String>,
    pub goal_id: Option<Uuid>,
}

#[derive(Debug, thiserror::Error)]
pub enum GovernorError {
    #[error("audit sink rejected the decision record: {0}")]
    AuditFailed(String),
}

struct SpendLedger {
    day: NaiveDate,
    spent_today_usd: f64,
    spent_per_goal_usd: DashMap<Uuid, f64>,
}

impl SpendLedger {
    fn new() -> Self {
        Self {
            day: Utc::now().date_naive(),
            spent_today_usd: 0.0,
            spent_per_goal_usd: DashMap::new(),
        }
    }

    fn roll_if_new_day(&mut self) {
        let today = Utc::now().date_naive();
        if today != self.day {
            self.day = today;
            self.spent_today_usd = 0.0;
        }
    }
}

/// Purely a function of current [`PolicyWeights`] plus the rolling spend
/// counter (spec §4.7: "Decisions are purely a function of the Governor's
/// current PolicyWeights plus a rolling spend counter, making them
/// replayable from audit").
fn evaluate(
    weights: &PolicyWeights,
    ledger_spent_today: f64,
    ledger_spent_goal: f64,
    request: &CheckRequest,
) -> GovernorVerdict {
    if let Some(region) = &request.region {
        if !weights.region_allowed(region) {
            return GovernorVerdict::Deny {
                rationale: format!("region {region} is not on the allow list"),
            };
        }
    }

    if request.estimated_cost_usd > 0.0 && ledger_spent_today >= weights.per_day_cap_usd {
        return GovernorVerdict::Deny {
            rationale: "per-day spend cap already reached".to_string(),
        };
    }

    if request.estimated_cost_usd > weights.per_action_cap_usd {
        return GovernorVerdict::Deny {
            rationale: format!(
                "estimated cost {:.2} exceeds per-action cap {:.2}",
                request.estimated_cost_usd, weights.per_action_cap_usd
            ),
        };
    }

    if ledger_spent_goal + request.estimated_cost_usd > weights.per_goal_cap_usd {
        return GovernorVerdict::Deny {
            rationale: format!(
                "projected goal spend {:.2} exceeds per-goal cap {:.2}",
                ledger_spent_goal + request.estimated_cost_usd,
                weights.per_goal_cap_usd
            ),
        };
    }

    match weights.requirement_for(request.risk_tier) {
        ApprovalRequirement::Automatic => GovernorVerdict::Approve,
        ApprovalRequirement::RequireExternalConfirmation => GovernorVerdict::RequireApproval,
        ApprovalRequirement::NeverApprove => GovernorVerdict::Deny {
            rationale: format!("risk tier {:?} is never approved", request.risk_tier),
        },
    }
}

pub struct SafetyGovernor {
    weights: RwLock<PolicyWeights>,
    weights_history: RwLock<Vec<PolicyWeights>>,
    ledger: RwLock<SpendLedger>,
    audit: Arc<dyn AuditSink>,
}

impl SafetyGovernor {
    pub fn new(initial_weights: PolicyWeights, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            weights: RwLock::new(initial_weights),
            weights_history: RwLock::new(Vec::new()),
            ledger: RwLock::new(SpendLedger::new()),
            audit,
        }
    }

    pub async fn current_weights(&self) -> PolicyWeights {
        self.weights.read().await.clone()
    }

    pub async fn check(&self, request: CheckRequest) -> Result<GovernorVerdict, GovernorError> {
        let started = std::time::Instant::now();
        let weights = self.weights.read().await.clone();

        let (spent_today, spent_goal) = {
            let mut ledger = self.ledger.write().await;
            ledger.roll_if_new_day();
            let spent_goal = request
                .goal_id
                .and_then(|id| ledger.spent_per_goal_usd.get(&id).map(|v| *v))
                .unwrap_or(0.0);
            (ledger.spent_today_usd, spent_goal)
        };

        let verdict = evaluate(&weights, spent_today, spent_goal, &request);

        if matches!(verdict, GovernorVerdict::Approve) && request.estimated_cost_usd > 0.0 {
            let mut ledger = self.ledger.write().await;
            ledger.spent_today_usd += request.estimated_cost_usd;
            if let Some(goal_id) = request.goal_id {
                *ledger.spent_per_goal_usd.entry(goal_id).or_insert(0.0) += request.estimated_cost_usd;
            }
        }

        let outcome = match &verdict {
            GovernorVerdict::Approve => AuditOutcome::Approved,
            GovernorVerdict::RequireApproval => AuditOutcome::RequiresApproval,
            GovernorVerdict::Deny { rationale } => AuditOutcome::Denied {
                rationale: rationale.clone(),
            },
        };

        let record = AuditRecord {
            id: Uuid::new_v4(),
            index: 0,
            actor: Actor::SafetyGovernor,
            action: request.action.clone(),
            reasoning: format!("requested by {:?}", request.actor),
            input_payload: serde_json::json!({
                "actor": format!("{:?}", request.actor),
                "estimated_cost_usd": request.estimated_cost_usd,
                "risk_tier": format!("{:?}", request.risk_tier),
                "region": request.region,
            }),
            outcome,
            cost_impact_usd: request.estimated_cost_usd,
            duration_ms: started.elapsed().as_millis() as u64,
            safety_approved: matches!(verdict, GovernorVerdict::Approve),
            goal_id: request.goal_id,
            timestamp: Utc::now(),
        };

        self.audit
            .append(record)
            .await
            .map_err(|e| GovernorError::AuditFailed(e.to_string()))?;

        Ok(verdict)
    }

    /// Weight changes are a distinct, audited operation — never reachable
    /// through `check`'s approve path (spec §4.7 invariant).
    pub async fn set_weights(
        &self,
        new_weights: PolicyWeights,
    ) -> Result<(), GovernorError> {
        let mut weights = self.weights.write().await;
        let mut history = self.weights_history.write().await;
        history.push(weights.clone());

        let mut new_weights = new_weights;
        new_weights.version = weights.version + 1;

        let record = AuditRecord {
            id: Uuid::new_v4(),
            index: 0,
            actor: Actor::SafetyGovernor,
            action: "reconfigure_policy_weights".to_string(),
            reasoning: "explicit weight change, distinct from the approve path".to_string(),
            input_payload: serde_json::to_value(&new_weights).unwrap_or_default(),
            outcome: AuditOutcome::Succeeded,
            cost_impact_usd: 0.0,
            duration_ms: 0,
            safety_approved: true,
            goal_id: None,
            timestamp: Utc::now(),
        };

        *weights = new_weights;
        drop(weights);
        drop(history);

        self.audit
            .append(record)
            .await
            .map_err(|e| GovernorError::AuditFailed(e.to_string()))
    }

    /// Rolls back to the previous weight version instantly; the very next
    /// `check` call sees the rolled-back weights (spec §9, Q3).
    pub async fn rollback_weights(&self) -> Result<(), GovernorError> {
        let mut history = self.weights_history.write().await;
        let previous = history
            .pop()
            .ok_or_else(|| GovernorError::AuditFailed("no prior weight version to roll back to".to_string()))?;

        let mut weights = self.weights.write().await;
        *weights = previous.clone();

        let record = AuditRecord {
            id: Uuid::new_v4(),
            index: 0,
            actor: Actor::SafetyGovernor,
            action: "rollback_policy_weights".to_string(),
            reasoning: format!("instant rollback to version {}", previous.version),
            input_payload: serde_json::to_value(&previous).unwrap_or_default(),
            outcome: AuditOutcome::Succeeded,
            cost_impact_usd: 0.0,
            duration_ms: 0,
            safety_approved: true,
            goal_id: None,
            timestamp: Utc::now(),
        };

        drop(weights);
        drop(history);

        self.audit
            .append(record)
            .await
            .map_err(|e| GovernorError::AuditFailed(e.to_string()))
    }

    /// Replays a historical decision from a fixed `PolicyWeights` snapshot
    /// and spend counters, without consulting live state — used by audit
    /// replay to reconstruct why a past action was approved or denied.
    pub fn replay(
        weights: &PolicyWeights,
        spent_today: f64,
        spent_goal: f64,
        request: &CheckRequest,
    ) -> GovernorVerdict {
        evaluate(weights, spent_today, spent_goal, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aion_domain::sink::AuditSinkError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingSink(Mutex<Vec<AuditRecord>>);

    impl RecordingSink {
        fn new() -> Self {
            Self(Mutex::new(Vec::new()))
        }
    }

    #[async_trait]
    impl AuditSink for RecordingSink {
        async fn append(&self, record: AuditRecord) -> Result<(), AuditSinkError> {
            self.0.lock().unwrap().push(record);
            Ok(())
        }
    }

    fn governor_with(weights: PolicyWeights) -> (SafetyGovernor, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        (SafetyGovernor::new(weights, sink.clone()), sink)
    }

    fn low_risk_request(cost: f64) -> CheckRequest {
        CheckRequest {
            actor: Actor::Scheduler,
            action: "provision".to_string(),
            estimated_cost_usd: cost,
            risk_tier: RiskTier::Low,
            region: None,
            goal_id: Some(Uuid::new_v4()),
        }
    }

    #[tokio::test]
    async fn approves_low_risk_within_caps() {
        let (governor, sink) = governor_with(PolicyWeights::default());
        let verdict = governor.check(low_risk_request(10.0)).await.unwrap();
        assert_eq!(verdict, GovernorVerdict::Approve);
        assert_eq!(sink.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn denies_over_per_action_cap() {
        let (governor, _sink) = governor_with(PolicyWeights::default());
        let mut request = low_risk_request(10_000.0);
        request.risk_tier = RiskTier::Low;
        let verdict = governor.check(request).await.unwrap();
        assert!(matches!(verdict, GovernorVerdict::Deny { .. }));
    }

    #[tokio::test]
    async fn denies_once_daily_cap_reached() {
        let mut weights = PolicyWeights::default();
        weights.per_action_cap_usd = 1000.0;
        weights.per_goal_cap_usd = 1000.0;
        weights.per_day_cap_usd = 100.0;
        let (governor, _sink) = governor_with(weights);

        let first = governor.check(low_risk_request(90.0)).await.unwrap();
        assert_eq!(first, GovernorVerdict::Approve);

        let second = governor.check(low_risk_request(50.0)).await.unwrap();
        assert!(matches!(second, GovernorVerdict::Deny { .. }));
    }

    #[tokio::test]
    async fn blocked_risk_tier_is_never_approved() {
        let (governor, _sink) = governor_with(PolicyWeights::default());
        let mut request = low_risk_request(1.0);
        request.risk_tier = RiskTier::Blocked;
        let verdict = governor.check(request).await.unwrap();
        assert!(matches!(verdict, GovernorVerdict::Deny { .. }));
    }

    #[tokio::test]
    async fn elevated_risk_requires_approval() {
        let (governor, _sink) = governor_with(PolicyWeights::default());
        let mut request = low_risk_request(1.0);
        request.risk_tier = RiskTier::Elevated;
        let verdict = governor.check(request).await.unwrap();
        assert_eq!(verdict, GovernorVerdict::RequireApproval);
    }

    #[tokio::test]
    async fn set_weights_then_rollback_restores_prior_version() {
        let (governor, _sink) = governor_with(PolicyWeights::default());
        let mut new_weights = PolicyWeights::default();
        new_weights.per_action_cap_usd = 5.0;
        governor.set_weights(new_weights).await.unwrap();
        assert_eq!(governor.current_weights().await.per_action_cap_usd, 5.0);

        governor.rollback_weights().await.unwrap();
        assert_eq!(governor.current_weights().await.per_action_cap_usd, 50.0);
    }

    #[test]
    fn replay_matches_live_evaluation() {
        let weights = PolicyWeights::default();
        let request = low_risk_request(10.0);
        let verdict = SafetyGovernor::replay(&weights, 0.0, 0.0, &request);
        assert_eq!(verdict, GovernorVerdict::Approve);
    }
}
