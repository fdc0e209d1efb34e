//! Healing Agent (spec §4.5): one watch loop per active instance,
//! subscribed to the Telemetry Bus, evaluating the trigger table on every
//! sample and gating every resulting action through the Safety Governor.

pub mod trigger;
pub mod window;

use aion_core::events::{EventBus, OrMindEvent};
use aion_domain::audit::Actor;
use aion_domain::instance::{Instance, InstanceState};
use aion_domain::task::{GpuClass, ResourceDemand, RiskTier};
use aion_governor::{CheckRequest, GovernorVerdict, SafetyGovernor};
use aion_providers::adapter::InstanceRequest;
use aion_providers::router::CandidateFilter;
use aion_providers::ProviderRouter;
use aion_reasoning::{DiagnosisAction, InstanceContext, ReasoningEngine};
use aion_repository::InstanceRepository;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use trigger::{evaluate_sample, oom_trigger, TriggerMatch};
use uuid::Uuid;
use window::InstanceWindow;

const DEFAULT_PRICE_BUDGET: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum HealingError {
    #[error("governor rejected the decision record: {0}")]
    Governor(#[from] aion_governor::GovernorError),
    #[error("repository error: {0}")]
    Repository(#[from] aion_repository::RepositoryError),
}

/// Placeholder demand used only to query prices and request capacity when
/// healing an instance the Healing Agent did not originally provision —
/// its VRAM footprint is unknown at this layer, so it asks for the same
/// class and count the instance already has.
fn demand_for(instance: &Instance) -> ResourceDemand {
    ResourceDemand {
        gpu_class: instance.gpu_class.clone(),
        gpu_count: instance.gpu_count,
        vram_gib: 0,
        max_duration_secs: u64::MAX,
        max_cost_usd: f64::MAX,
        interruptible_ok: instance.interruptible,
        p_interrupt_per_hour: 0.0,
    }
}

pub struct HealingAgent {
    telemetry: Arc<dyn aion_repository::TelemetryRepository>,
    instance_repository: Arc<dyn InstanceRepository>,
    router: Arc<ProviderRouter>,
    governor: Arc<SafetyGovernor>,
    reasoning: Arc<dyn ReasoningEngine>,
    events: Arc<EventBus>,
    /// Per-instance watch state, keyed so `report_oom` can reach a window
    /// already tracking restart history for that instance.
    windows: Mutex<HashMap<Uuid, InstanceWindow>>,
}

impl HealingAgent {
    pub fn new(
        telemetry: Arc<dyn aion_repository::TelemetryRepository>,
        instance_repository: Arc<dyn InstanceRepository>,
        router: Arc<ProviderRouter>,
        governor: Arc<SafetyGovernor>,
        reasoning: Arc<dyn ReasoningEngine>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            telemetry,
            instance_repository,
            router,
            governor,
            reasoning,
            events,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Spawns the watch loop for one instance (spec §5: "one Healing Agent
    /// per active instance"). Runs until the telemetry channel closes.
    pub fn watch(self: &Arc<Self>, instance_id: Uuid) {
        let agent = self.clone();
        tokio::spawn(async move { agent.run(instance_id).await });
    }

    /// Entry point for an explicit OOM signal reported out of band by the
    /// running job — not telemetry-derived, so it bypasses `evaluate_sample`
    /// entirely (spec §4.5 row 4).
    pub async fn report_oom(&self, instance_id: Uuid) {
        self.act(instance_id, oom_trigger()).await;
    }

    async fn run(&self, instance_id: Uuid) {
        self.windows.lock().await.entry(instance_id).or_default();
        let mut rx = self.telemetry.subscribe(instance_id);
        loop {
            match rx.recv().await {
                Ok(instance_sample) => {
                    if instance_sample.instance_id != instance_id {
                        continue;
                    }
                    let matched = {
                        let mut windows = self.windows.lock().await;
                        let window = windows.entry(instance_id).or_default();
                        let breached = window.observe(&instance_sample.sample);
                        let restart_exhausted = window.restart_budget_exhausted();
                        evaluate_sample(&instance_sample.sample, window, &breached, restart_exhausted)
                    };
                    if let Some(trigger) = matched {
                        self.act(instance_id, trigger).await;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(dropped)) => {
                    self.events
                        .publish(OrMindEvent::TelemetryDrop {
                            instance_id,
                            dropped: dropped as usize,
                            timestamp: Utc::now(),
                        })
                        .await;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
        self.windows.lock().await.remove(&instance_id);
    }

    async fn act(&self, instance_id: Uuid, matched: TriggerMatch) {
        let started = std::time::Instant::now();

        let instance = match self.instance_repository.fetch(instance_id).await {
            Ok(instance) => instance,
            Err(error) => {
                tracing::warn!(%instance_id, %error, "cannot act, instance not found");
                return;
            }
        };

        let context = InstanceContext {
            gpu_class: instance.gpu_class.to_string(),
            oom_signal: matched.action == DiagnosisAction::MigrateToLargerGpu,
            restart_count_last_10min: 0,
            candidate_action: matched.action,
        };
        let diagnosis = match self.reasoning.diagnose(&context, &[]).await {
            Ok(diagnosis) => diagnosis,
            Err(error) => {
                tracing::warn!(%instance_id, %error, "reasoning engine unavailable, skipping action");
                return;
            }
        };
        if diagnosis.confidence < matched.required_confidence {
            tracing::info!(
                %instance_id,
                action = ?matched.action,
                confidence = diagnosis.confidence,
                required = matched.required_confidence,
                "confidence below the trigger table's threshold, no action taken"
            );
            return;
        }

        let risk_tier = match matched.action {
            DiagnosisAction::MigrateToLargerGpu | DiagnosisAction::Terminate => RiskTier::Elevated,
            _ => RiskTier::Normal,
        };
        let estimated_cost_usd = match matched.action {
            DiagnosisAction::RestartWithBackoff | DiagnosisAction::MigrateToLargerGpu => {
                instance.hourly_rate_usd
            }
            _ => 0.0,
        };

        let verdict = match self
            .governor
            .check(CheckRequest {
                actor: Actor::HealingAgent,
                action: format!("{:?}", matched.action),
                estimated_cost_usd,
                risk_tier,
                region: Some(instance.region.clone()),
                goal_id: None,
            })
            .await
        {
            Ok(verdict) => verdict,
            Err(error) => {
                tracing::error!(%instance_id, %error, "governor check failed, no action taken");
                return;
            }
        };

        if !matches!(verdict, GovernorVerdict::Approve) {
            tracing::info!(%instance_id, action = ?matched.action, ?verdict, "healing action not approved");
            return;
        }

        match matched.action {
            DiagnosisAction::NoAction => {}
            DiagnosisAction::RequestPrescale | DiagnosisAction::ReduceBatchSize => {
                self.events
                    .publish(OrMindEvent::HealingActionTaken {
                        instance_id,
                        action: format!("{:?}", matched.action),
                        timestamp: Utc::now(),
                    })
                    .await;
            }
            DiagnosisAction::RestartWithBackoff => {
                let exhausted_after = {
                    let mut windows = self.windows.lock().await;
                    let window = windows.entry(instance_id).or_default();
                    let (attempt, exhausted) = window.record_restart_and_check_exhausted();
                    if let Some(backoff) = aion_scheduler::backoff::backoff_for_attempt(attempt as u32) {
                        tokio::time::sleep(backoff).await;
                    }
                    exhausted
                };
                self.restart_instance(&instance).await;
                self.events
                    .publish(OrMindEvent::HealingActionTaken {
                        instance_id,
                        action: "restart_with_backoff".to_string(),
                        timestamp: Utc::now(),
                    })
                    .await;
                if exhausted_after {
                    tracing::info!(%instance_id, "restart budget exhausted, next breach terminates");
                }
            }
            DiagnosisAction::MigrateToLargerGpu => {
                self.migrate_instance(&instance).await;
            }
            DiagnosisAction::Terminate => {
                self.terminate_instance(&instance).await;
            }
        }

        tracing::info!(
            %instance_id,
            action = ?matched.action,
            reason = %matched.reason,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "healing action time-to-action"
        );
    }

    async fn restart_instance(&self, instance: &Instance) {
        if let Err(error) = self.router.terminate(instance).await {
            tracing::warn!(instance_id = %instance.id, %error, "restart: terminate failed");
            return;
        }
        let demand = demand_for(instance);
        let filter = CandidateFilter {
            demand: &demand,
            region_allow_list: &[],
        };
        let request = InstanceRequest {
            gpu_class: instance.gpu_class.clone(),
            region: instance.region.clone(),
            demand: demand.clone(),
            provisioning_token: Uuid::new_v4(),
        };
        match self
            .router
            .provision_with_failover(&filter, &instance.region, request, DEFAULT_PRICE_BUDGET)
            .await
        {
            Ok(new_instance) => {
                let _ = self.instance_repository.create(new_instance).await;
                let _ = self
                    .instance_repository
                    .update_status(instance.id, InstanceState::Terminated)
                    .await;
            }
            Err(error) => {
                tracing::error!(instance_id = %instance.id, %error, "restart: reprovision failed");
            }
        }
    }

    async fn migrate_instance(&self, instance: &Instance) {
        let Some(larger) = instance.gpu_class.larger() else {
            tracing::warn!(instance_id = %instance.id, gpu_class = %instance.gpu_class, "no larger GPU class available, cannot migrate");
            return;
        };

        let mut demand = demand_for(instance);
        demand.gpu_class = larger.clone();
        let filter = CandidateFilter {
            demand: &demand,
            region_allow_list: &[],
        };
        let request = InstanceRequest {
            gpu_class: larger,
            region: instance.region.clone(),
            demand: demand.clone(),
            provisioning_token: Uuid::new_v4(),
        };

        match self
            .router
            .provision_with_failover(&filter, &instance.region, request, DEFAULT_PRICE_BUDGET)
            .await
        {
            Ok(new_instance) => {
                let new_id = new_instance.id;
                let _ = self.instance_repository.create(new_instance).await;
                if let Err(error) = self.router.terminate(instance).await {
                    tracing::warn!(instance_id = %instance.id, %error, "migrate: old instance terminate failed, left running");
                }
                let _ = self
                    .instance_repository
                    .update_status(instance.id, InstanceState::Terminated)
                    .await;
                self.events
                    .publish(OrMindEvent::MigrationCompleted {
                        old_instance: instance.id,
                        new_instance: new_id,
                        timestamp: Utc::now(),
                    })
                    .await;
            }
            Err(error) => {
                tracing::error!(instance_id = %instance.id, %error, "migrate: could not provision larger instance, old instance kept");
            }
        }
    }

    async fn terminate_instance(&self, instance: &Instance) {
        if let Err(error) = self.router.terminate(instance).await {
            tracing::warn!(instance_id = %instance.id, %error, "terminate_and_notify: provider terminate failed");
        }
        let _ = self
            .instance_repository
            .update_status(instance.id, InstanceState::Terminated)
            .await;
        self.events
            .publish(OrMindEvent::HealingActionTaken {
                instance_id: instance.id,
                action: "terminate_and_notify".to_string(),
                timestamp: Utc::now(),
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aion_domain::audit::AuditRecord;
    use aion_domain::policy::PolicyWeights;
    use aion_domain::price::{Availability, PriceKey, PricePoint};
    use aion_domain::sink::{AuditSink, AuditSinkError};
    use aion_domain::telemetry::TelemetrySample;
    use aion_providers::adapter::{CommandHandle, ProviderAdapter, ProviderError};
    use aion_reasoning::{Diagnosis, FailureContext, PlanConstraints, ReasoningError, RepairResult, TaskPlan};
    use aion_repository::{InMemoryInstanceRepository, InMemoryTelemetryRepository};
    use async_trait::async_trait;
    use std::collections::HashMap as StdHashMap;

    struct NullSink;
    #[async_trait]
    impl AuditSink for NullSink {
        async fn append(&self, _record: AuditRecord) -> Result<(), AuditSinkError> {
            Ok(())
        }
    }

    struct FixedAdapter {
        name: String,
    }

    #[async_trait]
    impl ProviderAdapter for FixedAdapter {
        fn name(&self) -> &str {
            &self.name
        }

        async fn price(
            &self,
            _gpu_class: &GpuClass,
            _region: &str,
            _budget: std::time::Duration,
        ) -> Result<PricePoint, ProviderError> {
            Ok(PricePoint {
                key: PriceKey {
                    provider: self.name.clone(),
                    region: "us-east-1".to_string(),
                    gpu_class: GpuClass::H100,
                    instance_type: "default".to_string(),
                },
                hourly_rate_usd: 4.0,
                availability: Availability::High,
                observed_at: Utc::now(),
                stale: false,
            })
        }

        async fn provision(
            &self,
            request: aion_providers::adapter::InstanceRequest,
        ) -> Result<Instance, ProviderError> {
            Ok(Instance {
                id: Uuid::new_v4(),
                job_id: Uuid::nil(),
                provider_instance_id: "i-new".to_string(),
                provider: self.name.clone(),
                region: request.region,
                gpu_class: request.gpu_class,
                gpu_count: 1,
                hourly_rate_usd: 4.0,
                state: InstanceState::Running,
                interruptible: false,
                created_at: Utc::now(),
            })
        }

        async fn execute(
            &self,
            _instance: &Instance,
            _command: Vec<String>,
            _env: StdHashMap<String, String>,
        ) -> Result<CommandHandle, ProviderError> {
            unimplemented!("not exercised by healing tests")
        }

        async fn metrics(&self, _instance: &Instance) -> Result<TelemetrySample, ProviderError> {
            unimplemented!("not exercised by healing tests")
        }

        async fn terminate(&self, _instance: &Instance) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    struct FixedConfidenceEngine(f64);

    #[async_trait]
    impl ReasoningEngine for FixedConfidenceEngine {
        async fn plan(
            &self,
            _goal_text: &str,
            _constraints: &PlanConstraints,
        ) -> Result<TaskPlan, ReasoningError> {
            unimplemented!()
        }

        async fn diagnose(
            &self,
            instance_context: &InstanceContext,
            _metrics_window: &[TelemetrySample],
        ) -> Result<Diagnosis, ReasoningError> {
            Ok(Diagnosis {
                action: instance_context.candidate_action,
                confidence: self.0,
                reasoning: "fixed for test".to_string(),
            })
        }

        async fn repair(
            &self,
            _task: &aion_domain::task::Task,
            _task_handle: aion_domain::task::TaskHandle,
            _failure: &FailureContext,
        ) -> Result<RepairResult, ReasoningError> {
            unimplemented!()
        }
    }

    fn sample_instance() -> Instance {
        Instance {
            id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            provider_instance_id: "i-abc".to_string(),
            provider: "fixed".to_string(),
            region: "us-east-1".to_string(),
            gpu_class: GpuClass::A100,
            gpu_count: 1,
            hourly_rate_usd: 3.0,
            state: InstanceState::Running,
            interruptible: false,
            created_at: Utc::now(),
        }
    }

    async fn agent_with_confidence(
        confidence: f64,
    ) -> (Arc<HealingAgent>, Instance, tokio::sync::broadcast::Receiver<OrMindEvent>) {
        let telemetry = Arc::new(InMemoryTelemetryRepository::new(64));
        let instance_repository = Arc::new(InMemoryInstanceRepository::new());
        let instance = sample_instance();
        instance_repository.create(instance.clone()).await.unwrap();

        let mut router = ProviderRouter::new(0.5, 2, Arc::new(NullSink));
        router.register(Arc::new(FixedAdapter { name: "fixed".to_string() }));
        let router = Arc::new(router);

        let governor = Arc::new(SafetyGovernor::new(PolicyWeights::default(), Arc::new(NullSink)));
        let reasoning = Arc::new(FixedConfidenceEngine(confidence));
        let events = Arc::new(EventBus::new());
        let rx = events.subscribe();

        let agent = Arc::new(HealingAgent::new(
            telemetry, instance_repository, router, governor, reasoning, events,
        ));
        (agent, instance, rx)
    }

    #[tokio::test]
    async fn oom_signal_migrates_to_a_larger_class_when_confidence_clears_the_bar() {
        let (agent, instance, mut rx) = agent_with_confidence(0.9).await;
        agent.report_oom(instance.id).await;

        let event = rx.recv().await.unwrap();
        let new_instance_id = match event {
            OrMindEvent::MigrationCompleted { old_instance, new_instance, .. } => {
                assert_eq!(old_instance, instance.id);
                new_instance
            }
            other => panic!("expected MigrationCompleted, got {other:?}"),
        };
        let new_instance = agent.instance_repository.fetch(new_instance_id).await.unwrap();
        assert_eq!(new_instance.gpu_class, GpuClass::H100);
        let old = agent.instance_repository.fetch(instance.id).await.unwrap();
        assert_eq!(old.state, InstanceState::Terminated);
    }

    #[tokio::test]
    async fn low_confidence_diagnosis_blocks_the_action() {
        let (agent, instance, _rx) = agent_with_confidence(0.1).await;
        agent.report_oom(instance.id).await;

        let old = agent.instance_repository.fetch(instance.id).await.unwrap();
        assert_eq!(old.state, InstanceState::Running);
    }

    #[tokio::test]
    async fn migration_with_no_larger_class_leaves_the_instance_untouched() {
        let (agent, instance, _rx) = agent_with_confidence(0.95).await;
        agent
            .instance_repository
            .update_status(instance.id, InstanceState::Running)
            .await
            .unwrap();
        let mut h100 = instance.clone();
        h100.gpu_class = GpuClass::H100;
        agent.instance_repository.create(h100.clone()).await.unwrap();

        agent.report_oom(h100.id).await;

        let unchanged = agent.instance_repository.fetch(h100.id).await.unwrap();
        assert_eq!(unchanged.state, InstanceState::Running);
    }
}
