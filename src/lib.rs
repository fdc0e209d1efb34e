//! `ormind-core`: the five-agent coordination fabric (spec §2) as a
//! library. Re-exports each activity's public surface and provides
//! [`OrMind::bootstrap`], which wires them together the same way
//! `aion-server`'s binary does, for embedding in a host process that
//! wants the control plane without a standalone service.

pub use aion_audit::AuditAgent;
pub use aion_cost_optimizer::{CostOptimizer, CostOptimizerConfig};
pub use aion_governor::SafetyGovernor;
pub use aion_healing::HealingAgent;
pub use aion_orchestrator::{Orchestrator, OrchestratorConfig};
pub use aion_providers::ProviderRouter;
pub use aion_scheduler::Scheduler;

pub use aion_config::PlatformConfig;
pub use aion_core::events::EventBus;
pub use aion_domain as domain;
pub use aion_reasoning::ReasoningEngine;
pub use aion_repository as repository;

use aion_audit::batching::spawn_seal_timer;
use aion_core::secrets::{EnvSecretProvider, SecretProvider};
use aion_domain::policy::PolicyWeights;
use aion_domain::sink::AuditSink;
use aion_providers::ProviderAdapter;
use aion_repository::{
    GoalRepository, InMemoryAuditBatchRepository, InMemoryGoalRepository,
    InMemoryInstanceRepository, InMemoryJobRepository, InMemoryPriceRepository,
    InMemoryTelemetryRepository,
};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("config error: {0}")]
    Config(#[from] aion_config::ConfigError),
    #[error("secret error: {0}")]
    Secret(#[from] aion_core::secrets::SecretError),
}

/// A running instance of the five-agent fabric over in-memory
/// repositories. Background loops (dispatch pump, audit seal timer, cost
/// optimizer tick) are already spawned by the time `bootstrap` returns;
/// dropping the returned handles does not stop them — call
/// [`OrMind::shutdown`] to cancel in-flight goals before the process ends.
pub struct OrMind {
    pub orchestrator: Arc<Orchestrator>,
    pub scheduler: Arc<Scheduler>,
    pub router: Arc<ProviderRouter>,
    pub governor: Arc<SafetyGovernor>,
    pub audit: Arc<AuditAgent>,
    pub healing: Arc<HealingAgent>,
    pub cost_optimizer: Arc<CostOptimizer>,
    pub goal_repository: Arc<dyn GoalRepository>,
    pub events: Arc<EventBus>,
}

impl OrMind {
    /// Wires every activity from a config snapshot and a set of already
    /// registered provider adapters (construction-time registration, spec
    /// §4.1 — this crate does not choose adapters on the caller's behalf).
    /// Spawns the dispatch pump, audit seal timer, and cost optimizer
    /// loop; the Healing Agent watches new instances as jobs start.
    pub async fn bootstrap(
        config: PlatformConfig,
        adapters: Vec<Arc<dyn ProviderAdapter>>,
        reasoning: Arc<dyn ReasoningEngine>,
    ) -> Result<Self, BootstrapError> {
        let secrets = EnvSecretProvider;
        let hmac_secret = secrets.get_secret(&config.audit.hmac_secret_env).await?;

        let goal_repository: Arc<dyn GoalRepository> = Arc::new(InMemoryGoalRepository::new());
        let job_repository = Arc::new(InMemoryJobRepository::new());
        let instance_repository = Arc::new(InMemoryInstanceRepository::new());
        let price_repository = Arc::new(InMemoryPriceRepository::new());
        let telemetry_repository = Arc::new(InMemoryTelemetryRepository::default());
        let audit_batch_repository = Arc::new(InMemoryAuditBatchRepository::new());

        let audit = Arc::new(AuditAgent::new(
            hmac_secret.into_bytes(),
            config.audit.batch_size,
            audit_batch_repository,
        ));

        let mut router = ProviderRouter::new(
            config.cost.reliability_weight,
            2,
            audit.clone() as Arc<dyn AuditSink>,
        );
        for adapter in adapters {
            router.register(adapter);
        }
        let router = Arc::new(router);

        spawn_seal_timer(audit.clone(), Duration::from_secs(config.audit.seal_interval_seconds));

        let policy_weights = PolicyWeights {
            per_action_cap_usd: config.governor.per_action_cap_usd,
            per_day_cap_usd: config.governor.daily_cap_usd,
            ..PolicyWeights::default()
        };
        let governor = Arc::new(SafetyGovernor::new(
            policy_weights,
            audit.clone() as Arc<dyn AuditSink>,
        ));

        let events = Arc::new(EventBus::new());

        let scheduler = Arc::new(Scheduler::new(
            router.clone(),
            governor.clone(),
            job_repository.clone(),
            instance_repository.clone(),
            events.clone(),
        ));

        let orchestrator = Arc::new(Orchestrator::new(
            reasoning.clone(),
            scheduler.clone(),
            router.clone(),
            governor.clone(),
            goal_repository.clone(),
            job_repository.clone(),
            instance_repository.clone(),
            events.clone(),
            OrchestratorConfig::default(),
        ));
        orchestrator.run_dispatch_pump();

        let healing = Arc::new(HealingAgent::new(
            telemetry_repository,
            instance_repository.clone(),
            router.clone(),
            governor.clone(),
            reasoning,
            events.clone(),
        ));
        tokio::spawn({
            let healing = healing.clone();
            let mut events_rx = events.subscribe();
            async move {
                while let Ok(event) = events_rx.recv().await {
                    if let aion_core::events::OrMindEvent::JobStarted { instance_id, .. } = event {
                        healing.watch(instance_id);
                    }
                }
            }
        });

        let cost_optimizer = Arc::new(CostOptimizer::new(
            router.clone(),
            price_repository,
            job_repository,
            instance_repository,
            governor.clone(),
            audit.clone() as Arc<dyn AuditSink>,
            events.clone(),
            CostOptimizerConfig {
                poll_interval: Duration::from_secs(config.cost.poll_interval_seconds),
                migration_threshold: config.cost.migration_threshold,
                ..CostOptimizerConfig::default()
            },
        ));
        cost_optimizer.clone().run();

        Ok(Self {
            orchestrator,
            scheduler,
            router,
            governor,
            audit,
            healing,
            cost_optimizer,
            goal_repository,
            events,
        })
    }

    /// Cancels every goal that is still non-terminal (spec §5's global
    /// shutdown path). Waits for each cancellation to finish, including
    /// any running job's checkpoint-and-stop grace period.
    pub async fn shutdown(&self) -> Result<(), aion_repository::RepositoryError> {
        let active = self.goal_repository.list_active().await?;
        for goal in active {
            let handle = self.orchestrator.cancel_goal(goal.id);
            if let Err(error) = handle.await {
                tracing::warn!(%error, "goal cancellation task panicked during shutdown");
            }
        }
        Ok(())
    }
}
