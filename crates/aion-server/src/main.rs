//! OrMind service binary. Loads the platform config snapshot, wires the
//! five core activities to shared repositories and a provider router, and
//! runs until a shutdown signal arrives. No HTTP surface lives here — the
//! control plane's external interface (spec §6) is out of scope for this
//! binary.

mod health_checks;

use aion_audit::batching::spawn_seal_timer;
use aion_audit::AuditAgent;
use aion_core::events::{EventBus, OrMindEvent};
use aion_core::health::HealthRegistry;
use aion_core::logging::{init_logging, LogFormat, LoggingConfig};
use aion_core::secrets::{EnvSecretProvider, SecretProvider};
use aion_cost_optimizer::{CostOptimizer, CostOptimizerConfig};
use aion_domain::policy::PolicyWeights;
use aion_domain::sink::AuditSink;
use aion_governor::SafetyGovernor;
use aion_healing::HealingAgent;
use aion_orchestrator::{Orchestrator, OrchestratorConfig};
use aion_providers::generic::GenericRestAdapter;
use aion_providers::{aws::AwsAdapter, ProviderRouter};
use aion_reasoning::{llm::LlmReasoningEngine, rule_based::RuleBasedReasoningEngine, ReasoningEngine};
use aion_repository::{
    GoalRepository, InMemoryGoalRepository, InMemoryInstanceRepository, InMemoryJobRepository,
    InMemoryPriceRepository, InMemoryTelemetryRepository,
};
use aion_repository::InMemoryAuditBatchRepository;
use aion_scheduler::Scheduler;
use std::sync::Arc;
use std::time::Duration;

fn log_format_from_str(raw: &str) -> LogFormat {
    match raw.to_ascii_lowercase().as_str() {
        "json" => LogFormat::Json,
        "compact" => LogFormat::Compact,
        _ => LogFormat::Pretty,
    }
}

/// Adapters shipped with the core are illustrative GPU cloud providers,
/// registered by name at startup rather than dynamically loaded (spec
/// §4.1). A generic REST marketplace adapter is added only when its
/// endpoint is configured, since it has no sensible default.
fn build_router(reliability_weight: f64, audit: Arc<dyn AuditSink>) -> ProviderRouter {
    let mut router = ProviderRouter::new(reliability_weight, 2, audit);
    let aws_region = std::env::var("ORMIND_AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string());
    router.register(Arc::new(AwsAdapter::new(aws_region)));

    if let (Ok(name), Ok(base_url), Ok(api_key)) = (
        std::env::var("ORMIND_GENERIC_PROVIDER_NAME"),
        std::env::var("ORMIND_GENERIC_PROVIDER_BASE_URL"),
        std::env::var("ORMIND_GENERIC_PROVIDER_API_KEY"),
    ) {
        router.register(Arc::new(GenericRestAdapter::new(name, base_url, api_key)));
    }
    router
}

async fn build_reasoning_engine() -> anyhow::Result<Arc<dyn ReasoningEngine>> {
    if let (Ok(base_url), Ok(api_key)) = (
        std::env::var("ORMIND_LLM_BASE_URL"),
        std::env::var("ORMIND_LLM_API_KEY"),
    ) {
        let model = std::env::var("ORMIND_LLM_MODEL").unwrap_or_else(|_| "gpt-4".to_string());
        return Ok(Arc::new(LlmReasoningEngine::new(base_url, api_key, model)?));
    }
    Ok(Arc::new(RuleBasedReasoningEngine::new()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = aion_config::PlatformConfig::load()?;

    init_logging(&LoggingConfig {
        level: config.logging.level.clone(),
        format: log_format_from_str(&config.logging.format),
        ..LoggingConfig::default()
    })?;

    tracing::info!("starting OrMind control plane");

    let secrets = EnvSecretProvider;
    let hmac_secret = secrets.get_secret(&config.audit.hmac_secret_env).await?;

    let goal_repository = Arc::new(InMemoryGoalRepository::new());
    let job_repository = Arc::new(InMemoryJobRepository::new());
    let instance_repository = Arc::new(InMemoryInstanceRepository::new());
    let price_repository = Arc::new(InMemoryPriceRepository::new());
    let telemetry_repository = Arc::new(InMemoryTelemetryRepository::default());
    let audit_batch_repository = Arc::new(InMemoryAuditBatchRepository::new());

    let audit_agent = Arc::new(AuditAgent::new(
        hmac_secret.into_bytes(),
        config.audit.batch_size,
        audit_batch_repository,
    ));
    let router = Arc::new(build_router(
        config.cost.reliability_weight,
        audit_agent.clone() as Arc<dyn AuditSink>,
    ));
    let _audit_seal_timer = spawn_seal_timer(
        audit_agent.clone(),
        Duration::from_secs(config.audit.seal_interval_seconds),
    );

    let policy_weights = PolicyWeights {
        per_action_cap_usd: config.governor.per_action_cap_usd,
        per_day_cap_usd: config.governor.daily_cap_usd,
        ..PolicyWeights::default()
    };
    let governor = Arc::new(SafetyGovernor::new(
        policy_weights,
        audit_agent.clone() as Arc<dyn AuditSink>,
    ));

    let events = Arc::new(EventBus::new());
    let reasoning = build_reasoning_engine().await?;

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
    let _dispatch_pump = orchestrator.run_dispatch_pump();

    let healing_agent = Arc::new(HealingAgent::new(
        telemetry_repository.clone(),
        instance_repository.clone(),
        router.clone(),
        governor.clone(),
        reasoning.clone(),
        events.clone(),
    ));
    // Every job start provisions a fresh instance; the Healing Agent needs
    // its own watch loop per instance (spec §5), so it subscribes here
    // rather than the Scheduler having to know about it directly.
    let _healing_watch_spawner = tokio::spawn({
        let healing_agent = healing_agent.clone();
        let mut events_rx = events.subscribe();
        async move {
            while let Ok(event) = events_rx.recv().await {
                if let OrMindEvent::JobStarted { instance_id, .. } = event {
                    healing_agent.watch(instance_id);
                }
            }
        }
    });

    let cost_optimizer = Arc::new(CostOptimizer::new(
        router.clone(),
        price_repository.clone(),
        job_repository.clone(),
        instance_repository.clone(),
        governor.clone(),
        audit_agent.clone() as Arc<dyn AuditSink>,
        events.clone(),
        CostOptimizerConfig {
            poll_interval: Duration::from_secs(config.cost.poll_interval_seconds),
            migration_threshold: config.cost.migration_threshold,
            ..CostOptimizerConfig::default()
        },
    ));
    let _cost_optimizer_loop = cost_optimizer.run();

    let health = Arc::new(HealthRegistry::new());
    health_checks::register_all(&health).await;
    let _health_logger = tokio::spawn({
        let health = health.clone();
        async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(30));
            loop {
                ticker.tick().await;
                if !health.is_ready().await {
                    tracing::warn!("one or more activities reported unhealthy");
                }
            }
        }
    });

    tracing::info!("all activities started, awaiting shutdown signal");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, cancelling in-flight goals");

    let active_goals = goal_repository.list_active().await?;
    let cancellations: Vec<_> = active_goals
        .iter()
        .map(|goal| orchestrator.cancel_goal(goal.id))
        .collect();
    for handle in cancellations {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => tracing::warn!(%error, "goal cancellation failed"),
            Err(error) => tracing::warn!(%error, "goal cancellation task panicked during shutdown"),
        }
    }

    tracing::info!("shutdown complete");
    Ok(())
}
