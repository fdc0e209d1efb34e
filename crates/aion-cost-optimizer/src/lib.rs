//! Cost Optimizer (spec §4.4). Polls every registered (provider, region,
//! gpu_class) tuple on a fixed interval, smooths observations into a
//! per-key EWMA, and evaluates the Provider Router's migration trigger
//! (spec §4.2) against every live job once per tick.

pub mod window;

use aion_core::events::{EventBus, OrMindEvent};
use aion_domain::audit::{Actor, AuditOutcome, AuditRecord};
use aion_domain::job::{Job, JobStatus};
use aion_domain::price::{PriceKey, PricePoint};
use aion_domain::sink::AuditSink;
use aion_domain::task::{GpuClass, RiskTier};
use aion_governor::{CheckRequest, GovernorVerdict, SafetyGovernor};
use aion_providers::adapter::{InstanceRequest, ProviderError};
use aion_providers::router::CandidateFilter;
use aion_providers::ProviderRouter;
use aion_repository::{InstanceRepository, JobRepository, PriceRepository};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;
use window::PriceWindow;

const DEFAULT_PRICE_BUDGET: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum CostOptimizerError {
    #[error("governor rejected the decision record: {0}")]
    Governor(#[from] aion_governor::GovernorError),
    #[error("repository error: {0}")]
    Repository(#[from] aion_repository::RepositoryError),
}

/// Tunable knobs the spec fixes as constants (poll interval, ring length,
/// EWMA factor, the 0.85 migration threshold) plus the two things that
/// vary by deployment: which regions and GPU classes to poll.
#[derive(Debug, Clone)]
pub struct CostOptimizerConfig {
    pub poll_interval: Duration,
    pub price_budget: Duration,
    pub regions: Vec<String>,
    pub gpu_classes: Vec<GpuClass>,
    /// Fraction below the current price a candidate must clear before a
    /// migration is even considered (spec §4.2: 0.15, i.e. `price(p2) <
    /// price(p1) * 0.85`).
    pub migration_threshold: f64,
    /// Checkpoint-upload + provisioning + restore overhead, expressed as
    /// hours of the candidate's hourly rate — the migration cost estimate
    /// the trigger compares against realized savings. Not specified as a
    /// hard number; chosen as a conservative fixed overhead rather than
    /// measuring actual transfer time, since this module has no telemetry
    /// on checkpoint payload size.
    pub migration_overhead_hours: f64,
    /// Assumed remaining runtime for jobs with no `expected_duration_secs`
    /// estimate, so an unbounded job can't be treated as having infinite
    /// savings ahead of it.
    pub default_remaining_runtime_hours: f64,
}

impl Default for CostOptimizerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            price_budget: DEFAULT_PRICE_BUDGET,
            regions: vec!["us-east-1".to_string()],
            gpu_classes: vec![GpuClass::T4, GpuClass::A10, GpuClass::L40s, GpuClass::A100, GpuClass::H100],
            migration_threshold: 0.15,
            migration_overhead_hours: 0.05,
            default_remaining_runtime_hours: 1.0,
        }
    }
}

pub struct CostOptimizer {
    router: Arc<ProviderRouter>,
    price_repository: Arc<dyn PriceRepository>,
    job_repository: Arc<dyn JobRepository>,
    instance_repository: Arc<dyn InstanceRepository>,
    governor: Arc<SafetyGovernor>,
    audit: Arc<dyn AuditSink>,
    events: Arc<EventBus>,
    config: CostOptimizerConfig,
    windows: Mutex<HashMap<PriceKey, PriceWindow>>,
}

impl CostOptimizer {
    pub fn new(
        router: Arc<ProviderRouter>,
        price_repository: Arc<dyn PriceRepository>,
        job_repository: Arc<dyn JobRepository>,
        instance_repository: Arc<dyn InstanceRepository>,
        governor: Arc<SafetyGovernor>,
        audit: Arc<dyn AuditSink>,
        events: Arc<EventBus>,
        config: CostOptimizerConfig,
    ) -> Self {
        Self {
            router,
            price_repository,
            job_repository,
            instance_repository,
            governor,
            audit,
            events,
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Spawns the fixed-interval poll/evaluate loop. Runs until the
    /// process shuts down; each tick's failures are logged and absorbed so
    /// one bad provider or one bad migration doesn't stall the next tick.
    pub fn run(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.poll_interval);
            loop {
                ticker.tick().await;
                self.tick().await;
            }
        })
    }

    async fn tick(&self) {
        self.poll_prices().await;
        self.evaluate_migrations().await;
    }

    async fn poll_prices(&self) {
        for provider in self.router.adapter_names() {
            for region in &self.config.regions {
                for gpu_class in &self.config.gpu_classes {
                    let price = match self
                        .router
                        .price_for(&provider, gpu_class, region, self.config.price_budget)
                        .await
                    {
                        Ok(price) => price,
                        Err(error) => {
                            tracing::warn!(%provider, %region, %gpu_class, %error, "price poll failed");
                            continue;
                        }
                    };

                    if let Err(error) = self.price_repository.append(price.clone()).await {
                        tracing::warn!(%error, "failed to persist price observation");
                    }

                    let mut windows = self.windows.lock().await;
                    windows.entry(price.key.clone()).or_default().observe(price.hourly_rate_usd);

                    self.events
                        .publish(OrMindEvent::PriceObserved {
                            provider: provider.clone(),
                            region: region.clone(),
                            timestamp: Utc::now(),
                        })
                        .await;
                }
            }
        }
    }

    /// Smoothed price for a key, if at least one observation has landed.
    pub async fn smoothed_price(&self, key: &PriceKey) -> Option<f64> {
        self.windows.lock().await.get(key).and_then(|w| w.smoothed())
    }

    async fn evaluate_migrations(&self) {
        let jobs = match self.job_repository.list_live().await {
            Ok(jobs) => jobs,
            Err(error) => {
                tracing::error!(%error, "could not list live jobs for migration evaluation");
                return;
            }
        };

        for job in jobs {
            if job.status != JobStatus::Running {
                continue;
            }
            self.evaluate_job(&job).await;
        }
    }

    async fn evaluate_job(&self, job: &Job) {
        let Some(instance_id) = job.instance_id else {
            return;
        };
        let instance = match self.instance_repository.fetch(instance_id).await {
            Ok(instance) => instance,
            Err(error) => {
                tracing::warn!(%instance_id, %error, "migration evaluation: instance not found");
                return;
            }
        };

        let current_rate = self
            .smoothed_price(&PriceKey {
                provider: instance.provider.clone(),
                region: instance.region.clone(),
                gpu_class: instance.gpu_class.clone(),
                instance_type: "default".to_string(),
            })
            .await
            .unwrap_or(instance.hourly_rate_usd);

        let demand = demand_for(&instance);
        let filter = CandidateFilter {
            demand: &demand,
            region_allow_list: &[],
        };

        let (candidate_provider, candidate_price) = match self
            .router
            .best_price(&filter, &instance.region, self.config.price_budget)
            .await
        {
            Ok(result) => result,
            Err(error) => {
                tracing::trace!(%instance_id, %error, "no migration candidate available this tick");
                return;
            }
        };

        if candidate_provider == instance.provider {
            return;
        }

        let remaining_runtime_hours = job
            .expected_duration_secs
            .zip(job.started_at)
            .map(|(expected, started)| {
                let elapsed = (Utc::now() - started).num_seconds().max(0) as u64;
                let remaining = expected.saturating_sub(elapsed);
                remaining as f64 / 3600.0
            })
            .unwrap_or(self.config.default_remaining_runtime_hours);

        let migration_cost_usd =
            self.config.migration_overhead_hours * candidate_price.hourly_rate_usd.max(current_rate);

        if !ProviderRouter::migration_worthwhile(
            current_rate,
            candidate_price.hourly_rate_usd,
            self.config.migration_threshold,
            migration_cost_usd,
            remaining_runtime_hours,
        ) {
            return;
        }

        self.migrate_job(job, &instance, &candidate_provider, &candidate_price, migration_cost_usd)
            .await;
    }

    async fn migrate_job(
        &self,
        job: &Job,
        instance: &aion_domain::instance::Instance,
        target_provider: &str,
        target_price: &PricePoint,
        estimated_cost_usd: f64,
    ) {
        let started = std::time::Instant::now();

        let verdict = match self
            .governor
            .check(CheckRequest {
                actor: Actor::CostOptimizer,
                action: "migrate_job".to_string(),
                estimated_cost_usd,
                risk_tier: RiskTier::Elevated,
                region: Some(instance.region.clone()),
                goal_id: Some(job.goal_id),
            })
            .await
        {
            Ok(verdict) => verdict,
            Err(error) => {
                tracing::error!(job_id = %job.id, %error, "governor check failed, migration skipped");
                return;
            }
        };
        if !matches!(verdict, GovernorVerdict::Approve) {
            tracing::info!(job_id = %job.id, ?verdict, "migration not approved");
            return;
        }

        self.events
            .publish(OrMindEvent::MigrationStarted {
                old_instance: instance.id,
                target_provider: target_provider.to_string(),
                timestamp: Utc::now(),
            })
            .await;

        if let Err(error) = self.router.checkpoint(instance).await {
            self.abort_migration(job, instance, &format!("checkpoint ineligible or failed: {error}"))
                .await;
            return;
        }

        let request = InstanceRequest {
            gpu_class: instance.gpu_class.clone(),
            region: instance.region.clone(),
            demand: demand_for(instance),
            provisioning_token: Uuid::new_v4(),
        };
        let new_instance = match self.router.provision_on(target_provider, request).await {
            Ok(new_instance) => new_instance,
            Err(error) => {
                self.abort_migration(job, instance, &format!("provisioning on {target_provider} failed: {error}"))
                    .await;
                return;
            }
        };

        // Restore: no state-transfer payload is modeled at this layer (no
        // persistent storage driver in scope); the checkpoint handshake in
        // step 1 is the full extent of what this module verifies.

        if let Err(error) = self.router.terminate(instance).await {
            tracing::warn!(instance_id = %instance.id, %error, "migrate: old instance terminate failed, left running alongside the new one");
        }
        let _ = self
            .instance_repository
            .update_status(instance.id, aion_domain::instance::InstanceState::Terminated)
            .await;
        let _ = self.instance_repository.create(new_instance.clone()).await;

        let mut updated_job = job.clone();
        updated_job.provider = target_provider.to_string();
        updated_job.instance_id = Some(new_instance.id);
        updated_job.hourly_rate_usd = target_price.hourly_rate_usd;
        let _ = self.job_repository.create(updated_job).await;

        let price_delta_usd = instance.hourly_rate_usd - target_price.hourly_rate_usd;

        let record = AuditRecord {
            id: Uuid::new_v4(),
            index: 0,
            actor: Actor::CostOptimizer,
            action: "migrate_job".to_string(),
            reasoning: format!(
                "{} -> {} undercuts by {:.2}/hr, migration cost {:.2} clears the threshold",
                instance.provider, target_provider, price_delta_usd, estimated_cost_usd
            ),
            input_payload: serde_json::json!({
                "old_instance": instance.id,
                "new_instance": new_instance.id,
                "price_delta_usd": price_delta_usd,
                "migration_cost_usd": estimated_cost_usd,
            }),
            outcome: AuditOutcome::Succeeded,
            cost_impact_usd: estimated_cost_usd,
            duration_ms: started.elapsed().as_millis() as u64,
            safety_approved: true,
            goal_id: Some(job.goal_id),
            timestamp: Utc::now(),
        };
        if let Err(error) = self.audit.append(record).await {
            tracing::error!(%error, "failed to append migration audit record");
        }

        self.events
            .publish(OrMindEvent::MigrationCompleted {
                old_instance: instance.id,
                new_instance: new_instance.id,
                timestamp: Utc::now(),
            })
            .await;
    }

    /// Any step failure aborts with the old instance kept running (spec
    /// §4.4: "No migration ever leaves a task with zero live instances
    /// unless the source instance was already gone").
    async fn abort_migration(&self, job: &Job, instance: &aion_domain::instance::Instance, reason: &str) {
        tracing::warn!(job_id = %job.id, instance_id = %instance.id, reason, "migration aborted, old instance kept");

        let record = AuditRecord {
            id: Uuid::new_v4(),
            index: 0,
            actor: Actor::CostOptimizer,
            action: "migration_failed".to_string(),
            reasoning: reason.to_string(),
            input_payload: serde_json::json!({ "old_instance": instance.id }),
            outcome: AuditOutcome::Failed { reason: reason.to_string() },
            cost_impact_usd: 0.0,
            duration_ms: 0,
            safety_approved: true,
            goal_id: Some(job.goal_id),
            timestamp: Utc::now(),
        };
        if let Err(error) = self.audit.append(record).await {
            tracing::error!(%error, "failed to append migration_failed audit record");
        }

        self.events
            .publish(OrMindEvent::MigrationFailed {
                old_instance: instance.id,
                reason: reason.to_string(),
                timestamp: Utc::now(),
            })
            .await;
    }
}

/// Reconstructs a [`aion_domain::task::ResourceDemand`] from a running
/// instance, for the provision calls the migration sequence issues itself
/// — this module only ever sees the instance, not the task that requested
/// it, the same constraint the Healing Agent works under.
fn demand_for(instance: &aion_domain::instance::Instance) -> aion_domain::task::ResourceDemand {
    aion_domain::task::ResourceDemand {
        gpu_class: instance.gpu_class.clone(),
        gpu_count: instance.gpu_count,
        vram_gib: 0,
        max_duration_secs: u64::MAX,
        max_cost_usd: f64::MAX,
        interruptible_ok: instance.interruptible,
        p_interrupt_per_hour: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aion_domain::instance::{Instance, InstanceState};
    use aion_domain::policy::PolicyWeights;
    use aion_domain::price::Availability;
    use aion_domain::sink::AuditSinkError;
    use aion_domain::task::TaskHandle;
    use aion_providers::adapter::{CommandHandle, ProviderAdapter};
    use aion_repository::{InMemoryInstanceRepository, InMemoryJobRepository, InMemoryPriceRepository};
    use async_trait::async_trait;
    use std::collections::HashMap as StdHashMap;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::broadcast;

    struct RecordingSink(StdMutex<Vec<AuditRecord>>);
    impl RecordingSink {
        fn new() -> Self {
            Self(StdMutex::new(Vec::new()))
        }
    }
    #[async_trait]
    impl AuditSink for RecordingSink {
        async fn append(&self, record: AuditRecord) -> Result<(), AuditSinkError> {
            self.0.lock().unwrap().push(record);
            Ok(())
        }
    }

    struct CheapAdapter {
        name: String,
        rate: f64,
    }

    #[async_trait]
    impl ProviderAdapter for CheapAdapter {
        fn name(&self) -> &str {
            &self.name
        }

        async fn price(
            &self,
            gpu_class: &GpuClass,
            region: &str,
            _budget: Duration,
        ) -> Result<PricePoint, ProviderError> {
            Ok(PricePoint {
                key: PriceKey {
                    provider: self.name.clone(),
                    region: region.to_string(),
                    gpu_class: gpu_class.clone(),
                    instance_type: "default".to_string(),
                },
                hourly_rate_usd: self.rate,
                availability: Availability::High,
                observed_at: Utc::now(),
                stale: false,
            })
        }

        async fn provision(&self, request: InstanceRequest) -> Result<Instance, ProviderError> {
            Ok(Instance {
                id: Uuid::new_v4(),
                job_id: Uuid::nil(),
                provider_instance_id: "i-new".to_string(),
                provider: self.name.clone(),
                region: request.region,
                gpu_class: request.gpu_class,
                gpu_count: 1,
                hourly_rate_usd: self.rate,
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
            unimplemented!("not exercised by cost optimizer tests")
        }

        async fn metrics(&self, _instance: &Instance) -> Result<aion_domain::telemetry::TelemetrySample, ProviderError> {
            unimplemented!("not exercised by cost optimizer tests")
        }

        async fn terminate(&self, _instance: &Instance) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn checkpoint(&self, _instance: &Instance) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    fn optimizer_harness(
        expensive_rate: f64,
        cheap_rate: f64,
    ) -> (Arc<CostOptimizer>, Job, Instance, broadcast::Receiver<OrMindEvent>) {
        let audit = Arc::new(RecordingSink::new());
        let mut router = ProviderRouter::new(0.5, 2, audit.clone());
        router.register(Arc::new(CheapAdapter { name: "pricey".to_string(), rate: expensive_rate }));
        router.register(Arc::new(CheapAdapter { name: "bargain".to_string(), rate: cheap_rate }));
        let router = Arc::new(router);

        let price_repository = Arc::new(InMemoryPriceRepository::new());
        let job_repository = Arc::new(InMemoryJobRepository::new());
        let instance_repository = Arc::new(InMemoryInstanceRepository::new());
        let governor = Arc::new(SafetyGovernor::new(PolicyWeights::default(), audit.clone()));
        let events = Arc::new(EventBus::new());
        let rx = events.subscribe();

        let instance = Instance {
            id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            provider_instance_id: "i-old".to_string(),
            provider: "pricey".to_string(),
            region: "us-east-1".to_string(),
            gpu_class: GpuClass::A100,
            gpu_count: 1,
            hourly_rate_usd: expensive_rate,
            state: InstanceState::Running,
            interruptible: false,
            created_at: Utc::now(),
        };

        let mut job = Job::new(Uuid::new_v4(), TaskHandle(0), "pricey".to_string(), expensive_rate);
        job.instance_id = Some(instance.id);
        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
        job.expected_duration_secs = Some(3600 * 10);

        let config = CostOptimizerConfig {
            regions: vec!["us-east-1".to_string()],
            gpu_classes: vec![GpuClass::A100],
            ..CostOptimizerConfig::default()
        };

        let optimizer = Arc::new(CostOptimizer::new(
            router, price_repository, job_repository, instance_repository, governor, audit, events, config,
        ));
        (optimizer, job, instance, rx)
    }

    #[tokio::test]
    async fn a_cheaper_provider_past_the_threshold_triggers_migration() {
        let (optimizer, job, instance, mut rx) = optimizer_harness(1.0, 0.5);
        optimizer.job_repository.create(job.clone()).await.unwrap();
        optimizer.instance_repository.create(instance.clone()).await.unwrap();

        optimizer.tick().await;

        let mut saw_started = false;
        let mut saw_completed = false;
        while !saw_completed {
            match rx.recv().await.unwrap() {
                OrMindEvent::MigrationStarted { .. } => saw_started = true,
                OrMindEvent::MigrationCompleted { old_instance, .. } => {
                    assert_eq!(old_instance, instance.id);
                    saw_completed = true;
                }
                OrMindEvent::PriceObserved { .. } => {}
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert!(saw_started);
        let old = optimizer.instance_repository.fetch(instance.id).await.unwrap();
        assert_eq!(old.state, InstanceState::Terminated);
    }

    #[tokio::test]
    async fn a_marginally_cheaper_provider_does_not_trigger_migration() {
        let (optimizer, job, instance, _rx) = optimizer_harness(1.0, 0.95);
        optimizer.job_repository.create(job.clone()).await.unwrap();
        optimizer.instance_repository.create(instance.clone()).await.unwrap();

        optimizer.tick().await;

        let old = optimizer.instance_repository.fetch(instance.id).await.unwrap();
        assert_eq!(old.state, InstanceState::Running);
    }

    #[tokio::test]
    async fn price_window_accumulates_across_ticks() {
        let (optimizer, _job, _instance, _rx) = optimizer_harness(1.0, 0.5);
        optimizer.poll_prices().await;
        optimizer.poll_prices().await;

        let key = PriceKey {
            provider: "pricey".to_string(),
            region: "us-east-1".to_string(),
            gpu_class: GpuClass::A100,
            instance_type: "default".to_string(),
        };
        assert!(optimizer.smoothed_price(&key).await.is_some());
    }
}
