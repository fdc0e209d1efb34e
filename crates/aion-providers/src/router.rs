//! Provider Router (spec §4.2): registered adapters plus per-provider
//! statistics, bandit scoring, failover and the migration trigger.

use crate::adapter::{InstanceRequest, ProviderAdapter, ProviderError};
use aion_domain::audit::{Actor, AuditOutcome, AuditRecord};
use aion_domain::instance::Instance;
use aion_domain::price::{Availability, PricePoint};
use aion_domain::sink::AuditSink;
use aion_domain::task::{GpuClass, ResourceDemand};
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

const LATENCY_WINDOW: usize = 50;

#[derive(Debug, Clone, Default)]
pub struct ProviderStats {
    pub total_requests: u64,
    pub failures: u64,
    latencies_ms: VecDeque<f64>,
}

impl ProviderStats {
    fn record_attempt(&mut self, latency: Duration, failed: bool) {
        self.total_requests += 1;
        if failed {
            self.failures += 1;
        }
        if self.latencies_ms.len() == LATENCY_WINDOW {
            self.latencies_ms.pop_front();
        }
        self.latencies_ms.push_back(latency.as_secs_f64() * 1000.0);
    }

    /// EWMA over the last `LATENCY_WINDOW` provisioning latencies, ms.
    pub fn provisioning_latency_ms(&self) -> f64 {
        if self.latencies_ms.is_empty() {
            return 0.0;
        }
        let alpha = 2.0 / (self.latencies_ms.len() as f64 + 1.0);
        let mut ewma = self.latencies_ms[0];
        for &sample in self.latencies_ms.iter().skip(1) {
            ewma = alpha * sample + (1.0 - alpha) * ewma;
        }
        ewma
    }

    pub fn failure_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.failures as f64 / self.total_requests as f64
        }
    }
}

struct RegisteredAdapter {
    adapter: Arc<dyn ProviderAdapter>,
    stats: RwLock<ProviderStats>,
}

/// Resource and region constraints a candidate provider must satisfy
/// before it is scored (spec §4.2 step 1).
pub struct CandidateFilter<'a> {
    pub demand: &'a ResourceDemand,
    pub region_allow_list: &'a [String],
}

pub struct ProviderRouter {
    adapters: Vec<RegisteredAdapter>,
    reliability_weight: f64,
    failover_fanout: usize,
    audit: Arc<dyn AuditSink>,
}

impl ProviderRouter {
    pub fn new(reliability_weight: f64, failover_fanout: usize, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            adapters: Vec::new(),
            reliability_weight,
            failover_fanout,
            audit,
        }
    }

    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.push(RegisteredAdapter {
            adapter,
            stats: RwLock::new(ProviderStats::default()),
        });
    }

    async fn score(&self, stats: &ProviderStats, price: &PricePoint) -> f64 {
        let lambda = stats.failure_rate() * self.reliability_weight;
        price.hourly_rate_usd * (1.0 + lambda)
            + stats.provisioning_latency_ms() / 1000.0 * price.hourly_rate_usd / 3600.0
    }

    /// Selects the minimum-score adapter among those able to satisfy
    /// `filter`, querying `price` on each with the given budget. Ties break
    /// by lower failure rate, then by registration order.
    pub async fn select(
        &self,
        filter: &CandidateFilter<'_>,
        region: &str,
        price_budget: Duration,
    ) -> Result<(usize, PricePoint), ProviderError> {
        self.select_excluding(filter, region, price_budget, &[]).await
    }

    /// Provisions with failover: on `Transient`/`Unavailable`, the failing
    /// adapter is dropped from the candidate set and selection is retried,
    /// up to `failover_fanout` attempts. `Permanent` surfaces immediately.
    pub async fn provision_with_failover(
        &self,
        filter: &CandidateFilter<'_>,
        region: &str,
        mut request: InstanceRequest,
        price_budget: Duration,
    ) -> Result<Instance, ProviderError> {
        let mut excluded = Vec::new();

        for _attempt in 0..self.failover_fanout {
            let candidates: Vec<usize> = (0..self.adapters.len())
                .filter(|i| !excluded.contains(i))
                .collect();
            if candidates.is_empty() {
                break;
            }

            let (index, _price) = match self.select_excluding(filter, region, price_budget, &excluded).await {
                Ok(v) => v,
                Err(e) => return Err(e),
            };

            let registered = &self.adapters[index];
            let start = std::time::Instant::now();

            match registered.adapter.provision(request.clone()).await {
                Ok(instance) => {
                    registered
                        .stats
                        .write()
                        .await
                        .record_attempt(start.elapsed(), false);
                    return Ok(instance);
                }
                Err(ProviderError::Transient(msg)) | Err(ProviderError::Unavailable(msg)) => {
                    registered
                        .stats
                        .write()
                        .await
                        .record_attempt(start.elapsed(), true);
                    tracing::warn!(provider = registered.adapter.name(), error = %msg, "provisioning failed, failing over");
                    self.record_provision_failure(registered.adapter.name(), &msg, start.elapsed()).await;
                    excluded.push(index);
                }
                Err(e @ ProviderError::Permanent(_)) => {
                    registered
                        .stats
                        .write()
                        .await
                        .record_attempt(start.elapsed(), true);
                    return Err(e);
                }
                Err(e) => {
                    registered
                        .stats
                        .write()
                        .await
                        .record_attempt(start.elapsed(), true);
                    return Err(e);
                }
            }
        }

        Err(ProviderError::Unavailable(
            "exhausted failover fanout without a successful provision".to_string(),
        ))
    }

    /// Audits a single failed provisioning attempt during failover (spec
    /// §8, S2) — `Actor::ProviderRouter`'s only audit record, distinct from
    /// the Governor's approve/deny records for the same task.
    async fn record_provision_failure(&self, provider: &str, reason: &str, elapsed: Duration) {
        let record = AuditRecord {
            id: Uuid::new_v4(),
            index: 0,
            actor: Actor::ProviderRouter,
            action: "provision_failed".to_string(),
            reasoning: format!("provider {provider} unavailable during failover"),
            input_payload: serde_json::json!({ "provider": provider }),
            outcome: AuditOutcome::Failed { reason: reason.to_string() },
            cost_impact_usd: 0.0,
            duration_ms: elapsed.as_millis() as u64,
            safety_approved: false,
            goal_id: None,
            timestamp: Utc::now(),
        };
        if let Err(error) = self.audit.append(record).await {
            tracing::warn!(%error, "failed to append provision_failed audit record");
        }
    }

    async fn select_excluding(
        &self,
        filter: &CandidateFilter<'_>,
        region: &str,
        price_budget: Duration,
        excluded: &[usize],
    ) -> Result<(usize, PricePoint), ProviderError> {
        let mut scored = Vec::new();
        for (index, registered) in self.adapters.iter().enumerate() {
            if excluded.contains(&index) {
                continue;
            }
            if !filter.region_allow_list.is_empty()
                && !filter.region_allow_list.iter().any(|r| r == region)
            {
                continue;
            }
            let price = match registered
                .adapter
                .price(&filter.demand.gpu_class, region, price_budget)
                .await
            {
                Ok(p) if p.availability != Availability::None => p,
                _ => continue,
            };
            let stats = registered.stats.read().await;
            let score = self.score(&stats, &price).await;
            scored.push((index, score, stats.failure_rate(), price));
        }

        if scored.is_empty() {
            return Err(ProviderError::Unavailable(
                "no adapter can satisfy the requested demand".to_string(),
            ));
        }

        scored.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal))
                .then(a.0.cmp(&b.0))
        });
        let (index, _score, _failure_rate, price) = scored.into_iter().next().unwrap();
        Ok((index, price))
    }

    /// Names of every registered adapter, in registration order — what the
    /// Cost Optimizer's poller iterates on its fixed 60 s tick.
    pub fn adapter_names(&self) -> Vec<String> {
        self.adapters.iter().map(|r| r.adapter.name().to_string()).collect()
    }

    /// Direct price quote from one named provider, bypassing selection
    /// scoring entirely (spec §4.4: "polls every registered (provider,
    /// region, gpu_class) tuple").
    pub async fn price_for(
        &self,
        provider_name: &str,
        gpu_class: &GpuClass,
        region: &str,
        price_budget: Duration,
    ) -> Result<PricePoint, ProviderError> {
        let registered = self
            .adapters
            .iter()
            .find(|r| r.adapter.name() == provider_name)
            .ok_or_else(|| {
                ProviderError::UnknownState(format!("no registered adapter named {provider_name}"))
            })?;
        registered.adapter.price(gpu_class, region, price_budget).await
    }

    /// Best-scoring adapter's name and price quote for `filter`/`region`,
    /// without provisioning anything — what the Cost Optimizer polls on its
    /// own 60 s tick (spec §4.4) and what it compares other providers
    /// against for the migration trigger (spec §4.2).
    pub async fn best_price(
        &self,
        filter: &CandidateFilter<'_>,
        region: &str,
        price_budget: Duration,
    ) -> Result<(String, PricePoint), ProviderError> {
        let (index, price) = self.select_excluding(filter, region, price_budget, &[]).await?;
        Ok((self.adapters[index].adapter.name().to_string(), price))
    }

    /// Terminates an instance through whichever registered adapter owns
    /// it. Idempotent, per `ProviderAdapter::terminate`'s own contract.
    pub async fn terminate(&self, instance: &Instance) -> Result<(), ProviderError> {
        let registered = self
            .adapters
            .iter()
            .find(|r| r.adapter.name() == instance.provider)
            .ok_or_else(|| {
                ProviderError::UnknownState(format!(
                    "no registered adapter named {} to terminate {}",
                    instance.provider, instance.id
                ))
            })?;
        registered.adapter.terminate(instance).await
    }

    /// Requests a cooperative pre-migration checkpoint through the
    /// instance's owning adapter (spec §4.4 step 1). A `Permanent` result
    /// means the workload cannot checkpoint at all, not a transient fault.
    pub async fn checkpoint(&self, instance: &Instance) -> Result<(), ProviderError> {
        let registered = self
            .adapters
            .iter()
            .find(|r| r.adapter.name() == instance.provider)
            .ok_or_else(|| {
                ProviderError::UnknownState(format!(
                    "no registered adapter named {} to checkpoint {}",
                    instance.provider, instance.id
                ))
            })?;
        registered.adapter.checkpoint(instance).await
    }

    /// Provisions on one named adapter directly, bypassing selection and
    /// failover — used by the Cost Optimizer's migration sequence, which
    /// has already chosen its target provider via `best_price` and must
    /// not silently land the new instance somewhere else.
    pub async fn provision_on(
        &self,
        provider_name: &str,
        request: InstanceRequest,
    ) -> Result<Instance, ProviderError> {
        let registered = self
            .adapters
            .iter()
            .find(|r| r.adapter.name() == provider_name)
            .ok_or_else(|| {
                ProviderError::UnknownState(format!("no registered adapter named {provider_name}"))
            })?;
        let start = std::time::Instant::now();
        match registered.adapter.provision(request).await {
            Ok(instance) => {
                registered.stats.write().await.record_attempt(start.elapsed(), false);
                Ok(instance)
            }
            Err(error) => {
                registered.stats.write().await.record_attempt(start.elapsed(), true);
                Err(error)
            }
        }
    }

    /// Runs a command on an already-provisioned instance through its owning
    /// adapter — the Orchestrator's only way to start task execution, since
    /// it never holds an adapter reference itself.
    pub async fn execute(
        &self,
        instance: &Instance,
        command: Vec<String>,
        env: std::collections::HashMap<String, String>,
    ) -> Result<crate::adapter::CommandHandle, ProviderError> {
        let registered = self
            .adapters
            .iter()
            .find(|r| r.adapter.name() == instance.provider)
            .ok_or_else(|| {
                ProviderError::UnknownState(format!(
                    "no registered adapter named {} to execute on {}",
                    instance.provider, instance.id
                ))
            })?;
        registered.adapter.execute(instance, command, env).await
    }

    /// Migration trigger (spec §4.2): true when a cheaper provider exists
    /// by more than the configured threshold and the estimated migration
    /// cost is strictly less than the savings over the job's remaining
    /// runtime.
    pub fn migration_worthwhile(
        current_hourly_rate: f64,
        candidate_hourly_rate: f64,
        migration_threshold: f64,
        estimated_migration_cost_usd: f64,
        remaining_runtime_hours: f64,
    ) -> bool {
        if candidate_hourly_rate >= current_hourly_rate * (1.0 - migration_threshold) {
            return false;
        }
        let savings =
            (current_hourly_rate - candidate_hourly_rate) * remaining_runtime_hours;
        estimated_migration_cost_usd < savings
    }
}
