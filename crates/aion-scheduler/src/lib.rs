//! Scheduler (spec §4.3). Maintains the ready-task priority queue,
//! enforces the spot interruption budget, hands released tasks to the
//! Provider Router, and drives the retry/backoff sequence on
//! provisioning failure.
//!
//! The Scheduler does not own the task DAG — that's the Orchestrator's
//! arena — so it never marks a task `ready` itself; it only accepts tasks
//! the caller has already determined are ready and reports back what
//! happened to them.

pub mod backoff;
pub mod priority;
pub mod spot;

use aion_core::events::{EventBus, OrMindEvent};
use aion_domain::task::{RiskTier, Task, TaskHandle};
use aion_domain::Actor;
use aion_governor::{CheckRequest, GovernorVerdict, SafetyGovernor};
use aion_providers::adapter::{InstanceRequest, ProviderError};
use aion_providers::router::{CandidateFilter, ProviderRouter};
use aion_repository::{InstanceRepository, JobRepository};
use chrono::Utc;
use priority::{ReadyEntry, ReadyQueue};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("governor rejected the dispatch check: {0}")]
    Governor(#[from] aion_governor::GovernorError),
    #[error("repository error: {0}")]
    Repository(#[from] aion_repository::RepositoryError),
}

/// What happened to a released task after one pass through the
/// Scheduler's dispatch loop.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    Dispatched {
        job_id: Uuid,
        instance_id: Uuid,
        provider: String,
    },
    Denied {
        handle: TaskHandle,
        rationale: String,
    },
    RequiresApproval {
        handle: TaskHandle,
    },
    Requeued {
        handle: TaskHandle,
        attempt: u32,
        backoff: Duration,
    },
    Failed {
        handle: TaskHandle,
        reason: String,
    },
    /// The interruptible class was requested but no checkpoint interval
    /// could satisfy the spot interruption budget (spec §4.3).
    InterruptibleBudgetUnsatisfiable {
        handle: TaskHandle,
    },
    QueueEmpty,
}

const DEFAULT_PRICE_BUDGET: Duration = Duration::from_secs(5);

pub struct Scheduler {
    queue: Arc<Mutex<ReadyQueue>>,
    router: Arc<ProviderRouter>,
    governor: Arc<SafetyGovernor>,
    job_repository: Arc<dyn JobRepository>,
    instance_repository: Arc<dyn InstanceRepository>,
    events: Arc<EventBus>,
}

impl Scheduler {
    pub fn new(
        router: Arc<ProviderRouter>,
        governor: Arc<SafetyGovernor>,
        job_repository: Arc<dyn JobRepository>,
        instance_repository: Arc<dyn InstanceRepository>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            queue: Arc::new(Mutex::new(ReadyQueue::new())),
            router,
            governor,
            job_repository,
            instance_repository,
            events,
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Accepts a task the Orchestrator has marked `ready`. Enqueues it
    /// under the priority formula; dispatch happens on a later call to
    /// `dispatch_next`.
    pub async fn release(&self, goal_id: Uuid, task: &Task) {
        self.queue.lock().await.push_task(goal_id, task);
        self.events
            .publish(OrMindEvent::TaskReady {
                goal_id,
                task: task.handle.0,
                timestamp: Utc::now(),
            })
            .await;
    }

    /// Pops the highest-priority ready task and attempts to dispatch it.
    /// Returns `QueueEmpty` when there is nothing to do; callers typically
    /// loop this inside a `tokio::select!` alongside other readiness
    /// signals rather than busy-polling.
    pub async fn dispatch_next(&self) -> Result<DispatchOutcome, SchedulerError> {
        let Some(entry) = self.queue.lock().await.pop_next() else {
            return Ok(DispatchOutcome::QueueEmpty);
        };
        self.dispatch_entry(entry).await
    }

    async fn dispatch_entry(&self, entry: ReadyEntry) -> Result<DispatchOutcome, SchedulerError> {
        let filter = CandidateFilter {
            demand: &entry.demand,
            region_allow_list: &[],
        };
        let region = "any";

        let (_index, price) = match self.router.select(&filter, region, DEFAULT_PRICE_BUDGET).await {
            Ok(selection) => selection,
            Err(ProviderError::Unavailable(message)) => {
                return self.retry_or_fail(entry, message).await;
            }
            Err(other) => return self.retry_or_fail(entry, other.to_string()).await,
        };

        if entry.demand.interruptible_ok {
            let expected_hours = entry.expected_duration_secs as f64 / 3600.0;
            let max_interval = spot::max_checkpoint_interval_hours(
                entry.demand.p_interrupt_per_hour,
                expected_hours,
                price.hourly_rate_usd,
            );
            if max_interval.is_none() {
                return Ok(DispatchOutcome::InterruptibleBudgetUnsatisfiable { handle: entry.handle });
            }
        }

        let estimated_cost = price.hourly_rate_usd * (entry.expected_duration_secs as f64 / 3600.0).max(0.01);

        let verdict = self
            .governor
            .check(CheckRequest {
                actor: Actor::Scheduler,
                action: format!("dispatch {}", entry.handle),
                estimated_cost_usd: estimated_cost,
                risk_tier: entry.risk_tier,
                region: Some(region.to_string()),
                goal_id: Some(entry.goal_id),
            })
            .await?;

        match verdict {
            GovernorVerdict::Deny { rationale } => Ok(DispatchOutcome::Denied {
                handle: entry.handle,
                rationale,
            }),
            GovernorVerdict::RequireApproval => {
                // Held back, not requeued silently: the caller decides
                // whether to resubmit once a human confirms.
                Ok(DispatchOutcome::RequiresApproval { handle: entry.handle })
            }
            GovernorVerdict::Approve => self.provision_and_record(entry, price.hourly_rate_usd).await,
        }
    }

    async fn provision_and_record(
        &self,
        entry: ReadyEntry,
        hourly_rate_usd: f64,
    ) -> Result<DispatchOutcome, SchedulerError> {
        let request = InstanceRequest {
            gpu_class: entry.demand.gpu_class.clone(),
            region: "any".to_string(),
            demand: entry.demand.clone(),
            provisioning_token: Uuid::new_v4(),
        };
        let filter = CandidateFilter {
            demand: &entry.demand,
            region_allow_list: &[],
        };

        let instance = match self
            .router
            .provision_with_failover(&filter, "any", request, DEFAULT_PRICE_BUDGET)
            .await
        {
            Ok(instance) => instance,
            Err(error) => return self.retry_or_fail(entry, error.to_string()).await,
        };

        let mut job = aion_domain::job::Job::new(
            entry.goal_id,
            entry.handle,
            instance.provider.clone(),
            hourly_rate_usd,
        );
        job.instance_id = Some(instance.id);
        job.status = aion_domain::job::JobStatus::Running;
        job.started_at = Some(Utc::now());
        job.expected_duration_secs = Some(entry.expected_duration_secs);
        if entry.demand.interruptible_ok {
            let hours = spot::max_checkpoint_interval_hours(
                entry.demand.p_interrupt_per_hour,
                entry.expected_duration_secs as f64 / 3600.0,
                hourly_rate_usd,
            );
            job.checkpoint_interval_secs = hours.map(|h| (h * 3600.0) as u64);
        }

        self.job_repository.create(job.clone()).await?;
        self.instance_repository.create(instance.clone()).await?;

        self.events
            .publish(OrMindEvent::TaskDispatched {
                goal_id: entry.goal_id,
                task: entry.handle.0,
                provider: job.provider.clone(),
                timestamp: Utc::now(),
            })
            .await;
        self.events
            .publish(OrMindEvent::JobStarted {
                job_id: job.id,
                instance_id: instance.id,
                timestamp: Utc::now(),
            })
            .await;

        Ok(DispatchOutcome::Dispatched {
            job_id: job.id,
            instance_id: instance.id,
            provider: job.provider,
        })
    }

    /// Provisioning failed: requeue with backoff, or fail the task once
    /// its retry budget (3 attempts) is exhausted.
    async fn retry_or_fail(&self, mut entry: ReadyEntry, reason: String) -> Result<DispatchOutcome, SchedulerError> {
        if backoff::retries_exhausted(entry.retry_count) {
            tracing::warn!(task = %entry.handle, %reason, "task failed after exhausting retry budget");
            return Ok(DispatchOutcome::Failed {
                handle: entry.handle,
                reason,
            });
        }

        let backoff_duration = backoff::backoff_for_attempt(entry.retry_count)
            .expect("retries_exhausted already checked the bound");
        let attempt = entry.retry_count;
        let handle = entry.handle;
        entry.retry_count += 1;

        tracing::warn!(task = %entry.handle, attempt, backoff_secs = backoff_duration.as_secs(), %reason, "provisioning failed, scheduling retry");

        let queue = self.queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(backoff_duration).await;
            queue.lock().await.push_retry(entry);
        });

        Ok(DispatchOutcome::Requeued {
            handle,
            attempt,
            backoff: backoff_duration,
        })
    }
}
