//! Orchestrator (spec §4.8): one activity per accepted Goal. Requests a
//! plan from the Reasoning Engine, registers the resulting task DAG, and
//! drives it to a terminal state by marking tasks ready, gating them
//! through the Safety Governor, releasing them to the Scheduler, and
//! consulting the Reasoning Engine again on failure.
//!
//! The Orchestrator never drives providers directly — only through the
//! Scheduler + Router path (spec §4.8's key structural invariant). Its one
//! direct Router call is `execute`, to start a dispatched task's command;
//! everything else provider-shaped goes through `Scheduler::release`.
//!
//! Task state lives in the `GoalRepository`, never in a struct held across
//! an await: the dispatch pump (one shared activity) and a goal's own
//! driver loop (one per active goal) both mutate task state for the same
//! goal concurrently, so every write here is a conditional, single-task
//! transition rather than a whole-goal overwrite that could clobber one.

pub mod plan;

use aion_core::events::{EventBus, OrMindEvent};
use aion_domain::audit::Actor;
use aion_domain::goal::{Goal, GoalStatus};
use aion_domain::job::JobStatus;
use aion_domain::task::{Task, TaskHandle, TaskStatus};
use aion_governor::{CheckRequest, GovernorVerdict, SafetyGovernor};
use aion_providers::ProviderRouter;
use aion_reasoning::{FailureContext, PlanConstraints, ReasoningEngine, RepairDecision};
use aion_repository::{GoalRepository, InstanceRepository, JobRepository};
use aion_scheduler::{backoff, DispatchOutcome, Scheduler};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("reasoning engine error: {0}")]
    Reasoning(#[from] aion_reasoning::ReasoningError),
    #[error("repository error: {0}")]
    Repository(#[from] aion_repository::RepositoryError),
    #[error("governor error: {0}")]
    Governor(#[from] aion_governor::GovernorError),
    #[error("scheduler error: {0}")]
    Scheduler(#[from] aion_scheduler::SchedulerError),
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Scheduler queue depth past which new task releases are delayed
    /// rather than denied (spec §5: "a full queue causes the Orchestrator
    /// to apply admission back-pressure to new tasks (delays, not
    /// errors)").
    pub max_queue_depth: usize,
    pub admission_retry_interval: Duration,
    /// How often an idle goal loop wakes to re-check readiness when it has
    /// nothing new from the event bus.
    pub poll_interval: Duration,
    /// Grace period a running job gets to checkpoint-and-stop before
    /// `cancel_goal` terminates its instance outright (spec §5).
    pub cancellation_grace: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_queue_depth: 256,
            admission_retry_interval: Duration::from_millis(200),
            poll_interval: Duration::from_secs(2),
            cancellation_grace: Duration::from_secs(60),
        }
    }
}

pub struct Orchestrator {
    reasoning: Arc<dyn ReasoningEngine>,
    scheduler: Arc<Scheduler>,
    router: Arc<ProviderRouter>,
    governor: Arc<SafetyGovernor>,
    goal_repository: Arc<dyn GoalRepository>,
    job_repository: Arc<dyn JobRepository>,
    instance_repository: Arc<dyn InstanceRepository>,
    events: Arc<EventBus>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        reasoning: Arc<dyn ReasoningEngine>,
        scheduler: Arc<Scheduler>,
        router: Arc<ProviderRouter>,
        governor: Arc<SafetyGovernor>,
        goal_repository: Arc<dyn GoalRepository>,
        job_repository: Arc<dyn JobRepository>,
        instance_repository: Arc<dyn InstanceRepository>,
        events: Arc<EventBus>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            reasoning,
            scheduler,
            router,
            governor,
            goal_repository,
            job_repository,
            instance_repository,
            events,
            config,
        }
    }

    /// Accepts a Goal and spawns its driver loop (spec §5: "one
    /// Orchestrator activity per active Goal"). Returns immediately; the
    /// loop runs to the goal's terminal state in the background.
    pub fn accept_goal(
        self: &Arc<Self>,
        goal: Goal,
    ) -> tokio::task::JoinHandle<Result<(), OrchestratorError>> {
        let orchestrator = self.clone();
        tokio::spawn(async move { orchestrator.drive_goal(goal).await })
    }

    /// Single shared dispatch pump (spec §5: "One Scheduler dispatcher
    /// (serializes queue releases)"). Drains the Scheduler's priority
    /// queue continuously; per-goal loops never call `dispatch_next`
    /// themselves, so a task release from any goal is dispatched in the
    /// same serialized order regardless of which goal's loop released it.
    pub fn run_dispatch_pump(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let orchestrator = self.clone();
        tokio::spawn(async move { orchestrator.dispatch_pump().await })
    }

    /// Cancels a Goal (spec §5): queued/pending/ready tasks go straight to
    /// `Cancelled`, running tasks are asked to checkpoint-and-stop with a
    /// grace period before their instance is terminated. Returns
    /// immediately; cancellation (including the grace wait) runs in the
    /// background, the same way `accept_goal` backgrounds its driver loop.
    pub fn cancel_goal(self: &Arc<Self>, goal_id: Uuid) -> tokio::task::JoinHandle<Result<(), OrchestratorError>> {
        let orchestrator = self.clone();
        tokio::spawn(async move { orchestrator.run_cancellation(goal_id).await })
    }

    /// Loops rather than doing one pass, since a task snapshotted as
    /// `Ready` may have already moved to `Queued` or `Running` by the time
    /// its conditional transition lands — the dispatch pump and this goal's
    /// own driver loop are both still advancing it concurrently. Each pass
    /// only ever moves a task forward or cancels it, so it converges once
    /// every task has either finished, or been caught and cancelled.
    async fn run_cancellation(&self, goal_id: Uuid) -> Result<(), OrchestratorError> {
        loop {
            let goal = self.goal_repository.fetch(goal_id).await?;
            let live: Vec<(TaskHandle, TaskStatus, aion_domain::task::RiskTier)> = goal
                .tasks
                .iter()
                .filter(|t| !t.status.is_terminal())
                .map(|t| (t.handle, t.status, t.risk_tier))
                .collect();
            if live.is_empty() {
                break;
            }
            for (handle, status, risk_tier) in live {
                if status == TaskStatus::Running {
                    self.cancel_running_task(goal_id, handle).await?;
                } else {
                    self.transition_task(goal_id, handle, status, TaskStatus::Cancelled)
                        .await?;
                    self.record_cancellation_audit(goal_id, handle, risk_tier).await;
                }
            }
            tokio::time::sleep(self.config.admission_retry_interval).await;
        }
        self.goal_repository
            .update_status(goal_id, GoalStatus::Cancelled)
            .await?;
        self.events
            .publish(OrMindEvent::GoalTerminal {
                goal_id,
                status: format!("{:?}", GoalStatus::Cancelled),
                timestamp: Utc::now(),
            })
            .await;
        Ok(())
    }

    /// Asks a running task's instance to checkpoint, waits the configured
    /// grace period, then terminates unconditionally — the instance is
    /// leaked rather than left running if `terminate` itself fails, since
    /// the goal is already committed to cancelling.
    async fn cancel_running_task(&self, goal_id: Uuid, handle: TaskHandle) -> Result<(), OrchestratorError> {
        let jobs = self.job_repository.list_by_goal(goal_id).await?;
        let Some(job) = jobs.into_iter().find(|j| j.task == handle && j.is_live()) else {
            self.transition_task(goal_id, handle, TaskStatus::Running, TaskStatus::Cancelled)
                .await?;
            return Ok(());
        };

        if let Some(instance_id) = job.instance_id {
            match self.instance_repository.fetch(instance_id).await {
                Ok(instance) => {
                    match self.router.checkpoint(&instance).await {
                        Ok(()) => tokio::time::sleep(self.config.cancellation_grace).await,
                        Err(error) => {
                            tracing::info!(%handle, %error, "instance does not support checkpointing, terminating immediately");
                        }
                    }
                    if let Err(error) = self.router.terminate(&instance).await {
                        tracing::warn!(%handle, %error, "cancel: terminate failed, instance may be leaked");
                    }
                }
                Err(error) => {
                    tracing::warn!(%handle, %error, "cancel: instance record missing, cannot terminate");
                }
            }
        }

        self.job_repository.update_status(job.id, JobStatus::Cancelled).await?;
        self.transition_task(goal_id, handle, TaskStatus::Running, TaskStatus::Cancelled)
            .await?;
        let task_risk = self
            .goal_repository
            .fetch(goal_id)
            .await
            .ok()
            .and_then(|g| g.task(handle).map(|t| t.risk_tier))
            .unwrap_or(aion_domain::task::RiskTier::Normal);
        self.record_cancellation_audit(goal_id, handle, task_risk).await;
        Ok(())
    }

    /// Cancellation is not subject to veto, so the Governor check here is
    /// informational: it always runs to produce an audit record (spec §5:
    /// "audit records are written for each"), and its verdict is ignored.
    async fn record_cancellation_audit(&self, goal_id: Uuid, handle: TaskHandle, risk_tier: aion_domain::task::RiskTier) {
        let _ = self
            .governor
            .check(CheckRequest {
                actor: Actor::Orchestrator,
                action: format!("cancel {handle}"),
                estimated_cost_usd: 0.0,
                risk_tier,
                region: None,
                goal_id: Some(goal_id),
            })
            .await;
    }

    async fn dispatch_pump(&self) {
        loop {
            match self.scheduler.dispatch_next().await {
                Ok(DispatchOutcome::QueueEmpty) => {
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                Ok(DispatchOutcome::Dispatched { job_id, .. }) => {
                    if let Err(error) = self.run_dispatched_job(job_id).await {
                        tracing::error!(%job_id, %error, "failed to run dispatched job");
                    }
                }
                Ok(DispatchOutcome::Requeued { .. }) => {
                    // Scheduler already re-enqueues after its own backoff.
                }
                Ok(DispatchOutcome::Denied { handle, rationale }) => {
                    tracing::info!(%handle, %rationale, "dispatch denied at the provisioning stage");
                }
                Ok(DispatchOutcome::RequiresApproval { handle }) => {
                    tracing::info!(%handle, "dispatch requires external approval, no approver configured");
                }
                Ok(DispatchOutcome::InterruptibleBudgetUnsatisfiable { handle }) => {
                    tracing::info!(%handle, "spot interruption budget unsatisfiable, task cannot dispatch");
                }
                Ok(DispatchOutcome::Failed { handle, reason }) => {
                    tracing::warn!(%handle, %reason, "task failed after exhausting the Scheduler's retry budget");
                }
                Err(error) => {
                    tracing::error!(%error, "scheduler dispatch failed");
                    tokio::time::sleep(self.config.admission_retry_interval).await;
                }
            }
        }
    }

    /// Runs a dispatched job's command through the Router and records the
    /// outcome. Goal/task bookkeeping is read back from the repositories
    /// rather than held locally, since the dispatch pump and the owning
    /// goal's driver loop both touch this job's task.
    async fn run_dispatched_job(&self, job_id: Uuid) -> Result<(), OrchestratorError> {
        let job = self.job_repository.fetch(job_id).await?;
        let Some(instance_id) = job.instance_id else {
            return Ok(());
        };
        let instance = self.instance_repository.fetch(instance_id).await?;
        let goal = self.goal_repository.fetch(job.goal_id).await?;
        let Some(task) = goal.task(job.task) else {
            return Ok(());
        };
        let command = task.command.clone();
        let env = task.env.clone();

        self.transition_task(job.goal_id, job.task, TaskStatus::Queued, TaskStatus::Running)
            .await?;

        let outcome = self.router.execute(&instance, command, env).await;

        let (succeeded, exit_status) = match outcome {
            Ok(mut handle) => {
                while handle.stdout.recv().await.is_some() {}
                match handle.exit_status.await {
                    Ok(code) => (code == 0, Some(code)),
                    Err(_) => (false, None),
                }
            }
            Err(error) => {
                tracing::warn!(%job_id, %error, "execute failed to start");
                (false, None)
            }
        };

        let mut finished = job.clone();
        finished.status = if succeeded {
            JobStatus::Succeeded
        } else {
            JobStatus::Failed
        };
        finished.ended_at = Some(Utc::now());
        finished.exit_status = exit_status;
        self.job_repository.create(finished).await?;

        self.events
            .publish(OrMindEvent::JobEnded {
                job_id,
                succeeded,
                timestamp: Utc::now(),
            })
            .await;

        self.finish_task(job.goal_id, job.task, succeeded, exit_status).await
    }

    /// Marks the task terminal in its Goal's arena; on failure, consults
    /// the Reasoning Engine for a repair decision before the goal's driver
    /// loop next wakes (spec §4.8 step 4).
    async fn finish_task(
        &self,
        goal_id: Uuid,
        handle: TaskHandle,
        succeeded: bool,
        exit_status: Option<i32>,
    ) -> Result<(), OrchestratorError> {
        if succeeded {
            self.transition_task(goal_id, handle, TaskStatus::Running, TaskStatus::Succeeded)
                .await?;
            return Ok(());
        }

        let goal = self.goal_repository.fetch(goal_id).await?;
        let Some(task_snapshot) = goal.task(handle).cloned() else {
            return Ok(());
        };

        let failure = FailureContext {
            provider_error_kind: "task_execution_failed".to_string(),
            retry_count: task_snapshot.retry_count,
            last_error_message: match exit_status {
                Some(code) => format!("command exited with status {code}"),
                None => "command terminated without a reported exit status".to_string(),
            },
        };
        let repair = self.reasoning.repair(&task_snapshot, handle, &failure).await?;
        let retry_budget_left = !backoff::retries_exhausted(task_snapshot.retry_count);

        match repair.decision {
            RepairDecision::Retry if retry_budget_left => {
                tracing::info!(%handle, rationale = %repair.rationale, "repair: retrying task");
                self.goal_repository
                    .update_task(
                        goal_id,
                        handle,
                        Box::new(|t| {
                            if t.status == TaskStatus::Running {
                                t.retry_count += 1;
                                t.status = TaskStatus::Pending;
                            }
                        }),
                    )
                    .await?;
            }
            RepairDecision::Modify if retry_budget_left => {
                tracing::info!(%handle, rationale = %repair.rationale, "repair: retrying task with modified demand");
                let vram = repair.modified_vram_gib;
                self.goal_repository
                    .update_task(
                        goal_id,
                        handle,
                        Box::new(move |t| {
                            if t.status == TaskStatus::Running {
                                if let Some(v) = vram {
                                    t.demand.vram_gib = v;
                                }
                                t.retry_count += 1;
                                t.status = TaskStatus::Pending;
                            }
                        }),
                    )
                    .await?;
            }
            _ => {
                tracing::warn!(%handle, rationale = %repair.rationale, "repair: task abandoned");
                self.transition_task(goal_id, handle, TaskStatus::Running, TaskStatus::Failed)
                    .await?;
                self.cancel_downstream(goal_id, handle).await?;
            }
        }
        Ok(())
    }

    async fn drive_goal(&self, mut goal: Goal) -> Result<(), OrchestratorError> {
        let goal_id = goal.id;
        self.events
            .publish(OrMindEvent::GoalAccepted {
                goal_id,
                timestamp: Utc::now(),
            })
            .await;
        goal.status = GoalStatus::Planning;
        self.goal_repository.create(goal.clone()).await?;

        let constraints = PlanConstraints {
            budget_ceiling_usd: goal.budget_ceiling_usd,
            deadline_secs: None,
            allowed_regions: Vec::new(),
            seed: None,
        };
        let task_plan = self.reasoning.plan(&goal.raw_text, &constraints).await?;
        goal.tasks = plan::build_task_arena(&task_plan, None);
        goal.status = GoalStatus::Running;
        // Last whole-goal write for this goal: no task has been released
        // yet, so nothing else is concurrently mutating its tasks.
        self.goal_repository.save(goal).await?;

        let mut events_rx = self.events.subscribe();

        loop {
            let snapshot = self.goal_repository.fetch(goal_id).await?;
            if snapshot.all_tasks_terminal() {
                break;
            }
            self.advance(goal_id, &snapshot).await?;

            let snapshot = self.goal_repository.fetch(goal_id).await?;
            if snapshot.all_tasks_terminal() {
                break;
            }

            tokio::select! {
                _ = events_rx.recv() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        let finished = self.goal_repository.fetch(goal_id).await?;
        let final_status = if finished.tasks.iter().all(|t| t.status == TaskStatus::Succeeded) {
            GoalStatus::Completed
        } else if finished.tasks.iter().any(|t| t.status == TaskStatus::Failed) {
            GoalStatus::Failed
        } else {
            GoalStatus::Cancelled
        };
        self.goal_repository.update_status(goal_id, final_status).await?;
        self.events
            .publish(OrMindEvent::GoalTerminal {
                goal_id,
                status: format!("{final_status:?}"),
                timestamp: Utc::now(),
            })
            .await;
        Ok(())
    }

    /// One readiness-and-admission pass over a point-in-time snapshot
    /// (spec §4.8 steps 1-2). Every write below is a conditional,
    /// single-task transition, never a whole-goal overwrite, so it can
    /// never clobber a concurrent write from the dispatch pump's
    /// `finish_task`.
    async fn advance(&self, goal_id: Uuid, snapshot: &Goal) -> Result<(), OrchestratorError> {
        let mut working = snapshot.clone();
        mark_ready(&mut working);

        let newly_ready: Vec<TaskHandle> = working
            .tasks
            .iter()
            .zip(snapshot.tasks.iter())
            .filter(|(after, before)| {
                after.status == TaskStatus::Ready && before.status == TaskStatus::Pending
            })
            .map(|(after, _)| after.handle)
            .collect();
        for handle in &newly_ready {
            self.transition_task(goal_id, *handle, TaskStatus::Pending, TaskStatus::Ready)
                .await?;
        }

        let ready_handles: Vec<TaskHandle> = snapshot
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Ready)
            .map(|t| t.handle)
            .chain(newly_ready)
            .collect();

        for handle in ready_handles {
            self.admit_task(goal_id, handle).await?;
        }
        Ok(())
    }

    async fn transition_task(
        &self,
        goal_id: Uuid,
        handle: TaskHandle,
        expected: TaskStatus,
        new: TaskStatus,
    ) -> Result<(), OrchestratorError> {
        self.goal_repository
            .update_task(
                goal_id,
                handle,
                Box::new(move |t| {
                    if t.status == expected {
                        t.status = new;
                    }
                }),
            )
            .await?;
        Ok(())
    }

    /// Admission gate (spec §4.8 step 2): a Safety Governor check scoped
    /// to the Orchestrator as actor, priced off the plan's estimate
    /// rather than a live quote — a coarser, earlier gate than the
    /// Scheduler's own dispatch-time check, producing its own audit
    /// record.
    async fn admit_task(&self, goal_id: Uuid, handle: TaskHandle) -> Result<(), OrchestratorError> {
        while self.scheduler.pending_count().await >= self.config.max_queue_depth {
            tokio::time::sleep(self.config.admission_retry_interval).await;
        }

        let goal = self.goal_repository.fetch(goal_id).await?;
        let Some(task) = goal.task(handle).cloned() else {
            return Ok(());
        };
        if task.status != TaskStatus::Ready {
            // Already moved on (e.g. cancelled by a sibling failure)
            // since this pass started.
            return Ok(());
        }

        let verdict = self
            .governor
            .check(CheckRequest {
                actor: Actor::Orchestrator,
                action: format!("admit {handle}"),
                estimated_cost_usd: task.demand.max_cost_usd,
                risk_tier: task.risk_tier,
                region: None,
                goal_id: Some(goal_id),
            })
            .await?;

        match verdict {
            GovernorVerdict::Approve => {
                self.scheduler.release(goal_id, &task).await;
                self.transition_task(goal_id, handle, TaskStatus::Ready, TaskStatus::Queued)
                    .await?;
            }
            GovernorVerdict::RequireApproval | GovernorVerdict::Deny { .. } => {
                // No external approver is wired into the core (the
                // API/SDK surface that would host one is out of scope),
                // so an admission-time hold is treated the same as a
                // denial: the task does not retry on its own.
                self.transition_task(goal_id, handle, TaskStatus::Ready, TaskStatus::Failed)
                    .await?;
                self.cancel_downstream(goal_id, handle).await?;
            }
        }
        Ok(())
    }

    /// A task that will never succeed (failed, admission-denied, or
    /// abandoned after repair) strands everything downstream of it, since
    /// `mark_ready` can never clear their predecessors. Cascades
    /// cancellation through the downstream closure so the goal still
    /// converges to a terminal state.
    async fn cancel_downstream(&self, goal_id: Uuid, dead: TaskHandle) -> Result<(), OrchestratorError> {
        let mut dead_set = HashSet::new();
        dead_set.insert(dead);

        loop {
            let goal = self.goal_repository.fetch(goal_id).await?;
            let newly_dead: Vec<TaskHandle> = goal
                .tasks
                .iter()
                .filter(|t| {
                    !t.status.is_terminal()
                        && !dead_set.contains(&t.handle)
                        && t.predecessors.iter().any(|p| dead_set.contains(p))
                })
                .map(|t| t.handle)
                .collect();
            if newly_dead.is_empty() {
                break;
            }
            for handle in newly_dead {
                dead_set.insert(handle);
                self.goal_repository
                    .update_task(
                        goal_id,
                        handle,
                        Box::new(|t| {
                            if !t.status.is_terminal() {
                                t.status = TaskStatus::Cancelled;
                            }
                        }),
                    )
                    .await?;
            }
        }
        Ok(())
    }
}

/// Flips `Pending` tasks to `Ready` once every predecessor has succeeded
/// (spec §4.8 step 1). Operates on an in-memory snapshot; callers diff the
/// result against the snapshot they passed in and apply the transitions
/// one task at a time through the repository.
fn mark_ready(goal: &mut Goal) {
    let succeeded: HashSet<TaskHandle> = goal
        .tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Succeeded)
        .map(|t| t.handle)
        .collect();

    for task in goal.tasks.iter_mut() {
        if task.status == TaskStatus::Pending && task.predecessors.iter().all(|p| succeeded.contains(p)) {
            task.status = TaskStatus::Ready;
        }
    }
}

/// In-memory counterpart of `Orchestrator::cancel_downstream`, kept for
/// the cascade logic's own unit test.
#[cfg(test)]
fn cancel_blocked_tasks(goal: &mut Goal, dead: TaskHandle) {
    let mut dead_set = HashSet::new();
    dead_set.insert(dead);

    loop {
        let mut newly_dead = Vec::new();
        for task in goal.tasks.iter() {
            if !task.status.is_terminal()
                && task.predecessors.iter().any(|p| dead_set.contains(p))
                && !dead_set.contains(&task.handle)
            {
                newly_dead.push(task.handle);
            }
        }
        if newly_dead.is_empty() {
            break;
        }
        for handle in newly_dead {
            dead_set.insert(handle);
            if let Some(task) = goal.task_mut(handle) {
                task.status = TaskStatus::Cancelled;
            }
        }
    }
}
