//! Shared test doubles for the cross-module scenario and property suites.
//! Every integration test file pulls from here via `mod support;` so the
//! same fakes back every scenario instead of each file growing its own.

#![allow(dead_code)]

use aion_domain::audit::{AuditRecord, AuditSinkError};
use aion_domain::instance::{Instance, InstanceState};
use aion_domain::policy::PolicyWeights;
use aion_domain::price::{Availability, PriceKey, PricePoint};
use aion_domain::sink::AuditSink;
use aion_domain::task::{GpuClass, ResourceDemand, RiskTier, Task, TaskHandle};
use aion_domain::telemetry::TelemetrySample;
use aion_governor::SafetyGovernor;
use aion_orchestrator::{Orchestrator, OrchestratorConfig};
use aion_providers::adapter::{CommandHandle, InstanceRequest, ProviderAdapter, ProviderError};
use aion_providers::ProviderRouter;
use aion_reasoning::{
    Diagnosis, DiagnosisAction, FailureContext, InstanceContext, PlanConstraints, PlannedTask,
    ReasoningEngine, ReasoningError, RepairResult, TaskPlan,
};
use aion_repository::{
    GoalRepository, InMemoryGoalRepository, InMemoryInstanceRepository, InMemoryJobRepository,
    JobRepository,
};
use aion_scheduler::Scheduler;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub struct NullSink;

#[async_trait]
impl AuditSink for NullSink {
    async fn append(&self, _record: AuditRecord) -> Result<(), AuditSinkError> {
        Ok(())
    }
}

/// Captures every record it receives, in arrival order, for assertions that
/// need to inspect what an activity actually audited rather than just its
/// side effects.
#[derive(Default)]
pub struct RecordingSink(Mutex<Vec<AuditRecord>>);

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.0.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditSink for RecordingSink {
    async fn append(&self, record: AuditRecord) -> Result<(), AuditSinkError> {
        self.0.lock().unwrap().push(record);
        Ok(())
    }
}

fn price_point(provider: &str, gpu_class: &GpuClass, region: &str, rate: f64) -> PricePoint {
    PricePoint {
        key: PriceKey {
            provider: provider.to_string(),
            region: region.to_string(),
            gpu_class: gpu_class.clone(),
            instance_type: format!("{provider}-default"),
        },
        hourly_rate_usd: rate,
        availability: Availability::High,
        observed_at: Utc::now(),
        stale: false,
    }
}

fn fresh_instance(provider: &str, request: &InstanceRequest, rate: f64) -> Instance {
    Instance {
        id: Uuid::new_v4(),
        job_id: Uuid::nil(),
        provider_instance_id: format!("{provider}-{}", Uuid::new_v4()),
        provider: provider.to_string(),
        region: request.region.clone(),
        gpu_class: request.demand.gpu_class.clone(),
        gpu_count: request.demand.gpu_count,
        hourly_rate_usd: rate,
        state: InstanceState::Running,
        interruptible: request.demand.interruptible_ok,
        created_at: Utc::now(),
    }
}

/// Provisions instantly at a fixed rate, honors `provisioning_token`
/// idempotency, and tracks which instances it has terminated so repeated
/// `terminate` calls can be asserted idempotent (R1, R2).
pub struct TokenAwareAdapter {
    pub name: String,
    pub rate: f64,
    issued: Mutex<HashMap<Uuid, Instance>>,
    terminated: Mutex<HashSet<Uuid>>,
    pub terminate_calls: AtomicUsize,
}

impl TokenAwareAdapter {
    pub fn new(name: impl Into<String>, rate: f64) -> Self {
        Self {
            name: name.into(),
            rate,
            issued: Mutex::new(HashMap::new()),
            terminated: Mutex::new(HashSet::new()),
            terminate_calls: AtomicUsize::new(0),
        }
    }

    pub fn was_terminated(&self, instance_id: Uuid) -> bool {
        self.terminated.lock().unwrap().contains(&instance_id)
    }
}

#[async_trait]
impl ProviderAdapter for TokenAwareAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn price(
        &self,
        gpu_class: &GpuClass,
        region: &str,
        _price_budget: Duration,
    ) -> Result<PricePoint, ProviderError> {
        Ok(price_point(&self.name, gpu_class, region, self.rate))
    }

    async fn provision(&self, request: InstanceRequest) -> Result<Instance, ProviderError> {
        let mut issued = self.issued.lock().unwrap();
        if let Some(existing) = issued.get(&request.provisioning_token) {
            return Ok(existing.clone());
        }
        let instance = fresh_instance(&self.name, &request, self.rate);
        issued.insert(request.provisioning_token, instance.clone());
        Ok(instance)
    }

    async fn execute(
        &self,
        _instance: &Instance,
        _command: Vec<String>,
        _env: HashMap<String, String>,
    ) -> Result<CommandHandle, ProviderError> {
        unimplemented!("not exercised by the idempotency/scenario suites")
    }

    async fn metrics(&self, _instance: &Instance) -> Result<TelemetrySample, ProviderError> {
        unimplemented!("not exercised by the idempotency/scenario suites")
    }

    async fn terminate(&self, instance: &Instance) -> Result<(), ProviderError> {
        self.terminate_calls.fetch_add(1, Ordering::SeqCst);
        self.terminated.lock().unwrap().insert(instance.id);
        Ok(())
    }
}

/// Fails its first `fail_times` provisioning attempts with `Unavailable`,
/// then succeeds — for exercising the Router's failover path (S2).
pub struct FlakyAdapter {
    pub name: String,
    pub rate: f64,
    fail_times: usize,
    attempts: AtomicUsize,
}

impl FlakyAdapter {
    pub fn new(name: impl Into<String>, rate: f64, fail_times: usize) -> Self {
        Self {
            name: name.into(),
            rate,
            fail_times,
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for FlakyAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn price(
        &self,
        gpu_class: &GpuClass,
        region: &str,
        _price_budget: Duration,
    ) -> Result<PricePoint, ProviderError> {
        Ok(price_point(&self.name, gpu_class, region, self.rate))
    }

    async fn provision(&self, request: InstanceRequest) -> Result<Instance, ProviderError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_times {
            return Err(ProviderError::Unavailable(format!(
                "{} has no capacity this attempt",
                self.name
            )));
        }
        Ok(fresh_instance(&self.name, &request, self.rate))
    }

    async fn execute(
        &self,
        _instance: &Instance,
        _command: Vec<String>,
        _env: HashMap<String, String>,
    ) -> Result<CommandHandle, ProviderError> {
        unimplemented!("not exercised by the failover suite")
    }

    async fn metrics(&self, _instance: &Instance) -> Result<TelemetrySample, ProviderError> {
        unimplemented!("not exercised by the failover suite")
    }

    async fn terminate(&self, _instance: &Instance) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Always provisions successfully at a fixed rate and supports cooperative
/// checkpointing — the migration scenario's source/target adapter shape.
pub struct CheckpointableAdapter {
    pub name: String,
    pub rate: f64,
}

impl CheckpointableAdapter {
    pub fn new(name: impl Into<String>, rate: f64) -> Self {
        Self {
            name: name.into(),
            rate,
        }
    }
}

#[async_trait]
impl ProviderAdapter for CheckpointableAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn price(
        &self,
        gpu_class: &GpuClass,
        region: &str,
        _price_budget: Duration,
    ) -> Result<PricePoint, ProviderError> {
        Ok(price_point(&self.name, gpu_class, region, self.rate))
    }

    async fn provision(&self, request: InstanceRequest) -> Result<Instance, ProviderError> {
        Ok(fresh_instance(&self.name, &request, self.rate))
    }

    async fn execute(
        &self,
        _instance: &Instance,
        _command: Vec<String>,
        _env: HashMap<String, String>,
    ) -> Result<CommandHandle, ProviderError> {
        unimplemented!("not exercised by the migration suite")
    }

    async fn metrics(&self, _instance: &Instance) -> Result<TelemetrySample, ProviderError> {
        unimplemented!("not exercised by the migration suite")
    }

    async fn terminate(&self, _instance: &Instance) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn checkpoint(&self, _instance: &Instance) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Runs a command that exits with a fixed status, instantly.
pub struct ScriptedAdapter {
    pub name: String,
    pub exit_code: i32,
}

impl ScriptedAdapter {
    pub fn new(name: impl Into<String>, exit_code: i32) -> Self {
        Self {
            name: name.into(),
            exit_code,
        }
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn price(
        &self,
        gpu_class: &GpuClass,
        region: &str,
        _price_budget: Duration,
    ) -> Result<PricePoint, ProviderError> {
        Ok(price_point(&self.name, gpu_class, region, 1.0))
    }

    async fn provision(&self, request: InstanceRequest) -> Result<Instance, ProviderError> {
        Ok(fresh_instance(&self.name, &request, 1.0))
    }

    async fn execute(
        &self,
        _instance: &Instance,
        _command: Vec<String>,
        _env: HashMap<String, String>,
    ) -> Result<CommandHandle, ProviderError> {
        let (_stdout_tx, stdout_rx) = tokio::sync::mpsc::channel(1);
        let (exit_tx, exit_rx) = tokio::sync::oneshot::channel();
        let (cancel_tx, _cancel_rx) = tokio::sync::oneshot::channel();
        let _ = exit_tx.send(self.exit_code);
        Ok(CommandHandle::new(stdout_rx, exit_rx, cancel_tx))
    }

    async fn metrics(&self, _instance: &Instance) -> Result<TelemetrySample, ProviderError> {
        unimplemented!("not exercised by the happy-path/denial suites")
    }

    async fn terminate(&self, _instance: &Instance) -> Result<(), ProviderError> {
        Ok(())
    }
}

fn planned(predecessors: Vec<usize>, risk_tier: RiskTier) -> PlannedTask {
    PlannedTask {
        predecessors,
        image_reference: "registry/example:latest".to_string(),
        command: vec!["run.sh".to_string()],
        env: HashMap::new(),
        gpu_class: "a100".to_string(),
        gpu_count: 1,
        vram_gib: 40,
        max_duration_secs: 600,
        max_cost_usd: 5.0,
        interruptible_ok: false,
        confidence: 0.9,
        risk_tier,
    }
}

/// A fixed single-task or two-task plan, with a configurable repair verdict
/// for the failure path and a fixed risk tier for the gating scenarios.
pub struct FixedEngine {
    pub task_count: usize,
    pub risk_tier: RiskTier,
    pub repair: Mutex<Option<RepairResult>>,
}

impl FixedEngine {
    pub fn single_task(risk_tier: RiskTier) -> Self {
        Self {
            task_count: 1,
            risk_tier,
            repair: Mutex::new(None),
        }
    }

    pub fn two_task_chain() -> Self {
        Self {
            task_count: 2,
            risk_tier: RiskTier::Normal,
            repair: Mutex::new(None),
        }
    }

    pub fn with_repair(mut self, repair: RepairResult) -> Self {
        self.repair = Mutex::new(Some(repair));
        self
    }
}

#[async_trait]
impl ReasoningEngine for FixedEngine {
    async fn plan(
        &self,
        goal_text: &str,
        _constraints: &PlanConstraints,
    ) -> Result<TaskPlan, ReasoningError> {
        let root = planned(vec![], self.risk_tier);
        let mut tasks = vec![PlannedTask {
            command: vec![goal_text.to_string()],
            ..root
        }];
        if self.task_count > 1 {
            tasks.push(planned(vec![0], self.risk_tier));
        }
        Ok(TaskPlan {
            tasks,
            raw_output: serde_json::json!({}),
        })
    }

    async fn diagnose(
        &self,
        _instance_context: &InstanceContext,
        _metrics_window: &[TelemetrySample],
    ) -> Result<Diagnosis, ReasoningError> {
        unimplemented!("not exercised by the orchestrator-level scenario suite")
    }

    async fn repair(
        &self,
        _task: &Task,
        _task_handle: TaskHandle,
        _failure: &FailureContext,
    ) -> Result<RepairResult, ReasoningError> {
        Ok(self
            .repair
            .lock()
            .unwrap()
            .clone()
            .expect("test must configure a repair outcome before failing a task"))
    }
}

/// A `ReasoningEngine` whose `diagnose` always returns a fixed, confident
/// diagnosis — for exercising the Healing Agent's act path without a real
/// telemetry-derived trigger.
pub struct ConfidentDiagnosisEngine {
    pub action: DiagnosisAction,
    pub confidence: f64,
}

impl ConfidentDiagnosisEngine {
    pub fn new(action: DiagnosisAction, confidence: f64) -> Self {
        Self { action, confidence }
    }
}

#[async_trait]
impl ReasoningEngine for ConfidentDiagnosisEngine {
    async fn plan(
        &self,
        _goal_text: &str,
        _constraints: &PlanConstraints,
    ) -> Result<TaskPlan, ReasoningError> {
        unimplemented!("not exercised by the self-heal scenario")
    }

    async fn diagnose(
        &self,
        _instance_context: &InstanceContext,
        _metrics_window: &[TelemetrySample],
    ) -> Result<Diagnosis, ReasoningError> {
        Ok(Diagnosis {
            action: self.action,
            confidence: self.confidence,
            reasoning: "fixed diagnosis for the self-heal scenario".to_string(),
        })
    }

    async fn repair(
        &self,
        _task: &Task,
        _task_handle: TaskHandle,
        _failure: &FailureContext,
    ) -> Result<RepairResult, ReasoningError> {
        unimplemented!("not exercised by the self-heal scenario")
    }
}

pub fn sample_demand() -> ResourceDemand {
    ResourceDemand {
        gpu_class: GpuClass::A100,
        gpu_count: 1,
        vram_gib: 40,
        max_duration_secs: 600,
        max_cost_usd: 5.0,
        interruptible_ok: false,
        p_interrupt_per_hour: 0.0,
    }
}

/// A fully wired Orchestrator plus the repository handles a caller needs to
/// poll from outside the crate, since `Orchestrator::goal_repository` is
/// private to `aion-orchestrator`.
pub struct OrchestratorHarness {
    pub orchestrator: Arc<Orchestrator>,
    pub goal_repository: Arc<dyn GoalRepository>,
    pub job_repository: Arc<dyn JobRepository>,
    pub router: Arc<ProviderRouter>,
    pub audit: Arc<RecordingSink>,
}

impl OrchestratorHarness {
    /// Every job recorded for `goal_id`, regardless of status — tests that
    /// need to reason about job-per-task exclusivity or start/end ordering
    /// go through this rather than reaching into the Orchestrator's own
    /// (private) repository handle.
    pub async fn job_repository_jobs(&self, goal_id: Uuid) -> Vec<aion_domain::job::Job> {
        self.job_repository.list_by_goal(goal_id).await.unwrap()
    }
}

pub fn build_orchestrator(
    reasoning: Arc<dyn ReasoningEngine>,
    adapters: Vec<Arc<dyn ProviderAdapter>>,
    weights: PolicyWeights,
) -> OrchestratorHarness {
    let audit = Arc::new(RecordingSink::new());
    let mut router = ProviderRouter::new(1.0, 2, audit.clone());
    for adapter in adapters {
        router.register(adapter);
    }
    let router = Arc::new(router);

    let governor = Arc::new(SafetyGovernor::new(weights, audit.clone()));
    let job_repository: Arc<dyn JobRepository> = Arc::new(InMemoryJobRepository::new());
    let instance_repository = Arc::new(InMemoryInstanceRepository::new());
    let events = Arc::new(aion_core::events::EventBus::new());
    let scheduler = Arc::new(Scheduler::new(
        router.clone(),
        governor.clone(),
        job_repository.clone(),
        instance_repository.clone(),
        events.clone(),
    ));
    let goal_repository: Arc<dyn GoalRepository> = Arc::new(InMemoryGoalRepository::new());

    let orchestrator = Arc::new(Orchestrator::new(
        reasoning,
        scheduler,
        router.clone(),
        governor,
        goal_repository.clone(),
        job_repository.clone(),
        instance_repository,
        events,
        OrchestratorConfig {
            poll_interval: Duration::from_millis(20),
            admission_retry_interval: Duration::from_millis(10),
            cancellation_grace: Duration::from_millis(20),
            ..OrchestratorConfig::default()
        },
    ));

    OrchestratorHarness {
        orchestrator,
        goal_repository,
        job_repository,
        router,
        audit,
    }
}

pub async fn run_to_terminal(
    goal_repository: &Arc<dyn GoalRepository>,
    goal_id: Uuid,
) -> aion_domain::goal::Goal {
    for _ in 0..400 {
        let goal = goal_repository.fetch(goal_id).await.unwrap();
        if goal.status.is_terminal() {
            return goal;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("goal did not reach a terminal state in time");
}
