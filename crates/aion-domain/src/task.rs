use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Small-integer handle addressing a [`Task`] inside its owning [`crate::Goal`]'s
/// arena. Goals own tasks by value in a `Vec<Task>`; everything else refers to
/// a task by handle rather than by pointer or clone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskHandle(pub u32);

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// GPU class demanded by a task's workload. Kept as an open string-like enum
/// so new hardware generations don't require a schema change; `Other` carries
/// the raw vendor string through.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GpuClass {
    A10,
    A100,
    H100,
    L40s,
    T4,
    Other(String),
}

impl fmt::Display for GpuClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuClass::A10 => write!(f, "a10"),
            GpuClass::A100 => write!(f, "a100"),
            GpuClass::H100 => write!(f, "h100"),
            GpuClass::L40s => write!(f, "l40s"),
            GpuClass::T4 => write!(f, "t4"),
            GpuClass::Other(s) => write!(f, "{s}"),
        }
    }
}

impl GpuClass {
    /// Next class up in VRAM headroom, for the Healing Agent's
    /// migrate-to-larger-GPU action. `Other` and `H100` (already the top
    /// of the ladder) have no larger class.
    pub fn larger(&self) -> Option<GpuClass> {
        match self {
            GpuClass::T4 => Some(GpuClass::A10),
            GpuClass::A10 => Some(GpuClass::L40s),
            GpuClass::L40s => Some(GpuClass::A100),
            GpuClass::A100 => Some(GpuClass::H100),
            GpuClass::H100 => None,
            GpuClass::Other(_) => None,
        }
    }
}

/// Resource demand of a task's workload, as carried on [`Task`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDemand {
    pub gpu_class: GpuClass,
    pub gpu_count: u32,
    pub vram_gib: u32,
    pub max_duration_secs: u64,
    pub max_cost_usd: f64,
    /// Whether an interruptible (spot) instance class is acceptable.
    pub interruptible_ok: bool,
    /// Provider-advertised interruption probability per hour for the spot
    /// class under consideration; only meaningful when `interruptible_ok`.
    pub p_interrupt_per_hour: f64,
}

/// Risk tier assigned to a task by the Reasoning Engine's plan; gates how
/// the Safety Governor evaluates it (see `aion-governor`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskTier {
    Low,
    Normal,
    Elevated,
    Blocked,
}

/// Task lifecycle. `pending -> ready -> queued -> running -> {succeeded,
/// failed}`; `queued -> cancelled` and `running -> cancelled` are reachable
/// only from the Orchestrator (see spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Ready,
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// A node in a Goal's task DAG, bound to a specific resource demand.
///
/// Invariant: `status == Ready` only if every handle in `predecessors`
/// refers to a task whose status is `Succeeded` (P1 in spec §8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub handle: TaskHandle,
    pub predecessors: Vec<TaskHandle>,
    pub image_reference: String,
    pub command: Vec<String>,
    pub env: std::collections::HashMap<String, String>,
    pub demand: ResourceDemand,
    pub confidence: f64,
    pub risk_tier: RiskTier,
    pub status: TaskStatus,
    pub retry_count: u32,
    /// Scheduler priority inputs (spec §4.3). `base_priority` is assigned at
    /// planning time; `deadline_at` is `None` for tasks with no deadline
    /// pressure (treated as maximally distant).
    pub base_priority: f64,
    pub deadline_at: Option<DateTime<Utc>>,
    pub expected_duration_secs: u64,
}

impl Task {
    pub fn is_ready(&self, succeeded: impl Fn(TaskHandle) -> bool) -> bool {
        self.predecessors.iter().all(|p| succeeded(*p))
    }
}
