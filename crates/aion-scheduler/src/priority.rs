//! Priority math for the ready queue (spec §4.3):
//!
//! ```text
//! priority = base_priority * deadline_pressure(T) / (1 + estimated_wait(T))
//! deadline_pressure(T) = max(1, 1 / max(eps, time_to_deadline / expected_duration))
//! ```
//!
//! `estimated_wait` depends on which tasks are ahead, which itself depends
//! on priority — there's no closed form, so the queue recomputes the whole
//! ordering on every push/pop rather than maintaining a static heap (see
//! `ReadyQueue::reorder`).

use aion_domain::task::{GpuClass, ResourceDemand, RiskTier, Task, TaskHandle};
use chrono::{DateTime, Utc};
use uuid::Uuid;

const DEADLINE_EPSILON_SECS: f64 = 1.0;

/// One ready task waiting for dispatch.
#[derive(Debug, Clone)]
pub struct ReadyEntry {
    pub goal_id: Uuid,
    pub handle: TaskHandle,
    pub gpu_class: GpuClass,
    pub demand: ResourceDemand,
    pub risk_tier: RiskTier,
    pub base_priority: f64,
    pub deadline_at: Option<DateTime<Utc>>,
    pub expected_duration_secs: u64,
    pub retry_count: u32,
    /// Monotonic enqueue sequence, used only to break exact ties (P7).
    pub seq: u64,
    /// Recomputed by `ReadyQueue::reorder` before each dequeue.
    pub priority: f64,
}

fn deadline_pressure(deadline_at: Option<DateTime<Utc>>, expected_duration_secs: u64, now: DateTime<Utc>) -> f64 {
    let Some(deadline_at) = deadline_at else {
        return 1.0;
    };
    let time_to_deadline = (deadline_at - now).num_seconds() as f64;
    let expected_duration = expected_duration_secs.max(1) as f64;
    let ratio = (time_to_deadline / expected_duration).max(DEADLINE_EPSILON_SECS / expected_duration);
    (1.0 / ratio).max(1.0)
}

fn gpu_class_key(class: &GpuClass) -> String {
    class.to_string()
}

/// A strict ready-task queue. Not a `BinaryHeap` because `estimated_wait`
/// makes the ordering mutually dependent: every entry's priority depends
/// on the expected durations of entries ranked ahead of it by a
/// provisional (wait-free) score.
#[derive(Default)]
pub struct ReadyQueue {
    entries: Vec<ReadyEntry>,
    next_seq: u64,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn push(
        &mut self,
        goal_id: Uuid,
        handle: TaskHandle,
        gpu_class: GpuClass,
        base_priority: f64,
        deadline_at: Option<DateTime<Utc>>,
        expected_duration_secs: u64,
    ) {
        self.push_entry(
            goal_id,
            handle,
            gpu_class.clone(),
            ResourceDemand {
                gpu_class,
                gpu_count: 1,
                vram_gib: 0,
                max_duration_secs: expected_duration_secs,
                max_cost_usd: f64::MAX,
                interruptible_ok: false,
                p_interrupt_per_hour: 0.0,
            },
            RiskTier::Normal,
            base_priority,
            deadline_at,
            expected_duration_secs,
            0,
        );
    }

    /// Enqueues a task that the Orchestrator has just marked `ready`.
    pub fn push_task(&mut self, goal_id: Uuid, task: &Task) {
        self.push_entry(
            goal_id,
            task.handle,
            task.demand.gpu_class.clone(),
            task.demand.clone(),
            task.risk_tier,
            task.base_priority,
            task.deadline_at,
            task.expected_duration_secs,
            task.retry_count,
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn push_entry(
        &mut self,
        goal_id: Uuid,
        handle: TaskHandle,
        gpu_class: GpuClass,
        demand: ResourceDemand,
        risk_tier: RiskTier,
        base_priority: f64,
        deadline_at: Option<DateTime<Utc>>,
        expected_duration_secs: u64,
        retry_count: u32,
    ) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(ReadyEntry {
            goal_id,
            handle,
            gpu_class,
            demand,
            risk_tier,
            base_priority,
            deadline_at,
            expected_duration_secs,
            retry_count,
            seq,
            priority: base_priority,
        });
    }

    /// Re-dispatches a task already holding a `seq` (a retry returning to
    /// the head of the queue keeps its original FIFO position among peers
    /// of equal priority).
    pub fn push_retry(&mut self, mut entry: ReadyEntry) {
        entry.seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(entry);
    }

    /// Recomputes every entry's priority from the current queue contents,
    /// then removes and returns the single best entry. Ties break by
    /// enqueue order (P7 in spec §8).
    pub fn pop_next(&mut self) -> Option<ReadyEntry> {
        self.reorder();
        if self.entries.is_empty() {
            return None;
        }
        Some(self.entries.remove(0))
    }

    fn reorder(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        let now = Utc::now();

        // Provisional rank ignores estimated_wait to decide who's "ahead".
        let mut order: Vec<usize> = (0..self.entries.len()).collect();
        order.sort_by(|&a, &b| {
            let pa = self.entries[a].base_priority * deadline_pressure(self.entries[a].deadline_at, self.entries[a].expected_duration_secs, now);
            let pb = self.entries[b].base_priority * deadline_pressure(self.entries[b].deadline_at, self.entries[b].expected_duration_secs, now);
            pb.partial_cmp(&pa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| self.entries[a].seq.cmp(&self.entries[b].seq))
        });

        let mut wait_by_class: std::collections::HashMap<String, f64> = std::collections::HashMap::new();
        for &index in &order {
            let class_key = gpu_class_key(&self.entries[index].gpu_class);
            let estimated_wait = *wait_by_class.get(&class_key).unwrap_or(&0.0);
            let base = self.entries[index].base_priority;
            let pressure = deadline_pressure(
                self.entries[index].deadline_at,
                self.entries[index].expected_duration_secs,
                now,
            );
            self.entries[index].priority = base * pressure / (1.0 + estimated_wait);
            *wait_by_class.entry(class_key).or_insert(0.0) += self.entries[index].expected_duration_secs as f64;
        }

        self.entries.sort_by(|a, b| {
            b.priority
                .partial_cmp(&a.priority)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.seq.cmp(&b.seq))
        });
    }
}
