//! Translates a Reasoning Engine plan into a Goal's task arena (spec §9:
//! "an arena of tasks per goal, addressed by small integer handles").
//! `PlannedTask::predecessors` are indices into the plan's own task list;
//! here they become fixed `TaskHandle`s once the arena positions settle.

use aion_domain::task::{GpuClass, ResourceDemand, Task, TaskHandle, TaskStatus};
use aion_reasoning::{PlannedTask, TaskPlan};
use chrono::{DateTime, Duration as ChronoDuration, Utc};

fn parse_gpu_class(raw: &str) -> GpuClass {
    match raw.to_ascii_lowercase().as_str() {
        "a10" => GpuClass::A10,
        "a100" => GpuClass::A100,
        "h100" => GpuClass::H100,
        "l40s" => GpuClass::L40s,
        "t4" => GpuClass::T4,
        other => GpuClass::Other(other.to_string()),
    }
}

/// Builds the arena at a fixed point in time: a task with no predecessors
/// starts `Ready`; everything else starts `Pending` until the Orchestrator's
/// readiness pass clears its predecessors.
pub fn build_task_arena(plan: &TaskPlan, deadline_secs: Option<u64>) -> Vec<Task> {
    let deadline_at = deadline_secs.map(|secs| Utc::now() + ChronoDuration::seconds(secs as i64));
    plan.tasks
        .iter()
        .enumerate()
        .map(|(index, planned)| planted_task(index, planned, deadline_at))
        .collect()
}

fn planted_task(index: usize, planned: &PlannedTask, deadline_at: Option<DateTime<Utc>>) -> Task {
    let predecessors: Vec<TaskHandle> = planned
        .predecessors
        .iter()
        .map(|&i| TaskHandle(i as u32))
        .collect();
    let status = if predecessors.is_empty() {
        TaskStatus::Ready
    } else {
        TaskStatus::Pending
    };

    Task {
        handle: TaskHandle(index as u32),
        predecessors,
        image_reference: planned.image_reference.clone(),
        command: planned.command.clone(),
        env: planned.env.clone(),
        demand: ResourceDemand {
            gpu_class: parse_gpu_class(&planned.gpu_class),
            gpu_count: planned.gpu_count,
            vram_gib: planned.vram_gib,
            max_duration_secs: planned.max_duration_secs,
            max_cost_usd: planned.max_cost_usd,
            interruptible_ok: planned.interruptible_ok,
            p_interrupt_per_hour: 0.05,
        },
        confidence: planned.confidence,
        risk_tier: planned.risk_tier,
        status,
        retry_count: 0,
        base_priority: 1.0 + planned.confidence * 9.0,
        deadline_at,
        expected_duration_secs: planned.max_duration_secs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aion_domain::task::RiskTier;
    use std::collections::HashMap;

    fn planned(predecessors: Vec<usize>) -> PlannedTask {
        PlannedTask {
            predecessors,
            image_reference: "registry/example:latest".to_string(),
            command: vec!["run.sh".to_string()],
            env: HashMap::new(),
            gpu_class: "A100".to_string(),
            gpu_count: 1,
            vram_gib: 40,
            max_duration_secs: 1800,
            max_cost_usd: 5.0,
            interruptible_ok: false,
            confidence: 0.8,
            risk_tier: RiskTier::Normal,
        }
    }

    #[test]
    fn root_task_starts_ready_and_dependent_starts_pending() {
        let plan = TaskPlan {
            tasks: vec![planned(vec![]), planned(vec![0])],
            raw_output: serde_json::json!({}),
        };
        let arena = build_task_arena(&plan, None);
        assert_eq!(arena[0].status, TaskStatus::Ready);
        assert_eq!(arena[1].status, TaskStatus::Pending);
        assert_eq!(arena[1].predecessors, vec![TaskHandle(0)]);
    }

    #[test]
    fn gpu_class_parses_case_insensitively_and_falls_back_to_other() {
        let plan = TaskPlan {
            tasks: vec![{
                let mut t = planned(vec![]);
                t.gpu_class = "H100".to_string();
                t
            }],
            raw_output: serde_json::json!({}),
        };
        let arena = build_task_arena(&plan, None);
        assert_eq!(arena[0].demand.gpu_class, GpuClass::H100);
    }

    #[test]
    fn deadline_seconds_becomes_an_absolute_deadline() {
        let plan = TaskPlan {
            tasks: vec![planned(vec![])],
            raw_output: serde_json::json!({}),
        };
        let arena = build_task_arena(&plan, Some(60));
        assert!(arena[0].deadline_at.unwrap() > Utc::now());
    }
}
