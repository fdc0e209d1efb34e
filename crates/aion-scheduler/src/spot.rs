//! Spot interruption budget (spec §4.3): for a task scheduled on an
//! interruptible instance class, the Scheduler requires a checkpoint
//! interval tight enough to bound expected rework to an acceptable budget.

/// `budget = p_interrupt_per_hour * expected_duration_hours * hourly_rate`,
/// `max_checkpoint_interval = budget / hourly_rate` (hours).
///
/// Returns `None` if no finite positive interval satisfies the budget —
/// the caller must then either decline the interruptible class or refuse
/// to schedule the task (spec: "it does not silently drop the
/// constraint").
pub fn max_checkpoint_interval_hours(
    p_interrupt_per_hour: f64,
    expected_duration_hours: f64,
    hourly_rate_usd: f64,
) -> Option<f64> {
    if hourly_rate_usd <= 0.0 || p_interrupt_per_hour <= 0.0 || expected_duration_hours <= 0.0 {
        return None;
    }
    let budget_usd = p_interrupt_per_hour * expected_duration_hours * hourly_rate_usd;
    let interval = budget_usd / hourly_rate_usd;
    if interval.is_finite() && interval > 0.0 {
        Some(interval)
    } else {
        None
    }
}

/// Whether a caller-supplied checkpoint interval (seconds) satisfies the
/// budget for the given task.
pub fn checkpoint_interval_satisfies_budget(
    checkpoint_interval_secs: u64,
    p_interrupt_per_hour: f64,
    expected_duration_hours: f64,
    hourly_rate_usd: f64,
) -> bool {
    match max_checkpoint_interval_hours(p_interrupt_per_hour, expected_duration_hours, hourly_rate_usd) {
        Some(max_hours) => (checkpoint_interval_secs as f64 / 3600.0) <= max_hours,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_scales_with_interruption_probability_and_duration() {
        // budget / hourly_rate reduces to p_interrupt_per_hour *
        // expected_duration_hours; hourly_rate cancels out of the bound.
        let low = max_checkpoint_interval_hours(0.05, 2.0, 1.5).unwrap();
        let high = max_checkpoint_interval_hours(0.2, 2.0, 1.5).unwrap();
        assert!(high > low);
        assert!((low - 0.1).abs() < 1e-9);
    }

    #[test]
    fn an_interval_within_budget_satisfies_it() {
        assert!(checkpoint_interval_satisfies_budget(300, 0.1, 2.0, 1.0));
    }

    #[test]
    fn an_interval_exceeding_budget_does_not_satisfy_it() {
        assert!(!checkpoint_interval_satisfies_budget(36_000, 0.01, 1.0, 1.0));
    }

    #[test]
    fn zero_hourly_rate_yields_no_satisfiable_interval() {
        assert_eq!(max_checkpoint_interval_hours(0.1, 1.0, 0.0), None);
    }
}
