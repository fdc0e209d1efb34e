//! Rolling per-metric state the trigger table is evaluated against (spec
//! §4.5): a 60-sample window per [`TelemetryMetric`] for Z-scores, plus the
//! small streak counters the "sustained N samples" conditions need.

use aion_domain::telemetry::{TelemetryMetric, TelemetrySample};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

const WINDOW_LEN: usize = 60;
const STD_DEV_FLOOR: f64 = 1e-6;
const TEMP_SUSTAIN_SAMPLES: u32 = 3;
const ZSCORE_SUSTAIN_SAMPLES: u32 = 3;
const RESTART_WINDOW: Duration = Duration::from_secs(10 * 60);
const RESTART_TRIGGER_COUNT: usize = 3;

fn mean_and_std_dev(window: &VecDeque<f64>) -> (f64, f64) {
    let n = window.len() as f64;
    let mean = window.iter().sum::<f64>() / n;
    let variance = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt().max(STD_DEV_FLOOR))
}

/// Per-instance rolling state, owned by the task watching that instance.
pub struct InstanceWindow {
    windows: HashMap<TelemetryMetric, VecDeque<f64>>,
    zscore_streak: HashMap<TelemetryMetric, u32>,
    temp_streak: u32,
    restart_timestamps: VecDeque<Instant>,
}

impl Default for InstanceWindow {
    fn default() -> Self {
        Self {
            windows: HashMap::new(),
            zscore_streak: HashMap::new(),
            temp_streak: 0,
            restart_timestamps: VecDeque::new(),
        }
    }
}

impl InstanceWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes `sample`, updates every metric's window and streak counters,
    /// and returns the Z-score of each metric that crossed |Z| > 3 for the
    /// third consecutive sample (the set the restart trigger cares about).
    pub fn observe(&mut self, sample: &TelemetrySample) -> Vec<(TelemetryMetric, f64)> {
        let mut breached = Vec::new();
        for metric in TelemetryMetric::ALL {
            let value = sample.value_of(metric);
            let window = self.windows.entry(metric).or_insert_with(VecDeque::new);
            if window.len() == WINDOW_LEN {
                window.pop_front();
            }
            window.push_back(value);

            if window.len() < 2 {
                self.zscore_streak.insert(metric, 0);
                continue;
            }
            let (mean, std_dev) = mean_and_std_dev(window);
            let z = (value - mean) / std_dev;
            let streak = self.zscore_streak.entry(metric).or_insert(0);
            if z.abs() > 3.0 {
                *streak += 1;
            } else {
                *streak = 0;
            }
            if *streak >= ZSCORE_SUSTAIN_SAMPLES {
                breached.push((metric, z));
            }
        }

        if sample.temp_celsius > 84.0 {
            self.temp_streak += 1;
        } else {
            self.temp_streak = 0;
        }

        breached
    }

    pub fn temp_sustained(&self) -> bool {
        self.temp_streak >= TEMP_SUSTAIN_SAMPLES
    }

    fn prune_restarts(&mut self) {
        let now = Instant::now();
        while let Some(&front) = self.restart_timestamps.front() {
            if now.duration_since(front) > RESTART_WINDOW {
                self.restart_timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Whether the instance has already restarted `RESTART_TRIGGER_COUNT`
    /// or more times within the trailing 10-minute window, without
    /// recording a new attempt.
    pub fn restart_budget_exhausted(&mut self) -> bool {
        self.prune_restarts();
        self.restart_timestamps.len() >= RESTART_TRIGGER_COUNT
    }

    /// Records a restart attempt now and reports `(attempt_index,
    /// exhausted)`: `attempt_index` is this restart's 0-based position
    /// among restarts within the trailing 10-minute window (feeds the
    /// backoff schedule), `exhausted` is whether the count has reached
    /// `RESTART_TRIGGER_COUNT`.
    pub fn record_restart_and_check_exhausted(&mut self) -> (usize, bool) {
        self.prune_restarts();
        self.restart_timestamps.push_back(Instant::now());
        let count = self.restart_timestamps.len();
        (count - 1, count >= RESTART_TRIGGER_COUNT)
    }
}
