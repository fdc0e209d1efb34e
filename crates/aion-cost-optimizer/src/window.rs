//! Per-(provider, region, gpu_class) price history (spec §4.4): a bounded
//! ring buffer of raw observations plus an EWMA used to smooth transient
//! spikes before they reach the migration trigger.

use std::collections::VecDeque;

pub const RING_LEN: usize = 60;
pub const EWMA_ALPHA: f64 = 0.3;

#[derive(Debug, Default)]
pub struct PriceWindow {
    samples: VecDeque<f64>,
    ewma: Option<f64>,
}

impl PriceWindow {
    pub fn observe(&mut self, hourly_rate_usd: f64) {
        if self.samples.len() == RING_LEN {
            self.samples.pop_front();
        }
        self.samples.push_back(hourly_rate_usd);
        self.ewma = Some(match self.ewma {
            Some(prev) => EWMA_ALPHA * hourly_rate_usd + (1.0 - EWMA_ALPHA) * prev,
            None => hourly_rate_usd,
        });
    }

    /// Smoothed price, or `None` before the first observation.
    pub fn smoothed(&self) -> Option<f64> {
        self.ewma
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_observation_seeds_the_ewma_at_its_own_value() {
        let mut window = PriceWindow::default();
        window.observe(2.0);
        assert_eq!(window.smoothed(), Some(2.0));
    }

    #[test]
    fn ewma_pulls_toward_new_observations_by_the_smoothing_factor() {
        let mut window = PriceWindow::default();
        window.observe(1.0);
        window.observe(2.0);
        // 0.3 * 2.0 + 0.7 * 1.0
        assert!((window.smoothed().unwrap() - 1.3).abs() < 1e-9);
    }

    #[test]
    fn ring_buffer_drops_oldest_past_its_bound() {
        let mut window = PriceWindow::default();
        for i in 0..(RING_LEN + 5) {
            window.observe(i as f64);
        }
        assert_eq!(window.sample_count(), RING_LEN);
    }
}
