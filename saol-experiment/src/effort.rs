use std::collections::VecDeque;

use tracing::trace;

use crate::config::EffortConfig;

/// Key-press rate estimator.
///
/// Presses closer than `burst_gap_s` apart form a burst; the rate is the
/// inverse of the mean of the last `window` inter-press intervals (capped
/// below at 1 press/s). Between presses the rate decays exponentially with
/// the configured half-life and snaps to zero once it falls below `floor`.
#[derive(Debug, Clone)]
pub struct EffortEstimator {
    config: EffortConfig,
    intervals: VecDeque<f64>,
    last_press_t: f64,
    rate: f64,
    rate_max: f64,
    recording: bool,
}

impl Default for EffortEstimator {
    fn default() -> Self {
        Self::new(EffortConfig::default())
    }
}

impl EffortEstimator {
    pub fn new(config: EffortConfig) -> Self {
        let window = config.window.max(1);
        Self {
            intervals: VecDeque::with_capacity(window),
            last_press_t: 0.0,
            rate: 0.0,
            rate_max: config.initial_rate_max,
            recording: false,
            config,
        }
    }

    /// Register a press at `t` seconds. Returns the updated rate.
    pub fn press(&mut self, t: f64) -> f64 {
        let diff = t - self.last_press_t;
        self.last_press_t = t;

        if diff > self.config.burst_gap_s {
            self.intervals.clear();
            self.rate = self.config.baseline_rate;
        } else {
            while self.intervals.len() >= self.config.window.max(1) {
                self.intervals.pop_front();
            }
            self.intervals.push_back(diff.max(0.0));
            let mean = self.intervals.iter().sum::<f64>() / self.intervals.len() as f64;
            let mean = mean.min(1.0);
            if mean > 0.0 {
                self.rate = 1.0 / mean;
            }
        }

        self.rate_max = self.rate_max.max(self.rate);
        trace!(
            "n = {}, last rt = {:5.3}, avg rate = {:5.3}, scaled rate = {:5.3}",
            self.intervals.len(),
            diff,
            self.rate,
            self.rate_scaled()
        );
        self.rate
    }

    /// Apply decay for `dt` seconds without a press.
    pub fn decay(&mut self, dt: f64) {
        if dt <= 0.0 || !dt.is_finite() {
            return;
        }
        self.rate *= 0.5f64.powf(dt / self.config.half_life_s);
        if self.rate < self.config.floor {
            self.rate = 0.0;
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn rate_max(&self) -> f64 {
        self.rate_max
    }

    pub fn rate_scaled(&self) -> f64 {
        if self.rate_max > 0.0 {
            self.rate / self.rate_max
        } else {
            0.0
        }
    }

    pub fn window_len(&self) -> usize {
        self.intervals.len()
    }

    pub fn start_recording(&mut self) {
        self.recording = true;
    }

    pub fn stop_recording(&mut self) {
        self.recording = false;
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Forget presses, rate and running maximum.
    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }
}
