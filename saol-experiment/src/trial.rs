use saol_core::TrialSummary;

use crate::config::TimelineConfig;

/// Offsets of each timeline step from trial onset, in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineOffsets {
    pub instructions: f64,
    pub rotation_start: f64,
    pub rotation_stage_s: f64,
    /// `n_arms + 1` stages, so the subject sweeps past every arm once.
    pub rotation_stages: u32,
    pub second_instructions: f64,
    pub explore_start: f64,
    pub fade_start: f64,
    pub time_up: f64,
    pub next_trial: f64,
}

impl TimelineOffsets {
    pub fn new(config: &TimelineConfig, n_arms: u32) -> Self {
        let rotation_stages = n_arms + 1;
        let rotation_start = config.instructions_s;
        let second_instructions =
            rotation_start + rotation_stages as f64 * config.rotation_stage_s;
        let explore_start = second_instructions + config.second_instructions_s;
        let fade_start = explore_start + config.explore_s;
        let time_up = fade_start + config.fade_s;
        Self {
            instructions: 0.0,
            rotation_start,
            rotation_stage_s: config.rotation_stage_s,
            rotation_stages,
            second_instructions,
            explore_start,
            fade_start,
            time_up,
            next_trial: time_up + config.time_up_s,
        }
    }

    /// Offset at which rotation stage `stage` begins.
    pub fn rotation_stage_start(&self, stage: u32) -> f64 {
        self.rotation_start + stage as f64 * self.rotation_stage_s
    }

    pub fn total(&self) -> f64 {
        self.next_trial
    }
}

/// Bookkeeping for the trial in progress, in session seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialTimestamps {
    pub trial: u32,
    pub onset: f64,
    /// Position-buffer length when the trial began.
    pub first_sample: usize,
}

impl TrialTimestamps {
    pub fn new(trial: u32, onset: f64, first_sample: usize) -> Self {
        Self {
            trial,
            onset,
            first_sample,
        }
    }

    pub fn finish(&self, end: f64, samples: usize, completed: bool) -> TrialSummary {
        TrialSummary {
            trial: self.trial,
            onset_s: self.onset,
            duration_s: (end - self.onset).max(0.0),
            position_samples: samples.saturating_sub(self.first_sample),
            completed,
        }
    }
}
