use serde::{Deserialize, Serialize};

/// One per-tick record of where the subject is and which way they face.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub trial: u32,
    /// Seconds since session start.
    pub t: f64,
    pub x: f32,
    pub z: f32,
    pub heading: f32,
}

impl PositionSample {
    pub fn is_finite(&self) -> bool {
        self.t.is_finite() && self.x.is_finite() && self.z.is_finite() && self.heading.is_finite()
    }
}

/// Timestamp of one effort key press, in seconds since session start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffortSample {
    pub t: f64,
}

/// Recorded outcome per trial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialSummary {
    pub trial: u32,
    pub onset_s: f64,
    pub duration_s: f64,
    pub position_samples: usize,
    /// False when the session was stopped before the trial's timeline ended.
    pub completed: bool,
}
