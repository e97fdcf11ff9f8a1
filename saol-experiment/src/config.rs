//! Session configuration.
//!
//! Every field has a default matching the museum protocol, so an empty TOML
//! file (or none at all) yields a runnable configuration. Durations are in
//! seconds.

use std::path::{Path, PathBuf};

use saol_core::{Result, SaolError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub timeline: TimelineConfig,
    pub messages: Messages,
    pub assets: AssetConfig,
    pub effort: EffortConfig,
    pub recording: RecordingConfig,
}

/// Durations of the per-trial timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    /// First instruction screen.
    pub instructions_s: f64,
    /// Length of one forced-rotation stage.
    pub rotation_stage_s: f64,
    /// Heading change per rotation stage, in degrees.
    pub rotation_step_deg: f32,
    /// Second instruction screen, shown after the rotation.
    pub second_instructions_s: f64,
    /// Free exploration window.
    pub explore_s: f64,
    /// Warning fade at the end of exploration.
    pub fade_s: f64,
    /// "Time is up" screen before the next trial.
    pub time_up_s: f64,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            instructions_s: 2.0,
            rotation_stage_s: 2.0,
            rotation_step_deg: 40.0,
            second_instructions_s: 3.0,
            explore_s: 25.0,
            fade_s: 5.0,
            time_up_s: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Messages {
    pub instructions: String,
    pub second_instructions: String,
    pub time_up: String,
    pub complete: String,
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            instructions: "This is the next floor of the museum.".to_string(),
            second_instructions: "You may spend thirty seconds here.".to_string(),
            time_up: "Time is up.".to_string(),
            complete: "All floors complete.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    /// Directory holding `{stimulus_id}_{blur_level}.{extension}` images.
    pub stimuli_dir: PathBuf,
    pub extension: String,
    /// Images `001.png`..`008.png` used by the `demo` and `test-stim` verbs.
    pub demo_dir: PathBuf,
    /// Blur level applied by the `demo` verb.
    pub demo_blur: u32,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            stimuli_dir: PathBuf::from("stimuli"),
            extension: "jpg".to_string(),
            demo_dir: PathBuf::from("assets/demo"),
            demo_blur: 10,
        }
    }
}

/// Key-press effort estimator parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EffortConfig {
    pub window: usize,
    /// Presses further apart than this start a new burst.
    pub burst_gap_s: f64,
    /// Rate assigned when a new burst starts.
    pub baseline_rate: f64,
    /// Initial running maximum.
    pub initial_rate_max: f64,
    /// Exponential decay half-life between presses.
    pub half_life_s: f64,
    /// Rates below this snap to zero.
    pub floor: f64,
}

impl Default for EffortConfig {
    fn default() -> Self {
        Self {
            window: 10,
            burst_gap_s: 1.0,
            baseline_rate: 0.0,
            initial_rate_max: 1.0,
            half_life_s: 0.25,
            floor: 0.1,
        }
    }
}

pub const TICK_HZ_MIN: f64 = 1.0;
pub const TICK_HZ_MAX: f64 = 1000.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Output directory; the frontend picks a platform default when unset.
    pub data_dir: Option<PathBuf>,
    pub prealloc_samples: usize,
    pub tick_hz: f64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            prealloc_samples: saol_record::PREALLOC_SAMPLES,
            tick_hz: 60.0,
        }
    }
}

impl TimelineConfig {
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("instructions_s", self.instructions_s),
            ("rotation_stage_s", self.rotation_stage_s),
            ("second_instructions_s", self.second_instructions_s),
            ("explore_s", self.explore_s),
            ("fade_s", self.fade_s),
            ("time_up_s", self.time_up_s),
        ];
        for (name, value) in durations {
            if !value.is_finite() || value < 0.0 {
                return Err(SaolError::Config(format!(
                    "timeline.{name} must be a non-negative number, got {value}"
                )));
            }
        }
        if durations.iter().map(|(_, v)| v).sum::<f64>() <= 0.0 {
            return Err(SaolError::Config(
                "a trial timeline must have a positive total duration".to_string(),
            ));
        }
        if !self.rotation_step_deg.is_finite() {
            return Err(SaolError::Config(
                "timeline.rotation_step_deg must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

impl SessionConfig {
    /// Parse a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SaolError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&content)?;
        tracing::info!("Loaded session configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| SaolError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| SaolError::Config(format!("Failed to serialize configuration: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        self.timeline.validate()?;
        let effort = &self.effort;
        if effort.window == 0 {
            return Err(SaolError::Config("effort.window must be at least 1".into()));
        }
        if !(effort.half_life_s > 0.0) {
            return Err(SaolError::Config("effort.half_life_s must be positive".into()));
        }
        if !(effort.initial_rate_max > 0.0) {
            return Err(SaolError::Config(
                "effort.initial_rate_max must be positive".into(),
            ));
        }
        let hz = self.recording.tick_hz;
        if !(TICK_HZ_MIN..=TICK_HZ_MAX).contains(&hz) {
            return Err(SaolError::Config(format!(
                "recording.tick_hz must be between {TICK_HZ_MIN} and {TICK_HZ_MAX}, got {hz}"
            )));
        }
        Ok(())
    }
}
