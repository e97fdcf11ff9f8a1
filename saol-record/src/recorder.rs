use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use saol_core::{EffortSample, PositionSample, Result, ResultExt, SaolError, TrialSummary};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::table::TableWriter;

/// 60 Hz for one hour.
pub const PREALLOC_SAMPLES: usize = 216_000;

pub const POSITION_HEADERS: [&str; 5] = ["trial", "time", "x", "z", "heading"];
pub const EFFORT_HEADERS: [&str; 1] = ["time"];

/// Session-level metadata written next to the data files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub started_at: Option<DateTime<Utc>>,
    pub order_file: Option<PathBuf>,
    pub n_trials: u32,
    pub n_arms: u32,
    pub trials: Vec<TrialSummary>,
    pub position_samples: usize,
    pub effort_samples: usize,
    pub effort_rate_max: f64,
}

/// A validated `.tsv` / `.tsv.gz` output name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TsvName {
    stem: String,
    ext: &'static str,
}

impl TsvName {
    pub fn parse(name: &str) -> Result<Self> {
        let (stem, ext) = if let Some(stem) = name.strip_suffix(".tsv.gz") {
            (stem, ".tsv.gz")
        } else if let Some(stem) = name.strip_suffix(".tsv") {
            (stem, ".tsv")
        } else {
            return Err(SaolError::argument(format!(
                "Provided filename '{name}' must have extension 'tsv.gz' or 'tsv'."
            )));
        };
        if stem.is_empty() {
            return Err(SaolError::argument("Provided filename has an empty stem."));
        }
        Ok(Self {
            stem: stem.to_string(),
            ext,
        })
    }

    pub fn file_name(&self) -> String {
        format!("{}{}", self.stem, self.ext)
    }

    pub fn is_compressed(&self) -> bool {
        self.ext == ".tsv.gz"
    }

    /// `{stem}_{suffix}` with the same extension.
    pub fn sibling(&self, suffix: &str) -> String {
        format!("{}_{}{}", self.stem, suffix, self.ext)
    }

    pub fn summary(&self) -> String {
        format!("{}_summary.json", self.stem)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SaveReport {
    pub positions: PathBuf,
    pub efforts: PathBuf,
    pub summary: PathBuf,
    pub position_rows: usize,
    pub effort_rows: usize,
}

/// Per-session trajectory and effort buffers.
///
/// Saving never clears the buffers; only [`DataRecorder::reset`] does, which
/// the controller calls when a new session is set up.
#[derive(Debug)]
pub struct DataRecorder {
    positions: TableWriter<PositionSample>,
    efforts: TableWriter<EffortSample>,
    recording: bool,
    /// Buffer lengths at the last successful save.
    saved: (usize, usize),
}

impl Default for DataRecorder {
    fn default() -> Self {
        Self::new(PREALLOC_SAMPLES)
    }
}

impl DataRecorder {
    pub fn new(prealloc: usize) -> Self {
        let positions = TableWriter::with_headers(POSITION_HEADERS, |s: &PositionSample| {
            format!("{}\t{}\t{}\t{}\t{}", s.trial, s.t, s.x, s.z, s.heading)
        })
        .with_capacity(prealloc);
        let efforts = TableWriter::with_headers(EFFORT_HEADERS, |s: &EffortSample| {
            format!("{}", s.t)
        })
        .with_capacity(prealloc);
        Self {
            positions,
            efforts,
            recording: false,
            saved: (0, 0),
        }
    }

    pub fn start(&mut self) {
        self.recording = true;
    }

    pub fn stop(&mut self) {
        self.recording = false;
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Drop all buffered samples, keeping the preallocated capacity.
    pub fn reset(&mut self) {
        self.positions.clear();
        self.efforts.clear();
        self.saved = (0, 0);
    }

    /// Remember the current buffer contents as persisted.
    pub fn mark_saved(&mut self) {
        self.saved = (self.positions.rows().len(), self.efforts.rows().len());
    }

    /// True when samples were buffered after the last [`mark_saved`].
    ///
    /// [`mark_saved`]: DataRecorder::mark_saved
    pub fn has_unsaved(&self) -> bool {
        (self.positions.rows().len(), self.efforts.rows().len()) != self.saved
    }

    /// Returns `Ok(false)` when not recording.
    pub fn push_position(&mut self, sample: PositionSample) -> Result<bool> {
        if !self.recording {
            return Ok(false);
        }
        if !sample.is_finite() {
            return Err(SaolError::Validation(format!(
                "non-finite position sample {sample:?}"
            )));
        }
        self.positions.append(sample);
        Ok(true)
    }

    /// Returns `Ok(false)` when not recording.
    pub fn push_effort(&mut self, t: f64) -> Result<bool> {
        if !self.recording {
            return Ok(false);
        }
        if !t.is_finite() {
            return Err(SaolError::Validation(format!("non-finite press time {t}")));
        }
        self.efforts.append(EffortSample { t });
        Ok(true)
    }

    /// Bulk-append synthetic samples regardless of the recording flag.
    pub fn fill_synthetic(&mut self, count: usize, sample: PositionSample) {
        self.positions.extend(std::iter::repeat_n(sample, count));
    }

    pub fn positions(&self) -> &[PositionSample] {
        self.positions.rows()
    }

    pub fn efforts(&self) -> &[EffortSample] {
        self.efforts.rows()
    }

    pub fn position_capacity(&self) -> usize {
        self.positions.capacity()
    }

    /// Write the trajectory to `dir/name`, the effort log to its `_effort`
    /// sibling and the summary as JSON. Buffers are retained on failure so a
    /// retry loses nothing.
    pub fn save(&self, dir: &Path, name: &str, summary: &SessionSummary) -> Result<SaveReport> {
        let name = TsvName::parse(name)?;
        if self.positions.is_empty() {
            return Err(SaolError::state("No data to save."));
        }

        let positions = dir.join(name.file_name());
        let efforts = dir.join(name.sibling("effort"));
        let summary_path = dir.join(name.summary());

        if !name.is_compressed() && positions.exists() {
            warn!(
                "{} exists; plain-text output will be appended",
                positions.display()
            );
        }

        let position_stats = self
            .positions
            .write(&positions)
            .context("Failed to save trajectory")?;
        let effort_stats = self
            .efforts
            .write(&efforts)
            .context("Failed to save effort log")?;
        write_summary(&summary_path, summary)?;

        info!(
            "Saved {} position and {} effort samples to {}",
            position_stats.rows,
            effort_stats.rows,
            dir.display()
        );
        Ok(SaveReport {
            positions,
            efforts,
            summary: summary_path,
            position_rows: position_stats.rows,
            effort_rows: effort_stats.rows,
        })
    }
}

fn write_summary(path: &Path, summary: &SessionSummary) -> Result<()> {
    let file = fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, summary)
        .map_err(std::io::Error::from)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("Failed to flush {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn sample(trial: u32, t: f64) -> PositionSample {
        PositionSample {
            trial,
            t,
            x: 1.5,
            z: -2.0,
            heading: 90.0,
        }
    }

    fn summary() -> SessionSummary {
        SessionSummary {
            started_at: None,
            order_file: None,
            n_trials: 1,
            n_arms: 2,
            trials: Vec::new(),
            position_samples: 2,
            effort_samples: 1,
            effort_rate_max: 1.0,
        }
    }

    #[test]
    fn tsv_name_rules() {
        assert!(TsvName::parse("run.tsv.gz").unwrap().is_compressed());
        assert!(!TsvName::parse("run.tsv").unwrap().is_compressed());
        assert!(TsvName::parse("run.csv").is_err());
        assert!(TsvName::parse("run.gz").is_err());
        assert!(TsvName::parse(".tsv").is_err());

        let name = TsvName::parse("PoseData_20260101T000000Z.tsv.gz").unwrap();
        assert_eq!(name.sibling("effort"), "PoseData_20260101T000000Z_effort.tsv.gz");
        assert_eq!(name.summary(), "PoseData_20260101T000000Z_summary.json");
    }

    #[test]
    fn ignores_samples_while_not_recording() {
        let mut recorder = DataRecorder::new(16);
        assert!(!recorder.push_position(sample(1, 0.0)).unwrap());
        recorder.start();
        assert!(recorder.push_position(sample(1, 0.0)).unwrap());
        recorder.stop();
        assert!(!recorder.push_effort(0.5).unwrap());
        assert_eq!(recorder.positions().len(), 1);
        assert!(recorder.efforts().is_empty());
    }

    #[test]
    fn rejects_non_finite_samples() {
        let mut recorder = DataRecorder::new(16);
        recorder.start();
        let mut bad = sample(1, 0.0);
        bad.x = f32::NAN;
        assert!(recorder.push_position(bad).is_err());
        assert!(recorder.push_effort(f64::INFINITY).is_err());
        assert!(recorder.positions().is_empty());
    }

    #[test]
    fn reset_keeps_capacity() {
        let mut recorder = DataRecorder::new(1024);
        recorder.start();
        recorder.push_position(sample(1, 0.0)).unwrap();
        recorder.reset();
        assert!(recorder.positions().is_empty());
        assert!(recorder.position_capacity() >= 1024);
    }

    #[test]
    fn save_writes_all_three_files_and_keeps_buffers() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = DataRecorder::new(16);
        recorder.start();
        recorder.push_position(sample(1, 0.0)).unwrap();
        recorder.push_position(sample(1, 0.016)).unwrap();
        recorder.push_effort(0.25).unwrap();

        let report = recorder.save(dir.path(), "run.tsv.gz", &summary()).unwrap();
        assert_eq!(report.position_rows, 2);
        assert_eq!(report.effort_rows, 1);
        assert!(report.summary.exists());

        let mut text = String::new();
        GzDecoder::new(fs::File::open(&report.positions).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "trial\ttime\tx\tz\theading");
        assert_eq!(lines[1], "1\t0\t1.5\t-2\t90");
        assert_eq!(lines.len(), 3);

        // Saving twice is safe and does not drain the buffers.
        recorder.save(dir.path(), "run.tsv.gz", &summary()).unwrap();
        assert_eq!(recorder.positions().len(), 2);
    }

    #[test]
    fn save_rejects_bad_extension_and_empty_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = DataRecorder::new(16);
        let err = recorder.save(dir.path(), "run.tsv", &summary()).unwrap_err();
        assert_eq!(err.to_string(), "No data to save.");

        recorder.fill_synthetic(3, sample(1, 0.0));
        let err = recorder.save(dir.path(), "run.parquet", &summary()).unwrap_err();
        assert!(matches!(err, SaolError::Argument(_)));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn unsaved_tracks_samples_after_last_save() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = DataRecorder::new(16);
        assert!(!recorder.has_unsaved());

        recorder.start();
        recorder.push_position(sample(1, 0.0)).unwrap();
        assert!(recorder.has_unsaved());
        recorder.save(dir.path(), "a.tsv.gz", &summary()).unwrap();
        recorder.mark_saved();
        assert!(!recorder.has_unsaved());

        recorder.push_effort(0.5).unwrap();
        assert!(recorder.has_unsaved());
        recorder.reset();
        assert!(!recorder.has_unsaved());
    }

    #[test]
    fn failed_save_retains_data() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let mut recorder = DataRecorder::new(16);
        recorder.fill_synthetic(5, sample(2, 1.0));
        assert!(recorder.save(&missing, "run.tsv.gz", &summary()).is_err());
        assert_eq!(recorder.positions().len(), 5);

        fs::create_dir(&missing).unwrap();
        let report = recorder.save(&missing, "run.tsv.gz", &summary()).unwrap();
        assert_eq!(report.position_rows, 5);
    }
}
