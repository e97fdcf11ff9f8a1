//! Trial order tables.
//!
//! An order table maps every `(trial, arm)` pair to the stimulus shown in that
//! arm and the blur applied to it. Tables are authored outside the program as
//! tab-separated text:
//!
//! ```text
//! trial	arm	blur	uniqueID	sigma
//! 1	1	0	imgA	10.0
//! 1	2	5	imgB	40.0
//! ```
//!
//! Rows must be sorted trial-major, arm-minor so that row
//! `(trial-1)*n_arms + (arm-1)` belongs to `(trial, arm)`. Loading verifies
//! that layout and the presence of every referenced image, both the blurred
//! `{id}_{blur}` variant and the unblurred `{id}` original; a table that
//! fails either check is rejected as a whole.

use std::fs;
use std::path::{Path, PathBuf};

use rand::Rng;
use rand::seq::SliceRandom;
use saol_core::{Result, ResultExt, SaolError};
use saol_record::TableWriter;
use tracing::{debug, info};

pub const ORDER_HEADERS: [&str; 5] = ["trial", "arm", "blur", "uniqueID", "sigma"];

/// Maps stimulus ids to image paths.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetResolver {
    pub dir: PathBuf,
    pub extension: String,
}

impl AssetResolver {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into(),
        }
    }

    /// `{dir}/{id}_{blur}.{ext}`
    pub fn blurred(&self, stimulus_id: &str, blur_level: u32) -> PathBuf {
        self.dir
            .join(format!("{}_{}.{}", stimulus_id, blur_level, self.extension))
    }

    /// `{dir}/{id}.{ext}`, the unblurred original.
    pub fn clear(&self, stimulus_id: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", stimulus_id, self.extension))
    }

    /// Stimulus ids of every unblurred image in the directory, sorted.
    pub fn list_stimuli(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list {}", self.dir.display()))?;
        let mut ids = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(self.extension.as_str()) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            // Blurred variants carry a numeric `_{level}` suffix.
            let is_variant = stem
                .rsplit_once('_')
                .is_some_and(|(_, level)| level.parse::<u32>().is_ok());
            if !is_variant {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderRow {
    pub trial: u32,
    pub arm: u32,
    pub blur_level: u32,
    pub stimulus_id: String,
    pub sigma: f32,
}

/// Parameters for generating a randomized order table.
#[derive(Debug, Clone)]
pub struct OrderSpec {
    pub n_trials: u32,
    pub n_arms: u32,
    pub blur_levels: u32,
    pub sigma_min: f32,
    pub sigma_max: f32,
}

impl Default for OrderSpec {
    fn default() -> Self {
        Self {
            n_trials: 1,
            n_arms: 8,
            blur_levels: 8,
            sigma_min: 10.0,
            sigma_max: 40.0,
        }
    }
}

impl OrderSpec {
    /// Geometric spacing between `sigma_min` and `sigma_max`.
    pub fn sigma(&self, level: u32) -> f32 {
        if self.blur_levels <= 1 {
            return self.sigma_min;
        }
        let frac = level as f32 / (self.blur_levels - 1) as f32;
        self.sigma_min * (self.sigma_max / self.sigma_min).powf(frac)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderTable {
    n_trials: u32,
    n_arms: u32,
    rows: Vec<OrderRow>,
    header: Vec<String>,
    source: Option<PathBuf>,
}

impl OrderTable {
    /// Build a table from rows already in memory. The layout is verified.
    pub fn from_rows(rows: Vec<OrderRow>) -> Result<Self> {
        let last = rows
            .last()
            .ok_or_else(|| SaolError::Validation("order table has no rows".to_string()))?;
        let table = Self {
            n_trials: last.trial,
            n_arms: last.arm,
            rows,
            header: ORDER_HEADERS.iter().map(|h| h.to_string()).collect(),
            source: None,
        };
        table.verify_layout()?;
        Ok(table)
    }

    /// Load and validate a tab-separated order file.
    pub fn load(path: impl AsRef<Path>, assets: &AssetResolver) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read order file {}", path.display()))?;
        let table = Self::parse(&content, path, assets)?;
        info!(
            "Loaded order file {} ({} trials x {} arms)",
            path.display(),
            table.n_trials,
            table.n_arms
        );
        Ok(table)
    }

    fn parse(content: &str, path: &Path, assets: &AssetResolver) -> Result<Self> {
        let mut lines: Vec<&str> = content.lines().collect();
        while lines.last().is_some_and(|l| l.trim().is_empty()) {
            lines.pop();
        }
        let Some((header, body)) = lines.split_first() else {
            return Err(SaolError::Validation(format!(
                "order file {} is empty",
                path.display()
            )));
        };
        let header: Vec<String> = header.split('\t').map(str::to_string).collect();
        debug!("Order file headers: {}", header.join(" "));

        let mut rows = Vec::with_capacity(body.len());
        for (i, line) in body.iter().enumerate() {
            // Line numbers are 1-based and count the header.
            let row = parse_row(line, path, i + 2)?;
            for asset in [
                assets.blurred(&row.stimulus_id, row.blur_level),
                assets.clear(&row.stimulus_id),
            ] {
                if !asset.is_file() {
                    return Err(SaolError::MissingAsset {
                        asset,
                        order_file: path.to_path_buf(),
                    });
                }
            }
            rows.push(row);
        }

        let mut table = Self::from_rows(rows)?;
        table.header = header;
        table.source = Some(path.to_path_buf());
        Ok(table)
    }

    /// Every row `i` must carry `trial = i / n_arms + 1` and
    /// `arm = i % n_arms + 1`.
    fn verify_layout(&self) -> Result<()> {
        if self.n_trials == 0 || self.n_arms == 0 {
            return Err(SaolError::Validation(
                "trial and arm numbers start at 1".to_string(),
            ));
        }
        let expected = self.n_trials as usize * self.n_arms as usize;
        if self.rows.len() != expected {
            return Err(SaolError::Layout {
                index: self.rows.len(),
                message: format!(
                    "{} rows for {} trials x {} arms (expected {})",
                    self.rows.len(),
                    self.n_trials,
                    self.n_arms,
                    expected
                ),
            });
        }
        let n_arms = self.n_arms as usize;
        for (index, row) in self.rows.iter().enumerate() {
            let trial = (index / n_arms) as u32 + 1;
            let arm = (index % n_arms) as u32 + 1;
            if row.trial != trial || row.arm != arm {
                return Err(SaolError::Layout {
                    index,
                    message: format!(
                        "found trial {} arm {}, expected trial {} arm {}",
                        row.trial, row.arm, trial, arm
                    ),
                });
            }
        }
        Ok(())
    }

    /// Draw a randomized table. Each trial gets `n_arms` distinct stimuli
    /// drawn without replacement from `pool`, and its arms receive a shuffled
    /// sequence of blur levels.
    pub fn generate<R: Rng + ?Sized>(
        rng: &mut R,
        pool: &[String],
        spec: &OrderSpec,
    ) -> Result<Self> {
        if spec.n_trials == 0 || spec.n_arms == 0 || spec.blur_levels == 0 {
            return Err(SaolError::argument(
                "trials, arms and blur levels must all be at least 1",
            ));
        }
        let needed = spec.n_trials as usize * spec.n_arms as usize;
        if pool.len() < needed {
            return Err(SaolError::argument(format!(
                "{} stimuli are needed for {} trials x {} arms, found {}",
                needed,
                spec.n_trials,
                spec.n_arms,
                pool.len()
            )));
        }

        let mut pool: Vec<&String> = pool.iter().collect();
        pool.shuffle(rng);
        let mut stimuli = pool.into_iter();

        let mut rows = Vec::with_capacity(needed);
        for trial in 1..=spec.n_trials {
            let mut levels: Vec<u32> = (0..spec.n_arms).map(|a| a % spec.blur_levels).collect();
            levels.shuffle(rng);
            for (arm, level) in (1..=spec.n_arms).zip(levels) {
                let id = stimuli
                    .next()
                    .ok_or_else(|| SaolError::argument("stimulus pool exhausted"))?;
                rows.push(OrderRow {
                    trial,
                    arm,
                    blur_level: level,
                    stimulus_id: id.clone(),
                    sigma: spec.sigma(level),
                });
            }
        }
        Self::from_rows(rows)
    }

    /// Serialize in the same format [`OrderTable::load`] reads.
    pub fn write_tsv(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut table = TableWriter::with_headers(ORDER_HEADERS, |r: &OrderRow| {
            format!(
                "{}\t{}\t{}\t{}\t{}",
                r.trial, r.arm, r.blur_level, r.stimulus_id, r.sigma
            )
        });
        table.extend(self.rows.iter().cloned());
        table.write(path)?;
        Ok(())
    }

    pub fn n_trials(&self) -> u32 {
        self.n_trials
    }

    pub fn n_arms(&self) -> u32 {
        self.n_arms
    }

    pub fn rows(&self) -> &[OrderRow] {
        &self.rows
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Row index for 1-based `(trial, arm)`.
    pub fn get_stim_index(&self, trial: u32, arm: u32) -> Result<usize> {
        if trial == 0 || trial > self.n_trials {
            return Err(SaolError::OutOfRange {
                what: "trial",
                value: trial,
                max: self.n_trials,
            });
        }
        if arm == 0 || arm > self.n_arms {
            return Err(SaolError::OutOfRange {
                what: "arm",
                value: arm,
                max: self.n_arms,
            });
        }
        let index = (trial as usize - 1) * self.n_arms as usize + (arm as usize - 1);
        let row = &self.rows[index];
        if row.trial != trial || row.arm != arm {
            return Err(SaolError::Layout {
                index,
                message: format!("row belongs to trial {} arm {}", row.trial, row.arm),
            });
        }
        Ok(index)
    }

    pub fn row(&self, trial: u32, arm: u32) -> Result<&OrderRow> {
        let index = self.get_stim_index(trial, arm)?;
        Ok(&self.rows[index])
    }

    /// The rows of one trial, in arm order.
    pub fn trial_rows(&self, trial: u32) -> Result<&[OrderRow]> {
        let first = self.get_stim_index(trial, 1)?;
        Ok(&self.rows[first..first + self.n_arms as usize])
    }
}

fn parse_row(line: &str, path: &Path, line_no: usize) -> Result<OrderRow> {
    let malformed = |message: String| SaolError::MalformedRow {
        path: path.to_path_buf(),
        line: line_no,
        message,
    };
    let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
    if fields.len() < 5 {
        return Err(malformed(format!("expected 5 fields, found {}", fields.len())));
    }
    let int = |name: &str, value: &str| {
        value
            .parse::<u32>()
            .map_err(|e| malformed(format!("{name} '{value}': {e}")))
    };
    let trial = int("trial", fields[0])?;
    let arm = int("arm", fields[1])?;
    let blur_level = int("blur", fields[2])?;
    let stimulus_id = fields[3].to_string();
    if stimulus_id.is_empty() {
        return Err(malformed("empty stimulus id".to_string()));
    }
    let sigma = fields[4]
        .parse::<f32>()
        .map_err(|e| malformed(format!("sigma '{}': {e}", fields[4])))?;
    Ok(OrderRow {
        trial,
        arm,
        blur_level,
        stimulus_id,
        sigma,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    const EXAMPLE: &str = "trial\tarm\tblur\tuniqueID\tsigma\n\
                           1\t1\t0\timgA\t0.0\n\
                           1\t2\t5\timgB\t1.0\n\
                           2\t1\t0\timgA\t0.0\n\
                           2\t2\t5\timgB\t1.0\n";

    fn stimuli_dir() -> (tempfile::TempDir, AssetResolver) {
        let dir = tempfile::tempdir().unwrap();
        for name in ["imgA_0.jpg", "imgB_5.jpg", "imgA.jpg", "imgB.jpg"] {
            fs::write(dir.path().join(name), b"jpg").unwrap();
        }
        let assets = AssetResolver::new(dir.path(), "jpg");
        (dir, assets)
    }

    fn grid(n_trials: u32, n_arms: u32) -> OrderTable {
        let rows = (1..=n_trials)
            .flat_map(|t| {
                (1..=n_arms).map(move |a| OrderRow {
                    trial: t,
                    arm: a,
                    blur_level: 0,
                    stimulus_id: format!("s{t}_{a}"),
                    sigma: 0.0,
                })
            })
            .collect();
        OrderTable::from_rows(rows).unwrap()
    }

    #[test]
    fn loads_example_table() {
        let (dir, assets) = stimuli_dir();
        let path = dir.path().join("order.tsv");
        fs::write(&path, EXAMPLE).unwrap();

        let table = OrderTable::load(&path, &assets).unwrap();
        assert_eq!(table.n_trials(), 2);
        assert_eq!(table.n_arms(), 2);
        assert_eq!(table.header()[3], "uniqueID");
        assert_eq!(table.row(1, 2).unwrap().stimulus_id, "imgB");
        assert_eq!(table.row(2, 2).unwrap().blur_level, 5);
        assert_eq!(table.source(), Some(path.as_path()));
    }

    #[test]
    fn missing_asset_rejects_whole_table() {
        let (dir, assets) = stimuli_dir();
        fs::remove_file(dir.path().join("imgB_5.jpg")).unwrap();
        let path = dir.path().join("order.tsv");
        fs::write(&path, EXAMPLE).unwrap();

        let err = OrderTable::load(&path, &assets).unwrap_err();
        assert!(matches!(err, SaolError::MissingAsset { .. }));
        assert!(err.to_string().contains("imgB_5.jpg"));
    }

    #[test]
    fn missing_unblurred_original_rejects_table() {
        let (dir, assets) = stimuli_dir();
        fs::remove_file(dir.path().join("imgA.jpg")).unwrap();
        let path = dir.path().join("order.tsv");
        fs::write(&path, EXAMPLE).unwrap();

        match OrderTable::load(&path, &assets).unwrap_err() {
            SaolError::MissingAsset { asset, .. } => assert!(asset.ends_with("imgA.jpg")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn unsorted_rows_are_rejected() {
        let (dir, assets) = stimuli_dir();
        let path = dir.path().join("order.tsv");
        fs::write(
            &path,
            "h\n1\t2\t5\timgB\t1.0\n1\t1\t0\timgA\t0.0\n2\t1\t0\timgA\t0.0\n2\t2\t5\timgB\t1.0\n",
        )
        .unwrap();
        let err = OrderTable::load(&path, &assets).unwrap_err();
        assert!(matches!(err, SaolError::Layout { index: 0, .. }));
    }

    #[test]
    fn incomplete_table_is_rejected() {
        let (dir, assets) = stimuli_dir();
        let path = dir.path().join("order.tsv");
        fs::write(&path, "h\n1\t1\t0\timgA\t0.0\n2\t2\t5\timgB\t1.0\n").unwrap();
        assert!(OrderTable::load(&path, &assets).unwrap_err().is_validation());
    }

    #[test]
    fn malformed_row_reports_line() {
        let (dir, assets) = stimuli_dir();
        let path = dir.path().join("order.tsv");
        fs::write(&path, "h\n1\t1\tzero\timgA\t0.0\n").unwrap();
        match OrderTable::load(&path, &assets).unwrap_err() {
            SaolError::MalformedRow { line, message, .. } => {
                assert_eq!(line, 2);
                assert!(message.contains("blur"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn tolerates_crlf_and_trailing_blank_line() {
        let (dir, assets) = stimuli_dir();
        let path = dir.path().join("order.tsv");
        fs::write(&path, EXAMPLE.replace('\n', "\r\n") + "\r\n").unwrap();
        assert_eq!(OrderTable::load(&path, &assets).unwrap().rows().len(), 4);
    }

    #[test]
    fn header_only_file_is_rejected() {
        let (dir, assets) = stimuli_dir();
        let path = dir.path().join("order.tsv");
        fs::write(&path, "trial\tarm\tblur\tuniqueID\tsigma\n").unwrap();
        assert!(OrderTable::load(&path, &assets).unwrap_err().is_validation());
    }

    #[test]
    fn index_out_of_range() {
        let table = grid(2, 2);
        assert!(matches!(
            table.get_stim_index(3, 1),
            Err(SaolError::OutOfRange { what: "trial", .. })
        ));
        assert!(matches!(
            table.get_stim_index(1, 0),
            Err(SaolError::OutOfRange { what: "arm", .. })
        ));
    }

    #[test]
    fn trial_rows_are_in_arm_order() {
        let table = grid(3, 4);
        let rows = table.trial_rows(2).unwrap();
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().enumerate().all(|(i, r)| r.trial == 2 && r.arm == i as u32 + 1));
    }

    #[test]
    fn generated_table_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let pool: Vec<String> = (0..20).map(|i| format!("stim{i:02}")).collect();
        for id in &pool {
            fs::write(dir.path().join(format!("{id}.jpg")), b"").unwrap();
            for level in 0..4 {
                fs::write(dir.path().join(format!("{id}_{level}.jpg")), b"").unwrap();
            }
        }
        let spec = OrderSpec {
            n_trials: 2,
            n_arms: 8,
            blur_levels: 4,
            ..OrderSpec::default()
        };
        let mut rng = StdRng::seed_from_u64(7);
        let table = OrderTable::generate(&mut rng, &pool, &spec).unwrap();

        let mut ids: Vec<_> = table.rows().iter().map(|r| r.stimulus_id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 16, "stimuli are drawn without replacement");

        let path = dir.path().join("generated.tsv");
        table.write_tsv(&path).unwrap();
        let loaded = OrderTable::load(&path, &AssetResolver::new(dir.path(), "jpg")).unwrap();
        assert_eq!(loaded.rows().len(), 16);
        assert_eq!(loaded.rows()[5].stimulus_id, table.rows()[5].stimulus_id);
    }

    #[test]
    fn generate_needs_enough_stimuli() {
        let pool = vec!["a".to_string(), "b".to_string()];
        let mut rng = StdRng::seed_from_u64(1);
        let err = OrderTable::generate(&mut rng, &pool, &OrderSpec::default()).unwrap_err();
        assert!(matches!(err, SaolError::Argument(_)));
    }

    #[test]
    fn sigma_spans_min_to_max() {
        let spec = OrderSpec::default();
        assert!((spec.sigma(0) - 10.0).abs() < 1e-4);
        assert!((spec.sigma(7) - 40.0).abs() < 1e-3);
        assert!(spec.sigma(3) > spec.sigma(2));
    }

    #[test]
    fn lists_only_unblurred_stimuli() {
        let (_dir, assets) = stimuli_dir();
        assert_eq!(assets.list_stimuli().unwrap(), vec!["imgA", "imgB"]);
    }

    proptest! {
        #[test]
        fn stim_index_matches_row(n_trials in 1u32..12, n_arms in 1u32..10, t in 1u32..12, a in 1u32..10) {
            prop_assume!(t <= n_trials && a <= n_arms);
            let table = grid(n_trials, n_arms);
            let index = table.get_stim_index(t, a).unwrap();
            prop_assert_eq!(index, ((t - 1) * n_arms + (a - 1)) as usize);
            prop_assert_eq!(table.rows()[index].trial, t);
            prop_assert_eq!(table.rows()[index].arm, a);
        }
    }
}
