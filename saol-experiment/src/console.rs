//! Operator command surface.
//!
//! Lines are split on whitespace; the first word is a case-sensitive verb.
//! Every verb produces a human-readable reply. Errors are reported as text
//! rather than raised, so a bad command never takes the session down.

use std::path::{Path, PathBuf};

use chrono::Utc;
use saol_core::{Result, SaolError};
use saol_record::{PREALLOC_SAMPLES, SaveReport};
use saol_timing::Clock;
use tracing::{info, warn};

use crate::maze::Pcrm;
use crate::state::SessionController;

pub const HELP: &str = "Available commands: debug, demo, help, load-stim <file> <position>, \
load-order <file>, save [filename], start, stop, quit, test-data, test-stim, test-clear, test-reset.";

pub const IMPROPER: &str = "Improper command.";

/// 3.5 hours of 60 Hz samples.
pub const TEST_DATA_SAMPLES: usize = PREALLOC_SAMPLES * 7 / 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    /// The operator asked to shut down.
    Quit(String),
}

impl Reply {
    pub fn text(&self) -> &str {
        match self {
            Reply::Text(text) | Reply::Quit(text) => text,
        }
    }

    pub fn is_quit(&self) -> bool {
        matches!(self, Reply::Quit(_))
    }
}

#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    data_dir: PathBuf,
}

impl CommandDispatcher {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// `PoseData_{UTC timestamp}.tsv.gz`
    pub fn default_filename() -> String {
        format!("PoseData_{}.tsv.gz", Utc::now().format("%Y%m%dT%H%M%SZ"))
    }

    /// Stop a running session and save anything not yet saved under
    /// [`default_filename`](Self::default_filename). Returns `None` when
    /// there was nothing to save.
    pub fn shutdown<C: Clock>(
        &self,
        controller: &mut SessionController<Pcrm, C>,
    ) -> Result<Option<SaveReport>> {
        if controller.mode().is_running() {
            warn!("Exiting during trial {}; stopping session", controller.trial());
            controller.stop()?;
        }
        if !controller.has_unsaved_data() {
            return Ok(None);
        }
        let report = controller.save(&self.data_dir, &Self::default_filename())?;
        info!("Saved unsaved session data to {}", report.positions.display());
        Ok(Some(report))
    }

    pub fn handle<C: Clock>(
        &self,
        controller: &mut SessionController<Pcrm, C>,
        line: &str,
    ) -> Reply {
        let args: Vec<&str> = line.split_whitespace().collect();
        let Some((&verb, rest)) = args.split_first() else {
            return Reply::Text(IMPROPER.to_string());
        };
        info!("Console: {}", line.trim());

        if verb == "quit" {
            return Reply::Quit("Shutting down.".to_string());
        }
        match self.dispatch(controller, verb, rest) {
            Ok(text) => Reply::Text(text),
            Err(e) => {
                warn!("Command '{}' failed: {}", verb, e);
                Reply::Text(e.to_string())
            }
        }
    }

    fn dispatch<C: Clock>(
        &self,
        controller: &mut SessionController<Pcrm, C>,
        verb: &str,
        args: &[&str],
    ) -> Result<String> {
        match verb {
            "debug" => Ok(controller.status()),
            "help" => Ok(HELP.to_string()),
            "demo" => {
                idle(controller, verb)?;
                controller.with_protocol(|pcrm, io| pcrm.demo(io))?;
                Ok("SVLO demo loaded.".to_string())
            }
            "load-stim" => {
                let [file, position] = args else {
                    return Err(SaolError::argument(
                        "Usage: load-stim <file> <position>",
                    ));
                };
                let position: u32 = position.parse().map_err(|_| {
                    SaolError::argument(format!("Invalid position '{position}'."))
                })?;
                idle(controller, verb)?;
                let file = Path::new(file);
                controller.with_protocol(|pcrm, io| {
                    pcrm.load_stimulus(io, file, position).map(|_| ())
                })?;
                Ok("Loaded stimulus.".to_string())
            }
            "load-order" => {
                let [file] = args else {
                    return Err(SaolError::argument("Usage: load-order <file>"));
                };
                let table = controller.load_order(file)?;
                Ok(format!(
                    "Loaded order file ({} trials x {} arms).",
                    table.n_trials(),
                    table.n_arms()
                ))
            }
            "save" => {
                let name = match args {
                    [] => Self::default_filename(),
                    [name] => name.to_string(),
                    _ => return Err(SaolError::argument("Usage: save [filename]")),
                };
                let report = controller.save(&self.data_dir, &name)?;
                Ok(format!("Saved to '{}'", report.positions.display()))
            }
            "start" => {
                controller.start()?;
                Ok(format!("Began trial {} of {}.", controller.trial(), controller.n_trials()))
            }
            "stop" => {
                controller.stop()?;
                Ok("Stopped.".to_string())
            }
            "test-data" => {
                controller.fill_test_data(TEST_DATA_SAMPLES);
                Ok("Added fake records to test save functions.".to_string())
            }
            "test-stim" => {
                idle(controller, verb)?;
                controller.with_protocol(|pcrm, io| pcrm.test_stimuli(io))?;
                Ok("Loaded SVLO 1-8 as a test.".to_string())
            }
            "test-clear" => {
                idle(controller, verb)?;
                controller.with_protocol(|pcrm, io| pcrm.clear_stimuli(io));
                Ok("Cleared stimuli.".to_string())
            }
            "test-reset" => {
                let mode = controller.test_reset();
                Ok(format!("Reset; controller is {mode}."))
            }
            _ => Ok(IMPROPER.to_string()),
        }
    }
}

/// Stimulus helpers would overwrite the running trial's placement.
fn idle<C: Clock>(controller: &SessionController<Pcrm, C>, verb: &str) -> Result<()> {
    if controller.mode().is_running() {
        return Err(SaolError::state(format!(
            "Cannot run '{verb}' while an experiment is running."
        )));
    }
    Ok(())
}
