use std::path::Path;

use chrono::{DateTime, Utc};
use saol_core::{Collaborators, Mode, PositionSample, Result, SaolError, TrialSummary};
use saol_record::{DataRecorder, SaveReport, SessionSummary};
use saol_timing::Clock;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::effort::EffortEstimator;
use crate::order::{AssetResolver, OrderTable};
use crate::protocol::{Protocol, Step, TickContext};
use crate::scheduler::TrialScheduler;
use crate::trial::TrialTimestamps;

/// Owns the session state machine and everything a running session mutates.
///
/// All methods run on the tick thread. Operator commands are validated against
/// [`Mode`] first; a rejected command returns [`SaolError::State`] and leaves
/// the controller untouched.
pub struct SessionController<P, C>
where
    P: Protocol,
    C: Clock,
{
    config: SessionConfig,
    protocol: P,
    io: Collaborators,
    clock: C,
    assets: AssetResolver,
    scheduler: TrialScheduler<P::Action>,
    recorder: DataRecorder,
    effort: EffortEstimator,
    order: Option<OrderTable>,
    mode: Mode,
    trial: u32,
    t_init: f64,
    t_trial_onset: f64,
    last_tick: Option<f64>,
    started_at: Option<DateTime<Utc>>,
    current: Option<TrialTimestamps>,
    trials: Vec<TrialSummary>,
}

impl<P, C> SessionController<P, C>
where
    P: Protocol,
    C: Clock,
{
    pub fn new(config: SessionConfig, protocol: P, io: Collaborators, clock: C) -> Self {
        let assets = AssetResolver::new(&config.assets.stimuli_dir, &config.assets.extension);
        let recorder = DataRecorder::new(config.recording.prealloc_samples);
        let effort = EffortEstimator::new(config.effort.clone());
        info!(
            "Session controller ready (protocol {}, stimuli in {})",
            protocol.name(),
            assets.dir.display()
        );
        Self {
            config,
            protocol,
            io,
            clock,
            assets,
            scheduler: TrialScheduler::new(),
            recorder,
            effort,
            order: None,
            mode: Mode::Uninitialized,
            trial: 0,
            t_init: 0.0,
            t_trial_onset: 0.0,
            last_tick: None,
            started_at: None,
            current: None,
            trials: Vec::new(),
        }
    }

    /// Load and validate an order table, replacing the current one.
    ///
    /// On failure the previous table and mode are kept.
    pub fn load_order(&mut self, path: impl AsRef<Path>) -> Result<&OrderTable> {
        if !self.mode.accepts_order() {
            return Err(SaolError::state(
                "Cannot load an order file while an experiment is running.",
            ));
        }
        let table = OrderTable::load(path, &self.assets)?;
        self.mode = Mode::Ready;
        Ok(self.order.insert(table))
    }

    pub fn start(&mut self) -> Result<()> {
        let Some(order) = self.order.as_ref() else {
            return Err(SaolError::state("A trial order file has not been loaded."));
        };
        if !self.mode.can_start() {
            return Err(SaolError::state(format!(
                "The experiment is not in a ready state (mode is {}).",
                self.mode
            )));
        }
        let n_trials = order.n_trials();

        self.trial = 0;
        self.t_init = self.clock.now();
        self.t_trial_onset = self.t_init;
        self.last_tick = Some(self.t_init);
        self.started_at = Some(Utc::now());
        self.current = None;
        self.trials.clear();
        self.recorder.reset();
        self.recorder.start();
        self.effort.reset();
        self.effort.start_recording();
        self.mode = Mode::Running;
        info!("Session started with {} trials", n_trials);

        if let Err(e) = self.protocol.setup_session(&mut self.io) {
            error!("Session setup failed: {}", e);
            self.enter_stopped();
            return Err(e.with_context("Failed to set up session"));
        }
        self.advance_trial()?;
        self.fire_due();
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        if !self.mode.is_running() {
            return Err(SaolError::state("An experiment was not running."));
        }
        let now = self.session_time();
        self.finish_current(now, false);
        self.enter_stopped();
        info!("Session stopped during trial {} at {:.3}s", self.trial, now);
        Ok(())
    }

    /// Finish the current trial and begin the next one, cancelling whatever
    /// remains of the current timeline.
    pub fn next_trial(&mut self) -> Result<()> {
        if !self.mode.is_running() {
            return Err(SaolError::state("An experiment was not running."));
        }
        self.advance_trial()?;
        self.fire_due();
        Ok(())
    }

    /// One frame: sample the player, then run every due action.
    pub fn tick(&mut self) {
        if !self.mode.is_running() {
            return;
        }
        let now = self.clock.now();
        let dt = self.last_tick.map_or(0.0, |last| (now - last).max(0.0));
        self.last_tick = Some(now);
        self.effort.decay(dt);

        let ctx = self.context(now, dt);
        self.protocol.per_tick(&ctx, &mut self.io);
        let sample = self.protocol.per_tick_log(&ctx, &self.io);
        if let Err(e) = self.recorder.push_position(sample) {
            warn!("Skipping position sample: {}", e);
        }
        self.fire_due();
    }

    /// Register an effort key press now. Returns the scaled rate.
    pub fn key_press(&mut self) -> f64 {
        let t = self.session_time();
        self.key_press_at(t)
    }

    /// Register an effort key press at `t` session seconds.
    pub fn key_press_at(&mut self, t: f64) -> f64 {
        self.effort.press(t);
        if self.effort.is_recording() {
            if let Err(e) = self.recorder.push_effort(t) {
                warn!("Skipping effort sample: {}", e);
            }
        }
        self.effort.rate_scaled()
    }

    /// Save trajectory, effort log and summary under `dir`.
    pub fn save(&mut self, dir: &Path, name: &str) -> Result<SaveReport> {
        let summary = self.summary();
        let report = self.recorder.save(dir, name, &summary)?;
        self.recorder.mark_saved();
        Ok(report)
    }

    /// Samples were recorded since the last successful [`save`](Self::save).
    pub fn has_unsaved_data(&self) -> bool {
        self.recorder.has_unsaved()
    }

    /// Return to a fresh, loaded (or unloaded) controller without touching
    /// the order table.
    pub fn test_reset(&mut self) -> Mode {
        self.scheduler.cancel_all();
        self.recorder.stop();
        self.recorder.reset();
        self.effort.reset();
        self.protocol.clear(&mut self.io);
        self.io.player.unpause();
        self.trial = 0;
        self.current = None;
        self.trials.clear();
        self.started_at = None;
        self.last_tick = None;
        self.mode = if self.order.is_some() {
            Mode::Ready
        } else {
            Mode::Uninitialized
        };
        info!("Controller reset to {}", self.mode);
        self.mode
    }

    /// Append `count` copies of a fixed synthetic sample.
    pub fn fill_test_data(&mut self, count: usize) -> usize {
        let sample = PositionSample {
            trial: 1,
            t: 0.0,
            x: 2.0,
            z: 2.0,
            heading: 90.0,
        };
        self.recorder.fill_synthetic(count, sample);
        debug!("Added {} synthetic position samples", count);
        self.recorder.positions().len()
    }

    /// Run `f` with the protocol and the collaborators, e.g. for operator
    /// helpers that place stimuli outside a session.
    pub fn with_protocol<R>(&mut self, f: impl FnOnce(&mut P, &mut Collaborators) -> R) -> R {
        f(&mut self.protocol, &mut self.io)
    }

    pub fn status(&self) -> String {
        if !self.mode.is_running() {
            return "No experiment running.".to_string();
        }
        let began = self
            .started_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| format!("{:.3}", self.t_init));
        format!(
            "Experiment began at {} (trial {}, {:.3}s elapsed).",
            began,
            self.trial,
            self.session_time()
        )
    }

    pub fn summary(&self) -> SessionSummary {
        let mut trials = self.trials.clone();
        if let Some(current) = &self.current {
            trials.push(current.finish(
                self.session_time(),
                self.recorder.positions().len(),
                false,
            ));
        }
        SessionSummary {
            started_at: self.started_at,
            order_file: self
                .order
                .as_ref()
                .and_then(|o| o.source())
                .map(Path::to_path_buf),
            n_trials: self.n_trials(),
            n_arms: self.order.as_ref().map_or(0, OrderTable::n_arms),
            trials,
            position_samples: self.recorder.positions().len(),
            effort_samples: self.recorder.efforts().len(),
            effort_rate_max: self.effort.rate_max(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn trial(&self) -> u32 {
        self.trial
    }

    pub fn n_trials(&self) -> u32 {
        self.order.as_ref().map_or(0, OrderTable::n_trials)
    }

    pub fn order(&self) -> Option<&OrderTable> {
        self.order.as_ref()
    }

    pub fn recorder(&self) -> &DataRecorder {
        &self.recorder
    }

    pub fn effort(&self) -> &EffortEstimator {
        &self.effort
    }

    pub fn effort_scale(&self) -> f64 {
        self.effort.rate_scaled()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.io
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn completed_trials(&self) -> &[TrialSummary] {
        &self.trials
    }

    pub fn pending_actions(&self) -> usize {
        self.scheduler.pending()
    }

    /// Seconds since `start`.
    pub fn session_time(&self) -> f64 {
        self.clock.now() - self.t_init
    }

    /// Seconds since the current trial began.
    pub fn trial_time(&self) -> f64 {
        self.clock.now() - self.t_trial_onset
    }

    fn context(&self, now: f64, dt: f64) -> TickContext {
        TickContext {
            trial: self.trial,
            session_s: now - self.t_init,
            trial_s: now - self.t_trial_onset,
            dt,
        }
    }

    /// Run due actions until none are left. A `NextTrial` step starts the
    /// next trial in place, and its zero-offset actions run in the same pass.
    fn fire_due(&mut self) {
        while self.mode.is_running() {
            let ctx = self.context(self.clock.now(), 0.0);
            let Some(action) = self.scheduler.pop_due(ctx.trial_s) else {
                break;
            };
            match self.protocol.perform(action.clone(), &ctx, &mut self.io) {
                Ok(Step::Continue) => {}
                Ok(Step::NextTrial) => {
                    if let Err(e) = self.advance_trial() {
                        error!("Could not advance past trial {}: {}", ctx.trial, e);
                    }
                }
                Err(e) => error!("Action {:?} failed in trial {}: {}", action, ctx.trial, e),
            }
        }
    }

    fn advance_trial(&mut self) -> Result<()> {
        let now = self.session_time();
        if self.trial > 0 {
            self.protocol.end_trial(self.trial, &mut self.io);
            self.finish_current(now, true);
        }
        self.scheduler.begin_generation();
        self.trial += 1;

        let Some(order) = self.order.as_ref() else {
            self.enter_stopped();
            return Err(SaolError::state("A trial order file has not been loaded."));
        };
        if self.trial > order.n_trials() {
            self.end_session();
            return Ok(());
        }

        self.t_trial_onset = self.clock.now();
        self.current = Some(TrialTimestamps::new(
            self.trial,
            now,
            self.recorder.positions().len(),
        ));
        if let Err(e) =
            self.protocol
                .setup_trial(self.trial, order, &mut self.io, &mut self.scheduler)
        {
            error!("Trial {} setup failed: {}", self.trial, e);
            self.finish_current(now, false);
            self.enter_stopped();
            return Err(e.with_context(format!("Failed to set up trial {}", self.trial)));
        }
        info!(
            "Trial {}/{} began at {:.3}s",
            self.trial,
            order.n_trials(),
            now
        );
        Ok(())
    }

    fn end_session(&mut self) {
        self.protocol.end_session(&mut self.io);
        self.enter_stopped();
        info!(
            "All {} trials complete after {:.3}s",
            self.trials.len(),
            self.session_time()
        );
    }

    fn finish_current(&mut self, now: f64, completed: bool) {
        if let Some(current) = self.current.take() {
            let summary = current.finish(now, self.recorder.positions().len(), completed);
            debug!(
                "Trial {} lasted {:.3}s with {} samples",
                summary.trial, summary.duration_s, summary.position_samples
            );
            self.trials.push(summary);
        }
    }

    fn enter_stopped(&mut self) {
        self.recorder.stop();
        self.effort.stop_recording();
        self.scheduler.cancel_all();
        self.io.player.unpause();
        self.mode = Mode::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maze::Pcrm;
    use saol_core::{Overlay, PlayerMotion, Site, StimulusDisplay, StimulusHandle};
    use saol_timing::ManualClock;

    struct StillPlayer;
    struct NullDisplay;
    struct NullOverlay;

    impl PlayerMotion for StillPlayer {
        fn position(&self) -> (f32, f32) {
            (1.0, 2.0)
        }
        fn heading(&self) -> f32 {
            0.0
        }
        fn pause(&mut self) {}
        fn unpause(&mut self) {}
        fn reset(&mut self) {}
        fn look(&mut self, _heading_deg: f32) {}
    }

    impl StimulusDisplay for NullDisplay {
        fn place(
            &mut self,
            site: Site,
            position: u32,
            asset: &Path,
            blur_level: u32,
        ) -> Result<StimulusHandle> {
            Ok(StimulusHandle {
                site,
                position,
                asset: asset.to_path_buf(),
                blur_level,
            })
        }
        fn clear_all(&mut self) {}
    }

    impl Overlay for NullOverlay {
        fn show_text(&mut self, _message: &str) {}
        fn clear(&mut self) {}
        fn fade_in(&mut self, _duration_s: f64) {}
    }

    fn controller() -> SessionController<Pcrm, ManualClock> {
        let config = SessionConfig::default();
        let io = Collaborators::new(
            Box::new(StillPlayer),
            Box::new(NullDisplay),
            Box::new(NullOverlay),
        );
        SessionController::new(config.clone(), Pcrm::new(&config), io, ManualClock::new())
    }

    #[test]
    fn fresh_controller_is_idle() {
        let mut c = controller();
        assert_eq!(c.mode(), Mode::Uninitialized);
        assert_eq!(c.status(), "No experiment running.");
        c.tick();
        assert!(c.recorder().positions().is_empty());
    }

    #[test]
    fn start_without_order_is_rejected() {
        let mut c = controller();
        let err = c.start().unwrap_err();
        assert!(err.is_state());
        assert_eq!(c.mode(), Mode::Uninitialized);
    }

    #[test]
    fn stop_and_next_require_running() {
        let mut c = controller();
        assert!(c.stop().unwrap_err().is_state());
        assert!(c.next_trial().unwrap_err().is_state());
        assert_eq!(c.mode(), Mode::Uninitialized);
    }

    #[test]
    fn key_presses_outside_session_are_not_recorded() {
        let mut c = controller();
        c.key_press_at(0.5);
        c.key_press_at(1.0);
        assert!(c.recorder().efforts().is_empty());
        assert!((c.effort().rate() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_data_and_reset() {
        let mut c = controller();
        assert_eq!(c.fill_test_data(10), 10);
        assert_eq!(c.recorder().positions()[9].heading, 90.0);
        assert_eq!(c.test_reset(), Mode::Uninitialized);
        assert!(c.recorder().positions().is_empty());
    }
}
