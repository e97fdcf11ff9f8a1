//! Perceptual curiosity in the radial maze.
//!
//! Each trial is one "floor of the museum": every arm of the maze shows a
//! blurred image drawn from the order table on the hub wall, and the same
//! image unblurred at the far end of the arm. The subject is held in place
//! while the view sweeps past all arms, then explores freely until a warning
//! fade and a "time is up" screen end the trial.

use std::path::{Path, PathBuf};

use saol_core::{Collaborators, Result, ResultExt, SaolError, Site, StimulusHandle};
use tracing::{debug, info};

use crate::config::{AssetConfig, Messages, SessionConfig, TimelineConfig};
use crate::order::{AssetResolver, OrderTable};
use crate::protocol::{Protocol, Step, TickContext};
use crate::scheduler::TrialScheduler;
use crate::trial::TimelineOffsets;

/// Arms of the physical maze, used by the operator helpers that do not
/// depend on an order table.
pub const ARMS: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MazeAction {
    ShowInstructions,
    RotationStage(u32),
    ShowSecondInstructions,
    BeginExploration,
    FadeWarning,
    TimeUp,
    NextTrial,
}

#[derive(Debug, Clone, Copy)]
struct Rotation {
    /// `+1` or `-1`, alternating between trials.
    counter: f32,
    stage: u32,
    stage_start_s: f64,
}

#[derive(Debug)]
pub struct Pcrm {
    timeline: TimelineConfig,
    messages: Messages,
    assets: AssetResolver,
    demo: AssetConfig,
    offsets: Option<TimelineOffsets>,
    rotation: Option<Rotation>,
    counter: f32,
    handles: Vec<StimulusHandle>,
}

impl Pcrm {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            timeline: config.timeline.clone(),
            messages: config.messages.clone(),
            assets: AssetResolver::new(&config.assets.stimuli_dir, &config.assets.extension),
            demo: config.assets.clone(),
            offsets: None,
            rotation: None,
            counter: 1.0,
            handles: Vec::with_capacity(ARMS as usize),
        }
    }

    pub fn handles(&self) -> &[StimulusHandle] {
        &self.handles
    }

    pub fn offsets(&self) -> Option<&TimelineOffsets> {
        self.offsets.as_ref()
    }

    pub fn is_rotating(&self) -> bool {
        self.rotation.is_some()
    }

    fn demo_image(&self, index: u32) -> PathBuf {
        self.demo.demo_dir.join(format!("{:03}.png", index))
    }

    /// Place the demo set in every arm: blurred on the hub wall, sharp at
    /// the arm end.
    pub fn demo(&mut self, io: &mut Collaborators) -> Result<usize> {
        self.clear_stimuli(io);
        let blur = self.demo.demo_blur;
        for arm in 1..=ARMS {
            let asset = self.demo_image(arm);
            self.place(io, Site::Inner, arm, &asset, blur)?;
            self.place(io, Site::Outer, arm, &asset, 0)?;
        }
        Ok(self.handles.len())
    }

    /// Place the unblurred demo set in every arm, with the second demo set
    /// (`011.png`..) at the arm ends.
    pub fn test_stimuli(&mut self, io: &mut Collaborators) -> Result<usize> {
        self.clear_stimuli(io);
        for arm in 1..=ARMS {
            let inner = self.demo_image(arm);
            let outer = self.demo_image(10 + arm);
            self.place(io, Site::Inner, arm, &inner, 0)?;
            self.place(io, Site::Outer, arm, &outer, 0)?;
        }
        Ok(self.handles.len())
    }

    /// Place a single image on the hub wall of 1-based `position`, replacing
    /// whatever hung there.
    pub fn load_stimulus(
        &mut self,
        io: &mut Collaborators,
        file: &Path,
        position: u32,
    ) -> Result<&StimulusHandle> {
        if position == 0 || position > ARMS {
            return Err(SaolError::OutOfRange {
                what: "position",
                value: position,
                max: ARMS,
            });
        }
        self.handles
            .retain(|h| !(h.site == Site::Inner && h.position == position));
        self.place(io, Site::Inner, position, file, 0)
    }

    pub fn clear_stimuli(&mut self, io: &mut Collaborators) {
        if !self.handles.is_empty() {
            debug!("Clearing {} stimuli", self.handles.len());
        }
        self.handles.clear();
        io.stimuli.clear_all();
    }

    fn place(
        &mut self,
        io: &mut Collaborators,
        site: Site,
        position: u32,
        asset: &Path,
        blur_level: u32,
    ) -> Result<&StimulusHandle> {
        let handle = io
            .stimuli
            .place(site, position, asset, blur_level)
            .with_context(|| {
                format!("Failed to place {} at arm {} ({:?})", asset.display(), position, site)
            })?;
        self.handles.push(handle);
        self.handles
            .last()
            .ok_or_else(|| SaolError::state("stimulus placement was lost"))
    }

    /// Each arm gets the blurred image on the hub wall and its sharp
    /// original at the arm end.
    fn place_trial(&mut self, trial: u32, order: &OrderTable, io: &mut Collaborators) -> Result<()> {
        for row in order.trial_rows(trial)? {
            let blurred = self.assets.blurred(&row.stimulus_id, row.blur_level);
            let sharp = self.assets.clear(&row.stimulus_id);
            self.place(io, Site::Inner, row.arm, &blurred, row.blur_level)?;
            self.place(io, Site::Outer, row.arm, &sharp, 0)?;
        }
        Ok(())
    }

    fn stage_heading(&self, counter: f32, stage: f64) -> f32 {
        stage as f32 * counter * self.timeline.rotation_step_deg
    }

    fn log_stage(&self, rotation: &Rotation, now_s: f64) {
        debug!(
            "Rotation stage {} took {:.3}s (nominal {:.3}s)",
            rotation.stage,
            now_s - rotation.stage_start_s,
            self.timeline.rotation_stage_s
        );
    }
}

impl Protocol for Pcrm {
    type Action = MazeAction;

    fn name(&self) -> &str {
        "pcrm"
    }

    fn setup_session(&mut self, io: &mut Collaborators) -> Result<()> {
        self.clear_stimuli(io);
        self.rotation = None;
        io.overlay.clear();
        Ok(())
    }

    fn setup_trial(
        &mut self,
        trial: u32,
        order: &OrderTable,
        io: &mut Collaborators,
        scheduler: &mut TrialScheduler<MazeAction>,
    ) -> Result<()> {
        self.clear_stimuli(io);
        self.rotation = None;
        io.player.reset();

        if let Err(e) = self.place_trial(trial, order, io) {
            self.clear_stimuli(io);
            return Err(e);
        }

        self.counter = -1.0 + 2.0 * (trial % 2) as f32;
        let offsets = TimelineOffsets::new(&self.timeline, order.n_arms());
        scheduler.schedule(offsets.instructions, MazeAction::ShowInstructions)?;
        for stage in 0..offsets.rotation_stages {
            scheduler.schedule(
                offsets.rotation_stage_start(stage),
                MazeAction::RotationStage(stage),
            )?;
        }
        scheduler.schedule(offsets.second_instructions, MazeAction::ShowSecondInstructions)?;
        scheduler.schedule(offsets.explore_start, MazeAction::BeginExploration)?;
        scheduler.schedule(offsets.fade_start, MazeAction::FadeWarning)?;
        scheduler.schedule(offsets.time_up, MazeAction::TimeUp)?;
        scheduler.schedule(offsets.next_trial, MazeAction::NextTrial)?;
        debug!(
            "Trial {} timeline: {} actions over {:.1}s",
            trial,
            scheduler.pending(),
            offsets.total()
        );
        self.offsets = Some(offsets);
        Ok(())
    }

    fn perform(
        &mut self,
        action: MazeAction,
        ctx: &TickContext,
        io: &mut Collaborators,
    ) -> Result<Step> {
        debug!("Trial {} at {:.3}s: {:?}", ctx.trial, ctx.trial_s, action);
        match action {
            MazeAction::ShowInstructions => {
                io.overlay.show_text(&self.messages.instructions);
                io.player.pause();
            }
            MazeAction::RotationStage(stage) => {
                match self.rotation {
                    Some(previous) => self.log_stage(&previous, ctx.trial_s),
                    None => io.overlay.clear(),
                }
                let rotation = Rotation {
                    counter: self.counter,
                    stage,
                    stage_start_s: ctx.trial_s,
                };
                io.player.look(self.stage_heading(rotation.counter, stage as f64));
                self.rotation = Some(rotation);
            }
            MazeAction::ShowSecondInstructions => {
                if let Some(last) = self.rotation.take() {
                    self.log_stage(&last, ctx.trial_s);
                    io.player
                        .look(self.stage_heading(last.counter, (last.stage + 1) as f64));
                }
                io.overlay.show_text(&self.messages.second_instructions);
            }
            MazeAction::BeginExploration => {
                io.overlay.clear();
                io.player.unpause();
            }
            MazeAction::FadeWarning => {
                io.overlay.fade_in(self.timeline.fade_s);
            }
            MazeAction::TimeUp => {
                io.player.pause();
                io.overlay.show_text(&self.messages.time_up);
            }
            MazeAction::NextTrial => return Ok(Step::NextTrial),
        }
        Ok(Step::Continue)
    }

    fn per_tick(&mut self, ctx: &TickContext, io: &mut Collaborators) {
        let Some(rotation) = self.rotation else {
            return;
        };
        let progress = if self.timeline.rotation_stage_s > 0.0 {
            ((ctx.trial_s - rotation.stage_start_s) / self.timeline.rotation_stage_s)
                .clamp(0.0, 1.0)
        } else {
            1.0
        };
        io.player.look(
            self.stage_heading(rotation.counter, rotation.stage as f64 + progress),
        );
    }

    fn end_trial(&mut self, trial: u32, io: &mut Collaborators) {
        debug!("Ending trial {}", trial);
        self.clear_stimuli(io);
        self.rotation = None;
        io.overlay.clear();
    }

    fn end_session(&mut self, io: &mut Collaborators) {
        info!("Showing completion message");
        io.overlay.show_text(&self.messages.complete);
    }

    fn clear(&mut self, io: &mut Collaborators) {
        self.clear_stimuli(io);
        self.rotation = None;
        self.offsets = None;
        io.overlay.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use saol_core::{Overlay, PlayerMotion, StimulusDisplay};

    #[derive(Default)]
    struct Log {
        events: Vec<String>,
        headings: Vec<f32>,
    }

    type Shared = Rc<RefCell<Log>>;

    struct Player(Shared);
    struct Display(Shared);
    struct Screen(Shared);

    impl PlayerMotion for Player {
        fn position(&self) -> (f32, f32) {
            (0.0, 0.0)
        }
        fn heading(&self) -> f32 {
            self.0.borrow().headings.last().copied().unwrap_or(0.0)
        }
        fn pause(&mut self) {
            self.0.borrow_mut().events.push("pause".into());
        }
        fn unpause(&mut self) {
            self.0.borrow_mut().events.push("unpause".into());
        }
        fn reset(&mut self) {
            self.0.borrow_mut().events.push("reset".into());
        }
        fn look(&mut self, heading_deg: f32) {
            self.0.borrow_mut().headings.push(heading_deg);
        }
    }

    impl StimulusDisplay for Display {
        fn place(
            &mut self,
            site: Site,
            position: u32,
            asset: &Path,
            blur_level: u32,
        ) -> Result<StimulusHandle> {
            if asset.to_string_lossy().contains("broken") {
                return Err(SaolError::Validation("cannot decode".into()));
            }
            self.0.borrow_mut().events.push(format!("place {site:?} {position}"));
            Ok(StimulusHandle {
                site,
                position,
                asset: asset.to_path_buf(),
                blur_level,
            })
        }
        fn clear_all(&mut self) {
            self.0.borrow_mut().events.push("clear_all".into());
        }
    }

    impl Overlay for Screen {
        fn show_text(&mut self, message: &str) {
            self.0.borrow_mut().events.push(format!("text {message}"));
        }
        fn clear(&mut self) {
            self.0.borrow_mut().events.push("overlay clear".into());
        }
        fn fade_in(&mut self, duration_s: f64) {
            self.0.borrow_mut().events.push(format!("fade {duration_s}"));
        }
    }

    fn collaborators() -> (Collaborators, Shared) {
        let log = Shared::default();
        let io = Collaborators::new(
            Box::new(Player(log.clone())),
            Box::new(Display(log.clone())),
            Box::new(Screen(log.clone())),
        );
        (io, log)
    }

    fn table(n_trials: u32, n_arms: u32) -> OrderTable {
        let rows = (1..=n_trials)
            .flat_map(|trial| {
                (1..=n_arms).map(move |arm| crate::order::OrderRow {
                    trial,
                    arm,
                    blur_level: arm - 1,
                    stimulus_id: format!("img{arm}"),
                    sigma: 10.0,
                })
            })
            .collect();
        OrderTable::from_rows(rows).unwrap()
    }

    fn ctx(trial: u32, trial_s: f64) -> TickContext {
        TickContext {
            trial,
            session_s: trial_s,
            trial_s,
            dt: 0.0,
        }
    }

    #[test]
    fn setup_places_every_arm_and_schedules_timeline() {
        let (mut io, log) = collaborators();
        let mut pcrm = Pcrm::new(&SessionConfig::default());
        let mut scheduler = TrialScheduler::new();
        scheduler.begin_generation();

        pcrm.setup_trial(1, &table(2, 2), &mut io, &mut scheduler).unwrap();

        assert_eq!(pcrm.handles().len(), 4);
        let inner = &pcrm.handles()[2];
        assert_eq!((inner.site, inner.position, inner.blur_level), (Site::Inner, 2, 1));
        assert!(inner.asset.ends_with("img2_1.jpg"));
        let outer = &pcrm.handles()[3];
        assert_eq!((outer.site, outer.position, outer.blur_level), (Site::Outer, 2, 0));
        assert!(outer.asset.ends_with("img2.jpg"));
        // Instructions, 3 rotation stages, 5 later steps.
        assert_eq!(scheduler.pending(), 9);
        assert_eq!(pcrm.offsets().unwrap().total(), 2.0 + 6.0 + 3.0 + 25.0 + 5.0 + 2.0);
        assert!(log.borrow().events.contains(&"reset".to_string()));
    }

    #[test]
    fn failed_placement_clears_partial_trial() {
        let (mut io, _log) = collaborators();
        let mut config = SessionConfig::default();
        config.assets.stimuli_dir = PathBuf::from("broken");
        let mut pcrm = Pcrm::new(&config);
        let mut scheduler = TrialScheduler::new();
        scheduler.begin_generation();

        assert!(pcrm.setup_trial(1, &table(1, 2), &mut io, &mut scheduler).is_err());
        assert!(pcrm.handles().is_empty());
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn rotation_direction_alternates_and_interpolates() {
        let (mut io, log) = collaborators();
        let mut pcrm = Pcrm::new(&SessionConfig::default());
        let mut scheduler = TrialScheduler::new();
        let order = table(2, 2);

        for (trial, sign) in [(1u32, 1.0f32), (2, -1.0)] {
            scheduler.begin_generation();
            pcrm.setup_trial(trial, &order, &mut io, &mut scheduler).unwrap();
            pcrm.perform(MazeAction::RotationStage(1), &ctx(trial, 4.0), &mut io)
                .unwrap();
            assert!(pcrm.is_rotating());
            pcrm.per_tick(&ctx(trial, 5.0), &mut io);
            let heading = *log.borrow().headings.last().unwrap();
            assert!((heading - sign * 60.0).abs() < 1e-4, "trial {trial}: {heading}");

            pcrm.perform(MazeAction::ShowSecondInstructions, &ctx(trial, 8.0), &mut io)
                .unwrap();
            assert!(!pcrm.is_rotating());
            let heading = *log.borrow().headings.last().unwrap();
            assert!((heading - sign * 80.0).abs() < 1e-4);
        }
    }

    #[test]
    fn timeline_actions_drive_collaborators() {
        let (mut io, log) = collaborators();
        let mut pcrm = Pcrm::new(&SessionConfig::default());

        let step = pcrm
            .perform(MazeAction::ShowInstructions, &ctx(1, 0.0), &mut io)
            .unwrap();
        assert_eq!(step, Step::Continue);
        pcrm.perform(MazeAction::FadeWarning, &ctx(1, 40.0), &mut io)
            .unwrap();
        pcrm.perform(MazeAction::TimeUp, &ctx(1, 45.0), &mut io).unwrap();
        let step = pcrm
            .perform(MazeAction::NextTrial, &ctx(1, 47.0), &mut io)
            .unwrap();
        assert_eq!(step, Step::NextTrial);

        let events = &log.borrow().events;
        assert_eq!(
            events.as_slice(),
            [
                "text This is the next floor of the museum.",
                "pause",
                "fade 5",
                "pause",
                "text Time is up.",
            ]
        );
    }

    #[test]
    fn load_stimulus_replaces_position() {
        let (mut io, _log) = collaborators();
        let mut pcrm = Pcrm::new(&SessionConfig::default());
        pcrm.test_stimuli(&mut io).unwrap();
        pcrm.load_stimulus(&mut io, Path::new("a.png"), 3).unwrap();
        pcrm.load_stimulus(&mut io, Path::new("b.png"), 3).unwrap();
        assert_eq!(pcrm.handles().len(), 2 * ARMS as usize);
        let at_three: Vec<_> = pcrm.handles().iter().filter(|h| h.position == 3).collect();
        assert_eq!(at_three.len(), 2);
        assert!(at_three.iter().any(|h| h.site == Site::Outer && h.asset.ends_with("013.png")));
        assert!(at_three.iter().any(|h| h.site == Site::Inner && h.asset == Path::new("b.png")));

        let err = pcrm
            .load_stimulus(&mut io, Path::new("c.png"), ARMS + 1)
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn demo_fills_every_arm() {
        let (mut io, _log) = collaborators();
        let mut pcrm = Pcrm::new(&SessionConfig::default());
        assert_eq!(pcrm.demo(&mut io).unwrap(), 2 * ARMS as usize);
        for handle in pcrm.handles() {
            let expected = if handle.site == Site::Inner { 10 } else { 0 };
            assert_eq!(handle.blur_level, expected);
        }
        assert!(pcrm.handles()[0].asset.ends_with("001.png"));
        assert!(pcrm.handles()[1].asset.ends_with("001.png"));
        pcrm.clear_stimuli(&mut io);
        assert!(pcrm.handles().is_empty());
    }
}
