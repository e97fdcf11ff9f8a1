//! Per-variant hooks driven by the session controller.
//!
//! The controller owns mode, trial counter, scheduler and recorder; a
//! [`Protocol`] decides what a session and a trial look like. Scheduled
//! actions are values of the protocol's own action type, so the scheduler
//! never holds closures that capture controller state.

use std::fmt;

use saol_core::{Collaborators, PositionSample, Result};

use crate::order::OrderTable;
use crate::scheduler::TrialScheduler;

/// What the controller should do after an action ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    NextTrial,
}

/// Times seen by the protocol on a tick, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickContext {
    pub trial: u32,
    /// Since session start.
    pub session_s: f64,
    /// Since trial onset.
    pub trial_s: f64,
    /// Since the previous tick.
    pub dt: f64,
}

pub trait Protocol {
    type Action: Clone + fmt::Debug;

    fn name(&self) -> &str;

    /// Called once by `start`, before the first trial.
    fn setup_session(&mut self, io: &mut Collaborators) -> Result<()>;

    /// Prepare trial `trial` and enqueue its timeline. An error aborts the
    /// trial and stops the session.
    fn setup_trial(
        &mut self,
        trial: u32,
        order: &OrderTable,
        io: &mut Collaborators,
        scheduler: &mut TrialScheduler<Self::Action>,
    ) -> Result<()>;

    fn perform(
        &mut self,
        action: Self::Action,
        ctx: &TickContext,
        io: &mut Collaborators,
    ) -> Result<Step>;

    /// Continuous per-tick work (animations). Runs before due actions.
    fn per_tick(&mut self, _ctx: &TickContext, _io: &mut Collaborators) {}

    fn end_trial(&mut self, trial: u32, io: &mut Collaborators);

    fn end_session(&mut self, io: &mut Collaborators);

    /// Drop every placed stimulus and any in-flight animation.
    fn clear(&mut self, io: &mut Collaborators);

    /// The sample recorded for this tick.
    fn per_tick_log(&self, ctx: &TickContext, io: &Collaborators) -> PositionSample {
        let (x, z) = io.player.position();
        PositionSample {
            trial: ctx.trial,
            t: ctx.session_s,
            x,
            z,
            heading: io.player.heading(),
        }
    }
}
