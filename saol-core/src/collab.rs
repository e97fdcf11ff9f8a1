//! Narrow interfaces to the collaborators a session drives.
//!
//! Geometry, textures and overlay rendering live outside this workspace. The
//! controller only ever talks to them through these traits, so a frontend
//! (or a test fake) supplies the implementations at construction time.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// First-person player: position source and input gate.
pub trait PlayerMotion {
    /// Ground-plane position `(x, z)`.
    fn position(&self) -> (f32, f32);
    /// Heading around the vertical axis, in degrees.
    fn heading(&self) -> f32;
    fn pause(&mut self);
    fn unpause(&mut self);
    /// Teleport back to the maze center facing the first arm.
    fn reset(&mut self);
    /// Force the heading, in degrees.
    fn look(&mut self, heading_deg: f32);
}

/// Where in an arm a stimulus hangs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Site {
    /// On the hub wall at the arm entrance, visible from the center.
    Inner,
    /// At the far end of the arm, seen only after walking down it.
    Outer,
}

/// Places stimulus images into maze arms.
pub trait StimulusDisplay {
    /// Place `asset` at `site` of 1-based arm `position`. The returned handle
    /// owns the placement until it is dropped with the rest of the trial
    /// state.
    fn place(
        &mut self,
        site: Site,
        position: u32,
        asset: &Path,
        blur_level: u32,
    ) -> Result<StimulusHandle>;
    fn clear_all(&mut self);
}

/// Full-screen 2D overlay for instructions and warnings.
pub trait Overlay {
    fn show_text(&mut self, message: &str);
    fn clear(&mut self);
    fn fade_in(&mut self, duration_s: f64);
}

/// A stimulus currently shown in one arm.
#[derive(Debug, Clone, PartialEq)]
pub struct StimulusHandle {
    pub site: Site,
    pub position: u32,
    pub asset: PathBuf,
    pub blur_level: u32,
}

/// The set of collaborators injected into a session controller.
pub struct Collaborators {
    pub player: Box<dyn PlayerMotion>,
    pub stimuli: Box<dyn StimulusDisplay>,
    pub overlay: Box<dyn Overlay>,
}

impl Collaborators {
    pub fn new(
        player: Box<dyn PlayerMotion>,
        stimuli: Box<dyn StimulusDisplay>,
        overlay: Box<dyn Overlay>,
    ) -> Self {
        Self {
            player,
            stimuli,
            overlay,
        }
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
