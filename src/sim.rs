//! Headless collaborators.
//!
//! The maze geometry, textures and overlay live in a rendering frontend. When
//! the controller runs from a terminal these stand-ins keep the player's
//! pose, check that stimulus images exist, and log overlay traffic.

use std::path::Path;

use saol_core::{Overlay, PlayerMotion, Result, SaolError, Site, StimulusDisplay, StimulusHandle};
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct SimPlayer {
    x: f32,
    z: f32,
    heading: f32,
    paused: bool,
}

impl SimPlayer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlayerMotion for SimPlayer {
    fn position(&self) -> (f32, f32) {
        (self.x, self.z)
    }

    fn heading(&self) -> f32 {
        self.heading
    }

    fn pause(&mut self) {
        if !self.paused {
            debug!("Player input paused");
        }
        self.paused = true;
    }

    fn unpause(&mut self) {
        if self.paused {
            debug!("Player input released");
        }
        self.paused = false;
    }

    fn reset(&mut self) {
        self.x = 0.0;
        self.z = 0.0;
        self.heading = 0.0;
    }

    fn look(&mut self, heading_deg: f32) {
        self.heading = heading_deg.rem_euclid(360.0);
    }
}

/// Accepts any image that exists on disk.
#[derive(Debug, Default)]
pub struct FsStimulusDisplay {
    placed: usize,
}

impl StimulusDisplay for FsStimulusDisplay {
    fn place(
        &mut self,
        site: Site,
        position: u32,
        asset: &Path,
        blur_level: u32,
    ) -> Result<StimulusHandle> {
        if !asset.is_file() {
            return Err(SaolError::Validation(format!(
                "stimulus image {} does not exist",
                asset.display()
            )));
        }
        self.placed += 1;
        debug!(
            "Arm {} {:?}: {} (blur {})",
            position,
            site,
            asset.display(),
            blur_level
        );
        Ok(StimulusHandle {
            site,
            position,
            asset: asset.to_path_buf(),
            blur_level,
        })
    }

    fn clear_all(&mut self) {
        if self.placed > 0 {
            debug!("Removed {} stimuli", self.placed);
        }
        self.placed = 0;
    }
}

#[derive(Debug, Default)]
pub struct LogOverlay;

impl Overlay for LogOverlay {
    fn show_text(&mut self, message: &str) {
        info!("[overlay] {}", message);
    }

    fn clear(&mut self) {
        debug!("[overlay] cleared");
    }

    fn fade_in(&mut self, duration_s: f64) {
        info!("[overlay] fading in over {:.1}s", duration_s);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_heading_wraps() {
        let mut player = SimPlayer::new();
        player.look(-40.0);
        assert_eq!(player.heading(), 320.0);
        player.reset();
        assert_eq!(player.heading(), 0.0);
    }

    #[test]
    fn display_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("001.png");
        let mut display = FsStimulusDisplay::default();
        assert!(display.place(Site::Inner, 1, &image, 0).is_err());

        std::fs::write(&image, b"png").unwrap();
        let handle = display.place(Site::Outer, 1, &image, 3).unwrap();
        assert_eq!(handle.blur_level, 3);
        assert_eq!(handle.site, Site::Outer);
    }
}
