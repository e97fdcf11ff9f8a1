pub mod collab;
pub mod error;
pub mod mode;
pub mod sample;

pub use collab::{Collaborators, Overlay, PlayerMotion, Site, StimulusDisplay, StimulusHandle};
pub use error::{Result, ResultExt, SaolError};
pub use mode::Mode;
pub use sample::{EffortSample, PositionSample, TrialSummary};
