pub mod config;
pub mod console;
pub mod effort;
pub mod maze;
pub mod order;
pub mod protocol;
pub mod scheduler;
pub mod state;
pub mod trial;

pub use config::{AssetConfig, EffortConfig, Messages, RecordingConfig, SessionConfig, TimelineConfig};
pub use console::{CommandDispatcher, Reply};
pub use effort::EffortEstimator;
pub use maze::{MazeAction, Pcrm};
pub use order::{AssetResolver, OrderRow, OrderSpec, OrderTable};
pub use protocol::{Protocol, Step, TickContext};
pub use scheduler::{Generation, TrialScheduler};
pub use state::SessionController;
pub use trial::{TimelineOffsets, TrialTimestamps};
