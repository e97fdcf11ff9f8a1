pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock, TickStats};
