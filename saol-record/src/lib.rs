//! Buffered tabular recording for session data.
//!
//! [`TableWriter`] is a generic ordered-row serializer; [`DataRecorder`] owns
//! the two per-session buffers (trajectory and effort) and saves them through
//! it.

pub mod recorder;
pub mod table;

pub use recorder::{DataRecorder, SaveReport, SessionSummary, TsvName, PREALLOC_SAMPLES};
pub use table::{Encoding, TableWriter, WriteStats};
