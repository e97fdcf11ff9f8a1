//! Error handling shared by the SAOL crates
//!
//! Every fallible operation in the session controller, order table loader and
//! data recorder reports a [`SaolError`]. The variants map onto the four
//! failure families the operator console distinguishes: validation of
//! externally authored data, rejected state transitions, filesystem failures
//! and bad arguments.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for session operations
#[derive(Error, Debug)]
pub enum SaolError {
    /// A row of the order table could not be parsed
    #[error("Malformed order row at {path}:{line}: {message}")]
    MalformedRow {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// A stimulus referenced by the order table does not exist on disk
    #[error("Could not locate {asset} needed by order file {order_file}")]
    MissingAsset { asset: PathBuf, order_file: PathBuf },

    /// Trial or arm index outside of the loaded table
    #[error("{what} {value} is out of range 1..={max}")]
    OutOfRange {
        what: &'static str,
        value: u32,
        max: u32,
    },

    /// Rows are not laid out as trial-major, arm-minor
    #[error("Order table layout error at row {index}: {message}")]
    Layout { index: usize, message: String },

    /// Other data validation failures
    #[error("Validation error: {0}")]
    Validation(String),

    /// Command issued in an incompatible mode
    #[error("{0}")]
    State(String),

    /// Bad command arguments or disallowed file names
    #[error("Argument error: {0}")]
    Argument(String),

    /// Errors related to configuration loading/validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<SaolError>,
    },
}

impl SaolError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        SaolError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    pub fn state(message: impl Into<String>) -> Self {
        SaolError::State(message.into())
    }

    pub fn argument(message: impl Into<String>) -> Self {
        SaolError::Argument(message.into())
    }

    /// True for the validation family (malformed rows, missing assets, bad indices).
    pub fn is_validation(&self) -> bool {
        match self {
            SaolError::MalformedRow { .. }
            | SaolError::MissingAsset { .. }
            | SaolError::OutOfRange { .. }
            | SaolError::Layout { .. }
            | SaolError::Validation(_) => true,
            SaolError::WithContext { source, .. } => source.is_validation(),
            _ => false,
        }
    }

    pub fn is_state(&self) -> bool {
        match self {
            SaolError::State(_) => true,
            SaolError::WithContext { source, .. } => source.is_state(),
            _ => false,
        }
    }
}

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, SaolError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| SaolError::Io(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| SaolError::Io(e).with_context(f()))
    }
}
