use std::fmt;

/// Lifecycle of a session controller
#[derive(Copy, Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Uninitialized,
    Ready,
    Running,
    Stopped,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Uninitialized
    }
}

impl Mode {
    /// A new order table may only be installed while no session is running.
    pub fn accepts_order(&self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn can_start(&self) -> bool {
        matches!(self, Self::Ready)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Uninitialized => "uninitialized",
            Mode::Ready => "ready",
            Mode::Running => "running",
            Mode::Stopped => "stopped",
        };
        f.write_str(name)
    }
}
