//! Lifecycle states of a transcoding session.

use std::fmt;

/// Where a session is in its lifecycle.
///
/// `Uninitialized --load--> Initializing --engine ready--> Idle`, and
/// `Idle --engine invocation--> Busy --end marker--> Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    Uninitialized,
    Initializing,
    Idle,
    /// The engine is running and must not be invoked again
    Busy,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Uninitialized => "Uninitialized",
            SessionState::Initializing => "Initializing",
            SessionState::Idle => "Idle",
            SessionState::Busy => "Busy",
        }
    }

    /// True once `load` has been called, whether or not it has finished.
    pub fn is_loaded(self) -> bool {
        self != SessionState::Uninitialized
    }

    /// Only an idle session accepts new work.
    pub fn accepts_work(self) -> bool {
        self == SessionState::Idle
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
