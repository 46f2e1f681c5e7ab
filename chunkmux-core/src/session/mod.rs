//! Worker-side transcoding session.
//!
//! [`TranscodeSession`] owns the media engine and enforces the lifecycle
//! `load -> setInputFile -> getMetadata -> remuxChunk`. The engine is not
//! reentrant, so every entry point except `is_loaded` requires `Idle`.

pub mod diagnostics;
pub mod methods;
pub mod state;
pub mod transcode;
pub mod types;

use std::time::Duration;

use thiserror::Error;

pub use methods::{METHOD_NAMES, session_methods};
pub use state::SessionState;
pub use transcode::TranscodeSession;
pub use types::{
    ChunkRequest, InputFile, MediaMetadata, RemuxedChunk, RemuxedChunks, StreamDescriptor,
    TrackKind,
};

use crate::engine::EngineError;
use crate::rpc::{ErrorKind, RemoteError};

/// Errors raised by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Cannot {operation}: expected state {expected}, current state is {actual}")]
    InvalidState {
        operation: &'static str,
        expected: SessionState,
        actual: SessionState,
    },

    #[error("Cannot {operation}: no file set as input with setInputFile")]
    NoInput { operation: &'static str },

    #[error("No {kind} stream found with id {stream_id}")]
    StreamNotFound { kind: TrackKind, stream_id: String },

    #[error("Stream {stream_id} has unsupported format: {format}")]
    UnsupportedFormat { stream_id: String, format: String },

    #[error("Invalid arguments: {reason}")]
    InvalidArguments { reason: String },

    #[error("Media engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Media engine did not finish within {after:?}")]
    EngineTimeout { after: Duration },
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::InvalidState { .. } => ErrorKind::InvalidState,
            SessionError::NoInput { .. } => ErrorKind::NoInput,
            SessionError::StreamNotFound { .. } => ErrorKind::StreamNotFound,
            SessionError::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            SessionError::InvalidArguments { .. } => ErrorKind::InvalidArguments,
            SessionError::Engine(_) => ErrorKind::Engine,
            SessionError::EngineTimeout { .. } => ErrorKind::EngineTimeout,
        }
    }
}

impl From<SessionError> for RemoteError {
    fn from(error: SessionError) -> Self {
        let remote = RemoteError::new(error.kind(), error.to_string());
        match error {
            SessionError::StreamNotFound { stream_id, .. }
            | SessionError::UnsupportedFormat { stream_id, .. } => remote.with_stream(stream_id),
            _ => remote,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_errors_name_the_stream() {
        let remote = RemoteError::from(SessionError::UnsupportedFormat {
            stream_id: "0:3".to_string(),
            format: "hevc (Main)".to_string(),
        });

        assert_eq!(remote.kind, ErrorKind::UnsupportedFormat);
        assert_eq!(remote.stream_id.as_deref(), Some("0:3"));
        assert!(remote.message.contains("hevc"));
    }

    #[test]
    fn test_state_errors_are_programming_errors() {
        let error = SessionError::InvalidState {
            operation: "load",
            expected: SessionState::Uninitialized,
            actual: SessionState::Idle,
        };

        assert!(error.kind().is_programming_error());
        assert_eq!(
            error.to_string(),
            "Cannot load: expected state Uninitialized, current state is Idle"
        );
        assert_eq!(RemoteError::from(error).stream_id, None);
    }
}
