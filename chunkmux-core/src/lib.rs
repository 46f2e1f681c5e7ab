//! Chunkmux Core - Progressive in-browser style remuxing
//!
//! This crate provides the building blocks for playing a media file while
//! it is being remuxed chunk by chunk: a correlated message channel between
//! a controller and a worker context, an RPC layer on top of it, the
//! worker-side transcoding session wrapping a media engine, the codec
//! compatibility resolver, and the controller-side playback buffer.

pub mod channel;
pub mod compat;
pub mod config;
pub mod engine;
pub mod playback;
pub mod rpc;
pub mod session;
pub mod tracing_setup;
pub mod worker;

// Re-export main types for convenient access
pub use channel::ChannelError;
pub use compat::{CompatError, ContainerMapping};
pub use config::ChunkmuxConfig;
pub use engine::{EngineError, FfmpegEngine, MediaEngine};
pub use playback::{BufferController, PlaybackError, PlaybackSink, SinkError};
pub use rpc::{ErrorKind, RpcError};
pub use session::{SessionError, TranscodeSession};
pub use worker::{RemuxService, RemuxerHandle, spawn_worker};

/// Errors that can bubble up from any Chunkmux subsystem.
#[derive(Debug, thiserror::Error)]
pub enum ChunkmuxError {
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Compatibility error: {0}")]
    Compat(#[from] CompatError),

    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChunkmuxError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            ChunkmuxError::Rpc(e) | ChunkmuxError::Playback(PlaybackError::Remuxer(e)) => {
                rpc_user_message(e)
            }
            ChunkmuxError::Session(e) => e.to_string(),
            ChunkmuxError::Compat(CompatError::UnsupportedFormat { format }) => {
                format!("Unsupported media format: {format}")
            }
            ChunkmuxError::Engine(EngineError::Unavailable { .. }) => {
                "ffmpeg could not be started; check CHUNKMUX_FFMPEG_PATH".to_string()
            }
            ChunkmuxError::Engine(_) => "Media engine error occurred".to_string(),
            ChunkmuxError::Sink(SinkError::UnsupportedMimeType { mime_type })
            | ChunkmuxError::Playback(PlaybackError::Sink(SinkError::UnsupportedMimeType {
                mime_type,
            })) => format!("This player cannot play {mime_type}"),
            ChunkmuxError::Channel(_) => "Lost connection to the remuxing worker".to_string(),
            ChunkmuxError::Playback(_) | ChunkmuxError::Sink(_) => {
                "Playback error occurred".to_string()
            }
            ChunkmuxError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to the input media or caller arguments.
    pub fn is_user_error(&self) -> bool {
        let kind = match self {
            ChunkmuxError::Rpc(e) | ChunkmuxError::Playback(PlaybackError::Remuxer(e)) => e.kind(),
            ChunkmuxError::Session(e) => Some(e.kind()),
            ChunkmuxError::Compat(_) => return true,
            _ => None,
        };
        matches!(
            kind,
            Some(
                ErrorKind::StreamNotFound
                    | ErrorKind::UnsupportedFormat
                    | ErrorKind::InvalidArguments
            )
        )
    }
}

fn rpc_user_message(error: &RpcError) -> String {
    match error {
        RpcError::Rejected(_) => error
            .remote_error()
            .map(|remote| remote.message)
            .unwrap_or_else(|| "The remuxing worker rejected the request".to_string()),
        RpcError::Disconnected => "Lost connection to the remuxing worker".to_string(),
        RpcError::Timeout { .. } => "The remuxing worker did not answer in time".to_string(),
        RpcError::Decode(_) => "Unexpected reply from the remuxing worker".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, ChunkmuxError>;
