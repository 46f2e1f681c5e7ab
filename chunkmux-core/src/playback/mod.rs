//! Controller-side playback buffering.
//!
//! A [`BufferController`] owns one remuxing worker and one [`PlaybackSink`].
//! It watches the playback position, keeps at most one chunk fetch in
//! flight, and appends the resulting track payloads to the sink.

pub mod controller;
pub mod ranges;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_mocks;

use bytes::Bytes;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::mpsc;

pub use controller::BufferController;
pub use ranges::{BufferedRange, next_unbuffered_time};

use crate::rpc::RpcError;

/// Signal that one append has been committed to (or refused by) the sink.
pub type AppendCompletion = BoxFuture<'static, Result<(), SinkError>>;

/// Errors reported by a playback sink.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SinkError {
    #[error("Unsupported MIME type: {mime_type}")]
    UnsupportedMimeType { mime_type: String },

    #[error("Append failed: {reason}")]
    AppendFailed { reason: String },

    #[error("Playback sink closed")]
    Closed,
}

/// Errors raised by the buffer controller.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("Remuxer call failed: {0}")]
    Remuxer(#[from] RpcError),

    #[error("Playback sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("No media loaded; call load_media first")]
    NoMedia,

    #[error("Media already loaded into this controller")]
    AlreadyLoaded,
}

/// Host playback surface that consumes appended chunks.
///
/// Mirrors a browser media element with an attached media source: endpoints
/// are per-track source buffers, and appends complete asynchronously.
pub trait PlaybackSink: Send {
    /// Handle to one per-track buffer.
    type Endpoint: Send + Sync + 'static;

    fn set_duration(&mut self, seconds: f64);

    /// # Errors
    /// - `SinkError::UnsupportedMimeType` - The sink cannot play this MIME type
    fn create_endpoint(&mut self, mime_type: &str) -> Result<Self::Endpoint, SinkError>;

    /// Starts appending `data`; the returned future resolves once committed.
    fn append(&mut self, endpoint: &Self::Endpoint, data: Bytes) -> AppendCompletion;

    /// Buffered time ranges of one endpoint, ordered by start.
    fn buffered_ranges(&self, endpoint: &Self::Endpoint) -> Vec<BufferedRange>;

    fn current_position(&self) -> f64;

    /// Stream of playback positions, one per position change.
    fn position_changes(&mut self) -> mpsc::UnboundedReceiver<f64>;
}
