//! Boundary to the external media engine.
//!
//! The engine is a single-threaded, non-reentrant resource. Each invocation
//! takes an argv, may write artifacts into the engine-visible filesystem, and
//! emits human-readable diagnostic lines followed by a terminal marker line.

pub mod ffmpeg;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_mocks;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{trace, warn};

pub use ffmpeg::FfmpegEngine;

use crate::tracing_setup::ENGINE_TARGET;

/// Errors raised by a media engine implementation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Engine has not been loaded")]
    NotLoaded,

    #[error("Engine unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Engine invocation failed: {reason}")]
    InvocationFailed { reason: String },

    #[error("Diagnostic stream closed before the end marker")]
    DiagnosticsClosed,

    #[error("File not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("I/O error during {operation} on {}: {source}", path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    pub(crate) fn io(operation: &'static str, path: &Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            EngineError::FileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            EngineError::Io {
                operation,
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// The media engine as seen by a transcoding session.
///
/// Implementations must emit the configured end marker on the diagnostic
/// stream before `invoke` returns `Ok`. A new invocation is only started
/// after the previous one's marker has been consumed.
#[async_trait]
pub trait MediaEngine: Send {
    /// One-time initialization. Diagnostic lines of every later invocation
    /// are sent through `diagnostics`.
    ///
    /// # Errors
    /// - `EngineError::Unavailable` - The engine cannot be started
    async fn load(&mut self, diagnostics: DiagnosticSender) -> Result<(), EngineError>;

    /// Runs the engine once and returns its exit code.
    ///
    /// A non-zero exit code is not an error at this layer; callers decide
    /// what it means for their operation.
    ///
    /// # Errors
    /// - `EngineError::NotLoaded` - `load` has not completed
    /// - `EngineError::InvocationFailed` - The engine could not be run at all
    async fn invoke(&mut self, argv: &[String]) -> Result<i32, EngineError>;

    /// # Errors
    /// - `EngineError::Io` - Directory could not be created
    async fn create_dir_all(&mut self, path: &Path) -> Result<(), EngineError>;

    /// # Errors
    /// - `EngineError::Io` - File could not be written
    async fn write_file(&mut self, path: &Path, data: Bytes) -> Result<(), EngineError>;

    /// # Errors
    /// - `EngineError::FileNotFound` - Nothing exists at `path`
    /// - `EngineError::Io` - File could not be read
    async fn read_file(&mut self, path: &Path) -> Result<Bytes, EngineError>;

    /// # Errors
    /// - `EngineError::FileNotFound` - Nothing exists at `path`
    /// - `EngineError::Io` - File could not be removed
    async fn remove_file(&mut self, path: &Path) -> Result<(), EngineError>;
}

/// Creates the diagnostic line stream handed to [`MediaEngine::load`].
pub fn diagnostic_stream() -> (DiagnosticSender, DiagnosticStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (DiagnosticSender { inner: tx }, DiagnosticStream { inner: rx })
}

/// Engine side of the diagnostic stream.
#[derive(Debug, Clone)]
pub struct DiagnosticSender {
    inner: mpsc::UnboundedSender<String>,
}

impl DiagnosticSender {
    /// Emits one line. Lines sent after the session went away are dropped.
    pub fn line(&self, line: impl Into<String>) {
        let _ = self.inner.send(line.into());
    }
}

/// Session side of the diagnostic stream.
pub struct DiagnosticStream {
    inner: mpsc::UnboundedReceiver<String>,
}

impl DiagnosticStream {
    /// Waits for lines until `marker` arrives and returns everything before it.
    ///
    /// Every line is forwarded to tracing under the engine target.
    ///
    /// # Errors
    /// - `EngineError::DiagnosticsClosed` - The engine dropped its sender first
    pub async fn collect_until(&mut self, marker: &str) -> Result<Vec<String>, EngineError> {
        let mut lines = Vec::new();
        while let Some(line) = self.inner.recv().await {
            trace!(target: ENGINE_TARGET, "{}", line);
            if line == marker {
                return Ok(lines);
            }
            lines.push(line);
        }
        warn!(
            "Engine diagnostic stream closed after {} lines without end marker",
            lines.len()
        );
        Err(EngineError::DiagnosticsClosed)
    }

    /// Drops lines left over from an earlier invocation.
    pub fn discard_pending(&mut self) -> usize {
        let mut discarded = 0;
        while let Ok(line) = self.inner.try_recv() {
            trace!(target: ENGINE_TARGET, "{}", line);
            discarded += 1;
        }
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collect_stops_at_marker() {
        let (sender, mut stream) = diagnostic_stream();
        sender.line("Input #0, matroska,webm, from 'input/movie.mkv':");
        sender.line("  Duration: 00:00:10.00, start: 0.000000, bitrate: 1 kb/s");
        sender.line("FFMPEG_END");
        sender.line("  Stream #0:9: Video: h264");

        let lines = stream.collect_until("FFMPEG_END").await.unwrap();

        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("Duration"));
        assert_eq!(stream.discard_pending(), 1);
    }

    #[tokio::test]
    async fn test_collect_fails_when_sender_dropped() {
        let (sender, mut stream) = diagnostic_stream();
        sender.line("partial output");
        drop(sender);

        let err = stream.collect_until("FFMPEG_END").await.unwrap_err();
        assert!(matches!(err, EngineError::DiagnosticsClosed));
    }

    #[test]
    fn test_not_found_io_error_maps_to_file_not_found() {
        let err = EngineError::io(
            "read",
            Path::new("/work/output/video"),
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        assert!(matches!(err, EngineError::FileNotFound { .. }));

        let err = EngineError::io(
            "read",
            Path::new("/work/output/video"),
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert!(matches!(err, EngineError::Io { operation: "read", .. }));
    }
}
