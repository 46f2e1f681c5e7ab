//! Media engine backed by the ffmpeg binary.

use std::path::Path;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use super::{DiagnosticSender, EngineError, MediaEngine};
use crate::config::EngineConfig;

/// Runs one ffmpeg process per invocation inside the configured work directory.
///
/// Standard error is forwarded line by line to the diagnostic stream. The
/// child is killed if the invocation future is dropped.
pub struct FfmpegEngine {
    config: EngineConfig,
    diagnostics: Option<DiagnosticSender>,
}

impl FfmpegEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            diagnostics: None,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.config.ffmpeg_path);
        cmd.args(&self.config.default_args)
            .current_dir(&self.config.work_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl MediaEngine for FfmpegEngine {
    async fn load(&mut self, diagnostics: DiagnosticSender) -> Result<(), EngineError> {
        let work_dir = self.config.work_dir.clone();
        self.create_dir_all(&work_dir).await?;

        let output = self
            .command()
            .arg("-version")
            .output()
            .await
            .map_err(|e| EngineError::Unavailable {
                reason: format!(
                    "Failed to run {}: {e}",
                    self.config.ffmpeg_path.display()
                ),
            })?;

        if !output.status.success() {
            return Err(EngineError::Unavailable {
                reason: format!(
                    "{} -version exited with {}",
                    self.config.ffmpeg_path.display(),
                    output.status
                ),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        info!(
            "Media engine ready: {}",
            stdout.lines().next().unwrap_or("unknown version")
        );

        self.diagnostics = Some(diagnostics);
        Ok(())
    }

    async fn invoke(&mut self, argv: &[String]) -> Result<i32, EngineError> {
        let diagnostics = self.diagnostics.clone().ok_or(EngineError::NotLoaded)?;
        let start_time = Instant::now();

        let mut cmd = self.command();
        cmd.args(argv).stdout(Stdio::null()).stderr(Stdio::piped());

        debug!("Executing ffmpeg with arguments: {:?}", argv);

        let mut child = cmd.spawn().map_err(|e| EngineError::InvocationFailed {
            reason: format!(
                "Failed to execute {}: {e}",
                self.config.ffmpeg_path.display()
            ),
        })?;

        if let Some(stderr) = child.stderr.take() {
            let mut segments = BufReader::new(stderr).split(b'\n');
            while let Some(segment) =
                segments
                    .next_segment()
                    .await
                    .map_err(|e| EngineError::InvocationFailed {
                        reason: format!("Failed to read ffmpeg output: {e}"),
                    })?
            {
                let line = String::from_utf8_lossy(&segment);
                diagnostics.line(line.trim_end_matches('\r'));
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| EngineError::InvocationFailed {
                reason: format!("Failed to wait for ffmpeg: {e}"),
            })?;

        diagnostics.line(self.config.end_marker.clone());

        debug!(
            "ffmpeg finished with {} in {:.2}s",
            status,
            start_time.elapsed().as_secs_f64()
        );

        // Killed by a signal
        Ok(status.code().unwrap_or(-1))
    }

    async fn create_dir_all(&mut self, path: &Path) -> Result<(), EngineError> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| EngineError::io("create directory", path, e))
    }

    async fn write_file(&mut self, path: &Path, data: Bytes) -> Result<(), EngineError> {
        tokio::fs::write(path, &data)
            .await
            .map_err(|e| EngineError::io("write", path, e))
    }

    async fn read_file(&mut self, path: &Path) -> Result<Bytes, EngineError> {
        tokio::fs::read(path)
            .await
            .map(Bytes::from)
            .map_err(|e| EngineError::io("read", path, e))
    }

    async fn remove_file(&mut self, path: &Path) -> Result<(), EngineError> {
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| EngineError::io("remove", path, e))
    }
}
