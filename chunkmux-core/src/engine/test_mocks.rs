//! Scripted media engine for tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use super::{DiagnosticSender, EngineError, MediaEngine};
use crate::config::EngineConfig;

/// Diagnostic output of `ffmpeg -i` on a small Matroska file.
pub const SAMPLE_PROBE_OUTPUT: &[&str] = &[
    "Input #0, matroska,webm, from 'input/sample.mkv':",
    "  Metadata:",
    "    encoder         : libebml v1.3.10 + libmatroska v1.5.2",
    "  Duration: 00:01:30.50, start: 0.000000, bitrate: 1205 kb/s",
    "  Stream #0:0(eng): Video: h264 (High), yuv420p(progressive), 1280x720, 23.98 fps (default)",
    "  Stream #0:1(jpn): Audio: aac (LC), 48000 Hz, stereo, fltp (default)",
    "  Stream #0:2(eng): Audio: opus, 48000 Hz, stereo, fltp",
    "  Stream #0:3(eng): Subtitle: ass",
    "At least one output file must be specified",
];

/// How the next invocations should behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InvokeMode {
    Normal,
    /// Never finishes, like a wedged engine
    Hang,
    /// Fails before producing any diagnostic output
    Fail,
}

#[derive(Debug)]
struct MockState {
    loaded: bool,
    fail_load: bool,
    mode: InvokeMode,
    remux_exit_code: i32,
    probe_lines: Vec<String>,
    trailing_lines: Vec<String>,
    chunk_outputs: HashMap<String, Bytes>,
    files: HashMap<PathBuf, Bytes>,
    invocations: Vec<Vec<String>>,
}

/// In-memory engine that answers probes with canned diagnostic lines and
/// remux runs with canned chunk bytes.
///
/// Clones share state, so a test can keep one clone to inspect what the
/// session did with the other.
#[derive(Debug, Clone)]
pub struct MockEngine {
    state: Arc<Mutex<MockState>>,
    end_marker: String,
    diagnostics: Option<DiagnosticSender>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    /// Creates an engine that reports [`SAMPLE_PROBE_OUTPUT`] and produces
    /// small fixed payloads for `video` and `audio` outputs.
    pub fn new() -> Self {
        let mut chunk_outputs = HashMap::new();
        chunk_outputs.insert("video".to_string(), Bytes::from(vec![0x56; 2048]));
        chunk_outputs.insert("audio".to_string(), Bytes::from(vec![0x41; 512]));

        Self {
            state: Arc::new(Mutex::new(MockState {
                loaded: false,
                fail_load: false,
                mode: InvokeMode::Normal,
                remux_exit_code: 0,
                probe_lines: SAMPLE_PROBE_OUTPUT.iter().map(|l| l.to_string()).collect(),
                trailing_lines: Vec::new(),
                chunk_outputs,
                files: HashMap::new(),
                invocations: Vec::new(),
            })),
            end_marker: EngineConfig::default().end_marker,
            diagnostics: None,
        }
    }

    /// Replaces the diagnostic lines emitted for a probe.
    pub fn with_probe_output<I, S>(self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state.lock().probe_lines = lines.into_iter().map(Into::into).collect();
        self
    }

    /// Lines emitted after the end marker of every invocation.
    pub fn with_trailing_output<I, S>(self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state.lock().trailing_lines = lines.into_iter().map(Into::into).collect();
        self
    }

    /// Bytes written to an output named `name` (`video` or `audio`).
    pub fn with_chunk_output(self, name: &str, data: impl Into<Bytes>) -> Self {
        self.state
            .lock()
            .chunk_outputs
            .insert(name.to_string(), data.into());
        self
    }

    pub fn with_remux_exit_code(self, code: i32) -> Self {
        self.state.lock().remux_exit_code = code;
        self
    }

    pub fn failing_load(self) -> Self {
        self.state.lock().fail_load = true;
        self
    }

    /// Every later invocation blocks forever.
    pub fn hang(&self) {
        self.state.lock().mode = InvokeMode::Hang;
    }

    /// Every later invocation fails without producing output.
    pub fn fail_invocations(&self) {
        self.state.lock().mode = InvokeMode::Fail;
    }

    pub fn is_loaded(&self) -> bool {
        self.state.lock().loaded
    }

    pub fn invocation_count(&self) -> usize {
        self.state.lock().invocations.len()
    }

    /// Argument vectors of every invocation so far, oldest first.
    pub fn invocations(&self) -> Vec<Vec<String>> {
        self.state.lock().invocations.clone()
    }

    /// Number of invocations that produced chunks rather than probing.
    pub fn remux_count(&self) -> usize {
        self.state
            .lock()
            .invocations
            .iter()
            .filter(|argv| is_remux(argv))
            .count()
    }

    pub fn file(&self, path: &Path) -> Option<Bytes> {
        self.state.lock().files.get(path).cloned()
    }

    pub fn file_count(&self) -> usize {
        self.state.lock().files.len()
    }
}

fn is_remux(argv: &[String]) -> bool {
    argv.iter().any(|arg| arg == "-map")
}

#[async_trait]
impl MediaEngine for MockEngine {
    async fn load(&mut self, diagnostics: DiagnosticSender) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        if state.fail_load {
            return Err(EngineError::Unavailable {
                reason: "mock engine configured to fail loading".to_string(),
            });
        }
        state.loaded = true;
        drop(state);

        self.diagnostics = Some(diagnostics);
        Ok(())
    }

    async fn invoke(&mut self, argv: &[String]) -> Result<i32, EngineError> {
        let diagnostics = self.diagnostics.clone().ok_or(EngineError::NotLoaded)?;

        let mode = {
            let mut state = self.state.lock();
            state.invocations.push(argv.to_vec());
            state.mode
        };

        match mode {
            InvokeMode::Normal => {}
            InvokeMode::Hang => futures::future::pending::<()>().await,
            InvokeMode::Fail => {
                return Err(EngineError::InvocationFailed {
                    reason: "mock engine configured to fail".to_string(),
                });
            }
        }

        let mut state = self.state.lock();
        let exit_code = if is_remux(argv) {
            let outputs: Vec<(PathBuf, Bytes)> = argv
                .iter()
                .map(Path::new)
                .filter_map(|path| {
                    let name = path.file_name()?.to_str()?;
                    let data = state.chunk_outputs.get(name)?;
                    Some((path.to_path_buf(), data.clone()))
                })
                .collect();
            state.files.extend(outputs);
            diagnostics.line("Output #0, mp4, to 'output/video':");
            state.remux_exit_code
        } else {
            for line in &state.probe_lines {
                diagnostics.line(line.clone());
            }
            1
        };

        diagnostics.line(self.end_marker.clone());
        for line in &state.trailing_lines {
            diagnostics.line(line.clone());
        }

        Ok(exit_code)
    }

    async fn create_dir_all(&mut self, _path: &Path) -> Result<(), EngineError> {
        Ok(())
    }

    async fn write_file(&mut self, path: &Path, data: Bytes) -> Result<(), EngineError> {
        self.state.lock().files.insert(path.to_path_buf(), data);
        Ok(())
    }

    async fn read_file(&mut self, path: &Path) -> Result<Bytes, EngineError> {
        self.state
            .lock()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| EngineError::FileNotFound {
                path: path.to_path_buf(),
            })
    }

    async fn remove_file(&mut self, path: &Path) -> Result<(), EngineError> {
        self.state
            .lock()
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| EngineError::FileNotFound {
                path: path.to_path_buf(),
            })
    }
}
