//! Centralized configuration for Chunkmux.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::path::PathBuf;
use std::time::Duration;

/// Central configuration for all Chunkmux components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct ChunkmuxConfig {
    pub engine: EngineConfig,
    pub rpc: RpcConfig,
    pub playback: PlaybackConfig,
}

/// Media engine invocation settings.
///
/// Controls where the ffmpeg binary lives, where staged inputs and
/// produced chunks are kept, and how long one invocation may run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// ffmpeg binary path
    pub ffmpeg_path: PathBuf,
    /// Root of the engine-visible filesystem (`input/` and `output/` live here)
    pub work_dir: PathBuf,
    /// Arguments prepended to every invocation
    pub default_args: Vec<String>,
    /// Diagnostic line that terminates the output of one invocation
    pub end_marker: String,
    /// Upper bound on a single invocation (None = wait forever)
    pub invocation_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            work_dir: std::env::temp_dir().join("chunkmux"),
            default_args: vec![
                "-hide_banner".to_string(), // No copyright notice or build options
                "-nostdin".to_string(),     // Non-interactive mode
            ],
            end_marker: "FFMPEG_END".to_string(),
            invocation_timeout: Some(Duration::from_secs(120)),
        }
    }
}

impl EngineConfig {
    /// Directory that staged input files are written to.
    pub fn input_dir(&self) -> PathBuf {
        self.work_dir.join("input")
    }

    /// Directory the engine writes remuxed chunks to.
    pub fn output_dir(&self) -> PathBuf {
        self.work_dir.join("output")
    }
}

/// Controller/worker protocol settings.
#[derive(Debug, Clone, Default)]
pub struct RpcConfig {
    /// How long a caller waits for a reply (None = wait forever)
    pub call_timeout: Option<Duration>,
}

/// Playback buffering policy.
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Fetch the next chunk once less than this much is buffered ahead
    pub look_ahead: Duration,
    /// Length of each requested chunk
    pub chunk_duration: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            look_ahead: Duration::from_secs(5),
            chunk_duration: Duration::from_secs(10),
        }
    }
}

impl ChunkmuxConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("CHUNKMUX_FFMPEG_PATH") {
            config.engine.ffmpeg_path = PathBuf::from(path);
        }

        if let Ok(dir) = std::env::var("CHUNKMUX_WORK_DIR") {
            config.engine.work_dir = PathBuf::from(dir);
        }

        if let Ok(timeout) = std::env::var("CHUNKMUX_ENGINE_TIMEOUT_SECS")
            && let Ok(seconds) = timeout.parse::<u64>()
        {
            // Zero disables the limit
            config.engine.invocation_timeout = (seconds > 0).then(|| Duration::from_secs(seconds));
        }

        if let Ok(timeout) = std::env::var("CHUNKMUX_CALL_TIMEOUT_SECS")
            && let Ok(seconds) = timeout.parse::<u64>()
        {
            config.rpc.call_timeout = (seconds > 0).then(|| Duration::from_secs(seconds));
        }

        if let Ok(look_ahead) = std::env::var("CHUNKMUX_LOOK_AHEAD_SECS")
            && let Some(seconds) = positive_seconds(&look_ahead)
        {
            config.playback.look_ahead = seconds;
        }

        if let Ok(chunk) = std::env::var("CHUNKMUX_CHUNK_SECS")
            && let Some(seconds) = positive_seconds(&chunk)
        {
            config.playback.chunk_duration = seconds;
        }

        config
    }

    /// Creates a configuration for tests: short timeouts, private work dir.
    pub fn for_testing(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            engine: EngineConfig {
                work_dir: work_dir.into(),
                invocation_timeout: Some(Duration::from_secs(5)),
                ..Default::default()
            },
            rpc: RpcConfig {
                call_timeout: Some(Duration::from_secs(10)),
            },
            playback: PlaybackConfig::default(),
        }
    }
}

/// Parses a strictly positive, representable number of seconds.
fn positive_seconds(value: &str) -> Option<Duration> {
    let seconds = value.parse::<f64>().ok()?;
    if seconds > 0.0 {
        Duration::try_from_secs_f64(seconds).ok()
    } else {
        None
    }
}
