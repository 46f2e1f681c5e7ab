//! The session state machine wrapped around one media engine.

use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use super::diagnostics::parse_metadata;
use super::types::{
    ChunkRequest, InputFile, MediaMetadata, RemuxedChunk, RemuxedChunks, TrackKind,
};
use super::{SessionError, SessionState};
use crate::compat::{self, CompatError, ContainerMapping};
use crate::config::EngineConfig;
use crate::engine::{
    DiagnosticSender, DiagnosticStream, EngineError, MediaEngine, diagnostic_stream,
};

/// Fragmentation flags that let each track be appended on its own.
const FRAGMENT_FLAGS: &str = "frag_keyframe+delay_moov+default_base_moof";

/// A track selected for one remux invocation.
struct SelectedTrack {
    kind: TrackKind,
    stream_id: String,
    mapping: ContainerMapping,
}

/// One transcoding session: a media engine, its staged input and the
/// metadata derived from it.
pub struct TranscodeSession<E> {
    engine: E,
    config: EngineConfig,
    state: SessionState,
    diagnostics: Option<DiagnosticStream>,
    input_path: Option<PathBuf>,
    metadata: Option<MediaMetadata>,
}

impl<E: MediaEngine> TranscodeSession<E> {
    pub fn new(engine: E, config: EngineConfig) -> Self {
        Self {
            engine,
            config,
            state: SessionState::Uninitialized,
            diagnostics: None,
            input_path: None,
            metadata: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Answers without a state check so callers can decide whether to `load`.
    pub fn is_loaded(&self) -> bool {
        self.state.is_loaded()
    }

    /// Path the current input was staged at.
    pub fn input_path(&self) -> Option<&Path> {
        self.input_path.as_deref()
    }

    fn expect_state(
        &self,
        expected: SessionState,
        operation: &'static str,
    ) -> Result<(), SessionError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                operation,
                expected,
                actual: self.state,
            })
        }
    }

    fn require_input(&self, operation: &'static str) -> Result<String, SessionError> {
        self.input_path
            .as_ref()
            .map(|path| path.to_string_lossy().into_owned())
            .ok_or(SessionError::NoInput { operation })
    }

    /// Initializes the engine. Only valid once; a failed load may be retried.
    ///
    /// # Errors
    /// - `SessionError::InvalidState` - Session was already loaded
    /// - `SessionError::Engine` - Engine failed to start or prepare its directories
    pub async fn load(&mut self) -> Result<(), SessionError> {
        self.expect_state(SessionState::Uninitialized, "load")?;
        self.state = SessionState::Initializing;
        debug!("Session state: Uninitialized -> Initializing");

        let (sender, stream) = diagnostic_stream();
        match self.prepare_engine(sender).await {
            Ok(()) => {
                self.diagnostics = Some(stream);
                self.state = SessionState::Idle;
                info!("Media engine loaded; session is Idle");
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Uninitialized;
                error!("Failed to load media engine: {}", e);
                Err(SessionError::Engine(e))
            }
        }
    }

    async fn prepare_engine(&mut self, sender: DiagnosticSender) -> Result<(), EngineError> {
        self.engine.load(sender).await?;
        self.engine.create_dir_all(&self.config.input_dir()).await?;
        self.engine.create_dir_all(&self.config.output_dir()).await
    }

    /// Stages `file` where the engine can read it.
    ///
    /// Replaces any earlier input and forgets metadata derived from it.
    ///
    /// # Errors
    /// - `SessionError::InvalidState` - Session is not `Idle`
    /// - `SessionError::InvalidArguments` - File name has no usable final component
    /// - `SessionError::Engine` - Input could not be written
    pub async fn set_input_file(&mut self, file: InputFile) -> Result<(), SessionError> {
        self.expect_state(SessionState::Idle, "setInputFile")?;

        let file_name = Path::new(&file.name).file_name().ok_or_else(|| {
            SessionError::InvalidArguments {
                reason: format!("input file name {:?} has no final component", file.name),
            }
        })?;
        let input_path = self.config.input_dir().join(file_name);
        let size = file.data.len();

        if let Some(previous) = self.input_path.take()
            && previous != input_path
            && let Err(e) = self.engine.remove_file(&previous).await
        {
            warn!("Failed to remove previous input {}: {}", previous.display(), e);
        }

        self.engine.write_file(&input_path, file.data).await?;
        info!(
            "Staged input {} ({:.3} MB)",
            input_path.display(),
            size as f64 / 1_000_000.0
        );

        self.input_path = Some(input_path);
        self.metadata = None;
        Ok(())
    }

    /// Returns the input's metadata, probing the engine on first use.
    ///
    /// # Errors
    /// - `SessionError::InvalidState` - Session is not `Idle`
    /// - `SessionError::NoInput` - No input has been staged
    /// - `SessionError::Engine` - Probe invocation failed
    /// - `SessionError::EngineTimeout` - Probe did not finish in time
    pub async fn metadata(&mut self) -> Result<MediaMetadata, SessionError> {
        self.expect_state(SessionState::Idle, "getMetadata")?;
        let input = self.require_input("getMetadata")?;

        if let Some(metadata) = &self.metadata {
            return Ok(metadata.clone());
        }
        self.probe(input).await
    }

    async fn probe(&mut self, input: String) -> Result<MediaMetadata, SessionError> {
        // ffmpeg exits non-zero when given no output; the listing is still complete.
        let (_exit_code, lines) = self.run_engine(vec!["-i".to_string(), input]).await?;

        let metadata = parse_metadata(&lines);
        info!(
            "Probed input: {:.2}s, {} video and {} audio streams",
            metadata.duration_seconds,
            metadata.video_streams.len(),
            metadata.audio_streams.len()
        );

        self.metadata = Some(metadata.clone());
        Ok(metadata)
    }

    /// Remuxes one time window of the selected streams without re-encoding.
    ///
    /// # Errors
    /// - `SessionError::InvalidState` - Session is not `Idle`
    /// - `SessionError::NoInput` - No input has been staged
    /// - `SessionError::StreamNotFound` - A requested stream id is not in the metadata
    /// - `SessionError::UnsupportedFormat` - A requested stream has no browser mapping
    /// - `SessionError::InvalidArguments` - Neither a video nor an audio stream was requested
    /// - `SessionError::Engine` - Engine failed or produced no output
    /// - `SessionError::EngineTimeout` - Engine did not finish in time
    pub async fn remux_chunk(
        &mut self,
        request: ChunkRequest,
    ) -> Result<RemuxedChunks, SessionError> {
        self.expect_state(SessionState::Idle, "remuxChunk")?;
        let input = self.require_input("remuxChunk")?;

        let metadata = match &self.metadata {
            Some(metadata) => metadata.clone(),
            None => self.probe(input.clone()).await?,
        };

        let tracks = select_tracks(&metadata, &request)?;
        if tracks.is_empty() {
            return Err(SessionError::InvalidArguments {
                reason: "remuxChunk needs a video or an audio stream id".to_string(),
            });
        }

        let output_dir = self.config.output_dir();
        let argv = remux_arguments(&request, &input, &tracks, &output_dir);
        let run = self.run_engine(argv).await;

        let mut chunks = RemuxedChunks::default();
        let mut failure = None;

        for track in &tracks {
            let path = output_dir.join(track.kind.as_str());
            let data = match &run {
                Ok((0, _)) => match self.engine.read_file(&path).await {
                    Ok(data) => Some(data),
                    Err(e) => {
                        if failure.is_none() {
                            failure = Some(SessionError::Engine(e));
                        }
                        None
                    }
                },
                _ => None,
            };

            // Leave nothing behind for the next invocation.
            match self.engine.remove_file(&path).await {
                Ok(()) | Err(EngineError::FileNotFound { .. }) => {}
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }

            if let Some(data) = data {
                let chunk = RemuxedChunk {
                    kind: track.kind,
                    data,
                    mime_type: track.mapping.mime_type.to_string(),
                };
                match track.kind {
                    TrackKind::Video => chunks.video = Some(chunk),
                    TrackKind::Audio => chunks.audio = Some(chunk),
                }
            }
        }

        match run {
            Err(e) => return Err(e),
            Ok((exit_code, lines)) if exit_code != 0 => {
                let reason = lines
                    .last()
                    .cloned()
                    .unwrap_or_else(|| "no diagnostic output".to_string());
                return Err(SessionError::Engine(EngineError::InvocationFailed {
                    reason: format!("ffmpeg exited with code {exit_code}: {reason}"),
                }));
            }
            Ok(_) => {}
        }
        if let Some(e) = failure {
            return Err(e);
        }

        debug!(
            "Remuxed chunk at {:.2}s (duration {:?}) into {} tracks",
            request.seek_offset,
            request.duration,
            chunks.len()
        );
        Ok(chunks)
    }

    /// Runs the engine once and collects its diagnostic lines up to the end
    /// marker. The session is `Busy` for the duration.
    ///
    /// On timeout the session stays `Busy`: the engine never signalled that
    /// it finished, so it cannot be invoked again.
    async fn run_engine(&mut self, argv: Vec<String>) -> Result<(i32, Vec<String>), SessionError> {
        let Some(diagnostics) = self.diagnostics.as_mut() else {
            return Err(SessionError::InvalidState {
                operation: "invoke engine",
                expected: SessionState::Idle,
                actual: self.state,
            });
        };

        let stale = diagnostics.discard_pending();
        if stale > 0 {
            debug!("Discarded {} diagnostic lines from an earlier invocation", stale);
        }

        self.state = SessionState::Busy;
        info!("Running media engine: {}", argv.join(" "));

        let engine = &mut self.engine;
        let marker = self.config.end_marker.as_str();
        let run = async {
            let exit_code = engine.invoke(&argv).await?;
            let lines = diagnostics.collect_until(marker).await?;
            Ok::<_, EngineError>((exit_code, lines))
        };

        let result = match self.config.invocation_timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => {
                    error!(
                        "Media engine did not finish within {:?}; session stays Busy",
                        limit
                    );
                    return Err(SessionError::EngineTimeout { after: limit });
                }
            },
            None => run.await,
        };

        self.state = SessionState::Idle;
        result.map_err(SessionError::from)
    }
}

fn select_tracks(
    metadata: &MediaMetadata,
    request: &ChunkRequest,
) -> Result<Vec<SelectedTrack>, SessionError> {
    let mut tracks = Vec::new();

    for kind in [TrackKind::Video, TrackKind::Audio] {
        let Some(stream_id) = request.stream(kind) else {
            continue;
        };
        let stream = metadata.find_stream(kind, stream_id).ok_or_else(|| {
            SessionError::StreamNotFound {
                kind,
                stream_id: stream_id.to_string(),
            }
        })?;
        let mapping = compat::resolve(&stream.format_description).map_err(
            |CompatError::UnsupportedFormat { format }| SessionError::UnsupportedFormat {
                stream_id: stream.id.clone(),
                format,
            },
        )?;

        tracks.push(SelectedTrack {
            kind,
            stream_id: stream.id.clone(),
            mapping,
        });
    }

    Ok(tracks)
}

fn remux_arguments(
    request: &ChunkRequest,
    input: &str,
    tracks: &[SelectedTrack],
    output_dir: &Path,
) -> Vec<String> {
    let mut argv = vec!["-ss".to_string(), request.seek_offset.to_string()];
    if let Some(duration) = request.duration {
        argv.extend(["-t".to_string(), duration.to_string()]);
    }
    // Keep source timestamps so chunks land at their real position
    argv.extend(["-copyts", "-i"].map(String::from));
    argv.push(input.to_string());

    for track in tracks {
        argv.extend(["-map".to_string(), track.stream_id.clone()]);
        let codec_flag = match track.kind {
            TrackKind::Video => "-vcodec",
            TrackKind::Audio => {
                // Experimental flac in mp4
                argv.extend(["-strict", "-2"].map(String::from));
                "-acodec"
            }
        };
        argv.extend(
            [
                "-f",
                track.mapping.engine_format,
                codec_flag,
                "copy",
                "-movflags",
                FRAGMENT_FLAGS,
            ]
            .map(String::from),
        );
        argv.push(
            output_dir
                .join(track.kind.as_str())
                .to_string_lossy()
                .into_owned(),
        );
    }

    argv
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::engine::test_mocks::MockEngine;

    fn config() -> EngineConfig {
        EngineConfig {
            work_dir: PathBuf::from("/work"),
            invocation_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        }
    }

    fn sample_input() -> InputFile {
        InputFile::new("movies/sample.mkv", Bytes::from_static(b"matroska bytes"))
    }

    fn chunk_request(video: Option<&str>, audio: Option<&str>) -> ChunkRequest {
        ChunkRequest {
            seek_offset: 20.0,
            duration: Some(10.0),
            video_stream: video.map(str::to_string),
            audio_stream: audio.map(str::to_string),
        }
    }

    async fn ready_session(engine: MockEngine) -> TranscodeSession<MockEngine> {
        let mut session = TranscodeSession::new(engine, config());
        session.load().await.unwrap();
        session.set_input_file(sample_input()).await.unwrap();
        session
    }

    #[tokio::test]
    async fn test_load_transitions_to_idle_once() {
        let engine = MockEngine::new();
        let mut session = TranscodeSession::new(engine.clone(), config());
        assert!(!session.is_loaded());

        session.load().await.unwrap();

        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.is_loaded());
        assert!(engine.is_loaded());

        let err = session.load().await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidState {
                operation: "load",
                actual: SessionState::Idle,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_failed_load_returns_to_uninitialized() {
        let mut session = TranscodeSession::new(MockEngine::new().failing_load(), config());

        let err = session.load().await.unwrap_err();

        assert!(matches!(err, SessionError::Engine(EngineError::Unavailable { .. })));
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[tokio::test]
    async fn test_operations_before_load_are_invalid_state() {
        let mut session = TranscodeSession::new(MockEngine::new(), config());

        let err = session.set_input_file(sample_input()).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidState { .. }));

        let err = session.metadata().await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidState { .. }));

        let err = session
            .remux_chunk(chunk_request(Some("0:0"), None))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_metadata_without_input_is_no_input() {
        let mut session = TranscodeSession::new(MockEngine::new(), config());
        session.load().await.unwrap();

        let err = session.metadata().await.unwrap_err();
        assert!(matches!(err, SessionError::NoInput { operation: "getMetadata" }));

        let err = session
            .remux_chunk(chunk_request(Some("0:0"), None))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NoInput { operation: "remuxChunk" }));
    }

    #[tokio::test]
    async fn test_input_is_staged_under_its_file_name() {
        let engine = MockEngine::new();
        let session = ready_session(engine.clone()).await;

        let expected = PathBuf::from("/work/input/sample.mkv");
        assert_eq!(session.input_path(), Some(expected.as_path()));
        assert_eq!(
            engine.file(&expected),
            Some(Bytes::from_static(b"matroska bytes"))
        );
    }

    #[tokio::test]
    async fn test_metadata_is_probed_once_and_cached() {
        let engine = MockEngine::new();
        let mut session = ready_session(engine.clone()).await;

        let first = session.metadata().await.unwrap();
        let second = session.metadata().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(engine.invocation_count(), 1);
        assert_eq!(
            engine.invocations()[0],
            vec!["-i".to_string(), "/work/input/sample.mkv".to_string()]
        );
        assert!((first.duration_seconds - 90.5).abs() < 1e-9);
        assert_eq!(first.video_streams.len(), 1);
        assert_eq!(first.audio_streams.len(), 2);
        assert_eq!(first.audio_streams[0].language.as_deref(), Some("jpn"));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_lines_after_end_marker_are_not_parsed() {
        let engine = MockEngine::new()
            .with_trailing_output(["  Stream #0:7(eng): Video: h264 (High)"]);
        let mut session = ready_session(engine).await;

        let metadata = session.metadata().await.unwrap();

        assert!(metadata.video_streams.iter().all(|s| s.id != "0:7"));
    }

    #[tokio::test]
    async fn test_new_input_discards_cached_metadata() {
        let engine = MockEngine::new();
        let mut session = ready_session(engine.clone()).await;
        session.metadata().await.unwrap();

        session
            .set_input_file(InputFile::new("other.mkv", Bytes::from_static(b"x")))
            .await
            .unwrap();
        session.metadata().await.unwrap();

        assert_eq!(engine.invocation_count(), 2);
        assert!(engine.file(Path::new("/work/input/sample.mkv")).is_none());
    }

    #[tokio::test]
    async fn test_remux_builds_fragmented_copy_arguments() {
        let engine = MockEngine::new();
        let mut session = ready_session(engine.clone()).await;
        session.metadata().await.unwrap();

        session
            .remux_chunk(chunk_request(Some("0:0"), Some("0:2")))
            .await
            .unwrap();

        let argv = engine.invocations().pop().unwrap();
        let expected: Vec<String> = [
            "-ss",
            "20",
            "-t",
            "10",
            "-copyts",
            "-i",
            "/work/input/sample.mkv",
            "-map",
            "0:0",
            "-f",
            "mp4",
            "-vcodec",
            "copy",
            "-movflags",
            "frag_keyframe+delay_moov+default_base_moof",
            "/work/output/video",
            "-map",
            "0:2",
            "-strict",
            "-2",
            "-f",
            "webm",
            "-acodec",
            "copy",
            "-movflags",
            "frag_keyframe+delay_moov+default_base_moof",
            "/work/output/audio",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(argv, expected);
    }

    #[tokio::test]
    async fn test_remux_returns_chunks_and_cleans_outputs() {
        let engine = MockEngine::new().with_chunk_output("audio", Bytes::from_static(b"opus"));
        let mut session = ready_session(engine.clone()).await;

        let chunks = session
            .remux_chunk(chunk_request(Some("0:0"), Some("0:2")))
            .await
            .unwrap();

        let video = chunks.video.unwrap();
        assert_eq!(video.kind, TrackKind::Video);
        assert_eq!(video.mime_type, "video/mp4; codecs=\"avc1.640033\"");
        assert_eq!(video.data.len(), 2048);

        let audio = chunks.audio.unwrap();
        assert_eq!(audio.mime_type, "audio/webm; codecs=\"opus\"");
        assert_eq!(audio.data, Bytes::from_static(b"opus"));

        // Only the staged input remains
        assert_eq!(engine.file_count(), 1);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_remux_probes_lazily_when_metadata_missing() {
        let engine = MockEngine::new();
        let mut session = ready_session(engine.clone()).await;

        let chunks = session
            .remux_chunk(chunk_request(None, Some("0:1")))
            .await
            .unwrap();

        assert!(chunks.video.is_none());
        assert!(chunks.audio.is_some());
        assert_eq!(engine.invocation_count(), 2);
        assert_eq!(engine.remux_count(), 1);
    }

    #[tokio::test]
    async fn test_remux_rejects_unknown_stream() {
        let engine = MockEngine::new();
        let mut session = ready_session(engine.clone()).await;
        session.metadata().await.unwrap();

        // 0:1 is an audio stream, not a video stream
        let err = session
            .remux_chunk(chunk_request(Some("0:1"), None))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SessionError::StreamNotFound { kind: TrackKind::Video, ref stream_id } if stream_id == "0:1"
        ));
        assert_eq!(engine.remux_count(), 0);
    }

    #[tokio::test]
    async fn test_remux_rejects_unsupported_codec() {
        let engine = MockEngine::new().with_probe_output([
            "  Duration: 00:10:00.00, start: 0.000000",
            "  Stream #0:0: Video: hevc (Main), yuv420p",
            "  Stream #0:1: Audio: aac (LC), 48000 Hz",
        ]);
        let mut session = ready_session(engine.clone()).await;

        let err = session
            .remux_chunk(chunk_request(Some("0:0"), Some("0:1")))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SessionError::UnsupportedFormat { ref stream_id, .. } if stream_id == "0:0"
        ));
        assert_eq!(engine.remux_count(), 0);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_remux_without_streams_is_invalid() {
        let mut session = ready_session(MockEngine::new()).await;

        let err = session
            .remux_chunk(chunk_request(None, None))
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn test_failed_remux_cleans_up_and_returns_to_idle() {
        let engine = MockEngine::new().with_remux_exit_code(1);
        let mut session = ready_session(engine.clone()).await;
        session.metadata().await.unwrap();

        let err = session
            .remux_chunk(chunk_request(Some("0:0"), None))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SessionError::Engine(EngineError::InvocationFailed { .. })
        ));
        assert_eq!(engine.file_count(), 1);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_engine_invocation_error_returns_to_idle() {
        let engine = MockEngine::new();
        let mut session = ready_session(engine.clone()).await;
        engine.fail_invocations();

        let err = session.metadata().await.unwrap_err();

        assert!(matches!(err, SessionError::Engine(_)));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_timed_out_engine_leaves_session_busy() {
        let engine = MockEngine::new();
        let mut session = TranscodeSession::new(
            engine.clone(),
            EngineConfig {
                invocation_timeout: Some(Duration::from_millis(50)),
                ..config()
            },
        );
        session.load().await.unwrap();
        session.set_input_file(sample_input()).await.unwrap();
        engine.hang();

        let err = session.metadata().await.unwrap_err();
        assert!(matches!(err, SessionError::EngineTimeout { .. }));
        assert_eq!(session.state(), SessionState::Busy);

        // Busy rejects every entry point
        assert!(matches!(
            session.load().await,
            Err(SessionError::InvalidState { actual: SessionState::Busy, .. })
        ));
        assert!(matches!(
            session.set_input_file(sample_input()).await,
            Err(SessionError::InvalidState { actual: SessionState::Busy, .. })
        ));
        assert!(matches!(
            session.metadata().await,
            Err(SessionError::InvalidState { actual: SessionState::Busy, .. })
        ));
        assert!(matches!(
            session.remux_chunk(chunk_request(Some("0:0"), None)).await,
            Err(SessionError::InvalidState { actual: SessionState::Busy, .. })
        ));
        assert!(session.is_loaded());
    }
}
