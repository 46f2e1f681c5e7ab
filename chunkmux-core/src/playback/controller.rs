//! Position-driven chunk fetching.

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tracing::{debug, info, warn};

use super::ranges::{BufferedRange, next_unbuffered_time};
use super::{PlaybackError, PlaybackSink, SinkError};
use crate::config::PlaybackConfig;
use crate::rpc::{ErrorKind, RpcError};
use crate::session::{ChunkRequest, InputFile, MediaMetadata, RemuxedChunks, TrackKind};
use crate::worker::RemuxService;

const BYTES_PER_MIB: f64 = (1 << 20) as f64;

type FetchFuture = BoxFuture<'static, (f64, Result<RemuxedChunks, RpcError>)>;
type AppendFuture = BoxFuture<'static, AppendDone>;

struct AppendDone {
    kind: TrackKind,
    mime_type: String,
    size: usize,
    result: Result<(), SinkError>,
}

/// One selected stream and, once its first chunk arrives, its sink endpoint.
struct Track<T> {
    stream_id: String,
    endpoint: Option<T>,
}

impl<T> Track<T> {
    fn new(stream_id: &str) -> Self {
        Self {
            stream_id: stream_id.to_string(),
            endpoint: None,
        }
    }
}

/// Keeps the sink buffered ahead of the playhead.
///
/// At most one chunk fetch is outstanding at any time. The in-flight start
/// time is set before a fetch is issued and cleared only once every append
/// from that fetch has completed, or when the fetch is rejected.
pub struct BufferController<R: RemuxService, S: PlaybackSink> {
    remuxer: R,
    sink: S,
    config: PlaybackConfig,
    metadata: Option<MediaMetadata>,
    video: Option<Track<S::Endpoint>>,
    audio: Option<Track<S::Endpoint>>,
    in_flight: Option<f64>,
    pending_appends: usize,
}

impl<R: RemuxService, S: PlaybackSink> BufferController<R, S> {
    pub fn new(remuxer: R, sink: S, config: PlaybackConfig) -> Self {
        Self {
            remuxer,
            sink,
            config,
            metadata: None,
            video: None,
            audio: None,
            in_flight: None,
            pending_appends: 0,
        }
    }

    pub fn metadata(&self) -> Option<&MediaMetadata> {
        self.metadata.as_ref()
    }

    /// Start time of the outstanding fetch, if any.
    pub fn in_flight(&self) -> Option<f64> {
        self.in_flight
    }

    /// Stream currently fetched for `kind`, if that track is still selected.
    pub fn selected_stream(&self, kind: TrackKind) -> Option<&str> {
        let track = match kind {
            TrackKind::Video => &self.video,
            TrackKind::Audio => &self.audio,
        };
        track.as_ref().map(|track| track.stream_id.as_str())
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Prepares the worker for `file` and sizes the sink to the media.
    ///
    /// Loads the session only if it is not loaded yet, stages the input,
    /// probes its metadata and selects the first video and audio stream.
    ///
    /// # Errors
    /// - `PlaybackError::AlreadyLoaded` - Media was already loaded into this controller
    /// - `PlaybackError::Remuxer` - The worker rejected a call or went away
    pub async fn load_media(&mut self, file: InputFile) -> Result<&MediaMetadata, PlaybackError> {
        if self.metadata.is_some() {
            return Err(PlaybackError::AlreadyLoaded);
        }

        if self.remuxer.is_loaded().await? {
            debug!("Remuxer already loaded");
        } else {
            info!("Loading remuxer");
            self.remuxer.load().await?;
        }

        info!("Uploading input file {} ({} bytes)", file.name, file.data.len());
        self.remuxer.set_input_file(file).await?;

        let metadata = self.remuxer.metadata().await?;
        log_metadata(&metadata);

        self.sink.set_duration(metadata.duration_seconds);
        self.video = metadata.video_streams.first().map(|s| Track::new(&s.id));
        self.audio = metadata.audio_streams.first().map(|s| Track::new(&s.id));

        Ok(&*self.metadata.insert(metadata))
    }

    /// Reacts to playback position changes until the sink stops reporting them.
    ///
    /// Fetch replies and append completions are polled alongside position
    /// events, so a slow worker never delays observing the playhead. Work
    /// still outstanding when `run` returns is abandoned, and a later `run`
    /// starts with no fetch in flight.
    ///
    /// # Errors
    /// - `PlaybackError::NoMedia` - `load_media` has not succeeded
    /// - `PlaybackError::Remuxer` - The worker disconnected
    pub async fn run(&mut self) -> Result<(), PlaybackError> {
        if self.metadata.is_none() {
            return Err(PlaybackError::NoMedia);
        }

        let result = self.drive().await;
        if let Some(start) = self.in_flight.take() {
            debug!(
                "Abandoning chunk at {}s with {} appends outstanding",
                start, self.pending_appends
            );
        }
        self.pending_appends = 0;
        result
    }

    async fn drive(&mut self) -> Result<(), PlaybackError> {
        let mut positions = self.sink.position_changes();
        let mut fetches: FuturesUnordered<FetchFuture> = FuturesUnordered::new();
        let mut appends: FuturesUnordered<AppendFuture> = FuturesUnordered::new();

        let position = self.sink.current_position();
        self.on_position(position, &mut fetches);

        loop {
            tokio::select! {
                position = positions.recv() => match position {
                    Some(position) => self.on_position(position, &mut fetches),
                    None => {
                        debug!("Position updates ended, stopping buffer controller");
                        return Ok(());
                    }
                },

                Some((start, result)) = fetches.next(), if !fetches.is_empty() => {
                    self.on_fetch_complete(start, result, &mut appends)?;
                }

                Some(done) = appends.next(), if !appends.is_empty() => {
                    self.on_append_complete(done);
                }
            }
        }
    }

    fn buffered_tracks(&self) -> Vec<Vec<BufferedRange>> {
        [&self.video, &self.audio]
            .into_iter()
            .flatten()
            .filter_map(|track| track.endpoint.as_ref())
            .map(|endpoint| self.sink.buffered_ranges(endpoint))
            .collect()
    }

    fn on_position(&mut self, position: f64, fetches: &mut FuturesUnordered<FetchFuture>) {
        let Some(metadata) = &self.metadata else {
            return;
        };
        if self.video.is_none() && self.audio.is_none() {
            return;
        }

        let tracks = self.buffered_tracks();
        let start = next_unbuffered_time(position, tracks.iter().map(Vec::as_slice));

        if metadata.duration_seconds > 0.0 && start >= metadata.duration_seconds {
            return;
        }
        if start - position >= self.config.look_ahead.as_secs_f64() {
            return;
        }

        if let Some(in_flight) = self.in_flight {
            if in_flight == start {
                debug!("Ignoring chunk fetch at {}s that has already been requested", start);
            } else {
                debug!(
                    "Deferring chunk fetch at {}s until chunk at {}s is appended",
                    start, in_flight
                );
            }
            return;
        }

        let duration = self.config.chunk_duration.as_secs_f64();
        let request = ChunkRequest {
            seek_offset: start,
            duration: Some(duration),
            video_stream: self.video.as_ref().map(|track| track.stream_id.clone()),
            audio_stream: self.audio.as_ref().map(|track| track.stream_id.clone()),
        };

        info!(
            "Remuxing media segment with time range [{} - {}]",
            start,
            start + duration
        );
        self.in_flight = Some(start);

        let remuxer = self.remuxer.clone();
        fetches.push(async move { (start, remuxer.remux_chunk(request).await) }.boxed());
    }

    fn on_fetch_complete(
        &mut self,
        start: f64,
        result: Result<RemuxedChunks, RpcError>,
        appends: &mut FuturesUnordered<AppendFuture>,
    ) -> Result<(), PlaybackError> {
        let chunks = match result {
            Ok(chunks) => chunks,
            Err(RpcError::Disconnected) => {
                self.in_flight = None;
                return Err(PlaybackError::Remuxer(RpcError::Disconnected));
            }
            Err(e) => {
                warn!("Chunk fetch at {}s failed: {}", start, e);
                self.in_flight = None;
                self.drop_rejected_track(&e);
                return Ok(());
            }
        };

        for chunk in chunks.into_chunks() {
            let slot = match chunk.kind {
                TrackKind::Video => &mut self.video,
                TrackKind::Audio => &mut self.audio,
            };
            let Some(track) = slot.as_mut() else {
                debug!("Discarding {} chunk for a dropped track", chunk.kind);
                continue;
            };

            if track.endpoint.is_none() {
                match self.sink.create_endpoint(&chunk.mime_type) {
                    Ok(endpoint) => {
                        info!("Created {} buffer for {}", chunk.kind, chunk.mime_type);
                        track.endpoint = Some(endpoint);
                    }
                    Err(e) => {
                        warn!("Dropping {} track: {}", chunk.kind, e);
                        *slot = None;
                        continue;
                    }
                }
            }
            let Some(endpoint) = track.endpoint.as_ref() else {
                continue;
            };

            let size = chunk.data.len();
            let completion = self.sink.append(endpoint, chunk.data);
            let kind = chunk.kind;
            let mime_type = chunk.mime_type;
            appends.push(
                async move {
                    AppendDone {
                        kind,
                        mime_type,
                        size,
                        result: completion.await,
                    }
                }
                .boxed(),
            );
            self.pending_appends += 1;
        }

        if self.pending_appends == 0 {
            debug!("Chunk at {}s produced nothing to append", start);
            self.in_flight = None;
        }
        Ok(())
    }

    fn on_append_complete(&mut self, done: AppendDone) {
        match done.result {
            Ok(()) => info!(
                "Added remuxed segment of type {} with size {:.3} MiB to playback buffer",
                done.mime_type,
                done.size as f64 / BYTES_PER_MIB
            ),
            Err(e) => warn!("Appending {} segment failed: {}", done.kind, e),
        }

        self.pending_appends = self.pending_appends.saturating_sub(1);
        if self.pending_appends == 0 {
            self.in_flight = None;
        }
    }

    fn drop_rejected_track(&mut self, error: &RpcError) {
        let Some(remote) = error.remote_error() else {
            return;
        };
        if remote.kind != ErrorKind::UnsupportedFormat {
            return;
        }
        let Some(stream_id) = remote.stream_id else {
            return;
        };

        for (kind, slot) in [
            (TrackKind::Video, &mut self.video),
            (TrackKind::Audio, &mut self.audio),
        ] {
            if slot.as_ref().is_some_and(|track| track.stream_id == stream_id) {
                warn!("Dropping {} track: stream {} cannot be remuxed", kind, stream_id);
                *slot = None;
            }
        }
    }
}

fn log_metadata(metadata: &MediaMetadata) {
    info!("Parsed metadata:");
    info!("  Duration: {}s", metadata.duration_seconds);
    for (label, streams) in [
        ("Audio", &metadata.audio_streams),
        ("Video", &metadata.video_streams),
    ] {
        for stream in streams {
            info!(
                "  {} stream {}({}): {}",
                label,
                stream.id,
                stream.language.as_deref().unwrap_or("n/a"),
                stream.format_description
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::config::ChunkmuxConfig;
    use crate::engine::test_mocks::MockEngine;
    use crate::playback::test_mocks::MockSink;
    use crate::worker::{RemuxerHandle, spawn_worker};

    const VIDEO_MIME: &str = "video/mp4; codecs=\"avc1.640033\"";
    const AAC_MIME: &str = "audio/mp4; codecs=\"mp4a.40.2\"";
    const OPUS_MIME: &str = "audio/webm; codecs=\"opus\"";

    type TestController = BufferController<RemuxerHandle, MockSink>;

    async fn loaded_controller(engine: MockEngine, sink: MockSink) -> TestController {
        let config = ChunkmuxConfig::for_testing("/work");
        let handle = spawn_worker(&config, engine);
        let mut controller = BufferController::new(handle, sink, config.playback);
        controller
            .load_media(InputFile::new("sample.mkv", Bytes::from_static(b"mkv")))
            .await
            .unwrap();
        controller
    }

    fn start(mut controller: TestController) -> tokio::task::JoinHandle<TestController> {
        tokio::spawn(async move {
            controller.run().await.unwrap();
            controller
        })
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_load_media_selects_first_streams() {
        let sink = MockSink::new();
        let controller = loaded_controller(MockEngine::new(), sink.clone()).await;

        assert_eq!(sink.duration(), Some(90.5));
        assert_eq!(controller.selected_stream(TrackKind::Video), Some("0:0"));
        assert_eq!(controller.selected_stream(TrackKind::Audio), Some("0:1"));
        assert_eq!(controller.in_flight(), None);
    }

    #[tokio::test]
    async fn test_load_media_skips_load_when_worker_is_loaded() {
        let config = ChunkmuxConfig::for_testing("/work");
        let handle = spawn_worker(&config, MockEngine::new());
        handle.load().await.unwrap();

        let mut controller = BufferController::new(handle, MockSink::new(), config.playback);
        let metadata = controller
            .load_media(InputFile::new("sample.mkv", Bytes::from_static(b"mkv")))
            .await
            .unwrap();

        assert_eq!(metadata.video_streams.len(), 1);
    }

    #[tokio::test]
    async fn test_second_load_media_is_refused() {
        let mut controller = loaded_controller(MockEngine::new(), MockSink::new()).await;

        let result = controller
            .load_media(InputFile::new("other.mkv", Bytes::from_static(b"mkv")))
            .await;

        assert!(matches!(result, Err(PlaybackError::AlreadyLoaded)));
    }

    #[tokio::test]
    async fn test_run_requires_media() {
        let config = ChunkmuxConfig::for_testing("/work");
        let handle = spawn_worker(&config, MockEngine::new());
        let mut controller = BufferController::new(handle, MockSink::new(), config.playback);

        assert!(matches!(controller.run().await, Err(PlaybackError::NoMedia)));
    }

    #[tokio::test]
    async fn test_duplicate_ticks_issue_one_fetch() {
        let engine = MockEngine::new();
        let sink = MockSink::new();
        let controller = loaded_controller(engine.clone(), sink.clone()).await;
        let task = start(controller);

        sink.set_position(0.0);
        sink.set_position(0.0);
        eventually(|| sink.pending_appends() == 2).await;
        sink.set_position(0.0);
        settle().await;

        assert_eq!(engine.remux_count(), 1);
        assert_eq!(sink.endpoint_mime_types(), vec![VIDEO_MIME, AAC_MIME]);

        sink.close();
        let controller = task.await.unwrap();
        assert_eq!(controller.in_flight(), None);
    }

    #[tokio::test]
    async fn test_restarted_run_fetches_again() {
        let engine = MockEngine::new();
        let sink = MockSink::new();
        let controller = loaded_controller(engine.clone(), sink.clone()).await;
        let task = start(controller);

        eventually(|| sink.pending_appends() == 2).await;
        sink.close();
        let controller = task.await.unwrap();
        assert_eq!(controller.in_flight(), None);
        while sink.complete_next() {}
        assert_eq!(engine.remux_count(), 1);

        let task = start(controller);
        eventually(|| {
            sink.set_position(0.0);
            engine.remux_count() == 2
        })
        .await;
        eventually(|| sink.pending_appends() == 2).await;

        sink.close();
        let controller = task.await.unwrap();
        assert_eq!(controller.in_flight(), None);
        assert_eq!(sink.endpoint_mime_types(), vec![VIDEO_MIME, AAC_MIME]);
    }

    #[tokio::test]
    async fn test_in_flight_clears_after_every_append() {
        let engine = MockEngine::new();
        let sink = MockSink::new();
        let controller = loaded_controller(engine.clone(), sink.clone()).await;
        let task = start(controller);

        eventually(|| sink.pending_appends() == 2).await;

        assert!(sink.complete_next());
        sink.set_position(0.0);
        settle().await;
        assert_eq!(engine.remux_count(), 1);

        assert!(sink.complete_next());
        eventually(|| {
            sink.set_position(0.0);
            engine.remux_count() == 2
        })
        .await;

        sink.close();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_append_still_clears_in_flight() {
        let engine = MockEngine::new();
        let sink = MockSink::new();
        let controller = loaded_controller(engine.clone(), sink.clone()).await;
        let task = start(controller);

        eventually(|| sink.pending_appends() == 2).await;
        assert!(sink.fail_next("quota exceeded"));
        assert!(sink.complete_next());

        eventually(|| {
            sink.set_position(0.0);
            engine.remux_count() == 2
        })
        .await;

        sink.close();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_fetch_waits_for_look_ahead_window() {
        let engine = MockEngine::new();
        let sink = MockSink::auto_completing();
        sink.set_buffered(&[(0.0, 10.0), (10.0, 30.0)]);
        let controller = loaded_controller(engine.clone(), sink.clone()).await;
        let task = start(controller);

        eventually(|| sink.append_count() == 2).await;
        sink.set_position(1.0);
        settle().await;
        assert_eq!(engine.remux_count(), 1);

        sink.set_position(26.0);
        eventually(|| engine.remux_count() == 2).await;

        let last = engine.invocations().pop().unwrap();
        assert_eq!(&last[..4], ["-ss", "30", "-t", "10"]);

        sink.close();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_no_fetch_past_end_of_media() {
        let engine = MockEngine::new();
        let sink = MockSink::auto_completing();
        sink.set_position(95.0);
        let controller = loaded_controller(engine.clone(), sink.clone()).await;
        let task = start(controller);

        settle().await;
        assert_eq!(engine.remux_count(), 0);

        sink.close();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_unsupported_stream_drops_its_track() {
        let engine = MockEngine::new().with_probe_output([
            "  Duration: 00:00:30.00, start: 0.000000",
            "  Stream #0:0: Video: vp9 (Profile 0)",
            "  Stream #0:1(eng): Audio: opus",
        ]);
        let sink = MockSink::auto_completing();
        let controller = loaded_controller(engine.clone(), sink.clone()).await;
        let task = start(controller);

        eventually(|| {
            sink.set_position(0.0);
            engine.remux_count() >= 1
        })
        .await;
        eventually(|| sink.append_count() >= 1).await;
        sink.close();
        let controller = task.await.unwrap();

        assert_eq!(controller.selected_stream(TrackKind::Video), None);
        assert_eq!(controller.selected_stream(TrackKind::Audio), Some("0:1"));
        assert_eq!(sink.endpoint_mime_types(), vec![OPUS_MIME]);
    }

    #[tokio::test]
    async fn test_unplayable_mime_drops_track_at_endpoint_creation() {
        let engine = MockEngine::new();
        let sink = MockSink::auto_completing().with_unsupported_mime("video/");
        let controller = loaded_controller(engine.clone(), sink.clone()).await;
        let task = start(controller);

        eventually(|| sink.append_count() == 1).await;
        sink.close();
        let controller = task.await.unwrap();

        assert_eq!(controller.selected_stream(TrackKind::Video), None);
        assert_eq!(sink.appended(AAC_MIME).len(), 1);
    }
}
