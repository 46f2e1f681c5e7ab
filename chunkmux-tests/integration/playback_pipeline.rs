//! Buffer controller driving a worker while a recording sink plays.

use std::time::Duration;

use bytes::Bytes;
use chunkmux_core::config::ChunkmuxConfig;
use chunkmux_core::engine::test_mocks::MockEngine;
use chunkmux_core::playback::test_mocks::MockSink;
use chunkmux_core::session::{InputFile, TrackKind};
use chunkmux_core::{BufferController, RemuxerHandle, spawn_worker};
use tokio::task::JoinHandle;

type Controller = BufferController<RemuxerHandle, MockSink>;

const THIRTY_SECOND_PROBE: &[&str] = &[
    "Input #0, matroska,webm, from 'input/short.mkv':",
    "  Duration: 00:00:30.00, start: 0.000000, bitrate: 2000 kb/s",
    "  Stream #0:0(eng): Video: h264 (High), yuv420p, 1280x720",
    "  Stream #0:1(eng): Audio: aac (LC), 48000 Hz, stereo",
];

async fn start_playback(engine: MockEngine, sink: MockSink) -> JoinHandle<Controller> {
    let config = ChunkmuxConfig::for_testing("/work");
    let handle = spawn_worker(&config, engine);
    let mut controller = BufferController::new(handle, sink, config.playback);
    controller
        .load_media(InputFile::new("short.mkv", Bytes::from_static(b"mkv")))
        .await
        .unwrap();

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

/// Seek offsets of every remux the engine ran, in order.
fn fetched_offsets(engine: &MockEngine) -> Vec<String> {
    engine
        .invocations()
        .into_iter()
        .filter(|argv| argv.iter().any(|arg| arg == "-map"))
        .map(|argv| argv[1].clone())
        .collect()
}

/// Commits the outstanding appends, then ticks at `position` until the
/// next fetch's appends are pending.
async fn advance(sink: &MockSink, position: f64) {
    while sink.complete_next() {}
    eventually(|| {
        sink.set_position(position);
        sink.pending_appends() == 2
    })
    .await;
}

#[tokio::test]
async fn test_plays_through_to_end_of_media() {
    let engine = MockEngine::new().with_probe_output(THIRTY_SECOND_PROBE.iter().copied());
    let sink = MockSink::new();
    let task = start_playback(engine.clone(), sink.clone()).await;

    eventually(|| sink.pending_appends() == 2).await;
    assert_eq!(sink.duration(), Some(30.0));

    sink.set_buffered(&[(0.0, 10.0)]);
    advance(&sink, 6.0).await;

    sink.set_buffered(&[(0.0, 20.0)]);
    advance(&sink, 16.0).await;

    sink.set_buffered(&[(0.0, 30.0)]);
    while sink.complete_next() {}
    for position in [26.0, 28.0, 29.9] {
        sink.set_position(position);
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(fetched_offsets(&engine), vec!["0", "10", "20"]);
    assert_eq!(sink.append_count(), 6);

    sink.close();
    let controller = task.await.unwrap();
    assert_eq!(controller.in_flight(), None);
}

#[tokio::test]
async fn test_seek_past_buffer_fetches_from_playhead() {
    let engine = MockEngine::new();
    let sink = MockSink::new();
    let task = start_playback(engine.clone(), sink.clone()).await;

    eventually(|| sink.pending_appends() == 2).await;
    sink.set_buffered(&[(0.0, 10.0)]);
    advance(&sink, 50.0).await;

    assert_eq!(fetched_offsets(&engine), vec!["0", "50"]);

    sink.close();
    let controller = task.await.unwrap();
    assert_eq!(controller.in_flight(), None);
}

#[tokio::test]
async fn test_ticks_during_slow_append_never_overlap_fetches() {
    let engine = MockEngine::new();
    let sink = MockSink::new();
    let task = start_playback(engine.clone(), sink.clone()).await;

    eventually(|| sink.pending_appends() == 2).await;
    for position in [0.0, 0.5, 1.0, 1.5, 2.0] {
        sink.set_position(position);
    }
    sink.complete_next();
    for position in [2.5, 3.0] {
        sink.set_position(position);
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(engine.remux_count(), 1);
    assert_eq!(sink.pending_appends(), 1);

    sink.close();
    let controller = task.await.unwrap();
    assert_eq!(controller.selected_stream(TrackKind::Video), Some("0:0"));
    assert_eq!(controller.in_flight(), None);
}

#[tokio::test]
async fn test_worker_failure_is_retried_on_next_tick() {
    let engine = MockEngine::new().with_remux_exit_code(1);
    let sink = MockSink::auto_completing();
    let task = start_playback(engine.clone(), sink.clone()).await;

    eventually(|| {
        sink.set_position(0.0);
        engine.remux_count() >= 2
    })
    .await;

    sink.close();
    let controller = task.await.unwrap();
    assert_eq!(sink.append_count(), 0);
    assert_eq!(controller.selected_stream(TrackKind::Audio), Some("0:1"));
}
