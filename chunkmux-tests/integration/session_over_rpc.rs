//! Session state machine driven through a spawned worker.
//!
//! Every call here crosses the channel, so error kinds are checked after
//! they have been encoded into a rejection value and decoded again.

use std::time::Duration;

use bytes::Bytes;
use chunkmux_core::config::ChunkmuxConfig;
use chunkmux_core::engine::test_mocks::MockEngine;
use chunkmux_core::rpc::{ErrorKind, RpcError};
use chunkmux_core::session::{ChunkRequest, InputFile};
use chunkmux_core::worker::spawn_worker_with_task;
use chunkmux_core::{RemuxService, RemuxerHandle, spawn_worker};

fn sample_file() -> InputFile {
    InputFile::new("sample.mkv", Bytes::from_static(b"matroska"))
}

fn first_streams() -> ChunkRequest {
    ChunkRequest {
        seek_offset: 0.0,
        duration: Some(10.0),
        video_stream: Some("0:0".to_string()),
        audio_stream: Some("0:1".to_string()),
    }
}

async fn ready_worker(engine: MockEngine) -> RemuxerHandle {
    let handle = spawn_worker(&ChunkmuxConfig::for_testing("/work"), engine);
    handle.load().await.unwrap();
    handle.set_input_file(sample_file()).await.unwrap();
    handle
}

fn kind<T: std::fmt::Debug>(result: Result<T, RpcError>) -> ErrorKind {
    result.unwrap_err().kind().unwrap()
}

#[tokio::test]
async fn test_lifecycle_order_is_enforced() {
    let handle = spawn_worker(&ChunkmuxConfig::for_testing("/work"), MockEngine::new());

    assert_eq!(kind(handle.set_input_file(sample_file()).await), ErrorKind::InvalidState);
    assert_eq!(kind(handle.metadata().await), ErrorKind::InvalidState);
    assert_eq!(kind(handle.remux_chunk(first_streams()).await), ErrorKind::InvalidState);

    handle.load().await.unwrap();
    assert_eq!(kind(handle.load().await), ErrorKind::InvalidState);
    assert_eq!(kind(handle.metadata().await), ErrorKind::NoInput);
    assert_eq!(kind(handle.remux_chunk(first_streams()).await), ErrorKind::NoInput);
}

#[tokio::test]
async fn test_metadata_is_probed_once() {
    let engine = MockEngine::new();
    let handle = ready_worker(engine.clone()).await;
    let before = engine.invocation_count();

    let first = handle.metadata().await.unwrap();
    let second = handle.metadata().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(engine.invocation_count() - before, 1);
    assert_eq!(first.duration_seconds, 90.5);
    assert_eq!(first.audio_streams[0].language.as_deref(), Some("jpn"));
}

#[tokio::test]
async fn test_busy_session_rejects_every_entry_point() {
    let mut config = ChunkmuxConfig::for_testing("/work");
    config.engine.invocation_timeout = Some(Duration::from_millis(100));
    let engine = MockEngine::new();
    let handle = spawn_worker(&config, engine.clone());
    handle.load().await.unwrap();
    handle.set_input_file(sample_file()).await.unwrap();

    engine.hang();
    assert_eq!(kind(handle.metadata().await), ErrorKind::EngineTimeout);

    assert!(handle.is_loaded().await.unwrap());
    assert_eq!(kind(handle.load().await), ErrorKind::InvalidState);
    assert_eq!(kind(handle.set_input_file(sample_file()).await), ErrorKind::InvalidState);
    assert_eq!(kind(handle.metadata().await), ErrorKind::InvalidState);
    assert_eq!(kind(handle.remux_chunk(first_streams()).await), ErrorKind::InvalidState);
}

#[tokio::test]
async fn test_unknown_stream_names_the_stream() {
    let handle = ready_worker(MockEngine::new()).await;
    let request = ChunkRequest {
        video_stream: Some("0:9".to_string()),
        ..first_streams()
    };

    let err = handle.remux_chunk(request).await.unwrap_err();

    let remote = err.remote_error().unwrap();
    assert_eq!(remote.kind, ErrorKind::StreamNotFound);
    assert_eq!(remote.stream_id.as_deref(), Some("0:9"));
}

#[tokio::test]
async fn test_chunks_carry_mime_types_and_leave_no_outputs() {
    let engine = MockEngine::new().with_chunk_output("audio", Bytes::from_static(b"aac"));
    let handle = ready_worker(engine.clone()).await;

    let chunks = handle.remux_chunk(first_streams()).await.unwrap();
    let again = handle.remux_chunk(first_streams()).await.unwrap();

    let video = chunks.video.unwrap();
    let audio = chunks.audio.unwrap();
    assert_eq!(video.mime_type, "video/mp4; codecs=\"avc1.640033\"");
    assert_eq!(video.data.len(), 2048);
    assert_eq!(audio.mime_type, "audio/mp4; codecs=\"mp4a.40.2\"");
    assert_eq!(audio.data, Bytes::from_static(b"aac"));
    assert_eq!(again.len(), 2);

    // Only the staged input survives.
    assert_eq!(engine.file_count(), 1);
    assert_eq!(engine.remux_count(), 2);
}

#[tokio::test]
async fn test_concurrent_callers_are_served_in_turn() {
    let engine = MockEngine::new();
    let handle = ready_worker(engine.clone()).await;
    let other = handle.clone();

    let (first, second) = futures::join!(
        handle.remux_chunk(first_streams()),
        other.remux_chunk(ChunkRequest {
            seek_offset: 10.0,
            ..first_streams()
        }),
    );

    assert_eq!(first.unwrap().len(), 2);
    assert_eq!(second.unwrap().len(), 2);
    assert_eq!(engine.remux_count(), 2);
    assert_eq!(handle.client().pending_calls(), 0);
}

#[tokio::test]
async fn test_unregistered_method_is_rejected() {
    let handle = spawn_worker(&ChunkmuxConfig::for_testing("/work"), MockEngine::new());

    let err = handle.client().call("transcodeAll", vec![]).await.unwrap_err();

    assert_eq!(err.kind(), Some(ErrorKind::UnknownMethod));
    assert!(handle.client().is_connected());
}

#[tokio::test]
async fn test_worker_stops_when_handle_is_dropped() {
    let (handle, task) =
        spawn_worker_with_task(&ChunkmuxConfig::for_testing("/work"), MockEngine::new());
    handle.load().await.unwrap();

    drop(handle);

    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .unwrap()
        .unwrap();
}
