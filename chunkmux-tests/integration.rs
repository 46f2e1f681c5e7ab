//! Integration tests for Chunkmux
//!
//! These tests drive a real worker task through the controller-side handle:
//! the session state machine over the channel, the buffer controller against
//! a recording sink, and the ffmpeg engine against a scripted binary.

#[path = "integration/session_over_rpc.rs"]
mod session_over_rpc;

#[path = "integration/playback_pipeline.rs"]
mod playback_pipeline;

#[path = "integration/ffmpeg_worker.rs"]
mod ffmpeg_worker;
