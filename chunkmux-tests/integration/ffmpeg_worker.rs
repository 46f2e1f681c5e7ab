//! Worker around the ffmpeg engine, with a shell script standing in for ffmpeg.

use bytes::Bytes;
use chunkmux_core::config::ChunkmuxConfig;
use chunkmux_core::rpc::ErrorKind;
use chunkmux_core::session::{ChunkRequest, InputFile};
use chunkmux_core::{FfmpegEngine, RemuxService, RemuxerHandle, spawn_worker};
use tempfile::TempDir;

#[cfg(unix)]
const FAKE_FFMPEG: &str = r#"case "$*" in *-version*) echo "ffmpeg version scripted"; exit 0;; esac
case "$*" in
  *-map*) ;;
  *)
    echo "Input #0, matroska,webm, from 'input/sample.mkv':" >&2
    echo "  Duration: 00:00:42.00, start: 0.000000, bitrate: 1000 kb/s" >&2
    echo "  Stream #0:0(eng): Video: h264 (High), yuv420p, 1920x1080" >&2
    echo "  Stream #0:1(eng): Audio: opus, 48000 Hz, stereo" >&2
    echo "At least one output file must be specified" >&2
    exit 1;;
esac
for arg in "$@"; do
  case "$arg" in
    */output/video) printf 'VIDEO' > "$arg";;
    */output/audio) printf 'AUDIO' > "$arg";;
  esac
done
echo "video:1kB audio:1kB subtitle:0kB" >&2
exit 0
"#;

#[cfg(unix)]
fn scripted_worker(dir: &TempDir) -> (RemuxerHandle, ChunkmuxConfig) {
    let script = dir.path().join("fake-ffmpeg.sh");
    std::fs::write(&script, FAKE_FFMPEG).unwrap();

    let mut config = ChunkmuxConfig::for_testing(dir.path().join("work"));
    config.engine.ffmpeg_path = "sh".into();
    config.engine.default_args = vec![script.to_string_lossy().into_owned()];

    let handle = spawn_worker(&config, FfmpegEngine::new(config.engine.clone()));
    (handle, config)
}

#[cfg(unix)]
fn entries(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}

#[cfg(unix)]
#[tokio::test]
async fn test_probe_and_remux_through_ffmpeg_engine() {
    let dir = TempDir::new().unwrap();
    let (handle, config) = scripted_worker(&dir);

    handle.load().await.unwrap();
    handle
        .set_input_file(InputFile::new("sample.mkv", Bytes::from_static(b"matroska")))
        .await
        .unwrap();

    let metadata = handle.metadata().await.unwrap();
    assert_eq!(metadata.duration_seconds, 42.0);
    assert_eq!(metadata.video_streams[0].id, "0:0");
    assert_eq!(metadata.audio_streams[0].format_description, "opus, 48000 Hz, stereo");

    let chunks = handle
        .remux_chunk(ChunkRequest {
            seek_offset: 0.0,
            duration: Some(10.0),
            video_stream: Some("0:0".to_string()),
            audio_stream: Some("0:1".to_string()),
        })
        .await
        .unwrap();

    let video = chunks.video.unwrap();
    let audio = chunks.audio.unwrap();
    assert_eq!(video.data, Bytes::from_static(b"VIDEO"));
    assert_eq!(video.mime_type, "video/mp4; codecs=\"avc1.640033\"");
    assert_eq!(audio.data, Bytes::from_static(b"AUDIO"));
    assert_eq!(audio.mime_type, "audio/webm; codecs=\"opus\"");

    assert_eq!(entries(&config.engine.output_dir()), 0);
    assert!(config.engine.input_dir().join("sample.mkv").exists());
}

#[tokio::test]
async fn test_missing_binary_fails_load_and_stays_unloaded() {
    let dir = TempDir::new().unwrap();
    let mut config = ChunkmuxConfig::for_testing(dir.path().join("work"));
    config.engine.ffmpeg_path = dir.path().join("no-such-ffmpeg");
    let handle = spawn_worker(&config, FfmpegEngine::new(config.engine.clone()));

    let err = handle.load().await.unwrap_err();

    assert_eq!(err.kind(), Some(ErrorKind::Engine));
    assert!(!handle.is_loaded().await.unwrap());
}
