//! CLI command implementations

use std::path::{Path, PathBuf};

use anyhow::Context;
use chunkmux_core::config::ChunkmuxConfig;
use chunkmux_core::session::{ChunkRequest, InputFile, MediaMetadata, RemuxedChunk};
use chunkmux_core::{ChunkmuxError, FfmpegEngine, RemuxService, RemuxerHandle, spawn_worker};
use clap::Subcommand;
use tokio::fs;
use tracing::info;

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Print the duration and streams of a media file
    Probe {
        /// Media file to inspect
        file: PathBuf,
        /// Print metadata as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remux one time window of a media file into playable chunks
    Remux {
        /// Media file to remux
        file: PathBuf,
        /// Seek offset in seconds
        #[arg(long, default_value = "0")]
        start: f64,
        /// Window length in seconds
        #[arg(long, default_value = "10")]
        duration: f64,
        /// Directory for the chunk files
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
        /// Video stream id (defaults to the first video stream)
        #[arg(long)]
        video: Option<String>,
        /// Audio stream id (defaults to the first audio stream)
        #[arg(long)]
        audio: Option<String>,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns appropriate error based on the command that fails
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Probe { file, json } => probe(&file, json).await,
        Commands::Remux {
            file,
            start,
            duration,
            out_dir,
            video,
            audio,
        } => {
            let window = Window { start, duration };
            remux(&file, window, &out_dir, video, audio).await
        }
    }
}

struct Window {
    start: f64,
    duration: f64,
}

/// Spawns a worker and stages `file` as its input.
async fn open(file: &Path) -> anyhow::Result<(RemuxerHandle, MediaMetadata)> {
    let config = ChunkmuxConfig::from_env();
    let handle = spawn_worker(&config, FfmpegEngine::new(config.engine.clone()));

    handle.load().await.map_err(ChunkmuxError::from)?;

    let data = fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let name = file
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("Not a file name: {}", file.display()))?;
    info!("Staging {} ({} bytes)", name, data.len());

    handle
        .set_input_file(InputFile::new(name, data))
        .await
        .map_err(ChunkmuxError::from)?;
    let metadata = handle.metadata().await.map_err(ChunkmuxError::from)?;

    Ok((handle, metadata))
}

/// Print metadata of a media file
///
/// # Errors
/// - `ChunkmuxError::Rpc` - ffmpeg unavailable or the file could not be probed
/// - I/O errors reading the file
pub async fn probe(file: &Path, json: bool) -> anyhow::Result<()> {
    let (_handle, metadata) = open(file).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&metadata)?);
        return Ok(());
    }

    println!("Duration: {}s", metadata.duration_seconds);
    for (label, streams) in [
        ("Video", &metadata.video_streams),
        ("Audio", &metadata.audio_streams),
    ] {
        for stream in streams {
            println!(
                "  {} stream {}({}): {}",
                label,
                stream.id,
                stream.language.as_deref().unwrap_or("n/a"),
                stream.format_description
            );
        }
    }

    Ok(())
}

/// Remux one window and write each track's chunk to `out_dir`
///
/// # Errors
/// - `ChunkmuxError::Rpc` - Unknown stream, unsupported codec or ffmpeg failure
/// - I/O errors reading the input or writing chunks
async fn remux(
    file: &Path,
    window: Window,
    out_dir: &Path,
    video: Option<String>,
    audio: Option<String>,
) -> anyhow::Result<()> {
    let (handle, metadata) = open(file).await?;

    let request = ChunkRequest {
        seek_offset: window.start,
        duration: Some(window.duration),
        video_stream: video.or_else(|| metadata.video_streams.first().map(|s| s.id.clone())),
        audio_stream: audio.or_else(|| metadata.audio_streams.first().map(|s| s.id.clone())),
    };
    let chunks = handle
        .remux_chunk(request)
        .await
        .map_err(ChunkmuxError::from)?;

    fs::create_dir_all(out_dir)
        .await
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    for chunk in chunks.into_chunks() {
        let path = out_dir.join(format!("{}.{}", chunk.kind, extension(&chunk)));
        fs::write(&path, &chunk.data)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("{}: {} ({} bytes)", path.display(), chunk.mime_type, chunk.data.len());
    }

    Ok(())
}

/// File extension from the container subtype, `video/mp4; codecs=...` -> `mp4`.
fn extension(chunk: &RemuxedChunk) -> &str {
    chunk
        .mime_type
        .split(';')
        .next()
        .and_then(|essence| essence.split('/').nth(1))
        .map(str::trim)
        .unwrap_or("bin")
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use chunkmux_core::session::TrackKind;

    use super::*;

    #[test]
    fn test_extension_from_mime_type() {
        let chunk = RemuxedChunk {
            kind: TrackKind::Audio,
            data: Bytes::new(),
            mime_type: "audio/webm; codecs=\"opus\"".to_string(),
        };
        assert_eq!(extension(&chunk), "webm");

        let chunk = RemuxedChunk {
            mime_type: "garbage".to_string(),
            ..chunk
        };
        assert_eq!(extension(&chunk), "bin");
    }
}
