//! Metadata extraction from engine diagnostic lines.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use super::types::{MediaMetadata, StreamDescriptor};

static DURATION_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"Duration: (\d+?):(\d{2}):(.+?),").ok());

static STREAM_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"^\s*Stream #(?P<id>\d+:\d+)(?:\[[^\]]*\])?(?:\((?P<lang>[^)]*)\))?: (?P<type>\w+): (?P<desc>.*)$",
    )
    .ok()
});

/// Parses `Duration: H:MM:SS.ff,` out of one line into total seconds.
pub fn parse_duration(line: &str) -> Option<f64> {
    let captures = DURATION_PATTERN.as_ref()?.captures(line)?;
    let hours: f64 = captures[1].parse().ok()?;
    let minutes: f64 = captures[2].parse().ok()?;
    let seconds: f64 = captures[3].parse().ok()?;
    Some(seconds + 60.0 * minutes + 3600.0 * hours)
}

/// Stream line parsed into its type name and descriptor.
pub fn parse_stream(line: &str) -> Option<(String, StreamDescriptor)> {
    let captures = STREAM_PATTERN.as_ref()?.captures(line)?;
    let language = captures
        .name("lang")
        .map(|m| m.as_str())
        .filter(|lang| !lang.is_empty())
        .map(str::to_string);

    Some((
        captures["type"].to_string(),
        StreamDescriptor {
            id: captures["id"].to_string(),
            language,
            format_description: captures["desc"].to_string(),
        },
    ))
}

/// Builds metadata from the lines of one probe invocation.
///
/// Streams keep the order they were reported in. Streams that are neither
/// audio nor video are ignored. The last duration line wins.
pub fn parse_metadata<S: AsRef<str>>(lines: &[S]) -> MediaMetadata {
    let mut metadata = MediaMetadata::default();
    let mut duration = None;

    for line in lines {
        let line = line.as_ref();
        if let Some(seconds) = parse_duration(line) {
            duration = Some(seconds);
        }

        if let Some((stream_type, stream)) = parse_stream(line) {
            match stream_type.as_str() {
                "Audio" => metadata.audio_streams.push(stream),
                "Video" => metadata.video_streams.push(stream),
                other => debug!("Ignoring non-audio/video stream {} ({})", stream.id, other),
            }
        }
    }

    match duration {
        Some(seconds) => metadata.duration_seconds = seconds,
        None => warn!("Engine output contained no duration; reporting 0 seconds"),
    }

    metadata
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_duration_is_total_seconds() {
        let seconds =
            parse_duration("  Duration: 01:02:03.45, start: 0.000000, bitrate: 4000 kb/s")
                .unwrap();
        assert!((seconds - 3723.45).abs() < 1e-9);
    }

    #[test]
    fn test_duration_requires_trailing_comma() {
        assert_eq!(parse_duration("  Duration: N/A"), None);
        assert_eq!(parse_duration("  Duration: 00:00:05.00"), None);
    }

    #[test]
    fn test_stream_line_with_language() {
        let (stream_type, stream) = parse_stream("  Stream #0:1(eng): Audio: aac (LC)").unwrap();

        assert_eq!(stream_type, "Audio");
        assert_eq!(stream.id, "0:1");
        assert_eq!(stream.language.as_deref(), Some("eng"));
        assert_eq!(stream.format_description, "aac (LC)");
    }

    #[test]
    fn test_stream_line_without_language() {
        let (stream_type, stream) =
            parse_stream("    Stream #0:0: Video: h264 (High), yuv420p(progressive), 1920x1080")
                .unwrap();

        assert_eq!(stream_type, "Video");
        assert_eq!(stream.id, "0:0");
        assert_eq!(stream.language, None);
        assert!(stream.format_description.starts_with("h264"));
    }

    #[test]
    fn test_stream_line_with_container_id() {
        let (_, stream) = parse_stream("  Stream #0:2[0x1c0](und): Audio: mp2, 48000 Hz").unwrap();

        assert_eq!(stream.id, "0:2");
        assert_eq!(stream.language.as_deref(), Some("und"));
        assert_eq!(stream.format_description, "mp2, 48000 Hz");
    }

    #[test]
    fn test_metadata_groups_streams_in_order() {
        let lines = [
            "Input #0, matroska,webm, from 'input/show.mkv':",
            "  Duration: 00:42:10.50, start: 0.000000, bitrate: 2500 kb/s",
            "  Stream #0:0: Video: h264 (High)",
            "  Stream #0:1(jpn): Audio: opus, 48000 Hz",
            "  Stream #0:2(eng): Subtitle: ass (default)",
            "  Stream #0:3(eng): Audio: flac, 48000 Hz",
            "  Stream #0:4: Attachment: ttf",
        ];

        let metadata = parse_metadata(&lines);

        assert!((metadata.duration_seconds - 2530.5).abs() < 1e-9);
        assert_eq!(metadata.video_streams.len(), 1);
        let audio_ids: Vec<_> = metadata.audio_streams.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(audio_ids, vec!["0:1", "0:3"]);
    }

    #[test]
    fn test_metadata_without_duration_reports_zero() {
        let metadata = parse_metadata(&["  Stream #0:0: Video: h264"]);
        assert_eq!(metadata.duration_seconds, 0.0);
        assert_eq!(metadata.video_streams.len(), 1);
    }

    proptest! {
        #[test]
        fn prop_duration_matches_components(
            hours in 0u32..100,
            minutes in 0u32..60,
            centis in 0u32..6000,
        ) {
            let line = format!(
                "  Duration: {:02}:{:02}:{:02}.{:02}, start: 0.000000",
                hours,
                minutes,
                centis / 100,
                centis % 100
            );
            let expected = f64::from(hours) * 3600.0
                + f64::from(minutes) * 60.0
                + f64::from(centis) / 100.0;

            let parsed = parse_duration(&line).unwrap();
            prop_assert!((parsed - expected).abs() < 1e-6);
        }
    }
}
