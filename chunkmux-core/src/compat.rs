//! Codec to browser container mapping.
//!
//! Trusts the engine's own description of a stream; no byte-level sniffing.
//! New codec support is added to [`COMPATIBILITY_TABLE`] and nowhere else.

use thiserror::Error;

/// Output container for a stream and the MIME type the playback sink needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerMapping {
    /// Value passed to the engine's `-f` option
    pub engine_format: &'static str,
    pub mime_type: &'static str,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompatError {
    #[error("Unsupported format description: {format}")]
    UnsupportedFormat { format: String },
}

/// Codec name prefixes in match order. The first matching prefix wins.
pub const COMPATIBILITY_TABLE: &[(&str, ContainerMapping)] = &[
    (
        "h264",
        ContainerMapping {
            engine_format: "mp4",
            // AVC High Level 5.1
            mime_type: "video/mp4; codecs=\"avc1.640033\"",
        },
    ),
    (
        "flac",
        ContainerMapping {
            engine_format: "mp4",
            mime_type: "audio/mp4; codecs=\"flac\"",
        },
    ),
    (
        "vorbis",
        ContainerMapping {
            engine_format: "webm",
            mime_type: "audio/webm; codecs=\"vorbis\"",
        },
    ),
    (
        "aac",
        ContainerMapping {
            engine_format: "mp4",
            // AAC-LC
            mime_type: "audio/mp4; codecs=\"mp4a.40.2\"",
        },
    ),
    (
        "opus",
        ContainerMapping {
            engine_format: "webm",
            mime_type: "audio/webm; codecs=\"opus\"",
        },
    ),
];

/// Maps a stream's format description (e.g. `h264 (High), yuv420p, ...`)
/// to the container it should be remuxed into.
///
/// # Errors
/// - `CompatError::UnsupportedFormat` - No table entry matches the description
pub fn resolve(format_description: &str) -> Result<ContainerMapping, CompatError> {
    let description = format_description.trim_start();
    COMPATIBILITY_TABLE
        .iter()
        .find(|(prefix, _)| description.starts_with(prefix))
        .map(|(_, mapping)| *mapping)
        .ok_or_else(|| CompatError::UnsupportedFormat {
            format: format_description.to_string(),
        })
}
