//! Data carried between the session and its callers.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::rpc::value::{Arguments, DecodeError, FromValue, Value, record};

/// Kind of elementary track a stream or chunk belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

impl TrackKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TrackKind::Video => "video",
            TrackKind::Audio => "audio",
        }
    }
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stream of the input as reported by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Engine stream specifier, e.g. `0:1`
    pub id: String,
    pub language: Option<String>,
    /// Free-text codec description, e.g. `aac (LC), 48000 Hz, stereo`
    pub format_description: String,
}

/// What the engine reported about one input file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub duration_seconds: f64,
    pub audio_streams: Vec<StreamDescriptor>,
    pub video_streams: Vec<StreamDescriptor>,
}

impl MediaMetadata {
    pub fn streams(&self, kind: TrackKind) -> &[StreamDescriptor] {
        match kind {
            TrackKind::Video => &self.video_streams,
            TrackKind::Audio => &self.audio_streams,
        }
    }

    pub fn find_stream(&self, kind: TrackKind, id: &str) -> Option<&StreamDescriptor> {
        self.streams(kind).iter().find(|stream| stream.id == id)
    }
}

/// Raw input bytes and the name they were picked under.
#[derive(Debug, Clone, PartialEq)]
pub struct InputFile {
    pub name: String,
    pub data: Bytes,
}

impl InputFile {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// Parameters of one `remuxChunk` call.
///
/// A missing stream id means "no track of that kind", not "any track".
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRequest {
    pub seek_offset: f64,
    /// Chunk length; `None` remuxes to the end of the input
    pub duration: Option<f64>,
    pub video_stream: Option<String>,
    pub audio_stream: Option<String>,
}

impl ChunkRequest {
    pub fn stream(&self, kind: TrackKind) -> Option<&str> {
        match kind {
            TrackKind::Video => self.video_stream.as_deref(),
            TrackKind::Audio => self.audio_stream.as_deref(),
        }
    }

    /// Positional arguments: seek offset, duration, video id, audio id.
    pub fn into_arguments(self) -> Vec<Value> {
        vec![
            Value::from(self.seek_offset),
            Value::from(self.duration),
            Value::from(self.video_stream),
            Value::from(self.audio_stream),
        ]
    }

    /// # Errors
    /// - `DecodeError` - Seek offset missing or an argument has the wrong type
    pub fn from_arguments(args: &[Value]) -> Result<Self, DecodeError> {
        let optional_text = |index| {
            args.optional(index)
                .map(|v| v.as_str().map(str::to_string))
                .transpose()
        };

        Ok(Self {
            seek_offset: args.required(0)?.as_f64()?,
            duration: args.optional(1).map(Value::as_f64).transpose()?,
            video_stream: optional_text(2)?,
            audio_stream: optional_text(3)?,
        })
    }
}

/// A remuxed byte payload for one track.
#[derive(Debug, Clone, PartialEq)]
pub struct RemuxedChunk {
    pub kind: TrackKind,
    pub data: Bytes,
    pub mime_type: String,
}

/// Everything produced by one `remuxChunk` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemuxedChunks {
    pub video: Option<RemuxedChunk>,
    pub audio: Option<RemuxedChunk>,
}

impl RemuxedChunks {
    pub fn is_empty(&self) -> bool {
        self.video.is_none() && self.audio.is_none()
    }

    pub fn len(&self) -> usize {
        usize::from(self.video.is_some()) + usize::from(self.audio.is_some())
    }

    pub fn into_chunks(self) -> impl Iterator<Item = RemuxedChunk> {
        self.video.into_iter().chain(self.audio)
    }
}

impl From<StreamDescriptor> for Value {
    fn from(stream: StreamDescriptor) -> Self {
        record([
            ("id", Value::from(stream.id)),
            ("language", Value::from(stream.language)),
            ("format_description", Value::from(stream.format_description)),
        ])
    }
}

impl FromValue for StreamDescriptor {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        Ok(Self {
            id: String::from_value(value.field("id")?)?,
            language: value
                .optional_field("language")?
                .map(String::from_value)
                .transpose()?,
            format_description: String::from_value(value.field("format_description")?)?,
        })
    }
}

impl From<MediaMetadata> for Value {
    fn from(metadata: MediaMetadata) -> Self {
        record([
            ("duration_seconds", Value::from(metadata.duration_seconds)),
            ("audio_streams", Value::from(metadata.audio_streams)),
            ("video_streams", Value::from(metadata.video_streams)),
        ])
    }
}

impl FromValue for MediaMetadata {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        Ok(Self {
            duration_seconds: value.field("duration_seconds")?.as_f64()?,
            audio_streams: Vec::from_value(value.field("audio_streams")?)?,
            video_streams: Vec::from_value(value.field("video_streams")?)?,
        })
    }
}

impl From<InputFile> for Value {
    fn from(file: InputFile) -> Self {
        record([
            ("name", Value::from(file.name)),
            ("data", Value::from(file.data)),
        ])
    }
}

impl FromValue for InputFile {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        Ok(Self {
            name: String::from_value(value.field("name")?)?,
            data: value.field("data")?.as_bytes()?.clone(),
        })
    }
}

impl From<RemuxedChunk> for Value {
    fn from(chunk: RemuxedChunk) -> Self {
        record([
            ("kind", Value::from(chunk.kind.as_str())),
            ("data", Value::from(chunk.data)),
            ("mime_type", Value::from(chunk.mime_type)),
        ])
    }
}

impl FromValue for RemuxedChunk {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        let kind = match value.field("kind")?.as_str()? {
            "video" => TrackKind::Video,
            "audio" => TrackKind::Audio,
            other => {
                return Err(DecodeError::InvalidField {
                    field: "kind",
                    reason: format!("unknown track kind {other}"),
                });
            }
        };

        Ok(Self {
            kind,
            data: value.field("data")?.as_bytes()?.clone(),
            mime_type: String::from_value(value.field("mime_type")?)?,
        })
    }
}

impl From<RemuxedChunks> for Value {
    fn from(chunks: RemuxedChunks) -> Self {
        record([
            ("video", Value::from(chunks.video)),
            ("audio", Value::from(chunks.audio)),
        ])
    }
}

impl FromValue for RemuxedChunks {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        Ok(Self {
            video: value
                .optional_field("video")?
                .map(RemuxedChunk::from_value)
                .transpose()?,
            audio: value
                .optional_field("audio")?
                .map(RemuxedChunk::from_value)
                .transpose()?,
        })
    }
}
