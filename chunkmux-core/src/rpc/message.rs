//! Wire shape of the controller/worker protocol.
//!
//! These types are the only contract shared by both sides of the channel and
//! must stay stable between controller and worker builds of one version.

use serde::{Deserialize, Serialize};

use super::value::{DecodeError, Value, record};

/// Correlation id linking a request to its reply.
pub type CorrelationId = u64;

/// A method invocation sent from controller to worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub correlation_id: CorrelationId,
    pub method: String,
    pub arguments: Vec<Value>,
}

/// The single reply produced for each request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub correlation_id: CorrelationId,
    pub outcome: Outcome,
}

/// Result of a remote call as it travels back over the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok(Value),
    Err(Value),
}

impl From<Result<Value, Value>> for Outcome {
    fn from(result: Result<Value, Value>) -> Self {
        match result {
            Ok(value) => Outcome::Ok(value),
            Err(value) => Outcome::Err(value),
        }
    }
}

impl From<Outcome> for Result<Value, Value> {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Ok(value) => Ok(value),
            Outcome::Err(value) => Err(value),
        }
    }
}

/// Classification of a failure reported by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidState,
    NoInput,
    StreamNotFound,
    UnsupportedFormat,
    InvalidArguments,
    UnknownMethod,
    Engine,
    EngineTimeout,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidState => "InvalidState",
            ErrorKind::NoInput => "NoInput",
            ErrorKind::StreamNotFound => "StreamNotFound",
            ErrorKind::UnsupportedFormat => "UnsupportedFormat",
            ErrorKind::InvalidArguments => "InvalidArguments",
            ErrorKind::UnknownMethod => "UnknownMethod",
            ErrorKind::Engine => "Engine",
            ErrorKind::EngineTimeout => "EngineTimeout",
            ErrorKind::Internal => "Internal",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        [
            ErrorKind::InvalidState,
            ErrorKind::NoInput,
            ErrorKind::StreamNotFound,
            ErrorKind::UnsupportedFormat,
            ErrorKind::InvalidArguments,
            ErrorKind::UnknownMethod,
            ErrorKind::Engine,
            ErrorKind::EngineTimeout,
            ErrorKind::Internal,
        ]
        .into_iter()
        .find(|kind| kind.as_str() == name)
    }

    /// Programming errors are never worth retrying with the same session.
    pub fn is_programming_error(self) -> bool {
        matches!(
            self,
            ErrorKind::InvalidState
                | ErrorKind::NoInput
                | ErrorKind::InvalidArguments
                | ErrorKind::UnknownMethod
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error value carried in `Outcome::Err`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    pub kind: ErrorKind,
    pub message: String,
    /// Stream at fault, for `StreamNotFound` and `UnsupportedFormat`.
    pub stream_id: Option<String>,
}

impl RemoteError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stream_id: None,
        }
    }

    pub fn with_stream(mut self, stream_id: impl Into<String>) -> Self {
        self.stream_id = Some(stream_id.into());
        self
    }

    /// Reads a remote error back out of a rejection value.
    ///
    /// # Errors
    /// - `DecodeError` - The value is not a well-formed error record
    pub fn from_value(value: &Value) -> Result<Self, DecodeError> {
        let kind_name = value.field("kind")?.as_str()?;
        let kind = ErrorKind::parse(kind_name).ok_or_else(|| DecodeError::InvalidField {
            field: "kind",
            reason: format!("unknown error kind {kind_name}"),
        })?;
        let message = value.field("message")?.as_str()?.to_string();
        let stream_id = value
            .optional_field("stream_id")?
            .map(|v| v.as_str().map(str::to_string))
            .transpose()?;

        Ok(Self {
            kind,
            message,
            stream_id,
        })
    }
}

impl From<RemoteError> for Value {
    fn from(error: RemoteError) -> Self {
        record([
            ("kind", Value::from(error.kind.as_str())),
            ("message", Value::from(error.message)),
            ("stream_id", Value::from(error.stream_id)),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let request = Request {
            correlation_id: 7,
            method: "remuxChunk".to_string(),
            arguments: vec![Value::from(10.0), Value::Null],
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "correlation_id": 7,
                "method": "remuxChunk",
                "arguments": [{"number": 10.0}, "null"]
            })
        );
    }

    #[test]
    fn test_reply_wire_shape() {
        let reply = Reply {
            correlation_id: 3,
            outcome: Outcome::Err(Value::from("boom")),
        };

        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "correlation_id": 3,
                "outcome": {"err": {"text": "boom"}}
            })
        );
    }

    #[test]
    fn test_remote_error_survives_value_encoding() {
        let error = RemoteError::new(ErrorKind::UnsupportedFormat, "mystery codec")
            .with_stream("0:2");

        let decoded = RemoteError::from_value(&Value::from(error.clone())).unwrap();
        assert_eq!(decoded, error);
    }

    #[test]
    fn test_remote_error_rejects_unknown_kind() {
        let value = record([
            ("kind", Value::from("Gremlins")),
            ("message", Value::from("?")),
        ]);
        assert!(matches!(
            RemoteError::from_value(&value),
            Err(DecodeError::InvalidField { field: "kind", .. })
        ));
    }

    #[test]
    fn test_programming_errors() {
        assert!(ErrorKind::InvalidState.is_programming_error());
        assert!(ErrorKind::NoInput.is_programming_error());
        assert!(!ErrorKind::StreamNotFound.is_programming_error());
        assert!(!ErrorKind::UnsupportedFormat.is_programming_error());
    }
}
