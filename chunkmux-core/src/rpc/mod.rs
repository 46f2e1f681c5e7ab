//! Correlated request/reply protocol on top of [`crate::channel`].
//!
//! The controller calls methods by name through [`RpcClient::call`]; the
//! worker answers through an [`RpcServer`] holding a [`MethodTable`] that is
//! populated once at startup. Every request receives exactly one reply
//! carrying its correlation id.

pub mod client;
pub mod message;
pub mod server;
pub mod value;

use std::time::Duration;

use thiserror::Error;

pub use client::RpcClient;
pub use message::{CorrelationId, ErrorKind, Outcome, RemoteError, Reply, Request};
pub use server::{HandlerFuture, MethodTable, RpcServer};
pub use value::{Arguments, DecodeError, FromValue, Value};

use crate::channel::ChannelError;

/// Failures observed by a caller of [`RpcClient::call`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RpcError {
    /// The worker handled the call and answered with an error value.
    #[error("Call rejected by worker: {0:?}")]
    Rejected(Value),

    /// The worker side of the channel went away before replying.
    #[error("Worker disconnected")]
    Disconnected,

    #[error("Call to {method} timed out after {after:?}")]
    Timeout { method: String, after: Duration },

    /// The reply arrived but did not have the expected shape.
    #[error("Malformed reply: {0}")]
    Decode(#[from] DecodeError),
}

impl RpcError {
    /// Structured worker error, when the rejection carries one.
    pub fn remote_error(&self) -> Option<RemoteError> {
        match self {
            RpcError::Rejected(value) => RemoteError::from_value(value).ok(),
            _ => None,
        }
    }

    /// Kind of the worker error, when the rejection carries one.
    pub fn kind(&self) -> Option<ErrorKind> {
        self.remote_error().map(|e| e.kind)
    }
}

impl From<ChannelError> for RpcError {
    fn from(error: ChannelError) -> Self {
        match error {
            ChannelError::Disconnected => RpcError::Disconnected,
        }
    }
}
