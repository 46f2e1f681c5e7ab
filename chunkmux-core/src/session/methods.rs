//! Remotely callable session methods.

use futures::FutureExt;
use tracing::warn;

use super::SessionError;
use super::transcode::TranscodeSession;
use super::types::{ChunkRequest, InputFile};
use crate::engine::MediaEngine;
use crate::rpc::{
    Arguments, DecodeError, FromValue, HandlerFuture, MethodTable, RemoteError, Value,
};

/// Every method name registered by [`session_methods`].
pub const METHOD_NAMES: &[&str] = &[
    "isLoaded",
    "load",
    "setInputFile",
    "getMetadata",
    "remuxChunk",
];

/// Builds the method table the worker serves a session with.
pub fn session_methods<E: MediaEngine + 'static>() -> MethodTable<TranscodeSession<E>> {
    let mut methods = MethodTable::new();
    methods
        .register("isLoaded", is_loaded::<E>)
        .register("load", load::<E>)
        .register("setInputFile", set_input_file::<E>)
        .register("getMetadata", get_metadata::<E>)
        .register("remuxChunk", remux_chunk::<E>);
    methods
}

fn rejection(method: &str, error: SessionError) -> Value {
    warn!("{} rejected: {}", method, error);
    Value::from(RemoteError::from(error))
}

fn invalid_arguments(method: &str, error: DecodeError) -> SessionError {
    SessionError::InvalidArguments {
        reason: format!("{method}: {error}"),
    }
}

fn is_loaded<E: MediaEngine>(
    session: &mut TranscodeSession<E>,
    _args: Vec<Value>,
) -> HandlerFuture<'_> {
    let loaded = session.is_loaded();
    async move { Ok(Value::from(loaded)) }.boxed()
}

fn load<E: MediaEngine>(session: &mut TranscodeSession<E>, _args: Vec<Value>) -> HandlerFuture<'_> {
    async move {
        session
            .load()
            .await
            .map(|()| Value::Null)
            .map_err(|e| rejection("load", e))
    }
    .boxed()
}

fn set_input_file<E: MediaEngine>(
    session: &mut TranscodeSession<E>,
    args: Vec<Value>,
) -> HandlerFuture<'_> {
    async move {
        let file = args
            .required(0)
            .and_then(InputFile::from_value)
            .map_err(|e| rejection("setInputFile", invalid_arguments("setInputFile", e)))?;

        session
            .set_input_file(file)
            .await
            .map(|()| Value::Null)
            .map_err(|e| rejection("setInputFile", e))
    }
    .boxed()
}

fn get_metadata<E: MediaEngine>(
    session: &mut TranscodeSession<E>,
    _args: Vec<Value>,
) -> HandlerFuture<'_> {
    async move {
        session
            .metadata()
            .await
            .map(Value::from)
            .map_err(|e| rejection("getMetadata", e))
    }
    .boxed()
}

fn remux_chunk<E: MediaEngine>(
    session: &mut TranscodeSession<E>,
    args: Vec<Value>,
) -> HandlerFuture<'_> {
    async move {
        let request = ChunkRequest::from_arguments(&args)
            .map_err(|e| rejection("remuxChunk", invalid_arguments("remuxChunk", e)))?;

        session
            .remux_chunk(request)
            .await
            .map(Value::from)
            .map_err(|e| rejection("remuxChunk", e))
    }
    .boxed()
}
