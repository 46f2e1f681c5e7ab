//! Typed controller-side access to a worker's session.

use async_trait::async_trait;

use crate::rpc::{FromValue, RpcClient, RpcError, Value};
use crate::session::{ChunkRequest, InputFile, MediaMetadata, RemuxedChunks};

/// Operations the playback controller needs from a remuxing worker.
#[async_trait]
pub trait RemuxService: Clone + Send + Sync + 'static {
    /// Whether `load` has been called on the session.
    async fn is_loaded(&self) -> Result<bool, RpcError>;

    /// # Errors
    /// - `RpcError::Rejected` - Session already loaded or engine failed to start
    async fn load(&self) -> Result<(), RpcError>;

    /// # Errors
    /// - `RpcError::Rejected` - Session not idle or input could not be staged
    async fn set_input_file(&self, file: InputFile) -> Result<(), RpcError>;

    /// # Errors
    /// - `RpcError::Rejected` - Session not idle, no input, or probe failed
    async fn metadata(&self) -> Result<MediaMetadata, RpcError>;

    /// # Errors
    /// - `RpcError::Rejected` - Any session error; see `TranscodeSession::remux_chunk`
    async fn remux_chunk(&self, request: ChunkRequest) -> Result<RemuxedChunks, RpcError>;
}

/// Handle for calling the session inside a worker.
///
/// Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct RemuxerHandle {
    client: RpcClient,
}

impl RemuxerHandle {
    pub fn new(client: RpcClient) -> Self {
        Self { client }
    }

    /// Underlying untyped client, for calling methods by name.
    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    async fn call<T: FromValue>(
        &self,
        method: &str,
        arguments: Vec<Value>,
    ) -> Result<T, RpcError> {
        let value = self.client.call(method, arguments).await?;
        Ok(T::from_value(&value)?)
    }
}

#[async_trait]
impl RemuxService for RemuxerHandle {
    async fn is_loaded(&self) -> Result<bool, RpcError> {
        self.call("isLoaded", vec![]).await
    }

    async fn load(&self) -> Result<(), RpcError> {
        self.call("load", vec![]).await
    }

    async fn set_input_file(&self, file: InputFile) -> Result<(), RpcError> {
        self.call("setInputFile", vec![Value::from(file)]).await
    }

    async fn metadata(&self) -> Result<MediaMetadata, RpcError> {
        self.call("getMetadata", vec![]).await
    }

    async fn remux_chunk(&self, request: ChunkRequest) -> Result<RemuxedChunks, RpcError> {
        self.call("remuxChunk", request.into_arguments()).await
    }
}
