//! Worker context: one transcoding session served over the channel.
//!
//! The session and its engine live only inside the worker task. The
//! controller reaches them exclusively through a [`RemuxerHandle`].

pub mod handle;

use tokio::task::JoinHandle;

pub use handle::{RemuxService, RemuxerHandle};

use crate::channel::channel;
use crate::config::ChunkmuxConfig;
use crate::engine::MediaEngine;
use crate::rpc::{Reply, Request, RpcClient, RpcServer};
use crate::session::{TranscodeSession, session_methods};

/// Spawns a worker around `engine` and returns the controller's handle.
///
/// The worker runs until every clone of the handle has been dropped.
pub fn spawn_worker<E>(config: &ChunkmuxConfig, engine: E) -> RemuxerHandle
where
    E: MediaEngine + 'static,
{
    spawn_worker_with_task(config, engine).0
}

/// Like [`spawn_worker`], also returning the worker task so callers can
/// wait for it to wind down.
pub fn spawn_worker_with_task<E>(
    config: &ChunkmuxConfig,
    engine: E,
) -> (RemuxerHandle, JoinHandle<()>)
where
    E: MediaEngine + 'static,
{
    let (controller_end, worker_end) = channel::<Request, Reply>();
    let session = TranscodeSession::new(engine, config.engine.clone());
    let server = RpcServer::new(session, session_methods());

    let task = tokio::spawn(async move {
        server.serve(worker_end).await;
    });

    let client = RpcClient::new(controller_end, &config.rpc);
    (RemuxerHandle::new(client), task)
}
