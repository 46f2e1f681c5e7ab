//! Bidirectional message transport between a controller context and a worker context.
//!
//! Each direction is an unbounded, ordered queue. Nothing is dropped while
//! the peer endpoint is alive, and there are no request/response semantics
//! at this layer: correlation lives in [`crate::rpc`].

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Errors raised by the transport itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// The peer endpoint has been dropped, so the message cannot be delivered.
    #[error("Peer context has disconnected")]
    Disconnected,
}

/// Creates a connected pair of endpoints.
///
/// The first endpoint sends `A` and receives `B`; the second is its mirror.
pub fn channel<A, B>() -> (Endpoint<A, B>, Endpoint<B, A>) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();

    (
        Endpoint {
            sender: MessageSender { inner: a_tx },
            receiver: MessageReceiver { inner: b_rx },
        },
        Endpoint {
            sender: MessageSender { inner: b_tx },
            receiver: MessageReceiver { inner: a_rx },
        },
    )
}

/// One side of a channel: sends `Out`, receives `In`.
pub struct Endpoint<Out, In> {
    sender: MessageSender<Out>,
    receiver: MessageReceiver<In>,
}

impl<Out, In> Endpoint<Out, In> {
    /// Enqueues a message for delivery to the peer.
    ///
    /// # Errors
    /// - `ChannelError::Disconnected` - The peer endpoint no longer exists
    pub fn send(&self, message: Out) -> Result<(), ChannelError> {
        self.sender.send(message)
    }

    /// Waits for the next incoming message, or `None` once the peer hung up.
    pub async fn recv(&mut self) -> Option<In> {
        self.receiver.recv().await
    }

    /// Splits the endpoint so sending and receiving can live in different tasks.
    pub fn split(self) -> (MessageSender<Out>, MessageReceiver<In>) {
        (self.sender, self.receiver)
    }
}

/// Sending half of an endpoint. Cheap to clone.
pub struct MessageSender<T> {
    inner: mpsc::UnboundedSender<T>,
}

impl<T> Clone for MessageSender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> MessageSender<T> {
    /// Enqueues a message for delivery to the peer.
    ///
    /// # Errors
    /// - `ChannelError::Disconnected` - The peer endpoint no longer exists
    pub fn send(&self, message: T) -> Result<(), ChannelError> {
        self.inner
            .send(message)
            .map_err(|_| ChannelError::Disconnected)
    }

    /// Returns true once the receiving side has been dropped.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

/// Receiving half of an endpoint.
pub struct MessageReceiver<T> {
    inner: mpsc::UnboundedReceiver<T>,
}

impl<T> MessageReceiver<T> {
    /// Waits for the next incoming message, or `None` once the peer hung up.
    pub async fn recv(&mut self) -> Option<T> {
        self.inner.recv().await
    }
}

impl<T: Send + 'static> MessageReceiver<T> {
    /// Delivers every incoming message to `handler`, in arrival order, on a
    /// background task.
    ///
    /// The returned handle completes when the peer disconnects and all queued
    /// messages have been delivered.
    pub fn on_message<F>(mut self, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(T) + Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(message) = self.inner.recv().await {
                handler(message);
            }
        })
    }
}
