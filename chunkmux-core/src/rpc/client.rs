//! Controller side of the protocol.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use super::RpcError;
use super::message::{CorrelationId, Outcome, Reply, Request};
use super::value::Value;
use crate::channel::{Endpoint, MessageSender};
use crate::config::RpcConfig;

/// Completion records for calls still waiting on a reply.
#[derive(Default)]
struct PendingCalls {
    waiting: Mutex<HashMap<CorrelationId, oneshot::Sender<Outcome>>>,
}

impl PendingCalls {
    fn insert(&self, id: CorrelationId, responder: oneshot::Sender<Outcome>) {
        self.waiting.lock().insert(id, responder);
    }

    fn remove(&self, id: CorrelationId) -> bool {
        self.waiting.lock().remove(&id).is_some()
    }

    fn complete(&self, reply: Reply) {
        let responder = self.waiting.lock().remove(&reply.correlation_id);
        match responder {
            Some(responder) => {
                // The caller may have given up already; nothing to do then.
                let _ = responder.send(reply.outcome);
            }
            None => {
                error!(
                    correlation_id = reply.correlation_id,
                    "Received reply from worker with unmatched correlation id; dropping it"
                );
            }
        }
    }

    /// Drops every responder so waiting callers observe a closed channel.
    fn fail_all(&self) {
        let abandoned: Vec<_> = self.waiting.lock().drain().collect();
        if !abandoned.is_empty() {
            warn!(
                "Worker disconnected with {} calls still pending",
                abandoned.len()
            );
        }
    }

    fn len(&self) -> usize {
        self.waiting.lock().len()
    }
}

/// Generic caller for methods exposed by an [`super::RpcServer`].
///
/// Cloning is cheap and all clones share one correlation id sequence.
#[derive(Clone)]
pub struct RpcClient {
    sender: MessageSender<Request>,
    next_id: Arc<AtomicU64>,
    pending: Arc<PendingCalls>,
    call_timeout: Option<Duration>,
}

impl RpcClient {
    /// Wraps the controller end of a channel.
    ///
    /// Spawns a listener task that routes replies to their callers, so this
    /// must be called from within a tokio runtime.
    pub fn new(endpoint: Endpoint<Request, Reply>, config: &RpcConfig) -> Self {
        let (sender, receiver) = endpoint.split();
        let pending = Arc::new(PendingCalls::default());

        let replies = Arc::clone(&pending);
        let listener = receiver.on_message(move |reply| replies.complete(reply));

        let abandoned = Arc::clone(&pending);
        tokio::spawn(async move {
            let _ = listener.await;
            abandoned.fail_all();
        });

        Self {
            sender,
            next_id: Arc::new(AtomicU64::new(0)),
            pending,
            call_timeout: config.call_timeout,
        }
    }

    /// Calls `method` on the worker and waits for its reply.
    ///
    /// # Errors
    /// - `RpcError::Rejected` - The worker answered with an error value
    /// - `RpcError::Disconnected` - The worker went away before replying
    /// - `RpcError::Timeout` - No reply within the configured call timeout
    pub async fn call(&self, method: &str, arguments: Vec<Value>) -> Result<Value, RpcError> {
        let correlation_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (responder, reply) = oneshot::channel();
        self.pending.insert(correlation_id, responder);

        let request = Request {
            correlation_id,
            method: method.to_string(),
            arguments,
        };

        debug!(correlation_id, method, "Sending request to worker");

        if let Err(e) = self.sender.send(request) {
            self.pending.remove(correlation_id);
            return Err(RpcError::from(e));
        }

        let outcome = match self.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, reply).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.pending.remove(correlation_id);
                    warn!(correlation_id, method, "Call timed out after {:?}", limit);
                    return Err(RpcError::Timeout {
                        method: method.to_string(),
                        after: limit,
                    });
                }
            },
            None => reply.await,
        };

        match outcome.map_err(|_| RpcError::Disconnected)? {
            Outcome::Ok(value) => Ok(value),
            Outcome::Err(value) => Err(RpcError::Rejected(value)),
        }
    }

    /// Number of calls still waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Returns true while the worker end of the channel is still open.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;

    use super::*;
    use crate::channel::channel;
    use crate::rpc::message::{ErrorKind, RemoteError};
    use crate::rpc::server::{HandlerFuture, MethodTable, RpcServer};
    use crate::rpc::value::Arguments;

    struct Adder;

    fn add(_target: &mut Adder, args: Vec<Value>) -> HandlerFuture<'_> {
        async move {
            let a = args
                .required(0)
                .and_then(Value::as_f64)
                .map_err(|e| Value::from(e.to_string()))?;
            let b = args
                .required(1)
                .and_then(Value::as_f64)
                .map_err(|e| Value::from(e.to_string()))?;
            Ok(Value::from(a + b))
        }
        .boxed()
    }

    fn throw(_target: &mut Adder, args: Vec<Value>) -> HandlerFuture<'_> {
        async move { Err(args.into_iter().next().unwrap_or(Value::Null)) }.boxed()
    }

    fn spawn_adder(config: &RpcConfig) -> RpcClient {
        let (client_end, worker_end) = channel::<Request, Reply>();
        let mut methods = MethodTable::new();
        methods.register("add", add).register("throw", throw);
        tokio::spawn(RpcServer::new(Adder, methods).serve(worker_end));
        RpcClient::new(client_end, config)
    }

    #[tokio::test]
    async fn test_round_trip_resolves_to_handler_result() {
        let client = spawn_adder(&RpcConfig::default());

        let sum = client
            .call("add", vec![Value::from(2.0), Value::from(40.0)])
            .await
            .unwrap();

        assert_eq!(sum, Value::from(42.0));
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_thrown_value_rejects_caller() {
        let client = spawn_adder(&RpcConfig::default());

        let err = client
            .call("throw", vec![Value::from("bad input")])
            .await
            .unwrap_err();

        assert!(matches!(err, RpcError::Rejected(Value::Text(ref s)) if s == "bad input"));
    }

    #[tokio::test]
    async fn test_unknown_method_settles_caller() {
        let client = spawn_adder(&RpcConfig::default());

        let err = client.call("multiply", vec![]).await.unwrap_err();

        let remote = err.remote_error().unwrap();
        assert_eq!(remote.kind, ErrorKind::UnknownMethod);
    }

    #[tokio::test]
    async fn test_replies_match_their_requests() {
        let client = spawn_adder(&RpcConfig::default());

        let calls = (0..20).map(|i| {
            let client = client.clone();
            async move {
                client
                    .call("add", vec![Value::from(i as f64), Value::from(1.0)])
                    .await
            }
        });
        let results = futures::future::join_all(calls).await;

        for (i, result) in results.into_iter().enumerate() {
            assert_eq!(result.unwrap(), Value::from(i as f64 + 1.0));
        }
    }

    #[tokio::test]
    async fn test_call_stays_pending_until_reply() {
        let (client_end, mut worker_end) = channel::<Request, Reply>();
        let client = RpcClient::new(client_end, &RpcConfig::default());

        let mut call = tokio_test::task::spawn(client.call("isLoaded", vec![]));
        tokio_test::assert_pending!(call.poll());
        assert_eq!(client.pending_calls(), 1);

        let request = worker_end.recv().await.unwrap();
        assert_eq!(request.method, "isLoaded");
        worker_end
            .send(Reply {
                correlation_id: request.correlation_id,
                outcome: Outcome::Ok(Value::from(true)),
            })
            .unwrap();

        assert_eq!(call.await.unwrap(), Value::from(true));
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_unmatched_reply_is_dropped() {
        let (client_end, mut worker_end) = channel::<Request, Reply>();
        let client = RpcClient::new(client_end, &RpcConfig::default());

        worker_end
            .send(Reply {
                correlation_id: 999,
                outcome: Outcome::Ok(Value::Null),
            })
            .unwrap();

        // A stale reply must not disturb the next real call.
        let call = tokio::spawn({
            let client = client.clone();
            async move { client.call("add", vec![]).await }
        });
        let request = worker_end.recv().await.unwrap();
        worker_end
            .send(Reply {
                correlation_id: request.correlation_id,
                outcome: Outcome::Ok(Value::from(1.0)),
            })
            .unwrap();

        assert_eq!(call.await.unwrap().unwrap(), Value::from(1.0));
    }

    #[tokio::test]
    async fn test_timed_out_call_forgets_pending_record() {
        let (client_end, mut worker_end) = channel::<Request, Reply>();
        let config = RpcConfig {
            call_timeout: Some(Duration::from_millis(20)),
        };
        let client = RpcClient::new(client_end, &config);

        let err = client.call("load", vec![]).await.unwrap_err();
        assert!(matches!(err, RpcError::Timeout { .. }));
        assert_eq!(client.pending_calls(), 0);

        // The late reply now has nobody waiting for it.
        let request = worker_end.recv().await.unwrap();
        worker_end
            .send(Reply {
                correlation_id: request.correlation_id,
                outcome: Outcome::Ok(Value::Null),
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_worker_hangup_fails_pending_calls() {
        let (client_end, mut worker_end) = channel::<Request, Reply>();
        let client = RpcClient::new(client_end, &RpcConfig::default());

        let call = tokio::spawn({
            let client = client.clone();
            async move { client.call("load", vec![]).await }
        });
        let _ = worker_end.recv().await.unwrap();
        drop(worker_end);

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, RpcError::Disconnected));
    }

    #[test]
    fn test_remote_error_extraction() {
        let rejection = RpcError::Rejected(Value::from(RemoteError::new(
            ErrorKind::NoInput,
            "no input configured",
        )));
        assert_eq!(rejection.remote_error().unwrap().kind, ErrorKind::NoInput);

        let opaque = RpcError::Rejected(Value::from("plain text"));
        assert!(opaque.remote_error().is_none());
    }
}
