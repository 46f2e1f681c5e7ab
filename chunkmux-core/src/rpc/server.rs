//! Worker side of the protocol: a fixed method table and a serial dispatch loop.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::{debug, error, warn};

use super::message::{ErrorKind, Outcome, RemoteError, Reply, Request};
use super::value::Value;
use crate::channel::Endpoint;

/// Future returned by a method handler; borrows the target for its lifetime.
pub type HandlerFuture<'a> = BoxFuture<'a, Result<Value, Value>>;

type Handler<S> = Box<dyn for<'a> Fn(&'a mut S, Vec<Value>) -> HandlerFuture<'a> + Send + Sync>;

/// Mapping from method name to handler, built once before serving starts.
pub struct MethodTable<S> {
    handlers: HashMap<&'static str, Handler<S>>,
}

impl<S> Default for MethodTable<S> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<S> MethodTable<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `name`, replacing any earlier registration.
    pub fn register<F>(&mut self, name: &'static str, handler: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut S, Vec<Value>) -> HandlerFuture<'a> + Send + Sync + 'static,
    {
        if self.handlers.insert(name, Box::new(handler)).is_some() {
            warn!("Method {} registered twice; keeping the latest handler", name);
        }
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Owns the call target and answers requests one at a time.
pub struct RpcServer<S> {
    target: S,
    methods: MethodTable<S>,
}

impl<S: Send> RpcServer<S> {
    pub fn new(target: S, methods: MethodTable<S>) -> Self {
        Self { target, methods }
    }

    /// Serves requests until the controller hangs up.
    ///
    /// Requests are handled strictly in arrival order; the next request is
    /// not read until the previous reply has been sent.
    pub async fn serve(mut self, mut endpoint: Endpoint<Reply, Request>) {
        debug!(
            "RPC server started with {} registered methods",
            self.methods.len()
        );

        while let Some(request) = endpoint.recv().await {
            let reply = self.dispatch(request).await;
            if endpoint.send(reply).is_err() {
                warn!("Controller disconnected before reply could be delivered");
                break;
            }
        }

        debug!("RPC server stopped");
    }

    /// Runs one request through its handler and builds the reply.
    ///
    /// Unknown methods are answered with an `UnknownMethod` rejection, and a
    /// panicking handler is answered with an `Internal` rejection, so every
    /// request gets exactly one reply.
    pub async fn dispatch(&mut self, request: Request) -> Reply {
        let Request {
            correlation_id,
            method,
            arguments,
        } = request;

        debug!(correlation_id, method = %method, "Dispatching request");

        let result = match self.methods.handlers.get(method.as_str()) {
            Some(handler) => {
                let call = handler(&mut self.target, arguments);
                match AssertUnwindSafe(call).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => {
                        let reason = panic_message(panic.as_ref());
                        error!(correlation_id, method = %method, "Handler panicked: {}", reason);
                        Err(Value::from(RemoteError::new(
                            ErrorKind::Internal,
                            format!("handler for {method} panicked: {reason}"),
                        )))
                    }
                }
            }
            None => {
                error!(
                    correlation_id,
                    "Received request for unknown method {}; is it registered in the method table?",
                    method
                );
                Err(Value::from(RemoteError::new(
                    ErrorKind::UnknownMethod,
                    format!("unknown method {method}"),
                )))
            }
        };

        Reply {
            correlation_id,
            outcome: Outcome::from(result),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::value::Arguments;

    #[derive(Default)]
    struct Calculator {
        calls: usize,
    }

    fn add(calc: &mut Calculator, args: Vec<Value>) -> HandlerFuture<'_> {
        async move {
            calc.calls += 1;
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

    fn fail(_calc: &mut Calculator, _args: Vec<Value>) -> HandlerFuture<'_> {
        async move { Err(Value::from("boom")) }.boxed()
    }

    fn explode(calc: &mut Calculator, _args: Vec<Value>) -> HandlerFuture<'_> {
        async move {
            if calc.calls == 0 {
                panic!("engine fell over");
            }
            Ok(Value::Null)
        }
        .boxed()
    }

    fn server() -> RpcServer<Calculator> {
        let mut methods = MethodTable::new();
        methods
            .register("add", add)
            .register("fail", fail)
            .register("explode", explode);
        RpcServer::new(Calculator::default(), methods)
    }

    fn request(id: u64, method: &str, arguments: Vec<Value>) -> Request {
        Request {
            correlation_id: id,
            method: method.to_string(),
            arguments,
        }
    }

    #[tokio::test]
    async fn test_dispatch_ok_carries_correlation_id() {
        let mut server = server();

        let reply = server
            .dispatch(request(41, "add", vec![Value::from(2.0), Value::from(3.0)]))
            .await;

        assert_eq!(reply.correlation_id, 41);
        assert_eq!(reply.outcome, Outcome::Ok(Value::from(5.0)));
        assert_eq!(server.target.calls, 1);
    }

    #[tokio::test]
    async fn test_dispatch_error_becomes_rejection() {
        let mut server = server();

        let reply = server.dispatch(request(1, "fail", vec![])).await;

        assert_eq!(reply.outcome, Outcome::Err(Value::from("boom")));
    }

    #[tokio::test]
    async fn test_dispatch_panic_becomes_internal_rejection() {
        let mut server = server();

        let reply = server.dispatch(request(2, "explode", vec![])).await;

        let Outcome::Err(value) = reply.outcome else {
            panic!("expected rejection");
        };
        let error = RemoteError::from_value(&value).unwrap();
        assert_eq!(error.kind, ErrorKind::Internal);
        assert!(error.message.contains("engine fell over"));
    }

    #[tokio::test]
    async fn test_unknown_method_is_answered() {
        let mut server = server();

        let reply = server.dispatch(request(9, "divide", vec![])).await;

        assert_eq!(reply.correlation_id, 9);
        let Outcome::Err(value) = reply.outcome else {
            panic!("expected rejection");
        };
        assert_eq!(
            RemoteError::from_value(&value).unwrap().kind,
            ErrorKind::UnknownMethod
        );
    }

    #[test]
    fn test_method_table_registration() {
        let mut methods = MethodTable::<Calculator>::new();
        assert!(methods.is_empty());

        methods.register("add", add);
        assert!(methods.contains("add"));
        assert!(!methods.contains("sub"));
        assert_eq!(methods.len(), 1);
    }
}
