use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::envelope::Envelope;
use crate::error::{BoxError, ChannelError, Result};

/// `Ok(None)` means the handler produced no value and no response is sent.
pub type HandlerResult = std::result::Result<Option<Value>, BoxError>;

#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, data: Value) -> HandlerResult;
}

/// Raw handler over the JSON payload.
pub struct FnHandler<F> {
    func: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, data: Value) -> HandlerResult {
        (self.func)(data).await
    }
}

/// Typed handler that always answers with its return value.
pub struct TypedHandler<Req, Resp, F> {
    func: F,
    _phantom: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp, F, Fut> TypedHandler<Req, Resp, F>
where
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Resp, BoxError>> + Send + 'static,
{
    pub fn new(func: F) -> Self {
        Self {
            func,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<Req, Resp, F, Fut> Handler for TypedHandler<Req, Resp, F>
where
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Resp, BoxError>> + Send + 'static,
{
    async fn handle(&self, data: Value) -> HandlerResult {
        let req = decode_payload::<Req>(data)?;
        let resp = (self.func)(req).await?;
        let value = serde_json::to_value(resp)
            .map_err(|e| ChannelError::serialization(format!("Invalid response: {}", e)))?;
        Ok(Some(value))
    }
}

/// Typed handler for events whose contract declares no response.
pub struct VoidHandler<Req, F> {
    func: F,
    _phantom: PhantomData<fn(Req)>,
}

impl<Req, F, Fut> VoidHandler<Req, F>
where
    Req: DeserializeOwned + Send + 'static,
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
{
    pub fn new(func: F) -> Self {
        Self {
            func,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<Req, F, Fut> Handler for VoidHandler<Req, F>
where
    Req: DeserializeOwned + Send + 'static,
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
{
    async fn handle(&self, data: Value) -> HandlerResult {
        let req = decode_payload::<Req>(data)?;
        (self.func)(req).await?;
        Ok(None)
    }
}

fn decode_payload<Req: DeserializeOwned>(data: Value) -> std::result::Result<Req, ChannelError> {
    serde_json::from_value(data)
        .map_err(|e| ChannelError::serialization(format!("Invalid payload: {}", e)))
}

/// Event name to handler table; each name can be claimed once.
pub struct Dispatcher {
    handlers: RwLock<HashMap<String, Arc<dyn Handler>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, event: impl Into<String>, handler: Arc<dyn Handler>) -> Result<()> {
        let event = event.into();
        match self.handlers.write().entry(event) {
            Entry::Occupied(entry) => Err(ChannelError::invalid_operation(format!(
                "Handler for event '{}' is already registered",
                entry.key()
            ))),
            Entry::Vacant(entry) => {
                tracing::debug!(event = %entry.key(), "handler registered");
                entry.insert(handler);
                Ok(())
            }
        }
    }

    pub fn contains(&self, event: &str) -> bool {
        self.handlers.read().contains_key(event)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Run the handler for an inbound request and build the response to send
    /// back, if any.
    pub async fn dispatch(&self, request: Envelope) -> Option<Envelope> {
        let Envelope {
            id, event, data, ..
        } = request;

        let handler = self.handlers.read().get(&event).cloned();
        let Some(handler) = handler else {
            tracing::debug!(%id, %event, "no handler for event");
            let err = ChannelError::handler_not_found(format!("No handler for event '{}'", event));
            return Some(Envelope::failure(id, event, &err));
        };

        tracing::debug!(%id, %event, "dispatching request");
        let outcome = AssertUnwindSafe(handler.handle(data.unwrap_or(Value::Null)))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(Some(value))) => Some(Envelope::success(id, event, value)),
            Ok(Ok(None)) => None,
            Ok(Err(e)) => {
                let err = ChannelError::from_boxed(e);
                tracing::debug!(%id, %event, kind = %err.kind, "handler failed");
                Some(Envelope::failure(id, event, &err))
            }
            Err(_) => {
                let err = ChannelError::execution(format!("Handler for event '{}' panicked", event));
                tracing::warn!(%id, %event, "handler panicked");
                Some(Envelope::failure(id, event, &err))
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut events: Vec<String> = self.handlers.read().keys().cloned().collect();
        events.sort_unstable();
        f.debug_struct("Dispatcher").field("events", &events).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::id::MessageId;
    use crate::error::ErrorKind;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Deserialize)]
    struct AddRequest {
        a: i64,
        b: i64,
    }

    fn request(event: &str, data: Option<Value>) -> Envelope {
        Envelope::request(MessageId::from_raw("req-1"), event, data)
    }

    #[tokio::test]
    async fn test_typed_handler_replies() {
        let dispatcher = Dispatcher::new();
        dispatcher
            .register(
                "add",
                Arc::new(TypedHandler::new(|req: AddRequest| async move {
                    Ok(req.a + req.b)
                })),
            )
            .unwrap();

        let reply = dispatcher
            .dispatch(request("add", Some(json!({"a": 2, "b": 3}))))
            .await
            .unwrap();
        assert!(reply.is_response);
        assert_eq!(reply.id, MessageId::from_raw("req-1"));
        assert_eq!(reply.data, Some(json!(5)));
        assert!(reply.error.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_registration_keeps_original() {
        let dispatcher = Dispatcher::new();
        dispatcher
            .register(
                "who",
                Arc::new(TypedHandler::new(|_: Value| async { Ok("first") })),
            )
            .unwrap();

        let err = dispatcher
            .register(
                "who",
                Arc::new(TypedHandler::new(|_: Value| async { Ok("second") })),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOperation);
        assert_eq!(dispatcher.handler_count(), 1);
        assert!(dispatcher.contains("who"));
        assert!(!dispatcher.contains("what"));

        let reply = dispatcher.dispatch(request("who", None)).await.unwrap();
        assert_eq!(reply.data, Some(json!("first")));
    }

    #[tokio::test]
    async fn test_missing_handler_synthesizes_error() {
        let dispatcher = Dispatcher::new();
        let reply = dispatcher.dispatch(request("ping", None)).await.unwrap();

        assert!(reply.is_response);
        assert_eq!(reply.error.as_deref(), Some("No handler for event 'ping'"));
        assert_eq!(reply.error_kind, Some(ErrorKind::HandlerNotFound));
    }

    #[tokio::test]
    async fn test_void_handler_sends_nothing() {
        let dispatcher = Dispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        dispatcher
            .register(
                "log",
                Arc::new(VoidHandler::new(move |_: String| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })),
            )
            .unwrap();

        assert!(dispatcher.dispatch(request("log", Some(json!("hi")))).await.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_raw_handler_may_omit_value() {
        let dispatcher = Dispatcher::new();
        dispatcher
            .register(
                "maybe",
                Arc::new(FnHandler::new(|data: Value| async move {
                    Ok(data.as_bool().unwrap_or(false).then(|| json!("yes")))
                })),
            )
            .unwrap();

        let reply = dispatcher.dispatch(request("maybe", Some(json!(true)))).await;
        assert_eq!(reply.unwrap().data, Some(json!("yes")));
        assert!(dispatcher.dispatch(request("maybe", Some(json!(false)))).await.is_none());
    }

    #[tokio::test]
    async fn test_classified_failure_keeps_kind() {
        let dispatcher = Dispatcher::new();
        dispatcher
            .register(
                "validate",
                Arc::new(TypedHandler::new(|_: Value| async {
                    Err::<(), _>(ChannelError::serialization("bad shape").into())
                })),
            )
            .unwrap();

        let reply = dispatcher.dispatch(request("validate", None)).await.unwrap();
        assert_eq!(reply.error.as_deref(), Some("bad shape"));
        assert_eq!(reply.error_kind, Some(ErrorKind::Serialization));
        assert!(reply.data.is_none());
    }

    #[tokio::test]
    async fn test_plain_failure_is_execution() {
        let dispatcher = Dispatcher::new();
        dispatcher
            .register(
                "explode",
                Arc::new(TypedHandler::new(|_: Value| async {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    Err::<(), BoxError>("boom".into())
                })),
            )
            .unwrap();

        let reply = dispatcher.dispatch(request("explode", None)).await.unwrap();
        assert_eq!(reply.error.as_deref(), Some("boom"));
        assert_eq!(reply.error_kind, Some(ErrorKind::Execution));
    }

    #[tokio::test]
    async fn test_bad_payload_is_serialization_error() {
        let dispatcher = Dispatcher::new();
        dispatcher
            .register(
                "add",
                Arc::new(TypedHandler::new(|req: AddRequest| async move {
                    Ok(req.a + req.b)
                })),
            )
            .unwrap();

        let reply = dispatcher
            .dispatch(request("add", Some(json!("not an object"))))
            .await
            .unwrap();
        assert_eq!(reply.error_kind, Some(ErrorKind::Serialization));
    }

    #[tokio::test]
    async fn test_panicking_handler_reports_execution() {
        let dispatcher = Dispatcher::new();
        dispatcher
            .register(
                "crash",
                Arc::new(FnHandler::new(|_: Value| async move {
                    if true {
                        panic!("handler bug");
                    }
                    Ok(None)
                })),
            )
            .unwrap();

        let reply = dispatcher.dispatch(request("crash", None)).await.unwrap();
        assert_eq!(reply.error_kind, Some(ErrorKind::Execution));
        assert_eq!(
            reply.error.as_deref(),
            Some("Handler for event 'crash' panicked")
        );
    }
}
