use futures::StreamExt;
use futures::stream::FuturesUnordered;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::config::{ChannelConfig, SendOptions, validate_timeout};
use crate::correlator::Correlator;
use crate::dispatcher::{Dispatcher, Handler, TypedHandler, VoidHandler};
use crate::envelope::Envelope;
use crate::error::{BoxError, ChannelError, Result};
use crate::transport::{EnvelopeTransport, ExitStatus, Inbound};

type ExitObserver = Box<dyn FnOnce(&ExitStatus) + Send>;

#[derive(Default)]
struct ExitState {
    observers: Vec<ExitObserver>,
    status: Option<ExitStatus>,
}

struct ChannelInner<T> {
    transport: T,
    correlator: Correlator,
    dispatcher: Dispatcher,
    exit: Mutex<ExitState>,
    default_timeout: Mutex<Duration>,
    // Flipped once by `close`; stops every running pump.
    closing: watch::Sender<bool>,
}

/// Request/response endpoint over an [`EnvelopeTransport`].
///
/// Cloning is cheap and every clone drives the same tables. Inbound traffic
/// is only processed after [`Channel::start`].
pub struct Channel<T: EnvelopeTransport> {
    inner: Arc<ChannelInner<T>>,
}

impl<T: EnvelopeTransport> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: EnvelopeTransport + 'static> Channel<T> {
    pub fn new(transport: T) -> Self {
        Self::build(transport, ChannelConfig::default())
    }

    pub fn with_config(transport: T, config: ChannelConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(transport, config))
    }

    fn build(transport: T, config: ChannelConfig) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                transport,
                correlator: Correlator::new(),
                dispatcher: Dispatcher::new(),
                exit: Mutex::new(ExitState::default()),
                default_timeout: Mutex::new(config.default_timeout),
                closing: watch::Sender::new(false),
            }),
        }
    }

    /// Spawn the task that reads the transport, settles responses and runs
    /// handlers. It ends when the channel closes, either through the transport
    /// or [`Channel::handle_close`]; handlers still running are dropped.
    pub fn start(&self) -> ChannelHandle {
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move { inner.pump().await });
        ChannelHandle { handle }
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Send a request and wait for its response using the default timeout.
    pub async fn send<Req, Resp>(&self, event: &str, data: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        self.send_with(event, data, SendOptions::default()).await
    }

    pub async fn send_with<Req, Resp>(
        &self,
        event: &str,
        data: &Req,
        options: SendOptions,
    ) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let payload = to_payload(data)?;
        let value = self.send_value(event, payload, options).await?;
        serde_json::from_value(value).map_err(|e| {
            ChannelError::serialization(format!("Invalid response for event '{}': {}", event, e))
        })
    }

    /// Untyped form of [`Channel::send_with`].
    pub async fn send_value(
        &self,
        event: &str,
        data: Option<Value>,
        options: SendOptions,
    ) -> Result<Value> {
        let timeout = match options.timeout {
            Some(timeout) => {
                validate_timeout(timeout)?;
                timeout
            }
            None => self.default_timeout(),
        };

        let correlator = &self.inner.correlator;
        let id = correlator.next_id();
        let pending = correlator.register(id.clone(), event, timeout)?;
        let envelope = Envelope::request(id, event, data);

        tracing::debug!(
            id = %envelope.id,
            event,
            timeout = ?timeout,
            "sending request"
        );

        // The write shares the request's deadline. Dropping `pending` on a
        // failed write removes the entry.
        let sent = self.inner.transport.send(&envelope);
        match tokio::time::timeout_at(pending.deadline(), sent).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::debug!(id = %envelope.id, event, "request timed out while sending");
                return pending.expire();
            }
        }
        pending.wait().await
    }

    /// Fire-and-forget. Nothing is tracked; a response to it, if the peer
    /// sends one, is dropped on arrival.
    pub async fn notify<Req>(&self, event: &str, data: &Req) -> Result<()>
    where
        Req: Serialize + ?Sized,
    {
        self.inner.correlator.ensure_open()?;

        let payload = to_payload(data)?;
        let envelope = Envelope::request(self.inner.correlator.next_id(), event, payload);
        tracing::debug!(id = %envelope.id, event, "sending notification");

        self.inner.transport.send(&envelope).await?;
        Ok(())
    }

    /// Register the handler for `event`; it answers every request with its
    /// return value. A handler returning `()` still answers, with `null`; use
    /// [`Channel::on_void`] or [`Channel::on_handler`] for events that get no
    /// response.
    pub fn on<Req, Resp, F, Fut>(&self, event: impl Into<String>, func: F) -> Result<()>
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Resp, BoxError>> + Send + 'static,
    {
        self.on_handler(event, Arc::new(TypedHandler::new(func)))
    }

    /// Register a handler that never answers on success. Failures are still
    /// reported back to the sender.
    pub fn on_void<Req, F, Fut>(&self, event: impl Into<String>, func: F) -> Result<()>
    where
        Req: DeserializeOwned + Send + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
    {
        self.on_handler(event, Arc::new(VoidHandler::new(func)))
    }

    pub fn on_handler(&self, event: impl Into<String>, handler: Arc<dyn Handler>) -> Result<()> {
        self.inner.dispatcher.register(event, handler)
    }

    /// Observe transport closure. Observers run once, in registration order;
    /// one registered after closure runs immediately.
    pub fn on_exit<F>(&self, observer: F)
    where
        F: FnOnce(&ExitStatus) + Send + 'static,
    {
        let mut exit = self.inner.exit.lock();
        if let Some(status) = exit.status.clone() {
            drop(exit);
            observer(&status);
            return;
        }
        exit.observers.push(Box::new(observer));
    }

    pub fn set_default_timeout(&self, timeout: Duration) -> Result<()> {
        validate_timeout(timeout)?;
        *self.inner.default_timeout.lock() = timeout;
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        *self.inner.default_timeout.lock()
    }

    /// Tear the channel down: reject all pending requests with
    /// `channel-closed`, then notify exit observers. Only the first call has
    /// any effect.
    pub fn handle_close(&self, status: ExitStatus) {
        self.inner.close(status);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.correlator.is_closed()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.correlator.len()
    }

    pub fn handler_count(&self) -> usize {
        self.inner.dispatcher.handler_count()
    }
}

impl<T: EnvelopeTransport + 'static> ChannelInner<T> {
    async fn pump(self: Arc<Self>) {
        let mut in_flight = FuturesUnordered::new();
        let mut closing = self.closing.subscribe();
        // Kept alive across iterations: a half-read frame must not be lost
        // when a handler finishes first.
        let mut inbound = self.transport.recv();

        loop {
            tokio::select! {
                _ = async {
                    let _ = closing.wait_for(|closed| *closed).await;
                } => break,
                received = &mut inbound => {
                    if self.correlator.is_closed() {
                        break;
                    }
                    match received {
                        Inbound::Envelope(envelope) if envelope.is_response => {
                            self.correlator.settle(envelope);
                        }
                        Inbound::Envelope(envelope) => {
                            let inner = self.clone();
                            in_flight.push(async move { inner.respond(envelope).await });
                        }
                        Inbound::Closed(status) => {
                            self.close(status);
                            break;
                        }
                    }
                    inbound = self.transport.recv();
                }
                Some(()) = in_flight.next(), if !in_flight.is_empty() => {}
            }
        }
    }

    async fn respond(&self, request: Envelope) {
        let Some(reply) = self.dispatcher.dispatch(request).await else {
            return;
        };

        if let Err(e) = self.transport.send(&reply).await {
            tracing::warn!(
                id = %reply.id,
                event = %reply.event,
                error = %e,
                "failed to send response"
            );
        }
    }

    fn close(&self, status: ExitStatus) {
        let Some(rejected) = self.correlator.close(&status) else {
            return;
        };
        tracing::info!(
            transport = self.transport.name(),
            %status,
            rejected,
            "channel closed"
        );
        self.closing.send_replace(true);

        let observers = {
            let mut exit = self.exit.lock();
            exit.status = Some(status.clone());
            std::mem::take(&mut exit.observers)
        };
        for observer in observers {
            observer(&status);
        }
    }
}

fn to_payload<Req: Serialize + ?Sized>(data: &Req) -> Result<Option<Value>> {
    match serde_json::to_value(data)? {
        Value::Null => Ok(None),
        value => Ok(Some(value)),
    }
}

impl<T: EnvelopeTransport> Debug for Channel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("transport", &self.inner.transport)
            .field("correlator", &self.inner.correlator)
            .field("dispatcher", &self.inner.dispatcher)
            .field("default_timeout", &*self.inner.default_timeout.lock())
            .finish()
    }
}

pub struct ChannelHandle {
    handle: tokio::task::JoinHandle<()>,
}

impl ChannelHandle {
    /// Wait for the transport to close and the pump to finish.
    pub async fn join(self) {
        let _ = self.handle.await;
    }

    /// Stop reading the transport. Pending requests are left to their
    /// timeouts.
    pub async fn shutdown(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
