use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc::{
    UnboundedReceiver, UnboundedSender, WeakUnboundedSender, unbounded_channel,
};

use crate::envelope::Envelope;
use crate::error::{TransportError, TransportResult};
use crate::transport::{EnvelopeTransport, ExitStatus, Inbound, TransportStats};

/// In-process envelope transport; one half of a connected pair.
pub struct MemoryTransport {
    peer: UnboundedSender<Inbound>,
    // Weak so that dropping the peer still ends this side's stream.
    inbox: WeakUnboundedSender<Inbound>,
    receiver: tokio::sync::Mutex<UnboundedReceiver<Inbound>>,
    closed: AtomicBool,
    stats: Arc<Mutex<TransportStats>>,
    name: String,
}

impl MemoryTransport {
    /// Create a pair of connected transports.
    pub fn create_pair(name: impl Into<String>) -> (Self, Self) {
        let name = name.into();

        let (tx1, rx1) = unbounded_channel();
        let (tx2, rx2) = unbounded_channel();

        let t1 = Self {
            peer: tx2.clone(),
            inbox: tx1.downgrade(),
            receiver: tokio::sync::Mutex::new(rx1),
            closed: AtomicBool::new(false),
            stats: Arc::new(Mutex::new(TransportStats::default())),
            name: format!("{}-parent", name),
        };

        let t2 = Self {
            peer: tx1,
            inbox: tx2.downgrade(),
            receiver: tokio::sync::Mutex::new(rx2),
            closed: AtomicBool::new(false),
            stats: Arc::new(Mutex::new(TransportStats::default())),
            name: format!("{}-child", name),
        };

        (t1, t2)
    }

    /// Tear the link down as if the peer exited with `status`.
    ///
    /// This side observes `status`; the peer observes a bare close.
    pub fn disconnect(&self, status: ExitStatus) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(inbox) = self.inbox.upgrade() {
            let _ = inbox.send(Inbound::Closed(status));
        }
        let _ = self.peer.send(Inbound::Closed(ExitStatus::new()));
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl EnvelopeTransport for MemoryTransport {
    async fn send(&self, envelope: &Envelope) -> TransportResult<()> {
        if self.is_closed() {
            self.stats.lock().send_errors += 1;
            return Err(TransportError::Closed);
        }

        if self.peer.send(Inbound::Envelope(envelope.clone())).is_err() {
            self.stats.lock().send_errors += 1;
            return Err(TransportError::Closed);
        }

        self.stats.lock().messages_sent += 1;
        Ok(())
    }

    async fn recv(&self) -> Inbound {
        let mut receiver = self.receiver.lock().await;
        let inbound = match receiver.recv().await {
            Some(inbound) => inbound,
            // Both senders gone: the pair was dropped without a close.
            None => Inbound::Closed(ExitStatus::new()),
        };

        match &inbound {
            Inbound::Envelope(_) => self.stats.lock().messages_received += 1,
            Inbound::Closed(_) => self.closed.store(true, Ordering::Release),
        }
        inbound
    }

    fn stats(&self) -> Option<TransportStats> {
        Some(self.stats.lock().clone())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}
