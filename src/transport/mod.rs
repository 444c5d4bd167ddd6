use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::Debug;

use crate::envelope::Envelope;
use crate::error::TransportResult;

pub mod framed;
pub mod memory;
pub mod stream;

/// How the peer went away. Every part is optional: a pipe hitting EOF knows
/// none of them, a supervised child process may know all three.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    pub error: Option<String>,
}

impl ExitStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_signal(mut self, signal: i32) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn part<T: std::fmt::Display>(value: &Option<T>) -> String {
            match value {
                Some(v) => v.to_string(),
                None => "None".to_string(),
            }
        }

        write!(
            f,
            "exit code: {}, signal: {}, error: {}",
            part(&self.code),
            part(&self.signal),
            part(&self.error)
        )
    }
}

/// One delivery from the transport's inbound side.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Envelope(Envelope),
    /// Terminal; nothing follows it.
    Closed(ExitStatus),
}

/// Envelope-level transport the channel is layered on.
///
/// Only the channel's pump calls `recv`, so implementations may assume a
/// single reader.
#[async_trait]
pub trait EnvelopeTransport: Send + Sync + Debug {
    async fn send(&self, envelope: &Envelope) -> TransportResult<()>;

    async fn recv(&self) -> Inbound;

    fn stats(&self) -> Option<TransportStats> {
        None
    }

    fn name(&self) -> &str {
        "unknown"
    }
}

/// Byte-level transport carrying whole frames
#[async_trait]
pub trait FrameTransport: Send + Sync + Debug {
    /// Send one frame
    async fn send_frame(&self, data: &[u8]) -> TransportResult<()>;

    /// Receive one frame; `Ok(None)` on a clean end of stream
    async fn recv_frame(&self) -> TransportResult<Option<Bytes>>;

    /// Get transport statistics
    fn stats(&self) -> Option<TransportStats> {
        None
    }

    /// Get transport name/identifier
    fn name(&self) -> &str {
        "unknown"
    }
}

/// Statistics collected by transport implementations
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub send_errors: u64,
    pub recv_errors: u64,
}

impl TransportStats {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Display for TransportStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Transport Statistics:")?;
        writeln!(f, "  Messages sent:     {}", self.messages_sent)?;
        writeln!(f, "  Messages received: {}", self.messages_received)?;
        writeln!(f, "  Bytes sent:        {}", self.bytes_sent)?;
        writeln!(f, "  Bytes received:    {}", self.bytes_received)?;
        writeln!(f, "  Send errors:       {}", self.send_errors)?;
        writeln!(f, "  Receive errors:    {}", self.recv_errors)?;
        Ok(())
    }
}

#[async_trait]
impl<T: EnvelopeTransport + ?Sized> EnvelopeTransport for std::sync::Arc<T> {
    async fn send(&self, envelope: &Envelope) -> TransportResult<()> {
        (**self).send(envelope).await
    }

    async fn recv(&self) -> Inbound {
        (**self).recv().await
    }

    fn stats(&self) -> Option<TransportStats> {
        (**self).stats()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[async_trait]
impl<T: EnvelopeTransport + ?Sized> EnvelopeTransport for Box<T> {
    async fn send(&self, envelope: &Envelope) -> TransportResult<()> {
        (**self).send(envelope).await
    }

    async fn recv(&self) -> Inbound {
        (**self).recv().await
    }

    fn stats(&self) -> Option<TransportStats> {
        (**self).stats()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
