use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex as SyncMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::error::{TransportError, TransportResult};
use crate::transport::{FrameTransport, TransportStats};

pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Configuration for stream framing
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Maximum frame size in bytes, in both directions
    pub max_frame_size: usize,
    /// Write timeout (None for no timeout)
    pub write_timeout: Option<Duration>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            write_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl StreamConfig {
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }
}

/// Length-prefixed frames over a reader/writer pair, e.g. a child's stdout
/// and stdin.
///
/// Each frame is a 4-byte big-endian length followed by the body.
pub struct StreamFrameTransport<R, W> {
    reader: Mutex<R>,
    writer: Mutex<W>,
    config: StreamConfig,
    connected: AtomicBool,
    stats: SyncMutex<TransportStats>,
    name: String,
}

impl<R, W> StreamFrameTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(name: impl Into<String>, reader: R, writer: W, config: StreamConfig) -> Self {
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            config,
            connected: AtomicBool::new(true),
            stats: SyncMutex::new(TransportStats::default()),
            name: name.into(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn write_frame(&self, data: &[u8]) -> TransportResult<()> {
        let len_bytes = (data.len() as u32).to_be_bytes();

        let mut writer = self.writer.lock().await;
        // An earlier write may have been cut off while we waited for the lock.
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }

        let mut guard = PartialWrite::new(&self.connected);
        writer.write_all(&len_bytes).await?;
        writer.write_all(data).await?;
        writer.flush().await?;
        guard.complete();
        Ok(())
    }
}

/// Marks the stream disconnected unless the frame it covers was written in
/// full, including when the write future is dropped midway. Past a truncated
/// frame the peer's framing is out of sync.
struct PartialWrite<'a> {
    connected: &'a AtomicBool,
    done: bool,
}

impl<'a> PartialWrite<'a> {
    fn new(connected: &'a AtomicBool) -> Self {
        Self {
            connected,
            done: false,
        }
    }

    fn complete(&mut self) {
        self.done = true;
    }
}

impl Drop for PartialWrite<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.connected.store(false, Ordering::Release);
        }
    }
}

#[async_trait]
impl<R, W> FrameTransport for StreamFrameTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn send_frame(&self, data: &[u8]) -> TransportResult<()> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }

        if data.len() > self.config.max_frame_size {
            return Err(TransportError::MessageTooLarge {
                size: data.len(),
                max: self.config.max_frame_size,
            });
        }

        let result = match self.config.write_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.write_frame(data))
                .await
                .unwrap_or_else(|_| {
                    Err(TransportError::SendFailed(format!(
                        "write timed out after {}ms",
                        timeout.as_millis()
                    )))
                }),
            None => self.write_frame(data).await,
        };

        let mut stats = self.stats.lock();
        match result {
            Ok(()) => {
                stats.messages_sent += 1;
                stats.bytes_sent += data.len() as u64 + 4;
                Ok(())
            }
            Err(e) => {
                stats.send_errors += 1;
                Err(e)
            }
        }
    }

    async fn recv_frame(&self) -> TransportResult<Option<Bytes>> {
        let mut reader = self.reader.lock().await;

        let mut len_bytes = [0u8; 4];
        match reader.read_exact(&mut len_bytes).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.connected.store(false, Ordering::Release);
                return Ok(None);
            }
            Err(e) => {
                self.connected.store(false, Ordering::Release);
                self.stats.lock().recv_errors += 1;
                return Err(e.into());
            }
        }

        let len = u32::from_be_bytes(len_bytes) as usize;
        if len > self.config.max_frame_size {
            // The stream is out of sync past this point.
            self.connected.store(false, Ordering::Release);
            self.stats.lock().recv_errors += 1;
            return Err(TransportError::MessageTooLarge {
                size: len,
                max: self.config.max_frame_size,
            });
        }

        let mut buffer = vec![0u8; len];
        if let Err(e) = reader.read_exact(&mut buffer).await {
            self.connected.store(false, Ordering::Release);
            self.stats.lock().recv_errors += 1;
            return Err(e.into());
        }

        let mut stats = self.stats.lock();
        stats.messages_received += 1;
        stats.bytes_received += len as u64 + 4;

        Ok(Some(Bytes::from(buffer)))
    }

    fn stats(&self) -> Option<TransportStats> {
        Some(self.stats.lock().clone())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<R, W> std::fmt::Debug for StreamFrameTransport<R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamFrameTransport")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .finish()
    }
}
