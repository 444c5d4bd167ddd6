use async_trait::async_trait;

use crate::codec::{Codec, JsonCodec};
use crate::envelope::Envelope;
use crate::error::TransportResult;
use crate::transport::{EnvelopeTransport, ExitStatus, FrameTransport, Inbound, TransportStats};

/// Adapter that wraps a FrameTransport to provide EnvelopeTransport functionality.
#[derive(Debug)]
pub struct FramedTransport<F: FrameTransport, C: Codec = JsonCodec> {
    inner: F,
    codec: C,
}

impl<F: FrameTransport> FramedTransport<F, JsonCodec> {
    /// Create a new adapter with the default JsonCodec.
    pub fn new(transport: F) -> Self {
        Self {
            inner: transport,
            codec: JsonCodec,
        }
    }
}

impl<F: FrameTransport, C: Codec> FramedTransport<F, C> {
    /// Create a new adapter with a specific codec.
    pub fn with_codec(transport: F, codec: C) -> Self {
        Self {
            inner: transport,
            codec,
        }
    }

    /// Get a reference to the inner transport.
    pub fn inner(&self) -> &F {
        &self.inner
    }

    /// Consume the adapter and return the inner transport.
    pub fn into_inner(self) -> F {
        self.inner
    }
}

#[async_trait]
impl<F: FrameTransport, C: Codec> EnvelopeTransport for FramedTransport<F, C> {
    async fn send(&self, envelope: &Envelope) -> TransportResult<()> {
        let bytes = self.codec.encode(envelope)?;
        self.inner.send_frame(&bytes).await
    }

    async fn recv(&self) -> Inbound {
        loop {
            match self.inner.recv_frame().await {
                Ok(Some(frame)) => match self.codec.decode::<Envelope>(&frame) {
                    Ok(envelope) => return Inbound::Envelope(envelope),
                    Err(e) => {
                        tracing::warn!(
                            transport = self.inner.name(),
                            frame_len = frame.len(),
                            error = %e,
                            "dropping undecodable frame"
                        );
                    }
                },
                Ok(None) => return Inbound::Closed(ExitStatus::new()),
                Err(e) => return Inbound::Closed(ExitStatus::new().with_error(e.to_string())),
            }
        }
    }

    fn stats(&self) -> Option<TransportStats> {
        self.inner.stats()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::id::MessageId;
    use crate::transport::stream::{StreamConfig, StreamFrameTransport};
    use serde_json::json;
    use tokio::io::{AsyncWriteExt, duplex, split};

    #[tokio::test]
    async fn test_envelopes_over_frames() {
        let (a, b) = duplex(4096);
        let (ar, aw) = split(a);
        let (br, bw) = split(b);
        let ta = FramedTransport::new(StreamFrameTransport::new(
            "a",
            ar,
            aw,
            StreamConfig::default(),
        ));
        let tb = FramedTransport::new(StreamFrameTransport::new(
            "b",
            br,
            bw,
            StreamConfig::default(),
        ));

        let env = Envelope::request(MessageId::from_raw("1"), "add", Some(json!({"a": 2, "b": 3})));
        ta.send(&env).await.unwrap();
        assert_eq!(tb.recv().await, Inbound::Envelope(env));

        drop(ta);
        assert_eq!(tb.recv().await, Inbound::Closed(ExitStatus::new()));
    }

    #[tokio::test]
    async fn test_undecodable_frame_is_skipped() {
        let (raw, b) = duplex(4096);
        let (br, bw) = split(b);
        let tb = FramedTransport::new(StreamFrameTransport::new(
            "b",
            br,
            bw,
            StreamConfig::default(),
        ));

        let (_raw_read, mut raw_write) = split(raw);
        let garbage = b"not json";
        raw_write
            .write_all(&(garbage.len() as u32).to_be_bytes())
            .await
            .unwrap();
        raw_write.write_all(garbage).await.unwrap();

        let good = serde_json::to_vec(&json!({"id": "2", "event": "ok"})).unwrap();
        raw_write
            .write_all(&(good.len() as u32).to_be_bytes())
            .await
            .unwrap();
        raw_write.write_all(&good).await.unwrap();

        match tb.recv().await {
            Inbound::Envelope(env) => {
                assert_eq!(env.id, MessageId::from_raw("2"));
                assert_eq!(env.event, "ok");
            }
            other => panic!("expected envelope, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_explicit_codec_and_inner_access() {
        let (a, b) = duplex(4096);
        let (ar, aw) = split(a);
        let (br, bw) = split(b);
        let ta = FramedTransport::with_codec(
            StreamFrameTransport::new("a", ar, aw, StreamConfig::default()),
            JsonCodec,
        );
        let tb = FramedTransport::new(StreamFrameTransport::new(
            "b",
            br,
            bw,
            StreamConfig::default(),
        ));
        assert_eq!(ta.name(), "a");
        assert!(ta.inner().is_connected());

        let env = Envelope::request(MessageId::from_raw("7"), "note", None);
        ta.send(&env).await.unwrap();
        assert_eq!(tb.recv().await, Inbound::Envelope(env));

        let raw = tb.into_inner();
        assert_eq!(raw.stats().unwrap().messages_received, 1);
    }
}
