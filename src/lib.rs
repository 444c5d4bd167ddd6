//! procbridge - request/response correlation over a bidirectional message transport
pub mod channel;
pub mod codec;
pub mod config;
pub mod correlator;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod transport;

pub use channel::{Channel, ChannelHandle};
pub use codec::{Codec, JsonCodec};
pub use config::{ChannelConfig, SendOptions};
pub use dispatcher::{FnHandler, Handler, HandlerResult, TypedHandler, VoidHandler};
pub use envelope::Envelope;
pub use envelope::id::MessageId;
pub use error::{
    BoxError, ChannelError, ErrorKind, ErrorRecord, Result, TransportError, TransportResult,
};
pub use transport::framed::FramedTransport;
pub use transport::memory::MemoryTransport;
pub use transport::stream::{StreamConfig, StreamFrameTransport};
pub use transport::{EnvelopeTransport, ExitStatus, FrameTransport, Inbound, TransportStats};
