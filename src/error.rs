use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Boxed error returned by handlers. A [`ChannelError`] inside keeps its kind
/// when it crosses the transport; anything else is reported as `execution`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Classification carried by every error crossing a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Timeout,
    ChannelClosed,
    InvalidOperation,
    HandlerNotFound,
    Serialization,
    Execution,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::ChannelClosed => "channel-closed",
            ErrorKind::InvalidOperation => "invalid-operation",
            ErrorKind::HandlerNotFound => "handler-not-found",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Execution => "execution",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ChannelError {
    pub kind: ErrorKind,
    pub message: String,
    pub trace: Option<String>,
}

impl ChannelError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn channel_closed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ChannelClosed, message)
    }

    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidOperation, message)
    }

    pub fn handler_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::HandlerNotFound, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Execution, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Classify an arbitrary handler failure.
    pub fn from_boxed(err: BoxError) -> Self {
        match err.downcast::<ChannelError>() {
            Ok(err) => *err,
            Err(err) => {
                let message = err.to_string();
                if message.is_empty() {
                    Self::execution("Unknown error")
                } else {
                    Self::execution(message)
                }
            }
        }
    }

    pub fn to_record(&self) -> ErrorRecord {
        ErrorRecord {
            name: "ChannelError".to_string(),
            message: self.message.clone(),
            kind: self.kind,
            trace: self.trace.clone(),
        }
    }
}

/// Structural form of a [`ChannelError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub name: String,
    pub message: String,
    pub kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl From<ErrorRecord> for ChannelError {
    fn from(record: ErrorRecord) -> Self {
        Self {
            kind: record.kind,
            message: record.message,
            trace: record.trace,
        }
    }
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Transport closed")]
    Closed,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ChannelError>;
pub type TransportResult<T> = std::result::Result<T, TransportError>;

impl From<TransportError> for ChannelError {
    fn from(err: TransportError) -> Self {
        let kind = match err {
            TransportError::Closed => ErrorKind::ChannelClosed,
            TransportError::Codec(_) | TransportError::MessageTooLarge { .. } => {
                ErrorKind::Serialization
            }
            TransportError::SendFailed(_) | TransportError::Io(_) => ErrorKind::Unknown,
        };
        ChannelError::new(kind, err.to_string())
    }
}

impl From<serde_json::Error> for ChannelError {
    fn from(err: serde_json::Error) -> Self {
        ChannelError::serialization(err.to_string())
    }
}
