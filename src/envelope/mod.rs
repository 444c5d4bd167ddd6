pub mod id;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use self::id::MessageId;
use crate::error::{ChannelError, ErrorKind};

/// Unit exchanged over the transport.
///
/// A response with `error` set is a failure and its `data` is ignored; a
/// response without `error` carries the result in `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub id: MessageId,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_response: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl Envelope {
    /// Outbound request or notification. The two share a shape on the wire;
    /// only the sender knows whether a reply is awaited.
    pub fn request(id: MessageId, event: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            id,
            event: event.into(),
            data,
            is_response: false,
            error: None,
            error_kind: None,
        }
    }

    pub fn success(id: MessageId, event: impl Into<String>, data: Value) -> Self {
        Self {
            id,
            event: event.into(),
            data: Some(data),
            is_response: true,
            error: None,
            error_kind: None,
        }
    }

    pub fn failure(id: MessageId, event: impl Into<String>, error: &ChannelError) -> Self {
        Self {
            id,
            event: event.into(),
            data: None,
            is_response: true,
            error: Some(error.message.clone()),
            error_kind: Some(error.kind),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.is_response && self.error.is_some()
    }

    /// Outcome carried by a response envelope.
    pub fn into_outcome(self) -> Result<Value, ChannelError> {
        match self.error {
            Some(message) => Err(ChannelError::new(
                self.error_kind.unwrap_or(ErrorKind::Unknown),
                message,
            )),
            None => Ok(self.data.unwrap_or(Value::Null)),
        }
    }
}
