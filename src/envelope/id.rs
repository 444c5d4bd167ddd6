use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CHANNEL_SEQ: AtomicU64 = AtomicU64::new(1);

/// Correlation id linking a request envelope to its response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn from_raw(id: impl Into<String>) -> Self {
        MessageId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        MessageId(id.to_string())
    }
}

/// Mints ids for a single channel instance.
///
/// Ids are `<pid>.<channel seq>.<counter>`: the counter never repeats within a
/// generator and the salt keeps two channels of one process apart.
#[derive(Debug)]
pub struct IdGenerator {
    salt: String,
    next: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        let channel_seq = NEXT_CHANNEL_SEQ.fetch_add(1, Ordering::Relaxed);
        Self {
            salt: format!("{:x}.{:x}", std::process::id(), channel_seq),
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> MessageId {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        MessageId(format!("{}.{}", self.salt, n))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
