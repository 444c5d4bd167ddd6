use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::envelope::Envelope;
use crate::envelope::id::{IdGenerator, MessageId};
use crate::error::{ChannelError, Result};
use crate::transport::ExitStatus;

struct PendingEntry {
    event: String,
    timeout: Duration,
    tx: oneshot::Sender<Result<Value>>,
}

#[derive(Default)]
struct PendingTable {
    entries: HashMap<MessageId, PendingEntry>,
    closed: Option<ExitStatus>,
}

/// Owns the pending-request table.
///
/// Every entry is settled at most once: settlement always starts by removing
/// the entry under the table lock, and the outcome is handed to the waiter
/// before the lock is released.
pub struct Correlator {
    ids: IdGenerator,
    pending: Mutex<PendingTable>,
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            ids: IdGenerator::new(),
            pending: Mutex::new(PendingTable::default()),
        }
    }

    pub fn next_id(&self) -> MessageId {
        self.ids.next_id()
    }

    /// Insert a pending entry for `id`. The deadline starts now.
    ///
    /// Fails with `channel-closed` once [`Correlator::close`] has run.
    pub fn register(
        &self,
        id: MessageId,
        event: &str,
        timeout: Duration,
    ) -> Result<PendingRequest<'_>> {
        let (tx, rx) = oneshot::channel();
        let deadline = Instant::now() + timeout;

        let mut table = self.pending.lock();
        if let Some(status) = &table.closed {
            return Err(closed_error(status));
        }
        table.entries.insert(
            id.clone(),
            PendingEntry {
                event: event.to_string(),
                timeout,
                tx,
            },
        );

        Ok(PendingRequest {
            correlator: self,
            id,
            deadline,
            rx,
        })
    }

    /// Route a response envelope to its waiter. Returns `false` when no entry
    /// matches, which is not an error: the request may have timed out, been a
    /// notification, or the response may be a duplicate.
    pub fn settle(&self, response: Envelope) -> bool {
        let mut table = self.pending.lock();
        match table.entries.remove(&response.id) {
            Some(entry) => {
                tracing::debug!(id = %response.id, event = %entry.event, "settling request");
                let _ = entry.tx.send(response.into_outcome());
                true
            }
            None => {
                tracing::trace!(id = %response.id, event = %response.event, "unmatched response dropped");
                false
            }
        }
    }

    /// Reject every pending entry with `channel-closed` and refuse new ones.
    ///
    /// Returns the number of entries rejected, or `None` if the table was
    /// already closed.
    pub fn close(&self, status: &ExitStatus) -> Option<usize> {
        let mut table = self.pending.lock();
        if table.closed.is_some() {
            return None;
        }
        table.closed = Some(status.clone());

        let rejected = table.entries.len();
        for (_, entry) in table.entries.drain() {
            let _ = entry.tx.send(Err(closed_error(status)));
        }
        Some(rejected)
    }

    pub fn is_closed(&self) -> bool {
        self.pending.lock().closed.is_some()
    }

    /// Fails with the recorded closure once the table has been closed.
    pub fn ensure_open(&self) -> Result<()> {
        match &self.pending.lock().closed {
            Some(status) => Err(closed_error(status)),
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.pending.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn expire(&self, id: &MessageId) -> Option<ChannelError> {
        let entry = self.pending.lock().entries.remove(id)?;
        tracing::debug!(%id, event = %entry.event, "request timed out");
        Some(ChannelError::timeout(format!(
            "Request '{}' timed out after {}ms",
            entry.event,
            entry.timeout.as_millis()
        )))
    }

    fn forget(&self, id: &MessageId) {
        self.pending.lock().entries.remove(id);
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.pending.lock();
        f.debug_struct("Correlator")
            .field("pending", &table.entries.len())
            .field("closed", &table.closed.is_some())
            .finish()
    }
}

fn closed_error(status: &ExitStatus) -> ChannelError {
    ChannelError::channel_closed(format!("Channel closed ({})", status))
}

/// Waiter side of a pending entry. Dropping it before settlement removes the
/// entry, so an abandoned request never lingers in the table.
pub struct PendingRequest<'a> {
    correlator: &'a Correlator,
    id: MessageId,
    deadline: Instant,
    rx: oneshot::Receiver<Result<Value>>,
}

impl PendingRequest<'_> {
    pub fn id(&self) -> &MessageId {
        &self.id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Wait for the response, the deadline, or closure, whichever comes first.
    pub async fn wait(mut self) -> Result<Value> {
        match tokio::time::timeout_at(self.deadline, &mut self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(dropped_error()),
            Err(_) => self.expire(),
        }
    }

    /// Settle as timed out. If the entry was settled in the meantime that
    /// outcome wins.
    pub fn expire(mut self) -> Result<Value> {
        match self.correlator.expire(&self.id) {
            Some(err) => Err(err),
            // The outcome was queued before the entry left the table.
            None => self.rx.try_recv().unwrap_or_else(|_| Err(dropped_error())),
        }
    }
}

fn dropped_error() -> ChannelError {
    ChannelError::channel_closed("Request dropped before it was settled")
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        self.correlator.forget(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn response(id: &MessageId, data: Value) -> Envelope {
        Envelope::success(id.clone(), "test", data)
    }

    #[tokio::test]
    async fn test_settle_resolves_waiter() {
        let correlator = Correlator::new();
        let id = correlator.next_id();
        let pending = correlator
            .register(id.clone(), "add", Duration::from_secs(5))
            .unwrap();
        assert_eq!(correlator.len(), 1);

        assert!(correlator.settle(response(&id, json!(5))));
        assert_eq!(pending.wait().await.unwrap(), json!(5));
        assert!(correlator.is_empty());
    }

    #[tokio::test]
    async fn test_settle_is_once_only() {
        let correlator = Correlator::new();
        let id = correlator.next_id();
        let pending = correlator
            .register(id.clone(), "add", Duration::from_secs(5))
            .unwrap();

        assert!(correlator.settle(response(&id, json!(1))));
        assert!(!correlator.settle(response(&id, json!(2))));
        assert_eq!(pending.wait().await.unwrap(), json!(1));
    }

    #[test]
    fn test_unknown_response_is_ignored() {
        let correlator = Correlator::new();
        assert!(!correlator.settle(response(&MessageId::from_raw("nope"), json!(null))));
        assert!(correlator.is_empty());
    }

    #[tokio::test]
    async fn test_error_response_uses_kind() {
        let correlator = Correlator::new();
        let id = correlator.next_id();
        let pending = correlator
            .register(id.clone(), "validate", Duration::from_secs(5))
            .unwrap();

        let err = ChannelError::serialization("bad shape");
        correlator.settle(Envelope::failure(id, "validate", &err));
        assert_eq!(pending.wait().await.unwrap_err(), err);
    }

    #[tokio::test]
    async fn test_timeout_removes_entry() {
        let correlator = Correlator::new();
        let id = correlator.next_id();
        let pending = correlator
            .register(id.clone(), "slow", Duration::from_millis(10))
            .unwrap();

        let err = pending.wait().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.message(), "Request 'slow' timed out after 10ms");
        assert!(correlator.is_empty());

        // A late response has nothing to settle.
        assert!(!correlator.settle(response(&id, json!(1))));
    }

    #[tokio::test]
    async fn test_expire_before_response() {
        let correlator = Correlator::new();
        let id = correlator.next_id();
        let pending = correlator
            .register(id.clone(), "blocked", Duration::from_millis(50))
            .unwrap();

        let err = pending.expire().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.message(), "Request 'blocked' timed out after 50ms");
        assert!(correlator.is_empty());
    }

    #[tokio::test]
    async fn test_expire_keeps_earlier_outcome() {
        let correlator = Correlator::new();
        let id = correlator.next_id();
        let pending = correlator
            .register(id.clone(), "add", Duration::from_secs(5))
            .unwrap();

        correlator.settle(response(&id, json!(5)));
        assert_eq!(pending.expire().unwrap(), json!(5));
    }

    #[tokio::test]
    async fn test_close_rejects_all_and_refuses_new() {
        let correlator = Correlator::new();
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                correlator
                    .register(correlator.next_id(), "work", Duration::from_secs(5))
                    .unwrap()
            })
            .collect();

        let status = ExitStatus::new().with_code(1);
        assert_eq!(correlator.close(&status), Some(3));
        assert_eq!(correlator.close(&status), None);
        assert!(correlator.is_empty());

        for waiter in waiters {
            let err = waiter.wait().await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ChannelClosed);
            assert!(err.message().contains("exit code: 1"));
        }

        let err = correlator
            .register(correlator.next_id(), "late", Duration::from_secs(5))
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::ChannelClosed);
    }

    #[test]
    fn test_dropped_waiter_removes_entry() {
        let correlator = Correlator::new();
        let pending = correlator
            .register(correlator.next_id(), "abandoned", Duration::from_secs(5))
            .unwrap();
        assert_eq!(correlator.len(), 1);

        drop(pending);
        assert!(correlator.is_empty());
    }
}
