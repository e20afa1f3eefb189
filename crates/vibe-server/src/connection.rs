use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use vibe_core::ids::ConnectionId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendError {
    /// The peer is gone; the slot holding this handle should be dropped.
    Closed,
    /// The outbound queue is full; this one message was dropped.
    Full,
}

/// Newest presence that did not fit in the queue. Only the latest is kept.
#[derive(Debug, Default)]
struct PendingPresence {
    latest: Mutex<Option<String>>,
    notify: Notify,
}

/// Outbound side of one client connection.
///
/// `send` only enqueues: the network write happens on the connection's
/// writer task, so callers never wait on a slow peer. Presence is never
/// lost to a full queue; it is coalesced into a single pending snapshot
/// that the writer sends once the queue has drained.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<String>,
    closed: CancellationToken,
    pending: Arc<PendingPresence>,
}

impl ConnectionHandle {
    /// Create a handle and the receiving end its writer drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: ConnectionId::new(),
            tx,
            closed: CancellationToken::new(),
            pending: Arc::new(PendingPresence::default()),
        };
        (handle, rx)
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn send(&self, message: String) -> Result<(), SendError> {
        if self.closed.is_cancelled() {
            return Err(SendError::Closed);
        }
        match self.tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    connection_id = %self.id,
                    msg_len = msg.len(),
                    "Send queue full, dropping message"
                );
                Err(SendError::Full)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.closed.cancel();
                Err(SendError::Closed)
            }
        }
    }

    /// Enqueue a presence snapshot. On a full queue it replaces any pending
    /// snapshot instead of being dropped. A snapshot that does get queued
    /// supersedes the pending one.
    pub fn send_presence(&self, message: String) -> Result<(), SendError> {
        if self.closed.is_cancelled() {
            return Err(SendError::Closed);
        }
        match self.tx.try_send(message) {
            Ok(()) => {
                self.pending.latest.lock().take();
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::debug!(connection_id = %self.id, "Send queue full, presence coalesced");
                *self.pending.latest.lock() = Some(msg);
                self.pending.notify.notify_one();
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.closed.cancel();
                Err(SendError::Closed)
            }
        }
    }

    /// Take the coalesced presence, if any. The writer sends it after
    /// everything already queued.
    pub fn take_pending_presence(&self) -> Option<String> {
        self.pending.latest.lock().take()
    }

    /// Resolves when a coalesced presence has been stored.
    pub async fn presence_pending(&self) {
        self.pending.notify.notified().await;
    }

    /// Mark the connection closed. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves once the connection has been closed from either side.
    pub async fn closed(&self) {
        tokio::select! {
            _ = self.closed.cancelled() => {}
            _ = self.tx.closed() => {}
        }
    }
}
