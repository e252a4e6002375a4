//! The per-transport pending-request rendezvous table.
//!
//! Each transport owns exactly one `PendingTable`. `send` registers an entry
//! before writing to the wire so a response that arrives before the write
//! call returns can never be lost; the reader loop completes entries as
//! responses come in; a timeout removes an entry that never got an answer.
//!
//! The table is keyed by string id rather than a transport-specific wire
//! type so the same implementation serves stdio, legacy SSE, and Streamable
//! HTTP without modification.

use std::collections::HashMap;
use tokio::sync::{oneshot, Mutex};

use mcpc_protocol::JsonRpcResult;

/// One-shot handoff slot for a single in-flight request.
type Slot = oneshot::Sender<JsonRpcResult>;

#[derive(Debug, Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<String, Slot>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Create a rendezvous for `id`. Must be called before the outbound
    /// write so a same-tick response cannot race ahead of registration.
    pub async fn register(&self, id: impl Into<String>) -> oneshot::Receiver<JsonRpcResult> {
        let (tx, rx) = oneshot::channel();
        self.entries.lock().await.insert(id.into(), tx);
        rx
    }

    /// Deliver a response to its matching rendezvous, if one is still
    /// present. Returns `true` if an entry was found and removed.
    ///
    /// A no-op (returns `false`) if the id has no entry: already delivered,
    /// already timed out, or never ours to begin with (e.g. a notification
    /// reusing an id namespace we don't track).
    pub async fn complete(&self, id: &str, result: JsonRpcResult) -> bool {
        let sender = self.entries.lock().await.remove(id);
        match sender {
            Some(tx) => {
                // Ignore send failure: the waiter may have already timed out
                // and dropped its receiver between our lookup and this send.
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    /// Remove an entry without delivering anything. Used on timeout or
    /// transport failure so the entry does not linger forever.
    pub async fn remove(&self, id: &str) {
        self.entries.lock().await.remove(id);
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Drain all entries, dropping their senders. Waiters observe a closed
    /// channel and surface it as a transport error. Used when a transport
    /// restarts and in-flight callers should not be replayed against a new
    /// process or connection.
    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}
