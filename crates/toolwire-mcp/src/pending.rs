//! Outstanding request table.

use crate::error::{McpError, McpResult};
use crate::protocol::JsonRpcResponse;
use std::collections::HashMap;
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

/// Delivered to the caller waiting on a request id.
pub type PendingResult = McpResult<JsonRpcResponse>;

/// Requests that have been written but not yet answered.
///
/// Every entry is removed exactly once: by its response, by the caller giving
/// up (write failure or timeout), or by [`PendingRequests::fail_all`].
#[derive(Debug, Default)]
pub struct PendingRequests {
    entries: Mutex<HashMap<u64, oneshot::Sender<PendingResult>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an id and get the receiver its result arrives on.
    ///
    /// Fails if the id is already outstanding.
    pub async fn insert(&self, id: u64) -> McpResult<oneshot::Receiver<PendingResult>> {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(&id) {
            return Err(McpError::InvalidState(format!(
                "request id {id} is already pending"
            )));
        }
        let (tx, rx) = oneshot::channel();
        entries.insert(id, tx);
        Ok(rx)
    }

    /// Hand a response to its waiter.
    ///
    /// Returns `false` when no request with that id is outstanding.
    pub async fn resolve(&self, response: JsonRpcResponse) -> bool {
        let Some(tx) = self.entries.lock().await.remove(&response.id) else {
            return false;
        };
        let id = response.id;
        if tx.send(Ok(response)).is_err() {
            debug!(id, "Caller stopped waiting before the response arrived");
        }
        true
    }

    /// Drop an entry without answering it.
    pub async fn remove(&self, id: u64) -> bool {
        self.entries.lock().await.remove(&id).is_some()
    }

    /// Fail every outstanding request with [`McpError::TransportClosed`].
    ///
    /// Returns how many were failed.
    pub async fn fail_all(&self) -> usize {
        let drained: Vec<_> = self.entries.lock().await.drain().collect();
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(McpError::TransportClosed));
        }
        count
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
