//! Correlation of queries with their responses.
//!
//! Every transport keeps one [`PendingQueries`] table. A query registers a
//! waiter under a fresh id and gets a [`PendingQuery`] back; the waiter is
//! removed when the response arrives, when the connection closes, or when
//! the `PendingQuery` is dropped because the caller stopped waiting.

use super::Packet;
use crate::error::{Result, RpcError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::oneshot;
use tracing::trace;
use uuid::Uuid;

type Waiters = Mutex<HashMap<Uuid, oneshot::Sender<Packet>>>;

fn lock(waiters: &Waiters) -> MutexGuard<'_, HashMap<Uuid, oneshot::Sender<Packet>>> {
    waiters.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub(crate) struct PendingQueries {
    waiters: Arc<Waiters>,
}

impl PendingQueries {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self) -> PendingQuery {
        let id = Uuid::new_v4();
        let (waiter, response) = oneshot::channel();
        lock(&self.waiters).insert(id, waiter);
        PendingQuery {
            id,
            response,
            waiters: Arc::downgrade(&self.waiters),
        }
    }

    /// Hand a response to the query it answers. Returns false when nobody
    /// waits for it any more.
    pub(crate) fn complete(&self, packet: Packet) -> bool {
        let waiter = packet
            .unique_id()
            .and_then(|id| lock(&self.waiters).remove(&id));

        match waiter {
            // The receiver may be gone between removal and send
            Some(waiter) => waiter.send(packet).is_ok(),
            None => false,
        }
    }

    /// Fail every waiting query with `ConnectionClosed`. Returns how many were waiting.
    pub(crate) fn clear(&self) -> usize {
        std::mem::take(&mut *lock(&self.waiters)).len()
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.waiters).len()
    }
}

/// A registered query awaiting its response.
pub(crate) struct PendingQuery {
    id: Uuid,
    response: oneshot::Receiver<Packet>,
    waiters: Weak<Waiters>,
}

impl PendingQuery {
    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) async fn wait(mut self) -> Result<Packet> {
        (&mut self.response)
            .await
            .map_err(|_| RpcError::ConnectionClosed)
    }
}

impl Drop for PendingQuery {
    fn drop(&mut self) {
        let Some(waiters) = self.waiters.upgrade() else {
            return;
        };
        if lock(&waiters).remove(&self.id).is_some() {
            trace!(id = %self.id, "Query abandoned before its response arrived");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::DataBuf;
    use crate::config::NetworkConfig;

    fn response(id: Uuid) -> Packet {
        Packet::new(NetworkConfig::RESPONSE_CHANNEL, DataBuf::from(vec![1])).with_unique_id(id)
    }

    #[tokio::test]
    async fn test_response_completes_query() {
        let pending = PendingQueries::new();
        let query = pending.register();
        let id = query.id();

        assert_eq!(pending.len(), 1);
        assert!(pending.complete(response(id)));
        assert_eq!(query.wait().await.unwrap().unique_id(), Some(id));
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn test_dropped_query_is_unregistered() {
        let pending = PendingQueries::new();
        let query = pending.register();
        let id = query.id();

        drop(query);
        assert_eq!(pending.len(), 0);
        assert!(!pending.complete(response(id)));
    }

    #[tokio::test]
    async fn test_timed_out_wait_is_unregistered() {
        let pending = PendingQueries::new();

        for _ in 0..8 {
            let waited =
                tokio::time::timeout(std::time::Duration::from_millis(1), pending.register().wait())
                    .await;
            assert!(waited.is_err());
        }
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn test_clear_fails_waiting_queries() {
        let pending = PendingQueries::new();
        let query = pending.register();

        assert_eq!(pending.clear(), 1);
        assert!(matches!(query.wait().await, Err(RpcError::ConnectionClosed)));
    }
}
