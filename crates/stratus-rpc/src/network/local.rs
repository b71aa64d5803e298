//! In-memory transport.
//!
//! [`LocalChannel::pair`] returns two connected ends. A packet sent on one
//! end is delivered synchronously to the listeners of the other end on the
//! sending thread; responses resolve the waiting query directly. This keeps
//! same-process wiring and tests free of sockets and background tasks.

use super::pending::PendingQueries;
use super::{NetworkChannel, NetworkComponent, Packet, PacketListenerRegistry};
use crate::config::NetworkConfig;
use crate::error::{Result, RpcError};
use futures::future::{self, BoxFuture};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::trace;
use uuid::Uuid;

/// One end of an in-memory connection.
pub struct LocalChannel {
    id: Uuid,
    this: Weak<LocalChannel>,
    peer: Mutex<Weak<LocalChannel>>,
    listeners: Arc<PacketListenerRegistry>,
    pending: PendingQueries,
    active: AtomicBool,
}

impl LocalChannel {
    /// Create two connected ends; packets sent on `a` reach `b_listeners`
    /// and the other way round.
    pub fn pair(
        a_listeners: Arc<PacketListenerRegistry>,
        b_listeners: Arc<PacketListenerRegistry>,
    ) -> (Arc<LocalChannel>, Arc<LocalChannel>) {
        let a = Self::new(a_listeners);
        let b = Self::new(b_listeners);
        *a.peer_lock() = Arc::downgrade(&b);
        *b.peer_lock() = Arc::downgrade(&a);
        (a, b)
    }

    fn new(listeners: Arc<PacketListenerRegistry>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            id: Uuid::new_v4(),
            this: this.clone(),
            peer: Mutex::new(Weak::new()),
            listeners,
            pending: PendingQueries::new(),
            active: AtomicBool::new(true),
        })
    }

    /// Close this end. Waiting queries fail with `ConnectionClosed`.
    pub fn close(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            self.pending.clear();
        }
    }

    /// Number of queries still waiting for a response.
    pub fn pending_queries(&self) -> usize {
        self.pending.len()
    }

    fn peer_lock(&self) -> MutexGuard<'_, Weak<LocalChannel>> {
        self.peer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn peer(&self) -> Result<Arc<LocalChannel>> {
        self.peer_lock()
            .upgrade()
            .filter(|peer| peer.is_active())
            .ok_or(RpcError::ConnectionClosed)
    }

    fn deliver(&self, packet: Packet) {
        if packet.channel() == NetworkConfig::RESPONSE_CHANNEL {
            if !self.pending.complete(packet) {
                trace!("Discarding response without a waiting query");
            }
            return;
        }

        if let Some(this) = self.this.upgrade() {
            let channel: Arc<dyn NetworkChannel> = this;
            self.listeners.dispatch(&channel, packet);
        }
    }
}

impl NetworkChannel for LocalChannel {
    fn channel_id(&self) -> Uuid {
        self.id
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn send_packet(&self, packet: Packet) -> Result<()> {
        if !self.is_active() {
            return Err(RpcError::ConnectionClosed);
        }
        self.peer()?.deliver(packet);
        Ok(())
    }

    fn send_query(&self, packet: Packet) -> BoxFuture<'static, Result<Packet>> {
        let query = self.pending.register();

        // The response may already be complete when this returns
        if let Err(e) = self.send_packet(packet.with_unique_id(query.id())) {
            return Box::pin(future::ready(Err(e)));
        }

        Box::pin(query.wait())
    }
}

impl NetworkComponent for LocalChannel {
    fn channels(&self) -> Vec<Arc<dyn NetworkChannel>> {
        self.this
            .upgrade()
            .map(|this| vec![this as Arc<dyn NetworkChannel>])
            .unwrap_or_default()
    }
}
