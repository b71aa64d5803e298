//! Transport seam.
//!
//! The RPC engine only needs a connection that can send a one-way packet,
//! send a query and await exactly one correlated response, and hand inbound
//! packets to listeners registered per channel id. Those capabilities are
//! the [`NetworkChannel`] and [`PacketListener`] traits; everything else
//! (framing, correlation ids, connection lifecycle) lives in the transports.
//!
//! # Transports
//!
//! - **TCP** ([`NetworkServer`], [`NetworkClient`]): length-prefixed frames,
//!   one reader and one writer task per connection
//! - **Local** ([`local::LocalChannel`]): an in-memory pair for same-process
//!   wiring and tests

pub mod client;
pub mod connection;
pub mod local;
mod pending;
pub mod protocol;
pub mod server;

pub use client::NetworkClient;
pub use connection::TcpChannel;
pub use server::{NetworkServer, NetworkServerHandle};

use crate::buffer::DataBuf;
use crate::error::Result;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{trace, warn};
use uuid::Uuid;

/// A unit of transport traffic.
///
/// `unique_id` is set on queries and echoed on their response.
#[derive(Debug, Clone)]
pub struct Packet {
    channel: i32,
    unique_id: Option<Uuid>,
    content: DataBuf,
}

impl Packet {
    pub fn new(channel: i32, content: DataBuf) -> Self {
        Self {
            channel,
            unique_id: None,
            content,
        }
    }

    pub fn with_unique_id(mut self, id: Uuid) -> Self {
        self.unique_id = Some(id);
        self
    }

    pub fn channel(&self) -> i32 {
        self.channel
    }

    pub fn unique_id(&self) -> Option<Uuid> {
        self.unique_id
    }

    pub fn content(&self) -> &DataBuf {
        &self.content
    }

    pub fn into_content(self) -> DataBuf {
        self.content
    }
}

/// One established connection.
pub trait NetworkChannel: Send + Sync {
    fn channel_id(&self) -> Uuid;

    fn is_active(&self) -> bool;

    /// Queue a packet without expecting an answer.
    fn send_packet(&self, packet: Packet) -> Result<()>;

    /// Queue a packet as a query and await its response.
    ///
    /// The packet is queued before this returns; the returned future only
    /// waits. Dropping it stops waiting but does not recall the query.
    fn send_query(&self, packet: Packet) -> BoxFuture<'static, Result<Packet>>;
}

/// Something that owns connections, such as a server or a client.
pub trait NetworkComponent: Send + Sync {
    fn channels(&self) -> Vec<Arc<dyn NetworkChannel>>;

    /// The first active channel, used when a call does not name one.
    fn first_channel(&self) -> Option<Arc<dyn NetworkChannel>> {
        self.channels().into_iter().find(|channel| channel.is_active())
    }
}

/// Receives inbound packets of one channel id.
///
/// Called on a thread that may block; implementations can issue nested
/// synchronous calls.
pub trait PacketListener: Send + Sync {
    fn handle(&self, channel: &Arc<dyn NetworkChannel>, packet: Packet) -> Result<()>;
}

/// Routes inbound packets to listeners by channel id.
#[derive(Default)]
pub struct PacketListenerRegistry {
    listeners: RwLock<HashMap<i32, Vec<Arc<dyn PacketListener>>>>,
}

impl PacketListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, channel: i32, listener: Arc<dyn PacketListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(channel)
            .or_default()
            .push(listener);
    }

    pub fn remove_listeners(&self, channel: i32) -> usize {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&channel)
            .map_or(0, |removed| removed.len())
    }

    pub fn has_listeners(&self, channel: i32) -> bool {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&channel)
            .is_some_and(|listeners| !listeners.is_empty())
    }

    /// Hand `packet` to every listener of its channel id.
    pub fn dispatch(&self, channel: &Arc<dyn NetworkChannel>, packet: Packet) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&packet.channel())
            .cloned()
            .unwrap_or_default();

        if listeners.is_empty() {
            trace!(channel = packet.channel(), "No listener for inbound packet");
            return;
        }

        for listener in listeners {
            if let Err(e) = listener.handle(channel, packet.clone()) {
                warn!(channel = packet.channel(), "Packet listener failed: {}", e);
            }
        }
    }
}
