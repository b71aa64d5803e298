//! One TCP connection shared by any number of concurrent callers.
//!
//! # Thread Safety
//!
//! Writes are serialized through an unbounded mpsc queue drained by a single
//! writer task, so callers never contend on the socket. A single reader task
//! routes responses to waiting queries by their uuid and hands every other
//! packet to the listener registry on the blocking pool, where handlers may
//! issue nested synchronous calls without stalling the reader.

use super::pending::PendingQueries;
use super::protocol::{decode_packet, encode_packet, read_frame, write_frame};
use super::{NetworkChannel, Packet, PacketListenerRegistry};
use crate::config::NetworkConfig;
use crate::error::{Result, RpcError};
use futures::future::{self, BoxFuture};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};
use uuid::Uuid;

enum Outbound {
    Packet(Packet),
    Close,
}

/// Frame overhead in front of the payload: channel, id flag, id.
const HEADER_SIZE: usize = 4 + 1 + 16;

/// A live TCP connection.
pub struct TcpChannel {
    id: Uuid,
    peer_addr: SocketAddr,
    outbound: mpsc::UnboundedSender<Outbound>,
    queued: Arc<AtomicUsize>,
    pending: PendingQueries,
    active: AtomicBool,
}

impl TcpChannel {
    /// Take ownership of `stream` and start its reader and writer tasks.
    pub(crate) fn spawn(
        stream: TcpStream,
        listeners: Arc<PacketListenerRegistry>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Arc<Self>> {
        let peer_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let channel = Arc::new(Self {
            id: Uuid::new_v4(),
            peer_addr,
            outbound,
            queued: Arc::new(AtomicUsize::new(0)),
            pending: PendingQueries::new(),
            active: AtomicBool::new(true),
        });

        tokio::spawn(Self::write_loop(
            writer,
            outbound_rx,
            Arc::clone(&channel.queued),
            Arc::downgrade(&channel),
        ));
        tokio::spawn(Self::read_loop(
            reader,
            Arc::clone(&channel),
            listeners,
            shutdown,
        ));

        debug!(peer = %peer_addr, id = %channel.id, "Connection established");
        Ok(channel)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Number of queries still waiting for a response.
    pub fn pending_queries(&self) -> usize {
        self.pending.len()
    }

    /// Close the connection. Every waiting query fails with `ConnectionClosed`.
    pub fn close(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            let _ = self.outbound.send(Outbound::Close);
            let abandoned = self.pending.clear();
            debug!(
                peer = %self.peer_addr,
                pending = abandoned,
                "Connection closed"
            );
        }
    }

    async fn read_loop(
        mut reader: OwnedReadHalf,
        channel: Arc<Self>,
        listeners: Arc<PacketListenerRegistry>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let frame = tokio::select! {
                result = read_frame(&mut reader) => {
                    match result {
                        Ok(Some(frame)) => frame,
                        Ok(None) => {
                            debug!(peer = %channel.peer_addr, "Connection closed by peer");
                            break;
                        }
                        Err(e) => {
                            warn!(peer = %channel.peer_addr, "Connection read failed: {}", e);
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    break;
                }
            };

            match decode_packet(frame) {
                Ok(packet) => channel.route(packet, &listeners),
                Err(e) => warn!(peer = %channel.peer_addr, "Dropping malformed packet: {}", e),
            }
        }

        channel.close();
    }

    async fn write_loop(
        mut writer: OwnedWriteHalf,
        mut outbound: mpsc::UnboundedReceiver<Outbound>,
        queued: Arc<AtomicUsize>,
        channel: Weak<Self>,
    ) {
        while let Some(message) = outbound.recv().await {
            let packet = match message {
                Outbound::Packet(packet) => packet,
                Outbound::Close => break,
            };
            queued.fetch_sub(1, Ordering::Relaxed);

            if let Err(e) = write_frame(&mut writer, &encode_packet(&packet)).await {
                warn!("Connection write failed: {}", e);
                if let Some(channel) = channel.upgrade() {
                    channel.close();
                }
                break;
            }
        }

        let _ = writer.shutdown().await;
    }

    fn route(self: &Arc<Self>, packet: Packet, listeners: &Arc<PacketListenerRegistry>) {
        if packet.channel() == NetworkConfig::RESPONSE_CHANNEL {
            self.complete(packet);
            return;
        }

        let listeners = Arc::clone(listeners);
        let channel: Arc<dyn NetworkChannel> = self.clone();
        tokio::task::spawn_blocking(move || listeners.dispatch(&channel, packet));
    }

    fn complete(&self, packet: Packet) {
        if !self.pending.complete(packet) {
            trace!(peer = %self.peer_addr, "Discarding response without a waiting query");
        }
    }
}

impl NetworkChannel for TcpChannel {
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

        let size = HEADER_SIZE + packet.content().readable_bytes();
        if size > NetworkConfig::MAX_PACKET_SIZE {
            return Err(RpcError::PacketTooLarge {
                size,
                max: NetworkConfig::MAX_PACKET_SIZE,
            });
        }

        let depth = self.queued.fetch_add(1, Ordering::Relaxed) + 1;
        if depth == NetworkConfig::OUTBOUND_QUEUE_WARN {
            warn!(peer = %self.peer_addr, depth, "Outbound queue is backing up");
        }

        self.outbound.send(Outbound::Packet(packet)).map_err(|_| {
            self.queued.fetch_sub(1, Ordering::Relaxed);
            RpcError::ConnectionClosed
        })
    }

    fn send_query(&self, packet: Packet) -> BoxFuture<'static, Result<Packet>> {
        let query = self.pending.register();

        if let Err(e) = self.send_packet(packet.with_unique_id(query.id())) {
            return Box::pin(future::ready(Err(e)));
        }

        // close() may have drained the waiters before this query was registered
        if !self.is_active() {
            return Box::pin(future::ready(Err(RpcError::ConnectionClosed)));
        }

        Box::pin(query.wait())
    }
}

impl std::fmt::Debug for TcpChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpChannel")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::DataBuf;
    use crate::network::PacketListener;
    use tokio::net::TcpListener;

    /// Answers every query on channel 5 with its own payload.
    struct EchoListener;

    impl PacketListener for EchoListener {
        fn handle(&self, channel: &Arc<dyn NetworkChannel>, packet: Packet) -> Result<()> {
            match packet.unique_id() {
                Some(id) => channel.send_packet(
                    Packet::new(NetworkConfig::RESPONSE_CHANNEL, packet.into_content())
                        .with_unique_id(id),
                ),
                None => Ok(()),
            }
        }
    }

    async fn connected_pair() -> (Arc<TcpChannel>, Arc<TcpChannel>, watch::Sender<bool>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let server_listeners = Arc::new(PacketListenerRegistry::new());
        server_listeners.add_listener(5, Arc::new(EchoListener));

        let (client_stream, accepted) =
            tokio::join!(TcpStream::connect(addr), listener.accept());
        let server = TcpChannel::spawn(accepted.unwrap().0, server_listeners, shutdown_rx.clone())
            .unwrap();
        let client = TcpChannel::spawn(
            client_stream.unwrap(),
            Arc::new(PacketListenerRegistry::new()),
            shutdown_rx,
        )
        .unwrap();

        (client, server, shutdown_tx)
    }

    #[tokio::test]
    async fn test_query_receives_correlated_response() {
        let (client, _server, _shutdown) = connected_pair().await;

        let first = client.send_query(Packet::new(5, DataBuf::from(vec![1])));
        let second = client.send_query(Packet::new(5, DataBuf::from(vec![2])));
        let (first, second) = tokio::join!(first, second);

        assert_eq!(first.unwrap().content().to_byte_array(), vec![1]);
        assert_eq!(second.unwrap().content().to_byte_array(), vec![2]);
        assert_eq!(client.pending_queries(), 0);
    }

    #[tokio::test]
    async fn test_close_fails_pending_queries() {
        let (client, _server, _shutdown) = connected_pair().await;

        // Channel 6 has no listener, so this query is never answered
        let query = client.send_query(Packet::new(6, DataBuf::empty()));
        client.close();

        assert!(matches!(query.await, Err(RpcError::ConnectionClosed)));
        assert!(!client.is_active());
        assert!(matches!(
            client.send_packet(Packet::new(5, DataBuf::empty())),
            Err(RpcError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_abandoned_queries_release_their_waiters() {
        let (client, _server, _shutdown) = connected_pair().await;

        for _ in 0..16 {
            let query = client.send_query(Packet::new(6, DataBuf::empty()));
            let waited = tokio::time::timeout(std::time::Duration::from_millis(1), query).await;
            assert!(waited.is_err());
        }
        assert_eq!(client.pending_queries(), 0);

        let query = client.send_query(Packet::new(6, DataBuf::empty()));
        assert_eq!(client.pending_queries(), 1);
        drop(query);
        assert_eq!(client.pending_queries(), 0);
    }

    #[tokio::test]
    async fn test_peer_shutdown_closes_connection() {
        let (client, server, shutdown) = connected_pair().await;
        let query = client.send_query(Packet::new(6, DataBuf::empty()));

        shutdown.send(true).unwrap();

        assert!(matches!(query.await, Err(RpcError::ConnectionClosed)));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!server.is_active());
    }
}
