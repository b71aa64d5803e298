//! TCP server side of the transport.
//!
//! Accepts connections and attaches each one to the shared listener
//! registry. Accepted connections are exposed through
//! [`NetworkServerHandle::component`] so that a node can also issue calls
//! back to the peers connected to it.

use super::connection::TcpChannel;
use super::{NetworkChannel, NetworkComponent, PacketListenerRegistry};
use crate::config::NetworkConfig;
use crate::error::Result;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

/// Connections accepted by a server.
#[derive(Default)]
pub struct ServerConnections {
    channels: RwLock<Vec<Arc<TcpChannel>>>,
}

impl ServerConnections {
    /// Drop closed connections and return how many remain.
    fn prune(&self) -> usize {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        channels.retain(|channel| channel.is_active());
        channels.len()
    }

    fn add(&self, channel: Arc<TcpChannel>) {
        self.channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(channel);
    }

    pub fn len(&self) -> usize {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|channel| channel.is_active())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NetworkComponent for ServerConnections {
    fn channels(&self) -> Vec<Arc<dyn NetworkChannel>> {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|channel| channel.is_active())
            .map(|channel| Arc::clone(channel) as Arc<dyn NetworkChannel>)
            .collect()
    }
}

/// Handle to a running server. Dropping shuts down the server.
pub struct NetworkServerHandle {
    addr: SocketAddr,
    connections: Arc<ServerConnections>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    conn_shutdown_tx: watch::Sender<bool>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl NetworkServerHandle {
    /// Get the address the server is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The accepted connections, usable as the component of a sender.
    pub fn component(&self) -> Arc<ServerConnections> {
        Arc::clone(&self.connections)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Shut down the server gracefully.
    ///
    /// Stops accepting new connections and signals all active connections
    /// to close.
    pub fn shutdown(&mut self) {
        // Signal accept loop to stop
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        // Signal all connections to close
        let _ = self.conn_shutdown_tx.send(true);
    }
}

impl Drop for NetworkServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// TCP server that accepts peer connections.
pub struct NetworkServer;

impl NetworkServer {
    /// Bind to `addr` and start accepting connections in the background.
    pub async fn bind<A: ToSocketAddrs>(
        addr: A,
        listeners: Arc<PacketListenerRegistry>,
    ) -> Result<NetworkServerHandle> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;

        info!("RPC server listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (conn_shutdown_tx, conn_shutdown_rx) = watch::channel(false);
        let connections = Arc::new(ServerConnections::default());

        let task_handle = tokio::spawn(Self::accept_loop(
            listener,
            listeners,
            shutdown_rx,
            conn_shutdown_rx,
            Arc::clone(&connections),
        ));

        Ok(NetworkServerHandle {
            addr,
            connections,
            shutdown_tx: Some(shutdown_tx),
            conn_shutdown_tx,
            task_handle: Some(task_handle),
        })
    }

    async fn accept_loop(
        listener: TcpListener,
        listeners: Arc<PacketListenerRegistry>,
        mut shutdown_rx: oneshot::Receiver<()>,
        conn_shutdown_rx: watch::Receiver<bool>,
        connections: Arc<ServerConnections>,
    ) {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("RPC server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            let current = connections.prune();
                            if current >= NetworkConfig::MAX_CONNECTIONS {
                                warn!(
                                    "Rejecting connection from {}: at max capacity ({})",
                                    peer_addr,
                                    NetworkConfig::MAX_CONNECTIONS
                                );
                                continue;
                            }

                            match TcpChannel::spawn(stream, Arc::clone(&listeners), conn_shutdown_rx.clone()) {
                                Ok(channel) => {
                                    debug!("Accepted connection from {}", peer_addr);
                                    connections.add(channel);
                                }
                                Err(e) => {
                                    warn!("Failed to set up connection from {}: {}", peer_addr, e);
                                }
                            }
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn test_server_start_and_shutdown() {
        let mut handle = NetworkServer::bind("127.0.0.1:0", Arc::new(PacketListenerRegistry::new()))
            .await
            .unwrap();

        assert!(handle.addr().port() > 0);
        assert_eq!(handle.addr().ip(), std::net::Ipv4Addr::LOCALHOST);

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_accepted_connections_are_exposed() {
        let mut handle = NetworkServer::bind("127.0.0.1:0", Arc::new(PacketListenerRegistry::new()))
            .await
            .unwrap();

        let _stream = TcpStream::connect(handle.addr()).await.unwrap();
        for _ in 0..50 {
            if handle.connection_count() == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        assert_eq!(handle.connection_count(), 1);
        assert!(handle.component().first_channel().is_some());

        handle.shutdown();
    }
}
