//! TCP client side of the transport.

use super::connection::TcpChannel;
use super::{NetworkChannel, NetworkComponent, PacketListenerRegistry};
use crate::config::NetworkConfig;
use crate::error::{Result, RpcError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::debug;

/// A single outbound connection to a node.
///
/// Packets arriving from the node (including calls it makes back to this
/// process) are dispatched to `listeners`. Dropping the client closes the
/// connection.
pub struct NetworkClient {
    channel: Arc<TcpChannel>,
    addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for NetworkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkClient").field("addr", &self.addr).finish_non_exhaustive()
    }
}

impl NetworkClient {
    /// Connect to a node, using the configured connection timeout.
    pub async fn connect(addr: SocketAddr, listeners: Arc<PacketListenerRegistry>) -> Result<Self> {
        let stream = tokio::time::timeout(NetworkConfig::CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| RpcError::transport(format!("Timed out connecting to {}", addr)))??;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let channel = TcpChannel::spawn(stream, listeners, shutdown_rx)?;

        debug!("RPC client connected to {}", addr);

        Ok(Self {
            channel,
            addr,
            shutdown_tx,
        })
    }

    pub fn channel(&self) -> Arc<TcpChannel> {
        Arc::clone(&self.channel)
    }

    /// Get the address of the connected node.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_active()
    }

    pub fn close(&self) {
        let _ = self.shutdown_tx.send(true);
        self.channel.close();
    }
}

impl NetworkComponent for NetworkClient {
    fn channels(&self) -> Vec<Arc<dyn NetworkChannel>> {
        vec![Arc::clone(&self.channel) as Arc<dyn NetworkChannel>]
    }
}

impl Drop for NetworkClient {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkServer;

    #[tokio::test]
    async fn test_client_connects_and_closes() {
        let mut handle = NetworkServer::bind("127.0.0.1:0", Arc::new(PacketListenerRegistry::new()))
            .await
            .unwrap();

        let client = NetworkClient::connect(handle.addr(), Arc::new(PacketListenerRegistry::new()))
            .await
            .unwrap();
        assert!(client.is_connected());
        assert!(client.first_channel().is_some());

        client.close();
        assert!(!client.is_connected());
        assert!(client.first_channel().is_none());

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_client_connect_to_dead_server_fails() {
        // Use a port that nothing is listening on
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let result = NetworkClient::connect(addr, Arc::new(PacketListenerRegistry::new())).await;

        assert!(result.unwrap_err().is_transport());
    }
}
