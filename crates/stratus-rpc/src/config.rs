//! Centralized configuration for the Stratus RPC engine.
//!
//! This module provides the protocol constants shared by both ends of a
//! connection and the defaults used when building senders and handlers.
//! Runtime overrides go through [`crate::RpcFactory::builder`].

use std::time::Duration;

/// Transport and framing configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    /// Reserved channel carrying every RPC request.
    pub const RPC_CHANNEL: i32 = 1;
    /// Channel on which responses to queries travel back.
    pub const RESPONSE_CHANNEL: i32 = -1;

    pub const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024; // 16MB
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const MAX_CONNECTIONS: usize = 256;

    /// Outbound queue depth at which a connection starts logging backpressure warnings.
    pub const OUTBOUND_QUEUE_WARN: usize = 1024;
}

/// RPC engine defaults.
pub struct RpcConfig;

impl RpcConfig {
    /// Bounded wait applied to `fire`/`fire_sync` unless overridden.
    pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
    pub const METHOD_CACHE_CAPACITY: u64 = 512;
    pub const MAX_CHAIN_LENGTH: usize = 64;
    pub const DEFAULT_BUFFER_CAPACITY: usize = 256;

    /// Nesting limit for decoded codec values.
    pub const MAX_VALUE_DEPTH: usize = 64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_channel_is_distinct_from_rpc_channel() {
        assert_ne!(NetworkConfig::RPC_CHANNEL, NetworkConfig::RESPONSE_CHANNEL);
    }

    #[test]
    fn test_call_timeout_is_bounded() {
        assert!(RpcConfig::DEFAULT_CALL_TIMEOUT > Duration::ZERO);
        assert!(RpcConfig::MAX_CHAIN_LENGTH >= 2);
    }
}
