//! Chained calls.
//!
//! A chain runs its hops in order on the remote side; every hop after the
//! first is invoked on the result of the previous one. Only the result of
//! the last hop (the head) travels back to the caller.
//!
//! Chains are values: [`RpcChain::join`] returns a new chain and leaves the
//! one it was called on untouched.

use crate::buffer::DataBuf;
use crate::config::NetworkConfig;
use crate::error::Result;
use crate::network::{NetworkChannel, Packet};
use crate::sender::{block_on, send_request, Rpc, RpcFuture};
use serde::de::DeserializeOwned;
use std::any::Any;
use std::fmt;
use std::iter;
use std::sync::Arc;
use tracing::trace;

#[derive(Clone)]
pub struct RpcChain {
    root: Rpc,
    joins: Arc<[Rpc]>,
}

impl RpcChain {
    /// A chain holding only `root`.
    pub fn of(root: Rpc) -> Self {
        Self {
            root,
            joins: Arc::from(Vec::new()),
        }
    }

    /// Append `next`, returning the longer chain.
    pub fn join(&self, next: Rpc) -> RpcChain {
        Self {
            root: self.root.clone(),
            joins: self.joins.iter().cloned().chain(iter::once(next)).collect(),
        }
    }

    pub fn root_rpc(&self) -> &Rpc {
        &self.root
    }

    pub fn joins(&self) -> &[Rpc] {
        &self.joins
    }

    /// The last call of the chain, whose result is returned to the caller.
    pub fn head(&self) -> &Rpc {
        self.joins.last().unwrap_or(&self.root)
    }

    pub fn len(&self) -> usize {
        1 + self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn hops(&self) -> impl Iterator<Item = &Rpc> {
        iter::once(&self.root).chain(self.joins.iter())
    }

    /// Every hop but the last expects a result; the last one uses `expects_result`.
    pub(crate) fn encode(&self, expects_result: bool) -> DataBuf {
        let mut buf = self.root.sender().data_buf_factory().create_empty();
        buf.write_bool(true).write_int(self.len() as i32);

        let last = self.len() - 1;
        for (index, hop) in self.hops().enumerate() {
            hop.write_hop(&mut buf, index < last || expects_result);
        }
        buf.freeze()
    }

    pub fn fire_and_forget(&self) -> Result<()> {
        self.fire_and_forget_on(&self.root.sender().default_channel()?)
    }

    pub fn fire_and_forget_on(&self, channel: &Arc<dyn NetworkChannel>) -> Result<()> {
        trace!(hops = self.len(), "Sending one-way RPC chain");
        channel.send_packet(Packet::new(NetworkConfig::RPC_CHANNEL, self.encode(false)))
    }

    pub fn fire<T>(&self) -> RpcFuture<T>
    where
        T: DeserializeOwned + Any + Send,
    {
        match self.root.sender().default_channel() {
            Ok(channel) => self.fire_on(&channel),
            Err(e) => RpcFuture::ready(Err(e)),
        }
    }

    pub fn fire_on<T>(&self, channel: &Arc<dyn NetworkChannel>) -> RpcFuture<T>
    where
        T: DeserializeOwned + Any + Send,
    {
        let head = self.head();
        send_request(
            channel,
            self.encode(head.expects_result()),
            head.expects_result(),
            Arc::clone(head.sender().object_mapper()),
            head.call_timeout(),
        )
    }

    pub fn fire_sync<T>(&self) -> Result<T>
    where
        T: DeserializeOwned + Any + Send,
    {
        block_on(|| self.fire::<T>())?
    }

    pub fn fire_sync_on<T>(&self, channel: &Arc<dyn NetworkChannel>) -> Result<T>
    where
        T: DeserializeOwned + Any + Send,
    {
        block_on(|| self.fire_on::<T>(channel))?
    }
}

impl fmt::Debug for RpcChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.hops()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::DataBufFactory;
    use crate::object::{ObjectMapper, Value};
    use crate::sender::RpcSender;

    fn sender(class: &str) -> RpcSender {
        RpcSender::new(
            class,
            Arc::new(ObjectMapper::new()),
            DataBufFactory::default(),
            None,
            None,
        )
    }

    fn read_hop(buf: &mut DataBuf) -> (String, String, bool) {
        let class = buf.read_string().unwrap();
        let method = buf.read_string().unwrap();
        let expects_result = buf.read_bool().unwrap();
        let count = buf.read_int().unwrap();
        for _ in 0..count {
            Value::skip(buf).unwrap();
        }
        (class, method, expects_result)
    }

    #[test]
    fn test_join_returns_new_chain() {
        let get = sender("Lobby").invoke_method("get", ("L1".to_string(),)).unwrap();
        let kick = sender("Lobby").invoke_method("kick_all", ()).unwrap();
        let close = sender("Lobby").invoke_method("close", ()).unwrap();

        let two = get.join(kick);
        let three = two.join(close);

        assert_eq!(two.len(), 2);
        assert_eq!(two.head().method_name(), "kick_all");
        assert_eq!(three.len(), 3);
        assert_eq!(three.root_rpc().method_name(), "get");
        assert_eq!(three.joins().len(), 2);
        assert_eq!(three.head().method_name(), "close");
    }

    #[test]
    fn test_chain_layout() {
        let get = sender("Lobby").invoke_method("get", ("L1".to_string(),)).unwrap();
        let kick = sender("Lobby")
            .invoke_method("kick_all", ())
            .unwrap()
            .disable_result_expectation();
        let chain = get.join(kick);

        let mut buf = chain.encode(chain.head().expects_result());

        assert!(buf.read_bool().unwrap());
        assert_eq!(buf.read_int().unwrap(), 2);
        assert_eq!(read_hop(&mut buf), ("Lobby".into(), "get".into(), true));
        assert_eq!(read_hop(&mut buf), ("Lobby".into(), "kick_all".into(), false));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_one_way_chain_clears_last_flag_only() {
        let get = sender("Lobby").invoke_method("get", ("L1".to_string(),)).unwrap();
        let kick = sender("Lobby").invoke_method("kick_all", ()).unwrap();

        let mut buf = get.join(kick).encode(false);

        buf.read_bool().unwrap();
        buf.read_int().unwrap();
        assert!(read_hop(&mut buf).2);
        assert!(!read_hop(&mut buf).2);
    }
}
