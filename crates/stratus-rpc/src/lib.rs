//! Stratus RPC - binary remote procedure calls between cluster nodes.
//!
//! This crate lets one process invoke a method "on" an object living in
//! another process, receive a typed result or the propagated error, and chain
//! several calls so that the result of one hop becomes the receiver of the
//! next, all without hand-written network code per API.
//!
//! # Example
//!
//! ```rust,ignore
//! use stratus_rpc::{MethodTable, RpcClass, RpcFactory};
//!
//! struct UserService;
//!
//! impl RpcClass for UserService {
//!     const NAME: &'static str = "UserService";
//!
//!     fn method_table() -> MethodTable {
//!         MethodTable::builder::<Self>(Self::NAME)
//!             .method("rename", |_svc: &Self, (_id, _name): (String, String)| true)
//!             .build()
//!     }
//! }
//!
//! let factory = RpcFactory::default();
//! let sender = factory.new_sender_for::<UserService>(Some(component));
//! let renamed: bool = sender
//!     .invoke_method("rename", ("u-1".to_string(), "Bob".to_string()))?
//!     .fire_sync()?;
//! ```

pub mod buffer;
pub mod chain;
pub mod config;
pub mod context;
pub mod error;
pub mod factory;
pub mod handler;
pub mod invoke;
pub mod listener;
pub mod network;
pub mod object;
pub mod owner;
pub mod sender;

// Re-export commonly used types
pub use buffer::{DataBuf, DataBufFactory, DataBufMut};
pub use chain::RpcChain;
pub use config::{NetworkConfig, RpcConfig};
pub use context::{RpcInvocationContext, RpcInvocationContextBuilder};
pub use error::{CodecError, InvocationError, RemoteError, Result, RpcError};
pub use factory::{RpcFactory, RpcFactoryBuilder};
pub use handler::{HandlingResult, RpcHandler, RpcHandlerRegistry};
pub use invoke::{
    IntoArguments, MethodInformation, MethodTable, MethodTableBuilder, Opaque, PrimitiveKind,
    ReturnType, RpcArgs, RpcClass, RpcObject, RpcReturn,
};
pub use listener::RpcPacketListener;
pub use network::{
    NetworkChannel, NetworkComponent, Packet, PacketListener, PacketListenerRegistry,
};
pub use object::{FunctionalObjectSerializer, ObjectMapper, ObjectSerializer, Value};
pub use owner::OwnerToken;
pub use sender::{Rpc, RpcFuture, RpcSender};
