//! Caller side of an RPC.
//!
//! An [`RpcSender`] is bound to one remote class and produces [`Rpc`]
//! values, one per method call. An `Rpc` is an immutable description of the
//! call and can be sent in three ways:
//!
//! - `fire_and_forget` writes a one-way packet; nothing is awaited
//! - `fire` returns an [`RpcFuture`] resolving to the decoded result
//! - `fire_sync` blocks the calling thread until the result arrives
//!
//! Each mode has an `_on` variant naming the channel explicitly; the plain
//! variant uses the first active channel of the sender's component. Failed
//! sends are never retried.

use crate::buffer::{DataBuf, DataBufFactory, DataBufMut};
use crate::chain::RpcChain;
use crate::config::NetworkConfig;
use crate::error::{RemoteError, Result, RpcError};
use crate::invoke::IntoArguments;
use crate::network::{NetworkChannel, NetworkComponent, Packet};
use crate::object::{ObjectMapper, Value};
use futures::future::{self, BoxFuture};
use serde::de::DeserializeOwned;
use std::any::{type_name, Any};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::trace;

/// Builds calls against one remote class.
#[derive(Clone)]
pub struct RpcSender {
    class_name: String,
    mapper: Arc<ObjectMapper>,
    buffers: DataBufFactory,
    component: Option<Arc<dyn NetworkComponent>>,
    call_timeout: Option<Duration>,
}

impl RpcSender {
    pub fn new(
        class_name: impl Into<String>,
        mapper: Arc<ObjectMapper>,
        buffers: DataBufFactory,
        component: Option<Arc<dyn NetworkComponent>>,
        call_timeout: Option<Duration>,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            mapper,
            buffers,
            component,
            call_timeout,
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn object_mapper(&self) -> &Arc<ObjectMapper> {
        &self.mapper
    }

    pub fn data_buf_factory(&self) -> &DataBufFactory {
        &self.buffers
    }

    pub fn component(&self) -> Option<&Arc<dyn NetworkComponent>> {
        self.component.as_ref()
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout
    }

    /// Describe a call of `method_name`, encoding `arguments` immediately.
    pub fn invoke_method(&self, method_name: impl Into<String>, arguments: impl IntoArguments) -> Result<Rpc> {
        let arguments = arguments.into_values(&self.mapper)?;
        Ok(Rpc {
            sender: self.clone(),
            method_name: method_name.into(),
            arguments: arguments.into(),
            expects_result: true,
            timeout: self.call_timeout,
        })
    }

    /// The channel used when a call does not name one.
    pub fn default_channel(&self) -> Result<Arc<dyn NetworkChannel>> {
        self.component
            .as_ref()
            .and_then(|component| component.first_channel())
            .ok_or_else(|| RpcError::NoConnection {
                class: self.class_name.clone(),
            })
    }
}

impl fmt::Debug for RpcSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcSender")
            .field("class_name", &self.class_name)
            .field("connected", &self.component.is_some())
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

/// One remote method call.
#[derive(Clone)]
pub struct Rpc {
    sender: RpcSender,
    method_name: String,
    arguments: Arc<[Value]>,
    expects_result: bool,
    timeout: Option<Duration>,
}

impl Rpc {
    pub fn sender(&self) -> &RpcSender {
        &self.sender
    }

    pub fn class_name(&self) -> &str {
        &self.sender.class_name
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    pub fn expects_result(&self) -> bool {
        self.expects_result
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Tell the remote side not to send a result back.
    pub fn disable_result_expectation(mut self) -> Self {
        self.expects_result = false;
        self
    }

    /// Bound the wait for the result; `None` waits until the connection closes.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Start a chain whose next hop runs `next` against this call's result.
    pub fn join(&self, next: Rpc) -> RpcChain {
        RpcChain::of(self.clone()).join(next)
    }

    pub(crate) fn write_hop(&self, buf: &mut DataBufMut, expects_result: bool) {
        buf.write_string(&self.sender.class_name)
            .write_string(&self.method_name)
            .write_bool(expects_result)
            .write_int(self.arguments.len() as i32);
        for argument in self.arguments.iter() {
            argument.write_to(buf);
        }
    }

    pub(crate) fn encode(&self, expects_result: bool) -> DataBuf {
        let mut buf = self.sender.buffers.create_empty();
        buf.write_bool(false);
        self.write_hop(&mut buf, expects_result);
        buf.freeze()
    }

    pub fn fire_and_forget(&self) -> Result<()> {
        self.fire_and_forget_on(&self.sender.default_channel()?)
    }

    pub fn fire_and_forget_on(&self, channel: &Arc<dyn NetworkChannel>) -> Result<()> {
        trace!(class = %self.class_name(), method = %self.method_name, "Sending one-way RPC");
        channel.send_packet(Packet::new(NetworkConfig::RPC_CHANNEL, self.encode(false)))
    }

    /// Send the call; the request is written before this returns.
    pub fn fire<T>(&self) -> RpcFuture<T>
    where
        T: DeserializeOwned + Any + Send,
    {
        match self.sender.default_channel() {
            Ok(channel) => self.fire_on(&channel),
            Err(e) => RpcFuture::ready(Err(e)),
        }
    }

    pub fn fire_on<T>(&self, channel: &Arc<dyn NetworkChannel>) -> RpcFuture<T>
    where
        T: DeserializeOwned + Any + Send,
    {
        send_request(
            channel,
            self.encode(self.expects_result),
            self.expects_result,
            Arc::clone(&self.sender.mapper),
            self.timeout,
        )
    }

    /// Send the call and block the current thread until the result arrives.
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

impl fmt::Debug for Rpc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rpc")
            .field("class_name", &self.sender.class_name)
            .field("method_name", &self.method_name)
            .field("arguments", &self.arguments.len())
            .field("expects_result", &self.expects_result)
            .finish()
    }
}

/// Pending result of a call sent with `fire`.
///
/// Dropping the future stops waiting locally; the remote side still runs
/// the call.
#[must_use = "the result of an RPC is only observed by awaiting its future"]
pub struct RpcFuture<T> {
    inner: BoxFuture<'static, Result<T>>,
    _result: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> RpcFuture<T> {
    pub(crate) fn new(future: impl Future<Output = Result<T>> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(future),
            _result: PhantomData,
        }
    }

    pub(crate) fn ready(result: Result<T>) -> Self {
        Self::new(future::ready(result))
    }
}

impl<T> Future for RpcFuture<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

impl<T> fmt::Debug for RpcFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcFuture").finish_non_exhaustive()
    }
}

/// Send an encoded request and decode the response as `T`.
///
/// Without a result expectation the request is sent one way and the future
/// resolves immediately to `T` decoded from null. A `T` that cannot be built
/// from null is rejected before anything is sent.
pub(crate) fn send_request<T>(
    channel: &Arc<dyn NetworkChannel>,
    content: DataBuf,
    expects_result: bool,
    mapper: Arc<ObjectMapper>,
    timeout: Option<Duration>,
) -> RpcFuture<T>
where
    T: DeserializeOwned + Any + Send,
{
    let packet = Packet::new(NetworkConfig::RPC_CHANNEL, content);

    if !expects_result {
        let result = match mapper.from_value::<T>(Value::Null) {
            Ok(value) => channel.send_packet(packet).map(|()| value),
            Err(_) => Err(RpcError::ResultNotExpected {
                requested: type_name::<T>(),
            }),
        };
        return RpcFuture::ready(result);
    }

    let query = channel.send_query(packet);
    RpcFuture::new(async move {
        let response = match timeout {
            Some(limit) => tokio::time::timeout(limit, query)
                .await
                .map_err(|_| RpcError::Timeout(limit))??,
            None => query.await?,
        };
        read_response(&mapper, response.into_content())
    })
}

/// Decode `bool success` followed by the value or the error descriptor.
pub(crate) fn read_response<T>(mapper: &ObjectMapper, mut content: DataBuf) -> Result<T>
where
    T: DeserializeOwned + Any,
{
    if content.read_bool()? {
        Ok(mapper.read_object::<T>(&mut content)?)
    } else {
        Err(RpcError::Execution(RemoteError::read_from(&mut content)?))
    }
}

/// Run the future produced by `start` to completion on the current thread.
///
/// Inside a multi-thread runtime the worker is handed over with
/// `block_in_place`. A current-thread runtime cannot be blocked, so the
/// call is refused before anything is sent. Outside any runtime a private
/// current-thread runtime drives the future.
pub(crate) fn block_on<F, Fut>(start: F) -> Result<Fut::Output>
where
    F: FnOnce() -> Fut,
    Fut: Future,
{
    match Handle::try_current() {
        Ok(handle) => match handle.runtime_flavor() {
            RuntimeFlavor::CurrentThread => Err(RpcError::BlockingNotSupported),
            _ => {
                let future = start();
                Ok(tokio::task::block_in_place(|| handle.block_on(future)))
            }
        },
        Err(_) => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()?;
            Ok(runtime.block_on(start()))
        }
    }
}
