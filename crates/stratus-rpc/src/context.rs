//! Per-hop invocation context.

use crate::buffer::DataBuf;
use crate::error::{Result, RpcError};
use crate::invoke::RpcObject;
use crate::network::NetworkChannel;
use std::fmt;
use std::sync::Arc;

/// Everything a handler needs to perform one invocation.
///
/// Built once per hop and never changed afterwards, except that the handler
/// consumes the argument bytes while decoding.
pub struct RpcInvocationContext {
    method_name: String,
    argument_count: usize,
    arguments: DataBuf,
    expects_result: bool,
    normalize_primitives: bool,
    strict_instance: bool,
    working_instance: Option<RpcObject>,
    channel: Arc<dyn NetworkChannel>,
}

impl RpcInvocationContext {
    pub fn builder() -> RpcInvocationContextBuilder {
        RpcInvocationContextBuilder::default()
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub fn argument_count(&self) -> usize {
        self.argument_count
    }

    pub fn arguments(&self) -> &DataBuf {
        &self.arguments
    }

    pub(crate) fn arguments_mut(&mut self) -> &mut DataBuf {
        &mut self.arguments
    }

    pub fn expects_result(&self) -> bool {
        self.expects_result
    }

    /// Return a primitive's zero value instead of nothing when no receiver is available.
    pub fn normalize_primitives(&self) -> bool {
        self.normalize_primitives
    }

    /// Use only the working instance, never the handler's bound instance.
    pub fn strict_instance(&self) -> bool {
        self.strict_instance
    }

    pub fn working_instance(&self) -> Option<&RpcObject> {
        self.working_instance.as_ref()
    }

    /// The connection the call arrived on.
    pub fn channel(&self) -> &Arc<dyn NetworkChannel> {
        &self.channel
    }
}

impl fmt::Debug for RpcInvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcInvocationContext")
            .field("method_name", &self.method_name)
            .field("argument_count", &self.argument_count)
            .field("expects_result", &self.expects_result)
            .field("normalize_primitives", &self.normalize_primitives)
            .field("strict_instance", &self.strict_instance)
            .field("working_instance", &self.working_instance)
            .finish()
    }
}

/// Builder for [`RpcInvocationContext`].
#[derive(Default)]
pub struct RpcInvocationContextBuilder {
    method_name: Option<String>,
    argument_count: usize,
    arguments: Option<DataBuf>,
    expects_result: bool,
    normalize_primitives: bool,
    strict_instance: bool,
    working_instance: Option<RpcObject>,
    channel: Option<Arc<dyn NetworkChannel>>,
}

impl RpcInvocationContextBuilder {
    pub fn method_name(mut self, name: impl Into<String>) -> Self {
        self.method_name = Some(name.into());
        self
    }

    pub fn argument_count(mut self, count: usize) -> Self {
        self.argument_count = count;
        self
    }

    pub fn arguments(mut self, arguments: DataBuf) -> Self {
        self.arguments = Some(arguments);
        self
    }

    pub fn expects_result(mut self, expects_result: bool) -> Self {
        self.expects_result = expects_result;
        self
    }

    pub fn normalize_primitives(mut self, normalize: bool) -> Self {
        self.normalize_primitives = normalize;
        self
    }

    pub fn strict_instance(mut self, strict: bool) -> Self {
        self.strict_instance = strict;
        self
    }

    pub fn working_instance(mut self, instance: Option<RpcObject>) -> Self {
        self.working_instance = instance;
        self
    }

    pub fn channel(mut self, channel: Arc<dyn NetworkChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Fails if the method name, the argument buffer or the channel is missing.
    pub fn build(self) -> Result<RpcInvocationContext> {
        let method_name = self
            .method_name
            .ok_or(RpcError::InvalidContext { field: "method_name" })?;
        let arguments = self
            .arguments
            .ok_or(RpcError::InvalidContext { field: "arguments" })?;
        let channel = self
            .channel
            .ok_or(RpcError::InvalidContext { field: "channel" })?;

        Ok(RpcInvocationContext {
            method_name,
            argument_count: self.argument_count,
            arguments,
            expects_result: self.expects_result,
            normalize_primitives: self.normalize_primitives,
            strict_instance: self.strict_instance,
            working_instance: self.working_instance,
            channel,
        })
    }
}
