//! Construction of senders, handlers and the request listener.
//!
//! The factory carries the codec, the buffer factory and the call policy
//! so that every sender and handler of a node shares them.

use crate::buffer::DataBufFactory;
use crate::config::RpcConfig;
use crate::handler::{RpcHandler, RpcHandlerRegistry};
use crate::invoke::{MethodTable, RpcClass, RpcObject};
use crate::listener::RpcPacketListener;
use crate::network::NetworkComponent;
use crate::object::ObjectMapper;
use crate::sender::RpcSender;
use std::sync::Arc;
use std::time::Duration;

/// Creates senders and handlers sharing one codec.
#[derive(Debug, Clone)]
pub struct RpcFactory {
    mapper: Arc<ObjectMapper>,
    buffers: DataBufFactory,
    call_timeout: Option<Duration>,
    method_cache_capacity: u64,
}

impl RpcFactory {
    pub fn new(mapper: Arc<ObjectMapper>, buffers: DataBufFactory) -> Self {
        Self::builder().object_mapper(mapper).buffer_factory(buffers).build()
    }

    pub fn builder() -> RpcFactoryBuilder {
        RpcFactoryBuilder::default()
    }

    pub fn object_mapper(&self) -> &Arc<ObjectMapper> {
        &self.mapper
    }

    pub fn data_buf_factory(&self) -> &DataBufFactory {
        &self.buffers
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout
    }

    /// A sender for `class_name`. Without a component every call must name its channel.
    pub fn new_sender(
        &self,
        class_name: impl Into<String>,
        component: Option<Arc<dyn NetworkComponent>>,
    ) -> RpcSender {
        RpcSender::new(
            class_name,
            Arc::clone(&self.mapper),
            self.buffers,
            component,
            self.call_timeout,
        )
    }

    pub fn new_sender_for<T: RpcClass>(&self, component: Option<Arc<dyn NetworkComponent>>) -> RpcSender {
        self.new_sender(T::NAME, component)
    }

    /// A handler for the class described by `methods`, optionally bound to an instance.
    pub fn new_handler(&self, methods: MethodTable, bound_instance: Option<RpcObject>) -> RpcHandler {
        RpcHandler::new(
            methods,
            bound_instance,
            Arc::clone(&self.mapper),
            self.buffers,
            self.method_cache_capacity,
        )
    }

    pub fn new_handler_for<T: RpcClass>(&self, instance: Option<Arc<T>>) -> RpcHandler {
        self.new_handler(T::method_table(), instance.map(RpcObject::opaque))
    }

    /// The listener that dispatches requests to handlers of `registry`.
    pub fn new_packet_listener(&self, registry: Arc<RpcHandlerRegistry>) -> RpcPacketListener {
        RpcPacketListener::with_codec(registry, Arc::clone(&self.mapper), self.buffers)
    }
}

impl Default for RpcFactory {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`RpcFactory`].
#[derive(Debug)]
pub struct RpcFactoryBuilder {
    mapper: Option<Arc<ObjectMapper>>,
    buffers: DataBufFactory,
    call_timeout: Option<Duration>,
    method_cache_capacity: u64,
}

impl Default for RpcFactoryBuilder {
    fn default() -> Self {
        Self {
            mapper: None,
            buffers: DataBufFactory::default(),
            call_timeout: Some(RpcConfig::DEFAULT_CALL_TIMEOUT),
            method_cache_capacity: RpcConfig::METHOD_CACHE_CAPACITY,
        }
    }
}

impl RpcFactoryBuilder {
    /// Default wait for results; `None` waits until the connection closes.
    pub fn call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn method_cache_capacity(mut self, capacity: u64) -> Self {
        self.method_cache_capacity = capacity;
        self
    }

    pub fn object_mapper(mut self, mapper: Arc<ObjectMapper>) -> Self {
        self.mapper = Some(mapper);
        self
    }

    pub fn buffer_factory(mut self, buffers: DataBufFactory) -> Self {
        self.buffers = buffers;
        self
    }

    pub fn build(self) -> RpcFactory {
        RpcFactory {
            mapper: self.mapper.unwrap_or_else(|| Arc::new(ObjectMapper::new())),
            buffers: self.buffers,
            call_timeout: self.call_timeout,
            method_cache_capacity: self.method_cache_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Queue;

    impl RpcClass for Queue {
        const NAME: &'static str = "Queue";

        fn method_table() -> MethodTable {
            MethodTable::builder::<Self>(Self::NAME)
                .method("size", |_queue: &Queue, (): ()| 3i32)
                .build()
        }
    }

    #[test]
    fn test_defaults() {
        let factory = RpcFactory::default();

        assert_eq!(factory.call_timeout(), Some(RpcConfig::DEFAULT_CALL_TIMEOUT));
        assert!(factory.object_mapper().has_binding::<String>());
    }

    #[test]
    fn test_builder_overrides() {
        let mapper = Arc::new(ObjectMapper::empty());
        let factory = RpcFactory::builder()
            .call_timeout(None)
            .object_mapper(Arc::clone(&mapper))
            .build();

        assert_eq!(factory.call_timeout(), None);
        assert!(Arc::ptr_eq(factory.object_mapper(), &mapper));
        assert_eq!(factory.new_sender("Queue", None).call_timeout(), None);
    }

    #[test]
    fn test_typed_sender_and_handler() {
        let factory = RpcFactory::default();

        let sender = factory.new_sender_for::<Queue>(None);
        let handler = factory.new_handler_for(Some(Arc::new(Queue)));

        assert_eq!(sender.class_name(), "Queue");
        assert_eq!(handler.class_name(), "Queue");
        assert!(handler.bound_instance().is_some());
        assert!(Arc::ptr_eq(sender.object_mapper(), handler.object_mapper()));
    }
}
