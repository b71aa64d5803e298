//! Server-side invocation of one class.
//!
//! An [`RpcHandler`] owns the method table of a class, an optional bound
//! instance and the codec used for arguments and results. Handlers are
//! routed to by class name through the [`RpcHandlerRegistry`].

mod registry;

pub use registry::RpcHandlerRegistry;

use crate::buffer::{DataBufFactory, DataBufMut};
use crate::context::RpcInvocationContext;
use crate::error::InvocationError;
use crate::invoke::{MethodInformation, MethodTable, ReturnType, RpcObject};
use crate::object::{ObjectMapper, Value};
use mini_moka::sync::Cache;
use std::any::{Any, TypeId};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// Key of the per-handler method cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MethodCacheKey {
    instance: Option<TypeId>,
    name: String,
    arity: usize,
}

/// Outcome of one handled invocation.
#[derive(Debug)]
pub enum HandlingResult {
    Success {
        value: Option<RpcObject>,
        method: Option<Arc<MethodInformation>>,
    },
    Failure {
        error: InvocationError,
        method: Option<Arc<MethodInformation>>,
    },
}

impl HandlingResult {
    pub fn success(value: Option<RpcObject>, method: Arc<MethodInformation>) -> Self {
        HandlingResult::Success {
            value,
            method: Some(method),
        }
    }

    /// A failure that happened before a method was resolved.
    pub fn failure(error: InvocationError) -> Self {
        HandlingResult::Failure {
            error,
            method: None,
        }
    }

    pub fn was_successful(&self) -> bool {
        matches!(self, HandlingResult::Success { .. })
    }

    pub fn value(&self) -> Option<&RpcObject> {
        match self {
            HandlingResult::Success { value, .. } => value.as_ref(),
            HandlingResult::Failure { .. } => None,
        }
    }

    pub fn into_value(self) -> Option<RpcObject> {
        match self {
            HandlingResult::Success { value, .. } => value,
            HandlingResult::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&InvocationError> {
        match self {
            HandlingResult::Success { .. } => None,
            HandlingResult::Failure { error, .. } => Some(error),
        }
    }

    pub fn method(&self) -> Option<&Arc<MethodInformation>> {
        match self {
            HandlingResult::Success { method, .. } | HandlingResult::Failure { method, .. } => {
                method.as_ref()
            }
        }
    }

    /// Append the response encoding of this result.
    ///
    /// Success writes `true` followed by the value, or the null marker for
    /// void methods and absent values. Failure writes `false` followed by the
    /// error descriptor. A value that cannot be encoded is reported as an
    /// encoding failure instead.
    pub fn write_to(&self, buf: &mut DataBufMut, mapper: &ObjectMapper) {
        match self {
            HandlingResult::Success { value, method } => {
                let void = method.as_ref().is_some_and(|method| method.void_method());
                let encoded = match value {
                    Some(value) if !void => value.encode(mapper),
                    _ => Ok(Value::Null),
                };

                match encoded {
                    Ok(encoded) => {
                        buf.write_bool(true);
                        encoded.write_to(buf);
                    }
                    Err(source) => {
                        let error = InvocationError::ResultEncoding {
                            method: method
                                .as_ref()
                                .map_or_else(String::new, |method| method.name().to_string()),
                            source,
                        };
                        warn!("{}", error);
                        buf.write_bool(false);
                        error.to_remote().write_to(buf);
                    }
                }
            }
            HandlingResult::Failure { error, .. } => {
                buf.write_bool(false);
                error.to_remote().write_to(buf);
            }
        }
    }
}

/// Performs invocations for one class.
pub struct RpcHandler {
    methods: MethodTable,
    bound_instance: Option<RpcObject>,
    mapper: Arc<ObjectMapper>,
    buffers: DataBufFactory,
    method_cache: Cache<MethodCacheKey, Arc<MethodInformation>>,
}

impl RpcHandler {
    pub fn new(
        methods: MethodTable,
        bound_instance: Option<RpcObject>,
        mapper: Arc<ObjectMapper>,
        buffers: DataBufFactory,
        cache_capacity: u64,
    ) -> Self {
        Self {
            methods,
            bound_instance,
            mapper,
            buffers,
            method_cache: Cache::new(cache_capacity),
        }
    }

    pub fn class_name(&self) -> &str {
        self.methods.class_name()
    }

    pub fn object_mapper(&self) -> &Arc<ObjectMapper> {
        &self.mapper
    }

    pub fn data_buf_factory(&self) -> &DataBufFactory {
        &self.buffers
    }

    pub fn bound_instance(&self) -> Option<&RpcObject> {
        self.bound_instance.as_ref()
    }

    pub fn method_table(&self) -> &MethodTable {
        &self.methods
    }

    /// Resolve a method for calls against `instance`, consulting the cache first.
    ///
    /// Failed resolutions are not cached.
    pub fn resolve_method(
        &self,
        instance: Option<&RpcObject>,
        name: &str,
        arity: usize,
    ) -> Result<Arc<MethodInformation>, InvocationError> {
        let key = MethodCacheKey {
            instance: instance.map(RpcObject::value_type_id),
            name: name.to_string(),
            arity,
        };

        if let Some(method) = self.method_cache.get(&key) {
            return Ok(method);
        }

        let method = self.methods.resolve(name, arity)?;
        self.method_cache.insert(key, Arc::clone(&method));
        Ok(method)
    }

    /// Resolve and invoke the method named by `context`.
    pub fn handle(&self, mut context: RpcInvocationContext) -> HandlingResult {
        let instance = if context.strict_instance() {
            context.working_instance().cloned()
        } else {
            context
                .working_instance()
                .or(self.bound_instance.as_ref())
                .cloned()
        };

        let method = match self.resolve_method(
            instance.as_ref(),
            context.method_name(),
            context.argument_count(),
        ) {
            Ok(method) => method,
            Err(error) => return HandlingResult::failure(error),
        };

        if instance.is_none() && !method.is_static() {
            let value = match method.return_type() {
                ReturnType::Primitive(kind) if context.normalize_primitives() => Some(kind.zero()),
                _ => None,
            };
            debug!(
                class = %self.class_name(),
                method = %method.name(),
                "No receiver for instance method, skipping invocation"
            );
            return HandlingResult::success(value, method);
        }

        debug!(class = %self.class_name(), method = %method.name(), "Invoking");

        let mapper = &*self.mapper;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            method.invoke(instance.as_ref(), context.arguments_mut(), mapper)
        }));

        match outcome {
            Ok(Ok(value)) => HandlingResult::success(value, method),
            Ok(Err(error)) => HandlingResult::Failure {
                error,
                method: Some(method),
            },
            Err(payload) => HandlingResult::Failure {
                error: InvocationError::Panicked {
                    method: method.name().to_string(),
                    message: panic_message(payload.as_ref()),
                },
                method: Some(method),
            },
        }
    }
}

impl fmt::Debug for RpcHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcHandler")
            .field("class_name", &self.class_name())
            .field("methods", &self.methods.len())
            .field("bound_instance", &self.bound_instance)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::DataBuf;
    use crate::config::RpcConfig;
    use crate::network::local::LocalChannel;
    use crate::network::{NetworkChannel, PacketListenerRegistry};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        hits: AtomicUsize,
    }

    fn table() -> MethodTable {
        MethodTable::builder::<Counter>("Counter")
            .method("hit", |counter: &Counter, (): ()| {
                counter.hits.fetch_add(1, Ordering::SeqCst) as i32 + 1
            })
            .method("label", |_counter: &Counter, (prefix,): (String,)| {
                format!("{prefix}-counter")
            })
            .method("reset", |counter: &Counter, (): ()| {
                counter.hits.store(0, Ordering::SeqCst);
            })
            .method("explode", |_counter: &Counter, (): ()| -> bool {
                panic!("counter exploded")
            })
            .static_method("max", |(): ()| 100i64)
            .build()
    }

    fn handler(bound: Option<Arc<Counter>>) -> RpcHandler {
        RpcHandler::new(
            table(),
            bound.map(RpcObject::opaque),
            Arc::new(ObjectMapper::new()),
            DataBufFactory::default(),
            RpcConfig::METHOD_CACHE_CAPACITY,
        )
    }

    fn channel() -> Arc<dyn NetworkChannel> {
        let (a, _b) = LocalChannel::pair(
            Arc::new(PacketListenerRegistry::new()),
            Arc::new(PacketListenerRegistry::new()),
        );
        a
    }

    fn context(method: &str, args: &[Value]) -> crate::RpcInvocationContextBuilder {
        let mut buf = DataBufMut::new();
        for arg in args {
            arg.write_to(&mut buf);
        }
        RpcInvocationContext::builder()
            .method_name(method)
            .argument_count(args.len())
            .arguments(buf.freeze())
            .expects_result(true)
            .channel(channel())
    }

    fn response(result: &HandlingResult) -> DataBuf {
        let mut buf = DataBufMut::new();
        result.write_to(&mut buf, &ObjectMapper::new());
        buf.freeze()
    }

    #[test]
    fn test_handle_uses_bound_instance() {
        let counter = Arc::new(Counter::default());
        let handler = handler(Some(Arc::clone(&counter)));

        let result = handler.handle(context("hit", &[]).build().unwrap());

        assert!(result.was_successful());
        assert_eq!(result.value().unwrap().downcast_ref::<i32>(), Some(&1));
        assert_eq!(counter.hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handle_decodes_arguments() {
        let handler = handler(Some(Arc::new(Counter::default())));

        let result =
            handler.handle(context("label", &[Value::String("main".into())]).build().unwrap());

        let mut buf = response(&result);
        assert!(buf.read_bool().unwrap());
        assert_eq!(
            Value::read_from(&mut buf).unwrap(),
            Value::String("main-counter".into())
        );
    }

    #[test]
    fn test_strict_instance_ignores_bound_instance() {
        let bound = Arc::new(Counter::default());
        let handler = handler(Some(Arc::clone(&bound)));

        let result = handler.handle(
            context("hit", &[])
                .strict_instance(true)
                .normalize_primitives(true)
                .build()
                .unwrap(),
        );

        // No receiver: the zero value is returned and nothing is invoked
        assert_eq!(result.value().unwrap().downcast_ref::<i32>(), Some(&0));
        assert_eq!(bound.hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_working_instance_takes_precedence() {
        let bound = Arc::new(Counter::default());
        let working = Arc::new(Counter::default());
        let handler = handler(Some(Arc::clone(&bound)));

        handler.handle(
            context("hit", &[])
                .working_instance(Some(RpcObject::opaque(Arc::clone(&working))))
                .build()
                .unwrap(),
        );

        assert_eq!(working.hits.load(Ordering::SeqCst), 1);
        assert_eq!(bound.hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_no_instance_without_normalization_yields_none() {
        let handler = handler(None);

        let result = handler.handle(context("hit", &[]).build().unwrap());

        assert!(result.was_successful());
        assert!(result.value().is_none());

        let mut buf = response(&result);
        assert!(buf.read_bool().unwrap());
        assert_eq!(Value::read_from(&mut buf).unwrap(), Value::Null);
    }

    #[test]
    fn test_no_instance_still_invokes_static_method() {
        let handler = handler(None);

        let result = handler.handle(context("max", &[]).normalize_primitives(true).build().unwrap());

        assert_eq!(result.value().unwrap().downcast_ref::<i64>(), Some(&100));
    }

    #[test]
    fn test_void_method_writes_null_marker() {
        let handler = handler(Some(Arc::new(Counter::default())));

        let result = handler.handle(context("reset", &[]).build().unwrap());

        assert!(result.method().unwrap().void_method());
        assert_eq!(response(&result).to_byte_array(), vec![1, 0]);
    }

    #[test]
    fn test_missing_method_fails() {
        let handler = handler(Some(Arc::new(Counter::default())));

        let result = handler.handle(context("hit", &[Value::Int(1)]).build().unwrap());

        assert!(matches!(
            result.error(),
            Some(InvocationError::MethodNotFound { arity: 1, .. })
        ));
        assert!(result.method().is_none());

        let mut buf = response(&result);
        assert!(!buf.read_bool().unwrap());
        let remote = crate::RemoteError::read_from(&mut buf).unwrap();
        assert_eq!(remote.error_type, "MethodNotFoundError");
    }

    #[test]
    fn test_panic_becomes_failure() {
        let handler = handler(Some(Arc::new(Counter::default())));

        let result = handler.handle(context("explode", &[]).build().unwrap());

        match result.error() {
            Some(InvocationError::Panicked { method, message }) => {
                assert_eq!(method, "explode");
                assert_eq!(message, "counter exploded");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_resolution_is_cached_per_receiver_type() {
        let handler = handler(None);
        let counter = RpcObject::opaque(Arc::new(Counter::default()));

        let first = handler.resolve_method(Some(&counter), "hit", 0).unwrap();
        let second = handler.resolve_method(Some(&counter), "hit", 0).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        assert!(handler.resolve_method(None, "missing", 0).is_err());
        assert!(handler
            .method_cache
            .get(&MethodCacheKey {
                instance: None,
                name: "missing".to_string(),
                arity: 0,
            })
            .is_none());
    }
}
