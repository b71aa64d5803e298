//! Method tables and invocation.
//!
//! A class exposed over RPC implements [`RpcClass`] and describes its
//! callable methods once in a [`MethodTable`]. Each entry carries a
//! precomputed invoker closure that downcasts the receiver, decodes the
//! arguments and wraps the return value, so dispatch never inspects types
//! at call time.
//!
//! Methods are resolved by name and parameter count only. Two entries with
//! the same name and arity make the name ambiguous for that arity.

mod args;
mod object;

pub use args::{IntoArguments, RpcArgs};
pub use object::{Opaque, PrimitiveKind, ReturnType, RpcObject, RpcReturn};

use crate::buffer::DataBuf;
use crate::error::InvocationError;
use crate::object::ObjectMapper;
use std::convert::Infallible;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

type Invoker = dyn Fn(Option<&RpcObject>, &mut DataBuf, &ObjectMapper) -> Result<Option<RpcObject>, InvocationError>
    + Send
    + Sync;

fn invoker<F>(f: F) -> Arc<Invoker>
where
    F: Fn(Option<&RpcObject>, &mut DataBuf, &ObjectMapper) -> Result<Option<RpcObject>, InvocationError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

/// A type whose methods can be invoked remotely.
pub trait RpcClass: Send + Sync + Sized + 'static {
    /// Class name used on the wire to route calls to the handler.
    const NAME: &'static str;

    fn method_table() -> MethodTable;
}

/// Resolved description of one callable method.
pub struct MethodInformation {
    class_name: String,
    name: String,
    parameter_types: Vec<&'static str>,
    return_type: ReturnType,
    is_static: bool,
    invoker: Arc<Invoker>,
}

impl MethodInformation {
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameter_types(&self) -> &[&'static str] {
        &self.parameter_types
    }

    pub fn arity(&self) -> usize {
        self.parameter_types.len()
    }

    pub fn return_type(&self) -> ReturnType {
        self.return_type
    }

    pub fn void_method(&self) -> bool {
        self.return_type.is_void()
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    /// Invoke against `instance`, decoding arguments from `args`.
    ///
    /// Errors raised by the target are returned as [`InvocationError::Raised`];
    /// panics are not caught here.
    pub fn invoke(
        &self,
        instance: Option<&RpcObject>,
        args: &mut DataBuf,
        mapper: &ObjectMapper,
    ) -> Result<Option<RpcObject>, InvocationError> {
        (self.invoker)(instance, args, mapper)
    }
}

impl fmt::Debug for MethodInformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodInformation")
            .field("class_name", &self.class_name)
            .field("name", &self.name)
            .field("parameter_types", &self.parameter_types)
            .field("return_type", &self.return_type)
            .field("is_static", &self.is_static)
            .finish()
    }
}

/// The callable surface of one class.
#[derive(Clone)]
pub struct MethodTable {
    class_name: String,
    methods: Arc<Vec<Arc<MethodInformation>>>,
}

impl MethodTable {
    pub fn builder<T: Send + Sync + 'static>(class_name: impl Into<String>) -> MethodTableBuilder<T> {
        MethodTableBuilder {
            class_name: class_name.into(),
            methods: Vec::new(),
            _target: PhantomData,
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn methods(&self) -> &[Arc<MethodInformation>] {
        &self.methods
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub fn resolve(&self, name: &str, arity: usize) -> Result<Arc<MethodInformation>, InvocationError> {
        let mut candidates = self
            .methods
            .iter()
            .filter(|method| method.name == name && method.arity() == arity);

        match (candidates.next(), candidates.next()) {
            (Some(method), None) => Ok(Arc::clone(method)),
            (None, _) => Err(InvocationError::MethodNotFound {
                class: self.class_name.clone(),
                method: name.to_string(),
                arity,
            }),
            (Some(_), Some(_)) => Err(InvocationError::AmbiguousMethod {
                class: self.class_name.clone(),
                method: name.to_string(),
                arity,
                candidates: 2 + candidates.count(),
            }),
        }
    }
}

impl fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodTable")
            .field("class_name", &self.class_name)
            .field("methods", &self.methods.len())
            .finish()
    }
}

/// Builder for [`MethodTable`] with receivers of type `T`.
pub struct MethodTableBuilder<T> {
    class_name: String,
    methods: Vec<Arc<MethodInformation>>,
    _target: PhantomData<fn(&T)>,
}

impl<T: Send + Sync + 'static> MethodTableBuilder<T> {
    /// Add an instance method.
    pub fn method<A, R, F>(self, name: &str, f: F) -> Self
    where
        A: RpcArgs,
        R: RpcReturn,
        F: Fn(&T, A) -> R + Send + Sync + 'static,
    {
        self.fallible_method(name, move |target: &T, args: A| Ok::<R, Infallible>(f(target, args)))
    }

    /// Add an instance method whose errors are reported to the caller.
    pub fn fallible_method<A, R, E, F>(self, name: &str, f: F) -> Self
    where
        A: RpcArgs,
        R: RpcReturn,
        E: std::error::Error + 'static,
        F: Fn(&T, A) -> Result<R, E> + Send + Sync + 'static,
    {
        let class = self.class_name.clone();
        let method = name.to_string();
        let call = invoker(move |instance, args, mapper| {
            let target = instance
                .and_then(RpcObject::instance_of::<T>)
                .ok_or_else(|| InvocationError::IncompatibleInstance {
                    class: class.clone(),
                    method: method.clone(),
                    found: instance.map_or("none", RpcObject::type_name),
                })?;
            let decoded = A::decode(args, mapper).map_err(|source| InvocationError::ArgumentDecoding {
                method: method.clone(),
                source,
            })?;
            f(target, decoded)
                .map(RpcReturn::into_object)
                .map_err(|err| InvocationError::raised(&err))
        });
        self.push::<A, R>(name, false, call)
    }

    /// Add a method that does not need a receiver.
    pub fn static_method<A, R, F>(self, name: &str, f: F) -> Self
    where
        A: RpcArgs,
        R: RpcReturn,
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        let method = name.to_string();
        let call = invoker(move |_instance, args, mapper| {
            let decoded = A::decode(args, mapper).map_err(|source| InvocationError::ArgumentDecoding {
                method: method.clone(),
                source,
            })?;
            Ok(f(decoded).into_object())
        });
        self.push::<A, R>(name, true, call)
    }

    fn push<A: RpcArgs, R: RpcReturn>(mut self, name: &str, is_static: bool, invoker: Arc<Invoker>) -> Self {
        self.methods.push(Arc::new(MethodInformation {
            class_name: self.class_name.clone(),
            name: name.to_string(),
            parameter_types: A::parameter_types(),
            return_type: R::return_type(),
            is_static,
            invoker,
        }));
        self
    }

    pub fn build(self) -> MethodTable {
        MethodTable {
            class_name: self.class_name,
            methods: Arc::new(self.methods),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::DataBufMut;
    use crate::object::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, thiserror::Error)]
    #[error("user {0} does not exist")]
    struct UnknownUser(String);

    #[derive(Default)]
    struct UserService {
        renames: AtomicUsize,
    }

    fn table() -> MethodTable {
        MethodTable::builder::<UserService>("UserService")
            .method("rename", |svc: &UserService, (_id, name): (String, String)| {
                svc.renames.fetch_add(1, Ordering::SeqCst);
                !name.is_empty()
            })
            .fallible_method("lookup", |_svc: &UserService, (id,): (String,)| {
                if id == "u-1" {
                    Ok("Bob".to_string())
                } else {
                    Err(UnknownUser(id))
                }
            })
            .method("touch", |_svc: &UserService, (): ()| {})
            .method("find", |_svc: &UserService, (_id,): (String,)| 1i32)
            .method("find", |_svc: &UserService, (_id,): (i64,)| 2i32)
            .static_method("version", |(): ()| "1.0".to_string())
            .build()
    }

    fn encode(values: &[Value]) -> DataBuf {
        let mut buf = DataBufMut::new();
        for value in values {
            value.write_to(&mut buf);
        }
        buf.freeze()
    }

    #[test]
    fn test_resolve_by_name_and_arity() {
        let table = table();
        let rename = table.resolve("rename", 2).unwrap();

        assert_eq!(rename.class_name(), "UserService");
        assert_eq!(rename.return_type(), ReturnType::Primitive(PrimitiveKind::Bool));
        assert!(table.resolve("touch", 0).unwrap().void_method());
        assert!(table.resolve("version", 0).unwrap().is_static());
    }

    #[test]
    fn test_resolve_missing_and_ambiguous() {
        let table = table();

        assert!(matches!(
            table.resolve("rename", 1),
            Err(InvocationError::MethodNotFound { arity: 1, .. })
        ));
        assert!(matches!(
            table.resolve("find", 1),
            Err(InvocationError::AmbiguousMethod { candidates: 2, .. })
        ));
    }

    #[test]
    fn test_invoke_instance_method() {
        let table = table();
        let service = RpcObject::opaque(Arc::new(UserService::default()));
        let mapper = ObjectMapper::new();
        let mut args = encode(&[Value::String("u-1".into()), Value::String("Bob".into())]);

        let result = table
            .resolve("rename", 2)
            .unwrap()
            .invoke(Some(&service), &mut args, &mapper)
            .unwrap()
            .unwrap();

        assert_eq!(result.downcast_ref::<bool>(), Some(&true));
        let svc = service.downcast_ref::<UserService>().unwrap();
        assert_eq!(svc.renames.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invoke_reports_raised_error() {
        let table = table();
        let service = RpcObject::opaque(Arc::new(UserService::default()));
        let mapper = ObjectMapper::new();
        let mut args = encode(&[Value::String("u-9".into())]);

        let err = table
            .resolve("lookup", 1)
            .unwrap()
            .invoke(Some(&service), &mut args, &mapper)
            .unwrap_err();

        assert_eq!(err.error_type(), "UnknownUser");
        assert_eq!(err.to_string(), "user u-9 does not exist");
    }

    #[test]
    fn test_invoke_rejects_wrong_receiver() {
        let table = table();
        let wrong = RpcObject::new("not a service".to_string());
        let mapper = ObjectMapper::new();

        let err = table
            .resolve("touch", 0)
            .unwrap()
            .invoke(Some(&wrong), &mut DataBuf::empty(), &mapper)
            .unwrap_err();

        assert!(matches!(err, InvocationError::IncompatibleInstance { .. }));
    }

    #[test]
    fn test_invoke_static_without_receiver() {
        let table = table();
        let mapper = ObjectMapper::new();
        let result = table
            .resolve("version", 0)
            .unwrap()
            .invoke(None, &mut DataBuf::empty(), &mapper)
            .unwrap()
            .unwrap();

        assert_eq!(result.downcast_ref::<String>().map(String::as_str), Some("1.0"));
    }

    #[test]
    fn test_argument_decoding_failure() {
        let table = table();
        let service = RpcObject::opaque(Arc::new(UserService::default()));
        let mapper = ObjectMapper::new();
        let mut args = encode(&[Value::Bool(true), Value::String("Bob".into())]);

        let err = table
            .resolve("rename", 2)
            .unwrap()
            .invoke(Some(&service), &mut args, &mapper)
            .unwrap_err();

        assert_eq!(err.error_type(), "EncodingError");
    }
}
