//! Type-erased server-side values and return type classification.

use crate::buffer::DataBuf;
use crate::error::CodecError;
use crate::object::{ObjectMapper, Value};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::any::{type_name, Any, TypeId};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

type Encoder = fn(&(dyn Any + Send + Sync), &ObjectMapper) -> Result<Value, CodecError>;

/// A value produced or held on the handling side.
///
/// It is both the live receiver for the next hop of a chain and the source
/// of the encoded response value. Cloning shares the underlying value.
#[derive(Clone)]
pub struct RpcObject {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
    encoder: Option<Encoder>,
}

impl RpcObject {
    pub fn new<T: Serialize + Send + Sync + 'static>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    pub fn from_arc<T: Serialize + Send + Sync + 'static>(value: Arc<T>) -> Self {
        Self {
            value,
            type_name: type_name::<T>(),
            encoder: Some(encode_as::<T>),
        }
    }

    /// Wrap a value that can act as a receiver but has no wire form.
    pub fn opaque<T: Send + Sync + 'static>(value: Arc<T>) -> Self {
        Self {
            value,
            type_name: type_name::<T>(),
            encoder: None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn value_type_id(&self) -> TypeId {
        let any: &dyn Any = &*self.value;
        any.type_id()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    pub fn downcast_arc<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.value).downcast::<T>().ok()
    }

    /// View this value as a receiver of type `T`, held directly or behind an `Arc`.
    pub fn instance_of<T: Any>(&self) -> Option<&T> {
        self.value
            .downcast_ref::<T>()
            .or_else(|| self.value.downcast_ref::<Arc<T>>().map(|inner| &**inner))
    }

    pub fn is_encodable(&self) -> bool {
        self.encoder.is_some()
    }

    pub fn encode(&self, mapper: &ObjectMapper) -> Result<Value, CodecError> {
        match self.encoder {
            Some(encode) => encode(&*self.value, mapper),
            None => Err(CodecError::MissingSerializer(self.type_name)),
        }
    }
}

impl fmt::Debug for RpcObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcObject")
            .field("type", &self.type_name)
            .field("encodable", &self.encoder.is_some())
            .finish()
    }
}

fn encode_as<T: Serialize + 'static>(
    value: &(dyn Any + Send + Sync),
    mapper: &ObjectMapper,
) -> Result<Value, CodecError> {
    let typed = value
        .downcast_ref::<T>()
        .ok_or(CodecError::TypeMismatch {
            expected: type_name::<T>(),
            found: "foreign object",
        })?;
    mapper.to_value(typed)
}

/// Primitive return kinds; each has a zero value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveKind {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Char,
}

impl PrimitiveKind {
    /// The value returned in place of an invocation that has no receiver.
    pub fn zero(self) -> RpcObject {
        match self {
            PrimitiveKind::Bool => RpcObject::new(false),
            PrimitiveKind::I8 => RpcObject::new(0i8),
            PrimitiveKind::I16 => RpcObject::new(0i16),
            PrimitiveKind::I32 => RpcObject::new(0i32),
            PrimitiveKind::I64 => RpcObject::new(0i64),
            PrimitiveKind::U8 => RpcObject::new(0u8),
            PrimitiveKind::U16 => RpcObject::new(0u16),
            PrimitiveKind::U32 => RpcObject::new(0u32),
            PrimitiveKind::U64 => RpcObject::new(0u64),
            PrimitiveKind::F32 => RpcObject::new(0f32),
            PrimitiveKind::F64 => RpcObject::new(0f64),
            PrimitiveKind::Char => RpcObject::new('\0'),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnType {
    Void,
    Primitive(PrimitiveKind),
    Object,
}

impl ReturnType {
    pub fn is_void(self) -> bool {
        self == ReturnType::Void
    }
}

/// Values a target method may return.
///
/// Implemented for `()`, primitives, strings, common std collections,
/// `Option<T>` (where `None` is the null result), `Arc<T>` and [`Opaque`].
/// Serializable user types opt in with [`impl_rpc_return!`](crate::impl_rpc_return).
pub trait RpcReturn: Send + 'static {
    fn return_type() -> ReturnType;

    fn into_object(self) -> Option<RpcObject>;
}

impl RpcReturn for () {
    fn return_type() -> ReturnType {
        ReturnType::Void
    }

    fn into_object(self) -> Option<RpcObject> {
        None
    }
}

macro_rules! primitive_return {
    ($($ty:ty => $kind:ident),+ $(,)?) => {
        $(
            impl RpcReturn for $ty {
                fn return_type() -> ReturnType {
                    ReturnType::Primitive(PrimitiveKind::$kind)
                }

                fn into_object(self) -> Option<RpcObject> {
                    Some(RpcObject::new(self))
                }
            }
        )+
    };
}

primitive_return!(
    bool => Bool,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    char => Char,
);

/// Implement [`RpcReturn`] for serializable types returned as objects.
#[macro_export]
macro_rules! impl_rpc_return {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::RpcReturn for $ty {
                fn return_type() -> $crate::ReturnType {
                    $crate::ReturnType::Object
                }

                fn into_object(self) -> Option<$crate::RpcObject> {
                    Some($crate::RpcObject::new(self))
                }
            }
        )+
    };
}

impl_rpc_return!(
    String,
    Uuid,
    DateTime<Utc>,
    Duration,
    DataBuf,
    serde_json::Value,
);

impl<T: RpcReturn> RpcReturn for Option<T> {
    fn return_type() -> ReturnType {
        ReturnType::Object
    }

    fn into_object(self) -> Option<RpcObject> {
        self.and_then(RpcReturn::into_object)
    }
}

impl<T: Serialize + Send + Sync + 'static> RpcReturn for Vec<T> {
    fn return_type() -> ReturnType {
        ReturnType::Object
    }

    fn into_object(self) -> Option<RpcObject> {
        Some(RpcObject::new(self))
    }
}

impl<T: Serialize + Eq + Hash + Send + Sync + 'static> RpcReturn for HashSet<T> {
    fn return_type() -> ReturnType {
        ReturnType::Object
    }

    fn into_object(self) -> Option<RpcObject> {
        Some(RpcObject::new(self))
    }
}

impl<T: Serialize + Ord + Send + Sync + 'static> RpcReturn for BTreeSet<T> {
    fn return_type() -> ReturnType {
        ReturnType::Object
    }

    fn into_object(self) -> Option<RpcObject> {
        Some(RpcObject::new(self))
    }
}

impl<K, V> RpcReturn for HashMap<K, V>
where
    K: Serialize + Eq + Hash + Send + Sync + 'static,
    V: Serialize + Send + Sync + 'static,
{
    fn return_type() -> ReturnType {
        ReturnType::Object
    }

    fn into_object(self) -> Option<RpcObject> {
        Some(RpcObject::new(self))
    }
}

impl<K, V> RpcReturn for BTreeMap<K, V>
where
    K: Serialize + Ord + Send + Sync + 'static,
    V: Serialize + Send + Sync + 'static,
{
    fn return_type() -> ReturnType {
        ReturnType::Object
    }

    fn into_object(self) -> Option<RpcObject> {
        Some(RpcObject::new(self))
    }
}

impl<T: Serialize + Send + Sync + 'static> RpcReturn for Arc<T> {
    fn return_type() -> ReturnType {
        ReturnType::Object
    }

    fn into_object(self) -> Option<RpcObject> {
        Some(RpcObject::from_arc(self))
    }
}

/// A reference to a live server-side object without a wire form.
///
/// Useful as an intermediate chain result (`get` returning a handle that
/// the next hop is invoked on). Sending it back as a final result fails
/// with an encoding error.
pub struct Opaque<T>(pub Arc<T>);

impl<T> Opaque<T> {
    pub fn new(value: T) -> Self {
        Self(Arc::new(value))
    }
}

impl<T: Send + Sync + 'static> RpcReturn for Opaque<T> {
    fn return_type() -> ReturnType {
        ReturnType::Object
    }

    fn into_object(self) -> Option<RpcObject> {
        Some(RpcObject::opaque(self.0))
    }
}
