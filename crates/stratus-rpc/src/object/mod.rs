//! Object codec.
//!
//! The [`ObjectMapper`] converts typed values to and from [`Value`] trees.
//! Lookups go through a registry of per-type serializers keyed by
//! [`TypeId`]; any other `serde` type falls back to a structural encoding of
//! its fields as name/value pairs.

mod de;
mod ser;
mod serializers;
mod value;

pub use value::Value;

use crate::buffer::{DataBuf, DataBufMut};
use crate::error::CodecError;
use crate::owner::OwnerToken;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use std::any::{type_name, Any, TypeId};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

type CodecResult<T> = std::result::Result<T, CodecError>;

/// Converts one concrete type to and from codec values.
///
/// Implementations receive the object as `&dyn Any` and return decoded
/// objects boxed; the mapper performs the downcast to the requested type.
pub trait ObjectSerializer: Send + Sync {
    fn to_value(&self, object: &dyn Any, mapper: &ObjectMapper) -> CodecResult<Value>;

    fn from_value(&self, value: Value, mapper: &ObjectMapper) -> CodecResult<Box<dyn Any + Send>>;
}

/// Serializer built from a pair of plain functions.
pub struct FunctionalObjectSerializer<T> {
    write: fn(&T) -> CodecResult<Value>,
    read: fn(Value) -> CodecResult<T>,
}

impl<T> FunctionalObjectSerializer<T> {
    pub fn of(write: fn(&T) -> CodecResult<Value>, read: fn(Value) -> CodecResult<T>) -> Self {
        Self { write, read }
    }
}

impl<T: Any + Send> ObjectSerializer for FunctionalObjectSerializer<T> {
    fn to_value(&self, object: &dyn Any, _mapper: &ObjectMapper) -> CodecResult<Value> {
        let typed = object
            .downcast_ref::<T>()
            .ok_or(CodecError::TypeMismatch {
                expected: type_name::<T>(),
                found: "foreign object",
            })?;
        (self.write)(typed)
    }

    fn from_value(&self, value: Value, _mapper: &ObjectMapper) -> CodecResult<Box<dyn Any + Send>> {
        Ok(Box::new((self.read)(value)?))
    }
}

#[derive(Clone)]
struct Binding {
    type_name: &'static str,
    serializer: Arc<dyn ObjectSerializer>,
    owner: Option<OwnerToken>,
}

/// Registry-driven codec shared by senders and handlers.
pub struct ObjectMapper {
    bindings: RwLock<HashMap<TypeId, Binding>>,
}

impl ObjectMapper {
    /// Mapper with the built-in bindings for primitives, strings, byte
    /// arrays, UUIDs, timestamps, durations, buffers and JSON values.
    pub fn new() -> Self {
        let mapper = Self::empty();
        serializers::register_defaults(&mapper);
        mapper
    }

    /// Mapper without any binding; everything goes through the structural path.
    pub fn empty() -> Self {
        Self {
            bindings: RwLock::new(HashMap::new()),
        }
    }

    /// Register a serializer for `T`. Returns false if `T` is already bound.
    pub fn register_binding<T: Any>(&self, serializer: impl ObjectSerializer + 'static) -> bool {
        self.insert_binding::<T>(Arc::new(serializer), None)
    }

    /// Register a serializer that is removed by [`unregister_bindings`](Self::unregister_bindings).
    pub fn register_owned_binding<T: Any>(
        &self,
        owner: OwnerToken,
        serializer: impl ObjectSerializer + 'static,
    ) -> bool {
        self.insert_binding::<T>(Arc::new(serializer), Some(owner))
    }

    fn insert_binding<T: Any>(
        &self,
        serializer: Arc<dyn ObjectSerializer>,
        owner: Option<OwnerToken>,
    ) -> bool {
        let mut bindings = self.bindings.write().unwrap_or_else(PoisonError::into_inner);
        match bindings.entry(TypeId::of::<T>()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Binding {
                    type_name: type_name::<T>(),
                    serializer,
                    owner,
                });
                true
            }
        }
    }

    pub fn unregister_binding<T: Any>(&self) -> bool {
        self.bindings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&TypeId::of::<T>())
            .is_some()
    }

    /// Remove every binding registered under `owner`; returns how many were removed.
    pub fn unregister_bindings(&self, owner: &OwnerToken) -> usize {
        let mut bindings = self.bindings.write().unwrap_or_else(PoisonError::into_inner);
        let before = bindings.len();
        bindings.retain(|_, binding| binding.owner.as_ref() != Some(owner));
        before - bindings.len()
    }

    pub fn has_binding<T: Any>(&self) -> bool {
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&TypeId::of::<T>())
    }

    fn binding(&self, id: TypeId) -> Option<Binding> {
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn to_value<T: Serialize + Any>(&self, object: &T) -> CodecResult<Value> {
        if let Some(binding) = self.binding(TypeId::of::<T>()) {
            return binding.serializer.to_value(object, self);
        }

        object.serialize(ser::ValueSerializer)
    }

    pub fn from_value<T: DeserializeOwned + Any>(&self, value: Value) -> CodecResult<T> {
        if let Some(binding) = self.binding(TypeId::of::<T>()) {
            let boxed = binding.serializer.from_value(value, self)?;
            return boxed
                .downcast::<T>()
                .map(|typed| *typed)
                .map_err(|_| CodecError::TypeMismatch {
                    expected: type_name::<T>(),
                    found: binding.type_name,
                });
        }

        T::deserialize(value)
    }

    pub fn write_object<T: Serialize + Any>(&self, buf: &mut DataBufMut, object: &T) -> CodecResult<()> {
        self.to_value(object)?.write_to(buf);
        Ok(())
    }

    pub fn read_object<T: DeserializeOwned + Any>(&self, buf: &mut DataBuf) -> CodecResult<T> {
        self.from_value(Value::read_from(buf)?)
    }
}

impl Default for ObjectMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObjectMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bindings = self.bindings.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("ObjectMapper")
            .field("bindings", &bindings.len())
            .finish()
    }
}
