//! Built-in serializer bindings.

use super::{FunctionalObjectSerializer, ObjectMapper, Value};
use crate::buffer::DataBuf;
use crate::error::CodecError;
use chrono::{DateTime, Utc};
use std::any::type_name;
use std::time::Duration;
use uuid::Uuid;

type CodecResult<T> = std::result::Result<T, CodecError>;

fn mismatch<T>(value: &Value) -> CodecError {
    CodecError::TypeMismatch {
        expected: type_name::<T>(),
        found: value.kind(),
    }
}

/// Integral reads accept any integral value that fits the target type.
fn integral<T: TryFrom<i64>>(value: Value) -> CodecResult<T> {
    value
        .as_i64()
        .and_then(|v| T::try_from(v).ok())
        .ok_or_else(|| mismatch::<T>(&value))
}

/// Unsigned reads, covering the upper half of the u64 range.
fn unsigned<T: TryFrom<u64>>(value: Value) -> CodecResult<T> {
    value
        .as_u64()
        .and_then(|v| T::try_from(v).ok())
        .ok_or_else(|| mismatch::<T>(&value))
}

fn read_bool(value: Value) -> CodecResult<bool> {
    match value {
        Value::Bool(v) => Ok(v),
        other => Err(mismatch::<bool>(&other)),
    }
}

fn read_f32(value: Value) -> CodecResult<f32> {
    value.as_f64().map(|v| v as f32).ok_or_else(|| mismatch::<f32>(&value))
}

fn read_f64(value: Value) -> CodecResult<f64> {
    value.as_f64().ok_or_else(|| mismatch::<f64>(&value))
}

fn read_char(value: Value) -> CodecResult<char> {
    match value {
        Value::Char(v) => Ok(v),
        Value::String(ref s) => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(c),
                _ => Err(mismatch::<char>(&value)),
            }
        }
        other => Err(mismatch::<char>(&other)),
    }
}

fn read_string(value: Value) -> CodecResult<String> {
    match value {
        Value::String(v) => Ok(v),
        Value::Char(v) => Ok(v.to_string()),
        other => Err(mismatch::<String>(&other)),
    }
}

fn read_bytes(value: Value) -> CodecResult<Vec<u8>> {
    match value {
        Value::Bytes(v) => Ok(v),
        Value::Buf(v) => Ok(v.to_byte_array()),
        Value::List(items) => items.into_iter().map(integral::<u8>).collect(),
        other => Err(mismatch::<Vec<u8>>(&other)),
    }
}

fn read_uuid(value: Value) -> CodecResult<Uuid> {
    match value {
        Value::Uuid(v) => Ok(v),
        Value::String(ref s) => Uuid::parse_str(s).map_err(|_| mismatch::<Uuid>(&value)),
        other => Err(mismatch::<Uuid>(&other)),
    }
}

fn read_timestamp(value: Value) -> CodecResult<DateTime<Utc>> {
    match value {
        Value::Timestamp(v) => Ok(v),
        Value::String(ref s) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| mismatch::<DateTime<Utc>>(&value)),
        other => Err(mismatch::<DateTime<Utc>>(&other)),
    }
}

fn read_duration(value: Value) -> CodecResult<Duration> {
    match value {
        Value::Duration(v) => Ok(v),
        other => Err(mismatch::<Duration>(&other)),
    }
}

fn read_buf(value: Value) -> CodecResult<DataBuf> {
    match value {
        Value::Buf(v) => Ok(v),
        Value::Bytes(v) => Ok(DataBuf::from(v)),
        other => Err(mismatch::<DataBuf>(&other)),
    }
}

fn read_unit(value: Value) -> CodecResult<()> {
    match value {
        Value::Null => Ok(()),
        other => Err(mismatch::<()>(&other)),
    }
}

pub(super) fn register_defaults(mapper: &ObjectMapper) {
    mapper.register_binding::<bool>(FunctionalObjectSerializer::<bool>::of(
        |v| Ok(Value::Bool(*v)),
        read_bool,
    ));
    mapper.register_binding::<i8>(FunctionalObjectSerializer::<i8>::of(
        |v| Ok(Value::Byte(*v)),
        integral::<i8>,
    ));
    mapper.register_binding::<i16>(FunctionalObjectSerializer::<i16>::of(
        |v| Ok(Value::Short(*v)),
        integral::<i16>,
    ));
    mapper.register_binding::<i32>(FunctionalObjectSerializer::<i32>::of(
        |v| Ok(Value::Int(*v)),
        integral::<i32>,
    ));
    mapper.register_binding::<i64>(FunctionalObjectSerializer::<i64>::of(
        |v| Ok(Value::Long(*v)),
        integral::<i64>,
    ));
    // Unsigned types widen into the next signed tag; only u64 needs its own.
    mapper.register_binding::<u8>(FunctionalObjectSerializer::<u8>::of(
        |v| Ok(Value::Short(i16::from(*v))),
        integral::<u8>,
    ));
    mapper.register_binding::<u16>(FunctionalObjectSerializer::<u16>::of(
        |v| Ok(Value::Int(i32::from(*v))),
        integral::<u16>,
    ));
    mapper.register_binding::<u32>(FunctionalObjectSerializer::<u32>::of(
        |v| Ok(Value::Long(i64::from(*v))),
        integral::<u32>,
    ));
    mapper.register_binding::<u64>(FunctionalObjectSerializer::<u64>::of(
        |v| Ok(Value::ULong(*v)),
        unsigned::<u64>,
    ));
    mapper.register_binding::<usize>(FunctionalObjectSerializer::<usize>::of(
        |v| Ok(Value::ULong(*v as u64)),
        unsigned::<usize>,
    ));
    mapper.register_binding::<f32>(FunctionalObjectSerializer::<f32>::of(
        |v| Ok(Value::Float(*v)),
        read_f32,
    ));
    mapper.register_binding::<f64>(FunctionalObjectSerializer::<f64>::of(
        |v| Ok(Value::Double(*v)),
        read_f64,
    ));
    mapper.register_binding::<char>(FunctionalObjectSerializer::<char>::of(
        |v| Ok(Value::Char(*v)),
        read_char,
    ));
    mapper.register_binding::<String>(FunctionalObjectSerializer::<String>::of(
        |v| Ok(Value::String(v.clone())),
        read_string,
    ));
    mapper.register_binding::<Vec<u8>>(FunctionalObjectSerializer::<Vec<u8>>::of(
        |v| Ok(Value::Bytes(v.clone())),
        read_bytes,
    ));
    mapper.register_binding::<Uuid>(FunctionalObjectSerializer::<Uuid>::of(
        |v| Ok(Value::Uuid(*v)),
        read_uuid,
    ));
    mapper.register_binding::<DateTime<Utc>>(FunctionalObjectSerializer::<DateTime<Utc>>::of(
        |v| Ok(Value::Timestamp(*v)),
        read_timestamp,
    ));
    mapper.register_binding::<Duration>(FunctionalObjectSerializer::<Duration>::of(
        |v| Ok(Value::Duration(*v)),
        read_duration,
    ));
    mapper.register_binding::<DataBuf>(FunctionalObjectSerializer::<DataBuf>::of(
        |v| Ok(Value::Buf(v.clone())),
        read_buf,
    ));
    mapper.register_binding::<serde_json::Value>(FunctionalObjectSerializer::<serde_json::Value>::of(
        |v| Ok(Value::from_json(v.clone())),
        Value::into_json,
    ));
    mapper.register_binding::<()>(FunctionalObjectSerializer::<()>::of(|_| Ok(Value::Null), read_unit));
}
