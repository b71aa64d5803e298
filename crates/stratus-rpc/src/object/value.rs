//! Self-describing codec values.
//!
//! Every value on the wire is a one-byte tag followed by its payload. The
//! tag set is fixed and shared by both ends of a connection:
//!
//! | tag | value | payload |
//! |-----|-------|---------|
//! | 0 | null | none |
//! | 1 | bool | 1 byte |
//! | 2..=5 | i8, i16, i32, i64 | big-endian |
//! | 6, 7 | f32, f64 | big-endian IEEE 754 |
//! | 8 | char | u32 scalar |
//! | 9 | string | u32 length + UTF-8 |
//! | 10 | bytes | u32 length + raw |
//! | 11 | uuid | 16 bytes |
//! | 12 | list | u32 count + values |
//! | 13 | map | u32 count + key/value pairs |
//! | 14 | struct | name + u32 count + (field name, value) pairs |
//! | 15 | nested buffer | u32 length + raw |
//! | 16 | timestamp | i64 seconds + u32 nanos (UTC) |
//! | 17 | duration | u64 seconds + u32 nanos |
//! | 18 | u64 | big-endian |

use crate::buffer::{DataBuf, DataBufMut};
use crate::config::RpcConfig;
use crate::error::CodecError;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_BYTE: u8 = 2;
const TAG_SHORT: u8 = 3;
const TAG_INT: u8 = 4;
const TAG_LONG: u8 = 5;
const TAG_FLOAT: u8 = 6;
const TAG_DOUBLE: u8 = 7;
const TAG_CHAR: u8 = 8;
const TAG_STRING: u8 = 9;
const TAG_BYTES: u8 = 10;
const TAG_UUID: u8 = 11;
const TAG_LIST: u8 = 12;
const TAG_MAP: u8 = 13;
const TAG_STRUCT: u8 = 14;
const TAG_BUF: u8 = 15;
const TAG_TIMESTAMP: u8 = 16;
const TAG_DURATION: u8 = 17;
const TAG_ULONG: u8 = 18;

/// A decoded codec value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    ULong(u64),
    Float(f32),
    Double(f64),
    Char(char),
    String(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    List(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Struct {
        name: String,
        fields: Vec<(String, Value)>,
    },
    Buf(DataBuf),
    Timestamp(DateTime<Utc>),
    Duration(Duration),
}

impl Value {
    /// Human readable kind, used in type mismatch errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Byte(_) => "byte",
            Value::Short(_) => "short",
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::ULong(_) => "ulong",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Char(_) => "char",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Uuid(_) => "uuid",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Struct { .. } => "struct",
            Value::Buf(_) => "buffer",
            Value::Timestamp(_) => "timestamp",
            Value::Duration(_) => "duration",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view of any integral value.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Byte(v) => Some(i64::from(v)),
            Value::Short(v) => Some(i64::from(v)),
            Value::Int(v) => Some(i64::from(v)),
            Value::Long(v) => Some(v),
            Value::ULong(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    /// Unsigned view of any non-negative integral value.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::ULong(v) => Some(v),
            _ => self.as_i64().and_then(|v| u64::try_from(v).ok()),
        }
    }

    /// Floating point view of any numeric value.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float(v) => Some(f64::from(v)),
            Value::Double(v) => Some(v),
            Value::ULong(v) => Some(v as f64),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    pub fn write_to(&self, buf: &mut DataBufMut) {
        match self {
            Value::Null => {
                buf.write_u8(TAG_NULL);
            }
            Value::Bool(v) => {
                buf.write_u8(TAG_BOOL).write_bool(*v);
            }
            Value::Byte(v) => {
                buf.write_u8(TAG_BYTE).write_byte(*v);
            }
            Value::Short(v) => {
                buf.write_u8(TAG_SHORT).write_short(*v);
            }
            Value::Int(v) => {
                buf.write_u8(TAG_INT).write_int(*v);
            }
            Value::Long(v) => {
                buf.write_u8(TAG_LONG).write_long(*v);
            }
            Value::ULong(v) => {
                buf.write_u8(TAG_ULONG).write_u64(*v);
            }
            Value::Float(v) => {
                buf.write_u8(TAG_FLOAT).write_float(*v);
            }
            Value::Double(v) => {
                buf.write_u8(TAG_DOUBLE).write_double(*v);
            }
            Value::Char(v) => {
                buf.write_u8(TAG_CHAR).write_char(*v);
            }
            Value::String(v) => {
                buf.write_u8(TAG_STRING).write_string(v);
            }
            Value::Bytes(v) => {
                buf.write_u8(TAG_BYTES).write_byte_array(v);
            }
            Value::Uuid(v) => {
                buf.write_u8(TAG_UUID).write_unique_id(v);
            }
            Value::List(items) => {
                buf.write_u8(TAG_LIST).write_length(items.len());
                for item in items {
                    item.write_to(buf);
                }
            }
            Value::Map(entries) => {
                buf.write_u8(TAG_MAP).write_length(entries.len());
                for (key, value) in entries {
                    key.write_to(buf);
                    value.write_to(buf);
                }
            }
            Value::Struct { name, fields } => {
                buf.write_u8(TAG_STRUCT)
                    .write_string(name)
                    .write_length(fields.len());
                for (field, value) in fields {
                    buf.write_string(field);
                    value.write_to(buf);
                }
            }
            Value::Buf(v) => {
                buf.write_u8(TAG_BUF).write_data_buf(v);
            }
            Value::Timestamp(v) => {
                buf.write_u8(TAG_TIMESTAMP)
                    .write_long(v.timestamp())
                    .write_u32(v.timestamp_subsec_nanos());
            }
            Value::Duration(v) => {
                buf.write_u8(TAG_DURATION)
                    .write_u64(v.as_secs())
                    .write_u32(v.subsec_nanos());
            }
        }
    }

    pub fn read_from(buf: &mut DataBuf) -> Result<Value, CodecError> {
        Self::read_nested(buf, 0)
    }

    /// Advance past one encoded value.
    pub fn skip(buf: &mut DataBuf) -> Result<(), CodecError> {
        Self::read_from(buf).map(|_| ())
    }

    fn read_nested(buf: &mut DataBuf, depth: usize) -> Result<Value, CodecError> {
        if depth > RpcConfig::MAX_VALUE_DEPTH {
            return Err(CodecError::NestingTooDeep(RpcConfig::MAX_VALUE_DEPTH));
        }

        let value = match buf.read_u8()? {
            TAG_NULL => Value::Null,
            TAG_BOOL => Value::Bool(buf.read_bool()?),
            TAG_BYTE => Value::Byte(buf.read_byte()?),
            TAG_SHORT => Value::Short(buf.read_short()?),
            TAG_INT => Value::Int(buf.read_int()?),
            TAG_LONG => Value::Long(buf.read_long()?),
            TAG_ULONG => Value::ULong(buf.read_u64()?),
            TAG_FLOAT => Value::Float(buf.read_float()?),
            TAG_DOUBLE => Value::Double(buf.read_double()?),
            TAG_CHAR => Value::Char(buf.read_char()?),
            TAG_STRING => Value::String(buf.read_string()?),
            TAG_BYTES => Value::Bytes(buf.read_byte_array()?),
            TAG_UUID => Value::Uuid(buf.read_unique_id()?),
            TAG_LIST => {
                let count = buf.read_length()?;
                // Every element needs at least its tag byte.
                let mut items = Vec::with_capacity(count.min(buf.readable_bytes()));
                for _ in 0..count {
                    items.push(Self::read_nested(buf, depth + 1)?);
                }
                Value::List(items)
            }
            TAG_MAP => {
                let count = buf.read_length()?;
                let mut entries = Vec::with_capacity(count.min(buf.readable_bytes() / 2));
                for _ in 0..count {
                    let key = Self::read_nested(buf, depth + 1)?;
                    let value = Self::read_nested(buf, depth + 1)?;
                    entries.push((key, value));
                }
                Value::Map(entries)
            }
            TAG_STRUCT => {
                let name = buf.read_string()?;
                let count = buf.read_length()?;
                let mut fields = Vec::with_capacity(count.min(buf.readable_bytes() / 5));
                for _ in 0..count {
                    let field = buf.read_string()?;
                    fields.push((field, Self::read_nested(buf, depth + 1)?));
                }
                Value::Struct { name, fields }
            }
            TAG_BUF => Value::Buf(buf.read_data_buf()?),
            TAG_TIMESTAMP => {
                let secs = buf.read_long()?;
                let nanos = buf.read_u32()?;
                let timestamp = DateTime::from_timestamp(secs, nanos)
                    .ok_or(CodecError::InvalidPayload { kind: "timestamp" })?;
                Value::Timestamp(timestamp)
            }
            TAG_DURATION => {
                let secs = buf.read_u64()?;
                let nanos = buf.read_u32()?;
                if nanos >= 1_000_000_000 {
                    return Err(CodecError::InvalidPayload { kind: "duration" });
                }
                Value::Duration(Duration::new(secs, nanos))
            }
            tag => return Err(CodecError::UnknownTag(tag)),
        };
        Ok(value)
    }

    /// Convert a JSON document into a codec value. Objects become
    /// string-keyed maps.
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(v) => Value::Bool(v),
            serde_json::Value::Number(n) => {
                if let Some(v) = n.as_i64() {
                    Value::Long(v)
                } else if let Some(v) = n.as_u64() {
                    Value::ULong(v)
                } else {
                    Value::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(v) => Value::String(v),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(entries) => Value::Map(
                entries
                    .into_iter()
                    .map(|(key, value)| (Value::String(key), Value::from_json(value)))
                    .collect(),
            ),
        }
    }

    /// Convert this value into a JSON document. Non-finite floats become null.
    pub fn into_json(self) -> Result<serde_json::Value, CodecError> {
        use serde_json::Value as Json;

        let json = match self {
            Value::Null => Json::Null,
            Value::Bool(v) => Json::Bool(v),
            Value::Byte(v) => Json::from(v),
            Value::Short(v) => Json::from(v),
            Value::Int(v) => Json::from(v),
            Value::Long(v) => Json::from(v),
            Value::ULong(v) => Json::from(v),
            Value::Float(v) => float_json(f64::from(v)),
            Value::Double(v) => float_json(v),
            Value::Char(v) => Json::String(v.to_string()),
            Value::String(v) => Json::String(v),
            Value::Bytes(v) => Json::from(v),
            Value::Uuid(v) => Json::String(v.to_string()),
            Value::List(items) => Json::Array(
                items
                    .into_iter()
                    .map(Value::into_json)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Map(entries) => {
                let mut object = serde_json::Map::with_capacity(entries.len());
                for (key, value) in entries {
                    object.insert(key.into_json_key()?, value.into_json()?);
                }
                Json::Object(object)
            }
            Value::Struct { fields, .. } => {
                let mut object = serde_json::Map::with_capacity(fields.len());
                for (field, value) in fields {
                    object.insert(field, value.into_json()?);
                }
                Json::Object(object)
            }
            Value::Buf(v) => Json::from(v.to_byte_array()),
            Value::Timestamp(v) => Json::String(v.to_rfc3339()),
            Value::Duration(v) => serde_json::json!({
                "secs": v.as_secs(),
                "nanos": v.subsec_nanos(),
            }),
        };
        Ok(json)
    }

    fn into_json_key(self) -> Result<String, CodecError> {
        match self {
            Value::String(v) => Ok(v),
            Value::Char(v) => Ok(v.to_string()),
            Value::Uuid(v) => Ok(v.to_string()),
            Value::Bool(v) => Ok(v.to_string()),
            Value::ULong(v) => Ok(v.to_string()),
            other => match other.as_i64() {
                Some(v) => Ok(v.to_string()),
                None => Err(CodecError::TypeMismatch {
                    expected: "map key",
                    found: other.kind(),
                }),
            },
        }
    }
}

fn float_json(value: f64) -> serde_json::Value {
    serde_json::Number::from_f64(value)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: &Value) -> Value {
        let mut buf = DataBufMut::new();
        value.write_to(&mut buf);
        let mut read = buf.freeze();
        let decoded = Value::read_from(&mut read).unwrap();
        assert!(read.is_empty());
        decoded
    }

    #[test]
    fn test_null_is_single_zero_byte() {
        let mut buf = DataBufMut::new();
        Value::Null.write_to(&mut buf);
        assert_eq!(buf.freeze().to_byte_array(), vec![0]);
    }

    #[test]
    fn test_compound_values_roundtrip() {
        let value = Value::Struct {
            name: "Lobby".into(),
            fields: vec![
                ("id".into(), Value::String("L1".into())),
                (
                    "players".into(),
                    Value::List(vec![Value::Uuid(Uuid::new_v4()), Value::Null]),
                ),
                (
                    "limits".into(),
                    Value::Map(vec![(Value::String("max".into()), Value::Int(16))]),
                ),
                (
                    "created".into(),
                    Value::Timestamp(DateTime::from_timestamp(1_700_000_000, 5).unwrap()),
                ),
                ("ttl".into(), Value::Duration(Duration::new(30, 500))),
                ("raw".into(), Value::Buf(DataBuf::from(vec![1, 2]))),
            ],
        };

        assert_eq!(roundtrip(&value), value);
    }

    #[test]
    fn test_skip_advances_past_nested_value() {
        let mut buf = DataBufMut::new();
        Value::List(vec![Value::String("a".into()), Value::Long(3)]).write_to(&mut buf);
        Value::Bool(true).write_to(&mut buf);

        let mut read = buf.freeze();
        Value::skip(&mut read).unwrap();
        assert_eq!(Value::read_from(&mut read).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let mut read = DataBuf::from(vec![99]);
        assert!(matches!(
            Value::read_from(&mut read),
            Err(CodecError::UnknownTag(99))
        ));
    }

    #[test]
    fn test_excessive_nesting_is_rejected() {
        let mut bytes = Vec::new();
        for _ in 0..=RpcConfig::MAX_VALUE_DEPTH + 1 {
            bytes.extend_from_slice(&[TAG_LIST, 0, 0, 0, 1]);
        }
        bytes.push(TAG_NULL);

        let mut read = DataBuf::from(bytes);
        assert!(matches!(
            Value::read_from(&mut read),
            Err(CodecError::NestingTooDeep(_))
        ));
    }

    #[test]
    fn test_json_bridge() {
        let json = serde_json::json!({"name": "Bob", "age": 42, "tags": ["a"]});
        let value = Value::from_json(json.clone());

        assert!(matches!(value, Value::Map(_)));
        assert_eq!(value.into_json().unwrap(), json);
    }

    #[test]
    fn test_ulong_keeps_full_range() {
        let value = Value::ULong(u64::MAX);
        assert_eq!(roundtrip(&value), value);
        assert_eq!(value.as_i64(), None);
        assert_eq!(value.as_u64(), Some(u64::MAX));
        assert_eq!(Value::Long(-1).as_u64(), None);
        assert_eq!(Value::Int(7).as_u64(), Some(7));

        let json = serde_json::json!(u64::MAX);
        assert_eq!(Value::from_json(json.clone()), value);
        assert_eq!(value.into_json().unwrap(), json);
    }

    #[test]
    fn test_non_scalar_map_key_is_rejected() {
        let value = Value::Map(vec![(Value::List(vec![]), Value::Null)]);
        assert!(value.into_json().is_err());
    }
}
