//! Structural encoding of `serde` types into codec values.
//!
//! Structs keep their type name and field order. Numbers keep their width
//! and floats keep NaN and infinities. Enum variants follow the externally
//! tagged layout: unit variants are strings, the rest a single-entry map
//! keyed by the variant name.

use super::Value;
use crate::error::CodecError;
use serde::ser::{self, Serialize};

type CodecResult<T> = std::result::Result<T, CodecError>;

/// Serializes any `serde` type into a [`Value`].
pub(crate) struct ValueSerializer;

fn tagged(variant: &str, value: Value) -> Value {
    Value::Map(vec![(Value::String(variant.to_owned()), value)])
}

impl ser::Serializer for ValueSerializer {
    type Ok = Value;
    type Error = CodecError;
    type SerializeSeq = SeqSerializer;
    type SerializeTuple = SeqSerializer;
    type SerializeTupleStruct = SeqSerializer;
    type SerializeTupleVariant = VariantSeqSerializer;
    type SerializeMap = MapSerializer;
    type SerializeStruct = StructSerializer;
    type SerializeStructVariant = VariantStructSerializer;

    fn serialize_bool(self, v: bool) -> CodecResult<Value> {
        Ok(Value::Bool(v))
    }

    fn serialize_i8(self, v: i8) -> CodecResult<Value> {
        Ok(Value::Byte(v))
    }

    fn serialize_i16(self, v: i16) -> CodecResult<Value> {
        Ok(Value::Short(v))
    }

    fn serialize_i32(self, v: i32) -> CodecResult<Value> {
        Ok(Value::Int(v))
    }

    fn serialize_i64(self, v: i64) -> CodecResult<Value> {
        Ok(Value::Long(v))
    }

    fn serialize_u8(self, v: u8) -> CodecResult<Value> {
        Ok(Value::Short(i16::from(v)))
    }

    fn serialize_u16(self, v: u16) -> CodecResult<Value> {
        Ok(Value::Int(i32::from(v)))
    }

    fn serialize_u32(self, v: u32) -> CodecResult<Value> {
        Ok(Value::Long(i64::from(v)))
    }

    fn serialize_u64(self, v: u64) -> CodecResult<Value> {
        Ok(Value::ULong(v))
    }

    fn serialize_f32(self, v: f32) -> CodecResult<Value> {
        Ok(Value::Float(v))
    }

    fn serialize_f64(self, v: f64) -> CodecResult<Value> {
        Ok(Value::Double(v))
    }

    fn serialize_char(self, v: char) -> CodecResult<Value> {
        Ok(Value::Char(v))
    }

    fn serialize_str(self, v: &str) -> CodecResult<Value> {
        Ok(Value::String(v.to_owned()))
    }

    fn serialize_bytes(self, v: &[u8]) -> CodecResult<Value> {
        Ok(Value::Bytes(v.to_vec()))
    }

    fn serialize_none(self) -> CodecResult<Value> {
        Ok(Value::Null)
    }

    fn serialize_some<T>(self, value: &T) -> CodecResult<Value>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(self)
    }

    fn serialize_unit(self) -> CodecResult<Value> {
        Ok(Value::Null)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> CodecResult<Value> {
        Ok(Value::Null)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
    ) -> CodecResult<Value> {
        Ok(Value::String(variant.to_owned()))
    }

    fn serialize_newtype_struct<T>(self, _name: &'static str, value: &T) -> CodecResult<Value>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T>(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        value: &T,
    ) -> CodecResult<Value>
    where
        T: ?Sized + Serialize,
    {
        Ok(tagged(variant, value.serialize(ValueSerializer)?))
    }

    fn serialize_seq(self, len: Option<usize>) -> CodecResult<SeqSerializer> {
        Ok(SeqSerializer {
            items: Vec::with_capacity(len.unwrap_or(0)),
        })
    }

    fn serialize_tuple(self, len: usize) -> CodecResult<SeqSerializer> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(self, _name: &'static str, len: usize) -> CodecResult<SeqSerializer> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> CodecResult<VariantSeqSerializer> {
        Ok(VariantSeqSerializer {
            variant,
            items: Vec::with_capacity(len),
        })
    }

    fn serialize_map(self, len: Option<usize>) -> CodecResult<MapSerializer> {
        Ok(MapSerializer {
            entries: Vec::with_capacity(len.unwrap_or(0)),
            key: None,
        })
    }

    fn serialize_struct(self, name: &'static str, len: usize) -> CodecResult<StructSerializer> {
        Ok(StructSerializer {
            name,
            fields: Vec::with_capacity(len),
        })
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> CodecResult<VariantStructSerializer> {
        Ok(VariantStructSerializer {
            inner: StructSerializer {
                name: variant,
                fields: Vec::with_capacity(len),
            },
        })
    }
}

pub(crate) struct SeqSerializer {
    items: Vec<Value>,
}

impl ser::SerializeSeq for SeqSerializer {
    type Ok = Value;
    type Error = CodecError;

    fn serialize_element<T>(&mut self, value: &T) -> CodecResult<()>
    where
        T: ?Sized + Serialize,
    {
        self.items.push(value.serialize(ValueSerializer)?);
        Ok(())
    }

    fn end(self) -> CodecResult<Value> {
        Ok(Value::List(self.items))
    }
}

impl ser::SerializeTuple for SeqSerializer {
    type Ok = Value;
    type Error = CodecError;

    fn serialize_element<T>(&mut self, value: &T) -> CodecResult<()>
    where
        T: ?Sized + Serialize,
    {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> CodecResult<Value> {
        ser::SerializeSeq::end(self)
    }
}

impl ser::SerializeTupleStruct for SeqSerializer {
    type Ok = Value;
    type Error = CodecError;

    fn serialize_field<T>(&mut self, value: &T) -> CodecResult<()>
    where
        T: ?Sized + Serialize,
    {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> CodecResult<Value> {
        ser::SerializeSeq::end(self)
    }
}

pub(crate) struct VariantSeqSerializer {
    variant: &'static str,
    items: Vec<Value>,
}

impl ser::SerializeTupleVariant for VariantSeqSerializer {
    type Ok = Value;
    type Error = CodecError;

    fn serialize_field<T>(&mut self, value: &T) -> CodecResult<()>
    where
        T: ?Sized + Serialize,
    {
        self.items.push(value.serialize(ValueSerializer)?);
        Ok(())
    }

    fn end(self) -> CodecResult<Value> {
        Ok(tagged(self.variant, Value::List(self.items)))
    }
}

pub(crate) struct MapSerializer {
    entries: Vec<(Value, Value)>,
    key: Option<Value>,
}

impl ser::SerializeMap for MapSerializer {
    type Ok = Value;
    type Error = CodecError;

    fn serialize_key<T>(&mut self, key: &T) -> CodecResult<()>
    where
        T: ?Sized + Serialize,
    {
        self.key = Some(key.serialize(ValueSerializer)?);
        Ok(())
    }

    fn serialize_value<T>(&mut self, value: &T) -> CodecResult<()>
    where
        T: ?Sized + Serialize,
    {
        let key = self
            .key
            .take()
            .ok_or_else(|| CodecError::Structural("map value written before its key".into()))?;
        self.entries.push((key, value.serialize(ValueSerializer)?));
        Ok(())
    }

    fn end(self) -> CodecResult<Value> {
        Ok(Value::Map(self.entries))
    }
}

pub(crate) struct StructSerializer {
    name: &'static str,
    fields: Vec<(String, Value)>,
}

impl StructSerializer {
    fn push<T>(&mut self, key: &'static str, value: &T) -> CodecResult<()>
    where
        T: ?Sized + Serialize,
    {
        self.fields.push((key.to_owned(), value.serialize(ValueSerializer)?));
        Ok(())
    }

    fn into_value(self) -> Value {
        Value::Struct {
            name: self.name.to_owned(),
            fields: self.fields,
        }
    }
}

impl ser::SerializeStruct for StructSerializer {
    type Ok = Value;
    type Error = CodecError;

    fn serialize_field<T>(&mut self, key: &'static str, value: &T) -> CodecResult<()>
    where
        T: ?Sized + Serialize,
    {
        self.push(key, value)
    }

    fn end(self) -> CodecResult<Value> {
        Ok(self.into_value())
    }
}

pub(crate) struct VariantStructSerializer {
    inner: StructSerializer,
}

impl ser::SerializeStructVariant for VariantStructSerializer {
    type Ok = Value;
    type Error = CodecError;

    fn serialize_field<T>(&mut self, key: &'static str, value: &T) -> CodecResult<()>
    where
        T: ?Sized + Serialize,
    {
        self.inner.push(key, value)
    }

    fn end(self) -> CodecResult<Value> {
        let variant = self.inner.name;
        Ok(tagged(variant, self.inner.into_value()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    enum Command {
        Stop,
        Kick(String),
        Move { x: i32, y: i32 },
    }

    #[test]
    fn test_numbers_keep_their_width() {
        assert_eq!(7u8.serialize(ValueSerializer).unwrap(), Value::Short(7));
        assert_eq!(u64::MAX.serialize(ValueSerializer).unwrap(), Value::ULong(u64::MAX));
        assert!(matches!(
            f64::NAN.serialize(ValueSerializer).unwrap(),
            Value::Double(v) if v.is_nan()
        ));
    }

    #[test]
    fn test_enum_variants_are_externally_tagged() {
        assert_eq!(
            Command::Stop.serialize(ValueSerializer).unwrap(),
            Value::String("Stop".into())
        );
        assert_eq!(
            Command::Kick("bob".into()).serialize(ValueSerializer).unwrap(),
            tagged("Kick", Value::String("bob".into()))
        );
        assert_eq!(
            Command::Move { x: 1, y: -1 }.serialize(ValueSerializer).unwrap(),
            tagged(
                "Move",
                Value::Struct {
                    name: "Move".into(),
                    fields: vec![("x".into(), Value::Int(1)), ("y".into(), Value::Int(-1))],
                }
            )
        );
    }
}
