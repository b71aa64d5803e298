//! Cursor-based binary buffers.
//!
//! [`DataBufMut`] is the append-only side used to build a message;
//! [`DataBuf`] is the read side with a cursor over shared, immutable bytes.
//! All fixed-width numbers are big-endian. Strings, byte arrays and nested
//! buffers carry a `u32` length prefix so a buffer written by one side can be
//! parsed by the other without external framing.

use crate::config::RpcConfig;
use crate::error::CodecError;
use crate::object::ObjectMapper;
use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::any::Any;
use uuid::Uuid;

type CodecResult<T> = std::result::Result<T, CodecError>;

/// Read side of a binary message.
///
/// Cloning is cheap: the underlying bytes are reference counted and every
/// clone has its own cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataBuf {
    bytes: Bytes,
    cursor: usize,
    mark: Option<usize>,
}

impl DataBuf {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            cursor: 0,
            mark: None,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn readable_bytes(&self) -> usize {
        self.bytes.len() - self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.readable_bytes() == 0
    }

    /// Remember the current cursor so a failed speculative read can be rewound.
    pub fn start_transaction(&mut self) -> &mut Self {
        self.mark = Some(self.cursor);
        self
    }

    /// Rewind to the position saved by [`start_transaction`](Self::start_transaction).
    pub fn redo_transaction(&mut self) -> &mut Self {
        if let Some(mark) = self.mark.take() {
            self.cursor = mark;
        }
        self
    }

    fn take(&mut self, len: usize) -> CodecResult<&[u8]> {
        let remaining = self.readable_bytes();
        if len > remaining {
            return Err(CodecError::Truncated {
                needed: len,
                remaining,
            });
        }
        let start = self.cursor;
        self.cursor += len;
        Ok(&self.bytes[start..start + len])
    }

    fn read_array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> CodecResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> CodecResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_byte(&mut self) -> CodecResult<i8> {
        Ok(i8::from_be_bytes(self.read_array()?))
    }

    pub fn read_short(&mut self) -> CodecResult<i16> {
        Ok(i16::from_be_bytes(self.read_array()?))
    }

    pub fn read_int(&mut self) -> CodecResult<i32> {
        Ok(i32::from_be_bytes(self.read_array()?))
    }

    pub fn read_long(&mut self) -> CodecResult<i64> {
        Ok(i64::from_be_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> CodecResult<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> CodecResult<u64> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    pub fn read_float(&mut self) -> CodecResult<f32> {
        Ok(f32::from_be_bytes(self.read_array()?))
    }

    pub fn read_double(&mut self) -> CodecResult<f64> {
        Ok(f64::from_be_bytes(self.read_array()?))
    }

    pub fn read_char(&mut self) -> CodecResult<char> {
        let scalar = self.read_u32()?;
        char::from_u32(scalar).ok_or(CodecError::InvalidChar(scalar))
    }

    pub fn read_length(&mut self) -> CodecResult<usize> {
        Ok(self.read_u32()? as usize)
    }

    pub fn read_byte_array(&mut self) -> CodecResult<Vec<u8>> {
        let len = self.read_length()?;
        Ok(self.take(len)?.to_vec())
    }

    pub fn read_string(&mut self) -> CodecResult<String> {
        let bytes = self.read_byte_array()?;
        Ok(String::from_utf8(bytes)?)
    }

    pub fn read_unique_id(&mut self) -> CodecResult<Uuid> {
        Ok(Uuid::from_bytes(self.read_array()?))
    }

    /// Read a length-prefixed nested buffer without copying its bytes.
    pub fn read_data_buf(&mut self) -> CodecResult<DataBuf> {
        let len = self.read_length()?;
        self.split_to(len)
    }

    /// Read a presence flag followed by the value when present.
    pub fn read_nullable<T>(
        &mut self,
        read: impl FnOnce(&mut Self) -> CodecResult<T>,
    ) -> CodecResult<Option<T>> {
        if self.read_bool()? {
            read(self).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Read one codec value and map it to `T`.
    pub fn read_object<T: DeserializeOwned + Any>(&mut self, mapper: &ObjectMapper) -> CodecResult<T> {
        mapper.read_object(self)
    }

    /// Detach the next `len` readable bytes as their own buffer (zero-copy).
    pub fn split_to(&mut self, len: usize) -> CodecResult<DataBuf> {
        let remaining = self.readable_bytes();
        if len > remaining {
            return Err(CodecError::Truncated {
                needed: len,
                remaining,
            });
        }
        let start = self.cursor;
        self.cursor += len;
        Ok(DataBuf::new(self.bytes.slice(start..start + len)))
    }

    /// The readable bytes as a shared slice; the cursor is not moved.
    pub fn remaining(&self) -> Bytes {
        self.bytes.slice(self.cursor..)
    }

    /// Copy of the readable bytes.
    pub fn to_byte_array(&self) -> Vec<u8> {
        self.bytes[self.cursor..].to_vec()
    }

    /// Copy the readable bytes into a buffer that can be appended to.
    pub fn as_mutable(&self) -> DataBufMut {
        let mut buf = DataBufMut::with_capacity(self.readable_bytes());
        buf.write_raw(&self.bytes[self.cursor..]);
        buf
    }
}

impl From<Vec<u8>> for DataBuf {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<Bytes> for DataBuf {
    fn from(bytes: Bytes) -> Self {
        Self::new(bytes)
    }
}

impl Serialize for DataBuf {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.bytes[self.cursor..])
    }
}

impl<'de> Deserialize<'de> for DataBuf {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Vec::<u8>::deserialize(deserializer).map(DataBuf::from)
    }
}

/// Write side of a binary message.
#[derive(Debug, Clone, Default)]
pub struct DataBufMut {
    bytes: BytesMut,
}

impl DataBufMut {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: BytesMut::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.bytes.put_u8(value);
        self
    }

    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.write_u8(u8::from(value))
    }

    pub fn write_byte(&mut self, value: i8) -> &mut Self {
        self.bytes.put_i8(value);
        self
    }

    pub fn write_short(&mut self, value: i16) -> &mut Self {
        self.bytes.put_i16(value);
        self
    }

    pub fn write_int(&mut self, value: i32) -> &mut Self {
        self.bytes.put_i32(value);
        self
    }

    pub fn write_long(&mut self, value: i64) -> &mut Self {
        self.bytes.put_i64(value);
        self
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.bytes.put_u32(value);
        self
    }

    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.bytes.put_u64(value);
        self
    }

    pub fn write_float(&mut self, value: f32) -> &mut Self {
        self.bytes.put_f32(value);
        self
    }

    pub fn write_double(&mut self, value: f64) -> &mut Self {
        self.bytes.put_f64(value);
        self
    }

    pub fn write_char(&mut self, value: char) -> &mut Self {
        self.write_u32(u32::from(value))
    }

    /// Length prefix. Packets are capped far below `u32::MAX` by the transport.
    pub fn write_length(&mut self, len: usize) -> &mut Self {
        self.write_u32(len as u32)
    }

    pub fn write_byte_array(&mut self, value: &[u8]) -> &mut Self {
        self.write_length(value.len());
        self.bytes.put_slice(value);
        self
    }

    pub fn write_string(&mut self, value: &str) -> &mut Self {
        self.write_byte_array(value.as_bytes())
    }

    pub fn write_unique_id(&mut self, value: &Uuid) -> &mut Self {
        self.bytes.put_slice(value.as_bytes());
        self
    }

    /// Append the readable bytes of `value` as a length-prefixed nested buffer.
    pub fn write_data_buf(&mut self, value: &DataBuf) -> &mut Self {
        self.write_byte_array(&value.bytes[value.cursor..])
    }

    pub fn write_nullable<T>(
        &mut self,
        value: Option<T>,
        write: impl FnOnce(&mut Self, T),
    ) -> &mut Self {
        match value {
            Some(inner) => {
                self.write_bool(true);
                write(self, inner);
            }
            None => {
                self.write_bool(false);
            }
        }
        self
    }

    /// Append bytes without a length prefix.
    pub fn write_raw(&mut self, value: &[u8]) -> &mut Self {
        self.bytes.put_slice(value);
        self
    }

    pub fn write_object<T: Serialize + Any>(&mut self, mapper: &ObjectMapper, object: &T) -> CodecResult<&mut Self> {
        mapper.write_object(self, object)?;
        Ok(self)
    }

    pub fn freeze(self) -> DataBuf {
        DataBuf::new(self.bytes.freeze())
    }
}

/// Creates outbound buffers with a preconfigured initial capacity.
#[derive(Debug, Clone, Copy)]
pub struct DataBufFactory {
    default_capacity: usize,
}

impl DataBufFactory {
    pub fn new(default_capacity: usize) -> Self {
        Self { default_capacity }
    }

    pub fn create_empty(&self) -> DataBufMut {
        DataBufMut::with_capacity(self.default_capacity)
    }

    pub fn create_with_expected_size(&self, size: usize) -> DataBufMut {
        DataBufMut::with_capacity(size)
    }
}

impl Default for DataBufFactory {
    fn default() -> Self {
        Self::new(RpcConfig::DEFAULT_BUFFER_CAPACITY)
    }
}
