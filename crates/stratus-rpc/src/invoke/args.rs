//! Argument tuples on both sides of a call.
//!
//! [`RpcArgs`] decodes a handler's parameters in declaration order;
//! [`IntoArguments`] encodes a caller's arguments. Both are implemented for
//! tuples of up to eight elements.

use crate::buffer::DataBuf;
use crate::error::CodecError;
use crate::object::{ObjectMapper, Value};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::type_name;

/// Parameter list of a target method.
pub trait RpcArgs: Sized + Send + 'static {
    const ARITY: usize;

    fn parameter_types() -> Vec<&'static str>;

    fn decode(buf: &mut DataBuf, mapper: &ObjectMapper) -> Result<Self, CodecError>;
}

/// Arguments supplied by a caller.
pub trait IntoArguments {
    fn into_values(self, mapper: &ObjectMapper) -> Result<Vec<Value>, CodecError>;
}

impl RpcArgs for () {
    const ARITY: usize = 0;

    fn parameter_types() -> Vec<&'static str> {
        Vec::new()
    }

    fn decode(_buf: &mut DataBuf, _mapper: &ObjectMapper) -> Result<Self, CodecError> {
        Ok(())
    }
}

impl IntoArguments for () {
    fn into_values(self, _mapper: &ObjectMapper) -> Result<Vec<Value>, CodecError> {
        Ok(Vec::new())
    }
}

/// Pre-encoded arguments.
impl IntoArguments for Vec<Value> {
    fn into_values(self, _mapper: &ObjectMapper) -> Result<Vec<Value>, CodecError> {
        Ok(self)
    }
}

macro_rules! tuple_args {
    ($arity:expr; $($name:ident),+) => {
        impl<$($name),+> RpcArgs for ($($name,)+)
        where
            $($name: DeserializeOwned + Send + 'static),+
        {
            const ARITY: usize = $arity;

            fn parameter_types() -> Vec<&'static str> {
                vec![$(type_name::<$name>()),+]
            }

            fn decode(buf: &mut DataBuf, mapper: &ObjectMapper) -> Result<Self, CodecError> {
                Ok(($(mapper.read_object::<$name>(buf)?,)+))
            }
        }

        impl<$($name),+> IntoArguments for ($($name,)+)
        where
            $($name: Serialize + 'static),+
        {
            #[allow(non_snake_case)]
            fn into_values(self, mapper: &ObjectMapper) -> Result<Vec<Value>, CodecError> {
                let ($($name,)+) = self;
                Ok(vec![$(mapper.to_value(&$name)?),+])
            }
        }
    };
}

tuple_args!(1; A);
tuple_args!(2; A, B);
tuple_args!(3; A, B, C);
tuple_args!(4; A, B, C, D);
tuple_args!(5; A, B, C, D, E);
tuple_args!(6; A, B, C, D, E, F);
tuple_args!(7; A, B, C, D, E, F, G);
tuple_args!(8; A, B, C, D, E, F, G, H);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::DataBufMut;

    #[test]
    fn test_tuple_arity_and_types() {
        assert_eq!(<(String, i32) as RpcArgs>::ARITY, 2);
        assert_eq!(<() as RpcArgs>::ARITY, 0);

        let types = <(String, bool) as RpcArgs>::parameter_types();
        assert_eq!(types.len(), 2);
        assert!(types[0].ends_with("String"));
        assert_eq!(types[1], "bool");
    }

    #[test]
    fn test_encode_then_decode_in_order() {
        let mapper = ObjectMapper::new();
        let values = ("u-1".to_string(), 7i64, true)
            .into_values(&mapper)
            .unwrap();
        assert_eq!(values.len(), 3);

        let mut buf = DataBufMut::new();
        for value in &values {
            value.write_to(&mut buf);
        }

        let (id, count, flag) =
            <(String, i64, bool) as RpcArgs>::decode(&mut buf.freeze(), &mapper).unwrap();
        assert_eq!(id, "u-1");
        assert_eq!(count, 7);
        assert!(flag);
    }

    #[test]
    fn test_decode_reports_type_mismatch() {
        let mapper = ObjectMapper::new();
        let mut buf = DataBufMut::new();
        Value::String("not a number".into()).write_to(&mut buf);

        let result = <(i32,) as RpcArgs>::decode(&mut buf.freeze(), &mapper);
        assert!(matches!(result, Err(CodecError::TypeMismatch { .. })));
    }
}
