//! Error types for the Stratus RPC engine.
//!
//! Errors are split by the place they originate:
//! - [`CodecError`]: malformed or truncated buffers and values that cannot be mapped
//! - [`InvocationError`]: the failure of a single hop on the handling side
//! - [`RemoteError`]: the error descriptor that travels back over the wire
//! - [`RpcError`]: everything a caller can observe when firing a call

use crate::buffer::{DataBuf, DataBufMut};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while reading or writing buffers and codec values.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Buffer exhausted: needed {needed} bytes but only {remaining} remain")]
    Truncated { needed: usize, remaining: usize },

    #[error("Unknown value tag {0}")]
    UnknownTag(u8),

    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Invalid UTF-8 in string payload")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("Invalid char scalar value {0:#x}")]
    InvalidChar(u32),

    #[error("Negative length {0}")]
    NegativeLength(i32),

    #[error("Invalid {kind} payload")]
    InvalidPayload { kind: &'static str },

    #[error("Value nesting exceeds {0} levels")]
    NestingTooDeep(usize),

    #[error("No serializer registered for {0}")]
    MissingSerializer(&'static str),

    #[error("Structural mapping failed: {0}")]
    Structural(String),
}

impl serde::ser::Error for CodecError {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        CodecError::Structural(msg.to_string())
    }
}

impl serde::de::Error for CodecError {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        CodecError::Structural(msg.to_string())
    }
}

/// Failure of a single invocation on the handling side.
///
/// Every variant maps to a stable `error_type()` string which is what the
/// calling side sees in [`RemoteError::error_type`].
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("No handler registered for class {class}")]
    HandlerNotFound { class: String },

    #[error("No method {method} with {arity} parameter(s) in {class}")]
    MethodNotFound {
        class: String,
        method: String,
        arity: usize,
    },

    #[error("{candidates} methods named {method} with {arity} parameter(s) in {class}")]
    AmbiguousMethod {
        class: String,
        method: String,
        arity: usize,
        candidates: usize,
    },

    #[error("Working instance of type {found} cannot receive {class}.{method}")]
    IncompatibleInstance {
        class: String,
        method: String,
        found: &'static str,
    },

    #[error("Unable to decode arguments of {method}: {source}")]
    ArgumentDecoding {
        method: String,
        #[source]
        source: CodecError,
    },

    #[error("Unable to encode result of {method}: {source}")]
    ResultEncoding {
        method: String,
        #[source]
        source: CodecError,
    },

    #[error("{message}")]
    Raised {
        error_type: String,
        message: String,
        causes: Vec<String>,
    },

    #[error("Method {method} panicked: {message}")]
    Panicked { method: String, message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },
}

impl InvocationError {
    /// Capture an error returned by a target method, including its source chain.
    pub fn raised<E>(error: &E) -> Self
    where
        E: std::error::Error + 'static,
    {
        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }

        InvocationError::Raised {
            error_type: simple_type_name::<E>().to_string(),
            message: error.to_string(),
            causes,
        }
    }

    /// The type name reported to the calling side.
    pub fn error_type(&self) -> &str {
        match self {
            InvocationError::HandlerNotFound { .. } => "HandlerNotFoundError",
            InvocationError::MethodNotFound { .. } => "MethodNotFoundError",
            InvocationError::AmbiguousMethod { .. } => "AmbiguousMethodError",
            InvocationError::IncompatibleInstance { .. } => "IncompatibleInstanceError",
            InvocationError::ArgumentDecoding { .. } | InvocationError::ResultEncoding { .. } => {
                "EncodingError"
            }
            InvocationError::Raised { error_type, .. } => error_type,
            InvocationError::Panicked { .. } => "PanicError",
            InvocationError::InvalidRequest { .. } => "InvalidRequestError",
        }
    }

    /// Build the wire descriptor for this failure.
    pub fn to_remote(&self) -> RemoteError {
        let causes = match self {
            InvocationError::Raised { causes, .. } => causes.clone(),
            InvocationError::ArgumentDecoding { source, .. }
            | InvocationError::ResultEncoding { source, .. } => vec![source.to_string()],
            _ => Vec::new(),
        };

        RemoteError {
            error_type: self.error_type().to_string(),
            message: self.to_string(),
            causes,
        }
    }
}

impl From<CodecError> for InvocationError {
    fn from(err: CodecError) -> Self {
        InvocationError::InvalidRequest {
            message: err.to_string(),
        }
    }
}

/// Error descriptor of a failed remote invocation.
///
/// Wire layout: `string error_type, string message, i32 cause_count, cause_count x string`.
/// The remote stack is not available locally; `causes` carries the rendered
/// source chain of the original error instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{error_type}({message})")]
pub struct RemoteError {
    pub error_type: String,
    pub message: String,
    pub causes: Vec<String>,
}

impl RemoteError {
    pub fn write_to(&self, buf: &mut DataBufMut) {
        buf.write_string(&self.error_type)
            .write_string(&self.message)
            .write_int(self.causes.len() as i32);
        for cause in &self.causes {
            buf.write_string(cause);
        }
    }

    pub fn read_from(buf: &mut DataBuf) -> std::result::Result<Self, CodecError> {
        let error_type = buf.read_string()?;
        let message = buf.read_string()?;
        let count = buf.read_int()?;
        if count < 0 {
            return Err(CodecError::NegativeLength(count));
        }

        let mut causes = Vec::new();
        for _ in 0..count {
            causes.push(buf.read_string()?);
        }

        Ok(Self {
            error_type,
            message,
            causes,
        })
    }
}

/// Main error type observed by callers of the engine.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The target method (or its resolution) failed on the remote side.
    #[error("Remote execution failed: {0}")]
    Execution(RemoteError),

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Connection closed before a response arrived")]
    ConnectionClosed,

    #[error("No connected channel available to reach {class}")]
    NoConnection { class: String },

    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Encoding error: {0}")]
    Codec(#[from] CodecError),

    #[error("Invocation context is missing {field}")]
    InvalidContext { field: &'static str },

    /// A call sent without a result expectation was fired for a value.
    #[error("Call does not expect a result and cannot produce {requested}; fire it as () or Option<_>")]
    ResultNotExpected { requested: &'static str },

    #[error("fire_sync cannot block a current-thread runtime, await fire() instead")]
    BlockingNotSupported,

    #[error("Packet of {size} bytes exceeds maximum {max}")]
    PacketTooLarge { size: usize, max: usize },

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, RpcError>;

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        RpcError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl RpcError {
    pub fn transport(message: impl Into<String>) -> Self {
        RpcError::Transport {
            message: message.into(),
        }
    }

    /// True when the failure happened inside the remote handler.
    pub fn is_remote(&self) -> bool {
        matches!(self, RpcError::Execution(_))
    }

    /// True for delivery failures. The engine never retries these; callers may.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RpcError::Transport { .. }
                | RpcError::ConnectionClosed
                | RpcError::NoConnection { .. }
                | RpcError::Timeout(_)
                | RpcError::Io { .. }
        )
    }
}

/// Last path segment of a type name, without generic arguments.
pub(crate) fn simple_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("lobby is full")]
    struct LobbyFull {
        #[source]
        source: std::io::Error,
    }

    #[test]
    fn test_raised_captures_type_and_causes() {
        let err = LobbyFull {
            source: std::io::Error::new(std::io::ErrorKind::Other, "socket gone"),
        };
        let raised = InvocationError::raised(&err);

        assert_eq!(raised.error_type(), "LobbyFull");
        let remote = raised.to_remote();
        assert_eq!(remote.message, "lobby is full");
        assert_eq!(remote.causes, vec!["socket gone".to_string()]);
        assert_eq!(remote.to_string(), "LobbyFull(lobby is full)");
    }

    #[test]
    fn test_remote_error_wire_roundtrip() {
        let remote = InvocationError::MethodNotFound {
            class: "UserService".into(),
            method: "rename".into(),
            arity: 2,
        }
        .to_remote();

        let mut buf = DataBufMut::new();
        remote.write_to(&mut buf);
        let decoded = RemoteError::read_from(&mut buf.freeze()).unwrap();

        assert_eq!(decoded, remote);
        assert_eq!(decoded.error_type, "MethodNotFoundError");
    }

    #[test]
    fn test_error_classification() {
        assert!(RpcError::ConnectionClosed.is_transport());
        assert!(RpcError::Timeout(Duration::from_secs(1)).is_transport());
        assert!(!RpcError::ConnectionClosed.is_remote());

        let remote = RpcError::Execution(RemoteError {
            error_type: "PanicError".into(),
            message: "boom".into(),
            causes: Vec::new(),
        });
        assert!(remote.is_remote());
        assert!(!remote.is_transport());
    }

    #[test]
    fn test_simple_type_name_strips_paths_and_generics() {
        assert_eq!(simple_type_name::<std::io::Error>(), "Error");
        assert_eq!(simple_type_name::<Vec<String>>(), "Vec");
    }
}
