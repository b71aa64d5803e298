//! Inbound request dispatch.
//!
//! [`RpcPacketListener`] is registered on [`NetworkConfig::RPC_CHANNEL`]. For
//! each request it reads the chain flag, runs the single hop or every hop of
//! the chain in order, and answers the query with the result of the last
//! hop that ran.
//!
//! A chain stops at the first failed hop. The remaining hops are read past
//! without being invoked and the failure becomes the chain's result.

use crate::buffer::{DataBuf, DataBufFactory, DataBufMut};
use crate::config::{NetworkConfig, RpcConfig};
use crate::context::RpcInvocationContext;
use crate::error::{CodecError, InvocationError, Result};
use crate::handler::{HandlingResult, RpcHandler, RpcHandlerRegistry};
use crate::invoke::RpcObject;
use crate::network::{NetworkChannel, Packet, PacketListener};
use crate::object::{ObjectMapper, Value};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// One decoded call of a request; its arguments are still encoded.
struct Hop {
    class_name: String,
    method_name: String,
    expects_result: bool,
    argument_count: usize,
    arguments: DataBuf,
}

impl Hop {
    fn read_from(buf: &mut DataBuf) -> std::result::Result<Self, CodecError> {
        let class_name = buf.read_string()?;
        let method_name = buf.read_string()?;
        let expects_result = buf.read_bool()?;
        let count = buf.read_int()?;
        let argument_count = usize::try_from(count).map_err(|_| CodecError::NegativeLength(count))?;

        // Measure the arguments without decoding them, then carve them out
        let before = buf.readable_bytes();
        buf.start_transaction();
        for _ in 0..argument_count {
            Value::skip(buf)?;
        }
        let consumed = before - buf.readable_bytes();
        buf.redo_transaction();

        Ok(Self {
            class_name,
            method_name,
            expects_result,
            argument_count,
            arguments: buf.split_to(consumed)?,
        })
    }
}

/// Result of one hop together with the handler that produced it.
struct HopOutcome {
    result: HandlingResult,
    handler: Option<Arc<RpcHandler>>,
}

/// Dispatches RPC requests to registered handlers.
pub struct RpcPacketListener {
    registry: Arc<RpcHandlerRegistry>,
    mapper: Arc<ObjectMapper>,
    buffers: DataBufFactory,
}

impl RpcPacketListener {
    pub fn new(registry: Arc<RpcHandlerRegistry>) -> Self {
        Self::with_codec(registry, Arc::new(ObjectMapper::new()), DataBufFactory::default())
    }

    /// Use `mapper` and `buffers` for responses that no handler produced.
    pub fn with_codec(
        registry: Arc<RpcHandlerRegistry>,
        mapper: Arc<ObjectMapper>,
        buffers: DataBufFactory,
    ) -> Self {
        Self {
            registry,
            mapper,
            buffers,
        }
    }

    pub fn registry(&self) -> &Arc<RpcHandlerRegistry> {
        &self.registry
    }

    /// Run the request in `content` and return the response to send, if any.
    pub fn process(&self, channel: &Arc<dyn NetworkChannel>, mut content: DataBuf) -> Option<DataBufMut> {
        let is_chain = match content.read_bool() {
            Ok(is_chain) => is_chain,
            Err(e) => return Some(self.invalid_request(e.to_string())),
        };

        if is_chain {
            self.process_chain(channel, content)
        } else {
            match Hop::read_from(&mut content) {
                Ok(hop) => {
                    let expects_result = hop.expects_result;
                    let outcome = self.dispatch(channel, hop, None, false);
                    self.respond(expects_result, outcome)
                }
                Err(e) => Some(self.invalid_request(e.to_string())),
            }
        }
    }

    fn process_chain(&self, channel: &Arc<dyn NetworkChannel>, mut content: DataBuf) -> Option<DataBufMut> {
        let count = match content.read_int() {
            Ok(count) => count,
            Err(e) => return Some(self.invalid_request(e.to_string())),
        };
        let length = match usize::try_from(count) {
            Ok(length) if (1..=RpcConfig::MAX_CHAIN_LENGTH).contains(&length) => length,
            _ => {
                return Some(self.invalid_request(format!(
                    "chain length {} outside 1..={}",
                    count,
                    RpcConfig::MAX_CHAIN_LENGTH
                )))
            }
        };

        let mut working: Option<RpcObject> = None;
        for index in 0..length {
            let hop = match Hop::read_from(&mut content) {
                Ok(hop) => hop,
                Err(e) => return Some(self.invalid_request(e.to_string())),
            };
            let last = index + 1 == length;
            let expects_result = hop.expects_result;

            // Later hops run strictly against the previous result
            let outcome = self.dispatch(channel, hop, working.take(), index > 0);
            if last {
                return self.respond(expects_result, outcome);
            }

            if !outcome.result.was_successful() {
                warn!(hop = index + 1, length, "Chain aborted at failed hop");
                let expects_result = self.skip_hops(&mut content, length - index - 1);
                return self.respond(expects_result, outcome);
            }
            working = outcome.result.into_value();
        }

        None
    }

    /// Read past `remaining` hops and return whether the last one expects a result.
    fn skip_hops(&self, content: &mut DataBuf, remaining: usize) -> bool {
        let mut expects_result = true;
        for _ in 0..remaining {
            match Hop::read_from(content) {
                Ok(hop) => {
                    trace!(class = %hop.class_name, method = %hop.method_name, "Skipping hop");
                    expects_result = hop.expects_result;
                }
                Err(e) => {
                    warn!("Unable to read skipped hop: {}", e);
                    return true;
                }
            }
        }
        expects_result
    }

    fn dispatch(
        &self,
        channel: &Arc<dyn NetworkChannel>,
        hop: Hop,
        working_instance: Option<RpcObject>,
        strict_instance: bool,
    ) -> HopOutcome {
        let Some(handler) = self.registry.handler(&hop.class_name) else {
            warn!(class = %hop.class_name, "No handler registered");
            return HopOutcome {
                result: HandlingResult::failure(InvocationError::HandlerNotFound {
                    class: hop.class_name,
                }),
                handler: None,
            };
        };

        debug!(
            class = %hop.class_name,
            method = %hop.method_name,
            arguments = hop.argument_count,
            "Dispatching RPC"
        );

        let context = RpcInvocationContext::builder()
            .method_name(hop.method_name)
            .argument_count(hop.argument_count)
            .arguments(hop.arguments)
            .expects_result(hop.expects_result)
            .normalize_primitives(true)
            .strict_instance(strict_instance)
            .working_instance(working_instance)
            .channel(Arc::clone(channel))
            .build();

        let result = match context {
            Ok(context) => handler.handle(context),
            Err(e) => HandlingResult::failure(InvocationError::InvalidRequest {
                message: e.to_string(),
            }),
        };

        if let Some(error) = result.error() {
            warn!(class = %hop.class_name, "RPC failed: {}", error);
        }

        HopOutcome {
            result,
            handler: Some(handler),
        }
    }

    fn respond(&self, expects_result: bool, outcome: HopOutcome) -> Option<DataBufMut> {
        if !expects_result {
            return None;
        }

        let (mapper, mut buf): (&ObjectMapper, DataBufMut) = match &outcome.handler {
            Some(handler) => (
                handler.object_mapper(),
                handler.data_buf_factory().create_empty(),
            ),
            None => (&self.mapper, self.buffers.create_empty()),
        };
        outcome.result.write_to(&mut buf, mapper);
        Some(buf)
    }

    fn invalid_request(&self, message: String) -> DataBufMut {
        warn!("Invalid RPC request: {}", message);
        let mut buf = self.buffers.create_empty();
        HandlingResult::failure(InvocationError::InvalidRequest { message }).write_to(&mut buf, &self.mapper);
        buf
    }
}

impl PacketListener for RpcPacketListener {
    fn handle(&self, channel: &Arc<dyn NetworkChannel>, packet: Packet) -> Result<()> {
        let query_id = packet.unique_id();
        let Some(response) = self.process(channel, packet.into_content()) else {
            return Ok(());
        };

        match query_id {
            Some(id) => channel.send_packet(
                Packet::new(NetworkConfig::RESPONSE_CHANNEL, response.freeze()).with_unique_id(id),
            ),
            None => {
                trace!("Request carries no query id, response dropped");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::invoke::{MethodTable, Opaque};
    use crate::network::local::LocalChannel;
    use crate::network::PacketListenerRegistry;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Step {
        calls: AtomicUsize,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("step refused")]
    struct Refused;

    fn registry(step: Arc<Step>) -> Arc<RpcHandlerRegistry> {
        let table = MethodTable::builder::<Step>("Step")
            .method("next", |step: &Step, (): ()| {
                step.calls.fetch_add(1, Ordering::SeqCst);
                Opaque(Arc::new(Step::default()))
            })
            .fallible_method("fail", |_step: &Step, (): ()| -> std::result::Result<bool, Refused> {
                Err(Refused)
            })
            .method("count", |step: &Step, (): ()| step.calls.load(Ordering::SeqCst) as i32)
            .build();

        let registry = Arc::new(RpcHandlerRegistry::new());
        registry.register_handler(RpcHandler::new(
            table,
            Some(RpcObject::opaque(step)),
            Arc::new(ObjectMapper::new()),
            DataBufFactory::default(),
            RpcConfig::METHOD_CACHE_CAPACITY,
        ));
        registry
    }

    fn channel() -> Arc<dyn NetworkChannel> {
        let (a, _b) = LocalChannel::pair(
            Arc::new(PacketListenerRegistry::new()),
            Arc::new(PacketListenerRegistry::new()),
        );
        a
    }

    fn write_hop(buf: &mut DataBufMut, class: &str, method: &str, expects_result: bool) {
        buf.write_string(class)
            .write_string(method)
            .write_bool(expects_result)
            .write_int(0);
    }

    fn chain(hops: &[(&str, &str)], expects_result: bool) -> DataBuf {
        let mut buf = DataBufMut::new();
        buf.write_bool(true).write_int(hops.len() as i32);
        for (index, (class, method)) in hops.iter().enumerate() {
            let last = index + 1 == hops.len();
            write_hop(&mut buf, class, method, !last || expects_result);
        }
        buf.freeze()
    }

    fn read_failure(response: DataBufMut) -> RemoteError {
        let mut buf = response.freeze();
        assert!(!buf.read_bool().unwrap());
        RemoteError::read_from(&mut buf).unwrap()
    }

    #[test]
    fn test_single_call_returns_value() {
        let step = Arc::new(Step::default());
        let listener = RpcPacketListener::new(registry(Arc::clone(&step)));
        let mut request = DataBufMut::new();
        request.write_bool(false);
        write_hop(&mut request, "Step", "count", true);

        let mut response = listener.process(&channel(), request.freeze()).unwrap().freeze();

        assert!(response.read_bool().unwrap());
        assert_eq!(Value::read_from(&mut response).unwrap(), Value::Int(0));
    }

    #[test]
    fn test_chain_runs_against_previous_result() {
        let step = Arc::new(Step::default());
        let listener = RpcPacketListener::new(registry(Arc::clone(&step)));

        let mut response = listener
            .process(&channel(), chain(&[("Step", "next"), ("Step", "count")], true))
            .unwrap()
            .freeze();

        // count ran on the fresh Step returned by next, not on the bound one
        assert!(response.read_bool().unwrap());
        assert_eq!(Value::read_from(&mut response).unwrap(), Value::Int(0));
        assert_eq!(step.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_chain_stops_at_failed_hop() {
        let step = Arc::new(Step::default());
        let listener = RpcPacketListener::new(registry(Arc::clone(&step)));

        let response = listener
            .process(
                &channel(),
                chain(&[("Step", "next"), ("Step", "fail"), ("Step", "next")], true),
            )
            .unwrap();

        let error = read_failure(response);
        assert_eq!(error.error_type, "Refused");
        // Only the first hop invoked next on the bound instance
        assert_eq!(step.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_class_fails() {
        let listener = RpcPacketListener::new(Arc::new(RpcHandlerRegistry::new()));
        let mut request = DataBufMut::new();
        request.write_bool(false);
        write_hop(&mut request, "Ghost", "boo", true);

        let error = read_failure(listener.process(&channel(), request.freeze()).unwrap());

        assert_eq!(error.error_type, "HandlerNotFoundError");
    }

    #[test]
    fn test_one_way_request_is_silent() {
        let step = Arc::new(Step::default());
        let listener = RpcPacketListener::new(registry(Arc::clone(&step)));

        let response = listener.process(&channel(), chain(&[("Step", "next"), ("Step", "next")], false));

        assert!(response.is_none());
        assert_eq!(step.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invalid_chain_length_is_rejected() {
        let listener = RpcPacketListener::new(Arc::new(RpcHandlerRegistry::new()));
        for count in [0, -3, RpcConfig::MAX_CHAIN_LENGTH as i32 + 1] {
            let mut request = DataBufMut::new();
            request.write_bool(true).write_int(count);

            let error = read_failure(listener.process(&channel(), request.freeze()).unwrap());
            assert_eq!(error.error_type, "InvalidRequestError");
        }
    }

    #[test]
    fn test_truncated_request_is_rejected() {
        let listener = RpcPacketListener::new(Arc::new(RpcHandlerRegistry::new()));
        let mut request = DataBufMut::new();
        request.write_bool(false).write_string("Step");

        let error = read_failure(listener.process(&channel(), request.freeze()).unwrap());

        assert_eq!(error.error_type, "InvalidRequestError");
    }
}
