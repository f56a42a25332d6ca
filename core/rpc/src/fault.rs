// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! The fault model: the only structured error placed on the wire.

use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use conduit_bus::{Bus, BusError, MessageCodec};

use crate::codec::DecodeError;

/// Generic/unclassified failure, including delivery failures.
pub const GENERIC_FAILURE_CODE: i32 = -1;

/// Dispatch-layer failure: malformed or unroutable request.
pub const DISPATCH_FAILURE_CODE: i32 = 500;

/// A remote failure carried in a failure reply body as
/// `{code, message, debugInfo?}`.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("service failure (code {code}): {message}")]
pub struct Fault {
    pub code: i32,
    pub message: String,
    #[serde(
        rename = "debugInfo",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub debug_info: Option<Value>,
}

impl Fault {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            debug_info: None,
        }
    }

    /// A fault with the generic failure code.
    pub fn generic(message: impl Into<String>) -> Self {
        Self::new(GENERIC_FAILURE_CODE, message)
    }

    pub fn with_debug_info(mut self, debug_info: Value) -> Self {
        self.debug_info = Some(debug_info);
        self
    }

    /// The structured-value encoding used in failure reply bodies.
    pub fn to_value(&self) -> Value {
        let mut object = serde_json::Map::new();
        object.insert("code".into(), Value::from(self.code));
        object.insert("message".into(), Value::String(self.message.clone()));
        if let Some(info) = &self.debug_info {
            object.insert("debugInfo".into(), info.clone());
        }
        Value::Object(object)
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

impl From<BusError> for Fault {
    fn from(err: BusError) -> Self {
        if let BusError::Recipient {
            body: Some(body), ..
        } = &err
        {
            if let Some(fault) = Fault::from_value(body) {
                return fault;
            }
        }
        Fault::generic(err.to_string())
    }
}

/// Failure of a service method, as seen by the dispatcher.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// An application fault, replied to the caller verbatim.
    #[error(transparent)]
    Fault(#[from] Fault),

    /// The request body did not match the contract. Replied as a
    /// dispatch-layer fault and reported to the failure observer.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Any other implementation failure. Replied with the generic code; a
    /// debug payload is attached only when the registration enables it.
    #[error("{0}")]
    Internal(Box<dyn std::error::Error + Send + Sync>),
}

impl ServiceError {
    pub fn internal(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        ServiceError::Internal(err.into())
    }

    /// Shorthand for failing with an application fault.
    pub fn fail(code: i32, message: impl Into<String>) -> Self {
        Fault::new(code, message).into()
    }
}

/// Debug payload for an unclassified failure: the error message plus its
/// source chain.
pub fn debug_info_for(error: &(dyn std::error::Error + 'static)) -> Value {
    let mut chain = Vec::new();
    let mut source = error.source();
    while let Some(cause) = source {
        chain.push(Value::String(cause.to_string()));
        source = cause.source();
    }
    let mut object = serde_json::Map::new();
    object.insert("error".into(), Value::String(error.to_string()));
    object.insert("chain".into(), Value::Array(chain));
    Value::Object(object)
}

/// Wire codec for faults: big-endian i32 code, a presence flag plus
/// length-prefixed UTF-8 message, a presence flag plus length-prefixed
/// JSON debug payload.
pub struct FaultCodec;

pub const FAULT_CODEC_NAME: &str = "fault";

impl MessageCodec for FaultCodec {
    fn name(&self) -> &'static str {
        FAULT_CODEC_NAME
    }

    fn encode(&self, body: &Value) -> Result<Bytes, BusError> {
        let fault = Fault::from_value(body)
            .ok_or_else(|| BusError::Codec("body is not a fault".to_string()))?;

        let mut buf = BytesMut::new();
        buf.put_i32(fault.code);

        buf.put_u8(1);
        let message = fault.message.as_bytes();
        buf.put_u32(message.len() as u32);
        buf.put_slice(message);

        match &fault.debug_info {
            Some(info) => {
                let encoded =
                    serde_json::to_vec(info).map_err(|e| BusError::Codec(e.to_string()))?;
                buf.put_u8(1);
                buf.put_u32(encoded.len() as u32);
                buf.put_slice(&encoded);
            }
            None => buf.put_u8(0),
        }

        Ok(buf.freeze())
    }

    fn decode(&self, wire: &[u8]) -> Result<Value, BusError> {
        let mut buf = wire;
        let truncated = || BusError::Codec("truncated fault".to_string());

        if buf.remaining() < 5 {
            return Err(truncated());
        }
        let code = buf.get_i32();

        let message = if buf.get_u8() == 1 {
            if buf.remaining() < 4 {
                return Err(truncated());
            }
            let len = buf.get_u32() as usize;
            if buf.remaining() < len {
                return Err(truncated());
            }
            let raw = buf.copy_to_bytes(len);
            String::from_utf8(raw.to_vec())
                .map_err(|e| BusError::Codec(e.to_string()))?
        } else {
            String::new()
        };

        let mut fault = Fault::new(code, message);

        if buf.remaining() >= 1 && buf.get_u8() == 1 {
            if buf.remaining() < 4 {
                return Err(truncated());
            }
            let len = buf.get_u32() as usize;
            if buf.remaining() < len {
                return Err(truncated());
            }
            let raw = buf.copy_to_bytes(len);
            let info = serde_json::from_slice(&raw).map_err(|e| BusError::Codec(e.to_string()))?;
            fault = fault.with_debug_info(info);
        }

        Ok(fault.to_value())
    }
}

/// Process-wide, idempotent registration of the fault codec on a bus.
/// Returns `false` when the codec was already registered.
pub fn register_fault_codec(bus: &dyn Bus) -> bool {
    bus.codecs().register(Arc::new(FaultCodec))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_round_trip() {
        let fault = Fault::new(42, "boom");
        assert_eq!(Fault::from_value(&fault.to_value()), Some(fault));
    }

    #[test]
    fn test_value_round_trip_with_debug_info() {
        let fault = Fault::new(7, "bad").with_debug_info(json!({"error": "inner"}));
        assert_eq!(Fault::from_value(&fault.to_value()), Some(fault));
    }

    #[test]
    fn test_wire_round_trip() {
        let codec = FaultCodec;
        let fault = Fault::new(42, "boom");
        let wire = codec.encode(&fault.to_value()).unwrap();
        assert_eq!(codec.decode(&wire).unwrap(), fault.to_value());
    }

    #[test]
    fn test_wire_round_trip_with_debug_info() {
        let codec = FaultCodec;
        let fault =
            Fault::new(-1, "oops").with_debug_info(json!({"error": "x", "chain": ["y"]}));
        let wire = codec.encode(&fault.to_value()).unwrap();
        assert_eq!(codec.decode(&wire).unwrap(), fault.to_value());
    }

    #[test]
    fn test_decode_truncated() {
        let codec = FaultCodec;
        assert!(codec.decode(&[0, 0]).is_err());
    }

    #[test]
    fn test_non_fault_recipient_body_maps_to_generic() {
        let err = BusError::Recipient {
            address: "a".into(),
            body: Some(json!("not a fault")),
        };
        let fault = Fault::from(err);
        assert_eq!(fault.code, GENERIC_FAILURE_CODE);
    }

    #[test]
    fn test_debug_info_chain() {
        let io = std::io::Error::other("root cause");
        let info = debug_info_for(&io);
        assert_eq!(info["error"], json!("root cause"));
    }
}
