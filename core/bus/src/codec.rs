// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Named wire codecs for message bodies.
//!
//! An in-process bus hands structured bodies over directly, but the wire
//! representation still matters: a networked transport serializes every
//! body through the codec named in the message, and codecs such as the
//! fault codec in `conduit-rpc` define a fixed cross-process layout.
//! Registration is process-wide and idempotent.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use serde_json::Value;

use crate::errors::BusError;

/// Transforms a structured body to and from its wire representation.
pub trait MessageCodec: Send + Sync {
    /// Registry name, unique per process.
    fn name(&self) -> &'static str;

    fn encode(&self, body: &Value) -> Result<Bytes, BusError>;

    fn decode(&self, wire: &[u8]) -> Result<Value, BusError>;
}

/// Process-wide codec registry. A `json` codec is installed by default.
pub struct CodecRegistry {
    codecs: RwLock<HashMap<&'static str, Arc<dyn MessageCodec>>>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        let registry = Self {
            codecs: RwLock::new(HashMap::new()),
        };
        registry.register(Arc::new(JsonCodec));
        registry
    }

    /// Register a codec. Returns `false` when a codec with the same name
    /// is already present; re-registration is tolerated, never fatal.
    pub fn register(&self, codec: Arc<dyn MessageCodec>) -> bool {
        let mut codecs = self.codecs.write();
        if codecs.contains_key(codec.name()) {
            tracing::debug!(name = codec.name(), "codec already registered");
            return false;
        }
        codecs.insert(codec.name(), codec);
        true
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn MessageCodec>> {
        self.codecs.read().get(name).cloned()
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Default codec: bodies as UTF-8 JSON.
struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, body: &Value) -> Result<Bytes, BusError> {
        serde_json::to_vec(body)
            .map(Bytes::from)
            .map_err(|e| BusError::Codec(e.to_string()))
    }

    fn decode(&self, wire: &[u8]) -> Result<Value, BusError> {
        serde_json::from_slice(wire).map_err(|e| BusError::Codec(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_codec_round_trip() {
        let registry = CodecRegistry::new();
        let codec = registry.get("json").unwrap();

        let body = json!({"a": 1, "b": ["x", "y"]});
        let wire = codec.encode(&body).unwrap();
        assert_eq!(codec.decode(&wire).unwrap(), body);
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = CodecRegistry::new();
        assert!(!registry.register(Arc::new(JsonCodec)));
        assert!(registry.get("json").is_some());
    }
}
