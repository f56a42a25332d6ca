// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use conduit_bus::Headers;

/// Attribute key under which the authentication interceptor stores the
/// caller's principal.
pub const PRINCIPAL_ATTRIBUTE: &str = "principal";

struct ContextInner {
    action: String,
    headers: Headers,
    attributes: Mutex<HashMap<String, Value>>,
}

/// Per-invocation context shared between the interceptor chain and the
/// invoked method. Cloning is cheap; all clones see the same attributes.
#[derive(Clone)]
pub struct InvocationContext {
    inner: Arc<ContextInner>,
}

impl InvocationContext {
    pub(crate) fn new(action: impl Into<String>, headers: Headers) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                action: action.into(),
                headers,
                attributes: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The action identifier of the current invocation.
    pub fn action(&self) -> &str {
        &self.inner.action
    }

    /// Headers of the request message.
    pub fn headers(&self) -> &Headers {
        &self.inner.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers.get(name).map(String::as_str)
    }

    /// Store an attribute for downstream interceptors and the method
    /// implementation.
    pub fn set_attribute(&self, name: impl Into<String>, value: Value) {
        self.inner.attributes.lock().insert(name.into(), value);
    }

    pub fn attribute(&self, name: &str) -> Option<Value> {
        self.inner.attributes.lock().get(name).cloned()
    }
}
