// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Client-side proxies.
//!
//! A [`ServiceProxy`] implements a described contract over the bus: each
//! invocation encodes its positional arguments into a structured body
//! under the described parameter names, routes by `action` header, and
//! decodes the reply per the method's return-shape classifier. Every
//! failure surfaces as a [`Fault`]; delivery failures use the generic
//! code.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;

use conduit_bus::{Bus, Headers};

use crate::auth::AUTH_TOKEN_HEADER;
use crate::codec;
use crate::contract::{CallKind, MethodDescription, ReturnShape, ServiceDescription};
use crate::fault::{self, Fault};
use crate::ACTION_HEADER;

/// Default reply timeout for proxy calls.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-proxy delivery configuration.
#[derive(Clone)]
pub struct DeliveryOptions {
    timeout: Duration,
    headers: Headers,
    surface_notify_failures: bool,
}

impl DeliveryOptions {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_DELIVERY_TIMEOUT,
            headers: Headers::new(),
            surface_notify_failures: false,
        }
    }

    /// Reply timeout for request/reply calls.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Header added to every outgoing call.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Surface delivery failures of fire-and-forget calls to the caller
    /// (default: swallow them).
    pub fn surface_notify_failures(mut self, surface: bool) -> Self {
        self.surface_notify_failures = surface;
        self
    }
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`ServiceProxy`] instances bound to one address.
pub struct ProxyBuilder {
    bus: Arc<dyn Bus>,
    address: String,
    options: DeliveryOptions,
}

impl ProxyBuilder {
    pub fn new(bus: Arc<dyn Bus>, address: impl Into<String>) -> Self {
        Self {
            bus,
            address: address.into(),
            options: DeliveryOptions::new(),
        }
    }

    pub fn options(mut self, options: DeliveryOptions) -> Self {
        self.options = options;
        self
    }

    /// Credential sent with every call in the `auth-token` header.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.options.headers.insert(AUTH_TOKEN_HEADER.to_string(), token.into());
        self
    }

    pub fn build(self, description: Arc<ServiceDescription>) -> ServiceProxy {
        ServiceProxy::new(self.bus, self.address, description, self.options)
    }
}

struct ProxyInner {
    bus: Arc<dyn Bus>,
    address: String,
    description: Arc<ServiceDescription>,
    options: DeliveryOptions,
    closed: AtomicBool,
}

/// Client stub for a described service, bound to one bus address.
#[derive(Clone)]
pub struct ServiceProxy {
    inner: Arc<ProxyInner>,
}

impl ServiceProxy {
    pub(crate) fn new(
        bus: Arc<dyn Bus>,
        address: String,
        description: Arc<ServiceDescription>,
        options: DeliveryOptions,
    ) -> Self {
        fault::register_fault_codec(bus.as_ref());
        Self {
            inner: Arc::new(ProxyInner {
                bus,
                address,
                description,
                options,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn address(&self) -> &str {
        &self.inner.address
    }

    pub fn description(&self) -> &Arc<ServiceDescription> {
        &self.inner.description
    }

    /// Invoke a request/reply method and decode its result.
    pub async fn request<R: DeserializeOwned>(
        &self,
        action: &str,
        args: Vec<Value>,
    ) -> Result<R, Fault> {
        self.ensure_open()?;
        let method = self.method(action)?;
        if method.kind() != CallKind::RequestReply {
            return Err(Fault::generic(format!(
                "action `{action}` is fire-and-forget, use notify"
            )));
        }
        if matches!(method.returns(), ReturnShape::Service(_)) {
            return Err(Fault::generic(format!(
                "action `{action}` returns a service reference, use request_proxy"
            )));
        }

        let reply = self.send_request(method, args).await?;
        codec::check_reply_shape(method.returns(), reply.body.as_ref())
            .map_err(|e| Fault::generic(e.to_string()))?;
        codec::from_value(reply.body.unwrap_or(Value::Null))
            .map_err(|e| Fault::generic(e.to_string()))
    }

    /// Invoke a method whose result is a nested service reference and
    /// materialize a proxy for it from the `proxyaddr` reply header.
    pub async fn request_proxy(
        &self,
        action: &str,
        args: Vec<Value>,
    ) -> Result<ServiceProxy, Fault> {
        self.ensure_open()?;
        let method = self.method(action)?;
        let ReturnShape::Service(nested) = method.returns() else {
            return Err(Fault::generic(format!(
                "action `{action}` does not return a service reference"
            )));
        };

        let reply = self.send_request(method, args).await?;
        let address = reply
            .header(crate::PROXY_ADDR_HEADER)
            .ok_or_else(|| Fault::generic("reply carries no proxyaddr header"))?;

        tracing::debug!(%action, nested_address = %address, "binding nested proxy");
        Ok(ServiceProxy::new(
            Arc::clone(&self.inner.bus),
            address.to_string(),
            Arc::clone(nested),
            self.inner.options.clone(),
        ))
    }

    /// Invoke a fire-and-forget method. Delivery failures never reach the
    /// caller unless the options say otherwise.
    pub async fn notify(&self, action: &str, args: Vec<Value>) -> Result<(), Fault> {
        self.ensure_open()?;
        let method = self.method(action)?;
        if method.kind() != CallKind::FireAndForget {
            return Err(Fault::generic(format!(
                "action `{action}` expects a reply, use request"
            )));
        }

        let body = self.encode_body(method, args)?;
        match self
            .inner
            .bus
            .send(&self.inner.address, self.request_headers(action), body)
            .await
        {
            Ok(()) => Ok(()),
            Err(err) if self.inner.options.surface_notify_failures => Err(Fault::from(err)),
            Err(err) => {
                tracing::debug!(%action, error = %err, "notification not delivered");
                Ok(())
            }
        }
    }

    /// Invoke the close-designated method (if any) and mark this proxy
    /// closed. Further calls fail locally.
    pub async fn close(&self) -> Result<(), Fault> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Err(Fault::generic("Proxy is closed"));
        }
        let Some(method) = self.inner.description.close_method() else {
            return Ok(());
        };

        let headers = self.request_headers(method.action());
        let body = Some(Value::Object(serde_json::Map::new()));
        match method.kind() {
            CallKind::FireAndForget => {
                if let Err(err) = self.inner.bus.send(&self.inner.address, headers, body).await {
                    tracing::debug!(error = %err, "close notification not delivered");
                }
                Ok(())
            }
            CallKind::RequestReply => {
                self.inner
                    .bus
                    .request(&self.inner.address, headers, body, self.inner.options.timeout)
                    .await
                    .map_err(Fault::from)?;
                Ok(())
            }
        }
    }

    async fn send_request(
        &self,
        method: &MethodDescription,
        args: Vec<Value>,
    ) -> Result<conduit_bus::Message, Fault> {
        let body = self.encode_body(method, args)?;
        self.inner
            .bus
            .request(
                &self.inner.address,
                self.request_headers(method.action()),
                body,
                self.inner.options.timeout,
            )
            .await
            .map_err(Fault::from)
    }

    fn method(&self, action: &str) -> Result<&MethodDescription, Fault> {
        self.inner.description.method(action).ok_or_else(|| {
            Fault::generic(format!(
                "unknown action `{action}` on service `{}`",
                self.inner.description.name()
            ))
        })
    }

    /// Zip positional arguments with the described parameter names into
    /// the request body.
    fn encode_body(
        &self,
        method: &MethodDescription,
        args: Vec<Value>,
    ) -> Result<Option<Value>, Fault> {
        let params = method.params();
        if args.len() != params.len() {
            return Err(Fault::generic(format!(
                "action `{}` takes {} arguments, got {}",
                method.action(),
                params.len(),
                args.len()
            )));
        }

        let mut body = serde_json::Map::new();
        for (param, value) in params.iter().zip(args) {
            body.insert(param.name().to_string(), value);
        }
        Ok(Some(Value::Object(body)))
    }

    fn request_headers(&self, action: &str) -> Headers {
        let mut headers = self.inner.options.headers.clone();
        headers.insert(ACTION_HEADER.to_string(), action.to_string());
        headers
    }

    fn ensure_open(&self) -> Result<(), Fault> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Fault::generic("Proxy is closed"));
        }
        Ok(())
    }
}
