// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Server-side dispatch: typed method tables and the proxy handler.
//!
//! A [`ServiceExport`] pairs a validated contract with one handler closure
//! per action, in the same way a generated server stub would. The
//! [`ProxyHandler`] registered on the bus routes each inbound message by
//! its `action` header, runs the interceptor chain, invokes the closure,
//! and encodes the outcome as a reply or a fault.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use conduit_bus::{Bus, BusHandler, Delivery, HandlerFailure, Headers, Message};

use crate::binder::ServiceBinder;
use crate::codec::{self, Arguments, DecodeError};
use crate::context::InvocationContext;
use crate::contract::ServiceDescription;
use crate::fault::{self, Fault, ServiceError, DISPATCH_FAILURE_CODE, GENERIC_FAILURE_CODE};
use crate::interceptor::InterceptorChain;
use crate::{ACTION_HEADER, PROXY_ADDR_HEADER};

/// Result of a method invocation, classified the way replies are encoded.
pub enum ReturnValue {
    /// No result; the reply carries no body.
    Unit,
    /// A structured result carried as the reply body.
    Value(Value),
    /// A connection-scoped service; the dispatcher registers it under a
    /// fresh address and replies with a `proxyaddr` header.
    Service(ServiceExport),
}

/// What an invocation produced, before and after the interceptor
/// after-phase.
pub type Outcome = Result<ReturnValue, ServiceError>;

type MethodFuture = Pin<Box<dyn Future<Output = Outcome> + Send>>;
type MethodFn = Arc<dyn Fn(Arguments, InvocationContext) -> MethodFuture + Send + Sync>;

/// A service implementation: a validated contract plus one handler per
/// declared action.
pub struct ServiceExport {
    description: Arc<ServiceDescription>,
    methods: HashMap<String, MethodFn>,
}

impl ServiceExport {
    pub fn new(description: Arc<ServiceDescription>) -> Self {
        Self {
            description,
            methods: HashMap::new(),
        }
    }

    pub fn description(&self) -> &Arc<ServiceDescription> {
        &self.description
    }

    /// Register a handler whose result becomes the reply body.
    pub fn handler<F, Fut, R>(mut self, action: &str, f: F) -> Self
    where
        F: Fn(Arguments, InvocationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ServiceError>> + Send + 'static,
        R: Serialize + Send + 'static,
    {
        let f = Arc::new(f);
        let wrapper: MethodFn = Arc::new(move |args, ctx| {
            let f = Arc::clone(&f);
            Box::pin(async move {
                let result = f(args, ctx).await?;
                let value = codec::to_value(&result)?;
                Ok(ReturnValue::Value(value))
            }) as MethodFuture
        });
        self.methods.insert(action.to_string(), wrapper);
        self
    }

    /// Register a handler for a void method (including fire-and-forget and
    /// close operations).
    pub fn unit_handler<F, Fut>(mut self, action: &str, f: F) -> Self
    where
        F: Fn(Arguments, InvocationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ServiceError>> + Send + 'static,
    {
        let f = Arc::new(f);
        let wrapper: MethodFn = Arc::new(move |args, ctx| {
            let f = Arc::clone(&f);
            Box::pin(async move {
                f(args, ctx).await?;
                Ok(ReturnValue::Unit)
            }) as MethodFuture
        });
        self.methods.insert(action.to_string(), wrapper);
        self
    }

    /// Register a handler producing a nested service export.
    pub fn service_handler<F, Fut>(mut self, action: &str, f: F) -> Self
    where
        F: Fn(Arguments, InvocationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ServiceExport, ServiceError>> + Send + 'static,
    {
        let f = Arc::new(f);
        let wrapper: MethodFn = Arc::new(move |args, ctx| {
            let f = Arc::clone(&f);
            Box::pin(async move {
                let export = f(args, ctx).await?;
                Ok(ReturnValue::Service(export))
            }) as MethodFuture
        });
        self.methods.insert(action.to_string(), wrapper);
        self
    }

    pub(crate) fn into_parts(self) -> (Arc<ServiceDescription>, HashMap<String, MethodFn>) {
        (self.description, self.methods)
    }
}

pub(crate) struct RegistrationOptions {
    pub top_level: bool,
    pub timeout_seconds: i64,
    pub include_debug_info: bool,
}

/// Dispatcher for one registered service address.
///
/// Lifecycle: active from registration until closed, either explicitly,
/// through the close-designated action, or by idle timeout (non-top-level
/// registrations only). Closing cancels the idle timer, removes the bus
/// registration and is terminal; in-flight invocations run to completion.
pub struct ProxyHandler {
    bus: Arc<dyn Bus>,
    address: String,
    description: Arc<ServiceDescription>,
    methods: HashMap<String, MethodFn>,
    interceptors: InterceptorChain,
    timeout_seconds: i64,
    include_debug_info: bool,
    last_accessed: Mutex<Instant>,
    closed: AtomicBool,
    timer: CancellationToken,
}

impl ProxyHandler {
    pub(crate) fn new(
        bus: Arc<dyn Bus>,
        address: String,
        description: Arc<ServiceDescription>,
        methods: HashMap<String, MethodFn>,
        interceptors: InterceptorChain,
        options: &RegistrationOptions,
    ) -> Self {
        Self {
            bus,
            address,
            description,
            methods,
            interceptors,
            timeout_seconds: options.timeout_seconds,
            include_debug_info: options.include_debug_info,
            last_accessed: Mutex::new(Instant::now()),
            closed: AtomicBool::new(false),
            timer: CancellationToken::new(),
        }
    }

    pub(crate) fn address(&self) -> &str {
        &self.address
    }

    /// Periodic idle check for non-top-level registrations.
    pub(crate) fn start_idle_timer(self: &Arc<Self>, options: &RegistrationOptions) {
        if options.top_level || options.timeout_seconds < 0 {
            return;
        }

        let period_ms = (options.timeout_seconds as u64 * 1000 / 2).clamp(1, 10_000);
        let handler = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(period_ms));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = handler.timer.cancelled() => break,
                    _ = ticker.tick() => handler.check_timed_out().await,
                }
            }
        });
    }

    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.timer.cancel();
        self.bus.unregister_handler(&self.address);
        tracing::debug!(
            address = %self.address,
            service = %self.description.name(),
            "service registration closed"
        );
    }

    fn touch(&self) {
        *self.last_accessed.lock() = Instant::now();
    }

    async fn check_timed_out(&self) {
        let idle = self.last_accessed.lock().elapsed();
        if idle > Duration::from_secs(self.timeout_seconds.max(0) as u64) {
            tracing::debug!(
                address = %self.address,
                idle_secs = idle.as_secs(),
                "idle timeout reached"
            );
            self.invoke_close_method().await;
            self.close();
        }
    }

    /// Invoke the close-designated method, if the contract declares one
    /// and a handler is registered for it.
    async fn invoke_close_method(&self) {
        let Some(method) = self.description.close_method() else {
            return;
        };
        if let Some(func) = self.methods.get(method.action()) {
            let ctx = InvocationContext::new(method.action(), Headers::new());
            if let Err(err) = func(Arguments::empty(), ctx).await {
                tracing::warn!(
                    address = %self.address,
                    error = %err,
                    "close method failed during idle shutdown"
                );
            }
        }
    }

    fn reply_success(
        &self,
        delivery: &Delivery,
        value: ReturnValue,
    ) -> Result<(), HandlerFailure> {
        match value {
            ReturnValue::Unit => {
                delivery.reply(Message::empty());
                Ok(())
            }
            ReturnValue::Value(body) => {
                delivery.reply(Message::body(body));
                Ok(())
            }
            ReturnValue::Service(export) => {
                let address = Uuid::new_v4().to_string();
                let registration = ServiceBinder::new(Arc::clone(&self.bus))
                    .address(&address)
                    .top_level(false)
                    .timeout_seconds(self.timeout_seconds)
                    .include_debug_info(self.include_debug_info)
                    .register(export);
                match registration {
                    Ok(handle) => {
                        tracing::debug!(
                            parent = %self.address,
                            nested = %handle.address(),
                            "registered nested service"
                        );
                        delivery.reply(Message::empty().with_header(PROXY_ADDR_HEADER, address));
                        Ok(())
                    }
                    Err(err) => {
                        let fault = Fault::new(GENERIC_FAILURE_CODE, err.to_string());
                        delivery.fail(fault.to_value());
                        Err(Box::new(err))
                    }
                }
            }
        }
    }

    fn reply_failure(
        &self,
        delivery: &Delivery,
        error: ServiceError,
    ) -> Result<(), HandlerFailure> {
        match error {
            // The implementation's own answer: travels verbatim.
            ServiceError::Fault(fault) => {
                delivery.fail(fault.to_value());
                Ok(())
            }
            ServiceError::Decode(err) => {
                let fault = Fault::new(DISPATCH_FAILURE_CODE, err.to_string());
                delivery.fail(fault.to_value());
                Err(Box::new(err))
            }
            ServiceError::Internal(err) => {
                let mut fault = Fault::new(GENERIC_FAILURE_CODE, err.to_string());
                if self.include_debug_info {
                    fault = fault.with_debug_info(fault::debug_info_for(err.as_ref()));
                }
                delivery.fail(fault.to_value());
                Ok(())
            }
        }
    }
}

fn decode_arguments(body: Option<&Value>) -> Result<Arguments, DecodeError> {
    match body {
        None => Ok(Arguments::empty()),
        Some(Value::Object(map)) => Ok(Arguments::new(map.clone())),
        Some(other) => Err(DecodeError::Shape {
            expected: "object",
            found: codec::kind_of(other),
        }),
    }
}

#[async_trait]
impl BusHandler for ProxyHandler {
    async fn handle(&self, delivery: Delivery) -> Result<(), HandlerFailure> {
        if self.closed.load(Ordering::SeqCst) {
            let fault = Fault::generic("service closed");
            delivery.fail(fault.to_value());
            return Ok(());
        }

        let Some(action) = delivery.header(ACTION_HEADER).map(str::to_string) else {
            let fault = Fault::new(DISPATCH_FAILURE_CODE, "action not specified");
            delivery.fail(fault.to_value());
            return Err(Box::new(fault));
        };

        self.touch();

        let (Some(method), Some(func)) = (
            self.description.method(&action),
            self.methods.get(&action),
        ) else {
            let fault = Fault::new(DISPATCH_FAILURE_CODE, format!("Invalid action: {action}"));
            delivery.fail(fault.to_value());
            return Err(Box::new(fault));
        };

        tracing::debug!(address = %self.address, %action, "dispatching");

        let ctx = InvocationContext::new(&action, delivery.message().headers.clone());

        if let Err(fault) = self.interceptors.run_before(&ctx, delivery.message()).await {
            tracing::debug!(%action, code = fault.code, "call rejected by interceptor");
            delivery.fail(fault.to_value());
            return Ok(());
        }

        let args = match decode_arguments(delivery.body()) {
            Ok(args) => args,
            Err(err) => {
                let fault = Fault::new(DISPATCH_FAILURE_CODE, err.to_string());
                delivery.fail(fault.to_value());
                return Err(Box::new(err));
            }
        };

        let outcome = func(args, ctx.clone()).await;
        let outcome = self.interceptors.run_after(&ctx, outcome).await;

        let result = match outcome {
            Ok(value) => self.reply_success(&delivery, value),
            Err(error) => self.reply_failure(&delivery, error),
        };

        if method.is_close() {
            self.close();
        }

        result
    }
}
