// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Registration of service exports on the bus.

use std::sync::Arc;

use thiserror::Error;

use conduit_bus::{Bus, BusError};

use crate::fault;
use crate::handler::{ProxyHandler, RegistrationOptions, ServiceExport};
use crate::interceptor::{InterceptorChain, InterceptorHolder, OrderViolation};

/// Default idle timeout for non-top-level registrations, in seconds.
pub const DEFAULT_CONNECTION_TIMEOUT: i64 = 5 * 60;

#[derive(Error, Debug)]
pub enum BindError {
    #[error("no address configured")]
    MissingAddress,

    #[error("service `{service}` declares `{action}` but no handler is registered for it")]
    MissingHandler { service: String, action: String },

    #[error("handler registered for `{action}`, which service `{service}` does not declare")]
    UnknownHandler { service: String, action: String },

    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Builder binding a [`ServiceExport`] to a bus address.
///
/// State survives `register` calls, so one binder can register several
/// services with the same policy.
pub struct ServiceBinder {
    bus: Arc<dyn Bus>,
    address: Option<String>,
    top_level: bool,
    timeout_seconds: i64,
    include_debug_info: bool,
    interceptors: InterceptorChain,
}

impl ServiceBinder {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self {
            bus,
            address: None,
            top_level: true,
            timeout_seconds: DEFAULT_CONNECTION_TIMEOUT,
            include_debug_info: false,
            interceptors: InterceptorChain::new(),
        }
    }

    /// Address for subsequent registrations.
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Whether subsequent registrations are top level (default true).
    /// Only non-top-level registrations are subject to the idle timeout.
    pub fn top_level(mut self, top_level: bool) -> Self {
        self.top_level = top_level;
        self
    }

    /// Idle timeout in seconds for non-top-level registrations; -1
    /// disables the check (default 300).
    pub fn timeout_seconds(mut self, timeout_seconds: i64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    /// Attach a debug payload to unclassified failures (default false).
    pub fn include_debug_info(mut self, include_debug_info: bool) -> Self {
        self.include_debug_info = include_debug_info;
        self
    }

    /// Append an interceptor. Priorities must be non-decreasing over the
    /// sequence of additions.
    pub fn add_interceptor(mut self, holder: InterceptorHolder) -> Result<Self, OrderViolation> {
        self.interceptors.add(holder)?;
        Ok(self)
    }

    /// Register the export and start serving its address.
    pub fn register(&self, export: ServiceExport) -> Result<RegistrationHandle, BindError> {
        let address = self
            .address
            .clone()
            .ok_or(BindError::MissingAddress)?;
        let (description, methods) = export.into_parts();

        for method in description.methods() {
            if !methods.contains_key(method.action()) {
                return Err(BindError::MissingHandler {
                    service: description.name().to_string(),
                    action: method.action().to_string(),
                });
            }
        }
        for action in methods.keys() {
            if description.method(action).is_none() {
                return Err(BindError::UnknownHandler {
                    service: description.name().to_string(),
                    action: action.clone(),
                });
            }
        }

        fault::register_fault_codec(self.bus.as_ref());

        let options = RegistrationOptions {
            top_level: self.top_level,
            timeout_seconds: self.timeout_seconds,
            include_debug_info: self.include_debug_info,
        };
        let handler = Arc::new(ProxyHandler::new(
            Arc::clone(&self.bus),
            address.clone(),
            description,
            methods,
            self.interceptors.clone(),
            &options,
        ));

        self.bus.register_handler(&address, handler.clone())?;
        handler.start_idle_timer(&options);

        tracing::info!(%address, top_level = options.top_level, "service registered");
        Ok(RegistrationHandle { handler })
    }
}

/// Handle to a live registration. Closing is terminal: the idle timer (if
/// any) is cancelled and the address is released; in-flight invocations
/// complete but their replies are no longer guaranteed to be observed.
pub struct RegistrationHandle {
    handler: Arc<ProxyHandler>,
}

impl RegistrationHandle {
    pub fn address(&self) -> &str {
        self.handler.address()
    }

    pub fn close(&self) {
        self.handler.close();
    }
}
