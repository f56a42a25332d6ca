// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Service proxies over the conduit message bus.
//!
//! A service contract is described declaratively as a [`ServiceDescription`]
//! and validated up front. From the same description this crate derives both
//! sides of a remote call: a [`ServiceProxy`] that encodes invocations as
//! action-routed messages, and a dispatcher (registered through
//! [`ServiceBinder`]) that routes inbound messages to typed handler
//! closures, runs the interceptor chain, and encodes results or faults
//! back. Faults are the only structured error that travels on the wire.

pub mod auth;
pub mod binder;
pub mod codec;
pub mod context;
pub mod contract;
pub mod fault;
pub mod handler;
pub mod interceptor;
pub mod proxy;

pub use binder::{BindError, RegistrationHandle, ServiceBinder, DEFAULT_CONNECTION_TIMEOUT};
pub use codec::{Arguments, DecodeError};
pub use context::{InvocationContext, PRINCIPAL_ATTRIBUTE};
pub use contract::{
    CallKind, ContractViolation, MethodDescription, ParamDescription, ReturnShape,
    ServiceDescription, TypeShape,
};
pub use fault::{Fault, ServiceError, DISPATCH_FAILURE_CODE, GENERIC_FAILURE_CODE};
pub use handler::{Outcome, ReturnValue, ServiceExport};
pub use interceptor::{InterceptorChain, InterceptorHolder, OrderViolation, Priority, ServiceInterceptor};
pub use proxy::{DeliveryOptions, ProxyBuilder, ServiceProxy, DEFAULT_DELIVERY_TIMEOUT};

/// Header routing an inbound message to a method. Mandatory on requests.
pub const ACTION_HEADER: &str = "action";

/// Reply header carrying the address of a freshly registered nested
/// dispatcher, used instead of a body for service-valued results.
pub const PROXY_ADDR_HEADER: &str = "proxyaddr";
