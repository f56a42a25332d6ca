// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Point-to-point asynchronous message bus.
//!
//! Addresses map to at most one registered handler. Senders either fire a
//! message at an address or request a reply from it; handlers receive
//! deliveries strictly one at a time per address. Higher layers (the
//! service-proxy dispatch in `conduit-rpc`) only rely on the [`Bus`] trait,
//! so the in-process [`LocalBus`] can be swapped for a networked transport.

pub mod bus;
pub mod codec;
pub mod errors;
pub mod message;

pub use bus::{Bus, BusHandler, FailureObserver, LocalBus};
pub use codec::{CodecRegistry, MessageCodec};
pub use errors::{BusError, HandlerFailure};
pub use message::{Delivery, Headers, Message};
