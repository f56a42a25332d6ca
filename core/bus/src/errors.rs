// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use serde_json::Value;
use thiserror::Error;

/// Errors surfaced to a sender.
///
/// `Recipient` is the only variant originating from the handler side of a
/// request (a failure reply with an application-defined body); every other
/// variant is a delivery failure of the bus itself.
#[derive(Error, Debug)]
pub enum BusError {
    #[error("no handler registered at {0}")]
    NoHandler(String),

    #[error("a handler is already registered at {0}")]
    AddressInUse(String),

    #[error("no reply from {address} within {timeout_ms}ms")]
    Timeout { address: String, timeout_ms: u64 },

    #[error("handler at {0} dropped the delivery without replying")]
    ReplyDropped(String),

    #[error("recipient failure at {address}")]
    Recipient {
        address: String,
        body: Option<Value>,
    },

    #[error("codec error: {0}")]
    Codec(String),
}

impl BusError {
    /// True for the delivery-failure variants, false for recipient
    /// failures.
    pub fn is_delivery_failure(&self) -> bool {
        !matches!(self, BusError::Recipient { .. })
    }
}

/// Error escaping a [`crate::BusHandler`]. The bus logs it and forwards it
/// to the process-wide failure observer; it is never sent back to the
/// requester.
pub type HandlerFailure = Box<dyn std::error::Error + Send + Sync>;
