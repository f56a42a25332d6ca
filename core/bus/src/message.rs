// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Message and delivery types.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::errors::BusError;

/// String key/value headers attached to every message.
pub type Headers = HashMap<String, String>;

/// A message as it travels on the bus: headers plus an optional structured
/// body.
#[derive(Debug, Clone, Default)]
pub struct Message {
    pub headers: Headers,
    pub body: Option<Value>,
}

impl Message {
    pub fn new(headers: Headers, body: Option<Value>) -> Self {
        Self { headers, body }
    }

    /// A reply with a body and no headers.
    pub fn body(body: Value) -> Self {
        Self {
            headers: Headers::new(),
            body: Some(body),
        }
    }

    /// A reply with neither headers nor body.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Reply payload produced by a handler.
#[derive(Debug)]
pub(crate) enum Reply {
    Ok(Message),
    Failure { body: Option<Value> },
}

/// A message delivered to a handler, together with its one-shot reply
/// capability.
///
/// Fire-and-forget deliveries carry no reply slot; replying to them is a
/// no-op. Replying more than once is also a no-op.
pub struct Delivery {
    address: String,
    message: Message,
    reply_tx: Mutex<Option<oneshot::Sender<Reply>>>,
}

impl Delivery {
    pub(crate) fn new(
        address: String,
        message: Message,
        reply_tx: Option<oneshot::Sender<Reply>>,
    ) -> Self {
        Self {
            address,
            message,
            reply_tx: Mutex::new(reply_tx),
        }
    }

    /// The address this message was sent to.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.message.header(name)
    }

    pub fn body(&self) -> Option<&Value> {
        self.message.body.as_ref()
    }

    /// Whether the sender is waiting for a reply.
    pub fn expects_reply(&self) -> bool {
        self.reply_tx.lock().is_some()
    }

    /// Send a successful reply.
    pub fn reply(&self, message: Message) {
        self.send_reply(Reply::Ok(message));
    }

    /// Send a failure reply carrying a structured failure body. The sender
    /// observes it as [`BusError::Recipient`].
    pub fn fail(&self, body: Value) {
        self.send_reply(Reply::Failure { body: Some(body) });
    }

    fn send_reply(&self, reply: Reply) {
        match self.reply_tx.lock().take() {
            Some(tx) => {
                // The requester may have timed out and gone away.
                let _ = tx.send(reply);
            }
            None => {
                tracing::trace!(address = %self.address, "reply discarded, no requester");
            }
        }
    }
}

pub(crate) async fn await_reply(
    rx: oneshot::Receiver<Reply>,
    address: &str,
    timeout: std::time::Duration,
) -> Result<Message, BusError> {
    let reply = tokio::time::timeout(timeout, rx)
        .await
        .map_err(|_| BusError::Timeout {
            address: address.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        })?
        .map_err(|_| BusError::ReplyDropped(address.to_string()))?;

    match reply {
        Reply::Ok(message) => Ok(message),
        Reply::Failure { body } => Err(BusError::Recipient {
            address: address.to_string(),
            body,
        }),
    }
}
