// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! The bus trait and its in-process implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::codec::CodecRegistry;
use crate::errors::{BusError, HandlerFailure};
use crate::message::{self, Delivery, Headers, Message};

/// Receives deliveries for a registered address.
///
/// A returned error means the handler could not produce an outcome for the
/// delivery; the bus logs it and forwards it to the failure observer.
/// Handlers reply through [`Delivery`] before returning.
#[async_trait]
pub trait BusHandler: Send + Sync {
    async fn handle(&self, delivery: Delivery) -> Result<(), HandlerFailure>;
}

/// Observer invoked with failures escaping registered handlers.
pub type FailureObserver = Arc<dyn Fn(&str, &HandlerFailure) + Send + Sync>;

/// Minimal contract the service-proxy layer needs from a transport:
/// request/reply and fire-and-forget sends, handler registration, and the
/// wire codec registry.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Send a message and await the reply.
    async fn request(
        &self,
        address: &str,
        headers: Headers,
        body: Option<Value>,
        timeout: Duration,
    ) -> Result<Message, BusError>;

    /// Send a message without expecting a reply. Fails only when delivery
    /// is impossible (no handler at the address).
    async fn send(
        &self,
        address: &str,
        headers: Headers,
        body: Option<Value>,
    ) -> Result<(), BusError>;

    /// Register a handler. At most one handler per address.
    fn register_handler(
        &self,
        address: &str,
        handler: Arc<dyn BusHandler>,
    ) -> Result<(), BusError>;

    /// Remove the handler at `address`. Deliveries already queued are
    /// still processed; new sends fail with [`BusError::NoHandler`].
    fn unregister_handler(&self, address: &str);

    fn codecs(&self) -> &CodecRegistry;

    /// Install the process-wide observer for failures escaping handlers.
    fn set_failure_observer(&self, observer: FailureObserver);
}

struct Endpoint {
    tx: mpsc::UnboundedSender<Delivery>,
}

struct LocalBusInner {
    endpoints: RwLock<HashMap<String, Endpoint>>,
    codecs: CodecRegistry,
    observer: RwLock<Option<FailureObserver>>,
}

/// In-process bus.
///
/// Each registered address gets its own delivery task: deliveries to the
/// same address run strictly one at a time to completion, while distinct
/// addresses proceed concurrently. The registration table is the only
/// shared state.
#[derive(Clone)]
pub struct LocalBus {
    inner: Arc<LocalBusInner>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LocalBusInner {
                endpoints: RwLock::new(HashMap::new()),
                codecs: CodecRegistry::new(),
                observer: RwLock::new(None),
            }),
        }
    }

    fn deliver(
        &self,
        address: &str,
        message: Message,
        reply_tx: Option<oneshot::Sender<message::Reply>>,
    ) -> Result<(), BusError> {
        let endpoints = self.inner.endpoints.read();
        let endpoint = endpoints
            .get(address)
            .ok_or_else(|| BusError::NoHandler(address.to_string()))?;

        let delivery = Delivery::new(address.to_string(), message, reply_tx);
        endpoint
            .tx
            .send(delivery)
            .map_err(|_| BusError::NoHandler(address.to_string()))
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Bus for LocalBus {
    async fn request(
        &self,
        address: &str,
        headers: Headers,
        body: Option<Value>,
        timeout: Duration,
    ) -> Result<Message, BusError> {
        let (tx, rx) = oneshot::channel();
        self.deliver(address, Message::new(headers, body), Some(tx))?;
        message::await_reply(rx, address, timeout).await
    }

    async fn send(
        &self,
        address: &str,
        headers: Headers,
        body: Option<Value>,
    ) -> Result<(), BusError> {
        self.deliver(address, Message::new(headers, body), None)
    }

    fn register_handler(
        &self,
        address: &str,
        handler: Arc<dyn BusHandler>,
    ) -> Result<(), BusError> {
        let mut endpoints = self.inner.endpoints.write();
        if endpoints.contains_key(address) {
            return Err(BusError::AddressInUse(address.to_string()));
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
        endpoints.insert(address.to_string(), Endpoint { tx });

        let inner = Arc::clone(&self.inner);
        let address = address.to_string();
        tokio::spawn(async move {
            // One delivery at a time per address. The task ends when the
            // endpoint is unregistered and the queue drains.
            while let Some(delivery) = rx.recv().await {
                if let Err(failure) = handler.handle(delivery).await {
                    tracing::error!(%address, error = %failure, "handler failure");
                    if let Some(observer) = inner.observer.read().clone() {
                        observer(&address, &failure);
                    }
                }
            }
            tracing::debug!(%address, "delivery task finished");
        });

        Ok(())
    }

    fn unregister_handler(&self, address: &str) {
        if self.inner.endpoints.write().remove(address).is_some() {
            tracing::debug!(%address, "handler unregistered");
        }
    }

    fn codecs(&self) -> &CodecRegistry {
        &self.inner.codecs
    }

    fn set_failure_observer(&self, observer: FailureObserver) {
        *self.inner.observer.write() = Some(observer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoHandler;

    #[async_trait]
    impl BusHandler for EchoHandler {
        async fn handle(&self, delivery: Delivery) -> Result<(), HandlerFailure> {
            let body = delivery.body().cloned().unwrap_or(Value::Null);
            delivery.reply(Message::body(body));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_request_reply() {
        let bus = LocalBus::new();
        bus.register_handler("echo", Arc::new(EchoHandler)).unwrap();

        let reply = bus
            .request(
                "echo",
                Headers::new(),
                Some(json!({"x": 1})),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(reply.body, Some(json!({"x": 1})));
    }

    #[tokio::test]
    async fn test_request_unknown_address() {
        let bus = LocalBus::new();
        let err = bus
            .request("nobody", Headers::new(), None, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::NoHandler(_)));
        assert!(err.is_delivery_failure());
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let bus = LocalBus::new();
        bus.register_handler("a", Arc::new(EchoHandler)).unwrap();
        let err = bus.register_handler("a", Arc::new(EchoHandler)).unwrap_err();
        assert!(matches!(err, BusError::AddressInUse(_)));
    }

    #[tokio::test]
    async fn test_unregister_stops_delivery() {
        let bus = LocalBus::new();
        bus.register_handler("a", Arc::new(EchoHandler)).unwrap();
        bus.unregister_handler("a");
        let err = bus
            .request("a", Headers::new(), None, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::NoHandler(_)));
    }

    struct FailingHandler;

    #[async_trait]
    impl BusHandler for FailingHandler {
        async fn handle(&self, delivery: Delivery) -> Result<(), HandlerFailure> {
            delivery.fail(json!({"code": 42, "message": "boom"}));
            Err("boom".into())
        }
    }

    #[tokio::test]
    async fn test_failure_reply_and_observer() {
        let bus = LocalBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        bus.set_failure_observer(Arc::new(move |_, _| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        }));
        bus.register_handler("fail", Arc::new(FailingHandler))
            .unwrap();

        let err = bus
            .request("fail", Headers::new(), None, Duration::from_secs(1))
            .await
            .unwrap_err();
        match err {
            BusError::Recipient { body, .. } => {
                assert_eq!(body, Some(json!({"code": 42, "message": "boom"})));
            }
            other => panic!("unexpected error: {other}"),
        }

        // The handler failure reaches the observer asynchronously.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    /// Deliveries to one address never interleave.
    struct SerialProbe {
        active: AtomicUsize,
        overlapped: AtomicUsize,
    }

    #[async_trait]
    impl BusHandler for SerialProbe {
        async fn handle(&self, delivery: Delivery) -> Result<(), HandlerFailure> {
            if self.active.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlapped.fetch_add(1, Ordering::SeqCst);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            delivery.reply(Message::empty());
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_same_address_is_serial() {
        let bus = LocalBus::new();
        let probe = Arc::new(SerialProbe {
            active: AtomicUsize::new(0),
            overlapped: AtomicUsize::new(0),
        });
        bus.register_handler("serial", probe.clone()).unwrap();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let bus = bus.clone();
            tasks.push(tokio::spawn(async move {
                bus.request("serial", Headers::new(), None, Duration::from_secs(5))
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(probe.overlapped.load(Ordering::SeqCst), 0);
    }
}
