//! Cross-instance invalidation bus
//!
//! Every cache instance owns one [`InvalidationBus`] identified by a random
//! `bus_id`. Writes are announced to peers, who drop their local copies.
//! Messages carrying our own `bus_id` are ignored on receipt, so an instance
//! never invalidates the value it just wrote.
//!
//! Failed publishes are kept in a bounded retry queue, flushed when the
//! transport reconnects and before the next publish.

use crate::bus::driver::{BusDriver, RawMessageHandler};
use crate::bus::encoder::BusEncoder;
use crate::bus::message::{CacheBusMessage, CacheBusMessageType};
use crate::cache::types::CacheKey;
use crate::error::{CacheError, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Connection state of an [`InvalidationBus`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    Disconnected,
    Connecting,
    Connected,
}

impl BusState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => BusState::Connecting,
            2 => BusState::Connected,
            _ => BusState::Disconnected,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            BusState::Disconnected => 0,
            BusState::Connecting => 1,
            BusState::Connected => 2,
        }
    }
}

/// Retry queue settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusOptions {
    pub retry_queue_enabled: bool,
    pub retry_queue_max_size: usize,
}

impl Default for BusOptions {
    fn default() -> Self {
        Self {
            retry_queue_enabled: true,
            retry_queue_max_size: 1_000,
        }
    }
}

type ReconnectCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Publishes and receives [`CacheBusMessage`]s over a [`BusDriver`]
#[derive(Clone)]
pub struct InvalidationBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    bus_id: String,
    driver: Arc<dyn BusDriver>,
    encoder: Arc<dyn BusEncoder>,
    options: BusOptions,
    state: AtomicU8,
    closed: AtomicBool,

    /// channel -> decode-and-dispatch handler, kept for resubscription
    subscriptions: RwLock<HashMap<String, RawMessageHandler>>,

    /// (channel, encoded payload) awaiting a retry, oldest first
    retry_queue: Mutex<VecDeque<(String, Vec<u8>)>>,

    reconnect_callbacks: RwLock<Vec<ReconnectCallback>>,
}

impl InvalidationBus {
    /// Create a bus with a fresh random id
    pub fn new(driver: Arc<dyn BusDriver>, encoder: Arc<dyn BusEncoder>, options: BusOptions) -> Self {
        let inner = Arc::new(BusInner {
            bus_id: Uuid::new_v4().to_string(),
            driver,
            encoder,
            options,
            state: AtomicU8::new(BusState::Disconnected.as_u8()),
            closed: AtomicBool::new(false),
            subscriptions: RwLock::new(HashMap::new()),
            retry_queue: Mutex::new(VecDeque::new()),
            reconnect_callbacks: RwLock::new(Vec::new()),
        });

        let weak = Arc::downgrade(&inner);
        inner.driver.on_disconnect(Arc::new(move || {
            let weak: Weak<BusInner> = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_disconnect();
                }
            }
            .boxed()
        }));

        let weak = Arc::downgrade(&inner);
        inner.driver.on_reconnect(Arc::new(move || {
            let weak: Weak<BusInner> = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_reconnect().await;
                }
            }
            .boxed()
        }));

        debug!("Created invalidation bus {}", inner.bus_id);
        Self { inner }
    }

    /// Identifier stamped on every message this bus publishes
    pub fn bus_id(&self) -> &str {
        &self.inner.bus_id
    }

    pub fn state(&self) -> BusState {
        self.inner.state()
    }

    /// Number of messages waiting for a retry
    pub async fn pending_retries(&self) -> usize {
        self.inner.retry_queue.lock().await.len()
    }

    /// Announce that `keys` changed
    ///
    /// On failure the message is queued for a retry (when enabled) and the
    /// error is returned. Callers are free to ignore it.
    pub async fn publish(
        &self,
        channel: &str,
        message_type: CacheBusMessageType,
        keys: Vec<CacheKey>,
    ) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(CacheError::BusTransportError(format!(
                "bus {} is disconnected",
                self.inner.bus_id
            )));
        }

        let message = CacheBusMessage::new(self.inner.bus_id.clone(), message_type, keys);
        let payload = self.inner.encoder.encode(&message)?;

        if self.inner.flush_retry_queue().await.is_err() {
            self.inner.enqueue(channel, payload).await;
            return Err(CacheError::BusTransportError(
                "bus transport unavailable, message queued".to_string(),
            ));
        }

        trace!(channel, %message_type, keys = ?message.keys, "publishing bus message");
        match self.inner.driver.publish(channel, payload.clone()).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("Failed to publish {} message on {}: {}", message_type, channel, e);
                self.inner.enqueue(channel, payload).await;
                Err(transport_error(e))
            }
        }
    }

    /// Subscribe to peer messages on `channel`
    ///
    /// Messages published by this bus and undecodable payloads never reach
    /// `handler`.
    pub async fn subscribe<F, Fut>(&self, channel: &str, handler: F) -> Result<()>
    where
        F: Fn(CacheBusMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let encoder = self.inner.encoder.clone();
        let bus_id = self.inner.bus_id.clone();

        let raw: RawMessageHandler = Arc::new(move |payload: Vec<u8>| {
            let message = match encoder.decode(&payload) {
                Ok(message) => message,
                Err(e) => {
                    warn!("Dropping undecodable bus message: {}", e);
                    return futures::future::ready(()).boxed();
                }
            };

            if message.bus_id == bus_id {
                trace!(keys = ?message.keys, "ignoring own bus message");
                return futures::future::ready(()).boxed();
            }

            handler(message).boxed()
        });

        if self.inner.state() == BusState::Disconnected {
            self.inner.set_state(BusState::Connecting);
        }

        if let Err(e) = self.inner.driver.subscribe(channel, raw.clone()).await {
            warn!("Failed to subscribe to {}: {}", channel, e);
            return Err(transport_error(e));
        }

        self.inner
            .subscriptions
            .write()
            .await
            .insert(channel.to_string(), raw);
        self.inner.set_state(BusState::Connected);

        info!("Bus {} subscribed to {}", self.inner.bus_id, channel);
        Ok(())
    }

    /// Stop receiving messages on `channel`. Unknown channels are ignored.
    pub async fn unsubscribe(&self, channel: &str) -> Result<()> {
        if self.inner.subscriptions.write().await.remove(channel).is_none() {
            return Ok(());
        }

        self.inner
            .driver
            .unsubscribe(channel)
            .await
            .map_err(transport_error)
    }

    /// Register a callback run after the transport reconnects
    pub async fn on_reconnect<F, Fut>(&self, callback: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let callback: ReconnectCallback = Arc::new(move || callback().boxed());
        self.inner.reconnect_callbacks.write().await.push(callback);
    }

    /// Tear the bus down. Calling it again is a no-op.
    pub async fn disconnect(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.inner.subscriptions.write().await.clear();
        self.inner.set_state(BusState::Disconnected);

        let dropped = self.inner.retry_queue.lock().await.len();
        if dropped > 0 {
            warn!("Dropping {} unsent bus messages on disconnect", dropped);
        }

        info!("Disconnecting bus {}", self.inner.bus_id);
        self.inner.driver.disconnect().await.map_err(transport_error)
    }
}

impl BusInner {
    fn state(&self) -> BusState {
        BusState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: BusState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    fn handle_disconnect(&self) {
        if self.state() == BusState::Connected {
            warn!("Bus {} lost its transport, waiting for reconnect", self.bus_id);
            self.set_state(BusState::Connecting);
        }
    }

    async fn handle_reconnect(&self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        info!("Bus {} reconnected", self.bus_id);

        let subscriptions: Vec<(String, RawMessageHandler)> = self
            .subscriptions
            .read()
            .await
            .iter()
            .map(|(channel, handler)| (channel.clone(), handler.clone()))
            .collect();

        for (channel, handler) in subscriptions {
            if let Err(e) = self.driver.subscribe(&channel, handler).await {
                warn!("Failed to resubscribe to {}: {}", channel, e);
            }
        }
        self.set_state(BusState::Connected);

        if let Err(e) = self.flush_retry_queue().await {
            warn!("Retry queue flush after reconnect failed: {}", e);
        }

        let callbacks = self.reconnect_callbacks.read().await.clone();
        for callback in callbacks {
            callback().await;
        }
    }

    async fn enqueue(&self, channel: &str, payload: Vec<u8>) {
        if !self.options.retry_queue_enabled {
            return;
        }

        let mut queue = self.retry_queue.lock().await;
        if queue.len() >= self.options.retry_queue_max_size {
            warn!("Bus retry queue full, dropping oldest message");
            queue.pop_front();
        }
        queue.push_back((channel.to_string(), payload));
    }

    /// Publish queued messages in order, stopping at the first failure
    async fn flush_retry_queue(&self) -> Result<usize> {
        let mut queue = self.retry_queue.lock().await;
        let mut flushed = 0;

        while let Some((channel, payload)) = queue.pop_front() {
            if let Err(e) = self.driver.publish(&channel, payload.clone()).await {
                queue.push_front((channel, payload));
                return Err(transport_error(e));
            }
            flushed += 1;
        }

        if flushed > 0 {
            debug!("Flushed {} queued bus messages", flushed);
        }
        Ok(flushed)
    }
}

fn transport_error(error: CacheError) -> CacheError {
    match error {
        CacheError::BusTransportError(_) => error,
        other => CacheError::BusTransportError(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::encoder::JsonBusEncoder;
    use crate::bus::memory::{MemoryBus, MemoryBusDriver};
    use std::sync::atomic::AtomicUsize;

    const CHANNEL: &str = "test:bus";

    fn bus_pair() -> (InvalidationBus, Arc<MemoryBusDriver>, InvalidationBus, Arc<MemoryBusDriver>) {
        let hub = MemoryBus::new();
        let driver_a = Arc::new(hub.driver());
        let driver_b = Arc::new(hub.driver());
        let a = InvalidationBus::new(driver_a.clone(), Arc::new(JsonBusEncoder), BusOptions::default());
        let b = InvalidationBus::new(driver_b.clone(), Arc::new(JsonBusEncoder), BusOptions::default());
        (a, driver_a, b, driver_b)
    }

    async fn collect(bus: &InvalidationBus) -> Arc<Mutex<Vec<CacheBusMessage>>> {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        bus.subscribe(CHANNEL, move |message| {
            let sink = sink.clone();
            async move { sink.lock().await.push(message) }
        })
        .await
        .unwrap();
        received
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let (a, driver_a, _, _) = bus_pair();
        assert_eq!(a.state(), BusState::Disconnected);

        collect(&a).await;
        assert_eq!(a.state(), BusState::Connected);

        driver_a.simulate_disconnect().await;
        assert_eq!(a.state(), BusState::Connecting);

        driver_a.simulate_reconnect().await;
        assert_eq!(a.state(), BusState::Connected);

        a.disconnect().await.unwrap();
        a.disconnect().await.unwrap();
        assert_eq!(a.state(), BusState::Disconnected);
    }

    #[tokio::test]
    async fn test_own_messages_are_ignored() {
        let (a, _, b, _) = bus_pair();
        let received_a = collect(&a).await;
        let received_b = collect(&b).await;

        a.publish(CHANNEL, CacheBusMessageType::Set, vec!["k1".to_string()])
            .await
            .unwrap();

        assert!(received_a.lock().await.is_empty());

        let received_b = received_b.lock().await;
        assert_eq!(received_b.len(), 1);
        assert_eq!(received_b[0].bus_id, a.bus_id());
        assert_eq!(received_b[0].keys, vec!["k1".to_string()]);
        assert_eq!(received_b[0].message_type, CacheBusMessageType::Set);
    }

    #[tokio::test]
    async fn test_unique_bus_ids() {
        let (a, _, b, _) = bus_pair();
        assert_ne!(a.bus_id(), b.bus_id());
    }

    #[tokio::test]
    async fn test_failed_publish_is_retried_on_reconnect() {
        let (a, driver_a, b, _) = bus_pair();
        collect(&a).await;
        let received_b = collect(&b).await;

        driver_a.simulate_disconnect().await;
        let result = a
            .publish(CHANNEL, CacheBusMessageType::Delete, vec!["k1".to_string()])
            .await;
        assert!(matches!(result, Err(CacheError::BusTransportError(_))));
        assert_eq!(a.pending_retries().await, 1);
        assert!(received_b.lock().await.is_empty());

        driver_a.simulate_reconnect().await;
        assert_eq!(a.pending_retries().await, 0);
        assert_eq!(received_b.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_retry_queue_is_bounded() {
        let hub = MemoryBus::new();
        let driver = Arc::new(hub.driver());
        let bus = InvalidationBus::new(
            driver.clone(),
            Arc::new(JsonBusEncoder),
            BusOptions {
                retry_queue_enabled: true,
                retry_queue_max_size: 2,
            },
        );

        driver.simulate_disconnect().await;
        for key in ["a", "b", "c"] {
            let _ = bus
                .publish(CHANNEL, CacheBusMessageType::Set, vec![key.to_string()])
                .await;
        }
        assert_eq!(bus.pending_retries().await, 2);
    }

    #[tokio::test]
    async fn test_retry_queue_disabled() {
        let hub = MemoryBus::new();
        let driver = Arc::new(hub.driver());
        let bus = InvalidationBus::new(
            driver.clone(),
            Arc::new(JsonBusEncoder),
            BusOptions {
                retry_queue_enabled: false,
                retry_queue_max_size: 10,
            },
        );

        driver.simulate_disconnect().await;
        let _ = bus
            .publish(CHANNEL, CacheBusMessageType::Set, vec!["a".to_string()])
            .await;
        assert_eq!(bus.pending_retries().await, 0);
    }

    #[tokio::test]
    async fn test_reconnect_callbacks_run() {
        let (a, driver_a, _, _) = bus_pair();
        collect(&a).await;

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        a.on_reconnect(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;

        driver_a.simulate_disconnect().await;
        driver_a.simulate_reconnect().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_publish_after_disconnect_is_not_queued() {
        let (a, _, _, _) = bus_pair();
        collect(&a).await;
        a.disconnect().await.unwrap();

        for key in ["a", "b"] {
            let result = a
                .publish(CHANNEL, CacheBusMessageType::Set, vec![key.to_string()])
                .await;
            assert!(matches!(result, Err(CacheError::BusTransportError(_))));
        }
        assert_eq!(a.pending_retries().await, 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let (a, _, b, _) = bus_pair();
        collect(&a).await;
        let received_b = collect(&b).await;

        b.unsubscribe(CHANNEL).await.unwrap();
        b.unsubscribe(CHANNEL).await.unwrap();

        a.publish(CHANNEL, CacheBusMessageType::Set, vec!["k".to_string()])
            .await
            .unwrap();
        assert!(received_b.lock().await.is_empty());
    }
}
