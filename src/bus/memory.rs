//! In-process bus transport
//!
//! A [`MemoryBus`] plays the role of a message broker. Every
//! [`MemoryBusDriver`] created from the same hub sees the messages of the
//! others, which makes it possible to run several cache instances in one
//! process. Drivers can simulate a dropped connection: while disconnected
//! they can neither publish nor receive.

use crate::bus::driver::{BusDriver, RawMessageHandler, TransportCallback};
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, trace};

#[derive(Clone)]
struct Subscriber {
    driver_id: u64,
    connected: Arc<AtomicBool>,
    handler: RawMessageHandler,
}

#[derive(Default)]
struct Hub {
    channels: RwLock<HashMap<String, Vec<Subscriber>>>,
    next_driver_id: AtomicU64,
}

/// Shared in-memory message broker
#[derive(Clone, Default)]
pub struct MemoryBus {
    hub: Arc<Hub>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new connected driver attached to this hub
    pub fn driver(&self) -> MemoryBusDriver {
        let id = self.hub.next_driver_id.fetch_add(1, Ordering::Relaxed);
        MemoryBusDriver {
            id,
            bus: self.clone(),
            connected: Arc::new(AtomicBool::new(true)),
            reconnect_callbacks: RwLock::new(Vec::new()),
            disconnect_callbacks: RwLock::new(Vec::new()),
        }
    }

    /// Number of drivers subscribed to `channel`
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.hub
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel)
            .map_or(0, Vec::len)
    }

    fn subscribers(&self, channel: &str) -> Vec<Subscriber> {
        self.hub
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel)
            .cloned()
            .unwrap_or_default()
    }

    fn add(&self, channel: &str, subscriber: Subscriber) {
        let mut channels = self.hub.channels.write().unwrap_or_else(PoisonError::into_inner);
        let subscribers = channels.entry(channel.to_string()).or_default();
        subscribers.retain(|s| s.driver_id != subscriber.driver_id);
        subscribers.push(subscriber);
    }

    fn remove(&self, channel: Option<&str>, driver_id: u64) {
        let mut channels = self.hub.channels.write().unwrap_or_else(PoisonError::into_inner);
        match channel {
            Some(channel) => {
                if let Some(subscribers) = channels.get_mut(channel) {
                    subscribers.retain(|s| s.driver_id != driver_id);
                }
            }
            None => {
                for subscribers in channels.values_mut() {
                    subscribers.retain(|s| s.driver_id != driver_id);
                }
            }
        }
        channels.retain(|_, subscribers| !subscribers.is_empty());
    }
}

/// [`BusDriver`] attached to a [`MemoryBus`]
///
/// Publishing delivers to every connected subscriber of the channel,
/// the publisher included, and waits for their handlers to finish.
pub struct MemoryBusDriver {
    id: u64,
    bus: MemoryBus,
    connected: Arc<AtomicBool>,
    reconnect_callbacks: RwLock<Vec<TransportCallback>>,
    disconnect_callbacks: RwLock<Vec<TransportCallback>>,
}

impl MemoryBusDriver {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Drop the connection, as a broker outage would
    pub async fn simulate_disconnect(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }

        info!("Memory bus driver {} disconnected", self.id);
        for callback in Self::snapshot(&self.disconnect_callbacks) {
            callback().await;
        }
    }

    /// Restore the connection and run reconnect callbacks
    pub async fn simulate_reconnect(&self) {
        if self.connected.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Memory bus driver {} reconnected", self.id);
        for callback in Self::snapshot(&self.reconnect_callbacks) {
            callback().await;
        }
    }

    fn snapshot(callbacks: &RwLock<Vec<TransportCallback>>) -> Vec<TransportCallback> {
        callbacks.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(CacheError::BusTransportError(format!(
                "memory bus driver {} is disconnected",
                self.id
            )))
        }
    }
}

#[async_trait]
impl BusDriver for MemoryBusDriver {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
        self.ensure_connected()?;

        let subscribers = self.bus.subscribers(channel);
        trace!(channel, receivers = subscribers.len(), "publishing on memory bus");

        for subscriber in subscribers {
            if subscriber.connected.load(Ordering::SeqCst) {
                (subscriber.handler)(payload.clone()).await;
            }
        }

        Ok(())
    }

    async fn subscribe(&self, channel: &str, handler: RawMessageHandler) -> Result<()> {
        self.ensure_connected()?;

        debug!("Memory bus driver {} subscribing to {}", self.id, channel);
        self.bus.add(
            channel,
            Subscriber {
                driver_id: self.id,
                connected: self.connected.clone(),
                handler,
            },
        );
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.bus.remove(Some(channel), self.id);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.bus.remove(None, self.id);
        debug!("Memory bus driver {} closed", self.id);
        Ok(())
    }

    fn on_reconnect(&self, callback: TransportCallback) {
        self.reconnect_callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }

    fn on_disconnect(&self, callback: TransportCallback) {
        self.disconnect_callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use tokio::sync::Mutex;

    fn recorder() -> (RawMessageHandler, Arc<Mutex<Vec<Vec<u8>>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let handler: RawMessageHandler = Arc::new(move |payload| {
            let sink = sink.clone();
            async move { sink.lock().await.push(payload) }.boxed()
        });
        (handler, received)
    }

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let bus = MemoryBus::new();
        let a = bus.driver();
        let b = bus.driver();

        let (handler_a, received_a) = recorder();
        let (handler_b, received_b) = recorder();
        a.subscribe("chan", handler_a).await.unwrap();
        b.subscribe("chan", handler_b).await.unwrap();

        a.publish("chan", b"hello".to_vec()).await.unwrap();

        assert_eq!(received_a.lock().await.len(), 1);
        assert_eq!(received_b.lock().await.as_slice(), &[b"hello".to_vec()]);
        assert_eq!(bus.subscriber_count("chan"), 2);
    }

    #[tokio::test]
    async fn test_resubscribe_replaces_handler() {
        let bus = MemoryBus::new();
        let a = bus.driver();

        let (first, received_first) = recorder();
        let (second, received_second) = recorder();
        a.subscribe("chan", first).await.unwrap();
        a.subscribe("chan", second).await.unwrap();

        a.publish("chan", b"x".to_vec()).await.unwrap();

        assert!(received_first.lock().await.is_empty());
        assert_eq!(received_second.lock().await.len(), 1);
        assert_eq!(bus.subscriber_count("chan"), 1);
    }

    #[tokio::test]
    async fn test_disconnected_driver_neither_sends_nor_receives() {
        let bus = MemoryBus::new();
        let a = bus.driver();
        let b = bus.driver();

        let (handler_b, received_b) = recorder();
        b.subscribe("chan", handler_b).await.unwrap();

        b.simulate_disconnect().await;
        a.publish("chan", b"missed".to_vec()).await.unwrap();
        assert!(received_b.lock().await.is_empty());
        assert!(matches!(
            b.publish("chan", b"x".to_vec()).await,
            Err(CacheError::BusTransportError(_))
        ));

        b.simulate_reconnect().await;
        a.publish("chan", b"delivered".to_vec()).await.unwrap();
        assert_eq!(received_b.lock().await.as_slice(), &[b"delivered".to_vec()]);
    }

    #[tokio::test]
    async fn test_transport_callbacks() {
        let bus = MemoryBus::new();
        let driver = bus.driver();
        let events = Arc::new(Mutex::new(Vec::new()));

        let sink = events.clone();
        driver.on_disconnect(Arc::new(move || {
            let sink = sink.clone();
            async move { sink.lock().await.push("down") }.boxed()
        }));
        let sink = events.clone();
        driver.on_reconnect(Arc::new(move || {
            let sink = sink.clone();
            async move { sink.lock().await.push("up") }.boxed()
        }));

        driver.simulate_disconnect().await;
        driver.simulate_disconnect().await;
        driver.simulate_reconnect().await;

        assert_eq!(events.lock().await.as_slice(), &["down", "up"]);
    }

    #[tokio::test]
    async fn test_disconnect_removes_subscriptions() {
        let bus = MemoryBus::new();
        let driver = bus.driver();
        let (handler, _) = recorder();

        driver.subscribe("a", handler.clone()).await.unwrap();
        driver.subscribe("b", handler).await.unwrap();
        driver.unsubscribe("a").await.unwrap();
        assert_eq!(bus.subscriber_count("a"), 0);

        driver.disconnect().await.unwrap();
        assert_eq!(bus.subscriber_count("b"), 0);
        assert!(!driver.is_connected());
    }
}
