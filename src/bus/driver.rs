//! Transport contract for the invalidation bus

use crate::error::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Receives raw payloads published on a channel
pub type RawMessageHandler = Arc<dyn Fn(Vec<u8>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Invoked when the transport loses or regains its connection
pub type TransportCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Pub/sub transport carrying encoded bus messages
///
/// Delivery is best-effort and at-least-once. Drivers report failures as
/// [`CacheError::BusTransportError`](crate::error::CacheError::BusTransportError).
#[async_trait]
pub trait BusDriver: Send + Sync {
    /// Publish a payload to every subscriber of `channel`
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()>;

    /// Register the handler for `channel`, replacing any previous one
    async fn subscribe(&self, channel: &str, handler: RawMessageHandler) -> Result<()>;

    async fn unsubscribe(&self, channel: &str) -> Result<()>;

    /// Close the transport
    async fn disconnect(&self) -> Result<()>;

    /// Register a callback run after the transport reconnects
    fn on_reconnect(&self, callback: TransportCallback);

    /// Register a callback run when the transport drops
    fn on_disconnect(&self, callback: TransportCallback);
}
