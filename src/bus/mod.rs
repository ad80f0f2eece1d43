//! # Invalidation Bus
//!
//! Keeps the local tiers of several cache instances coherent. When an
//! instance writes or deletes keys it publishes a [`CacheBusMessage`]; every
//! other instance drops those keys from its local tier and picks up the new
//! value from the remote tier on its next read.
//!
//! The transport ([`BusDriver`]) and the wire format ([`BusEncoder`]) are
//! pluggable. [`MemoryBus`] connects instances living in the same process.

pub mod driver;
pub mod encoder;
pub mod invalidation;
pub mod memory;
pub mod message;

pub use driver::{BusDriver, RawMessageHandler, TransportCallback};
pub use encoder::{BusEncoder, JsonBusEncoder};
pub use invalidation::{BusOptions, BusState, InvalidationBus};
pub use memory::{MemoryBus, MemoryBusDriver};
pub use message::{CacheBusMessage, CacheBusMessageType};
