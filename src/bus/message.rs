//! Invalidation messages exchanged between cache instances

use crate::cache::types::CacheKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What happened to the keys of a [`CacheBusMessage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBusMessageType {
    /// The keys were written with a new value
    Set,
    /// The keys were removed
    Delete,
}

impl fmt::Display for CacheBusMessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheBusMessageType::Set => write!(f, "set"),
            CacheBusMessageType::Delete => write!(f, "delete"),
        }
    }
}

/// Notification that some keys changed on another instance
///
/// Receivers only ever drop their local copies, so `Set` and `Delete` are
/// handled the same way. Handling is idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheBusMessage {
    /// Identifier of the publishing bus, used to ignore our own messages
    pub bus_id: String,

    /// Affected keys
    pub keys: Vec<CacheKey>,

    #[serde(rename = "type")]
    pub message_type: CacheBusMessageType,
}

impl CacheBusMessage {
    pub fn new(bus_id: impl Into<String>, message_type: CacheBusMessageType, keys: Vec<CacheKey>) -> Self {
        Self {
            bus_id: bus_id.into(),
            keys,
            message_type,
        }
    }
}
