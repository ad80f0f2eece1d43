//! Error types for cache operations
//!
//! This module defines the error taxonomy for the ouroboros-cache library.
//! Local failures propagate to the caller; remote and bus failures are
//! usually absorbed by the tiered cache and only logged.

use thiserror::Error;

/// Main error type for cache operations
///
/// Every variant carries owned strings so the type is `Clone`: a single
/// failed in-flight fetch is handed to every caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Backend I/O failure reported by a cache driver
    #[error("Driver error ({backend}): {message}")]
    DriverError { backend: String, message: String },

    /// The remote tier could not be reached (timeout, connection loss, driver error)
    #[error("Remote cache unavailable: {0}")]
    RemoteUnavailable(String),

    /// A stored item could not be deserialized
    #[error("Corrupt cache entry for key '{key}': {reason}")]
    CorruptEntry { key: String, reason: String },

    /// Publish or subscribe failure on the invalidation bus
    #[error("Bus transport error: {0}")]
    BusTransportError(String),

    /// Remote or loader fetch exceeded the configured bound
    #[error("Fetch timed out after {timeout_ms}ms: {key}")]
    FetchTimeout { key: String, timeout_ms: u64 },

    /// The shared in-flight fetch other callers were waiting on failed
    #[error("Shared fetch failed for key '{key}': {reason}")]
    StampedeFetchFailed { key: String, reason: String },

    /// The user-supplied loader returned an error
    #[error("Loader error: {0}")]
    LoaderError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

impl CacheError {
    /// Build a driver error for the given backend name
    pub fn driver(backend: impl Into<String>, message: impl Into<String>) -> Self {
        CacheError::DriverError {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Whether a stale value may be served in place of this failure
    pub fn allows_grace_fallback(&self) -> bool {
        matches!(
            self,
            CacheError::RemoteUnavailable(_)
                | CacheError::FetchTimeout { .. }
                | CacheError::LoaderError(_)
                | CacheError::StampedeFetchFailed { .. }
        )
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

impl From<String> for CacheError {
    fn from(s: String) -> Self {
        CacheError::Other(s)
    }
}

impl From<&str> for CacheError {
    fn from(s: &str) -> Self {
        CacheError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::SerializationError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = CacheError::driver("memory", "poisoned");
        assert_eq!(error.to_string(), "Driver error (memory): poisoned");

        let timeout_error = CacheError::FetchTimeout {
            key: "user:1".to_string(),
            timeout_ms: 250,
        };
        assert!(timeout_error.to_string().contains("timed out after 250ms"));

        let corrupt = CacheError::CorruptEntry {
            key: "user:1".to_string(),
            reason: "expected value".to_string(),
        };
        assert!(corrupt.to_string().contains("user:1"));
    }

    #[test]
    fn test_error_conversion() {
        let error: CacheError = "test error".into();
        assert!(matches!(error, CacheError::Other(_)));

        let error: CacheError = "test error".to_string().into();
        assert!(matches!(error, CacheError::Other(_)));

        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let error: CacheError = json_err.into();
        assert!(matches!(error, CacheError::SerializationError(_)));
    }

    #[test]
    fn test_grace_fallback_classification() {
        assert!(CacheError::RemoteUnavailable("down".into()).allows_grace_fallback());
        assert!(CacheError::LoaderError("boom".into()).allows_grace_fallback());
        assert!(!CacheError::driver("memory", "x").allows_grace_fallback());
        assert!(!CacheError::ConfigError("x".into()).allows_grace_fallback());
    }
}
