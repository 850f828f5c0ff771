//! Error types for the media cache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the media cache
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP transport error while talking to a remote content source
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    /// Backing store could not be created; the cache is unusable until
    /// re-initialized
    #[error("Cache initialization failed: {0}")]
    Initialization(String),

    /// Operation invoked outside the Running/Degraded lifecycle states
    #[error("Cache is not initialized (state: {state})")]
    NotInitialized { state: String },

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Not enough headroom under the configured cache budget
    #[error("Insufficient cache space: need {required} bytes, {available} available")]
    InsufficientSpace { required: u64, available: u64 },

    /// A supposedly-cached entry could not be read back intact
    #[error("Corrupt cache entry {key}: {reason}")]
    CorruptEntry { key: String, reason: String },

    /// Storage or fetch operation exceeded its fail-fast budget
    #[error("Operation '{operation}' timed out after {duration}")]
    Timeout { operation: String, duration: String },

    // =========================================================================
    // Content Source Errors
    // =========================================================================
    /// Content source failed to serve a locator
    #[error("Content source error for {locator}: {reason}")]
    ContentSource { locator: String, reason: String },

    /// No content source accepts this locator
    #[error("Unsupported locator: {0}")]
    UnsupportedLocator(String),

    // =========================================================================
    // Data / Configuration Errors
    // =========================================================================
    /// Import payload failed validation
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Duration parse error
    #[error("Failed to parse duration: {0}")]
    DurationParse(String),

    // =========================================================================
    // Compression Errors
    // =========================================================================
    /// Compression failed
    #[error("Compression with {algorithm} failed: {reason}")]
    CompressionFailed { algorithm: String, reason: String },

    /// Decompression failed
    #[error("Decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a timeout error for a named operation
    pub fn timeout(operation: impl Into<String>, duration: std::time::Duration) -> Self {
        Error::Timeout {
            operation: operation.into(),
            duration: format!("{:?}", duration),
        }
    }

    /// Whether this error indicates a damaged entry rather than a failing medium
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::CorruptEntry { .. } | Error::DecompressionFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_timeout_message() {
        let err = Error::timeout("blob write", Duration::from_millis(250));
        assert_eq!(
            err.to_string(),
            "Operation 'blob write' timed out after 250ms"
        );
    }

    #[test]
    fn test_corruption_classification() {
        let corrupt = Error::CorruptEntry {
            key: "abc".into(),
            reason: "checksum mismatch".into(),
        };
        let decompress = Error::DecompressionFailed {
            algorithm: "lz4".into(),
            reason: "truncated".into(),
        };
        let io = Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk"));

        assert!(corrupt.is_corruption());
        assert!(decompress.is_corruption());
        assert!(!io.is_corruption());
    }
}
