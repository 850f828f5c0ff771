//! Cache Events
//!
//! Immutable records of things that happened inside the cache, observed by
//! the UI layer and by logs.
//!
//! # Example
//!
//! ```ignore
//! let event = CacheEvent::prefetching_toggled(true);
//! event_publisher.publish(event).await?;
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Event emitted by the cache orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CacheEvent {
    /// The cache finished initializing.
    Initialized {
        cache_dir: String,
        max_size_bytes: u64,
        entries: u64,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Content Events
    // =========================================================================
    /// Content (or part of it) was written to the cache.
    ContentCached {
        key: String,
        locator: String,
        strategy: String,
        priority: String,
        cached_size: u64,
        compression_ratio: f64,
        prefetch: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Cached content was served.
    ContentRetrieved {
        key: String,
        locator: String,
        size_bytes: u64,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Maintenance Events
    // =========================================================================
    /// Intelligent prefetching was switched on or off.
    PrefetchingToggled {
        enabled: bool,
        timestamp: DateTime<Utc>,
    },

    /// An optimization pass completed.
    StorageOptimized {
        forced: bool,
        entries_removed: u64,
        space_freed: u64,
        timestamp: DateTime<Utc>,
    },

    /// Entries were cleared on request.
    CacheCleared {
        entries_removed: u64,
        space_freed: u64,
        timestamp: DateTime<Utc>,
    },

    /// A backup snapshot was imported.
    DataImported {
        entries_applied: u64,
        entries_skipped: u64,
        timestamp: DateTime<Utc>,
    },

    /// An operation failed.
    Error {
        operation: String,
        message: String,
        locator: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl CacheEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            CacheEvent::Initialized { timestamp, .. }
            | CacheEvent::ContentCached { timestamp, .. }
            | CacheEvent::ContentRetrieved { timestamp, .. }
            | CacheEvent::PrefetchingToggled { timestamp, .. }
            | CacheEvent::StorageOptimized { timestamp, .. }
            | CacheEvent::CacheCleared { timestamp, .. }
            | CacheEvent::DataImported { timestamp, .. }
            | CacheEvent::Error { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type as a string.
    pub fn event_type(&self) -> &'static str {
        match self {
            CacheEvent::Initialized { .. } => "Initialized",
            CacheEvent::ContentCached { .. } => "ContentCached",
            CacheEvent::ContentRetrieved { .. } => "ContentRetrieved",
            CacheEvent::PrefetchingToggled { .. } => "PrefetchingToggled",
            CacheEvent::StorageOptimized { .. } => "StorageOptimized",
            CacheEvent::CacheCleared { .. } => "CacheCleared",
            CacheEvent::DataImported { .. } => "DataImported",
            CacheEvent::Error { .. } => "Error",
        }
    }

    /// Get the cache key this event refers to, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            CacheEvent::ContentCached { key, .. } | CacheEvent::ContentRetrieved { key, .. } => {
                Some(key)
            }
            _ => None,
        }
    }
}

// =============================================================================
// Event Builders
// =============================================================================

impl CacheEvent {
    pub fn initialized(cache_dir: impl Into<String>, max_size_bytes: u64, entries: u64) -> Self {
        CacheEvent::Initialized {
            cache_dir: cache_dir.into(),
            max_size_bytes,
            entries,
            timestamp: Utc::now(),
        }
    }

    /// Create a ContentCached event.
    #[allow(clippy::too_many_arguments)]
    pub fn content_cached(
        key: impl Into<String>,
        locator: impl Into<String>,
        strategy: impl Into<String>,
        priority: impl Into<String>,
        cached_size: u64,
        compression_ratio: f64,
        prefetch: bool,
        duration: Duration,
    ) -> Self {
        CacheEvent::ContentCached {
            key: key.into(),
            locator: locator.into(),
            strategy: strategy.into(),
            priority: priority.into(),
            cached_size,
            compression_ratio,
            prefetch,
            duration_ms: duration.as_millis() as u64,
            timestamp: Utc::now(),
        }
    }

    pub fn content_retrieved(key: impl Into<String>, locator: impl Into<String>, size_bytes: u64) -> Self {
        CacheEvent::ContentRetrieved {
            key: key.into(),
            locator: locator.into(),
            size_bytes,
            timestamp: Utc::now(),
        }
    }

    pub fn prefetching_toggled(enabled: bool) -> Self {
        CacheEvent::PrefetchingToggled {
            enabled,
            timestamp: Utc::now(),
        }
    }

    pub fn storage_optimized(forced: bool, entries_removed: u64, space_freed: u64) -> Self {
        CacheEvent::StorageOptimized {
            forced,
            entries_removed,
            space_freed,
            timestamp: Utc::now(),
        }
    }

    pub fn cache_cleared(entries_removed: u64, space_freed: u64) -> Self {
        CacheEvent::CacheCleared {
            entries_removed,
            space_freed,
            timestamp: Utc::now(),
        }
    }

    pub fn data_imported(entries_applied: u64, entries_skipped: u64) -> Self {
        CacheEvent::DataImported {
            entries_applied,
            entries_skipped,
            timestamp: Utc::now(),
        }
    }

    /// Create an Error event.
    pub fn error(operation: impl Into<String>, message: impl Into<String>, locator: Option<&str>) -> Self {
        CacheEvent::Error {
            operation: operation.into(),
            message: message.into(),
            locator: locator.map(str::to_string),
            timestamp: Utc::now(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = CacheEvent::content_cached(
            "abc123",
            "https://cdn/movie.mp4",
            "Aggressive",
            "normal",
            4096,
            0.5,
            false,
            Duration::from_millis(12),
        );

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"ContentCached""#));
        assert!(json.contains("movie.mp4"));

        let deserialized: CacheEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.event_type(), "ContentCached");
        assert_eq!(deserialized.key(), Some("abc123"));
    }

    #[test]
    fn test_event_type() {
        assert_eq!(CacheEvent::prefetching_toggled(true).event_type(), "PrefetchingToggled");
        assert_eq!(CacheEvent::cache_cleared(2, 300).event_type(), "CacheCleared");
        assert_eq!(
            CacheEvent::error("cache_content", "boom", Some("a.mp4")).event_type(),
            "Error"
        );
    }

    #[test]
    fn test_key_extraction() {
        assert_eq!(CacheEvent::content_retrieved("k", "a.mp4", 10).key(), Some("k"));
        assert_eq!(CacheEvent::storage_optimized(true, 1, 10).key(), None);
    }

    #[test]
    fn test_timestamp_is_recent() {
        let before = Utc::now();
        let event = CacheEvent::data_imported(3, 1);
        assert!(event.timestamp() >= before);
    }
}
