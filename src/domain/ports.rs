//! Domain Ports (Port/Adapter Pattern)
//!
//! Abstractions over everything the cache talks to but does not own.
//! Infrastructure adapters implement these traits.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Cache Core                              │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │  ContentSource │ NetworkMonitor │ PlaybackHints     │    │
//! │  │  EventPublisher                                      │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Adapters (Impls)                    │    │
//! │  │  FileContentSource │ HttpContentSource │ Router     │    │
//! │  │  SharedNetworkMonitor │ PlaylistHints │ Publishers  │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::events::CacheEvent;
use crate::cache::entry::ByteRange;
use crate::error::Result;

// =============================================================================
// Value Objects
// =============================================================================

/// Live network and device-storage signals
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetworkConditions {
    /// Measured downstream throughput (bits per second)
    pub throughput_bps: u64,
    /// Free bytes on the device volume holding the cache
    pub available_storage_bytes: u64,
}

impl NetworkConditions {
    pub fn new(throughput_bps: u64, available_storage_bytes: u64) -> Self {
        Self {
            throughput_bps,
            available_storage_bytes,
        }
    }

    /// Throughput in megabits per second
    pub fn throughput_mbps(&self) -> f64 {
        self.throughput_bps as f64 / 1_000_000.0
    }
}

// =============================================================================
// Port Traits
// =============================================================================

/// Origin of media bytes (the player's data source)
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Total content length, if the origin can tell cheaply
    async fn content_length(&self, locator: &str) -> Result<Option<u64>>;

    /// Fetch a byte range; may return fewer bytes at end of content
    async fn fetch_range(&self, locator: &str, range: ByteRange) -> Result<Bytes>;
}

/// Source of network/storage signals fed by platform receivers
pub trait NetworkMonitor: Send + Sync {
    /// Current conditions
    fn conditions(&self) -> NetworkConditions;
}

/// What the player expects to need next (playlist, autoplay queue)
#[async_trait]
pub trait PlaybackHints: Send + Sync {
    /// Up to `limit` locators expected after `current`
    async fn upcoming(&self, current: &str, limit: usize) -> Vec<String>;
}

/// Port for publishing cache events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an event.
    async fn publish(&self, event: CacheEvent) -> Result<()>;

    /// Publish multiple events.
    async fn publish_all(&self, events: Vec<CacheEvent>) -> Result<()>;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conditions_mbps() {
        let conditions = NetworkConditions::new(6_000_000, 2 * 1024 * 1024 * 1024);
        assert_eq!(conditions.throughput_mbps(), 6.0);
    }
}
