//! mediacache - Adaptive On-Device Media Cache
//!
//! Caches media content on local storage so playback survives poor or absent
//! connectivity. Each request picks a caching strategy from current network
//! throughput and free storage, stores whole items or leading segments,
//! compresses where it pays off, and prefetches what is likely to play next.
//!
//! # Architecture
//!
//! ```text
//! Player/UI → CacheOrchestrator → Planner → ContentSource → Compression → BlobStore
//!                    ▲                                                      │
//!                    └──── health monitor / auto-optimizer / prefetch ◄─────┘
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - Content sources, network signals, playlists, event sinks, Prometheus
//! - [`cache`] - Keying, storage, compression, strategies, optimizer, analytics, orchestrator
//! - [`domain`] - Ports and cache events
//! - [`error`] - Error types

pub mod adapters;
pub mod cache;
pub mod domain;
pub mod error;

// Re-export commonly used types
pub use cache::{
    CacheConfig, CacheOrchestrator, CacheResult, CacheStrategy, CachedContent, ClearOptions,
    LifecycleState, Priority,
};
pub use domain::{CacheEvent, ContentSource, NetworkConditions, NetworkMonitor};
pub use error::{Error, Result};
