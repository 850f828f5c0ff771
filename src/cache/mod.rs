//! Adaptive Media Cache
//!
//! On-device cache for media content with per-request strategy selection,
//! LZ4 compression, intelligent prefetching and self-maintenance.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                          CacheOrchestrator                                │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  StrategyPlanner     │ CompressionManager  │ IntelligentPrefetcher       │
//! │  (network + storage  │ (LZ4, threshold +   │ (playback hints +           │
//! │   → segments)        │  strategy mandate)  │  learned transitions)       │
//! │         │            │          │          │            │                │
//! │         └────────────┴──────────┴──────────┴────────────┘                │
//! │                              │                                           │
//! │          BlobStore (index + LRU + byte budget) ◄── StorageOptimizer      │
//! │                              │                                           │
//! │                 BlobIo (disk: blobs/ + index.json)                       │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - Stored bytes never exceed `max_cache_size_bytes`, including in-flight writes
//! - At most one entry per content key
//! - Critical entries are only removed by explicit clears
//! - A corrupt entry is discarded and reported as a miss, never served

pub mod analytics;
pub mod compression;
pub mod config;
pub mod entry;
pub mod key;
pub mod optimizer;
pub mod orchestrator;
pub mod prefetch;
pub mod snapshot;
pub mod store;
pub mod strategy;

pub use analytics::{CacheAnalytics, CacheAnalyticsReport, CacheHealth, HealthStatus, MetricsSnapshot};
pub use compression::{CompressionAlgorithm, CompressionConfig, CompressionManager};
pub use config::CacheConfig;
pub use entry::{ByteRange, CacheEntry, Priority, SpanSet};
pub use key::CacheKey;
pub use optimizer::{OptimizationReport, StorageOptimizer};
pub use orchestrator::{
    CacheOrchestrator, CacheResult, CachedContent, ClearOptions, ClearReport, ImportReport,
    LifecycleState,
};
pub use prefetch::IntelligentPrefetcher;
pub use snapshot::CacheSnapshot;
pub use store::{BlobIo, BlobStore, DiskBlobIo, InMemoryBlobIo};
pub use strategy::{CacheStrategy, ResolvedStrategy, StrategyPlanner};
