//! Infrastructure Adapters
//!
//! Adapter implementations for the domain ports, following the Port/Adapter
//! (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                           │ │
//! │  │ ContentSource │ NetworkMonitor │ PlaybackHints │ Events    │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │ LocatorRouter (file / http) │ SharedNetworkMonitor        │ │
//! │  │ PlaylistHints │ Broadcast/Logging publishers │ Prometheus │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use mediacache::adapters::{LocatorRouter, SharedNetworkMonitor};
//! use mediacache::cache::CacheOrchestrator;
//!
//! let cache = CacheOrchestrator::new(
//!     Arc::new(LocatorRouter::standard()),
//!     Arc::new(SharedNetworkMonitor::new(10_000_000, 8 << 30)),
//! );
//! ```

mod content_source;
mod event_publisher;
mod network;
mod playback;
mod prometheus;

pub use content_source::{FileContentSource, HttpContentSource, InMemoryContentSource, LocatorRouter};
pub use event_publisher::{
    BroadcastEventPublisher, CompositeEventPublisher, InMemoryEventCollector, LoggingEventPublisher,
    DEFAULT_EVENT_CAPACITY,
};
pub use network::SharedNetworkMonitor;
pub use playback::PlaylistHints;
pub use prometheus::PrometheusExporter;
