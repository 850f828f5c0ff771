//! Domain Layer
//!
//! - **Ports** (`ports.rs`) - Trait abstractions for external collaborators
//! - **Events** (`events.rs`) - Cache events for observers and audit
//!
//! # Usage
//!
//! ```ignore
//! use mediacache::domain::ports::{ContentSource, NetworkMonitor};
//! use mediacache::domain::events::CacheEvent;
//!
//! async fn warm<S: ContentSource>(source: &S, locator: &str) -> Result<()> {
//!     let length = source.content_length(locator).await?;
//!     // ...
//! }
//! ```

pub mod events;
pub mod ports;

pub use events::CacheEvent;
pub use ports::{ContentSource, EventPublisher, NetworkConditions, NetworkMonitor, PlaybackHints};
