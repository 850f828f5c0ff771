//! Cache Orchestrator
//!
//! Top-level coordinator of the media cache and the only entry point the
//! player/UI layer talks to.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        CacheOrchestrator                          │
//! │   lifecycle: Uninitialized → Initializing → Running ⇄ Degraded    │
//! │              → ShuttingDown → Released                            │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                            Engine                                 │
//! │  ┌────────────┐ ┌─────────────┐ ┌───────────┐ ┌───────────────┐  │
//! │  │  Strategy  │ │ Compression │ │ Optimizer │ │  Prefetcher   │  │
//! │  │  Planner   │ │   Manager   │ │           │ │               │  │
//! │  └────────────┘ └─────────────┘ └───────────┘ └───────────────┘  │
//! │  ┌────────────────────────────┐ ┌─────────────────────────────┐  │
//! │  │   BlobStore (index + I/O)  │ │  CacheAnalytics (atomics)   │  │
//! │  └────────────────────────────┘ └─────────────────────────────┘  │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  loops: health monitor (30s) │ auto-optimizer (1h) │ prefetch    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The engine exists only between `initialize` and `cleanup`. Background
//! loops hold the engine, never the orchestrator, and stop on a shared
//! cancellation token.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::analytics::{CacheAnalytics, CacheAnalyticsReport, CacheHealth, LatencyTracker, ReportContext};
use super::compression::{CompressionAlgorithm, CompressionConfig, CompressionManager, CompressionOutcome};
use super::config::CacheConfig;
use super::entry::{ByteRange, CacheEntry, Priority, SpanSet};
use super::key::CacheKey;
use super::optimizer::{OptimizationReport, OptimizerConfig, StorageOptimizer};
use super::prefetch::IntelligentPrefetcher;
use super::snapshot::CacheSnapshot;
use super::store::{BlobIo, BlobStore, DiskBlobIo, NewEntry, PutOutcome};
use super::strategy::{CacheOperation, CacheStrategy, StrategyPlanner};
use crate::adapters::{BroadcastEventPublisher, CompositeEventPublisher, LoggingEventPublisher};
use crate::domain::events::CacheEvent;
use crate::domain::ports::{ContentSource, EventPublisher, NetworkMonitor, PlaybackHints};
use crate::error::{Error, Result};

/// Consecutive faults after which the cache reports itself degraded
pub const DEGRADE_AFTER_FAULTS: u32 = 5;

/// Buffered access notifications awaiting the prefetch loop
const ACCESS_CHANNEL_CAPACITY: usize = 64;

// =============================================================================
// Public Types
// =============================================================================

/// Lifecycle of the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Running,
    /// Operational, but recent operations keep failing
    Degraded,
    ShuttingDown,
    Released,
}

impl LifecycleState {
    /// Whether public operations are accepted
    pub fn is_operational(&self) -> bool {
        matches!(self, LifecycleState::Running | LifecycleState::Degraded)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Uninitialized => "Uninitialized",
            LifecycleState::Initializing => "Initializing",
            LifecycleState::Running => "Running",
            LifecycleState::Degraded => "Degraded",
            LifecycleState::ShuttingDown => "ShuttingDown",
            LifecycleState::Released => "Released",
        };
        f.write_str(name)
    }
}

/// Outcome of a cache request
#[derive(Debug, Clone, PartialEq)]
pub enum CacheResult {
    Success {
        key: CacheKey,
        cached_size: u64,
        compression_ratio: f64,
        elapsed: Duration,
    },
    /// Already present; recency was bumped and nothing was fetched
    AlreadyCached { key: CacheKey },
    /// Not enough room even after optimization; nothing was written
    InsufficientSpace { required: u64, available: u64 },
    Error { message: String },
}

impl CacheResult {
    pub fn is_success(&self) -> bool {
        matches!(self, CacheResult::Success { .. })
    }
}

/// Cached bytes as served to the player
#[derive(Debug, Clone)]
pub struct CachedContent {
    pub key: CacheKey,
    pub locator: String,
    /// Decompressed bytes covering `spans`, in order
    pub data: Bytes,
    pub spans: SpanSet,
    pub content_length: Option<u64>,
    /// Whether `data` is the whole content
    pub complete: bool,
    pub priority: Priority,
    pub compression: CompressionAlgorithm,
}

/// Selection for [`CacheOrchestrator::clear_cache`]
///
/// `clear_all` overrides everything else; the remaining filters are OR-ed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClearOptions {
    pub clear_all: bool,
    /// Entries created longer ago than this
    pub older_than: Option<Duration>,
    pub low_priority: bool,
    /// Entries not accessed for `unused_entry_age`
    pub unused: bool,
}

impl ClearOptions {
    pub fn all() -> Self {
        Self {
            clear_all: true,
            ..Default::default()
        }
    }

    fn matches(&self, entry: &CacheEntry, now: DateTime<Utc>, unused_age: Duration) -> bool {
        self.clear_all
            || self
                .older_than
                .map(|age| entry.is_older_than(now, age))
                .unwrap_or(false)
            || (self.low_priority && entry.priority == Priority::Low)
            || (self.unused && entry.is_idle_longer_than(now, unused_age))
    }
}

/// Result of a clear
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClearReport {
    pub entries_removed: u64,
    pub space_freed: u64,
}

/// Result of an import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportReport {
    pub snapshot_id: Uuid,
    pub entries_applied: u64,
    /// Snapshot entries with no blob in this cache
    pub entries_skipped: u64,
}

// =============================================================================
// Engine
// =============================================================================

/// Everything that exists only while the cache is initialized
struct Engine {
    config: CacheConfig,
    source: Arc<dyn ContentSource>,
    network: Arc<dyn NetworkMonitor>,
    events: Arc<dyn EventPublisher>,
    store: Arc<BlobStore>,
    analytics: Arc<CacheAnalytics>,
    compression: Arc<CompressionManager>,
    optimizer: StorageOptimizer,
    planner: StrategyPlanner,
    prefetcher: IntelligentPrefetcher,
    access_tx: mpsc::Sender<String>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    async fn emit(&self, event: CacheEvent) {
        if let Err(e) = self.events.publish(event).await {
            warn!("Failed to publish cache event: {}", e);
        }
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    fn notify_access(&self, locator: &str) {
        if self.prefetcher.is_enabled() {
            // A full channel only costs a prediction
            let _ = self.access_tx.try_send(locator.to_string());
        }
    }

    // -------------------------------------------------------------------------
    // Caching
    // -------------------------------------------------------------------------

    async fn cache(&self, locator: &str, priority: Priority, strategy: CacheStrategy, prefetch: bool) -> CacheResult {
        match self.try_cache(locator, priority, strategy, prefetch).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Caching {} failed: {}", locator, e);
                self.analytics.record_error();
                self.emit(CacheEvent::error("cache_content", e.to_string(), Some(locator)))
                    .await;
                CacheResult::Error {
                    message: e.to_string(),
                }
            }
        }
    }

    async fn try_cache(
        &self,
        locator: &str,
        priority: Priority,
        strategy: CacheStrategy,
        prefetch: bool,
    ) -> Result<CacheResult> {
        let timer = LatencyTracker::start();
        let key = CacheKey::from_locator(locator);

        if self.store.touch(&key) {
            debug!("{} already cached", key.short());
            if self.store.raise_priority(&key, priority) {
                debug!("Raised {} to {} priority", key.short(), priority);
            }
            if !prefetch {
                self.notify_access(locator);
            }
            return Ok(CacheResult::AlreadyCached { key });
        }

        let (estimated_size, size_known) = self.estimate_size(locator).await;
        let conditions = self.network.conditions();
        let op = self
            .planner
            .plan(locator, priority, strategy, &conditions, estimated_size, size_known);
        debug!(
            "Planned {} for {}: {}/{} segments, {} bytes (compression={}, size_known={})",
            op.strategy,
            key.short(),
            op.selected_segments,
            op.segment_count,
            op.planned_bytes,
            op.compression_enabled,
            op.size_known
        );

        if op.planned_bytes == 0 {
            return Err(Error::ContentSource {
                locator: locator.to_string(),
                reason: "content is empty".into(),
            });
        }

        if let Some(rejection) = self.ensure_space(&op).await? {
            return Ok(rejection);
        }

        let (data, spans, content_length) = self.fetch(&op).await?;
        if data.is_empty() {
            return Err(Error::ContentSource {
                locator: locator.to_string(),
                reason: "no bytes returned".into(),
            });
        }

        let original_size = data.len() as u64;
        let outcome = if self
            .compression
            .should_compress(original_size, op.compression_enabled)
        {
            let compression = self.compression.clone();
            tokio::task::spawn_blocking(move || compression.compress(&data))
                .await
                .map_err(|e| Error::Internal(format!("compression task failed: {}", e)))?
        } else {
            CompressionOutcome {
                data,
                algorithm: CompressionAlgorithm::None,
                ratio: 1.0,
            }
        };

        let put = self
            .store
            .put(NewEntry {
                key: key.clone(),
                locator: locator.to_string(),
                data: outcome.data,
                original_size,
                priority,
                compression: outcome.algorithm,
                spans,
                content_length,
            })
            .await;

        let entry = match put {
            Ok(PutOutcome::Stored(entry)) => entry,
            Ok(PutOutcome::AlreadyPresent) => return Ok(CacheResult::AlreadyCached { key }),
            Err(Error::InsufficientSpace { required, available }) => {
                return Ok(CacheResult::InsufficientSpace { required, available })
            }
            Err(e) => return Err(e),
        };

        let elapsed = timer.elapsed();
        self.analytics.record_write(entry.size_bytes, original_size);
        self.analytics.record_cache_latency(elapsed);
        info!(
            "Cached {} ({} of {} bytes stored, {}, ratio {:.2}, prefetch={})",
            key.short(),
            entry.size_bytes,
            original_size,
            op.strategy,
            outcome.ratio,
            prefetch
        );
        self.emit(CacheEvent::content_cached(
            key.as_str(),
            locator,
            op.strategy.name(),
            priority.name(),
            entry.size_bytes,
            outcome.ratio,
            prefetch,
            elapsed,
        ))
        .await;
        if !prefetch {
            self.notify_access(locator);
        }

        Ok(CacheResult::Success {
            key,
            cached_size: entry.size_bytes,
            compression_ratio: outcome.ratio,
            elapsed,
        })
    }

    /// Content length from a bounded probe, else the configured placeholder
    async fn estimate_size(&self, locator: &str) -> (u64, bool) {
        let fallback = self.config.default_content_size_bytes;
        match tokio::time::timeout(self.config.probe_timeout, self.source.content_length(locator)).await {
            Ok(Ok(Some(len))) => (len, true),
            Ok(Ok(None)) => (fallback, false),
            Ok(Err(e)) => {
                debug!("Content length probe for {} failed: {}", locator, e);
                (fallback, false)
            }
            Err(_) => {
                debug!("Content length probe for {} timed out", locator);
                (fallback, false)
            }
        }
    }

    /// Make room for the planned bytes, or say why not
    async fn ensure_space(&self, op: &CacheOperation) -> Result<Option<CacheResult>> {
        let needed = op.planned_bytes;
        if needed > self.store.capacity() {
            return Ok(Some(CacheResult::InsufficientSpace {
                required: needed,
                available: self.store.available_bytes(),
            }));
        }
        if self.store.available_bytes() >= needed {
            return Ok(None);
        }

        debug!("Need {} bytes, {} available; optimizing", needed, self.store.available_bytes());
        self.reclaim(false, needed).await?;
        if self.store.available_bytes() >= needed {
            return Ok(None);
        }

        if op.priority.may_evict_others() {
            let evicted = self.store.evict_lru(needed, op.priority).await?;
            if !evicted.is_empty() {
                info!(
                    "Evicted {} lower-priority entries for {} request",
                    evicted.len(),
                    op.priority
                );
            }
            if self.store.available_bytes() >= needed {
                return Ok(None);
            }
        }

        Ok(Some(CacheResult::InsufficientSpace {
            required: needed,
            available: self.store.available_bytes(),
        }))
    }

    /// Fetch the planned ranges; a short read marks the end of the content
    async fn fetch(&self, op: &CacheOperation) -> Result<(Bytes, SpanSet, Option<u64>)> {
        let mut buf = BytesMut::new();
        let mut spans = SpanSet::new();
        let mut content_length = op.size_known.then_some(op.estimated_size);

        for range in op.ranges() {
            let mut chunk = tokio::time::timeout(
                self.config.fetch_timeout,
                self.source.fetch_range(&op.locator, range),
            )
            .await
            .map_err(|_| Error::timeout("content fetch", self.config.fetch_timeout))??;

            if chunk.len() as u64 > range.len() {
                chunk = chunk.slice(..range.len() as usize);
            }
            let got = chunk.len() as u64;
            if got > 0 {
                spans.insert(ByteRange::new(range.start, range.start + got));
                buf.extend_from_slice(&chunk);
            }
            if got < range.len() {
                content_length = Some(range.start + got);
                break;
            }
        }

        Ok((buf.freeze(), spans, content_length))
    }

    // -------------------------------------------------------------------------
    // Retrieval
    // -------------------------------------------------------------------------

    async fn get(&self, locator: &str) -> Result<Option<CachedContent>> {
        let timer = LatencyTracker::start();
        let key = CacheKey::from_locator(locator);
        self.notify_access(locator);

        let blob = match self.store.get(&key).await {
            Ok(Some(blob)) => blob,
            Ok(None) => {
                self.analytics.record_miss();
                debug!("Cache miss for {}", key.short());
                return Ok(None);
            }
            Err(e) if e.is_corruption() => return self.discard_corrupt(&key, locator, e).await,
            Err(e) => return Err(e),
        };

        let entry = blob.entry;
        let data = if entry.is_compressed() {
            let compression = self.compression.clone();
            let stored = blob.data;
            let algorithm = entry.compression;
            let decompressed = tokio::task::spawn_blocking(move || compression.decompress(&stored, algorithm))
                .await
                .map_err(|e| Error::Internal(format!("decompression task failed: {}", e)))?;
            match decompressed {
                Ok(data) if data.len() as u64 == entry.original_size => data,
                Ok(data) => {
                    let e = Error::CorruptEntry {
                        key: key.to_string(),
                        reason: format!(
                            "decompressed to {} bytes, expected {}",
                            data.len(),
                            entry.original_size
                        ),
                    };
                    return self.discard_corrupt(&key, locator, e).await;
                }
                Err(e) => return self.discard_corrupt(&key, locator, e).await,
            }
        } else {
            blob.data
        };

        self.analytics.record_hit();
        self.analytics.record_served(data.len() as u64);
        self.analytics.record_get_latency(timer.elapsed());
        self.emit(CacheEvent::content_retrieved(key.as_str(), locator, data.len() as u64))
            .await;

        Ok(Some(CachedContent {
            complete: entry.is_complete(),
            key,
            locator: entry.locator,
            data,
            spans: entry.spans,
            content_length: entry.content_length,
            priority: entry.priority,
            compression: entry.compression,
        }))
    }

    /// Drop a damaged entry and report the read as a miss
    async fn discard_corrupt(&self, key: &CacheKey, locator: &str, cause: Error) -> Result<Option<CachedContent>> {
        warn!("Discarding corrupt entry {}: {}", key.short(), cause);
        self.store.remove(key).await?;
        self.analytics.record_corrupt_entry();
        self.analytics.record_miss();
        self.emit(CacheEvent::error("get_cached_content", cause.to_string(), Some(locator)))
            .await;
        Ok(None)
    }

    // -------------------------------------------------------------------------
    // Maintenance
    // -------------------------------------------------------------------------

    async fn optimize(&self, forced: bool) -> Result<OptimizationReport> {
        self.reclaim(forced, 0).await
    }

    /// One optimizer pass, persisted and announced; `needed > 0` makes room
    /// for a pending write
    async fn reclaim(&self, forced: bool, needed: u64) -> Result<OptimizationReport> {
        let report = if needed > 0 {
            self.optimizer.make_room(needed).await?
        } else {
            self.optimizer.optimize(forced).await?
        };
        if let Err(e) = self.store.persist_index().await {
            warn!("Failed to persist cache index: {}", e);
        }
        self.emit(CacheEvent::storage_optimized(
            forced,
            report.entries_removed,
            report.space_freed,
        ))
        .await;
        Ok(report)
    }

    async fn clear(&self, options: &ClearOptions) -> Result<ClearReport> {
        let now = Utc::now();
        let unused_age = self.config.unused_entry_age;
        let selected: HashSet<CacheKey> = self
            .store
            .entries()
            .into_iter()
            .filter(|e| options.matches(e, now, unused_age))
            .map(|e| e.key)
            .collect();
        let keys: Vec<CacheKey> = selected.into_iter().collect();

        let removed = self.store.remove_all(&keys).await?;
        let report = ClearReport {
            entries_removed: removed.len() as u64,
            space_freed: removed.iter().map(|e| e.size_bytes).sum(),
        };
        if let Err(e) = self.store.persist_index().await {
            warn!("Failed to persist cache index: {}", e);
        }

        info!(
            "Cleared {} entries ({} bytes)",
            report.entries_removed, report.space_freed
        );
        self.emit(CacheEvent::cache_cleared(report.entries_removed, report.space_freed))
            .await;
        Ok(report)
    }

    fn report(&self, state: LifecycleState) -> CacheAnalyticsReport {
        let entries = self.store.entries();
        self.analytics.report(ReportContext {
            state: state.to_string(),
            entries: &entries,
            total_size_bytes: self.store.current_size_bytes(),
            max_size_bytes: self.store.capacity(),
            compression_enabled: self.config.compression_enabled,
            prefetching_enabled: self.prefetcher.is_enabled(),
            high_watermark: self.config.high_watermark,
        })
    }

    fn health(&self) -> CacheHealth {
        self.analytics.health(self.store.utilization())
    }

    async fn export(&self) -> Result<String> {
        CacheSnapshot::new(self.config.clone(), self.analytics.snapshot(), self.store.entries()).to_json()
    }

    async fn import(&self, raw: &str) -> Result<ImportReport> {
        let snapshot = CacheSnapshot::from_json(raw)?;

        let mut report = ImportReport {
            snapshot_id: snapshot.snapshot_id,
            entries_applied: 0,
            entries_skipped: 0,
        };
        for entry in &snapshot.entries {
            if self.store.restore_metadata(
                &entry.key,
                entry.created_at,
                entry.last_accessed,
                entry.access_count,
                entry.priority,
            ) {
                report.entries_applied += 1;
            } else {
                report.entries_skipped += 1;
            }
        }
        self.analytics.restore(&snapshot.metrics);
        if let Err(e) = self.store.persist_index().await {
            warn!("Failed to persist cache index: {}", e);
        }

        info!(
            "Imported snapshot {}: {} entries applied, {} skipped",
            snapshot.snapshot_id, report.entries_applied, report.entries_skipped
        );
        self.emit(CacheEvent::data_imported(
            report.entries_applied,
            report.entries_skipped,
        ))
        .await;
        Ok(report)
    }

    // -------------------------------------------------------------------------
    // Background Loops
    // -------------------------------------------------------------------------

    /// One health-monitor tick
    async fn health_tick(&self) -> CacheHealth {
        let health = self.health();
        debug!(
            "Cache health {:.2} ({}), hit rate {:.2}, utilization {:.2}",
            health.score, health.status, health.hit_rate, health.utilization
        );
        if health.needs_forced_optimization() {
            warn!(
                "Cache health {:.2} is {}; forcing optimization",
                health.score, health.status
            );
            if let Err(e) = self.optimize(true).await {
                error!("Forced optimization failed: {}", e);
            }
        } else if let Err(e) = self.store.persist_index().await {
            error!("Failed to persist cache index: {}", e);
        }
        health
    }

    async fn run_health_monitor(self: Arc<Self>) {
        info!(
            "Starting health monitor (every {:?})",
            self.config.health_check_interval
        );
        let mut tick = interval(self.config.health_check_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tick.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tick.tick() => {
                    self.health_tick().await;
                }
            }
        }
        info!("Health monitor stopped");
    }

    async fn run_auto_optimizer(self: Arc<Self>) {
        info!(
            "Starting auto-optimizer (every {:?})",
            self.config.auto_optimize_interval
        );
        let mut tick = interval(self.config.auto_optimize_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tick.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tick.tick() => {
                    if self.optimizer.needs_optimization() {
                        if let Err(e) = self.optimize(false).await {
                            error!("Scheduled optimization failed: {}", e);
                        }
                    }
                }
            }
        }
        info!("Auto-optimizer stopped");
    }

    async fn run_prefetch_monitor(self: Arc<Self>, mut accesses: mpsc::Receiver<String>) {
        info!("Starting prefetch monitor");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                access = accesses.recv() => match access {
                    Some(locator) => self.prefetch_after(&locator).await,
                    None => break,
                }
            }
        }
        info!("Prefetch monitor stopped");
    }

    async fn prefetch_after(self: &Arc<Self>, locator: &str) {
        self.prefetcher.record_access(locator);
        if !self.prefetcher.is_enabled() {
            return;
        }
        if self.store.utilization() >= self.config.high_watermark {
            debug!("Cache above high watermark; skipping prefetch");
            return;
        }

        for request in self.prefetcher.predictions(locator).await {
            if self.store.contains(&request.key) {
                continue;
            }
            let Some(permit) = self.prefetcher.try_permit() else {
                debug!("All prefetch slots busy");
                break;
            };
            if !self.prefetcher.begin(&request.key) {
                continue;
            }

            self.analytics.record_prefetch_issued();
            debug!(
                "Prefetching {} ({:?}, {} priority)",
                request.locator, request.reason, request.priority
            );
            let engine = Arc::clone(self);
            let handle = tokio::spawn(async move {
                let _permit = permit;
                tokio::select! {
                    _ = engine.shutdown.cancelled() => {}
                    result = engine.cache(&request.locator, request.priority, request.strategy, true) => {
                        if result.is_success() {
                            engine.analytics.record_prefetch_completed();
                        }
                    }
                }
                engine.prefetcher.finish(&request.key);
            });
            self.track(handle);
        }
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Public face of the cache
///
/// Construct once, wrap in an `Arc`, then `initialize`. Every operation other
/// than `initialize`, `cleanup`, `state` and `subscribe` fails with
/// [`Error::NotInitialized`] unless the cache is Running or Degraded.
pub struct CacheOrchestrator {
    source: Arc<dyn ContentSource>,
    network: Arc<dyn NetworkMonitor>,
    blob_io: Option<Arc<dyn BlobIo>>,
    hints: Option<Arc<dyn PlaybackHints>>,
    extra_publisher: Option<Arc<dyn EventPublisher>>,
    broadcast: BroadcastEventPublisher,
    state: RwLock<LifecycleState>,
    engine: RwLock<Option<Arc<Engine>>>,
    faults: AtomicU32,
    lifecycle: tokio::sync::Mutex<()>,
}

impl CacheOrchestrator {
    pub fn new(source: Arc<dyn ContentSource>, network: Arc<dyn NetworkMonitor>) -> Self {
        Self {
            source,
            network,
            blob_io: None,
            hints: None,
            extra_publisher: None,
            broadcast: BroadcastEventPublisher::default(),
            state: RwLock::new(LifecycleState::Uninitialized),
            engine: RwLock::new(None),
            faults: AtomicU32::new(0),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Store blobs on a custom medium instead of `config.cache_dir`
    pub fn with_blob_io(mut self, io: Arc<dyn BlobIo>) -> Self {
        self.blob_io = Some(io);
        self
    }

    pub fn with_playback_hints(mut self, hints: Arc<dyn PlaybackHints>) -> Self {
        self.hints = Some(hints);
        self
    }

    /// Also deliver events to `publisher`
    pub fn with_event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.extra_publisher = Some(publisher);
        self
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    fn set_state(&self, state: LifecycleState) {
        *self.state.write() = state;
    }

    /// Receive future events; nothing emitted before subscribing is replayed
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.broadcast.subscribe()
    }

    /// Active configuration, if initialized
    pub fn config(&self) -> Option<CacheConfig> {
        self.engine.read().as_ref().map(|e| e.config.clone())
    }

    fn engine(&self) -> Result<Arc<Engine>> {
        let state = self.state();
        if !state.is_operational() {
            return Err(Error::NotInitialized {
                state: state.to_string(),
            });
        }
        self.engine.read().clone().ok_or_else(|| Error::NotInitialized {
            state: state.to_string(),
        })
    }

    fn record_outcome(&self, ok: bool) {
        if ok {
            if self.faults.swap(0, Ordering::AcqRel) > 0 {
                let mut state = self.state.write();
                if *state == LifecycleState::Degraded {
                    *state = LifecycleState::Running;
                    info!("Cache recovered; back to Running");
                }
            }
        } else {
            let faults = self.faults.fetch_add(1, Ordering::AcqRel) + 1;
            if faults >= DEGRADE_AFTER_FAULTS {
                let mut state = self.state.write();
                if *state == LifecycleState::Running {
                    *state = LifecycleState::Degraded;
                    warn!("{} consecutive cache faults; now Degraded", faults);
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Open the store and start the background loops
    #[instrument(skip(self, config), fields(cache_dir = %config.cache_dir.display()))]
    pub async fn initialize(&self, config: CacheConfig) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let state = self.state();
        if !matches!(state, LifecycleState::Uninitialized | LifecycleState::Released) {
            return Err(Error::Initialization(format!(
                "cannot initialize from state {}",
                state
            )));
        }
        self.set_state(LifecycleState::Initializing);

        let (engine, accesses) = match self.build_engine(config).await {
            Ok(built) => built,
            Err(e) => {
                self.set_state(LifecycleState::Uninitialized);
                error!("Cache initialization failed: {}", e);
                return Err(match e {
                    Error::Initialization(_) => e,
                    other => Error::Initialization(other.to_string()),
                });
            }
        };

        engine.track(tokio::spawn(Arc::clone(&engine).run_health_monitor()));
        engine.track(tokio::spawn(Arc::clone(&engine).run_auto_optimizer()));
        engine.track(tokio::spawn(
            Arc::clone(&engine).run_prefetch_monitor(accesses),
        ));

        let entries = engine.store.len() as u64;
        let location = engine.config.cache_dir.display().to_string();
        let capacity = engine.config.max_cache_size_bytes;
        *self.engine.write() = Some(Arc::clone(&engine));
        self.faults.store(0, Ordering::Release);
        self.set_state(LifecycleState::Running);

        info!(
            "Media cache running: {} entries, budget {} bytes",
            entries, capacity
        );
        engine
            .emit(CacheEvent::initialized(location, capacity, entries))
            .await;
        Ok(())
    }

    async fn build_engine(&self, config: CacheConfig) -> Result<(Arc<Engine>, mpsc::Receiver<String>)> {
        config.validate()?;

        let io = match &self.blob_io {
            Some(io) => Arc::clone(io),
            None => Arc::new(DiskBlobIo::new(&config.cache_dir)) as Arc<dyn BlobIo>,
        };
        let analytics = Arc::new(CacheAnalytics::new());
        let store = Arc::new(
            BlobStore::open(
                io,
                config.max_cache_size_bytes,
                config.storage_timeout,
                analytics.clone(),
            )
            .await?,
        );

        let mut events = CompositeEventPublisher::new()
            .with_publisher(LoggingEventPublisher::debug_level())
            .with_publisher(self.broadcast.clone());
        if let Some(extra) = &self.extra_publisher {
            events = events.with_shared(Arc::clone(extra));
        }

        let (access_tx, access_rx) = mpsc::channel(ACCESS_CHANNEL_CAPACITY);
        let engine = Engine {
            source: Arc::clone(&self.source),
            network: Arc::clone(&self.network),
            events: Arc::new(events),
            optimizer: StorageOptimizer::new(store.clone(), analytics.clone(), OptimizerConfig::from(&config)),
            planner: StrategyPlanner::from(&config),
            compression: Arc::new(CompressionManager::with_config(CompressionConfig {
                enabled: config.compression_enabled,
                threshold_bytes: config.compression_threshold_bytes,
                ..Default::default()
            })),
            prefetcher: IntelligentPrefetcher::new(
                config.prefetching_enabled,
                config.prefetch_depth,
                config.prefetch_concurrency,
                self.hints.clone(),
            ),
            store,
            analytics,
            access_tx,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            config,
        };
        Ok((Arc::new(engine), access_rx))
    }

    /// Stop the loops, persist the index and release the engine
    ///
    /// No-op unless the cache is operational. The cache may be initialized
    /// again afterwards.
    #[instrument(skip(self))]
    pub async fn cleanup(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if !self.state().is_operational() {
            return Ok(());
        }
        self.set_state(LifecycleState::ShuttingDown);
        let engine = self.engine.write().take();

        if let Some(engine) = engine {
            engine.shutdown.cancel();
            let handles = std::mem::take(&mut *engine.tasks.lock());
            for result in join_all(handles).await {
                if let Err(e) = result {
                    if !e.is_cancelled() {
                        warn!("Background task ended abnormally: {}", e);
                    }
                }
            }
            if let Err(e) = engine.store.persist_index().await {
                warn!("Failed to persist cache index on shutdown: {}", e);
            }
        }

        self.faults.store(0, Ordering::Release);
        self.set_state(LifecycleState::Released);
        info!("Media cache released");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Operations
    // -------------------------------------------------------------------------

    /// Cache (part of) a content item
    ///
    /// `Err` only when the cache is not operational; every other outcome is a
    /// [`CacheResult`].
    #[instrument(skip(self))]
    pub async fn cache_content(
        &self,
        locator: &str,
        priority: Priority,
        strategy: CacheStrategy,
    ) -> Result<CacheResult> {
        let engine = self.engine()?;
        let result = engine.cache(locator, priority, strategy, false).await;
        self.record_outcome(!matches!(result, CacheResult::Error { .. }));
        Ok(result)
    }

    /// Serve cached bytes; `None` on a miss
    #[instrument(skip(self))]
    pub async fn get_cached_content(&self, locator: &str) -> Result<Option<CachedContent>> {
        let engine = self.engine()?;
        match engine.get(locator).await {
            Ok(content) => {
                self.record_outcome(true);
                Ok(content)
            }
            Err(e) => {
                self.record_outcome(false);
                engine.analytics.record_error();
                engine
                    .emit(CacheEvent::error("get_cached_content", e.to_string(), Some(locator)))
                    .await;
                Err(e)
            }
        }
    }

    /// Switch intelligent prefetching; emits an event only on change
    pub async fn enable_intelligent_prefetching(&self, enabled: bool) -> Result<()> {
        let engine = self.engine()?;
        if engine.prefetcher.set_enabled(enabled) {
            info!("Intelligent prefetching {}", if enabled { "enabled" } else { "disabled" });
            engine.emit(CacheEvent::prefetching_toggled(enabled)).await;
        }
        Ok(())
    }

    pub fn is_prefetching_enabled(&self) -> Result<bool> {
        Ok(self.engine()?.prefetcher.is_enabled())
    }

    /// Run an optimization pass now
    #[instrument(skip(self))]
    pub async fn optimize_storage(&self, force: bool) -> Result<OptimizationReport> {
        let engine = self.engine()?;
        let result = engine.optimize(force).await;
        self.record_outcome(result.is_ok());
        result
    }

    /// Remove entries matching `options`
    #[instrument(skip(self))]
    pub async fn clear_cache(&self, options: ClearOptions) -> Result<ClearReport> {
        let engine = self.engine()?;
        let result = engine.clear(&options).await;
        self.record_outcome(result.is_ok());
        result
    }

    /// In-memory analytics snapshot; never touches storage
    pub fn get_cache_analytics(&self) -> Result<CacheAnalyticsReport> {
        let engine = self.engine()?;
        Ok(engine.report(self.state()))
    }

    pub fn health(&self) -> Result<CacheHealth> {
        Ok(self.engine()?.health())
    }

    /// Run one health-monitor tick now (forced optimization included)
    pub async fn run_health_check(&self) -> Result<CacheHealth> {
        let engine = self.engine()?;
        Ok(engine.health_tick().await)
    }

    /// Serialize entry metadata, metrics and config as a JSON snapshot
    pub async fn export_cache_data(&self) -> Result<String> {
        self.engine()?.export().await
    }

    /// Apply a snapshot produced by [`export_cache_data`](Self::export_cache_data)
    #[instrument(skip(self, raw))]
    pub async fn import_cache_data(&self, raw: &str) -> Result<ImportReport> {
        self.engine()?.import(raw).await
    }

    /// Current bytes in use
    pub fn current_size_bytes(&self) -> Result<u64> {
        Ok(self.engine()?.store.current_size_bytes())
    }

    /// Metadata of one entry, if cached
    pub fn entry(&self, locator: &str) -> Result<Option<CacheEntry>> {
        Ok(self.engine()?.store.entry(&CacheKey::from_locator(locator)))
    }
}

impl fmt::Debug for CacheOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheOrchestrator")
            .field("state", &self.state())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryContentSource, SharedNetworkMonitor};
    use crate::cache::store::InMemoryBlobIo;
    use assert_matches::assert_matches;

    const MIB: u64 = 1024 * 1024;

    fn orchestrator(source: Arc<InMemoryContentSource>, io: Arc<InMemoryBlobIo>) -> CacheOrchestrator {
        let network = Arc::new(SharedNetworkMonitor::new(10_000_000, 8 * 1024 * MIB));
        CacheOrchestrator::new(source, network).with_blob_io(io)
    }

    fn config() -> CacheConfig {
        CacheConfig {
            max_cache_size_bytes: 16 * MIB,
            default_content_size_bytes: 2 * MIB,
            prefetching_enabled: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_operations_require_initialization() {
        let cache = orchestrator(
            Arc::new(InMemoryContentSource::new()),
            Arc::new(InMemoryBlobIo::new()),
        );
        assert_eq!(cache.state(), LifecycleState::Uninitialized);
        assert_matches!(
            cache
                .cache_content("a", Priority::Normal, CacheStrategy::Adaptive)
                .await,
            Err(Error::NotInitialized { .. })
        );
        assert_matches!(cache.get_cached_content("a").await, Err(Error::NotInitialized { .. }));
        assert_matches!(cache.get_cache_analytics(), Err(Error::NotInitialized { .. }));
        // Cleanup before initialize is harmless
        cache.cleanup().await.unwrap();
        assert_eq!(cache.state(), LifecycleState::Uninitialized);
    }

    #[tokio::test]
    async fn test_failed_initialization_returns_to_uninitialized() {
        let io = Arc::new(InMemoryBlobIo::new());
        io.fail_init(true);
        let cache = orchestrator(Arc::new(InMemoryContentSource::new()), io.clone());

        assert_matches!(cache.initialize(config()).await, Err(Error::Initialization(_)));
        assert_eq!(cache.state(), LifecycleState::Uninitialized);

        io.fail_init(false);
        cache.initialize(config()).await.unwrap();
        assert_eq!(cache.state(), LifecycleState::Running);
        cache.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_is_an_initialization_error() {
        let cache = orchestrator(
            Arc::new(InMemoryContentSource::new()),
            Arc::new(InMemoryBlobIo::new()),
        );
        let bad = CacheConfig {
            max_cache_size_bytes: 0,
            ..config()
        };
        assert_matches!(cache.initialize(bad).await, Err(Error::Initialization(_)));
    }

    #[tokio::test]
    async fn test_reinitialize_after_cleanup() {
        let source = Arc::new(InMemoryContentSource::new());
        source.insert("clip", vec![3u8; 1000]);
        let io = Arc::new(InMemoryBlobIo::new());
        let cache = orchestrator(source, io);

        cache.initialize(config()).await.unwrap();
        assert_matches!(cache.initialize(config()).await, Err(Error::Initialization(_)));
        cache
            .cache_content("clip", Priority::Normal, CacheStrategy::Aggressive)
            .await
            .unwrap();
        cache.cleanup().await.unwrap();
        assert_eq!(cache.state(), LifecycleState::Released);
        assert_matches!(cache.get_cached_content("clip").await, Err(Error::NotInitialized { .. }));

        // Entries survive through the persisted index
        cache.initialize(config()).await.unwrap();
        assert!(cache.get_cached_content("clip").await.unwrap().is_some());
        cache.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_repeated_faults_degrade_then_recover() {
        let source = Arc::new(InMemoryContentSource::new());
        source.insert("good", vec![1u8; 100]);
        let cache = orchestrator(source, Arc::new(InMemoryBlobIo::new()));
        cache.initialize(config()).await.unwrap();

        for i in 0..DEGRADE_AFTER_FAULTS {
            let result = cache
                .cache_content(&format!("missing-{}", i), Priority::Normal, CacheStrategy::Aggressive)
                .await
                .unwrap();
            assert_matches!(result, CacheResult::Error { .. });
        }
        assert_eq!(cache.state(), LifecycleState::Degraded);

        // Degraded is still operational
        let result = cache
            .cache_content("good", Priority::Normal, CacheStrategy::Aggressive)
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(cache.state(), LifecycleState::Running);
        cache.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_length_uses_short_read() {
        let source = Arc::new(InMemoryContentSource::new());
        source.insert("stream", vec![9u8; (MIB + 512) as usize]);
        source.hide_length(true);
        let cache = orchestrator(source, Arc::new(InMemoryBlobIo::new()));
        cache.initialize(config()).await.unwrap();

        let result = cache
            .cache_content("stream", Priority::Normal, CacheStrategy::Aggressive)
            .await
            .unwrap();
        assert!(result.is_success());

        let entry = cache.entry("stream").unwrap().unwrap();
        assert_eq!(entry.content_length, Some(MIB + 512));
        assert!(entry.is_complete());
        cache.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_prefetch_toggle_emits_on_change_only() {
        let cache = orchestrator(
            Arc::new(InMemoryContentSource::new()),
            Arc::new(InMemoryBlobIo::new()),
        );
        cache.initialize(config()).await.unwrap();
        let mut events = cache.subscribe();

        cache.enable_intelligent_prefetching(false).await.unwrap();
        cache.enable_intelligent_prefetching(true).await.unwrap();
        cache.enable_intelligent_prefetching(true).await.unwrap();

        assert_matches!(
            events.try_recv(),
            Ok(CacheEvent::PrefetchingToggled { enabled: true, .. })
        );
        assert!(events.try_recv().is_err());
        assert!(cache.is_prefetching_enabled().unwrap());
        cache.cleanup().await.unwrap();
    }

    #[test]
    fn test_clear_options_matching() {
        let now = Utc::now();
        let mut entry = CacheEntry {
            key: CacheKey::from_locator("x"),
            locator: "x".into(),
            size_bytes: 1,
            original_size: 1,
            created_at: now - chrono::Duration::days(2),
            last_accessed: now,
            access_count: 0,
            priority: Priority::Normal,
            compression: CompressionAlgorithm::None,
            spans: SpanSet::new(),
            content_length: None,
            checksum: 0,
        };
        let day = Duration::from_secs(86_400);
        let unused = 30 * day;

        assert!(!ClearOptions::default().matches(&entry, now, unused));
        assert!(ClearOptions::all().matches(&entry, now, unused));
        let older = ClearOptions {
            older_than: Some(day),
            ..Default::default()
        };
        assert!(older.matches(&entry, now, unused));

        entry.priority = Priority::Low;
        let low = ClearOptions {
            low_priority: true,
            ..Default::default()
        };
        assert!(low.matches(&entry, now, unused));
    }
}
