//! Cache Analytics and Health Scoring
//!
//! Lock-free counters observed from every cache operation, plus the derived
//! health score the orchestrator's monitor loop acts on.
//!
//! ```text
//! hit_rate          = hits / (hits + misses)          (1.0 before any access)
//! utilization_score = bell curve, best in 50–80% utilization
//! health.score      = (hit_rate + utilization_score) / 2
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entry::{CacheEntry, Priority};

/// Health score below which the monitor schedules a forced optimization
pub const FORCED_OPTIMIZE_THRESHOLD: f64 = 0.5;

// =============================================================================
// Health
// =============================================================================

/// Categorical health status derived from the score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HealthStatus {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl HealthStatus {
    /// Map a `[0, 1]` score to a status
    pub fn from_score(score: f64) -> Self {
        if score > 0.8 {
            HealthStatus::Excellent
        } else if score > 0.6 {
            HealthStatus::Good
        } else if score > 0.4 {
            HealthStatus::Fair
        } else {
            HealthStatus::Poor
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Poor => write!(f, "Poor"),
            HealthStatus::Fair => write!(f, "Fair"),
            HealthStatus::Good => write!(f, "Good"),
            HealthStatus::Excellent => write!(f, "Excellent"),
        }
    }
}

/// Derived cache health
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheHealth {
    pub score: f64,
    pub status: HealthStatus,
    pub hit_rate: f64,
    pub utilization: f64,
    pub utilization_score: f64,
}

impl CacheHealth {
    /// Compute health from a hit rate and a utilization fraction
    pub fn compute(hit_rate: f64, utilization: f64) -> Self {
        let utilization_score = utilization_score(utilization);
        let score = ((hit_rate + utilization_score) / 2.0).clamp(0.0, 1.0);
        Self {
            score,
            status: HealthStatus::from_score(score),
            hit_rate,
            utilization,
            utilization_score,
        }
    }

    /// Whether the monitor should force an optimization pass
    pub fn needs_forced_optimization(&self) -> bool {
        self.score < FORCED_OPTIMIZE_THRESHOLD
    }
}

impl Default for CacheHealth {
    fn default() -> Self {
        Self::compute(1.0, 0.0)
    }
}

/// Bell-shaped utilization quality
///
/// Nearly-empty caches waste warm space; nearly-full ones thrash.
pub fn utilization_score(utilization: f64) -> f64 {
    let u = utilization.clamp(0.0, 1.0);
    if u < 0.5 {
        u * 2.0
    } else if u <= 0.8 {
        1.0
    } else if u <= 0.95 {
        1.0 - (u - 0.8) * 2.0
    } else {
        (0.7 - (u - 0.95) * 10.0).max(0.0)
    }
}

// =============================================================================
// Counters
// =============================================================================

/// Cache analytics collector
#[derive(Debug, Default)]
pub struct CacheAnalytics {
    hits: AtomicU64,
    misses: AtomicU64,

    writes: AtomicU64,
    bytes_stored: AtomicU64,
    bytes_original: AtomicU64,
    bytes_served: AtomicU64,

    evictions: AtomicU64,
    space_freed: AtomicU64,
    optimizations: AtomicU64,
    corrupt_entries: AtomicU64,
    errors: AtomicU64,

    prefetch_issued: AtomicU64,
    prefetch_completed: AtomicU64,

    // Latencies (microseconds, exponential moving average)
    get_latency_us: AtomicU64,
    cache_latency_us: AtomicU64,
}

impl CacheAnalytics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// A completed write: `stored` bytes on the medium for `original` content bytes
    pub fn record_write(&self, stored: u64, original: u64) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_stored.fetch_add(stored, Ordering::Relaxed);
        self.bytes_original.fetch_add(original, Ordering::Relaxed);
    }

    pub fn record_served(&self, bytes: u64) {
        self.bytes_served.fetch_add(bytes, Ordering::Relaxed);
    }

    /// One entry left the store, releasing `bytes`
    pub fn record_eviction(&self, bytes: u64) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        self.space_freed.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_optimization(&self) {
        self.optimizations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_corrupt_entry(&self) {
        self.corrupt_entries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_prefetch_issued(&self) {
        self.prefetch_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_prefetch_completed(&self) {
        self.prefetch_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_get_latency(&self, duration: Duration) {
        Self::update_latency_ema(&self.get_latency_us, duration);
    }

    pub fn record_cache_latency(&self, duration: Duration) {
        Self::update_latency_ema(&self.cache_latency_us, duration);
    }

    fn update_latency_ema(target: &AtomicU64, duration: Duration) {
        let new_us = duration.as_micros() as u64;
        let alpha = 0.1;

        loop {
            let current = target.load(Ordering::Relaxed);
            let updated = if current == 0 {
                new_us
            } else {
                ((1.0 - alpha) * current as f64 + alpha * new_us as f64) as u64
            };

            if target
                .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn space_freed(&self) -> u64 {
        self.space_freed.load(Ordering::Relaxed)
    }

    /// Hit rate; optimistic 1.0 before any access
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            1.0
        } else {
            hits / total
        }
    }

    /// Health at the given utilization
    pub fn health(&self, utilization: f64) -> CacheHealth {
        CacheHealth::compute(self.hit_rate(), utilization)
    }

    /// Get a serializable snapshot of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            hit_rate: self.hit_rate(),
            writes: self.writes.load(Ordering::Relaxed),
            bytes_stored: self.bytes_stored.load(Ordering::Relaxed),
            bytes_original: self.bytes_original.load(Ordering::Relaxed),
            bytes_served: self.bytes_served.load(Ordering::Relaxed),
            evictions: self.evictions(),
            space_freed: self.space_freed(),
            optimizations: self.optimizations.load(Ordering::Relaxed),
            corrupt_entries: self.corrupt_entries.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            prefetch_issued: self.prefetch_issued.load(Ordering::Relaxed),
            prefetch_completed: self.prefetch_completed.load(Ordering::Relaxed),
            avg_get_latency_us: self.get_latency_us.load(Ordering::Relaxed),
            avg_cache_latency_us: self.cache_latency_us.load(Ordering::Relaxed),
        }
    }

    /// Restore aggregate counters from a backup snapshot
    pub fn restore(&self, snapshot: &MetricsSnapshot) {
        self.hits.store(snapshot.hits, Ordering::Relaxed);
        self.misses.store(snapshot.misses, Ordering::Relaxed);
        self.writes.store(snapshot.writes, Ordering::Relaxed);
        self.bytes_stored
            .store(snapshot.bytes_stored, Ordering::Relaxed);
        self.bytes_original
            .store(snapshot.bytes_original, Ordering::Relaxed);
        self.bytes_served
            .store(snapshot.bytes_served, Ordering::Relaxed);
        self.evictions.store(snapshot.evictions, Ordering::Relaxed);
        self.space_freed.store(snapshot.space_freed, Ordering::Relaxed);
        self.optimizations
            .store(snapshot.optimizations, Ordering::Relaxed);
        self.corrupt_entries
            .store(snapshot.corrupt_entries, Ordering::Relaxed);
        self.errors.store(snapshot.errors, Ordering::Relaxed);
        self.prefetch_issued
            .store(snapshot.prefetch_issued, Ordering::Relaxed);
        self.prefetch_completed
            .store(snapshot.prefetch_completed, Ordering::Relaxed);
        self.get_latency_us
            .store(snapshot.avg_get_latency_us, Ordering::Relaxed);
        self.cache_latency_us
            .store(snapshot.avg_cache_latency_us, Ordering::Relaxed);
    }
}

/// Point-in-time snapshot of the counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub writes: u64,
    pub bytes_stored: u64,
    pub bytes_original: u64,
    pub bytes_served: u64,
    pub evictions: u64,
    pub space_freed: u64,
    pub optimizations: u64,
    pub corrupt_entries: u64,
    pub errors: u64,
    pub prefetch_issued: u64,
    pub prefetch_completed: u64,
    pub avg_get_latency_us: u64,
    pub avg_cache_latency_us: u64,
}

impl MetricsSnapshot {
    /// Bytes saved by compression across all writes
    pub fn compression_savings(&self) -> u64 {
        self.bytes_original.saturating_sub(self.bytes_stored)
    }
}

/// Simple latency tracker
pub struct LatencyTracker {
    start: Instant,
}

impl LatencyTracker {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

// =============================================================================
// Report
// =============================================================================

/// Entry count and bytes held at one priority
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PriorityStats {
    pub entries: u64,
    pub bytes: u64,
}

/// Synchronous analytics snapshot for UI/observability consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheAnalyticsReport {
    pub generated_at: DateTime<Utc>,
    pub state: String,
    pub total_entries: u64,
    pub total_size_bytes: u64,
    pub max_size_bytes: u64,
    pub utilization: f64,
    pub compressed_entries: u64,
    pub complete_entries: u64,
    pub by_priority: BTreeMap<Priority, PriorityStats>,
    pub prefetching_enabled: bool,
    pub health: CacheHealth,
    pub metrics: MetricsSnapshot,
    pub recommendations: Vec<String>,
}

/// Inputs the report needs from outside the analytics collector
pub struct ReportContext<'a> {
    pub state: String,
    pub entries: &'a [CacheEntry],
    pub total_size_bytes: u64,
    pub max_size_bytes: u64,
    pub compression_enabled: bool,
    pub prefetching_enabled: bool,
    pub high_watermark: f64,
}

impl CacheAnalytics {
    /// Build a full report; pure in-memory work, never touches storage
    pub fn report(&self, ctx: ReportContext<'_>) -> CacheAnalyticsReport {
        let utilization = if ctx.max_size_bytes == 0 {
            0.0
        } else {
            ctx.total_size_bytes as f64 / ctx.max_size_bytes as f64
        };

        let mut by_priority: BTreeMap<Priority, PriorityStats> = Priority::all()
            .into_iter()
            .map(|p| (p, PriorityStats::default()))
            .collect();
        let mut compressed_entries = 0;
        let mut complete_entries = 0;
        for entry in ctx.entries {
            let stats = by_priority.entry(entry.priority).or_default();
            stats.entries += 1;
            stats.bytes += entry.size_bytes;
            if entry.is_compressed() {
                compressed_entries += 1;
            }
            if entry.is_complete() {
                complete_entries += 1;
            }
        }

        let metrics = self.snapshot();
        let health = CacheHealth::compute(metrics.hit_rate, utilization);
        let recommendations = recommendations(
            &health,
            &metrics,
            &by_priority,
            ctx.compression_enabled,
            ctx.prefetching_enabled,
            ctx.high_watermark,
        );

        CacheAnalyticsReport {
            generated_at: Utc::now(),
            state: ctx.state,
            total_entries: ctx.entries.len() as u64,
            total_size_bytes: ctx.total_size_bytes,
            max_size_bytes: ctx.max_size_bytes,
            utilization,
            compressed_entries,
            complete_entries,
            by_priority,
            prefetching_enabled: ctx.prefetching_enabled,
            health,
            metrics,
            recommendations,
        }
    }
}

/// Minimum accesses before hit-rate advice is meaningful
const MIN_ACCESSES_FOR_ADVICE: u64 = 20;

fn recommendations(
    health: &CacheHealth,
    metrics: &MetricsSnapshot,
    by_priority: &BTreeMap<Priority, PriorityStats>,
    compression_enabled: bool,
    prefetching_enabled: bool,
    high_watermark: f64,
) -> Vec<String> {
    let mut out = Vec::new();
    let accesses = metrics.hits + metrics.misses;

    if health.utilization >= high_watermark {
        if compression_enabled {
            out.push(
                "Cache nearly full; run a forced optimization or raise the cache budget".to_string(),
            );
        } else {
            out.push("Cache nearly full, consider enabling compression".to_string());
        }
    } else if health.utilization < 0.2 && accesses >= MIN_ACCESSES_FOR_ADVICE {
        out.push("Cache is mostly empty; prefetching could warm it".to_string());
    }

    if accesses >= MIN_ACCESSES_FOR_ADVICE && health.hit_rate < 0.5 {
        if prefetching_enabled {
            out.push("Low hit rate; review prefetch predictions and cache strategy".to_string());
        } else {
            out.push("Low hit rate; consider enabling intelligent prefetching".to_string());
        }
    }

    let low = by_priority.get(&Priority::Low).copied().unwrap_or_default();
    let total_bytes: u64 = by_priority.values().map(|s| s.bytes).sum();
    if total_bytes > 0 && low.bytes * 2 > total_bytes {
        out.push("Low-priority content occupies most of the cache; consider clearing it".to_string());
    }

    if metrics.corrupt_entries > 0 {
        out.push(format!(
            "{} corrupt entries were discarded; check the storage medium",
            metrics.corrupt_entries
        ));
    }

    if out.is_empty() {
        out.push(format!("Cache health is {}", health.status));
    }
    out
}

// =============================================================================
// Tests
// =============================================================================
