//! Storage Optimizer
//!
//! Reclaims space in passes, cheapest sacrifice first:
//!
//! ```text
//! 1. expired      created_at older than max_entry_age
//! 2. low priority only when forced or utilization >= high_watermark;
//!                 on behalf of a write, LRU Low entries until it fits
//! 3. unused       last_accessed older than unused_entry_age
//! 4. LRU          only when forced and still >= high_watermark,
//!                 down to low_watermark
//! ```
//!
//! Critical entries are never touched. Passes are serialised so two
//! concurrent triggers cannot race over the same candidates.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::analytics::{CacheAnalytics, LatencyTracker};
use super::config::CacheConfig;
use super::entry::{CacheEntry, Priority};
use super::key::CacheKey;
use super::store::BlobStore;
use crate::error::Result;

/// Utilization at which the auto-optimizer bothers to run
pub const AUTO_OPTIMIZE_UTILIZATION: f64 = 0.75;

/// Optimizer thresholds
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    pub max_entry_age: Duration,
    pub unused_entry_age: Duration,
    pub high_watermark: f64,
    pub low_watermark: f64,
}

impl From<&CacheConfig> for OptimizerConfig {
    fn from(config: &CacheConfig) -> Self {
        Self {
            max_entry_age: config.max_entry_age,
            unused_entry_age: config.unused_entry_age,
            high_watermark: config.high_watermark,
            low_watermark: config.low_watermark,
        }
    }
}

/// Outcome of one optimization pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub forced: bool,
    pub expired_removed: u64,
    pub low_priority_removed: u64,
    pub unused_removed: u64,
    pub lru_evicted: u64,
    pub entries_removed: u64,
    pub space_freed: u64,
    pub utilization_before: f64,
    pub utilization_after: f64,
    #[serde(with = "elapsed_ms")]
    pub elapsed: Duration,
}

mod elapsed_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Space reclamation over a [`BlobStore`]
pub struct StorageOptimizer {
    store: Arc<BlobStore>,
    analytics: Arc<CacheAnalytics>,
    config: OptimizerConfig,
    pass: Mutex<()>,
}

impl StorageOptimizer {
    pub fn new(store: Arc<BlobStore>, analytics: Arc<CacheAnalytics>, config: OptimizerConfig) -> Self {
        Self {
            store,
            analytics,
            config,
            pass: Mutex::new(()),
        }
    }

    /// Whether any entry has outlived `max_entry_age`
    pub fn has_expired(&self) -> bool {
        let now = Utc::now();
        self.store
            .entries()
            .iter()
            .any(|e| e.priority < Priority::Critical && e.is_older_than(now, self.config.max_entry_age))
    }

    /// Condition checked by the hourly auto-optimizer
    pub fn needs_optimization(&self) -> bool {
        self.store.utilization() >= AUTO_OPTIMIZE_UTILIZATION || self.has_expired()
    }

    /// Run one pass
    pub async fn optimize(&self, forced: bool) -> Result<OptimizationReport> {
        self.run(forced, 0).await
    }

    /// Run an unforced pass on behalf of a write that needs `needed` bytes
    ///
    /// Low-priority entries give way to the write even below the high
    /// watermark, so speculative content never blocks a foreground request.
    pub async fn make_room(&self, needed: u64) -> Result<OptimizationReport> {
        self.run(false, needed).await
    }

    async fn run(&self, forced: bool, needed: u64) -> Result<OptimizationReport> {
        let _pass = self.pass.lock().await;
        let timer = LatencyTracker::start();
        let config = &self.config;

        let mut report = OptimizationReport {
            forced,
            utilization_before: self.store.utilization(),
            ..Default::default()
        };

        let now = Utc::now();
        let expired = self
            .select(|e| e.is_older_than(now, config.max_entry_age));
        report.expired_removed = self.remove(&expired, &mut report).await?;

        if forced || self.store.utilization() >= config.high_watermark {
            let low = self.select(|e| e.priority == Priority::Low);
            report.low_priority_removed = self.remove(&low, &mut report).await?;
        } else if self.store.available_bytes() < needed {
            let evicted = self.store.evict_lru(needed, Priority::Normal).await?;
            report.low_priority_removed = evicted.len() as u64;
            report.entries_removed += report.low_priority_removed;
            report.space_freed += evicted.iter().map(|e| e.size_bytes).sum::<u64>();
        }

        let unused = self
            .select(|e| e.is_idle_longer_than(now, config.unused_entry_age));
        report.unused_removed = self.remove(&unused, &mut report).await?;

        if forced && self.store.utilization() >= config.high_watermark {
            let target = (self.store.capacity() as f64 * config.low_watermark) as u64;
            let evicted = self.store.evict_to(target, Priority::Critical).await?;
            report.lru_evicted = evicted.len() as u64;
            report.entries_removed += report.lru_evicted;
            report.space_freed += evicted.iter().map(|e| e.size_bytes).sum::<u64>();
        }

        report.utilization_after = self.store.utilization();
        report.elapsed = timer.elapsed();
        self.analytics.record_optimization();

        if report.entries_removed > 0 {
            info!(
                "Storage optimization freed {} bytes across {} entries (expired={}, low={}, unused={}, lru={}, forced={})",
                report.space_freed,
                report.entries_removed,
                report.expired_removed,
                report.low_priority_removed,
                report.unused_removed,
                report.lru_evicted,
                forced
            );
        } else {
            debug!("Storage optimization found nothing to reclaim");
        }
        Ok(report)
    }

    fn select(&self, predicate: impl Fn(&CacheEntry) -> bool) -> Vec<CacheKey> {
        self.store
            .entries()
            .into_iter()
            .filter(|e| e.priority < Priority::Critical && predicate(e))
            .map(|e| e.key)
            .collect()
    }

    async fn remove(&self, keys: &[CacheKey], report: &mut OptimizationReport) -> Result<u64> {
        let removed = self.store.remove_all(keys).await?;
        let count = removed.len() as u64;
        report.entries_removed += count;
        report.space_freed += removed.iter().map(|e| e.size_bytes).sum::<u64>();
        Ok(count)
    }
}

// =============================================================================
// Tests
// =============================================================================
