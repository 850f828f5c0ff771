//! Intelligent Prefetcher
//!
//! Predicts what will be requested next and hands those predictions to the
//! orchestrator's prefetch loop.
//!
//! Two sources of predictions:
//!
//! - **Hints**: the player's own view of what comes next (playlist order),
//!   cached at Normal priority with the Adaptive strategy
//! - **Learned**: a first-order transition model over the access stream
//!   (A was followed by B), cached speculatively at Low priority with
//!   SmartSegments
//!
//! Concurrency is bounded by a semaphore so prefetching never starves
//! foreground requests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use super::entry::Priority;
use super::key::CacheKey;
use super::strategy::CacheStrategy;
use crate::domain::ports::PlaybackHints;

/// Distinct predecessor locators tracked by the transition model
const MAX_TRACKED_SOURCES: usize = 4096;

/// Why a prediction was made
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchReason {
    Hinted,
    Learned,
}

/// One predicted request
#[derive(Debug, Clone, PartialEq)]
pub struct PrefetchRequest {
    pub locator: String,
    pub key: CacheKey,
    pub priority: Priority,
    pub strategy: CacheStrategy,
    pub reason: PrefetchReason,
}

impl PrefetchRequest {
    fn new(locator: String, reason: PrefetchReason) -> Self {
        let (priority, strategy) = match reason {
            PrefetchReason::Hinted => (Priority::Normal, CacheStrategy::Adaptive),
            PrefetchReason::Learned => (Priority::Low, CacheStrategy::SmartSegments),
        };
        Self {
            key: CacheKey::from_locator(&locator),
            locator,
            priority,
            strategy,
            reason,
        }
    }
}

#[derive(Default)]
struct TransitionModel {
    last: Option<String>,
    successors: HashMap<String, HashMap<String, u64>>,
}

impl TransitionModel {
    fn observe(&mut self, locator: &str) {
        if let Some(prev) = self.last.take() {
            if prev != locator
                && (self.successors.len() < MAX_TRACKED_SOURCES || self.successors.contains_key(&prev))
            {
                *self
                    .successors
                    .entry(prev)
                    .or_default()
                    .entry(locator.to_string())
                    .or_insert(0) += 1;
            }
        }
        self.last = Some(locator.to_string());
    }

    /// Most frequent successors, ties broken by locator for determinism
    fn predict(&self, locator: &str, limit: usize) -> Vec<String> {
        let Some(next) = self.successors.get(locator) else {
            return Vec::new();
        };
        let mut ranked: Vec<(&String, &u64)> = next.iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        ranked
            .into_iter()
            .take(limit)
            .map(|(l, _)| l.clone())
            .collect()
    }
}

/// Learns access patterns and bounds prefetch work
pub struct IntelligentPrefetcher {
    enabled: AtomicBool,
    depth: usize,
    model: Mutex<TransitionModel>,
    hints: Option<Arc<dyn PlaybackHints>>,
    in_flight: Mutex<HashSet<CacheKey>>,
    permits: Arc<Semaphore>,
}

impl IntelligentPrefetcher {
    pub fn new(
        enabled: bool,
        depth: usize,
        concurrency: usize,
        hints: Option<Arc<dyn PlaybackHints>>,
    ) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            depth: depth.max(1),
            model: Mutex::new(TransitionModel::default()),
            hints,
            in_flight: Mutex::new(HashSet::new()),
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Switch prefetching; returns `true` if the state changed
    pub fn set_enabled(&self, enabled: bool) -> bool {
        self.enabled.swap(enabled, Ordering::AcqRel) != enabled
    }

    /// Feed one access into the transition model
    pub fn record_access(&self, locator: &str) {
        self.model.lock().observe(locator);
    }

    /// Predictions following an access to `locator`, hinted items first
    pub async fn predictions(&self, locator: &str) -> Vec<PrefetchRequest> {
        let hinted = match &self.hints {
            Some(hints) => hints.upcoming(locator, self.depth).await,
            None => Vec::new(),
        };
        let learned = self.model.lock().predict(locator, self.depth);

        let mut seen = HashSet::new();
        seen.insert(locator.to_string());

        let mut out = Vec::new();
        for (candidates, reason) in [
            (hinted, PrefetchReason::Hinted),
            (learned, PrefetchReason::Learned),
        ] {
            for candidate in candidates {
                if seen.insert(candidate.clone()) {
                    out.push(PrefetchRequest::new(candidate, reason));
                }
            }
        }
        debug!("{} prefetch predictions after {}", out.len(), locator);
        out
    }

    /// Claim a key for prefetching; `false` if already in flight
    pub fn begin(&self, key: &CacheKey) -> bool {
        self.in_flight.lock().insert(key.clone())
    }

    /// Release a claimed key
    pub fn finish(&self, key: &CacheKey) {
        self.in_flight.lock().remove(key);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// A free prefetch slot, if any
    pub fn try_permit(&self) -> Option<OwnedSemaphorePermit> {
        self.permits.clone().try_acquire_owned().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedHints(Vec<String>);

    #[async_trait]
    impl PlaybackHints for FixedHints {
        async fn upcoming(&self, _current: &str, limit: usize) -> Vec<String> {
            self.0.iter().take(limit).cloned().collect()
        }
    }

    #[tokio::test]
    async fn test_learns_successors() {
        let prefetcher = IntelligentPrefetcher::new(true, 2, 2, None);
        for _ in 0..3 {
            prefetcher.record_access("ep1");
            prefetcher.record_access("ep2");
        }
        prefetcher.record_access("ep1");
        prefetcher.record_access("trailer");

        let predictions = prefetcher.predictions("ep1").await;
        assert_eq!(predictions.len(), 2);
        assert_eq!(predictions[0].locator, "ep2");
        assert_eq!(predictions[0].priority, Priority::Low);
        assert_eq!(predictions[0].strategy, CacheStrategy::SmartSegments);
        assert_eq!(predictions[1].locator, "trailer");
    }

    #[tokio::test]
    async fn test_repeated_access_is_not_a_transition() {
        let prefetcher = IntelligentPrefetcher::new(true, 2, 2, None);
        prefetcher.record_access("a");
        prefetcher.record_access("a");
        assert!(prefetcher.predictions("a").await.is_empty());
    }

    #[tokio::test]
    async fn test_hints_take_precedence() {
        let hints = Arc::new(FixedHints(vec!["ep2".into(), "ep3".into()]));
        let prefetcher = IntelligentPrefetcher::new(true, 2, 2, Some(hints));
        prefetcher.record_access("ep1");
        prefetcher.record_access("ep2");

        let predictions = prefetcher.predictions("ep1").await;
        let locators: Vec<&str> = predictions.iter().map(|p| p.locator.as_str()).collect();
        assert_eq!(locators, vec!["ep2", "ep3"]);
        assert!(predictions
            .iter()
            .all(|p| p.reason == PrefetchReason::Hinted && p.priority == Priority::Normal));
    }

    #[test]
    fn test_toggle_reports_change() {
        let prefetcher = IntelligentPrefetcher::new(true, 2, 2, None);
        assert!(!prefetcher.set_enabled(true));
        assert!(prefetcher.set_enabled(false));
        assert!(!prefetcher.is_enabled());
    }

    #[test]
    fn test_in_flight_dedup_and_permits() {
        let prefetcher = IntelligentPrefetcher::new(true, 2, 1, None);
        let key = CacheKey::from_locator("a");
        assert!(prefetcher.begin(&key));
        assert!(!prefetcher.begin(&key));
        prefetcher.finish(&key);
        assert_eq!(prefetcher.in_flight(), 0);

        let permit = prefetcher.try_permit();
        assert!(permit.is_some());
        assert!(prefetcher.try_permit().is_none());
        drop(permit);
        assert!(prefetcher.try_permit().is_some());
    }
}
