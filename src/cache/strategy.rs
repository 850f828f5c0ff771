//! Cache Strategy Selection
//!
//! Decides how much of a content item to cache and whether to compress it.
//!
//! ```text
//! Adaptive:
//!   throughput > 5 Mbps  AND free > 1 GiB    -> Aggressive   (all segments)
//!   throughput < 1 Mbps  OR  free < 100 MiB  -> Conservative (~1/3, max 3)
//!   otherwise                                -> Balanced     (~1/2)
//! ```
//!
//! Content is divided into fixed-size segments from the start of the item;
//! every strategy caches a prefix of them, which is what a player needs to
//! begin playback.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::config::CacheConfig;
use super::entry::{ByteRange, Priority};
use super::key::CacheKey;
use crate::domain::ports::NetworkConditions;
use crate::error::Error;

const MIB: u64 = 1024 * 1024;

/// Throughput above which Adaptive may cache everything
pub const AGGRESSIVE_MIN_THROUGHPUT_BPS: u64 = 5_000_000;
/// Free storage above which Adaptive may cache everything
pub const AGGRESSIVE_MIN_FREE_BYTES: u64 = 1024 * MIB;
/// Throughput below which Adaptive falls back to Conservative
pub const CONSERVATIVE_MAX_THROUGHPUT_BPS: u64 = 1_000_000;
/// Free storage below which Adaptive falls back to Conservative
pub const CONSERVATIVE_MAX_FREE_BYTES: u64 = 100 * MIB;
/// Balanced compresses only when free storage is below this
pub const BALANCED_COMPRESS_BELOW_FREE_BYTES: u64 = 500 * MIB;
/// Conservative never caches more segments than this
pub const CONSERVATIVE_MAX_SEGMENTS: u64 = 3;

// =============================================================================
// Strategies
// =============================================================================

/// Strategy requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CacheStrategy {
    Aggressive,
    Conservative,
    /// Pick from live network and storage signals
    #[default]
    Adaptive,
    /// Only the opening segments
    SmartSegments,
}

impl CacheStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            CacheStrategy::Aggressive => "aggressive",
            CacheStrategy::Conservative => "conservative",
            CacheStrategy::Adaptive => "adaptive",
            CacheStrategy::SmartSegments => "smart-segments",
        }
    }
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CacheStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "aggressive" => Ok(CacheStrategy::Aggressive),
            "conservative" => Ok(CacheStrategy::Conservative),
            "adaptive" => Ok(CacheStrategy::Adaptive),
            "smart-segments" | "smart" => Ok(CacheStrategy::SmartSegments),
            other => Err(Error::Config(format!("unknown cache strategy: {}", other))),
        }
    }
}

/// Strategy actually applied to one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolvedStrategy {
    Aggressive,
    Balanced,
    Conservative,
    SmartSegments,
}

impl ResolvedStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            ResolvedStrategy::Aggressive => "Aggressive",
            ResolvedStrategy::Balanced => "Balanced",
            ResolvedStrategy::Conservative => "Conservative",
            ResolvedStrategy::SmartSegments => "SmartSegments",
        }
    }
}

impl fmt::Display for ResolvedStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Operation Plan
// =============================================================================

/// Transient plan for one cache request
#[derive(Debug, Clone, PartialEq)]
pub struct CacheOperation {
    pub strategy: ResolvedStrategy,
    pub locator: String,
    pub key: CacheKey,
    pub priority: Priority,
    /// Segments in the estimated content
    pub segment_count: u64,
    /// Segments this plan caches (a prefix)
    pub selected_segments: u64,
    pub segment_size: u64,
    /// Bytes covered by the selected prefix
    pub planned_bytes: u64,
    /// Whether the strategy asks for compression
    pub compression_enabled: bool,
    pub estimated_size: u64,
    /// `estimated_size` came from the source rather than the placeholder
    pub size_known: bool,
}

impl CacheOperation {
    /// Byte ranges of the selected segments, in order
    ///
    /// Produced lazily so an absurd size estimate costs nothing until the
    /// plan has been checked against the budget.
    pub fn ranges(&self) -> impl Iterator<Item = ByteRange> + '_ {
        (0..self.selected_segments).map(move |i| {
            let start = i.saturating_mul(self.segment_size);
            ByteRange::new(start, start.saturating_add(self.segment_size).min(self.estimated_size))
        })
    }
}

/// Number of `segment_size` segments in `size` bytes
pub fn segment_count(size: u64, segment_size: u64) -> u64 {
    if size == 0 {
        0
    } else {
        size.div_ceil(segment_size.max(1))
    }
}

/// Turns a requested strategy and live conditions into a [`CacheOperation`]
#[derive(Debug, Clone)]
pub struct StrategyPlanner {
    segment_size: u64,
    smart_segment_count: u64,
}

impl StrategyPlanner {
    pub fn new(segment_size: u64, smart_segment_count: u32) -> Self {
        Self {
            segment_size: segment_size.max(1),
            smart_segment_count: u64::from(smart_segment_count.max(1)),
        }
    }

    /// Resolve the strategy and its compression flag
    pub fn resolve(
        &self,
        requested: CacheStrategy,
        conditions: &NetworkConditions,
    ) -> (ResolvedStrategy, bool) {
        match requested {
            CacheStrategy::Aggressive => (ResolvedStrategy::Aggressive, true),
            CacheStrategy::Conservative => (ResolvedStrategy::Conservative, false),
            CacheStrategy::SmartSegments => (ResolvedStrategy::SmartSegments, true),
            CacheStrategy::Adaptive => {
                let free = conditions.available_storage_bytes;
                let throughput = conditions.throughput_bps;
                if throughput > AGGRESSIVE_MIN_THROUGHPUT_BPS && free > AGGRESSIVE_MIN_FREE_BYTES {
                    (ResolvedStrategy::Aggressive, true)
                } else if throughput < CONSERVATIVE_MAX_THROUGHPUT_BPS
                    || free < CONSERVATIVE_MAX_FREE_BYTES
                {
                    (ResolvedStrategy::Conservative, false)
                } else {
                    (
                        ResolvedStrategy::Balanced,
                        free < BALANCED_COMPRESS_BELOW_FREE_BYTES,
                    )
                }
            }
        }
    }

    /// Segments to cache out of `total`
    pub fn selected_segments(&self, strategy: ResolvedStrategy, total: u64) -> u64 {
        if total == 0 {
            return 0;
        }
        match strategy {
            ResolvedStrategy::Aggressive => total,
            ResolvedStrategy::Balanced => total.div_ceil(2),
            ResolvedStrategy::Conservative => total.div_ceil(3).clamp(1, CONSERVATIVE_MAX_SEGMENTS),
            ResolvedStrategy::SmartSegments => self.smart_segment_count.min(total),
        }
    }

    /// Build the full plan
    pub fn plan(
        &self,
        locator: &str,
        priority: Priority,
        requested: CacheStrategy,
        conditions: &NetworkConditions,
        estimated_size: u64,
        size_known: bool,
    ) -> CacheOperation {
        let (strategy, compression_enabled) = self.resolve(requested, conditions);
        let total = segment_count(estimated_size, self.segment_size);
        let selected = self.selected_segments(strategy, total);

        let planned_bytes = selected.saturating_mul(self.segment_size).min(estimated_size);

        CacheOperation {
            strategy,
            locator: locator.to_string(),
            key: CacheKey::from_locator(locator),
            priority,
            segment_count: total,
            selected_segments: selected,
            segment_size: self.segment_size,
            planned_bytes,
            compression_enabled,
            estimated_size,
            size_known,
        }
    }
}

impl From<&CacheConfig> for StrategyPlanner {
    fn from(config: &CacheConfig) -> Self {
        Self::new(config.segment_size_bytes, config.smart_segment_count)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const GIB: u64 = 1024 * MIB;

    fn planner() -> StrategyPlanner {
        StrategyPlanner::new(MIB, 4)
    }

    #[test]
    fn test_adaptive_fast_network_goes_aggressive() {
        let conditions = NetworkConditions::new(6_000_000, 2 * GIB);
        let (strategy, compress) = planner().resolve(CacheStrategy::Adaptive, &conditions);
        assert_eq!(strategy, ResolvedStrategy::Aggressive);
        assert!(compress);
    }

    #[test]
    fn test_adaptive_slow_network_goes_conservative() {
        // Regardless of space
        for free in [10 * MIB, 700 * MIB, 64 * GIB] {
            let conditions = NetworkConditions::new(500_000, free);
            let (strategy, compress) = planner().resolve(CacheStrategy::Adaptive, &conditions);
            assert_eq!(strategy, ResolvedStrategy::Conservative);
            assert!(!compress);
        }
    }

    #[test]
    fn test_adaptive_low_space_goes_conservative() {
        let conditions = NetworkConditions::new(50_000_000, 50 * MIB);
        let (strategy, _) = planner().resolve(CacheStrategy::Adaptive, &conditions);
        assert_eq!(strategy, ResolvedStrategy::Conservative);
    }

    #[test]
    fn test_adaptive_middle_is_balanced() {
        let (strategy, compress) =
            planner().resolve(CacheStrategy::Adaptive, &NetworkConditions::new(3_000_000, 800 * MIB));
        assert_eq!(strategy, ResolvedStrategy::Balanced);
        assert!(!compress);

        let (strategy, compress) =
            planner().resolve(CacheStrategy::Adaptive, &NetworkConditions::new(3_000_000, 300 * MIB));
        assert_eq!(strategy, ResolvedStrategy::Balanced);
        assert!(compress);

        // Fast network but not enough space for Aggressive
        let (strategy, _) =
            planner().resolve(CacheStrategy::Adaptive, &NetworkConditions::new(6_000_000, 800 * MIB));
        assert_eq!(strategy, ResolvedStrategy::Balanced);
    }

    #[test]
    fn test_explicit_strategies_ignore_conditions() {
        let poor = NetworkConditions::new(0, 0);
        assert_eq!(
            planner().resolve(CacheStrategy::Aggressive, &poor),
            (ResolvedStrategy::Aggressive, true)
        );
        assert_eq!(
            planner().resolve(CacheStrategy::SmartSegments, &poor),
            (ResolvedStrategy::SmartSegments, true)
        );
    }

    #[test]
    fn test_plan_ranges() {
        let conditions = NetworkConditions::new(0, 0);
        let op = planner().plan(
            "movie.mp4",
            Priority::Normal,
            CacheStrategy::Aggressive,
            &conditions,
            2 * MIB + 10,
            true,
        );
        assert_eq!(op.segment_count, 3);
        assert_eq!(op.selected_segments, 3);
        assert_eq!(op.planned_bytes, 2 * MIB + 10);
        assert_eq!(op.ranges().last(), Some(ByteRange::new(2 * MIB, 2 * MIB + 10)));
        assert_eq!(op.key, CacheKey::from_locator("movie.mp4"));
    }

    #[test]
    fn test_plan_empty_content() {
        let op = planner().plan(
            "empty",
            Priority::Normal,
            CacheStrategy::Aggressive,
            &NetworkConditions::new(0, 0),
            0,
            true,
        );
        assert_eq!(op.selected_segments, 0);
        assert_eq!(op.planned_bytes, 0);
        assert_eq!(op.ranges().count(), 0);
    }

    #[test]
    fn test_plan_huge_estimate_is_arithmetic() {
        let op = planner().plan(
            "huge",
            Priority::Normal,
            CacheStrategy::Aggressive,
            &NetworkConditions::new(0, 0),
            1 << 52,
            true,
        );
        assert_eq!(op.selected_segments, (1 << 52) / MIB);
        assert_eq!(op.planned_bytes, 1 << 52);

        let op = planner().plan(
            "max",
            Priority::Normal,
            CacheStrategy::Aggressive,
            &NetworkConditions::new(0, 0),
            u64::MAX,
            true,
        );
        assert_eq!(op.planned_bytes, u64::MAX);
        assert_eq!(op.ranges().next(), Some(ByteRange::new(0, MIB)));
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("smart_segments".parse::<CacheStrategy>().unwrap(), CacheStrategy::SmartSegments);
        assert_eq!("Adaptive".parse::<CacheStrategy>().unwrap(), CacheStrategy::Adaptive);
        assert!("reckless".parse::<CacheStrategy>().is_err());
    }

    proptest! {
        #[test]
        fn prop_conservative_is_bounded(size in 1u64..(10 * GIB)) {
            let p = planner();
            let total = segment_count(size, MIB);
            let selected = p.selected_segments(ResolvedStrategy::Conservative, total);
            prop_assert!((1..=CONSERVATIVE_MAX_SEGMENTS).contains(&selected));
            prop_assert!(selected <= total);
        }

        #[test]
        fn prop_plan_never_exceeds_estimate(size in 0u64..(64 * MIB), pick in 0usize..4) {
            let requested = [
                CacheStrategy::Aggressive,
                CacheStrategy::Conservative,
                CacheStrategy::Adaptive,
                CacheStrategy::SmartSegments,
            ][pick];
            let op = planner().plan(
                "x",
                Priority::Normal,
                requested,
                &NetworkConditions::new(3_000_000, 800 * MIB),
                size,
                true,
            );
            prop_assert!(op.planned_bytes <= size);
            prop_assert_eq!(op.ranges().count() as u64, op.selected_segments);
            prop_assert_eq!(op.ranges().map(|r| r.len()).sum::<u64>(), op.planned_bytes);
        }
    }
}
