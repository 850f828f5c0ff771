//! Cache Entry Types
//!
//! Entry metadata, priorities, and byte-range span tracking for cached media.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use super::compression::CompressionAlgorithm;
use super::key::CacheKey;
use crate::error::Error;

// =============================================================================
// Priority
// =============================================================================

/// Retention priority of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    /// Speculative content (prefetch predictions)
    Low,
    /// Default for foreground requests
    Normal,
    /// Content the user explicitly asked to keep available
    High,
    /// Never removed by the optimizer's heuristics
    Critical,
}

impl Priority {
    /// All priorities, lowest first
    pub fn all() -> [Priority; 4] {
        [
            Priority::Low,
            Priority::Normal,
            Priority::High,
            Priority::Critical,
        ]
    }

    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }

    /// Whether a request at this priority may displace lower-priority entries
    pub fn may_evict_others(&self) -> bool {
        *self > Priority::Low
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(Error::Config(format!("unknown priority: {}", other))),
        }
    }
}

// =============================================================================
// Byte Ranges
// =============================================================================

/// Half-open byte range `[start, end)` of the original content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// Value for an HTTP `Range` header (inclusive end)
    pub fn to_http_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end.saturating_sub(1))
    }
}

/// Sorted, non-overlapping set of cached byte ranges
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpanSet {
    spans: Vec<ByteRange>,
}

impl SpanSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from arbitrary (possibly overlapping) ranges
    pub fn from_ranges(ranges: impl IntoIterator<Item = ByteRange>) -> Self {
        let mut set = Self::new();
        for range in ranges {
            set.insert(range);
        }
        set
    }

    /// Insert a range, merging with neighbours it touches or overlaps
    pub fn insert(&mut self, range: ByteRange) {
        if range.is_empty() {
            return;
        }
        let mut merged = range;
        let mut kept = Vec::with_capacity(self.spans.len() + 1);
        for span in self.spans.drain(..) {
            if span.end < merged.start || span.start > merged.end {
                kept.push(span);
            } else {
                merged = ByteRange::new(merged.start.min(span.start), merged.end.max(span.end));
            }
        }
        kept.push(merged);
        kept.sort();
        self.spans = kept;
    }

    /// Whether `range` is fully covered
    pub fn covers(&self, range: ByteRange) -> bool {
        range.is_empty()
            || self
                .spans
                .iter()
                .any(|s| s.start <= range.start && s.end >= range.end)
    }

    /// Total covered bytes
    pub fn covered_bytes(&self) -> u64 {
        self.spans.iter().map(ByteRange::len).sum()
    }

    pub fn ranges(&self) -> &[ByteRange] {
        &self.spans
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

// =============================================================================
// Cache Entry
// =============================================================================

/// Metadata of one cached content item
///
/// Owned by the store; everything outside it works on clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub locator: String,
    /// Stored size (after compression)
    pub size_bytes: u64,
    /// Size before compression
    pub original_size: u64,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    pub priority: Priority,
    pub compression: CompressionAlgorithm,
    /// Byte ranges of the original content held by this entry
    pub spans: SpanSet,
    /// Best known total length of the original content
    pub content_length: Option<u64>,
    /// Integrity checksum of the stored bytes
    pub checksum: u64,
}

impl CacheEntry {
    #[inline]
    pub fn is_compressed(&self) -> bool {
        self.compression != CompressionAlgorithm::None
    }

    /// Time since creation
    pub fn age(&self, now: DateTime<Utc>) -> ChronoDuration {
        now.signed_duration_since(self.created_at)
    }

    /// Time since the last read or cache hit
    pub fn idle(&self, now: DateTime<Utc>) -> ChronoDuration {
        now.signed_duration_since(self.last_accessed)
    }

    /// Created more than `limit` ago
    pub fn is_older_than(&self, now: DateTime<Utc>, limit: std::time::Duration) -> bool {
        exceeds(self.age(now), limit)
    }

    /// Not accessed for more than `limit`
    pub fn is_idle_longer_than(&self, now: DateTime<Utc>, limit: std::time::Duration) -> bool {
        exceeds(self.idle(now), limit)
    }

    /// Whether the spans cover the whole content
    pub fn is_complete(&self) -> bool {
        match self.content_length {
            Some(len) => self.spans.covers(ByteRange::new(0, len)),
            None => false,
        }
    }

    /// Stored / original ratio (1.0 = uncompressed)
    pub fn compression_ratio(&self) -> f64 {
        if self.original_size == 0 {
            1.0
        } else {
            self.size_bytes as f64 / self.original_size as f64
        }
    }

    /// Record an access
    pub fn record_access(&mut self, now: DateTime<Utc>) {
        self.last_accessed = now;
        self.access_count += 1;
    }
}

// Negative spans (clock skew) never exceed a limit
fn exceeds(elapsed: ChronoDuration, limit: std::time::Duration) -> bool {
    elapsed.to_std().map(|e| e > limit).unwrap_or(false)
}

/// Fast non-cryptographic checksum of stored bytes (FxHash)
#[inline]
pub fn content_checksum(bytes: &[u8]) -> u64 {
    const SEED: u64 = 0x517cc1b727220a95;
    let mut hash = SEED;
    for &byte in bytes {
        hash = hash.rotate_left(5) ^ (byte as u64);
        hash = hash.wrapping_mul(SEED);
    }
    hash
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn make_entry(content_length: Option<u64>, spans: &[(u64, u64)]) -> CacheEntry {
        let now = Utc::now();
        CacheEntry {
            key: CacheKey::from_locator("movie.mp4"),
            locator: "movie.mp4".into(),
            size_bytes: 50,
            original_size: 100,
            created_at: now,
            last_accessed: now,
            access_count: 1,
            priority: Priority::Normal,
            compression: CompressionAlgorithm::Lz4,
            spans: SpanSet::from_ranges(spans.iter().map(|&(s, e)| ByteRange::new(s, e))),
            content_length,
            checksum: 0,
        }
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::Normal < Priority::High);
        assert!(Priority::High < Priority::Critical);
        assert!(!Priority::Low.may_evict_others());
        assert!(Priority::Normal.may_evict_others());
        assert!(Priority::High.may_evict_others());
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
        assert_eq!(" low ".parse::<Priority>().unwrap(), Priority::Low);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn test_span_merge() {
        let mut set = SpanSet::new();
        set.insert(ByteRange::new(0, 10));
        set.insert(ByteRange::new(20, 30));
        assert_eq!(set.ranges().len(), 2);

        // Adjacent range bridges both
        set.insert(ByteRange::new(10, 20));
        assert_eq!(set.ranges(), &[ByteRange::new(0, 30)]);
        assert_eq!(set.covered_bytes(), 30);
    }

    #[test]
    fn test_span_ignores_empty() {
        let mut set = SpanSet::new();
        set.insert(ByteRange::new(5, 5));
        assert!(set.is_empty());
    }

    #[test]
    fn test_span_coverage() {
        let set = SpanSet::from_ranges([ByteRange::new(0, 100), ByteRange::new(200, 300)]);
        assert!(set.covers(ByteRange::new(10, 90)));
        assert!(set.covers(ByteRange::new(200, 300)));
        assert!(!set.covers(ByteRange::new(90, 210)));
    }

    #[test]
    fn test_http_range_header() {
        assert_eq!(ByteRange::new(0, 1024).to_http_header(), "bytes=0-1023");
    }

    #[test]
    fn test_entry_completeness() {
        assert!(make_entry(Some(100), &[(0, 100)]).is_complete());
        assert!(!make_entry(Some(100), &[(0, 40)]).is_complete());
        assert!(!make_entry(None, &[(0, 100)]).is_complete());
    }

    #[test]
    fn test_entry_access_and_ratio() {
        let mut entry = make_entry(Some(100), &[(0, 100)]);
        assert!((entry.compression_ratio() - 0.5).abs() < f64::EPSILON);
        assert!(entry.is_compressed());

        let later = entry.last_accessed + ChronoDuration::seconds(5);
        entry.record_access(later);
        assert_eq!(entry.access_count, 2);
        assert_eq!(entry.last_accessed, later);
    }

    #[test]
    fn test_age_limits() {
        let mut entry = make_entry(Some(100), &[(0, 100)]);
        let now = Utc::now();
        entry.created_at = now - ChronoDuration::days(40);
        entry.last_accessed = now - ChronoDuration::days(1);

        let month = std::time::Duration::from_secs(30 * 86_400);
        assert!(entry.is_older_than(now, month));
        assert!(!entry.is_idle_longer_than(now, month));

        // Timestamps in the future never count as old
        entry.created_at = now + ChronoDuration::hours(1);
        assert!(!entry.is_older_than(now, std::time::Duration::ZERO));
    }

    #[test]
    fn test_checksum_detects_change() {
        let a = content_checksum(b"segment-bytes");
        let b = content_checksum(b"segment-bytez");
        assert_ne!(a, b);
        assert_eq!(a, content_checksum(b"segment-bytes"));
    }
}
