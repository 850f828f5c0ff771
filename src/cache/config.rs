//! Cache Configuration
//!
//! Immutable configuration snapshot owned by the orchestrator. Loadable from
//! YAML; durations use the compact `30s` / `15m` / `1h` / `7d` notation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default cache budget (500MB)
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 500 * 1024 * 1024;

/// Placeholder content size when the source cannot report one (50MB)
pub const DEFAULT_CONTENT_SIZE: u64 = 50 * 1024 * 1024;

/// Default segment size (1MB)
pub const DEFAULT_SEGMENT_SIZE: u64 = 1024 * 1024;

const DAY_SECS: u64 = 24 * 60 * 60;

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    /// Dedicated directory holding blobs and the index
    pub cache_dir: PathBuf,
    /// Hard budget for the sum of stored entry sizes
    pub max_cache_size_bytes: u64,
    pub compression_enabled: bool,
    pub prefetching_enabled: bool,
    /// Period of the auto-optimizer loop
    #[serde(with = "duration_str")]
    pub auto_optimize_interval: Duration,
    /// Entries created longer ago than this are expired
    #[serde(with = "duration_str")]
    pub max_entry_age: Duration,
    /// Payloads above this size are always compressed (when compression is enabled)
    pub compression_threshold_bytes: u64,
    /// Period of the health monitor loop
    #[serde(with = "duration_str")]
    pub health_check_interval: Duration,
    /// Entries not accessed for this long count as unused
    #[serde(with = "duration_str")]
    pub unused_entry_age: Duration,
    /// Unit of partial caching
    pub segment_size_bytes: u64,
    /// Number of opening segments cached by the smart-segments strategy
    pub smart_segment_count: u32,
    /// Size assumed when the source cannot report a content length
    pub default_content_size_bytes: u64,
    /// Upper bound on the content-length probe
    #[serde(with = "duration_str")]
    pub probe_timeout: Duration,
    /// Upper bound on fetching one segment from the source
    #[serde(with = "duration_str")]
    pub fetch_timeout: Duration,
    /// Upper bound on a single blob read/write against the backing medium
    #[serde(with = "duration_str")]
    pub storage_timeout: Duration,
    /// Concurrent prefetch operations
    pub prefetch_concurrency: usize,
    /// Predictions issued per observed access
    pub prefetch_depth: usize,
    /// Utilization at which optimization turns aggressive and prefetching pauses
    pub high_watermark: f64,
    /// Utilization a forced optimization evicts down to
    pub low_watermark: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: std::env::temp_dir().join("mediacache").join("video_cache"),
            max_cache_size_bytes: DEFAULT_MAX_CACHE_SIZE,
            compression_enabled: true,
            prefetching_enabled: true,
            auto_optimize_interval: Duration::from_secs(60 * 60),
            max_entry_age: Duration::from_secs(7 * DAY_SECS),
            compression_threshold_bytes: 1024 * 1024,
            health_check_interval: Duration::from_secs(30),
            unused_entry_age: Duration::from_secs(30 * DAY_SECS),
            segment_size_bytes: DEFAULT_SEGMENT_SIZE,
            smart_segment_count: 4,
            default_content_size_bytes: DEFAULT_CONTENT_SIZE,
            probe_timeout: Duration::from_millis(250),
            fetch_timeout: Duration::from_secs(30),
            storage_timeout: Duration::from_secs(5),
            prefetch_concurrency: 2,
            prefetch_depth: 2,
            high_watermark: 0.90,
            low_watermark: 0.80,
        }
    }
}

impl CacheConfig {
    /// Config rooted at a specific cache directory
    pub fn with_cache_dir(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Default::default()
        }
    }

    /// Load from a YAML file; missing fields take their defaults
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Parse from a YAML document
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: CacheConfig =
            serde_yaml::from_str(raw).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the cache cannot operate under
    pub fn validate(&self) -> Result<()> {
        if self.max_cache_size_bytes == 0 {
            return Err(Error::Config("maxCacheSizeBytes must be positive".into()));
        }
        if self.segment_size_bytes == 0 {
            return Err(Error::Config("segmentSizeBytes must be positive".into()));
        }
        if self.default_content_size_bytes == 0 {
            return Err(Error::Config(
                "defaultContentSizeBytes must be positive".into(),
            ));
        }
        if self.smart_segment_count == 0 {
            return Err(Error::Config("smartSegmentCount must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.low_watermark)
            || !(0.0..=1.0).contains(&self.high_watermark)
            || self.low_watermark > self.high_watermark
        {
            return Err(Error::Config(format!(
                "watermarks must satisfy 0 <= low ({}) <= high ({}) <= 1",
                self.low_watermark, self.high_watermark
            )));
        }
        for (name, value) in [
            ("autoOptimizeInterval", self.auto_optimize_interval),
            ("healthCheckInterval", self.health_check_interval),
            ("storageTimeout", self.storage_timeout),
            ("fetchTimeout", self.fetch_timeout),
        ] {
            if value.is_zero() {
                return Err(Error::Config(format!("{} must be non-zero", name)));
            }
        }
        if self.prefetch_concurrency == 0 {
            return Err(Error::Config("prefetchConcurrency must be positive".into()));
        }
        Ok(())
    }
}

/// Parse a compact duration string ("30s", "5m", "1h", "7d", "1h30m")
///
/// A bare number is taken as seconds; an `ms` suffix denotes milliseconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::DurationParse("empty duration string".to_string()));
    }

    if let Some(ms) = s.strip_suffix("ms") {
        let millis: u64 = ms
            .parse()
            .map_err(|_| Error::DurationParse(format!("invalid number in duration: {}", s)))?;
        return Ok(Duration::from_millis(millis));
    }

    let mut total_secs: u64 = 0;
    let mut num_buf = String::new();

    for c in s.chars() {
        if c.is_ascii_digit() {
            num_buf.push(c);
        } else {
            let num: u64 = num_buf
                .parse()
                .map_err(|_| Error::DurationParse(format!("invalid number in duration: {}", s)))?;
            num_buf.clear();

            let multiplier = match c {
                'd' | 'D' => DAY_SECS,
                'h' | 'H' => 3600,
                'm' | 'M' => 60,
                's' | 'S' => 1,
                _ => {
                    return Err(Error::DurationParse(format!(
                        "unknown duration unit: {}",
                        c
                    )))
                }
            };

            total_secs += num * multiplier;
        }
    }

    if !num_buf.is_empty() {
        let num: u64 = num_buf
            .parse()
            .map_err(|_| Error::DurationParse(format!("invalid number in duration: {}", s)))?;
        total_secs += num;
    }

    Ok(Duration::from_secs(total_secs))
}

/// Render a duration in the compact notation accepted by [`parse_duration`]
pub fn format_duration(d: Duration) -> String {
    if d.subsec_millis() != 0 || d.as_secs() == 0 {
        return format!("{}ms", d.as_millis());
    }
    let secs = d.as_secs();
    if secs % DAY_SECS == 0 {
        format!("{}d", secs / DAY_SECS)
    } else if secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = CacheConfig::default();
        config.validate().unwrap();
        assert_eq!(config.max_cache_size_bytes, 500 * 1024 * 1024);
        assert_eq!(config.health_check_interval, Duration::from_secs(30));
        assert_eq!(config.auto_optimize_interval, Duration::from_secs(3600));
        assert_eq!(config.unused_entry_age, Duration::from_secs(30 * 86400));
        assert!(config.cache_dir.ends_with("video_cache"));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("7d").unwrap(), Duration::from_secs(7 * 86400));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10x").is_err());
    }

    #[test]
    fn test_format_duration_roundtrip() {
        for d in [
            Duration::from_millis(250),
            Duration::from_secs(45),
            Duration::from_secs(300),
            Duration::from_secs(3600),
            Duration::from_secs(7 * 86400),
        ] {
            assert_eq!(parse_duration(&format_duration(d)).unwrap(), d);
        }
    }

    #[test]
    fn test_yaml_overrides_and_defaults() {
        let yaml = r#"
cacheDir: /data/media/video_cache
maxCacheSizeBytes: 1048576
compressionEnabled: false
healthCheckInterval: 10s
maxEntryAge: 14d
"#;
        let config = CacheConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.cache_dir, PathBuf::from("/data/media/video_cache"));
        assert_eq!(config.max_cache_size_bytes, 1024 * 1024);
        assert!(!config.compression_enabled);
        assert_eq!(config.health_check_interval, Duration::from_secs(10));
        assert_eq!(config.max_entry_age, Duration::from_secs(14 * 86400));
        // Untouched fields keep defaults
        assert!(config.prefetching_enabled);
        assert_eq!(config.segment_size_bytes, DEFAULT_SEGMENT_SIZE);
    }

    #[test]
    fn test_yaml_rejects_bad_duration() {
        let err = CacheConfig::from_yaml_str("healthCheckInterval: soon").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validate_rejects_inverted_watermarks() {
        let config = CacheConfig {
            high_watermark: 0.5,
            low_watermark: 0.8,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_budget() {
        let config = CacheConfig {
            max_cache_size_bytes: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_file_loading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.yaml");
        std::fs::write(&path, "prefetchingEnabled: false\n").unwrap();

        let config = CacheConfig::from_yaml_file(&path).unwrap();
        assert!(!config.prefetching_enabled);

        assert!(CacheConfig::from_yaml_file(dir.path().join("missing.yaml")).is_err());
    }
}
