//! Cache Backup Snapshots
//!
//! Versioned JSON export of entry metadata, aggregate metrics and the active
//! configuration. Blobs are not part of a snapshot; importing one restores
//! metadata for entries still present on the medium.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::analytics::MetricsSnapshot;
use super::config::CacheConfig;
use super::entry::CacheEntry;
use crate::error::{Error, Result};

/// Snapshot format written by this version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Exported cache state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSnapshot {
    pub version: u32,
    pub snapshot_id: Uuid,
    pub exported_at: DateTime<Utc>,
    pub config: CacheConfig,
    pub metrics: MetricsSnapshot,
    pub entries: Vec<CacheEntry>,
}

impl CacheSnapshot {
    pub fn new(config: CacheConfig, metrics: MetricsSnapshot, mut entries: Vec<CacheEntry>) -> Self {
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Self {
            version: SNAPSHOT_VERSION,
            snapshot_id: Uuid::new_v4(),
            exported_at: Utc::now(),
            config,
            metrics,
            entries,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse and validate; any problem rejects the snapshot wholesale
    pub fn from_json(raw: &str) -> Result<Self> {
        let snapshot: CacheSnapshot = serde_json::from_str(raw)
            .map_err(|e| Error::InvalidData(format!("malformed snapshot: {}", e)))?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != SNAPSHOT_VERSION {
            return Err(Error::InvalidData(format!(
                "unsupported snapshot version {} (expected {})",
                self.version, SNAPSHOT_VERSION
            )));
        }
        if self.exported_at.timestamp() <= 0 {
            return Err(Error::InvalidData(format!(
                "snapshot timestamp {} is not positive",
                self.exported_at
            )));
        }
        if self.entries.is_empty() {
            return Err(Error::InvalidData("snapshot contains no entries".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::compression::CompressionAlgorithm;
    use crate::cache::entry::{Priority, SpanSet};
    use crate::cache::key::CacheKey;
    use assert_matches::assert_matches;

    fn entry(locator: &str) -> CacheEntry {
        let now = Utc::now();
        CacheEntry {
            key: CacheKey::from_locator(locator),
            locator: locator.into(),
            size_bytes: 10,
            original_size: 10,
            created_at: now,
            last_accessed: now,
            access_count: 3,
            priority: Priority::High,
            compression: CompressionAlgorithm::None,
            spans: SpanSet::new(),
            content_length: None,
            checksum: 7,
        }
    }

    #[test]
    fn test_json_roundtrip_preserves_entries() {
        let snapshot = CacheSnapshot::new(
            CacheConfig::default(),
            MetricsSnapshot::default(),
            vec![entry("b"), entry("a")],
        );
        let json = snapshot.to_json().unwrap();
        assert!(json.contains("\"snapshotId\""));

        let parsed = CacheSnapshot::from_json(&json).unwrap();
        assert_eq!(parsed, snapshot);
    }

    #[test]
    fn test_rejects_empty_entries() {
        let snapshot = CacheSnapshot::new(CacheConfig::default(), MetricsSnapshot::default(), vec![]);
        let json = snapshot.to_json().unwrap();
        assert_matches!(CacheSnapshot::from_json(&json), Err(Error::InvalidData(_)));
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut snapshot =
            CacheSnapshot::new(CacheConfig::default(), MetricsSnapshot::default(), vec![entry("a")]);
        snapshot.version = 99;
        let json = snapshot.to_json().unwrap();
        assert_matches!(CacheSnapshot::from_json(&json), Err(Error::InvalidData(msg)) if msg.contains("99"));
    }

    #[test]
    fn test_rejects_epoch_timestamp() {
        let mut snapshot =
            CacheSnapshot::new(CacheConfig::default(), MetricsSnapshot::default(), vec![entry("a")]);
        snapshot.exported_at = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        assert_matches!(snapshot.validate(), Err(Error::InvalidData(_)));
    }

    #[test]
    fn test_rejects_garbage() {
        assert_matches!(CacheSnapshot::from_json("{not json"), Err(Error::InvalidData(_)));
        assert_matches!(CacheSnapshot::from_json("{}"), Err(Error::InvalidData(_)));
    }
}
