//! Cache Compression Support
//!
//! LZ4 compression of cached media bytes, falling back to uncompressed storage
//! whenever compression does not pay off.
//!
//! # Example
//!
//! ```
//! use mediacache::cache::compression::{CompressionManager, CompressionAlgorithm};
//!
//! let manager = CompressionManager::new();
//!
//! let data = b"Hello, this is test data that should compress well! Hello, this is test data that should compress well!";
//! let outcome = manager.compress(data);
//!
//! let decompressed = manager.decompress(&outcome.data, outcome.algorithm).unwrap();
//! assert_eq!(decompressed.as_ref(), data);
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// =============================================================================
// Compression Algorithm
// =============================================================================

/// Supported compression algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// No compression
    None,
    /// LZ4 - fast compression
    Lz4,
}

impl CompressionAlgorithm {
    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Lz4 => "lz4",
        }
    }
}

impl Default for CompressionAlgorithm {
    fn default() -> Self {
        CompressionAlgorithm::None
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Compression Configuration
// =============================================================================

/// Configuration for compression
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    /// Master switch; when off nothing is ever compressed
    pub enabled: bool,
    /// Payloads larger than this are compressed even if the strategy does not ask for it
    pub threshold_bytes: u64,
    /// LZ4 high-compression level
    pub level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_bytes: 1024 * 1024,
            level: 4,
        }
    }
}

// =============================================================================
// Compressor Trait
// =============================================================================

/// Trait for compression implementations
pub trait Compressor: Send + Sync {
    /// Get the algorithm identifier
    fn algorithm(&self) -> CompressionAlgorithm;

    /// Compress data
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress data
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// LZ4 block compressor; output carries the original size as a prefix
pub struct Lz4Compressor {
    level: i32,
}

impl Lz4Compressor {
    pub fn new() -> Self {
        Self { level: 4 }
    }

    pub fn with_level(level: i32) -> Self {
        Self { level }
    }
}

impl Default for Lz4Compressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor for Lz4Compressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Lz4
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::compress(
            data,
            Some(lz4::block::CompressionMode::HIGHCOMPRESSION(self.level)),
            true,
        )
        .map_err(|e| Error::CompressionFailed {
            algorithm: "lz4".into(),
            reason: e.to_string(),
        })
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::decompress(data, None).map_err(|e| Error::DecompressionFailed {
            algorithm: "lz4".into(),
            reason: e.to_string(),
        })
    }
}

// =============================================================================
// Compression Manager
// =============================================================================

/// Result of a compression attempt
#[derive(Debug, Clone)]
pub struct CompressionOutcome {
    /// Bytes to store
    pub data: Bytes,
    /// Algorithm actually applied
    pub algorithm: CompressionAlgorithm,
    /// Stored / original size (1.0 when stored uncompressed)
    pub ratio: f64,
}

/// Manager for compression operations with fallback support
pub struct CompressionManager {
    config: CompressionConfig,
    lz4: Lz4Compressor,
}

impl CompressionManager {
    /// Create a new compression manager with default config
    pub fn new() -> Self {
        Self::with_config(CompressionConfig::default())
    }

    /// Create with custom config
    pub fn with_config(config: CompressionConfig) -> Self {
        Self {
            lz4: Lz4Compressor::with_level(config.level),
            config,
        }
    }

    /// Whether a payload of `len` bytes should be compressed
    ///
    /// `mandated` is the strategy's own request for compression.
    pub fn should_compress(&self, len: u64, mandated: bool) -> bool {
        self.config.enabled && len > 0 && (mandated || len > self.config.threshold_bytes)
    }

    /// Compress with LZ4, storing uncompressed if that is not smaller or fails
    pub fn compress(&self, data: &[u8]) -> CompressionOutcome {
        match self.lz4.compress(data) {
            Ok(compressed) if compressed.len() < data.len() => CompressionOutcome {
                ratio: compressed.len() as f64 / data.len() as f64,
                data: Bytes::from(compressed),
                algorithm: CompressionAlgorithm::Lz4,
            },
            Ok(_) => Self::uncompressed(data),
            Err(e) => {
                tracing::warn!("Compression failed, storing uncompressed: {}", e);
                Self::uncompressed(data)
            }
        }
    }

    fn uncompressed(data: &[u8]) -> CompressionOutcome {
        CompressionOutcome {
            data: Bytes::copy_from_slice(data),
            algorithm: CompressionAlgorithm::None,
            ratio: 1.0,
        }
    }

    /// Decompress data; lossless and deterministic
    pub fn decompress(&self, data: &[u8], algorithm: CompressionAlgorithm) -> Result<Bytes> {
        match algorithm {
            CompressionAlgorithm::None => Ok(Bytes::copy_from_slice(data)),
            CompressionAlgorithm::Lz4 => Ok(Bytes::from(self.lz4.decompress(data)?)),
        }
    }

    /// Get configuration
    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }
}

impl Default for CompressionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TEST_DATA: &[u8] = b"Hello, this is test data that should compress well. \
        It has some repetition: Hello, this is test data that should compress well.";

    #[test]
    fn test_lz4_roundtrip() {
        let compressor = Lz4Compressor::new();

        let compressed = compressor.compress(TEST_DATA).unwrap();
        assert!(compressed.len() < TEST_DATA.len());

        let decompressed = compressor.decompress(&compressed).unwrap();
        assert_eq!(decompressed, TEST_DATA);
    }

    #[test]
    fn test_manager_reports_ratio() {
        let manager = CompressionManager::new();
        let data = vec![7u8; 64 * 1024];

        let outcome = manager.compress(&data);
        assert_eq!(outcome.algorithm, CompressionAlgorithm::Lz4);
        assert!(outcome.ratio < 0.1);
        assert_eq!(
            manager.decompress(&outcome.data, outcome.algorithm).unwrap().as_ref(),
            data.as_slice()
        );
    }

    #[test]
    fn test_incompressible_falls_back() {
        let manager = CompressionManager::new();
        let data = b"abc";

        let outcome = manager.compress(data);
        assert_eq!(outcome.algorithm, CompressionAlgorithm::None);
        assert_eq!(outcome.ratio, 1.0);
        assert_eq!(outcome.data.as_ref(), data);
        let restored = manager.decompress(&outcome.data, outcome.algorithm).unwrap();
        assert_eq!(restored.as_ref(), data);
    }

    #[test]
    fn test_should_compress() {
        let manager = CompressionManager::with_config(CompressionConfig {
            enabled: true,
            threshold_bytes: 1000,
            level: 4,
        });
        assert!(manager.should_compress(10, true));
        assert!(manager.should_compress(1001, false));
        assert!(!manager.should_compress(1000, false));
        assert!(!manager.should_compress(0, true));

        let disabled = CompressionManager::with_config(CompressionConfig {
            enabled: false,
            ..Default::default()
        });
        assert!(!disabled.should_compress(10 * 1024 * 1024, true));
    }

    #[test]
    fn test_corrupt_payload_fails() {
        let manager = CompressionManager::new();
        let outcome = manager.compress(&vec![1u8; 4096]);
        let mut damaged = outcome.data.to_vec();
        damaged.truncate(damaged.len() / 2);

        let err = manager.decompress(&damaged, CompressionAlgorithm::Lz4).unwrap_err();
        assert!(err.is_corruption());
    }

    proptest! {
        #[test]
        fn prop_roundtrip_is_lossless(data in proptest::collection::vec(any::<u8>(), 0..8192)) {
            let manager = CompressionManager::new();
            let outcome = manager.compress(&data);
            let restored = manager.decompress(&outcome.data, outcome.algorithm).unwrap();
            prop_assert_eq!(restored.as_ref(), data.as_slice());
        }
    }
}
