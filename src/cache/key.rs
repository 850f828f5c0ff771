//! Cache Keying
//!
//! Deterministic, content-address style keys derived from content locators.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Cache key - lowercase hex SHA-256 of the (trimmed) locator
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a content locator
    pub fn from_locator(locator: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(locator.trim().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Wrap an already-derived key (e.g. read back from an index or snapshot)
    ///
    /// Returns `None` unless the input is a 64-character hex digest.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.len() == 64 && raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(Self(raw.to_ascii_lowercase()))
        } else {
            None
        }
    }

    /// Full hex digest
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines
    #[inline]
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_identical_locators_same_key() {
        let a = CacheKey::from_locator("https://cdn.example.com/movie.mp4");
        let b = CacheKey::from_locator("https://cdn.example.com/movie.mp4");
        assert_eq!(a, b);
    }

    #[test]
    fn test_surrounding_whitespace_ignored() {
        let a = CacheKey::from_locator("  /sdcard/Movies/clip.mkv\n");
        let b = CacheKey::from_locator("/sdcard/Movies/clip.mkv");
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_locators_distinct_keys() {
        let keys: HashSet<CacheKey> = (0..10_000)
            .map(|i| CacheKey::from_locator(&format!("https://cdn.example.com/ep-{}.mp4", i)))
            .collect();
        assert_eq!(keys.len(), 10_000);
    }

    #[test]
    fn test_key_shape() {
        let key = CacheKey::from_locator("file:///tmp/a.mp4");
        assert_eq!(key.as_str().len(), 64);
        assert_eq!(key.short().len(), 12);
        assert!(key.as_str().starts_with(key.short()));
    }

    #[test]
    fn test_parse_roundtrip() {
        let key = CacheKey::from_locator("x");
        assert_eq!(CacheKey::parse(key.as_str()), Some(key.clone()));
        assert_eq!(CacheKey::parse(&key.as_str().to_uppercase()), Some(key));
        assert_eq!(CacheKey::parse("not-a-key"), None);
        assert_eq!(CacheKey::parse(&"g".repeat(64)), None);
    }

    #[test]
    fn test_serde_transparent() {
        let key = CacheKey::from_locator("x");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", key.as_str()));
    }
}
