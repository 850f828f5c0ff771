//! Storage Backend
//!
//! Durable key → blob storage with bounded total size.
//!
//! # Design
//!
//! - In-memory index and size accounting behind one mutex
//! - Writes reserve space first, then hit the medium, then commit; a failed
//!   write releases its reservation, so the budget can never be overshot by
//!   a race between a write and a concurrent eviction
//! - Pluggable [`BlobIo`] for the medium (local directory, in-memory)
//! - Every removal decrements the tracked size exactly once and is reported
//!   to [`CacheAnalytics`]

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::analytics::CacheAnalytics;
use super::compression::CompressionAlgorithm;
use super::entry::{content_checksum, CacheEntry, Priority, SpanSet};
use super::key::CacheKey;
use crate::error::{Error, Result};

const BLOB_DIR: &str = "blobs";
const BLOB_EXT: &str = "blob";
const TMP_EXT: &str = "tmp";
const INDEX_FILE: &str = "index.json";
const INDEX_VERSION: u32 = 1;

// =============================================================================
// Blob I/O Port
// =============================================================================

/// Raw blob medium underneath the store
#[async_trait]
pub trait BlobIo: Send + Sync {
    /// Prepare the medium (create directories, sweep temp files)
    async fn init(&self) -> Result<()>;

    /// Read a blob
    async fn read(&self, key: &CacheKey) -> Result<Option<Bytes>>;

    /// Write (or replace) a blob
    async fn write(&self, key: &CacheKey, data: Bytes) -> Result<()>;

    /// Delete a blob; `false` if it did not exist
    async fn delete(&self, key: &CacheKey) -> Result<bool>;

    /// Keys of all blobs present on the medium
    async fn list(&self) -> Result<Vec<CacheKey>>;

    /// Load the persisted entry index
    async fn load_index(&self) -> Result<Vec<CacheEntry>>;

    /// Persist the entry index
    async fn save_index(&self, entries: Vec<CacheEntry>) -> Result<()>;

    /// Human-readable location for logs
    fn describe(&self) -> String;
}

#[derive(Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    entries: Vec<CacheEntry>,
}

/// Blobs as files under a dedicated cache directory
///
/// ```text
/// <root>/index.json
/// <root>/blobs/<key>.blob
/// ```
pub struct DiskBlobIo {
    root: PathBuf,
}

impl DiskBlobIo {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_dir(&self) -> PathBuf {
        self.root.join(BLOB_DIR)
    }

    fn blob_path(&self, key: &CacheKey) -> PathBuf {
        self.blob_dir().join(format!("{}.{}", key, BLOB_EXT))
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
        let tmp = path.with_extension(TMP_EXT);
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl BlobIo for DiskBlobIo {
    async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(self.blob_dir()).await?;

        let mut dir = tokio::fs::read_dir(self.blob_dir()).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) == Some(TMP_EXT) {
                debug!("Removing interrupted write {}", path.display());
                tokio::fs::remove_file(&path).await?;
            }
        }
        Ok(())
    }

    async fn read(&self, key: &CacheKey) -> Result<Option<Bytes>> {
        match tokio::fs::read(self.blob_path(key)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, key: &CacheKey, data: Bytes) -> Result<()> {
        Self::write_atomic(&self.blob_path(key), &data).await
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        match tokio::fs::remove_file(self.blob_path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<CacheKey>> {
        let mut keys = Vec::new();
        let mut dir = tokio::fs::read_dir(self.blob_dir()).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(BLOB_EXT) {
                continue;
            }
            if let Some(key) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(CacheKey::parse)
            {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    async fn load_index(&self) -> Result<Vec<CacheEntry>> {
        let raw = match tokio::fs::read(self.index_path()).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice::<IndexFile>(&raw) {
            Ok(index) if index.version == INDEX_VERSION => Ok(index.entries),
            Ok(index) => {
                warn!(
                    "Ignoring cache index with unsupported version {}",
                    index.version
                );
                Ok(Vec::new())
            }
            Err(e) => {
                warn!("Ignoring unreadable cache index: {}", e);
                Ok(Vec::new())
            }
        }
    }

    async fn save_index(&self, entries: Vec<CacheEntry>) -> Result<()> {
        let index = IndexFile {
            version: INDEX_VERSION,
            entries,
        };
        let raw = serde_json::to_vec_pretty(&index)?;
        Self::write_atomic(&self.index_path(), &raw).await
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

/// In-memory medium for tests and embedding
///
/// Supports fault injection so callers can exercise corruption and
/// unresponsive-medium paths.
#[derive(Default)]
pub struct InMemoryBlobIo {
    blobs: DashMap<CacheKey, Bytes>,
    index: Mutex<Vec<CacheEntry>>,
    fail_init: AtomicBool,
    write_delay_ms: AtomicU64,
}

impl InMemoryBlobIo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `init` fail as if the medium were unavailable
    pub fn fail_init(&self, fail: bool) {
        self.fail_init.store(fail, Ordering::Relaxed);
    }

    /// Delay every write, simulating an unresponsive medium
    pub fn set_write_delay(&self, delay: Duration) {
        self.write_delay_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);
    }

    /// Overwrite a blob in place without touching the index
    pub fn corrupt(&self, key: &CacheKey, data: Bytes) -> bool {
        match self.blobs.get_mut(key) {
            Some(mut blob) => {
                *blob = data;
                true
            }
            None => false,
        }
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.len()
    }

    pub fn contains_blob(&self, key: &CacheKey) -> bool {
        self.blobs.contains_key(key)
    }

    pub fn persisted_index(&self) -> Vec<CacheEntry> {
        self.index.lock().clone()
    }
}

#[async_trait]
impl BlobIo for InMemoryBlobIo {
    async fn init(&self) -> Result<()> {
        if self.fail_init.load(Ordering::Relaxed) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "medium unavailable",
            )));
        }
        Ok(())
    }

    async fn read(&self, key: &CacheKey) -> Result<Option<Bytes>> {
        Ok(self.blobs.get(key).map(|b| b.clone()))
    }

    async fn write(&self, key: &CacheKey, data: Bytes) -> Result<()> {
        let delay = self.write_delay_ms.load(Ordering::Relaxed);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.blobs.insert(key.clone(), data);
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.blobs.remove(key).is_some())
    }

    async fn list(&self) -> Result<Vec<CacheKey>> {
        Ok(self.blobs.iter().map(|b| b.key().clone()).collect())
    }

    async fn load_index(&self) -> Result<Vec<CacheEntry>> {
        Ok(self.index.lock().clone())
    }

    async fn save_index(&self, entries: Vec<CacheEntry>) -> Result<()> {
        *self.index.lock() = entries;
        Ok(())
    }

    fn describe(&self) -> String {
        "in-memory".to_string()
    }
}

// =============================================================================
// Blob Store
// =============================================================================

/// A new entry to be written
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub key: CacheKey,
    pub locator: String,
    /// Bytes as stored (already compressed if `compression` says so)
    pub data: Bytes,
    pub original_size: u64,
    pub priority: Priority,
    pub compression: CompressionAlgorithm,
    pub spans: SpanSet,
    pub content_length: Option<u64>,
}

/// Result of a write
#[derive(Debug, Clone)]
pub enum PutOutcome {
    /// Entry committed
    Stored(CacheEntry),
    /// Key already cached or being cached by a concurrent writer
    AlreadyPresent,
}

/// Stored bytes plus their metadata
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub entry: CacheEntry,
    pub data: Bytes,
}

#[derive(Default)]
struct StoreState {
    entries: HashMap<CacheKey, CacheEntry>,
    /// Committed entry sizes plus in-flight reservations
    used: u64,
    pending_writes: HashSet<CacheKey>,
    pending_deletes: HashSet<CacheKey>,
    dirty: bool,
}

/// Bounded blob store with LRU eviction
pub struct BlobStore {
    io: Arc<dyn BlobIo>,
    capacity: u64,
    storage_timeout: Duration,
    analytics: Arc<CacheAnalytics>,
    state: Mutex<StoreState>,
}

impl BlobStore {
    /// Open the store: prepare the medium, load the index, reconcile it
    /// against the blobs actually present
    pub async fn open(
        io: Arc<dyn BlobIo>,
        capacity: u64,
        storage_timeout: Duration,
        analytics: Arc<CacheAnalytics>,
    ) -> Result<Self> {
        let location = io.describe();
        io.init()
            .await
            .map_err(|e| Error::Initialization(format!("{}: {}", location, e)))?;

        let indexed = io
            .load_index()
            .await
            .map_err(|e| Error::Initialization(format!("{}: {}", location, e)))?;
        let on_medium: HashSet<CacheKey> = io
            .list()
            .await
            .map_err(|e| Error::Initialization(format!("{}: {}", location, e)))?
            .into_iter()
            .collect();

        let mut state = StoreState::default();
        let mut dropped = 0usize;
        for entry in indexed {
            if on_medium.contains(&entry.key) {
                state.used += entry.size_bytes;
                state.entries.insert(entry.key.clone(), entry);
            } else {
                dropped += 1;
            }
        }
        state.dirty = dropped > 0;

        let orphans: Vec<CacheKey> = on_medium
            .into_iter()
            .filter(|k| !state.entries.contains_key(k))
            .collect();
        for key in &orphans {
            if let Err(e) = io.delete(key).await {
                warn!("Failed to remove orphaned blob {}: {}", key.short(), e);
            }
        }

        info!(
            "Opened cache store at {}: {} entries, {} bytes (dropped {} stale index entries, {} orphaned blobs)",
            location,
            state.entries.len(),
            state.used,
            dropped,
            orphans.len()
        );

        let store = Self {
            io,
            capacity,
            storage_timeout,
            analytics,
            state: Mutex::new(state),
        };

        // Budget may have shrunk since the index was written
        if store.current_size_bytes() > capacity {
            let mut evicted = store.evict_to(capacity, Priority::Critical).await?;
            if store.current_size_bytes() > capacity {
                // The budget is hard; Critical entries go too, LRU first
                evicted.extend(store.evict_lru_to(capacity, |_| true).await?);
            }
            store.persist_index().await.map_err(|e| {
                Error::Initialization(format!("{}: {}", location, e))
            })?;
            info!(
                "Evicted {} entries to fit the configured budget of {} bytes",
                evicted.len(),
                capacity
            );
        }

        Ok(store)
    }

    async fn with_timeout<T>(
        &self,
        operation: &str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.storage_timeout, fut)
            .await
            .map_err(|_| Error::timeout(operation, self.storage_timeout))?
    }

    /// Write an entry, reserving its space first
    ///
    /// Fails with [`Error::InsufficientSpace`] without touching the medium when
    /// the blob does not fit under the budget.
    pub async fn put(&self, new: NewEntry) -> Result<PutOutcome> {
        let size = new.data.len() as u64;
        {
            let mut state = self.state.lock();
            if state.entries.contains_key(&new.key) || state.pending_writes.contains(&new.key) {
                return Ok(PutOutcome::AlreadyPresent);
            }
            if state.pending_deletes.contains(&new.key) {
                return Err(Error::Internal(format!(
                    "entry {} is being removed",
                    new.key.short()
                )));
            }
            let available = self.capacity.saturating_sub(state.used);
            if size > available {
                return Err(Error::InsufficientSpace {
                    required: size,
                    available,
                });
            }
            state.used += size;
            state.pending_writes.insert(new.key.clone());
        }

        let result = self
            .with_timeout("blob write", self.io.write(&new.key, new.data.clone()))
            .await;

        if let Err(e) = result {
            {
                let mut state = self.state.lock();
                state.pending_writes.remove(&new.key);
                state.used -= size;
            }
            // The write may have landed partially
            if let Err(cleanup) = self.io.delete(&new.key).await {
                warn!(
                    "Failed to clean up partial blob {}: {}",
                    new.key.short(),
                    cleanup
                );
            }
            return Err(e);
        }

        let now = Utc::now();
        let entry = CacheEntry {
            key: new.key.clone(),
            locator: new.locator,
            size_bytes: size,
            original_size: new.original_size,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            priority: new.priority,
            compression: new.compression,
            spans: new.spans,
            content_length: new.content_length,
            checksum: content_checksum(&new.data),
        };

        let mut state = self.state.lock();
        state.pending_writes.remove(&new.key);
        state.entries.insert(new.key, entry.clone());
        state.dirty = true;
        debug!("Stored {} ({} bytes)", entry.key.short(), size);
        Ok(PutOutcome::Stored(entry))
    }

    /// Read an entry, bumping its recency
    ///
    /// Returns [`Error::CorruptEntry`] if the blob is missing or fails its
    /// checksum while still indexed.
    pub async fn get(&self, key: &CacheKey) -> Result<Option<StoredBlob>> {
        let entry = {
            let mut state = self.state.lock();
            let entry = match state.entries.get_mut(key) {
                Some(entry) => {
                    entry.record_access(Utc::now());
                    entry.clone()
                }
                None => return Ok(None),
            };
            state.dirty = true;
            entry
        };

        let data = self.with_timeout("blob read", self.io.read(key)).await?;
        match data {
            Some(data) => {
                if data.len() as u64 != entry.size_bytes || content_checksum(&data) != entry.checksum
                {
                    return Err(Error::CorruptEntry {
                        key: key.to_string(),
                        reason: "checksum mismatch".into(),
                    });
                }
                Ok(Some(StoredBlob { entry, data }))
            }
            None if self.contains(key) => Err(Error::CorruptEntry {
                key: key.to_string(),
                reason: "blob missing from medium".into(),
            }),
            None => Ok(None),
        }
    }

    /// Remove an entry; `None` if it was not present
    pub async fn remove(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let entry = {
            let mut state = self.state.lock();
            let entry = match state.entries.remove(key) {
                Some(entry) => entry,
                None => return Ok(None),
            };
            state.used -= entry.size_bytes;
            state.dirty = true;
            state.pending_deletes.insert(key.clone());
            entry
        };
        self.analytics.record_eviction(entry.size_bytes);

        let result = self
            .with_timeout("blob delete", self.io.delete(key))
            .await;
        self.state.lock().pending_deletes.remove(key);
        if let Err(e) = result {
            // Accounting is already settled; the orphan is swept on next open
            warn!("Failed to delete blob {}: {}", key.short(), e);
        }
        Ok(Some(entry))
    }

    /// Bump recency without reading
    pub fn touch(&self, key: &CacheKey) -> bool {
        let mut state = self.state.lock();
        let touched = match state.entries.get_mut(key) {
            Some(entry) => {
                entry.record_access(Utc::now());
                true
            }
            None => false,
        };
        if touched {
            state.dirty = true;
        }
        touched
    }

    /// Raise an entry's priority to at least `priority`; `true` if it changed
    pub fn raise_priority(&self, key: &CacheKey, priority: Priority) -> bool {
        let mut state = self.state.lock();
        let updated = match state.entries.get_mut(key) {
            Some(entry) if entry.priority < priority => {
                entry.priority = priority;
                true
            }
            _ => false,
        };
        if updated {
            state.dirty = true;
        }
        updated
    }

    /// Apply backed-up metadata to an existing entry
    pub fn restore_metadata(
        &self,
        key: &CacheKey,
        created_at: DateTime<Utc>,
        last_accessed: DateTime<Utc>,
        access_count: u64,
        priority: Priority,
    ) -> bool {
        let mut state = self.state.lock();
        let updated = match state.entries.get_mut(key) {
            Some(entry) => {
                entry.created_at = created_at;
                entry.last_accessed = last_accessed;
                entry.access_count = access_count;
                entry.priority = priority;
                true
            }
            None => false,
        };
        if updated {
            state.dirty = true;
        }
        updated
    }

    /// Evict least-recently-used entries strictly below `below` until
    /// `needed` bytes are available
    ///
    /// All-or-nothing: if the candidates cannot free enough, nothing is evicted.
    pub async fn evict_lru(&self, needed: u64, below: Priority) -> Result<Vec<CacheEntry>> {
        let victims = {
            let state = self.state.lock();
            let available = self.capacity.saturating_sub(state.used);
            if available >= needed {
                return Ok(Vec::new());
            }
            let mut shortfall = needed - available;

            let mut candidates: Vec<&CacheEntry> = state
                .entries
                .values()
                .filter(|e| e.priority < below)
                .collect();
            candidates.sort_by_key(|e| e.last_accessed);

            let mut victims = Vec::new();
            for entry in candidates {
                if shortfall == 0 {
                    break;
                }
                shortfall = shortfall.saturating_sub(entry.size_bytes);
                victims.push(entry.key.clone());
            }
            if shortfall > 0 {
                return Ok(Vec::new());
            }
            victims
        };

        self.remove_all(&victims).await
    }

    /// Evict least-recently-used entries below `protect` until usage is at
    /// most `target_bytes`
    pub async fn evict_to(&self, target_bytes: u64, protect: Priority) -> Result<Vec<CacheEntry>> {
        self.evict_lru_to(target_bytes, |e| e.priority < protect).await
    }

    async fn evict_lru_to(
        &self,
        target_bytes: u64,
        eligible: impl Fn(&CacheEntry) -> bool,
    ) -> Result<Vec<CacheEntry>> {
        let victims = {
            let state = self.state.lock();
            let mut excess = state.used.saturating_sub(target_bytes);
            let mut candidates: Vec<&CacheEntry> = state
                .entries
                .values()
                .filter(|e| eligible(*e))
                .collect();
            candidates.sort_by_key(|e| e.last_accessed);

            let mut victims = Vec::new();
            for entry in candidates {
                if excess == 0 {
                    break;
                }
                excess = excess.saturating_sub(entry.size_bytes);
                victims.push(entry.key.clone());
            }
            victims
        };

        self.remove_all(&victims).await
    }

    /// Remove a set of keys, returning the entries actually removed
    pub async fn remove_all(&self, keys: &[CacheKey]) -> Result<Vec<CacheEntry>> {
        let mut removed = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(entry) = self.remove(key).await? {
                removed.push(entry);
            }
        }
        Ok(removed)
    }

    /// Remove everything
    pub async fn clear(&self) -> Result<Vec<CacheEntry>> {
        let keys: Vec<CacheKey> = self.keys().into_iter().collect();
        self.remove_all(&keys).await
    }

    /// Write the index to the medium if anything changed
    pub async fn persist_index(&self) -> Result<bool> {
        let entries = {
            let mut state = self.state.lock();
            if !state.dirty {
                return Ok(false);
            }
            state.dirty = false;
            state.entries.values().cloned().collect::<Vec<_>>()
        };
        let count = entries.len();
        if let Err(e) = self
            .with_timeout("index write", self.io.save_index(entries))
            .await
        {
            self.state.lock().dirty = true;
            return Err(e);
        }
        debug!("Persisted cache index ({} entries)", count);
        Ok(true)
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    pub fn entry(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.state.lock().entries.get(key).cloned()
    }

    /// Snapshot of all entry metadata
    pub fn entries(&self) -> Vec<CacheEntry> {
        self.state.lock().entries.values().cloned().collect()
    }

    pub fn keys(&self) -> HashSet<CacheKey> {
        self.state.lock().entries.keys().cloned().collect()
    }

    /// Bytes in use, including in-flight reservations
    pub fn current_size_bytes(&self) -> u64 {
        self.state.lock().used
    }

    pub fn available_bytes(&self) -> u64 {
        self.capacity.saturating_sub(self.current_size_bytes())
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    pub fn utilization(&self) -> f64 {
        self.current_size_bytes() as f64 / self.capacity as f64
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::ByteRange;

    fn new_entry(locator: &str, size: usize, priority: Priority) -> NewEntry {
        NewEntry {
            key: CacheKey::from_locator(locator),
            locator: locator.to_string(),
            data: Bytes::from(vec![0xAB; size]),
            original_size: size as u64,
            priority,
            compression: CompressionAlgorithm::None,
            spans: SpanSet::from_ranges([ByteRange::new(0, size as u64)]),
            content_length: Some(size as u64),
        }
    }

    async fn open_memory(capacity: u64) -> (BlobStore, Arc<InMemoryBlobIo>, Arc<CacheAnalytics>) {
        let io = Arc::new(InMemoryBlobIo::new());
        let analytics = Arc::new(CacheAnalytics::new());
        let store = BlobStore::open(
            io.clone(),
            capacity,
            Duration::from_secs(1),
            analytics.clone(),
        )
        .await
        .unwrap();
        (store, io, analytics)
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let (store, _, _) = open_memory(1024).await;
        let new = new_entry("a.mp4", 100, Priority::Normal);
        let key = new.key.clone();

        let outcome = store.put(new).await.unwrap();
        assert!(matches!(outcome, PutOutcome::Stored(_)));
        assert_eq!(store.current_size_bytes(), 100);

        let blob = store.get(&key).await.unwrap().unwrap();
        assert_eq!(blob.data.len(), 100);
        assert_eq!(blob.entry.access_count, 1);
    }

    #[tokio::test]
    async fn test_duplicate_put_is_already_present() {
        let (store, _, _) = open_memory(1024).await;
        store.put(new_entry("a", 100, Priority::Normal)).await.unwrap();
        let outcome = store.put(new_entry("a", 100, Priority::Normal)).await.unwrap();
        assert!(matches!(outcome, PutOutcome::AlreadyPresent));
        assert_eq!(store.current_size_bytes(), 100);
    }

    #[tokio::test]
    async fn test_put_rejects_over_budget() {
        let (store, io, _) = open_memory(150).await;
        store.put(new_entry("a", 100, Priority::Normal)).await.unwrap();

        let err = store
            .put(new_entry("b", 100, Priority::Normal))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientSpace {
                required: 100,
                available: 50
            }
        ));
        assert_eq!(store.len(), 1);
        assert_eq!(io.blob_count(), 1);
        assert_eq!(store.current_size_bytes(), 100);
    }

    #[tokio::test]
    async fn test_remove_accounts_once() {
        let (store, io, analytics) = open_memory(1024).await;
        let new = new_entry("a", 100, Priority::Normal);
        let key = new.key.clone();
        store.put(new).await.unwrap();

        assert!(store.remove(&key).await.unwrap().is_some());
        assert!(store.remove(&key).await.unwrap().is_none());
        assert_eq!(store.current_size_bytes(), 0);
        assert_eq!(analytics.evictions(), 1);
        assert_eq!(analytics.space_freed(), 100);
        assert!(!io.contains_blob(&key));
    }

    #[tokio::test]
    async fn test_evict_lru_respects_priority_and_order() {
        let (store, _, _) = open_memory(300).await;
        for name in ["old", "mid", "new"] {
            store.put(new_entry(name, 100, Priority::Normal)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        store.touch(&CacheKey::from_locator("old"));

        let evicted = store.evict_lru(100, Priority::High).await.unwrap();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].locator, "mid");
        assert_eq!(store.available_bytes(), 100);
    }

    #[tokio::test]
    async fn test_evict_lru_all_or_nothing() {
        let (store, _, _) = open_memory(300).await;
        store.put(new_entry("low", 100, Priority::Low)).await.unwrap();
        store.put(new_entry("high", 200, Priority::High)).await.unwrap();

        // Only the Low entry is a candidate; it cannot free 250 bytes
        let evicted = store.evict_lru(250, Priority::Normal).await.unwrap();
        assert!(evicted.is_empty());
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_evict_to_never_touches_protected() {
        let (store, _, _) = open_memory(400).await;
        store.put(new_entry("a", 100, Priority::Normal)).await.unwrap();
        store.put(new_entry("b", 100, Priority::High)).await.unwrap();
        store.put(new_entry("c", 100, Priority::Critical)).await.unwrap();

        store.evict_to(0, Priority::Critical).await.unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.contains(&CacheKey::from_locator("c")));
    }

    #[tokio::test]
    async fn test_corrupt_blob_detected() {
        let (store, io, _) = open_memory(1024).await;
        let new = new_entry("a", 100, Priority::Normal);
        let key = new.key.clone();
        store.put(new).await.unwrap();

        io.corrupt(&key, Bytes::from(vec![0u8; 100]));
        let err = store.get(&key).await.unwrap_err();
        assert!(err.is_corruption());
    }

    #[tokio::test]
    async fn test_write_timeout_releases_reservation() {
        let io = Arc::new(InMemoryBlobIo::new());
        io.set_write_delay(Duration::from_millis(200));
        let store = BlobStore::open(
            io.clone(),
            1024,
            Duration::from_millis(20),
            Arc::new(CacheAnalytics::new()),
        )
        .await
        .unwrap();

        let err = store
            .put(new_entry("slow", 100, Priority::Normal))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert_eq!(store.current_size_bytes(), 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_open_fails_when_medium_unavailable() {
        let io = Arc::new(InMemoryBlobIo::new());
        io.fail_init(true);
        let result = BlobStore::open(
            io,
            1024,
            Duration::from_secs(1),
            Arc::new(CacheAnalytics::new()),
        )
        .await;
        assert!(matches!(result, Err(Error::Initialization(_))));
    }

    #[tokio::test]
    async fn test_disk_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let analytics = Arc::new(CacheAnalytics::new());
        let new = new_entry("https://cdn/a.mp4", 256, Priority::High);
        let key = new.key.clone();

        {
            let store = BlobStore::open(
                Arc::new(DiskBlobIo::new(dir.path())),
                4096,
                Duration::from_secs(1),
                analytics.clone(),
            )
            .await
            .unwrap();
            store.put(new).await.unwrap();
            assert!(store.persist_index().await.unwrap());
            assert!(!store.persist_index().await.unwrap());
        }

        // Orphan blob without an index entry is swept on open
        let orphan = CacheKey::from_locator("orphan");
        std::fs::write(
            dir.path().join(BLOB_DIR).join(format!("{}.{}", orphan, BLOB_EXT)),
            b"junk",
        )
        .unwrap();

        let store = BlobStore::open(
            Arc::new(DiskBlobIo::new(dir.path())),
            4096,
            Duration::from_secs(1),
            analytics,
        )
        .await
        .unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.current_size_bytes(), 256);
        let blob = store.get(&key).await.unwrap().unwrap();
        assert_eq!(blob.entry.priority, Priority::High);
        assert!(!dir
            .path()
            .join(BLOB_DIR)
            .join(format!("{}.{}", orphan, BLOB_EXT))
            .exists());
    }

    #[tokio::test]
    async fn test_open_shrinks_to_new_budget() {
        let io = Arc::new(InMemoryBlobIo::new());
        {
            let store = BlobStore::open(
                io.clone(),
                1000,
                Duration::from_secs(1),
                Arc::new(CacheAnalytics::new()),
            )
            .await
            .unwrap();
            for i in 0..5 {
                store
                    .put(new_entry(&format!("e{}", i), 100, Priority::Normal))
                    .await
                    .unwrap();
            }
            store.persist_index().await.unwrap();
        }

        let store = BlobStore::open(
            io,
            250,
            Duration::from_secs(1),
            Arc::new(CacheAnalytics::new()),
        )
        .await
        .unwrap();
        assert!(store.current_size_bytes() <= 250);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_open_budget_overrides_critical() {
        let io = Arc::new(InMemoryBlobIo::new());
        {
            let store = BlobStore::open(
                io.clone(),
                1000,
                Duration::from_secs(1),
                Arc::new(CacheAnalytics::new()),
            )
            .await
            .unwrap();
            for i in 0..5 {
                store
                    .put(new_entry(&format!("pinned{}", i), 100, Priority::Critical))
                    .await
                    .unwrap();
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            store.persist_index().await.unwrap();
        }

        let store = BlobStore::open(
            io.clone(),
            250,
            Duration::from_secs(1),
            Arc::new(CacheAnalytics::new()),
        )
        .await
        .unwrap();
        assert_eq!(store.current_size_bytes(), 200);
        assert!(store.utilization() <= 1.0);
        // Most recently written survive
        assert!(store.contains(&CacheKey::from_locator("pinned3")));
        assert!(store.contains(&CacheKey::from_locator("pinned4")));
        assert_eq!(io.blob_count(), 2);
        assert_eq!(io.persisted_index().len(), 2);
    }

    #[tokio::test]
    async fn test_raise_priority_never_lowers() {
        let (store, _, _) = open_memory(1024).await;
        let new = new_entry("a", 100, Priority::Low);
        let key = new.key.clone();
        store.put(new).await.unwrap();

        assert!(store.raise_priority(&key, Priority::High));
        assert!(!store.raise_priority(&key, Priority::Normal));
        assert_eq!(store.entry(&key).unwrap().priority, Priority::High);
        assert!(!store.raise_priority(&CacheKey::from_locator("missing"), Priority::High));
    }
}
