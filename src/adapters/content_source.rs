//! Content Source Adapters
//!
//! Implements the `ContentSource` port for local files, HTTP(S) origins and
//! in-memory fixtures, plus a router that dispatches by locator scheme.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use reqwest::header::RANGE;
use reqwest::StatusCode;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

use crate::cache::entry::ByteRange;
use crate::domain::ports::ContentSource;
use crate::error::{Error, Result};

fn scheme(locator: &str) -> Option<&str> {
    locator.split_once("://").map(|(scheme, _)| scheme)
}

// =============================================================================
// Local Files
// =============================================================================

/// Serves plain paths and `file://` locators from the local filesystem
#[derive(Debug, Clone, Default)]
pub struct FileContentSource;

impl FileContentSource {
    pub fn new() -> Self {
        Self
    }

    fn path(locator: &str) -> PathBuf {
        PathBuf::from(locator.strip_prefix("file://").unwrap_or(locator))
    }
}

#[async_trait]
impl ContentSource for FileContentSource {
    async fn content_length(&self, locator: &str) -> Result<Option<u64>> {
        let metadata = tokio::fs::metadata(Self::path(locator)).await?;
        Ok(Some(metadata.len()))
    }

    async fn fetch_range(&self, locator: &str, range: ByteRange) -> Result<Bytes> {
        let mut file = tokio::fs::File::open(Self::path(locator)).await?;
        file.seek(SeekFrom::Start(range.start)).await?;

        let mut buf = Vec::with_capacity(range.len() as usize);
        file.take(range.len()).read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

// =============================================================================
// HTTP(S)
// =============================================================================

/// Fetches byte ranges from HTTP origins with `Range` requests
#[derive(Debug, Clone)]
pub struct HttpContentSource {
    client: reqwest::Client,
}

impl HttpContentSource {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpContentSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentSource for HttpContentSource {
    async fn content_length(&self, locator: &str) -> Result<Option<u64>> {
        let response = self.client.head(locator).send().await?;
        if !response.status().is_success() {
            return Err(Error::ContentSource {
                locator: locator.to_string(),
                reason: format!("HEAD returned {}", response.status()),
            });
        }
        Ok(response.content_length())
    }

    async fn fetch_range(&self, locator: &str, range: ByteRange) -> Result<Bytes> {
        if range.is_empty() {
            return Ok(Bytes::new());
        }
        let response = self
            .client
            .get(locator)
            .header(RANGE, range.to_http_header())
            .send()
            .await?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT => read_window(response, 0, range.len()).await,
            StatusCode::RANGE_NOT_SATISFIABLE => Ok(Bytes::new()),
            StatusCode::OK => {
                // Origin ignored the Range header; read up to the window and
                // drop the connection
                debug!("{} does not support range requests", locator);
                read_window(response, range.start, range.len()).await
            }
            status => Err(Error::ContentSource {
                locator: locator.to_string(),
                reason: format!("GET returned {}", status),
            }),
        }
    }
}

/// Read `len` body bytes starting at `skip`, abandoning the rest of the body
async fn read_window(mut response: reqwest::Response, skip: u64, len: u64) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    let mut offset = 0u64;
    let end = skip.saturating_add(len);
    while offset < end {
        let Some(chunk) = response.chunk().await? else {
            break;
        };
        let chunk_end = offset + chunk.len() as u64;
        if chunk_end > skip {
            let from = skip.saturating_sub(offset) as usize;
            let to = (end.min(chunk_end) - offset) as usize;
            buf.extend_from_slice(&chunk[from..to]);
        }
        offset = chunk_end;
    }
    Ok(buf.freeze())
}

// =============================================================================
// Router
// =============================================================================

/// Dispatches locators to sources by scheme
///
/// Locators without a scheme go to the `file` route.
#[derive(Clone, Default)]
pub struct LocatorRouter {
    routes: HashMap<String, Arc<dyn ContentSource>>,
}

impl LocatorRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Router for local files and HTTP(S)
    pub fn standard() -> Self {
        let http: Arc<dyn ContentSource> = Arc::new(HttpContentSource::new());
        Self::new()
            .with_route("file", Arc::new(FileContentSource::new()))
            .with_route("http", http.clone())
            .with_route("https", http)
    }

    pub fn with_route(mut self, scheme: impl Into<String>, source: Arc<dyn ContentSource>) -> Self {
        self.routes.insert(scheme.into().to_ascii_lowercase(), source);
        self
    }

    fn route(&self, locator: &str) -> Result<&Arc<dyn ContentSource>> {
        let scheme = scheme(locator).unwrap_or("file").to_ascii_lowercase();
        self.routes
            .get(&scheme)
            .ok_or_else(|| Error::UnsupportedLocator(locator.to_string()))
    }
}

impl std::fmt::Debug for LocatorRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut schemes: Vec<&String> = self.routes.keys().collect();
        schemes.sort();
        f.debug_struct("LocatorRouter")
            .field("schemes", &schemes)
            .finish()
    }
}

#[async_trait]
impl ContentSource for LocatorRouter {
    async fn content_length(&self, locator: &str) -> Result<Option<u64>> {
        self.route(locator)?.content_length(locator).await
    }

    async fn fetch_range(&self, locator: &str, range: ByteRange) -> Result<Bytes> {
        self.route(locator)?.fetch_range(locator, range).await
    }
}

// =============================================================================
// In-Memory
// =============================================================================

/// In-memory content for tests and demos
#[derive(Debug, Default)]
pub struct InMemoryContentSource {
    content: DashMap<String, Bytes>,
    hide_length: AtomicBool,
    fetches: AtomicU64,
}

impl InMemoryContentSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, locator: impl Into<String>, data: impl Into<Bytes>) {
        self.content.insert(locator.into(), data.into());
    }

    pub fn remove(&self, locator: &str) -> bool {
        self.content.remove(locator).is_some()
    }

    /// Behave like an origin that cannot report content length
    pub fn hide_length(&self, hide: bool) {
        self.hide_length.store(hide, Ordering::Relaxed);
    }

    /// Number of range fetches served
    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    fn get(&self, locator: &str) -> Result<Bytes> {
        self.content
            .get(locator)
            .map(|c| c.clone())
            .ok_or_else(|| Error::ContentSource {
                locator: locator.to_string(),
                reason: "not found".into(),
            })
    }
}

#[async_trait]
impl ContentSource for InMemoryContentSource {
    async fn content_length(&self, locator: &str) -> Result<Option<u64>> {
        let data = self.get(locator)?;
        if self.hide_length.load(Ordering::Relaxed) {
            Ok(None)
        } else {
            Ok(Some(data.len() as u64))
        }
    }

    async fn fetch_range(&self, locator: &str, range: ByteRange) -> Result<Bytes> {
        let data = self.get(locator)?;
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let start = (range.start as usize).min(data.len());
        let end = (range.end as usize).min(data.len());
        Ok(data.slice(start..end))
    }
}
