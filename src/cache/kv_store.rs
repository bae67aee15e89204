//! Backing key-value stores for the L1/L3/L4 cache layers (spec.md §4.3).
//!
//! `CacheBackend` is the external-collaborator seam (an actual Redis/
//! memcached-alike reachable via `CACHE_URL`); `InMemoryKvBackend` is both
//! the last-resort fallback used when that backend is unreachable *and* the
//! default backend in deployments that don't configure one at all. Any
//! backend failure is treated as a miss, never a fatal error — spec.md §4.3
//! "Fallback".

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::models::CacheEntry;

#[derive(Debug, thiserror::Error)]
pub enum CacheBackendError {
    #[error("backend unreachable: {0}")]
    Unreachable(String),
    #[error("deserialization failed: {0}")]
    Deserialize(String),
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheBackendError>;
    async fn set(&self, key: &str, entry: CacheEntry) -> Result<(), CacheBackendError>;
}

/// Bounded in-process map. Used as the last-resort fallback per spec.md
/// §4.3, and as the whole backend when no external `CACHE_URL` is set.
pub struct InMemoryKvBackend {
    entries: DashMap<String, CacheEntry>,
    max_entries: usize,
    insertion_order: DashMap<String, usize>,
    next_seq: AtomicUsize,
}

impl InMemoryKvBackend {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries,
            insertion_order: DashMap::new(),
            next_seq: AtomicUsize::new(0),
        }
    }

    fn evict_if_needed(&self) {
        if self.entries.len() <= self.max_entries {
            return;
        }
        // Evict the oldest-inserted entry. A bounded map serving as a
        // last-resort cache does not need perfect LRU; insertion order is
        // a fine approximation and keeps this lock-free.
        if let Some(oldest_key) = self
            .insertion_order
            .iter()
            .min_by_key(|e| *e.value())
            .map(|e| e.key().clone())
        {
            self.entries.remove(&oldest_key);
            self.insertion_order.remove(&oldest_key);
        }
    }
}

#[async_trait]
impl CacheBackend for InMemoryKvBackend {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheBackendError> {
        Ok(self.entries.get(key).map(|e| e.value().clone()))
    }

    async fn set(&self, key: &str, entry: CacheEntry) -> Result<(), CacheBackendError> {
        self.evict_if_needed();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.insertion_order.insert(key.to_string(), seq);
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }
}

/// A remote cache reachable over HTTP at `CACHE_URL`. The wire protocol of
/// the external cache service is out of scope (spec.md §1 non-goals treat
/// all persistence/business-entity backends as named-but-unspecified
/// collaborators); this client assumes a simple JSON GET/PUT-by-key surface
/// and converts any transport failure into a miss at the call site.
pub struct RemoteKvBackend {
    base_url: String,
    client: reqwest::Client,
}

impl RemoteKvBackend {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl CacheBackend for RemoteKvBackend {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheBackendError> {
        let url = format!("{}/entries/{}", self.base_url, urlencode(key));
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CacheBackendError::Unreachable(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(CacheBackendError::Unreachable(resp.status().to_string()));
        }
        let entry = resp
            .json::<CacheEntry>()
            .await
            .map_err(|e| CacheBackendError::Deserialize(e.to_string()))?;
        Ok(Some(entry))
    }

    async fn set(&self, key: &str, entry: CacheEntry) -> Result<(), CacheBackendError> {
        let url = format!("{}/entries/{}", self.base_url, urlencode(key));
        self.client
            .put(&url)
            .json(&entry)
            .send()
            .await
            .map_err(|e| CacheBackendError::Unreachable(e.to_string()))?;
        Ok(())
    }
}

fn urlencode(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_string()
            } else {
                format!("%{:02X}", c as u32)
            }
        })
        .collect()
}

/// Wraps an optional remote backend with the always-present in-process
/// fallback, so every caller sees one `CacheBackend`-shaped surface.
pub struct LayeredBackend {
    remote: Option<Arc<dyn CacheBackend>>,
    fallback: Arc<InMemoryKvBackend>,
}

impl LayeredBackend {
    pub fn new(remote: Option<Arc<dyn CacheBackend>>, fallback_max_entries: usize) -> Self {
        Self {
            remote,
            fallback: Arc::new(InMemoryKvBackend::new(fallback_max_entries)),
        }
    }

    /// Returns `(entry, used_fallback)`. Remote failures are logged and
    /// treated as a miss at the remote, then the fallback is consulted.
    pub async fn get(&self, key: &str) -> (Option<CacheEntry>, bool) {
        if let Some(remote) = &self.remote {
            match remote.get(key).await {
                Ok(Some(entry)) => return (Some(entry), false),
                Ok(None) => return (None, false),
                Err(e) => {
                    tracing::warn!(error = %e, "cache backend unreachable, using fallback");
                }
            }
        }
        match self.fallback.get(key).await {
            Ok(entry) => (entry, true),
            Err(_) => (None, true),
        }
    }

    pub async fn set(&self, key: &str, entry: CacheEntry) {
        if let Some(remote) = &self.remote {
            if let Err(e) = remote.set(key, entry.clone()).await {
                tracing::warn!(error = %e, "cache backend write failed, writing to fallback only");
            }
        }
        let _ = self.fallback.set(key, entry).await;
    }
}
