//! Four-tier cache hierarchy (spec.md §4.3).

mod kv_store;
mod vector_index;

pub use kv_store::{CacheBackend, CacheBackendError, InMemoryKvBackend, LayeredBackend, RemoteKvBackend};
pub use vector_index::VectorCache;

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use sha2::{Digest, Sha256};

use crate::config::CacheTtlSettings;
use crate::metrics::MetricsRegistry;
use crate::models::{CacheEntry, Language};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLayer {
    L1,
    L2,
    L3,
    L4,
}

impl CacheLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheLayer::L1 => "l1",
            CacheLayer::L2 => "l2",
            CacheLayer::L3 => "l3",
            CacheLayer::L4 => "l4",
        }
    }
}

/// Stable hash of the last 3 turns (roles + normalized content), used as
/// the context-sensitivity axis of the L1 key (spec.md §4.3 "Key
/// derivation").
pub fn conversation_context_digest(turns: &[(String, String)]) -> String {
    let mut hasher = Sha256::new();
    for (role, content) in turns.iter().rev().take(3).rev() {
        hasher.update(role.as_bytes());
        hasher.update(b"\0");
        hasher.update(content.as_bytes());
        hasher.update(b"\0");
    }
    format!("{:x}", hasher.finalize())
}

pub fn l1_key(normalized_text: &str, context_digest: &str, outlet_id: Option<&str>, language: Language) -> String {
    format!(
        "l1:{normalized_text}:{context_digest}:{}:{}",
        outlet_id.unwrap_or("-"),
        language.as_str()
    )
}

pub fn l3_key(normalized_text: &str) -> String {
    format!("l3:{normalized_text}")
}

pub fn l4_key(normalized_query: &str) -> String {
    format!("l4:{normalized_query}")
}

pub struct CacheHierarchy {
    l1: LayeredBackend,
    l2: VectorCache,
    l3: LayeredBackend,
    l4: LayeredBackend,
    ttls: CacheTtlSettings,
    metrics: Arc<MetricsRegistry>,
}

impl CacheHierarchy {
    pub fn new(
        ttls: CacheTtlSettings,
        remote: Option<Arc<dyn CacheBackend>>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let fallback_max = ttls.l1_l3_l4_fallback_max_entries;
        Self {
            l1: LayeredBackend::new(remote.clone(), fallback_max),
            l2: VectorCache::new(),
            l3: LayeredBackend::new(remote.clone(), fallback_max),
            l4: LayeredBackend::new(remote, fallback_max),
            ttls,
            metrics,
        }
    }

    /// Returns the hit (if any) alongside whether the in-process fallback
    /// map served it because the remote backend was unreachable (spec.md
    /// §4.3 "Fallback", surfaced to callers as `metadata.cache_backend`).
    pub async fn l1_get(&self, key: &str) -> (Option<CacheEntry>, bool) {
        let (entry, used_fallback) = self.l1.get(key).await;
        match entry.filter(|e| !e.is_expired(Utc::now())) {
            Some(e) => {
                self.metrics.record_cache_hit(CacheLayer::L1);
                (Some(e), used_fallback)
            }
            None => {
                self.metrics.record_cache_miss(CacheLayer::L1);
                (None, used_fallback)
            }
        }
    }

    pub async fn l1_put(&self, key: &str, value: serde_json::Value, generation_cost_tokens: u64) {
        let now = Utc::now();
        let entry = CacheEntry {
            key: key.to_string(),
            value,
            generation_cost_tokens,
            created_at: now,
            expires_at: now + ChronoDuration::from_std(self.ttls.l1).unwrap(),
            hit_count: 0,
        };
        self.l1.set(key, entry).await;
    }

    pub fn l2_get(&self, embedding: &[f32]) -> Option<(CacheEntry, f64)> {
        match self.l2.lookup(embedding) {
            Some(hit) => {
                self.metrics.record_cache_hit(CacheLayer::L2);
                Some(hit)
            }
            None => {
                self.metrics.record_cache_miss(CacheLayer::L2);
                None
            }
        }
    }

    pub fn l2_put(&self, embedding: Vec<f32>, value: serde_json::Value, generation_cost_tokens: u64) {
        let now = Utc::now();
        let entry = CacheEntry {
            key: String::new(),
            value,
            generation_cost_tokens,
            created_at: now,
            expires_at: now + ChronoDuration::from_std(self.ttls.l2).unwrap(),
            hit_count: 0,
        };
        self.l2.insert(embedding, entry);
    }

    pub async fn l3_get(&self, key: &str) -> Option<CacheEntry> {
        let (entry, _) = self.l3.get(key).await;
        match entry.filter(|e| !e.is_expired(Utc::now())) {
            Some(e) => {
                self.metrics.record_cache_hit(CacheLayer::L3);
                Some(e)
            }
            None => {
                self.metrics.record_cache_miss(CacheLayer::L3);
                None
            }
        }
    }

    pub async fn l3_put(&self, key: &str, value: serde_json::Value, generation_cost_tokens: u64) {
        let now = Utc::now();
        let entry = CacheEntry {
            key: key.to_string(),
            value,
            generation_cost_tokens,
            created_at: now,
            expires_at: now + ChronoDuration::from_std(self.ttls.l3).unwrap(),
            hit_count: 0,
        };
        self.l3.set(key, entry).await;
    }

    pub async fn l4_get(&self, key: &str) -> Option<CacheEntry> {
        let (entry, _) = self.l4.get(key).await;
        match entry.filter(|e| !e.is_expired(Utc::now())) {
            Some(e) => {
                self.metrics.record_cache_hit(CacheLayer::L4);
                Some(e)
            }
            None => {
                self.metrics.record_cache_miss(CacheLayer::L4);
                None
            }
        }
    }

    pub async fn l4_put(&self, key: &str, value: serde_json::Value, generation_cost_tokens: u64) {
        let now = Utc::now();
        let entry = CacheEntry {
            key: key.to_string(),
            value,
            generation_cost_tokens,
            created_at: now,
            expires_at: now + ChronoDuration::from_std(self.ttls.l4).unwrap(),
            hit_count: 0,
        };
        self.l4.set(key, entry).await;
    }

    pub fn evict_expired_l2(&self) {
        self.l2.evict_expired(Utc::now());
    }
}
