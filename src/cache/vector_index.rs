//! L2 semantic cache: cosine-similarity match on message embeddings
//! (spec.md §4.3). Shipped as an in-process index per DESIGN.md's Open
//! Question decision — spec.md treats L2 as optional and names no specific
//! backing store.

use std::sync::RwLock;

use crate::models::CacheEntry;

const SIMILARITY_THRESHOLD: f64 = 0.95;

struct VectorRecord {
    embedding: Vec<f32>,
    entry: CacheEntry,
}

/// Guarded by a single `RwLock`: inserts push a whole `VectorRecord` under
/// the write lock, so readers never observe a partially-written embedding
/// (spec.md §5 "the L2 vector insert must be atomic enough that partial
/// embeddings are never visible").
pub struct VectorCache {
    records: RwLock<Vec<VectorRecord>>,
}

impl VectorCache {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }

    /// Nearest neighbor above the similarity threshold, ties broken by most
    /// recent (spec.md §4.3 invariants). Expired records are never returned,
    /// even if `evict_expired` hasn't swept them out yet.
    pub fn lookup(&self, query: &[f32]) -> Option<(CacheEntry, f64)> {
        let now = chrono::Utc::now();
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut best: Option<(usize, f64)> = None;
        for (idx, record) in records.iter().enumerate() {
            if record.entry.is_expired(now) {
                continue;
            }
            let sim = cosine_similarity(query, &record.embedding);
            if sim >= SIMILARITY_THRESHOLD {
                match best {
                    Some((_, best_sim)) if sim < best_sim => {}
                    _ => best = Some((idx, sim)),
                }
            }
        }
        best.map(|(idx, sim)| (records[idx].entry.clone(), sim))
    }

    pub fn insert(&self, embedding: Vec<f32>, entry: CacheEntry) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.push(VectorRecord { embedding, entry });
    }

    /// Drop entries past their TTL. Called opportunistically from the
    /// retention sweep; correctness never depends on this running promptly
    /// (spec.md §4.3 "the system must tolerate stale-but-TTL-valid entries").
    pub fn evict_expired(&self, now: chrono::DateTime<chrono::Utc>) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.retain(|r| !r.entry.is_expired(now));
    }
}

impl Default for VectorCache {
    fn default() -> Self {
        Self::new()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return -1.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return -1.0;
    }
    (dot / (norm_a * norm_b)) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(key: &str) -> CacheEntry {
        CacheEntry {
            key: key.to_string(),
            value: serde_json::json!({"text": key}),
            generation_cost_tokens: 10,
            created_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
            hit_count: 0,
        }
    }

    #[test]
    fn finds_near_identical_embedding_above_threshold() {
        let cache = VectorCache::new();
        cache.insert(vec![1.0, 0.0, 0.0], entry("a"));
        let hit = cache.lookup(&[0.999, 0.001, 0.0]);
        assert!(hit.is_some());
    }

    #[test]
    fn misses_when_below_threshold() {
        let cache = VectorCache::new();
        cache.insert(vec![1.0, 0.0, 0.0], entry("a"));
        let hit = cache.lookup(&[0.0, 1.0, 0.0]);
        assert!(hit.is_none());
    }

    #[test]
    fn ties_broken_by_most_recent_insert() {
        let cache = VectorCache::new();
        cache.insert(vec![1.0, 0.0], entry("first"));
        cache.insert(vec![1.0, 0.0], entry("second"));
        let (hit, _) = cache.lookup(&[1.0, 0.0]).unwrap();
        assert_eq!(hit.key, "second");
    }

    #[test]
    fn lookup_ignores_expired_entry_even_before_a_sweep() {
        let cache = VectorCache::new();
        let mut e = entry("stale");
        e.expires_at = Utc::now() - chrono::Duration::seconds(1);
        cache.insert(vec![1.0, 0.0, 0.0], e);
        assert!(cache.lookup(&[1.0, 0.0, 0.0]).is_none());
    }

    #[test]
    fn evicts_expired_entries() {
        let cache = VectorCache::new();
        let mut e = entry("stale");
        e.expires_at = Utc::now() - chrono::Duration::seconds(1);
        cache.insert(vec![1.0, 0.0], e);
        cache.evict_expired(Utc::now());
        assert!(cache.lookup(&[1.0, 0.0]).is_none());
    }
}
