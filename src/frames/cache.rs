//! Content-addressed cache of extraction results.
//!
//! Keyed by the sha256 of the uploaded bytes; bounded by entry count with a
//! TTL so the process does not grow without limit.

use super::FrameSequence;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct CacheEntry {
    frames: Arc<FrameSequence>,
    inserted: Instant,
    last_accessed: Instant,
}

/// Thread-safe memoization of video-content-hash to frame sequence.
pub struct FrameCache {
    entries: DashMap<String, CacheEntry>,
    max_entries: usize,
    ttl: Duration,
}

impl FrameCache {
    pub fn new(max_entries: usize, ttl_secs: u64) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    /// Look up a previous extraction. Expired entries are removed on access.
    pub fn get(&self, key: &str) -> Option<Arc<FrameSequence>> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            if entry.inserted.elapsed() <= self.ttl {
                entry.last_accessed = Instant::now();
                return Some(Arc::clone(&entry.frames));
            }
            drop(entry);
            self.entries.remove(key);
        }
        None
    }

    /// Store an extraction result, evicting the least recently used entry
    /// when at capacity.
    pub fn insert(&self, key: String, frames: Arc<FrameSequence>) {
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            self.evict_oldest();
        }

        let now = Instant::now();
        self.entries.insert(
            key,
            CacheEntry {
                frames,
                inserted: now,
                last_accessed: now,
            },
        );
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.last_accessed)
            .map(|entry| entry.key().clone());

        if let Some(key) = oldest {
            self.entries.remove(&key);
            tracing::debug!(key = %key, "Evicted extraction cache entry");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
