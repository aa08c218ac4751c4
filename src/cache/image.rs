use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::RwLock;
use rand::Rng;

use super::CacheKey;

pub const DEFAULT_SWEEP_PROBABILITY: f64 = 0.01;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub bytes: Bytes,
    pub content_type: String,
    pub created_at: Instant,
}

impl CacheEntry {
    pub fn new(key: CacheKey, bytes: Bytes, content_type: String) -> Self {
        Self {
            key,
            bytes,
            content_type,
            created_at: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.created_at)
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.age() > ttl
    }
}

/// Transformed images keyed by their parameters, expiring after a fixed TTL.
///
/// Entries are immutable once stored and handed out as `Arc`s, so a reader
/// never sees a half-written value. Expired entries are skipped on lookup and
/// physically removed by [`ImageCache::sweep`], which request handlers trigger
/// at random through [`ImageCache::maybe_sweep`].
pub struct ImageCache {
    images: RwLock<HashMap<CacheKey, Arc<CacheEntry>>>,
    ttl: Duration,
    sweep_probability: f64,
}

impl ImageCache {
    pub fn new(ttl: Duration, sweep_probability: f64) -> Self {
        let sweep_probability = if sweep_probability.is_nan() {
            log::warn!(
                "Sweep probability is NaN, using {}",
                DEFAULT_SWEEP_PROBABILITY
            );
            DEFAULT_SWEEP_PROBABILITY
        } else {
            sweep_probability.clamp(0.0, 1.0)
        };

        Self {
            images: RwLock::new(HashMap::new()),
            ttl,
            sweep_probability,
        }
    }

    pub fn lookup(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        let images = self.images.read();
        images
            .get(key)
            .filter(|entry| !entry.is_expired(self.ttl))
            .cloned()
    }

    /// Last writer wins.
    pub fn store(&self, entry: CacheEntry) {
        let mut images = self.images.write();
        images.insert(entry.key.clone(), Arc::new(entry));
    }

    /// Removes every expired entry and returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let mut images = self.images.write();
        let before = images.len();
        images.retain(|_, entry| !entry.is_expired(self.ttl));
        let removed = before - images.len();
        if removed > 0 {
            log::info!("Image cache sweep removed {} expired entries, {} remain", removed, images.len());
        }
        removed
    }

    pub fn maybe_sweep(&self) -> Option<usize> {
        if rand::thread_rng().gen_bool(self.sweep_probability) {
            Some(self.sweep())
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.images.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.read().is_empty()
    }
}
