//! # clipdeck-cache
//!
//! Bounded in-memory cache of decoded audio buffers, keyed by the raw
//! source-identifier string.
//!
//! Eviction is pure FIFO by insertion order: once occupancy reaches a
//! threshold fraction of capacity, the oldest quarter of entries is evicted
//! before the new entry is inserted. Each entry may carry a release hook
//! (e.g. revoking an ephemeral blob handle) that runs exactly once, whether
//! the entry is evicted, replaced, cleared, or dropped with the cache.

use chrono::{DateTime, Utc};
use clipdeck_core::DecodedBuffer;
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Maximum number of cached clips.
pub const DEFAULT_CAPACITY: usize = 100;
/// Occupancy fraction of capacity at which eviction kicks in.
pub const EVICT_THRESHOLD: f64 = 0.8;
/// Fraction of the current size evicted in one batch.
pub const EVICT_FRACTION: f64 = 0.25;

/// Hook releasing an entry's backing resource. Runs exactly once.
pub type ReleaseHook = Box<dyn FnOnce() + Send>;

struct CacheEntry {
    buffer: Arc<DecodedBuffer>,
    inserted_at: DateTime<Utc>,
    release: Option<ReleaseHook>,
}

impl CacheEntry {
    fn release(&mut self) {
        if let Some(hook) = self.release.take() {
            hook();
        }
    }
}

impl Drop for CacheEntry {
    fn drop(&mut self) {
        self.release();
    }
}

/// Bounded FIFO cache of decoded audio buffers.
pub struct ClipCache {
    entries: IndexMap<String, CacheEntry>,
    capacity: usize,
    threshold: f64,
}

impl ClipCache {
    /// Create a cache with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a cache with a custom capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: IndexMap::with_capacity(capacity),
            capacity: capacity.max(1),
            threshold: EVICT_THRESHOLD,
        }
    }

    /// Look up a decoded buffer. No side effects on miss: the eviction
    /// order is insertion order, not last access.
    pub fn get(&self, source_id: &str) -> Option<Arc<DecodedBuffer>> {
        self.entries.get(source_id).map(|e| Arc::clone(&e.buffer))
    }

    /// Insert a decoded buffer, evicting the oldest batch first if the
    /// cache has reached its occupancy threshold.
    ///
    /// Re-inserting an existing key replaces the entry; the replaced
    /// entry's release hook runs.
    pub fn put(
        &mut self,
        source_id: impl Into<String>,
        buffer: Arc<DecodedBuffer>,
        release: Option<ReleaseHook>,
    ) {
        let source_id = source_id.into();

        if !self.entries.contains_key(&source_id) {
            self.evict_if_needed();
        }

        let entry = CacheEntry {
            buffer,
            inserted_at: Utc::now(),
            release,
        };

        // Replacing drops the old entry, which fires its release hook.
        // IndexMap keeps the original insertion position on replace, so a
        // re-inserted key does not jump to the back of the eviction queue.
        if let Some(old) = self.entries.insert(source_id.clone(), entry) {
            debug!("Replaced cache entry for {source_id}");
            drop(old);
        }
    }

    /// Number of entries evicted by the next batch at the current size.
    pub fn eviction_batch_size(&self) -> usize {
        (self.entries.len() as f64 * EVICT_FRACTION).floor() as usize
    }

    fn evict_if_needed(&mut self) {
        let occupancy_limit = (self.capacity as f64 * self.threshold).ceil();
        if (self.entries.len() as f64) < occupancy_limit && self.entries.len() < self.capacity {
            return;
        }

        let batch = self.eviction_batch_size().max(1);
        debug!("Evicting {batch} oldest entries ({} cached)", self.entries.len());

        for _ in 0..batch {
            // Index 0 is the oldest insertion; shift_remove preserves the
            // order of the remainder.
            if self.entries.shift_remove_index(0).is_none() {
                break;
            }
        }
    }

    /// Remove a single entry, releasing its backing resource.
    pub fn remove(&mut self, source_id: &str) -> bool {
        self.entries.shift_remove(source_id).is_some()
    }

    /// Release every entry's backing resource and empty the cache.
    pub fn clear(&mut self) {
        let count = self.entries.len();
        self.entries.clear();
        if count > 0 {
            info!("Cache cleared ({count} entries released)");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insertion timestamp of an entry, if cached.
    pub fn inserted_at(&self, source_id: &str) -> Option<DateTime<Utc>> {
        self.entries.get(source_id).map(|e| e.inserted_at)
    }

    /// Total decoded sample memory held by the cache, in bytes.
    pub fn size_bytes(&self) -> usize {
        self.entries.values().map(|e| e.buffer.size_bytes()).sum()
    }
}

impl Default for ClipCache {
    fn default() -> Self {
        Self::new()
    }
}
