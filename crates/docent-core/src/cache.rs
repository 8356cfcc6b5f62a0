//! Content-addressed cache of processed documents.
//!
//! Keys are [`cache_key`]s (SHA-256 over name and content), so re-attaching
//! the same file skips segmentation entirely.
//!
//! # Policy
//!
//! - **Absolute TTL**: an entry expires `ttl` after it was *created*; reads
//!   do not extend its life.
//! - **No stale hits**: [`DocumentCache::get`] and [`DocumentCache::has`]
//!   on an expired entry report a miss *and* delete it.
//! - **Batch eviction**: inserting into a full cache first drops expired
//!   entries, then the oldest-by-creation entries, evicting roughly a tenth
//!   of capacity at once so that a steady stream of inserts does not evict
//!   on every call. The entry being inserted is never a victim.
//! - **Sweeping**: [`DocumentCache::sweep_expired`] removes expired entries
//!   regardless of access; the application runs it on a timer.
//!
//! Uses a `std::sync::Mutex` around a `HashMap`; every operation is short
//! and non-blocking.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::models::Document;

/// Deterministic cache key for a `(content, name)` pair.
///
/// ```rust
/// use docent_core::cache::cache_key;
///
/// assert_eq!(cache_key("body", "a.txt"), cache_key("body", "a.txt"));
/// assert_ne!(cache_key("body", "a.txt"), cache_key("body", "b.txt"));
/// ```
pub fn cache_key(content: &str, name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update([0u8]);
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Cache tuning parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Lifetime of an entry, measured from insertion.
    pub ttl: Duration,
    /// Maximum number of entries.
    pub capacity: usize,
    /// Fraction of capacity evicted in one batch when full.
    pub eviction_fraction: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::hours(1),
            capacity: 50,
            eviction_fraction: 0.1,
        }
    }
}

/// A cached document with its bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub document: Arc<Document>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
}

/// Snapshot of cache occupancy and effectiveness.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, `0.0` before any lookup.
    pub hit_rate: f64,
    pub evictions: u64,
    pub expirations: u64,
    pub ttl_secs: i64,
    /// Age of the oldest live entry in seconds.
    pub oldest_entry_age_secs: Option<i64>,
}

#[derive(Default)]
struct Counters {
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

struct Inner {
    entries: HashMap<String, CacheEntry>,
    counters: Counters,
}

/// Process-wide store of processed documents. Share it behind an `Arc`.
pub struct DocumentCache {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl DocumentCache {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                counters: Counters::default(),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// `true` if a live entry exists. An expired entry is deleted.
    pub fn has(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut inner = self.lock();
        match inner.entries.get(key) {
            Some(entry) if self.is_expired(entry, now) => {
                inner.entries.remove(key);
                inner.counters.expirations += 1;
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Fetch a live entry, recording the access. An expired entry is
    /// deleted and reported as a miss.
    pub fn get(&self, key: &str) -> Option<Arc<Document>> {
        let now = self.clock.now();
        let mut inner = self.lock();

        let expired = match inner.entries.get(key) {
            Some(entry) => self.is_expired(entry, now),
            None => {
                inner.counters.misses += 1;
                return None;
            }
        };

        if expired {
            inner.entries.remove(key);
            inner.counters.expirations += 1;
            inner.counters.misses += 1;
            debug!(key = %short(key), "cache entry expired on read");
            return None;
        }

        inner.counters.hits += 1;
        let entry = inner.entries.get_mut(key)?;
        entry.last_accessed_at = now;
        entry.access_count += 1;
        Some(Arc::clone(&entry.document))
    }

    /// Insert or replace an entry, evicting a batch first when full.
    pub fn set(&self, key: &str, document: Arc<Document>) {
        let now = self.clock.now();
        let mut inner = self.lock();

        if !inner.entries.contains_key(key) && inner.entries.len() >= self.config.capacity {
            self.evict_batch(&mut inner, now);
        }

        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                key: key.to_string(),
                document,
                created_at: now,
                last_accessed_at: now,
                access_count: 0,
            },
        );
    }

    /// Remove one entry. Returns whether it existed.
    pub fn remove(&self, key: &str) -> bool {
        self.lock().entries.remove(key).is_some()
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    /// Number of stored entries, including ones that expired but were not
    /// yet swept.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, e| now - e.created_at <= self.config.ttl);
        let removed = before - inner.entries.len();
        inner.counters.expirations += removed as u64;
        if removed > 0 {
            debug!(removed, remaining = inner.entries.len(), "swept expired cache entries");
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let inner = self.lock();
        let lookups = inner.counters.hits + inner.counters.misses;
        CacheStats {
            entries: inner.entries.len(),
            capacity: self.config.capacity,
            hits: inner.counters.hits,
            misses: inner.counters.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                inner.counters.hits as f64 / lookups as f64
            },
            evictions: inner.counters.evictions,
            expirations: inner.counters.expirations,
            ttl_secs: self.config.ttl.num_seconds(),
            oldest_entry_age_secs: inner
                .entries
                .values()
                .map(|e| (now - e.created_at).num_seconds())
                .max(),
        }
    }

    fn is_expired(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        now - entry.created_at > self.config.ttl
    }

    /// Number of entries evicted per batch: at least one, roughly
    /// `eviction_fraction` of capacity.
    fn batch_size(&self) -> usize {
        ((self.config.capacity as f64 * self.config.eviction_fraction).ceil() as usize).max(1)
    }

    fn evict_batch(&self, inner: &mut Inner, now: DateTime<Utc>) {
        let before = inner.entries.len();
        inner.entries.retain(|_, e| now - e.created_at <= self.config.ttl);
        let expired = before - inner.entries.len();
        inner.counters.expirations += expired as u64;

        if inner.entries.len() < self.config.capacity {
            debug!(expired, "cache full; expired entries made room");
            return;
        }

        let mut by_age: Vec<(DateTime<Utc>, String)> = inner
            .entries
            .values()
            .map(|e| (e.created_at, e.key.clone()))
            .collect();
        by_age.sort();

        let victims = self.batch_size().min(by_age.len());
        for (_, key) in by_age.into_iter().take(victims) {
            inner.entries.remove(&key);
        }
        inner.counters.evictions += victims as u64;
        debug!(evicted = victims, expired, "cache full; evicted oldest entries");
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn short(key: &str) -> &str {
    &key[..key.len().min(12)]
}
