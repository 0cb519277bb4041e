//! In-memory byte cache with least-recently-used eviction.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use tracing::{debug, trace};

use super::ByteCache;
use crate::request::ResourceKey;

/// Entry in the memory cache.
#[derive(Debug)]
struct MemoryEntry {
    bytes: Bytes,
    /// Logical clock value of the last read or write, for LRU eviction.
    last_access: AtomicU64,
}

/// Bounded in-memory store.
///
/// Uses `DashMap` so lookups from different worker threads do not contend on
/// one lock. Eviction scans for the least recently touched entry and is
/// serialized by a separate mutex.
#[derive(Debug)]
pub struct MemoryCache {
    capacity: usize,
    entries: DashMap<ResourceKey, MemoryEntry>,
    size: AtomicUsize,
    clock: AtomicU64,
    eviction: Mutex<()>,
}

impl MemoryCache {
    /// Creates an empty cache holding at most `capacity` bytes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: DashMap::new(),
            size: AtomicUsize::new(0),
            clock: AtomicU64::new(0),
            eviction: Mutex::new(()),
        }
    }

    /// Budget in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently held.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst)
    }

    fn evict_over_budget(&self) {
        let _guard = self
            .eviction
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        while self.size.load(Ordering::SeqCst) > self.capacity {
            // Pick the victim first; the iterator's shard guards must be
            // released before removing.
            let victim = self
                .entries
                .iter()
                .min_by_key(|entry| entry.last_access.load(Ordering::SeqCst))
                .map(|entry| entry.key().clone());

            let Some(victim) = victim else {
                break;
            };
            if let Some((_, entry)) = self.entries.remove(&victim) {
                self.size.fetch_sub(entry.bytes.len(), Ordering::SeqCst);
                trace!(key = %victim, len = entry.bytes.len(), "evicted from memory cache");
            }
        }
    }
}

impl ByteCache for MemoryCache {
    fn get(&self, key: &ResourceKey) -> Option<Bytes> {
        let entry = self.entries.get(key)?;
        entry.last_access.store(self.tick(), Ordering::SeqCst);
        Some(entry.bytes.clone())
    }

    fn put(&self, key: &ResourceKey, bytes: Bytes) {
        if bytes.len() > self.capacity {
            debug!(key = %key, len = bytes.len(), capacity = self.capacity, "entry exceeds memory budget, not cached");
            self.remove(key);
            return;
        }

        let len = bytes.len();
        let entry = MemoryEntry {
            bytes,
            last_access: AtomicU64::new(self.tick()),
        };
        if let Some(previous) = self.entries.insert(key.clone(), entry) {
            self.size.fetch_sub(previous.bytes.len(), Ordering::SeqCst);
        }
        self.size.fetch_add(len, Ordering::SeqCst);

        if self.size.load(Ordering::SeqCst) > self.capacity {
            self.evict_over_budget();
        }
    }

    fn remove(&self, key: &ResourceKey) {
        if let Some((_, entry)) = self.entries.remove(key) {
            self.size.fetch_sub(entry.bytes.len(), Ordering::SeqCst);
        }
    }

    fn clear(&self) {
        let _guard = self
            .eviction
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let keys: Vec<ResourceKey> = self.entries.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.remove(&key);
        }
    }
}
