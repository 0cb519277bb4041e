//! Two-tier cache: memory in front of disk.

use std::io;

use bytes::Bytes;
use tracing::{info, trace};

use super::{ByteCache, CacheConfig, DiskCache, MemoryCache};
use crate::request::ResourceKey;

/// Memory tier backed by a disk tier.
///
/// Reads check memory first; disk hits are promoted into memory. Writes and
/// removals go to both tiers.
#[derive(Debug)]
pub struct LayeredCache {
    memory: MemoryCache,
    disk: DiskCache,
}

impl LayeredCache {
    /// Opens both tiers as described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the disk tier cannot be opened.
    pub fn open(config: &CacheConfig) -> Result<Self, io::Error> {
        let disk = DiskCache::open(&config.directory, config.disk_capacity)?;
        info!(
            directory = %config.directory.display(),
            memory_capacity = config.memory_capacity,
            disk_capacity = config.disk_capacity,
            "opened image cache"
        );
        Ok(Self {
            memory: MemoryCache::new(config.memory_capacity),
            disk,
        })
    }

    /// The memory tier.
    #[must_use]
    pub fn memory(&self) -> &MemoryCache {
        &self.memory
    }

    /// The disk tier.
    #[must_use]
    pub fn disk(&self) -> &DiskCache {
        &self.disk
    }
}

impl ByteCache for LayeredCache {
    fn get(&self, key: &ResourceKey) -> Option<Bytes> {
        if let Some(bytes) = self.memory.get(key) {
            trace!(key = %key, "memory cache hit");
            return Some(bytes);
        }
        let bytes = self.disk.get(key)?;
        trace!(key = %key, "disk cache hit, promoting");
        self.memory.put(key, bytes.clone());
        Some(bytes)
    }

    fn put(&self, key: &ResourceKey, bytes: Bytes) {
        self.memory.put(key, bytes.clone());
        self.disk.put(key, bytes);
    }

    fn remove(&self, key: &ResourceKey) {
        self.memory.remove(key);
        self.disk.remove(key);
    }

    fn clear(&self) {
        self.memory.clear();
        self.disk.clear();
    }
}
