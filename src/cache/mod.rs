//! Key → bytes storage for downloaded image data.
//!
//! The coordinator only needs the [`ByteCache`] contract; the stores here
//! are the stock implementations:
//!
//! - [`MemoryCache`] - bounded in-memory store with least-recently-used eviction
//! - [`DiskCache`] - one file per key with oldest-first eviction
//! - [`LayeredCache`] - memory in front of disk, built from a [`CacheConfig`]
//!
//! Stores must be safe for concurrent use from several worker threads. Only
//! per-key last-write-wins ordering is required.

mod disk;
mod layered;
mod memory;

use std::env;
use std::path::PathBuf;

use bytes::Bytes;

pub use disk::DiskCache;
pub use layered::LayeredCache;
pub use memory::MemoryCache;

use crate::request::ResourceKey;

/// One mebibyte.
const MIB: usize = 1024 * 1024;

/// Default memory budget (40 MiB).
pub const DEFAULT_MEMORY_CAPACITY: usize = 40 * MIB;

/// Default disk budget (400 MiB).
pub const DEFAULT_DISK_CAPACITY: u64 = 400 * MIB as u64;

/// Smallest budget accepted for either tier (10 MiB).
pub const MIN_CAPACITY: usize = 10 * MIB;

/// Default folder name under the user cache directory.
pub const DEFAULT_FOLDER_NAME: &str = "DownloadedImages";

/// Byte-blob store keyed by resource.
///
/// Implementations are infallible from the caller's point of view: I/O
/// problems are logged and surface as misses.
pub trait ByteCache: Send + Sync {
    /// Returns the stored bytes for `key`, if any.
    fn get(&self, key: &ResourceKey) -> Option<Bytes>;

    /// Stores `bytes` for `key`, replacing any previous value.
    fn put(&self, key: &ResourceKey, bytes: Bytes);

    /// Removes the entry for `key`.
    fn remove(&self, key: &ResourceKey);

    /// Removes every entry.
    fn clear(&self);
}

/// Location and budgets for a [`LayeredCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Directory holding the disk tier.
    pub directory: PathBuf,
    /// Memory tier budget in bytes (at least [`MIN_CAPACITY`]).
    pub memory_capacity: usize,
    /// Disk tier budget in bytes (at least [`MIN_CAPACITY`]).
    pub disk_capacity: u64,
}

impl CacheConfig {
    /// Creates a config for `directory`, using defaults for unset budgets and
    /// raising budgets below [`MIN_CAPACITY`] to the minimum.
    #[must_use]
    pub fn new(
        directory: impl Into<PathBuf>,
        memory_capacity: Option<usize>,
        disk_capacity: Option<u64>,
    ) -> Self {
        Self {
            directory: directory.into(),
            memory_capacity: memory_capacity
                .map_or(DEFAULT_MEMORY_CAPACITY, |value| value.max(MIN_CAPACITY)),
            disk_capacity: disk_capacity
                .map_or(DEFAULT_DISK_CAPACITY, |value| value.max(MIN_CAPACITY as u64)),
        }
    }

    /// Places the cache under the user cache directory.
    ///
    /// Priority:
    /// 1. `$XDG_CACHE_HOME/<folder>`
    /// 2. `$HOME/.cache/<folder>`
    ///
    /// Returns `None` when neither variable is set.
    #[must_use]
    pub fn in_user_cache_dir(folder: Option<&str>) -> Option<Self> {
        let folder = folder.unwrap_or(DEFAULT_FOLDER_NAME);
        let base = if let Some(xdg) = env_var_non_empty_os("XDG_CACHE_HOME") {
            PathBuf::from(xdg)
        } else {
            PathBuf::from(env_var_non_empty_os("HOME")?).join(".cache")
        };
        Some(Self::new(base.join(folder), None, None))
    }
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}
