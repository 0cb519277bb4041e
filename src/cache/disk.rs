//! On-disk byte cache: one file per key, oldest files evicted first.
//!
//! File names are the hex SHA-256 of the key, so arbitrary keys map to safe,
//! fixed-length names. Writes go to a temporary file that is renamed into
//! place, which keeps readers from ever observing a partial entry.

use std::fs::{self, File};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use super::ByteCache;
use crate::request::ResourceKey;

/// Fraction of the budget to shrink to once the budget is exceeded, leaving
/// headroom for new writes.
const EVICTION_TARGET_PERCENTAGE: f64 = 0.9;

/// Marker in temporary file names; such files are ignored by scans.
const TEMP_MARKER: &str = ".tmp-";

/// Bounded directory-backed store.
#[derive(Debug)]
pub struct DiskCache {
    directory: PathBuf,
    capacity: u64,
    size: AtomicU64,
    temp_counter: AtomicU64,
    eviction: Mutex<()>,
}

/// A cache file seen during a directory scan.
struct CacheFile {
    path: PathBuf,
    len: u64,
    modified: SystemTime,
}

impl DiskCache {
    /// Opens (creating if needed) a cache rooted at `directory`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be created or listed.
    #[instrument(level = "debug", skip(directory), fields(directory = %directory.as_ref().display()))]
    pub fn open(directory: impl AsRef<Path>, capacity: u64) -> Result<Self, io::Error> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)?;
        let size: u64 = scan(&directory)?.iter().map(|f| f.len).sum();
        debug!(size_bytes = size, capacity, "opened disk cache");
        Ok(Self {
            directory,
            capacity,
            size: AtomicU64::new(size),
            temp_counter: AtomicU64::new(0),
            eviction: Mutex::new(()),
        })
    }

    /// Root directory of the cache.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Budget in bytes.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Tracked size of stored entries in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.size.load(Ordering::SeqCst)
    }

    fn path_for(&self, key: &ResourceKey) -> PathBuf {
        let digest = Sha256::digest(key.as_str().as_bytes());
        self.directory.join(format!("{digest:x}"))
    }

    fn existing_len(path: &Path) -> u64 {
        fs::metadata(path).map(|m| m.len()).unwrap_or(0)
    }

    fn write_entry(&self, path: &Path, bytes: &[u8]) -> Result<(), io::Error> {
        let n = self.temp_counter.fetch_add(1, Ordering::SeqCst);
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("entry");
        let temp = self
            .directory
            .join(format!("{file_name}{TEMP_MARKER}{}-{n}", std::process::id()));
        fs::write(&temp, bytes)?;
        if let Err(e) = fs::rename(&temp, path) {
            let _ = fs::remove_file(&temp);
            return Err(e);
        }
        Ok(())
    }

    /// Deletes the oldest files until the cache fits in 90% of its budget.
    ///
    /// The directory scan also resynchronizes the tracked size.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn evict_over_budget(&self) {
        let _guard = self
            .eviction
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let mut files = match scan(&self.directory) {
            Ok(files) => files,
            Err(e) => {
                warn!(directory = %self.directory.display(), error = %e, "disk cache scan failed");
                return;
            }
        };
        let mut size: u64 = files.iter().map(|f| f.len).sum();
        if size <= self.capacity {
            self.size.store(size, Ordering::SeqCst);
            return;
        }

        let target = (self.capacity as f64 * EVICTION_TARGET_PERCENTAGE) as u64;
        files.sort_by_key(|f| f.modified);

        let size_before = size;
        let mut deleted = 0usize;
        for file in files {
            if size <= target {
                break;
            }
            match fs::remove_file(&file.path) {
                Ok(()) => {
                    size = size.saturating_sub(file.len);
                    deleted += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    size = size.saturating_sub(file.len);
                }
                Err(e) => {
                    warn!(path = %file.path.display(), error = %e, "failed to evict cache file");
                }
            }
        }
        self.size.store(size, Ordering::SeqCst);
        debug!(
            files_deleted = deleted,
            size_before,
            size_after = size,
            "disk cache eviction complete"
        );
    }
}

impl ByteCache for DiskCache {
    fn get(&self, key: &ResourceKey) -> Option<Bytes> {
        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(bytes) => {
                // Refresh mtime so eviction treats this entry as recently used.
                if let Err(e) = File::options()
                    .write(true)
                    .open(&path)
                    .and_then(|file| file.set_modified(SystemTime::now()))
                {
                    debug!(key = %key, error = %e, "could not refresh cache entry mtime");
                }
                Some(Bytes::from(bytes))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                warn!(key = %key, path = %path.display(), error = %e, "disk cache read failed");
                None
            }
        }
    }

    fn put(&self, key: &ResourceKey, bytes: Bytes) {
        let len = bytes.len() as u64;
        if len > self.capacity {
            debug!(key = %key, len, capacity = self.capacity, "entry exceeds disk budget, not cached");
            self.remove(key);
            return;
        }

        let path = self.path_for(key);
        let previous = Self::existing_len(&path);
        if let Err(e) = self.write_entry(&path, &bytes) {
            warn!(key = %key, path = %path.display(), error = %e, "disk cache write failed");
            return;
        }

        let _ = self
            .size
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |size| {
                Some(size.saturating_sub(previous) + len)
            });
        if self.size.load(Ordering::SeqCst) > self.capacity {
            self.evict_over_budget();
        }
    }

    fn remove(&self, key: &ResourceKey) {
        let path = self.path_for(key);
        let len = Self::existing_len(&path);
        match fs::remove_file(&path) {
            Ok(()) => {
                let _ = self
                    .size
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |size| {
                        Some(size.saturating_sub(len))
                    });
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                warn!(key = %key, path = %path.display(), error = %e, "disk cache remove failed");
            }
        }
    }

    fn clear(&self) {
        let _guard = self
            .eviction
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match scan(&self.directory) {
            Ok(files) => {
                for file in files {
                    if let Err(e) = fs::remove_file(&file.path)
                        && e.kind() != ErrorKind::NotFound
                    {
                        warn!(path = %file.path.display(), error = %e, "failed to clear cache file");
                    }
                }
                self.size.store(0, Ordering::SeqCst);
            }
            Err(e) => {
                warn!(directory = %self.directory.display(), error = %e, "disk cache scan failed");
            }
        }
    }
}

/// Lists committed cache files (temporary files are skipped).
fn scan(directory: &Path) -> Result<Vec<CacheFile>, io::Error> {
    let mut files = Vec::new();
    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().contains(TEMP_MARKER) {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => continue,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        files.push(CacheFile {
            path: entry.path(),
            len: metadata.len(),
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        });
    }
    Ok(files)
}
