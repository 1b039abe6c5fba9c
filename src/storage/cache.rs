use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use lru::LruCache;

use crate::errors::EngineResult;
use crate::observability::metrics;
use crate::storage::partition_store::PartitionStore;

/// Bounded cache of open partition handles, keyed by filesystem path.
///
/// Opening a `fjall` keyspace is not free (it touches the filesystem and
/// keeps background compaction threads alive), so workers share handles
/// through this cache instead of opening one per operation. Eviction pops
/// the least-recently-touched entry, but skips over any handle still
/// referenced by a live caller (`Arc` strong count > 1) so an in-flight
/// transaction is never pulled out from under it.
pub struct StorageHandleCache {
    inner: Mutex<LruCache<PathBuf, Arc<PartitionStore>>>,
}

impl StorageHandleCache {
    pub fn new(capacity: usize) -> StorageHandleCache {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        StorageHandleCache {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns the handle for `path`, opening and inserting it on a miss.
    pub fn get_or_open(&self, path: &Path) -> EngineResult<Arc<PartitionStore>> {
        let mut cache = self.inner.lock().unwrap();
        if let Some(handle) = cache.get(path) {
            metrics::STORAGE_CACHE_HITS.inc();
            return Ok(Arc::clone(handle));
        }
        metrics::STORAGE_CACHE_MISSES.inc();
        log::debug!("opening storage handle for {}", path.display());
        let handle = Arc::new(PartitionStore::open(path)?);
        self.insert_evicting_unused(&mut cache, path.to_path_buf(), Arc::clone(&handle));
        metrics::STORAGE_CACHE_SIZE.set(cache.len() as f64);
        Ok(handle)
    }

    /// Drops any cached handle for `path` so a subsequent `destroy` of the
    /// underlying partition doesn't leave a stale open keyspace behind.
    pub fn evict(&self, path: &Path) {
        let mut cache = self.inner.lock().unwrap();
        cache.pop(path);
        metrics::STORAGE_CACHE_SIZE.set(cache.len() as f64);
    }

    fn insert_evicting_unused(
        &self,
        cache: &mut LruCache<PathBuf, Arc<PartitionStore>>,
        path: PathBuf,
        handle: Arc<PartitionStore>,
    ) {
        if cache.len() >= cache.cap().get() {
            // `iter()` walks most-recently-used first, so the first
            // unused handle found from the back is the true least-recently
            // used one eligible for eviction.
            let mru_to_lru: Vec<PathBuf> = cache.iter().map(|(k, _)| k.clone()).collect();
            let evictable = mru_to_lru.iter().rev().find(|k| {
                cache
                    .peek(*k)
                    .map(|v| Arc::strong_count(v) == 1)
                    .unwrap_or(false)
            });
            match evictable {
                Some(key) => {
                    log::debug!("evicting storage handle for {}", key.display());
                    cache.pop(key);
                    metrics::STORAGE_CACHE_EVICTIONS.inc();
                }
                None => {
                    // Every cached handle is still in use elsewhere; grow
                    // rather than yank one out from under a live caller.
                    cache.resize(NonZeroUsize::new(cache.len() + 1).unwrap());
                }
            }
        }
        cache.put(path, handle);
    }
}

impl Default for StorageHandleCache {
    fn default() -> StorageHandleCache {
        StorageHandleCache::new(64)
    }
}
