// binding.rs - Per-reader cache handle binding protocol
//
// Each non-clone reader owns exactly one CacheFileRef. The binding holds at
// most one cache file handle at a time; acquiring, eviction-clearing and
// close-clearing are serialized by the slot's write lock, while the common
// case (handle already bound) is a read-lock load with no exclusive lock.

use std::path::PathBuf;
use std::sync::{Arc, RwLock, Weak};

use crate::cache_file::{CacheFile, CacheService, EvictionListener};
use crate::debug_println;
use crate::types::FileKey;

/// The association between one reader and the cache file backing it.
pub struct CacheFileRef {
    key: FileKey,
    file_length: u64,
    cache_dir: PathBuf,
    cache_service: Arc<CacheService>,
    /// None when evicted or not yet acquired.
    bound: RwLock<Option<Arc<CacheFile>>>,
    /// Self-reference handed to cache files as the holder identity.
    weak_self: Weak<CacheFileRef>,
}

impl CacheFileRef {
    pub(crate) fn new(
        key: FileKey,
        file_length: u64,
        cache_dir: PathBuf,
        cache_service: Arc<CacheService>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            key,
            file_length,
            cache_dir,
            cache_service,
            bound: RwLock::new(None),
            weak_self: weak_self.clone(),
        })
    }

    pub fn key(&self) -> &FileKey {
        &self.key
    }

    fn as_listener(&self) -> Option<Arc<dyn EvictionListener>> {
        self.weak_self
            .upgrade()
            .map(|me| me as Arc<dyn EvictionListener>)
    }

    /// Resolve a usable cache file handle, binding one if necessary.
    ///
    /// `None` is not an error: it means no cache is available right now
    /// (the candidate handle was invalidated between allocation and
    /// registration, or storage allocation failed) and the caller must
    /// read around the cache.
    pub fn get(&self) -> Option<Arc<CacheFile>> {
        if let Some(bound) = self.bound.read().unwrap().as_ref() {
            return Some(Arc::clone(bound));
        }

        // Allocation may block and touch disk; keep it outside the slot lock.
        let candidate = match self
            .cache_service
            .get(&self.key, self.file_length, &self.cache_dir)
        {
            Ok(file) => file,
            Err(e) => {
                debug_println!("cache allocation failed for [{}]: {}", self.key, e);
                return None;
            }
        };

        let listener = self.as_listener()?;
        let mut bound = self.bound.write().unwrap();
        // Another thread may have bound concurrently while we were
        // allocating; its handle wins.
        if let Some(current) = bound.as_ref() {
            return Some(Arc::clone(current));
        }
        if candidate.acquire(&listener) {
            *bound = Some(Arc::clone(&candidate));
            Some(candidate)
        } else {
            None
        }
    }

    /// Clear and release whatever handle is currently bound. Called exactly
    /// once, by the owning reader's close.
    pub(crate) fn release_on_close(&self) {
        let taken = self.bound.write().unwrap().take();
        if let Some(file) = taken {
            if let Some(listener) = self.as_listener() {
                file.release(&listener);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn is_bound(&self) -> bool {
        self.bound.read().unwrap().is_some()
    }
}

impl EvictionListener for CacheFileRef {
    /// Invoked by the cache when a file this binding holds is evicted. A
    /// notification for a handle that is no longer bound is a no-op, never
    /// an error.
    fn on_eviction(&self, evicted: &Arc<CacheFile>) {
        let mut bound = self.bound.write().unwrap();
        let is_current = bound
            .as_ref()
            .map(|current| Arc::ptr_eq(current, evicted))
            .unwrap_or(false);
        if is_current {
            debug_println!("binding for [{}] cleared by eviction", self.key);
            *bound = None;
            drop(bound);
            if let Some(listener) = self.as_listener() {
                evicted.release(&listener);
            }
        }
    }
}

impl std::fmt::Debug for CacheFileRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheFileRef")
            .field("key", &self.key)
            .field("file_length", &self.file_length)
            .field("cache_dir", &self.cache_dir)
            .field("acquired", &self.bound.read().unwrap().is_some())
            .finish()
    }
}
