// cache_file.rs - On-disk cache storage, handles and eviction
//
// A CacheFile is a live, reference-counted capability over one file's
// on-disk cache storage. Readers register themselves as holders to be
// notified of eviction; the backing file is disposed once it has been
// evicted and the last holder is gone. Availability of cached bytes is
// tracked per fixed-size range: fills always cover a whole range (clamped
// to the file length), never the caller's arbitrary request boundaries.

use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::debug_println;
use crate::error::CacheError;
use crate::types::FileKey;

/// Observer notified when a cache file it holds is evicted. Notifications
/// may arrive on any thread, at any time, including while the observer is
/// mid-read.
pub trait EvictionListener: Send + Sync {
    fn on_eviction(&self, evicted: &Arc<CacheFile>);
}

/// Number of granularity-sized ranges needed to cover `file_length` bytes.
pub fn number_of_ranges(file_length: u64, range_size: u64) -> u64 {
    (file_length + range_size - 1) / range_size
}

/// Positional access to the bytes of one cache file on disk. Only reachable
/// through [`CacheFile::file_lock`], so all storage I/O happens under the
/// file's advisory lock.
#[derive(Debug)]
pub struct CacheStorage {
    file: File,
}

impl CacheStorage {
    pub fn read_at(&mut self, position: u64, buf: &mut [u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(position))?;
        self.file.read_exact(buf)
    }

    pub fn write_at(&mut self, position: u64, buf: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(position))?;
        self.file.write_all(buf)
    }
}

#[derive(Debug, Default)]
struct CacheFileState {
    evicted: bool,
    disposed: bool,
    /// Holders registered via acquire, compared by pointer identity.
    holders: Vec<Weak<dyn EvictionListener>>,
    /// Indices of ranges whose bytes are present in storage.
    ranges: BTreeSet<u64>,
}

/// One file's on-disk cache storage plus the bookkeeping around it.
pub struct CacheFile {
    key: FileKey,
    file_length: u64,
    range_size: u64,
    path: PathBuf,
    state: Mutex<CacheFileState>,
    storage: Mutex<CacheStorage>,
}

/// Monotonic suffix so a key evicted and re-cached never reuses a path.
static NEXT_FILE_ID: AtomicU64 = AtomicU64::new(0);

fn storage_file_name(file_name: &str, id: u64) -> String {
    let sanitized: String = file_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    format!("{}.{}.cache", sanitized, id)
}

impl CacheFile {
    pub(crate) fn create(
        key: FileKey,
        file_length: u64,
        range_size: u64,
        cache_dir: &Path,
    ) -> io::Result<Arc<Self>> {
        let id = NEXT_FILE_ID.fetch_add(1, Ordering::Relaxed);
        let path = cache_dir.join(storage_file_name(&key.file_name, id));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        // Sparse allocation: ranges are written in place as they are filled.
        file.set_len(file_length)?;

        debug_println!(
            "created cache file [{}] for [{}] ({} bytes, range size {})",
            path.display(),
            key,
            file_length,
            range_size
        );

        Ok(Arc::new(Self {
            key,
            file_length,
            range_size,
            path,
            state: Mutex::new(CacheFileState::default()),
            storage: Mutex::new(CacheStorage { file }),
        }))
    }

    pub fn key(&self) -> &FileKey {
        &self.key
    }

    pub fn file_length(&self) -> u64 {
        self.file_length
    }

    pub fn range_size(&self) -> u64 {
        self.range_size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_evicted(&self) -> bool {
        self.state.lock().unwrap().evicted
    }

    /// Register a holder. Returns false when the file has already been
    /// evicted, in which case the caller must not use this handle.
    pub fn acquire(&self, listener: &Arc<dyn EvictionListener>) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.evicted {
            return false;
        }
        state.holders.push(Arc::downgrade(listener));
        true
    }

    /// Unregister a holder. Disposes the backing storage when the file has
    /// been evicted and this was the last holder.
    pub fn release(&self, listener: &Arc<dyn EvictionListener>) {
        let mut state = self.state.lock().unwrap();
        state.holders.retain(|weak| match weak.upgrade() {
            Some(held) => !Arc::ptr_eq(&held, listener),
            None => false,
        });
        if state.evicted && state.holders.is_empty() {
            self.dispose(&mut state);
        }
    }

    /// Mark this file evicted and notify every registered holder. Holders
    /// release themselves from their notification; the storage is disposed
    /// once the last one has.
    pub fn evict(self: &Arc<Self>) {
        let listeners: Vec<Arc<dyn EvictionListener>> = {
            let mut state = self.state.lock().unwrap();
            if state.evicted {
                return;
            }
            state.evicted = true;
            state.holders.iter().filter_map(Weak::upgrade).collect()
        };

        debug_println!("evicting cache file [{}]", self.key);
        for listener in listeners {
            listener.on_eviction(self);
        }

        let mut state = self.state.lock().unwrap();
        if state.holders.is_empty() {
            self.dispose(&mut state);
        }
    }

    fn dispose(&self, state: &mut CacheFileState) {
        if state.disposed {
            return;
        }
        state.disposed = true;
        if let Err(e) = fs::remove_file(&self.path) {
            debug_println!(
                "failed to delete cache file [{}]: {}",
                self.path.display(),
                e
            );
        }
    }

    /// Advisory per-file lock. Held for the duration of a single
    /// fetch-or-populate call and released on every exit path.
    pub fn file_lock(&self) -> MutexGuard<'_, CacheStorage> {
        self.storage.lock().unwrap()
    }

    /// Bounds of the granularity-aligned range containing `position`,
    /// clamped to the file length.
    fn range_bounds(&self, position: u64) -> (u64, u64) {
        let start = (position / self.range_size) * self.range_size;
        let end = (start + self.range_size).min(self.file_length);
        (start, end)
    }

    fn ensure_open(&self) -> Result<(), CacheError> {
        if self.state.lock().unwrap().evicted {
            Err(CacheError::AlreadyClosed(format!(
                "cache file [{}] was evicted",
                self.key
            )))
        } else {
            Ok(())
        }
    }

    /// Serve the range containing `position`, populating it first when its
    /// bytes are not cached yet.
    ///
    /// `on_miss` streams the whole aligned range `[start, end)` into
    /// `storage`; `on_hit` then copies bytes from `position` onward out of
    /// `storage` and returns how many it delivered. Fails with the
    /// handle-invalidated signature when the file is evicted before or
    /// during the operation; callers recover from exactly that failure by
    /// reading around the cache.
    pub fn fetch_range<H, M>(
        &self,
        storage: &mut CacheStorage,
        position: u64,
        on_hit: H,
        on_miss: M,
    ) -> Result<usize, CacheError>
    where
        H: FnOnce(&mut CacheStorage, u64, u64) -> io::Result<usize>,
        M: FnOnce(&mut CacheStorage, u64, u64) -> io::Result<()>,
    {
        self.ensure_open()?;

        let range_index = position / self.range_size;
        let (start, end) = self.range_bounds(position);

        let missing = !self.state.lock().unwrap().ranges.contains(&range_index);
        if missing {
            on_miss(storage, start, end).map_err(CacheError::read_failure)?;
            // The file may have been evicted while the fill was streaming;
            // its bytes must not be served in that case.
            self.ensure_open()?;
            self.state.lock().unwrap().ranges.insert(range_index);
        }

        on_hit(storage, start, end).map_err(CacheError::read_failure)
    }
}

impl std::fmt::Debug for CacheFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("CacheFile")
            .field("key", &self.key)
            .field("file_length", &self.file_length)
            .field("range_size", &self.range_size)
            .field("path", &self.path)
            .field("evicted", &state.evicted)
            .field("cached_ranges", &state.ranges.len())
            .finish()
    }
}

/// Registry of live cache files, keyed by [`FileKey`].
///
/// This service does not implement an eviction policy; entries are evicted
/// only through [`CacheService::evict_where`]. It also never binds holders
/// itself: callers acquire the returned handle through their own binding.
pub struct CacheService {
    range_size: u64,
    entries: Mutex<HashMap<FileKey, Arc<CacheFile>>>,
}

impl CacheService {
    pub fn new(range_size: u64) -> Arc<Self> {
        assert!(range_size > 0, "range size must be non-zero");
        Arc::new(Self {
            range_size,
            entries: Mutex::new(HashMap::new()),
        })
    }

    pub fn range_size(&self) -> u64 {
        self.range_size
    }

    /// Get the cache file for `key`, allocating storage for it in
    /// `cache_dir` when absent (or when the previous entry was evicted).
    pub fn get(
        &self,
        key: &FileKey,
        file_length: u64,
        cache_dir: &Path,
    ) -> io::Result<Arc<CacheFile>> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(existing) = entries.get(key) {
            if !existing.is_evicted() {
                return Ok(Arc::clone(existing));
            }
        }
        let created = CacheFile::create(key.clone(), file_length, self.range_size, cache_dir)?;
        entries.insert(key.clone(), Arc::clone(&created));
        Ok(created)
    }

    /// Evict every entry whose key matches `predicate`, notifying all
    /// currently registered holders. Idempotent.
    pub fn evict_where(&self, predicate: impl Fn(&FileKey) -> bool) {
        let victims: Vec<Arc<CacheFile>> = {
            let mut entries = self.entries.lock().unwrap();
            let keys: Vec<FileKey> = entries
                .keys()
                .filter(|key| predicate(key))
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|key| entries.remove(&key))
                .collect()
        };

        // Listener callbacks run outside the registry lock.
        for victim in victims {
            victim.evict();
        }
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}
