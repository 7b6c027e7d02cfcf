// directory.rs - Per-shard directory over cached snapshot files

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::binding::CacheFileRef;
use crate::cache_file::CacheService;
use crate::debug_println;
use crate::error::CacheError;
use crate::manifest::SnapshotManifest;
use crate::reader::CachedRangeReader;
use crate::remote::RemoteSource;
use crate::stats::{ReadStats, StatsSnapshot};
use crate::types::{FileKey, NanoClock};

/// Mounts one shard's snapshot: hands out cached random-access readers over
/// the files named by the manifest and owns the per-file read statistics.
///
/// The directory imposes no coordination on its readers; any number of them
/// (and their clones) operate concurrently. It is also the only component
/// that bulk-evicts this shard's cache entries.
pub struct CacheDirectory {
    manifest: SnapshotManifest,
    remote: Arc<dyn RemoteSource>,
    cache_service: Arc<CacheService>,
    cache_dir: PathBuf,
    snapshot_id: String,
    index_id: String,
    shard_id: u32,
    stats: RwLock<HashMap<String, Arc<ReadStats>>>,
    clock: NanoClock,
    closed: AtomicBool,
}

impl CacheDirectory {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        manifest: SnapshotManifest,
        remote: Arc<dyn RemoteSource>,
        cache_service: Arc<CacheService>,
        cache_dir: impl Into<PathBuf>,
        snapshot_id: impl Into<String>,
        index_id: impl Into<String>,
        shard_id: u32,
        clock: NanoClock,
    ) -> io::Result<Self> {
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&cache_dir)?;
        Ok(Self {
            manifest,
            remote,
            cache_service,
            cache_dir,
            snapshot_id: snapshot_id.into(),
            index_id: index_id.into(),
            shard_id,
            stats: RwLock::new(HashMap::new()),
            clock,
            closed: AtomicBool::new(false),
        })
    }

    pub fn snapshot_id(&self) -> &str {
        &self.snapshot_id
    }

    pub fn index_id(&self) -> &str {
        &self.index_id
    }

    pub fn shard_id(&self) -> u32 {
        self.shard_id
    }

    fn file_key(&self, file_name: &str) -> FileKey {
        FileKey::new(
            self.snapshot_id.clone(),
            self.index_id.clone(),
            self.shard_id,
            file_name,
        )
    }

    fn ensure_open(&self) -> Result<(), CacheError> {
        if self.closed.load(Ordering::Acquire) {
            Err(CacheError::AlreadyClosed(format!(
                "directory for [{}/{}/{}] is closed",
                self.snapshot_id, self.index_id, self.shard_id
            )))
        } else {
            Ok(())
        }
    }

    /// Open a reader over the whole of file `name`. The file's stats entry
    /// is created on first open and shared by every later reader of the
    /// same name.
    pub fn open_input(&self, name: &str) -> Result<CachedRangeReader, CacheError> {
        self.ensure_open()?;
        let file_info = self
            .manifest
            .file_info(name)
            .ok_or_else(|| {
                CacheError::read_failure(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no file [{}] in snapshot manifest", name),
                ))
            })?
            .clone();

        let stats = self.stats_for(name, file_info.length);
        stats.increment_open();

        let binding = CacheFileRef::new(
            self.file_key(name),
            file_info.length,
            self.cache_dir.clone(),
            Arc::clone(&self.cache_service),
        );
        Ok(CachedRangeReader::new(
            file_info,
            Arc::clone(&self.remote),
            stats,
            binding,
            Arc::clone(&self.clock),
        ))
    }

    /// Create-or-reuse with exactly-once creation under concurrent first
    /// access to the same name.
    fn stats_for(&self, name: &str, file_length: u64) -> Arc<ReadStats> {
        if let Some(existing) = self.stats.read().unwrap().get(name) {
            return Arc::clone(existing);
        }
        let mut map = self.stats.write().unwrap();
        Arc::clone(
            map.entry(name.to_string())
                .or_insert_with(|| Arc::new(ReadStats::new(file_length))),
        )
    }

    /// Evict every cache entry belonging to this directory's shard
    /// snapshot. Does not wait for in-flight reads; their bindings absorb
    /// the eviction. Idempotent.
    pub fn clear_cache(&self) {
        debug_println!(
            "clearing cache for [{}/{}/{}]",
            self.snapshot_id,
            self.index_id,
            self.shard_id
        );
        self.cache_service.evict_where(|key| {
            key.belongs_to(&self.snapshot_id, &self.index_id, self.shard_id)
        });
    }

    /// Close the directory and drop its cache entries. Outstanding readers
    /// are not force-closed; callers close their own. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.clear_cache();
        }
    }

    /// Eventually-consistent snapshot of all per-file counters.
    pub fn stats(&self) -> HashMap<String, StatsSnapshot> {
        self.stats
            .read()
            .unwrap()
            .iter()
            .map(|(name, stats)| (name.clone(), stats.snapshot()))
            .collect()
    }

    /// Live stats handle for one file, if it has ever been opened.
    pub fn file_stats(&self, name: &str) -> Option<Arc<ReadStats>> {
        self.stats.read().unwrap().get(name).cloned()
    }
}

impl Drop for CacheDirectory {
    fn drop(&mut self) {
        self.close();
    }
}
