//! Local disk cache overlay for remotely stored immutable index files.
//!
//! A [`CacheDirectory`] mounts one shard's snapshot of index files and hands
//! out random-access readers over them. Reads are served from a local
//! range-granular disk cache and transparently populated from the remote
//! source on miss. Eviction of cached files may happen at any time,
//! concurrently with in-flight reads; readers never fail because of it and
//! instead degrade to direct remote reads for the affected bytes.
//!
//! This crate is organized into:
//! - `types` - file identity, clock capability and shared constants
//! - `stats` - per-file read statistics counters
//! - `manifest` - snapshot manifest describing the mounted files
//! - `remote` - remote byte source abstraction
//! - `cache_file` - on-disk cache storage, handles and eviction
//! - `binding` - per-reader cache handle binding protocol
//! - `reader` - the random-access reader and its read/fallback algorithm
//! - `directory` - per-shard directory over the above

pub mod debug;

pub mod binding;
pub mod cache_file;
pub mod directory;
pub mod error;
pub mod manifest;
pub mod reader;
pub mod remote;
pub mod stats;
pub mod types;

#[cfg(test)]
mod tests;

pub use binding::CacheFileRef;
pub use cache_file::{number_of_ranges, CacheFile, CacheService, CacheStorage, EvictionListener};
pub use directory::CacheDirectory;
pub use error::CacheError;
pub use manifest::{FileInfo, SnapshotManifest};
pub use reader::{CachedRangeReader, RandomAccessReader};
pub use remote::RemoteSource;
pub use stats::{ReadStats, StatsSnapshot};
pub use types::{monotonic_nano_clock, FileKey, NanoClock, COPY_BUFFER_SIZE, DEFAULT_RANGE_SIZE};
