// types.rs - File identity, clock capability and shared constants

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Size of the intermediate buffer used when streaming remote bytes,
/// either into the cache or directly to a caller.
pub const COPY_BUFFER_SIZE: usize = 8192;

/// Default cache range granularity. Fills from the remote source are always
/// aligned to this size, regardless of the byte range a caller asked for.
pub const DEFAULT_RANGE_SIZE: u64 = 32 * 1024 * 1024;

/// Identity of one cached file: which snapshot, index and shard it belongs
/// to, plus its logical file name. Used as the cache namespace key.
///
/// Two readers over the same physical file in the same shard snapshot always
/// compute an identical key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileKey {
    pub snapshot_id: String,
    pub index_id: String,
    pub shard_id: u32,
    pub file_name: String,
}

impl FileKey {
    pub fn new(
        snapshot_id: impl Into<String>,
        index_id: impl Into<String>,
        shard_id: u32,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            snapshot_id: snapshot_id.into(),
            index_id: index_id.into(),
            shard_id,
            file_name: file_name.into(),
        }
    }

    /// Whether this key belongs to the given shard snapshot. Bulk cache
    /// invalidation evicts every entry matching this predicate.
    pub fn belongs_to(&self, snapshot_id: &str, index_id: &str, shard_id: u32) -> bool {
        self.snapshot_id == snapshot_id && self.index_id == index_id && self.shard_id == shard_id
    }
}

impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.snapshot_id, self.index_id, self.shard_id, self.file_name
        )
    }
}

/// Clock capability handed to components that measure elapsed time, instead
/// of them reaching for ambient global time. Returns nanoseconds on a
/// monotonic scale.
pub type NanoClock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// A [`NanoClock`] backed by [`Instant`], anchored at first use.
pub fn monotonic_nano_clock() -> NanoClock {
    static START: Lazy<Instant> = Lazy::new(Instant::now);
    Arc::new(|| START.elapsed().as_nanos() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_key_equality() {
        let a = FileKey::new("snap", "idx", 0, "_0.cfs");
        let b = FileKey::new("snap", "idx", 0, "_0.cfs");
        let c = FileKey::new("snap", "idx", 1, "_0.cfs");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_belongs_to() {
        let key = FileKey::new("snap", "idx", 3, "_0.dvd");
        assert!(key.belongs_to("snap", "idx", 3));
        assert!(!key.belongs_to("snap", "idx", 2));
        assert!(!key.belongs_to("other", "idx", 3));
    }

    #[test]
    fn test_monotonic_clock_advances() {
        let clock = monotonic_nano_clock();
        let first = clock();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(clock() > first);
    }
}
