// reader.rs - Random-access reader over one cached remote file
//
// The read algorithm: serve bytes from the cache file, populating missing
// ranges from the remote source as it goes. When no cache handle can be
// bound, or when the handle is invalidated mid-operation by a concurrent
// eviction, the affected bytes are read directly from the remote source
// instead; a read never fails merely because eviction raced with it.

use std::cmp::min;
use std::io::{self, Read};
use std::sync::Arc;

use crate::binding::CacheFileRef;
use crate::cache_file::CacheStorage;
use crate::debug_println;
use crate::error::CacheError;
use crate::manifest::FileInfo;
use crate::remote::RemoteSource;
use crate::stats::ReadStats;
use crate::types::{NanoClock, COPY_BUFFER_SIZE};

/// Random access over a window of one file.
pub trait RandomAccessReader {
    /// Length of this reader's window.
    fn length(&self) -> u64;

    /// Current cursor position within the window.
    fn position(&self) -> u64;

    /// Fill `buf` entirely with bytes starting at the cursor, advancing it.
    /// Either the whole buffer is filled or an error is raised; partial
    /// silent success never happens.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), CacheError>;

    /// Move the cursor. Never triggers I/O.
    fn seek(&mut self, position: i64) -> Result<(), CacheError>;

    /// A reader over `[offset, offset + length)` of this window, sharing
    /// cache resources with this reader but owning its own cursor.
    fn slice(&self, offset: i64, length: i64) -> Result<Self, CacheError>
    where
        Self: Sized;

    /// Idempotent. Only the originating (non-clone) reader releases shared
    /// cache resources.
    fn close(&mut self);
}

/// Reader handed out by [`crate::CacheDirectory::open_input`].
///
/// Clones and slices share the parent's binding and statistics but have an
/// independent window, cursor and closed flag; closing them never releases
/// the shared binding.
pub struct CachedRangeReader {
    file_info: FileInfo,
    remote: Arc<dyn RemoteSource>,
    stats: Arc<ReadStats>,
    binding: Arc<CacheFileRef>,
    clock: NanoClock,
    /// Absolute start of this reader's window within the file.
    offset: u64,
    /// Absolute end of this reader's window.
    end: u64,
    /// Cursor, relative to `offset`.
    cursor: u64,
    /// Absolute end position of the previous read, for contiguity stats.
    last_read_position: u64,
    /// Absolute position of the previous seek, for seek-distance stats.
    last_seek_position: u64,
    closed: bool,
    is_clone: bool,
}

impl CachedRangeReader {
    pub(crate) fn new(
        file_info: FileInfo,
        remote: Arc<dyn RemoteSource>,
        stats: Arc<ReadStats>,
        binding: Arc<CacheFileRef>,
        clock: NanoClock,
    ) -> Self {
        let length = file_info.length;
        Self {
            file_info,
            remote,
            stats,
            binding,
            clock,
            offset: 0,
            end: length,
            cursor: 0,
            last_read_position: 0,
            last_seek_position: 0,
            closed: false,
            is_clone: false,
        }
    }

    fn ensure_open(&self) -> Result<(), CacheError> {
        if self.closed {
            Err(CacheError::AlreadyClosed(format!(
                "reader over [{}] is closed",
                self.file_info.physical_name
            )))
        } else {
            Ok(())
        }
    }

    /// Copy already-cached bytes for `[position, range end)` out of storage
    /// into `dest`, bounded by both.
    fn read_cache_file(
        &self,
        storage: &mut CacheStorage,
        range_end: u64,
        position: u64,
        dest: &mut [u8],
    ) -> io::Result<usize> {
        let readable = min(dest.len() as u64, range_end - position) as usize;
        storage.read_at(position, &mut dest[..readable])?;
        self.stats.add_cached_bytes_read(readable as u64);
        Ok(readable)
    }

    /// Stream `[start, end)` from the remote source into cache storage.
    fn write_cache_file(&self, storage: &mut CacheStorage, start: u64, end: u64) -> io::Result<()> {
        let length = end - start;
        let mut copy_buffer = vec![0u8; min(COPY_BUFFER_SIZE as u64, length) as usize];
        debug_println!(
            "writing range [{}-{}] of [{}] to cache",
            start,
            end,
            self.file_info.physical_name
        );

        let start_nanos = (self.clock)();
        let mut input = self
            .remote
            .open_stream(&self.file_info.physical_name, start, length)?;
        self.stats.increment_inner_open();

        let mut copied = 0u64;
        while copied < length {
            let len = min(copy_buffer.len() as u64, length - copied) as usize;
            input.read_exact(&mut copy_buffer[..len])?;
            storage.write_at(start + copied, &copy_buffer[..len])?;
            copied += len as u64;
        }
        self.stats
            .add_cached_bytes_written(copied, (self.clock)().saturating_sub(start_nanos));
        Ok(())
    }

    /// Read `dest.len()` bytes at `start` straight from the remote source,
    /// bypassing the cache.
    fn read_directly(&self, start: u64, dest: &mut [u8]) -> Result<usize, CacheError> {
        debug_println!(
            "direct reading of range [{}-{}] of [{}]",
            start,
            start + dest.len() as u64,
            self.file_info.physical_name
        );

        let start_nanos = (self.clock)();
        let mut input = self
            .remote
            .open_stream(&self.file_info.physical_name, start, dest.len() as u64)
            .map_err(CacheError::read_failure)?;
        self.stats.increment_inner_open();
        input.read_exact(dest).map_err(CacheError::read_failure)?;
        self.stats.add_direct_bytes_read(
            dest.len() as u64,
            (self.clock)().saturating_sub(start_nanos),
        );
        Ok(dest.len())
    }
}

impl RandomAccessReader for CachedRangeReader {
    fn length(&self) -> u64 {
        self.end - self.offset
    }

    fn position(&self) -> u64 {
        self.cursor
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), CacheError> {
        self.ensure_open()?;
        let length = buf.len();
        if self.cursor + length as u64 > self.length() {
            return Err(CacheError::EndOfFile {
                position: self.cursor + length as u64,
                length: self.length(),
            });
        }
        let position = self.offset + self.cursor;

        let mut total = 0usize;
        while total < length {
            let pos = position + total as u64;

            let bytes_read = match self.binding.get() {
                // No cache available right now: read the remainder around it.
                None => self.read_directly(pos, &mut buf[total..])?,
                Some(cache_file) => {
                    let result = {
                        let mut storage = cache_file.file_lock();
                        let dest = &mut buf[total..];
                        cache_file.fetch_range(
                            &mut storage,
                            pos,
                            |storage, _start, end| self.read_cache_file(storage, end, pos, dest),
                            |storage, start, end| self.write_cache_file(storage, start, end),
                        )
                    };
                    match result {
                        Ok(bytes) => bytes,
                        Err(err) if err.is_handle_invalidated() => {
                            // Evicted during the fetch: not fatal, pick the
                            // bytes up from the remote source instead.
                            self.read_directly(pos, &mut buf[total..])?
                        }
                        Err(err) => return Err(err),
                    }
                }
            };
            total += bytes_read;
        }
        debug_assert_eq!(
            total, length,
            "partial read operation, read [{}] bytes of [{}]",
            total, length
        );

        self.stats
            .increment_bytes_read(self.last_read_position, position, total as u64);
        self.last_read_position = position + total as u64;
        self.last_seek_position = self.last_read_position;
        self.cursor += length as u64;
        Ok(())
    }

    fn seek(&mut self, position: i64) -> Result<(), CacheError> {
        self.ensure_open()?;
        if position < 0 {
            return Err(CacheError::InvalidSeek { position });
        }
        let target = position as u64;
        if target > self.length() {
            return Err(CacheError::EndOfFile {
                position: target,
                length: self.length(),
            });
        }
        let absolute = self.offset + target;
        self.stats.increment_seeks(self.last_seek_position, absolute);
        self.last_seek_position = absolute;
        self.cursor = target;
        Ok(())
    }

    fn slice(&self, offset: i64, length: i64) -> Result<Self, CacheError> {
        if offset < 0 || length < 0 || offset as u64 + length as u64 > self.length() {
            return Err(CacheError::InvalidArgument(format!(
                "slice out of bounds: offset={}, length={}, window length={}",
                offset,
                length,
                self.length()
            )));
        }
        let slice_offset = self.offset + offset as u64;
        Ok(Self {
            file_info: self.file_info.clone(),
            remote: Arc::clone(&self.remote),
            stats: Arc::clone(&self.stats),
            binding: Arc::clone(&self.binding),
            clock: Arc::clone(&self.clock),
            offset: slice_offset,
            end: slice_offset + length as u64,
            cursor: 0,
            last_read_position: slice_offset,
            last_seek_position: slice_offset,
            closed: false,
            is_clone: true,
        })
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if !self.is_clone {
            self.stats.increment_close();
            self.binding.release_on_close();
        }
    }
}

impl Clone for CachedRangeReader {
    /// Clones share the binding and statistics; they never release them on
    /// close, and start out open regardless of the parent's state.
    fn clone(&self) -> Self {
        Self {
            file_info: self.file_info.clone(),
            remote: Arc::clone(&self.remote),
            stats: Arc::clone(&self.stats),
            binding: Arc::clone(&self.binding),
            clock: Arc::clone(&self.clock),
            offset: self.offset,
            end: self.end,
            cursor: self.cursor,
            last_read_position: self.last_read_position,
            last_seek_position: self.last_seek_position,
            closed: false,
            is_clone: true,
        }
    }
}

impl Drop for CachedRangeReader {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for CachedRangeReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedRangeReader")
            .field("file", &self.file_info.physical_name)
            .field("offset", &self.offset)
            .field("end", &self.end)
            .field("position", &self.cursor)
            .field("is_clone", &self.is_clone)
            .field("closed", &self.closed)
            .finish()
    }
}
