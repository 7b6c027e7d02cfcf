// tests.rs - Integration tests for the cache directory and its readers

use std::cmp::min;
use std::collections::HashMap;
use std::io::{self, Cursor, Read};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use rand::Rng;
use tempfile::TempDir;

use crate::cache_file::{number_of_ranges, CacheService};
use crate::directory::CacheDirectory;
use crate::error::CacheError;
use crate::manifest::{FileInfo, SnapshotManifest};
use crate::reader::RandomAccessReader;
use crate::remote::RemoteSource;
use crate::types::monotonic_nano_clock;

/// Remote source backed by in-memory blobs.
struct InMemoryRemote {
    blobs: HashMap<String, Vec<u8>>,
}

impl InMemoryRemote {
    fn single(physical_name: &str, bytes: Vec<u8>) -> Arc<Self> {
        let mut blobs = HashMap::new();
        blobs.insert(physical_name.to_string(), bytes);
        Arc::new(Self { blobs })
    }
}

impl RemoteSource for InMemoryRemote {
    fn open_stream(
        &self,
        physical_name: &str,
        start: u64,
        length: u64,
    ) -> io::Result<Box<dyn Read + Send>> {
        let blob = self.blobs.get(physical_name).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no blob [{}]", physical_name))
        })?;
        let end = start
            .checked_add(length)
            .filter(|end| *end <= blob.len() as u64)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("range [{}+{}] out of blob bounds", start, length),
                )
            })?;
        Ok(Box::new(Cursor::new(
            blob[start as usize..end as usize].to_vec(),
        )))
    }
}

type OpenHook = Box<dyn FnMut(u64) + Send>;

/// Remote source wrapper that counts opened streams and requested bytes,
/// with an optional hook invoked on each open (1-based ordinal).
struct CountingRemote {
    inner: Arc<dyn RemoteSource>,
    opens: AtomicU64,
    bytes_requested: AtomicU64,
    on_open: Mutex<Option<OpenHook>>,
}

impl CountingRemote {
    fn new(inner: Arc<dyn RemoteSource>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            opens: AtomicU64::new(0),
            bytes_requested: AtomicU64::new(0),
            on_open: Mutex::new(None),
        })
    }

    fn set_on_open(&self, hook: OpenHook) {
        *self.on_open.lock().unwrap() = Some(hook);
    }

    fn open_count(&self) -> u64 {
        self.opens.load(Ordering::SeqCst)
    }

    fn bytes_requested(&self) -> u64 {
        self.bytes_requested.load(Ordering::SeqCst)
    }
}

impl RemoteSource for CountingRemote {
    fn open_stream(
        &self,
        physical_name: &str,
        start: u64,
        length: u64,
    ) -> io::Result<Box<dyn Read + Send>> {
        let ordinal = self.opens.fetch_add(1, Ordering::SeqCst) + 1;
        self.bytes_requested.fetch_add(length, Ordering::SeqCst);
        if let Some(hook) = self.on_open.lock().unwrap().as_mut() {
            hook(ordinal);
        }
        self.inner.open_stream(physical_name, start, length)
    }
}

fn test_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn single_file_directory(
    remote: Arc<dyn RemoteSource>,
    cache_service: Arc<CacheService>,
    cache_dir: &TempDir,
    name: &str,
    physical_name: &str,
    length: u64,
) -> CacheDirectory {
    let manifest = SnapshotManifest::new().with_file(name, FileInfo::new(physical_name, length));
    CacheDirectory::new(
        manifest,
        remote,
        cache_service,
        cache_dir.path(),
        "snap",
        "idx",
        0,
        monotonic_nano_clock(),
    )
    .unwrap()
}

#[test]
fn test_sequential_read_fills_each_range_once() {
    const FILE_LEN: usize = 250_000;
    const RANGE_SIZE: u64 = 16_384;

    let input = test_bytes(FILE_LEN);
    let counting = CountingRemote::new(InMemoryRemote::single("__blob-0", input.clone()));
    let cache_dir = TempDir::new().unwrap();
    let directory = single_file_directory(
        counting.clone(),
        CacheService::new(RANGE_SIZE),
        &cache_dir,
        "_0.cfs",
        "__blob-0",
        FILE_LEN as u64,
    );

    let mut reader = directory.open_input("_0.cfs").unwrap();
    assert_eq!(reader.length(), FILE_LEN as u64);
    assert_eq!(reader.position(), 0);

    let mut output = vec![0u8; FILE_LEN];
    reader.read_exact(&mut output).unwrap();
    assert_eq!(output, input);
    assert_eq!(reader.position(), FILE_LEN as u64);

    let expected_fills = number_of_ranges(FILE_LEN as u64, RANGE_SIZE);
    assert_eq!(expected_fills, 16);
    assert_eq!(counting.open_count(), expected_fills);
    assert_eq!(counting.bytes_requested(), FILE_LEN as u64);

    let stats = directory.file_stats("_0.cfs").unwrap();
    assert_eq!(stats.direct_bytes_read(), 0);
    assert_eq!(stats.cached_bytes_read(), FILE_LEN as u64);
    assert_eq!(stats.cached_bytes_written(), FILE_LEN as u64);
    assert_eq!(stats.inner_open_count(), expected_fills);
    assert_eq!(stats.total_bytes_read(), FILE_LEN as u64);
}

#[test]
fn test_rereading_cached_file_touches_remote_zero_times() {
    const FILE_LEN: usize = 40_000;
    let input = test_bytes(FILE_LEN);
    let counting = CountingRemote::new(InMemoryRemote::single("__blob-0", input.clone()));
    let cache_dir = TempDir::new().unwrap();
    let directory = single_file_directory(
        counting.clone(),
        CacheService::new(8_192),
        &cache_dir,
        "_0.cfs",
        "__blob-0",
        FILE_LEN as u64,
    );

    let mut reader = directory.open_input("_0.cfs").unwrap();
    let mut output = vec![0u8; FILE_LEN];
    reader.read_exact(&mut output).unwrap();
    let opens_after_first = counting.open_count();

    reader.seek(0).unwrap();
    let mut again = vec![0u8; FILE_LEN];
    reader.read_exact(&mut again).unwrap();

    assert_eq!(again, input);
    assert_eq!(counting.open_count(), opens_after_first);
}

#[test]
fn test_eviction_mid_fill_falls_back_then_rebinds() {
    const FILE_LEN: usize = 250_000;
    const RANGE_SIZE: u64 = 16_384;

    let input = test_bytes(FILE_LEN);
    let counting = CountingRemote::new(InMemoryRemote::single("__blob-0", input.clone()));
    let cache_service = CacheService::new(RANGE_SIZE);
    let cache_dir = TempDir::new().unwrap();
    let directory = single_file_directory(
        counting.clone(),
        Arc::clone(&cache_service),
        &cache_dir,
        "_0.cfs",
        "__blob-0",
        FILE_LEN as u64,
    );

    // Evict everything while the 5th range fill is streaming from the
    // remote source.
    {
        let service = Arc::clone(&cache_service);
        counting.set_on_open(Box::new(move |ordinal| {
            if ordinal == 5 {
                service.evict_where(|_| true);
            }
        }));
    }

    let mut reader = directory.open_input("_0.cfs").unwrap();
    let mut output = vec![0u8; FILE_LEN];
    let mut pos = 0usize;
    while pos < FILE_LEN {
        let len = min(RANGE_SIZE as usize, FILE_LEN - pos);
        reader.read_exact(&mut output[pos..pos + len]).unwrap();
        pos += len;
    }
    assert_eq!(output, input);

    let stats = directory.file_stats("_0.cfs").unwrap();
    // The read overlapping the eviction was served directly from the
    // remote source; everything else came from (re)filled cache ranges.
    assert_eq!(stats.direct_bytes_read(), RANGE_SIZE);
    assert_eq!(stats.cached_bytes_read(), FILE_LEN as u64 - RANGE_SIZE);
    assert_eq!(stats.total_bytes_read(), FILE_LEN as u64);
    // 16 fills plus one direct fallback open.
    assert_eq!(counting.open_count(), 17);
}

#[test]
fn test_random_reads_and_slices_reconstruct_content() {
    let mut rng = rand::thread_rng();
    let file_len = rng.gen_range(1..100_000usize);
    let input = test_bytes(file_len);
    let remote = InMemoryRemote::single("__blob-0", input.clone());
    let cache_dir = TempDir::new().unwrap();
    let directory = single_file_directory(
        remote,
        CacheService::new(4_096),
        &cache_dir,
        "_0.cfs",
        "__blob-0",
        file_len as u64,
    );

    let mut reader = directory.open_input("_0.cfs").unwrap();
    for _ in 0..200 {
        let offset = rng.gen_range(0..=file_len);
        let length = rng.gen_range(0..=(file_len - offset));
        let mut output = vec![0u8; length];

        match rng.gen_range(0..3) {
            0 => {
                reader.seek(offset as i64).unwrap();
                reader.read_exact(&mut output).unwrap();
            }
            1 => {
                let mut slice = reader.slice(offset as i64, length as i64).unwrap();
                slice.read_exact(&mut output).unwrap();
            }
            _ => {
                let mut clone = reader.clone();
                clone.seek(offset as i64).unwrap();
                clone.read_exact(&mut output).unwrap();
            }
        }
        assert_eq!(&output[..], &input[offset..offset + length]);
    }
}

#[test]
fn test_slice_bytes_equal_parent_range() {
    const FILE_LEN: usize = 10_000;
    let input = test_bytes(FILE_LEN);
    let remote = InMemoryRemote::single("__blob-0", input.clone());
    let cache_dir = TempDir::new().unwrap();
    let directory = single_file_directory(
        remote,
        CacheService::new(1_024),
        &cache_dir,
        "_0.cfs",
        "__blob-0",
        FILE_LEN as u64,
    );

    let reader = directory.open_input("_0.cfs").unwrap();
    let mut slice = reader.slice(2_500, 5_000).unwrap();
    assert_eq!(slice.length(), 5_000);

    let mut output = vec![0u8; 5_000];
    slice.read_exact(&mut output).unwrap();
    assert_eq!(&output[..], &input[2_500..7_500]);

    // A slice of a slice nests its window.
    let mut nested = slice.slice(100, 200).unwrap();
    let mut small = vec![0u8; 200];
    nested.read_exact(&mut small).unwrap();
    assert_eq!(&small[..], &input[2_600..2_800]);
}

#[test]
fn test_slice_bounds_validation() {
    const FILE_LEN: usize = 1_000;
    let remote = InMemoryRemote::single("__blob-0", test_bytes(FILE_LEN));
    let cache_dir = TempDir::new().unwrap();
    let directory = single_file_directory(
        remote,
        CacheService::new(1_024),
        &cache_dir,
        "_0.cfs",
        "__blob-0",
        FILE_LEN as u64,
    );
    let reader = directory.open_input("_0.cfs").unwrap();

    for (offset, length) in [(-1, 10), (0, -1), (500, 501), (1_001, 0)] {
        match reader.slice(offset, length) {
            Err(CacheError::InvalidArgument(_)) => {}
            other => panic!("expected InvalidArgument for ({}, {}), got {:?}", offset, length, other),
        }
    }

    assert!(reader.slice(0, 1_000).is_ok());
    assert!(reader.slice(1_000, 0).is_ok());
}

#[test]
fn test_seek_validation() {
    const FILE_LEN: usize = 1_000;
    let remote = InMemoryRemote::single("__blob-0", test_bytes(FILE_LEN));
    let cache_dir = TempDir::new().unwrap();
    let directory = single_file_directory(
        remote,
        CacheService::new(1_024),
        &cache_dir,
        "_0.cfs",
        "__blob-0",
        FILE_LEN as u64,
    );
    let mut reader = directory.open_input("_0.cfs").unwrap();

    match reader.seek(-1) {
        Err(CacheError::InvalidSeek { position: -1 }) => {}
        other => panic!("expected InvalidSeek, got {:?}", other),
    }
    match reader.seek(1_001) {
        Err(CacheError::EndOfFile { .. }) => {}
        other => panic!("expected EndOfFile, got {:?}", other),
    }

    // Seeking to the window length is allowed; reading there is not.
    reader.seek(1_000).unwrap();
    assert_eq!(reader.position(), 1_000);
    let mut one = [0u8; 1];
    match reader.read_exact(&mut one) {
        Err(CacheError::EndOfFile { .. }) => {}
        other => panic!("expected EndOfFile, got {:?}", other),
    }

    reader.seek(500).unwrap();
    let mut output = vec![0u8; 250];
    reader.read_exact(&mut output).unwrap();
    assert_eq!(&output[..], &test_bytes(FILE_LEN)[500..750]);
}

#[test]
fn test_close_is_idempotent_and_rejects_reads() {
    const FILE_LEN: usize = 1_000;
    let remote = InMemoryRemote::single("__blob-0", test_bytes(FILE_LEN));
    let cache_dir = TempDir::new().unwrap();
    let directory = single_file_directory(
        remote,
        CacheService::new(1_024),
        &cache_dir,
        "_0.cfs",
        "__blob-0",
        FILE_LEN as u64,
    );

    let mut reader = directory.open_input("_0.cfs").unwrap();
    reader.close();
    reader.close();

    let stats = directory.file_stats("_0.cfs").unwrap();
    assert_eq!(stats.open_count(), 1);
    assert_eq!(stats.close_count(), 1);

    let mut output = vec![0u8; 10];
    match reader.read_exact(&mut output) {
        Err(CacheError::AlreadyClosed(_)) => {}
        other => panic!("expected AlreadyClosed, got {:?}", other),
    }
    match reader.seek(0) {
        Err(CacheError::AlreadyClosed(_)) => {}
        other => panic!("expected AlreadyClosed, got {:?}", other),
    }
}

#[test]
fn test_clone_close_does_not_release_parent_binding() {
    const FILE_LEN: usize = 10_000;
    let input = test_bytes(FILE_LEN);
    let remote = InMemoryRemote::single("__blob-0", input.clone());
    let cache_dir = TempDir::new().unwrap();
    let directory = single_file_directory(
        remote,
        CacheService::new(1_024),
        &cache_dir,
        "_0.cfs",
        "__blob-0",
        FILE_LEN as u64,
    );

    let mut reader = directory.open_input("_0.cfs").unwrap();
    let mut head = vec![0u8; 100];
    reader.read_exact(&mut head).unwrap();

    {
        let mut clone = reader.clone();
        clone.close();
        clone.close();
    }

    let stats = directory.file_stats("_0.cfs").unwrap();
    assert_eq!(stats.close_count(), 0);

    // The parent still reads through its (still bound) cache handle.
    let mut tail = vec![0u8; 100];
    reader.seek(5_000).unwrap();
    reader.read_exact(&mut tail).unwrap();
    assert_eq!(&tail[..], &input[5_000..5_100]);
}

#[test]
fn test_clones_read_disjoint_windows_concurrently() {
    const FILE_LEN: usize = 120_000;
    let input = test_bytes(FILE_LEN);
    let remote = InMemoryRemote::single("__blob-0", input.clone());
    let cache_dir = TempDir::new().unwrap();
    let directory = single_file_directory(
        remote,
        CacheService::new(8_192),
        &cache_dir,
        "_0.cfs",
        "__blob-0",
        FILE_LEN as u64,
    );

    let reader = directory.open_input("_0.cfs").unwrap();
    let mut handles = Vec::new();
    for chunk in 0..4 {
        let offset = chunk * 30_000;
        let mut slice = reader.slice(offset as i64, 30_000).unwrap();
        let expected = input[offset..offset + 30_000].to_vec();
        handles.push(thread::spawn(move || {
            let mut output = vec![0u8; 30_000];
            // Read in two halves with an interleaving-friendly seek.
            slice.read_exact(&mut output[..15_000]).unwrap();
            slice.seek(15_000).unwrap();
            slice.read_exact(&mut output[15_000..]).unwrap();
            assert_eq!(output, expected);
            assert_eq!(slice.position(), 30_000);
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = directory.file_stats("_0.cfs").unwrap();
    assert_eq!(stats.total_bytes_read(), FILE_LEN as u64);
}

#[test]
fn test_stats_entry_created_once_per_file_name() {
    const FILE_LEN: usize = 1_000;
    let remote = InMemoryRemote::single("__blob-0", test_bytes(FILE_LEN));
    let cache_dir = TempDir::new().unwrap();
    let directory = single_file_directory(
        remote,
        CacheService::new(1_024),
        &cache_dir,
        "_0.cfs",
        "__blob-0",
        FILE_LEN as u64,
    );

    let first = directory.open_input("_0.cfs").unwrap();
    let second = directory.open_input("_0.cfs").unwrap();
    drop((first, second));

    let stats = directory.stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats["_0.cfs"].open_count, 2);
    assert_eq!(stats["_0.cfs"].file_length, FILE_LEN as u64);
}

#[test]
fn test_clear_cache_is_idempotent_and_readers_survive() {
    const FILE_LEN: usize = 50_000;
    let input = test_bytes(FILE_LEN);
    let remote = InMemoryRemote::single("__blob-0", input.clone());
    let cache_service = CacheService::new(4_096);
    let cache_dir = TempDir::new().unwrap();
    let directory = single_file_directory(
        remote,
        Arc::clone(&cache_service),
        &cache_dir,
        "_0.cfs",
        "__blob-0",
        FILE_LEN as u64,
    );

    let mut reader = directory.open_input("_0.cfs").unwrap();
    let mut head = vec![0u8; 25_000];
    reader.read_exact(&mut head).unwrap();
    assert_eq!(&head[..], &input[..25_000]);
    assert_eq!(cache_service.entry_count(), 1);

    directory.clear_cache();
    directory.clear_cache();
    assert_eq!(cache_service.entry_count(), 0);

    // The reader re-binds a fresh cache entry and keeps going.
    let mut tail = vec![0u8; 25_000];
    reader.read_exact(&mut tail).unwrap();
    assert_eq!(&tail[..], &input[25_000..]);
    assert_eq!(cache_service.entry_count(), 1);
}

#[test]
fn test_closed_directory_rejects_open_input() {
    const FILE_LEN: usize = 1_000;
    let remote = InMemoryRemote::single("__blob-0", test_bytes(FILE_LEN));
    let cache_service = CacheService::new(1_024);
    let cache_dir = TempDir::new().unwrap();
    let directory = single_file_directory(
        remote,
        Arc::clone(&cache_service),
        &cache_dir,
        "_0.cfs",
        "__blob-0",
        FILE_LEN as u64,
    );
    directory.open_input("_0.cfs").unwrap();
    assert_eq!(cache_service.entry_count(), 0);

    directory.close();
    directory.close();
    match directory.open_input("_0.cfs") {
        Err(CacheError::AlreadyClosed(_)) => {}
        other => panic!("expected AlreadyClosed, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_unknown_file_name_is_a_read_failure() {
    let remote = InMemoryRemote::single("__blob-0", Vec::new());
    let cache_dir = TempDir::new().unwrap();
    let directory = single_file_directory(
        remote,
        CacheService::new(1_024),
        &cache_dir,
        "_0.cfs",
        "__blob-0",
        0,
    );
    match directory.open_input("_9.cfs") {
        Err(CacheError::ReadFailure { .. }) => {}
        other => panic!("expected ReadFailure, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_remote_failure_other_than_eviction_is_fatal() {
    struct FailingRemote;
    impl RemoteSource for FailingRemote {
        fn open_stream(
            &self,
            _physical_name: &str,
            _start: u64,
            _length: u64,
        ) -> io::Result<Box<dyn Read + Send>> {
            Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "remote unavailable",
            ))
        }
    }

    let cache_dir = TempDir::new().unwrap();
    let directory = single_file_directory(
        Arc::new(FailingRemote),
        CacheService::new(1_024),
        &cache_dir,
        "_0.cfs",
        "__blob-0",
        1_000,
    );

    let mut reader = directory.open_input("_0.cfs").unwrap();
    let mut output = vec![0u8; 100];
    match reader.read_exact(&mut output) {
        Err(err @ CacheError::ReadFailure { .. }) => {
            assert!(!err.is_handle_invalidated());
        }
        other => panic!("expected ReadFailure, got {:?}", other),
    }
}
