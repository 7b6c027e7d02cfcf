// stats.rs - Per-file read statistics
//
// One ReadStats instance exists per file name per directory lifetime and is
// shared by every reader and clone of that file. All counters are atomic so
// concurrent readers mutate them without coordination; snapshots are
// eventually consistent with ongoing reads.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// An event counter tracking count, byte total and min/max event size.
#[derive(Debug, Default)]
pub struct Counter {
    count: AtomicU64,
    total: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
}

impl Counter {
    fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            total: AtomicU64::new(0),
            min: AtomicU64::new(u64::MAX),
            max: AtomicU64::new(0),
        }
    }

    pub fn add(&self, value: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(value, Ordering::Relaxed);
        self.min.fetch_min(value, Ordering::Relaxed);
        self.max.fetch_max(value, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let count = self.count.load(Ordering::Relaxed);
        CounterSnapshot {
            count,
            total: self.total.load(Ordering::Relaxed),
            min: if count == 0 {
                0
            } else {
                self.min.load(Ordering::Relaxed)
            },
            max: self.max.load(Ordering::Relaxed),
        }
    }
}

/// A [`Counter`] that additionally accumulates elapsed time.
#[derive(Debug, Default)]
pub struct TimedCounter {
    counter: Counter,
    time_nanos: AtomicU64,
}

impl TimedCounter {
    fn new() -> Self {
        Self {
            counter: Counter::new(),
            time_nanos: AtomicU64::new(0),
        }
    }

    pub fn add(&self, value: u64, nanos: u64) {
        self.counter.add(value);
        self.time_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.counter.count()
    }

    pub fn total(&self) -> u64 {
        self.counter.total()
    }

    pub fn time_nanos(&self) -> u64 {
        self.time_nanos.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TimedCounterSnapshot {
        TimedCounterSnapshot {
            counter: self.counter.snapshot(),
            time_nanos: self.time_nanos.load(Ordering::Relaxed),
        }
    }
}

/// Mutable statistics for all readers of one file.
#[derive(Debug)]
pub struct ReadStats {
    file_length: u64,
    opened: AtomicU64,
    closed: AtomicU64,
    inner_opens: AtomicU64,
    forward_seeks: Counter,
    backward_seeks: Counter,
    contiguous_reads: Counter,
    non_contiguous_reads: Counter,
    cached_bytes_read: Counter,
    direct_bytes_read: TimedCounter,
    cached_bytes_written: TimedCounter,
}

impl ReadStats {
    pub fn new(file_length: u64) -> Self {
        Self {
            file_length,
            opened: AtomicU64::new(0),
            closed: AtomicU64::new(0),
            inner_opens: AtomicU64::new(0),
            forward_seeks: Counter::new(),
            backward_seeks: Counter::new(),
            contiguous_reads: Counter::new(),
            non_contiguous_reads: Counter::new(),
            cached_bytes_read: Counter::new(),
            direct_bytes_read: TimedCounter::new(),
            cached_bytes_written: TimedCounter::new(),
        }
    }

    pub fn file_length(&self) -> u64 {
        self.file_length
    }

    pub fn increment_open(&self) {
        self.opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_close(&self) {
        self.closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts every sequential stream opened against the remote source,
    /// whether for a cache fill or a direct fallback read.
    pub fn increment_inner_open(&self) {
        self.inner_opens.fetch_add(1, Ordering::Relaxed);
    }

    /// Classify one completed read call: contiguous when it starts exactly
    /// where the previous read on the same reader ended.
    pub fn increment_bytes_read(&self, last_read_position: u64, position: u64, bytes: u64) {
        if position == last_read_position {
            self.contiguous_reads.add(bytes);
        } else {
            self.non_contiguous_reads.add(bytes);
        }
    }

    /// Record the distance of a seek relative to the previous seek position.
    /// Zero-distance seeks are not counted.
    pub fn increment_seeks(&self, from: u64, to: u64) {
        if to > from {
            self.forward_seeks.add(to - from);
        } else if to < from {
            self.backward_seeks.add(from - to);
        }
    }

    pub fn add_cached_bytes_read(&self, bytes: u64) {
        self.cached_bytes_read.add(bytes);
    }

    pub fn add_cached_bytes_written(&self, bytes: u64, nanos: u64) {
        self.cached_bytes_written.add(bytes, nanos);
    }

    pub fn add_direct_bytes_read(&self, bytes: u64, nanos: u64) {
        self.direct_bytes_read.add(bytes, nanos);
    }

    pub fn open_count(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }

    pub fn close_count(&self) -> u64 {
        self.closed.load(Ordering::Relaxed)
    }

    pub fn inner_open_count(&self) -> u64 {
        self.inner_opens.load(Ordering::Relaxed)
    }

    pub fn cached_bytes_read(&self) -> u64 {
        self.cached_bytes_read.total()
    }

    pub fn direct_bytes_read(&self) -> u64 {
        self.direct_bytes_read.total()
    }

    pub fn cached_bytes_written(&self) -> u64 {
        self.cached_bytes_written.total()
    }

    /// Total bytes delivered to callers, from cache and fallback combined.
    pub fn total_bytes_read(&self) -> u64 {
        self.contiguous_reads.total() + self.non_contiguous_reads.total()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            file_length: self.file_length,
            open_count: self.opened.load(Ordering::Relaxed),
            close_count: self.closed.load(Ordering::Relaxed),
            inner_open_count: self.inner_opens.load(Ordering::Relaxed),
            forward_seeks: self.forward_seeks.snapshot(),
            backward_seeks: self.backward_seeks.snapshot(),
            contiguous_reads: self.contiguous_reads.snapshot(),
            non_contiguous_reads: self.non_contiguous_reads.snapshot(),
            cached_bytes_read: self.cached_bytes_read.snapshot(),
            direct_bytes_read: self.direct_bytes_read.snapshot(),
            cached_bytes_written: self.cached_bytes_written.snapshot(),
        }
    }
}

/// Point-in-time view of a [`Counter`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub count: u64,
    pub total: u64,
    pub min: u64,
    pub max: u64,
}

/// Point-in-time view of a [`TimedCounter`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedCounterSnapshot {
    #[serde(flatten)]
    pub counter: CounterSnapshot,
    pub time_nanos: u64,
}

/// Read-only snapshot of all counters for one file, safe to hand to
/// monitoring consumers while reads are ongoing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub file_length: u64,
    pub open_count: u64,
    pub close_count: u64,
    pub inner_open_count: u64,
    pub forward_seeks: CounterSnapshot,
    pub backward_seeks: CounterSnapshot,
    pub contiguous_reads: CounterSnapshot,
    pub non_contiguous_reads: CounterSnapshot,
    pub cached_bytes_read: CounterSnapshot,
    pub direct_bytes_read: TimedCounterSnapshot,
    pub cached_bytes_written: TimedCounterSnapshot,
}
