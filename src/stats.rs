// Copyright (C) 2023, Ava Labs, Inc. All rights reserved.
// See the file LICENSE.md for licensing terms.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::counter;

/// Latency summary for one I/O class.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TimeStats {
    /// Operations recorded.
    pub count: u64,
    /// Total time across all operations, in microseconds.
    pub total_usecs: u64,
    /// Slowest single operation, in microseconds.
    pub max_usecs: u64,
}

impl TimeStats {
    /// Mean operation time in microseconds; zero if nothing was recorded.
    pub fn mean_usecs(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.total_usecs / self.count
        }
    }
}

/// Snapshot of the log counters, taken by [`Log::stats`](crate::Log::stats)
/// or returned from [`Log::close`](crate::Log::close).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LogStats {
    /// Gets satisfied from the buffer cache.
    pub buffer_hits: u64,
    /// Gets satisfied from an in-RAM segment buffer.
    pub ram_hits: u64,
    /// Gets satisfied from the log device.
    pub storage_hits: u64,
    /// Times the ring cursor returned to offset zero.
    pub wraps: u64,
    /// Clean segments the writer did not have to write out.
    pub segments_skipped: u64,
    /// Latency of segment writes to the device.
    pub write_time: TimeStats,
    /// Latency of single-block reads from the device.
    pub read_time: TimeStats,
    /// Latency of whole-segment pre-reads after a wrap.
    pub segment_read_time: TimeStats,
}

impl fmt::Display for LogStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "== Log Information ==")?;
        writeln!(f, "Buffer Cache Hits: {}", self.buffer_hits)?;
        writeln!(f, "Ram Hits: {}", self.ram_hits)?;
        writeln!(f, "Storage Hits: {}", self.storage_hits)?;
        writeln!(f, "Wraps: {}", self.wraps)?;
        writeln!(f, "Segments Skipped: {}", self.segments_skipped)?;
        writeln!(f, "Mean Write Latency (us): {}", self.write_time.mean_usecs())?;
        writeln!(f, "Mean Read Latency (us): {}", self.read_time.mean_usecs())?;
        writeln!(
            f,
            "Mean Segment Read Latency (us): {}",
            self.segment_read_time.mean_usecs()
        )
    }
}

#[derive(Debug, Default)]
struct TimeTracker {
    count: AtomicU64,
    total_usecs: AtomicU64,
    max_usecs: AtomicU64,
}

impl TimeTracker {
    fn record(&self, elapsed: Duration) {
        let usecs = elapsed.as_micros() as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_usecs.fetch_add(usecs, Ordering::Relaxed);
        self.max_usecs.fetch_max(usecs, Ordering::Relaxed);
    }

    fn snapshot(&self) -> TimeStats {
        TimeStats {
            count: self.count.load(Ordering::Relaxed),
            total_usecs: self.total_usecs.load(Ordering::Relaxed),
            max_usecs: self.max_usecs.load(Ordering::Relaxed),
        }
    }
}

/// Shared counters, updated from every worker.
#[derive(Debug, Default)]
pub(crate) struct StatsTracker {
    buffer_hits: AtomicU64,
    ram_hits: AtomicU64,
    storage_hits: AtomicU64,
    wraps: AtomicU64,
    segments_skipped: AtomicU64,
    write_time: TimeTracker,
    read_time: TimeTracker,
    segment_read_time: TimeTracker,
}

impl StatsTracker {
    pub fn buffer_hit(&self) {
        self.buffer_hits.fetch_add(1, Ordering::Relaxed);
        counter!("heartwood.get", "tier" => "buffer").increment(1);
    }

    pub fn ram_hit(&self) {
        self.ram_hits.fetch_add(1, Ordering::Relaxed);
        counter!("heartwood.get", "tier" => "ram").increment(1);
    }

    pub fn storage_hit(&self) {
        self.storage_hits.fetch_add(1, Ordering::Relaxed);
        counter!("heartwood.get", "tier" => "storage").increment(1);
    }

    pub fn wrapped(&self) {
        self.wraps.fetch_add(1, Ordering::Relaxed);
        counter!("heartwood.wrap").increment(1);
    }

    pub fn segment_skipped(&self) {
        self.segments_skipped.fetch_add(1, Ordering::Relaxed);
        counter!("heartwood.segment.skipped").increment(1);
    }

    pub fn record_write(&self, elapsed: Duration) {
        self.write_time.record(elapsed);
        counter!("heartwood.io.write_us").increment(elapsed.as_micros() as u64);
    }

    pub fn record_read(&self, elapsed: Duration) {
        self.read_time.record(elapsed);
        counter!("heartwood.io.read_us").increment(elapsed.as_micros() as u64);
    }

    pub fn record_segment_read(&self, elapsed: Duration) {
        self.segment_read_time.record(elapsed);
        counter!("heartwood.io.segment_read_us").increment(elapsed.as_micros() as u64);
    }

    pub fn snapshot(&self) -> LogStats {
        LogStats {
            buffer_hits: self.buffer_hits.load(Ordering::Relaxed),
            ram_hits: self.ram_hits.load(Ordering::Relaxed),
            storage_hits: self.storage_hits.load(Ordering::Relaxed),
            wraps: self.wraps.load(Ordering::Relaxed),
            segments_skipped: self.segments_skipped.load(Ordering::Relaxed),
            write_time: self.write_time.snapshot(),
            read_time: self.read_time.snapshot(),
            segment_read_time: self.segment_read_time.snapshot(),
        }
    }
}
