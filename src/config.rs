// Copyright (C) 2023, Ava Labs, Inc. All rights reserved.
// See the file LICENSE.md for licensing terms.

use std::path::PathBuf;

use typed_builder::TypedBuilder;

/// Config for opening a [`Log`](crate::Log).
///
/// Everything tunable is here; the log keeps no process-wide state.
#[derive(TypedBuilder, Clone, Debug)]
pub struct LogConfig {
    /// Path of the log device. Any existing file at this path is removed
    /// on open; cached contents never survive a restart.
    pub path: PathBuf,
    /// Requested number of cacheable blocks. Rounded down so the log
    /// holds a whole number of segments.
    pub blocks: u64,
    /// Size of one block in bytes.
    #[builder(default = 4096)]
    pub block_size: u64,
    /// Blocks per segment. A segment is the unit of writer I/O and of
    /// RAM residency.
    #[builder(default = 256)] // 1MB segments with 4KB blocks
    pub blocks_per_segment: u64,
    /// Cap on the number of in-flight segment buffers.
    #[builder(default = 32)]
    pub segment_buffers: usize,
    /// Buffer cache capacity, in entries.
    #[builder(default = 4096)]
    pub bufcache_entries: usize,
    /// Open the log with `O_DIRECT`, bypassing the page cache.
    #[builder(default = false)]
    pub direct_io: bool,
}
