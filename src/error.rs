// Copyright (C) 2023, Ava Labs, Inc. All rights reserved.
// See the file LICENSE.md for licensing terms.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the cold paths of the log (open, submit, close).
///
/// Positional I/O failures on the hot path are not represented here: the
/// log is sized at open so that every in-range block address exists, and a
/// short read or write at that point indicates corruption and aborts.
#[derive(Debug, Error)]
pub enum LogError {
    /// The configuration cannot describe a usable log.
    #[error("invalid config: {0}")]
    Config(String),
    /// Creating or sizing the log file failed.
    #[error("io error on `{}`: {}", .path.display(), .source)]
    Io {
        /// Path of the log file the operation was against.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The message targets a block past the end of the log.
    #[error("block {block} out of range; the log holds {blocks} blocks")]
    BlockOutOfRange {
        /// The rejected block number.
        block: u64,
        /// Effective number of cacheable blocks.
        blocks: u64,
    },
    /// The message buffer is not exactly one block long.
    #[error("buffer length {len} does not match block size {block_size}")]
    BufferSize {
        /// Length of the rejected buffer.
        len: usize,
        /// The log's block size.
        block_size: u64,
    },
    /// The log was closed before the message could be enqueued.
    #[error("log has been shut down")]
    Closed,
}

impl LogError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
