// Copyright (C) 2023, Ava Labs, Inc. All rights reserved.
// See the file LICENSE.md for licensing terms.
#![warn(missing_debug_implementations, rust_2018_idioms, missing_docs)]
#![forbid(unsafe_code)]

//! # heartwood — a persistent log-structured block cache
//!
//! heartwood sits between a host workload and a slower backing store and
//! satisfies fixed-size block reads and writes from faster media: a
//! circular log on a dedicated device plus a small in-RAM buffer cache.
//!
//! Puts land in the current in-RAM segment buffer and a background writer
//! drains full segments to the log in FIFO order. Gets fall through the
//! buffer cache, the resident segment buffers, and finally a pool of
//! per-block readers that fetch from the device and repopulate the
//! buffer cache. The log is recreated on every [`Log::open`]; cached
//! contents are not meant to survive a restart.
//!
//! Requests travel as [`Message`]s with a one-shot completion channel:
//!
//! ```no_run
//! use heartwood::{Log, LogConfig, Message};
//!
//! let cfg = LogConfig::builder()
//!     .path("/tmp/heartwood.log".into())
//!     .blocks(65536)
//!     .build();
//! let (log, blocks) = Log::open(&cfg).unwrap();
//!
//! let (put, done) = Message::put(0, vec![0x11; 4096]);
//! log.submit(put).unwrap();
//! done.blocking_recv().unwrap();
//!
//! let (get, done) = Message::get(0, vec![0; 4096]);
//! log.submit(get).unwrap();
//! let block = done.blocking_recv().unwrap().into_buf();
//! assert_eq!(block, vec![0x11; 4096]);
//! assert!(blocks > 0);
//!
//! println!("{}", log.close().unwrap());
//! ```

mod bufcache;
mod cachemap;
mod config;
mod error;
mod file;
mod message;
mod ring;
mod stats;

pub use bufcache::ClockCache;
pub use cachemap::CacheMap;
pub use config::LogConfig;
pub use error::LogError;
pub use message::{Message, MsgOp};
pub use ring::Log;
pub use stats::{LogStats, TimeStats};
