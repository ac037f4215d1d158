// Copyright (C) 2023, Ava Labs, Inc. All rights reserved.
// See the file LICENSE.md for licensing terms.

//! The log-structured cache engine.
//!
//! The log is one file partitioned into equal segments. A bounded pool of
//! in-RAM segment buffers cycles through four stages:
//!
//! - `CURRENT`: the one buffer receiving puts, owned by the dispatcher;
//! - `WRITING`: queued for the writer to flush (a clean buffer is skipped);
//! - `READER`: queued for the reader to reassign around the ring, with a
//!   pre-read of the device once the ring has wrapped;
//! - `AVAILABLE`: queued for the dispatcher to adopt on its next sync.
//!
//! Gets fall through three tiers: the buffer cache, the resident segment
//! buffers, and finally a pool of workers that read single blocks off the
//! device and repopulate the buffer cache.
//!
//! The dispatcher is a single thread and the sole owner of the current
//! segment; a buffer in `CURRENT` is never simultaneously in the reader
//! stage, which is what makes the put path safe against reassignment.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{bounded, select, Receiver, Sender};
use log::{debug, info, trace};
use parking_lot::RwLock;

use crate::bufcache::ClockCache;
use crate::config::LogConfig;
use crate::error::LogError;
use crate::file::{AlignedBuf, LogFile};
use crate::message::{Message, MsgOp};
use crate::stats::{LogStats, StatsTracker};

/// Inbound message queue depth; submits block when it is full.
const MSG_QUEUE_DEPTH: usize = 32;
/// Queue depth feeding the per-block read pool.
const POOL_QUEUE_DEPTH: usize = 32;
/// Workers satisfying read misses from the device.
const LOG_READERS: usize = 32;

#[derive(Debug, Clone, Copy)]
struct Geometry {
    block_size: u64,
    segment_size: u64,
    log_size: u64,
}

impl Geometry {
    fn block_offset(&self, block: u64) -> u64 {
        block * self.block_size
    }

    fn covers(&self, segment_offset: u64, offset: u64) -> bool {
        offset >= segment_offset && offset < segment_offset + self.segment_size
    }
}

/// One in-RAM segment buffer. The lock covers the bytes and the tenancy
/// (offset); the dirty flag is only ever set by the put path and cleared
/// by the writer, which the stage handoff keeps from overlapping.
#[derive(Debug)]
struct Segment {
    data: RwLock<SegmentData>,
    dirty: AtomicBool,
}

#[derive(Debug)]
struct SegmentData {
    buf: AlignedBuf,
    offset: u64,
}

impl Segment {
    fn new(segment_size: usize, alignment: usize, nowhere: u64) -> Self {
        Self {
            data: RwLock::new(SegmentData {
                buf: AlignedBuf::zeroed(segment_size, alignment),
                offset: nowhere,
            }),
            dirty: AtomicBool::new(false),
        }
    }
}

/// Handle to an open block cache log.
///
/// `submit` enqueues [`Message`]s for the dispatcher; completions come
/// back through each message's own channel. Dropping the handle still
/// shuts the pipeline down, but only [`close`](Log::close) joins the
/// workers and settles the counters.
#[derive(Debug)]
pub struct Log {
    msg_tx: Sender<Message>,
    quit_tx: Sender<()>,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<StatsTracker>,
    blocks: u64,
    block_size: u64,
    num_segments: u64,
}

impl Log {
    /// Creates the log file (any prior file at the path is removed) and
    /// starts the engine. Returns the handle and the effective block
    /// count, which is the requested count rounded down to a whole
    /// number of segments.
    pub fn open(cfg: &LogConfig) -> Result<(Self, u64), LogError> {
        if cfg.block_size == 0 {
            return Err(LogError::Config("block size must be non-zero".into()));
        }
        if cfg.blocks_per_segment == 0 {
            return Err(LogError::Config(
                "segments must hold at least one block".into(),
            ));
        }
        if cfg.segment_buffers == 0 {
            return Err(LogError::Config(
                "at least one segment buffer is required".into(),
            ));
        }
        if cfg.bufcache_entries == 0 {
            return Err(LogError::Config(
                "buffer cache must hold at least one entry".into(),
            ));
        }
        let segment_size = cfg.blocks_per_segment * cfg.block_size;
        let num_segments = cfg.blocks / cfg.blocks_per_segment;
        if num_segments == 0 {
            return Err(LogError::Config(format!(
                "{} blocks cannot hold a whole {}-block segment",
                cfg.blocks, cfg.blocks_per_segment
            )));
        }
        let blocks = num_segments * cfg.blocks_per_segment;
        let size = num_segments * segment_size;
        let segment_buffers = cfg.segment_buffers.min(num_segments as usize);
        let geo = Geometry {
            block_size: cfg.block_size,
            segment_size,
            log_size: size,
        };

        let fp = Arc::new(LogFile::create(&cfg.path, size, cfg.direct_io)?);
        let bc = Arc::new(ClockCache::new(cfg.bufcache_entries, cfg.block_size));
        let stats = Arc::new(StatsTracker::default());

        // every buffer starts "nowhere" (offset == log size) so the
        // get-path scan cannot match it before the reader assigns a
        // tenancy
        let segments: Arc<Vec<Segment>> = Arc::new(
            (0..segment_buffers)
                .map(|_| Segment::new(segment_size as usize, cfg.block_size as usize, size))
                .collect(),
        );

        let (msg_tx, msg_rx) = bounded(MSG_QUEUE_DEPTH);
        let (quit_tx, quit_rx) = bounded(1);
        let (pool_tx, pool_rx) = bounded(POOL_QUEUE_DEPTH);
        let (writing_tx, writing_rx) = bounded(segment_buffers);
        let (chreader_tx, chreader_rx) = bounded(segment_buffers);
        let (available_tx, available_rx) = bounded(segment_buffers);

        // buffer 0 becomes the current write target at offset 0; the
        // rest pre-arm through the reader stage, which parcels out the
        // following segment offsets
        segments[0].data.write().offset = 0;
        for idx in 1..segment_buffers {
            chreader_tx
                .send(idx)
                .expect("reader queue sized to the pool");
        }

        let mut workers = Vec::with_capacity(LOG_READERS + 3);
        for _ in 0..LOG_READERS {
            let (pool_rx, fp, bc, stats) =
                (pool_rx.clone(), fp.clone(), bc.clone(), stats.clone());
            workers.push(thread::spawn(move || logread(pool_rx, fp, bc, stats, geo)));
        }
        drop(pool_rx);
        {
            let (segments, fp, stats) = (segments.clone(), fp.clone(), stats.clone());
            workers.push(thread::spawn(move || {
                writer(writing_rx, chreader_tx, segments, fp, stats)
            }));
        }
        {
            let (segments, fp, stats) = (segments.clone(), fp.clone(), stats.clone());
            workers.push(thread::spawn(move || {
                reader(chreader_rx, available_tx, segments, fp, stats, geo)
            }));
        }
        let dispatcher = Dispatcher {
            inbound: msg_rx,
            quit: quit_rx,
            writing: writing_tx,
            available: available_rx,
            pool: pool_tx,
            segments,
            current: 0,
            geo,
            bc,
            stats: stats.clone(),
        };
        workers.push(thread::spawn(move || dispatcher.run()));

        info!(
            "log open: {blocks} blocks of {} bytes, {num_segments} segments of {segment_size}, {segment_buffers} buffers",
            cfg.block_size
        );

        Ok((
            Self {
                msg_tx,
                quit_tx,
                workers,
                stats,
                blocks,
                block_size: cfg.block_size,
                num_segments,
            },
            blocks,
        ))
    }

    /// Enqueues a put or get. Blocks while the inbound queue is full;
    /// completion arrives on the message's own channel.
    pub fn submit(&self, mut msg: Message) -> Result<(), LogError> {
        if msg.block() >= self.blocks {
            return Err(LogError::BlockOutOfRange {
                block: msg.block(),
                blocks: self.blocks,
            });
        }
        if msg.buf().len() as u64 != self.block_size {
            return Err(LogError::BufferSize {
                len: msg.buf().len(),
                block_size: self.block_size,
            });
        }
        msg.time_start();
        self.msg_tx.send(msg).map_err(|_| LogError::Closed)
    }

    /// Live snapshot of the counters.
    pub fn stats(&self) -> LogStats {
        self.stats.snapshot()
    }

    /// Effective number of cacheable blocks.
    pub fn total_blocks(&self) -> u64 {
        self.blocks
    }

    /// Size of one block in bytes.
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Number of segments in the log.
    pub fn num_segments(&self) -> u64 {
        self.num_segments
    }

    /// Shuts the log down: every message already submitted completes,
    /// the current segment is flushed if dirty, the workers exit and the
    /// file closes with them. Returns the settled counters.
    pub fn close(self) -> Result<LogStats, LogError> {
        let Log {
            msg_tx,
            quit_tx,
            workers,
            stats,
            ..
        } = self;
        debug!("closing log");
        // no new messages past this point; queued ones still drain
        drop(msg_tx);
        let _ = quit_tx.send(());
        drop(quit_tx);
        for worker in workers {
            worker.join().expect("log worker panicked");
        }
        Ok(stats.snapshot())
    }
}

/// Serial owner of the current segment and router of every message.
struct Dispatcher {
    inbound: Receiver<Message>,
    quit: Receiver<()>,
    writing: Sender<usize>,
    available: Receiver<usize>,
    pool: Sender<Message>,
    segments: Arc<Vec<Segment>>,
    current: usize,
    geo: Geometry,
    bc: Arc<ClockCache>,
    stats: Arc<StatsTracker>,
}

impl Dispatcher {
    fn run(mut self) {
        let inbound = self.inbound.clone();
        let quit = self.quit.clone();
        let mut draining = false;
        loop {
            if draining {
                // quit has fired and no new submits can arrive; whatever
                // is still queued gets dispatched before shutdown
                match inbound.try_recv() {
                    Ok(msg) => self.dispatch(msg),
                    Err(_) => break,
                }
            } else {
                select! {
                    recv(inbound) -> msg => match msg {
                        Ok(msg) => self.dispatch(msg),
                        Err(_) => draining = true,
                    },
                    recv(quit) -> _ => draining = true,
                }
            }
        }
        if self.segments[self.current].dirty.load(Ordering::Acquire) {
            self.sync();
        }
        debug!("dispatcher drained; closing the pipelines");
        let Dispatcher { writing, pool, .. } = self;
        // dropping the writing sender closes the writer, which closes
        // the reader behind it; dropping the pool sender stops the read
        // workers
        drop(writing);
        drop(pool);
    }

    fn dispatch(&mut self, msg: Message) {
        match msg.op() {
            MsgOp::Put => self.put(msg),
            MsgOp::Get => self.get(msg),
        }
    }

    /// Hands the current segment to the writer and adopts the next
    /// available buffer, whatever its tenancy.
    fn sync(&mut self) {
        self.writing.send(self.current).expect("writer exited early");
        self.current = self.available.recv().expect("reader exited early");
    }

    fn put(&mut self, msg: Message) {
        let offset = self.geo.block_offset(msg.block());
        // rotate until the current segment covers the target block
        loop {
            let segment_offset = self.segments[self.current].data.read().offset;
            if self.geo.covers(segment_offset, offset) {
                break;
            }
            self.sync();
        }
        // read-miss cache only: drop any stale copy before the write
        // lands
        self.bc.invalidate(offset);
        let segment = &self.segments[self.current];
        let mut data = segment.data.write();
        let at = (offset - data.offset) as usize;
        let len = msg.buf().len();
        data.buf.as_mut_slice()[at..at + len].copy_from_slice(msg.buf());
        drop(data);
        segment.dirty.store(true, Ordering::Release);
        msg.complete();
    }

    fn get(&mut self, mut msg: Message) {
        let offset = self.geo.block_offset(msg.block());
        if self.bc.get(offset, msg.buf_mut()) {
            self.stats.buffer_hit();
            msg.complete();
            return;
        }
        // at most one resident buffer can cover the block
        for segment in self.segments.iter() {
            let data = segment.data.read();
            if self.geo.covers(data.offset, offset) {
                let at = (offset - data.offset) as usize;
                let len = msg.buf().len();
                msg.buf_mut()
                    .copy_from_slice(&data.buf.as_slice()[at..at + len]);
                drop(data);
                self.stats.ram_hit();
                self.bc.set(offset, msg.buf());
                msg.complete();
                return;
            }
        }
        // not resident anywhere; the pool reads it off the device and
        // completes the message from there
        self.pool.send(msg).expect("log-read pool exited early");
    }
}

/// Drains the writing queue in FIFO order, one positional write per
/// dirty segment.
fn writer(
    writing: Receiver<usize>,
    chreader: Sender<usize>,
    segments: Arc<Vec<Segment>>,
    fp: Arc<LogFile>,
    stats: Arc<StatsTracker>,
) {
    for idx in writing.iter() {
        let segment = &segments[idx];
        if segment.dirty.load(Ordering::Acquire) {
            // shared lock: get-path scans keep hitting this segment
            // while its bytes go out
            let data = segment.data.read();
            let start = Instant::now();
            fp.write_at(data.buf.as_slice(), data.offset);
            stats.record_write(start.elapsed());
            drop(data);
            segment.dirty.store(false, Ordering::Release);
        } else {
            stats.segment_skipped();
        }
        chreader.send(idx).expect("reader exited early");
    }
    // dropping the chreader sender shuts the reader down behind us
}

/// Prepares written-out buffers for reuse: advances the ring cursor,
/// reassigns the buffer there, and publishes it as available. Once the
/// cursor has wrapped, the new tenancy holds previously written data the
/// get path may still ask for, so the buffer is re-read from the device
/// first.
fn reader(
    chreader: Receiver<usize>,
    available: Sender<usize>,
    segments: Arc<Vec<Segment>>,
    fp: Arc<LogFile>,
    stats: Arc<StatsTracker>,
    geo: Geometry,
) {
    let mut cursor = 0_u64;
    let mut wrapped = false;
    for idx in chreader.iter() {
        let segment = &segments[idx];
        // exclusive: a get-path scan must never see a half-reassigned
        // buffer
        let mut data = segment.data.write();
        cursor = (cursor + geo.segment_size) % geo.log_size;
        if cursor == 0 {
            trace!("ring cursor wrapped");
            stats.wrapped();
            wrapped = true;
        }
        data.offset = cursor;
        if wrapped {
            let start = Instant::now();
            fp.read_at(data.buf.as_mut_slice(), cursor);
            stats.record_segment_read(start.elapsed());
        }
        drop(data);
        // the dispatcher is gone during shutdown; leftover buffers still
        // have to drain through here so the writer is never left waiting
        let _ = available.send(idx);
    }
}

/// Pool worker: reads one block off the device, repopulates the buffer
/// cache, and completes the message.
fn logread(
    pool: Receiver<Message>,
    fp: Arc<LogFile>,
    bc: Arc<ClockCache>,
    stats: Arc<StatsTracker>,
    geo: Geometry,
) {
    let mut scratch = AlignedBuf::zeroed(geo.block_size as usize, geo.block_size as usize);
    for mut msg in pool.iter() {
        let offset = geo.block_offset(msg.block());
        let start = Instant::now();
        fp.read_at(scratch.as_mut_slice(), offset);
        stats.record_read(start.elapsed());
        stats.storage_hit();
        msg.buf_mut().copy_from_slice(scratch.as_slice());
        bc.set(offset, scratch.as_slice());
        msg.complete();
    }
}
