// Copyright (C) 2023, Ava Labs, Inc. All rights reserved.
// See the file LICENSE.md for licensing terms.

use std::any::Any;
use std::fmt;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

/// Operation carried by a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgOp {
    /// Write one block to the log.
    Put,
    /// Read one block from the log into the message's buffer.
    Get,
}

/// One block request.
///
/// The message (and its buffer) moves into the log on submit and comes
/// back whole through the completion channel once the operation is done.
/// `private` is never touched by the log.
pub struct Message {
    op: MsgOp,
    block: u64,
    buf: Vec<u8>,
    /// Client-opaque payload; survives the round trip untouched.
    pub private: Option<Box<dyn Any + Send>>,
    done: Option<oneshot::Sender<Message>>,
    start: Option<Instant>,
    elapsed: Option<Duration>,
}

impl Message {
    /// A put of `buf` (one block of data) at `block`. Returns the message
    /// and the receiver its completion fires.
    pub fn put(block: u64, buf: Vec<u8>) -> (Self, oneshot::Receiver<Message>) {
        Self::new(MsgOp::Put, block, buf)
    }

    /// A get of `block` into `buf`, which must be one block long.
    pub fn get(block: u64, buf: Vec<u8>) -> (Self, oneshot::Receiver<Message>) {
        Self::new(MsgOp::Get, block, buf)
    }

    fn new(op: MsgOp, block: u64, buf: Vec<u8>) -> (Self, oneshot::Receiver<Message>) {
        let (done, rx) = oneshot::channel();
        (
            Self {
                op,
                block,
                buf,
                private: None,
                done: Some(done),
                start: None,
                elapsed: None,
            },
            rx,
        )
    }

    /// The operation this message carries.
    pub fn op(&self) -> MsgOp {
        self.op
    }

    /// The logical block number the operation targets.
    pub fn block(&self) -> u64 {
        self.block
    }

    /// The block buffer: the data to write for a put, the data read back
    /// for a completed get.
    pub fn buf(&self) -> &[u8] {
        &self.buf
    }

    pub(crate) fn buf_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Consumes the message, handing the buffer back.
    pub fn into_buf(self) -> Vec<u8> {
        self.buf
    }

    /// Starts (or resumes) the latency clock. `submit` calls this; it is
    /// public so callers measuring their own queueing can restart it.
    pub fn time_start(&mut self) {
        self.start = Some(Instant::now());
    }

    /// Stops the latency clock, accumulating into [`latency`](Self::latency).
    pub fn time_stop(&mut self) {
        if let Some(start) = self.start.take() {
            *self.elapsed.get_or_insert(Duration::ZERO) += start.elapsed();
        }
    }

    /// Time spent between `time_start` and `time_stop` (completion stops
    /// the clock). `None` until the clock has run once.
    pub fn latency(&self) -> Option<Duration> {
        self.elapsed
    }

    /// Fires the completion signal, sending the whole message back. The
    /// submitter may have dropped its receiver; the message is then
    /// simply dropped.
    pub(crate) fn complete(mut self) {
        self.time_stop();
        if let Some(done) = self.done.take() {
            let _ = done.send(self);
        }
    }
}

// Manual implementation since `private` is opaque.
impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("op", &self.op)
            .field("block", &self.block)
            .field("buf_len", &self.buf.len())
            .field("private", &self.private.is_some())
            .field("elapsed", &self.elapsed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Tag {
        id: u64,
        name: String,
    }

    #[test]
    fn private_survives_round_trip() {
        let (mut msg, rx) = Message::get(9, vec![0; 16]);
        msg.private = Some(Box::new(Tag {
            id: 77,
            name: "lun0".to_string(),
        }));

        std::thread::spawn(move || msg.complete());

        let done = rx.blocking_recv().unwrap();
        let tag = done.private.unwrap().downcast::<Tag>().unwrap();
        assert_eq!(
            *tag,
            Tag {
                id: 77,
                name: "lun0".to_string()
            }
        );
    }

    #[test]
    fn completion_returns_mutated_buffer() {
        let (msg, rx) = Message::get(3, vec![0; 8]);
        assert_eq!(msg.op(), MsgOp::Get);
        assert_eq!(msg.block(), 3);

        std::thread::spawn(move || {
            let mut msg = msg;
            msg.buf_mut().fill(0xab);
            msg.complete();
        });

        let done = rx.blocking_recv().unwrap();
        assert_eq!(done.into_buf(), vec![0xab; 8]);
    }

    #[test]
    fn completion_with_dropped_receiver_is_quiet() {
        let (msg, rx) = Message::put(0, vec![0; 8]);
        drop(rx);
        msg.complete();
    }

    #[test]
    fn latency_accumulates() {
        let (mut msg, _rx) = Message::put(0, vec![0; 8]);
        assert_eq!(msg.latency(), None);
        for _ in 0..100 {
            msg.time_start();
            std::hint::black_box((0..1000).sum::<u64>());
            msg.time_stop();
        }
        assert!(msg.latency().unwrap() > Duration::ZERO);
    }
}
