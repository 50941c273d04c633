//! Bounded block queue between pipeline stages
//!
//! A fixed-capacity FIFO of samples guarded by one mutex and two condition
//! variables. Writes and reads are all-or-nothing: a request either moves its
//! whole block or leaves the queue untouched.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

/// How a queue operation behaves when it cannot complete immediately
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoMode {
    /// Wait for space (write) or data (read)
    Blocking,
    /// Fail at once with `Full` / `Insufficient`
    NonBlocking,
}

/// Flow-control outcomes of queue operations
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue full: {requested} samples requested, {available} free")]
    Full { requested: usize, available: usize },

    #[error("queue underrun: {requested} samples requested, {available} queued")]
    Insufficient { requested: usize, available: usize },

    #[error("request of {requested} samples exceeds queue capacity {capacity}")]
    Oversized { requested: usize, capacity: usize },

    #[error("queue was cleared or closed")]
    Interrupted,

    #[error("queue finished by its writer and drained")]
    Finished,
}

#[derive(Debug)]
struct Ring {
    data: Vec<i32>,
    /// Next slot to read
    head: usize,
    /// Next slot to write
    tail: usize,
    size: usize,
    /// Bumped by every clear so waiters can tell they were released
    epoch: u64,
    closed: bool,
    /// No more writes; reads drain what is left
    finished: bool,
}

impl Ring {
    fn free(&self) -> usize {
        self.data.len() - self.size
    }

    fn push(&mut self, block: &[i32]) {
        let cap = self.data.len();
        let first = block.len().min(cap - self.tail);
        self.data[self.tail..self.tail + first].copy_from_slice(&block[..first]);
        self.data[..block.len() - first].copy_from_slice(&block[first..]);
        self.tail = (self.tail + block.len()) % cap;
        self.size += block.len();
    }

    fn pop(&mut self, out: &mut [i32]) {
        let cap = self.data.len();
        let first = out.len().min(cap - self.head);
        out[..first].copy_from_slice(&self.data[self.head..self.head + first]);
        let rest = out.len() - first;
        out[first..].copy_from_slice(&self.data[..rest]);
        self.head = (self.head + out.len()) % cap;
        self.size -= out.len();
    }

    fn reset(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.size = 0;
        self.epoch = self.epoch.wrapping_add(1);
    }
}

/// Thread-safe bounded FIFO of interleaved samples
#[derive(Debug)]
pub struct BoundedBlockQueue {
    ring: Mutex<Ring>,
    not_full: Condvar,
    not_empty: Condvar,
    capacity: usize,
}

impl BoundedBlockQueue {
    /// Create an empty queue holding up to `capacity` samples (at least 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: Mutex::new(Ring {
                data: vec![0; capacity],
                head: 0,
                tail: 0,
                size: 0,
                epoch: 0,
                closed: false,
                finished: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    /// Lock the ring, ignoring poisoning
    fn lock(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a whole block
    ///
    /// Blocking mode waits until `size + data.len() <= capacity`.
    pub fn write(&self, data: &[i32], mode: IoMode) -> Result<(), QueueError> {
        if data.len() > self.capacity {
            return Err(QueueError::Oversized {
                requested: data.len(),
                capacity: self.capacity,
            });
        }

        let mut ring = self.lock();
        if ring.closed || ring.finished {
            return Err(QueueError::Interrupted);
        }
        if ring.free() < data.len() {
            if mode == IoMode::NonBlocking {
                return Err(QueueError::Full {
                    requested: data.len(),
                    available: ring.free(),
                });
            }
            let epoch = ring.epoch;
            while ring.free() < data.len() {
                ring = self
                    .not_full
                    .wait(ring)
                    .unwrap_or_else(PoisonError::into_inner);
                if ring.closed || ring.epoch != epoch {
                    return Err(QueueError::Interrupted);
                }
            }
        }

        ring.push(data);
        drop(ring);
        self.not_empty.notify_all();
        Ok(())
    }

    /// Remove exactly `out.len()` samples
    ///
    /// Blocking mode waits until that many samples are queued.
    pub fn read(&self, out: &mut [i32], mode: IoMode) -> Result<(), QueueError> {
        if out.len() > self.capacity {
            return Err(QueueError::Oversized {
                requested: out.len(),
                capacity: self.capacity,
            });
        }

        let mut ring = self.lock();
        if ring.closed {
            return Err(QueueError::Interrupted);
        }
        if ring.size < out.len() {
            if ring.finished {
                return Err(QueueError::Finished);
            }
            if mode == IoMode::NonBlocking {
                return Err(QueueError::Insufficient {
                    requested: out.len(),
                    available: ring.size,
                });
            }
            let epoch = ring.epoch;
            while ring.size < out.len() {
                ring = self
                    .not_empty
                    .wait(ring)
                    .unwrap_or_else(PoisonError::into_inner);
                if ring.closed || ring.epoch != epoch {
                    return Err(QueueError::Interrupted);
                }
                if ring.finished && ring.size < out.len() {
                    return Err(QueueError::Finished);
                }
            }
        }

        ring.pop(out);
        drop(ring);
        self.not_full.notify_all();
        Ok(())
    }

    /// Non-blocking write
    pub fn try_write(&self, data: &[i32]) -> Result<(), QueueError> {
        self.write(data, IoMode::NonBlocking)
    }

    /// Non-blocking read
    pub fn try_read(&self, out: &mut [i32]) -> Result<(), QueueError> {
        self.read(out, IoMode::NonBlocking)
    }

    /// Samples queued
    pub fn available_for_read(&self) -> usize {
        self.lock().size
    }

    /// Free samples
    pub fn available_for_write(&self) -> usize {
        self.lock().free()
    }

    /// Total capacity in samples
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop everything queued and release every waiter with `Interrupted`
    pub fn clear(&self) {
        self.lock().reset();
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    /// Clear, then make every later call return `Interrupted`
    pub fn close(&self) {
        {
            let mut ring = self.lock();
            ring.reset();
            ring.closed = true;
        }
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Mark the end of the writer's data
    ///
    /// Later writes return `Interrupted`. Reads keep draining what is queued;
    /// once a read can no longer be satisfied it returns `Finished` instead
    /// of waiting.
    pub fn finish(&self) {
        self.lock().finished = true;
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }
}
