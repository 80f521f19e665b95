//! Block queue shared between pipeline threads.
//!
//! [`DataBuffer`] is a FIFO of sample blocks guarded by a mutex and a
//! condition variable. The producer side pushes whole blocks and eventually
//! an end-of-stream marker; the consumer side pulls blocks one at a time,
//! blocking while the queue is empty. The running total of queued samples is
//! maintained in O(1) so callers can watch fill levels without walking the
//! queue.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// Thread-safe FIFO of sample blocks with an end-of-stream marker.
pub struct DataBuffer<T> {
    inner: Mutex<Inner<T>>,
    cond: Condvar,
}

struct Inner<T> {
    queue: VecDeque<Vec<T>>,
    /// Sum of the lengths of all queued blocks.
    queued: usize,
    /// Set once; after that, pulls drain remaining blocks then report end.
    end: bool,
}

impl<T> DataBuffer<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                queued: 0,
                end: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Total number of samples currently queued across all blocks.
    pub fn queued_samples(&self) -> usize {
        self.inner.lock().unwrap().queued
    }

    /// True once the end marker is set and all blocks have been drained.
    pub fn pull_end_reached(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.end && inner.queue.is_empty()
    }

    /// Append a block to the queue.
    ///
    /// Blocks pushed after [`push_end`](Self::push_end) are dropped.
    pub fn push(&self, block: Vec<T>) {
        let mut inner = self.inner.lock().unwrap();
        if inner.end {
            return;
        }
        inner.queued += block.len();
        inner.queue.push_back(block);
        self.cond.notify_all();
    }

    /// Mark the end of the stream. Pending blocks remain pullable.
    pub fn push_end(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.end = true;
        self.cond.notify_all();
    }

    /// Remove and return the oldest block, waiting while the queue is empty.
    ///
    /// Returns `None` once the end marker is set and the queue is drained.
    pub fn pull(&self) -> Option<Vec<T>> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(block) = inner.queue.pop_front() {
                inner.queued -= block.len();
                return Some(block);
            }
            if inner.end {
                return None;
            }
            inner = self.cond.wait(inner).unwrap();
        }
    }

    /// Wait until at least `min_samples` samples are queued or the stream has
    /// ended. Consumer-side backpressure aid against high-frequency wakeups.
    pub fn wait_buffer_fill(&self, min_samples: usize) {
        let mut inner = self.inner.lock().unwrap();
        while inner.queued < min_samples && !inner.end {
            inner = self.cond.wait(inner).unwrap();
        }
    }
}

impl<T> Default for DataBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}
