//! Bounded audio queues
//!
//! `FrameQueue` carries encoded frames from the capture thread to the send
//! thread. `JitterBuffer` smooths received buffers before playback. Both drop
//! the oldest entry when full so the newest audio always gets through.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::queue::ArrayQueue;
use crossbeam::sync::{Parker, Unparker};

/// Lock-free bounded queue with drop-oldest overflow.
///
/// The consumer owns the `Parker` returned by [`FrameQueue::new`] and sleeps
/// on it between pushes.
pub struct FrameQueue<T> {
    queue: ArrayQueue<T>,
    unparker: Unparker,
    pushed: AtomicUsize,
    dropped: AtomicUsize,
}

impl<T> FrameQueue<T> {
    pub fn new(capacity: usize) -> (Arc<Self>, Parker) {
        let parker = Parker::new();
        let queue = Arc::new(Self {
            queue: ArrayQueue::new(capacity.max(1)),
            unparker: parker.unparker().clone(),
            pushed: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
        });
        (queue, parker)
    }

    /// Push an item, evicting the oldest one if full.
    /// Returns false if something was evicted.
    pub fn push(&self, item: T) -> bool {
        self.pushed.fetch_add(1, Ordering::Relaxed);
        let evicted = self.queue.force_push(item).is_some();
        if evicted {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.unparker.unpark();
        !evicted
    }

    pub fn pop(&self) -> Option<T> {
        self.queue.pop()
    }

    /// Pop, parking up to `timeout` if the queue is empty
    pub fn pop_timeout(&self, parker: &Parker, timeout: Duration) -> Option<T> {
        if let Some(item) = self.queue.pop() {
            return Some(item);
        }
        parker.park_timeout(timeout);
        self.queue.pop()
    }

    /// Wake the consumer without pushing
    pub fn wake(&self) {
        self.unparker.unpark();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn pushed_count(&self) -> usize {
        self.pushed.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Playback smoothing buffer.
///
/// Holds back output until `prefill` buffers are queued, then releases one
/// buffer per call. Running dry re-arms the prefill.
pub struct JitterBuffer<T> {
    queue: VecDeque<T>,
    capacity: usize,
    prefill: usize,
    primed: bool,
    received: usize,
    dropped: usize,
    underruns: usize,
}

impl<T> JitterBuffer<T> {
    pub fn new(capacity: usize, prefill: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
            prefill: prefill.clamp(1, capacity),
            primed: false,
            received: 0,
            dropped: 0,
            underruns: 0,
        }
    }

    pub fn insert(&mut self, item: T) {
        self.received += 1;
        if self.queue.len() == self.capacity {
            self.queue.pop_front();
            self.dropped += 1;
        }
        self.queue.push_back(item);
        if self.queue.len() >= self.prefill {
            self.primed = true;
        }
    }

    /// Next buffer to play, if the buffer is primed
    pub fn pop_ready(&mut self) -> Option<T> {
        if !self.primed {
            return None;
        }
        match self.queue.pop_front() {
            Some(item) => Some(item),
            None => {
                self.primed = false;
                self.underruns += 1;
                None
            }
        }
    }

    /// Flush everything regardless of prefill, used when the stream goes idle
    pub fn drain_all(&mut self) -> impl Iterator<Item = T> + '_ {
        self.primed = false;
        self.queue.drain(..)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.primed = false;
    }

    pub fn stats(&self) -> JitterBufferStats {
        JitterBufferStats {
            level: self.queue.len(),
            capacity: self.capacity,
            received: self.received,
            dropped: self.dropped,
            underruns: self.underruns,
        }
    }
}

/// Jitter buffer statistics
#[derive(Debug, Clone)]
pub struct JitterBufferStats {
    pub level: usize,
    pub capacity: usize,
    pub received: usize,
    pub dropped: usize,
    pub underruns: usize,
}

impl JitterBufferStats {
    pub fn drop_rate(&self) -> f32 {
        if self.received == 0 {
            0.0
        } else {
            self.dropped as f32 / self.received as f32
        }
    }
}
