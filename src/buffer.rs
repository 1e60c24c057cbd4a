//! Outbound buffers holding messages while the socket is disconnected.
//!
//! All buffers read in FIFO order and remove what they hand out. They differ in what they
//! forget:
//!
//! - [`RingBuffer`]: fixed capacity allocated up front; once full, the oldest unread entry is
//!   evicted to admit a new one.
//! - [`TimeBuffer`]: unbounded, but entries older than `max_age` are purged lazily on every
//!   access.
//! - [`UnboundedBuffer`]: keeps everything until read.
//!
//! Eviction and expiry are silent: losing buffered messages under pressure is the documented
//! best-effort delivery policy.
//!
//! ```rust
//! use resocket::{Buffer, RingBuffer};
//!
//! let mut ring = RingBuffer::new(5).unwrap();
//! for i in 0..7 {
//!     ring.add(i);
//! }
//! assert_eq!(ring.drain_all(), vec![2, 3, 4, 5, 6]);
//! ```

use crate::clock::{Clock, MonotonicClock};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Largest capacity a [`RingBuffer`] accepts; storage is allocated at construction.
pub const MAX_RING_CAPACITY: usize = 1 << 20;

/// Errors returned by buffer configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    #[error("ring buffer capacity {requested} exceeds maximum {max}")]
    CapacityTooLarge { requested: usize, max: usize },
}

/// Common contract of outbound buffers.
///
/// Accessors take `&mut self` because time-windowed buffers purge expired entries on access.
pub trait Buffer<T>: Send + fmt::Debug {
    /// Append an entry, possibly evicting the oldest one.
    fn add(&mut self, item: T);

    /// Remove and return the oldest pending entry.
    fn read(&mut self) -> Option<T>;

    /// Oldest pending entry without removing it.
    fn peek(&mut self) -> Option<&T>;

    /// Number of entries not yet read.
    fn len(&mut self) -> usize;

    fn is_empty(&mut self) -> bool {
        self.len() == 0
    }

    fn clear(&mut self);

    /// Fixed capacity, or `None` for unbounded buffers.
    fn capacity(&self) -> Option<usize>;

    /// Visit pending entries oldest-first without consuming them.
    fn for_each(&mut self, f: &mut dyn FnMut(&T));

    /// Read every pending entry, oldest-first.
    fn drain_all(&mut self) -> Vec<T> {
        let mut out = Vec::new();
        while let Some(item) = self.read() {
            out.push(item);
        }
        out
    }
}

/// Capacity-bounded circular buffer.
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    head: usize,
    len: usize,
}

impl<T> RingBuffer<T> {
    /// Capacity `0` is valid: writes are accepted and immediately forgotten.
    pub fn new(capacity: usize) -> Result<Self, BufferError> {
        if capacity > MAX_RING_CAPACITY {
            return Err(BufferError::CapacityTooLarge {
                requested: capacity,
                max: MAX_RING_CAPACITY,
            });
        }
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Ok(Self { slots, head: 0, len: 0 })
    }

    fn index(&self, offset: usize) -> usize {
        (self.head + offset) % self.slots.len()
    }
}

impl<T> fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.slots.len())
            .field("len", &self.len)
            .finish()
    }
}

impl<T: Send> Buffer<T> for RingBuffer<T> {
    fn add(&mut self, item: T) {
        let cap = self.slots.len();
        if cap == 0 {
            return;
        }
        if self.len == cap {
            // full: overwrite the oldest entry and move the read position past it
            let head = self.head;
            self.slots[head] = Some(item);
            self.head = (head + 1) % cap;
        } else {
            let idx = self.index(self.len);
            self.slots[idx] = Some(item);
            self.len += 1;
        }
    }

    fn read(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let item = self.slots[self.head].take();
        self.head = (self.head + 1) % self.slots.len();
        self.len -= 1;
        item
    }

    fn peek(&mut self) -> Option<&T> {
        if self.len == 0 {
            return None;
        }
        self.slots[self.head].as_ref()
    }

    fn len(&mut self) -> usize {
        self.len
    }

    fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.head = 0;
        self.len = 0;
    }

    fn capacity(&self) -> Option<usize> {
        Some(self.slots.len())
    }

    fn for_each(&mut self, f: &mut dyn FnMut(&T)) {
        for offset in 0..self.len {
            if let Some(item) = self.slots[self.index(offset)].as_ref() {
                f(item);
            }
        }
    }
}

/// Time-windowed buffer: an entry is visible only while `now - enqueued <= max_age`.
pub struct TimeBuffer<T> {
    max_age: Duration,
    clock: Arc<dyn Clock>,
    entries: VecDeque<(u64, T)>,
}

impl<T> TimeBuffer<T> {
    pub fn new(max_age: Duration) -> Self {
        Self::with_clock(max_age, Arc::new(MonotonicClock::default()))
    }

    pub fn with_clock(max_age: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { max_age, clock, entries: VecDeque::new() }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    fn purge_expired(&mut self) {
        let now = self.clock.now_millis();
        let max_age = u64::try_from(self.max_age.as_millis()).unwrap_or(u64::MAX);
        while let Some((enqueued, _)) = self.entries.front() {
            if now.saturating_sub(*enqueued) <= max_age {
                break;
            }
            self.entries.pop_front();
        }
    }
}

impl<T> fmt::Debug for TimeBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeBuffer")
            .field("max_age", &self.max_age)
            .field("clock", &self.clock)
            .field("stored", &self.entries.len())
            .finish()
    }
}

impl<T: Send> Buffer<T> for TimeBuffer<T> {
    fn add(&mut self, item: T) {
        self.purge_expired();
        let now = self.clock.now_millis();
        self.entries.push_back((now, item));
    }

    fn read(&mut self) -> Option<T> {
        self.purge_expired();
        self.entries.pop_front().map(|(_, item)| item)
    }

    fn peek(&mut self) -> Option<&T> {
        self.purge_expired();
        self.entries.front().map(|(_, item)| item)
    }

    fn len(&mut self) -> usize {
        self.purge_expired();
        self.entries.len()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn capacity(&self) -> Option<usize> {
        None
    }

    fn for_each(&mut self, f: &mut dyn FnMut(&T)) {
        self.purge_expired();
        self.entries.iter().for_each(|(_, item)| f(item));
    }
}

/// FIFO buffer without eviction.
#[derive(Debug)]
pub struct UnboundedBuffer<T> {
    entries: VecDeque<T>,
}

impl<T> UnboundedBuffer<T> {
    pub fn new() -> Self {
        Self { entries: VecDeque::new() }
    }
}

impl<T> Default for UnboundedBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + fmt::Debug> Buffer<T> for UnboundedBuffer<T> {
    fn add(&mut self, item: T) {
        self.entries.push_back(item);
    }

    fn read(&mut self) -> Option<T> {
        self.entries.pop_front()
    }

    fn peek(&mut self) -> Option<&T> {
        self.entries.front()
    }

    fn len(&mut self) -> usize {
        self.entries.len()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn capacity(&self) -> Option<usize> {
        None
    }

    fn for_each(&mut self, f: &mut dyn FnMut(&T)) {
        self.entries.iter().for_each(f);
    }
}
