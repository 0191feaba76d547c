//! Inbound circular buffer shared with the link receive path
//!
//! The receive side of the serial link pushes bytes into a [`FifoDataport`];
//! the protocol engine inspects, copies out of and drains it through the
//! [`InputFifo`] trait.
//!
//! # Design
//!
//! - Fixed capacity chosen at construction, never resized
//! - Uses `parking_lot::Mutex` so the producer thread and the consumer can
//!   share one cheaply clonable handle
//! - Reads expose the largest contiguous run at the read cursor, which is
//!   shorter than the occupied length when the data wraps

use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::warn;

/// Consumer view of the inbound FIFO
pub trait InputFifo {
    /// Number of unread bytes
    fn available(&self) -> usize;

    /// Total capacity in bytes
    fn capacity(&self) -> usize;

    /// Call `f` with the largest contiguous run of unread bytes.
    ///
    /// The run may be shorter than [`available`](Self::available) when the
    /// buffer wraps; drain it and call again for the rest. `f` must not touch
    /// the FIFO.
    fn with_contiguous<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R;

    /// Remove `amount` bytes from the front.
    ///
    /// Removes at most what is available. Asking for more still drains
    /// everything and reports [`Error::BufferUnderrun`].
    fn remove(&self, amount: usize) -> Result<usize>;

    /// Drop every unread byte
    fn clear(&self);
}

/// Thread-safe fixed-capacity byte ring
#[derive(Clone)]
pub struct FifoDataport {
    inner: Arc<Mutex<FifoInner>>,
}

struct FifoInner {
    storage: Box<[u8]>,
    head: usize,
    len: usize,
    stats: FifoStats,
}

#[derive(Debug, Clone, Default)]
pub struct FifoStats {
    pub bytes_pushed: u64,
    pub bytes_removed: u64,
    pub bytes_dropped: u64,
    pub bytes_cleared: u64,
    pub underruns: u64,
}

impl FifoDataport {
    /// Create an empty FIFO holding up to `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(FifoInner {
                storage: vec![0u8; capacity].into_boxed_slice(),
                head: 0,
                len: 0,
                stats: FifoStats::default(),
            })),
        }
    }

    /// Append received bytes.
    ///
    /// Stores as many bytes as fit and returns that count; the rest is
    /// dropped.
    pub fn push(&self, data: &[u8]) -> usize {
        let mut inner = self.inner.lock();
        let capacity = inner.storage.len();
        let stored = data.len().min(capacity - inner.len);

        if stored < data.len() {
            let dropped = data.len() - stored;
            inner.stats.bytes_dropped += dropped as u64;
            warn!("FIFO full, dropping {} received bytes", dropped);
        }
        if stored == 0 {
            return 0;
        }

        let tail = (inner.head + inner.len) % capacity;
        let first = stored.min(capacity - tail);
        inner.storage[tail..tail + first].copy_from_slice(&data[..first]);
        inner.storage[..stored - first].copy_from_slice(&data[first..stored]);

        inner.len += stored;
        inner.stats.bytes_pushed += stored as u64;
        stored
    }

    /// Check if there is nothing to read
    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    /// Get buffer statistics
    pub fn stats(&self) -> FifoStats {
        self.inner.lock().stats.clone()
    }
}

impl InputFifo for FifoDataport {
    fn available(&self) -> usize {
        self.inner.lock().len
    }

    fn capacity(&self) -> usize {
        self.inner.lock().storage.len()
    }

    fn with_contiguous<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let inner = self.inner.lock();
        let run = inner.len.min(inner.storage.len() - inner.head);
        f(&inner.storage[inner.head..inner.head + run])
    }

    fn remove(&self, amount: usize) -> Result<usize> {
        let mut inner = self.inner.lock();
        let available = inner.len;
        let removed = inner.consume(amount);
        inner.stats.bytes_removed += removed as u64;

        if removed < amount {
            inner.stats.underruns += 1;
            warn!(
                "FIFO underrun: asked to remove {} bytes, {} available",
                amount, available
            );
            return Err(Error::BufferUnderrun {
                requested: amount,
                available,
            });
        }
        Ok(removed)
    }

    fn clear(&self) {
        let mut inner = self.inner.lock();
        let len = inner.len;
        inner.consume(len);
        inner.stats.bytes_cleared += len as u64;
    }
}

impl FifoInner {
    fn consume(&mut self, amount: usize) -> usize {
        let removed = amount.min(self.len);
        if removed == 0 {
            return 0;
        }
        self.len -= removed;
        self.head = if self.len == 0 {
            0
        } else {
            (self.head + removed) % self.storage.len()
        };
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_remove() {
        let fifo = FifoDataport::new(16);
        assert_eq!(fifo.push(&[1, 2, 3, 4]), 4);
        assert_eq!(fifo.available(), 4);

        fifo.with_contiguous(|run| assert_eq!(run, &[1, 2, 3, 4]));
        assert_eq!(fifo.remove(4).unwrap(), 4);
        assert!(fifo.is_empty());
    }

    #[test]
    fn test_remove_clamps_and_signals_underrun() {
        let fifo = FifoDataport::new(16);
        fifo.push(&[0; 5]);

        let err = fifo.remove(10).unwrap_err();
        assert!(matches!(
            err,
            Error::BufferUnderrun {
                requested: 10,
                available: 5
            }
        ));
        assert_eq!(fifo.available(), 0);
        assert_eq!(fifo.stats().underruns, 1);
    }

    #[test]
    fn test_partial_remove() {
        let fifo = FifoDataport::new(16);
        fifo.push(&[1, 2, 3, 4, 5]);

        assert_eq!(fifo.remove(3).unwrap(), 3);
        assert_eq!(fifo.available(), 2);
        fifo.with_contiguous(|run| assert_eq!(run, &[4, 5]));
    }

    #[test]
    fn test_overflow_drops_excess() {
        let fifo = FifoDataport::new(4);
        assert_eq!(fifo.push(&[1, 2, 3, 4, 5, 6]), 4);
        assert_eq!(fifo.available(), 4);
        assert_eq!(fifo.stats().bytes_dropped, 2);
        assert_eq!(fifo.push(&[7]), 0);
    }

    #[test]
    fn test_wrapped_contiguous_run() {
        let fifo = FifoDataport::new(8);
        fifo.push(&[0; 6]);
        fifo.remove(5).unwrap();
        fifo.push(&[1, 2, 3, 4, 5]);
        assert_eq!(fifo.available(), 6);

        // Read cursor at 5: [0, 1, 2] sit at the end, [3, 4, 5] wrapped
        fifo.with_contiguous(|run| assert_eq!(run, &[0, 1, 2]));
        fifo.remove(3).unwrap();
        fifo.with_contiguous(|run| assert_eq!(run, &[3, 4, 5]));
    }

    #[test]
    fn test_clear() {
        let fifo = FifoDataport::new(8);
        fifo.push(&[9; 7]);
        fifo.clear();
        assert!(fifo.is_empty());
        assert_eq!(fifo.stats().bytes_cleared, 7);
        assert_eq!(fifo.capacity(), 8);

        // Clearing resets the cursor so the whole capacity is contiguous again
        fifo.push(&[1; 8]);
        fifo.with_contiguous(|run| assert_eq!(run.len(), 8));
    }

    #[test]
    fn test_shared_handle() {
        let fifo = FifoDataport::new(32);
        let producer = fifo.clone();
        std::thread::spawn(move || {
            producer.push(b"hello");
        })
        .join()
        .unwrap();
        assert_eq!(fifo.available(), 5);
    }
}
