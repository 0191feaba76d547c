//! Entropy request sizing and the destination region
//!
//! The device returns entropy in 16-byte quanta and is asked for a count of
//! quanta in a single byte. A request is first rounded up to a whole quantum,
//! then clamped to the device limit and to the FIFO capacity. Clamping always
//! lands on a whole quantum, so the number of bytes awaited on the FIFO is
//! exactly what the device sends.

use crate::{DEVICE_MAX_BYTES, ENTROPY_QUANTUM};

/// Poison byte written over the destination before it is filled
pub const POISON: u8 = 0xff;

/// Largest transfer expressible by the one-byte quanta count
const MAX_UNITS_BYTES: usize = u8::MAX as usize * ENTROPY_QUANTUM;

/// A sized entropy request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntropyRequest {
    /// Quanta requested from the device
    pub units: u8,
    /// Bytes the device will send (`units * 16`)
    pub size: usize,
}

impl EntropyRequest {
    /// Size a request for `len` bytes.
    ///
    /// `dest_capacity` bounds the caller's request before rounding;
    /// `fifo_capacity` bounds what the reply path can hold.
    pub fn size(len: usize, dest_capacity: usize, fifo_capacity: usize) -> Self {
        let sz = len.min(dest_capacity);
        let rounded = sz.div_ceil(ENTROPY_QUANTUM) * ENTROPY_QUANTUM;

        let limit = DEVICE_MAX_BYTES.min(MAX_UNITS_BYTES).min(fifo_capacity);
        let size = if rounded > limit {
            floor_quantum(limit)
        } else {
            rounded
        };

        Self {
            // size <= 255 * 16, so the count always fits
            units: (size / ENTROPY_QUANTUM) as u8,
            size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.units == 0
    }
}

fn floor_quantum(n: usize) -> usize {
    n - n % ENTROPY_QUANTUM
}

/// Caller-visible region receiving entropy
#[derive(Clone)]
pub struct EntropyDataport {
    buf: Box<[u8]>,
    filled: usize,
}

impl EntropyDataport {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![POISON; capacity].into_boxed_slice(),
            filled: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes written by the last read
    pub fn data(&self) -> &[u8] {
        &self.buf[..self.filled]
    }

    /// Poison the first `len` bytes and hand them out for filling
    pub(crate) fn prepare(&mut self, len: usize) -> &mut [u8] {
        let len = len.min(self.buf.len());
        self.filled = 0;
        self.buf[..len].fill(POISON);
        &mut self.buf[..len]
    }

    pub(crate) fn commit(&mut self, len: usize) {
        self.filled = len.min(self.buf.len());
    }
}

impl std::fmt::Debug for EntropyDataport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntropyDataport")
            .field("capacity", &self.buf.len())
            .field("filled", &self.filled)
            .finish()
    }
}
