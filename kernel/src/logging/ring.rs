//! Circular byte buffer underpinning the kernel log.
//!
//! Fixed capacity, overwrite-on-full: when the buffer is full, each written
//! byte advances the tail in lockstep with the head, silently discarding the
//! oldest data. An explicit `full` flag disambiguates `head == tail`.
//! All operations take the internal spinlock.

use spin::Mutex;

struct RingState {
    storage: &'static mut [u8],
    head: usize,
    tail: usize,
    full: bool,
}

/// Spinlocked ring of bytes with overwrite semantics.
pub struct CircularBuffer {
    inner: Mutex<RingState>,
}

impl CircularBuffer {
    /// Build a ring over caller-provided storage. The slice length is the
    /// ring capacity.
    pub fn new(storage: &'static mut [u8]) -> Self {
        Self {
            inner: Mutex::new(RingState {
                storage,
                head: 0,
                tail: 0,
                full: false,
            }),
        }
    }

    /// Append `data`, overwriting the oldest bytes once full.
    pub fn write(&self, data: &[u8]) {
        let mut ring = self.inner.lock();
        let capacity = ring.storage.len();
        if capacity == 0 {
            return;
        }
        for &byte in data {
            let head = ring.head;
            ring.storage[head] = byte;
            ring.head = (head + 1) % capacity;
            if ring.full {
                ring.tail = (ring.tail + 1) % capacity;
            }
            ring.full = ring.head == ring.tail;
        }
    }

    /// Drain up to `output.len()` bytes in FIFO order. Any dequeue clears the
    /// full flag. Returns the number of bytes copied out.
    pub fn read(&self, output: &mut [u8]) -> usize {
        let mut ring = self.inner.lock();
        let capacity = ring.storage.len();
        let mut count = 0;
        while count < output.len() && (ring.full || ring.head != ring.tail) {
            output[count] = ring.storage[ring.tail];
            ring.tail = (ring.tail + 1) % capacity;
            ring.full = false;
            count += 1;
        }
        count
    }

    /// True when no bytes are buffered.
    pub fn is_empty(&self) -> bool {
        let ring = self.inner.lock();
        !ring.full && ring.head == ring.tail
    }

    /// True when the next write would discard the oldest byte.
    pub fn is_full(&self) -> bool {
        self.inner.lock().full
    }
}
