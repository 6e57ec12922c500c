//! Lock-free SPSC ring buffer.
//!
//! Carries the frames rendered by the main output callback over to the
//! auxiliary output callback, so both devices play from the single advancing
//! cursor of one graph node. Single producer (main stream), single consumer
//! (aux stream); no allocations or locks in either callback.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared handle to a ring buffer.
pub type SharedRing = Arc<RingBuffer>;

/// Create a shared ring buffer with at least `capacity` samples.
pub fn shared_ring(capacity: usize) -> SharedRing {
    Arc::new(RingBuffer::new(capacity))
}

/// Single-producer, single-consumer ring buffer of `f32` samples.
pub struct RingBuffer {
    buffer: Box<[f32]>,
    read_pos: AtomicUsize,
    write_pos: AtomicUsize,
    /// Capacity, rounded up to a power of two.
    capacity: usize,
    mask: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.next_power_of_two();
        Self {
            buffer: vec![0.0f32; capacity].into_boxed_slice(),
            read_pos: AtomicUsize::new(0),
            write_pos: AtomicUsize::new(0),
            capacity,
            mask: capacity - 1,
        }
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples available for reading.
    pub fn available(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }

    /// Free slots for writing.
    pub fn free(&self) -> usize {
        self.capacity - self.available()
    }

    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    /// Discard all buffered samples. Consumer-side only.
    pub fn clear(&self) {
        let write = self.write_pos.load(Ordering::Acquire);
        self.read_pos.store(write, Ordering::Release);
    }

    /// Write samples, returning how many fit. Producer thread only.
    pub fn write(&self, samples: &[f32]) -> usize {
        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Acquire);

        let space = self.capacity - write.wrapping_sub(read);
        let count = samples.len().min(space);
        if count == 0 {
            return 0;
        }

        let start = write & self.mask;
        let ptr = self.buffer.as_ptr().cast_mut();
        let first = count.min(self.capacity - start);

        // SAFETY: single producer; the region [write, write + count) is
        // unreachable by the consumer until the Release store below.
        #[allow(unsafe_code)]
        unsafe {
            std::ptr::copy_nonoverlapping(samples.as_ptr(), ptr.add(start), first);
            if count > first {
                std::ptr::copy_nonoverlapping(samples.as_ptr().add(first), ptr, count - first);
            }
        }

        self.write_pos
            .store(write.wrapping_add(count), Ordering::Release);
        count
    }

    /// Read samples into `output`, returning how many were read.
    /// Consumer thread only.
    pub fn read(&self, output: &mut [f32]) -> usize {
        let read = self.read_pos.load(Ordering::Relaxed);
        let write = self.write_pos.load(Ordering::Acquire);

        let count = output.len().min(write.wrapping_sub(read));
        if count == 0 {
            return 0;
        }

        let start = read & self.mask;
        let ptr = self.buffer.as_ptr();
        let first = count.min(self.capacity - start);

        // SAFETY: single consumer; the region [read, read + count) was
        // published by the producer's Release store.
        #[allow(unsafe_code)]
        unsafe {
            std::ptr::copy_nonoverlapping(ptr.add(start), output.as_mut_ptr(), first);
            if count > first {
                std::ptr::copy_nonoverlapping(ptr, output.as_mut_ptr().add(first), count - first);
            }
        }

        self.read_pos
            .store(read.wrapping_add(count), Ordering::Release);
        count
    }
}
