//! Lock-free SPSC ring buffer for f32 audio samples.
//!
//! One producer (the render worker) and one consumer (the audio callback).
//! A write reserves up to `n` slots, fills one or two contiguous regions
//! (the buffer wraps), then commits by publishing the write index with a
//! release store; the consumer observes committed samples through an acquire
//! load. Capacity must be a power of two.

use std::sync::atomic::{AtomicUsize, Ordering};

pub struct SpscRingBuffer {
    buffer: Box<[f32]>,
    capacity: usize,
    mask: usize,
    read_pos: AtomicUsize,
    write_pos: AtomicUsize,
}

// SAFETY: designed for single-producer single-consumer use across threads;
// the atomic indices provide the required synchronization and the producer
// and consumer never touch the same region concurrently.
unsafe impl Send for SpscRingBuffer {}
unsafe impl Sync for SpscRingBuffer {}

impl SpscRingBuffer {
    /// Create a ring buffer. `capacity` must be a power of two.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "capacity must be a power of 2");
        Self {
            buffer: vec![0.0f32; capacity].into_boxed_slice(),
            capacity,
            mask: capacity - 1,
            read_pos: AtomicUsize::new(0),
            write_pos: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples committed and not yet consumed.
    pub fn available(&self) -> usize {
        let w = self.write_pos.load(Ordering::Acquire);
        let r = self.read_pos.load(Ordering::Acquire);
        w.wrapping_sub(r)
    }

    /// Free slots the producer may reserve.
    pub fn free_space(&self) -> usize {
        self.capacity - self.available()
    }

    /// Write samples, dropping whatever does not fit. Returns the number of
    /// samples actually written.
    ///
    /// Producer side only.
    pub fn write(&self, data: &[f32]) -> usize {
        let n = data.len().min(self.free_space());
        if n == 0 {
            return 0;
        }

        // Reserve: split the region at the wrap point.
        let w = self.write_pos.load(Ordering::Relaxed);
        let start = w & self.mask;
        let first = n.min(self.capacity - start);

        // SAFETY: the single producer has exclusive write access to the n
        // reserved slots; the consumer only reads below the committed index.
        let buf_ptr = self.buffer.as_ptr() as *mut f32;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), buf_ptr.add(start), first);
            if n > first {
                std::ptr::copy_nonoverlapping(data.as_ptr().add(first), buf_ptr, n - first);
            }
        }

        // Commit.
        self.write_pos.store(w.wrapping_add(n), Ordering::Release);
        n
    }

    /// Read up to `out.len()` samples. Returns the number actually read;
    /// `out[count..]` is left untouched.
    ///
    /// Consumer side only.
    pub fn read(&self, out: &mut [f32]) -> usize {
        let n = out.len().min(self.available());
        if n == 0 {
            return 0;
        }

        let r = self.read_pos.load(Ordering::Relaxed);
        let start = r & self.mask;
        let first = n.min(self.capacity - start);

        out[..first].copy_from_slice(&self.buffer[start..start + first]);
        if n > first {
            out[first..n].copy_from_slice(&self.buffer[..n - first]);
        }

        self.read_pos.store(r.wrapping_add(n), Ordering::Release);
        n
    }

    /// Empty the buffer. Safe only while neither side is actively using it
    /// (pipeline reset).
    pub fn reset(&self) {
        self.read_pos.store(0, Ordering::Release);
        self.write_pos.store(0, Ordering::Release);
    }
}
