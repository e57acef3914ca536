//! Reusable pixel buffers
//!
//! The emulation thread draws into buffers checked out of the pool; whoever
//! consumes the frame hands the buffer back. In steady state no pixel memory
//! is allocated per frame.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Packed 32-bit pixels for one frame
///
/// Not `Clone`: each buffer is owned by exactly one holder at a time.
#[derive(Debug)]
pub struct PixelBuffer {
    pixels: Vec<u32>,
    /// Pool that handed this buffer out
    pool_id: u64,
}

impl PixelBuffer {
    fn new(len: usize, pool_id: u64) -> Self {
        Self {
            pixels: vec![0; len],
            pool_id,
        }
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u32] {
        &mut self.pixels
    }
}

/// Free-list of pixel buffers
///
/// Every buffer ever handed out is either checked out or sitting in the free
/// list: `checked_out() + available() == allocated()`.
#[derive(Debug)]
pub struct BufferPool {
    id: u64,
    free: Vec<PixelBuffer>,
    buffer_len: usize,
    allocated: usize,
}

impl BufferPool {
    /// Create a pool of `prealloc` buffers of `buffer_len` pixels each
    pub fn new(buffer_len: usize, prealloc: usize) -> Self {
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            id,
            free: (0..prealloc).map(|_| PixelBuffer::new(buffer_len, id)).collect(),
            buffer_len,
            allocated: prealloc,
        }
    }

    /// Take a buffer, allocating when the free list is empty
    pub fn acquire(&mut self) -> PixelBuffer {
        self.free.pop().unwrap_or_else(|| {
            log::warn!("BufferPool exhausted, allocating new buffer");
            self.allocated += 1;
            PixelBuffer::new(self.buffer_len, self.id)
        })
    }

    /// Give a buffer back
    ///
    /// Buffers from another pool (one replaced by a reopen) are freed instead
    /// of being kept, and do not count against this pool.
    pub fn release(&mut self, buffer: PixelBuffer) {
        if buffer.pool_id != self.id {
            log::debug!("Freeing buffer from a retired pool");
            return;
        }
        self.free.push(buffer);
    }

    /// Buffers ever created and not yet freed
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    /// Buffers sitting in the free list
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Buffers currently handed out
    pub fn checked_out(&self) -> usize {
        self.allocated - self.free.len()
    }
}
