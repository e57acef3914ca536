//! Bounded hand-off of finished frames to the render thread

use std::array;
use std::fmt;

use super::pool::PixelBuffer;

/// Frames that can be in flight between emulation and rendering
pub const FRAME_QUEUE_CAPACITY: usize = 4;

/// Which framebuffer a frame targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramebufferId {
    /// Main output, odd field (or progressive)
    Odd,
    /// Main output, even field
    Even,
    /// Front-end UI overlay
    Ui,
    /// Extra window opened by the emulated system (debug views etc.)
    User(u8),
}

impl FramebufferId {
    /// Odd/even buffers are the emulated display; only they are paced
    pub fn is_main(self) -> bool {
        matches!(self, Self::Odd | Self::Even)
    }
}

impl fmt::Display for FramebufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Odd => f.write_str("odd"),
            Self::Even => f.write_str("even"),
            Self::Ui => f.write_str("ui"),
            Self::User(n) => write!(f, "user{}", n),
        }
    }
}

/// A finished frame on its way to the presenter
#[derive(Debug)]
pub struct Frame {
    pub buffer: PixelBuffer,
    pub width: u32,
    pub height: u32,
    /// Bytes per row
    pub pitch: u32,
    pub which: FramebufferId,
    /// Copy of emulated work RAM taken when the frame completed
    pub memory: Option<Box<[u16]>>,
}

/// Fixed-capacity circular queue of frames
///
/// Frames are popped in the order they were pushed. Coalescing removes an
/// entry from the middle and closes the gap.
pub struct FrameQueue {
    slots: [Option<Frame>; FRAME_QUEUE_CAPACITY],
    read: usize,
    len: usize,
}

impl FrameQueue {
    pub fn new() -> Self {
        Self {
            slots: array::from_fn(|_| None),
            read: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == FRAME_QUEUE_CAPACITY
    }

    fn slot(&self, offset: usize) -> usize {
        (self.read + offset) % FRAME_QUEUE_CAPACITY
    }

    /// Append a frame, handing it back when the queue is full
    pub fn push(&mut self, frame: Frame) -> Result<(), Frame> {
        if self.is_full() {
            return Err(frame);
        }
        let idx = self.slot(self.len);
        self.slots[idx] = Some(frame);
        self.len += 1;
        Ok(())
    }

    /// Take the oldest frame
    pub fn pop(&mut self) -> Option<Frame> {
        if self.len == 0 {
            return None;
        }
        let frame = self.slots[self.read].take();
        self.read = self.slot(1);
        self.len -= 1;
        frame
    }

    /// Remove the pending frame targeting `which`, if any
    pub fn coalesce(&mut self, which: FramebufferId) -> Option<Frame> {
        let pos = (0..self.len).find(|&i| {
            self.slots[self.slot(i)]
                .as_ref()
                .is_some_and(|f| f.which == which)
        })?;
        let idx = self.slot(pos);
        let stale = self.slots[idx].take();
        for i in pos..self.len - 1 {
            let next = self.slots[self.slot(i + 1)].take();
            let idx = self.slot(i);
            self.slots[idx] = next;
        }
        self.len -= 1;
        stale
    }

    /// Take every pending frame, oldest first
    pub fn drain(&mut self) -> Vec<Frame> {
        let mut frames = Vec::with_capacity(self.len);
        while let Some(frame) = self.pop() {
            frames.push(frame);
        }
        frames
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FrameQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending: Vec<FramebufferId> = (0..self.len)
            .filter_map(|i| self.slots[self.slot(i)].as_ref().map(|f| f.which))
            .collect();
        f.debug_struct("FrameQueue")
            .field("read", &self.read)
            .field("pending", &pending)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::BufferPool;

    fn frame(pool: &mut BufferPool, which: FramebufferId, tag: u32) -> Frame {
        let mut buffer = pool.acquire();
        buffer.pixels_mut()[0] = tag;
        Frame {
            buffer,
            width: 4,
            height: 1,
            pitch: 16,
            which,
            memory: None,
        }
    }

    fn tag(frame: &Frame) -> u32 {
        frame.buffer.pixels()[0]
    }

    #[test]
    fn test_fifo_order_across_wraparound() {
        let mut pool = BufferPool::new(4, 0);
        let mut queue = FrameQueue::new();
        let mut next = 0;
        for round in 0..5 {
            for _ in 0..3 {
                queue.push(frame(&mut pool, FramebufferId::Odd, next)).unwrap();
                next += 1;
            }
            for expected in (round * 3)..(round * 3 + 3) {
                let popped = queue.pop().unwrap();
                assert_eq!(tag(&popped), expected);
                pool.release(popped.buffer);
            }
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_push_rejects_when_full() {
        let mut pool = BufferPool::new(4, 0);
        let mut queue = FrameQueue::new();
        for i in 0..FRAME_QUEUE_CAPACITY as u32 {
            queue.push(frame(&mut pool, FramebufferId::User(i as u8), i)).unwrap();
        }
        assert!(queue.is_full());

        let rejected = queue.push(frame(&mut pool, FramebufferId::Ui, 99)).unwrap_err();
        assert_eq!(tag(&rejected), 99);
        assert_eq!(queue.len(), FRAME_QUEUE_CAPACITY);
    }

    #[test]
    fn test_coalesce_preserves_order_of_the_rest() {
        let mut pool = BufferPool::new(4, 0);
        let mut queue = FrameQueue::new();
        queue.push(frame(&mut pool, FramebufferId::Odd, 1)).unwrap();
        queue.push(frame(&mut pool, FramebufferId::Ui, 2)).unwrap();
        queue.push(frame(&mut pool, FramebufferId::Even, 3)).unwrap();

        let stale = queue.coalesce(FramebufferId::Ui).unwrap();
        assert_eq!(tag(&stale), 2);
        assert!(queue.coalesce(FramebufferId::User(0)).is_none());

        queue.push(frame(&mut pool, FramebufferId::Ui, 4)).unwrap();
        let order: Vec<u32> = queue.drain().iter().map(tag).collect();
        assert_eq!(order, vec![1, 3, 4]);
    }

    #[test]
    fn test_repeated_coalescing_keeps_only_newest() {
        let mut pool = BufferPool::new(4, 0);
        let mut queue = FrameQueue::new();
        queue.push(frame(&mut pool, FramebufferId::Even, 100)).unwrap();

        for i in 0..5 {
            if let Some(stale) = queue.coalesce(FramebufferId::Odd) {
                pool.release(stale.buffer);
            }
            queue.push(frame(&mut pool, FramebufferId::Odd, i)).unwrap();
            assert!(queue.len() <= FRAME_QUEUE_CAPACITY);
        }

        let frames = queue.drain();
        assert_eq!(frames.len(), 2);
        assert_eq!(tag(&frames[0]), 100);
        assert_eq!(tag(&frames[1]), 4);
        for f in frames {
            pool.release(f.buffer);
        }
        assert_eq!(pool.checked_out(), 0);
        assert_eq!(pool.available(), pool.allocated());
    }

    #[test]
    fn test_framebuffer_ids() {
        assert!(FramebufferId::Odd.is_main());
        assert!(FramebufferId::Even.is_main());
        assert!(!FramebufferId::Ui.is_main());
        assert!(!FramebufferId::User(2).is_main());
        assert_eq!(FramebufferId::User(2).to_string(), "user2");
    }
}
