//! Frame hand-off between the emulation thread and the render path

mod pool;
mod queue;

pub use pool::{BufferPool, PixelBuffer};
pub use queue::{FRAME_QUEUE_CAPACITY, Frame, FrameQueue, FramebufferId};
