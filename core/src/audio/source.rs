//! Per-channel sample storage
//!
//! Each emulated sound chip owns one `AudioSource`. Samples are always written
//! into the back buffer first. When the back buffer fills up the engine either
//! swaps it to the front (audio-synchronized modes, where the device drains
//! the front buffer directly) or publishes it into the source's ring buffer
//! (video-driven modes, where the device drains the ring).

use std::fmt;

use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Observer, Producer};

/// Handle to an audio source registered with the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u32);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Double-buffered interleaved sample storage for one source
pub struct AudioSource {
    channels: usize,
    buffers: [Vec<f32>; 2],
    /// Index of the buffer the device reads from
    front: usize,
    front_populated: bool,
    /// Samples written into the back buffer
    write_pos: usize,
    /// Samples consumed from the front buffer
    read_pos: usize,
    stream: HeapRb<f32>,
    stream_frames: usize,
    paused: bool,
}

impl AudioSource {
    /// Create a source with `buffer_frames` frames per half of the double
    /// buffer and a ring of `stream_frames` frames
    pub fn new(channels: u16, buffer_frames: usize, stream_frames: usize) -> Self {
        let channels = channels.max(1) as usize;
        let buffer_len = buffer_frames.max(1) * channels;
        let stream_frames = stream_frames.max(1);
        Self {
            channels,
            buffers: [vec![0.0; buffer_len], vec![0.0; buffer_len]],
            front: 0,
            front_populated: false,
            write_pos: 0,
            read_pos: 0,
            stream: HeapRb::new(stream_frames * channels),
            stream_frames,
            paused: false,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Frames held by each half of the double buffer
    pub fn buffer_frames(&self) -> usize {
        self.buffers[0].len() / self.channels
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// True while the device still has unread samples in the front buffer
    pub fn front_populated(&self) -> bool {
        self.front_populated
    }

    /// Copy as many samples as fit into the back buffer
    ///
    /// Returns the number of samples taken from `samples`.
    pub fn write(&mut self, samples: &[f32]) -> usize {
        let back = &mut self.buffers[1 - self.front];
        let count = samples.len().min(back.len() - self.write_pos);
        back[self.write_pos..self.write_pos + count].copy_from_slice(&samples[..count]);
        self.write_pos += count;
        count
    }

    /// True when the back buffer holds a full buffer of samples
    pub fn back_full(&self) -> bool {
        self.write_pos == self.buffers[0].len()
    }

    /// Samples currently waiting in the back buffer
    pub fn pending_samples(&self) -> usize {
        self.write_pos
    }

    /// Hand the back buffer to the device and start filling the other one
    pub fn swap(&mut self) {
        self.front = 1 - self.front;
        self.front_populated = true;
        self.write_pos = 0;
        self.read_pos = 0;
    }

    /// Move the back buffer's contents into the ring
    ///
    /// Returns the number of samples that did not fit.
    pub fn publish(&mut self) -> usize {
        let back = &self.buffers[1 - self.front];
        let pushed = self.stream.push_slice(&back[..self.write_pos]);
        let dropped = self.write_pos - pushed;
        self.write_pos = 0;
        dropped
    }

    /// Frames queued in the ring
    pub fn buffered_frames(&self) -> usize {
        self.stream.occupied_len() / self.channels
    }

    /// Frames that still fit in the ring
    pub fn vacant_frames(&self) -> usize {
        self.stream.vacant_len() / self.channels
    }

    pub fn stream_frames(&self) -> usize {
        self.stream_frames
    }

    /// Grow the ring to at least `frames`, keeping queued samples
    pub fn ensure_stream_frames(&mut self, frames: usize) {
        if frames <= self.stream_frames {
            return;
        }
        let mut grown = HeapRb::new(frames * self.channels);
        let mut chunk = [0.0f32; 256];
        loop {
            let n = self.stream.pop_slice(&mut chunk);
            if n == 0 {
                break;
            }
            grown.push_slice(&chunk[..n]);
        }
        self.stream = grown;
        self.stream_frames = frames;
    }

    /// Append up to `frames` frames from the front buffer to `out`
    ///
    /// Clears `front_populated` once the front buffer has been read to the
    /// end. Returns the number of frames appended.
    pub fn take_front(&mut self, out: &mut Vec<f32>, frames: usize) -> usize {
        if !self.front_populated {
            return 0;
        }
        let front = &self.buffers[self.front];
        let available = (front.len() - self.read_pos) / self.channels;
        let taken = available.min(frames);
        let end = self.read_pos + taken * self.channels;
        out.extend_from_slice(&front[self.read_pos..end]);
        self.read_pos = end;
        if self.read_pos == front.len() {
            self.front_populated = false;
        }
        taken
    }

    /// Append up to `frames` frames from the ring to `out`
    pub fn take_stream(&mut self, out: &mut Vec<f32>, frames: usize) -> usize {
        let start = out.len();
        let taken = frames.min(self.buffered_frames());
        out.resize(start + taken * self.channels, 0.0);
        let popped = self.stream.pop_slice(&mut out[start..]);
        debug_assert_eq!(popped, taken * self.channels);
        taken
    }
}

impl fmt::Debug for AudioSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioSource")
            .field("channels", &self.channels)
            .field("buffer_frames", &self.buffer_frames())
            .field("front_populated", &self.front_populated)
            .field("write_pos", &self.write_pos)
            .field("read_pos", &self.read_pos)
            .field("buffered_frames", &self.buffered_frames())
            .field("paused", &self.paused)
            .finish()
    }
}
