//! Synthetic emulated system: a sine tone and a scrolling test pattern

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use tracing::trace;

use avsync_core::{Frame, FramebufferId, PixelBuffer, SystemControl};

/// Control surface shared between the engine and the emulation loop
#[derive(Debug)]
pub struct ToneMachine {
    /// Current speed ratio as `f32` bits
    speed: AtomicU32,
    exit_requested: AtomicBool,
    adjustments: AtomicU64,
}

impl Default for ToneMachine {
    fn default() -> Self {
        Self {
            speed: AtomicU32::new(0f32.to_bits()),
            exit_requested: AtomicBool::new(false),
            adjustments: AtomicU64::new(0),
        }
    }
}

impl ToneMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Speed offset last requested; 0.0 is nominal
    pub fn speed(&self) -> f32 {
        f32::from_bits(self.speed.load(Ordering::Relaxed))
    }

    pub fn adjustments(&self) -> u64 {
        self.adjustments.load(Ordering::Relaxed)
    }

    /// Consume a pending exit request
    pub fn take_exit_request(&self) -> bool {
        self.exit_requested.swap(false, Ordering::AcqRel)
    }
}

impl SystemControl for ToneMachine {
    fn request_speed_adjustment(&self, ratio: f32) {
        trace!("Speed adjustment {:+.6}", ratio);
        self.speed.store(ratio.to_bits(), Ordering::Relaxed);
        self.adjustments.fetch_add(1, Ordering::Relaxed);
    }

    fn notify_exit_requested(&self) {
        self.exit_requested.store(true, Ordering::Release);
    }
}

/// Sine generator producing one emulated frame of audio at a time
#[derive(Debug, Clone)]
pub struct Tone {
    phase: f32,
    step: f32,
    channels: usize,
    /// Fractional sample frames carried between emulated frames
    carry: f32,
    samples: Vec<f32>,
}

impl Tone {
    pub fn new(frequency: f32, sample_rate: u32, channels: u16) -> Self {
        Self {
            phase: 0.0,
            step: TAU * frequency / sample_rate as f32,
            channels: channels as usize,
            carry: 0.0,
            samples: Vec::new(),
        }
    }

    /// Interleaved samples for one emulated frame
    ///
    /// A positive `speed` runs the system faster, which yields more audio
    /// per emulated frame of wall-clock time.
    pub fn render_frame(&mut self, frames_per_frame: f32, speed: f32) -> &[f32] {
        let exact = frames_per_frame * (1.0 + speed) + self.carry;
        let frames = exact.floor().max(0.0);
        self.carry = exact - frames;

        self.samples.clear();
        for _ in 0..frames as usize {
            let value = self.phase.sin() * 0.25;
            self.phase = (self.phase + self.step) % TAU;
            self.samples.extend(std::iter::repeat_n(value, self.channels));
        }
        &self.samples
    }
}

/// Draw a diagonal pattern that scrolls one pixel per frame
pub fn draw_test_pattern(buffer: &mut PixelBuffer, width: u32, frame_no: u32) {
    let width = width.max(1) as usize;
    for (i, pixel) in buffer.pixels_mut().iter_mut().enumerate() {
        let x = (i % width) as u32;
        let y = (i / width) as u32;
        let v = x.wrapping_add(y).wrapping_add(frame_no) & 0xff;
        *pixel = 0xff00_0000 | (v << 16) | ((255 - v) << 8) | (frame_no & 0xff);
    }
}

/// Wrap a pattern-filled buffer into an interlaced frame
pub fn pattern_frame(mut buffer: PixelBuffer, width: u32, frame_no: u32) -> Frame {
    draw_test_pattern(&mut buffer, width, frame_no);
    let height = (buffer.len() as u32) / width.max(1);
    Frame {
        buffer,
        width,
        height,
        pitch: width * 4,
        which: if frame_no % 2 == 0 {
            FramebufferId::Even
        } else {
            FramebufferId::Odd
        },
        memory: None,
    }
}
