//! Services the engine drives but does not implement
//!
//! The host supplies an audio output device, a presenter for finished frames
//! and a control surface on the emulated system. The engine calls into these
//! from its own threads, so presenters and system controls must be `Send`.

use crate::audio::{OutputBuffer, SampleFormat};
use crate::error::Result;
use crate::frame::FramebufferId;
use crate::mode::VsyncPolicy;

/// Output parameters asked of the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceRequest {
    pub sample_rate: u32,
    pub format: SampleFormat,
    pub channels: u16,
    /// Frames per device callback
    pub buffer_frames: u32,
}

/// Output parameters the device actually came up with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSpec {
    pub sample_rate: u32,
    pub format: SampleFormat,
    pub channels: u16,
    pub buffer_frames: u32,
}

/// Pull callback invoked from the device's own thread
pub type DeviceCallback = Box<dyn FnMut(OutputBuffer<'_>) + Send + 'static>;

/// Host audio output
pub trait AudioDevice {
    /// Open the device and start pulling samples through `callback`
    ///
    /// The device may pick different parameters than requested; the returned
    /// parameters are authoritative.
    fn open(&mut self, request: &DeviceRequest, callback: DeviceCallback) -> Result<DeviceSpec>;

    /// Stop the stream and drop the callback
    fn close(&mut self);
}

/// Borrowed view of a frame being presented
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    pub pixels: &'a [u32],
    pub width: u32,
    pub height: u32,
    /// Bytes per row
    pub pitch: u32,
    pub which: FramebufferId,
    /// Emulated work RAM captured with the frame
    pub memory: Option<&'a [u16]>,
}

/// Display backend
pub trait Presenter: Send {
    /// Upload a frame and show it for one refresh
    fn present_frame(&mut self, frame: FrameView<'_>);

    /// Show the previously presented frame for one more refresh
    fn update_display(&mut self);

    fn set_vsync(&mut self, _policy: VsyncPolicy) {}

    /// Measured emulated frames per second, once a second
    fn report_fps(&mut self, _fps: f32) {}
}

/// Control surface on the emulated system
pub trait SystemControl: Send + Sync {
    /// Run faster (positive) or slower (negative) by `ratio`
    fn request_speed_adjustment(&self, ratio: f32);

    /// Ask the emulation loop to return to its caller
    fn notify_exit_requested(&self);
}
