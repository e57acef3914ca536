//! Shared test utilities: fake device, presenter and system

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::audio::{OutputBuffer, SampleFormat};
use crate::config::{Config, EngineSettings};
use crate::engine::{EngineOptions, SyncEngine, SyncHandle};
use crate::error::{Result, SyncError};
use crate::frame::{Frame, FramebufferId};
use crate::host::{
    AudioDevice, DeviceCallback, DeviceRequest, DeviceSpec, FrameView, Presenter, SystemControl,
};
use crate::mode::VsyncPolicy;

// ============================================================================
// Audio Device
// ============================================================================

type SharedCallback = Arc<Mutex<Option<DeviceCallback>>>;

/// Device whose callback is pulled by hand from a test thread
pub struct ManualDevice {
    callback: SharedCallback,
    spec: Arc<Mutex<Option<DeviceSpec>>>,
    opens: Arc<AtomicUsize>,
    fail: bool,
}

/// Test-side end of a [`ManualDevice`]
#[derive(Clone)]
pub struct DevicePuller {
    callback: SharedCallback,
    spec: Arc<Mutex<Option<DeviceSpec>>>,
    opens: Arc<AtomicUsize>,
}

impl ManualDevice {
    pub fn new() -> (Self, DevicePuller) {
        let callback: SharedCallback = Arc::new(Mutex::new(None));
        let spec = Arc::new(Mutex::new(None));
        let opens = Arc::new(AtomicUsize::new(0));
        let device = Self {
            callback: callback.clone(),
            spec: spec.clone(),
            opens: opens.clone(),
            fail: false,
        };
        (
            device,
            DevicePuller {
                callback,
                spec,
                opens,
            },
        )
    }

    /// A device that refuses to open
    pub fn failing() -> Self {
        let (mut device, _) = Self::new();
        device.fail = true;
        device
    }
}

impl AudioDevice for ManualDevice {
    fn open(&mut self, request: &DeviceRequest, callback: DeviceCallback) -> Result<DeviceSpec> {
        if self.fail {
            return Err(SyncError::DeviceOpen("test device refused".to_string()));
        }
        let spec = DeviceSpec {
            sample_rate: request.sample_rate,
            format: request.format,
            channels: request.channels,
            buffer_frames: request.buffer_frames,
        };
        *self.callback.lock().unwrap() = Some(callback);
        *self.spec.lock().unwrap() = Some(spec);
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(spec)
    }

    fn close(&mut self) {
        self.callback.lock().unwrap().take();
    }
}

impl DevicePuller {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        self.callback.lock().unwrap().is_some()
    }

    fn channels(&self) -> usize {
        self.spec.lock().unwrap().map_or(2, |s| s.channels as usize)
    }

    /// Run the callback for `frames` float frames; `None` once closed
    pub fn pull_f32(&self, frames: usize) -> Option<Vec<f32>> {
        let mut data = vec![f32::NAN; frames * self.channels()];
        let mut callback = self.callback.lock().unwrap();
        let callback = callback.as_mut()?;
        callback(OutputBuffer::F32(&mut data));
        Some(data)
    }

    /// Run the callback for `frames` 16-bit frames
    pub fn pull_s16(&self, frames: usize) -> Option<Vec<i16>> {
        let mut data = vec![i16::MIN; frames * self.channels()];
        let mut callback = self.callback.lock().unwrap();
        let callback = callback.as_mut()?;
        callback(OutputBuffer::S16(&mut data));
        Some(data)
    }
}

// ============================================================================
// Presenter
// ============================================================================

/// Everything a [`RecordingPresenter`] saw
#[derive(Debug, Default)]
pub struct PresenterLog {
    /// Framebuffer and first pixel of each presented frame
    pub presented: Vec<(FramebufferId, u32)>,
    /// Frames that carried a memory snapshot
    pub with_memory: usize,
    pub refreshes: usize,
    pub fps_reports: Vec<f32>,
    pub vsync: Option<VsyncPolicy>,
}

/// Presenter that records calls instead of drawing
pub struct RecordingPresenter {
    log: Arc<Mutex<PresenterLog>>,
}

impl RecordingPresenter {
    pub fn new() -> (Self, Arc<Mutex<PresenterLog>>) {
        let log = Arc::new(Mutex::new(PresenterLog::default()));
        (Self { log: log.clone() }, log)
    }
}

impl Presenter for RecordingPresenter {
    fn present_frame(&mut self, frame: FrameView<'_>) {
        let mut log = self.log.lock().unwrap();
        log.presented
            .push((frame.which, frame.pixels.first().copied().unwrap_or(0)));
        if frame.memory.is_some() {
            log.with_memory += 1;
        }
    }

    fn update_display(&mut self) {
        self.log.lock().unwrap().refreshes += 1;
    }

    fn set_vsync(&mut self, policy: VsyncPolicy) {
        self.log.lock().unwrap().vsync = Some(policy);
    }

    fn report_fps(&mut self, fps: f32) {
        self.log.lock().unwrap().fps_reports.push(fps);
    }
}

// ============================================================================
// Emulated System
// ============================================================================

/// System control that records requests
#[derive(Default)]
pub struct RecordingSystem {
    pub adjustments: Mutex<Vec<f32>>,
    pub exit_requests: AtomicUsize,
}

impl RecordingSystem {
    pub fn exits(&self) -> usize {
        self.exit_requests.load(Ordering::SeqCst)
    }

    pub fn adjustments(&self) -> Vec<f32> {
        self.adjustments.lock().unwrap().clone()
    }
}

impl SystemControl for RecordingSystem {
    fn request_speed_adjustment(&self, ratio: f32) {
        self.adjustments.lock().unwrap().push(ratio);
    }

    fn notify_exit_requested(&self) {
        self.exit_requests.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Harness
// ============================================================================

/// An engine wired to fakes, plus the test-side ends of each fake
pub struct Harness {
    pub engine: SyncEngine,
    pub device: DevicePuller,
    pub presenter: Arc<Mutex<PresenterLog>>,
    pub system: Arc<RecordingSystem>,
}

/// Settings for `sync_source` with a small device buffer
pub fn settings(sync_source: &str, buffer_frames: u32) -> EngineSettings {
    let mut config = Config::default();
    config.system.sync_source = sync_source.to_string();
    config.audio.buffer = buffer_frames;
    config.resolve(sync_source == "external")
}

pub fn harness(settings: EngineSettings, display_hz: u32) -> Harness {
    let (device, puller) = ManualDevice::new();
    let (presenter, log) = RecordingPresenter::new();
    let system = Arc::new(RecordingSystem::default());
    let options = EngineOptions {
        display_hz,
        framebuffer_pixels: 16,
        prealloc_buffers: 2,
    };
    let engine = SyncEngine::new(
        settings,
        options,
        Box::new(device),
        Box::new(presenter),
        system.clone(),
    )
    .unwrap();
    Harness {
        engine,
        device: puller,
        presenter: log,
        system,
    }
}

/// A frame tagged through its first pixel
pub fn tagged_frame(handle: &SyncHandle, which: FramebufferId, tag: u32) -> Frame {
    let mut buffer = handle.acquire_framebuffer();
    buffer.pixels_mut()[0] = tag;
    Frame {
        buffer,
        width: 4,
        height: 4,
        pitch: 16,
        which,
        memory: None,
    }
}

/// Poll `cond` until it holds or `timeout` passes
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}
