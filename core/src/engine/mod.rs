//! Synchronization engine
//!
//! Owns the audio device and the shared state every sync protocol runs on.
//!
//! # Threads
//!
//! ```text
//! Emulation thread          Render thread (queue modes)      Device callback
//!     │                            │                               │
//! [push_samples]──(audio lock)─────┼────────────────────────────►[fill]
//!     │                            │                               │
//! [submit_frame]──(frame queue)──►[run_video_loop]                 │
//!     │ (direct modes)             │                               │
//! [present + drift]                [present + drift]               │
//! ```
//!
//! In `AudioThread` mode the emulation thread *is* the device callback: the
//! callback runs the emulated system through the registered runner.
//!
//! # Lock order
//!
//! runner → video → audio → frame queue → buffer pool. Every waiter
//! re-checks the quitting flag, and [`SyncHandle::quit`] wakes them all.

mod audio;
mod video;


use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::audio::MixState;
use crate::clock::SampleClock;
use crate::config::EngineSettings;
use crate::error::{Result, SyncError};
use crate::frame::{BufferPool, FRAME_QUEUE_CAPACITY, FrameQueue};
use crate::host::{AudioDevice, DeviceRequest, DeviceSpec, Presenter, SystemControl};
use crate::metrics::{ProtocolStats, StatsSnapshot};
use crate::mode::{SyncMode, VsyncPolicy};
use crate::monitor::{Monitor, lock_unpoisoned};

pub use video::VideoPath;

/// Output channels requested from the device
pub const OUTPUT_CHANNELS: u16 = 2;

/// Runs the emulated system until it is asked to exit
///
/// Invoked from the device callback in `AudioThread` mode with a handle to
/// the engine it runs under.
pub type SystemRunner = Box<dyn FnMut(&SyncHandle) + Send + 'static>;

/// Host facts the engine cannot read from the config file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Display refresh rate in Hz; 0 when unknown
    pub display_hz: u32,
    /// Pixels per framebuffer handed out by the pool
    pub framebuffer_pixels: usize,
    /// Framebuffers allocated up front
    pub prealloc_buffers: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            display_hz: 60,
            framebuffer_pixels: 320 * 240,
            prealloc_buffers: FRAME_QUEUE_CAPACITY + 2,
        }
    }
}

/// Buffer pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub allocated: usize,
    pub available: usize,
    pub checked_out: usize,
}

/// State shared by the emulation thread, the render thread and the device
/// callback
pub(crate) struct SyncShared {
    mode: SyncMode,
    vsync: VsyncPolicy,
    /// Mixer state; the default condition variable is "audio ready"
    audio: Monitor<MixState>,
    /// Pending frames; the default condition variable is "frame ready"
    frames: Monitor<FrameQueue>,
    pool: Mutex<BufferPool>,
    video: Mutex<Option<VideoPath>>,
    runner: Mutex<Option<SystemRunner>>,
    system: Arc<dyn SystemControl>,
    playing: AtomicBool,
    quitting: AtomicBool,
    stats: ProtocolStats,
}

impl SyncShared {
    fn is_quitting(&self) -> bool {
        self.quitting.load(Ordering::Acquire)
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    fn start_playback(&self) {
        if !self.playing.swap(true, Ordering::AcqRel) {
            debug!("Audio playback started ({} sync)", self.mode);
        }
    }

    /// Stop playback and wake the render loop so it can return
    fn pause_playback(&self) {
        if self.playing.swap(false, Ordering::AcqRel) {
            debug!("Audio playback paused ({} sync)", self.mode);
        }
        drop(self.frames.lock());
        self.frames.notify_all();
    }

    /// Set the quitting flag and wake every waiter
    ///
    /// Frames still queued are discarded and their buffers returned.
    fn quit(&self) {
        if self.quitting.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("Sync engine quitting");
        {
            let audio = self.audio.lock();
            audio.notify_all_drained();
            self.audio.notify_all();
        }
        let pending = self.frames.lock().drain();
        self.frames.notify_all();
        for frame in pending {
            self.release_buffer(frame.buffer);
        }
    }

    fn request_exit(&self) {
        ProtocolStats::bump(&self.stats.exit_requests);
        self.system.notify_exit_requested();
    }
}

/// Cloneable, thread-safe access to a running engine
///
/// A handle stays bound to the engine instance it was taken from; after
/// [`SyncEngine::reopen`] old handles report [`SyncError::ShutDown`].
///
/// [`SyncError::ShutDown`]: crate::error::SyncError::ShutDown
#[derive(Clone)]
pub struct SyncHandle {
    shared: Arc<SyncShared>,
}

impl SyncHandle {
    pub fn mode(&self) -> SyncMode {
        self.shared.mode
    }

    /// Vsync setting the presenter was configured with
    pub fn vsync(&self) -> VsyncPolicy {
        self.shared.vsync
    }

    pub fn is_playing(&self) -> bool {
        self.shared.is_playing()
    }

    pub fn is_quitting(&self) -> bool {
        self.shared.is_quitting()
    }

    /// Whether the emulated system should be released when the front-end exits
    pub fn releases_on_exit(&self) -> bool {
        self.shared.mode.releases_on_exit()
    }

    /// How often per second the emulated system should sync its audio
    pub fn audio_syncs_per_sec(&self) -> u32 {
        self.shared
            .audio
            .lock()
            .clock()
            .syncs_per_sec(self.shared.mode.is_audio_sync())
    }

    /// Buffered frames needed before video-driven playback starts
    pub fn min_buffered(&self) -> u32 {
        self.shared.audio.lock().clock().min_buffered()
    }

    /// Register the closure the device callback uses to run the emulated
    /// system in `AudioThread` mode
    pub fn set_system_runner(&self, runner: SystemRunner) {
        *lock_unpoisoned(&self.shared.runner, "Runner") = Some(runner);
    }

    /// Run `f` with the audio lock held
    pub fn with_audio_locked<R>(&self, f: impl FnOnce(&mut MixState) -> R) -> R {
        let mut audio = self.shared.audio.lock();
        f(&mut audio)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn pool_stats(&self) -> PoolStats {
        let pool = lock_unpoisoned(&self.shared.pool, "Buffer pool");
        PoolStats {
            allocated: pool.allocated(),
            available: pool.available(),
            checked_out: pool.checked_out(),
        }
    }

    /// Frames waiting for the render thread
    pub fn pending_frames(&self) -> usize {
        self.shared.frames.lock().len()
    }

    /// Stop every protocol and wake all waiters
    pub fn quit(&self) {
        self.shared.quit();
    }
}

/// The synchronization engine
///
/// Owns the audio device. Dropping the engine quits every protocol and
/// closes the device.
pub struct SyncEngine {
    device: Box<dyn AudioDevice>,
    handle: SyncHandle,
    settings: EngineSettings,
    options: EngineOptions,
    spec: DeviceSpec,
    closed: bool,
}

impl SyncEngine {
    /// Open the audio device and set up the protocol for `settings.mode`
    ///
    /// Failing to open the device is fatal and returned as an error.
    pub fn new(
        settings: EngineSettings,
        options: EngineOptions,
        mut device: Box<dyn AudioDevice>,
        presenter: Box<dyn Presenter>,
        system: Arc<dyn SystemControl>,
    ) -> Result<Self> {
        let video = VideoPath::new(presenter, settings.standard, options.display_hz);
        let (shared, spec) = Self::open(&mut *device, settings, options, video, system, None)?;
        Ok(Self {
            device,
            handle: SyncHandle { shared },
            settings,
            options,
            spec,
            closed: false,
        })
    }

    fn open(
        device: &mut dyn AudioDevice,
        settings: EngineSettings,
        options: EngineOptions,
        mut video: VideoPath,
        system: Arc<dyn SystemControl>,
        runner: Option<SystemRunner>,
    ) -> Result<(Arc<SyncShared>, DeviceSpec)> {
        let mode = settings.mode;
        video.set_vsync(settings.vsync);

        let mut clock = SampleClock::new(settings.sample_rate);
        clock.retune(video.standard(), video.max_repeat());
        let audio = MixState::new(
            clock,
            OUTPUT_CHANNELS,
            settings.buffer_frames as usize,
            mode.uses_drift_control(),
        );

        let shared = Arc::new(SyncShared {
            mode,
            vsync: settings.vsync,
            audio: Monitor::new(audio),
            frames: Monitor::new(FrameQueue::new()),
            pool: Mutex::new(BufferPool::new(
                options.framebuffer_pixels,
                options.prealloc_buffers,
            )),
            video: Mutex::new(Some(video)),
            runner: Mutex::new(runner),
            system,
            playing: AtomicBool::new(false),
            quitting: AtomicBool::new(false),
            stats: ProtocolStats::default(),
        });

        let request = DeviceRequest {
            sample_rate: settings.sample_rate,
            format: settings.format,
            channels: OUTPUT_CHANNELS,
            buffer_frames: settings.buffer_frames,
        };
        let callback_shared = Arc::clone(&shared);
        let spec = device.open(&request, Box::new(move |out| callback_shared.fill(out)))?;

        shared.audio.lock().apply_device(
            spec.sample_rate,
            spec.channels,
            spec.buffer_frames as usize,
        );

        info!(
            "Sync engine ready: {} sync, {}Hz {} x{} ({} frame buffer), vsync {:?}",
            mode,
            spec.sample_rate,
            spec.format.as_str(),
            spec.channels,
            spec.buffer_frames,
            settings.vsync
        );
        Ok((shared, spec))
    }

    pub fn handle(&self) -> &SyncHandle {
        &self.handle
    }

    pub fn mode(&self) -> SyncMode {
        self.handle.mode()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Parameters the device actually opened with
    pub fn device_spec(&self) -> DeviceSpec {
        self.spec
    }

    /// Tear down the current protocol and reopen the device with `settings`
    ///
    /// Audio sources keep their ids, channel counts and pause flags but lose
    /// any buffered samples. The presenter, video timing and system runner
    /// carry over, and playback resumes if it was running. Frames still in
    /// flight go back to the old pool. If the device fails to reopen the
    /// engine stays shut down.
    pub fn reopen(&mut self, settings: EngineSettings) -> Result<()> {
        let old = Arc::clone(&self.handle.shared);
        let layout = old.audio.lock().source_layout();
        let was_playing = old.is_playing();

        old.quit();
        self.device.close();

        let video = lock_unpoisoned(&old.video, "Video")
            .take()
            .ok_or(SyncError::ShutDown)?;
        let runner = lock_unpoisoned(&old.runner, "Runner").take();
        old.stats.snapshot().log();

        let (shared, spec) = Self::open(
            &mut *self.device,
            settings,
            self.options,
            video,
            Arc::clone(&old.system),
            runner,
        )?;
        {
            let mut audio = shared.audio.lock();
            for &(id, channels, paused) in &layout {
                audio.restore_source(id, channels, paused);
            }
        }
        if was_playing {
            shared.start_playback();
        }

        debug!(
            "Reopened sync engine: {} -> {} sync, {} sources carried over",
            old.mode,
            settings.mode,
            layout.len()
        );
        self.handle = SyncHandle { shared };
        self.settings = settings;
        self.spec = spec;
        self.closed = false;
        Ok(())
    }

    /// Quit every protocol and close the device
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.handle.quit();
        self.device.close();
        self.handle.stats().log();
        debug!("Sync engine shut down");
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
