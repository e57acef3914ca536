//! Video side of the sync protocols
//!
//! Direct modes present frames on the emulation thread as they are
//! submitted. Queue modes push them through the [`FrameQueue`] to whichever
//! thread runs [`SyncHandle::run_video_loop`].
//!
//! [`FrameQueue`]: crate::frame::FrameQueue

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::{SyncHandle, SyncShared};
use crate::clock::VideoStandard;
use crate::drift::{DriftAction, DriftController};
use crate::error::{Result, SyncError};
use crate::frame::{Frame, PixelBuffer};
use crate::host::{FrameView, Presenter};
use crate::metrics::{FpsCounter, ProtocolStats};
use crate::mode::{SyncMode, VsyncPolicy};
use crate::monitor::lock_unpoisoned;
use crate::scheduler::{FrameRepeatTable, FrameScheduler};

/// Producer back-off while the frame queue is full
const QUEUE_FULL_BACKOFF: Duration = Duration::from_millis(1);

/// Presenter plus the per-displayed-frame timing state
pub struct VideoPath {
    presenter: Box<dyn Presenter>,
    scheduler: FrameScheduler,
    drift: DriftController,
    fps: FpsCounter,
    standard: VideoStandard,
    display_hz: u32,
}

impl VideoPath {
    pub fn new(presenter: Box<dyn Presenter>, standard: VideoStandard, display_hz: u32) -> Self {
        let table = FrameRepeatTable::build(standard.frame_rate(), display_hz);
        Self {
            presenter,
            scheduler: FrameScheduler::new(table),
            drift: DriftController::new(),
            fps: FpsCounter::new(),
            standard,
            display_hz,
        }
    }

    pub fn standard(&self) -> VideoStandard {
        self.standard
    }

    pub fn display_hz(&self) -> u32 {
        self.display_hz
    }

    pub fn max_repeat(&self) -> u32 {
        self.scheduler.table().max_repeat()
    }

    pub(super) fn set_vsync(&mut self, policy: VsyncPolicy) {
        self.presenter.set_vsync(policy);
    }

    fn retime(&mut self, standard: VideoStandard, display_hz: u32) {
        self.standard = standard;
        self.display_hz = display_hz;
        self.scheduler
            .rebuild(FrameRepeatTable::build(standard.frame_rate(), display_hz));
    }

    /// Present one frame and run the per-frame timing work
    fn process(&mut self, shared: &SyncShared, frame: &Frame) {
        let main = frame.which.is_main();
        if shared.mode == SyncMode::VideoDriven && main && self.scheduler.skip_if_dropped() {
            ProtocolStats::bump(&shared.stats.dropped_frames);
            trace!("Dropped source frame {}", self.scheduler.source_frame());
            return;
        }

        self.presenter.present_frame(FrameView {
            pixels: frame.buffer.pixels(),
            width: frame.width,
            height: frame.height,
            pitch: frame.pitch,
            which: frame.which,
            memory: frame.memory.as_deref(),
        });

        if !main {
            return;
        }

        if let Some(fps) = self.fps.tick(Instant::now()) {
            debug!("{:.1} fps", fps);
            self.presenter.report_fps(fps);
        }

        if shared.mode.uses_drift_control() {
            self.correct_drift(shared);
            let repeats = self.scheduler.complete_frame();
            for _ in 0..repeats {
                self.presenter.update_display();
            }
            ProtocolStats::add(&shared.stats.repeated_frames, repeats as u64);
        }
    }

    fn correct_drift(&mut self, shared: &SyncShared) {
        let action = {
            let mut audio = shared.audio.lock();
            if audio.active_sources() == 0 {
                return;
            }
            let clock = audio.clock().clone();
            self.drift.evaluate(&mut audio.drift, &clock)
        };

        match action {
            DriftAction::Hold => {}
            DriftAction::Adjust(ratio) => {
                ProtocolStats::bump(&shared.stats.speed_adjustments);
                shared.system.request_speed_adjustment(ratio);
            }
            DriftAction::Recover(ratio) => {
                ProtocolStats::bump(&shared.stats.underflows);
                shared.pause_playback();
                ProtocolStats::bump(&shared.stats.speed_adjustments);
                shared.system.request_speed_adjustment(ratio);
            }
        }
    }
}

impl SyncShared {
    pub(super) fn release_buffer(&self, buffer: PixelBuffer) {
        lock_unpoisoned(&self.pool, "Buffer pool").release(buffer);
    }

    /// Present a frame and give its buffer back to the pool
    fn process_framebuffer(&self, frame: Frame) {
        if let Some(video) = lock_unpoisoned(&self.video, "Video").as_mut() {
            video.process(self, &frame);
        }
        self.release_buffer(frame.buffer);
    }

    fn enqueue_frame(&self, frame: Frame) -> Result<()> {
        let mut queue = self.frames.lock();
        let stale = queue.coalesce(frame.which);
        if stale.is_some() {
            ProtocolStats::bump(&self.stats.coalesced_frames);
        }

        while queue.is_full() && !self.is_quitting() {
            ProtocolStats::bump(&self.stats.queue_full_waits);
            self.frames.notify_one();
            drop(queue);
            thread::sleep(QUEUE_FULL_BACKOFF);
            queue = self.frames.lock();
        }

        let result = if self.is_quitting() {
            Err(frame)
        } else {
            queue.push(frame)
        };
        self.frames.notify_one();
        drop(queue);

        if let Some(stale) = stale {
            self.release_buffer(stale.buffer);
        }
        result.map_err(|rejected| {
            self.release_buffer(rejected.buffer);
            SyncError::ShutDown
        })
    }
}

impl SyncHandle {
    /// Check a pixel buffer out of the pool
    pub fn acquire_framebuffer(&self) -> PixelBuffer {
        lock_unpoisoned(&self.shared.pool, "Buffer pool").acquire()
    }

    /// Hand a finished frame to the render path
    ///
    /// Queue modes enqueue it for the render thread, coalescing any pending
    /// frame for the same framebuffer; direct modes present it immediately.
    /// The frame's buffer always ends up back in the pool.
    pub fn submit_frame(&self, frame: Frame) -> Result<()> {
        let shared = &self.shared;
        if shared.is_quitting() {
            shared.release_buffer(frame.buffer);
            return Err(SyncError::ShutDown);
        }
        if shared.mode.uses_frame_queue() {
            shared.enqueue_frame(frame)
        } else {
            shared.process_framebuffer(frame);
            Ok(())
        }
    }

    /// Drain the frame queue until playback stops or the engine quits
    ///
    /// Starts playback first. Only meaningful in queue modes; returns
    /// immediately otherwise. Call again to resume after playback pauses.
    pub fn run_video_loop(&self) {
        let shared = &self.shared;
        if !shared.mode.uses_frame_queue() {
            return;
        }
        shared.start_playback();

        let mut queue = shared.frames.lock();
        loop {
            queue = shared.frames.wait_until(queue, |q| {
                !q.is_empty() || !shared.is_playing() || shared.is_quitting()
            });
            while let Some(frame) = queue.pop() {
                drop(queue);
                if shared.is_quitting() {
                    shared.release_buffer(frame.buffer);
                } else {
                    shared.process_framebuffer(frame);
                }
                queue = shared.frames.lock();
            }
            if !shared.is_playing() || shared.is_quitting() {
                break;
            }
        }
        debug!("Video loop exited");
    }

    /// Switch between NTSC and PAL timing
    pub fn set_video_standard(&self, standard: VideoStandard) {
        self.retime(|video| (standard, video.display_hz()));
    }

    /// Adapt to a new display refresh rate
    pub fn set_display_hz(&self, display_hz: u32) {
        self.retime(|video| (video.standard(), display_hz));
    }

    fn retime(&self, timing: impl FnOnce(&VideoPath) -> (VideoStandard, u32)) {
        let shared = &self.shared;
        let mut video = lock_unpoisoned(&shared.video, "Video");
        let Some(video) = video.as_mut() else {
            return;
        };
        let (standard, display_hz) = timing(video);
        video.retime(standard, display_hz);
        shared.audio.lock().retune(standard, video.max_repeat());
        debug!(
            "Video timing: {:?} on {}Hz display, max repeat {}",
            standard,
            display_hz,
            video.max_repeat()
        );
    }
}
