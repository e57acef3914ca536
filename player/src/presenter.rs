//! Presenter that paces like a display without drawing anything

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use avsync_core::{FrameView, FramebufferId, Presenter, VsyncPolicy};

/// Counts and checksums presented frames, sleeping out each refresh
pub struct HeadlessPresenter {
    refresh: Duration,
    vsync: VsyncPolicy,
    next_refresh: Option<Instant>,
    checksum: u64,
    presented: u64,
    refreshes: u64,
    last_fps: Option<f32>,
}

impl HeadlessPresenter {
    pub fn new(display_hz: u32) -> Self {
        Self {
            refresh: Duration::from_secs_f64(1.0 / display_hz.max(1) as f64),
            vsync: VsyncPolicy::On,
            next_refresh: None,
            checksum: 0,
            presented: 0,
            refreshes: 0,
            last_fps: None,
        }
    }

    /// Checksum of the last presented main frame
    pub fn checksum(&self) -> u64 {
        self.checksum
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }

    /// Display refreshes, including repeats
    pub fn refreshes(&self) -> u64 {
        self.refreshes
    }

    pub fn last_fps(&self) -> Option<f32> {
        self.last_fps
    }

    /// Block until the next refresh boundary
    fn wait_for_refresh(&mut self) {
        self.refreshes += 1;
        if self.vsync == VsyncPolicy::Off {
            return;
        }
        let now = Instant::now();
        let due = self.next_refresh.unwrap_or(now);
        if due > now {
            thread::sleep(due - now);
        }
        // Adaptive vsync tears instead of catching up on a missed refresh
        let late = now.saturating_duration_since(due);
        let resync = late > self.refresh || (self.vsync == VsyncPolicy::Adaptive && !late.is_zero());
        self.next_refresh = Some(if resync { now } else { due.max(now) } + self.refresh);
    }
}

/// FNV-1a over the frame's pixels
fn frame_checksum(pixels: &[u32]) -> u64 {
    pixels.iter().fold(0xcbf2_9ce4_8422_2325, |hash, &p| {
        (hash ^ p as u64).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

impl Presenter for HeadlessPresenter {
    fn present_frame(&mut self, frame: FrameView<'_>) {
        self.presented += 1;
        match frame.which {
            FramebufferId::Odd | FramebufferId::Even => {
                self.checksum = frame_checksum(frame.pixels);
                self.wait_for_refresh();
            }
            other => debug!("Ignoring {} framebuffer in headless mode", other),
        }
    }

    fn update_display(&mut self) {
        self.wait_for_refresh();
    }

    fn set_vsync(&mut self, policy: VsyncPolicy) {
        debug!("Headless vsync: {:?}", policy);
        self.vsync = policy;
    }

    fn report_fps(&mut self, fps: f32) {
        info!("{:.1} fps", fps);
        self.last_fps = Some(fps);
    }
}

impl Drop for HeadlessPresenter {
    fn drop(&mut self) {
        info!(
            "Presented {} frames over {} refreshes, last checksum {:016x}",
            self.presented, self.refreshes, self.checksum
        );
    }
}
