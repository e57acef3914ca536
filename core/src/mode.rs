//! Synchronization source selection
//!
//! The sync mode decides who owns the clock: the audio device, a dedicated
//! audio thread, the display refresh, or an external driver. It is chosen once
//! when the engine is built and only changes through a full reopen.

use std::fmt;

/// Which clock authority paces emulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncMode {
    /// The device callback waits for every source and the producer waits for
    /// drained buffers
    AudioCallback,
    /// The device callback runs the emulated system itself
    AudioThread,
    /// Emulation follows display refresh; drift correction keeps audio in line
    VideoDriven,
    /// Like `VideoDriven` for audio, but frames are rendered on another thread
    External,
}

/// Whether presentation waits for vertical blank
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VsyncPolicy {
    On,
    Off,
    /// Sync when on time, tear when late
    Adaptive,
}

impl SyncMode {
    /// Resolve the mode from the `system.sync_source` setting
    ///
    /// `external_sync` overrides the setting. Unknown names fall back to
    /// video-driven sync.
    pub fn from_source(sync_source: &str, external_sync: bool) -> Self {
        if external_sync {
            return Self::External;
        }
        match sync_source {
            "audio" => Self::AudioCallback,
            "audio_thread" => Self::AudioThread,
            _ => Self::VideoDriven,
        }
    }

    /// True when the audio device is the clock authority
    pub fn is_audio_sync(self) -> bool {
        matches!(self, Self::AudioCallback | Self::AudioThread)
    }

    /// True when frames travel through the frame queue to a render thread
    pub fn uses_frame_queue(self) -> bool {
        matches!(self, Self::AudioThread | Self::External)
    }

    /// True when sources stream into ring buffers watched by drift control
    pub fn uses_drift_control(self) -> bool {
        !self.is_audio_sync()
    }

    /// Whether the emulated system should be released when the front-end exits
    ///
    /// In `AudioThread` mode the system lives inside the device callback and is
    /// torn down with the device instead.
    pub fn releases_on_exit(self) -> bool {
        self != Self::AudioThread
    }

    /// Vsync setting to hand the presenter
    ///
    /// Only `AudioCallback` mode lets the user turn vsync off; every other
    /// mode needs display refresh to pace or present frames.
    pub fn vsync(self, configured: &str) -> VsyncPolicy {
        if self != Self::AudioCallback {
            return VsyncPolicy::On;
        }
        match configured {
            "on" => VsyncPolicy::On,
            "off" => VsyncPolicy::Off,
            "tear" => VsyncPolicy::Adaptive,
            _ => VsyncPolicy::Off,
        }
    }

    /// Config-file spelling of the mode
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AudioCallback => "audio",
            Self::AudioThread => "audio_thread",
            Self::VideoDriven => "video",
            Self::External => "external",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
