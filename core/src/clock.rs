//! Sample clock: output rate versus emulated frame rate
//!
//! Tracks the device sample rate and the nominal frame rate of the active
//! video standard, and derives the buffering thresholds the drift controller
//! steers towards.

use tracing::debug;

/// Largest speed correction per frame, before dividing by the source rate
pub const BASE_MAX_ADJUST: f32 = 0.0125;

/// Emulated video standard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VideoStandard {
    #[default]
    Ntsc,
    Pal,
}

impl VideoStandard {
    /// Nominal frame rate in Hz
    pub fn frame_rate(self) -> u32 {
        match self {
            Self::Ntsc => 60,
            Self::Pal => 50,
        }
    }

    /// Total scanlines per frame, including blanking
    pub fn lines_per_frame(self) -> u32 {
        match self {
            Self::Ntsc => 262,
            Self::Pal => 313,
        }
    }

    /// Parse the config spelling ("ntsc" / "pal"); anything else is NTSC
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("pal") {
            Self::Pal
        } else {
            Self::Ntsc
        }
    }
}

/// Sample rate and frame rate bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct SampleClock {
    sample_rate: u32,
    standard: VideoStandard,
    max_repeat: u32,
    min_buffered: u32,
    max_adjust: f32,
}

impl SampleClock {
    /// Create a clock for the given device sample rate
    ///
    /// Starts on NTSC with no frame repeats; call [`SampleClock::retune`] once
    /// the repeat table is known.
    pub fn new(sample_rate: u32) -> Self {
        let mut clock = Self {
            sample_rate,
            standard: VideoStandard::Ntsc,
            max_repeat: 0,
            min_buffered: 0,
            max_adjust: 0.0,
        };
        clock.recompute();
        clock
    }

    /// Switch video standard and/or worst-case repeat count
    ///
    /// `max_repeat` is the largest entry of the frame-repeat table.
    pub fn retune(&mut self, standard: VideoStandard, max_repeat: u32) {
        self.standard = standard;
        self.max_repeat = max_repeat;
        self.recompute();
        debug!(
            "Min samples buffered before audio start: {} ({:?}, max repeat {})",
            self.min_buffered, standard, max_repeat
        );
    }

    fn recompute(&mut self) {
        let source_hz = self.source_hz() as f32;
        // Cover the longest stretch one emulated frame can be held on screen
        let frames = (self.max_repeat + 1) as f32;
        self.min_buffered = (frames * self.sample_rate as f32 / source_hz) as u32;
        self.max_adjust = BASE_MAX_ADJUST / source_hz;
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn standard(&self) -> VideoStandard {
        self.standard
    }

    /// Worst-case repeat count the thresholds were computed for
    pub fn max_repeat(&self) -> u32 {
        self.max_repeat
    }

    /// Emulated frames per second
    pub fn source_hz(&self) -> u32 {
        self.standard.frame_rate()
    }

    /// Output frames of audio produced per emulated frame
    pub fn samples_per_frame(&self) -> f32 {
        self.sample_rate as f32 / self.source_hz() as f32
    }

    /// Minimum buffered audio frames before playback may start
    pub fn min_buffered(&self) -> u32 {
        self.min_buffered
    }

    /// Largest speed-adjustment ratio the drift controller may request
    pub fn max_adjust(&self) -> f32 {
        self.max_adjust
    }

    /// How often per second the emulated system should sync its audio
    ///
    /// Roughly every 8 scanlines when video drives timing; zero when the audio
    /// device already paces emulation.
    pub fn syncs_per_sec(&self, audio_sync: bool) -> u32 {
        if audio_sync {
            0
        } else {
            self.source_hz() * self.standard.lines_per_frame() / 8
        }
    }
}
