//! Protocol counters and frame-rate measurement

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::debug;

/// How often the frame rate is recomputed
pub const FPS_INTERVAL: Duration = Duration::from_millis(1000);

/// Counters for every wait, signal and correction the engine performs
///
/// Updated with relaxed atomics from all engine threads.
#[derive(Debug, Default)]
pub struct ProtocolStats {
    /// Device callbacks that blocked waiting for every source
    pub callback_waits: AtomicU64,
    /// Drained signals sent to producers
    pub drained_signals: AtomicU64,
    /// Audio-ready signals sent to the device callback
    pub ready_signals: AtomicU64,
    /// Producer waits for a drained front buffer
    pub producer_waits: AtomicU64,
    /// Exit requests sent to the emulated system
    pub exit_requests: AtomicU64,
    /// Times the device callback ran the emulated system
    pub runner_invocations: AtomicU64,
    /// Queued frames replaced by a newer frame for the same buffer
    pub coalesced_frames: AtomicU64,
    /// Producer sleeps on a full frame queue
    pub queue_full_waits: AtomicU64,
    /// Main frames never shown because of the repeat table
    pub dropped_frames: AtomicU64,
    /// Extra refreshes of an already shown frame
    pub repeated_frames: AtomicU64,
    /// Speed adjustments sent to the emulated system
    pub speed_adjustments: AtomicU64,
    /// Underflows recovered by pausing playback
    pub underflows: AtomicU64,
    /// Samples dropped because a source's ring was full
    pub overflow_samples: AtomicU64,
}

/// Plain copy of [`ProtocolStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub callback_waits: u64,
    pub drained_signals: u64,
    pub ready_signals: u64,
    pub producer_waits: u64,
    pub exit_requests: u64,
    pub runner_invocations: u64,
    pub coalesced_frames: u64,
    pub queue_full_waits: u64,
    pub dropped_frames: u64,
    pub repeated_frames: u64,
    pub speed_adjustments: u64,
    pub underflows: u64,
    pub overflow_samples: u64,
}

impl ProtocolStats {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            callback_waits: get(&self.callback_waits),
            drained_signals: get(&self.drained_signals),
            ready_signals: get(&self.ready_signals),
            producer_waits: get(&self.producer_waits),
            exit_requests: get(&self.exit_requests),
            runner_invocations: get(&self.runner_invocations),
            coalesced_frames: get(&self.coalesced_frames),
            queue_full_waits: get(&self.queue_full_waits),
            dropped_frames: get(&self.dropped_frames),
            repeated_frames: get(&self.repeated_frames),
            speed_adjustments: get(&self.speed_adjustments),
            underflows: get(&self.underflows),
            overflow_samples: get(&self.overflow_samples),
        }
    }
}

impl StatsSnapshot {
    /// True if any AudioCallback-only handshake happened
    pub fn used_callback_protocol(&self) -> bool {
        self.callback_waits > 0 || self.drained_signals > 0 || self.producer_waits > 0
    }

    /// True if any AudioThread-only handshake happened
    pub fn used_thread_protocol(&self) -> bool {
        self.exit_requests > 0 || self.runner_invocations > 0
    }

    pub fn log(&self) {
        debug!(
            "SYNC STATS: callback_waits={}, drained={}, ready={}, producer_waits={}, \
             exits={}, runner={}, coalesced={}, queue_full={}, dropped={}, repeated={}, \
             adjustments={}, underflows={}, overflow_samples={}",
            self.callback_waits,
            self.drained_signals,
            self.ready_signals,
            self.producer_waits,
            self.exit_requests,
            self.runner_invocations,
            self.coalesced_frames,
            self.queue_full_waits,
            self.dropped_frames,
            self.repeated_frames,
            self.speed_adjustments,
            self.underflows,
            self.overflow_samples
        );
    }
}

/// Counts main frames and yields a rate once per [`FPS_INTERVAL`]
#[derive(Debug, Clone)]
pub struct FpsCounter {
    frames: u32,
    window_start: Instant,
}

impl FpsCounter {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(now: Instant) -> Self {
        Self {
            frames: 0,
            window_start: now,
        }
    }

    /// Count one frame at `now`; returns the rate when a window closes
    pub fn tick(&mut self, now: Instant) -> Option<f32> {
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < FPS_INTERVAL {
            return None;
        }
        let fps = self.frames as f32 / elapsed.as_secs_f32();
        self.frames = 0;
        self.window_start = now;
        Some(fps)
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fps_reported_once_per_window() {
        let start = Instant::now();
        let mut fps = FpsCounter::starting_at(start);
        let step = Duration::from_micros(16_667);
        let mut reports = Vec::new();
        for i in 1..=100u32 {
            if let Some(rate) = fps.tick(start + step * i) {
                reports.push(rate);
            }
        }
        assert_eq!(reports.len(), 1);
        assert!((reports[0] - 60.0).abs() < 0.5, "got {}", reports[0]);
    }

    #[test]
    fn test_snapshot_reads_counters() {
        let stats = ProtocolStats::default();
        ProtocolStats::bump(&stats.callback_waits);
        ProtocolStats::add(&stats.overflow_samples, 12);

        let snap = stats.snapshot();
        assert_eq!(snap.callback_waits, 1);
        assert_eq!(snap.overflow_samples, 12);
        assert!(snap.used_callback_protocol());
        assert!(!snap.used_thread_protocol());
    }
}
