//! Dynamic rate control for video-driven sync
//!
//! When the display paces emulation, the audio device drains samples at its
//! own rate and the two clocks drift apart. Once per displayed frame the
//! controller looks at how full the audio buffers were after the last mix and
//! asks the emulated system to run slightly faster or slower.
//!
//! The controller is proportional with hysteresis: it only intervenes when a
//! problem is imminent or occupancy leaves a band around the target, and it
//! forgets the smoothed drift after every intervention so a single burst is
//! not corrected twice.

use tracing::{debug, trace};

use crate::clock::SampleClock;

/// Marker for "no previous observation"
pub const NO_LAST_BUFFERED: i32 = -2_000_000_000;

/// Intervene when an under/overrun is this many frames away
pub const BUFFER_FRAMES_THRESHOLD: f32 = 6.0;

/// Weight kept from the previous smoothed drift
const DECAY: f32 = 0.9;

/// Weight of the newest frame-to-frame change
const NEW_SAMPLE_WEIGHT: f32 = 0.1;

/// Occupancy bookkeeping shared between the mixer and the controller
///
/// `cur_min_buffered` and `min_remaining` are written by the device callback
/// after every mix; the other two fields belong to the controller. All four
/// live under the audio lock.
#[derive(Debug, Clone, PartialEq)]
pub struct DriftState {
    /// Occupancy seen at the previous displayed frame
    pub last_buffered: i32,
    /// Exponentially smoothed change in occupancy per displayed frame
    pub average_change: f32,
    /// Fewest frames buffered in any source after the last mix; negative
    /// means a source underflowed
    pub cur_min_buffered: i32,
    /// Least free space (in frames) in any source after the last mix
    pub min_remaining: u32,
}

impl Default for DriftState {
    fn default() -> Self {
        Self {
            last_buffered: NO_LAST_BUFFERED,
            average_change: 0.0,
            cur_min_buffered: 0,
            min_remaining: 0,
        }
    }
}

impl DriftState {
    /// Forget history after playback restarts
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// True when the last mix ran a source dry
    pub fn underflowed(&self) -> bool {
        self.cur_min_buffered < 0
    }
}

/// Outcome of one controller step
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriftAction {
    /// Occupancy is within bounds
    Hold,
    /// Ask the emulated system to change speed by this ratio
    Adjust(f32),
    /// A source underflowed: pause playback, then apply this ratio
    Recover(f32),
}

impl DriftAction {
    /// Speed ratio carried by the action (0 for `Hold`)
    pub fn ratio(self) -> f32 {
        match self {
            Self::Hold => 0.0,
            Self::Adjust(ratio) | Self::Recover(ratio) => ratio,
        }
    }
}

/// Proportional drift controller
#[derive(Debug, Clone, Default)]
pub struct DriftController {
    adjustments: u64,
    recoveries: u64,
}

impl DriftController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one controller step; call with the audio lock held
    pub fn evaluate(&mut self, state: &mut DriftState, clock: &SampleClock) -> DriftAction {
        let cur = state.cur_min_buffered;
        if state.last_buffered > NO_LAST_BUFFERED {
            state.average_change *= DECAY;
            state.average_change += (cur - state.last_buffered) as f32 * NEW_SAMPLE_WEIGHT;
        }
        state.last_buffered = cur;

        let drift = state.average_change;
        let frames_to_problem = if drift < 0.0 {
            cur as f32 / -drift
        } else {
            state.min_remaining as f32 / drift
        };

        let target = clock.min_buffered() as i64;
        let level = cur as i64;
        let max_adjust = clock.max_adjust();

        let action = if frames_to_problem < BUFFER_FRAMES_THRESHOLD
            || (drift < 0.0 && level < 3 * target / 4)
            || (drift > 0.0 && level > 5 * target / 4)
            || cur < 0
        {
            if cur < 0 {
                state.last_buffered = NO_LAST_BUFFERED;
                state.cur_min_buffered = 0;
                self.recoveries += 1;
                debug!("Audio underflow, pausing playback (recovery #{})", self.recoveries);
                DriftAction::Recover(max_adjust)
            } else {
                let ratio = -drift / clock.samples_per_frame() / (2.5 * clock.source_hz() as f32);
                DriftAction::Adjust(ratio.clamp(-max_adjust, max_adjust))
            }
        } else if level < target / 2 {
            DriftAction::Adjust(max_adjust)
        } else {
            DriftAction::Hold
        };

        if action.ratio() == 0.0 {
            return DriftAction::Hold;
        }

        state.average_change = 0.0;
        self.adjustments += 1;
        trace!(
            "Drift {:.2} frames/frame, level {} of {}, adjusting speed by {:.6}",
            drift,
            cur,
            target,
            action.ratio()
        );
        action
    }

    /// Speed adjustments requested so far (recoveries included)
    pub fn adjustments(&self) -> u64 {
        self.adjustments
    }

    /// Underflows recovered so far
    pub fn recoveries(&self) -> u64 {
        self.recoveries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 48kHz NTSC without repeats: target 800 frames, max adjust 0.0125/60
    fn clock() -> SampleClock {
        SampleClock::new(48_000)
    }

    const CAPACITY: u32 = 3200;

    fn observe(state: &mut DriftState, level: i32) {
        state.cur_min_buffered = level;
        state.min_remaining = CAPACITY.saturating_sub(level.max(0) as u32);
    }

    #[test]
    fn test_default_state_has_no_history() {
        let state = DriftState::default();
        assert_eq!(state.last_buffered, NO_LAST_BUFFERED);
        assert_eq!(state.average_change, 0.0);
        assert!(!state.underflowed());
    }

    #[test]
    fn test_first_observation_only_records_level() {
        let clock = clock();
        let mut controller = DriftController::new();
        let mut state = DriftState::default();
        observe(&mut state, 800);

        assert_eq!(controller.evaluate(&mut state, &clock), DriftAction::Hold);
        assert_eq!(state.last_buffered, 800);
        assert_eq!(state.average_change, 0.0);
    }

    #[test]
    fn test_smoothing_weights() {
        let clock = clock();
        let mut controller = DriftController::new();
        let mut state = DriftState::default();
        observe(&mut state, 800);
        controller.evaluate(&mut state, &clock);

        observe(&mut state, 810);
        assert_eq!(controller.evaluate(&mut state, &clock), DriftAction::Hold);
        assert!((state.average_change - 1.0).abs() < 1e-6);

        observe(&mut state, 820);
        controller.evaluate(&mut state, &clock);
        assert!((state.average_change - 1.9).abs() < 1e-5);
    }

    #[test]
    fn test_underflow_recovery_requests_max_adjust() {
        let clock = clock();
        let mut controller = DriftController::new();
        let mut state = DriftState::default();
        observe(&mut state, 700);
        controller.evaluate(&mut state, &clock);

        observe(&mut state, -50);
        assert!(state.underflowed());
        let action = controller.evaluate(&mut state, &clock);

        assert_eq!(action, DriftAction::Recover(clock.max_adjust()));
        assert_eq!(state.last_buffered, NO_LAST_BUFFERED);
        assert_eq!(state.cur_min_buffered, 0);
        assert_eq!(state.average_change, 0.0);
        assert_eq!(controller.recoveries(), 1);
    }

    #[test]
    fn test_low_level_nudges_faster() {
        let clock = clock();
        let mut controller = DriftController::new();
        let mut state = DriftState::default();
        // Below half the target with no measurable drift
        observe(&mut state, 300);
        assert_eq!(
            controller.evaluate(&mut state, &clock),
            DriftAction::Adjust(clock.max_adjust())
        );
    }

    #[test]
    fn test_fast_drain_is_clamped() {
        let clock = clock();
        let mut controller = DriftController::new();
        let mut state = DriftState::default();
        observe(&mut state, 3000);
        controller.evaluate(&mut state, &clock);

        // Average change of -240 frames per frame: 2.5 frames to underflow
        observe(&mut state, 600);
        assert_eq!(
            controller.evaluate(&mut state, &clock),
            DriftAction::Adjust(clock.max_adjust())
        );
        assert_eq!(state.average_change, 0.0);
    }

    #[test]
    fn test_overfull_buffer_slows_down() {
        let clock = clock();
        let mut controller = DriftController::new();
        let mut state = DriftState::default();
        observe(&mut state, 800);
        controller.evaluate(&mut state, &clock);

        observe(&mut state, 1020);
        let action = controller.evaluate(&mut state, &clock);
        let DriftAction::Adjust(ratio) = action else {
            panic!("expected an adjustment, got {:?}", action);
        };
        assert!(ratio < 0.0);
        assert!(ratio.abs() <= clock.max_adjust());
        // -22 / 800 / 150
        assert!((ratio + 22.0 / 800.0 / 150.0).abs() < 1e-7);
    }

    #[test]
    fn test_converges_around_target_and_stays_bounded() {
        let clock = clock();
        let max_adjust = clock.max_adjust();
        let mut controller = DriftController::new();
        let mut state = DriftState::default();

        // Buffer fills steadily for a while
        for i in 0..20 {
            observe(&mut state, 800 + i * 30);
            let ratio = controller.evaluate(&mut state, &clock).ratio();
            assert!(ratio.abs() <= max_adjust);
        }
        assert!(controller.adjustments() > 0);

        // Then settles on the target with bounded noise
        for i in 0..60 {
            let noise = (i * 37 % 17) - 8;
            observe(&mut state, 800 + noise);
            let ratio = controller.evaluate(&mut state, &clock).ratio();
            assert!(ratio.abs() <= max_adjust);
        }
        assert!(
            state.average_change.abs() < 2.0,
            "drift did not settle: {}",
            state.average_change
        );
    }

    #[test]
    fn test_ratio_never_exceeds_bound_under_wild_input() {
        let clock = clock();
        let mut controller = DriftController::new();
        let mut state = DriftState::default();
        let mut level: i32 = 800;
        for i in 0..500i32 {
            level += ((i * 7919) % 401) - 200;
            level = level.clamp(-100, CAPACITY as i32);
            observe(&mut state, level);
            let ratio = controller.evaluate(&mut state, &clock).ratio();
            assert!(ratio.abs() <= clock.max_adjust());
        }
    }
}
