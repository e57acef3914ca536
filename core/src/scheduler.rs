//! Frame-repeat scheduling
//!
//! Maps the emulated frame rate onto the host display refresh. For one
//! second's worth of emulated frames the repeat table says how many extra
//! refreshes each frame is held for (`-1` means the frame is never shown).
//!
//! # Rounding
//!
//! The table is built with a fixed-point accumulator. Whatever the walk does
//! not account for is added to the last entry so that one cycle always covers
//! exactly `display_hz` refreshes. That makes the cadence of the last frame in
//! each cycle slightly uneven; the evenly-spaced alternative would break the
//! per-cycle sum.

use tracing::{debug, warn};

/// Rates closer than this are treated as equal and never repeat frames
pub const NEAR_EQUAL_HZ: u32 = 2;

/// Fixed-point scale for one display refresh
const FIXED_ONE: i64 = 100_000;

/// Repeat counts for one cycle of source frames
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRepeatTable {
    entries: Vec<i32>,
    source_hz: u32,
    display_hz: u32,
    max_repeat: u32,
}

impl FrameRepeatTable {
    /// Build the table for `source_hz` emulated frames per `display_hz` refreshes
    pub fn build(source_hz: u32, display_hz: u32) -> Self {
        let source_hz = source_hz.max(1);
        let mut entries = vec![0i32; source_hz as usize];
        let mut max_repeat = 0u32;

        if display_hz == 0 {
            warn!("Display refresh rate unknown, disabling frame repeat");
        } else if source_hz.abs_diff(display_hz) >= NEAR_EQUAL_HZ {
            let inc = display_hz as i64 * FIXED_ONE / source_hz as i64;
            let mut accum = 0i64;
            let mut dst_frames = 0i64;
            for entry in entries.iter_mut() {
                *entry = -1;
                accum += inc;
                while accum > FIXED_ONE {
                    accum -= FIXED_ONE;
                    *entry += 1;
                    max_repeat = max_repeat.max(*entry as u32);
                    dst_frames += 1;
                }
            }
            let shortfall = display_hz as i64 - dst_frames;
            if shortfall != 0
                && let Some(last) = entries.last_mut()
            {
                *last += shortfall as i32;
            }
        }

        debug!(
            "Frame repeat table built: {}Hz source on {}Hz display, max repeat {}",
            source_hz, display_hz, max_repeat
        );

        Self {
            entries,
            source_hz,
            display_hz,
            max_repeat,
        }
    }

    /// Extra refreshes for each source frame of the cycle
    pub fn entries(&self) -> &[i32] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn source_hz(&self) -> u32 {
        self.source_hz
    }

    pub fn display_hz(&self) -> u32 {
        self.display_hz
    }

    /// Largest repeat count seen during the accumulator walk
    ///
    /// The last-entry correction is not included.
    pub fn max_repeat(&self) -> u32 {
        self.max_repeat
    }

    /// Display refreshes covered by one full cycle: the sum of `1 + entry`
    pub fn refreshes_per_cycle(&self) -> i64 {
        self.entries.iter().map(|&e| 1 + e as i64).sum()
    }
}

/// Walks the repeat table one emulated frame at a time
#[derive(Debug, Clone)]
pub struct FrameScheduler {
    table: FrameRepeatTable,
    source_frame: usize,
    /// Refreshes still owed to the current source frame; negative means drop
    hold: i32,
}

impl FrameScheduler {
    pub fn new(table: FrameRepeatTable) -> Self {
        let hold = table.entries.first().copied().unwrap_or(0);
        Self {
            table,
            source_frame: 0,
            hold,
        }
    }

    /// Replace the table and restart the cycle
    pub fn rebuild(&mut self, table: FrameRepeatTable) {
        *self = Self::new(table);
    }

    pub fn table(&self) -> &FrameRepeatTable {
        &self.table
    }

    /// Index of the current source frame within the cycle
    pub fn source_frame(&self) -> usize {
        self.source_frame
    }

    /// Refreshes still owed to the current source frame
    pub fn hold(&self) -> i32 {
        self.hold
    }

    /// Consume the current frame if it should not be shown at all
    ///
    /// Returns true (and advances) when the table marks this source frame as
    /// skipped.
    pub fn skip_if_dropped(&mut self) -> bool {
        if self.hold < 0 {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Finish a presented frame
    ///
    /// Returns how many extra times the frame must be re-presented before the
    /// next one, then moves on to the next source frame.
    pub fn complete_frame(&mut self) -> u32 {
        let repeats = self.hold.max(0) as u32;
        self.advance();
        repeats
    }

    fn advance(&mut self) {
        self.source_frame += 1;
        if self.source_frame >= self.table.len() {
            self.source_frame = 0;
        }
        self.hold = self.table.entries[self.source_frame];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sum(table: &FrameRepeatTable) -> i64 {
        table.refreshes_per_cycle()
    }

    #[test]
    fn test_sum_invariant_across_display_rates() {
        for source_hz in [50u32, 60] {
            for display_hz in [30u32, 48, 59, 60, 61, 72, 75, 85, 100, 120, 144, 165, 240] {
                let table = FrameRepeatTable::build(source_hz, display_hz);
                assert_eq!(table.len(), source_hz as usize);
                if source_hz.abs_diff(display_hz) < NEAR_EQUAL_HZ {
                    continue;
                }
                assert_eq!(
                    sum(&table),
                    display_hz as i64,
                    "{}Hz source on {}Hz display",
                    source_hz,
                    display_hz
                );
            }
        }
    }

    #[test]
    fn test_near_equal_rates_never_repeat() {
        for (source_hz, display_hz) in [(60, 59), (60, 60), (60, 61), (50, 49), (50, 51)] {
            let table = FrameRepeatTable::build(source_hz, display_hz);
            assert!(table.entries().iter().all(|&e| e == 0));
            assert_eq!(table.max_repeat(), 0);
        }
    }

    #[test]
    fn test_pal_on_60hz_display() {
        let table = FrameRepeatTable::build(50, 60);
        // Every fifth source frame is shown twice
        let repeated = table.entries().iter().filter(|&&e| e == 1).count();
        assert_eq!(repeated, 10);
        assert!(table.entries().iter().all(|&e| e == 0 || e == 1));
        assert_eq!(table.max_repeat(), 1);
    }

    #[test]
    fn test_ntsc_on_50hz_display_drops_frames() {
        let table = FrameRepeatTable::build(60, 50);
        let dropped = table.entries().iter().filter(|&&e| e == -1).count();
        assert_eq!(dropped, 10);
        assert_eq!(sum(&table), 50);
    }

    #[test]
    fn test_last_entry_absorbs_rounding() {
        // 60 * 240000 is exactly 144 refreshes, but the strict comparison
        // leaves the final refresh unclaimed until the correction
        let table = FrameRepeatTable::build(60, 144);
        let walked: i64 = table.entries()[..59].iter().map(|&e| 1 + e as i64).sum();
        assert_eq!(walked, 141);
        assert_eq!(table.entries()[59], 2);
        assert_eq!(table.refreshes_per_cycle(), 144);
        assert_eq!(table.max_repeat(), 2);
    }

    #[test]
    fn test_unknown_display_rate_disables_repeat() {
        let table = FrameRepeatTable::build(60, 0);
        assert!(table.entries().iter().all(|&e| e == 0));
    }

    #[test]
    fn test_scheduler_cycle_presents_display_hz_refreshes() {
        let mut scheduler = FrameScheduler::new(FrameRepeatTable::build(50, 75));
        let mut refreshes = 0;
        for _ in 0..50 {
            if scheduler.skip_if_dropped() {
                continue;
            }
            refreshes += 1 + scheduler.complete_frame();
        }
        assert_eq!(refreshes, 75);
        assert_eq!(scheduler.source_frame(), 0);
    }

    #[test]
    fn test_scheduler_drops_marked_frames() {
        let mut scheduler = FrameScheduler::new(FrameRepeatTable::build(60, 50));
        let mut shown = 0;
        let mut dropped = 0;
        for _ in 0..60 {
            if scheduler.skip_if_dropped() {
                dropped += 1;
            } else {
                shown += 1;
                assert_eq!(scheduler.complete_frame(), 0);
            }
        }
        assert_eq!(shown, 50);
        assert_eq!(dropped, 10);
    }

    #[test]
    fn test_rebuild_restarts_cycle() {
        let mut scheduler = FrameScheduler::new(FrameRepeatTable::build(50, 60));
        scheduler.complete_frame();
        scheduler.complete_frame();
        assert_eq!(scheduler.source_frame(), 2);

        scheduler.rebuild(FrameRepeatTable::build(60, 60));
        assert_eq!(scheduler.source_frame(), 0);
        assert_eq!(scheduler.hold(), 0);
        assert_eq!(scheduler.table().source_hz(), 60);
    }
}
