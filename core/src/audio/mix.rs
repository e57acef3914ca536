//! Pull mixing of every active source into the device format
//!
//! Runs inside the device callback with the audio lock held. Sources are
//! summed in float, clamped, then converted once into the device buffer.

use std::collections::BTreeMap;
use std::sync::{Arc, Condvar};

use tracing::trace;

use super::source::{AudioSource, SourceId};
use crate::clock::{SampleClock, VideoStandard};
use crate::drift::DriftState;
use crate::error::{Result, SyncError};

/// Ring size in multiples of the larger of the start threshold and one
/// device buffer
const STREAM_HEADROOM: usize = 4;

/// Device sample format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleFormat {
    #[default]
    F32,
    S16,
}

impl SampleFormat {
    /// Parse the config spelling; anything other than "s16" is float
    pub fn from_name(name: &str) -> Self {
        if name == "s16" { Self::S16 } else { Self::F32 }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::F32 => "f32",
            Self::S16 => "s16",
        }
    }
}

/// Device buffer handed to the mixer by the output callback
#[derive(Debug)]
pub enum OutputBuffer<'a> {
    F32(&'a mut [f32]),
    S16(&'a mut [i16]),
}

impl OutputBuffer<'_> {
    /// Interleaved sample count
    pub fn len(&self) -> usize {
        match self {
            Self::F32(data) => data.len(),
            Self::S16(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn format(&self) -> SampleFormat {
        match self {
            Self::F32(_) => SampleFormat::F32,
            Self::S16(_) => SampleFormat::S16,
        }
    }

    pub fn fill_silence(&mut self) {
        match self {
            Self::F32(data) => data.fill(0.0),
            Self::S16(data) => data.fill(0),
        }
    }

    fn write_mixed(&mut self, mixed: &[f32]) {
        match self {
            Self::F32(data) => {
                for (dst, &src) in data.iter_mut().zip(mixed) {
                    *dst = src.clamp(-1.0, 1.0);
                }
                data[mixed.len()..].fill(0.0);
            }
            Self::S16(data) => {
                for (dst, &src) in data.iter_mut().zip(mixed) {
                    *dst = (src * 32767.0).clamp(-32768.0, 32767.0) as i16;
                }
                data[mixed.len()..].fill(0);
            }
        }
    }
}

/// Result of one mixing pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MixOutcome {
    /// Fewest frames left in any active source's ring; negative when a
    /// source could not supply the whole buffer. `None` when nothing was
    /// streaming.
    pub min_buffered: Option<i32>,
    /// Least free ring space among active sources, in frames
    pub min_remaining: u32,
    /// Front buffers read to the end during this pass
    pub drained: u32,
}

/// A source plus the condition variable its producer waits on
#[derive(Debug)]
pub struct SourceSlot {
    pub source: AudioSource,
    /// Signalled when the device finishes reading the front buffer
    pub drained: Arc<Condvar>,
}

/// Everything guarded by the audio lock
#[derive(Debug)]
pub struct MixState {
    sources: BTreeMap<SourceId, SourceSlot>,
    next_id: u32,
    pub drift: DriftState,
    clock: SampleClock,
    out_channels: usize,
    buffer_frames: usize,
    streaming: bool,
    scratch: Vec<f32>,
    mixed: Vec<f32>,
}

impl MixState {
    /// `streaming` selects ring-buffer delivery (video-driven modes) over
    /// front/back swapping (audio-synchronized modes)
    pub fn new(clock: SampleClock, out_channels: u16, buffer_frames: usize, streaming: bool) -> Self {
        Self {
            sources: BTreeMap::new(),
            next_id: 0,
            drift: DriftState::default(),
            clock,
            out_channels: out_channels.max(1) as usize,
            buffer_frames: buffer_frames.max(1),
            streaming,
            scratch: Vec::new(),
            mixed: Vec::new(),
        }
    }

    pub fn clock(&self) -> &SampleClock {
        &self.clock
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn buffer_frames(&self) -> usize {
        self.buffer_frames
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    fn stream_frames(&self) -> usize {
        STREAM_HEADROOM * (self.clock.min_buffered() as usize).max(self.buffer_frames)
    }

    /// Adopt the parameters the device actually opened with
    ///
    /// Existing sources are resized to the new buffer length and emptied.
    pub fn apply_device(&mut self, sample_rate: u32, out_channels: u16, buffer_frames: usize) {
        let mut clock = SampleClock::new(sample_rate);
        clock.retune(self.clock.standard(), self.clock.max_repeat());
        self.clock = clock;
        self.out_channels = out_channels.max(1) as usize;
        self.buffer_frames = buffer_frames.max(1);
        let stream_frames = self.stream_frames();
        for slot in self.sources.values_mut() {
            let paused = slot.source.is_paused();
            slot.source = AudioSource::new(slot.source.channels() as u16, self.buffer_frames, stream_frames);
            slot.source.set_paused(paused);
        }
        self.drift.reset();
    }

    /// Update the clock for a new standard or repeat table
    pub fn retune(&mut self, standard: VideoStandard, max_repeat: u32) {
        self.clock.retune(standard, max_repeat);
        let frames = self.stream_frames();
        for slot in self.sources.values_mut() {
            slot.source.ensure_stream_frames(frames);
        }
    }

    /// Register a new source with `channels` interleaved channels
    pub fn create_source(&mut self, channels: u16) -> SourceId {
        let id = SourceId(self.next_id);
        self.next_id += 1;
        self.insert_source(id, channels);
        id
    }

    /// Re-register an empty source under a known id
    pub(crate) fn restore_source(&mut self, id: SourceId, channels: u16, paused: bool) {
        self.next_id = self.next_id.max(id.0 + 1);
        self.insert_source(id, channels);
        if let Some(slot) = self.sources.get_mut(&id) {
            slot.source.set_paused(paused);
        }
    }

    fn insert_source(&mut self, id: SourceId, channels: u16) {
        let source = AudioSource::new(channels, self.buffer_frames, self.stream_frames());
        self.sources.insert(
            id,
            SourceSlot {
                source,
                drained: Arc::new(Condvar::new()),
            },
        );
    }

    pub fn source(&self, id: SourceId) -> Result<&SourceSlot> {
        self.sources.get(&id).ok_or(SyncError::UnknownSource(id.0))
    }

    pub fn source_mut(&mut self, id: SourceId) -> Result<&mut SourceSlot> {
        self.sources.get_mut(&id).ok_or(SyncError::UnknownSource(id.0))
    }

    pub fn remove_source(&mut self, id: SourceId) -> Result<SourceSlot> {
        self.sources.remove(&id).ok_or(SyncError::UnknownSource(id.0))
    }

    /// Ids, channel counts and pause flags of every source
    pub fn source_layout(&self) -> Vec<(SourceId, u16, bool)> {
        self.sources
            .iter()
            .map(|(&id, slot)| (id, slot.source.channels() as u16, slot.source.is_paused()))
            .collect()
    }

    /// Sources that are not paused
    pub fn active_sources(&self) -> usize {
        self.sources.values().filter(|s| !s.source.is_paused()).count()
    }

    /// True when every active source has a populated front buffer
    pub fn all_sources_ready(&self) -> bool {
        self.sources
            .values()
            .filter(|s| !s.source.is_paused())
            .all(|s| s.source.front_populated())
    }

    /// Wake every producer waiting for a drained front buffer
    pub fn notify_all_drained(&self) {
        for slot in self.sources.values() {
            slot.drained.notify_all();
        }
    }

    /// Mix active sources into `out`
    ///
    /// Frames a source cannot supply are silent. When `signal_drained` is
    /// set, the drained condition variable of each source whose front buffer
    /// was emptied is notified.
    pub fn mix_and_convert(&mut self, mut out: OutputBuffer<'_>, signal_drained: bool) -> MixOutcome {
        let out_channels = self.out_channels;
        let frames = out.len() / out_channels;
        self.mixed.clear();
        self.mixed.resize(frames * out_channels, 0.0);

        let mut outcome = MixOutcome {
            min_buffered: None,
            min_remaining: u32::MAX,
            drained: 0,
        };

        for (id, slot) in self.sources.iter_mut() {
            let source = &mut slot.source;
            if source.is_paused() {
                continue;
            }

            self.scratch.clear();
            let taken = if self.streaming {
                let taken = source.take_stream(&mut self.scratch, frames);
                let level = if taken < frames {
                    trace!("Source {} short by {} frames", id, frames - taken);
                    taken as i32 - frames as i32
                } else {
                    source.buffered_frames() as i32
                };
                outcome.min_buffered = Some(outcome.min_buffered.map_or(level, |m| m.min(level)));
                outcome.min_remaining = outcome.min_remaining.min(source.vacant_frames() as u32);
                taken
            } else {
                let was_populated = source.front_populated();
                let taken = source.take_front(&mut self.scratch, frames);
                if was_populated && !source.front_populated() {
                    outcome.drained += 1;
                    if signal_drained {
                        slot.drained.notify_all();
                    }
                }
                taken
            };

            accumulate(&mut self.mixed, &self.scratch[..taken * source.channels()], source.channels(), out_channels);
        }

        if outcome.min_buffered.is_none() {
            outcome.min_remaining = 0;
        }

        out.write_mixed(&self.mixed);
        outcome
    }
}

/// Add `src` (interleaved with `src_channels`) onto `dst`
fn accumulate(dst: &mut [f32], src: &[f32], src_channels: usize, dst_channels: usize) {
    for (out_frame, in_frame) in dst
        .chunks_exact_mut(dst_channels)
        .zip(src.chunks_exact(src_channels))
    {
        if src_channels == dst_channels {
            for (o, &i) in out_frame.iter_mut().zip(in_frame) {
                *o += i;
            }
        } else if src_channels == 1 {
            for o in out_frame.iter_mut() {
                *o += in_frame[0];
            }
        } else if dst_channels == 1 {
            out_frame[0] += in_frame.iter().sum::<f32>() / src_channels as f32;
        } else {
            for (c, o) in out_frame.iter_mut().enumerate() {
                *o += in_frame[c % src_channels];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn swap_in(state: &mut MixState, id: SourceId, samples: &[f32]) {
        let slot = state.source_mut(id).unwrap();
        assert_eq!(slot.source.write(samples), samples.len());
        slot.source.swap();
    }

    fn publish(state: &mut MixState, id: SourceId, samples: &[f32]) {
        let slot = state.source_mut(id).unwrap();
        let mut rest = samples;
        while !rest.is_empty() {
            let n = slot.source.write(rest);
            slot.source.publish();
            rest = &rest[n..];
        }
    }

    #[test]
    fn test_sample_format_from_name() {
        assert_eq!(SampleFormat::from_name("s16"), SampleFormat::S16);
        assert_eq!(SampleFormat::from_name("f32"), SampleFormat::F32);
        assert_eq!(SampleFormat::from_name("u8"), SampleFormat::F32);
    }

    #[test]
    fn test_sources_sum_and_clamp() {
        let mut state = MixState::new(SampleClock::new(48_000), 2, 2, false);
        let a = state.create_source(2);
        let b = state.create_source(2);
        swap_in(&mut state, a, &[0.25, 0.5, 0.75, -0.5]);
        swap_in(&mut state, b, &[0.25, 0.75, 0.5, -0.75]);

        let mut out = [0.0f32; 4];
        let outcome = state.mix_and_convert(OutputBuffer::F32(&mut out), false);
        assert_eq!(out, [0.5, 1.0, 1.0, -1.0]);
        assert_eq!(outcome.drained, 2);
        assert_eq!(outcome.min_buffered, None);
    }

    #[test]
    fn test_mono_source_fills_every_channel() {
        let mut state = MixState::new(SampleClock::new(48_000), 2, 2, false);
        let id = state.create_source(1);
        swap_in(&mut state, id, &[0.5, -0.25]);

        let mut out = [0i16; 4];
        state.mix_and_convert(OutputBuffer::S16(&mut out), false);
        assert_eq!(out, [16383, 16383, -8191, -8191]);
    }

    #[test]
    fn test_short_front_buffer_is_padded_with_silence() {
        let mut state = MixState::new(SampleClock::new(48_000), 1, 2, false);
        let id = state.create_source(1);
        swap_in(&mut state, id, &[0.5, 0.5]);

        let mut out = [1.0f32; 4];
        state.mix_and_convert(OutputBuffer::F32(&mut out), false);
        assert_eq!(out, [0.5, 0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_readiness_ignores_paused_sources() {
        let mut state = MixState::new(SampleClock::new(48_000), 2, 2, false);
        assert!(state.all_sources_ready());

        let a = state.create_source(2);
        let b = state.create_source(2);
        assert!(!state.all_sources_ready());

        swap_in(&mut state, a, &[0.0; 4]);
        assert!(!state.all_sources_ready());

        state.source_mut(b).unwrap().source.set_paused(true);
        assert!(state.all_sources_ready());
        assert_eq!(state.active_sources(), 1);
    }

    #[test]
    fn test_streaming_reports_occupancy() {
        let mut state = MixState::new(SampleClock::new(48_000), 1, 4, true);
        let a = state.create_source(1);
        let b = state.create_source(1);
        publish(&mut state, a, &[0.1; 10]);
        publish(&mut state, b, &[0.1; 6]);

        let mut out = [0.0f32; 4];
        let outcome = state.mix_and_convert(OutputBuffer::F32(&mut out), false);
        assert_eq!(outcome.min_buffered, Some(2));
        let stream = state.source(a).unwrap().source.stream_frames() as u32;
        assert_eq!(outcome.min_remaining, stream - 6);
    }

    #[test]
    fn test_streaming_underflow_is_negative() {
        let mut state = MixState::new(SampleClock::new(48_000), 1, 4, true);
        let id = state.create_source(1);
        publish(&mut state, id, &[0.5; 3]);

        let mut out = [0.0f32; 8];
        let outcome = state.mix_and_convert(OutputBuffer::F32(&mut out), false);
        assert_eq!(outcome.min_buffered, Some(-5));
        assert_eq!(&out[..3], &[0.5; 3]);
        assert_eq!(&out[3..], &[0.0; 5]);
    }

    #[test]
    fn test_unknown_source_is_an_error() {
        let mut state = MixState::new(SampleClock::new(48_000), 2, 4, true);
        assert!(matches!(
            state.source_mut(SourceId(9)),
            Err(SyncError::UnknownSource(9))
        ));
    }

    #[test]
    fn test_retune_grows_rings() {
        let mut state = MixState::new(SampleClock::new(48_000), 2, 256, true);
        let id = state.create_source(2);
        let before = state.source(id).unwrap().source.stream_frames();
        assert_eq!(before, 4 * 800);

        state.retune(VideoStandard::Pal, 2);
        let after = state.source(id).unwrap().source.stream_frames();
        assert_eq!(after, 4 * 2880);
    }
}
