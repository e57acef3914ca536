//! Audio side of the sync protocols
//!
//! | Mode            | Producer on full back buffer        | Device callback                  |
//! |-----------------|-------------------------------------|----------------------------------|
//! | `AudioCallback` | wait for drained front, swap, signal | wait for every source, mix       |
//! | `AudioThread`   | swap, request exit once all ready   | run the system, mix              |
//! | video/external  | publish to ring, maybe start        | mix from rings, record occupancy |

use std::sync::{Arc, MutexGuard};

use tracing::{debug, trace};

use super::{SyncHandle, SyncShared};
use crate::audio::{MixState, OutputBuffer, SourceId};
use crate::error::{Result, SyncError};
use crate::metrics::ProtocolStats;
use crate::mode::SyncMode;
use crate::monitor::lock_unpoisoned;

impl SyncShared {
    /// Device callback body
    pub(super) fn fill(self: &Arc<Self>, mut out: OutputBuffer<'_>) {
        if self.is_quitting() || !self.is_playing() {
            out.fill_silence();
            return;
        }

        match self.mode {
            SyncMode::AudioCallback => {
                let audio = self.audio.lock();
                if !audio.all_sources_ready() {
                    ProtocolStats::bump(&self.stats.callback_waits);
                }
                let mut audio = self
                    .audio
                    .wait_until(audio, |a| self.is_quitting() || a.all_sources_ready());
                if self.is_quitting() {
                    out.fill_silence();
                    return;
                }
                let outcome = audio.mix_and_convert(out, true);
                ProtocolStats::add(&self.stats.drained_signals, outcome.drained as u64);
            }
            SyncMode::AudioThread => {
                self.resume_system();
                let mut audio = self.audio.lock();
                if self.is_quitting() {
                    out.fill_silence();
                    return;
                }
                audio.mix_and_convert(out, false);
            }
            SyncMode::VideoDriven | SyncMode::External => {
                let mut audio = self.audio.lock();
                if audio.drift.underflowed() {
                    // Waiting for the drift controller to pause playback
                    out.fill_silence();
                    return;
                }
                let outcome = audio.mix_and_convert(out, false);
                if let Some(level) = outcome.min_buffered {
                    audio.drift.cur_min_buffered = level;
                    audio.drift.min_remaining = outcome.min_remaining;
                }
            }
        }
    }

    /// Hand control to the emulated system until it requests an exit
    fn resume_system(self: &Arc<Self>) {
        let mut runner = lock_unpoisoned(&self.runner, "Runner");
        if let Some(run) = runner.as_mut() {
            ProtocolStats::bump(&self.stats.runner_invocations);
            run(&SyncHandle {
                shared: Arc::clone(self),
            });
        }
    }

    /// A source's back buffer is full; run the mode's hand-off
    fn audio_ready<'a>(
        &'a self,
        audio: MutexGuard<'a, MixState>,
        id: SourceId,
    ) -> Result<MutexGuard<'a, MixState>> {
        let mut audio = audio;
        match self.mode {
            SyncMode::AudioCallback => {
                let slot = audio.source(id)?;
                let drained = slot.drained.clone();
                if slot.source.front_populated() {
                    ProtocolStats::bump(&self.stats.producer_waits);
                }
                audio = self.audio.wait_until_on(&drained, audio, |a| {
                    self.is_quitting() || !a.source(id).is_ok_and(|s| s.source.front_populated())
                });
                if self.is_quitting() {
                    return Err(SyncError::ShutDown);
                }
                audio.source_mut(id)?.source.swap();
                ProtocolStats::bump(&self.stats.ready_signals);
                self.audio.notify_all();
            }
            SyncMode::AudioThread => {
                audio.source_mut(id)?.source.swap();
                if audio.all_sources_ready() {
                    self.request_exit();
                }
            }
            SyncMode::VideoDriven | SyncMode::External => {
                let min_buffered = audio.clock().min_buffered() as usize;
                let source = &mut audio.source_mut(id)?.source;
                let dropped = source.publish();
                if dropped > 0 {
                    trace!("Source {} ring full, dropped {} samples", id, dropped);
                    ProtocolStats::add(&self.stats.overflow_samples, dropped as u64);
                }
                if !self.is_playing() && source.buffered_frames() >= min_buffered {
                    self.start_playback();
                }
            }
        }
        Ok(audio)
    }

    /// No active sources left in an audio-synchronized mode
    fn on_sources_idle(&self) {
        if self.mode.is_audio_sync() {
            self.pause_playback();
        }
    }

    /// A source became active again
    fn on_source_active(&self) {
        match self.mode {
            SyncMode::AudioCallback => self.start_playback(),
            SyncMode::AudioThread => self.request_exit(),
            SyncMode::VideoDriven | SyncMode::External => {}
        }
    }
}

impl SyncHandle {
    /// Register an audio source with `channels` interleaved channels
    pub fn create_source(&self, channels: u16) -> Result<SourceId> {
        let shared = &self.shared;
        if shared.is_quitting() {
            return Err(SyncError::ShutDown);
        }
        let id = shared.audio.lock().create_source(channels);
        debug!("Created audio source {} ({} channels)", id, channels);
        shared.on_source_active();
        Ok(id)
    }

    /// Stop mixing a source without destroying it
    pub fn pause_source(&self, id: SourceId) -> Result<()> {
        let shared = &self.shared;
        let idle = {
            let mut audio = shared.audio.lock();
            audio.source_mut(id)?.source.set_paused(true);
            if shared.mode == SyncMode::AudioCallback {
                // The callback may be waiting on this source
                ProtocolStats::bump(&shared.stats.ready_signals);
                shared.audio.notify_all();
            }
            audio.active_sources() == 0
        };
        if idle {
            shared.on_sources_idle();
        }
        Ok(())
    }

    /// Resume mixing a paused source
    pub fn resume_source(&self, id: SourceId) -> Result<()> {
        let shared = &self.shared;
        shared.audio.lock().source_mut(id)?.source.set_paused(false);
        shared.on_source_active();
        Ok(())
    }

    /// Remove a source and wake anything waiting on it
    pub fn destroy_source(&self, id: SourceId) -> Result<()> {
        let shared = &self.shared;
        let idle = {
            let mut audio = shared.audio.lock();
            let slot = audio.remove_source(id)?;
            slot.drained.notify_all();
            shared.audio.notify_all();
            audio.active_sources() == 0
        };
        debug!("Destroyed audio source {}", id);
        if idle {
            shared.on_sources_idle();
        }
        Ok(())
    }

    /// Queue interleaved samples for a source
    ///
    /// Blocks in `AudioCallback` mode while the device still holds the
    /// previous buffer. Returns [`SyncError::ShutDown`] once the engine is
    /// quitting.
    pub fn push_samples(&self, id: SourceId, samples: &[f32]) -> Result<()> {
        let shared = &self.shared;
        let mut audio = shared.audio.lock();
        let mut rest = samples;
        loop {
            if shared.is_quitting() {
                return Err(SyncError::ShutDown);
            }
            let source = &mut audio.source_mut(id)?.source;
            let taken = source.write(rest);
            rest = &rest[taken..];
            if source.back_full() {
                audio = shared.audio_ready(audio, id)?;
            }
            if rest.is_empty() {
                return Ok(());
            }
        }
    }
}
