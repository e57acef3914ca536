//! AV Sync Core - audio/video synchronization for emulation front-ends
//!
//! Paces an emulated system against the host's audio device and display.
//! Four strategies are supported, picked once per engine instance:
//!
//! - [`SyncMode::AudioCallback`] - the device callback waits for every audio
//!   source to hand over a full buffer
//! - [`SyncMode::AudioThread`] - the emulated system runs inside the device
//!   callback
//! - [`SyncMode::VideoDriven`] - the display paces emulation and audio is kept
//!   in step by nudging emulation speed
//! - [`SyncMode::External`] - video-driven pacing with frames handed to a
//!   separate render thread
//!
//! # Architecture
//!
//! - [`SyncEngine`] - owns the audio device and the protocol state
//! - [`SyncHandle`] - cloneable access for the emulation and render threads
//! - [`FrameScheduler`] - repeats or drops frames to fit the display rate
//! - [`DriftController`] - turns audio buffer occupancy into speed adjustments
//! - [`FrameQueue`] / [`BufferPool`] - hand frames to the render thread

pub mod audio;
pub mod clock;
pub mod config;
pub mod drift;
pub mod engine;
pub mod error;
pub mod frame;
pub mod host;
pub mod metrics;
pub mod mode;
pub mod monitor;
pub mod scheduler;
#[cfg(test)]
pub mod test_utils;

pub use audio::{AudioSource, MixOutcome, MixState, OutputBuffer, SampleFormat, SourceId};
pub use clock::{SampleClock, VideoStandard};
pub use config::{Config, EngineSettings};
pub use drift::{DriftAction, DriftController, DriftState};
pub use engine::{
    EngineOptions, OUTPUT_CHANNELS, PoolStats, SyncEngine, SyncHandle, SystemRunner, VideoPath,
};
pub use error::{Result, SyncError};
pub use frame::{BufferPool, FRAME_QUEUE_CAPACITY, Frame, FrameQueue, FramebufferId, PixelBuffer};
pub use host::{
    AudioDevice, DeviceCallback, DeviceRequest, DeviceSpec, FrameView, Presenter, SystemControl,
};
pub use metrics::{FpsCounter, ProtocolStats, StatsSnapshot};
pub use mode::{SyncMode, VsyncPolicy};
pub use scheduler::{FrameRepeatTable, FrameScheduler};
