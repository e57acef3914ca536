//! AV Sync Player - headless host for the sync engine
//!
//! Wires the engine to the default cpal output device, a presenter that paces
//! like a display without drawing, and a synthetic machine producing a test
//! tone and pattern. Used to exercise every sync mode on real audio hardware.

pub mod machine;
pub mod output;
pub mod player;
pub mod presenter;

pub use machine::{Tone, ToneMachine};
pub use output::CpalDevice;
pub use player::{PlayerConfig, run};
pub use presenter::HeadlessPresenter;
