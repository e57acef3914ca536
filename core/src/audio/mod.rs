//! Audio sources and the pull mixer
//!
//! Sources are filled by the emulation thread and drained by the device
//! callback through [`MixState::mix_and_convert`]. Everything in here lives
//! under the engine's audio lock.

mod mix;
mod source;

pub use mix::{MixOutcome, MixState, OutputBuffer, SampleFormat, SourceSlot};
pub use source::{AudioSource, SourceId};
