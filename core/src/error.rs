//! Error types for the synchronization engine

use std::path::PathBuf;

/// Errors surfaced by the engine and its configuration layer
///
/// Only setup and configuration failures are errors. Underflow and queue
/// backpressure are handled inside the engine and never reach the caller.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// No output device exists on the host
    #[error("no audio output device available")]
    DeviceUnavailable,

    /// The host refused to open or start the output device
    #[error("unable to open audio device: {0}")]
    DeviceOpen(String),

    /// The device came up in a format the mixer cannot convert to
    #[error("unsupported audio sample format: {0}")]
    UnsupportedFormat(String),

    /// An operation referenced an audio source that does not exist
    #[error("unknown audio source {0}")]
    UnknownSource(u32),

    /// The engine is quitting and no longer accepts work
    #[error("sync engine has shut down")]
    ShutDown,

    /// Reading or writing the configuration file failed
    #[error("config I/O error at {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration could not be serialized
    #[error("failed to serialize config: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, SyncError>;
