//! Configuration management (config.toml)
//!
//! Sync source, audio device and video settings, stored as TOML in the
//! platform-specific config directory. Unknown or out-of-range values fall
//! back to the documented defaults when the config is resolved.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::audio::SampleFormat;
use crate::clock::VideoStandard;
use crate::error::{Result, SyncError};
use crate::mode::{SyncMode, VsyncPolicy};

pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;
pub const DEFAULT_BUFFER_FRAMES: u32 = 512;

const CONFIG_FILE: &str = "config.toml";

/// Front-end configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub video: VideoConfig,
}

/// Emulated system settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    /// "audio", "audio_thread" or anything else for video (default: "audio")
    #[serde(default = "default_sync_source")]
    pub sync_source: String,
}

/// Audio device settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Sample rate in Hz; 0 means default (default: 48000)
    #[serde(default = "default_rate")]
    pub rate: u32,
    /// Frames per device buffer; 0 means default (default: 512)
    #[serde(default = "default_buffer")]
    pub buffer: u32,
    /// "s16" or float (default: "f32")
    #[serde(default = "default_format")]
    pub format: String,
}

/// Video settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoConfig {
    /// "on", "off" or "tear"; only honored when audio drives sync (default: "off")
    #[serde(default = "default_vsync")]
    pub vsync: String,
    /// "ntsc" or "pal" (default: "ntsc")
    #[serde(default = "default_standard")]
    pub standard: String,
}

fn default_sync_source() -> String {
    "audio".to_string()
}
fn default_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}
fn default_buffer() -> u32 {
    DEFAULT_BUFFER_FRAMES
}
fn default_format() -> String {
    "f32".to_string()
}
fn default_vsync() -> String {
    "off".to_string()
}
fn default_standard() -> String {
    "ntsc".to_string()
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            sync_source: default_sync_source(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            rate: default_rate(),
            buffer: default_buffer(),
            format: default_format(),
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            vsync: default_vsync(),
            standard: default_standard(),
        }
    }
}

/// Fully resolved settings the engine is built from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    pub mode: SyncMode,
    pub sample_rate: u32,
    pub buffer_frames: u32,
    pub format: SampleFormat,
    pub vsync: VsyncPolicy,
    pub standard: VideoStandard,
}

impl Config {
    /// Resolve the config into engine settings
    ///
    /// `external_sync` forces [`SyncMode::External`] regardless of
    /// `system.sync_source`.
    pub fn resolve(&self, external_sync: bool) -> EngineSettings {
        let mode = SyncMode::from_source(&self.system.sync_source, external_sync);
        EngineSettings {
            mode,
            sample_rate: if self.audio.rate == 0 {
                DEFAULT_SAMPLE_RATE
            } else {
                self.audio.rate
            },
            buffer_frames: if self.audio.buffer == 0 {
                DEFAULT_BUFFER_FRAMES
            } else {
                self.audio.buffer
            },
            format: SampleFormat::from_name(&self.audio.format),
            vsync: mode.vsync(&self.video.vsync),
            standard: VideoStandard::from_name(&self.video.standard),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Config::default().resolve(false)
    }
}

/// Returns the platform-specific configuration directory.
///
/// Returns `None` if the home directory cannot be determined.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io.avsync", "", "avsync")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Loads the configuration from the platform config directory.
///
/// Returns default values if the file doesn't exist or cannot be parsed.
pub fn load() -> Config {
    config_dir()
        .map(|dir| load_from(&dir.join(CONFIG_FILE)))
        .unwrap_or_default()
}

/// Loads the configuration from an explicit path, falling back to defaults.
pub fn load_from(path: &Path) -> Config {
    match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!("Ignoring malformed config {}: {}", path.display(), e);
            Config::default()
        }),
        Err(_) => Config::default(),
    }
}

/// Saves the configuration to the platform config directory.
///
/// Creates the directory if it doesn't exist.
pub fn save(config: &Config) -> Result<()> {
    match config_dir() {
        Some(dir) => save_to(config, &dir.join(CONFIG_FILE)),
        None => Ok(()),
    }
}

/// Saves the configuration to an explicit path, creating parent directories.
pub fn save_to(config: &Config, path: &Path) -> Result<()> {
    let io_err = |source| SyncError::ConfigIo {
        path: path.to_path_buf(),
        source,
    };
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(io_err)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(io_err)
}
