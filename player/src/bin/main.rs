//! AV Sync Player
//!
//! Runs a synthetic system for a few seconds in the configured sync mode and
//! prints the protocol statistics.
//!
//! # Usage
//!
//! ```bash
//! avsync-player --sync-source audio
//! avsync-player --sync-source video --display-hz 144 --seconds 10
//! avsync-player --external --standard pal
//! RUST_LOG=avsync_core=debug avsync-player --sync-source audio_thread
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use avsync_player::{PlayerConfig, run};

#[derive(Parser)]
#[command(name = "avsync-player")]
#[command(author, version, about = "Headless audio/video sync engine player")]
struct Args {
    /// Sync source: audio, audio_thread or video (overrides the config file)
    #[arg(long)]
    sync_source: Option<String>,

    /// Pace emulation from an external clock
    #[arg(long)]
    external: bool,

    /// Display refresh rate in Hz (0 disables frame repeats)
    #[arg(long, default_value = "60")]
    display_hz: u32,

    /// Video standard: ntsc or pal
    #[arg(long)]
    standard: Option<String>,

    /// Output sample rate in Hz
    #[arg(long)]
    rate: Option<u32>,

    /// Device buffer size in frames
    #[arg(long)]
    buffer: Option<u32>,

    /// Seconds to run before quitting
    #[arg(long, default_value = "5")]
    seconds: f32,

    /// Config file to use instead of the platform default
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Write the effective config back to the config file
    #[arg(long)]
    save_config: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    run(PlayerConfig {
        config_path: args.config,
        sync_source: args.sync_source,
        external: args.external,
        display_hz: args.display_hz,
        standard: args.standard,
        rate: args.rate,
        buffer: args.buffer,
        seconds: args.seconds,
        save_config: args.save_config,
    })
}
