//! Headless player driving the synthetic machine through the sync engine

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use avsync_core::config::{self, Config};
use avsync_core::{
    EngineOptions, SourceId, SyncEngine, SyncError, SyncHandle, SyncMode, VideoStandard,
};

use crate::machine::{Tone, ToneMachine, pattern_frame};
use crate::output::CpalDevice;
use crate::presenter::HeadlessPresenter;

/// Framebuffer width in pixels
const SCREEN_WIDTH: u32 = 320;
/// Framebuffer height in pixels
const SCREEN_HEIGHT: u32 = 240;
/// Frequency of the test tone
const TONE_HZ: f32 = 440.0;

/// Player configuration passed from CLI
#[derive(Debug, Clone, Default)]
pub struct PlayerConfig {
    /// Config file to read instead of the platform default
    pub config_path: Option<PathBuf>,
    pub sync_source: Option<String>,
    /// An external clock drives the system
    pub external: bool,
    pub display_hz: u32,
    pub standard: Option<String>,
    pub rate: Option<u32>,
    pub buffer: Option<u32>,
    /// How long to run before quitting
    pub seconds: f32,
    /// Write the effective config back before starting
    pub save_config: bool,
}

impl PlayerConfig {
    fn load_config(&self) -> Config {
        let mut config = match &self.config_path {
            Some(path) => config::load_from(path),
            None => config::load(),
        };
        if let Some(source) = &self.sync_source {
            config.system.sync_source = source.clone();
        }
        if let Some(standard) = &self.standard {
            config.video.standard = standard.clone();
        }
        if let Some(rate) = self.rate {
            config.audio.rate = rate;
        }
        if let Some(buffer) = self.buffer {
            config.audio.buffer = buffer;
        }
        config
    }
}

/// One emulated frame's worth of work
struct Emulation {
    machine: Arc<ToneMachine>,
    tone: Tone,
    source: SourceId,
    frames_per_frame: f32,
    frame_no: u32,
}

impl Emulation {
    fn step(&mut self, handle: &SyncHandle) -> avsync_core::Result<()> {
        let samples = self
            .tone
            .render_frame(self.frames_per_frame, self.machine.speed());
        handle.push_samples(self.source, samples)?;

        let frame = pattern_frame(handle.acquire_framebuffer(), SCREEN_WIDTH, self.frame_no);
        self.frame_no = self.frame_no.wrapping_add(1);
        handle.submit_frame(frame)
    }

    /// Step until the engine shuts down
    fn run(&mut self, handle: &SyncHandle, pace: Option<Duration>) -> avsync_core::Result<()> {
        while !handle.is_quitting() {
            match self.step(handle) {
                Ok(()) => {}
                Err(SyncError::ShutDown) => break,
                Err(e) => return Err(e),
            }
            if let Some(period) = pace {
                thread::sleep(period.div_f32(1.0 + self.machine.speed()));
            }
        }
        Ok(())
    }
}

/// Render until the engine shuts down, re-entering after playback pauses
fn render_until_quit(handle: &SyncHandle) {
    while !handle.is_quitting() {
        handle.run_video_loop();
    }
}

/// Run the player
pub fn run(options: PlayerConfig) -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = options.load_config();
    if options.save_config {
        match &options.config_path {
            Some(path) => config::save_to(&config, path),
            None => config::save(&config),
        }
        .context("Failed to save config")?;
    }

    let settings = config.resolve(options.external);
    let display_hz = options.display_hz;
    info!("Starting avsync player: {} sync", settings.mode);

    let machine = Arc::new(ToneMachine::new());
    let engine_options = EngineOptions {
        display_hz,
        framebuffer_pixels: (SCREEN_WIDTH * SCREEN_HEIGHT) as usize,
        ..EngineOptions::default()
    };
    let mut engine = SyncEngine::new(
        settings,
        engine_options,
        Box::new(CpalDevice::new()),
        Box::new(HeadlessPresenter::new(display_hz)),
        machine.clone(),
    )
    .context("Failed to start the sync engine")?;

    let handle = engine.handle().clone();
    let spec = engine.device_spec();
    let source_hz = VideoStandard::from_name(&config.video.standard).frame_rate();
    let source = handle
        .create_source(spec.channels)
        .context("Failed to create audio source")?;
    let mut emulation = Emulation {
        machine: machine.clone(),
        tone: Tone::new(TONE_HZ, spec.sample_rate, spec.channels),
        source,
        frames_per_frame: spec.sample_rate as f32 / source_hz as f32,
        frame_no: 0,
    };

    let timer = {
        let handle = handle.clone();
        let run_for = Duration::from_secs_f32(options.seconds.max(0.0));
        thread::spawn(move || {
            thread::sleep(run_for);
            handle.quit();
        })
    };

    match settings.mode {
        SyncMode::AudioCallback | SyncMode::VideoDriven => {
            emulation.run(&handle, None)?;
        }
        SyncMode::AudioThread => {
            handle.set_system_runner(Box::new(move |engine| {
                // Run until the engine asks for control back
                loop {
                    if let Err(e) = emulation.step(engine) {
                        debug!("System runner stopped: {}", e);
                        break;
                    }
                    if machine.take_exit_request() {
                        break;
                    }
                }
            }));
            render_until_quit(&handle);
        }
        SyncMode::External => {
            let period = Duration::from_secs_f64(1.0 / source_hz as f64);
            let emulation_thread = {
                let handle = handle.clone();
                thread::spawn(move || emulation.run(&handle, Some(period)))
            };
            render_until_quit(&handle);
            match emulation_thread.join() {
                Ok(result) => result?,
                Err(_) => warn!("Emulation thread panicked"),
            }
        }
    }

    if timer.join().is_err() {
        warn!("Timer thread panicked");
    }

    let stats = handle.stats();
    engine.shutdown();

    println!("Sync mode:            {}", settings.mode);
    println!("Callback waits:       {}", stats.callback_waits);
    println!("Drained signals:      {}", stats.drained_signals);
    println!("Ready signals:        {}", stats.ready_signals);
    println!("Producer waits:       {}", stats.producer_waits);
    println!("Exit requests:        {}", stats.exit_requests);
    println!("Runner invocations:   {}", stats.runner_invocations);
    println!("Coalesced frames:     {}", stats.coalesced_frames);
    println!("Queue-full waits:     {}", stats.queue_full_waits);
    println!("Dropped frames:       {}", stats.dropped_frames);
    println!("Repeated frames:      {}", stats.repeated_frames);
    println!("Speed adjustments:    {}", stats.speed_adjustments);
    println!("Underflows:           {}", stats.underflows);
    println!("Overflowed samples:   {}", stats.overflow_samples);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut stored = Config::default();
        stored.system.sync_source = "video".to_string();
        stored.audio.rate = 44100;
        config::save_to(&stored, &path).unwrap();

        let options = PlayerConfig {
            config_path: Some(path),
            sync_source: Some("audio_thread".to_string()),
            buffer: Some(256),
            ..PlayerConfig::default()
        };
        let config = options.load_config();
        assert_eq!(config.system.sync_source, "audio_thread");
        assert_eq!(config.audio.rate, 44100);
        assert_eq!(config.audio.buffer, 256);

        let settings = config.resolve(true);
        assert_eq!(settings.mode, SyncMode::External);
    }
}
