//! Audio output on the default cpal device

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{debug, error, warn};

use avsync_core::{
    AudioDevice, DeviceCallback, DeviceRequest, DeviceSpec, OutputBuffer, Result, SampleFormat,
    SyncError,
};

/// [`AudioDevice`] backed by the host's default output device
#[derive(Default)]
pub struct CpalDevice {
    /// The cpal stream (kept alive while open)
    stream: Option<cpal::Stream>,
}

impl CpalDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

fn cpal_format(format: SampleFormat) -> cpal::SampleFormat {
    match format {
        SampleFormat::F32 => cpal::SampleFormat::F32,
        SampleFormat::S16 => cpal::SampleFormat::I16,
    }
}

/// Buffer sizes of the first supported config matching the request
fn matching_config(
    device: &cpal::Device,
    request: &DeviceRequest,
) -> Result<Option<cpal::SupportedBufferSize>> {
    let configs = device
        .supported_output_configs()
        .map_err(|e| SyncError::DeviceOpen(format!("Failed to query output configs: {}", e)))?;
    let wanted = cpal_format(request.format);
    let rate = cpal::SampleRate(request.sample_rate);
    Ok(configs
        .into_iter()
        .find(|c| {
            c.sample_format() == wanted
                && c.channels() == request.channels
                && c.min_sample_rate() <= rate
                && rate <= c.max_sample_rate()
        })
        .map(|c| c.buffer_size().clone()))
}

/// Use the requested buffer size when the device accepts it
fn buffer_size(supported: &cpal::SupportedBufferSize, frames: u32) -> cpal::BufferSize {
    match supported {
        cpal::SupportedBufferSize::Range { min, max } if (*min..=*max).contains(&frames) => {
            cpal::BufferSize::Fixed(frames)
        }
        _ => {
            warn!("Device does not accept a {} frame buffer, using its default", frames);
            cpal::BufferSize::Default
        }
    }
}

fn build_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    format: SampleFormat,
    mut callback: DeviceCallback,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError> {
    match format {
        SampleFormat::F32 => device.build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                callback(OutputBuffer::F32(data));
            },
            |err| error!("Audio stream error: {}", err),
            None,
        ),
        SampleFormat::S16 => device.build_output_stream(
            config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                callback(OutputBuffer::S16(data));
            },
            |err| error!("Audio stream error: {}", err),
            None,
        ),
    }
}

impl AudioDevice for CpalDevice {
    fn open(&mut self, request: &DeviceRequest, callback: DeviceCallback) -> Result<DeviceSpec> {
        self.close();

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(SyncError::DeviceUnavailable)?;

        let Some(supported) = matching_config(&device, request)? else {
            return Err(SyncError::UnsupportedFormat(format!(
                "{} x{} at {}Hz",
                request.format.as_str(),
                request.channels,
                request.sample_rate
            )));
        };

        let config = cpal::StreamConfig {
            channels: request.channels,
            sample_rate: cpal::SampleRate(request.sample_rate),
            buffer_size: buffer_size(&supported, request.buffer_frames),
        };

        let stream = build_stream(&device, &config, request.format, callback)
            .map_err(|e| SyncError::DeviceOpen(format!("Failed to build audio stream: {}", e)))?;
        stream
            .play()
            .map_err(|e| SyncError::DeviceOpen(format!("Failed to play audio stream: {}", e)))?;

        // With a default-sized buffer the mixer still works in request-sized
        // units; callbacks of other sizes are mixed as they come
        let spec = DeviceSpec {
            sample_rate: request.sample_rate,
            format: request.format,
            channels: request.channels,
            buffer_frames: request.buffer_frames,
        };
        debug!(
            "Audio stream started on {}",
            device.name().unwrap_or_else(|_| "unknown device".to_string())
        );
        self.stream = Some(stream);
        Ok(spec)
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!("Audio stream closed");
        }
    }
}
