//! Device output
//!
//! Drives a [`GraphRenderer`] from the default output device. The device
//! callback is the render path: it takes no locks, but it may still allocate
//! when a block's commands outgrow the renderer's pre-sized storage.
//!
//! The stream asks for a fixed buffer of [`PREFERRED_BUFFER_FRAMES`] when the
//! device allows it. Keep `EngineTuning::lookahead` above
//! [`DeviceOutput::buffer_latency`] so scheduled starts land ahead of the
//! clock.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{info, warn};

use crate::engine::graph::{GraphRenderer, OutputStatus};
use crate::error::{CambioError, Result};

/// Requested device buffer, in frames
pub const PREFERRED_BUFFER_FRAMES: u32 = 256;

/// A running output stream
///
/// Dropping it stops the device.
pub struct DeviceOutput {
    stream: cpal::Stream,
    status: OutputStatus,
    sample_rate: u32,
    channels: u16,
    buffer_frames: Option<u32>,
}

impl DeviceOutput {
    /// Sample rate of the default output device
    ///
    /// Build the `AudioGraph` at this rate before calling [`DeviceOutput::start`].
    pub fn default_sample_rate() -> Result<u32> {
        let (_, config) = default_device()?;
        Ok(config.sample_rate().0)
    }

    /// Open the default output device and start rendering
    ///
    /// # Errors
    /// * `OutputDevice` - No device, rate mismatch, or the stream failed to start
    pub fn start(mut renderer: GraphRenderer) -> Result<Self> {
        let (device, supported) = default_device()?;
        let sample_rate = supported.sample_rate().0;
        if sample_rate != renderer.sample_rate() {
            return Err(CambioError::OutputDevice {
                reason: format!(
                    "device runs at {} Hz but the renderer was built for {} Hz",
                    sample_rate,
                    renderer.sample_rate()
                ),
            });
        }

        let sample_format = supported.sample_format();
        let buffer_range = supported.buffer_size().clone();
        let mut config: cpal::StreamConfig = supported.into();
        let buffer_frames = match buffer_range {
            cpal::SupportedBufferSize::Range { min, max } => {
                let fixed = PREFERRED_BUFFER_FRAMES.clamp(min, max.max(min));
                config.buffer_size = cpal::BufferSize::Fixed(fixed);
                Some(fixed)
            }
            cpal::SupportedBufferSize::Unknown => None,
        };
        let channels = config.channels;
        let status = renderer.output_status();

        let error_status = status.clone();
        let on_error = move |err: cpal::StreamError| {
            warn!(error = %err, "output stream error");
            error_status.set_available(false);
        };

        let stream = match sample_format {
            cpal::SampleFormat::F32 => device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    renderer.render(data, channels as usize);
                },
                on_error,
                None,
            ),
            cpal::SampleFormat::I16 => {
                let mut scratch: Vec<f32> = Vec::new();
                device.build_output_stream(
                    &config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        scratch.resize(data.len(), 0.0);
                        renderer.render(&mut scratch, channels as usize);
                        for (out, sample) in data.iter_mut().zip(&scratch) {
                            *out = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                        }
                    },
                    on_error,
                    None,
                )
            }
            other => {
                return Err(CambioError::OutputDevice {
                    reason: format!("unsupported sample format {:?}", other),
                })
            }
        }
        .map_err(|e| CambioError::OutputDevice {
            reason: e.to_string(),
        })?;

        stream.play().map_err(|e| CambioError::OutputDevice {
            reason: e.to_string(),
        })?;
        status.set_available(true);

        info!(sample_rate, channels, ?buffer_frames, "output device started");
        Ok(Self {
            stream,
            status,
            sample_rate,
            channels,
            buffer_frames,
        })
    }

    /// Suspend the device; scheduled automation resumes with the clock
    pub fn pause(&self) -> Result<()> {
        self.stream.pause().map_err(|e| CambioError::OutputDevice {
            reason: e.to_string(),
        })
    }

    pub fn status(&self) -> &OutputStatus {
        &self.status
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Length of one device buffer in seconds, if the device reported it
    pub fn buffer_latency(&self) -> Option<f64> {
        self.buffer_frames
            .map(|frames| frames as f64 / self.sample_rate as f64)
    }
}

fn default_device() -> Result<(cpal::Device, cpal::SupportedStreamConfig)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| CambioError::OutputDevice {
            reason: "no output device available".to_string(),
        })?;
    let config = device
        .default_output_config()
        .map_err(|e| CambioError::OutputDevice {
            reason: e.to_string(),
        })?;
    Ok((device, config))
}
