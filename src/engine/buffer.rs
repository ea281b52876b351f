//! Decoded Audio Buffers
//!
//! The immutable PCM data a variant decodes into. Buffers are produced once by
//! the [`BufferStore`](super::BufferStore) and then shared read-only, behind an
//! `Arc`, by every session and render-path voice that plays them.

use crate::error::{CambioError, Result};

// ============================================================================
// Channel Layout
// ============================================================================

/// Audio channel configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChannelLayout {
    /// Single channel (mono)
    Mono,
    /// Two channels (stereo: left, right)
    #[default]
    Stereo,
}

impl ChannelLayout {
    /// Returns the number of channels for this layout
    pub fn num_channels(&self) -> usize {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
        }
    }

    /// Create a ChannelLayout from a channel count
    pub fn from_count(count: usize) -> Option<Self> {
        match count {
            1 => Some(ChannelLayout::Mono),
            2 => Some(ChannelLayout::Stereo),
            _ => None,
        }
    }
}

// ============================================================================
// Decoded Buffer
// ============================================================================

/// Immutable decoded audio
///
/// Stores audio as non-interleaved 32-bit floating point samples at the
/// source's own sample rate. The render path converts rates on the fly, so
/// no resampling happens at decode time.
///
/// # Example
/// ```
/// use cambio::engine::{ChannelLayout, DecodedBuffer};
///
/// let interleaved = vec![0.0_f32; 2 * 44100];
/// let buffer = DecodedBuffer::from_interleaved(&interleaved, ChannelLayout::Stereo, 44100).unwrap();
/// assert_eq!(buffer.channels(), 2);
/// assert_eq!(buffer.frames(), 44100);
/// assert!((buffer.duration_secs() - 1.0).abs() < 1e-9);
/// ```
#[derive(Debug, Clone)]
pub struct DecodedBuffer {
    samples: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl DecodedBuffer {
    /// Create a buffer from per-channel sample vectors
    ///
    /// All channels must have the same length.
    pub fn from_channels(samples: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self> {
        if ChannelLayout::from_count(samples.len()).is_none() {
            return Err(CambioError::UnsupportedFormat {
                format: format!("{}-channel audio (only mono/stereo supported)", samples.len()),
            });
        }
        if sample_rate == 0 {
            return Err(CambioError::InvalidAudio {
                reason: "sample rate must be non-zero".to_string(),
                source: None,
            });
        }
        let frames = samples[0].len();
        if samples.iter().any(|ch| ch.len() != frames) {
            return Err(CambioError::InvalidAudio {
                reason: "channels have different lengths".to_string(),
                source: None,
            });
        }
        if frames == 0 {
            return Err(CambioError::EmptyAudio);
        }

        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Create a buffer from interleaved sample data (L, R, L, R, ... for stereo)
    pub fn from_interleaved(
        interleaved: &[f32],
        layout: ChannelLayout,
        sample_rate: u32,
    ) -> Result<Self> {
        let num_channels = layout.num_channels();

        if interleaved.len() % num_channels != 0 {
            return Err(CambioError::InvalidAudio {
                reason: format!(
                    "Interleaved data length {} is not divisible by channel count {}",
                    interleaved.len(),
                    num_channels
                ),
                source: None,
            });
        }

        let num_frames = interleaved.len() / num_channels;
        let mut samples = vec![Vec::with_capacity(num_frames); num_channels];

        for frame in interleaved.chunks_exact(num_channels) {
            for (ch, &sample) in frame.iter().enumerate() {
                samples[ch].push(sample);
            }
        }

        Self::from_channels(samples, sample_rate)
    }

    /// Get the number of channels
    #[inline]
    pub fn channels(&self) -> usize {
        self.samples.len()
    }

    /// Get the number of frames (samples per channel)
    #[inline]
    pub fn frames(&self) -> usize {
        self.samples[0].len()
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Duration in seconds
    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Get a read-only view of one channel
    pub fn channel(&self, channel: usize) -> &[f32] {
        &self.samples[channel]
    }

    /// Read a sample at a fractional frame position using linear interpolation
    ///
    /// Channels beyond the buffer's own count map onto its last channel, so a
    /// mono buffer feeds both sides of a stereo output. Positions outside the
    /// buffer read as silence.
    #[inline]
    pub fn sample_at(&self, channel: usize, position: f64) -> f32 {
        if position < 0.0 {
            return 0.0;
        }
        let data = &self.samples[channel.min(self.samples.len() - 1)];
        let index = position.floor() as usize;
        if index >= data.len() {
            return 0.0;
        }
        let frac = (position - index as f64) as f32;
        let current = data[index];
        let next = data.get(index + 1).copied().unwrap_or(current);
        current + (next - current) * frac
    }
}
