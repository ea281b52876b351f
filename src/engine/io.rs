//! Asset access and decoding
//!
//! Fetches a variant's bytes through an [`AssetSource`] and decodes them into
//! a [`DecodedBuffer`]. WAV goes through `hound`; every other container
//! (MP3, FLAC, AAC/MP4, Ogg Vorbis) goes through `symphonia`.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::engine::buffer::{ChannelLayout, DecodedBuffer};
use crate::error::{CambioError, Result};

// ============================================================================
// Asset Sources
// ============================================================================

/// Byte-level access to the audio assets named by track file references
///
/// Implementations are called from loader threads, one call per unique
/// reference.
pub trait AssetSource: Send + Sync {
    /// Retrieve the full contents of `reference`
    fn fetch(&self, reference: &str) -> Result<Vec<u8>>;
}

/// Reads assets from a directory on disk; references are relative paths
#[derive(Debug, Clone)]
pub struct FileSystemSource {
    root: PathBuf,
}

impl FileSystemSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl AssetSource for FileSystemSource {
    fn fetch(&self, reference: &str) -> Result<Vec<u8>> {
        let path = self.root.join(reference.trim_start_matches('/'));
        std::fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CambioError::AssetNotFound {
                    reference: reference.to_string(),
                    source: Some(e),
                }
            } else {
                CambioError::Io(e)
            }
        })
    }
}

/// Serves assets from memory, for embedded assets and tests
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    assets: HashMap<String, Vec<u8>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, reference: impl Into<String>, bytes: Vec<u8>) {
        self.assets.insert(reference.into(), bytes);
    }

    pub fn with_asset(mut self, reference: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.insert(reference, bytes);
        self
    }
}

impl AssetSource for MemorySource {
    fn fetch(&self, reference: &str) -> Result<Vec<u8>> {
        self.assets
            .get(reference)
            .cloned()
            .ok_or_else(|| CambioError::AssetNotFound {
                reference: reference.to_string(),
                source: None,
            })
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Decode an in-memory asset into PCM
///
/// `reference` is only used as a format hint (its extension).
///
/// # Errors
/// * `InvalidAudio` - If the bytes cannot be parsed or decoded
/// * `UnsupportedFormat` - If the audio has more than 2 channels
/// * `EmptyAudio` - If decoding produced no frames
pub fn decode_audio(bytes: Vec<u8>, reference: &str) -> Result<DecodedBuffer> {
    if bytes.starts_with(b"RIFF") {
        decode_wav(bytes)
    } else {
        decode_compressed(bytes, reference)
    }
}

/// Fetch and decode in one step
pub fn load_asset(source: &dyn AssetSource, reference: &str) -> Result<DecodedBuffer> {
    let bytes = source.fetch(reference)?;
    decode_audio(bytes, reference)
}

fn decode_wav(bytes: Vec<u8>) -> Result<DecodedBuffer> {
    let reader = WavReader::new(Cursor::new(bytes)).map_err(|e| CambioError::InvalidAudio {
        reason: format!("Failed to open WAV data: {}", e),
        source: Some(Box::new(e)),
    })?;

    let spec = reader.spec();
    let layout = layout_for(spec.channels as usize)?;
    let interleaved = read_samples_as_f32(reader, spec.bits_per_sample, spec.sample_format)?;

    DecodedBuffer::from_interleaved(&interleaved, layout, spec.sample_rate)
}

fn decode_compressed(bytes: Vec<u8>, reference: &str) -> Result<DecodedBuffer> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = Path::new(reference).extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| invalid_audio("Unrecognized audio container", e))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| CambioError::InvalidAudio {
            reason: "No decodable audio track".to_string(),
            source: None,
        })?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate;
    let mut channels = track.codec_params.channels.map(|c| c.count());

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| invalid_audio("Unsupported codec", e))?;

    let mut interleaved: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(invalid_audio("Failed to read packet", e)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = Some(spec.rate);
                channels = Some(spec.channels.count());
                let mut samples = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                samples.copy_interleaved_ref(decoded);
                interleaved.extend_from_slice(samples.samples());
            }
            // Corrupt frames are skipped, the stream continues
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(invalid_audio("Failed to decode packet", e)),
        }
    }

    let sample_rate = sample_rate.ok_or_else(|| CambioError::InvalidAudio {
        reason: "Unknown sample rate".to_string(),
        source: None,
    })?;
    let layout = layout_for(channels.unwrap_or(2))?;

    DecodedBuffer::from_interleaved(&interleaved, layout, sample_rate)
}

fn invalid_audio(context: &str, e: SymphoniaError) -> CambioError {
    CambioError::InvalidAudio {
        reason: format!("{}: {}", context, e),
        source: Some(Box::new(e)),
    }
}

fn layout_for(channels: usize) -> Result<ChannelLayout> {
    ChannelLayout::from_count(channels).ok_or_else(|| CambioError::UnsupportedFormat {
        format: format!("{}-channel audio (only mono/stereo supported)", channels),
    })
}

/// Read samples from WAV reader and convert to f32
fn read_samples_as_f32<R: std::io::Read>(
    mut reader: WavReader<R>,
    bits_per_sample: u16,
    sample_format: SampleFormat,
) -> Result<Vec<f32>> {
    let read_error = |bits: &str, e: hound::Error| CambioError::InvalidAudio {
        reason: format!("Failed to read {} samples: {}", bits, e),
        source: Some(Box::new(e)),
    };

    match sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(|e| read_error("float", e)),
        SampleFormat::Int => match bits_per_sample {
            8 => reader
                .samples::<i8>()
                .map(|s| s.map(|v| v as f32 / 128.0))
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(|e| read_error("8-bit", e)),
            16 => reader
                .samples::<i16>()
                .map(|s| s.map(|v| v as f32 / 32768.0))
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(|e| read_error("16-bit", e)),
            // 24-bit stored as i32 in hound
            24 => reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / 8388608.0))
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(|e| read_error("24-bit", e)),
            32 => reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / 2147483648.0))
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(|e| read_error("32-bit int", e)),
            _ => Err(CambioError::UnsupportedFormat {
                format: format!("{}-bit integer audio", bits_per_sample),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};
    use tempfile::tempdir;

    fn wav_bytes(channels: u16, sample_rate: u32, frames: usize, value: i16) -> Vec<u8> {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..frames * channels as usize {
                writer.write_sample(value).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_decode_16_bit_wav() {
        let bytes = wav_bytes(2, 8000, 4000, 16384);
        let buffer = decode_audio(bytes, "variant.wav").unwrap();
        assert_eq!(buffer.channels(), 2);
        assert_eq!(buffer.frames(), 4000);
        assert_eq!(buffer.sample_rate(), 8000);
        assert!((buffer.duration_secs() - 0.5).abs() < 1e-9);
        assert_eq!(buffer.channel(1)[100], 0.5);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result = decode_audio(vec![0x13; 256], "noise.mp3");
        assert!(matches!(result, Err(CambioError::InvalidAudio { .. })));
    }

    #[test]
    fn test_truncated_riff_fails() {
        let mut bytes = wav_bytes(1, 8000, 100, 0);
        bytes.truncate(20);
        assert!(decode_audio(bytes, "short.wav").is_err());
    }

    #[test]
    fn test_file_system_source() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("warm.wav"), wav_bytes(1, 8000, 800, 0)).unwrap();

        let source = FileSystemSource::new(dir.path());
        let buffer = load_asset(&source, "warm.wav").unwrap();
        assert_eq!(buffer.frames(), 800);

        let missing = source.fetch("open.wav");
        assert!(matches!(missing, Err(CambioError::AssetNotFound { .. })));
    }

    #[test]
    fn test_memory_source_missing_reference() {
        let source = MemorySource::new().with_asset("a.wav", wav_bytes(1, 8000, 10, 0));
        assert!(source.fetch("a.wav").is_ok());
        assert_eq!(
            source.fetch("b.wav").unwrap_err().error_code(),
            "ASSET_NOT_FOUND"
        );
    }
}
