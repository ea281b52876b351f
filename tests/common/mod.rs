//! Shared fixtures for the engine scenario tests
//!
//! Variants are DC-valued mono WAVs, so the rendered output is the summed
//! gain envelope scaled by [`LEVEL`]. Gaps, doublings and clicks show up
//! directly as deviations from `LEVEL`.

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use cambio::engine::{AssetSource, GraphRenderer, MemorySource};
use cambio::{EngineConfig, PlaybackEngine, TrackDescriptor};
use hound::{SampleFormat, WavSpec, WavWriter};

pub const RATE: u32 = 8000;
pub const BLOCK: usize = 64;
pub const LEVEL: f32 = 0.5;
pub const VARIANTS: [&str; 4] = ["original", "master-1", "master-2", "master-3"];

/// A mono 16-bit WAV holding `seconds` of DC at [`LEVEL`]
pub fn wav_bytes(seconds: f64) -> Vec<u8> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let frames = (seconds * RATE as f64).round() as usize;
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
        for _ in 0..frames {
            writer.write_sample(16384i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

pub fn descriptor(id: &str) -> TrackDescriptor {
    TrackDescriptor::new(id, id, format!("{}.wav", id))
}

/// The four standard variants, all `seconds` long
pub fn variants(seconds: f64) -> (EngineConfig, MemorySource) {
    let mut source = MemorySource::new();
    let mut tracks = Vec::new();
    for id in VARIANTS {
        source.insert(format!("{}.wav", id), wav_bytes(seconds));
        tracks.push(descriptor(id));
    }
    (EngineConfig::new(tracks), source)
}

/// Engine on the software mixer with every load resolved
pub fn ready_engine(
    config: EngineConfig,
    source: impl AssetSource + 'static,
) -> (PlaybackEngine, GraphRenderer) {
    let (mut engine, renderer) =
        PlaybackEngine::with_graph(config, RATE, Arc::new(source)).unwrap();
    assert!(engine.wait_for_library(Duration::from_secs(30)));
    (engine, renderer)
}

/// Render `seconds` of output in small blocks, ticking after each block
pub fn run(engine: &mut PlaybackEngine, renderer: &mut GraphRenderer, seconds: f64) -> Vec<f32> {
    let frames = (seconds * RATE as f64).round() as usize;
    let mut output = Vec::with_capacity(frames);
    let mut block = [0.0f32; BLOCK];
    let mut remaining = frames;
    while remaining > 0 {
        let n = remaining.min(BLOCK);
        renderer.render(&mut block[..n], 1);
        output.extend_from_slice(&block[..n]);
        engine.tick();
        remaining -= n;
    }
    output
}

/// Largest absolute step between consecutive samples
pub fn max_step(samples: &[f32]) -> f32 {
    samples
        .windows(2)
        .map(|w| (w[1] - w[0]).abs())
        .fold(0.0, f32::max)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
