//! Render graph
//!
//! The seam between the control thread and the realtime render path.
//!
//! [`AudioBackend`] is everything the engine needs from an audio subsystem:
//! a hardware clock it can read but not steer, gain parameters with
//! forward-scheduled automation, and buffer sources that start and stop at
//! future instants and report when they have finished.
//!
//! [`AudioGraph`] / [`GraphRenderer`] are the built-in implementation, a small
//! software mixer split in two halves:
//! - `AudioGraph` lives on the control thread. It mirrors every gain timeline
//!   so live values can be read without touching the render path.
//! - `GraphRenderer` lives wherever samples are produced (a device callback,
//!   or a test driving it block by block). It owns the voices, evaluates the
//!   same timelines per sample and advances the clock.
//!
//! The halves share nothing but two channels and a couple of atomics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, trace};

use crate::engine::automation::{AutomationEvent, GainParam};
use crate::engine::buffer::DecodedBuffer;
use crate::error::{CambioError, Result};

// ============================================================================
// Identifiers & notifications
// ============================================================================

/// Handle to a gain parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GainId(u64);

/// Handle to a scheduled buffer source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(u64);

/// Why a source stopped producing audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Ran past the end of its buffer
    Exhausted,
    /// Reached its scheduled stop time
    Stopped,
}

/// Completion notification sent from the render path
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceEnded {
    pub source: SourceId,
    pub reason: EndReason,
    /// Hardware time at which the source went silent
    pub time: f64,
}

// ============================================================================
// Backend trait
// ============================================================================

/// Scheduling primitives the playback engine relies on
///
/// Every method returns immediately. Times are seconds on the backend's
/// hardware clock.
pub trait AudioBackend {
    /// Current hardware clock reading
    fn current_time(&self) -> f64;

    fn sample_rate(&self) -> u32;

    /// Ask the output to run; fails if the device refuses
    fn resume(&mut self) -> Result<()>;

    /// Gain shared by every source, applied after the per-source gain
    fn master_gain(&self) -> GainId;

    /// Create a per-source gain holding `initial` until automation says otherwise
    fn create_gain(&mut self, initial: f32) -> GainId;

    fn release_gain(&mut self, gain: GainId);

    fn schedule(&mut self, gain: GainId, event: AutomationEvent);

    /// Cancel automation at/after `at`, pin the curve's value there and return it
    fn cancel_and_hold(&mut self, gain: GainId, at: f64) -> f32;

    /// Value the gain will have at `time` given the automation scheduled so far
    fn gain_value_at(&self, gain: GainId, time: f64) -> f32;

    /// Play `buffer` through `gain` from `offset` seconds into it, starting at `at`
    fn start_source(
        &mut self,
        buffer: Arc<DecodedBuffer>,
        gain: GainId,
        at: f64,
        offset: f64,
    ) -> SourceId;

    fn stop_source(&mut self, source: SourceId, at: f64);

    /// Completion notifications received since the last call
    fn drain_ended(&mut self) -> Vec<SourceEnded>;
}

// ============================================================================
// Shared state
// ============================================================================

#[derive(Debug)]
struct SharedClock {
    frames_rendered: AtomicU64,
    output_available: AtomicBool,
}

/// Availability flag of the physical output
///
/// Device drivers clear it when the stream fails; `resume` then refuses.
#[derive(Debug, Clone)]
pub struct OutputStatus(Arc<SharedClock>);

impl OutputStatus {
    pub fn set_available(&self, available: bool) {
        self.0.output_available.store(available, Ordering::Release);
    }

    pub fn is_available(&self) -> bool {
        self.0.output_available.load(Ordering::Acquire)
    }
}

enum GraphCommand {
    CreateGain {
        gain: GainId,
        initial: f32,
    },
    ReleaseGain(GainId),
    Schedule {
        gain: GainId,
        event: AutomationEvent,
    },
    CancelAndHold {
        gain: GainId,
        at: f64,
    },
    StartVoice {
        source: SourceId,
        buffer: Arc<DecodedBuffer>,
        gain: GainId,
        at: f64,
        offset: f64,
    },
    StopVoice {
        source: SourceId,
        at: f64,
    },
}

// ============================================================================
// Control half
// ============================================================================

/// Control-thread half of the software mixer
pub struct AudioGraph {
    sample_rate: u32,
    shared: Arc<SharedClock>,
    commands: Sender<GraphCommand>,
    ended: Receiver<SourceEnded>,
    gains: HashMap<GainId, GainParam>,
    master: GainId,
    next_id: u64,
}

impl AudioGraph {
    /// Build a connected graph/renderer pair running at `sample_rate`
    pub fn new(sample_rate: u32) -> (AudioGraph, GraphRenderer) {
        let shared = Arc::new(SharedClock {
            frames_rendered: AtomicU64::new(0),
            output_available: AtomicBool::new(true),
        });
        let (command_tx, command_rx) = unbounded();
        let (ended_tx, ended_rx) = unbounded();

        let master = GainId(0);
        let mut control_gains = HashMap::new();
        control_gains.insert(master, GainParam::new(1.0));
        let mut render_gains = HashMap::with_capacity(RENDER_CAPACITY);
        render_gains.insert(master, GainParam::new(1.0));

        let graph = AudioGraph {
            sample_rate,
            shared: Arc::clone(&shared),
            commands: command_tx,
            ended: ended_rx,
            gains: control_gains,
            master,
            next_id: 1,
        };
        let renderer = GraphRenderer {
            sample_rate,
            shared,
            commands: command_rx,
            ended: ended_tx,
            gains: render_gains,
            voices: Vec::with_capacity(RENDER_CAPACITY),
            master,
        };
        (graph, renderer)
    }

    pub fn output_status(&self) -> OutputStatus {
        OutputStatus(Arc::clone(&self.shared))
    }

    fn allocate(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn send(&self, command: GraphCommand) {
        // A dropped renderer means nothing is listening any more; the
        // control side keeps working against its mirror.
        if self.commands.send(command).is_err() {
            trace!("render path disconnected, command dropped");
        }
    }

    fn param_mut(&mut self, gain: GainId) -> Option<&mut GainParam> {
        let now = self.current_time();
        let param = self.gains.get_mut(&gain)?;
        param.prune_before(now);
        Some(param)
    }
}

impl AudioBackend for AudioGraph {
    fn current_time(&self) -> f64 {
        self.shared.frames_rendered.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn resume(&mut self) -> Result<()> {
        if self.shared.output_available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(CambioError::PlaybackRefused {
                reason: "audio output is unavailable".to_string(),
            })
        }
    }

    fn master_gain(&self) -> GainId {
        self.master
    }

    fn create_gain(&mut self, initial: f32) -> GainId {
        let gain = GainId(self.allocate());
        self.gains.insert(gain, GainParam::new(initial));
        self.send(GraphCommand::CreateGain { gain, initial });
        gain
    }

    fn release_gain(&mut self, gain: GainId) {
        if gain == self.master {
            return;
        }
        self.gains.remove(&gain);
        self.send(GraphCommand::ReleaseGain(gain));
    }

    fn schedule(&mut self, gain: GainId, event: AutomationEvent) {
        if let Some(param) = self.param_mut(gain) {
            param.schedule(event);
            self.send(GraphCommand::Schedule { gain, event });
        }
    }

    fn cancel_and_hold(&mut self, gain: GainId, at: f64) -> f32 {
        match self.param_mut(gain) {
            Some(param) => {
                let held = param.cancel_and_hold(at);
                self.send(GraphCommand::CancelAndHold { gain, at });
                held
            }
            None => 0.0,
        }
    }

    fn gain_value_at(&self, gain: GainId, time: f64) -> f32 {
        self.gains
            .get(&gain)
            .map(|param| param.value_at(time))
            .unwrap_or(0.0)
    }

    fn start_source(
        &mut self,
        buffer: Arc<DecodedBuffer>,
        gain: GainId,
        at: f64,
        offset: f64,
    ) -> SourceId {
        let source = SourceId(self.allocate());
        self.send(GraphCommand::StartVoice {
            source,
            buffer,
            gain,
            at,
            offset,
        });
        source
    }

    fn stop_source(&mut self, source: SourceId, at: f64) {
        self.send(GraphCommand::StopVoice { source, at });
    }

    fn drain_ended(&mut self) -> Vec<SourceEnded> {
        let ended: Vec<SourceEnded> = self.ended.try_iter().collect();
        for event in &ended {
            debug!(source = event.source.0, reason = ?event.reason, time = event.time, "voice ended");
        }
        ended
    }
}

// ============================================================================
// Render half
// ============================================================================

/// Voices and gains the render half holds without reallocating
const RENDER_CAPACITY: usize = 32;

struct Voice {
    source: SourceId,
    buffer: Arc<DecodedBuffer>,
    gain: GainId,
    start: f64,
    /// Buffer position (in buffer frames) at `start`
    start_frame: f64,
    stop: Option<f64>,
    ended: Option<(EndReason, f64)>,
}

/// Render-path half of the software mixer
pub struct GraphRenderer {
    sample_rate: u32,
    shared: Arc<SharedClock>,
    commands: Receiver<GraphCommand>,
    ended: Sender<SourceEnded>,
    gains: HashMap<GainId, GainParam>,
    voices: Vec<Voice>,
    master: GainId,
}

impl GraphRenderer {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn output_status(&self) -> OutputStatus {
        OutputStatus(Arc::clone(&self.shared))
    }

    pub fn current_time(&self) -> f64 {
        self.shared.frames_rendered.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    /// Number of voices currently scheduled or sounding
    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Mix one block of interleaved output and advance the clock by its length
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let frames = out.len() / channels;
        let first_frame = self.shared.frames_rendered.load(Ordering::Acquire);
        let block_start = first_frame as f64 / self.sample_rate as f64;

        self.apply_commands(block_start);
        out.fill(0.0);

        for i in 0..frames {
            let t = (first_frame + i as u64) as f64 / self.sample_rate as f64;
            let master = self
                .gains
                .get(&self.master)
                .map(|g| g.value_at(t))
                .unwrap_or(1.0);

            for voice in self.voices.iter_mut() {
                if voice.ended.is_some() || t < voice.start {
                    continue;
                }
                if let Some(stop) = voice.stop {
                    if t >= stop {
                        voice.ended = Some((EndReason::Stopped, t));
                        continue;
                    }
                }
                let position =
                    voice.start_frame + (t - voice.start) * voice.buffer.sample_rate() as f64;
                if position >= voice.buffer.frames() as f64 {
                    voice.ended = Some((EndReason::Exhausted, t));
                    continue;
                }

                let gain = self
                    .gains
                    .get(&voice.gain)
                    .map(|g| g.value_at(t))
                    .unwrap_or(0.0)
                    * master;
                if gain == 0.0 {
                    continue;
                }
                let frame = &mut out[i * channels..(i + 1) * channels];
                for (channel, sample) in frame.iter_mut().enumerate() {
                    *sample += voice.buffer.sample_at(channel, position) * gain;
                }
            }
        }

        self.shared
            .frames_rendered
            .fetch_add(frames as u64, Ordering::Release);

        let block_end = (first_frame + frames as u64) as f64 / self.sample_rate as f64;
        for param in self.gains.values_mut() {
            param.prune_before(block_end);
        }
        self.retire_ended_voices();
    }

    fn apply_commands(&mut self, block_start: f64) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                GraphCommand::CreateGain { gain, initial } => {
                    self.gains.insert(gain, GainParam::new(initial));
                }
                GraphCommand::ReleaseGain(gain) => {
                    self.gains.remove(&gain);
                }
                GraphCommand::Schedule { gain, event } => {
                    if let Some(param) = self.gains.get_mut(&gain) {
                        param.schedule(event);
                    }
                }
                GraphCommand::CancelAndHold { gain, at } => {
                    if let Some(param) = self.gains.get_mut(&gain) {
                        param.cancel_and_hold(at);
                    }
                }
                GraphCommand::StartVoice {
                    source,
                    buffer,
                    gain,
                    at,
                    offset,
                } => {
                    // Late requests start at the block boundary, skipping the
                    // audio they missed so the voice stays on its timeline
                    let start = at.max(block_start);
                    let position = offset.max(0.0) + (start - at).max(0.0);
                    let start_frame = position * buffer.sample_rate() as f64;
                    self.voices.push(Voice {
                        source,
                        buffer,
                        gain,
                        start,
                        start_frame,
                        stop: None,
                        ended: None,
                    });
                }
                GraphCommand::StopVoice { source, at } => {
                    if let Some(voice) = self.voices.iter_mut().find(|v| v.source == source) {
                        voice.stop = Some(at.max(block_start));
                    }
                }
            }
        }
    }

    fn retire_ended_voices(&mut self) {
        let ended = &self.ended;
        self.voices.retain(|voice| match voice.ended {
            Some((reason, time)) => {
                let _ = ended.send(SourceEnded {
                    source: voice.source,
                    reason,
                    time,
                });
                false
            }
            None => true,
        });
    }
}
