//! Playback engine
//!
//! The public orchestrator. Owns the transport, the buffer store and the
//! crossfade scheduler, and turns each public operation into one atomic
//! state transition on the control thread:
//!
//! ```text
//! Loading ──(library resolved)──▶ Ready ◀──toggle_play──▶ Playing
//!                                   ▲                        │
//!                                   └──── natural end ───────┘
//! ```
//!
//! `seek` and `switch_track` stay within Ready or Playing; while playing they
//! crossfade through the scheduler. No operation blocks on the render path:
//! effects become audible after the lookahead.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::config::{EngineConfig, EngineTuning, TrackDescriptor};
use crate::engine::automation::AutomationEvent;
use crate::engine::graph::{AudioBackend, AudioGraph, GraphRenderer};
use crate::engine::io::AssetSource;
use crate::engine::scheduler::CrossfadeScheduler;
use crate::engine::session::SessionId;
use crate::engine::store::{BufferStore, LoadOutcome, Readiness};
use crate::engine::transport::{self, clamp_position, TransportState};
use crate::error::{CambioError, EngineError, EngineErrorKind, Result};

/// Coarse engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    /// Some tracks are still loading and nothing is playing
    Loading,
    /// Paused
    Ready,
    Playing,
}

/// Read-only snapshot for the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub active_track_id: String,
    pub status: PlaybackStatus,
    pub is_playing: bool,
    pub current_time_seconds: f64,
    pub duration_seconds: f64,
    pub volume: f32,
    pub is_library_ready: bool,
    pub ready_count: usize,
    pub total_count: usize,
    pub error: Option<EngineError>,
}

/// Gapless variant-switching player
pub struct PlaybackEngine<B: AudioBackend = AudioGraph> {
    config: EngineConfig,
    backend: B,
    store: BufferStore,
    scheduler: CrossfadeScheduler,
    transport: TransportState,
    active_track: String,
    duration: f64,
    /// The session whose natural end means "end of track"
    current_session: Option<SessionId>,
    volume: f32,
    current_time: f64,
    error: Option<EngineError>,
}

impl PlaybackEngine<AudioGraph> {
    /// Build an engine on the built-in software mixer
    ///
    /// The returned renderer must be driven by the host, either from an
    /// output device callback or manually for offline rendering.
    pub fn with_graph(
        config: EngineConfig,
        sample_rate: u32,
        source: Arc<dyn AssetSource>,
    ) -> Result<(Self, GraphRenderer)> {
        let (graph, renderer) = AudioGraph::new(sample_rate);
        let engine = Self::new(config, graph, source)?;
        Ok((engine, renderer))
    }
}

impl<B: AudioBackend> PlaybackEngine<B> {
    /// Validate `config`, start loading every track and apply the initial volume
    pub fn new(config: EngineConfig, mut backend: B, source: Arc<dyn AssetSource>) -> Result<Self> {
        config.validate()?;

        let mut store = BufferStore::new(source);
        store.request_all(&config.tracks);

        let volume = config.volume.clamp(0.0, 1.0);
        let master = backend.master_gain();
        let now = backend.current_time();
        backend.cancel_and_hold(master, now);
        backend.schedule(master, AutomationEvent::SetValue { value: volume, time: now });

        let scheduler =
            CrossfadeScheduler::new(config.tuning.switch_padding, config.tuning.stop_margin);
        let active_track = config.initial_track_id().to_string();

        info!(
            tracks = config.tracks.len(),
            active = %active_track,
            sample_rate = backend.sample_rate(),
            "playback engine created"
        );

        let mut engine = Self {
            config,
            backend,
            store,
            scheduler,
            transport: TransportState::default(),
            active_track,
            duration: 0.0,
            current_session: None,
            volume,
            current_time: 0.0,
            error: None,
        };
        engine.pump();
        Ok(engine)
    }

    // ========================================================================
    // Public operations
    // ========================================================================

    /// Play if paused, pause if playing
    ///
    /// # Errors
    /// * `TrackNotReady` - The active track is still loading
    /// * `LoadFailed` - The active track failed to load
    /// * `PlaybackRefused` - The output refused to start
    ///
    /// In every error case the engine stays paused with no session, and the
    /// error is also published in [`PlayerState::error`].
    pub fn toggle_play(&mut self) -> Result<()> {
        self.pump();
        if self.transport.is_playing {
            self.pause();
            Ok(())
        } else {
            self.play()
        }
    }

    /// Move the transport to `time` seconds (clamped to the track)
    ///
    /// NaN is ignored; infinities clamp to the track bounds.
    pub fn seek(&mut self, time: f64) {
        self.pump();
        if time.is_nan() {
            warn!("ignoring seek to NaN");
            return;
        }
        let target = clamp_position(time, self.duration);
        let at = self.backend.current_time() + self.tuning().lookahead;

        self.transport = transport::jump(self.transport, target, at, self.duration);
        self.current_time = target;
        debug!(target, playing = self.transport.is_playing, "seek");

        if self.transport.is_playing {
            self.crossfade_to_active(at, target);
        }
    }

    /// Make `track_id` the audible variant without moving the timeline
    ///
    /// # Errors
    /// * `UnknownTrack` - `track_id` is not configured
    pub fn switch_track(&mut self, track_id: &str) -> Result<()> {
        if self.config.track(track_id).is_none() {
            return Err(CambioError::UnknownTrack {
                id: track_id.to_string(),
            });
        }
        if track_id == self.active_track {
            trace!(track = track_id, "already active");
            return Ok(());
        }
        self.pump();

        let now = self.backend.current_time();
        let at = now + self.tuning().lookahead;
        let from_duration = self.duration;
        let position = transport::position(self.transport, at, from_duration);

        let readiness = self.store.readiness(track_id).unwrap_or(Readiness::Pending);
        let to_duration = self
            .store
            .buffer(track_id)
            .map(|b| b.duration_secs())
            .unwrap_or(from_duration);
        let mapped = self
            .tuning()
            .position_mapping
            .map(position, from_duration, to_duration);

        debug!(
            from = %self.active_track,
            to = track_id,
            position,
            mapped,
            playing = self.transport.is_playing,
            "switch track"
        );

        self.active_track = track_id.to_string();
        self.duration = to_duration;
        if (mapped - position).abs() > f64::EPSILON {
            self.transport = transport::jump(self.transport, mapped, at, to_duration);
        }
        self.error = self.load_error_for(track_id);

        if self.transport.is_playing {
            match readiness {
                Readiness::Ready => self.crossfade_to_active(at, mapped),
                Readiness::Pending => {
                    // Keep the clock running; the session starts once the buffer lands
                    self.scheduler
                        .retire_all(&mut self.backend, at, self.config.tuning.crossfade);
                    self.current_session = None;
                }
                Readiness::Errored => {
                    self.scheduler
                        .retire_all(&mut self.backend, at, self.config.tuning.crossfade);
                    self.current_session = None;
                    self.transport = transport::freeze(self.transport, at, self.duration);
                    warn!(track = track_id, "switched to a track that failed to load, pausing");
                }
            }
            self.current_time = transport::position(self.transport, now, self.duration);
        } else {
            self.current_time = self.transport.offset_seconds;
        }
        Ok(())
    }

    /// Set master volume in `[0, 1]` through a short smoothing ramp
    pub fn set_volume(&mut self, volume: f32) {
        let target = if volume.is_nan() {
            self.volume
        } else {
            volume.clamp(0.0, 1.0)
        };
        let tuning = &self.config.tuning;
        let at = self.backend.current_time() + tuning.lookahead;
        let ramp_end = at + tuning.volume_ramp;

        let master = self.backend.master_gain();
        let held = self.backend.cancel_and_hold(master, at);
        if tuning.volume_ramp > 0.0 {
            self.backend.schedule(
                master,
                AutomationEvent::LinearRamp {
                    value: target,
                    time: ramp_end,
                },
            );
        } else {
            self.backend
                .schedule(master, AutomationEvent::SetValue { value: target, time: at });
        }

        debug!(from = held, to = target, at, "volume");
        self.volume = target;
    }

    /// Periodic update, typically once per display refresh
    ///
    /// Applies finished loads and completion notifications, then republishes
    /// the position if playing. Returns the current position.
    pub fn tick(&mut self) -> f64 {
        self.pump();
        if self.transport.is_playing {
            let now = self.backend.current_time();
            self.current_time = transport::position(self.transport, now, self.duration);
        }
        self.current_time
    }

    /// Block until every track has resolved or `timeout` elapses
    ///
    /// For hosts without a tick loop; returns whether the library is ready.
    pub fn wait_for_library(&mut self, timeout: Duration) -> bool {
        let outcomes = self.store.wait_for_library(timeout);
        self.apply_load_outcomes(outcomes);
        self.store.is_library_ready()
    }

    /// Fade out and retire every session, leaving the transport paused
    pub fn shutdown(&mut self) {
        let at = self.backend.current_time() + self.tuning().lookahead;
        if self.transport.is_playing {
            self.transport = transport::freeze(self.transport, at, self.duration);
            self.current_time = self.transport.offset_seconds;
        }
        self.current_session = None;
        let retired = self
            .scheduler
            .retire_all(&mut self.backend, at, self.config.tuning.pause_fade_out);
        info!(retired, "playback engine shut down");
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    fn play(&mut self) -> Result<()> {
        let track_id = self.active_track.clone();

        let buffer = match self.store.readiness(&track_id) {
            Some(Readiness::Ready) => self.store.buffer(&track_id),
            Some(Readiness::Errored) => {
                let reason = self
                    .store
                    .failure(&track_id)
                    .map(|f| f.message.clone())
                    .unwrap_or_default();
                self.error = Some(EngineError::load(&track_id, reason.clone()));
                return Err(CambioError::LoadFailed { track_id, reason });
            }
            _ => None,
        };
        let Some(buffer) = buffer else {
            self.error = Some(EngineError::playback(&track_id, "track is still loading"));
            return Err(CambioError::TrackNotReady { track_id });
        };

        if let Err(e) = self.backend.resume() {
            warn!(track = %track_id, error = %e, "output refused to start");
            self.error = Some(EngineError::playback(&track_id, e.to_string()));
            return Err(e);
        }

        let tuning = self.config.tuning.clone();
        let at = self.backend.current_time() + tuning.lookahead;
        let mut offset = self.transport.offset_seconds;
        if offset >= self.duration - tuning.switch_padding {
            offset = 0.0;
        }

        let paused = transport::jump(self.transport, offset, at, self.duration);
        self.transport = transport::resume(paused, at);
        self.current_time = offset;

        self.scheduler
            .retire_all(&mut self.backend, at, tuning.play_fade_in);
        let id = self.scheduler.start(
            &mut self.backend,
            &track_id,
            buffer,
            offset,
            at,
            tuning.play_fade_in,
        );
        self.current_session = Some(id);
        self.clear_error_for(&track_id);

        debug!(track = %track_id, offset, at, %id, "play");
        Ok(())
    }

    fn pause(&mut self) {
        let at = self.backend.current_time() + self.tuning().lookahead;
        self.transport = transport::freeze(self.transport, at, self.duration);
        self.current_time = self.transport.offset_seconds;
        self.current_session = None;
        self.scheduler
            .retire_all(&mut self.backend, at, self.config.tuning.pause_fade_out);
        debug!(position = self.current_time, at, "pause");
    }

    /// Retire everything audible at `at` and start the active track there
    fn crossfade_to_active(&mut self, at: f64, offset: f64) {
        let crossfade = self.config.tuning.crossfade;
        self.scheduler.retire_all(&mut self.backend, at, crossfade);
        self.current_session = None;

        if let Some(buffer) = self.store.buffer(&self.active_track) {
            let id = self.scheduler.start(
                &mut self.backend,
                &self.active_track,
                buffer,
                offset,
                at,
                crossfade,
            );
            self.current_session = Some(id);
        }
    }

    /// Drain loader results and render-path notifications
    fn pump(&mut self) {
        let outcomes = self.store.poll();
        self.apply_load_outcomes(outcomes);

        for ended in self.backend.drain_ended() {
            let Some(id) =
                self.scheduler
                    .on_source_ended(&mut self.backend, ended.source, ended.reason)
            else {
                continue;
            };
            if self.current_session != Some(id) {
                trace!(%id, "stale completion ignored");
                continue;
            }

            self.current_session = None;
            self.transport = TransportState {
                offset_seconds: self.duration,
                anchor_time: ended.time,
                is_playing: false,
            };
            self.current_time = self.duration;
            info!(track = %self.active_track, duration = self.duration, "reached end of track");
        }
    }

    fn apply_load_outcomes(&mut self, outcomes: Vec<LoadOutcome>) {
        for outcome in outcomes {
            if outcome.track_id != self.active_track {
                continue;
            }
            match outcome.result {
                Ok(buffer) => {
                    self.duration = buffer.duration_secs();
                    self.transport.offset_seconds =
                        clamp_position(self.transport.offset_seconds, self.duration);
                    if !self.transport.is_playing {
                        self.current_time = self.transport.offset_seconds;
                    }
                    if matches!(&self.error, Some(e) if e.track_id == outcome.track_id) {
                        self.error = None;
                    }

                    if self.transport.is_playing && self.current_session.is_none() {
                        let tuning = self.config.tuning.clone();
                        let at = self.backend.current_time() + tuning.lookahead;
                        let offset = transport::position(self.transport, at, self.duration);
                        let id = self.scheduler.start(
                            &mut self.backend,
                            &outcome.track_id,
                            buffer,
                            offset,
                            at,
                            tuning.play_fade_in,
                        );
                        self.current_session = Some(id);
                        debug!(track = %outcome.track_id, offset, "late buffer, session started");
                    }
                }
                Err(failure) => {
                    warn!(track = %outcome.track_id, error = %failure.message, "active track failed to load");
                    self.error = Some(EngineError::load(&outcome.track_id, failure.message));
                    if self.transport.is_playing {
                        let now = self.backend.current_time();
                        self.transport = transport::freeze(self.transport, now, self.duration);
                        self.current_time = self.transport.offset_seconds;
                        self.current_session = None;
                    }
                }
            }
        }
    }

    fn load_error_for(&self, track_id: &str) -> Option<EngineError> {
        self.store
            .failure(track_id)
            .map(|failure| EngineError::load(track_id, failure.message.clone()))
    }

    fn clear_error_for(&mut self, track_id: &str) {
        if matches!(&self.error, Some(e) if e.track_id == track_id) {
            self.error = None;
        }
    }

    // ========================================================================
    // Read-only state
    // ========================================================================

    pub fn state(&self) -> PlayerState {
        PlayerState {
            active_track_id: self.active_track.clone(),
            status: self.status(),
            is_playing: self.transport.is_playing,
            current_time_seconds: self.current_time,
            duration_seconds: self.duration,
            volume: self.volume,
            is_library_ready: self.store.is_library_ready(),
            ready_count: self.store.resolved_count(),
            total_count: self.store.total_count(),
            error: self.error.clone(),
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        if self.transport.is_playing {
            PlaybackStatus::Playing
        } else if !self.store.is_library_ready() {
            PlaybackStatus::Loading
        } else {
            PlaybackStatus::Ready
        }
    }

    pub fn active_track_id(&self) -> &str {
        &self.active_track
    }

    pub fn is_playing(&self) -> bool {
        self.transport.is_playing
    }

    /// Last published position in seconds
    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Position as a fraction of the track, for progress displays
    pub fn progress(&self) -> f64 {
        if self.duration > 0.0 {
            (self.current_time / self.duration).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn error(&self) -> Option<&EngineError> {
        self.error.as_ref()
    }

    pub fn error_kind(&self) -> Option<EngineErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    pub fn is_library_ready(&self) -> bool {
        self.store.is_library_ready()
    }

    pub fn tracks(&self) -> &[TrackDescriptor] {
        &self.config.tracks
    }

    pub fn track_readiness(&self, track_id: &str) -> Option<Readiness> {
        self.store.readiness(track_id)
    }

    pub fn tuning(&self) -> &EngineTuning {
        &self.config.tuning
    }

    pub fn transport(&self) -> TransportState {
        self.transport
    }

    pub fn current_session(&self) -> Option<SessionId> {
        self.current_session
    }

    /// Sessions scheduled, sounding or fading out
    pub fn active_session_count(&self) -> usize {
        self.scheduler.active_count()
    }

    /// Total sessions created since the engine started
    pub fn sessions_created(&self) -> u64 {
        self.scheduler.created_count()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}
