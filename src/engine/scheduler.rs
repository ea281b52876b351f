//! Crossfade scheduling
//!
//! Turns "this buffer should be audible from this offset at this instant"
//! into sessions with gain envelopes, and retires superseded sessions so that
//! the summed envelope never dips (gap) and never doubles (two full-volume
//! sources).
//!
//! A switch or seek schedules the incoming start and the outgoing stop at the
//! same future instant with identical window lengths: the incoming gain ramps
//! 0 → 1 while every outgoing gain ramps from its live value to 0.

use std::sync::Arc;

use tracing::debug;

use crate::engine::automation::AutomationEvent;
use crate::engine::buffer::DecodedBuffer;
use crate::engine::graph::{AudioBackend, EndReason, SourceId};
use crate::engine::session::{PlaybackSession, SessionId};

/// Owns every live session from creation until its stop completes
#[derive(Debug)]
pub struct CrossfadeScheduler {
    sessions: Vec<PlaybackSession>,
    next_id: u64,
    switch_padding: f64,
    stop_margin: f64,
}

impl CrossfadeScheduler {
    /// # Arguments
    /// * `switch_padding` - Keeps start offsets this far away from end-of-buffer
    /// * `stop_margin` - Delay between the end of a fade-out and the hard stop
    pub fn new(switch_padding: f64, stop_margin: f64) -> Self {
        Self {
            sessions: Vec::new(),
            next_id: 1,
            switch_padding,
            stop_margin,
        }
    }

    /// Create a session playing `buffer` from `offset` at `at`
    ///
    /// With `fade_in > 0` the gain ramps linearly 0 → 1 over the window
    /// starting at `at`; otherwise it steps to 1 at `at`.
    pub fn start<B: AudioBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        track_id: &str,
        buffer: Arc<DecodedBuffer>,
        offset: f64,
        at: f64,
        fade_in: f64,
    ) -> SessionId {
        let id = SessionId(self.next_id);
        self.next_id += 1;

        let latest = (buffer.duration_secs() - self.switch_padding).max(0.0);
        let offset = offset.clamp(0.0, latest);

        let gain = backend.create_gain(0.0);
        if fade_in > 0.0 {
            backend.schedule(gain, AutomationEvent::SetValue { value: 0.0, time: at });
            backend.schedule(
                gain,
                AutomationEvent::LinearRamp {
                    value: 1.0,
                    time: at + fade_in,
                },
            );
        } else {
            backend.schedule(gain, AutomationEvent::SetValue { value: 1.0, time: at });
        }
        let source = backend.start_source(Arc::clone(&buffer), gain, at, offset);

        debug!(%id, track = track_id, offset, at, fade_in, "session scheduled");

        self.sessions.push(PlaybackSession {
            id,
            track_id: track_id.to_string(),
            buffer,
            gain,
            source,
            scheduled_start: at,
            start_offset: offset,
            scheduled_stop: None,
        });
        id
    }

    /// Fade `id` out from its live gain starting at `at` and stop it after the fade
    ///
    /// Returns `false` if the session is unknown (already finished).
    pub fn stop<B: AudioBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        id: SessionId,
        at: f64,
        fade_out: f64,
    ) -> bool {
        let stop_margin = self.stop_margin;
        let Some(session) = self.sessions.iter_mut().find(|s| s.id == id) else {
            return false;
        };

        let held = backend.cancel_and_hold(session.gain, at);
        let fade_end = at + fade_out.max(0.0);
        if fade_out > 0.0 {
            backend.schedule(
                session.gain,
                AutomationEvent::LinearRamp {
                    value: 0.0,
                    time: fade_end,
                },
            );
        } else {
            backend.schedule(session.gain, AutomationEvent::SetValue { value: 0.0, time: at });
        }

        let stop_at = fade_end + stop_margin;
        backend.stop_source(session.source, stop_at);
        session.scheduled_stop = Some(stop_at);

        debug!(%id, at, fade_out, held, stop_at, "session retiring");
        true
    }

    /// Retire every session still audible at `at`
    ///
    /// Sessions already silent by `at` are left to finish on their own.
    /// Returns how many sessions were (re)scheduled to stop.
    pub fn retire_all<B: AudioBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        at: f64,
        fade_out: f64,
    ) -> usize {
        let ids: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|s| !s.is_silent_by(at))
            .map(|s| s.id)
            .collect();
        for id in &ids {
            self.stop(backend, *id, at, fade_out);
        }
        ids.len()
    }

    /// Handle a completion notification from the render path
    ///
    /// Discards the finished session, releases its gain and returns its id.
    /// Unknown sources yield `None`.
    pub fn on_source_ended<B: AudioBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        source: SourceId,
        reason: EndReason,
    ) -> Option<SessionId> {
        let index = self.sessions.iter().position(|s| s.source == source)?;
        let session = self.sessions.remove(index);
        backend.release_gain(session.gain);
        debug!(id = %session.id, ?reason, "session finished");
        Some(session.id)
    }

    pub fn session(&self, id: SessionId) -> Option<&PlaybackSession> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &PlaybackSession> {
        self.sessions.iter()
    }

    /// Sessions scheduled, sounding, or fading out
    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// Total sessions ever created
    pub fn created_count(&self) -> u64 {
        self.next_id - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::graph::{AudioGraph, GraphRenderer};
    use approx::assert_relative_eq;

    const RATE: u32 = 1000;

    fn dc_buffer(seconds: f64) -> Arc<DecodedBuffer> {
        let frames = (seconds * RATE as f64) as usize;
        Arc::new(DecodedBuffer::from_channels(vec![vec![1.0; frames]], RATE).unwrap())
    }

    fn render(renderer: &mut GraphRenderer, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames];
        renderer.render(&mut out, 1);
        out
    }

    #[test]
    fn test_start_clamps_offset_to_padding() {
        let (mut graph, _renderer) = AudioGraph::new(RATE);
        let mut scheduler = CrossfadeScheduler::new(0.05, 0.01);
        let id = scheduler.start(&mut graph, "original", dc_buffer(2.0), 5.0, 0.1, 0.0);
        let session = scheduler.session(id).unwrap();
        assert_relative_eq!(session.start_offset(), 1.95);
        assert_relative_eq!(session.scheduled_start(), 0.1);
        assert_eq!(session.scheduled_stop(), None);
    }

    #[test]
    fn test_fade_in_envelope() {
        let (mut graph, mut renderer) = AudioGraph::new(RATE);
        let mut scheduler = CrossfadeScheduler::new(0.05, 0.01);
        scheduler.start(&mut graph, "original", dc_buffer(1.0), 0.0, 0.1, 0.1);

        let out = render(&mut renderer, 300);
        assert_eq!(out[99], 0.0);
        assert_relative_eq!(out[150], 0.5, epsilon = 1e-4);
        assert_relative_eq!(out[250], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_crossfade_sums_to_unity() {
        let (mut graph, mut renderer) = AudioGraph::new(RATE);
        let mut scheduler = CrossfadeScheduler::new(0.05, 0.01);
        let first = scheduler.start(&mut graph, "original", dc_buffer(2.0), 0.0, 0.0, 0.0);
        render(&mut renderer, 100);

        let at = graph.current_time() + 0.03;
        assert_eq!(scheduler.retire_all(&mut graph, at, 0.04), 1);
        let second = scheduler.start(&mut graph, "master-1", dc_buffer(2.0), at, at, 0.04);
        assert_eq!(scheduler.active_count(), 2);

        let out = render(&mut renderer, 300);
        for (i, &sample) in out.iter().enumerate() {
            assert!(
                (sample - 1.0).abs() < 1e-3,
                "envelope sum {} at frame {}",
                sample,
                i + 100
            );
        }

        let ended = graph.drain_ended();
        assert_eq!(ended.len(), 1);
        assert_eq!(ended[0].reason, EndReason::Stopped);
        assert_eq!(
            scheduler.on_source_ended(&mut graph, ended[0].source, ended[0].reason),
            Some(first)
        );
        assert_eq!(scheduler.sessions().next().map(|s| s.id()), Some(second));
    }

    #[test]
    fn test_stop_ramps_from_live_value() {
        let (mut graph, mut renderer) = AudioGraph::new(RATE);
        let mut scheduler = CrossfadeScheduler::new(0.05, 0.01);
        let id = scheduler.start(&mut graph, "original", dc_buffer(2.0), 0.0, 0.0, 0.2);
        render(&mut renderer, 50);

        // Interrupt the fade-in halfway through
        assert!(scheduler.stop(&mut graph, id, 0.1, 0.1));
        let out = render(&mut renderer, 250);
        assert_relative_eq!(out[99 - 50], 0.495, epsilon = 1e-3);
        assert_relative_eq!(out[100 - 50], 0.5, epsilon = 1e-3);
        assert_relative_eq!(out[150 - 50], 0.25, epsilon = 1e-3);
        assert_eq!(out[200 - 50], 0.0);

        let ended = graph.drain_ended();
        assert_eq!(ended.len(), 1);
        assert_eq!(
            scheduler.on_source_ended(&mut graph, ended[0].source, ended[0].reason),
            Some(id)
        );
        assert_eq!(scheduler.active_count(), 0);
    }

    #[test]
    fn test_unknown_source_is_ignored() {
        let (mut graph, mut renderer) = AudioGraph::new(RATE);
        let mut scheduler = CrossfadeScheduler::new(0.05, 0.01);
        let id = scheduler.start(&mut graph, "original", dc_buffer(0.1), 0.0, 0.0, 0.0);
        render(&mut renderer, 200);
        let ended = graph.drain_ended();
        assert_eq!(ended[0].reason, EndReason::Exhausted);
        assert_eq!(
            scheduler.on_source_ended(&mut graph, ended[0].source, ended[0].reason),
            Some(id)
        );
        assert_eq!(
            scheduler.on_source_ended(&mut graph, ended[0].source, ended[0].reason),
            None
        );
        assert_eq!(scheduler.created_count(), 1);
    }
}
