//! Playback sessions
//!
//! A session is one scheduled instance of a buffer rendered through its own
//! gain envelope. Sessions are never reused: a seek or switch creates a new
//! one and retires the old.

use std::fmt;
use std::sync::Arc;

use crate::engine::buffer::DecodedBuffer;
use crate::engine::graph::{GainId, SourceId};

/// Monotonically increasing session identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub(crate) u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// A buffer bound to a gain envelope with a scheduled start and optional stop
#[derive(Debug, Clone)]
pub struct PlaybackSession {
    pub(crate) id: SessionId,
    pub(crate) track_id: String,
    pub(crate) buffer: Arc<DecodedBuffer>,
    pub(crate) gain: GainId,
    pub(crate) source: SourceId,
    pub(crate) scheduled_start: f64,
    pub(crate) start_offset: f64,
    pub(crate) scheduled_stop: Option<f64>,
}

impl PlaybackSession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    pub fn buffer(&self) -> &Arc<DecodedBuffer> {
        &self.buffer
    }

    pub fn gain(&self) -> GainId {
        self.gain
    }

    pub fn source(&self) -> SourceId {
        self.source
    }

    /// Hardware time at which the session becomes audible
    pub fn scheduled_start(&self) -> f64 {
        self.scheduled_start
    }

    /// Position in the buffer, in seconds, at `scheduled_start`
    pub fn start_offset(&self) -> f64 {
        self.start_offset
    }

    /// Hardware time of the hard stop, once one is scheduled
    pub fn scheduled_stop(&self) -> Option<f64> {
        self.scheduled_stop
    }

    /// Whether the session is already silent by `at`
    pub fn is_silent_by(&self, at: f64) -> bool {
        matches!(self.scheduled_stop, Some(stop) if stop <= at)
    }
}
