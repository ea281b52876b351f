//! Transport clock
//!
//! Converts "offset at a known hardware-clock anchor, playing or paused" into
//! the current playback position and back. Everything here is a pure
//! function of its arguments: the caller reads the hardware clock once per
//! operation and passes it in, so no function can observe a stale or
//! negative elapsed time.

use std::fmt;

/// Where the transport is, as of its last state change
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TransportState {
    /// Position in seconds at `anchor_time` (or the frozen position when paused)
    pub offset_seconds: f64,
    /// Hardware time at which `offset_seconds` was (or will be) current
    pub anchor_time: f64,
    pub is_playing: bool,
}

impl TransportState {
    /// A paused transport at `offset_seconds`
    pub fn paused_at(offset_seconds: f64) -> Self {
        Self {
            offset_seconds,
            anchor_time: 0.0,
            is_playing: false,
        }
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_playing {
            write!(
                f,
                "Playing from {:.3}s (anchored at {:.3}s)",
                self.offset_seconds, self.anchor_time
            )
        } else {
            write!(f, "Paused at {:.3}s", self.offset_seconds)
        }
    }
}

/// Clamp a position to `[0, duration]`; NaN maps to 0
#[inline]
pub fn clamp_position(position: f64, duration: f64) -> f64 {
    if position.is_nan() {
        return 0.0;
    }
    position.clamp(0.0, duration.max(0.0))
}

/// Current playback position
///
/// Time before the anchor (a start still inside its lookahead) counts as
/// zero elapsed.
///
/// # Example
/// ```
/// use cambio::engine::transport::{position, resume, TransportState};
///
/// let playing = resume(TransportState::paused_at(10.0), 2.0);
/// assert_eq!(position(playing, 1.5, 180.0), 10.0);
/// assert_eq!(position(playing, 4.0, 180.0), 12.0);
/// ```
pub fn position(state: TransportState, now: f64, duration: f64) -> f64 {
    let elapsed = if state.is_playing {
        (now - state.anchor_time).max(0.0)
    } else {
        0.0
    };
    clamp_position(state.offset_seconds + elapsed, duration)
}

/// Paused state holding the position reached at `now`
pub fn freeze(state: TransportState, now: f64, duration: f64) -> TransportState {
    TransportState {
        offset_seconds: position(state, now, duration),
        anchor_time: now,
        is_playing: false,
    }
}

/// Playing state anchored at `anchor` with the same offset
pub fn resume(state: TransportState, anchor: f64) -> TransportState {
    TransportState {
        offset_seconds: state.offset_seconds,
        anchor_time: anchor,
        is_playing: true,
    }
}

/// Move to `new_offset` (clamped), re-anchoring at `anchor` if playing
pub fn jump(state: TransportState, new_offset: f64, anchor: f64, duration: f64) -> TransportState {
    TransportState {
        offset_seconds: clamp_position(new_offset, duration),
        anchor_time: if state.is_playing {
            anchor
        } else {
            state.anchor_time
        },
        is_playing: state.is_playing,
    }
}
