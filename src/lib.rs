//! Cambio - Gapless A/B Variant Switching
//!
//! Cambio plays several mastered variants of the same audio on one shared
//! timeline. Switching variants keeps the position, never leaves a gap and
//! never clicks.
//!
//! # Architecture
//!
//! The engine is split into a control side and a render side:
//! - Control: [`PlaybackEngine`] owns the transport, the buffer store and the
//!   crossfade scheduler, and schedules gain automation ahead of the clock.
//! - Render: [`engine::GraphRenderer`] mixes scheduled voices into output
//!   blocks and advances the hardware clock. It is driven by an output device
//!   (see the `cpal` feature) or by the host.

pub mod config;
pub mod engine;
pub mod error;
#[cfg(feature = "cpal")]
pub mod output;

pub use config::{EngineConfig, EngineTuning, PositionMapping, TrackDescriptor};
pub use engine::{PlaybackEngine, PlaybackStatus, PlayerState};
pub use error::{CambioError, EngineError, EngineErrorKind, Result};
