//! Error handling for Cambio
//!
//! Two layers of errors live here:
//! - [`CambioError`]: the crate error returned from fallible calls.
//! - [`EngineError`]: the transient, per-track record published in the
//!   engine's read-only state so a presentation layer can show it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for Cambio operations
pub type Result<T> = std::result::Result<T, CambioError>;

/// Main error type for Cambio operations
#[derive(Error, Debug)]
pub enum CambioError {
    // Configuration Errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Duplicate track id: {id}")]
    DuplicateTrackId { id: String },

    #[error("Unknown track: {id}")]
    UnknownTrack { id: String },

    // Asset Errors
    #[error("Asset not found: {reference}")]
    AssetNotFound {
        reference: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Invalid audio data: {reason}")]
    InvalidAudio {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Unsupported audio format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Audio contains no samples")]
    EmptyAudio,

    // Load / Playback Errors
    #[error("Track '{track_id}' failed to load: {reason}")]
    LoadFailed { track_id: String, reason: String },

    #[error("Track '{track_id}' is not ready for playback")]
    TrackNotReady { track_id: String },

    #[error("Audio output refused to start: {reason}")]
    PlaybackRefused { reason: String },

    #[error("Audio output device error: {reason}")]
    OutputDevice { reason: String },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CambioError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            CambioError::InvalidConfig { .. } => "INVALID_CONFIG",
            CambioError::DuplicateTrackId { .. } => "DUPLICATE_TRACK_ID",
            CambioError::UnknownTrack { .. } => "UNKNOWN_TRACK",
            CambioError::AssetNotFound { .. } => "ASSET_NOT_FOUND",
            CambioError::InvalidAudio { .. } => "INVALID_AUDIO",
            CambioError::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            CambioError::EmptyAudio => "EMPTY_AUDIO",
            CambioError::LoadFailed { .. } => "LOAD_FAILED",
            CambioError::TrackNotReady { .. } => "TRACK_NOT_READY",
            CambioError::PlaybackRefused { .. } => "PLAYBACK_REFUSED",
            CambioError::OutputDevice { .. } => "OUTPUT_DEVICE",
            CambioError::Io(_) => "IO_ERROR",
            CambioError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if this error leaves the engine usable
    ///
    /// Configuration errors are the only ones that prevent an engine from
    /// being built at all; everything else is recovered to a paused state.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            CambioError::InvalidConfig { .. } | CambioError::DuplicateTrackId { .. }
        )
    }
}

/// Category of a published engine error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineErrorKind {
    /// Fetch or decode of the track failed
    Load,
    /// The track could not be started (not ready, or output refused)
    Playback,
}

/// Transient error record exposed through the engine's read-only state
///
/// Replaced or cleared by the next successful operation on `track_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineError {
    pub kind: EngineErrorKind,
    pub track_id: String,
    pub message: String,
}

impl EngineError {
    pub fn load(track_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: EngineErrorKind::Load,
            track_id: track_id.into(),
            message: message.into(),
        }
    }

    pub fn playback(track_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: EngineErrorKind::Playback,
            track_id: track_id.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = CambioError::UnknownTrack {
            id: "master-9".to_string(),
        };
        assert_eq!(err.error_code(), "UNKNOWN_TRACK");
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_config_errors_are_not_recoverable() {
        let err = CambioError::DuplicateTrackId {
            id: "original".to_string(),
        };
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_engine_error_serializes_kind_in_snake_case() {
        let err = EngineError::load("warm", "decode failed");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "load");
        assert_eq!(json["track_id"], "warm");
    }
}
