//! Engine configuration
//!
//! The track list and timing constants consumed by [`crate::PlaybackEngine`].
//! Everything here is plain data with serde support so a host can ship the
//! variant list as JSON next to its audio assets.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CambioError, Result};

// ============================================================================
// Track Descriptor
// ============================================================================

/// One mastered variant of the piece being compared
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackDescriptor {
    /// Stable identity, used by `switch_track`
    pub id: String,
    /// Human-readable name ("Original", "Warm", ...)
    pub label: String,
    /// Reference handed to the [`crate::engine::AssetSource`]
    pub file: String,
    /// Optional short tag shown next to the label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
}

impl TrackDescriptor {
    pub fn new(id: impl Into<String>, label: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            file: file.into(),
            badge: None,
        }
    }

    pub fn with_badge(mut self, badge: impl Into<String>) -> Self {
        self.badge = Some(badge.into());
        self
    }
}

// ============================================================================
// Position Mapping
// ============================================================================

/// How the transport position carries over when switching between variants
/// whose durations differ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionMapping {
    /// Keep the position verbatim, clamped to the next variant's length
    #[default]
    Clamp,
    /// Keep the same fraction of the piece
    Proportional,
}

impl PositionMapping {
    /// Map `position` from a variant of `from_duration` onto one of `to_duration`
    pub fn map(&self, position: f64, from_duration: f64, to_duration: f64) -> f64 {
        let mapped = match self {
            PositionMapping::Clamp => position,
            PositionMapping::Proportional => {
                if from_duration > 0.0 {
                    position / from_duration * to_duration
                } else {
                    position
                }
            }
        };
        mapped.clamp(0.0, to_duration.max(0.0))
    }
}

// ============================================================================
// Tuning
// ============================================================================

/// Timing constants, all in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineTuning {
    /// Delay added to "now" for every scheduled start and automation anchor
    pub lookahead: f64,
    /// Overlap window of a switch or seek
    pub crossfade: f64,
    /// Fade-in when starting from pause
    pub play_fade_in: f64,
    /// Fade-out when pausing
    pub pause_fade_out: f64,
    /// Extra time after a fade-out before the source is hard-stopped
    pub stop_margin: f64,
    /// Keeps a start request from landing exactly on end-of-buffer
    pub switch_padding: f64,
    /// Smoothing ramp for master volume changes
    pub volume_ramp: f64,
    pub position_mapping: PositionMapping,
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self {
            lookahead: 0.03,
            crossfade: 0.04,
            play_fade_in: 0.02,
            pause_fade_out: 0.03,
            stop_margin: 0.01,
            switch_padding: 0.05,
            volume_ramp: 0.05,
            position_mapping: PositionMapping::Clamp,
        }
    }
}

impl EngineTuning {
    fn validate(&self) -> Result<()> {
        let fields = [
            ("lookahead", self.lookahead),
            ("crossfade", self.crossfade),
            ("play_fade_in", self.play_fade_in),
            ("pause_fade_out", self.pause_fade_out),
            ("stop_margin", self.stop_margin),
            ("switch_padding", self.switch_padding),
            ("volume_ramp", self.volume_ramp),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(CambioError::InvalidConfig {
                    reason: format!("tuning.{} must be a non-negative number, got {}", name, value),
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// Engine Config
// ============================================================================

fn default_volume() -> f32 {
    1.0
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Ordered variant list; the first entry is active unless `initial_track` says otherwise
    pub tracks: Vec<TrackDescriptor>,
    #[serde(default)]
    pub initial_track: Option<String>,
    #[serde(default = "default_volume")]
    pub volume: f32,
    #[serde(default)]
    pub tuning: EngineTuning,
}

impl EngineConfig {
    pub fn new(tracks: Vec<TrackDescriptor>) -> Self {
        Self {
            tracks,
            initial_track: None,
            volume: default_volume(),
            tuning: EngineTuning::default(),
        }
    }

    pub fn with_tuning(mut self, tuning: EngineTuning) -> Self {
        self.tuning = tuning;
        self
    }

    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file
    pub fn from_path(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check the structural requirements: at least one track, unique ids,
    /// non-empty file references, a known initial track and sane tuning.
    pub fn validate(&self) -> Result<()> {
        if self.tracks.is_empty() {
            return Err(CambioError::InvalidConfig {
                reason: "at least one track is required".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for track in &self.tracks {
            if track.id.is_empty() {
                return Err(CambioError::InvalidConfig {
                    reason: "track ids must not be empty".to_string(),
                });
            }
            if track.file.is_empty() {
                return Err(CambioError::InvalidConfig {
                    reason: format!("track '{}' has no file reference", track.id),
                });
            }
            if !seen.insert(track.id.as_str()) {
                return Err(CambioError::DuplicateTrackId {
                    id: track.id.clone(),
                });
            }
        }

        if let Some(initial) = &self.initial_track {
            if !seen.contains(initial.as_str()) {
                return Err(CambioError::InvalidConfig {
                    reason: format!("initial_track '{}' is not in the track list", initial),
                });
            }
        }

        if !self.volume.is_finite() {
            return Err(CambioError::InvalidConfig {
                reason: "volume must be a finite number".to_string(),
            });
        }

        self.tuning.validate()
    }

    /// Id of the track that is active when the engine starts
    pub fn initial_track_id(&self) -> &str {
        self.initial_track
            .as_deref()
            .unwrap_or_else(|| self.tracks[0].id.as_str())
    }

    pub fn track(&self, id: &str) -> Option<&TrackDescriptor> {
        self.tracks.iter().find(|t| t.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn four_variants() -> Vec<TrackDescriptor> {
        vec![
            TrackDescriptor::new("original", "Original", "original.wav"),
            TrackDescriptor::new("master-1", "Warm", "warm.wav").with_badge("W"),
            TrackDescriptor::new("master-2", "Balanced", "balanced.wav"),
            TrackDescriptor::new("master-3", "Open", "open.wav"),
        ]
    }

    #[test]
    fn test_valid_config() {
        let config = EngineConfig::new(four_variants());
        assert!(config.validate().is_ok());
        assert_eq!(config.initial_track_id(), "original");
    }

    #[test]
    fn test_empty_track_list_rejected() {
        let config = EngineConfig::new(Vec::new());
        assert!(matches!(
            config.validate(),
            Err(CambioError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut tracks = four_variants();
        tracks[2].id = "master-1".to_string();
        let err = EngineConfig::new(tracks).validate().unwrap_err();
        assert_eq!(err.error_code(), "DUPLICATE_TRACK_ID");
    }

    #[test]
    fn test_unknown_initial_track_rejected() {
        let mut config = EngineConfig::new(four_variants());
        config.initial_track = Some("remaster".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_tuning_rejected() {
        let tuning = EngineTuning {
            crossfade: -0.01,
            ..EngineTuning::default()
        };
        let config = EngineConfig::new(four_variants()).with_tuning(tuning);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_json_applies_defaults() {
        let json = r#"{
            "tracks": [
                { "id": "original", "label": "Original", "file": "a.wav" },
                { "id": "warm", "label": "Warm", "file": "b.wav", "badge": "new" }
            ],
            "tuning": { "crossfade": 0.08 }
        }"#;
        let config = EngineConfig::from_json_str(json).unwrap();
        assert_eq!(config.volume, 1.0);
        assert_eq!(config.tuning.crossfade, 0.08);
        assert_eq!(config.tuning.lookahead, EngineTuning::default().lookahead);
        assert_eq!(config.tracks[1].badge.as_deref(), Some("new"));
    }

    #[test]
    fn test_position_mapping() {
        assert_eq!(PositionMapping::Clamp.map(10.0, 180.0, 180.0), 10.0);
        assert_eq!(PositionMapping::Clamp.map(170.0, 180.0, 160.0), 160.0);
        assert_eq!(PositionMapping::Proportional.map(90.0, 180.0, 120.0), 60.0);
        assert_eq!(PositionMapping::Proportional.map(5.0, 0.0, 120.0), 5.0);
    }
}
