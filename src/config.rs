//! Engine configuration. Every value here is fixed at construction.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::dsp::graph::GraphConfig;
use crate::error::EngineError;

/// One instrument track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackConfig {
    pub id: u32,
    /// MIDI octave of tone 0; the absolute pitch is `12 * octave_base + tone`.
    pub octave_base: i32,
    pub gain: f64,
    /// Location of the track's preset JSON.
    pub preset: Option<String>,
}

impl Default for TrackConfig {
    fn default() -> Self {
        TrackConfig {
            id: 0,
            octave_base: 5,
            gain: 1.0,
            preset: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub sample_rate: u32,
    /// Beats per measure.
    pub beats: usize,
    pub bpm: f64,
    /// A4 reference frequency.
    pub tuning_pitch: f64,
    pub tracks: Vec<TrackConfig>,
    pub graph: GraphConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            sample_rate: 44100,
            beats: 8,
            bpm: 120.0,
            tuning_pitch: 440.0,
            tracks: vec![
                TrackConfig {
                    id: 0,
                    octave_base: 6,
                    gain: 0.5,
                    preset: Some("presets/xylophone/preset.json".to_string()),
                },
                TrackConfig {
                    id: 1,
                    octave_base: 4,
                    gain: 0.3,
                    preset: Some("presets/marimba/preset.json".to_string()),
                },
            ],
            graph: GraphConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate. Omitted fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Seconds per beat.
    pub fn tick_seconds(&self) -> f64 {
        60.0 / self.bpm
    }

    pub fn track(&self, id: u32) -> Option<&TrackConfig> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |msg: String| Err(EngineError::InvalidConfig(msg));

        if self.sample_rate == 0 {
            return invalid("sampleRate must be positive".into());
        }
        if self.beats == 0 {
            return invalid("beats must be at least 1".into());
        }
        if !(self.bpm.is_finite() && self.bpm > 0.0) {
            return invalid(format!("bpm must be positive, got {}", self.bpm));
        }
        if !(self.tuning_pitch.is_finite() && self.tuning_pitch > 0.0) {
            return invalid(format!("tuningPitch must be positive, got {}", self.tuning_pitch));
        }

        let mut seen = HashSet::new();
        for track in &self.tracks {
            if !seen.insert(track.id) {
                return invalid(format!("duplicate track id {}", track.id));
            }
            if !(track.gain.is_finite() && track.gain >= 0.0) {
                return invalid(format!("track {} gain must be non-negative", track.id));
            }
        }

        let nyquist = self.sample_rate as f64 / 2.0;
        for (name, hz) in [("lowpassHz", self.graph.lowpass_hz), ("highpassHz", self.graph.highpass_hz)] {
            if !(hz > 0.0 && hz < nyquist) {
                return invalid(format!("{name} {hz} outside (0, {nyquist})"));
            }
        }
        if !(0.0..=1.0).contains(&self.graph.reverb_mix) {
            return invalid(format!("reverbMix {} outside [0, 1]", self.graph.reverb_mix));
        }
        if self.graph.max_voices == 0 {
            return invalid("maxVoices must be at least 1".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejects(config: EngineConfig, needle: &str) {
        match config.validate() {
            Err(EngineError::InvalidConfig(msg)) => assert!(msg.contains(needle), "{msg}"),
            other => panic!("expected InvalidConfig containing {needle:?}, got {other:?}"),
        }
    }

    #[test]
    fn default_matches_two_track_setup() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.tick_seconds(), 0.5);
        assert_eq!(config.track(0).map(|t| (t.octave_base, t.gain)), Some((6, 0.5)));
        assert_eq!(config.track(1).map(|t| (t.octave_base, t.gain)), Some((4, 0.3)));
        assert_eq!(config.graph.lowpass_hz, 8000.0);
        assert_eq!(config.graph.highpass_hz, 50.0);
        assert_eq!(config.graph.compressor.ratio, 12.0);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(
            r#"{"sampleRate": 48000, "bpm": 90, "graph": {"lowpassHz": 6000}}"#,
        )
        .unwrap();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.bpm, 90.0);
        assert_eq!(config.beats, 8);
        assert_eq!(config.graph.lowpass_hz, 6000.0);
        assert_eq!(config.graph.highpass_hz, 50.0);
        assert_eq!(config.tracks.len(), 2);
    }

    #[test]
    fn track_json_is_camel_case() {
        let config = EngineConfig::from_json(
            r#"{"tracks": [{"id": 3, "octaveBase": 2, "gain": 0.7, "preset": "kick.json"}]}"#,
        )
        .unwrap();
        assert_eq!(
            config.tracks,
            vec![TrackConfig {
                id: 3,
                octave_base: 2,
                gain: 0.7,
                preset: Some("kick.json".into()),
            }]
        );
    }

    #[test]
    fn rejects_bad_values() {
        rejects(EngineConfig { beats: 0, ..Default::default() }, "beats");
        rejects(EngineConfig { bpm: 0.0, ..Default::default() }, "bpm");
        rejects(EngineConfig { bpm: f64::NAN, ..Default::default() }, "bpm");
        rejects(EngineConfig { sample_rate: 0, ..Default::default() }, "sampleRate");

        let mut dup = EngineConfig::default();
        dup.tracks[1].id = 0;
        rejects(dup, "duplicate");

        let mut cutoff = EngineConfig::default();
        cutoff.graph.lowpass_hz = 30_000.0;
        rejects(cutoff, "lowpassHz");
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(EngineConfig::from_json("{"), Err(EngineError::ConfigParse(_))));
    }
}
