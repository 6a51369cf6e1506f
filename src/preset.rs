//! Instrument preset format.
//!
//! A preset (`preset.json`) describes one wavetable instrument: a sampler
//! node made of key-range zones, each pointing at its audio data.

use serde::{Deserialize, Serialize};

/// Top-level preset descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresetDescriptor {
    /// Unique identifier (e.g., "fluidr3-gm-xylophone").
    pub id: String,
    /// Human-readable name, also usable as a note's `instrument`.
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub graph: PresetNode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PresetNode {
    Sampler { config: SamplerConfig },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerConfig {
    pub zones: Vec<SampleZone>,
    #[serde(default, rename = "isDrumKit")]
    pub is_drum_kit: bool,
    /// Optional ADSR envelope override for all zones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envelope: Option<ADSRConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleZone {
    #[serde(rename = "keyRange")]
    pub key_range: KeyRange,
    pub pitch: ZonePitch,
    /// Native sample rate of the audio.
    #[serde(rename = "sampleRate")]
    pub sample_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#loop: Option<LoopPoints>,
    pub audio: AudioReference,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRange {
    pub low: u8,
    pub high: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZonePitch {
    /// The MIDI note the sample was recorded at (0-127).
    #[serde(rename = "rootNote")]
    pub root_note: u8,
    #[serde(default, rename = "fineTuneCents")]
    pub fine_tune_cents: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopPoints {
    pub start: u64,
    pub end: u64,
}

/// Where a zone's audio lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AudioReference {
    /// Raw PCM, base64 encoded.
    InlinePcm {
        data: String,
        #[serde(rename = "bitsPerSample")]
        bits_per_sample: u8,
    },
    /// Compressed audio file, base64 encoded.
    InlineFile { data: String, codec: AudioCodec },
    /// External URL, relative to the preset's location.
    External {
        url: String,
        codec: AudioCodec,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sha256: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Wav,
    Mp3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ADSRConfig {
    /// Attack time in seconds.
    pub attack: f64,
    /// Decay time in seconds.
    pub decay: f64,
    /// Sustain level [0.0, 1.0].
    pub sustain: f64,
    /// Release time in seconds.
    pub release: f64,
}

impl PresetDescriptor {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn sampler(&self) -> &SamplerConfig {
        match &self.graph {
            PresetNode::Sampler { config } => config,
        }
    }
}

/// Playback rate for a sample recorded at `root_note` to sound at `target_midi_note`.
///
/// 1.0 = original speed, 2.0 = one octave up. `tuning_pitch` is the A4
/// frequency (440.0 standard).
pub fn sample_playback_rate(
    target_midi_note: u8,
    root_note: u8,
    fine_tune_cents: f64,
    tuning_pitch: f64,
) -> f64 {
    let semitone_diff = target_midi_note as f64 - root_note as f64 - fine_tune_cents / 100.0;
    let base_rate = (2.0_f64).powf(semitone_diff / 12.0);
    base_rate * (tuning_pitch / 440.0)
}

/// Resolve `reference` against the location of the document that named it.
pub fn resolve_relative(base: &str, reference: &str) -> String {
    if reference.contains("://") || reference.starts_with('/') {
        return reference.to_string();
    }
    match base.rfind('/') {
        Some(idx) => format!("{}/{}", &base[..idx], reference),
        None => reference.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playback_rate_root_note() {
        let rate = sample_playback_rate(60, 60, 0.0, 440.0);
        assert!((rate - 1.0).abs() < 0.0001, "Root note rate should be 1.0, got {rate}");
    }

    #[test]
    fn playback_rate_octaves() {
        assert!((sample_playback_rate(72, 60, 0.0, 440.0) - 2.0).abs() < 0.0001);
        assert!((sample_playback_rate(48, 60, 0.0, 440.0) - 0.5).abs() < 0.0001);
    }

    #[test]
    fn playback_rate_fine_tune() {
        let rate = sample_playback_rate(60, 60, -6.0, 440.0);
        let expected = (2.0_f64).powf(6.0 / 1200.0);
        assert!((rate - expected).abs() < 0.0001, "expected ~{expected}, got {rate}");
    }

    #[test]
    fn parses_sampler_preset() {
        let json = r#"{
            "id": "fluidr3-gm-marimba",
            "name": "Marimba",
            "tags": ["melodic", "gm:12"],
            "graph": {
                "type": "sampler",
                "config": {
                    "zones": [
                        {
                            "keyRange": {"low": 0, "high": 60},
                            "pitch": {"rootNote": 48, "fineTuneCents": 0.0},
                            "sampleRate": 22050,
                            "loop": {"start": 100, "end": 900},
                            "audio": {"type": "external", "url": "zone_C3.wav", "codec": "wav"}
                        },
                        {
                            "keyRange": {"low": 61, "high": 127},
                            "pitch": {"rootNote": 72},
                            "sampleRate": 22050,
                            "audio": {"type": "inline-pcm", "data": "AAA=", "bitsPerSample": 16}
                        }
                    ]
                }
            }
        }"#;
        let preset = PresetDescriptor::from_json(json).unwrap();
        let sampler = preset.sampler();
        assert_eq!(preset.name, "Marimba");
        assert_eq!(sampler.zones.len(), 2);
        assert!(!sampler.is_drum_kit);
        assert_eq!(sampler.zones[0].r#loop.as_ref().unwrap().end, 900);
        assert!(matches!(
            sampler.zones[0].audio,
            AudioReference::External { codec: AudioCodec::Wav, .. }
        ));
        assert_eq!(sampler.zones[1].pitch.fine_tune_cents, 0.0);
    }

    #[test]
    fn rejects_unknown_node_type() {
        let json = r#"{"id":"x","name":"x","graph":{"type":"oscillator","config":{}}}"#;
        assert!(PresetDescriptor::from_json(json).is_err());
    }

    #[test]
    fn relative_references() {
        assert_eq!(
            resolve_relative("https://cdn.example/presets/marimba/preset.json", "zone_C3.wav"),
            "https://cdn.example/presets/marimba/zone_C3.wav"
        );
        assert_eq!(resolve_relative("preset.json", "a.wav"), "a.wav");
        assert_eq!(resolve_relative("x/preset.json", "https://h/a.wav"), "https://h/a.wav");
    }
}
