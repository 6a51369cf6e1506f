//! Wavetable playback.
//!
//! Plays decoded instrument samples with pitch-shifting via linear
//! interpolation resampling. Supports multi-zone key splits, loop points,
//! and a gate after which the voice releases on its own.

use std::sync::Arc;

use crate::preset::{sample_playback_rate, ADSRConfig, SampleZone};

/// A mono sample buffer shared by every voice playing it.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    data: Arc<[f32]>,
    pub sample_rate: u32,
}

impl SampleBuffer {
    pub fn new(data: Vec<f32>, sample_rate: u32) -> Self {
        SampleBuffer {
            data: data.into(),
            sample_rate,
        }
    }

    /// Create from 16-bit signed PCM data.
    pub fn from_i16(pcm: &[i16], sample_rate: u32) -> Self {
        Self::new(pcm.iter().map(|&s| s as f32 / 32768.0).collect(), sample_rate)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn samples(&self) -> &[f32] {
        &self.data
    }

    /// Read a sample with linear interpolation at a fractional position.
    pub fn read_interpolated(&self, position: f64) -> f64 {
        if self.data.is_empty() || position < 0.0 {
            return 0.0;
        }

        let idx = position as usize;
        if idx >= self.data.len() - 1 {
            return self.data.get(idx).map_or(0.0, |&s| s as f64);
        }

        let frac = position - idx as f64;
        self.data[idx] as f64 * (1.0 - frac) + self.data[idx + 1] as f64 * frac
    }
}

/// A zone's key range, tuning and decoded audio.
#[derive(Debug, Clone)]
pub struct LoadedZone {
    pub key_range_low: u8,
    pub key_range_high: u8,
    pub root_note: u8,
    pub fine_tune_cents: f64,
    pub loop_start: Option<u64>,
    pub loop_end: Option<u64>,
    pub buffer: SampleBuffer,
}

impl LoadedZone {
    pub fn from_zone(zone: &SampleZone, buffer: SampleBuffer) -> Self {
        LoadedZone {
            key_range_low: zone.key_range.low,
            key_range_high: zone.key_range.high,
            root_note: zone.pitch.root_note,
            fine_tune_cents: zone.pitch.fine_tune_cents,
            loop_start: zone.r#loop.as_ref().map(|l| l.start),
            loop_end: zone.r#loop.as_ref().map(|l| l.end),
            buffer,
        }
    }

    pub fn contains_note(&self, midi_note: u8) -> bool {
        midi_note >= self.key_range_low && midi_note <= self.key_range_high
    }
}

/// A decoded wavetable instrument.
#[derive(Debug, Clone)]
pub struct Sampler {
    pub zones: Vec<LoadedZone>,
    pub is_drum_kit: bool,
    pub envelope: Option<ADSRConfig>,
}

impl Sampler {
    pub fn new(zones: Vec<LoadedZone>, is_drum_kit: bool) -> Self {
        Sampler {
            zones,
            is_drum_kit,
            envelope: None,
        }
    }

    /// First zone whose key range covers `midi_note`.
    pub fn find_zone(&self, midi_note: u8) -> Option<&LoadedZone> {
        self.zones.iter().find(|z| z.contains_note(midi_note))
    }
}

/// A playing voice: reads from a zone buffer at a pitch-derived rate.
#[derive(Debug, Clone)]
pub struct SamplerVoice {
    buffer: SampleBuffer,
    position: f64,
    // pitch rate * (zone rate / engine rate)
    step: f64,
    loop_start: Option<u64>,
    loop_end: Option<u64>,
    gain: f64,
    /// Frames left before an automatic release, if gated.
    gate_remaining: Option<usize>,
    released: bool,
    finished: bool,
    envelope: SamplerEnvelope,
}

#[derive(Debug, Clone)]
struct SamplerEnvelope {
    attack: f64,
    decay: f64,
    sustain: f64,
    release: f64,
    sample_rate: f64,
    state: EnvState,
    level: f64,
    release_from: f64,
    samples_in_state: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum EnvState {
    Attack,
    Decay,
    Sustain,
    Release,
    Done,
}

impl SamplerEnvelope {
    fn new(sample_rate: f64) -> Self {
        SamplerEnvelope {
            attack: 0.005,
            decay: 0.1,
            sustain: 1.0,
            release: 0.1,
            sample_rate,
            state: EnvState::Attack,
            level: 0.0,
            release_from: 0.0,
            samples_in_state: 0,
        }
    }

    fn note_off(&mut self) {
        if self.state != EnvState::Done && self.state != EnvState::Release {
            self.state = EnvState::Release;
            self.release_from = self.level;
            self.samples_in_state = 0;
        }
    }

    fn frames(&self, seconds: f64) -> usize {
        (seconds * self.sample_rate) as usize
    }

    fn next_sample(&mut self) -> f64 {
        self.samples_in_state += 1;
        match self.state {
            EnvState::Attack => {
                let attack = self.frames(self.attack);
                if attack == 0 || self.samples_in_state >= attack {
                    self.state = EnvState::Decay;
                    self.samples_in_state = 0;
                    self.level = 1.0;
                } else {
                    self.level = self.samples_in_state as f64 / attack as f64;
                }
            }
            EnvState::Decay => {
                let decay = self.frames(self.decay);
                if decay == 0 || self.samples_in_state >= decay {
                    self.state = EnvState::Sustain;
                    self.level = self.sustain;
                } else {
                    let t = self.samples_in_state as f64 / decay as f64;
                    self.level = 1.0 - t * (1.0 - self.sustain);
                }
            }
            EnvState::Sustain => self.level = self.sustain,
            EnvState::Release => {
                let release = self.frames(self.release);
                if release == 0 || self.samples_in_state >= release {
                    self.state = EnvState::Done;
                    self.level = 0.0;
                } else {
                    let t = self.samples_in_state as f64 / release as f64;
                    self.level = self.release_from * (1.0 - t);
                }
            }
            EnvState::Done => self.level = 0.0,
        }
        self.level
    }
}

impl SamplerVoice {
    /// A voice playing `midi_note` from `zone` at `gain`.
    ///
    /// `tuning_pitch` is the A4 frequency, `engine_sample_rate` the output rate.
    pub fn new(
        zone: &LoadedZone,
        midi_note: u8,
        gain: f64,
        tuning_pitch: f64,
        engine_sample_rate: f64,
    ) -> Self {
        let pitch_rate =
            sample_playback_rate(midi_note, zone.root_note, zone.fine_tune_cents, tuning_pitch);
        let sr_ratio = zone.buffer.sample_rate as f64 / engine_sample_rate;

        SamplerVoice {
            buffer: zone.buffer.clone(),
            position: 0.0,
            step: pitch_rate * sr_ratio,
            loop_start: zone.loop_start,
            loop_end: zone.loop_end,
            gain,
            gate_remaining: None,
            released: false,
            finished: false,
            envelope: SamplerEnvelope::new(engine_sample_rate),
        }
    }

    pub fn with_envelope(mut self, adsr: &ADSRConfig) -> Self {
        self.envelope.attack = adsr.attack.max(0.0);
        self.envelope.decay = adsr.decay.max(0.0);
        self.envelope.sustain = adsr.sustain.clamp(0.0, 1.0);
        self.envelope.release = adsr.release.max(0.0);
        self
    }

    /// Release automatically after `frames` output frames.
    pub fn with_gate(mut self, frames: usize) -> Self {
        self.gate_remaining = Some(frames);
        self
    }

    pub fn next_sample(&mut self) -> f64 {
        if self.finished {
            return 0.0;
        }

        if let Some(remaining) = self.gate_remaining.as_mut() {
            if *remaining == 0 {
                self.gate_remaining = None;
                self.note_off();
            } else {
                *remaining -= 1;
            }
        }

        let sample = self.buffer.read_interpolated(self.position);
        self.position += self.step;

        if let (Some(loop_start), Some(loop_end)) = (self.loop_start, self.loop_end) {
            let loop_start = loop_start as f64;
            let loop_end = loop_end as f64;
            if !self.released && self.position >= loop_end && loop_end > loop_start {
                let loop_length = loop_end - loop_start;
                self.position = loop_start + (self.position - loop_end) % loop_length;
            }
        }

        if self.position >= self.buffer.len() as f64 {
            self.finished = true;
            return 0.0;
        }

        let env = self.envelope.next_sample();
        if self.envelope.state == EnvState::Done {
            self.finished = true;
        }

        sample * env * self.gain
    }

    pub fn note_off(&mut self) {
        self.released = true;
        self.envelope.note_off();
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
