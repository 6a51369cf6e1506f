//! Note Player: turns a symbolic note into a scheduled sampler voice.

use crate::bank::InstrumentBank;
use crate::config::TrackConfig;
use crate::dsp::graph::VoiceInput;
use crate::dsp::sampler::SamplerVoice;
use crate::error::{PlayError, ResolveError};
use crate::score::Note;

/// Anything that can sound a note at an absolute time on the audio clock.
pub trait NotePlayer {
    fn play_note(&mut self, note: &Note, when: f64) -> Result<(), PlayError>;
}

/// Plays notes from an [`InstrumentBank`] into the audio graph.
///
/// Borrowed for one render quantum; holds no state of its own, so every
/// call is independent and none outlives the scheduling of its voice.
#[derive(Debug)]
pub struct SamplerPlayer<'a> {
    pub bank: &'a InstrumentBank,
    pub tracks: &'a [TrackConfig],
    pub input: VoiceInput<'a>,
    pub sample_rate: f64,
    /// Seconds per beat; note durations are measured in beats.
    pub tick: f64,
    pub tuning_pitch: f64,
}

impl SamplerPlayer<'_> {
    /// Absolute MIDI pitch for `tone` on `track_id`.
    pub fn absolute_pitch(&self, track_id: u32, tone: i32) -> Result<u8, PlayError> {
        let track = self
            .tracks
            .iter()
            .find(|t| t.id == track_id)
            .ok_or(ResolveError::Unknown(track_id))?;
        let pitch = 12 * track.octave_base + tone;
        u8::try_from(pitch)
            .ok()
            .filter(|&p| p <= 127)
            .ok_or(PlayError::PitchOutOfRange { track_id, pitch })
    }
}

impl NotePlayer for SamplerPlayer<'_> {
    fn play_note(&mut self, note: &Note, when: f64) -> Result<(), PlayError> {
        if !note.is_audible() {
            return Ok(());
        }
        let instrument = match note.instrument.as_deref() {
            Some(name) => self.bank.resolve_named(name)?,
            None => self.bank.resolve(note.track_id)?,
        };
        let pitch = self.absolute_pitch(note.track_id, note.tone)?;
        let gain = self
            .tracks
            .iter()
            .find(|t| t.id == note.track_id)
            .map_or(1.0, |t| t.gain);

        let zone = instrument.sampler.find_zone(pitch).ok_or(PlayError::NoZone(pitch))?;
        let gate = (note.duration * self.tick * self.sample_rate).round() as usize;
        let mut voice =
            SamplerVoice::new(zone, pitch, gain, self.tuning_pitch, self.sample_rate).with_gate(gate);
        if let Some(envelope) = &instrument.sampler.envelope {
            voice = voice.with_envelope(envelope);
        }

        let start_frame = (when.max(0.0) * self.sample_rate).round() as u64;
        self.input.connect(start_frame, voice);
        Ok(())
    }
}
