//! Audio Engine: owns the graph, the bank, the score and the sequencer.
//!
//! The host pulls audio with [`AudioEngine::process`]. Rendering happens in
//! fixed quanta of [`PARTITION`] frames; before each quantum the sequencer
//! fires every tick due inside it, so the audio clock (frames rendered) is
//! the only clock the schedule follows. Assets load through an
//! [`AssetLoader`] on any task while rendering continues.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tracing::{debug, info, warn};

use crate::bank::InstrumentBank;
use crate::config::EngineConfig;
use crate::decode::decode;
use crate::dsp::convolver::{ImpulseResponse, PARTITION};
use crate::dsp::graph::{AudioGraph, ImpulseSlot};
use crate::error::{EngineError, LoadError};
use crate::player::{NotePlayer, SamplerPlayer};
use crate::preset::AudioCodec;
use crate::score::{Ingest, Note, ScoreStore};
use crate::sequencer::{BeatSequencer, SequencerStats, Transport};
use crate::source::AssetSource;

#[derive(Debug)]
pub struct AudioEngine {
    config: EngineConfig,
    store: Arc<ScoreStore>,
    sequencer: BeatSequencer,
    bank: Arc<InstrumentBank>,
    impulse: ImpulseSlot,
    graph: AudioGraph,
    /// Frames rendered so far: the audio clock.
    frames: u64,
    out_left: [f32; PARTITION],
    out_right: [f32; PARTITION],
    /// Read position in the last rendered quantum.
    out_pos: usize,
    direct_failures: u64,
}

impl AudioEngine {
    /// Build the graph and start the clock at time 0. Nothing is loaded yet;
    /// until instruments arrive notes degrade to silence.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let sample_rate = config.sample_rate as f64;
        let store = Arc::new(ScoreStore::new(config.beats));
        let mut sequencer = BeatSequencer::new(Arc::clone(&store), config.bpm);
        sequencer.start(0.0);
        let impulse: ImpulseSlot = Arc::new(ArcSwapOption::empty());
        let graph = AudioGraph::new(&config.graph, sample_rate, Arc::clone(&impulse));
        let bank = Arc::new(InstrumentBank::from_tracks(&config.tracks));

        info!(
            sample_rate = config.sample_rate,
            bpm = config.bpm,
            beats = config.beats,
            tracks = config.tracks.len(),
            "audio engine ready"
        );
        Ok(AudioEngine {
            config,
            store,
            sequencer,
            bank,
            impulse,
            graph,
            frames: 0,
            out_left: [0.0; PARTITION],
            out_right: [0.0; PARTITION],
            out_pos: PARTITION,
            direct_failures: 0,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared handle for submitting scores from another thread.
    pub fn score_store(&self) -> Arc<ScoreStore> {
        Arc::clone(&self.store)
    }

    pub fn submit_score(&self, notes: &[Note]) -> Ingest {
        self.store.submit(notes)
    }

    pub fn bank(&self) -> &Arc<InstrumentBank> {
        &self.bank
    }

    pub fn loader(&self) -> AssetLoader {
        AssetLoader {
            bank: Arc::clone(&self.bank),
            impulse: Arc::clone(&self.impulse),
            tracks: self.config.tracks.iter().map(|t| t.id).collect(),
            impulse_location: self.config.graph.impulse_response.clone(),
            sample_rate: self.config.sample_rate,
        }
    }

    /// Seconds of audio handed to the host so far.
    pub fn now(&self) -> f64 {
        let delivered = self.frames - (PARTITION - self.out_pos) as u64;
        delivered as f64 / self.config.sample_rate as f64
    }

    pub fn beat_cursor(&self) -> usize {
        self.sequencer.beat_cursor()
    }

    pub fn transport(&self) -> Transport {
        self.sequencer.transport()
    }

    pub fn sequencer_stats(&self) -> SequencerStats {
        self.sequencer.stats()
    }

    /// Notes that resolved to silence: unloaded instruments, bad pitches.
    pub fn degraded_notes(&self) -> u64 {
        self.sequencer.stats().notes_failed + self.direct_failures
    }

    pub fn reverb_active(&self) -> bool {
        self.graph.reverb_active()
    }

    pub fn active_voices(&self) -> usize {
        self.graph.active_voices()
    }

    /// Sound one note outside the score, at the start of the next quantum.
    /// A note that cannot sound is dropped and counted in
    /// [`AudioEngine::degraded_notes`].
    pub fn play_note(&mut self, track_id: u32, instrument: Option<&str>, tone: i32, duration: f64) {
        let note = Note {
            beat: 0,
            track_id,
            instrument: instrument.map(str::to_string),
            tone,
            duration,
        };
        let when = self.frames as f64 / self.config.sample_rate as f64;
        self.play_note_at(&note, when)
    }

    /// Sound `note` at absolute time `when` on the audio clock.
    pub fn play_note_at(&mut self, note: &Note, when: f64) {
        let mut player = SamplerPlayer {
            bank: &self.bank,
            tracks: &self.config.tracks,
            input: self.graph.input(),
            sample_rate: self.config.sample_rate as f64,
            tick: self.sequencer.tick_seconds(),
            tuning_pitch: self.config.tuning_pitch,
        };
        if let Err(error) = player.play_note(note, when) {
            debug!(track_id = note.track_id, %error, "direct note dropped");
            self.direct_failures += 1;
        }
    }

    fn render_quantum(&mut self) {
        let sample_rate = self.config.sample_rate as f64;
        let block_end = (self.frames + PARTITION as u64) as f64 / sample_rate;
        let mut player = SamplerPlayer {
            bank: &self.bank,
            tracks: &self.config.tracks,
            input: self.graph.input(),
            sample_rate,
            tick: self.sequencer.tick_seconds(),
            tuning_pitch: self.config.tuning_pitch,
        };
        self.sequencer.run_until(block_end, &mut player);

        self.graph.render(self.frames, &mut self.out_left, &mut self.out_right);
        self.frames += PARTITION as u64;
        self.out_pos = 0;
    }

    /// Fill `left` and `right` with the next frames of output.
    pub fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        let frames = left.len().min(right.len());
        let mut written = 0;
        while written < frames {
            if self.out_pos == PARTITION {
                self.render_quantum();
            }
            let n = (PARTITION - self.out_pos).min(frames - written);
            let range = self.out_pos..self.out_pos + n;
            left[written..written + n].copy_from_slice(&self.out_left[range.clone()]);
            right[written..written + n].copy_from_slice(&self.out_right[range]);
            self.out_pos += n;
            written += n;
        }
    }

    /// Render `frames` frames of interleaved stereo without a device.
    pub fn render_offline(&mut self, frames: usize) -> Vec<f32> {
        let mut left = vec![0.0; frames];
        let mut right = vec![0.0; frames];
        self.process(&mut left, &mut right);
        left.into_iter()
            .zip(right)
            .flat_map(|(l, r)| [l, r])
            .collect()
    }
}

/// What [`AssetLoader::load_all`] managed to load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub instruments_loaded: usize,
    pub instruments_failed: usize,
    pub reverb_loaded: bool,
}

/// Loads instruments and the reverb response for an engine, from any task.
#[derive(Debug, Clone)]
pub struct AssetLoader {
    bank: Arc<InstrumentBank>,
    impulse: ImpulseSlot,
    tracks: Vec<u32>,
    impulse_location: Option<String>,
    sample_rate: u32,
}

impl AssetLoader {
    pub async fn load_instrument<S: AssetSource>(&self, track_id: u32, source: &S) -> Result<(), LoadError> {
        self.bank.load(track_id, source).await
    }

    /// Fetch the configured impulse response. `Ok(false)` when none is
    /// configured; the reverb then stays a pass-through.
    pub async fn load_impulse_response<S: AssetSource>(&self, source: &S) -> Result<bool, LoadError> {
        let Some(location) = self.impulse_location.as_deref() else {
            return Ok(false);
        };
        let codec = if location.to_ascii_lowercase().ends_with(".mp3") {
            AudioCodec::Mp3
        } else {
            AudioCodec::Wav
        };
        let result = async {
            let bytes = source.fetch(location).await?;
            let audio = decode(&bytes, codec)?;
            Ok::<_, LoadError>(ImpulseResponse::prepare(&audio, self.sample_rate)?)
        }
        .await;

        match result {
            Ok(ir) => {
                info!(%location, frames = ir.frames(), "impulse response loaded");
                self.impulse.store(Some(Arc::new(ir)));
                Ok(true)
            }
            Err(error) => {
                warn!(%location, %error, "impulse response failed to load, reverb bypassed");
                Err(error)
            }
        }
    }

    /// Install WAV bytes fetched by the host.
    pub fn install_impulse_response(&self, wav: &[u8]) -> Result<(), LoadError> {
        let ir = ImpulseResponse::from_wav_bytes(wav, self.sample_rate)?;
        info!(frames = ir.frames(), "impulse response installed");
        self.impulse.store(Some(Arc::new(ir)));
        Ok(())
    }

    /// Load every configured asset. A failure never stops the others.
    pub async fn load_all<S: AssetSource>(&self, source: &S) -> LoadReport {
        let mut report = LoadReport::default();
        for &track_id in &self.tracks {
            match self.bank.load(track_id, source).await {
                Ok(()) => report.instruments_loaded += 1,
                Err(LoadError::UnknownTrack(_)) => {}
                Err(_) => report.instruments_failed += 1,
            }
        }
        report.reverb_loaded = matches!(self.load_impulse_response(source).await, Ok(true));
        info!(
            loaded = report.instruments_loaded,
            failed = report.instruments_failed,
            reverb = report.reverb_loaded,
            "asset load finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::Instrument;
    use crate::decode::tests::wav_bytes;
    use crate::dsp::sampler::SampleBuffer;
    use crate::source::MemorySource;

    fn short_tone() -> SampleBuffer {
        // a quarter second, so every voice is silent well before the next beat
        SampleBuffer::new((0..11025).map(|i| (i as f32 * 0.06).sin() * 0.8).collect(), 44100)
    }

    // Just short of four seconds in whole quanta, so the tick that opens
    // the next measure is not fired.
    const MEASURE: usize = 44100 * 4 - 1024;

    fn engine() -> AudioEngine {
        AudioEngine::new(EngineConfig::default()).unwrap()
    }

    fn loaded_engine() -> AudioEngine {
        let engine = engine();
        engine.bank().install(0, Instrument::single_zone("Xylophone", short_tone(), 72));
        engine.bank().install(1, Instrument::single_zone("Marimba", short_tone(), 48));
        engine
    }

    fn window(out: &[f32], from_s: f64, to_s: f64) -> &[f32] {
        let frame = |s: f64| (s * 44100.0) as usize * 2;
        &out[frame(from_s)..frame(to_s)]
    }

    fn peak(samples: &[f32]) -> f32 {
        samples.iter().fold(0.0, |m, s| m.max(s.abs()))
    }

    fn measure_notes() -> Vec<Note> {
        vec![Note::new(1, 0, 0, 1.0), Note::new(1, 1, 2, 1.0), Note::new(5, 0, 7, 0.0)]
    }

    #[test]
    fn rejects_invalid_config() {
        let config = EngineConfig {
            bpm: -1.0,
            ..EngineConfig::default()
        };
        assert!(matches!(AudioEngine::new(config), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn unloaded_bank_plays_silence_without_failing() {
        let mut engine = engine();
        engine.submit_score(&measure_notes());
        let out = engine.render_offline(MEASURE);

        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(engine.sequencer_stats().ticks, 8);
        assert_eq!(engine.degraded_notes(), 2);
        assert_eq!(engine.transport(), Transport::Running);
    }

    #[test]
    fn concrete_measure_sounds_beat_one_only() {
        let mut engine = loaded_engine();
        let ingest = engine.submit_score(&measure_notes());
        assert_eq!(ingest.kept, 2);
        let out = engine.render_offline(MEASURE);

        let stats = engine.sequencer_stats();
        assert_eq!(stats.ticks, 8);
        assert_eq!(stats.notes_played, 2);
        assert_eq!(engine.degraded_notes(), 0);
        assert!(peak(window(&out, 0.0, 0.25)) > 0.01);
        assert!(peak(window(&out, 2.0, 2.5)) < 1e-3, "beat 5 is a rest");
        assert_eq!(engine.beat_cursor(), 0);
    }

    #[test]
    fn measure_repeats_until_stopped() {
        let mut engine = loaded_engine();
        engine.submit_score(&measure_notes());
        engine.render_offline(MEASURE + 44100 * 4);
        assert_eq!(engine.sequencer_stats().notes_played, 4);

        engine.submit_score(&[]);
        assert_eq!(engine.transport(), Transport::Stopped);
        let out = engine.render_offline(44100 * 4);
        assert_eq!(engine.sequencer_stats().notes_played, 4);
        assert!(peak(window(&out, 1.0, 4.0)) < 1e-3);
        assert_eq!(engine.sequencer_stats().ticks, 24, "clock keeps running while stopped");
    }

    #[test]
    fn tick_voices_start_on_their_frame() {
        let mut engine = loaded_engine();
        engine.submit_score(&[Note::new(2, 0, 0, 1.0)]);
        let out = engine.render_offline(44100);
        let beat_two = 22050 * 2;
        assert!(out[..beat_two].iter().all(|&s| s == 0.0));
        assert!(peak(&out[beat_two..beat_two + 2000]) > 0.0);
    }

    #[test]
    fn pull_size_does_not_change_output() {
        let mut a = loaded_engine();
        let mut b = loaded_engine();
        a.submit_score(&measure_notes());
        b.submit_score(&measure_notes());

        let whole = a.render_offline(1000 * 7);
        let mut pieces = Vec::new();
        for _ in 0..7 {
            pieces.extend(b.render_offline(1000));
        }
        assert_eq!(whole, pieces);
        assert!((b.now() - 7000.0 / 44100.0).abs() < 1e-12);
    }

    #[test]
    fn direct_play_degrades_when_unloaded() {
        let mut engine = engine();
        engine.play_note(0, None, 0, 1.0);
        assert_eq!(engine.degraded_notes(), 1);
        assert_eq!(peak(&engine.render_offline(4410)), 0.0);

        let mut engine = loaded_engine();
        engine.play_note(0, Some("marimba"), 0, 1.0);
        engine.play_note(1, Some("celesta"), 0, 1.0);
        engine.play_note(1, None, 0, 0.0);
        assert_eq!(engine.degraded_notes(), 1);
        let out = engine.render_offline(4410);
        assert!(peak(&out) > 0.01);
    }

    fn preset_json(name: &str) -> Vec<u8> {
        serde_json::json!({
            "id": name.to_lowercase(),
            "name": name,
            "graph": {"type": "sampler", "config": {"zones": [{
                "keyRange": {"low": 0, "high": 127},
                "pitch": {"rootNote": 60},
                "sampleRate": 44100,
                "audio": {"type": "external", "url": "zone.wav", "codec": "wav"}
            }]}}
        })
        .to_string()
        .into_bytes()
    }

    fn full_source() -> MemorySource {
        let tone = wav_bytes(&[(0..4410).map(|i| (i as f32 * 0.06).sin() * 0.5).collect()], 44100);
        let mut ir = vec![0.0_f32; 2000];
        ir[0] = 0.9;
        ir[700] = 0.4;
        MemorySource::new()
            .with("presets/xylophone/preset.json", preset_json("Xylophone"))
            .with("presets/xylophone/zone.wav", tone.clone())
            .with("presets/marimba/preset.json", preset_json("Marimba"))
            .with("presets/marimba/zone.wav", tone)
            .with("impulses/maes-howe.wav", wav_bytes(&[ir.clone(), ir], 44100))
    }

    #[tokio::test]
    async fn load_all_fills_bank_and_reverb() {
        let mut engine = engine();
        let report = engine.loader().load_all(&full_source()).await;
        assert_eq!(
            report,
            LoadReport {
                instruments_loaded: 2,
                instruments_failed: 0,
                reverb_loaded: true,
            }
        );

        engine.submit_score(&measure_notes());
        let out = engine.render_offline(22050);
        assert!(engine.reverb_active());
        assert!(peak(&out) > 0.01);
        assert_eq!(engine.degraded_notes(), 0);
    }

    #[tokio::test]
    async fn failed_loads_leave_engine_rendering_dry() {
        let mut engine = engine();
        let report = engine.loader().load_all(&MemorySource::new()).await;
        assert_eq!(report.instruments_failed, 2);
        assert!(!report.reverb_loaded);

        engine.bank().install(0, Instrument::single_zone("Xylophone", short_tone(), 72));
        engine.submit_score(&[Note::new(1, 0, 0, 1.0)]);
        let out = engine.render_offline(22050);
        assert!(!engine.reverb_active());
        assert!(peak(&out) > 0.01);
    }

    #[test]
    fn installed_impulse_response_engages_reverb() {
        let mut engine = loaded_engine();
        let mut ir = vec![0.0_f32; 512];
        ir[0] = 1.0;
        engine.loader().install_impulse_response(&wav_bytes(&[ir], 22050)).unwrap();
        assert!(!engine.reverb_active());
        engine.render_offline(128);
        assert!(engine.reverb_active());
        assert!(engine.loader().install_impulse_response(b"junk").is_err());
    }
}
