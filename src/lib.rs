pub mod bank;
pub mod config;
pub mod decode;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod player;
pub mod preset;
pub mod score;
pub mod sequencer;
pub mod source;

use wasm_bindgen::prelude::*;

use crate::bank::Instrument;
use crate::config::EngineConfig;
use crate::engine::AudioEngine;
use crate::score::Note;

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// WASM-exposed: return the stepseq-core version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

fn js_error(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

/// WASM-exposed engine, driven from an AudioWorklet.
///
/// The worklet calls `process` once per render quantum; the page posts
/// scores and fetched asset bytes to it.
#[wasm_bindgen]
pub struct WasmEngine {
    engine: AudioEngine,
}

#[wasm_bindgen]
impl WasmEngine {
    /// Build from a JSON `EngineConfig`; an empty string uses the defaults.
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: &str) -> Result<WasmEngine, JsValue> {
        let config = if config_json.trim().is_empty() {
            EngineConfig::default()
        } else {
            EngineConfig::from_json(config_json).map_err(js_error)?
        };
        let engine = AudioEngine::new(config).map_err(js_error)?;
        Ok(WasmEngine { engine })
    }

    /// Replace the score with an array of `{beat, trackId, tone, duration}`
    /// objects. Returns the number of notes kept.
    pub fn submit_score(&self, notes: JsValue) -> Result<usize, JsValue> {
        let notes: Vec<Note> = serde_wasm_bindgen::from_value(notes).map_err(js_error)?;
        Ok(self.engine.submit_score(&notes).kept)
    }

    pub fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        self.engine.process(left, right);
    }

    /// Install a preset whose zones carry inline audio.
    pub fn install_instrument(&self, track_id: u32, preset_json: &str) -> Result<(), JsValue> {
        self.engine
            .bank()
            .install_preset_json(track_id, preset_json)
            .map_err(js_error)
    }

    /// Install a single WAV sample as the instrument for `track_id`.
    pub fn install_sample(&self, track_id: u32, wav: &[u8], root_note: u8) -> Result<(), JsValue> {
        let buffer = decode::decode_wav(wav).map_err(js_error)?.into_sample_buffer();
        let name = format!("track-{track_id}");
        self.engine
            .bank()
            .install(track_id, Instrument::single_zone(name, buffer, root_note));
        Ok(())
    }

    pub fn install_impulse_response(&self, wav: &[u8]) -> Result<(), JsValue> {
        self.engine
            .loader()
            .install_impulse_response(wav)
            .map_err(js_error)
    }

    /// Sound one note immediately. Failures only show in `degraded_notes`.
    pub fn play_note(&mut self, track_id: u32, tone: i32, duration: f64) {
        self.engine.play_note(track_id, None, tone, duration);
    }

    pub fn beat_cursor(&self) -> usize {
        self.engine.beat_cursor()
    }

    pub fn is_playing(&self) -> bool {
        self.engine.score_store().is_playing()
    }

    pub fn degraded_notes(&self) -> f64 {
        self.engine.degraded_notes() as f64
    }

    pub fn reverb_active(&self) -> bool {
        self.engine.reverb_active()
    }

    /// Render `measures` measures ahead as WAV bytes (for export).
    pub fn render_wav(&mut self, measures: usize) -> Result<Vec<u8>, JsValue> {
        dsp::renderer::render_wav(&mut self.engine, measures).map_err(js_error)
    }
}
