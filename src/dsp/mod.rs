//! DSP: the fixed signal chain and wavetable playback.
//!
//! Everything here runs on the audio thread in fixed render quanta. The
//! same code serves the AudioWorklet (via WASM) and offline WAV export.

pub mod compressor;
pub mod convolver;
pub mod filter;
pub mod graph;
pub mod mixer;
pub mod renderer;
pub mod sampler;
