//! WAV renderer: runs an engine offline and encodes the result.

use std::io::Cursor;

use crate::engine::AudioEngine;
use crate::error::EngineError;

/// Render `measures` full measures of the engine's score as 16-bit stereo WAV bytes.
pub fn render_wav(engine: &mut AudioEngine, measures: usize) -> Result<Vec<u8>, EngineError> {
    let config = engine.config();
    let seconds = measures as f64 * config.beats as f64 * config.tick_seconds();
    let sample_rate = config.sample_rate;
    let frames = (seconds * sample_rate as f64).round() as usize;

    let samples = engine.render_offline(frames);
    encode_wav(&samples, sample_rate, 2)
}

/// Encode interleaved f32 samples as 16-bit PCM WAV.
pub fn encode_wav(samples: &[f32], sample_rate: u32, channels: u16) -> Result<Vec<u8>, EngineError> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
    for &s in samples {
        writer.write_sample((s.clamp(-1.0, 1.0) * 32767.0) as i16)?;
    }
    writer.finalize()?;
    Ok(cursor.into_inner())
}
