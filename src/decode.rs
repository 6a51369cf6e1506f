//! Audio decoding for instrument zones and impulse responses.

use std::io::Cursor;

use base64::{Engine as _, engine::general_purpose::STANDARD};

use crate::dsp::sampler::SampleBuffer;
use crate::error::DecodeError;
use crate::preset::AudioCodec;

/// Planar f32 audio at its native rate.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// Average of all channels.
    pub fn mono(&self) -> Vec<f32> {
        let count = self.channels.len().max(1) as f32;
        (0..self.frames())
            .map(|i| self.channels.iter().map(|ch| ch[i]).sum::<f32>() / count)
            .collect()
    }

    pub fn into_sample_buffer(self) -> SampleBuffer {
        let sample_rate = self.sample_rate;
        let data = if self.channels.len() == 1 {
            self.channels.into_iter().next().unwrap_or_default()
        } else {
            self.mono()
        };
        SampleBuffer::new(data, sample_rate)
    }

    fn from_interleaved(interleaved: &[f32], channels: usize, sample_rate: u32) -> Result<Self, DecodeError> {
        let channels = channels.max(1);
        let mut planar = vec![Vec::with_capacity(interleaved.len() / channels); channels];
        for frame in interleaved.chunks_exact(channels) {
            for (ch, &s) in planar.iter_mut().zip(frame) {
                ch.push(s);
            }
        }
        if planar[0].is_empty() {
            return Err(DecodeError::Empty);
        }
        Ok(DecodedAudio {
            channels: planar,
            sample_rate,
        })
    }
}

pub fn decode(bytes: &[u8], codec: AudioCodec) -> Result<DecodedAudio, DecodeError> {
    match codec {
        AudioCodec::Wav => decode_wav(bytes),
        AudioCodec::Mp3 => decode_mp3(bytes),
    }
}

pub fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio, DecodeError> {
    let reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.into_samples::<f32>().collect::<Result<Vec<f32>, _>>()?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1_i64 << spec.bits_per_sample.saturating_sub(1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<Vec<f32>, _>>()?
        }
    };
    DecodedAudio::from_interleaved(&interleaved, spec.channels as usize, spec.sample_rate)
}

#[cfg(feature = "catalog")]
pub fn decode_mp3(bytes: &[u8]) -> Result<DecodedAudio, DecodeError> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(bytes));
    let mut interleaved = Vec::new();
    let mut layout = None;
    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                layout.get_or_insert((frame.channels, frame.sample_rate as u32));
                interleaved.extend(frame.data.iter().map(|&s| s as f32 / 32768.0));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(DecodeError::Mp3(format!("{e:?}"))),
        }
    }
    let (channels, sample_rate) = layout.ok_or(DecodeError::Empty)?;
    DecodedAudio::from_interleaved(&interleaved, channels, sample_rate)
}

#[cfg(not(feature = "catalog"))]
pub fn decode_mp3(_bytes: &[u8]) -> Result<DecodedAudio, DecodeError> {
    Err(DecodeError::UnsupportedCodec("mp3".to_string()))
}

/// Decode base64 little-endian PCM (8-bit unsigned or 16-bit signed).
pub fn decode_inline_pcm(data: &str, bits_per_sample: u8, sample_rate: u32) -> Result<SampleBuffer, DecodeError> {
    let bytes = STANDARD.decode(data.trim())?;
    let samples: Vec<f32> = match bits_per_sample {
        8 => bytes.iter().map(|&b| (b as f32 - 128.0) / 128.0).collect(),
        16 => bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
            .collect(),
        other => return Err(DecodeError::BitDepth(other)),
    };
    if samples.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(SampleBuffer::new(samples, sample_rate))
}

pub fn decode_base64(data: &str) -> Result<Vec<u8>, DecodeError> {
    Ok(STANDARD.decode(data.trim())?)
}

/// Linear-interpolation rate conversion.
pub fn resample_linear(data: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || data.len() < 2 || from_rate == 0 || to_rate == 0 {
        return data.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((data.len() as f64) / ratio).floor() as usize;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos as usize;
            let frac = (pos - idx as f64) as f32;
            match data.get(idx + 1) {
                Some(&next) => data[idx] * (1.0 - frac) + next * frac,
                None => data[data.len() - 1],
            }
        })
        .collect()
}
