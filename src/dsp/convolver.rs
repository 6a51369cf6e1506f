//! Convolution reverb: uniformly partitioned overlap-add FFT convolution.
//!
//! The impulse response is split into `PARTITION`-sized blocks whose
//! spectra are computed once, off the audio thread, when the response is
//! loaded. Until a response is installed the reverb passes audio through
//! unchanged.

use std::sync::Arc;

use rustfft::{Fft, FftPlanner, num_complex::Complex};

use crate::decode::{resample_linear, DecodedAudio};
use crate::error::DecodeError;

/// Samples per convolution block; also the graph's render quantum.
pub const PARTITION: usize = 128;
const FFT_LEN: usize = PARTITION * 2;
/// Responses longer than this are truncated.
const MAX_SECONDS: f64 = 6.0;

/// A prepared impulse response: per channel, one spectrum per partition.
#[derive(Debug)]
pub struct ImpulseResponse {
    channels: Vec<Vec<Vec<Complex<f32>>>>,
    frames: usize,
}

impl ImpulseResponse {
    /// Prepare `audio` for an engine running at `sample_rate`.
    ///
    /// Keeps at most two channels, resamples to the engine rate and
    /// normalises so the loudest channel has unit energy.
    pub fn prepare(audio: &DecodedAudio, sample_rate: u32) -> Result<Self, DecodeError> {
        let max_frames = (MAX_SECONDS * sample_rate as f64) as usize;
        let mut channels: Vec<Vec<f32>> = audio
            .channels
            .iter()
            .take(2)
            .map(|ch| {
                let mut data = resample_linear(ch, audio.sample_rate, sample_rate);
                data.truncate(max_frames);
                data
            })
            .collect();

        let energy = channels
            .iter()
            .map(|ch| ch.iter().map(|s| s * s).sum::<f32>())
            .fold(0.0_f32, f32::max);
        if channels.is_empty() || energy <= f32::EPSILON {
            return Err(DecodeError::Empty);
        }
        let scale = energy.sqrt().recip();
        for ch in &mut channels {
            ch.iter_mut().for_each(|s| *s *= scale);
        }

        let frames = channels.iter().map(Vec::len).max().unwrap_or(0);
        let fft = FftPlanner::<f32>::new().plan_fft_forward(FFT_LEN);
        let spectra = channels
            .iter()
            .map(|ch| {
                ch.chunks(PARTITION)
                    .map(|block| {
                        let mut buf = vec![Complex::new(0.0, 0.0); FFT_LEN];
                        for (slot, &s) in buf.iter_mut().zip(block) {
                            slot.re = s;
                        }
                        fft.process(&mut buf);
                        buf
                    })
                    .collect()
            })
            .collect();

        Ok(ImpulseResponse {
            channels: spectra,
            frames,
        })
    }

    pub fn from_wav_bytes(bytes: &[u8], sample_rate: u32) -> Result<Self, DecodeError> {
        Self::prepare(&crate::decode::decode_wav(bytes)?, sample_rate)
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn partitions(&self) -> usize {
        self.channels.iter().map(Vec::len).max().unwrap_or(0)
    }
}

/// Mono-in / stereo-out convolution stage.
pub struct ConvolutionReverb {
    ir: Option<Arc<ImpulseResponse>>,
    mix: f32,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    // Frequency-domain delay line of past input blocks.
    history: Vec<Vec<Complex<f32>>>,
    head: usize,
    overlap: [Vec<f32>; 2],
    accum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl ConvolutionReverb {
    /// `mix` is the wet fraction; `1.0` is fully wet.
    pub fn new(mix: f64) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(FFT_LEN);
        let ifft = planner.plan_fft_inverse(FFT_LEN);
        let scratch_len = fft
            .get_inplace_scratch_len()
            .max(ifft.get_inplace_scratch_len());
        ConvolutionReverb {
            ir: None,
            mix: mix.clamp(0.0, 1.0) as f32,
            fft,
            ifft,
            history: Vec::new(),
            head: 0,
            overlap: [vec![0.0; PARTITION], vec![0.0; PARTITION]],
            accum: vec![Complex::new(0.0, 0.0); FFT_LEN],
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
        }
    }

    pub fn is_active(&self) -> bool {
        self.ir.is_some()
    }

    /// Whether `ir` is the response currently installed.
    pub fn is_installed(&self, ir: &Arc<ImpulseResponse>) -> bool {
        self.ir.as_ref().is_some_and(|current| Arc::ptr_eq(current, ir))
    }

    pub fn set_impulse(&mut self, ir: Arc<ImpulseResponse>) {
        let partitions = ir.partitions().max(1);
        self.history = vec![vec![Complex::new(0.0, 0.0); FFT_LEN]; partitions];
        self.head = 0;
        for overlap in &mut self.overlap {
            overlap.fill(0.0);
        }
        self.ir = Some(ir);
    }

    /// Convolve one `PARTITION`-frame block.
    pub fn process(&mut self, input: &[f64], left: &mut [f32], right: &mut [f32]) {
        debug_assert_eq!(input.len(), PARTITION);
        let Some(ir) = self.ir.clone() else {
            for ((l, r), &x) in left.iter_mut().zip(right.iter_mut()).zip(input) {
                *l = x as f32;
                *r = x as f32;
            }
            return;
        };

        let block = &mut self.history[self.head];
        block.fill(Complex::new(0.0, 0.0));
        for (slot, &x) in block.iter_mut().zip(input) {
            slot.re = x as f32;
        }
        self.fft.process_with_scratch(block, &mut self.scratch);

        let partitions = self.history.len();
        let norm = 1.0 / FFT_LEN as f32;
        let dry = 1.0 - self.mix;
        let outputs: [&mut [f32]; 2] = [left, right];
        for (channel, out) in outputs.into_iter().enumerate() {
            let spectra = &ir.channels[channel.min(ir.channels.len() - 1)];
            self.accum.fill(Complex::new(0.0, 0.0));
            for (p, h) in spectra.iter().enumerate() {
                let x = &self.history[(self.head + partitions - p) % partitions];
                for ((acc, &xv), &hv) in self.accum.iter_mut().zip(x).zip(h) {
                    *acc += xv * hv;
                }
            }
            self.ifft.process_with_scratch(&mut self.accum, &mut self.scratch);

            let overlap = &mut self.overlap[channel];
            for i in 0..PARTITION {
                let wet = self.accum[i].re * norm + overlap[i];
                overlap[i] = self.accum[PARTITION + i].re * norm;
                out[i] = input[i] as f32 * dry + wet * self.mix;
            }
        }

        self.head = (self.head + 1) % partitions;
    }
}

impl std::fmt::Debug for ConvolutionReverb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConvolutionReverb")
            .field("active", &self.is_active())
            .field("mix", &self.mix)
            .field("partitions", &self.history.len())
            .finish()
    }
}
