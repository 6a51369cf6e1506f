//! Audio Graph: the fixed chain every voice is rendered through.
//!
//! ```text
//! voices -> lowpass -> highpass -> compressor -> convolution reverb -> output
//! ```
//!
//! The topology and node parameters are set once at construction. Voices
//! enter only through [`VoiceInput::connect`]; the reverb's impulse
//! response arrives later through a shared slot and, until then (or if it
//! never loads), the reverb stage is a pass-through.

use std::collections::VecDeque;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::compressor::{Compressor, CompressorConfig};
use super::convolver::{ConvolutionReverb, ImpulseResponse, PARTITION};
use super::filter::{BiquadFilter, FilterType};
use super::mixer::Mixer;
use super::sampler::SamplerVoice;

/// Where a loaded impulse response is published for the render thread.
pub type ImpulseSlot = Arc<ArcSwapOption<ImpulseResponse>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GraphConfig {
    pub lowpass_hz: f64,
    pub highpass_hz: f64,
    pub compressor: CompressorConfig,
    /// Wet fraction of the reverb stage once its response is loaded.
    pub reverb_mix: f64,
    /// Location of the reverb impulse response (WAV).
    pub impulse_response: Option<String>,
    pub master_gain: f64,
    /// Sounding voices beyond this steal the oldest.
    pub max_voices: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        GraphConfig {
            lowpass_hz: 8000.0,
            highpass_hz: 50.0,
            compressor: CompressorConfig::default(),
            reverb_mix: 1.0,
            impulse_response: Some("impulses/maes-howe.wav".to_string()),
            master_gain: 0.8,
            max_voices: 64,
        }
    }
}

/// A voice waiting for its absolute start frame.
#[derive(Debug)]
pub struct ScheduledVoice {
    pub start_frame: u64,
    pub voice: SamplerVoice,
}

#[derive(Debug)]
struct ActiveVoice {
    voice: SamplerVoice,
    // frames of the current quantum to skip before the voice starts
    offset: usize,
}

/// Write handle onto the chain's entry node.
#[derive(Debug)]
pub struct VoiceInput<'a> {
    pending: &'a mut VecDeque<ScheduledVoice>,
}

impl VoiceInput<'_> {
    /// Route `voice` into the chain, starting at `start_frame`.
    pub fn connect(&mut self, start_frame: u64, voice: SamplerVoice) {
        self.pending.push_back(ScheduledVoice { start_frame, voice });
    }
}

#[derive(Debug)]
pub struct AudioGraph {
    lowpass: BiquadFilter,
    highpass: BiquadFilter,
    compressor: Compressor,
    reverb: ConvolutionReverb,
    impulse: ImpulseSlot,
    mixer: Mixer,
    pending: VecDeque<ScheduledVoice>,
    active: Vec<ActiveVoice>,
    max_voices: usize,
}

impl AudioGraph {
    pub fn new(config: &GraphConfig, sample_rate: f64, impulse: ImpulseSlot) -> Self {
        AudioGraph {
            lowpass: BiquadFilter::new(FilterType::Lowpass, config.lowpass_hz, sample_rate),
            highpass: BiquadFilter::new(FilterType::Highpass, config.highpass_hz, sample_rate),
            compressor: Compressor::new(&config.compressor, sample_rate),
            reverb: ConvolutionReverb::new(config.reverb_mix),
            impulse,
            mixer: Mixer::new(config.master_gain, PARTITION),
            pending: VecDeque::new(),
            active: Vec::with_capacity(config.max_voices),
            max_voices: config.max_voices.max(1),
        }
    }

    pub fn input(&mut self) -> VoiceInput<'_> {
        VoiceInput {
            pending: &mut self.pending,
        }
    }

    pub fn active_voices(&self) -> usize {
        self.active.len()
    }

    pub fn pending_voices(&self) -> usize {
        self.pending.len()
    }

    pub fn reverb_active(&self) -> bool {
        self.reverb.is_active()
    }

    fn sync_impulse(&mut self) {
        let published = self.impulse.load();
        if let Some(ir) = published.as_ref() {
            if !self.reverb.is_installed(ir) {
                info!(frames = ir.frames(), channels = ir.channel_count(), "reverb impulse response installed");
                self.reverb.set_impulse(Arc::clone(ir));
            }
        }
    }

    fn activate_due(&mut self, block_start: u64) {
        let block_end = block_start + PARTITION as u64;
        let mut i = 0;
        while i < self.pending.len() {
            if self.pending[i].start_frame >= block_end {
                i += 1;
                continue;
            }
            let Some(scheduled) = self.pending.remove(i) else {
                break;
            };
            if self.active.len() >= self.max_voices {
                debug!(max_voices = self.max_voices, "stealing oldest voice");
                self.active.remove(0);
            }
            self.active.push(ActiveVoice {
                offset: scheduled.start_frame.saturating_sub(block_start) as usize,
                voice: scheduled.voice,
            });
        }
    }

    /// Render the quantum starting at absolute frame `block_start`.
    pub fn render(&mut self, block_start: u64, left: &mut [f32; PARTITION], right: &mut [f32; PARTITION]) {
        self.sync_impulse();
        self.activate_due(block_start);

        self.mixer.clear();
        for active in &mut self.active {
            for i in active.offset..PARTITION {
                let sample = active.voice.next_sample();
                self.mixer.add(i, sample);
            }
            active.offset = 0;
        }
        self.active.retain(|a| !a.voice.is_finished());

        let bus = self.mixer.bus_mut();
        self.lowpass.process_block(bus);
        self.highpass.process_block(bus);
        self.compressor.process_block(bus);
        self.reverb.process(self.mixer.bus(), left, right);
        self.mixer.finish(left, right);
    }
}
