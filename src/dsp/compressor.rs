//! Compressor: feed-forward dynamics processing.
//!
//! Threshold, knee, ratio, attack and release follow the parameter set of
//! the WebAudio DynamicsCompressorNode.

use serde::{Deserialize, Serialize};

/// Fixed compressor parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompressorConfig {
    /// Threshold in dB.
    pub threshold: f64,
    /// Knee width in dB (0 = hard knee).
    pub knee: f64,
    /// Compression ratio (12.0 = 12:1).
    pub ratio: f64,
    /// Attack time in seconds.
    pub attack: f64,
    /// Release time in seconds.
    pub release: f64,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            threshold: -30.0,
            knee: 40.0,
            ratio: 12.0,
            attack: 0.15,
            release: 0.25,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Compressor {
    threshold: f64,
    knee: f64,
    ratio: f64,
    attack_coef: f64,
    release_coef: f64,
    // Peak envelope (linear)
    envelope: f64,
}

impl Compressor {
    /// Parameters are clamped to the ranges DynamicsCompressorNode accepts.
    pub fn new(config: &CompressorConfig, sample_rate: f64) -> Self {
        let attack = config.attack.clamp(0.0001, 1.0);
        let release = config.release.clamp(0.001, 1.0);
        Self {
            threshold: config.threshold.clamp(-100.0, 0.0),
            knee: config.knee.clamp(0.0, 40.0),
            ratio: config.ratio.clamp(1.0, 20.0),
            attack_coef: (-1.0 / (attack * sample_rate)).exp(),
            release_coef: (-1.0 / (release * sample_rate)).exp(),
            envelope: 0.0,
        }
    }

    #[inline]
    fn linear_to_db(linear: f64) -> f64 {
        if linear <= 0.0 {
            -120.0
        } else {
            20.0 * linear.log10()
        }
    }

    #[inline]
    fn db_to_linear(db: f64) -> f64 {
        10.0_f64.powf(db / 20.0)
    }

    /// Gain change in dB (never positive) for an input level in dB.
    fn compute_gain(&self, input_db: f64) -> f64 {
        let slope = 1.0 - 1.0 / self.ratio;
        if self.knee <= 0.0 {
            return if input_db <= self.threshold {
                0.0
            } else {
                (self.threshold - input_db) * slope
            };
        }

        let half_knee = self.knee / 2.0;
        let knee_start = self.threshold - half_knee;
        if input_db <= knee_start {
            0.0
        } else if input_db >= self.threshold + half_knee {
            (self.threshold - input_db) * slope
        } else {
            // quadratic through the knee
            let x = input_db - knee_start;
            -slope * x * x / (2.0 * self.knee)
        }
    }

    /// Compress one sample; the gain follows a peak envelope of the input.
    #[inline]
    pub fn process(&mut self, input: f64) -> f64 {
        let level = input.abs();
        let coef = if level > self.envelope {
            self.attack_coef
        } else {
            self.release_coef
        };
        self.envelope = coef * self.envelope + (1.0 - coef) * level;

        let gain_db = self.compute_gain(Self::linear_to_db(self.envelope));
        input * Self::db_to_linear(gain_db)
    }

    pub fn process_block(&mut self, block: &mut [f64]) {
        for sample in block.iter_mut() {
            *sample = self.process(*sample);
        }
    }

    /// Current gain reduction in dB (positive), for metering.
    pub fn gain_reduction(&self) -> f64 {
        -self.compute_gain(Self::linear_to_db(self.envelope))
    }

    pub fn reset(&mut self) {
        self.envelope = 0.0;
    }
}
