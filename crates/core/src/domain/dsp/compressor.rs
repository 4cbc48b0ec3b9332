//! Feed-forward peak compressor

use tracing::trace;

use super::{check_shapes, Effect, Result, StageContext};
use crate::domain::audio::AudioBlock;
use crate::domain::params::{limits, CompressorParams};

/// Floor used when converting silence to dB
const DB_FLOOR: f32 = -100.0;

/// Attack/release shorter than this behave as instantaneous
const MIN_TIME: f32 = 1e-6;

/// Dynamic range compressor
///
/// Reduces the dynamic range of audio signals by attenuating signals above a
/// threshold. One envelope follower per channel.
#[derive(Debug, Clone)]
pub struct DynamicsCompressor {
    sample_rate: f32,
    params: CompressorParams,
    // Coefficients (pre-computed for performance)
    attack_coeff: f32,
    release_coeff: f32,
    envelopes: Vec<f32>,
}

impl DynamicsCompressor {
    pub fn new(ctx: StageContext, params: CompressorParams) -> Self {
        let mut comp = Self {
            sample_rate: ctx.sample_rate,
            params: params.clamped(),
            attack_coeff: 0.0,
            release_coeff: 0.0,
            envelopes: vec![0.0; ctx.channels],
        };
        comp.update_coefficients();
        comp
    }

    pub fn params(&self) -> CompressorParams {
        self.params
    }

    /// Set all parameters at once
    pub fn set_params(&mut self, params: CompressorParams) {
        self.params = params.clamped();
        self.update_coefficients();
    }

    /// Update envelope filter coefficients
    fn update_coefficients(&mut self) {
        // exp(-1/(time * sample_rate)) gives a one-pole smoother per time constant
        self.attack_coeff = Self::time_coeff(self.params.attack, self.sample_rate);
        self.release_coeff = Self::time_coeff(self.params.release, self.sample_rate);
        trace!(
            "Compressor coefficients: threshold={}dB ratio={} attack={} release={}",
            self.params.threshold,
            self.params.ratio,
            self.attack_coeff,
            self.release_coeff
        );
    }

    fn time_coeff(time: f32, sample_rate: f32) -> f32 {
        let time = time.clamp(MIN_TIME, limits::TIME_MAX);
        (-1.0 / (time * sample_rate)).exp()
    }

    /// Calculate gain reduction for a given input level
    ///
    /// Returns the linear gain to apply (1.0 = no reduction)
    #[inline]
    fn calculate_gain(&self, input_level_db: f32) -> f32 {
        if input_level_db <= self.params.threshold {
            return 1.0;
        }

        let over_threshold = input_level_db - self.params.threshold;
        let gain_reduction_db = over_threshold * (1.0 - 1.0 / self.params.ratio);

        10.0_f32.powf(-gain_reduction_db / 20.0)
    }

    /// Update envelope follower (peak detection with smoothing)
    #[inline]
    fn update_envelope(&self, input_sample: f32, envelope: f32) -> f32 {
        let input_level = input_sample.abs();

        // Use attack coefficient for rising, release for falling
        let coeff = if input_level > envelope {
            self.attack_coeff
        } else {
            self.release_coeff
        };

        coeff * envelope + (1.0 - coeff) * input_level
    }

    /// Convert linear amplitude to dB (with minimum floor)
    #[inline]
    fn to_db(level: f32) -> f32 {
        if level < 1e-5 {
            DB_FLOOR
        } else {
            20.0 * level.log10()
        }
    }
}

impl Effect for DynamicsCompressor {
    fn process(&mut self, input: &AudioBlock, output: &mut AudioBlock) -> Result<()> {
        check_shapes(input, output, self.envelopes.len())?;

        for ch in 0..input.channels() {
            let mut envelope = self.envelopes[ch];
            for (out, &x) in output.channel_mut(ch).iter_mut().zip(input.channel(ch)) {
                envelope = self.update_envelope(x, envelope);
                *out = x * self.calculate_gain(Self::to_db(envelope));
            }
            self.envelopes[ch] = envelope;
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.envelopes.fill(0.0);
    }

    fn name(&self) -> &'static str {
        "Compressor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::dsp::test_support::*;

    #[test]
    fn test_quiet_signal_untouched() {
        let mut comp = DynamicsCompressor::new(mono_context(1024), CompressorParams::default());
        let signal: Vec<f32> = generate_test_signal(1024, 440.0)
            .into_iter()
            .map(|s| s * 0.01)
            .collect();
        let input = AudioBlock::mono(&signal);
        let output = run(&mut comp, &input);
        assert_eq!(input.channel(0), output.channel(0));
    }

    #[test]
    fn test_loud_signal_reduced() {
        let params = CompressorParams {
            enabled: true,
            threshold: -20.0,
            ratio: 10.0,
            attack: 0.001,
            release: 0.1,
        };
        let mut comp = DynamicsCompressor::new(mono_context(4800), params);
        let input = AudioBlock::mono(&generate_test_signal(4800, 440.0));
        let output = run(&mut comp, &input);

        let tail_peak = output.channel(0)[2400..]
            .iter()
            .map(|s| s.abs())
            .fold(0.0_f32, f32::max);
        assert!(tail_peak < 0.5, "peak {}", tail_peak);
    }

    #[test]
    fn test_zero_attack_is_finite() {
        let params = CompressorParams {
            attack: 0.0,
            release: 0.0,
            ..CompressorParams::default()
        };
        let mut comp = DynamicsCompressor::new(mono_context(256), params);
        let input = AudioBlock::mono(&generate_test_signal(256, 440.0));
        let output = run(&mut comp, &input);
        assert!(output.channel(0).iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_reset_clears_envelopes() {
        let mut comp = DynamicsCompressor::new(mono_context(256), CompressorParams::default());
        run(&mut comp, &AudioBlock::mono(&[0.9; 256]));
        comp.reset();
        assert!(comp.envelopes.iter().all(|&e| e == 0.0));
    }
}
