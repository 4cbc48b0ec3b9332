//! Table-driven waveshaping distortion

use std::f32::consts::PI;

use super::{check_shapes, Effect, Result, StageContext};
use crate::domain::audio::AudioBlock;
use crate::domain::params::{DistortionParams, Oversample};

/// Number of entries in the transfer curve
pub const CURVE_SIZE: usize = 44100;

/// Upper bound for `k`; the curve degenerates as `k` approaches 100
const AMOUNT_MAX: f32 = 99.9;

/// Transfer curve `(3+k)*x*20*deg / (π + k*|x|)` sampled over x ∈ [-1, 1]
pub fn make_curve(amount: f32) -> Vec<f32> {
    let k = if amount.is_nan() {
        0.0
    } else {
        amount.clamp(0.0, AMOUNT_MAX)
    };
    let deg = PI / 180.0;
    (0..CURVE_SIZE)
        .map(|i| {
            let x = i as f32 * 2.0 / CURVE_SIZE as f32 - 1.0;
            (3.0 + k) * x * 20.0 * deg / (PI + k * x.abs())
        })
        .collect()
}

/// Waveshaper with optional linear-interpolation oversampling
///
/// The curve is fixed for the lifetime of the stage; a new `amount` builds a
/// new stage. The oversampling factor can change in place.
#[derive(Debug, Clone)]
pub struct Waveshaper {
    amount: f32,
    curve: Vec<f32>,
    oversample: Oversample,
    /// Previous input sample per channel, start point of the sub-sample ramp
    previous: Vec<f32>,
}

impl Waveshaper {
    pub fn new(ctx: StageContext, params: &DistortionParams) -> Self {
        let params = params.clamped();
        Self {
            amount: params.amount,
            curve: make_curve(params.amount),
            oversample: params.oversample,
            previous: vec![0.0; ctx.channels],
        }
    }

    pub fn amount(&self) -> f32 {
        self.amount
    }

    pub fn oversample(&self) -> Oversample {
        self.oversample
    }

    pub fn set_oversample(&mut self, oversample: Oversample) {
        self.oversample = oversample;
    }

    /// Look up the curve at `v`, clamped to [-1, 1], interpolating between entries
    #[inline]
    pub fn shape(&self, v: f32) -> f32 {
        let v = if v.is_nan() { 0.0 } else { v.clamp(-1.0, 1.0) };
        let pos = (v + 1.0) * 0.5 * (CURVE_SIZE - 1) as f32;
        let index = (pos as usize).min(CURVE_SIZE - 2);
        let frac = pos - index as f32;
        let a = self.curve[index];
        let b = self.curve[index + 1];
        a + (b - a) * frac
    }
}

impl Effect for Waveshaper {
    fn process(&mut self, input: &AudioBlock, output: &mut AudioBlock) -> Result<()> {
        check_shapes(input, output, self.previous.len())?;

        let factor = self.oversample.factor();
        let step = 1.0 / factor as f32;

        for ch in 0..input.channels() {
            let mut prev = self.previous[ch];
            for (out, &x) in output.channel_mut(ch).iter_mut().zip(input.channel(ch)) {
                *out = if factor == 1 {
                    self.shape(x)
                } else {
                    let mut sum = 0.0;
                    for j in 1..=factor {
                        sum += self.shape(prev + (x - prev) * j as f32 * step);
                    }
                    sum * step
                };
                prev = x;
            }
            self.previous[ch] = prev;
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.previous.fill(0.0);
    }

    fn name(&self) -> &'static str {
        "Distortion"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::dsp::test_support::*;
    use proptest::prelude::*;

    fn params(amount: f32, oversample: Oversample) -> DistortionParams {
        DistortionParams {
            enabled: true,
            amount,
            oversample,
        }
    }

    #[test]
    fn test_curve_shape() {
        let curve = make_curve(50.0);
        assert_eq!(curve.len(), CURVE_SIZE);
        assert!((curve[0] + curve[CURVE_SIZE - 1]).abs() < 1e-3);
        assert!(curve[CURVE_SIZE / 2].abs() < 1e-3);
        // monotonic
        assert!(curve.windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn test_amount_is_clamped() {
        let curve = make_curve(500.0);
        let expected = make_curve(99.9);
        assert_eq!(curve, expected);
    }

    #[test]
    fn test_shape_clamps_input() {
        let shaper = Waveshaper::new(mono_context(16), &params(20.0, Oversample::None));
        assert_eq!(shaper.shape(5.0), shaper.shape(1.0));
        assert_eq!(shaper.shape(-5.0), shaper.shape(-1.0));
        assert!(shaper.shape(f32::NAN).is_finite());
    }

    #[test]
    fn test_oversampling_constant_input_matches_direct() {
        let ctx = mono_context(64);
        let mut direct = Waveshaper::new(ctx, &params(30.0, Oversample::None));
        let mut over = Waveshaper::new(ctx, &params(30.0, Oversample::X4));

        // after the first sample the ramp is flat, so both agree
        let input = AudioBlock::mono(&[0.4; 64]);
        let a = run(&mut direct, &input);
        let b = run(&mut over, &input);
        for i in 1..64 {
            assert!((a.channel(0)[i] - b.channel(0)[i]).abs() < 1e-6);
        }
    }

    proptest! {
        #[test]
        fn prop_output_bounded(
            amount in 0.0f32..100.0,
            samples in proptest::collection::vec(-2.0f32..2.0, 1..128),
        ) {
            for oversample in [Oversample::None, Oversample::X2, Oversample::X4] {
                let mut shaper = Waveshaper::new(mono_context(128), &params(amount, oversample));
                let output = run(&mut shaper, &AudioBlock::mono(&samples));
                prop_assert_eq!(output.frames(), samples.len());
                prop_assert!(output.channel(0).iter().all(|s| s.is_finite() && s.abs() <= 2.0));
            }
        }
    }
}
