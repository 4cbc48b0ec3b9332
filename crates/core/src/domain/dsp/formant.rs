//! Resonant formant filter bank

use tracing::trace;

use super::biquad::{BiquadCoeffs, BiquadFilter};
use super::{check_shapes, Effect, Result, StageContext};
use crate::domain::audio::AudioBlock;
use crate::domain::params::FormantParams;

/// A single vocal formant: band-pass center, Q and output gain
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Formant {
    pub frequency: f32,
    pub q: f32,
    pub gain: f32,
}

/// The three formants of the unshifted bank
pub const FORMANTS: [Formant; 3] = [
    Formant {
        frequency: 500.0,
        q: 10.0,
        gain: 1.0,
    },
    Formant {
        frequency: 1500.0,
        q: 8.0,
        gain: 0.7,
    },
    Formant {
        frequency: 2500.0,
        q: 6.0,
        gain: 0.4,
    },
];

const DRY_GAIN: f32 = 0.3;
const WET_GAIN: f32 = 0.7;

/// Centers are kept below this fraction of the sample rate
const MAX_CENTER_RATIO: f32 = 0.45;

/// Shifts the formant bank by `1.5^shift` and blends it with the input
///
/// Output is `0.3*x + 0.7*Σ gain_k * bp_k(x)`. Every channel has its own
/// band-pass history, kept across blocks.
#[derive(Debug, Clone)]
pub struct FormantShifter {
    sample_rate: f32,
    shift: f32,
    /// `channels * 3` filters, channel-major
    filters: Vec<BiquadFilter>,
    clamped: bool,
}

impl FormantShifter {
    pub fn new(ctx: StageContext, params: &FormantParams) -> Self {
        let mut shifter = Self {
            sample_rate: ctx.sample_rate,
            shift: 0.0,
            filters: vec![BiquadFilter::bypass(); ctx.channels * FORMANTS.len()],
            clamped: false,
        };
        shifter.apply_shift(params.clamped().shift);
        shifter
    }

    pub fn set_params(&mut self, params: &FormantParams) {
        let shift = params.clamped().shift;
        if shift != self.shift {
            self.apply_shift(shift);
        }
    }

    pub fn shift(&self) -> f32 {
        self.shift
    }

    /// True when a shifted center had to be pulled below the Nyquist limit
    pub fn is_clamped(&self) -> bool {
        self.clamped
    }

    /// Shifted center frequencies before clamping
    pub fn centers(shift: f32) -> [f32; 3] {
        let factor = 1.5_f32.powf(shift);
        FORMANTS.map(|f| f.frequency * factor)
    }

    fn apply_shift(&mut self, shift: f32) {
        self.shift = shift;
        let limit = self.sample_rate * MAX_CENTER_RATIO;
        let centers = Self::centers(shift);
        self.clamped = centers.iter().any(|&fc| fc > limit);

        let coeffs: [BiquadCoeffs; 3] = std::array::from_fn(|k| {
            BiquadCoeffs::bandpass(self.sample_rate, centers[k].min(limit), FORMANTS[k].q)
        });
        for (i, filter) in self.filters.iter_mut().enumerate() {
            filter.set_coeffs(coeffs[i % FORMANTS.len()]);
        }
        trace!("Formant shift {} -> centers {:?}", shift, centers);
    }
}

impl Effect for FormantShifter {
    fn process(&mut self, input: &AudioBlock, output: &mut AudioBlock) -> Result<()> {
        let channels = self.filters.len() / FORMANTS.len();
        check_shapes(input, output, channels)?;

        for ch in 0..channels {
            let bank = &mut self.filters[ch * FORMANTS.len()..(ch + 1) * FORMANTS.len()];
            for (out, &x) in output.channel_mut(ch).iter_mut().zip(input.channel(ch)) {
                let mut wet = 0.0;
                for (filter, formant) in bank.iter_mut().zip(FORMANTS.iter()) {
                    wet += formant.gain * filter.process_sample(x);
                }
                *out = DRY_GAIN * x + WET_GAIN * wet;
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.filters.iter_mut().for_each(BiquadFilter::reset);
    }

    fn name(&self) -> &'static str {
        "Formant"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::dsp::test_support::*;

    fn params(shift: f32) -> FormantParams {
        FormantParams {
            enabled: true,
            shift,
        }
    }

    fn steady_peak(output: &AudioBlock) -> f32 {
        output.channel(0)[output.frames() / 2..]
            .iter()
            .map(|s| s.abs())
            .fold(0.0_f32, f32::max)
    }

    #[test]
    fn test_centers_scale_with_shift() {
        let centers = FormantShifter::centers(1.0);
        assert!((centers[0] - 750.0).abs() < 1e-3);
        assert!((centers[1] - 2250.0).abs() < 1e-3);
        assert!((centers[2] - 3750.0).abs() < 1e-3);

        let down = FormantShifter::centers(-2.0);
        assert!((down[0] - 500.0 / 2.25).abs() < 1e-3);
    }

    #[test]
    fn test_resonance_at_first_formant() {
        let mut shifter = FormantShifter::new(mono_context(8192), &params(0.0));
        let output = run(&mut shifter, &AudioBlock::mono(&generate_test_signal(8192, 500.0)));
        // 0.3 dry + 0.7 * (1.0 band-pass at its peak, plus leakage from the others)
        assert!(steady_peak(&output) > 0.95);

        let mut shifter = FormantShifter::new(mono_context(8192), &params(0.0));
        let output = run(&mut shifter, &AudioBlock::mono(&generate_test_signal(8192, 60.0)));
        assert!(steady_peak(&output) < 0.45);
    }

    #[test]
    fn test_history_persists_across_blocks() {
        let signal = generate_test_signal(1024, 500.0);

        let mut whole = FormantShifter::new(mono_context(1024), &params(0.5));
        let expected = run(&mut whole, &AudioBlock::mono(&signal));

        let mut split = FormantShifter::new(mono_context(1024), &params(0.5));
        let first = run(&mut split, &AudioBlock::mono(&signal[..512]));
        let second = run(&mut split, &AudioBlock::mono(&signal[512..]));

        assert_eq!(&expected.channel(0)[..512], first.channel(0));
        assert_eq!(&expected.channel(0)[512..], second.channel(0));
    }

    #[test]
    fn test_low_sample_rate_clamps_centers() {
        let ctx = StageContext::new(8000.0, 1, 256);
        let mut shifter = FormantShifter::new(ctx, &params(2.0));
        assert!(shifter.is_clamped());

        let output = run(&mut shifter, &AudioBlock::mono(&generate_test_signal(256, 440.0)));
        assert!(output.channel(0).iter().all(|s| s.is_finite()));

        shifter.set_params(&params(0.0));
        assert!(!shifter.is_clamped());
    }
}
