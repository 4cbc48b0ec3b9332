//! Block resampling pitch shift

use super::{check_shapes, Effect, Result, StageContext};
use crate::domain::audio::AudioBlock;
use crate::domain::params::PitchShiftParams;

/// Resample `input` into `output` at `ratio`
///
/// Output sample `i` reads input position `i / ratio` with linear
/// interpolation. Positions past the end of `input` read as silence, so the
/// output always has exactly `output.len()` samples. A ratio of 1.0 copies
/// the input unchanged.
pub fn resample_into(input: &[f32], output: &mut [f32], ratio: f32) {
    if !(ratio.is_finite() && ratio > 0.0) {
        output.fill(0.0);
        return;
    }
    let step = 1.0 / ratio as f64;
    for (i, out) in output.iter_mut().enumerate() {
        let pos = i as f64 * step;
        let index = pos.floor() as usize;
        let frac = (pos - index as f64) as f32;
        let a = input.get(index).copied().unwrap_or(0.0);
        let b = input.get(index + 1).copied().unwrap_or(0.0);
        *out = if frac == 0.0 { a } else { a + (b - a) * frac };
    }
}

/// Pitch shifter that resamples each block in isolation
///
/// Read positions advance by `1 / ratio` per output sample. A ratio above 1
/// only reaches the head of each block; below 1 the reads run past the end
/// and the tail of the block falls silent.
#[derive(Debug, Clone)]
pub struct PitchShifter {
    channels: usize,
    ratio: f32,
}

impl PitchShifter {
    pub fn new(ctx: StageContext, params: &PitchShiftParams) -> Self {
        Self {
            channels: ctx.channels,
            ratio: params.clamped().pitch_ratio(),
        }
    }

    pub fn set_params(&mut self, params: &PitchShiftParams) {
        self.ratio = params.clamped().pitch_ratio();
    }

    /// `2^(semitones/12)`
    pub fn ratio(&self) -> f32 {
        self.ratio
    }
}

impl Effect for PitchShifter {
    fn process(&mut self, input: &AudioBlock, output: &mut AudioBlock) -> Result<()> {
        check_shapes(input, output, self.channels)?;

        for ch in 0..self.channels {
            resample_into(input.channel(ch), output.channel_mut(ch), self.ratio);
        }
        Ok(())
    }

    fn reset(&mut self) {}

    fn name(&self) -> &'static str {
        "PitchShift"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::dsp::test_support::*;
    use proptest::prelude::*;

    #[test]
    fn test_unity_ratio_is_identity() {
        let input = generate_test_signal(256, 440.0);
        let mut output = vec![0.0; 256];
        resample_into(&input, &mut output, 1.0);
        assert_eq!(input, output);
    }

    #[test]
    fn test_read_positions() {
        let input = [0.0, 1.0, 2.0, 3.0];
        let mut output = [0.0; 4];

        resample_into(&input, &mut output, 2.0);
        assert_eq!(output, [0.0, 0.5, 1.0, 1.5]);

        resample_into(&input, &mut output, 0.5);
        // positions 0, 2, 4, 6; the last two are past the block
        assert_eq!(output, [0.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn test_output_length_matches_input() {
        for semitones in [12.0, -12.0] {
            let params = PitchShiftParams {
                enabled: true,
                semitones,
            };
            let mut shifter = PitchShifter::new(mono_context(1000), &params);
            let input = AudioBlock::mono(&generate_test_signal(1000, 440.0));
            let output = run(&mut shifter, &input);
            assert_eq!(output.frames(), 1000);
        }
    }

    #[test]
    fn test_invalid_ratio_gives_silence() {
        let mut output = [1.0; 4];
        resample_into(&[1.0; 4], &mut output, 0.0);
        assert_eq!(output, [0.0; 4]);
    }

    proptest! {
        #[test]
        fn prop_length_preserved(
            ratio in 0.25f32..4.0,
            samples in proptest::collection::vec(-1.0f32..1.0, 1..512),
        ) {
            let mut output = vec![f32::NAN; samples.len()];
            resample_into(&samples, &mut output, ratio);
            prop_assert!(output.iter().all(|s| s.is_finite() && s.abs() <= 1.0));
        }
    }
}
