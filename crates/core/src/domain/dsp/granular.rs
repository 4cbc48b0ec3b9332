//! Granular resynthesis from a continuously fed source buffer

use rand::rngs::StdRng;
use rand::Rng;
use tracing::trace;

use super::circular::CircularBuffer;
use super::{check_shapes, Effect, Result, StageContext};
use crate::domain::audio::AudioBlock;
use crate::domain::params::GranularParams;

/// Source buffer length in seconds
const SOURCE_SECS: f32 = 2.0;

/// Upper bound on simultaneously live grains; spawns beyond it are skipped
pub const MAX_GRAINS: usize = 256;

/// Per-grain output scale
const GRAIN_GAIN: f32 = 0.5;

/// One grain of the source buffer being played back
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grain {
    /// Source buffer index of the first sample
    pub start: usize,
    /// Samples played so far
    pub pos: usize,
    /// Grain length in samples
    pub length: usize,
    /// Output offset within the block
    pub offset: usize,
}

impl Grain {
    pub fn new(start: usize, length: usize, offset: usize) -> Self {
        Self {
            start,
            pos: 0,
            length: length.max(1),
            offset,
        }
    }

    /// Triangular envelope at the current position
    #[inline]
    pub fn envelope(&self) -> f32 {
        1.0 - (2.0 * self.pos as f32 / self.length as f32 - 1.0).abs()
    }

    pub fn is_finished(&self) -> bool {
        self.pos >= self.length
    }
}

/// Granular synthesizer
///
/// Once per block a grain is spawned with probability `density * 0.1`. Every
/// live grain adds its enveloped source samples into the block, wrapping at
/// the block end; grains carry their position over to the next block. The
/// sum is not normalized.
#[derive(Debug, Clone)]
pub struct GranularSynthesizer {
    sample_rate: f32,
    params: GranularParams,
    sources: Vec<CircularBuffer<f32>>,
    grains: Vec<Grain>,
    rng: StdRng,
}

impl GranularSynthesizer {
    pub fn new(ctx: StageContext, params: &GranularParams, rng: StdRng) -> Self {
        let capacity = (ctx.sample_rate * SOURCE_SECS) as usize;
        Self {
            sample_rate: ctx.sample_rate,
            params: params.clamped(),
            sources: vec![CircularBuffer::new(capacity); ctx.channels],
            grains: Vec::with_capacity(MAX_GRAINS),
            rng,
        }
    }

    pub fn set_params(&mut self, params: &GranularParams) {
        self.params = params.clamped();
    }

    /// Grain length in samples for the current parameters
    pub fn grain_length(&self) -> usize {
        ((self.params.grain_size / 1000.0 * self.sample_rate) as usize).max(1)
    }

    pub fn active_grains(&self) -> usize {
        self.grains.len()
    }

    /// Start a grain directly; returns false when the grain pool is full
    pub fn insert_grain(&mut self, grain: Grain) -> bool {
        if self.grains.len() >= MAX_GRAINS {
            return false;
        }
        self.grains.push(grain);
        true
    }

    fn maybe_spawn(&mut self, block_len: usize) {
        let probability = self.params.density * 0.1;
        if self.rng.gen::<f32>() >= probability {
            return;
        }
        let capacity = self.sources.first().map(|s| s.capacity()).unwrap_or(1);
        let start = self.rng.gen_range(0..capacity);
        let offset = (self.rng.gen::<f32>() * self.params.scatter * block_len as f32) as usize;
        let grain = Grain::new(start, self.grain_length(), offset);
        if !self.insert_grain(grain) {
            trace!("Grain pool full, spawn skipped");
        }
    }
}

impl Effect for GranularSynthesizer {
    fn process(&mut self, input: &AudioBlock, output: &mut AudioBlock) -> Result<()> {
        check_shapes(input, output, self.sources.len())?;

        let len = input.frames();
        for (ch, source) in self.sources.iter_mut().enumerate() {
            source.write_block(input.channel(ch));
        }
        output.silence();
        if len == 0 {
            return Ok(());
        }

        self.maybe_spawn(len);

        for grain in self.grains.iter_mut() {
            for j in 0..len {
                if grain.is_finished() {
                    break;
                }
                let gain = grain.envelope() * GRAIN_GAIN;
                let index = (j + grain.offset) % len;
                for (ch, source) in self.sources.iter().enumerate() {
                    output.channel_mut(ch)[index] += source.get(grain.start + grain.pos) * gain;
                }
                grain.pos += 1;
            }
        }
        self.grains.retain(|grain| !grain.is_finished());
        Ok(())
    }

    fn reset(&mut self) {
        self.sources.iter_mut().for_each(CircularBuffer::clear);
        self.grains.clear();
    }

    fn name(&self) -> &'static str {
        "Granular"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::dsp::test_support::*;
    use rand::SeedableRng;

    fn synth(density: f32) -> GranularSynthesizer {
        let params = GranularParams {
            enabled: true,
            density,
            ..GranularParams::default()
        };
        GranularSynthesizer::new(mono_context(512), &params, StdRng::seed_from_u64(7))
    }

    #[test]
    fn test_envelope_shape() {
        let mut grain = Grain::new(0, 10, 0);
        assert_eq!(grain.envelope(), 0.0);
        grain.pos = 5;
        assert_eq!(grain.envelope(), 1.0);
        grain.pos = 10;
        assert_eq!(grain.envelope(), 0.0);
    }

    #[test]
    fn test_grain_retired_after_its_length() {
        let mut granular = synth(0.0);
        assert!(granular.insert_grain(Grain::new(0, 10, 0)));

        let input = AudioBlock::mono(&[1.0; 5]);
        run(&mut granular, &input);
        assert_eq!(granular.active_grains(), 1);

        run(&mut granular, &input);
        assert_eq!(granular.active_grains(), 0);
    }

    #[test]
    fn test_no_contribution_past_grain_length() {
        let mut granular = synth(0.0);
        // feed a constant so the source under the grain is known
        run(&mut granular, &AudioBlock::mono(&[1.0; 512]));
        granular.insert_grain(Grain::new(0, 10, 0));

        let output = run(&mut granular, &AudioBlock::mono(&[1.0; 16]));
        let out = output.channel(0);
        assert!(out[1..10].iter().all(|&s| s > 0.0));
        assert!(out[10..].iter().all(|&s| s == 0.0));
        assert!((out[5] - 0.5).abs() < 1e-6);
        assert_eq!(granular.active_grains(), 0);
    }

    #[test]
    fn test_offset_wraps_within_block() {
        let mut granular = synth(0.0);
        run(&mut granular, &AudioBlock::mono(&[1.0; 512]));
        granular.insert_grain(Grain::new(0, 8, 6));

        let output = run(&mut granular, &AudioBlock::mono(&[1.0; 8]));
        let out = output.channel(0);
        // pos 0 lands at index 6, pos 2.. wraps to the start
        assert_eq!(out[6], 0.0);
        assert!(out[7] > 0.0);
        assert!(out[0] > 0.0);
    }

    #[test]
    fn test_full_density_spawns_every_block() {
        let mut granular = synth(10.0);
        for _ in 0..4 {
            run(&mut granular, &AudioBlock::mono(&[0.1; 512]));
        }
        // 100 ms grains are 4800 samples, so nothing has retired yet
        assert_eq!(granular.active_grains(), 4);
    }

    #[test]
    fn test_zero_density_never_spawns() {
        let mut granular = synth(0.0);
        for _ in 0..100 {
            run(&mut granular, &AudioBlock::mono(&[0.1; 512]));
        }
        assert_eq!(granular.active_grains(), 0);
    }

    #[test]
    fn test_pool_limit() {
        let mut granular = synth(0.0);
        for _ in 0..MAX_GRAINS {
            assert!(granular.insert_grain(Grain::new(0, 1000, 0)));
        }
        assert!(!granular.insert_grain(Grain::new(0, 1000, 0)));
    }
}
