//! Bass/treble shelving pair, the first stage of every enabled chain

use tracing::trace;

use super::biquad::{BiquadCoeffs, BiquadFilter, SHELF_SLOPE_Q};
use super::{check_shapes, Effect, Result, StageContext};
use crate::domain::audio::AudioBlock;
use crate::domain::params::{limits, ShelvingParams};

/// Corner frequency of the bass shelf (Hz)
pub const BASS_FREQ: f32 = 200.0;
/// Corner frequency of the treble shelf (Hz)
pub const TREBLE_FREQ: f32 = 3000.0;

/// Low shelf at 200 Hz followed by a high shelf at 3 kHz
///
/// One filter pair per channel. Gain changes recompute coefficients without
/// clearing filter history.
#[derive(Debug, Clone)]
pub struct ShelvingFilterPair {
    sample_rate: f32,
    params: ShelvingParams,
    low: Vec<BiquadFilter>,
    high: Vec<BiquadFilter>,
}

impl ShelvingFilterPair {
    pub fn new(ctx: StageContext, params: ShelvingParams) -> Self {
        let params = params.clamped();
        let mut pair = Self {
            sample_rate: ctx.sample_rate,
            params,
            low: vec![BiquadFilter::bypass(); ctx.channels],
            high: vec![BiquadFilter::bypass(); ctx.channels],
        };
        pair.update_coefficients();
        pair
    }

    pub fn params(&self) -> ShelvingParams {
        self.params
    }

    /// Set both gains in dB, clamped to [-10, 10]
    pub fn set_params(&mut self, params: ShelvingParams) {
        let params = params.clamped();
        if params != self.params {
            self.params = params;
            self.update_coefficients();
        }
    }

    fn update_coefficients(&mut self) {
        let low = BiquadCoeffs::low_shelf(
            self.sample_rate,
            BASS_FREQ,
            self.params.bass_db.clamp(limits::SHELF_DB_MIN, limits::SHELF_DB_MAX),
            SHELF_SLOPE_Q,
        );
        let high = BiquadCoeffs::high_shelf(
            self.sample_rate,
            TREBLE_FREQ,
            self.params.treble_db.clamp(limits::SHELF_DB_MIN, limits::SHELF_DB_MAX),
            SHELF_SLOPE_Q,
        );
        for filter in &mut self.low {
            filter.set_coeffs(low);
        }
        for filter in &mut self.high {
            filter.set_coeffs(high);
        }

        trace!(
            "Shelving coefficients updated: bass={:.1}dB treble={:.1}dB",
            self.params.bass_db,
            self.params.treble_db
        );
    }
}

impl Effect for ShelvingFilterPair {
    fn process(&mut self, input: &AudioBlock, output: &mut AudioBlock) -> Result<()> {
        check_shapes(input, output, self.low.len())?;

        for ch in 0..input.channels() {
            let out = output.channel_mut(ch);
            self.low[ch].process_into(input.channel(ch), out);
            self.high[ch].process(out);
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.low.iter_mut().for_each(BiquadFilter::reset);
        self.high.iter_mut().for_each(BiquadFilter::reset);
    }

    fn name(&self) -> &'static str {
        "Shelving"
    }
}
