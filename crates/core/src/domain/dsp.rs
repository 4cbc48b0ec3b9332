//! Digital Signal Processing stages for the effect chain
//!
//! Every stage implements [`Effect`] and processes one planar [`AudioBlock`]
//! out-of-place. Stages own all of their state; the graph hands each one a
//! read-only input and a scratch output sized to the same number of frames.
//!
//! All stages are designed for:
//! - Zero allocations in `process` (buffers are sized at construction)
//! - Per-channel state so mono and multi-channel streams behave the same
//! - Bounded time per block

use crate::domain::audio::{AudioBlock, AudioError};

pub mod autotune;
pub mod biquad;
pub mod circular;
pub mod compressor;
pub mod formant;
pub mod granular;
pub mod modulation;
pub mod pitch;
pub mod reverb;
pub mod shelving;
pub mod stretch;
pub mod waveshaper;

pub use autotune::AutoTune;
pub use biquad::{BiquadCoeffs, BiquadFilter};
pub use circular::CircularBuffer;
pub use compressor::DynamicsCompressor;
pub use formant::FormantShifter;
pub use granular::{GranularSynthesizer, Grain};
pub use modulation::{DelayModulator, Lfo, Phaser};
pub use pitch::{resample_into, PitchShifter};
pub use reverb::ConvolutionReverb;
pub use shelving::ShelvingFilterPair;
pub use stretch::TimeStretcher;
pub use waveshaper::Waveshaper;

pub type Result<T> = std::result::Result<T, AudioError>;

/// Core trait for all effect stages
///
/// Samples are f32 normalized to [-1.0, 1.0]. `output` always has the same
/// channel count as `input` and its live length is set to `input.frames()`
/// by the caller.
pub trait Effect: Send {
    /// Process one block
    ///
    /// # Requirements
    /// - No allocations
    /// - Handle any block length up to the capacity the stage was built for
    fn process(&mut self, input: &AudioBlock, output: &mut AudioBlock) -> Result<()>;

    /// Reset effect state to initial conditions
    fn reset(&mut self);

    /// Get effect name for debugging/display
    fn name(&self) -> &'static str;
}

/// Fixed properties of the stream a stage is built for
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageContext {
    pub sample_rate: f32,
    pub channels: usize,
    /// Largest block the stage will ever be handed
    pub max_block: usize,
}

impl StageContext {
    pub fn new(sample_rate: f32, channels: usize, max_block: usize) -> Self {
        Self {
            sample_rate,
            channels,
            max_block,
        }
    }

    /// Nyquist frequency
    pub fn nyquist(&self) -> f32 {
        self.sample_rate * 0.5
    }
}

/// Check the block shapes every stage relies on
#[inline]
pub(crate) fn check_shapes(input: &AudioBlock, output: &AudioBlock, channels: usize) -> Result<()> {
    if input.channels() != channels || output.channels() != channels {
        return Err(AudioError::InvalidBlock(
            "block channel count differs from the stage's",
        ));
    }
    if output.frames() != input.frames() {
        return Err(AudioError::InvalidBlock(
            "output length does not match input length",
        ));
    }
    Ok(())
}
