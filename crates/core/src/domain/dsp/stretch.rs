//! Variable-rate playback through a circular buffer

use super::circular::CircularBuffer;
use super::{check_shapes, Effect, Result, StageContext};
use crate::domain::audio::AudioBlock;
use crate::domain::params::{limits, TimeStretchParams};

/// Default buffer length in seconds
const BUFFER_SECS: f32 = 1.0;

/// Time stretcher
///
/// Each input sample is written to a per-channel circular buffer and each
/// output sample is read at a cursor advancing by `rate`, wrapping at the
/// buffer length. There is no pitch correction, and with a rate other than 1
/// the read cursor eventually laps the write cursor.
#[derive(Debug, Clone)]
pub struct TimeStretcher {
    buffers: Vec<CircularBuffer<f32>>,
    rate: f32,
}

impl TimeStretcher {
    pub fn new(ctx: StageContext, params: &TimeStretchParams) -> Self {
        let capacity = (ctx.sample_rate * BUFFER_SECS) as usize;
        Self::with_capacity(ctx.channels, capacity, params.rate)
    }

    /// Stretcher with an explicit buffer length in samples
    pub fn with_capacity(channels: usize, capacity: usize, rate: f32) -> Self {
        let mut stretcher = Self {
            buffers: vec![CircularBuffer::with_readers(capacity, 1); channels],
            rate: 1.0,
        };
        stretcher.set_rate(rate);
        stretcher
    }

    pub fn set_params(&mut self, params: &TimeStretchParams) {
        self.set_rate(params.rate);
    }

    /// Playback rate, clamped to [0.5, 2.0]
    pub fn set_rate(&mut self, rate: f32) {
        self.rate = if rate.is_nan() {
            1.0
        } else {
            rate.clamp(limits::STRETCH_RATE_MIN, limits::STRETCH_RATE_MAX)
        };
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    /// Read cursor of the first channel
    pub fn read_cursor(&self) -> f64 {
        self.buffers.first().map(|b| b.reader(0)).unwrap_or(0.0)
    }
}

impl Effect for TimeStretcher {
    fn process(&mut self, input: &AudioBlock, output: &mut AudioBlock) -> Result<()> {
        check_shapes(input, output, self.buffers.len())?;

        let rate = self.rate as f64;
        for (ch, buffer) in self.buffers.iter_mut().enumerate() {
            for (out, &x) in output.channel_mut(ch).iter_mut().zip(input.channel(ch)) {
                buffer.push(x);
                *out = buffer.read_reader(0);
                buffer.advance_reader(0, rate);
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.buffers.iter_mut().for_each(CircularBuffer::clear);
    }

    fn name(&self) -> &'static str {
        "TimeStretch"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::dsp::test_support::*;
    use proptest::prelude::*;

    #[test]
    fn test_cursor_advance() {
        let mut stretcher = TimeStretcher::with_capacity(1, 100, 1.5);
        run(&mut stretcher, &AudioBlock::mono(&generate_silence(250)));
        assert!((stretcher.read_cursor() - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_unity_rate_reads_what_was_just_written() {
        let mut stretcher = TimeStretcher::with_capacity(1, 100, 1.0);
        let input: Vec<f32> = (0..50).map(|i| i as f32 / 50.0).collect();
        let output = run(&mut stretcher, &AudioBlock::mono(&input));
        assert_eq!(output.channel(0), &input[..]);
    }

    #[test]
    fn test_rate_clamped() {
        let mut stretcher = TimeStretcher::new(mono_context(64), &TimeStretchParams::default());
        stretcher.set_rate(3.0);
        assert_eq!(stretcher.rate(), 2.0);
        stretcher.set_rate(0.1);
        assert_eq!(stretcher.rate(), 0.5);
    }

    #[test]
    fn test_channels_have_independent_cursors() {
        let mut stretcher = TimeStretcher::with_capacity(2, 64, 0.5);
        let input = AudioBlock::from_channels(&[vec![1.0; 32], vec![-1.0; 32]]);
        let output = run(&mut stretcher, &input);
        assert!(output.channel(0).iter().all(|&s| s >= 0.0));
        assert!(output.channel(1).iter().all(|&s| s <= 0.0));
    }

    proptest! {
        #[test]
        fn prop_cursor_is_rate_times_count(rate in 0.5f32..2.0, count in 1usize..400) {
            let mut stretcher = TimeStretcher::with_capacity(1, 100, rate);
            run(&mut stretcher, &AudioBlock::mono(&vec![0.0; count]));
            let expected = (rate as f64 * count as f64).rem_euclid(100.0);
            let actual = stretcher.read_cursor();
            // wrap-around may land the two on opposite ends of the buffer
            let diff = (actual - expected).abs();
            prop_assert!(diff < 1e-6 || (100.0 - diff) < 1e-6);
        }
    }
}
