//! Zero-crossing pitch correction
//!
//! The mono sum of the input is collected in a 2048-sample detection buffer.
//! Each time the buffer fills, the zero crossings in it give a pitch
//! estimate, which is snapped to the nearest note of the configured scale.
//! Blocks are then resampled toward the target by the correction amount.

use tracing::trace;

use super::circular::CircularBuffer;
use super::pitch::resample_into;
use super::{check_shapes, Effect, Result, StageContext};
use crate::domain::audio::AudioBlock;
use crate::domain::params::{AutoTuneParams, Scale};

/// Detection buffer length in samples
pub const DETECTION_SIZE: usize = 2048;

/// Lowest accepted pitch estimate (Hz)
pub const MIN_PITCH: f32 = 50.0;
/// Highest accepted pitch estimate (Hz)
pub const MAX_PITCH: f32 = 2000.0;

/// Count sign changes between consecutive samples
///
/// Zero counts as positive.
pub fn count_zero_crossings(samples: impl IntoIterator<Item = f32>) -> usize {
    let mut iter = samples.into_iter();
    let Some(mut prev) = iter.next() else {
        return 0;
    };
    let mut crossings = 0;
    for sample in iter {
        if (prev >= 0.0) != (sample >= 0.0) {
            crossings += 1;
        }
        prev = sample;
    }
    crossings
}

/// Pitch estimate from a zero-crossing count over `samples` samples
///
/// Returns `None` outside the accepted [50, 2000] Hz range.
pub fn estimate_pitch(crossings: usize, samples: usize, sample_rate: f32) -> Option<f32> {
    let duration = samples as f32 / sample_rate;
    let frequency = crossings as f32 / (2.0 * duration);
    (MIN_PITCH..=MAX_PITCH)
        .contains(&frequency)
        .then_some(frequency)
}

/// Fractional MIDI note number of a frequency
pub fn freq_to_midi(frequency: f32) -> f32 {
    69.0 + 12.0 * (frequency / 440.0).log2()
}

pub fn midi_to_freq(note: f32) -> f32 {
    440.0 * 2.0_f32.powf((note - 69.0) / 12.0)
}

/// Frequency of the scale note nearest to `frequency`
///
/// Candidates are the notes within six semitones of the rounded MIDI note
/// whose pitch class, relative to `key`, belongs to `scale`.
pub fn snap_to_scale(frequency: f32, scale: Scale, key: u8) -> f32 {
    let midi = freq_to_midi(frequency);
    let rounded = midi.round() as i32;
    let key = i32::from(key % 12);
    let intervals = scale.intervals();

    let mut best = rounded;
    let mut best_distance = f32::MAX;
    for note in rounded - 6..=rounded + 6 {
        let degree = (note - key).rem_euclid(12);
        if !intervals.contains(&degree) {
            continue;
        }
        let distance = (note as f32 - midi).abs();
        if distance < best_distance {
            best = note;
            best_distance = distance;
        }
    }
    midi_to_freq(best as f32)
}

/// Pitch corrector driven by zero-crossing detection
#[derive(Debug, Clone)]
pub struct AutoTune {
    sample_rate: f32,
    channels: usize,
    params: AutoTuneParams,
    detection: CircularBuffer<f32>,
    /// Last accepted pitch estimate; 0 until the first valid detection
    current_pitch: f32,
    target_pitch: f32,
}

impl AutoTune {
    pub fn new(ctx: StageContext, params: &AutoTuneParams) -> Self {
        Self {
            sample_rate: ctx.sample_rate,
            channels: ctx.channels,
            params: params.clamped(),
            detection: CircularBuffer::new(DETECTION_SIZE),
            current_pitch: 0.0,
            target_pitch: 0.0,
        }
    }

    pub fn set_params(&mut self, params: &AutoTuneParams) {
        self.params = params.clamped();
        if self.current_pitch > 0.0 {
            self.target_pitch = snap_to_scale(self.current_pitch, self.params.scale, self.params.key);
        }
    }

    pub fn current_pitch(&self) -> f32 {
        self.current_pitch
    }

    pub fn target_pitch(&self) -> f32 {
        self.target_pitch
    }

    /// Resampling ratio applied to the next block
    pub fn blended_ratio(&self) -> f32 {
        if self.current_pitch <= 0.0 {
            return 1.0;
        }
        1.0 + (self.target_pitch / self.current_pitch - 1.0) * self.params.amount
    }

    fn detect(&mut self) {
        let crossings =
            count_zero_crossings((0..DETECTION_SIZE).map(|i| self.detection.get(i)));
        if let Some(pitch) = estimate_pitch(crossings, DETECTION_SIZE, self.sample_rate) {
            self.current_pitch = pitch;
            self.target_pitch = snap_to_scale(pitch, self.params.scale, self.params.key);
            trace!(
                "Auto-tune detected {:.1} Hz, target {:.1} Hz",
                self.current_pitch,
                self.target_pitch
            );
        }
    }

    /// Feed the block's mono sum into the detection buffer
    fn accumulate(&mut self, input: &AudioBlock) {
        let scale = 1.0 / self.channels as f32;
        for i in 0..input.frames() {
            let sum: f32 = (0..self.channels).map(|ch| input.channel(ch)[i]).sum();
            self.detection.push(sum * scale);
            if self.detection.write_pos() == 0 {
                self.detect();
            }
        }
    }
}

impl Effect for AutoTune {
    fn process(&mut self, input: &AudioBlock, output: &mut AudioBlock) -> Result<()> {
        check_shapes(input, output, self.channels)?;

        // the ratio used for this block is the one known before it arrived
        let ratio = self.blended_ratio();
        let passthrough = self.current_pitch <= 0.0;

        for ch in 0..self.channels {
            if passthrough {
                output.channel_mut(ch).copy_from_slice(input.channel(ch));
            } else {
                resample_into(input.channel(ch), output.channel_mut(ch), ratio);
            }
        }

        self.accumulate(input);
        Ok(())
    }

    fn reset(&mut self) {
        self.detection.clear();
        self.current_pitch = 0.0;
        self.target_pitch = 0.0;
    }

    fn name(&self) -> &'static str {
        "AutoTune"
    }
}
