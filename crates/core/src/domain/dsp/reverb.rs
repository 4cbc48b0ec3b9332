//! Convolution reverb with a generated noise impulse response
//!
//! The first `P` taps of the impulse response are convolved directly in the
//! time domain, so the wet signal has no added latency. The remaining taps
//! use uniformly partitioned overlap-save: they are cut into partitions of
//! `P` samples, each transformed once at creation to a spectrum of size `2P`.
//! Every `P` input samples one forward FFT, one multiply-accumulate over the
//! partitions and one inverse FFT produce the tail for the next `P` output
//! samples, so the work per block is bounded regardless of the response
//! length.

use std::sync::Arc;

use num_complex::Complex;
use rand::rngs::StdRng;
use rand::Rng;
use rustfft::{Fft, FftPlanner};
use tracing::debug;

use super::{check_shapes, Effect, Result, StageContext};
use crate::domain::audio::{AudioBlock, AudioError};
use crate::domain::params::ReverbParams;

/// Impulse response channel count
pub const IR_CHANNELS: usize = 2;

/// Generate one channel of `sample = uniform(-1,1) * (1 - n/len)^decay`
pub fn generate_impulse_response(rng: &mut StdRng, length: usize, decay: f32) -> Vec<f32> {
    (0..length)
        .map(|n| {
            let envelope = (1.0 - n as f32 / length as f32).powf(decay);
            rng.gen_range(-1.0_f32..1.0) * envelope
        })
        .collect()
}

/// Scale `responses` by one common factor so their mean energy is 1
///
/// Stereo balance is preserved. All-zero responses are left alone.
pub fn normalize_responses(responses: &mut [Vec<f32>]) {
    if responses.is_empty() {
        return;
    }
    let energy: f32 = responses
        .iter()
        .flat_map(|response| response.iter())
        .map(|h| h * h)
        .sum::<f32>()
        / responses.len() as f32;
    if energy > 0.0 && energy.is_finite() {
        let scale = energy.sqrt().recip();
        for h in responses.iter_mut().flat_map(|response| response.iter_mut()) {
            *h *= scale;
        }
    }
}

/// Streaming state for one input channel
#[derive(Debug, Clone)]
struct ChannelState {
    /// Last `P` input samples for the direct head, each stored twice so the
    /// newest `P` are always one contiguous slice
    recent: Vec<f32>,
    /// Slot of the newest sample in the first half of `recent`
    newest: usize,
    /// Previous and current input partitions, `2P` samples
    frame: Vec<f32>,
    /// Frequency-domain delay line of past input spectra
    history: Vec<Vec<Complex<f32>>>,
    /// Slot of the newest spectrum in `history`
    head: usize,
    /// Tail contribution for the partition being played out
    output: Vec<f32>,
    /// Samples consumed in the current partition
    pos: usize,
}

impl ChannelState {
    fn new(partition: usize, tail_partitions: usize) -> Self {
        Self {
            recent: vec![0.0; 2 * partition],
            newest: 0,
            frame: vec![0.0; 2 * partition],
            history: vec![vec![Complex::new(0.0, 0.0); 2 * partition]; tail_partitions],
            head: 0,
            output: vec![0.0; partition],
            pos: 0,
        }
    }

    fn clear(&mut self) {
        self.recent.fill(0.0);
        self.newest = 0;
        self.frame.fill(0.0);
        for spectrum in &mut self.history {
            spectrum.fill(Complex::new(0.0, 0.0));
        }
        self.head = 0;
        self.output.fill(0.0);
        self.pos = 0;
    }
}

/// Zero-latency partitioned convolution reverb
pub struct ConvolutionReverb {
    partition: usize,
    ir_length: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    /// First `P` taps of each response, reversed and zero padded
    direct: Vec<Vec<f32>>,
    /// `[ir_channel][partition][bin]` for every partition after the first
    filters: Vec<Vec<Vec<Complex<f32>>>>,
    tail_partitions: usize,
    channels: Vec<ChannelState>,
    work: Vec<Complex<f32>>,
    accumulator: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl std::fmt::Debug for ConvolutionReverb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConvolutionReverb")
            .field("partition", &self.partition)
            .field("ir_length", &self.ir_length)
            .field("tail_partitions", &self.tail_partitions)
            .field("channels", &self.channels.len())
            .finish()
    }
}

impl ConvolutionReverb {
    /// Generate a stereo impulse response from `params` and build the reverb
    ///
    /// The generated responses are normalized to unit energy so the wet
    /// signal stays at the level of the input.
    ///
    /// # Errors
    /// `UnsupportedConfiguration` when the duration yields an empty response.
    pub fn new(
        ctx: StageContext,
        params: &ReverbParams,
        partition: usize,
        rng: &mut StdRng,
    ) -> Result<Self> {
        let params = params.clamped();
        let length = (params.duration * ctx.sample_rate) as usize;
        let mut responses: Vec<Vec<f32>> = (0..IR_CHANNELS)
            .map(|_| generate_impulse_response(rng, length, params.decay))
            .collect();
        normalize_responses(&mut responses);
        Self::from_impulse_responses(ctx, &responses, partition)
    }

    /// Build from explicit impulse responses, used as given
    ///
    /// Channel `c` uses response `c % n`.
    pub fn from_impulse_responses(
        ctx: StageContext,
        responses: &[Vec<f32>],
        partition: usize,
    ) -> Result<Self> {
        let ir_length = responses.iter().map(Vec::len).max().unwrap_or(0);
        if ir_length == 0 {
            return Err(AudioError::UnsupportedConfiguration(
                "reverb impulse response is empty".to_string(),
            ));
        }
        if partition == 0 {
            return Err(AudioError::InvalidConfiguration(
                "reverb partition size must be positive".to_string(),
            ));
        }

        let fft_size = 2 * partition;
        let mut planner = FftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(fft_size);
        let inverse = planner.plan_fft_inverse(fft_size);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());
        let mut scratch = vec![Complex::new(0.0, 0.0); scratch_len];

        let direct = responses
            .iter()
            .map(|response| {
                let mut taps = vec![0.0; partition];
                for (tap, &h) in taps.iter_mut().rev().zip(response.iter().take(partition)) {
                    *tap = h;
                }
                taps
            })
            .collect();

        let tail_partitions = ir_length.div_ceil(partition) - 1;
        let filters = responses
            .iter()
            .map(|response| {
                (1..=tail_partitions)
                    .map(|k| {
                        let mut spectrum = vec![Complex::new(0.0, 0.0); fft_size];
                        let start = (k * partition).min(response.len());
                        let end = ((k + 1) * partition).min(response.len());
                        for (bin, &h) in spectrum.iter_mut().zip(&response[start..end]) {
                            *bin = Complex::new(h, 0.0);
                        }
                        forward.process_with_scratch(&mut spectrum, &mut scratch);
                        spectrum
                    })
                    .collect()
            })
            .collect();

        debug!(
            "Convolution reverb: {} samples, direct head of {} plus {} partitions",
            ir_length, partition, tail_partitions
        );

        Ok(Self {
            partition,
            ir_length,
            forward,
            inverse,
            direct,
            filters,
            tail_partitions,
            channels: vec![ChannelState::new(partition, tail_partitions); ctx.channels],
            work: vec![Complex::new(0.0, 0.0); fft_size],
            accumulator: vec![Complex::new(0.0, 0.0); fft_size],
            scratch,
        })
    }

    pub fn ir_length(&self) -> usize {
        self.ir_length
    }

    /// Convolve one full partition of channel `ch` against the tail filters
    fn convolve_partition(&mut self, ch: usize) {
        let partition = self.partition;
        let fft_size = 2 * partition;
        let filter = &self.filters[ch % self.filters.len()];
        let state = &mut self.channels[ch];

        for (bin, &x) in self.work.iter_mut().zip(&state.frame) {
            *bin = Complex::new(x, 0.0);
        }
        self.forward.process_with_scratch(&mut self.work, &mut self.scratch);

        let slots = state.history.len();
        state.head = (state.head + 1) % slots;
        state.history[state.head].copy_from_slice(&self.work);

        // real input: only bins 0..=P are computed, the rest mirror them
        let half = partition + 1;
        self.accumulator[..half].fill(Complex::new(0.0, 0.0));
        for (k, spectrum) in filter.iter().enumerate() {
            let past = &state.history[(state.head + slots - k) % slots];
            for bin in 0..half {
                self.accumulator[bin] += past[bin] * spectrum[bin];
            }
        }
        for bin in 1..partition {
            self.accumulator[fft_size - bin] = self.accumulator[bin].conj();
        }

        self.inverse
            .process_with_scratch(&mut self.accumulator, &mut self.scratch);

        // the block delay of overlap-save lines the tail up with taps P..
        let scale = 1.0 / fft_size as f32;
        for (out, y) in state.output.iter_mut().zip(&self.accumulator[partition..]) {
            *out = y.re * scale;
        }
        state.frame.copy_within(partition.., 0);
    }
}

impl Effect for ConvolutionReverb {
    fn process(&mut self, input: &AudioBlock, output: &mut AudioBlock) -> Result<()> {
        check_shapes(input, output, self.channels.len())?;

        let partition = self.partition;
        for ch in 0..self.channels.len() {
            let ir = ch % self.direct.len();
            for i in 0..input.frames() {
                let x = input.channel(ch)[i];
                let state = &mut self.channels[ch];

                let newest = (state.newest + 1) % partition;
                state.newest = newest;
                state.recent[newest] = x;
                state.recent[newest + partition] = x;
                let mut y: f32 = self.direct[ir]
                    .iter()
                    .zip(&state.recent[newest + 1..=newest + partition])
                    .map(|(h, s)| h * s)
                    .sum();

                if self.tail_partitions > 0 {
                    let pos = state.pos;
                    state.frame[partition + pos] = x;
                    y += state.output[pos];
                    state.pos += 1;
                    if state.pos == partition {
                        state.pos = 0;
                        self.convolve_partition(ch);
                    }
                }
                output.channel_mut(ch)[i] = y;
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.channels.iter_mut().for_each(ChannelState::clear);
    }

    fn name(&self) -> &'static str {
        "Reverb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::dsp::test_support::*;
    use rand::SeedableRng;

    fn direct_convolution(input: &[f32], ir: &[f32], len: usize) -> Vec<f32> {
        (0..len)
            .map(|n| {
                ir.iter()
                    .enumerate()
                    .filter(|(k, _)| *k <= n && n - k < input.len())
                    .map(|(k, h)| h * input[n - k])
                    .sum()
            })
            .collect()
    }

    #[test]
    fn test_impulse_returns_response_without_delay() {
        let ir = vec![1.0, 0.5, 0.25, 0.0, 0.0, -0.5];
        let mut reverb =
            ConvolutionReverb::from_impulse_responses(mono_context(16), &[ir.clone()], 4).unwrap();

        let output = run(&mut reverb, &AudioBlock::mono(&impulse(16)));
        let out = output.channel(0);
        for (k, &h) in ir.iter().enumerate() {
            assert!((out[k] - h).abs() < 1e-5, "tap {}", k);
        }
        assert!(out[ir.len()..].iter().all(|s| s.abs() < 1e-5));
    }

    #[test]
    fn test_response_shorter_than_partition() {
        let ir = vec![0.0, 0.5];
        let mut reverb =
            ConvolutionReverb::from_impulse_responses(mono_context(8), &[ir], 64).unwrap();
        let input = [1.0, 0.0, -1.0, 0.0];
        let output = run(&mut reverb, &AudioBlock::mono(&input));
        assert_eq!(output.channel(0), &[0.0, 0.5, 0.0, -0.5]);
    }

    #[test]
    fn test_matches_direct_convolution_across_partitions() {
        let mut rng = StdRng::seed_from_u64(3);
        let ir = generate_impulse_response(&mut rng, 70, 2.0);
        let input = generate_test_signal(200, 1000.0);

        let mut reverb =
            ConvolutionReverb::from_impulse_responses(mono_context(64), &[ir.clone()], 16)
                .unwrap();
        // odd chunk sizes exercise partitions spanning blocks
        let mut output = Vec::new();
        for chunk in input.chunks(37) {
            output.extend_from_slice(run(&mut reverb, &AudioBlock::mono(chunk)).channel(0));
        }

        let expected = direct_convolution(&input, &ir, input.len());
        for (n, want) in expected.iter().enumerate() {
            assert!((output[n] - want).abs() < 1e-3, "sample {}", n);
        }
    }

    #[test]
    fn test_normalized_responses_have_unit_mean_energy() {
        let mut responses = vec![vec![3.0, 4.0], vec![0.0, 5.0]];
        normalize_responses(&mut responses);
        let energy: f32 = responses.iter().flatten().map(|h| h * h).sum();
        assert!((energy / 2.0 - 1.0).abs() < 1e-5);
        // one common factor keeps the channel balance
        assert!((responses[0][1] - responses[1][1] * 0.8).abs() < 1e-6);

        let mut silent = vec![vec![0.0; 4]];
        normalize_responses(&mut silent);
        assert_eq!(silent[0], vec![0.0; 4]);
    }

    #[test]
    fn test_default_reverb_keeps_input_level() {
        let mut rng = StdRng::seed_from_u64(1);
        let ctx = StageContext::new(SAMPLE_RATE, 1, 4096);
        let mut reverb =
            ConvolutionReverb::new(ctx, &ReverbParams::default(), 512, &mut rng).unwrap();

        let mut noise = StdRng::seed_from_u64(2);
        let input: Vec<f32> = (0..SAMPLE_RATE as usize)
            .map(|_| noise.gen_range(-0.5_f32..0.5))
            .collect();
        let mut output = Vec::new();
        for chunk in input.chunks(4096) {
            output.extend_from_slice(run(&mut reverb, &AudioBlock::mono(chunk)).channel(0));
        }

        let rms = |x: &[f32]| (x.iter().map(|s| s * s).sum::<f32>() / x.len() as f32).sqrt();
        let half = input.len() / 2;
        let ratio = rms(&output[half..]) / rms(&input[half..]);
        assert!(ratio > 0.5 && ratio < 1.5, "wet/dry rms ratio {}", ratio);
        assert!(output.iter().all(|s| s.abs() < 2.0));
    }

    #[test]
    fn test_generated_response_decays() {
        let mut rng = StdRng::seed_from_u64(1);
        let ir = generate_impulse_response(&mut rng, 1000, 2.0);
        assert_eq!(ir.len(), 1000);
        assert!(ir.iter().all(|s| s.abs() <= 1.0));
        let head: f32 = ir[..100].iter().map(|s| s * s).sum();
        let tail: f32 = ir[900..].iter().map(|s| s * s).sum();
        assert!(tail < head * 0.1);
    }

    #[test]
    fn test_zero_duration_is_unsupported() {
        let mut rng = StdRng::seed_from_u64(1);
        let params = ReverbParams {
            enabled: true,
            duration: 0.0,
            ..ReverbParams::default()
        };
        let result = ConvolutionReverb::new(mono_context(64), &params, 64, &mut rng);
        assert!(matches!(result, Err(AudioError::UnsupportedConfiguration(_))));
    }

    #[test]
    fn test_stereo_channels_use_distinct_responses() {
        let mut rng = StdRng::seed_from_u64(9);
        let params = ReverbParams {
            enabled: true,
            duration: 0.01,
            ..ReverbParams::default()
        };
        let ctx = StageContext::new(SAMPLE_RATE, 2, 512);
        let mut reverb = ConvolutionReverb::new(ctx, &params, 128, &mut rng).unwrap();

        let input = AudioBlock::from_channels(&[impulse(1024), impulse(1024)]);
        let mut output = AudioBlock::new(2, 1024);
        reverb.process(&input, &mut output).unwrap();
        assert_ne!(output.channel(0), output.channel(1));
        assert!(output.energy() > 0.0);
    }
}
