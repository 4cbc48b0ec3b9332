//! Delay-line modulators: echo, chorus, flanger and phaser
//!
//! Echo, chorus and flanger share [`DelayModulator`]: a per-channel delay
//! line whose read tap may be swept by a sine LFO, with optional feedback into
//! the line input. The phaser sweeps the center frequency of an all-pass chain
//! instead of a delay.
//!
//! These stages emit only the wet signal; dry/wet blending is done by the
//! graph's mixer. Processing is frame-major so one LFO drives every channel
//! in phase.

use std::f32::consts::TAU;
use tracing::trace;

use super::biquad::{BiquadCoeffs, BiquadFilter};
use super::circular::CircularBuffer;
use super::{check_shapes, Effect, Result, StageContext};
use crate::domain::audio::AudioBlock;
use crate::domain::params::{limits, ChorusParams, EchoParams, FlangerParams, PhaserParams};

/// Sine low-frequency oscillator with phase kept in cycles
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lfo {
    phase: f32,
    increment: f32,
    sample_rate: f32,
}

impl Lfo {
    pub fn new(sample_rate: f32, rate_hz: f32) -> Self {
        let mut lfo = Self {
            phase: 0.0,
            increment: 0.0,
            sample_rate,
        };
        lfo.set_rate(rate_hz);
        lfo
    }

    /// Set the rate, clamped to the 0.1–8 Hz LFO range
    pub fn set_rate(&mut self, rate_hz: f32) {
        let rate = rate_hz.clamp(limits::LFO_RATE_MIN, limits::LFO_RATE_MAX);
        self.increment = rate / self.sample_rate;
    }

    pub fn phase(&self) -> f32 {
        self.phase
    }

    /// Current value in [-1, 1], then advance one sample
    #[inline]
    pub fn next_value(&mut self) -> f32 {
        let value = (TAU * self.phase).sin();
        self.phase += self.increment;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        value
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
    }
}

/// Delay line with optional LFO sweep and feedback
#[derive(Debug, Clone)]
pub struct DelayModulator {
    name: &'static str,
    sample_rate: f32,
    lines: Vec<CircularBuffer<f32>>,
    /// Base delay in samples
    base_delay: f32,
    /// Sweep depth as a fraction of the base delay
    depth: f32,
    feedback: f32,
    lfo: Option<Lfo>,
}

impl DelayModulator {
    fn with_capacity(
        name: &'static str,
        ctx: StageContext,
        max_delay_secs: f32,
        lfo: Option<Lfo>,
    ) -> Self {
        // headroom for the LFO sweep (+50% at full depth) and interpolation
        let capacity = (max_delay_secs * 1.5 * ctx.sample_rate).ceil() as usize + 4;
        Self {
            name,
            sample_rate: ctx.sample_rate,
            lines: vec![CircularBuffer::new(capacity); ctx.channels],
            base_delay: 1.0,
            depth: 0.0,
            feedback: 0.0,
            lfo,
        }
    }

    /// Feedback echo; capacity covers the full 2 s delay range
    pub fn echo(ctx: StageContext, params: &EchoParams) -> Self {
        let mut echo = Self::with_capacity("Echo", ctx, limits::ECHO_DELAY_MAX, None);
        echo.set_echo(params);
        echo
    }

    /// LFO-swept delay without feedback
    pub fn chorus(ctx: StageContext, params: &ChorusParams) -> Self {
        let lfo = Lfo::new(ctx.sample_rate, params.rate);
        let mut chorus = Self::with_capacity(
            "Chorus",
            ctx,
            limits::CHORUS_DELAY_MAX_MS / 1000.0,
            Some(lfo),
        );
        chorus.set_chorus(params);
        chorus
    }

    /// Short LFO-swept delay with feedback
    pub fn flanger(ctx: StageContext, params: &FlangerParams) -> Self {
        let lfo = Lfo::new(ctx.sample_rate, params.rate);
        let mut flanger = Self::with_capacity(
            "Flanger",
            ctx,
            limits::FLANGER_DELAY_MAX_MS / 1000.0,
            Some(lfo),
        );
        flanger.set_flanger(params);
        flanger
    }

    pub fn set_echo(&mut self, params: &EchoParams) {
        let params = params.clamped();
        self.set_delay(params.delay_time, 0.0, params.feedback);
    }

    pub fn set_chorus(&mut self, params: &ChorusParams) {
        let params = params.clamped();
        self.set_lfo_rate(params.rate);
        self.set_delay(params.delay_ms / 1000.0, params.depth, 0.0);
    }

    pub fn set_flanger(&mut self, params: &FlangerParams) {
        let params = params.clamped();
        self.set_lfo_rate(params.rate);
        self.set_delay(params.delay_ms / 1000.0, params.depth, params.feedback);
    }

    fn set_lfo_rate(&mut self, rate: f32) {
        if let Some(lfo) = self.lfo.as_mut() {
            lfo.set_rate(rate);
        }
    }

    fn set_delay(&mut self, delay_secs: f32, depth: f32, feedback: f32) {
        self.base_delay = (delay_secs * self.sample_rate).max(1.0);
        self.depth = depth.clamp(0.0, 1.0);
        self.feedback = feedback.clamp(0.0, limits::FEEDBACK_MAX);
        trace!(
            "{} delay: base={} samples depth={} feedback={}",
            self.name,
            self.base_delay,
            self.depth,
            self.feedback
        );
    }

    /// Base delay in samples
    pub fn base_delay(&self) -> f32 {
        self.base_delay
    }

    pub fn feedback(&self) -> f32 {
        self.feedback
    }
}

impl Effect for DelayModulator {
    fn process(&mut self, input: &AudioBlock, output: &mut AudioBlock) -> Result<()> {
        check_shapes(input, output, self.lines.len())?;

        let max_delay = self
            .lines
            .first()
            .map(|line| line.capacity() as f32 - 2.0)
            .unwrap_or(1.0);

        for i in 0..input.frames() {
            let delay = match self.lfo.as_mut() {
                Some(lfo) => self.base_delay * (1.0 + 0.5 * self.depth * lfo.next_value()),
                None => self.base_delay,
            }
            .clamp(1.0, max_delay);

            for (ch, line) in self.lines.iter_mut().enumerate() {
                let x = input.channel(ch)[i];
                let delayed = line.read_delayed(delay);
                line.push(x + delayed * self.feedback);
                output.channel_mut(ch)[i] = delayed;
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.lines.iter_mut().for_each(CircularBuffer::clear);
        if let Some(lfo) = self.lfo.as_mut() {
            lfo.reset();
        }
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// All-pass filter Q used by every phaser stage
const PHASER_Q: f32 = 0.707;

/// Phaser: swept chain of all-pass filters with output feedback
///
/// Filters for the maximum chain length are allocated up front so the stage
/// count can change without reallocating.
#[derive(Debug, Clone)]
pub struct Phaser {
    sample_rate: f32,
    params: PhaserParams,
    lfo: Lfo,
    /// `channels * PHASER_STAGES_MAX` filters, channel-major
    filters: Vec<BiquadFilter>,
    last_output: Vec<f32>,
}

impl Phaser {
    pub fn new(ctx: StageContext, params: &PhaserParams) -> Self {
        let params = params.clamped();
        Self {
            sample_rate: ctx.sample_rate,
            params,
            lfo: Lfo::new(ctx.sample_rate, params.rate),
            filters: vec![BiquadFilter::bypass(); ctx.channels * limits::PHASER_STAGES_MAX],
            last_output: vec![0.0; ctx.channels],
        }
    }

    pub fn set_params(&mut self, params: &PhaserParams) {
        let params = params.clamped();
        if params.stages > self.params.stages {
            // filters coming back into the chain start from silence
            let channels = self.last_output.len();
            for ch in 0..channels {
                let start = ch * limits::PHASER_STAGES_MAX;
                for filter in &mut self.filters[start + self.params.stages..start + params.stages] {
                    filter.reset();
                }
            }
        }
        self.lfo.set_rate(params.rate);
        self.params = params;
    }

    pub fn stages(&self) -> usize {
        self.params.stages
    }

    /// Swept center frequency for an LFO value in [-1, 1]
    #[inline]
    fn center_frequency(&self, lfo: f32) -> f32 {
        let fc = self.params.base_frequency * (1.0 + 0.9 * self.params.depth * lfo);
        fc.clamp(20.0, self.sample_rate * 0.45)
    }
}

impl Effect for Phaser {
    fn process(&mut self, input: &AudioBlock, output: &mut AudioBlock) -> Result<()> {
        check_shapes(input, output, self.last_output.len())?;

        let stages = self.params.stages;
        for i in 0..input.frames() {
            let lfo = self.lfo.next_value();
            let coeffs =
                BiquadCoeffs::allpass(self.sample_rate, self.center_frequency(lfo), PHASER_Q);

            for ch in 0..self.last_output.len() {
                let start = ch * limits::PHASER_STAGES_MAX;
                let mut y = input.channel(ch)[i] + self.last_output[ch] * self.params.feedback;
                for filter in &mut self.filters[start..start + stages] {
                    filter.set_coeffs(coeffs);
                    y = filter.process_sample(y);
                }
                self.last_output[ch] = y;
                output.channel_mut(ch)[i] = y;
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.filters.iter_mut().for_each(BiquadFilter::reset);
        self.last_output.fill(0.0);
        self.lfo.reset();
    }

    fn name(&self) -> &'static str {
        "Phaser"
    }
}
