//! Audio domain models
//!
//! This module defines the audio block handed through the effect chain and the
//! small value types describing a stream. Device handling lives in the `infra`
//! crate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur in the audio subsystem
#[derive(Debug, Error)]
pub enum AudioError {
    /// Requested audio device was not found
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Error in audio stream creation or processing
    #[error("Stream error: {0}")]
    StreamError(String),

    /// Invalid configuration for the engine or a stage
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Block shape does not match what the engine was built for
    ///
    /// Raised on the audio thread, so the message is static.
    #[error("Invalid block: {0}")]
    InvalidBlock(&'static str),

    /// A stage cannot run with the requested configuration
    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(String),
}

pub type Result<T> = std::result::Result<T, AudioError>;

/// Audio sample rate in Hz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum SampleRate {
    Hz44100,
    Hz48000,
    Hz96000,
    Custom(u32),
}

impl SampleRate {
    pub fn hz(&self) -> u32 {
        match self {
            SampleRate::Hz44100 => 44100,
            SampleRate::Hz48000 => 48000,
            SampleRate::Hz96000 => 96000,
            SampleRate::Custom(hz) => *hz,
        }
    }

    pub fn from_hz(hz: u32) -> Self {
        match hz {
            44100 => SampleRate::Hz44100,
            48000 => SampleRate::Hz48000,
            96000 => SampleRate::Hz96000,
            hz => SampleRate::Custom(hz),
        }
    }

    /// Sample rate as `f32`, the unit every stage computes in
    pub fn as_f32(&self) -> f32 {
        self.hz() as f32
    }
}

impl From<u32> for SampleRate {
    fn from(hz: u32) -> Self {
        Self::from_hz(hz)
    }
}

impl From<SampleRate> for u32 {
    fn from(rate: SampleRate) -> Self {
        rate.hz()
    }
}

/// Number of audio channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum ChannelCount {
    Mono,
    Stereo,
    Surround(u16),
}

impl ChannelCount {
    pub fn count(&self) -> u16 {
        match self {
            ChannelCount::Mono => 1,
            ChannelCount::Stereo => 2,
            ChannelCount::Surround(n) => *n,
        }
    }
}

impl From<u16> for ChannelCount {
    fn from(n: u16) -> Self {
        match n {
            1 => ChannelCount::Mono,
            2 => ChannelCount::Stereo,
            n => ChannelCount::Surround(n),
        }
    }
}

impl From<ChannelCount> for u16 {
    fn from(count: ChannelCount) -> Self {
        count.count()
    }
}

/// Planar block of f32 samples with a fixed frame capacity
///
/// Storage is allocated once; every channel occupies `capacity` slots and only
/// the first `frames` of them are live. Changing the live length never
/// reallocates, so blocks can be reused on the real-time thread.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    data: Vec<f32>,
    channels: usize,
    capacity: usize,
    frames: usize,
}

impl AudioBlock {
    /// Create a silent block. Its live length starts at `capacity`.
    pub fn new(channels: usize, capacity: usize) -> Self {
        Self {
            data: vec![0.0; channels * capacity],
            channels,
            capacity,
            frames: capacity,
        }
    }

    /// Build a block from per-channel sample vectors
    ///
    /// Shorter channels are padded with silence up to the longest one.
    pub fn from_channels(channels: &[Vec<f32>]) -> Self {
        let frames = channels.iter().map(Vec::len).max().unwrap_or(0);
        let mut block = Self::new(channels.len(), frames);
        for (ch, samples) in channels.iter().enumerate() {
            block.channel_mut(ch)[..samples.len()].copy_from_slice(samples);
        }
        block
    }

    /// Build a mono block
    pub fn mono(samples: &[f32]) -> Self {
        Self::from_channels(&[samples.to_vec()])
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    /// Change the live length without touching the allocation
    pub fn set_frames(&mut self, frames: usize) -> Result<()> {
        if frames > self.capacity {
            return Err(AudioError::InvalidBlock("frame count exceeds block capacity"));
        }
        self.frames = frames;
        Ok(())
    }

    /// Live samples of one channel
    pub fn channel(&self, ch: usize) -> &[f32] {
        let start = ch * self.capacity;
        &self.data[start..start + self.frames]
    }

    /// Mutable live samples of one channel
    pub fn channel_mut(&mut self, ch: usize) -> &mut [f32] {
        let start = ch * self.capacity;
        &mut self.data[start..start + self.frames]
    }

    /// Zero every live sample
    pub fn silence(&mut self) {
        for ch in 0..self.channels {
            self.channel_mut(ch).fill(0.0);
        }
    }

    /// Copy `other` into this block, adopting its live length
    pub fn copy_from(&mut self, other: &AudioBlock) -> Result<()> {
        self.copy_range_from(other, 0, other.frames)
    }

    /// Copy `len` frames of `other` starting at `offset` into the head of this block
    pub fn copy_range_from(&mut self, other: &AudioBlock, offset: usize, len: usize) -> Result<()> {
        if other.channels != self.channels {
            return Err(AudioError::InvalidBlock("channel count mismatch"));
        }
        self.set_frames(len)?;
        for ch in 0..self.channels {
            let src = &other.channel(ch)[offset..offset + len];
            self.channel_mut(ch).copy_from_slice(src);
        }
        Ok(())
    }

    /// Copy the live frames of this block into `other` starting at `offset`
    pub fn copy_into(&self, other: &mut AudioBlock, offset: usize) {
        for ch in 0..self.channels.min(other.channels) {
            other.channel_mut(ch)[offset..offset + self.frames].copy_from_slice(self.channel(ch));
        }
    }

    /// Load interleaved samples, setting the live length to `len / channels`
    pub fn read_interleaved(&mut self, interleaved: &[f32]) -> Result<()> {
        if self.channels == 0 || interleaved.len() % self.channels != 0 {
            return Err(AudioError::InvalidBlock(
                "interleaved samples do not divide into whole frames",
            ));
        }
        let frames = interleaved.len() / self.channels;
        self.set_frames(frames)?;
        let channels = self.channels;
        for ch in 0..channels {
            let dst = self.channel_mut(ch);
            for (i, sample) in dst.iter_mut().enumerate() {
                *sample = interleaved[i * channels + ch];
            }
        }
        Ok(())
    }

    /// Write the live frames as interleaved samples
    ///
    /// Writes `min(out.len() / channels, frames)` frames; the rest of `out` is
    /// left untouched.
    pub fn write_interleaved(&self, out: &mut [f32]) {
        if self.channels == 0 {
            return;
        }
        let frames = self.frames.min(out.len() / self.channels);
        for ch in 0..self.channels {
            let src = self.channel(ch);
            for i in 0..frames {
                out[i * self.channels + ch] = src[i];
            }
        }
    }

    /// Peak absolute sample across all channels
    pub fn peak(&self) -> f32 {
        (0..self.channels)
            .flat_map(|ch| self.channel(ch).iter())
            .fold(0.0_f32, |acc, s| acc.max(s.abs()))
    }

    /// Sum of squared samples across all channels
    pub fn energy(&self) -> f64 {
        (0..self.channels)
            .flat_map(|ch| self.channel(ch).iter())
            .map(|&s| (s as f64) * (s as f64))
            .sum()
    }
}
