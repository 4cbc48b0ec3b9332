//! Dry/wet mixing and click-free fades

use crate::domain::audio::AudioBlock;

/// Gains applied to the unprocessed and processed signal of one stage
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixRatio {
    pub dry: f32,
    pub wet: f32,
}

impl MixRatio {
    /// Stage output replaces its input
    pub const WET: Self = Self { dry: 0.0, wet: 1.0 };
    /// Fixed half/half blend
    pub const EVEN: Self = Self { dry: 0.5, wet: 0.5 };

    /// `dry = 1 - mix`, `wet = mix`, with `mix` clamped to [0, 1]
    pub fn blend(mix: f32) -> Self {
        let mix = if mix.is_nan() { 0.0 } else { mix.clamp(0.0, 1.0) };
        Self {
            dry: 1.0 - mix,
            wet: mix,
        }
    }
}

/// Linear ramp toward a target gain in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fade {
    value: f32,
    target: f32,
    step: f32,
}

impl Fade {
    /// Fade already resting at `value`
    pub fn settled(value: f32, fade_samples: usize) -> Self {
        Self {
            value,
            target: value,
            step: 1.0 / fade_samples.max(1) as f32,
        }
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn set_target(&mut self, target: f32) {
        self.target = target.clamp(0.0, 1.0);
    }

    pub fn is_settled(&self) -> bool {
        self.value == self.target
    }

    /// Settled at exactly `value`
    pub fn is_settled_at(&self, value: f32) -> bool {
        self.is_settled() && self.value == value
    }

    /// Current gain, then move one sample toward the target
    #[inline]
    pub fn next_gain(&mut self) -> f32 {
        let gain = self.value;
        if self.value < self.target {
            self.value = (self.value + self.step).min(self.target);
        } else if self.value > self.target {
            self.value = (self.value - self.step).max(self.target);
        }
        gain
    }

    /// Advance `frames` samples without producing gains
    pub fn skip(&mut self, frames: usize) {
        let distance = frames as f32 * self.step;
        if self.value < self.target {
            self.value = (self.value + distance).min(self.target);
        } else {
            self.value = (self.value - distance).max(self.target);
        }
    }
}

/// Blends one stage's wet output back into the running signal
///
/// `out = dry*(1-g) + g*(dry*ratio.dry + wet*ratio.wet)` where `g` is the
/// stage's fade gain; at `g = 0` the stage is bypassed, at `g = 1` it is fully
/// in the chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mixer {
    ratio: MixRatio,
    fade: Fade,
}

impl Mixer {
    pub fn new(ratio: MixRatio, fade: Fade) -> Self {
        Self { ratio, fade }
    }

    pub fn ratio(&self) -> MixRatio {
        self.ratio
    }

    pub fn set_ratio(&mut self, ratio: MixRatio) {
        self.ratio = ratio;
    }

    pub fn fade(&self) -> &Fade {
        &self.fade
    }

    pub fn fade_mut(&mut self) -> &mut Fade {
        &mut self.fade
    }

    /// Mix `wet` into `signal` in place; both blocks have the same shape
    pub fn mix_in_place(&mut self, signal: &mut AudioBlock, wet: &AudioBlock) {
        let frames = signal.frames().min(wet.frames());
        let channels = signal.channels().min(wet.channels());

        if self.fade.is_settled_at(1.0) && self.ratio == MixRatio::WET {
            for ch in 0..channels {
                signal.channel_mut(ch)[..frames].copy_from_slice(&wet.channel(ch)[..frames]);
            }
            return;
        }
        if self.fade.is_settled_at(0.0) {
            return;
        }

        let MixRatio { dry: d, wet: w } = self.ratio;
        for i in 0..frames {
            let g = self.fade.next_gain();
            for ch in 0..channels {
                let x = signal.channel(ch)[i];
                let y = wet.channel(ch)[i];
                signal.channel_mut(ch)[i] = x * (1.0 - g) + g * (x * d + y * w);
            }
        }
    }

    /// Leave `signal` untouched for one block while keeping the fade moving
    pub fn bypass(&mut self, frames: usize) {
        self.fade.skip(frames);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blend_ratio() {
        let ratio = MixRatio::blend(0.3);
        assert!((ratio.dry - 0.7).abs() < 1e-6);
        assert!((ratio.wet - 0.3).abs() < 1e-6);
        assert_eq!(MixRatio::blend(2.0), MixRatio::WET);
    }

    #[test]
    fn test_fade_reaches_target() {
        let mut fade = Fade::settled(0.0, 4);
        fade.set_target(1.0);
        let gains: Vec<f32> = (0..6).map(|_| fade.next_gain()).collect();
        assert_eq!(gains, vec![0.0, 0.25, 0.5, 0.75, 1.0, 1.0]);
        assert!(fade.is_settled_at(1.0));
    }

    #[test]
    fn test_fade_skip() {
        let mut fade = Fade::settled(1.0, 10);
        fade.set_target(0.0);
        fade.skip(5);
        assert!((fade.value() - 0.5).abs() < 1e-6);
        fade.skip(100);
        assert!(fade.is_settled_at(0.0));
    }

    #[test]
    fn test_full_wet_replaces_signal() {
        let mut mixer = Mixer::new(MixRatio::WET, Fade::settled(1.0, 4));
        let mut signal = AudioBlock::mono(&[1.0, 1.0]);
        mixer.mix_in_place(&mut signal, &AudioBlock::mono(&[0.25, -0.25]));
        assert_eq!(signal.channel(0), &[0.25, -0.25]);
    }

    #[test]
    fn test_blend() {
        let mut mixer = Mixer::new(MixRatio::blend(0.25), Fade::settled(1.0, 4));
        let mut signal = AudioBlock::mono(&[1.0]);
        mixer.mix_in_place(&mut signal, &AudioBlock::mono(&[0.0]));
        assert!((signal.channel(0)[0] - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_faded_out_mixer_is_identity() {
        let mut mixer = Mixer::new(MixRatio::EVEN, Fade::settled(0.0, 4));
        let mut signal = AudioBlock::mono(&[0.3, -0.7]);
        mixer.mix_in_place(&mut signal, &AudioBlock::mono(&[1.0, 1.0]));
        assert_eq!(signal.channel(0), &[0.3, -0.7]);
    }

    #[test]
    fn test_fade_in_ramps_wet() {
        let mut mixer = Mixer::new(MixRatio::WET, Fade::settled(0.0, 2));
        mixer.fade_mut().set_target(1.0);
        let mut signal = AudioBlock::mono(&[1.0, 1.0, 1.0]);
        mixer.mix_in_place(&mut signal, &AudioBlock::mono(&[0.0, 0.0, 0.0]));
        assert_eq!(signal.channel(0), &[1.0, 0.5, 0.0]);
    }
}
