//! Effect parameter snapshots
//!
//! An [`EffectParameters`] value is the complete, immutable description of
//! every effect's settings. The control side produces a whole snapshot and
//! hands it to the engine; the engine never sees a half-edited one.
//!
//! The serialized form uses camelCase keys and keeps the option strings the
//! parameter editor emits (`"2x"`, `"minor"`, ...) so presets and UI messages
//! share one schema.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::audio::AudioError;

/// Parameter ranges
///
/// Every setter and [`EffectParameters::clamped`] clamps into these bounds;
/// out-of-range values are never rejected.
pub mod limits {
    /// Shelving filter gain range (dB)
    pub const SHELF_DB_MIN: f32 = -10.0;
    pub const SHELF_DB_MAX: f32 = 10.0;

    /// Feedback above this makes the delay loops ring indefinitely
    pub const FEEDBACK_MAX: f32 = 0.9;

    /// LFO rate range (Hz)
    pub const LFO_RATE_MIN: f32 = 0.1;
    pub const LFO_RATE_MAX: f32 = 8.0;

    /// Reverb impulse response length (seconds)
    pub const REVERB_DURATION_MAX: f32 = 10.0;
    pub const REVERB_DECAY_MIN: f32 = 0.01;
    pub const REVERB_DECAY_MAX: f32 = 100.0;

    /// Echo delay range (seconds)
    pub const ECHO_DELAY_MIN: f32 = 0.001;
    pub const ECHO_DELAY_MAX: f32 = 2.0;

    /// Chorus base delay (ms)
    pub const CHORUS_DELAY_MIN_MS: f32 = 1.0;
    pub const CHORUS_DELAY_MAX_MS: f32 = 50.0;

    /// Flanger base delay (ms)
    pub const FLANGER_DELAY_MIN_MS: f32 = 0.5;
    pub const FLANGER_DELAY_MAX_MS: f32 = 10.0;

    /// Phaser all-pass chain length
    pub const PHASER_STAGES_MIN: usize = 2;
    pub const PHASER_STAGES_MAX: usize = 12;
    pub const PHASER_FREQ_MIN: f32 = 100.0;
    pub const PHASER_FREQ_MAX: f32 = 4000.0;

    /// Distortion amount range
    pub const DISTORTION_AMOUNT_MAX: f32 = 100.0;

    /// Compressor ranges
    pub const THRESHOLD_MIN: f32 = -100.0;
    pub const THRESHOLD_MAX: f32 = 0.0;
    pub const RATIO_MIN: f32 = 1.0;
    pub const RATIO_MAX: f32 = 20.0;
    pub const TIME_MAX: f32 = 1.0;

    /// Pitch shift range (semitones)
    pub const SEMITONES_MAX: f32 = 24.0;

    /// Formant shift range
    pub const FORMANT_SHIFT_MAX: f32 = 2.0;

    /// Time-stretch rate range
    pub const STRETCH_RATE_MIN: f32 = 0.5;
    pub const STRETCH_RATE_MAX: f32 = 2.0;

    /// Granular ranges
    pub const GRAIN_MS_MIN: f32 = 10.0;
    pub const GRAIN_MS_MAX: f32 = 500.0;
    pub const DENSITY_MAX: f32 = 10.0;
}

/// Complete parameter snapshot for the effect chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EffectParameters {
    /// Master switch; when off the engine passes audio through untouched
    pub enabled: bool,
    pub filters: ShelvingParams,
    pub reverb: ReverbParams,
    pub echo: EchoParams,
    pub distortion: DistortionParams,
    pub chorus: ChorusParams,
    pub flanger: FlangerParams,
    pub phaser: PhaserParams,
    pub compressor: CompressorParams,
    pub pitch_shift: PitchShiftParams,
    pub auto_tune: AutoTuneParams,
    pub formant: FormantParams,
    pub time_stretch: TimeStretchParams,
    pub granular: GranularParams,
}

impl Default for EffectParameters {
    fn default() -> Self {
        Self {
            enabled: true,
            filters: ShelvingParams::default(),
            reverb: ReverbParams::default(),
            echo: EchoParams::default(),
            distortion: DistortionParams::default(),
            chorus: ChorusParams::default(),
            flanger: FlangerParams::default(),
            phaser: PhaserParams::default(),
            compressor: CompressorParams::default(),
            pitch_shift: PitchShiftParams::default(),
            auto_tune: AutoTuneParams::default(),
            formant: FormantParams::default(),
            time_stretch: TimeStretchParams::default(),
            granular: GranularParams::default(),
        }
    }
}

impl EffectParameters {
    /// Snapshot with the master switch off
    pub fn bypassed() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Copy of this snapshot with every field clamped to its documented range
    pub fn clamped(&self) -> Self {
        Self {
            enabled: self.enabled,
            filters: self.filters.clamped(),
            reverb: self.reverb.clamped(),
            echo: self.echo.clamped(),
            distortion: self.distortion.clamped(),
            chorus: self.chorus.clamped(),
            flanger: self.flanger.clamped(),
            phaser: self.phaser.clamped(),
            compressor: self.compressor.clamped(),
            pitch_shift: self.pitch_shift.clamped(),
            auto_tune: self.auto_tune.clamped(),
            formant: self.formant.clamped(),
            time_stretch: self.time_stretch.clamped(),
            granular: self.granular.clamped(),
        }
    }

    /// Parse a snapshot sent by the parameter editor as JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize to the editor's JSON form
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Clamp that maps NaN to the lower bound instead of propagating it
#[inline]
fn clamp_finite(value: f32, min: f32, max: f32) -> f32 {
    if value.is_nan() {
        min
    } else {
        value.clamp(min, max)
    }
}

/// Low/high shelving EQ (always active)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShelvingParams {
    pub bass_db: f32,
    pub treble_db: f32,
}

impl Default for ShelvingParams {
    fn default() -> Self {
        Self {
            bass_db: 0.0,
            treble_db: 0.0,
        }
    }
}

impl ShelvingParams {
    pub fn clamped(&self) -> Self {
        Self {
            bass_db: clamp_finite(self.bass_db, limits::SHELF_DB_MIN, limits::SHELF_DB_MAX),
            treble_db: clamp_finite(self.treble_db, limits::SHELF_DB_MIN, limits::SHELF_DB_MAX),
        }
    }
}

/// Convolution reverb
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReverbParams {
    pub enabled: bool,
    pub mix: f32,
    /// Impulse response length in seconds
    pub duration: f32,
    /// Exponent of the impulse response envelope
    pub decay: f32,
}

impl Default for ReverbParams {
    fn default() -> Self {
        Self {
            enabled: false,
            mix: 0.3,
            duration: 2.0,
            decay: 2.0,
        }
    }
}

impl ReverbParams {
    pub fn clamped(&self) -> Self {
        Self {
            enabled: self.enabled,
            mix: clamp_finite(self.mix, 0.0, 1.0),
            duration: clamp_finite(self.duration, 0.0, limits::REVERB_DURATION_MAX),
            decay: clamp_finite(self.decay, limits::REVERB_DECAY_MIN, limits::REVERB_DECAY_MAX),
        }
    }
}

/// Feedback echo
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EchoParams {
    pub enabled: bool,
    /// Delay time in seconds
    pub delay_time: f32,
    pub feedback: f32,
    pub mix: f32,
}

impl Default for EchoParams {
    fn default() -> Self {
        Self {
            enabled: false,
            delay_time: 0.3,
            feedback: 0.4,
            mix: 0.5,
        }
    }
}

impl EchoParams {
    pub fn clamped(&self) -> Self {
        Self {
            enabled: self.enabled,
            delay_time: clamp_finite(self.delay_time, limits::ECHO_DELAY_MIN, limits::ECHO_DELAY_MAX),
            feedback: clamp_finite(self.feedback, 0.0, limits::FEEDBACK_MAX),
            mix: clamp_finite(self.mix, 0.0, 1.0),
        }
    }
}

/// Oversampling hint for the waveshaper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Oversample {
    #[default]
    #[serde(rename = "none")]
    None,
    #[serde(rename = "2x")]
    X2,
    #[serde(rename = "4x")]
    X4,
}

impl Oversample {
    /// Number of shaper evaluations per input sample
    pub fn factor(self) -> usize {
        match self {
            Oversample::None => 1,
            Oversample::X2 => 2,
            Oversample::X4 => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Oversample::None => "none",
            Oversample::X2 => "2x",
            Oversample::X4 => "4x",
        }
    }
}

impl fmt::Display for Oversample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Oversample {
    type Err = AudioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Oversample::None),
            "2x" => Ok(Oversample::X2),
            "4x" => Ok(Oversample::X4),
            other => Err(AudioError::InvalidConfiguration(format!(
                "unknown oversample option '{}'",
                other
            ))),
        }
    }
}

/// Waveshaping distortion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DistortionParams {
    pub enabled: bool,
    pub amount: f32,
    pub oversample: Oversample,
}

impl Default for DistortionParams {
    fn default() -> Self {
        Self {
            enabled: false,
            amount: 20.0,
            oversample: Oversample::None,
        }
    }
}

impl DistortionParams {
    pub fn clamped(&self) -> Self {
        Self {
            enabled: self.enabled,
            amount: clamp_finite(self.amount, 0.0, limits::DISTORTION_AMOUNT_MAX),
            oversample: self.oversample,
        }
    }
}

/// LFO-modulated chorus
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChorusParams {
    pub enabled: bool,
    pub rate: f32,
    /// Modulation depth as a fraction of the base delay
    pub depth: f32,
    /// Base delay in milliseconds
    pub delay_ms: f32,
    pub mix: f32,
}

impl Default for ChorusParams {
    fn default() -> Self {
        Self {
            enabled: false,
            rate: 1.5,
            depth: 0.5,
            delay_ms: 20.0,
            mix: 0.5,
        }
    }
}

impl ChorusParams {
    pub fn clamped(&self) -> Self {
        Self {
            enabled: self.enabled,
            rate: clamp_finite(self.rate, limits::LFO_RATE_MIN, limits::LFO_RATE_MAX),
            depth: clamp_finite(self.depth, 0.0, 1.0),
            delay_ms: clamp_finite(
                self.delay_ms,
                limits::CHORUS_DELAY_MIN_MS,
                limits::CHORUS_DELAY_MAX_MS,
            ),
            mix: clamp_finite(self.mix, 0.0, 1.0),
        }
    }
}

/// Short modulated delay with feedback
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FlangerParams {
    pub enabled: bool,
    pub rate: f32,
    pub depth: f32,
    pub delay_ms: f32,
    pub feedback: f32,
}

impl Default for FlangerParams {
    fn default() -> Self {
        Self {
            enabled: false,
            rate: 0.5,
            depth: 0.7,
            delay_ms: 3.0,
            feedback: 0.5,
        }
    }
}

impl FlangerParams {
    pub fn clamped(&self) -> Self {
        Self {
            enabled: self.enabled,
            rate: clamp_finite(self.rate, limits::LFO_RATE_MIN, limits::LFO_RATE_MAX),
            depth: clamp_finite(self.depth, 0.0, 1.0),
            delay_ms: clamp_finite(
                self.delay_ms,
                limits::FLANGER_DELAY_MIN_MS,
                limits::FLANGER_DELAY_MAX_MS,
            ),
            feedback: clamp_finite(self.feedback, 0.0, limits::FEEDBACK_MAX),
        }
    }
}

/// All-pass phaser
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PhaserParams {
    pub enabled: bool,
    pub rate: f32,
    pub depth: f32,
    /// Number of all-pass filters in the chain
    pub stages: usize,
    pub feedback: f32,
    /// Center of the LFO sweep in Hz
    pub base_frequency: f32,
}

impl Default for PhaserParams {
    fn default() -> Self {
        Self {
            enabled: false,
            rate: 0.5,
            depth: 0.7,
            stages: 4,
            feedback: 0.3,
            base_frequency: 1000.0,
        }
    }
}

impl PhaserParams {
    pub fn clamped(&self) -> Self {
        Self {
            enabled: self.enabled,
            rate: clamp_finite(self.rate, limits::LFO_RATE_MIN, limits::LFO_RATE_MAX),
            depth: clamp_finite(self.depth, 0.0, 1.0),
            stages: self
                .stages
                .clamp(limits::PHASER_STAGES_MIN, limits::PHASER_STAGES_MAX),
            feedback: clamp_finite(self.feedback, 0.0, limits::FEEDBACK_MAX),
            base_frequency: clamp_finite(
                self.base_frequency,
                limits::PHASER_FREQ_MIN,
                limits::PHASER_FREQ_MAX,
            ),
        }
    }
}

/// Dynamic range compressor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompressorParams {
    pub enabled: bool,
    pub threshold: f32,
    pub ratio: f32,
    /// Attack time in seconds
    pub attack: f32,
    /// Release time in seconds
    pub release: f32,
}

impl Default for CompressorParams {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: -24.0,
            ratio: 4.0,
            attack: 0.003,
            release: 0.25,
        }
    }
}

impl CompressorParams {
    pub fn clamped(&self) -> Self {
        Self {
            enabled: self.enabled,
            threshold: clamp_finite(self.threshold, limits::THRESHOLD_MIN, limits::THRESHOLD_MAX),
            ratio: clamp_finite(self.ratio, limits::RATIO_MIN, limits::RATIO_MAX),
            attack: clamp_finite(self.attack, 0.0, limits::TIME_MAX),
            release: clamp_finite(self.release, 0.0, limits::TIME_MAX),
        }
    }
}

/// Resampling pitch shift
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PitchShiftParams {
    pub enabled: bool,
    pub semitones: f32,
}

impl PitchShiftParams {
    pub fn clamped(&self) -> Self {
        Self {
            enabled: self.enabled,
            semitones: clamp_finite(self.semitones, -limits::SEMITONES_MAX, limits::SEMITONES_MAX),
        }
    }

    /// `2^(semitones/12)`
    pub fn pitch_ratio(&self) -> f32 {
        2.0_f32.powf(self.semitones / 12.0)
    }
}

/// Musical scale used by the pitch corrector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scale {
    Major,
    Minor,
    #[default]
    Chromatic,
}

impl Scale {
    /// Semitone offsets of the scale degrees from the root
    pub fn intervals(self) -> &'static [i32] {
        match self {
            Scale::Major => &[0, 2, 4, 5, 7, 9, 11],
            Scale::Minor => &[0, 2, 3, 5, 7, 8, 10],
            Scale::Chromatic => &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scale::Major => "major",
            Scale::Minor => "minor",
            Scale::Chromatic => "chromatic",
        }
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scale {
    type Err = AudioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "major" => Ok(Scale::Major),
            "minor" => Ok(Scale::Minor),
            "chromatic" => Ok(Scale::Chromatic),
            other => Err(AudioError::InvalidConfiguration(format!(
                "unknown scale '{}'",
                other
            ))),
        }
    }
}

/// Pitch correction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AutoTuneParams {
    pub enabled: bool,
    pub scale: Scale,
    /// Root pitch class of the scale, 0 = C
    pub key: u8,
    /// Correction strength, 0 = none, 1 = hard snap
    pub amount: f32,
}

impl Default for AutoTuneParams {
    fn default() -> Self {
        Self {
            enabled: false,
            scale: Scale::Chromatic,
            key: 0,
            amount: 1.0,
        }
    }
}

impl AutoTuneParams {
    pub fn clamped(&self) -> Self {
        Self {
            enabled: self.enabled,
            scale: self.scale,
            key: self.key % 12,
            amount: clamp_finite(self.amount, 0.0, 1.0),
        }
    }
}

/// Formant filter bank shift
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormantParams {
    pub enabled: bool,
    pub shift: f32,
}

impl FormantParams {
    pub fn clamped(&self) -> Self {
        Self {
            enabled: self.enabled,
            shift: clamp_finite(self.shift, -limits::FORMANT_SHIFT_MAX, limits::FORMANT_SHIFT_MAX),
        }
    }
}

/// Speed change without pitch correction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimeStretchParams {
    pub enabled: bool,
    pub rate: f32,
}

impl Default for TimeStretchParams {
    fn default() -> Self {
        Self {
            enabled: false,
            rate: 1.0,
        }
    }
}

impl TimeStretchParams {
    pub fn clamped(&self) -> Self {
        Self {
            enabled: self.enabled,
            rate: clamp_finite(self.rate, limits::STRETCH_RATE_MIN, limits::STRETCH_RATE_MAX),
        }
    }
}

/// Granular resynthesis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GranularParams {
    pub enabled: bool,
    /// Grain length in milliseconds
    pub grain_size: f32,
    /// Spawn probability per block is `density * 0.1`
    pub density: f32,
    /// Output offset spread as a fraction of the block length
    pub scatter: f32,
    pub mix: f32,
}

impl Default for GranularParams {
    fn default() -> Self {
        Self {
            enabled: false,
            grain_size: 100.0,
            density: 5.0,
            scatter: 0.5,
            mix: 0.5,
        }
    }
}

impl GranularParams {
    pub fn clamped(&self) -> Self {
        Self {
            enabled: self.enabled,
            grain_size: clamp_finite(self.grain_size, limits::GRAIN_MS_MIN, limits::GRAIN_MS_MAX),
            density: clamp_finite(self.density, 0.0, limits::DENSITY_MAX),
            scatter: clamp_finite(self.scatter, 0.0, 1.0),
            mix: clamp_finite(self.mix, 0.0, 1.0),
        }
    }
}
