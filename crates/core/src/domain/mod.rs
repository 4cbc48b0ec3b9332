//! Domain entities and business rules

pub mod audio;
pub mod config;
pub mod dsp;
pub mod graph;
pub mod params;

// Re-export specific items to avoid ambiguous glob imports
pub use audio::{AudioBlock, AudioError, ChannelCount, SampleRate};
pub use config::{ConfigError, ConfigManager, EngineConfig, PresetManager, TimbreConfig};
pub use graph::{
    Degradation, EffectGraph, EffectGraphBuilder, Fade, GraphPatch, GraphPlan, MixRatio, Mixer,
    PlanReceipt, Retired, SlotOp, Stage, StageKind, SLOT_COUNT,
};
pub use params::{EffectParameters, Oversample, Scale};
