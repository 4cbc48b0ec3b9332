//! Effect graph: slot layout, stage construction and per-block execution
//!
//! The chain has one slot per effect in a fixed canonical order:
//!
//! shelving → reverb → echo → distortion → chorus → flanger → phaser →
//! compressor → pitch shift → auto-tune → formant → time-stretch → granular
//!
//! The control side owns an [`EffectGraphBuilder`]. For every new parameter
//! snapshot it diffs the enabled set against the last committed one, builds
//! any new stages (allocating freely) and packages the result as a
//! [`GraphPatch`]. The audio side owns the [`EffectGraph`]; applying a patch
//! only moves boxes and flips fade targets, so it never allocates. Stages
//! leaving the graph are faded out, and rebuilt stages cross-fade with the
//! stage they replace; the displaced stages are then handed back through a
//! `retire` callback so they are dropped off the audio thread.

pub mod mixer;

pub use mixer::{Fade, MixRatio, Mixer};

use std::fmt;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, trace, warn};

use crate::domain::audio::{AudioBlock, AudioError, Result};
use crate::domain::config::EngineConfig;
use crate::domain::dsp::{
    AutoTune, ConvolutionReverb, DelayModulator, DynamicsCompressor, Effect, FormantShifter,
    GranularSynthesizer, Phaser, PitchShifter, ShelvingFilterPair, StageContext, TimeStretcher,
    Waveshaper,
};
use crate::domain::params::EffectParameters;

/// Number of slots in the chain
pub const SLOT_COUNT: usize = 13;

// ============================================================================
// STAGE KINDS
// ============================================================================

/// Identifies one slot of the canonical chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Shelving,
    Reverb,
    Echo,
    Distortion,
    Chorus,
    Flanger,
    Phaser,
    Compressor,
    PitchShift,
    AutoTune,
    Formant,
    TimeStretch,
    Granular,
}

impl StageKind {
    /// Processing order of the chain
    pub const CANONICAL_ORDER: [StageKind; SLOT_COUNT] = [
        StageKind::Shelving,
        StageKind::Reverb,
        StageKind::Echo,
        StageKind::Distortion,
        StageKind::Chorus,
        StageKind::Flanger,
        StageKind::Phaser,
        StageKind::Compressor,
        StageKind::PitchShift,
        StageKind::AutoTune,
        StageKind::Formant,
        StageKind::TimeStretch,
        StageKind::Granular,
    ];

    /// Index of this kind's slot
    pub fn slot(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            StageKind::Shelving => "shelving",
            StageKind::Reverb => "reverb",
            StageKind::Echo => "echo",
            StageKind::Distortion => "distortion",
            StageKind::Chorus => "chorus",
            StageKind::Flanger => "flanger",
            StageKind::Phaser => "phaser",
            StageKind::Compressor => "compressor",
            StageKind::PitchShift => "pitchShift",
            StageKind::AutoTune => "autoTune",
            StageKind::Formant => "formant",
            StageKind::TimeStretch => "timeStretch",
            StageKind::Granular => "granular",
        }
    }

    /// Whether the stage is part of the chain for `params`
    ///
    /// Shelving runs whenever the engine is enabled; every other stage also
    /// needs its own flag.
    pub fn is_enabled(self, params: &EffectParameters) -> bool {
        if !params.enabled {
            return false;
        }
        match self {
            StageKind::Shelving => true,
            StageKind::Reverb => params.reverb.enabled,
            StageKind::Echo => params.echo.enabled,
            StageKind::Distortion => params.distortion.enabled,
            StageKind::Chorus => params.chorus.enabled,
            StageKind::Flanger => params.flanger.enabled,
            StageKind::Phaser => params.phaser.enabled,
            StageKind::Compressor => params.compressor.enabled,
            StageKind::PitchShift => params.pitch_shift.enabled,
            StageKind::AutoTune => params.auto_tune.enabled,
            StageKind::Formant => params.formant.enabled,
            StageKind::TimeStretch => params.time_stretch.enabled,
            StageKind::Granular => params.granular.enabled,
        }
    }

    /// Dry/wet blend of the stage's output
    pub fn mix(self, params: &EffectParameters) -> MixRatio {
        match self {
            StageKind::Reverb => MixRatio::blend(params.reverb.mix),
            StageKind::Echo => MixRatio::blend(params.echo.mix),
            StageKind::Chorus => MixRatio::blend(params.chorus.mix),
            StageKind::Granular => MixRatio::blend(params.granular.mix),
            StageKind::Distortion | StageKind::Flanger | StageKind::Phaser => MixRatio::EVEN,
            StageKind::Shelving
            | StageKind::Compressor
            | StageKind::PitchShift
            | StageKind::AutoTune
            | StageKind::Formant
            | StageKind::TimeStretch => MixRatio::WET,
        }
    }

    /// Whether moving from `old` to `new` needs a freshly built stage
    ///
    /// True only for state fixed at creation: the reverb impulse response
    /// and the waveshaper curve.
    pub fn needs_rebuild(self, old: &EffectParameters, new: &EffectParameters) -> bool {
        match self {
            StageKind::Reverb => {
                old.reverb.duration != new.reverb.duration || old.reverb.decay != new.reverb.decay
            }
            StageKind::Distortion => old.distortion.amount != new.distortion.amount,
            _ => false,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// STAGES
// ============================================================================

/// One constructed stage, dispatched by tag
#[derive(Debug)]
pub enum Stage {
    Shelving(ShelvingFilterPair),
    Reverb(ConvolutionReverb),
    Echo(DelayModulator),
    Distortion(Waveshaper),
    Chorus(DelayModulator),
    Flanger(DelayModulator),
    Phaser(Phaser),
    Compressor(DynamicsCompressor),
    PitchShift(PitchShifter),
    AutoTune(AutoTune),
    Formant(FormantShifter),
    TimeStretch(TimeStretcher),
    Granular(GranularSynthesizer),
}

impl Stage {
    /// Build the stage for `kind` from `params`
    ///
    /// # Errors
    /// `UnsupportedConfiguration` when the stage cannot run with these
    /// settings (for example a zero-length reverb).
    pub fn build(
        kind: StageKind,
        ctx: StageContext,
        params: &EffectParameters,
        reverb_partition: usize,
        rng: &mut StdRng,
    ) -> Result<Self> {
        let stage = match kind {
            StageKind::Shelving => Stage::Shelving(ShelvingFilterPair::new(ctx, params.filters)),
            StageKind::Reverb => Stage::Reverb(ConvolutionReverb::new(
                ctx,
                &params.reverb,
                reverb_partition,
                rng,
            )?),
            StageKind::Echo => Stage::Echo(DelayModulator::echo(ctx, &params.echo)),
            StageKind::Distortion => Stage::Distortion(Waveshaper::new(ctx, &params.distortion)),
            StageKind::Chorus => Stage::Chorus(DelayModulator::chorus(ctx, &params.chorus)),
            StageKind::Flanger => Stage::Flanger(DelayModulator::flanger(ctx, &params.flanger)),
            StageKind::Phaser => Stage::Phaser(Phaser::new(ctx, &params.phaser)),
            StageKind::Compressor => {
                Stage::Compressor(DynamicsCompressor::new(ctx, params.compressor))
            }
            StageKind::PitchShift => Stage::PitchShift(PitchShifter::new(ctx, &params.pitch_shift)),
            StageKind::AutoTune => Stage::AutoTune(AutoTune::new(ctx, &params.auto_tune)),
            StageKind::Formant => Stage::Formant(FormantShifter::new(ctx, &params.formant)),
            StageKind::TimeStretch => {
                Stage::TimeStretch(TimeStretcher::new(ctx, &params.time_stretch))
            }
            StageKind::Granular => Stage::Granular(GranularSynthesizer::new(
                ctx,
                &params.granular,
                StdRng::seed_from_u64(rng.gen()),
            )),
        };
        Ok(stage)
    }

    pub fn kind(&self) -> StageKind {
        match self {
            Stage::Shelving(_) => StageKind::Shelving,
            Stage::Reverb(_) => StageKind::Reverb,
            Stage::Echo(_) => StageKind::Echo,
            Stage::Distortion(_) => StageKind::Distortion,
            Stage::Chorus(_) => StageKind::Chorus,
            Stage::Flanger(_) => StageKind::Flanger,
            Stage::Phaser(_) => StageKind::Phaser,
            Stage::Compressor(_) => StageKind::Compressor,
            Stage::PitchShift(_) => StageKind::PitchShift,
            Stage::AutoTune(_) => StageKind::AutoTune,
            Stage::Formant(_) => StageKind::Formant,
            Stage::TimeStretch(_) => StageKind::TimeStretch,
            Stage::Granular(_) => StageKind::Granular,
        }
    }

    /// Apply the parameters that can change in place
    ///
    /// Never allocates; anything that would is covered by
    /// [`StageKind::needs_rebuild`].
    pub fn retune(&mut self, params: &EffectParameters) {
        match self {
            Stage::Shelving(s) => s.set_params(params.filters),
            Stage::Reverb(_) => {}
            Stage::Echo(s) => s.set_echo(&params.echo),
            Stage::Distortion(s) => s.set_oversample(params.distortion.oversample),
            Stage::Chorus(s) => s.set_chorus(&params.chorus),
            Stage::Flanger(s) => s.set_flanger(&params.flanger),
            Stage::Phaser(s) => s.set_params(&params.phaser),
            Stage::Compressor(s) => s.set_params(params.compressor),
            Stage::PitchShift(s) => s.set_params(&params.pitch_shift),
            Stage::AutoTune(s) => s.set_params(&params.auto_tune),
            Stage::Formant(s) => s.set_params(&params.formant),
            Stage::TimeStretch(s) => s.set_params(&params.time_stretch),
            Stage::Granular(s) => s.set_params(&params.granular),
        }
    }

    fn effect_mut(&mut self) -> &mut dyn Effect {
        match self {
            Stage::Shelving(s) => s,
            Stage::Reverb(s) => s,
            Stage::Echo(s) => s,
            Stage::Distortion(s) => s,
            Stage::Chorus(s) => s,
            Stage::Flanger(s) => s,
            Stage::Phaser(s) => s,
            Stage::Compressor(s) => s,
            Stage::PitchShift(s) => s,
            Stage::AutoTune(s) => s,
            Stage::Formant(s) => s,
            Stage::TimeStretch(s) => s,
            Stage::Granular(s) => s,
        }
    }
}

impl Effect for Stage {
    fn process(&mut self, input: &AudioBlock, output: &mut AudioBlock) -> Result<()> {
        self.effect_mut().process(input, output)
    }

    fn reset(&mut self) {
        self.effect_mut().reset();
    }

    fn name(&self) -> &'static str {
        self.kind().name()
    }
}

// ============================================================================
// PATCHES
// ============================================================================

/// What to do with one slot when a patch is applied
#[derive(Debug, Default)]
pub enum SlotOp {
    /// Slot stays empty (or keeps fading out)
    #[default]
    Vacant,
    /// Keep the running stage and retune it
    Keep,
    /// Fade a new stage in
    Install(Box<Stage>),
    /// Cross-fade from the running stage to a rebuilt one
    Replace(Box<Stage>),
    /// Fade the running stage out and retire it
    Remove,
}

/// Complete graph change produced on the control side
#[derive(Debug)]
pub struct GraphPatch {
    pub version: u64,
    pub params: Arc<EffectParameters>,
    pub slots: [SlotOp; SLOT_COUNT],
}

/// A stage that lost capability and runs degraded or not at all
#[derive(Debug, Clone, PartialEq)]
pub struct Degradation {
    pub stage: StageKind,
    pub reason: String,
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.stage, self.reason)
    }
}

/// Builder state to record once a patch has been handed to the graph
#[derive(Debug, Clone)]
pub struct PlanReceipt {
    pub version: u64,
    pub params: Arc<EffectParameters>,
    pub degradations: Vec<Degradation>,
    built: [Option<Arc<EffectParameters>>; SLOT_COUNT],
}

/// Output of [`EffectGraphBuilder::plan`]
#[derive(Debug)]
pub struct GraphPlan {
    pub patch: GraphPatch,
    pub receipt: PlanReceipt,
}

/// Objects leaving the audio thread to be dropped by the control side
#[derive(Debug)]
pub enum Retired {
    Stage(Box<Stage>),
    Params(Arc<EffectParameters>),
}

// ============================================================================
// BUILDER
// ============================================================================

/// Control-side half of the graph: diffs snapshots and builds stages
pub struct EffectGraphBuilder {
    config: EngineConfig,
    rng: StdRng,
    applied: Option<Arc<EffectParameters>>,
    /// Snapshot each running stage was built from
    built: [Option<Arc<EffectParameters>>; SLOT_COUNT],
    next_version: u64,
}

impl EffectGraphBuilder {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            config,
            rng,
            applied: None,
            built: Default::default(),
            next_version: 1,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Last committed snapshot
    pub fn applied(&self) -> Option<&Arc<EffectParameters>> {
        self.applied.as_ref()
    }

    /// Slots holding a stage after the last committed patch
    pub fn occupied(&self) -> [bool; SLOT_COUNT] {
        std::array::from_fn(|slot| self.built[slot].is_some())
    }

    /// Diff `next` against the committed state and build every new stage
    ///
    /// Nothing is committed: the builder is unchanged until [`commit`] is
    /// called with the receipt, so a patch that never reaches the graph can
    /// simply be dropped.
    ///
    /// [`commit`]: EffectGraphBuilder::commit
    pub fn plan(&mut self, next: EffectParameters) -> Result<GraphPlan> {
        let next = Arc::new(next.clamped());
        let ctx = self.config.stage_context();
        let partition = self.config.reverb_partition;

        let mut slots: [SlotOp; SLOT_COUNT] = Default::default();
        let mut built: [Option<Arc<EffectParameters>>; SLOT_COUNT] = Default::default();
        let mut degradations = Vec::new();

        for kind in StageKind::CANONICAL_ORDER {
            let slot = kind.slot();
            let running = self.built[slot].clone();
            let wanted = kind.is_enabled(&next);

            slots[slot] = match (running, wanted) {
                (None, false) => SlotOp::Vacant,
                (Some(_), false) => SlotOp::Remove,
                (None, true) => {
                    match Stage::build(kind, ctx, &next, partition, &mut self.rng) {
                        Ok(stage) => {
                            built[slot] = Some(Arc::clone(&next));
                            SlotOp::Install(Box::new(stage))
                        }
                        Err(e) => {
                            degradations.push(Degradation {
                                stage: kind,
                                reason: format!("bypassed: {}", e),
                            });
                            SlotOp::Vacant
                        }
                    }
                }
                (Some(from), true) if !kind.needs_rebuild(&from, &next) => {
                    built[slot] = Some(from);
                    SlotOp::Keep
                }
                (Some(from), true) => {
                    match Stage::build(kind, ctx, &next, partition, &mut self.rng) {
                        Ok(stage) => {
                            built[slot] = Some(Arc::clone(&next));
                            SlotOp::Replace(Box::new(stage))
                        }
                        Err(e) => {
                            // the running stage stays with the settings it was built from
                            degradations.push(Degradation {
                                stage: kind,
                                reason: format!("rebuild failed, previous settings kept: {}", e),
                            });
                            built[slot] = Some(from);
                            SlotOp::Keep
                        }
                    }
                }
            };
        }

        if built[StageKind::Formant.slot()].is_some() {
            let limit = ctx.sample_rate * 0.45;
            let centers = FormantShifter::centers(next.formant.shift);
            if centers.iter().any(|&fc| fc > limit) {
                degradations.push(Degradation {
                    stage: StageKind::Formant,
                    reason: format!(
                        "formant centers {:?} clamped to {:.0} Hz at this sample rate",
                        centers, limit
                    ),
                });
            }
        }

        let version = self.next_version;
        debug!(
            version,
            stages = built.iter().flatten().count(),
            "Planned graph patch"
        );

        Ok(GraphPlan {
            patch: GraphPatch {
                version,
                params: Arc::clone(&next),
                slots,
            },
            receipt: PlanReceipt {
                version,
                params: next,
                degradations,
                built,
            },
        })
    }

    /// Record that the patch for `receipt` reached the graph
    pub fn commit(&mut self, receipt: &PlanReceipt) {
        self.applied = Some(Arc::clone(&receipt.params));
        self.built = receipt.built.clone();
        self.next_version = receipt.version + 1;
        for degradation in &receipt.degradations {
            warn!(stage = %degradation.stage, "Stage degraded: {}", degradation.reason);
        }
        info!(version = receipt.version, "Graph patch committed");
    }
}

// ============================================================================
// GRAPH
// ============================================================================

#[derive(Debug)]
struct ActiveSlot {
    stage: Box<Stage>,
    mixer: Mixer,
    retiring: bool,
    /// Replaced stage still fading out under the new one
    outgoing: Option<Outgoing>,
}

#[derive(Debug)]
struct Outgoing {
    stage: Box<Stage>,
    fade: Fade,
}

impl ActiveSlot {
    fn new(stage: Box<Stage>, mixer: Mixer) -> Self {
        Self {
            stage,
            mixer,
            retiring: false,
            outgoing: None,
        }
    }

    /// Hand the slot's stages to `retire`
    fn retire_all(self, retire: &mut dyn FnMut(Retired)) {
        if let Some(outgoing) = self.outgoing {
            retire(Retired::Stage(outgoing.stage));
        }
        retire(Retired::Stage(self.stage));
    }
}

/// Audio-side half of the graph: the ordered stages and their mixers
///
/// All buffers are sized at construction for `max_block_size` frames.
pub struct EffectGraph {
    channels: usize,
    max_block: usize,
    fade_samples: usize,
    version: u64,
    params: Arc<EffectParameters>,
    slots: [Option<ActiveSlot>; SLOT_COUNT],
    /// Engine-level fade between the untouched input and the chain output
    master: Fade,
    current: AudioBlock,
    wet: AudioBlock,
    /// Output of replaced stages during their cross-fade
    outgoing_wet: AudioBlock,
    dry: AudioBlock,
}

impl EffectGraph {
    /// Graph with the first patch installed and every fade settled
    pub fn new(config: &EngineConfig, patch: GraphPatch) -> Result<Self> {
        config.validate()?;
        let channels = config.channels.count() as usize;
        let max_block = config.max_block_size;
        let fade_samples = config.fade_samples();

        let GraphPatch {
            version,
            params,
            slots: ops,
        } = patch;

        let mut slots: [Option<ActiveSlot>; SLOT_COUNT] = Default::default();
        for (slot, (kind, op)) in slots
            .iter_mut()
            .zip(StageKind::CANONICAL_ORDER.into_iter().zip(ops))
        {
            if let SlotOp::Install(stage) | SlotOp::Replace(stage) = op {
                *slot = Some(ActiveSlot::new(
                    stage,
                    Mixer::new(kind.mix(&params), Fade::settled(1.0, fade_samples)),
                ));
            }
        }

        let master = Fade::settled(if params.enabled { 1.0 } else { 0.0 }, fade_samples);
        info!(
            version,
            channels,
            max_block,
            enabled = params.enabled,
            "Effect graph created"
        );

        Ok(Self {
            channels,
            max_block,
            fade_samples,
            version,
            params,
            slots,
            master,
            current: AudioBlock::new(channels, max_block),
            wet: AudioBlock::new(channels, max_block),
            outgoing_wet: AudioBlock::new(channels, max_block),
            dry: AudioBlock::new(channels, max_block),
        })
    }

    /// Version of the last applied patch
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn params(&self) -> &EffectParameters {
        &self.params
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn max_block(&self) -> usize {
        self.max_block
    }

    /// Kinds of the stages currently in the chain, including ones fading out
    pub fn active_stages(&self) -> impl Iterator<Item = StageKind> + '_ {
        self.slots
            .iter()
            .flatten()
            .map(|slot| slot.stage.kind())
    }

    /// Apply a patch at a block boundary
    ///
    /// Moves stages in and out without allocating. Everything displaced is
    /// passed to `retire`.
    pub fn apply(&mut self, patch: GraphPatch, retire: &mut dyn FnMut(Retired)) {
        let GraphPatch {
            version,
            params,
            slots: ops,
        } = patch;

        for (slot, (kind, op)) in self
            .slots
            .iter_mut()
            .zip(StageKind::CANONICAL_ORDER.into_iter().zip(ops))
        {
            match op {
                SlotOp::Vacant => {}
                SlotOp::Keep => {
                    if let Some(active) = slot.as_mut() {
                        active.stage.retune(&params);
                        active.mixer.set_ratio(kind.mix(&params));
                        active.mixer.fade_mut().set_target(1.0);
                        active.retiring = false;
                    }
                }
                SlotOp::Install(stage) => {
                    if let Some(old) = slot.take() {
                        old.retire_all(retire);
                    }
                    let mut fade = Fade::settled(0.0, self.fade_samples);
                    fade.set_target(1.0);
                    *slot = Some(ActiveSlot::new(stage, Mixer::new(kind.mix(&params), fade)));
                }
                SlotOp::Replace(stage) => match slot.as_mut() {
                    Some(active) => {
                        // a cross-fade still running is cut short
                        if let Some(previous) = active.outgoing.take() {
                            retire(Retired::Stage(previous.stage));
                        }
                        let old = std::mem::replace(&mut active.stage, stage);
                        let mut fade = Fade::settled(1.0, self.fade_samples);
                        fade.set_target(0.0);
                        active.outgoing = Some(Outgoing { stage: old, fade });
                        active.mixer.set_ratio(kind.mix(&params));
                        active.mixer.fade_mut().set_target(1.0);
                        active.retiring = false;
                    }
                    None => {
                        *slot = Some(ActiveSlot::new(
                            stage,
                            Mixer::new(kind.mix(&params), Fade::settled(1.0, self.fade_samples)),
                        ));
                    }
                },
                SlotOp::Remove => {
                    if let Some(active) = slot.as_mut() {
                        active.retiring = true;
                        active.mixer.fade_mut().set_target(0.0);
                    }
                }
            }
        }

        self.master
            .set_target(if params.enabled { 1.0 } else { 0.0 });
        let old = std::mem::replace(&mut self.params, params);
        retire(Retired::Params(old));
        self.version = version;
        trace!(version, "Graph patch applied");
    }

    /// Process `block` in place
    ///
    /// A block whose channel count does not match the graph is replaced with
    /// silence and reported as an error. Longer blocks are processed in
    /// chunks of the configured maximum size.
    pub fn process(&mut self, block: &mut AudioBlock, retire: &mut dyn FnMut(Retired)) -> Result<()> {
        if block.is_empty() {
            return Ok(());
        }
        if block.channels() != self.channels {
            block.silence();
            return Err(AudioError::InvalidBlock(
                "block channel count differs from the graph's",
            ));
        }

        if self.master.is_settled_at(0.0) {
            // engine disabled: exact passthrough, nothing left to fade
            self.release_retiring(true, retire);
            return Ok(());
        }

        let frames = block.frames();
        let mut offset = 0;
        while offset < frames {
            let len = (frames - offset).min(self.max_block);
            self.process_chunk(block, offset, len)?;
            self.release_retiring(false, retire);
            offset += len;
        }
        Ok(())
    }

    fn process_chunk(&mut self, block: &mut AudioBlock, offset: usize, len: usize) -> Result<()> {
        self.current.copy_range_from(block, offset, len)?;
        let master_settled = self.master.is_settled_at(1.0);
        if !master_settled {
            self.dry.copy_from(&self.current)?;
        }
        self.wet.set_frames(len)?;
        self.outgoing_wet.set_frames(len)?;

        for active in self.slots.iter_mut().flatten() {
            if active.mixer.fade().is_settled_at(0.0) {
                continue;
            }
            let processed = active.stage.process(&self.current, &mut self.wet);
            if let Some(outgoing) = active.outgoing.as_mut() {
                let handed_over = processed.is_ok()
                    && outgoing
                        .stage
                        .process(&self.current, &mut self.outgoing_wet)
                        .is_ok();
                if handed_over {
                    for i in 0..len {
                        let g = outgoing.fade.next_gain();
                        for ch in 0..self.channels {
                            let old = self.outgoing_wet.channel(ch)[i];
                            let new = &mut self.wet.channel_mut(ch)[i];
                            *new = old * g + *new * (1.0 - g);
                        }
                    }
                } else {
                    outgoing.fade.skip(len);
                }
            }
            match processed {
                Ok(()) => active.mixer.mix_in_place(&mut self.current, &self.wet),
                Err(_) => active.mixer.bypass(len),
            }
        }

        if !master_settled {
            for i in 0..len {
                let g = self.master.next_gain();
                for ch in 0..self.channels {
                    let x = self.dry.channel(ch)[i];
                    let y = self.current.channel(ch)[i];
                    self.current.channel_mut(ch)[i] = x * (1.0 - g) + y * g;
                }
            }
        }

        self.current.copy_into(block, offset);
        Ok(())
    }

    fn release_retiring(&mut self, all: bool, retire: &mut dyn FnMut(Retired)) {
        for slot in self.slots.iter_mut() {
            let done = matches!(
                slot,
                Some(active) if active.retiring && (all || active.mixer.fade().is_settled_at(0.0))
            );
            if done {
                if let Some(active) = slot.take() {
                    active.retire_all(retire);
                }
                continue;
            }
            if let Some(active) = slot.as_mut() {
                let faded = matches!(
                    &active.outgoing,
                    Some(outgoing) if all || outgoing.fade.is_settled_at(0.0)
                );
                if faded {
                    if let Some(outgoing) = active.outgoing.take() {
                        retire(Retired::Stage(outgoing.stage));
                    }
                }
            }
        }
    }

    /// Reset every stage's internal state
    pub fn reset(&mut self) {
        for active in self.slots.iter_mut().flatten() {
            active.stage.reset();
            if let Some(outgoing) = active.outgoing.as_mut() {
                outgoing.stage.reset();
            }
        }
    }
}
