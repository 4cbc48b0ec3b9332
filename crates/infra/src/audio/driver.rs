//! Control/audio handoff for the effect graph
//!
//! The controller plans patches on the control thread and pushes them into a
//! bounded lock-free queue. The driver pops every pending patch at the start
//! of a block, applies them in order and sends displaced stages and parameter
//! snapshots back through a second queue, where the controller drops them.
//!
//! Performance characteristics of the driver side:
//! - Lock-free (crossbeam `ArrayQueue` in both directions)
//! - No allocations once constructed
//! - Keeps processing the previous graph when nothing arrived

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::queue::ArrayQueue;
use crossbeam::utils::CachePadded;
use tracing::{debug, info, warn};
use timbre_core::domain::{
    AudioBlock, Degradation, EffectGraph, EffectGraphBuilder, EffectParameters, EngineConfig,
    GraphPatch, Retired, SLOT_COUNT,
};

use crate::error::EngineError;

/// Patches that may wait for the audio thread at once
pub const PATCH_QUEUE_CAPACITY: usize = 16;

/// Room for everything a full patch queue can displace, twice over
pub const GARBAGE_QUEUE_CAPACITY: usize = PATCH_QUEUE_CAPACITY * (SLOT_COUNT + 1) * 2;

type Result<T> = std::result::Result<T, EngineError>;

/// Outcome of a successful [`EngineController::submit`]
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitReport {
    pub version: u64,
    /// Stages that could not be built and run bypassed
    pub degradations: Vec<Degradation>,
}

/// Constructs matched controller/driver pairs
pub struct Engine;

impl Engine {
    /// Build the engine with `initial` applied and return both halves
    ///
    /// The driver is meant to be moved into the audio callback.
    pub fn create(
        config: EngineConfig,
        initial: EffectParameters,
    ) -> Result<(EngineController, EngineDriver)> {
        let mut builder = EffectGraphBuilder::new(config.clone())?;
        let plan = builder.plan(initial)?;
        let graph = EffectGraph::new(&config, plan.patch)?;
        builder.commit(&plan.receipt);

        let patches = Arc::new(ArrayQueue::new(PATCH_QUEUE_CAPACITY));
        let garbage = Arc::new(ArrayQueue::new(GARBAGE_QUEUE_CAPACITY));
        let applied = Arc::new(CachePadded::new(AtomicU64::new(plan.receipt.version)));

        info!(
            sample_rate = config.sample_rate.hz(),
            channels = config.channels.count(),
            max_block = config.max_block_size,
            "Engine created"
        );

        let channels = config.channels.count() as usize;
        let controller = EngineController {
            builder,
            patches: Arc::clone(&patches),
            garbage: Arc::clone(&garbage),
            applied: Arc::clone(&applied),
            initial_degradations: plan.receipt.degradations,
            submitted: plan.receipt.version,
        };
        let driver = EngineDriver {
            block: AudioBlock::new(channels, config.max_block_size),
            graph,
            patches,
            garbage,
            applied,
            dropped_on_audio_thread: 0,
        };
        Ok((controller, driver))
    }
}

/// Control-side handle: plans patches and releases retired state
pub struct EngineController {
    builder: EffectGraphBuilder,
    patches: Arc<ArrayQueue<GraphPatch>>,
    garbage: Arc<ArrayQueue<Retired>>,
    applied: Arc<CachePadded<AtomicU64>>,
    initial_degradations: Vec<Degradation>,
    submitted: u64,
}

impl EngineController {
    /// Plan `params` against the last submitted snapshot and hand it over
    ///
    /// Either the whole patch reaches the audio thread or nothing changes.
    ///
    /// # Errors
    /// `QueueFull` when the audio thread is not draining patches; the caller
    /// can retry after the next block.
    pub fn submit(&mut self, params: EffectParameters) -> Result<SubmitReport> {
        self.collect_garbage();

        let plan = self.builder.plan(params)?;
        let version = plan.patch.version;
        if self.patches.push(plan.patch).is_err() {
            warn!(version, "Patch queue full, dropping update");
            return Err(EngineError::QueueFull);
        }
        self.builder.commit(&plan.receipt);
        self.submitted = version;

        Ok(SubmitReport {
            version,
            degradations: plan.receipt.degradations,
        })
    }

    /// Drop everything the audio thread has retired; returns the count
    pub fn collect_garbage(&self) -> usize {
        let mut released = 0;
        while let Some(item) = self.garbage.pop() {
            drop(item);
            released += 1;
        }
        if released > 0 {
            debug!(released, "Released retired graph state");
        }
        released
    }

    /// Version of the newest patch the audio thread has applied
    pub fn applied_version(&self) -> u64 {
        self.applied.load(Ordering::Acquire)
    }

    /// Version of the newest patch handed to the audio thread
    pub fn submitted_version(&self) -> u64 {
        self.submitted
    }

    /// Last submitted parameter snapshot
    pub fn params(&self) -> Option<&EffectParameters> {
        self.builder.applied().map(|p| p.as_ref())
    }

    /// Degradations reported while building the initial graph
    pub fn initial_degradations(&self) -> &[Degradation] {
        &self.initial_degradations
    }

    pub fn config(&self) -> &EngineConfig {
        self.builder.config()
    }
}

/// Audio-side handle, owned by the real-time callback
pub struct EngineDriver {
    graph: EffectGraph,
    /// Scratch for interleaved processing, `max_block_size` frames
    block: AudioBlock,
    patches: Arc<ArrayQueue<GraphPatch>>,
    garbage: Arc<ArrayQueue<Retired>>,
    applied: Arc<CachePadded<AtomicU64>>,
    dropped_on_audio_thread: u64,
}

impl EngineDriver {
    /// Apply pending patches, then process `block` in place
    ///
    /// # Errors
    /// `InvalidBlock` when the channel count does not match; the block is
    /// silenced.
    pub fn process_block(&mut self, block: &mut AudioBlock) -> Result<()> {
        self.poll_patches();
        let garbage = &self.garbage;
        let dropped = &mut self.dropped_on_audio_thread;
        self.graph
            .process(block, &mut |item| retire(garbage, dropped, item))
            .map_err(EngineError::from_process)
    }

    /// Process interleaved samples from `input` into `output`
    ///
    /// Any length that is a multiple of the channel count is accepted; long
    /// buffers are processed in chunks of the configured block size.
    ///
    /// # Errors
    /// `InvalidBlock` when the lengths differ or do not divide into whole
    /// frames; `output` is silenced.
    pub fn process_interleaved(&mut self, input: &[f32], output: &mut [f32]) -> Result<()> {
        self.poll_patches();

        let channels = self.graph.channels();
        if input.len() != output.len() || input.len() % channels != 0 {
            output.fill(0.0);
            return Err(EngineError::InvalidBlock(
                "input and output lengths differ or split a frame",
            ));
        }

        let chunk = self.graph.max_block() * channels;
        let mut offset = 0;
        while offset < input.len() {
            let end = (offset + chunk).min(input.len());
            if let Err(e) = self.process_chunk(&input[offset..end], &mut output[offset..end]) {
                output.fill(0.0);
                return Err(e);
            }
            offset = end;
        }
        Ok(())
    }

    fn process_chunk(&mut self, input: &[f32], output: &mut [f32]) -> Result<()> {
        self.block
            .read_interleaved(input)
            .map_err(EngineError::from_process)?;
        let garbage = &self.garbage;
        let dropped = &mut self.dropped_on_audio_thread;
        self.graph
            .process(&mut self.block, &mut |item| retire(garbage, dropped, item))
            .map_err(EngineError::from_process)?;
        self.block.write_interleaved(output);
        Ok(())
    }

    /// Version of the patch currently running
    pub fn version(&self) -> u64 {
        self.graph.version()
    }

    pub fn graph(&self) -> &EffectGraph {
        &self.graph
    }

    /// Items released on the audio thread because the garbage queue was full
    pub fn dropped_on_audio_thread(&self) -> u64 {
        self.dropped_on_audio_thread
    }

    fn poll_patches(&mut self) {
        let mut applied = None;
        while let Some(patch) = self.patches.pop() {
            let version = patch.version;
            let garbage = &self.garbage;
            let dropped = &mut self.dropped_on_audio_thread;
            self.graph
                .apply(patch, &mut |item| retire(garbage, dropped, item));
            applied = Some(version);
        }
        if let Some(version) = applied {
            self.applied.store(version, Ordering::Release);
        }
    }
}

impl Drop for EngineDriver {
    fn drop(&mut self) {
        info!(
            version = self.graph.version(),
            "Shutting down engine driver"
        );
        if self.dropped_on_audio_thread > 0 {
            warn!(
                count = self.dropped_on_audio_thread,
                "Retired state was released on the audio thread"
            );
        }
    }
}

#[inline]
fn retire(garbage: &ArrayQueue<Retired>, dropped: &mut u64, item: Retired) {
    // queue full: release here rather than block
    if let Err(item) = garbage.push(item) {
        *dropped += 1;
        drop(item);
    }
}
