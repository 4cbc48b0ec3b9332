//! Timbre CLI Application

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use timbre_core::domain::config::{
    factory_preset, load_preset_file, save_preset_file, ConfigManager, ConfigWatcher,
};
use timbre_core::domain::{ChannelCount, EffectParameters, EngineConfig, SampleRate};
use timbre_infra::export::save_wav;
use timbre_infra::{Engine, EngineController, RealtimeEngine};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "timbre")]
#[command(about = "Real-time audio effects engine", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process a WAV file offline
    Render {
        input: PathBuf,
        output: PathBuf,
        /// Effect preset (TOML); the factory preset when omitted
        #[arg(long)]
        preset: Option<PathBuf>,
        /// Frames per processing block
        #[arg(long, default_value_t = 512)]
        block_size: usize,
        /// Seconds of silence appended so reverb and echo tails ring out
        #[arg(long, default_value_t = 0.0)]
        tail: f32,
        /// Seed for the reverb and granular random sources
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Run the engine on the default audio devices
    Live {
        /// Effect preset (TOML); the configured preset when omitted
        #[arg(long)]
        preset: Option<PathBuf>,
        /// Reload the preset whenever the file changes
        #[arg(long, requires = "preset")]
        watch: bool,
    },
    /// Preset utilities
    Preset {
        #[command(subcommand)]
        action: PresetAction,
    },
}

#[derive(Subcommand)]
enum PresetAction {
    /// Write the factory default preset
    Init { path: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    match cli.command {
        Command::Render {
            input,
            output,
            preset,
            block_size,
            tail,
            seed,
        } => render(&input, &output, preset.as_deref(), block_size, tail, seed).await,
        Command::Live { preset, watch } => live(preset, watch).await,
        Command::Preset {
            action: PresetAction::Init { path },
        } => {
            save_preset_file(&factory_preset(), &path).await?;
            info!(path = %path.display(), "Factory preset written");
            Ok(())
        }
    }
}

async fn load_preset_or(path: Option<&Path>, fallback: EffectParameters) -> anyhow::Result<EffectParameters> {
    match path {
        Some(path) => load_preset_file(path)
            .await
            .with_context(|| format!("loading preset {}", path.display())),
        None => Ok(fallback),
    }
}

/// Read a WAV file as interleaved f32
fn read_wav(path: &Path) -> anyhow::Result<(hound::WavSpec, Vec<f32>)> {
    let mut reader =
        hound::WavReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let spec = reader.spec();
    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 * scale))
                .collect::<Result<Vec<_>, _>>()?
        }
    };
    Ok((spec, samples))
}

async fn render(
    input: &Path,
    output: &Path,
    preset: Option<&Path>,
    block_size: usize,
    tail: f32,
    seed: Option<u64>,
) -> anyhow::Result<()> {
    if block_size == 0 {
        bail!("block size must be positive");
    }
    let params = load_preset_or(preset, factory_preset()).await?;
    let (spec, mut samples) = read_wav(input)?;
    let channels = spec.channels as usize;

    let tail_frames = (tail.max(0.0) * spec.sample_rate as f32) as usize;
    samples.resize(samples.len() + tail_frames * channels, 0.0);

    let mut config = EngineConfig::new(
        SampleRate::from_hz(spec.sample_rate),
        ChannelCount::from(spec.channels),
    );
    config.max_block_size = block_size;
    config.seed = seed;

    let (controller, mut driver) = Engine::create(config, params)?;
    for degradation in controller.initial_degradations() {
        warn!("Stage degraded: {}", degradation);
    }

    info!(
        input = %input.display(),
        frames = samples.len() / channels,
        channels,
        sample_rate = spec.sample_rate,
        "Rendering"
    );

    let mut rendered = vec![0.0; samples.len()];
    let chunk = block_size * channels;
    for (src, dst) in samples.chunks(chunk).zip(rendered.chunks_mut(chunk)) {
        driver.process_interleaved(src, dst)?;
    }
    drop(driver);
    controller.collect_garbage();

    save_wav(output, &rendered, spec.channels, spec.sample_rate)?;
    info!(output = %output.display(), "Render complete");
    Ok(())
}

async fn live(preset: Option<PathBuf>, watch: bool) -> anyhow::Result<()> {
    let manager = ConfigManager::new(ConfigManager::default_config_dir()?);
    let config = manager.load().await;
    let params = load_preset_or(preset.as_deref(), config.preset.clone()).await?;

    let (mut controller, driver) = Engine::create(config.engine.clone(), params)?;
    for degradation in controller.initial_degradations() {
        warn!("Stage degraded: {}", degradation);
    }
    let engine = RealtimeEngine::start(&config.engine, driver)?;
    for degradation in engine.degradations() {
        warn!("Host degraded: {}", degradation);
    }

    let watcher = match (&preset, watch) {
        (Some(path), true) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."))
                .to_path_buf();
            Some(ConfigWatcher::new(dir).await?)
        }
        _ => None,
    };
    let mut changes = watcher.as_ref().map(ConfigWatcher::subscribe);

    info!("Running, press Ctrl+C to stop");
    let mut housekeeping = tokio::time::interval(Duration::from_millis(100));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = housekeeping.tick() => {
                controller.collect_garbage();
            }
            changed = async {
                match changes.as_mut() {
                    Some(rx) => rx.recv().await.ok(),
                    None => std::future::pending().await,
                }
            } => {
                if let (Some(changed), Some(path)) = (changed, preset.as_deref()) {
                    if changed.file_name() == path.file_name() {
                        reload(&mut controller, path).await;
                    }
                }
            }
        }
    }

    drop(engine);
    controller.collect_garbage();
    info!("Stopped");
    Ok(())
}

async fn reload(controller: &mut EngineController, path: &Path) {
    match load_preset_file(path).await {
        Ok(params) => match controller.submit(params) {
            Ok(report) => {
                info!(version = report.version, "Preset reloaded");
                for degradation in &report.degradations {
                    warn!("Stage degraded: {}", degradation);
                }
            }
            Err(e) => warn!("Preset not applied: {}", e),
        },
        Err(e) => warn!(path = %path.display(), "Preset reload failed: {}", e),
    }
}
