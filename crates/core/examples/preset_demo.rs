//! Example demonstrating configuration, presets and the effect graph
//!
//! Run with: cargo run --package timbre-core --example preset_demo

use timbre_core::domain::config::{ConfigManager, PresetManager, TimbreConfig};
use timbre_core::domain::{AudioBlock, EffectGraph, EffectGraphBuilder, StageKind};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("timbre_core=debug,info")
        .init();

    let workdir = tempfile::tempdir()?;

    println!("=== Timbre Preset Demo ===\n");

    // 1. Factory default configuration
    println!("1. Creating factory default configuration...");
    let config = TimbreConfig::factory_default();
    let enabled: Vec<_> = StageKind::CANONICAL_ORDER
        .iter()
        .filter(|kind| kind.is_enabled(&config.preset))
        .collect();
    println!("   ✓ Enabled stages: {:?}", enabled);

    // 2. Save and reload through the config manager
    println!("\n2. Saving and reloading configuration...");
    let manager = ConfigManager::new(workdir.path().to_path_buf());
    manager.save(&config).await?;
    let loaded = manager.load().await;
    println!(
        "   ✓ Loaded {} Hz, {} channels, blocks of {}",
        loaded.engine.sample_rate.hz(),
        loaded.engine.channels.count(),
        loaded.engine.max_block_size
    );

    // 3. Presets
    println!("\n3. Preset management:");
    let presets = PresetManager::new(manager.preset_dir());
    let mut cave = loaded.preset.clone();
    cave.reverb.duration = 4.0;
    cave.reverb.mix = 0.6;
    cave.echo.enabled = true;
    presets.save_preset("cave", &cave).await?;
    presets.save_preset("factory", &loaded.preset).await?;
    for name in presets.list_presets().await? {
        println!("   - {}", name);
    }

    // 4. Run a block through the graph
    println!("\n4. Processing one block with 'cave'...");
    let cave = presets.load_preset("cave").await?;
    let engine = loaded.engine.clone().with_seed(42);
    let mut builder = EffectGraphBuilder::new(engine.clone())?;
    let plan = builder.plan(cave)?;
    builder.commit(&plan.receipt);
    let mut graph = EffectGraph::new(&engine, plan.patch)?;

    let frames = engine.max_block_size;
    let channels = engine.channels.count() as usize;
    let tone: Vec<f32> = (0..frames)
        .map(|i| (2.0 * std::f32::consts::PI * 220.0 * i as f32 / 48000.0).sin() * 0.5)
        .collect();
    let mut block = AudioBlock::from_channels(&vec![tone; channels]);
    let input_peak = block.peak();
    graph.process(&mut block, &mut |_| {})?;
    println!(
        "   ✓ Stages {:?}, peak {:.3} -> {:.3}",
        graph.active_stages().collect::<Vec<_>>(),
        input_peak,
        block.peak()
    );

    println!("\n=== Demo Complete ===");
    Ok(())
}
