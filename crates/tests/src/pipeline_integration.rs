//! Integration tests for the effect pipeline
//!
//! These tests drive the engine the way a host does: parameter snapshots go
//! in through the controller, interleaved audio goes through the driver and
//! rendered output comes out as WAV.

use timbre_core::domain::config::{factory_preset, load_preset_file, save_preset_file};
use timbre_core::domain::params::Scale;
use timbre_core::domain::{ChannelCount, EffectParameters, EngineConfig, SampleRate};
use timbre_infra::export::{encode_wav, save_wav, WAV_HEADER_LEN};
use timbre_infra::{Engine, EngineController, EngineDriver};

fn engine_config(channels: ChannelCount) -> EngineConfig {
    let mut config = EngineConfig::new(SampleRate::Hz44100, channels).with_seed(1234);
    config.max_block_size = 256;
    config.fade_ms = 2.0;
    config
}

fn generate_sine_wave(frequency: f32, sample_rate: u32, frames: usize, channels: usize) -> Vec<f32> {
    (0..frames)
        .flat_map(|i| {
            let s = (2.0 * std::f32::consts::PI * frequency * i as f32 / sample_rate as f32).sin()
                * 0.5;
            std::iter::repeat(s).take(channels)
        })
        .collect()
}

fn render(driver: &mut EngineDriver, input: &[f32], block: usize) -> Vec<f32> {
    let mut output = vec![0.0; input.len()];
    for (src, dst) in input.chunks(block).zip(output.chunks_mut(block)) {
        driver.process_interleaved(src, dst).unwrap();
    }
    output
}

fn everything_enabled() -> EffectParameters {
    let mut params = EffectParameters::default();
    params.filters.bass_db = 4.0;
    params.filters.treble_db = -3.0;
    params.reverb.enabled = true;
    params.reverb.duration = 0.3;
    params.echo.enabled = true;
    params.distortion.enabled = true;
    params.chorus.enabled = true;
    params.flanger.enabled = true;
    params.phaser.enabled = true;
    params.compressor.enabled = true;
    params.pitch_shift.enabled = true;
    params.auto_tune.enabled = true;
    params.auto_tune.scale = Scale::Minor;
    params.formant.enabled = true;
    params.time_stretch.enabled = true;
    params.granular.enabled = true;
    params
}

// ============================================================================
// BYPASS AND IDENTITY
// ============================================================================

#[test]
fn test_disabled_engine_is_bit_exact() {
    let (_controller, mut driver) =
        Engine::create(engine_config(ChannelCount::Stereo), EffectParameters::bypassed()).unwrap();
    let input = generate_sine_wave(440.0, 44100, 4410, 2);
    let output = render(&mut driver, &input, 300);
    assert_eq!(input, output);
}

#[test]
fn test_flat_shelves_are_transparent() {
    let (_controller, mut driver) =
        Engine::create(engine_config(ChannelCount::Mono), EffectParameters::default()).unwrap();
    let input = generate_sine_wave(1000.0, 44100, 2048, 1);
    let output = render(&mut driver, &input, 128);
    for (a, b) in input.iter().zip(&output) {
        assert!((a - b).abs() < 1e-4);
    }
}

#[test]
fn test_disable_fades_then_becomes_exact() {
    let (mut controller, mut driver) =
        Engine::create(engine_config(ChannelCount::Mono), everything_enabled()).unwrap();
    let input = generate_sine_wave(330.0, 44100, 1024, 1);
    render(&mut driver, &input, 256);

    controller.submit(EffectParameters::bypassed()).unwrap();
    // 2 ms at 44.1 kHz is 88 samples, all inside the first block
    render(&mut driver, &input[..256], 256);
    let output = render(&mut driver, &input, 256);
    assert_eq!(input, output);
}

// ============================================================================
// FULL CHAIN
// ============================================================================

#[test]
fn test_full_chain_stays_finite() {
    let (_controller, mut driver) =
        Engine::create(engine_config(ChannelCount::Stereo), everything_enabled()).unwrap();
    let input = generate_sine_wave(220.0, 44100, 44100, 2);
    let output = render(&mut driver, &input, 512);

    assert_eq!(output.len(), input.len());
    assert!(output.iter().all(|s| s.is_finite()));
    assert!(output.iter().any(|s| s.abs() > 1e-3));
}

#[test]
fn test_default_reverb_stays_in_range() {
    let mut params = EffectParameters::default();
    params.reverb.enabled = true;
    let (_controller, mut driver) =
        Engine::create(engine_config(ChannelCount::Stereo), params).unwrap();
    let input = generate_sine_wave(220.0, 44100, 44100, 2);
    let output = render(&mut driver, &input, 512);

    let peak = output.iter().fold(0.0_f32, |m, s| m.max(s.abs()));
    assert!(peak < 1.0, "peak {}", peak);
    assert!(peak > 0.25);
}

#[test]
fn test_same_seed_renders_identically() {
    let input = generate_sine_wave(440.0, 44100, 8192, 2);

    let (_c1, mut first) =
        Engine::create(engine_config(ChannelCount::Stereo), everything_enabled()).unwrap();
    let (_c2, mut second) =
        Engine::create(engine_config(ChannelCount::Stereo), everything_enabled()).unwrap();

    assert_eq!(render(&mut first, &input, 512), render(&mut second, &input, 512));
}

#[test]
fn test_block_size_does_not_change_deterministic_stages() {
    let mut params = EffectParameters::default();
    params.filters.bass_db = 6.0;
    params.echo.enabled = true;
    params.compressor.enabled = true;
    let input = generate_sine_wave(150.0, 44100, 4096, 1);

    let (_c1, mut a) = Engine::create(engine_config(ChannelCount::Mono), params.clone()).unwrap();
    let (_c2, mut b) = Engine::create(engine_config(ChannelCount::Mono), params).unwrap();

    let left = render(&mut a, &input, 64);
    let right = render(&mut b, &input, 1000);
    for (x, y) in left.iter().zip(&right) {
        assert!((x - y).abs() < 1e-5);
    }
}

// ============================================================================
// LIVE UPDATES
// ============================================================================

fn toggle_every_stage(controller: &mut EngineController, driver: &mut EngineDriver) {
    let input = generate_sine_wave(500.0, 44100, 256, 2);
    let mut params = EffectParameters::default();
    let steps: [fn(&mut EffectParameters, bool); 6] = [
        |p, on| p.reverb.enabled = on,
        |p, on| p.echo.enabled = on,
        |p, on| p.distortion.enabled = on,
        |p, on| p.phaser.enabled = on,
        |p, on| p.granular.enabled = on,
        |p, on| p.time_stretch.enabled = on,
    ];
    for on in [true, false] {
        for step in steps {
            step(&mut params, on);
            controller.submit(params.clone()).unwrap();
            let output = render(driver, &input, 512);
            assert!(output.iter().all(|s| s.is_finite()));
        }
    }
}

#[test]
fn test_toggling_stages_while_running() {
    let (mut controller, mut driver) =
        Engine::create(engine_config(ChannelCount::Stereo), EffectParameters::default()).unwrap();
    toggle_every_stage(&mut controller, &mut driver);

    assert_eq!(controller.applied_version(), controller.submitted_version());
    // let the last fades finish, then everything must be back
    let input = generate_sine_wave(500.0, 44100, 512, 2);
    render(&mut driver, &input, 512);
    controller.collect_garbage();
    assert_eq!(driver.graph().active_stages().count(), 1);
    assert_eq!(driver.dropped_on_audio_thread(), 0);
}

#[test]
fn test_failed_reverb_leaves_rest_of_chain_running() {
    let (mut controller, mut driver) =
        Engine::create(engine_config(ChannelCount::Mono), EffectParameters::default()).unwrap();
    let mut params = EffectParameters::default();
    params.reverb.enabled = true;
    params.reverb.duration = 0.0;
    params.echo.enabled = true;

    let report = controller.submit(params).unwrap();
    assert_eq!(report.degradations.len(), 1);

    let input = generate_sine_wave(300.0, 44100, 512, 1);
    let output = render(&mut driver, &input, 256);
    assert!(output.iter().all(|s| s.is_finite()));
    let stages: Vec<_> = driver.graph().active_stages().map(|k| k.name()).collect();
    assert_eq!(stages, vec!["shelving", "echo"]);
}

// ============================================================================
// PRESETS AND EXPORT
// ============================================================================

#[tokio::test]
async fn test_preset_file_drives_engine() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("warm.toml");
    let mut preset = factory_preset();
    preset.distortion.enabled = true;
    save_preset_file(&preset, &path).await.unwrap();

    let loaded = load_preset_file(&path).await.unwrap();
    assert_eq!(loaded, preset);

    let (controller, _driver) =
        Engine::create(engine_config(ChannelCount::Stereo), loaded).unwrap();
    assert!(controller.params().unwrap().distortion.enabled);
}

#[test]
fn test_one_second_of_mono_silence() {
    let bytes = encode_wav(&vec![0.0; 44100], 1, 44100).unwrap();
    assert_eq!(bytes.len(), 44 + 88200);
    assert_eq!(&bytes[..4], b"RIFF");
    assert_eq!(&bytes[36..40], b"data");
}

#[test]
fn test_rendered_file_reads_back() {
    let (_controller, mut driver) =
        Engine::create(engine_config(ChannelCount::Stereo), factory_preset()).unwrap();
    let input = generate_sine_wave(440.0, 44100, 22050, 2);
    let output = render(&mut driver, &input, 512);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("render.wav");
    save_wav(&path, &output, 2, 44100).unwrap();

    let metadata = std::fs::metadata(&path).unwrap();
    assert_eq!(metadata.len() as usize, WAV_HEADER_LEN + output.len() * 2);

    let mut reader = hound::WavReader::open(&path).unwrap();
    assert_eq!(reader.spec().channels, 2);
    assert_eq!(reader.spec().sample_rate, 44100);
    assert_eq!(reader.duration(), 22050);
    let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    assert_eq!(samples.len(), output.len());
}
