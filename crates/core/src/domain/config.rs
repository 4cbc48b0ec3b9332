//! Configuration management for Timbre
//!
//! This module provides:
//! - Engine configuration (stream shape, block size, fades, reverb partition)
//! - Preset system: [`EffectParameters`] snapshots stored as TOML
//! - Hot-reload support via file system watcher

use crate::domain::audio::{AudioError, ChannelCount, SampleRate};
use crate::domain::dsp::StageContext;
use crate::domain::params::EffectParameters;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument};

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("File watch error: {0}")]
    WatchError(#[from] notify::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Preset not found: {0}")]
    PresetNotFound(String),
}

/// Fixed properties of the processing engine
///
/// These never change while an engine is running; a new value means a new
/// engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: SampleRate,
    pub channels: ChannelCount,
    /// Largest block processed in one pass; bigger host blocks are split
    pub max_block_size: usize,
    /// Cross-fade length when stages enter or leave the chain (ms)
    pub fade_ms: f32,
    /// Reverb convolution partition size in samples
    pub reverb_partition: usize,
    /// Seed for impulse responses and grain scheduling; random when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: SampleRate::Hz48000,
            channels: ChannelCount::Stereo,
            max_block_size: 512,
            fade_ms: 10.0,
            reverb_partition: 256,
            seed: None,
        }
    }
}

impl EngineConfig {
    pub fn new(sample_rate: SampleRate, channels: ChannelCount) -> Self {
        Self {
            sample_rate,
            channels,
            ..Self::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Check the values a running engine depends on
    pub fn validate(&self) -> std::result::Result<(), AudioError> {
        if self.sample_rate.hz() == 0 {
            return Err(AudioError::InvalidConfiguration(
                "sample rate must be positive".to_string(),
            ));
        }
        if self.channels.count() == 0 {
            return Err(AudioError::InvalidConfiguration(
                "channel count must be positive".to_string(),
            ));
        }
        if self.max_block_size == 0 {
            return Err(AudioError::InvalidConfiguration(
                "max block size must be positive".to_string(),
            ));
        }
        if self.reverb_partition == 0 {
            return Err(AudioError::InvalidConfiguration(
                "reverb partition must be positive".to_string(),
            ));
        }
        if !self.fade_ms.is_finite() || self.fade_ms < 0.0 {
            return Err(AudioError::InvalidConfiguration(format!(
                "fade length {} ms is not valid",
                self.fade_ms
            )));
        }
        Ok(())
    }

    pub fn stage_context(&self) -> StageContext {
        StageContext::new(
            self.sample_rate.as_f32(),
            self.channels.count() as usize,
            self.max_block_size,
        )
    }

    /// Fade length in samples, at least one
    pub fn fade_samples(&self) -> usize {
        ((self.fade_ms / 1000.0 * self.sample_rate.as_f32()).round() as usize).max(1)
    }
}

/// Complete Timbre configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimbreConfig {
    pub engine: EngineConfig,
    /// Effect settings applied at startup
    pub preset: EffectParameters,
}

impl TimbreConfig {
    /// Load configuration from TOML file
    #[instrument(skip(path))]
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&contents)?;
        config
            .engine
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        debug!("Configuration loaded successfully");
        Ok(config)
    }

    /// Save configuration to TOML file
    #[instrument(skip(self, path))]
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!(path = %path.display(), "Saving configuration");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let toml_str = toml::to_string_pretty(self)?;
        fs::write(path, toml_str).await?;

        debug!("Configuration saved successfully");
        Ok(())
    }

    /// Create factory default configuration
    ///
    /// A gentle starting chain: flat shelves, a short room reverb and a
    /// light compressor.
    pub fn factory_default() -> Self {
        let mut config = Self::default();
        config.preset = factory_preset();
        config
    }
}

/// The preset written by `preset init` and used when no config exists
pub fn factory_preset() -> EffectParameters {
    let mut preset = EffectParameters::default();
    preset.reverb.enabled = true;
    preset.reverb.mix = 0.2;
    preset.reverb.duration = 1.2;
    preset.compressor.enabled = true;
    preset
}

/// Load an effect preset from a TOML file
#[instrument(skip(path))]
pub async fn load_preset_file<P: AsRef<Path>>(path: P) -> Result<EffectParameters> {
    let path = path.as_ref();
    debug!(path = %path.display(), "Loading preset");

    let contents = fs::read_to_string(path).await?;
    let preset: EffectParameters = toml::from_str(&contents)?;
    Ok(preset.clamped())
}

/// Save an effect preset to a TOML file
#[instrument(skip(preset, path))]
pub async fn save_preset_file<P: AsRef<Path>>(preset: &EffectParameters, path: P) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, toml::to_string_pretty(preset)?).await?;
    debug!(path = %path.display(), "Preset saved");
    Ok(())
}

/// File system watcher for hot-reload
pub struct ConfigWatcher {
    _watcher: notify::RecommendedWatcher,
    config_tx: broadcast::Sender<PathBuf>,
}

impl ConfigWatcher {
    /// Watch `preset_dir` for created or modified `.toml` files
    pub async fn new(preset_dir: PathBuf) -> Result<Self> {
        use notify::Watcher;

        let (config_tx, _config_rx) = broadcast::channel(32);

        fs::create_dir_all(&preset_dir).await?;

        let tx_clone = config_tx.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                if matches!(
                    event.kind,
                    notify::EventKind::Create(_) | notify::EventKind::Modify(_)
                ) {
                    for path in event.paths {
                        if path.extension().and_then(|e| e.to_str()) == Some("toml") {
                            // no receivers is not an error for a watcher
                            if tx_clone.receiver_count() > 0 {
                                if let Err(e) = tx_clone.send(path) {
                                    error!("Failed to send preset change event: {}", e);
                                }
                            }
                        }
                    }
                }
            }
        })?;

        watcher.watch(&preset_dir, notify::RecursiveMode::Recursive)?;

        info!(
            path = %preset_dir.display(),
            "Preset watcher started"
        );

        Ok(Self {
            _watcher: watcher,
            config_tx,
        })
    }

    /// Subscribe to preset change events
    pub fn subscribe(&self) -> broadcast::Receiver<PathBuf> {
        self.config_tx.subscribe()
    }
}

/// Preset manager
///
/// Presets are `<name>.toml` files in one directory, each holding a complete
/// [`EffectParameters`] snapshot.
pub struct PresetManager {
    preset_dir: PathBuf,
}

impl PresetManager {
    pub fn new(preset_dir: PathBuf) -> Self {
        Self { preset_dir }
    }

    pub fn preset_dir(&self) -> &Path {
        &self.preset_dir
    }

    fn preset_path(&self, name: &str) -> PathBuf {
        self.preset_dir.join(format!("{}.toml", name))
    }

    /// List all available presets
    #[instrument(skip(self))]
    pub async fn list_presets(&self) -> Result<Vec<String>> {
        let mut presets = Vec::new();

        let mut entries = fs::read_dir(&self.preset_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == "toml").unwrap_or(false) {
                if let Some(name) = path.file_stem().and_then(|n| n.to_str()) {
                    presets.push(name.to_string());
                }
            }
        }

        presets.sort();
        debug!(count = presets.len(), "Listed presets");
        Ok(presets)
    }

    /// Load a preset by name
    #[instrument(skip(self))]
    pub async fn load_preset(&self, name: &str) -> Result<EffectParameters> {
        let path = self.preset_path(name);

        if !path.exists() {
            return Err(ConfigError::PresetNotFound(name.to_string()));
        }

        load_preset_file(&path).await
    }

    /// Save a preset by name
    #[instrument(skip(self, preset))]
    pub async fn save_preset(&self, name: &str, preset: &EffectParameters) -> Result<()> {
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(ConfigError::Invalid(format!("invalid preset name '{}'", name)));
        }
        save_preset_file(preset, self.preset_path(name)).await
    }

    /// Delete a preset by name
    #[instrument(skip(self))]
    pub async fn delete_preset(&self, name: &str) -> Result<()> {
        let path = self.preset_path(name);

        if !path.exists() {
            return Err(ConfigError::PresetNotFound(name.to_string()));
        }

        fs::remove_file(&path).await?;
        info!(name, "Preset deleted");
        Ok(())
    }

    /// Check if a preset exists
    pub async fn preset_exists(&self, name: &str) -> bool {
        fs::try_exists(self.preset_path(name)).await.unwrap_or(false)
    }
}

/// Configuration manager for the main Timbre config
///
/// Manages the main configuration file at `~/.config/timbre/config.toml`.
pub struct ConfigManager {
    config_dir: PathBuf,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(config_dir: PathBuf) -> Self {
        let config_path = config_dir.join("config.toml");

        Self {
            config_dir,
            config_path,
        }
    }

    /// Get the default config directory path
    ///
    /// `~/.config/timbre` on Linux, the platform equivalent elsewhere
    pub fn default_config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("timbre"))
            .ok_or_else(|| ConfigError::Invalid("Could not determine config directory".to_string()))
    }

    /// Directory holding user presets
    pub fn preset_dir(&self) -> PathBuf {
        self.config_dir.join("presets")
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load configuration from file
    ///
    /// If the config file doesn't exist, returns factory default.
    /// If the config file is corrupt, backs it up and returns factory default.
    #[instrument(skip(self))]
    pub async fn load(&self) -> TimbreConfig {
        if !self.config_path.exists() {
            info!(
                path = %self.config_path.display(),
                "Config file not found, creating factory default"
            );

            let config = TimbreConfig::factory_default();

            if let Err(e) = config.save_to_file(&self.config_path).await {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to save factory default config"
                );
            }

            return config;
        }

        match TimbreConfig::load_from_file(&self.config_path).await {
            Ok(config) => config,
            Err(e) => {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to load config, using factory default"
                );

                let backup_path = self.config_path.with_extension("toml.corrupt");
                if let Err(copy_err) = fs::copy(&self.config_path, &backup_path).await {
                    error!(
                        path = %backup_path.display(),
                        error = %copy_err,
                        "Failed to backup corrupt config"
                    );
                }

                TimbreConfig::factory_default()
            }
        }
    }

    /// Save configuration to file
    #[instrument(skip(self, config))]
    pub async fn save(&self, config: &TimbreConfig) -> Result<()> {
        fs::create_dir_all(&self.config_dir).await?;

        config.save_to_file(&self.config_path).await
    }

    /// Check if config file exists
    pub fn exists(&self) -> bool {
        self.config_path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::params::{Oversample, Scale};
    use tempfile::TempDir;

    #[test]
    fn test_config_serialization() {
        let config = TimbreConfig::factory_default();

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: TimbreConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed, config);
        assert!(toml_str.contains("sample_rate = 48000"));
    }

    #[test]
    fn test_engine_config_validation() {
        assert!(EngineConfig::default().validate().is_ok());

        let mut config = EngineConfig::default();
        config.max_block_size = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.fade_ms = f32::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fade_samples() {
        let config = EngineConfig::default();
        assert_eq!(config.fade_samples(), 480);

        let mut instant = EngineConfig::default();
        instant.fade_ms = 0.0;
        assert_eq!(instant.fade_samples(), 1);
    }

    #[test]
    fn test_partial_engine_section() {
        let config: TimbreConfig = toml::from_str("[engine]\nsample_rate = 44100\n").unwrap();
        assert_eq!(config.engine.sample_rate, SampleRate::Hz44100);
        assert_eq!(config.engine.max_block_size, 512);
        assert!(config.preset.enabled);
    }

    #[tokio::test]
    async fn test_preset_manager() {
        let temp_dir = TempDir::new().unwrap();
        let manager = PresetManager::new(temp_dir.path().to_path_buf());

        let mut preset = factory_preset();
        preset.distortion.enabled = true;
        preset.distortion.oversample = Oversample::X2;
        preset.auto_tune.scale = Scale::Minor;

        manager.save_preset("test_preset", &preset).await.unwrap();
        assert!(manager.preset_exists("test_preset").await);

        let presets = manager.list_presets().await.unwrap();
        assert_eq!(presets, vec!["test_preset"]);

        let loaded = manager.load_preset("test_preset").await.unwrap();
        assert_eq!(loaded, preset);

        manager.delete_preset("test_preset").await.unwrap();
        assert!(!manager.preset_exists("test_preset").await);
    }

    #[tokio::test]
    async fn test_missing_preset() {
        let temp_dir = TempDir::new().unwrap();
        let manager = PresetManager::new(temp_dir.path().to_path_buf());
        assert!(matches!(
            manager.load_preset("nope").await,
            Err(ConfigError::PresetNotFound(_))
        ));
        assert!(manager.save_preset("../escape", &factory_preset()).await.is_err());
    }

    #[tokio::test]
    async fn test_preset_file_values_are_clamped() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("loud.toml");
        tokio::fs::write(&path, "[echo]\nenabled = true\nfeedback = 3.0\n")
            .await
            .unwrap();

        let preset = load_preset_file(&path).await.unwrap();
        assert!(preset.echo.enabled);
        assert_eq!(preset.echo.feedback, 0.9);
    }

    #[tokio::test]
    async fn test_save_and_load_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let mut config = TimbreConfig::factory_default();
        config.engine.seed = Some(42);
        config.save_to_file(&config_path).await.unwrap();

        assert!(config_path.exists());

        let loaded = TimbreConfig::load_from_file(&config_path).await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn test_config_manager_recovers_from_corrupt_file() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::new(temp_dir.path().to_path_buf());

        // first load writes the factory default
        let config = manager.load().await;
        assert!(manager.exists());
        assert_eq!(config, TimbreConfig::factory_default());

        tokio::fs::write(manager.config_path(), "not = [valid")
            .await
            .unwrap();
        let recovered = manager.load().await;
        assert_eq!(recovered, TimbreConfig::factory_default());
        assert!(temp_dir.path().join("config.toml.corrupt").exists());
    }
}
