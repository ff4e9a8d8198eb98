use anyhow::{bail, Context, Result};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::gain::SaturationMode;
use crate::params::{
    clamp_drain_rate, clamp_gain, clamp_target_buffer_ms, EngineParameters, DEFAULT_GAIN,
    MAX_TARGET_BUFFER_MS,
};

/// Persistent engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub interruption_policy: InterruptionPolicy,
    pub audio: AudioSettings,
    pub control: ControlSettings,
}

/// Stream layout and buffering, fixed for the lifetime of an open stream pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub input_channels: u16,
    pub output_channels: u16,
    /// Ring buffer capacity; sized for the worst legacy-path jitter
    pub ring_capacity_ms: u32,
    /// Burst size requested on the low-latency transport
    pub burst_frames: u32,
    /// Bursts at or above this duration don't count as low-latency
    pub low_latency_burst_ms: f32,
    /// Delay between starting capture and starting render
    pub warmup_ms: u64,
    pub saturation: SaturationMode,
}

/// Initial values of the runtime-adjustable parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlSettings {
    pub gain: f32,
    pub target_buffer_ms: i32,
    pub drain_rate: f32,
    pub output_device: Option<i32>,
}

/// How the engine reacts to audio focus changes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptionPolicy {
    /// Mute on a transient loss, resume on regain, tear down on permanent loss
    #[default]
    MuteOnTransient,
    /// Keep playing through interruptions
    Ignore,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            input_channels: 1,
            output_channels: 2,
            ring_capacity_ms: 500,
            burst_frames: 192,
            low_latency_burst_ms: 5.0,
            warmup_ms: 5,
            saturation: SaturationMode::Hard,
        }
    }
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            gain: DEFAULT_GAIN,
            target_buffer_ms: 0,
            drain_rate: 0.0,
            output_device: None,
        }
    }
}

impl EngineConfig {
    /// Reject values no stream could be opened with. Out-of-range control
    /// values are not errors; they are clamped when applied.
    pub fn validate(&self) -> Result<()> {
        let audio = &self.audio;
        if audio.input_channels == 0 || audio.output_channels == 0 {
            bail!("channel counts must be at least 1");
        }
        if audio.burst_frames == 0 {
            bail!("burst_frames must be positive");
        }
        if !(audio.low_latency_burst_ms.is_finite() && audio.low_latency_burst_ms > 0.0) {
            bail!(
                "low_latency_burst_ms must be a positive number, got {}",
                audio.low_latency_burst_ms
            );
        }
        if audio.ring_capacity_ms < MAX_TARGET_BUFFER_MS as u32 {
            bail!(
                "ring_capacity_ms must hold at least {}ms, got {}",
                MAX_TARGET_BUFFER_MS,
                audio.ring_capacity_ms
            );
        }
        Ok(())
    }

    /// Shared parameter block seeded from the control settings
    pub fn to_parameters(&self) -> EngineParameters {
        let control = &self.control;
        let params =
            EngineParameters::new(control.gain, control.target_buffer_ms, control.drain_rate);
        params.set_output_device_id(control.output_device);
        params
    }
}

impl ControlSettings {
    pub fn apply_preset(&mut self, preset: LatencyPreset) {
        self.target_buffer_ms = preset.target_buffer_ms();
        self.drain_rate = preset.drain_rate();
    }

    /// Clamp every value into its legal range
    pub fn clamped(&self) -> Self {
        Self {
            gain: clamp_gain(self.gain),
            target_buffer_ms: clamp_target_buffer_ms(self.target_buffer_ms),
            drain_rate: clamp_drain_rate(self.drain_rate),
            output_device: self.output_device,
        }
    }
}

/// Named drain settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyPreset {
    /// No drain control
    Off,
    /// Tight target, full correction each quantum
    Low,
    /// Roomier target, half correction
    Safe,
}

impl LatencyPreset {
    pub const ALL: [LatencyPreset; 3] =
        [LatencyPreset::Off, LatencyPreset::Low, LatencyPreset::Safe];

    pub fn target_buffer_ms(self) -> i32 {
        match self {
            LatencyPreset::Off => 0,
            LatencyPreset::Low => 19,
            LatencyPreset::Safe => 50,
        }
    }

    pub fn drain_rate(self) -> f32 {
        match self {
            LatencyPreset::Off => 0.0,
            LatencyPreset::Low => 1.0,
            LatencyPreset::Safe => 0.5,
        }
    }
}

impl fmt::Display for LatencyPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LatencyPreset::Off => f.write_str("off"),
            LatencyPreset::Low => f.write_str("low"),
            LatencyPreset::Safe => f.write_str("safe"),
        }
    }
}

impl FromStr for LatencyPreset {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(LatencyPreset::Off),
            "low" => Ok(LatencyPreset::Low),
            "safe" => Ok(LatencyPreset::Safe),
            other => bail!("unknown latency preset '{}', expected off, low or safe", other),
        }
    }
}

pub struct ConfigManager {
    config_path: PathBuf,
    config: EngineConfig,
}

impl ConfigManager {
    /// Load from the platform config directory, creating the file if needed
    pub fn new() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::with_path(config_path)
    }

    pub fn with_path(config_path: impl Into<PathBuf>) -> Result<Self> {
        let config_path = config_path.into();
        let config = Self::load_or_create_config(&config_path)?;
        Ok(Self { config_path, config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    pub fn update_config(&mut self, config: EngineConfig) -> Result<()> {
        config.validate().context("Refusing to save invalid configuration")?;
        self.config = config;
        self.save_config()
    }

    pub fn save_config(&self) -> Result<()> {
        Self::save_config_to_path(&self.config, &self.config_path)?;
        info!("Configuration saved to: {:?}", self.config_path);
        Ok(())
    }

    fn load_or_create_config(config_path: &Path) -> Result<EngineConfig> {
        if !config_path.exists() {
            info!("No configuration file found. Creating default configuration.");
            let default_config = EngineConfig::default();
            Self::save_config_to_path(&default_config, config_path)?;
            return Ok(default_config);
        }

        info!("Loading configuration from: {:?}", config_path);
        let config_str =
            fs::read_to_string(config_path).context("Failed to read configuration file")?;

        let parsed = toml::from_str::<EngineConfig>(&config_str)
            .map_err(anyhow::Error::from)
            .and_then(|config| config.validate().map(|_| config));

        match parsed {
            Ok(config) => {
                info!("Configuration loaded successfully");
                Ok(config)
            }
            Err(e) => {
                warn!("Failed to load configuration file: {}. Using defaults.", e);
                let default_config = EngineConfig::default();
                if let Err(save_err) = Self::save_config_to_path(&default_config, config_path) {
                    error!("Failed to save default configuration: {}", save_err);
                }
                Ok(default_config)
            }
        }
    }

    fn save_config_to_path(config: &EngineConfig, path: &Path) -> Result<()> {
        let config_str =
            toml::to_string_pretty(config).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        fs::write(path, config_str).context("Failed to write configuration file")?;
        Ok(())
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("linein")
        } else {
            let home_dir = dirs::home_dir().context("Could not determine home directory")?;
            home_dir.join(".linein")
        };

        Ok(config_dir.join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.audio.input_channels, 1);
        assert_eq!(config.audio.output_channels, 2);
        assert_eq!(config.audio.ring_capacity_ms, 500);
        assert_eq!(config.control.gain, DEFAULT_GAIN);
        assert_eq!(config.interruption_policy, InterruptionPolicy::MuteOnTransient);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let mut config = EngineConfig::default();
        config.control.output_device = Some(3);
        config.audio.saturation = SaturationMode::Soft;

        let serialized = toml::to_string_pretty(&config).unwrap();
        let deserialized: EngineConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: EngineConfig = toml::from_str("[control]\ngain = 10.0\n").unwrap();
        assert_eq!(config.control.gain, 10.0);
        assert_eq!(config.control.output_device, None);
        assert_eq!(config.audio, AudioSettings::default());
    }

    #[test]
    fn test_validation_rejects_structural_nonsense() {
        let mut config = EngineConfig::default();
        config.audio.output_channels = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.audio.ring_capacity_ms = 50;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.audio.low_latency_burst_ms = f32::NAN;
        assert!(config.validate().is_err());

        // Control values are clamped later, not rejected
        let mut config = EngineConfig::default();
        config.control.gain = 100.0;
        assert!(config.validate().is_ok());
        assert_eq!(config.control.clamped().gain, 12.0);
    }

    #[test]
    fn test_presets() {
        assert_eq!("safe".parse::<LatencyPreset>().unwrap(), LatencyPreset::Safe);
        assert_eq!("LOW".parse::<LatencyPreset>().unwrap(), LatencyPreset::Low);
        assert!("turbo".parse::<LatencyPreset>().is_err());

        let mut control = ControlSettings::default();
        control.apply_preset(LatencyPreset::Low);
        assert_eq!((control.target_buffer_ms, control.drain_rate), (19, 1.0));
        control.apply_preset(LatencyPreset::Off);
        assert_eq!((control.target_buffer_ms, control.drain_rate), (0, 0.0));

        for preset in LatencyPreset::ALL {
            assert_eq!(preset.to_string().parse::<LatencyPreset>().unwrap(), preset);
        }
    }

    #[test]
    fn test_to_parameters() {
        let mut config = EngineConfig::default();
        config.control.apply_preset(LatencyPreset::Safe);
        config.control.output_device = Some(2);
        let params = config.to_parameters();
        assert_eq!(params.target_buffer_ms(), 50);
        assert_eq!(params.drain_rate(), 0.5);
        assert_eq!(params.output_device_id(), Some(2));
        assert!(!params.effect_on());
    }

    #[test]
    fn test_config_manager_creates_default_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let manager = ConfigManager::with_path(&path).unwrap();
        assert!(path.exists());
        assert_eq!(manager.config(), &EngineConfig::default());
    }

    #[test]
    fn test_config_manager_persists_updates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut manager = ConfigManager::with_path(&path).unwrap();
        let mut config = manager.config().clone();
        config.control.apply_preset(LatencyPreset::Safe);
        config.interruption_policy = InterruptionPolicy::Ignore;
        manager.update_config(config.clone()).unwrap();

        let reloaded = ConfigManager::with_path(&path).unwrap();
        assert_eq!(reloaded.config(), &config);
    }

    #[test]
    fn test_config_manager_falls_back_on_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "this is = = not toml").unwrap();

        let manager = ConfigManager::with_path(&path).unwrap();
        assert_eq!(manager.config(), &EngineConfig::default());
    }

    #[test]
    fn test_update_rejects_invalid_config() {
        let dir = TempDir::new().unwrap();
        let mut manager = ConfigManager::with_path(dir.path().join("config.toml")).unwrap();
        let mut config = EngineConfig::default();
        config.audio.input_channels = 0;
        assert!(manager.update_config(config).is_err());
        assert_eq!(manager.config(), &EngineConfig::default());
    }
}
