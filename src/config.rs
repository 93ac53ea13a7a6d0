//! Configuration management for story-reader.
//!
//! Loads config from YAML files in standard locations. Every section
//! falls back to defaults, so a partial file is fine.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Language the reader narrates in; also the on-device voice filter.
    pub language: String,
    /// Sentences longer than this (in characters) never go to the remote endpoint.
    pub max_remote_chars: usize,
    /// Voice selected when no preference has been saved yet.
    pub default_voice: String,
    /// Story library file.
    pub stories_path: String,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            language: "vi".into(),
            max_remote_chars: 200,
            default_voice: "google-normal".into(),
            stories_path: "stories.yaml".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://translate.google.com/translate_tts".into(),
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub espeak_binary: String,
    /// Words per minute at rate 1.0.
    pub base_wpm: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            espeak_binary: "espeak-ng".into(),
            base_wpm: 175,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub poll_interval_ms: u64,
    pub poll_window_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            poll_window_ms: 5000,
        }
    }
}

impl DiscoveryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn poll_window(&self) -> Duration {
        Duration::from_millis(self.poll_window_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VisualizerConfig {
    pub enabled: bool,
    pub fft_size: usize,
    pub smoothing: f32,
    pub min_db: f32,
    pub max_db: f32,
    pub width: f32,
    pub height: f32,
    pub frame_interval_ms: u64,
}

impl Default for VisualizerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            fft_size: 256,
            smoothing: 0.8,
            min_db: -100.0,
            max_db: -30.0,
            width: 800.0,
            height: 120.0,
            frame_interval_ms: 16,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// How often a playing sink is checked for completion and the analyser fed.
    pub poll_interval_ms: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8770,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PreferencesConfig {
    /// Override for the preference file; defaults to the user config dir.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub reader: ReaderConfig,
    pub remote: RemoteConfig,
    pub device: DeviceConfig,
    pub discovery: DiscoveryConfig,
    pub visualizer: VisualizerConfig,
    pub player: PlayerConfig,
    pub api: ApiConfig,
    pub preferences: PreferencesConfig,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/story-reader/config.yaml
    /// 3. /etc/story-reader/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/story-reader/config.yaml")),
                Some(PathBuf::from("/etc/story-reader/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, String> {
        serde_yml::from_str(contents).map_err(|e| e.to_string())
    }
}
