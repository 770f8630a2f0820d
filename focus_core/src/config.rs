//! Configuration file support for pomo.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/pomo/config.toml`.

use crate::{CycleConfig, Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub timer: TimerConfig,

    #[serde(default)]
    pub sink: SinkConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Default cycle parameters used when no snapshot exists
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimerConfig {
    #[serde(default = "default_work_minutes")]
    pub work_minutes: u32,

    #[serde(default = "default_short_break_minutes")]
    pub short_break_minutes: u32,

    #[serde(default = "default_long_break_minutes")]
    pub long_break_minutes: u32,

    #[serde(default = "default_cycles_per_set")]
    pub cycles_per_set: u32,

    #[serde(default = "default_long_break_enabled")]
    pub long_break_enabled: bool,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            work_minutes: default_work_minutes(),
            short_break_minutes: default_short_break_minutes(),
            long_break_minutes: default_long_break_minutes(),
            cycles_per_set: default_cycles_per_set(),
            long_break_enabled: default_long_break_enabled(),
        }
    }
}

impl TimerConfig {
    /// Validate into a [`CycleConfig`]
    pub fn cycle_config(&self) -> Result<CycleConfig> {
        CycleConfig::new(
            self.work_minutes,
            self.short_break_minutes,
            self.long_break_minutes,
            self.cycles_per_set,
            self.long_break_enabled,
        )
    }
}

impl From<CycleConfig> for TimerConfig {
    fn from(config: CycleConfig) -> Self {
        Self {
            work_minutes: config.work_minutes(),
            short_break_minutes: config.short_break_minutes(),
            long_break_minutes: config.long_break_minutes(),
            cycles_per_set: config.cycles_per_set(),
            long_break_enabled: config.long_break_enabled(),
        }
    }
}

/// Session recording sink configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Remote endpoint; sessions go to the local journal when unset
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_sink_timeout_seconds")]
    pub timeout_seconds: u64,

    #[serde(default)]
    pub auth_token: Option<String>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_seconds: default_sink_timeout_seconds(),
            auth_token: None,
        }
    }
}

impl SinkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local/share")))
        .unwrap_or_else(std::env::temp_dir);
    base.join("pomo")
}

fn default_work_minutes() -> u32 {
    25
}

fn default_short_break_minutes() -> u32 {
    5
}

fn default_long_break_minutes() -> u32 {
    15
}

fn default_cycles_per_set() -> u32 {
    4
}

fn default_long_break_enabled() -> bool {
    true
}

fn default_sink_timeout_seconds() -> u64 {
    5
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        if config.sink.timeout_seconds == 0 {
            return Err(Error::Config("sink.timeout_seconds must be at least 1".into()));
        }
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .unwrap_or_else(std::env::temp_dir);
        base.join("pomo").join("config.toml")
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }
}
