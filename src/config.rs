//! Emulator options
//!
//! With the `serde-config` feature (on by default) the options can be read
//! from a JSON or YAML file. Missing keys take their default values.

use std::path::PathBuf;

use crate::machine::{MachineType, TapeAutoLoadMode};

#[cfg(feature = "serde-config")]
use std::path::Path;
#[cfg(feature = "serde-config")]
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-config", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde-config", serde(default, rename_all = "snake_case"))]
pub struct EmulatorConfig {
    /// Machine selected once the worker is ready.
    pub machine: MachineType,
    /// Start running as soon as the worker is ready.
    pub auto_start: bool,
    pub auto_load_tapes: bool,
    pub tape_auto_load_mode: TapeAutoLoadMode,
    /// Files opened once the worker is ready, in order.
    pub open_urls: Vec<String>,
    /// Root for ROMs, tape loaders and relative `open_urls` entries.
    pub asset_base: PathBuf,
    pub audio: bool,
    pub sample_rate: u32,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            machine: MachineType::Spectrum48K,
            auto_start: false,
            auto_load_tapes: false,
            tape_auto_load_mode: TapeAutoLoadMode::Default,
            open_urls: Vec::new(),
            asset_base: PathBuf::from("."),
            audio: true,
            sample_rate: 44_100,
        }
    }
}

#[cfg(feature = "serde-config")]
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[cfg(feature = "serde-config")]
impl EmulatorConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Read a config file; `.yaml`/`.yml` files are YAML, anything else JSON.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));
        if is_yaml {
            Self::from_yaml_str(&text)
        } else {
            Self::from_json_str(&text)
        }
    }
}
