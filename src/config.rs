//! # Configuration Management Module
//!
//! Persistent settings stored in platform-appropriate locations.
//! Handles loading, saving, and providing defaults for configuration options.
//!
//! ## Settings
//! - `port`: serial port opened when none is given on the command line
//! - `baud_rate`, `read_timeout_ms`: serial line settings
//! - `refresh_interval_ms`: period of the analysis tick
//! - `[analysis]`: spectrum and spectrogram parameters
//!
//! ## Storage Location
//! - macOS: ~/Library/Application Support/spectrograph/config.toml
//! - Linux: ~/.config/spectrograph/config.toml
//! - Windows: %APPDATA%\spectrograph\config.toml

use crate::error::ConfigError;
use crate::history::Projection;
use crate::reader::{PortSettings, BAUD_RATE};
use crate::spectrogram::SpectrogramParams;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Control ranges for the analysis parameters
pub const SAMPLE_WINDOW_RANGE: (f64, f64) = (0.5, 5.0);
pub const FREQUENCY_RANGE: (f64, f64) = (0.0, 2000.0);
pub const Y_RANGE: (f64, f64) = (0.0, 2.0);
pub const SPECTROGRAM_LENGTH_RANGE: (f64, f64) = (0.0, 600.0);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: Option<String>,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    pub refresh_interval_ms: u64,
    pub analysis: AnalysisParams,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: BAUD_RATE,
            read_timeout_ms: 100,
            refresh_interval_ms: 150,
            analysis: AnalysisParams::default(),
        }
    }
}

/// Parameters of the live spectrum and the spectrogram
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisParams {
    /// Seconds of data per spectrum
    pub sample_window: f64,
    pub min_freq: f64,
    pub max_freq: f64,
    /// Magnitude shown at full scale, in g
    pub y_range: f64,
    /// Seconds covered by the spectrogram
    pub spectrogram_length: f64,
    pub projection: Projection,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            sample_window: 2.0,
            min_freq: 0.0,
            max_freq: 2000.0,
            y_range: 2.0,
            spectrogram_length: 20.0,
            projection: Projection::Xyz,
        }
    }
}

fn clamp_to(value: f64, (low, high): (f64, f64)) -> f64 {
    if value.is_nan() {
        low
    } else {
        value.clamp(low, high)
    }
}

impl AnalysisParams {
    /// Clamp every value into its control range and order the frequencies
    pub fn validate(mut self) -> Self {
        self.sample_window = clamp_to(self.sample_window, SAMPLE_WINDOW_RANGE);
        self.min_freq = clamp_to(self.min_freq, FREQUENCY_RANGE);
        self.max_freq = clamp_to(self.max_freq, FREQUENCY_RANGE);
        self.y_range = clamp_to(self.y_range, Y_RANGE);
        self.spectrogram_length = clamp_to(self.spectrogram_length, SPECTROGRAM_LENGTH_RANGE);
        if self.min_freq > self.max_freq {
            std::mem::swap(&mut self.min_freq, &mut self.max_freq);
        }
        self
    }

    pub fn spectrogram_params(&self) -> SpectrogramParams {
        SpectrogramParams {
            sample_window: self.sample_window,
            min_freq: self.min_freq,
            max_freq: self.max_freq,
            spectrogram_length: self.spectrogram_length,
            projection: self.projection,
        }
    }
}

impl Config {
    /// Get the path to the config file
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("spectrograph")
            .join("config.toml")
    }

    /// Load config from the default location, creating it if missing
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load config from `path`, or write and return defaults if it doesn't exist
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let mut config: Config =
                    toml::from_str(&contents).map_err(ConfigError::ParseFailed)?;
                config.analysis = config.analysis.validate();
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No config at {}, writing defaults", path.display());
                let config = Self::default();
                config.save_to(path)?;
                Ok(config)
            }
            Err(e) => Err(ConfigError::ReadFailed(e)),
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::WriteFailed)?;
        }

        let toml_string = toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)?;
        fs::write(path, toml_string).map_err(ConfigError::WriteFailed)?;

        Ok(())
    }

    pub fn port_settings(&self) -> PortSettings {
        PortSettings {
            baud_rate: self.baud_rate,
            read_timeout: Duration::from_millis(self.read_timeout_ms.max(1)),
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms.max(1))
    }
}
