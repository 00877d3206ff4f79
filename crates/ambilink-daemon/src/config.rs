//! Configuration management.

#![allow(dead_code)]

use ambilink_hw::{LinkConfig, LinkTiming};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Serial link configuration
    #[serde(default)]
    pub link: LinkSection,

    /// Capture configuration
    #[serde(default)]
    pub capture: CaptureSection,

    /// Preview configuration
    #[serde(default)]
    pub preview: PreviewSection,
}

/// Serial link configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSection {
    /// Serial port to open at startup (e.g., "/dev/ttyUSB0")
    #[serde(default)]
    pub port: Option<String>,

    /// Baud rate
    #[serde(default = "default_baud")]
    pub baud: u32,

    /// Read/write timeout in milliseconds
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    /// Inbound bytes are ignored for this long after opening, in milliseconds
    #[serde(default = "default_open_delay")]
    pub open_delay_ms: u64,

    /// Keepalive interval in milliseconds
    #[serde(default = "default_keepalive")]
    pub keepalive_ms: u64,
}

impl Default for LinkSection {
    fn default() -> Self {
        Self {
            port: None,
            baud: default_baud(),
            timeout_ms: default_timeout(),
            open_delay_ms: default_open_delay(),
            keepalive_ms: default_keepalive(),
        }
    }
}

impl LinkSection {
    /// Returns the serial read/write timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Returns the link timing parameters.
    pub fn timing(&self) -> LinkTiming {
        LinkTiming {
            open_delay: Duration::from_millis(self.open_delay_ms),
            keepalive_interval: Duration::from_millis(self.keepalive_ms),
        }
    }
}

/// Frame source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureSource {
    /// Built-in moving hue sweep.
    #[default]
    Pattern,
}

/// Capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSection {
    /// Frame source
    #[serde(default)]
    pub source: CaptureSource,

    /// Output selector passed to the capture engine (-1 = primary)
    #[serde(default = "default_output")]
    pub output: i32,

    /// Light columns
    #[serde(default = "default_columns")]
    pub columns: u32,

    /// Light rows
    #[serde(default = "default_rows")]
    pub rows: u32,

    /// Frame pump period in milliseconds
    #[serde(default = "default_interval")]
    pub interval_ms: u64,

    /// Stop capturing after this many frames (pattern source only)
    #[serde(default)]
    pub frames: Option<u64>,
}

impl Default for CaptureSection {
    fn default() -> Self {
        Self {
            source: CaptureSource::default(),
            output: default_output(),
            columns: default_columns(),
            rows: default_rows(),
            interval_ms: default_interval(),
            frames: None,
        }
    }
}

impl CaptureSection {
    /// Validates the light grid.
    pub fn grid(&self) -> Result<LinkConfig> {
        LinkConfig::new(self.columns, self.rows).context("Invalid capture grid")
    }

    /// Returns the frame pump period.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

/// Preview configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewSection {
    /// Where the preview PNG is written on SIGUSR2
    #[serde(default = "default_preview_path")]
    pub path: PathBuf,
}

impl Default for PreviewSection {
    fn default() -> Self {
        Self {
            path: default_preview_path(),
        }
    }
}

// Default value functions
fn default_baud() -> u32 {
    ambilink_hw::channel::DEFAULT_BAUD_RATE
}

fn default_timeout() -> u64 {
    100
}

fn default_open_delay() -> u64 {
    1000
}

fn default_keepalive() -> u64 {
    1000
}

fn default_output() -> i32 {
    -1
}

fn default_columns() -> u32 {
    100
}

fn default_rows() -> u32 {
    3
}

fn default_interval() -> u64 {
    16 // ~60Hz
}

fn default_preview_path() -> PathBuf {
    PathBuf::from("preview.png")
}

impl Config {
    /// Loads configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content =
            std::fs::read_to_string(path.as_ref()).context("Failed to read configuration file")?;
        let config: Config = toml::from_str(&content).context("Failed to parse configuration")?;
        Ok(config)
    }

    /// Loads configuration, falling back to defaults if the file is missing.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Saves configuration to a TOML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        std::fs::write(path.as_ref(), content).context("Failed to write configuration file")?;
        Ok(())
    }
}
