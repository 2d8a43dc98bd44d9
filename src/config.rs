//! # Configuration Management
//!
//! This module loads the sign's settings from `train-sign.toml`. Every
//! section and every field is optional: anything missing takes its default,
//! and a missing or unreadable file falls back to the full default
//! configuration (Castelfranco Emilia, two panels, system clock).

use crate::app::LOOP_PAUSE_MS;
use crate::connectivity::SupervisorPolicy;
use crate::clock::ClockMode;
use crate::state_machine::Labels;
use crate::surface::PANEL_WIDTH;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default configuration file, looked up in the working directory.
pub const CONFIG_FILE: &str = "train-sign.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("cannot write configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// Application configuration loaded from train-sign.toml
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub station: StationConfig,
    pub api: ApiConfig,
    pub display: DisplayConfig,
    pub clock: ClockConfig,
    pub network: NetworkConfig,
    pub hardware: HardwareConfig,
}

/// Station whose departures are shown
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StationConfig {
    /// Station code understood by the departures API (e.g. "S05037")
    pub code: String,
    /// Name used in the header until the API sends one
    pub name: String,
}

/// Departures API endpoint and schedule
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// API key sent as the `key` query parameter
    pub key: String,
    /// Maximum number of departures requested
    pub limit: u32,
    /// Hard timeout of one request, connect included
    pub timeout_secs: u64,
    pub fetch_interval_secs: u64,
    /// Delay before trying again after a failed fetch
    pub retry_interval_secs: u64,
}

/// Panel geometry, refresh cadence and user-facing strings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Number of 32×16 modules chained horizontally
    pub panels_across: u32,
    /// Delay between two scan quarters of the DMD
    pub refresh_interval_us: u64,
    pub header_label: String,
    pub no_trains_text: String,
    /// Pause at the end of every main-loop iteration
    pub loop_pause_ms: u64,
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClockConfig {
    /// `system` (NTP-synced local time) or `api` (server timestamp)
    pub source: ClockMode,
}

/// Wi-Fi link supervision
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// When false the link is assumed to be managed elsewhere and never checked
    pub managed: bool,
    pub interface: String,
    pub ssid: String,
    pub password: String,
    pub check_interval_secs: u64,
    pub max_retries: u32,
    pub association_timeout_secs: u64,
    /// Static name servers pushed on reconnect; empty keeps DHCP's
    pub dns: Vec<String>,
}

/// DMD wiring. Pin numbers are line offsets on `gpio_chip`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HardwareConfig {
    pub spi_device: String,
    pub spi_hz: u32,
    pub gpio_chip: String,
    /// Output enable, active low
    pub oe_pin: u32,
    pub a_pin: u32,
    pub b_pin: u32,
    /// Latch (SCLK on the DMD connector)
    pub latch_pin: u32,
}

impl Default for StationConfig {
    fn default() -> Self {
        StationConfig {
            code: "S05037".to_string(),
            name: "Castelfranco".to_string(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            base_url: "https://arduino-train-api.bitrey.it".to_string(),
            key: String::new(),
            limit: 5,
            timeout_secs: 15,
            fetch_interval_secs: 300,
            retry_interval_secs: 30,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        DisplayConfig {
            panels_across: 2,
            refresh_interval_us: 300,
            header_label: "Trains from".to_string(),
            no_trains_text: "No trains".to_string(),
            loop_pause_ms: LOOP_PAUSE_MS,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            managed: true,
            interface: "wlan0".to_string(),
            ssid: String::new(),
            password: String::new(),
            check_interval_secs: 30,
            max_retries: 2,
            association_timeout_secs: 10,
            dns: Vec::new(),
        }
    }
}

impl Default for HardwareConfig {
    fn default() -> Self {
        // Freetronics DMD wiring on a Raspberry Pi header
        HardwareConfig {
            spi_device: "/dev/spidev0.0".to_string(),
            spi_hz: 4_000_000,
            gpio_chip: "/dev/gpiochip0".to_string(),
            oe_pin: 22,
            a_pin: 23,
            b_pin: 24,
            latch_pin: 25,
        }
    }
}

impl DisplayConfig {
    /// Width of the whole sign in pixels.
    pub fn width(&self) -> u32 {
        self.panels_across.max(1) * PANEL_WIDTH
    }
}

impl Config {
    /// Load configuration from train-sign.toml
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_FILE)
    }

    /// Load configuration from specified path
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => {
                    tracing::info!(
                        "loaded configuration for station {} ({})",
                        config.station.code,
                        config.station.name
                    );
                    config
                }
                Err(e) => {
                    tracing::warn!("invalid config file {}: {}", path.display(), e);
                    tracing::warn!("using default configuration");
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!("no config file at {}, using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Save current configuration to `path`
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path.as_ref(), contents)?;
        tracing::info!("configuration saved to {}", path.as_ref().display());
        Ok(())
    }

    pub fn labels(&self) -> Labels {
        Labels {
            header: self.display.header_label.clone(),
            station_fallback: self.station.name.clone(),
            no_trains: self.display.no_trains_text.clone(),
        }
    }

    pub fn supervisor_policy(&self) -> SupervisorPolicy {
        SupervisorPolicy {
            check_interval_ms: self.network.check_interval_secs * 1000,
            max_retries: self.network.max_retries,
            association_timeout_ms: self.network.association_timeout_secs * 1000,
            ..SupervisorPolicy::default()
        }
    }

    pub fn fetch_interval(&self) -> Duration {
        Duration::from_secs(self.api.fetch_interval_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.api.retry_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_micros(self.display.refresh_interval_us)
    }

    /// Host resolved to check DNS after a reconnect.
    pub fn check_host(&self) -> String {
        reqwest::Url::parse(&self.api.base_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_else(|| "example.com".to_string())
    }
}
