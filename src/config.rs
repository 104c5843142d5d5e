//! Configuration loading from TOML
//!
//! # Configuration File Format
//!
//! ```toml
//! [serial]
//! path = "/dev/serial0"
//!
//! [gpio]
//! reset_pin = "4"
//! boot_pin = "22"
//!
//! [power]
//! notification_interval_secs = 30
//! low_voltage_threshold = 6.5
//! ```
//!
//! Every section is optional; `HatConfig::default()` matches the values
//! above. Hosts that construct the config in code never touch TOML.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Serial line configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SerialConfig {
    /// Serial device path
    ///
    /// **Default**: "/dev/serial0" (the Pi's primary UART)
    #[serde(default = "default_serial_path")]
    pub path: String,

    /// Baud rate. The Build HAT firmware only speaks 115200.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

fn default_serial_path() -> String {
    "/dev/serial0".to_string()
}

fn default_baud_rate() -> u32 {
    115_200
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            path: default_serial_path(),
            baud_rate: default_baud_rate(),
        }
    }
}

/// GPIO pin labels for the HAT reset lines
///
/// Labels are passed through to the host's GPIO collaborator unchanged;
/// on a Raspberry Pi they are BCM pin numbers.
#[derive(Debug, Clone, Deserialize)]
pub struct GpioConfig {
    /// Reset line (pulsed low then high during a firmware reset)
    #[serde(default = "default_reset_pin")]
    pub reset_pin: String,

    /// Boot-select line (held low to enter the bootloader)
    #[serde(default = "default_boot_pin")]
    pub boot_pin: String,
}

fn default_reset_pin() -> String {
    "4".to_string()
}

fn default_boot_pin() -> String {
    "22".to_string()
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            reset_pin: default_reset_pin(),
            boot_pin: default_boot_pin(),
        }
    }
}

/// Power monitor defaults
#[derive(Debug, Clone, Deserialize)]
pub struct PowerConfig {
    /// Seconds between `vin` polls
    #[serde(default = "default_notification_interval")]
    pub notification_interval_secs: u64,

    /// Voltage below which a `low_power` event is published
    #[serde(default = "default_low_voltage_threshold")]
    pub low_voltage_threshold: f64,
}

fn default_notification_interval() -> u64 {
    30
}

fn default_low_voltage_threshold() -> f64 {
    6.5
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            notification_interval_secs: default_notification_interval(),
            low_voltage_threshold: default_low_voltage_threshold(),
        }
    }
}

/// Root configuration for the Build HAT adaptor
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HatConfig {
    #[serde(default)]
    pub serial: SerialConfig,

    #[serde(default)]
    pub gpio: GpioConfig,

    #[serde(default)]
    pub power: PowerConfig,
}

/// Read deadline while the firmware handshake / upload is in progress
pub const BOOTSTRAP_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Read deadline once the firmware is up
pub const RUNTIME_READ_TIMEOUT: Duration = Duration::from_secs(1);

impl HatConfig {
    /// Load configuration from a TOML file
    ///
    /// # Validation
    ///
    /// - `baud_rate` must be 115200 (the only rate the HAT firmware speaks)
    /// - `low_voltage_threshold` must be positive
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        let config: HatConfig = basic_toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.serial.baud_rate != 115_200 {
            return Err(Error::Config(format!(
                "baud_rate must be 115200 (got {}). The Build HAT firmware does not \
                support other rates.",
                self.serial.baud_rate
            )));
        }

        if self.power.low_voltage_threshold <= 0.0 {
            return Err(Error::Config(
                "low_voltage_threshold must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
