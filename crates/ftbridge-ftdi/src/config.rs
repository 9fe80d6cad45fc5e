//! Device configuration
//!
//! `DeviceConfig` carries every tunable the engines use. It is handed to the
//! device at open time; nothing in the crate keeps process-wide settings.

use std::time::Duration;

use crate::error::{FtdiError, Result};

/// Estimated execution time of one GPIO set command on an FT232H
///
/// Bus timing that has no dedicated MPSSE opcode is produced by repeating
/// the same GPIO set command; this is the unit used to turn a hold time
/// into a repetition count.
pub const GPIO_CMD_TIME: Duration = Duration::from_nanos(150);

/// Longest hold or setup time accepted
pub const MAX_HOLD: Duration = Duration::from_micros(100);

/// Configuration for an opened FTDI device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Read and write timeout applied to the USB handle
    pub io_timeout: Duration,
    /// Deadline for one command/response round trip
    pub round_trip: Duration,
    /// Latency timer in milliseconds (1-255)
    pub latency_timer: u8,
    /// USB IN transfer size
    pub usb_transfer_size: u32,
    /// Minimum I2C start/stop hold time
    pub i2c_hold: Duration,
    /// SPI chip select setup/hold time on the MPSSE engine
    pub cs_setup: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            io_timeout: Duration::from_secs(15),
            round_trip: Duration::from_millis(200),
            latency_timer: 1,
            usb_transfer_size: 65536,
            i2c_hold: Duration::from_nanos(600),
            cs_setup: Duration::from_nanos(750),
        }
    }
}

impl DeviceConfig {
    /// Set the USB read/write timeout
    pub fn io_timeout(mut self, timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            return Err(FtdiError::InvalidParameter(
                "I/O timeout must be non-zero".into(),
            ));
        }
        self.io_timeout = timeout;
        Ok(self)
    }

    /// Set the round trip deadline
    pub fn round_trip(mut self, timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            return Err(FtdiError::InvalidParameter(
                "round trip deadline must be non-zero".into(),
            ));
        }
        self.round_trip = timeout;
        Ok(self)
    }

    /// Set the latency timer
    pub fn latency_timer(mut self, ms: u8) -> Result<Self> {
        if ms == 0 {
            return Err(FtdiError::InvalidParameter(
                "latency timer must be between 1 and 255 ms".into(),
            ));
        }
        self.latency_timer = ms;
        Ok(self)
    }

    /// Set the I2C start/stop hold time
    pub fn i2c_hold(mut self, hold: Duration) -> Result<Self> {
        validate_hold("I2C hold", hold)?;
        self.i2c_hold = hold;
        Ok(self)
    }

    /// Set the SPI chip select setup time
    pub fn cs_setup(mut self, setup: Duration) -> Result<Self> {
        validate_hold("chip select setup", setup)?;
        self.cs_setup = setup;
        Ok(self)
    }

    /// Number of repeated GPIO commands covering the I2C hold time
    pub fn i2c_hold_repeats(&self) -> usize {
        repeats(self.i2c_hold)
    }

    /// Number of repeated GPIO commands covering the chip select setup time
    pub fn cs_setup_repeats(&self) -> usize {
        repeats(self.cs_setup)
    }
}

fn validate_hold(what: &str, d: Duration) -> Result<()> {
    if d.is_zero() || d > MAX_HOLD {
        return Err(FtdiError::InvalidParameter(format!(
            "{} of {:?} is outside 1ns..={:?}",
            what, d, MAX_HOLD
        )));
    }
    Ok(())
}

fn repeats(d: Duration) -> usize {
    (d.as_nanos().div_ceil(GPIO_CMD_TIME.as_nanos()) as usize).max(1)
}

/// Parse `key=value` device options
///
/// Recognized keys: `timeout` (ms), `round_trip` (ms), `latency` (ms),
/// `i2c_hold_ns`, `cs_setup_ns`.
pub fn parse_options(options: &[(&str, &str)]) -> Result<DeviceConfig> {
    let mut config = DeviceConfig::default();

    for (key, value) in options {
        let number = || -> Result<u64> {
            value.parse().map_err(|_| {
                FtdiError::InvalidParameter(format!("Invalid value '{}' for {}", value, key))
            })
        };
        match *key {
            "timeout" => config = config.io_timeout(Duration::from_millis(number()?))?,
            "round_trip" => config = config.round_trip(Duration::from_millis(number()?))?,
            "latency" => {
                let ms = u8::try_from(number()?).map_err(|_| {
                    FtdiError::InvalidParameter(format!("Latency '{}' out of range", value))
                })?;
                config = config.latency_timer(ms)?;
            }
            "i2c_hold_ns" => config = config.i2c_hold(Duration::from_nanos(number()?))?,
            "cs_setup_ns" => config = config.cs_setup(Duration::from_nanos(number()?))?,
            _ => {
                log::warn!("Unknown FTDI option: {}={}", key, value);
            }
        }
    }

    Ok(config)
}
