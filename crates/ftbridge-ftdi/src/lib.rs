//! ftbridge-ftdi - SPI, I2C and GPIO over FTDI USB bridges
//!
//! This crate drives FTDI chips in their two serial personalities:
//!
//! - MPSSE, the command-stream engine of the FT232H and FT2232H: SPI up to
//!   30 MHz, I2C with 3-phase clocking, and 16 GPIO pins
//! - synchronous bit-bang on the FT232R: SPI up to 1.5 MHz and 8 GPIO pins
//!
//! # Supported Devices
//!
//! - FTDI FT232H (single channel)
//! - FTDI FT2232H (dual channel, first MPSSE channel)
//! - FTDI FT232R (bit-bang)
//!
//! Other FTDI chips are enumerated and kept open without bus support.
//!
//! # Example
//!
//! ```no_run
//! use ftbridge_core::spi::{SpiConn, SpiMode, SpiPort};
//! use ftbridge_core::Frequency;
//! use ftbridge_ftdi::{DeviceConfig, DeviceManager, NativeDriver};
//!
//! let driver = NativeDriver::new()?;
//! let mgr = DeviceManager::open_all(&driver, &DeviceConfig::default())?;
//! let dev = mgr.find("FT232H").and_then(|d| d.as_ft232h()).ok_or("no FT232H")?;
//!
//! let mut port = dev.spi()?;
//! let mut conn = port.connect(Frequency::from_mhz(10), SpiMode::MODE0, 8)?;
//! let mut id = [0u8; 4];
//! conn.tx(&[0x9F, 0, 0, 0], &mut id)?;
//! println!("JEDEC ID: {:02X} {:02X} {:02X}", id[1], id[2], id[3]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Device Options
//!
//! `DeviceConfig` can be built from `key=value` pairs, see
//! [`parse_options`]:
//!
//! - `timeout=<ms>` - USB read/write timeout (default: 15000)
//! - `round_trip=<ms>` - deadline for one command/response (default: 200)
//! - `latency=<ms>` - latency timer (default: 1)
//! - `i2c_hold_ns=<ns>` - I2C start/stop hold time (default: 600)
//! - `cs_setup_ns=<ns>` - SPI chip select setup time (default: 750)

#![warn(missing_docs)]

pub mod backend;
mod config;
pub mod device;
mod error;
pub mod ft232h;
pub mod ft232r;
pub mod gpio;
pub mod handle;
pub mod i2c;
pub mod manager;
pub mod mpsse;
pub mod protocol;
pub mod spi;
pub mod spi_sync;

#[cfg(test)]
mod testing;

#[cfg(feature = "d2xx")]
pub use backend::D2xxDriver;
#[cfg(feature = "native")]
pub use backend::NativeDriver;
pub use config::{parse_options, DeviceConfig};
pub use device::{Device, Info};
pub use error::{FtdiError, Result};
pub use ft232h::Ft232h;
pub use ft232r::Ft232r;
pub use gpio::Pin;
pub use handle::{Cancel, FtdiHandle, HandleInfo, Transport};
pub use i2c::MpsseI2c;
pub use manager::{DeviceManager, Driver};
pub use protocol::{DevType, Group};
pub use spi::{MpsseSpiConn, MpsseSpiPort};
pub use spi_sync::{SyncSpiConn, SyncSpiPort};
