//! CLI command implementations
//!
//! Every command works on one entry of the [`DeviceManager`] built at
//! startup; the device is looked up by name or enumeration index.
//!
//! [`DeviceManager`]: ftbridge_ftdi::DeviceManager

mod error;
mod gpio;
mod i2c;
mod list;
mod spi;

pub use error::{CommandError, Result};
pub use gpio::{run_bus, run_gpio, Bus};
pub use i2c::run_i2c;
pub use list::{list_devices, show_info};
pub use spi::run_spi;

/// Format bytes as space separated hex
pub fn hex_string(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_string() {
        assert_eq!(hex_string(&[0x9F, 0x00, 0xEF]), "9f 00 ef");
        assert_eq!(hex_string(&[]), "");
    }
}
