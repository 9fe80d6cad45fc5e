//! I2C transaction command

use ftbridge_core::gpio::Pull;
use ftbridge_core::i2c::{address_from_7bit, I2cBus};
use ftbridge_core::Frequency;
use ftbridge_ftdi::Device;

use super::{CommandError, Result};

/// Run the i2c command on 7-bit target `addr`: write `w`, then read
/// `read_len` bytes
pub fn run_i2c(
    dev: &Device,
    addr: u8,
    freq: Option<Frequency>,
    w: &[u8],
    read_len: usize,
) -> Result<Vec<u8>> {
    let wire = address_from_7bit(addr)?;
    let d = dev.as_ft232h().ok_or_else(|| CommandError::Unsupported {
        device: dev.name().to_string(),
        what: "I2C",
    })?;

    let mut bus = d.i2c(Pull::Float)?;
    if let Some(f) = freq {
        bus.set_speed(f)?;
    }
    let mut r = vec![0u8; read_len];
    log::debug!("{}: I2C 0x{:02x} write {} read {}", dev, addr, w.len(), read_len);
    bus.tx(wire, w, &mut r)?;
    bus.close()?;
    Ok(r)
}
