//! I2C bus trait
//!
//! Addresses are the byte that goes on the wire: a 7-bit target address
//! shifted left by one. Bit 0 is replaced by the R/W flag on each phase, so
//! `0x50 << 1` and `(0x50 << 1) | 1` address the same target.

use crate::error::{Error, Result};
use crate::{ErrorType, Frequency};

/// Highest address byte
pub const MAX_ADDRESS: u16 = 0xFF;

/// Validate an address byte
pub fn validate_address(addr: u16) -> Result<u8> {
    if addr > MAX_ADDRESS {
        return Err(Error::InvalidAddress(addr));
    }
    Ok(addr as u8)
}

/// Wire address for a 7-bit target address
pub fn address_from_7bit(addr: u8) -> Result<u16> {
    if addr > 0x7F {
        return Err(Error::InvalidAddress(addr as u16));
    }
    Ok((addr as u16) << 1)
}

/// Address byte on the wire with the R/W flag in bit 0
pub fn address_byte(addr: u8, read: bool) -> u8 {
    (addr & 0xFE) | read as u8
}

/// An I2C master bus
pub trait I2cBus: ErrorType {
    /// Write `w` then read into `r` from the device at wire address `addr`
    ///
    /// Either buffer may be empty.
    fn tx(&mut self, addr: u16, w: &[u8], r: &mut [u8]) -> core::result::Result<(), Self::Error>;

    /// Change the bus clock
    fn set_speed(&mut self, freq: Frequency) -> core::result::Result<(), Self::Error>;
}
