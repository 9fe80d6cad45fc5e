//! USB backends implementing [`FtdiHandle`](crate::handle::FtdiHandle)
//!
//! - `native` (default): pure-Rust rs-ftdi over nusb
//! - `d2xx`: FTDI's D2XX driver through libftd2xx

#[cfg(feature = "d2xx")]
pub mod d2xx;
#[cfg(feature = "native")]
pub mod native;

#[cfg(feature = "d2xx")]
pub use d2xx::D2xxDriver;
#[cfg(feature = "native")]
pub use native::NativeDriver;

use crate::protocol::{
    FTDI_FT2232H_PID, FTDI_FT232H_PID, FTDI_FT232R_PID, FTDI_FT4232H_PID, FTDI_FTX_PID, FTDI_VID,
};

/// Whether a VID/PID pair belongs to a supported FTDI device
pub fn is_ftdi(vendor_id: u16, product_id: u16) -> bool {
    vendor_id == FTDI_VID
        && matches!(
            product_id,
            FTDI_FT232R_PID | FTDI_FT2232H_PID | FTDI_FT4232H_PID | FTDI_FT232H_PID | FTDI_FTX_PID
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_ftdi() {
        assert!(is_ftdi(0x0403, 0x6014));
        assert!(is_ftdi(0x0403, 0x6001));
        assert!(!is_ftdi(0x0403, 0x1234));
        assert!(!is_ftdi(0x1a86, 0x6014));
    }
}
