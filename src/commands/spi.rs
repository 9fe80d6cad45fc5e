//! SPI transfer command

use ftbridge_core::spi::{SpiConn, SpiMode, SpiPort};
use ftbridge_core::Frequency;
use ftbridge_ftdi::{Device, FtdiError};

use super::{CommandError, Result};

/// Write `data` with one full-duplex transfer and return what was read
fn transfer<P>(
    port: &mut P,
    freq: Frequency,
    mode: SpiMode,
    data: &[u8],
) -> std::result::Result<Vec<u8>, FtdiError>
where
    P: SpiPort<Error = FtdiError>,
{
    let mut conn = port.connect(freq, mode, 8)?;
    let mut r = vec![0u8; data.len()];
    conn.tx(data, &mut r)?;
    Ok(r)
}

/// Run the spi command
pub fn run_spi(
    dev: &Device,
    freq: Frequency,
    mode: SpiMode,
    data: &[u8],
) -> Result<Vec<u8>> {
    log::debug!("{}: SPI {} {:?}, {} byte(s)", dev, freq, mode, data.len());
    let r = match dev {
        Device::Ft232h(d) => {
            let mut port = d.spi()?;
            let r = transfer(&mut port, freq, mode, data)?;
            port.close()?;
            r
        }
        Device::Ft232r(d) => {
            let mut port = d.spi()?;
            let r = transfer(&mut port, freq, mode, data)?;
            port.close()?;
            r
        }
        _ => {
            return Err(CommandError::Unsupported {
                device: dev.name().to_string(),
                what: "SPI",
            })
        }
    };
    Ok(r)
}
