//! Pin and pin group commands

use ftbridge_core::gpio::{Edge, Level, PinIn, PinOut};
use ftbridge_ftdi::{Device, Pin};

use super::{CommandError, Result};
use crate::cli::PinAction;

/// Which 8-bit group a bus command addresses
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bus {
    /// D0..D7
    D,
    /// C0..C7, or C0..C3 on the FT232R
    C,
}

fn find_pin<'a>(dev: &'a Device, short: &str) -> Result<&'a Pin> {
    let pin = match dev {
        Device::Ft232h(d) => d.pin(short),
        Device::Ft232r(d) => d.pin(short),
        _ => None,
    };
    pin.ok_or_else(|| CommandError::NoPin {
        device: dev.name().to_string(),
        pin: short.to_string(),
    })
}

/// Run the gpio command; returns the sampled level for `in`
pub fn run_gpio(
    dev: &Device,
    short: &str,
    action: PinAction,
) -> Result<Option<Level>> {
    let pin = find_pin(dev, short)?;
    match action {
        PinAction::High => pin.out(Level::High)?,
        PinAction::Low => pin.out(Level::Low)?,
        PinAction::In => {
            pin.set_input(pin.default_pull(), Edge::None)?;
            return Ok(Some(pin.read()?));
        }
    }
    log::debug!("{} -> {}", pin, pin.function());
    Ok(None)
}

/// Run the dbus/cbus command; returns the sampled value when `value` is `None`
///
/// The FT232R only offers its C0..C3 group here.
pub fn run_bus(dev: &Device, bus: Bus, value: Option<u8>, dir: u8) -> Result<Option<u8>> {
    let unsupported = || CommandError::Unsupported {
        device: dev.name().to_string(),
        what: "pin group",
    };
    match (dev, bus, value) {
        (Device::Ft232h(d), Bus::D, Some(v)) => d.dbus(v, dir)?,
        (Device::Ft232h(d), Bus::C, Some(v)) => d.cbus(v, dir)?,
        (Device::Ft232h(d), Bus::D, None) => return Ok(Some(d.dbus_read()?)),
        (Device::Ft232h(d), Bus::C, None) => return Ok(Some(d.cbus_read()?)),
        (Device::Ft232r(d), Bus::C, Some(v)) => d.cbus(v, dir)?,
        (Device::Ft232r(d), Bus::C, None) => return Ok(Some(d.cbus_read()?)),
        _ => return Err(unsupported()),
    }
    Ok(None)
}
