//! Opening a device and picking its facade

use std::fmt;
use std::sync::Mutex;

use crate::config::DeviceConfig;
use crate::error::Result;
use crate::ft232h::Ft232h;
use crate::ft232r::Ft232r;
use crate::handle::{FtdiHandle, HandleInfo, Transport};
use crate::protocol::DevType;

/// Identification of an opened device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Info {
    /// The handle is open
    pub opened: bool,
    /// Device type
    pub dev_type: DevType,
    /// USB vendor ID
    pub vendor_id: u16,
    /// USB product ID
    pub product_id: u16,
}

impl From<&HandleInfo> for Info {
    fn from(h: &HandleInfo) -> Self {
        Info {
            opened: true,
            dev_type: h.dev_type,
            vendor_id: h.vendor_id,
            product_id: h.product_id,
        }
    }
}

/// A device without a dedicated facade; the handle is kept open
#[derive(Debug)]
pub struct Generic {
    name: String,
    info: Info,
    transport: Mutex<Transport>,
}

impl Generic {
    /// Reset the device to UART mode
    pub fn reset(&self) -> Result<()> {
        self.transport.lock()?.reset()
    }
}

/// A device that failed to open
#[derive(Debug, Clone)]
pub struct Broken {
    name: String,
}

/// An opened FTDI device
#[derive(Debug)]
pub enum Device {
    /// FT232H or FT2232H, MPSSE facade
    Ft232h(Ft232h),
    /// FT232R, synchronous bit-bang facade
    Ft232r(Ft232r),
    /// Any other FTDI chip
    Generic(Generic),
    /// Enumerated but unusable
    Broken(Broken),
}

impl Device {
    /// Unique name, e.g. `FT232H` or `FT232H(1)`
    pub fn name(&self) -> &str {
        match self {
            Device::Ft232h(d) => d.name(),
            Device::Ft232r(d) => d.name(),
            Device::Generic(d) => &d.name,
            Device::Broken(d) => &d.name,
        }
    }

    /// Identification; `None` for a broken entry
    pub fn info(&self) -> Option<Info> {
        match self {
            Device::Ft232h(d) => Some(d.info()),
            Device::Ft232r(d) => Some(d.info()),
            Device::Generic(d) => Some(d.info.clone()),
            Device::Broken(_) => None,
        }
    }

    /// The MPSSE facade, if this is one
    pub fn as_ft232h(&self) -> Option<&Ft232h> {
        match self {
            Device::Ft232h(d) => Some(d),
            _ => None,
        }
    }

    /// The bit-bang facade, if this is one
    pub fn as_ft232r(&self) -> Option<&Ft232r> {
        match self {
            Device::Ft232r(d) => Some(d),
            _ => None,
        }
    }

    /// Drop every bus claim and reset the chip
    pub fn halt(&self) -> Result<()> {
        match self {
            Device::Ft232h(d) => d.halt(),
            Device::Ft232r(d) => d.halt(),
            Device::Generic(d) => d.reset(),
            Device::Broken(_) => Ok(()),
        }
    }

    pub(crate) fn broken(name: String) -> Self {
        Device::Broken(Broken { name })
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Initialise a freshly opened handle and build the matching facade
///
/// `index` is the enumeration index; devices after the first get it
/// appended to their name.
pub fn open(handle: Box<dyn FtdiHandle>, index: usize, config: &DeviceConfig) -> Result<Device> {
    let mut transport = Transport::new(handle, config.clone())?;
    if let Err(e) = transport.init() {
        log::debug!("Device #{} init failed ({}), resetting", index, e);
        transport.reset()?;
        transport.init()?;
    }

    let info = Info::from(transport.info());
    let name = if index > 0 {
        format!("{}({})", info.dev_type.name(), index)
    } else {
        info.dev_type.name().to_string()
    };

    let dev = match info.dev_type {
        t if t.has_mpsse_facade() => Device::Ft232h(Ft232h::open(transport, &name)?),
        DevType::Ft232R => Device::Ft232r(Ft232r::open(transport, &name)?),
        _ => {
            log::info!("{}: no dedicated support, kept open as generic", name);
            Device::Generic(Generic {
                name,
                info,
                transport: Mutex::new(transport),
            })
        }
    };
    Ok(dev)
}
