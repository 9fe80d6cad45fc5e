//! Device enumeration
//!
//! A [`DeviceManager`] is an explicit context: whoever composes devices
//! creates one from a [`Driver`] and passes it along. Nothing is registered
//! process-wide.

use crate::config::DeviceConfig;
use crate::device::{self, Device};
use crate::error::{FtdiError, Result};
use crate::handle::FtdiHandle;

/// A USB backend able to enumerate and open FTDI devices
pub trait Driver {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Number of devices found at enumeration time
    fn num_devices(&self) -> Result<usize>;

    /// Open the device at `index`
    fn open(&self, index: usize) -> Result<Box<dyn FtdiHandle>>;
}

/// Every device of one enumeration pass
#[derive(Debug, Default)]
pub struct DeviceManager {
    devices: Vec<Device>,
}

impl DeviceManager {
    /// Open every device the driver reports
    ///
    /// A device that fails to open is kept as a broken entry named
    /// `broken#<index>: <error>` so the enumeration order stays visible.
    pub fn open_all(driver: &dyn Driver, config: &DeviceConfig) -> Result<Self> {
        let n = driver.num_devices()?;
        log::info!("{}: found {} device(s)", driver.name(), n);
        let mut devices = Vec::with_capacity(n);
        for i in 0..n {
            match driver.open(i).and_then(|h| device::open(h, i, config)) {
                Ok(dev) => {
                    log::info!("Opened {}", dev);
                    devices.push(dev);
                }
                Err(e) => {
                    log::warn!("Device #{} failed to open: {}", i, e);
                    devices.push(Device::broken(format!("broken#{}: {}", i, e)));
                }
            }
        }
        Ok(DeviceManager { devices })
    }

    /// Device with the given name
    pub fn find(&self, name: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.name() == name)
    }

    /// Device at an enumeration index
    pub fn get(&self, index: usize) -> Option<&Device> {
        self.devices.get(index)
    }

    /// Device by name or enumeration index
    pub fn lookup(&self, key: &str) -> Result<&Device> {
        if let Some(d) = self.find(key) {
            return Ok(d);
        }
        key.parse::<usize>()
            .ok()
            .and_then(|i| self.get(i))
            .ok_or(FtdiError::DeviceNotFound)
    }

    /// All devices in enumeration order
    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    /// Number of entries, broken ones included
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// True when nothing was enumerated
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DevType;
    use crate::testing::{FakeDriver, FakeHandle};

    #[test]
    fn test_open_all() {
        let driver = FakeDriver {
            devices: vec![
                Some(FakeHandle::new(DevType::Ft232H)),
                None,
                Some(FakeHandle::new(DevType::Ft232R)),
            ],
        };
        let mgr = DeviceManager::open_all(&driver, &DeviceConfig::default()).unwrap();
        assert_eq!(mgr.len(), 3);
        let names: Vec<_> = mgr.iter().map(|d| d.name().to_string()).collect();
        assert_eq!(
            names,
            vec!["FT232H", "broken#1: ftdi: Open: device busy", "FT232R(2)"]
        );
        assert!(mgr.find("FT232R(2)").unwrap().as_ft232r().is_some());
        assert!(mgr.get(1).unwrap().info().is_none());
        assert_eq!(mgr.lookup("0").unwrap().name(), "FT232H");
        assert!(matches!(mgr.lookup("FT4232H"), Err(FtdiError::DeviceNotFound)));
    }

    #[test]
    fn test_empty() {
        let driver = FakeDriver { devices: vec![] };
        let mgr = DeviceManager::open_all(&driver, &DeviceConfig::default()).unwrap();
        assert!(mgr.is_empty());
        assert!(mgr.find("FT232H").is_none());
    }
}
