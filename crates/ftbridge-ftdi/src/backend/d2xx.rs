//! D2XX backend through libftd2xx

use std::time::Duration;

use libftd2xx::{DeviceType, Ftdi, FtdiCommon};

use crate::error::{FtdiError, Result};
use crate::handle::{FtdiHandle, HandleInfo};
use crate::manager::Driver;
use crate::protocol::{BitMode, DevType};

fn dev_type(t: DeviceType) -> DevType {
    match t {
        DeviceType::FTBM => DevType::Ft232Bm,
        DeviceType::FTAM => DevType::Ft232Am,
        DeviceType::FT100AX => DevType::Ft100Ax,
        DeviceType::FT2232C => DevType::Ft2232C,
        DeviceType::FT232R => DevType::Ft232R,
        DeviceType::FT2232H => DevType::Ft2232H,
        DeviceType::FT4232H => DevType::Ft4232H,
        DeviceType::FT232H => DevType::Ft232H,
        DeviceType::FT_X_SERIES => DevType::FtX,
        _ => DevType::Unknown,
    }
}

fn bit_mode(mode: BitMode) -> libftd2xx::BitMode {
    match mode {
        BitMode::Reset => libftd2xx::BitMode::Reset,
        BitMode::AsyncBitbang => libftd2xx::BitMode::AsyncBitbang,
        BitMode::Mpsse => libftd2xx::BitMode::Mpsse,
        BitMode::SyncBitbang => libftd2xx::BitMode::SyncBitbang,
        BitMode::McuHost => libftd2xx::BitMode::McuHost,
        BitMode::FastSerial => libftd2xx::BitMode::FastSerial,
        BitMode::CbusBitbang => libftd2xx::BitMode::CbusBitbang,
        BitMode::SyncFifo => libftd2xx::BitMode::SyncFifo,
    }
}

/// An opened device on the D2XX driver
pub struct D2xxHandle {
    ft: Ftdi,
}

impl FtdiHandle for D2xxHandle {
    fn device_info(&mut self) -> Result<HandleInfo> {
        let info = self
            .ft
            .device_info()
            .map_err(|e| FtdiError::usb("GetDeviceInfo", e))?;
        Ok(HandleInfo {
            dev_type: dev_type(info.device_type),
            vendor_id: info.vendor_id,
            product_id: info.product_id,
            serial: Some(info.serial_number).filter(|s| !s.is_empty()),
        })
    }

    fn reset(&mut self) -> Result<()> {
        self.ft.reset().map_err(|e| FtdiError::usb("Reset", e))
    }

    fn set_usb_parameters(&mut self, in_transfer_size: u32) -> Result<()> {
        self.ft
            .set_usb_parameters(in_transfer_size)
            .map_err(|e| FtdiError::usb("SetUSBParameters", e))
    }

    fn set_chars(
        &mut self,
        event: u8,
        event_enable: bool,
        error: u8,
        error_enable: bool,
    ) -> Result<()> {
        self.ft
            .set_chars(event, event_enable, error, error_enable)
            .map_err(|e| FtdiError::usb("SetChars", e))
    }

    fn set_timeouts(&mut self, read: Duration, write: Duration) -> Result<()> {
        self.ft
            .set_timeouts(read, write)
            .map_err(|e| FtdiError::usb("SetTimeouts", e))
    }

    fn set_latency_timer(&mut self, ms: u8) -> Result<()> {
        self.ft
            .set_latency_timer(Duration::from_millis(ms as u64))
            .map_err(|e| FtdiError::usb("SetLatencyTimer", e))
    }

    fn set_flow_control(&mut self) -> Result<()> {
        self.ft
            .set_flow_control_none()
            .map_err(|e| FtdiError::usb("SetFlowControl", e))
    }

    fn set_bit_mode(&mut self, mask: u8, mode: BitMode) -> Result<()> {
        self.ft
            .set_bit_mode(mask, bit_mode(mode))
            .map_err(|e| FtdiError::usb("SetBitMode", e))
    }

    fn bit_mode(&mut self) -> Result<u8> {
        self.ft
            .bit_mode()
            .map_err(|e| FtdiError::usb("GetBitMode", e))
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        self.ft
            .set_baud_rate(baud)
            .map_err(|e| FtdiError::usb("SetBaudRate", e))
    }

    fn queue_status(&mut self) -> Result<usize> {
        self.ft
            .queue_status()
            .map_err(|e| FtdiError::usb("GetQueueStatus", e))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ft.read(buf).map_err(|e| FtdiError::usb("Read", e))
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.ft.write(buf).map_err(|e| FtdiError::usb("Write", e))
    }
}

/// Enumerates devices through the D2XX driver
pub struct D2xxDriver {
    serials: Vec<String>,
}

impl D2xxDriver {
    /// Snapshot the devices the D2XX driver reports
    pub fn new() -> Result<Self> {
        let serials = libftd2xx::list_devices()
            .map_err(|e| FtdiError::usb("ListDevices", e))?
            .into_iter()
            .map(|info| info.serial_number)
            .collect::<Vec<_>>();
        log::debug!("D2XX reports {} device(s)", serials.len());
        Ok(D2xxDriver { serials })
    }
}

impl Driver for D2xxDriver {
    fn name(&self) -> &'static str {
        "d2xx"
    }

    fn num_devices(&self) -> Result<usize> {
        Ok(self.serials.len())
    }

    fn open(&self, index: usize) -> Result<Box<dyn FtdiHandle>> {
        let serial = self.serials.get(index).ok_or(FtdiError::DeviceNotFound)?;
        let ft = Ftdi::with_serial_number(serial).map_err(|e| FtdiError::usb("Open", e))?;
        Ok(Box::new(D2xxHandle { ft }))
    }
}
