//! rs-ftdi backend
//!
//! rs-ftdi strips the modem status bytes and exposes a blocking bulk read,
//! but has no receive queue query. The handle stages whatever one bulk read
//! returns and reports the staged length as the queue status.

use std::time::Duration;

use nusb::MaybeFuture;
use rs_ftdi::{ChipType, FlowControl, FtdiDevice, Interface};

use crate::error::{FtdiError, Result};
use crate::handle::{FtdiHandle, HandleInfo};
use crate::manager::Driver;
use crate::protocol::{BitMode, DevType};

/// Bulk read size used to fill the staging buffer
const STAGE_CHUNK: usize = 4096;

fn dev_type(chip: ChipType) -> DevType {
    #[allow(unreachable_patterns)]
    match chip {
        ChipType::Am => DevType::Ft232Am,
        ChipType::Bm => DevType::Ft232Bm,
        ChipType::Ft2232C => DevType::Ft2232C,
        ChipType::Ft232R => DevType::Ft232R,
        ChipType::Ft2232H => DevType::Ft2232H,
        ChipType::Ft4232H => DevType::Ft4232H,
        ChipType::Ft232H => DevType::Ft232H,
        ChipType::Ft230X => DevType::FtX,
        _ => DevType::Unknown,
    }
}

fn bit_mode(mode: BitMode) -> rs_ftdi::BitMode {
    match mode {
        BitMode::Reset => rs_ftdi::BitMode::Reset,
        BitMode::AsyncBitbang => rs_ftdi::BitMode::BitBang,
        BitMode::Mpsse => rs_ftdi::BitMode::Mpsse,
        BitMode::SyncBitbang => rs_ftdi::BitMode::SyncBB,
        BitMode::McuHost => rs_ftdi::BitMode::Mcu,
        BitMode::FastSerial => rs_ftdi::BitMode::Opto,
        BitMode::CbusBitbang => rs_ftdi::BitMode::Cbus,
        BitMode::SyncFifo => rs_ftdi::BitMode::SyncFf,
    }
}

/// An opened device on the rs-ftdi backend
pub struct NativeHandle {
    device: FtdiDevice,
    vendor_id: u16,
    product_id: u16,
    serial: Option<String>,
    staged: Vec<u8>,
}

impl NativeHandle {
    /// Open interface A of the device described by `info`
    pub fn open(info: nusb::DeviceInfo) -> Result<Self> {
        let vendor_id = info.vendor_id();
        let product_id = info.product_id();
        let serial = info.serial_number().map(str::to_string);
        let device = FtdiDevice::from_device_info(info, Interface::A)
            .map_err(|e| FtdiError::usb("Open", e))?;
        Ok(NativeHandle {
            device,
            vendor_id,
            product_id,
            serial,
            staged: Vec::with_capacity(STAGE_CHUNK),
        })
    }
}

impl FtdiHandle for NativeHandle {
    fn device_info(&mut self) -> Result<HandleInfo> {
        Ok(HandleInfo {
            dev_type: dev_type(self.device.chip_type()),
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            serial: self.serial.clone(),
        })
    }

    fn reset(&mut self) -> Result<()> {
        self.staged.clear();
        self.device
            .usb_reset()
            .map_err(|e| FtdiError::usb("Reset", e))
    }

    fn set_usb_parameters(&mut self, in_transfer_size: u32) -> Result<()> {
        self.device.set_read_chunksize(in_transfer_size as usize);
        Ok(())
    }

    fn set_chars(
        &mut self,
        event: u8,
        event_enable: bool,
        error: u8,
        error_enable: bool,
    ) -> Result<()> {
        self.device
            .set_event_char(event, event_enable)
            .map_err(|e| FtdiError::usb("SetChars", e))?;
        self.device
            .set_error_char(error, error_enable)
            .map_err(|e| FtdiError::usb("SetChars", e))
    }

    fn set_timeouts(&mut self, read: Duration, write: Duration) -> Result<()> {
        self.device.set_read_timeout(read);
        self.device.set_write_timeout(write);
        Ok(())
    }

    fn set_latency_timer(&mut self, ms: u8) -> Result<()> {
        self.device
            .set_latency_timer(ms)
            .map_err(|e| FtdiError::usb("SetLatencyTimer", e))
    }

    fn set_flow_control(&mut self) -> Result<()> {
        self.device
            .set_flow_control(FlowControl::Disabled)
            .map_err(|e| FtdiError::usb("SetFlowControl", e))
    }

    fn set_bit_mode(&mut self, mask: u8, mode: BitMode) -> Result<()> {
        self.device
            .set_bitmode(mask, bit_mode(mode))
            .map_err(|e| FtdiError::usb("SetBitMode", e))
    }

    fn bit_mode(&mut self) -> Result<u8> {
        self.device
            .read_pins()
            .map_err(|e| FtdiError::usb("GetBitMode", e))
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        self.device
            .set_baudrate(baud)
            .map_err(|e| FtdiError::usb("SetBaudRate", e))
    }

    fn queue_status(&mut self) -> Result<usize> {
        if self.staged.is_empty() {
            let mut chunk = [0u8; STAGE_CHUNK];
            let n = self
                .device
                .read_data(&mut chunk)
                .map_err(|e| FtdiError::usb("GetQueueStatus", e))?;
            self.staged.extend_from_slice(&chunk[..n]);
        }
        Ok(self.staged.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.staged.is_empty() {
            return self
                .device
                .read_data(buf)
                .map_err(|e| FtdiError::usb("Read", e));
        }
        let n = self.staged.len().min(buf.len());
        buf[..n].copy_from_slice(&self.staged[..n]);
        self.staged.drain(..n);
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.device
            .write_data(buf)
            .map_err(|e| FtdiError::usb("Write", e))
    }
}

/// Enumerates FTDI devices on the USB bus through nusb
pub struct NativeDriver {
    devices: Vec<nusb::DeviceInfo>,
}

impl NativeDriver {
    /// Snapshot the FTDI devices currently attached
    pub fn new() -> Result<Self> {
        let devices = nusb::list_devices()
            .wait()
            .map_err(|e| FtdiError::usb("ListDevices", e))?
            .filter(|dev| super::is_ftdi(dev.vendor_id(), dev.product_id()))
            .collect::<Vec<_>>();
        log::debug!("Found {} FTDI device(s)", devices.len());
        Ok(NativeDriver { devices })
    }
}

impl Driver for NativeDriver {
    fn name(&self) -> &'static str {
        "rs-ftdi"
    }

    fn num_devices(&self) -> Result<usize> {
        Ok(self.devices.len())
    }

    fn open(&self, index: usize) -> Result<Box<dyn FtdiHandle>> {
        let info = self
            .devices
            .get(index)
            .cloned()
            .ok_or(FtdiError::DeviceNotFound)?;
        log::debug!(
            "Opening FTDI VID={:04X} PID={:04X} (rs-ftdi backend)",
            info.vendor_id(),
            info.product_id()
        );
        Ok(Box::new(NativeHandle::open(info)?))
    }
}
