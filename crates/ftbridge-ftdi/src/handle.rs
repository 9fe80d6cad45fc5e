//! Transport handle
//!
//! [`FtdiHandle`] is the raw primitive a USB backend provides. [`Transport`]
//! wraps it with the I/O discipline every engine relies on: chunked blocking
//! writes, polling reads gated on the queue status, a cancellable
//! `read_all`, and `flush` to drop stale bytes. All engine I/O goes through
//! a `Transport`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::DeviceConfig;
use crate::error::{FtdiError, Result};
use ftbridge_core::Frequency;

use crate::protocol::{BitMode, DevType};

/// Largest chunk handed to the backend in one read or write call
pub const MAX_CHUNK: usize = 4096;

/// Sleep between polls when nothing is pending
const POLL_INTERVAL: Duration = Duration::from_micros(100);

/// Identity of an opened device, read once from the USB descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleInfo {
    /// Device type
    pub dev_type: DevType,
    /// USB vendor ID
    pub vendor_id: u16,
    /// USB product ID
    pub product_id: u16,
    /// Serial number string, when the backend reports one
    pub serial: Option<String>,
}

/// Raw USB primitive implemented by a backend
///
/// Every method maps to one vendor driver call. Errors are tagged with the
/// call name through [`FtdiError::usb`].
pub trait FtdiHandle: Send {
    /// Read the device descriptor
    fn device_info(&mut self) -> Result<HandleInfo>;

    /// Reset the device
    fn reset(&mut self) -> Result<()>;

    /// Set the USB IN transfer size
    fn set_usb_parameters(&mut self, in_transfer_size: u32) -> Result<()>;

    /// Configure the event and error characters
    fn set_chars(
        &mut self,
        event: u8,
        event_enable: bool,
        error: u8,
        error_enable: bool,
    ) -> Result<()>;

    /// Set read and write timeouts
    fn set_timeouts(&mut self, read: Duration, write: Duration) -> Result<()>;

    /// Set the latency timer in milliseconds
    fn set_latency_timer(&mut self, ms: u8) -> Result<()>;

    /// Disable flow control
    fn set_flow_control(&mut self) -> Result<()>;

    /// Select an operating mode; `mask` sets the bit-bang pin directions
    fn set_bit_mode(&mut self, mask: u8, mode: BitMode) -> Result<()>;

    /// Sample the pins directly
    fn bit_mode(&mut self) -> Result<u8>;

    /// Set the baud rate, which also paces bit-bang modes
    fn set_baud_rate(&mut self, baud: u32) -> Result<()>;

    /// Number of bytes waiting in the receive queue
    fn queue_status(&mut self) -> Result<usize>;

    /// Read up to `buf.len()` bytes
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write `buf`, returning the number of bytes accepted
    fn write(&mut self, buf: &[u8]) -> Result<usize>;
}

/// Cancellation context for [`Transport::read_all`]
///
/// Cancelled once the deadline passes or the token is set, whichever comes
/// first.
#[derive(Debug, Clone, Default)]
pub struct Cancel {
    deadline: Option<Instant>,
    token: Option<Arc<AtomicBool>>,
}

impl Cancel {
    /// Never cancelled
    pub fn never() -> Self {
        Cancel::default()
    }

    /// Cancelled `timeout` from now
    pub fn after(timeout: Duration) -> Self {
        Cancel {
            deadline: Instant::now().checked_add(timeout),
            token: None,
        }
    }

    /// Cancelled when `token` is set
    pub fn with_token(token: Arc<AtomicBool>) -> Self {
        Cancel {
            deadline: None,
            token: Some(token),
        }
    }

    /// Whether the operation should stop
    pub fn is_cancelled(&self) -> bool {
        if let Some(token) = &self.token {
            if token.load(Ordering::Relaxed) {
                return true;
            }
        }
        matches!(self.deadline, Some(d) if Instant::now() >= d)
    }
}

/// The single I/O chokepoint of a device
pub struct Transport {
    handle: Box<dyn FtdiHandle>,
    info: HandleInfo,
    config: DeviceConfig,
    clock: Frequency,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("info", &self.info)
            .field("config", &self.config)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Wrap an opened backend handle, reading its descriptor
    pub fn new(mut handle: Box<dyn FtdiHandle>, config: DeviceConfig) -> Result<Self> {
        let info = handle.device_info()?;
        log::debug!(
            "Opened {} VID={:04X} PID={:04X}",
            info.dev_type,
            info.vendor_id,
            info.product_id
        );
        Ok(Transport {
            handle,
            info,
            config,
            clock: Frequency::default(),
        })
    }

    /// Device identity
    pub fn info(&self) -> &HandleInfo {
        &self.info
    }

    /// Configuration the device was opened with
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// A cancellation context bounded by the round trip deadline
    pub fn round_trip(&self) -> Cancel {
        Cancel::after(self.config.round_trip)
    }

    /// Clock last programmed into the engine, 0 Hz when unknown
    pub fn clock(&self) -> Frequency {
        self.clock
    }

    pub(crate) fn set_clock(&mut self, clock: Frequency) {
        self.clock = clock;
    }

    /// Deadline for reading back a transfer of `bits` clock cycles
    ///
    /// The round trip deadline plus the time the bits take on the wire at
    /// the current clock.
    pub fn read_deadline(&self, bits: u64) -> Cancel {
        let wire = if self.clock.is_zero() {
            Duration::ZERO
        } else {
            self.clock.cycles(bits)
        };
        Cancel::after(self.config.round_trip.saturating_add(wire))
    }

    /// Common USB setup
    pub fn init(&mut self) -> Result<()> {
        self.handle.set_usb_parameters(self.config.usb_transfer_size)?;
        self.handle
            .set_timeouts(self.config.io_timeout, self.config.io_timeout)?;
        self.handle.set_chars(0, false, 0, false)?;
        self.handle.set_latency_timer(self.config.latency_timer)?;
        Ok(())
    }

    /// Setup for the bit-bang personalities
    pub fn init_non_mpsse(&mut self) -> Result<()> {
        self.init()?;
        self.handle.set_flow_control()?;
        self.flush()
    }

    /// Reset the device and drop whatever it emits right after
    pub fn reset(&mut self) -> Result<()> {
        log::debug!("Resetting {}", self.info.dev_type);
        self.handle.reset()?;
        self.handle.set_bit_mode(0, BitMode::Reset)?;
        // The chip may emit transient garbage right after reset.
        if let Err(e) = self.flush() {
            log::debug!("Ignoring flush error after reset: {}", e);
        }
        Ok(())
    }

    /// Select an operating mode
    pub fn set_bit_mode(&mut self, mask: u8, mode: BitMode) -> Result<()> {
        log::debug!("SetBitMode mask=0x{:02X} mode={:?}", mask, mode);
        self.handle.set_bit_mode(mask, mode)
    }

    /// Sample the pins directly
    pub fn bit_mode(&mut self) -> Result<u8> {
        self.handle.bit_mode()
    }

    /// Set the baud rate; in bit-bang modes it paces the samples
    pub fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        log::debug!("SetBaudRate {}", baud);
        self.handle.set_baud_rate(baud)?;
        self.clock = Frequency::from_hz(baud as u64);
        Ok(())
    }

    /// Blocking write in chunks of at most [`MAX_CHUNK`] bytes
    ///
    /// On failure after some bytes went out, the error reports how many.
    pub fn write(&mut self, b: &[u8]) -> Result<usize> {
        let mut offset = 0;
        while offset < b.len() {
            let end = (offset + MAX_CHUNK).min(b.len());
            match self.handle.write(&b[offset..end]) {
                Ok(0) => return Err(self.write_error(offset, b.len(), "device accepted 0 bytes")),
                Ok(n) => offset += n,
                Err(e) if offset == 0 => return Err(e),
                Err(e) => return Err(self.write_error(offset, b.len(), e)),
            }
        }
        log::trace!("Sent {} bytes", offset);
        Ok(offset)
    }

    fn write_error(&self, written: usize, wanted: usize, e: impl std::fmt::Display) -> FtdiError {
        FtdiError::Usb {
            op: "Write",
            message: format!("{} (after {} of {} bytes)", e, written, wanted),
        }
    }

    /// Read what is already queued, at most `buf.len()` bytes
    ///
    /// Returns 0 immediately when nothing is pending.
    pub fn read_available(&mut self, buf: &mut [u8]) -> Result<usize> {
        let pending = self.handle.queue_status()?;
        if pending == 0 || buf.is_empty() {
            return Ok(0);
        }
        let n = pending.min(buf.len());
        self.handle.read(&mut buf[..n])
    }

    /// Fill `buf` completely unless `cancel` fires first
    ///
    /// Cancellation returns [`FtdiError::Truncated`] with the count so far.
    pub fn read_all(&mut self, cancel: &Cancel, buf: &mut [u8]) -> Result<usize> {
        let mut offset = 0;
        while offset < buf.len() {
            if cancel.is_cancelled() {
                return Err(FtdiError::Truncated {
                    read: offset,
                    wanted: buf.len(),
                });
            }
            let end = (offset + MAX_CHUNK).min(buf.len());
            let n = self.read_available(&mut buf[offset..end])?;
            if n == 0 {
                std::thread::sleep(POLL_INTERVAL);
            }
            offset += n;
        }
        log::trace!("Received {} bytes", offset);
        Ok(offset)
    }

    /// Drain stale bytes from the receive queue
    pub fn flush(&mut self) -> Result<()> {
        let mut scratch = [0u8; 128];
        loop {
            if self.read_available(&mut scratch)? == 0 {
                return Ok(());
            }
        }
    }
}
