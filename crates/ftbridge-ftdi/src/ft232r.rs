//! FT232R facade
//!
//! The FT232R has no MPSSE. Its eight D pins are driven in synchronous
//! bit-bang mode: every byte written sets all outputs at once and yields one
//! sample of all inputs, taken just before the outputs change. Reads must
//! therefore always drain one sample per byte written.

use std::sync::{Arc, Mutex, MutexGuard};

use ftbridge_core::gpio::{Level, Pull};
use ftbridge_core::spi::clamp_frequency;
use ftbridge_core::{Error as CoreError, Frequency};

use crate::device::Info;
use crate::error::{FtdiError, Result};
use crate::gpio::{GpioGroup, Pin, PinBank};
use crate::handle::Transport;
use crate::protocol::{BitMode, Group, MAX_TRANSFER};
use crate::spi_sync::SyncSpiPort;

/// Baud rate programmed at open
pub const DEFAULT_BAUD: u32 = 3_000_000;

/// Fastest bit-bang rate
pub const MAX_SPEED: Frequency = Frequency::from_mhz(3);

/// Slowest rate accepted by `set_speed`
pub const MIN_SPEED: Frequency = Frequency::from_hz(100);

/// Samples queued before the first read
const AHEAD: usize = 128;
/// Samples per read/write step after that
const STEP: usize = 64;

/// Write `w` as a synchronous bit-bang burst and read one sample per byte
///
/// `r` must be as long as `w`. Writes run [`AHEAD`] samples ahead of reads
/// so the chip never starves.
fn sync_burst(t: &mut Transport, w: &[u8], r: &mut [u8]) -> Result<()> {
    if w.len() != r.len() {
        return Err(CoreError::BufferLengthMismatch {
            write: w.len(),
            read: r.len(),
        }
        .into());
    }
    let mut sent = w.len().min(AHEAD);
    t.write(&w[..sent])?;
    let mut received = 0;
    while received < w.len() {
        let n = (sent - received).min(STEP);
        let cancel = t.read_deadline(n as u64);
        t.read_all(&cancel, &mut r[received..received + n])?;
        received += n;
        if sent < w.len() {
            let m = (w.len() - sent).min(STEP);
            t.write(&w[sent..sent + m])?;
            sent += m;
        }
    }
    Ok(())
}

pub(crate) struct State {
    pub(crate) transport: Transport,
    pub(crate) dbus: GpioGroup,
    /// C0..C3; bits 4..7 are unused
    pub(crate) cbus: GpioGroup,
    /// Output mask last programmed with SetBitMode
    mask: u8,
    /// The chip was last switched to CBUS bit-bang
    in_cbus_mode: bool,
    pub(crate) using_spi: bool,
    /// Bumped by `halt`; SPI ports from an older epoch are closed
    pub(crate) epoch: u64,
}

impl State {
    fn new(transport: Transport, name: &str) -> Self {
        State {
            transport,
            dbus: GpioGroup::new(name, Group::D),
            cbus: GpioGroup::new(name, Group::C),
            mask: 0,
            in_cbus_mode: false,
            using_spi: false,
            epoch: 0,
        }
    }

    /// Enter synchronous bit-bang at the default rate, every pin an input
    fn start(&mut self) -> Result<u8> {
        self.transport.set_baud_rate(DEFAULT_BAUD)?;
        self.transport.set_bit_mode(0, BitMode::SyncBitbang)?;
        self.mask = 0;
        self.in_cbus_mode = false;
        self.dbus.set(0, 0);
        self.cbus.set(0, 0);
        self.drive(0)
    }

    /// Change which pins are outputs; no-op when unchanged
    pub(crate) fn set_mask(&mut self, mask: u8) -> Result<()> {
        if mask != self.mask || self.in_cbus_mode {
            self.transport.set_bit_mode(mask, BitMode::SyncBitbang)?;
            self.mask = mask;
            self.in_cbus_mode = false;
        }
        let value = self.dbus.value();
        self.dbus.set(value, mask);
        Ok(())
    }

    /// Synchronous bit-bang burst on the D pins, see [`sync_burst`]
    pub(crate) fn burst(&mut self, w: &[u8], r: &mut [u8]) -> Result<()> {
        if self.in_cbus_mode {
            let mask = self.mask;
            self.set_mask(mask)?;
        }
        sync_burst(&mut self.transport, w, r)
    }

    /// Drive the outputs and return the sample taken before they changed
    pub(crate) fn drive(&mut self, value: u8) -> Result<u8> {
        let mut sample = [0u8; 1];
        self.burst(&[value], &mut sample)?;
        let direction = self.dbus.direction();
        self.dbus.set(value, direction);
        self.dbus.read(sample[0]);
        Ok(sample[0])
    }

    /// Program C0..C3; the upper nibble of the mode byte is the direction
    fn cbus_write(&mut self, value: u8, direction: u8) -> Result<()> {
        let bits = (direction & 0x0F) << 4 | (value & 0x0F);
        self.transport.set_bit_mode(bits, BitMode::CbusBitbang)?;
        self.in_cbus_mode = true;
        self.cbus.set(value & 0x0F, direction & 0x0F);
        Ok(())
    }

    /// Sample C0..C3
    fn cbus_sample(&mut self) -> Result<u8> {
        if !self.in_cbus_mode {
            let (value, direction) = (self.cbus.value(), self.cbus.direction());
            self.cbus_write(value, direction)?;
        }
        let v = self.transport.bit_mode()? & 0x0F;
        self.cbus.read(v);
        Ok(v)
    }
}

/// C pins that exist on the chip
fn check_cbus_pin(n: u8) -> Result<()> {
    if n > 3 {
        return Err(CoreError::InvalidPin(n).into());
    }
    Ok(())
}

pub(crate) struct Shared {
    name: String,
    info: Info,
    state: Mutex<State>,
}

impl Shared {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, State>> {
        Ok(self.state.lock()?)
    }
}

impl PinBank for Shared {
    fn pin_in(&self, group: Group, n: u8) -> Result<()> {
        let mut st = self.lock()?;
        match group {
            Group::D => {
                let (_, direction) = st.dbus.in_(n)?;
                st.set_mask(direction)
            }
            Group::C => {
                check_cbus_pin(n)?;
                let (value, direction) = st.cbus.in_(n)?;
                st.cbus_write(value, direction)
            }
        }
    }

    fn pin_read(&self, group: Group, n: u8) -> Result<Level> {
        let mut st = self.lock()?;
        match group {
            Group::D => {
                st.dbus.check_free(n)?;
                let value = st.dbus.value();
                // The sample of a write reflects the pins before it; write twice.
                st.drive(value)?;
                st.drive(value)?;
                Ok(st.dbus.level(n))
            }
            Group::C => {
                check_cbus_pin(n)?;
                st.cbus_sample()?;
                Ok(st.cbus.level(n))
            }
        }
    }

    fn pin_out(&self, group: Group, n: u8, level: Level) -> Result<()> {
        let mut st = self.lock()?;
        match group {
            Group::D => {
                let (value, direction) = st.dbus.out(n, level)?;
                st.set_mask(direction)?;
                st.drive(value)?;
            }
            Group::C => {
                check_cbus_pin(n)?;
                let (value, direction) = st.cbus.out(n, level)?;
                st.cbus_write(value, direction)?;
            }
        }
        Ok(())
    }

    fn pin_function(&self, group: Group, n: u8) -> String {
        match self.state.lock() {
            Ok(st) => match group {
                Group::D => st.dbus.function(n),
                Group::C => st.cbus.function(n),
            },
            Err(_) => "Unknown".to_string(),
        }
    }

    fn pin_default_pull(&self, group: Group, n: u8) -> Pull {
        if group == Group::C && n == 3 {
            Pull::Float
        } else {
            Pull::PullUp
        }
    }
}

/// An FT232R driven in synchronous bit-bang mode
#[derive(Clone)]
pub struct Ft232r {
    shared: Arc<Shared>,
    header: Vec<Pin>,
}

impl Ft232r {
    /// Switch to synchronous bit-bang with every pin an input
    ///
    /// C0..C3 are left alone until first used; they only respond when the
    /// EEPROM configures them for I/O.
    pub fn open(mut transport: Transport, name: &str) -> Result<Self> {
        transport.init_non_mpsse()?;
        let info = Info::from(transport.info());
        let mut st = State::new(transport, name);
        let sample = st.start()?;
        log::debug!("{}: initial pins 0x{:02X}", name, sample);

        let shared = Arc::new(Shared {
            name: name.to_string(),
            info,
            state: Mutex::new(st),
        });
        let bank: Arc<dyn PinBank> = shared.clone();
        let header = (0..8)
            .map(|n| (Group::D, n))
            .chain((0..4).map(|n| (Group::C, n)))
            .map(|(g, n)| Pin::new(Arc::clone(&bank), format!("{}.{}{}", name, g.letter(), n), g, n))
            .collect();
        log::info!("{}: opened in synchronous bit-bang mode", name);
        Ok(Ft232r { shared, header })
    }

    /// Device name
    pub fn name(&self) -> &str {
        self.shared.name()
    }

    /// Identification read at open
    pub fn info(&self) -> Info {
        self.shared.info.clone()
    }

    /// D0..D7 then C0..C3
    pub fn header(&self) -> &[Pin] {
        &self.header
    }

    /// Find a pin by its short name, e.g. `D3` or `C0`
    pub fn pin(&self, short: &str) -> Option<&Pin> {
        self.header
            .iter()
            .find(|p| p.name().rsplit('.').next() == Some(short))
    }

    /// Select which D pins are outputs
    pub fn set_dbus_mask(&self, mask: u8) -> Result<()> {
        let mut st = self.shared.lock()?;
        if st.using_spi {
            return Err(FtdiError::Busy("SPI"));
        }
        st.set_mask(mask)
    }

    /// Set value and direction of C0..C3 at once; bits 4..7 are ignored
    pub fn cbus(&self, value: u8, direction: u8) -> Result<()> {
        self.shared.lock()?.cbus_write(value, direction)
    }

    /// Sample C0..C3
    pub fn cbus_read(&self) -> Result<u8> {
        self.shared.lock()?.cbus_sample()
    }

    /// Raw synchronous bit-bang burst
    ///
    /// Each byte of `w` is applied to the outputs and `r` receives one
    /// sample per byte. With an empty `w` the current value is repeated.
    pub fn tx(&self, w: &[u8], r: &mut [u8]) -> Result<()> {
        if w.is_empty() && r.is_empty() {
            return Err(FtdiError::InvalidParameter(
                "tx needs a write or a read buffer".into(),
            ));
        }
        if !w.is_empty() && !r.is_empty() && w.len() != r.len() {
            return Err(CoreError::BufferLengthMismatch {
                write: w.len(),
                read: r.len(),
            }
            .into());
        }
        let len = w.len().max(r.len());
        if len > MAX_TRANSFER {
            return Err(CoreError::BufferTooLong {
                len,
                max: MAX_TRANSFER,
            }
            .into());
        }
        let mut guard = self.shared.lock()?;
        let st = &mut *guard;
        if st.using_spi {
            return Err(FtdiError::Busy("SPI"));
        }
        let repeated;
        let w = if w.is_empty() {
            repeated = vec![st.dbus.value(); len];
            &repeated[..]
        } else {
            w
        };
        let mut scratch;
        let r = if r.is_empty() {
            scratch = vec![0u8; len];
            &mut scratch[..]
        } else {
            r
        };
        st.burst(w, r)?;
        let direction = st.dbus.direction();
        if let (Some(&last), Some(&sample)) = (w.last(), r.last()) {
            st.dbus.set(last, direction);
            st.dbus.read(sample);
        }
        Ok(())
    }

    /// SPI port on D0..D3
    pub fn spi(&self) -> Result<SyncSpiPort> {
        if self.shared.lock()?.using_spi {
            return Err(FtdiError::Busy("SPI"));
        }
        Ok(SyncSpiPort::new(Arc::clone(&self.shared)))
    }

    /// Set the bit-bang sample rate
    ///
    /// Fails while SPI owns the pacing.
    pub fn set_speed(&self, f: Frequency) -> Result<()> {
        let f = clamp_frequency(f, MAX_SPEED, MIN_SPEED)?;
        let mut st = self.shared.lock()?;
        if st.using_spi {
            return Err(FtdiError::Busy("SPI"));
        }
        st.transport.set_baud_rate(f.hz() as u32)
    }

    /// Drop the SPI claim, reset the chip and re-enter bit-bang
    ///
    /// Every pin goes back to input and the rate to [`DEFAULT_BAUD`]. An
    /// open SPI connection fails with `Closed` afterwards.
    pub fn halt(&self) -> Result<()> {
        let mut st = self.shared.lock()?;
        st.using_spi = false;
        st.epoch += 1;
        st.dbus.release();
        log::debug!("{}: halting", self.shared.name);
        st.transport.reset()?;
        st.transport.init_non_mpsse()?;
        st.start()?;
        Ok(())
    }
}

impl std::fmt::Debug for Ft232r {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ft232r")
            .field("name", &self.shared.name)
            .field("info", &self.shared.info)
            .finish()
    }
}

impl std::fmt::Display for Ft232r {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.shared.name)
    }
}
