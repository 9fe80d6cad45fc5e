//! I2C over the MPSSE engine
//!
//! Pins: D0 SCL, D1 SDA out, D2 SDA in (tie D1 and D2 together). The pins
//! are switched to open drain and 3-phase clocking keeps data valid on both
//! clock edges, which costs a third of the bit rate: the engine clock runs
//! at 1.5 times the bus speed.
//!
//! START and STOP have no opcode. They are built from repeated GPIO set
//! commands; the repetition count comes from `DeviceConfig::i2c_hold`.

use std::sync::Arc;

use ftbridge_core::i2c::{address_byte, validate_address, I2cBus};
use ftbridge_core::{Duplex, Error as CoreError, ErrorType, Frequency};

use crate::error::{FtdiError, Result};
use crate::ft232h::{Shared, State};
use crate::protocol::{
    Group, DIS_3_PHASE, DRIVE_ZERO_ONLY, EN_3_PHASE, MPSSE_BITMODE, MPSSE_DO_READ,
    MPSSE_DO_WRITE, MPSSE_WRITE_NEG, SEND_IMMEDIATE,
};

/// Bus speed after setup
pub const DEFAULT_SPEED: Frequency = Frequency::from_khz(400);

/// Slowest bus speed accepted by `set_speed`
pub const MIN_SPEED: Frequency = Frequency::from_hz(100);

/// Fastest bus speed accepted by `set_speed`
pub const MAX_SPEED: Frequency = Frequency::from_mhz(10);

const SCL: u8 = 1 << 0;
const SDA_OUT: u8 = 1 << 1;
const SDA_IN: u8 = 1 << 2;

/// Write one byte, MSB first, on the falling edge
const WRITE_BYTE: [u8; 3] = [MPSSE_DO_WRITE | MPSSE_WRITE_NEG, 0x00, 0x00];
/// Read one bit on the rising edge
const READ_BIT: [u8; 2] = [MPSSE_DO_READ | MPSSE_BITMODE, 0x00];
/// Read eight bits on the rising edge
const READ_BYTE: [u8; 2] = [MPSSE_DO_READ | MPSSE_BITMODE, 0x07];
/// Write one bit on the falling edge; the bit value follows
const WRITE_BIT: [u8; 2] = [MPSSE_DO_WRITE | MPSSE_BITMODE | MPSSE_WRITE_NEG, 0x00];

const ACK: u8 = 0x00;
const NACK: u8 = 0x80;

fn engine_clock(bus: Frequency) -> Frequency {
    bus.scale(3, 2)
}

/// Drive SCL and SDA high and record the idle state
fn idle(st: &mut State) -> Result<()> {
    let direction = (st.dbus.direction() & 0xF8) | SCL | SDA_OUT;
    let value = (st.dbus.value() & 0xF8) | SCL | SDA_OUT;
    st.transport.mpsse_dbus(value, direction)?;
    st.dbus.set(value, direction);
    Ok(())
}

/// Upper pins of the D group plus its direction
fn levels(st: &State) -> (u8, u8) {
    (st.dbus.value() & 0xF8, st.dbus.direction())
}

fn repeat(cmd: &mut Vec<u8>, value: u8, direction: u8, n: usize) {
    for _ in 0..n {
        cmd.extend_from_slice(&Group::D.set_cmd(value, direction));
    }
}

/// SDA falls while SCL is high, then SCL falls
fn start(st: &mut State, n: usize) -> Result<()> {
    let (v, d) = levels(st);
    let mut cmd = Vec::with_capacity(6 * n);
    repeat(&mut cmd, v | SCL, d, n);
    repeat(&mut cmd, v, d, n.saturating_sub(1).max(1));
    st.transport.write(&cmd)?;
    Ok(())
}

/// Release SDA with SCL low, raise SCL, then START again
fn repeated_start(st: &mut State, n: usize) -> Result<()> {
    let (v, d) = levels(st);
    let mut cmd = Vec::with_capacity(6 * n);
    repeat(&mut cmd, v | SDA_OUT, d, n);
    repeat(&mut cmd, v | SCL | SDA_OUT, d, n);
    st.transport.write(&cmd)?;
    start(st, n)
}

/// SDA rises while SCL is high
fn stop(st: &mut State, n: usize) -> Result<()> {
    let (v, d) = levels(st);
    let mut cmd = Vec::with_capacity(9 * n);
    repeat(&mut cmd, v, d, n);
    repeat(&mut cmd, v | SCL, d, n);
    repeat(&mut cmd, v | SCL | SDA_OUT, d, n);
    st.transport.write(&cmd)?;
    Ok(())
}

/// Clock out each byte and check the acknowledge bit
///
/// SDA is released with SCL low before the ACK bit is sampled.
fn write_bytes(st: &mut State, w: &[u8]) -> Result<()> {
    st.transport.flush()?;
    let (v, d) = levels(st);
    for &b in w {
        let mut cmd = Vec::with_capacity(10);
        cmd.extend_from_slice(&WRITE_BYTE);
        cmd.push(b);
        cmd.extend_from_slice(&Group::D.set_cmd(v | SDA_OUT, d));
        cmd.extend_from_slice(&READ_BIT);
        cmd.push(SEND_IMMEDIATE);
        st.transport.write(&cmd)?;
        let mut ack = [0u8; 1];
        let cancel = st.transport.round_trip();
        st.transport.read_all(&cancel, &mut ack)?;
        if ack[0] & 1 != 0 {
            log::debug!("I²C: NAK after 0x{:02X}", b);
            return Err(FtdiError::Nack);
        }
    }
    Ok(())
}

/// Clock in each byte; ACK all but the last, which gets a NAK
fn read_bytes(st: &mut State, r: &mut [u8]) -> Result<()> {
    let (v, d) = levels(st);
    let last = r.len().saturating_sub(1);
    for (i, byte) in r.iter_mut().enumerate() {
        let mut cmd = Vec::with_capacity(14);
        cmd.extend_from_slice(&Group::D.set_cmd(v | SDA_OUT, d));
        cmd.extend_from_slice(&READ_BYTE);
        cmd.extend_from_slice(&WRITE_BIT);
        cmd.push(if i == last { NACK } else { ACK });
        cmd.extend_from_slice(&Group::D.set_cmd(v | SDA_OUT, d));
        cmd.push(SEND_IMMEDIATE);
        st.transport.write(&cmd)?;
        let mut b = [0u8; 1];
        let cancel = st.transport.round_trip();
        st.transport.read_all(&cancel, &mut b)?;
        *byte = b[0];
    }
    Ok(())
}

fn transaction(st: &mut State, n: usize, addr: u8, w: &[u8], r: &mut [u8]) -> Result<()> {
    start(st, n)?;
    if !w.is_empty() || r.is_empty() {
        write_bytes(st, &[address_byte(addr, false)])?;
        write_bytes(st, w)?;
        if !r.is_empty() {
            repeated_start(st, n)?;
        }
    }
    if !r.is_empty() {
        write_bytes(st, &[address_byte(addr, true)])?;
        read_bytes(st, r)?;
    }
    Ok(())
}

/// I2C bus on D0..D2 of an MPSSE device
///
/// Obtained from [`Ft232h::i2c`](crate::Ft232h::i2c).
pub struct MpsseI2c {
    shared: Arc<Shared>,
    open: bool,
    epoch: u64,
}

impl MpsseI2c {
    /// Switch the engine to I2C and claim the pins; the caller holds the lock
    pub(crate) fn setup(shared: Arc<Shared>, st: &mut State) -> Result<Self> {
        st.dbus
            .claim(&[(0, "I2C_SCL"), (1, "I2C_SDA"), (2, "I2C_SDA")])?;
        let configured = (|| -> Result<()> {
            st.transport.write(&[EN_3_PHASE])?;
            st.transport.mpsse_clock(engine_clock(DEFAULT_SPEED))?;
            st.transport
                .write(&[DRIVE_ZERO_ONLY, SCL | SDA_OUT | SDA_IN, 0x00])?;
            idle(st)
        })();
        if let Err(e) = configured {
            st.dbus.release();
            return Err(e);
        }
        st.using_i2c = true;
        log::info!("{}: I²C claimed at {}", shared.name(), DEFAULT_SPEED);
        Ok(MpsseI2c {
            shared,
            open: true,
            epoch: st.epoch,
        })
    }

    /// Restore 2-phase clocking and push-pull outputs, release the pins
    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        let mut guard = self.shared.lock()?;
        let st = &mut *guard;
        if st.epoch != self.epoch {
            // Halted; the chip was reset and the pins may be reused.
            return Ok(());
        }
        st.using_i2c = false;
        st.dbus.release();
        st.transport.write(&[DIS_3_PHASE])?;
        st.transport.mpsse_clock(crate::protocol::CLOCK_HIGH)?;
        st.transport.write(&[DRIVE_ZERO_ONLY, 0x00, 0x00])?;
        log::debug!("{}: I²C released", self.shared.name());
        Ok(())
    }

    /// I2C never drives both directions at once
    pub fn duplex(&self) -> Duplex {
        Duplex::Half
    }
}

impl Drop for MpsseI2c {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::warn!("Failed to release I²C bus: {}", e);
        }
    }
}

impl ErrorType for MpsseI2c {
    type Error = FtdiError;
}

impl I2cBus for MpsseI2c {
    fn tx(&mut self, addr: u16, w: &[u8], r: &mut [u8]) -> Result<()> {
        let addr = validate_address(addr)?;
        if !self.open {
            return Err(FtdiError::Closed);
        }
        let mut guard = self.shared.lock()?;
        let st = &mut *guard;
        if st.epoch != self.epoch {
            return Err(FtdiError::Closed);
        }
        let n = st.transport.config().i2c_hold_repeats();
        log::trace!(
            "I²C 0x{:02X}: write {} bytes, read {} bytes",
            addr,
            w.len(),
            r.len()
        );
        let result = transaction(st, n, addr, w, r);
        // The bus goes back to idle even after a NAK.
        let end = stop(st, n).and_then(|()| idle(st));
        result.and(end)
    }

    fn set_speed(&mut self, freq: Frequency) -> Result<()> {
        if freq < MIN_SPEED {
            return Err(CoreError::FrequencyTooLow(freq).into());
        }
        if freq > MAX_SPEED {
            return Err(CoreError::FrequencyTooHigh(freq).into());
        }
        if !self.open {
            return Err(FtdiError::Closed);
        }
        let mut st = self.shared.lock()?;
        if st.epoch != self.epoch {
            return Err(FtdiError::Closed);
        }
        let applied = st.transport.mpsse_clock(engine_clock(freq))?;
        log::debug!("{}: I²C at {} (engine {})", self.shared.name(), freq, applied);
        Ok(())
    }
}
