//! MPSSE engine driver
//!
//! Device-level operations of the command-stream mode: entering and
//! verifying the mode, programming the clock, the GPIO groups, and plain
//! data shifting commands. These are methods on [`Transport`] so every byte
//! still goes through the one I/O chokepoint.

use ftbridge_core::Frequency;

use crate::error::{FtdiError, Result};
use crate::handle::Transport;
use crate::protocol::*;

/// Which entry attempt `init_mpsse` is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitAttempt {
    /// The chip may still be in MPSSE mode from an earlier session
    FastPath,
    /// After a full reset and SetBitMode
    AfterReset,
}

/// Sequence written once the mode is verified: 30 MHz base, no adaptive
/// clocking, 2-phase clocking, no loopback, every pin an input
const MPSSE_DEFAULTS: [u8; 10] = [
    DIS_DIV_5,
    CLK_NO_ADAPTIVE,
    DIS_3_PHASE,
    LOOPBACK_END,
    SET_BITS_HIGH,
    0x00,
    0x00,
    SET_BITS_LOW,
    0x00,
    0x00,
];

impl Transport {
    /// Put the chip in MPSSE mode
    ///
    /// Tries the already-active fast path first, then resets the device and
    /// selects the mode explicitly. Fails if the second verification fails.
    pub fn init_mpsse(&mut self) -> Result<()> {
        self.enter_mpsse(InitAttempt::FastPath)
    }

    /// Reset the chip and enter MPSSE mode again
    ///
    /// Every pin returns to input and the clock to its default.
    pub fn restart_mpsse(&mut self) -> Result<()> {
        self.reset_into_mpsse()?;
        self.enter_mpsse(InitAttempt::AfterReset)
    }

    fn reset_into_mpsse(&mut self) -> Result<()> {
        self.reset()?;
        self.init()?;
        self.set_bit_mode(0, BitMode::Mpsse)
    }

    fn enter_mpsse(&mut self, mut attempt: InitAttempt) -> Result<()> {
        loop {
            match self.mpsse_verify() {
                Ok(()) => break,
                Err(e) if attempt == InitAttempt::FastPath => {
                    log::debug!("MPSSE not active yet ({}), resetting", e);
                    self.reset_into_mpsse()?;
                    attempt = InitAttempt::AfterReset;
                }
                Err(e) => return Err(e),
            }
        }
        log::debug!("MPSSE verified ({:?})", attempt);
        self.write(&MPSSE_DEFAULTS)?;
        self.set_clock(Frequency::default());
        Ok(())
    }

    /// Check that the chip interprets MPSSE commands
    ///
    /// Sends two bogus opcodes and expects each to be echoed after
    /// [`BAD_COMMAND`].
    pub fn mpsse_verify(&mut self) -> Result<()> {
        for op in [0xAA, 0xAB] {
            self.write(&[op, SEND_IMMEDIATE])?;
            let mut b = [0u8; 2];
            let cancel = self.round_trip();
            match self.read_all(&cancel, &mut b) {
                Ok(_) => {}
                Err(FtdiError::Truncated { read, .. }) => {
                    return Err(FtdiError::ModeVerification(format!(
                        "got {} of 2 bytes in response to 0x{:02X}",
                        read, op
                    )));
                }
                Err(e) => return Err(e),
            }
            if b != [BAD_COMMAND, op] {
                return Err(FtdiError::ModeVerification(format!(
                    "expected [FA, {:02X}], got {:02X?}",
                    op, b
                )));
            }
        }
        Ok(())
    }

    /// Program the clock and return the frequency actually applied
    pub fn mpsse_clock(&mut self, f: Frequency) -> Result<Frequency> {
        let setting = clock_select(f)?;
        self.write(&setting.encode())?;
        let actual = setting.actual();
        log::debug!(
            "MPSSE clock {} requested, {} applied ({:?} / {})",
            f,
            actual,
            setting.base,
            setting.divisor
        );
        self.set_clock(actual);
        Ok(actual)
    }

    /// Shift bytes out and/or in
    ///
    /// Either buffer may be empty; when both are present they must have the
    /// same length, at most [`MAX_TRANSFER`] bytes.
    pub fn mpsse_tx(
        &mut self,
        w: &[u8],
        r: &mut [u8],
        ew: ClockEdge,
        er: ClockEdge,
        order: BitOrder,
    ) -> Result<()> {
        if !w.is_empty() && !r.is_empty() && w.len() != r.len() {
            return Err(ftbridge_core::Error::BufferLengthMismatch {
                write: w.len(),
                read: r.len(),
            }
            .into());
        }
        let len = w.len().max(r.len());
        if len == 0 {
            return Ok(());
        }
        let op = transfer_op(!w.is_empty(), !r.is_empty(), ew, er, order);
        let mut cmd = Vec::with_capacity(4 + w.len());
        cmd.extend_from_slice(&data_cmd(op, len)?);
        cmd.extend_from_slice(w);
        if r.is_empty() {
            self.write(&cmd)?;
            return Ok(());
        }
        cmd.push(SEND_IMMEDIATE);
        self.write(&cmd)?;
        let cancel = self.read_deadline(len as u64 * 8);
        self.read_all(&cancel, r)?;
        Ok(())
    }

    /// Shift 1 to 8 bits of `byte` out and return the bits shifted in
    pub fn mpsse_tx_short(
        &mut self,
        byte: u8,
        bits: u8,
        ew: ClockEdge,
        er: ClockEdge,
        order: BitOrder,
    ) -> Result<u8> {
        let op = transfer_op(true, true, ew, er, order);
        let [op, n] = bits_cmd(op, bits)?;
        self.write(&[op, n, byte, SEND_IMMEDIATE])?;
        let mut b = [0u8; 1];
        let cancel = self.read_deadline(bits as u64);
        self.read_all(&cancel, &mut b)?;
        Ok(b[0])
    }

    /// Set value and direction of a pin group
    pub fn mpsse_gpio(&mut self, group: Group, value: u8, direction: u8) -> Result<()> {
        self.write(&group.set_cmd(value, direction))?;
        Ok(())
    }

    /// Sample a pin group
    pub fn mpsse_gpio_read(&mut self, group: Group) -> Result<u8> {
        self.write(&group.read_cmd())?;
        let mut b = [0u8; 1];
        let cancel = self.round_trip();
        self.read_all(&cancel, &mut b)?;
        Ok(b[0])
    }

    /// Set value and direction of D0..D7
    pub fn mpsse_dbus(&mut self, value: u8, direction: u8) -> Result<()> {
        self.mpsse_gpio(Group::D, value, direction)
    }

    /// Set value and direction of C0..C7
    pub fn mpsse_cbus(&mut self, value: u8, direction: u8) -> Result<()> {
        self.mpsse_gpio(Group::C, value, direction)
    }

    /// Sample D0..D7
    pub fn mpsse_dbus_read(&mut self) -> Result<u8> {
        self.mpsse_gpio_read(Group::D)
    }

    /// Sample C0..C7
    pub fn mpsse_cbus_read(&mut self) -> Result<u8> {
        self.mpsse_gpio_read(Group::C)
    }

    /// Connect TDI to TDO internally
    pub fn mpsse_loopback(&mut self, on: bool) -> Result<()> {
        self.write(&[if on { LOOPBACK_START } else { LOOPBACK_END }])?;
        Ok(())
    }
}
