//! FTDI MPSSE protocol constants and the command encoder
//!
//! Everything in this module is pure: it builds the byte sequences that the
//! MPSSE command interpreter understands but never performs I/O. See FTDI
//! AN_108 "Command Processor for MPSSE and MCU Host Bus Emulation Modes".

use std::fmt;

use ftbridge_core::{Error as CoreError, Frequency};

// ============================================================================
// USB VID/PID constants
// ============================================================================

/// FTDI vendor ID
pub const FTDI_VID: u16 = 0x0403;

/// FT232R / FT232AM / FT232BM product ID
pub const FTDI_FT232R_PID: u16 = 0x6001;

/// FT2232C / FT2232H product ID (dual channel)
pub const FTDI_FT2232H_PID: u16 = 0x6010;

/// FT4232H product ID (quad channel)
pub const FTDI_FT4232H_PID: u16 = 0x6011;

/// FT232H product ID (single channel)
pub const FTDI_FT232H_PID: u16 = 0x6014;

/// FT-X series product ID
pub const FTDI_FTX_PID: u16 = 0x6015;

// ============================================================================
// MPSSE Commands
// ============================================================================

/// Write bytes (data out)
pub const MPSSE_DO_WRITE: u8 = 0x10;

/// Read bytes (data in)
pub const MPSSE_DO_READ: u8 = 0x20;

/// Write on negative clock edge
pub const MPSSE_WRITE_NEG: u8 = 0x01;

/// Read on negative clock edge
pub const MPSSE_READ_NEG: u8 = 0x04;

/// LSB first
pub const MPSSE_LSB: u8 = 0x08;

/// Bit mode (transfer 1 to 8 bits instead of bytes)
pub const MPSSE_BITMODE: u8 = 0x02;

/// Set data bits low byte (D bus)
pub const SET_BITS_LOW: u8 = 0x80;

/// Get data bits low byte (D bus)
pub const GET_BITS_LOW: u8 = 0x81;

/// Set data bits high byte (C bus)
pub const SET_BITS_HIGH: u8 = 0x82;

/// Get data bits high byte (C bus)
pub const GET_BITS_HIGH: u8 = 0x83;

/// Connect TDI to TDO internally
pub const LOOPBACK_START: u8 = 0x84;

/// Disable loopback mode
pub const LOOPBACK_END: u8 = 0x85;

/// Set clock divisor
pub const TCK_DIVISOR: u8 = 0x86;

/// Send immediate (flush the chip's read buffer to the host)
pub const SEND_IMMEDIATE: u8 = 0x87;

/// Wait on I/O high
pub const WAIT_ON_HIGH: u8 = 0x88;

/// Wait on I/O low
pub const WAIT_ON_LOW: u8 = 0x89;

/// Disable divide-by-5 prescaler (30 MHz maximum clock)
pub const DIS_DIV_5: u8 = 0x8A;

/// Enable divide-by-5 prescaler (6 MHz maximum clock)
pub const EN_DIV_5: u8 = 0x8B;

/// Enable 3-phase clocking (data valid on both edges, for I2C)
pub const EN_3_PHASE: u8 = 0x8C;

/// Disable 3-phase clocking
pub const DIS_3_PHASE: u8 = 0x8D;

/// Clock for n bits without data transfer
pub const CLK_BITS: u8 = 0x8E;

/// Clock for n x 8 bits without data transfer
pub const CLK_BYTES: u8 = 0x8F;

/// CPU mode read, short address
pub const CPU_READ_SHORT: u8 = 0x90;

/// CPU mode read, extended address
pub const CPU_READ_EXT: u8 = 0x91;

/// Enable adaptive clocking
pub const CLK_ADAPTIVE: u8 = 0x96;

/// Disable adaptive clocking
pub const CLK_NO_ADAPTIVE: u8 = 0x97;

/// Drive only zero (open drain) on the selected pins: `0x9E, low, high`
pub const DRIVE_ZERO_ONLY: u8 = 0x9E;

/// First byte the chip returns for an opcode it does not know
pub const BAD_COMMAND: u8 = 0xFA;

/// Maximum bytes in one data shifting command
pub const MAX_TRANSFER: usize = 65536;

// ============================================================================
// Clock
// ============================================================================

/// Fast clock base (divide-by-5 disabled)
pub const CLOCK_HIGH: Frequency = Frequency::from_mhz(30);

/// Slow clock base (divide-by-5 enabled)
pub const CLOCK_LOW: Frequency = Frequency::from_mhz(6);

/// Largest divisor the 16-bit TCK_DIVISOR field expresses
pub const MAX_DIVISOR: u64 = 65536;

/// Which prescaler a clock setting uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockBase {
    /// 30 MHz
    High,
    /// 6 MHz
    Low,
}

impl ClockBase {
    /// Base frequency
    pub fn frequency(self) -> Frequency {
        match self {
            ClockBase::High => CLOCK_HIGH,
            ClockBase::Low => CLOCK_LOW,
        }
    }

    /// Prescaler opcode
    pub fn opcode(self) -> u8 {
        match self {
            ClockBase::High => DIS_DIV_5,
            ClockBase::Low => EN_DIV_5,
        }
    }
}

/// A representable MPSSE clock: base / divisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSetting {
    /// Prescaler
    pub base: ClockBase,
    /// Divisor, 1..=65536
    pub divisor: u32,
}

impl ClockSetting {
    /// Resulting clock
    pub fn actual(&self) -> Frequency {
        Frequency::from_hz(self.base.frequency().hz() / self.divisor as u64)
    }

    /// `[prescaler, TCK_DIVISOR, (divisor-1) lo, (divisor-1) hi]`
    pub fn encode(&self) -> [u8; 4] {
        let d = self.divisor - 1;
        [self.base.opcode(), TCK_DIVISOR, d as u8, (d >> 8) as u8]
    }
}

/// Pick the fastest clock that does not exceed `f`
///
/// Requests above 30 MHz are clamped. The 30 MHz base is preferred whenever
/// its divisor fits: its steps are a superset of the 6 MHz ones.
pub fn clock_select(f: Frequency) -> Result<ClockSetting, CoreError> {
    let f = f.min(CLOCK_HIGH);
    if f.is_zero() {
        return Err(CoreError::FrequencyTooLow(f));
    }
    for base in [ClockBase::High, ClockBase::Low] {
        let divisor = base.frequency().hz().div_ceil(f.hz());
        if divisor <= MAX_DIVISOR {
            return Ok(ClockSetting {
                base,
                divisor: divisor as u32,
            });
        }
    }
    Err(CoreError::FrequencyTooLow(f))
}

// ============================================================================
// Data shifting
// ============================================================================

/// Clock edge on which data is driven or sampled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockEdge {
    /// Low to high
    Rising,
    /// High to low
    Falling,
}

impl ClockEdge {
    /// The other edge
    pub fn opposite(self) -> Self {
        match self {
            ClockEdge::Rising => ClockEdge::Falling,
            ClockEdge::Falling => ClockEdge::Rising,
        }
    }
}

/// Bit order on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BitOrder {
    /// Most significant bit first
    #[default]
    MsbFirst,
    /// Least significant bit first
    LsbFirst,
}

/// Build a data shifting opcode
pub fn transfer_op(write: bool, read: bool, ew: ClockEdge, er: ClockEdge, order: BitOrder) -> u8 {
    let mut op = 0;
    if order == BitOrder::LsbFirst {
        op |= MPSSE_LSB;
    }
    if write {
        op |= MPSSE_DO_WRITE;
        if ew == ClockEdge::Falling {
            op |= MPSSE_WRITE_NEG;
        }
    }
    if read {
        op |= MPSSE_DO_READ;
        if er == ClockEdge::Falling {
            op |= MPSSE_READ_NEG;
        }
    }
    op
}

/// Byte-mode command header: `[op, (len-1) lo, (len-1) hi]`
pub fn data_cmd(op: u8, len: usize) -> Result<[u8; 3], CoreError> {
    if len == 0 || len > MAX_TRANSFER {
        return Err(CoreError::BufferTooLong {
            len,
            max: MAX_TRANSFER,
        });
    }
    let l = len - 1;
    Ok([op, l as u8, (l >> 8) as u8])
}

/// Bit-mode command header: `[op | MPSSE_BITMODE, bits-1]`
pub fn bits_cmd(op: u8, bits: u8) -> Result<[u8; 2], CoreError> {
    if bits == 0 || bits > 8 {
        return Err(CoreError::UnsupportedBitsPerWord(bits as u32));
    }
    Ok([op | MPSSE_BITMODE, bits - 1])
}

// ============================================================================
// GPIO groups
// ============================================================================

/// One of the two 8-pin groups of an MPSSE channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Group {
    /// ADBUS, D0..D7 (low byte)
    D,
    /// ACBUS, C0..C7 (high byte)
    C,
}

impl Group {
    /// Letter used in pin names
    pub fn letter(self) -> char {
        match self {
            Group::D => 'D',
            Group::C => 'C',
        }
    }

    /// `[set opcode, value, direction]`
    pub fn set_cmd(self, value: u8, direction: u8) -> [u8; 3] {
        let op = match self {
            Group::D => SET_BITS_LOW,
            Group::C => SET_BITS_HIGH,
        };
        [op, value, direction]
    }

    /// `[get opcode, SEND_IMMEDIATE]`; the chip answers with one byte
    pub fn read_cmd(self) -> [u8; 2] {
        let op = match self {
            Group::D => GET_BITS_LOW,
            Group::C => GET_BITS_HIGH,
        };
        [op, SEND_IMMEDIATE]
    }
}

// ============================================================================
// Bit modes and device types
// ============================================================================

/// Operating mode selected with SetBitMode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BitMode {
    /// UART / FIFO mode
    Reset = 0x00,
    /// Asynchronous bit-bang
    AsyncBitbang = 0x01,
    /// Multi-protocol synchronous serial engine
    Mpsse = 0x02,
    /// Synchronous bit-bang
    SyncBitbang = 0x04,
    /// MCU host bus emulation
    McuHost = 0x08,
    /// Fast opto-isolated serial
    FastSerial = 0x10,
    /// CBUS bit-bang (FT232R)
    CbusBitbang = 0x20,
    /// Single channel synchronous 245 FIFO
    SyncFifo = 0x40,
}

/// FTDI device type, numbered as the vendor driver reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DevType {
    /// FT232BM
    Ft232Bm,
    /// FT232AM
    Ft232Am,
    /// FT100AX
    Ft100Ax,
    /// FT2232C
    Ft2232C,
    /// FT232R
    Ft232R,
    /// FT2232H
    Ft2232H,
    /// FT4232H
    Ft4232H,
    /// FT232H
    Ft232H,
    /// FT-X series
    FtX,
    /// Anything else
    Unknown,
}

impl DevType {
    /// Map the vendor driver's numeric type
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => DevType::Ft232Bm,
            1 => DevType::Ft232Am,
            2 => DevType::Ft100Ax,
            4 => DevType::Ft2232C,
            5 => DevType::Ft232R,
            6 => DevType::Ft2232H,
            7 => DevType::Ft4232H,
            8 => DevType::Ft232H,
            9 => DevType::FtX,
            _ => DevType::Unknown,
        }
    }

    /// Device name
    pub fn name(self) -> &'static str {
        match self {
            DevType::Ft232Bm => "FT232BM",
            DevType::Ft232Am => "FT232AM",
            DevType::Ft100Ax => "FT100AX",
            DevType::Ft2232C => "FT2232C",
            DevType::Ft232R => "FT232R",
            DevType::Ft2232H => "FT2232H",
            DevType::Ft4232H => "FT4232H",
            DevType::Ft232H => "FT232H",
            DevType::FtX => "FT-X",
            DevType::Unknown => "FTDI",
        }
    }

    /// Whether the MPSSE facade drives this device
    pub fn has_mpsse_facade(self) -> bool {
        matches!(self, DevType::Ft232H | DevType::Ft2232H)
    }
}

impl fmt::Display for DevType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
