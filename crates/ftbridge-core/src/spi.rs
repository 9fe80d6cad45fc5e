//! SPI vocabulary: modes, packets and the port/connection traits
//!
//! A port is claimed with [`SpiPort::connect`], which fixes the clock, the
//! mode and the word width for the lifetime of the returned connection.
//! Transfers happen on the connection, one [`Packet`] at a time or in a
//! batch.

use bitflags::bitflags;

use crate::error::{Error, Result};
use crate::{Duplex, ErrorType, Frequency};

bitflags! {
    /// SPI mode: clock phase and polarity in the low two bits, plus flags
    ///
    /// The numeric layout is the usual one: mode 0 to 3 is `CPOL << 1 | CPHA`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SpiMode: u32 {
        /// Sample on the trailing clock edge (clock phase)
        const CPHA       = 1 << 0;
        /// Clock idles high (clock polarity)
        const CPOL       = 1 << 1;
        /// Half duplex: MOSI and MISO share one wire
        const HALF_DUPLEX = 1 << 2;
        /// Do not drive chip select
        const NO_CS      = 1 << 3;
        /// Shift the least significant bit first
        const LSB_FIRST  = 1 << 4;

        /// CPOL=0, CPHA=0
        const MODE0 = 0;
        /// CPOL=0, CPHA=1
        const MODE1 = Self::CPHA.bits();
        /// CPOL=1, CPHA=0
        const MODE2 = Self::CPOL.bits();
        /// CPOL=1, CPHA=1
        const MODE3 = Self::CPOL.bits() | Self::CPHA.bits();
    }
}

impl Default for SpiMode {
    fn default() -> Self {
        SpiMode::MODE0
    }
}

/// A mode split into independent settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModeConfig {
    /// Shift out on the leading edge and sample on the trailing edge (CPHA)
    pub edge_invert: bool,
    /// Clock idles high (CPOL)
    pub clock_idle_high: bool,
    /// Chip select is left alone
    pub no_cs: bool,
    /// Least significant bit first
    pub lsb_first: bool,
    /// Half duplex requested
    pub half_duplex: bool,
}

impl SpiMode {
    /// Build a mode from a raw value, rejecting unknown bits
    pub fn from_raw(raw: u32) -> Result<Self> {
        SpiMode::from_bits(raw).ok_or(Error::InvalidMode(raw))
    }

    /// Clock mode number, 0 to 3
    pub fn clock_mode(self) -> u8 {
        (self.bits() & 3) as u8
    }

    /// Split into flags and clock settings
    ///
    /// Fails on bits outside the known set. Half duplex is reported, not
    /// rejected; engines decide whether they support it.
    pub fn decompose(self) -> Result<ModeConfig> {
        if self.bits() & !SpiMode::all().bits() != 0 {
            return Err(Error::InvalidMode(self.bits()));
        }
        Ok(ModeConfig {
            edge_invert: self.contains(SpiMode::CPHA),
            clock_idle_high: self.contains(SpiMode::CPOL),
            no_cs: self.contains(SpiMode::NO_CS),
            lsb_first: self.contains(SpiMode::LSB_FIRST),
            half_duplex: self.contains(SpiMode::HALF_DUPLEX),
        })
    }
}

impl ModeConfig {
    /// Reassemble the mode value
    pub fn mode(&self) -> SpiMode {
        let mut m = SpiMode::MODE0;
        m.set(SpiMode::CPHA, self.edge_invert);
        m.set(SpiMode::CPOL, self.clock_idle_high);
        m.set(SpiMode::NO_CS, self.no_cs);
        m.set(SpiMode::LSB_FIRST, self.lsb_first);
        m.set(SpiMode::HALF_DUPLEX, self.half_duplex);
        m
    }
}

/// One unit of a batched transfer
///
/// An empty `w` means "nothing to send", an empty `r` means "discard what
/// comes back". When both are present they must have the same length.
#[derive(Debug)]
pub struct Packet<'a> {
    /// Bytes to shift out
    pub w: &'a [u8],
    /// Buffer for bytes shifted in
    pub r: &'a mut [u8],
    /// Keep chip select asserted into the next packet
    pub keep_cs: bool,
    /// Word width, 0 means the connection's width
    pub bits_per_word: u8,
}

impl<'a> Packet<'a> {
    /// Full duplex packet
    pub fn new(w: &'a [u8], r: &'a mut [u8]) -> Self {
        Packet {
            w,
            r,
            keep_cs: false,
            bits_per_word: 0,
        }
    }

    /// Write-only packet
    pub fn write(w: &'a [u8]) -> Self {
        Packet::new(w, &mut [])
    }

    /// Read-only packet
    pub fn read(r: &'a mut [u8]) -> Self {
        Packet::new(&[], r)
    }

    /// Number of bytes clocked on the wire
    pub fn len(&self) -> usize {
        self.w.len().max(self.r.len())
    }

    /// True when neither buffer holds anything
    pub fn is_empty(&self) -> bool {
        self.w.is_empty() && self.r.is_empty()
    }

    /// Check the packet against an engine limit without touching hardware
    pub fn validate(&self, max_len: usize) -> Result<()> {
        if self.keep_cs {
            return Err(Error::KeepCsUnsupported);
        }
        if self.bits_per_word & 7 != 0 || (self.bits_per_word != 0 && self.bits_per_word != 8) {
            return Err(Error::UnsupportedBitsPerWord(self.bits_per_word as u32));
        }
        if !self.w.is_empty() && !self.r.is_empty() && self.w.len() != self.r.len() {
            return Err(Error::BufferLengthMismatch {
                write: self.w.len(),
                read: self.r.len(),
            });
        }
        if self.len() > max_len {
            return Err(Error::BufferTooLong {
                len: self.len(),
                max: max_len,
            });
        }
        Ok(())
    }
}

/// Validate a word width passed to `connect`
pub fn validate_bits_per_word(bits: u32) -> Result<()> {
    if bits & 7 != 0 || bits != 8 {
        return Err(Error::UnsupportedBitsPerWord(bits));
    }
    Ok(())
}

/// Anything above this is a unit mistake, not a fast bus
pub const FREQUENCY_SANITY_LIMIT: Frequency = Frequency::GHZ;

/// Clamp a requested clock to `max` and reject values below `floor`
pub fn clamp_frequency(f: Frequency, max: Frequency, floor: Frequency) -> Result<Frequency> {
    if f > FREQUENCY_SANITY_LIMIT {
        return Err(Error::FrequencyTooHigh(f));
    }
    let f = f.min(max);
    if f < floor {
        return Err(Error::FrequencyTooLow(f));
    }
    Ok(f)
}

/// An SPI connection obtained from [`SpiPort::connect`]
pub trait SpiConn: ErrorType {
    /// Run a batch of packets
    ///
    /// Every packet is validated before any I/O so an invalid batch leaves
    /// the hardware untouched.
    fn tx_packets(&mut self, packets: &mut [Packet<'_>]) -> core::result::Result<(), Self::Error>;

    /// Single full duplex transfer
    fn tx(&mut self, w: &[u8], r: &mut [u8]) -> core::result::Result<(), Self::Error> {
        let mut p = [Packet::new(w, r)];
        self.tx_packets(&mut p)
    }

    /// Duplex capability of the connection
    fn duplex(&self) -> Duplex;
}

/// A claimable SPI port
pub trait SpiPort: ErrorType {
    /// Connection type, borrowing the port for its lifetime
    type Conn<'a>: SpiConn<Error = Self::Error>
    where
        Self: 'a;

    /// Claim the bus with the given clock, mode and word width
    fn connect(
        &mut self,
        freq: Frequency,
        mode: SpiMode,
        bits_per_word: u32,
    ) -> core::result::Result<Self::Conn<'_>, Self::Error>;

    /// Cap the clock for every later connection
    fn limit_speed(&mut self, freq: Frequency) -> core::result::Result<(), Self::Error>;
}
