//! Error types for ftbridge-core
//!
//! These are the validation failures a bus engine can detect before it
//! touches any hardware. They are `Copy` so engines can return them from
//! pure helpers without allocation.

use core::fmt;

use crate::Frequency;

/// Core error type - no_std compatible, Copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Bits per word is not a multiple of 8, or is a width the engine lacks
    UnsupportedBitsPerWord(u32),
    /// Write and read buffers of one packet differ in length
    BufferLengthMismatch {
        /// Write buffer length
        write: usize,
        /// Read buffer length
        read: usize,
    },
    /// A buffer exceeds the engine's per-transaction limit
    BufferTooLong {
        /// Requested length
        len: usize,
        /// Maximum accepted length
        max: usize,
    },
    /// Chip select chaining across packets was requested
    KeepCsUnsupported,
    /// Half duplex mode was requested
    HalfDuplexUnsupported,
    /// The mode value carries bits no engine understands
    InvalidMode(u32),
    /// Frequency above any value a caller could plausibly mean
    FrequencyTooHigh(Frequency),
    /// Frequency below the engine floor
    FrequencyTooLow(Frequency),
    /// I2C address that does not fit on the wire
    InvalidAddress(u16),
    /// Pin index outside its group
    InvalidPin(u8),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedBitsPerWord(bits) => {
                write!(f, "bits per word {} is not supported, use 8", bits)
            }
            Self::BufferLengthMismatch { write, read } => write!(
                f,
                "when both write and read buffers are specified, they must have the same size (write {}, read {})",
                write, read
            ),
            Self::BufferTooLong { len, max } => {
                write!(f, "buffer of {} bytes exceeds the {} bytes limit", len, max)
            }
            Self::KeepCsUnsupported => write!(f, "keeping chip select across packets is not supported"),
            Self::HalfDuplexUnsupported => write!(f, "half duplex mode is not supported"),
            Self::InvalidMode(m) => write!(f, "invalid SPI mode 0x{:X}", m),
            Self::FrequencyTooHigh(freq) => {
                write!(f, "frequency {} is too high; did you forget to divide?", freq)
            }
            Self::FrequencyTooLow(freq) => write!(
                f,
                "frequency {} is too low; did you forget to multiply by the unit (e.g. Frequency::from_mhz)?",
                freq
            ),
            Self::InvalidAddress(addr) => write!(f, "invalid I2C address 0x{:X}", addr),
            Self::InvalidPin(n) => write!(f, "invalid pin index {}", n),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;
