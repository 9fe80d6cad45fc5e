//! Error types for the FTDI engines

use thiserror::Error;

/// Result type for FTDI operations
pub type Result<T> = std::result::Result<T, FtdiError>;

/// Errors that can occur during FTDI operations
#[derive(Debug, Error)]
pub enum FtdiError {
    /// A backend call failed; `op` names the call
    #[error("ftdi: {op}: {message}")]
    Usb {
        /// Operation name, e.g. "Write" or "SetBitMode"
        op: &'static str,
        /// Backend error text
        message: String,
    },

    /// `read_all` was cancelled before the buffer filled
    #[error("ftdi: read truncated: got {read} of {wanted} bytes")]
    Truncated {
        /// Bytes received
        read: usize,
        /// Bytes requested
        wanted: usize,
    },

    /// Caller parameters rejected before any I/O
    #[error("ftdi: {0}")]
    Protocol(#[from] ftbridge_core::Error),

    /// I2C acknowledge bit not asserted
    #[error("got NAK")]
    Nack,

    /// The chip did not enter command-stream mode
    #[error("ftdi: MPSSE mode verification failed: {0}")]
    ModeVerification(String),

    /// The shared pins are claimed by another bus
    #[error("ftdi: already using {0}")]
    Busy(&'static str),

    /// GPIO access to a pin owned by a bus engine
    #[error("ftdi: pin {pin} is in use by {owner}")]
    PinInUse {
        /// Pin name
        pin: String,
        /// Owning function, e.g. "SPI"
        owner: &'static str,
    },

    /// Modeled but not implemented
    #[error("ftdi: {0} is not supported")]
    Unsupported(&'static str),

    /// Invalid configuration value
    #[error("ftdi: invalid parameter: {0}")]
    InvalidParameter(String),

    /// No device at the requested index or name
    #[error("ftdi: device not found")]
    DeviceNotFound,

    /// The bus or port was already released
    #[error("ftdi: bus is closed")]
    Closed,

    /// A thread panicked while holding the device lock
    #[error("ftdi: device lock poisoned")]
    LockPoisoned,
}

impl FtdiError {
    /// Wrap a backend error with the name of the failing operation
    pub fn usb(op: &'static str, err: impl std::fmt::Display) -> Self {
        FtdiError::Usb {
            op,
            message: err.to_string(),
        }
    }

    /// True for errors raised by local validation
    pub fn is_protocol(&self) -> bool {
        matches!(self, FtdiError::Protocol(_))
    }
}

impl<T> From<std::sync::PoisonError<T>> for FtdiError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        FtdiError::LockPoisoned
    }
}
