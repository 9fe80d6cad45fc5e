//! Errors reported by the CLI commands

use ftbridge_ftdi::FtdiError;
use thiserror::Error;

/// Command failures
#[derive(Debug, Error)]
pub enum CommandError {
    /// The device type has no such function
    #[error("{device} has no {what} support")]
    Unsupported { device: String, what: &'static str },

    /// No pin with this name on the device header
    #[error("{device} has no pin {pin}")]
    NoPin { device: String, pin: String },

    /// Bad command argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(#[from] ftbridge_core::Error),

    /// Device or bus operation failed
    #[error(transparent)]
    Device(#[from] FtdiError),
}

/// Result alias for the commands
pub type Result<T> = std::result::Result<T, CommandError>;
