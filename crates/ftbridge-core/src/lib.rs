//! ftbridge-core - Bus vocabulary shared by the ftbridge engines
//!
//! This crate defines the types and traits that every bus engine speaks:
//! frequencies, pin levels and pulls, SPI modes and packets, and the
//! `SpiPort` / `SpiConn` / `I2cBus` / `PinIn` / `PinOut` contracts. It
//! performs no I/O and is `no_std` compatible.
//!
//! # Features
//!
//! - `std` - Implement `std::error::Error` for [`Error`]
//!
//! # Example
//!
//! ```ignore
//! use ftbridge_core::spi::{SpiConn, SpiMode, SpiPort};
//! use ftbridge_core::Frequency;
//!
//! fn read_id<P: SpiPort>(port: &mut P) -> Result<[u8; 4], P::Error> {
//!     let mut conn = port.connect(Frequency::from_mhz(10), SpiMode::MODE0, 8)?;
//!     let mut r = [0u8; 4];
//!     conn.tx(&[0x9F, 0, 0, 0], &mut r)?;
//!     Ok(r)
//! }
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

#[cfg(any(feature = "std", test))]
extern crate std;

pub mod error;
pub mod freq;
pub mod gpio;
pub mod i2c;
pub mod spi;

pub use error::{Error, Result};
pub use freq::Frequency;

/// Shared error type declaration for every bus trait
///
/// Implementors of several bus traits declare their error type once.
pub trait ErrorType {
    /// Error returned by the bus operations
    type Error: core::fmt::Debug;
}

/// Whether a connection can read and write at the same time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Duplex {
    /// Not known
    #[default]
    Unknown,
    /// One direction at a time
    Half,
    /// Simultaneous read and write
    Full,
}
