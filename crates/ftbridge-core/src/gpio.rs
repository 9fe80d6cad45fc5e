//! GPIO pin vocabulary and traits

use core::fmt;
use core::ops::Not;

use crate::ErrorType;

/// Logic level of a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Level {
    /// Logic low
    #[default]
    Low,
    /// Logic high
    High,
}

impl Level {
    /// True for `High`
    pub fn is_high(self) -> bool {
        self == Level::High
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

impl Not for Level {
    type Output = Level;

    fn not(self) -> Level {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Low => write!(f, "Low"),
            Level::High => write!(f, "High"),
        }
    }
}

/// Pull resistor configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Pull {
    /// No pull, the line floats (open drain when driving)
    Float,
    /// Pull-down resistor
    PullDown,
    /// Pull-up resistor
    PullUp,
    /// Keep whatever is configured
    #[default]
    PullNoChange,
}

impl fmt::Display for Pull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Pull::Float => "Float",
            Pull::PullDown => "PullDown",
            Pull::PullUp => "PullUp",
            Pull::PullNoChange => "PullNoChange",
        };
        f.write_str(s)
    }
}

/// Edge detection request for an input pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Edge {
    /// No edge detection
    #[default]
    None,
    /// Rising edges
    Rising,
    /// Falling edges
    Falling,
    /// Both edges
    Both,
}

/// A pin that can be configured as an input and sampled
///
/// Methods take `&self`: pins are handles onto state owned elsewhere.
pub trait PinIn: ErrorType {
    /// Configure the pin as an input
    fn set_input(&self, pull: Pull, edge: Edge) -> Result<(), Self::Error>;

    /// Sample the pin
    fn read(&self) -> Result<Level, Self::Error>;

    /// Pull configured at power-up
    fn default_pull(&self) -> Pull;
}

/// A pin that can drive a level
pub trait PinOut: ErrorType {
    /// Configure the pin as an output driving `level`
    fn out(&self, level: Level) -> Result<(), Self::Error>;
}
