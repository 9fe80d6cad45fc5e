//! Frequency type
//!
//! Frequencies are integral hertz. All clock arithmetic in the engines is
//! integer division, so a float representation would only add rounding
//! questions.

use core::fmt;
use core::str::FromStr;
use core::time::Duration;

/// A frequency in hertz
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Frequency(u64);

impl Frequency {
    /// One hertz
    pub const HZ: Frequency = Frequency(1);
    /// One kilohertz
    pub const KHZ: Frequency = Frequency(1_000);
    /// One megahertz
    pub const MHZ: Frequency = Frequency(1_000_000);
    /// One gigahertz
    pub const GHZ: Frequency = Frequency(1_000_000_000);

    /// Create a frequency from hertz
    pub const fn from_hz(hz: u64) -> Self {
        Frequency(hz)
    }

    /// Create a frequency from kilohertz
    pub const fn from_khz(khz: u64) -> Self {
        Frequency(khz * 1_000)
    }

    /// Create a frequency from megahertz
    pub const fn from_mhz(mhz: u64) -> Self {
        Frequency(mhz * 1_000_000)
    }

    /// Value in hertz
    pub const fn hz(self) -> u64 {
        self.0
    }

    /// True for 0 Hz
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Scale by `num / den`, truncating
    pub const fn scale(self, num: u64, den: u64) -> Self {
        Frequency(self.0 * num / den)
    }

    /// Duration of `cycles` periods at this frequency, rounded up
    ///
    /// Returns `Duration::MAX` for 0 Hz.
    pub fn cycles(self, cycles: u64) -> Duration {
        if self.0 == 0 {
            return Duration::MAX;
        }
        let nanos = (cycles as u128 * 1_000_000_000).div_ceil(self.0 as u128);
        Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (unit, scale) = match self.0 {
            hz if hz >= 1_000_000_000 => ("GHz", 1_000_000_000),
            hz if hz >= 1_000_000 => ("MHz", 1_000_000),
            hz if hz >= 1_000 => ("kHz", 1_000),
            _ => return write!(f, "{}Hz", self.0),
        };
        let whole = self.0 / scale;
        let mut frac = self.0 % scale;
        if frac == 0 {
            return write!(f, "{}{}", whole, unit);
        }
        // Up to three decimals, trailing zeros trimmed.
        let mut digits = 3;
        frac = frac * 1000 / scale;
        while digits > 1 && frac % 10 == 0 {
            frac /= 10;
            digits -= 1;
        }
        write!(f, "{}.{:0width$}{}", whole, frac, unit, width = digits)
    }
}

/// Error parsing a frequency string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseFrequencyError;

impl fmt::Display for ParseFrequencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid frequency, expected e.g. 400kHz, 10MHz or 1000")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ParseFrequencyError {}

impl FromStr for Frequency {
    type Err = ParseFrequencyError;

    /// Parse `1000`, `1000Hz`, `400k`, `400kHz`, `10M`, `1.5MHz`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let lower = s.trim_end_matches(['z', 'Z']).trim_end_matches(['h', 'H']);
        let (num, mult) = match lower.char_indices().last() {
            Some((i, 'k')) | Some((i, 'K')) => (&lower[..i], 1_000u64),
            Some((i, 'M')) | Some((i, 'm')) => (&lower[..i], 1_000_000),
            Some((i, 'G')) | Some((i, 'g')) => (&lower[..i], 1_000_000_000),
            _ => (lower, 1),
        };
        let (int_part, frac_part) = match num.split_once('.') {
            Some((i, f)) => (i, f),
            None => (num, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(ParseFrequencyError);
        }
        let whole: u64 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| ParseFrequencyError)?
        };
        let mut hz = whole.checked_mul(mult).ok_or(ParseFrequencyError)?;
        let mut scale = mult;
        for c in frac_part.chars() {
            let d = c.to_digit(10).ok_or(ParseFrequencyError)? as u64;
            scale /= 10;
            if scale == 0 {
                return Err(ParseFrequencyError);
            }
            hz += d * scale;
        }
        Ok(Frequency(hz))
    }
}
