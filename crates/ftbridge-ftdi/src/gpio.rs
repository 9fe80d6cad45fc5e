//! GPIO pin groups and pin handles
//!
//! A [`GpioGroup`] caches the value and direction registers of one 8-pin
//! group so a single pin can change without reading the others back. Bus
//! engines claim the pins they drive; GPIO access to a claimed pin fails.
//!
//! [`Pin`] is a cheap handle onto a device facade. All state lives behind
//! the facade's mutex.

use std::fmt;
use std::sync::Arc;

use ftbridge_core::gpio::{Edge, Level, PinIn, PinOut, Pull};
use ftbridge_core::ErrorType;

use crate::error::{FtdiError, Result};
use crate::protocol::Group;

/// Cached registers of one pin group
#[derive(Debug, Clone)]
pub struct GpioGroup {
    device: String,
    group: Group,
    direction: u8,
    value: u8,
    sampled: u8,
    functions: [Option<&'static str>; 8],
}

impl GpioGroup {
    /// All pins inputs, driven low when switched to output
    pub fn new(device: &str, group: Group) -> Self {
        GpioGroup {
            device: device.to_string(),
            group,
            direction: 0,
            value: 0,
            sampled: 0,
            functions: [None; 8],
        }
    }

    /// Which group this is
    pub fn group(&self) -> Group {
        self.group
    }

    /// Direction register, 1 = output
    pub fn direction(&self) -> u8 {
        self.direction
    }

    /// Value register
    pub fn value(&self) -> u8 {
        self.value
    }

    /// Overwrite both cached registers
    pub fn set(&mut self, value: u8, direction: u8) {
        self.value = value;
        self.direction = direction;
    }

    /// Name of pin `n`, e.g. `FT232H.D3`
    pub fn pin_name(&self, n: u8) -> String {
        format!("{}.{}{}", self.device, self.group.letter(), n)
    }

    /// Mark pins as owned by a bus function
    ///
    /// Fails without changing anything if one of them is already claimed.
    pub fn claim(&mut self, pins: &[(u8, &'static str)]) -> Result<()> {
        for &(n, _) in pins {
            self.check_free(n)?;
        }
        for &(n, function) in pins {
            self.functions[n as usize & 7] = Some(function);
        }
        Ok(())
    }

    /// Release every claimed pin
    pub fn release(&mut self) {
        self.functions = [None; 8];
    }

    /// Mask of claimed pins
    pub fn claimed(&self) -> u8 {
        self.functions
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_some())
            .fold(0, |m, (i, _)| m | 1 << i)
    }

    /// Fail if pin `n` is owned by a bus
    pub fn check_free(&self, n: u8) -> Result<()> {
        if n > 7 {
            return Err(ftbridge_core::Error::InvalidPin(n).into());
        }
        match self.functions[n as usize] {
            Some(owner) => Err(FtdiError::PinInUse {
                pin: self.pin_name(n),
                owner,
            }),
            None => Ok(()),
        }
    }

    /// Registers with pin `n` switched to input, as `(value, direction)`
    ///
    /// The cache is not touched; commit with [`set`](Self::set) once the
    /// hardware write went through.
    pub fn in_(&self, n: u8) -> Result<(u8, u8)> {
        self.check_free(n)?;
        Ok((self.value, self.direction & !(1 << n)))
    }

    /// Registers with pin `n` driving `level`, as `(value, direction)`
    pub fn out(&self, n: u8, level: Level) -> Result<(u8, u8)> {
        self.check_free(n)?;
        let value = if level.is_high() {
            self.value | 1 << n
        } else {
            self.value & !(1 << n)
        };
        Ok((value, self.direction | 1 << n))
    }

    /// Record a sample of the whole group
    pub fn read(&mut self, sampled: u8) {
        self.sampled = sampled;
    }

    /// Level of pin `n` in the last sample
    pub fn level(&self, n: u8) -> Level {
        Level::from(self.sampled & (1 << (n & 7)) != 0)
    }

    /// Current function of pin `n`: the bus function, or `In/High`, `Out/Low`
    pub fn function(&self, n: u8) -> String {
        let n = n & 7;
        if let Some(f) = self.functions[n as usize] {
            return f.to_string();
        }
        let bit = 1 << n;
        if self.direction & bit != 0 {
            format!("Out/{}", Level::from(self.value & bit != 0))
        } else {
            format!("In/{}", self.level(n))
        }
    }
}

/// Reject input configurations the hardware cannot do
pub fn validate_input(pull: Pull, default_pull: Pull, edge: Edge) -> Result<()> {
    if edge != Edge::None {
        return Err(FtdiError::Unsupported("edge detection"));
    }
    if pull != Pull::PullNoChange && pull != default_pull {
        return Err(FtdiError::Unsupported("changing the pull resistor"));
    }
    Ok(())
}

/// Pin access implemented by a device facade
pub(crate) trait PinBank: Send + Sync {
    fn pin_in(&self, group: Group, n: u8) -> Result<()>;
    fn pin_read(&self, group: Group, n: u8) -> Result<Level>;
    fn pin_out(&self, group: Group, n: u8, level: Level) -> Result<()>;
    fn pin_function(&self, group: Group, n: u8) -> String;
    fn pin_default_pull(&self, group: Group, n: u8) -> Pull;
}

/// One GPIO pin of a device
#[derive(Clone)]
pub struct Pin {
    bank: Arc<dyn PinBank>,
    group: Group,
    n: u8,
    name: String,
}

impl Pin {
    pub(crate) fn new(bank: Arc<dyn PinBank>, name: String, group: Group, n: u8) -> Self {
        Pin {
            bank,
            group,
            n,
            name,
        }
    }

    /// Name, e.g. `FT232H.C7`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pin group
    pub fn group(&self) -> Group {
        self.group
    }

    /// Bit within the group
    pub fn number(&self) -> u8 {
        self.n
    }

    /// Current function: the bus function name, or `In/High`, `Out/Low`
    pub fn function(&self) -> String {
        self.bank.pin_function(self.group, self.n)
    }
}

impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pin").field("name", &self.name).finish()
    }
}

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl ErrorType for Pin {
    type Error = FtdiError;
}

impl PinIn for Pin {
    fn set_input(&self, pull: Pull, edge: Edge) -> Result<()> {
        validate_input(pull, self.default_pull(), edge)?;
        self.bank.pin_in(self.group, self.n)
    }

    fn read(&self) -> Result<Level> {
        self.bank.pin_read(self.group, self.n)
    }

    fn default_pull(&self) -> Pull {
        self.bank.pin_default_pull(self.group, self.n)
    }
}

impl PinOut for Pin {
    fn out(&self, level: Level) -> Result<()> {
        self.bank.pin_out(self.group, self.n, level)
    }
}
