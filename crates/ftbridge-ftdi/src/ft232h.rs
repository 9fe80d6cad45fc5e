//! FT232H / FT2232H facade
//!
//! All access to the chip goes through one mutex: the transport, both pin
//! group caches and the bus exclusivity flags live in [`State`]. SPI and I2C
//! share D0..D2, so at most one of them can be claimed at a time.

use std::sync::{Arc, Mutex, MutexGuard};

use ftbridge_core::gpio::{Level, Pull};
use ftbridge_core::spi::clamp_frequency;
use ftbridge_core::Frequency;

use crate::device::Info;
use crate::error::{FtdiError, Result};
use crate::gpio::{GpioGroup, Pin, PinBank};
use crate::handle::Transport;
use crate::i2c::MpsseI2c;
use crate::protocol::Group;
use crate::spi::{self, MpsseSpiPort};

pub(crate) struct State {
    pub(crate) transport: Transport,
    pub(crate) dbus: GpioGroup,
    pub(crate) cbus: GpioGroup,
    pub(crate) using_spi: bool,
    pub(crate) using_i2c: bool,
    /// Bumped by `halt`; bus handles from an older epoch are closed
    pub(crate) epoch: u64,
}

impl State {
    pub(crate) fn group(&self, group: Group) -> &GpioGroup {
        match group {
            Group::D => &self.dbus,
            Group::C => &self.cbus,
        }
    }

    pub(crate) fn group_mut(&mut self, group: Group) -> &mut GpioGroup {
        match group {
            Group::D => &mut self.dbus,
            Group::C => &mut self.cbus,
        }
    }

    fn check_idle(&self) -> Result<()> {
        if self.using_spi {
            return Err(FtdiError::Busy("SPI"));
        }
        if self.using_i2c {
            return Err(FtdiError::Busy("I²C"));
        }
        Ok(())
    }
}

pub(crate) struct Shared {
    name: String,
    info: Info,
    state: Mutex<State>,
}

impl Shared {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, State>> {
        Ok(self.state.lock()?)
    }
}

impl PinBank for Shared {
    fn pin_in(&self, group: Group, n: u8) -> Result<()> {
        let mut guard = self.lock()?;
        let st = &mut *guard;
        let (value, direction) = st.group(group).in_(n)?;
        st.transport.mpsse_gpio(group, value, direction)?;
        st.group_mut(group).set(value, direction);
        Ok(())
    }

    fn pin_read(&self, group: Group, n: u8) -> Result<Level> {
        let mut guard = self.lock()?;
        let st = &mut *guard;
        st.group(group).check_free(n)?;
        let sampled = st.transport.mpsse_gpio_read(group)?;
        let g = st.group_mut(group);
        g.read(sampled);
        Ok(g.level(n))
    }

    fn pin_out(&self, group: Group, n: u8, level: Level) -> Result<()> {
        let mut guard = self.lock()?;
        let st = &mut *guard;
        let (value, direction) = st.group(group).out(n, level)?;
        st.transport.mpsse_gpio(group, value, direction)?;
        st.group_mut(group).set(value, direction);
        Ok(())
    }

    fn pin_function(&self, group: Group, n: u8) -> String {
        match self.state.lock() {
            Ok(st) => st.group(group).function(n),
            Err(_) => "Unknown".to_string(),
        }
    }

    fn pin_default_pull(&self, group: Group, n: u8) -> Pull {
        // 75k pull-ups everywhere; C7 has a pull-down.
        if group == Group::C && n == 7 {
            Pull::PullDown
        } else {
            Pull::PullUp
        }
    }
}

/// An FT232H (or one MPSSE channel of an FT2232H)
///
/// Cloning is cheap; clones share the device.
#[derive(Clone)]
pub struct Ft232h {
    shared: Arc<Shared>,
    header: Vec<Pin>,
}

impl Ft232h {
    /// Put the chip in MPSSE mode and build the facade
    pub fn open(mut transport: Transport, name: &str) -> Result<Self> {
        transport.init_mpsse()?;
        let info = Info::from(transport.info());
        let shared = Arc::new(Shared {
            name: name.to_string(),
            info,
            state: Mutex::new(State {
                transport,
                dbus: GpioGroup::new(name, Group::D),
                cbus: GpioGroup::new(name, Group::C),
                using_spi: false,
                using_i2c: false,
                epoch: 0,
            }),
        });
        let bank: Arc<dyn PinBank> = shared.clone();
        let header = [Group::D, Group::C]
            .into_iter()
            .flat_map(|g| (0..8).map(move |n| (g, n)))
            .map(|(g, n)| Pin::new(Arc::clone(&bank), format!("{}.{}{}", name, g.letter(), n), g, n))
            .collect();
        log::info!("{}: opened in MPSSE mode", name);
        Ok(Ft232h { shared, header })
    }

    /// Device name, e.g. `FT232H` or `FT232H(1)`
    pub fn name(&self) -> &str {
        self.shared.name()
    }

    /// Identification read at open
    pub fn info(&self) -> Info {
        self.shared.info.clone()
    }

    /// D0..D7 then C0..C7
    pub fn header(&self) -> &[Pin] {
        &self.header
    }

    /// Find a pin by its short name, e.g. `D3` or `C7`
    pub fn pin(&self, short: &str) -> Option<&Pin> {
        self.header
            .iter()
            .find(|p| p.name().rsplit('.').next() == Some(short))
    }

    /// Set value and direction of D0..D7 at once
    ///
    /// Fails while SPI or I2C own the low pins.
    pub fn dbus(&self, value: u8, direction: u8) -> Result<()> {
        let mut guard = self.shared.lock()?;
        let st = &mut *guard;
        st.check_idle()?;
        st.transport.mpsse_dbus(value, direction)?;
        st.dbus.set(value, direction);
        Ok(())
    }

    /// Set value and direction of C0..C7 at once
    pub fn cbus(&self, value: u8, direction: u8) -> Result<()> {
        let mut guard = self.shared.lock()?;
        let st = &mut *guard;
        if st.cbus.claimed() != 0 {
            return Err(FtdiError::Busy("C bus"));
        }
        st.transport.mpsse_cbus(value, direction)?;
        st.cbus.set(value, direction);
        Ok(())
    }

    /// Sample D0..D7
    pub fn dbus_read(&self) -> Result<u8> {
        let mut st = self.shared.lock()?;
        let v = st.transport.mpsse_dbus_read()?;
        st.dbus.read(v);
        Ok(v)
    }

    /// Sample C0..C7
    pub fn cbus_read(&self) -> Result<u8> {
        let mut st = self.shared.lock()?;
        let v = st.transport.mpsse_cbus_read()?;
        st.cbus.read(v);
        Ok(v)
    }

    /// Program the MPSSE clock directly; returns the applied rate
    ///
    /// Fails while SPI or I2C own the clock.
    pub fn set_speed(&self, f: Frequency) -> Result<Frequency> {
        let f = clamp_frequency(f, spi::MAX_SPEED, spi::MIN_SPEED)?;
        let mut st = self.shared.lock()?;
        st.check_idle()?;
        st.transport.mpsse_clock(f)
    }

    /// An SPI port on D0..D3
    ///
    /// The bus is claimed by [`connect`](ftbridge_core::spi::SpiPort::connect).
    pub fn spi(&self) -> Result<MpsseSpiPort> {
        self.shared.lock()?.check_idle()?;
        Ok(MpsseSpiPort::new(Arc::clone(&self.shared)))
    }

    /// Claim D0..D2 as an I2C bus at 400 kHz
    ///
    /// Only `Float` (open drain with external pull-ups) is implemented.
    pub fn i2c(&self, pull: Pull) -> Result<MpsseI2c> {
        let mut guard = self.shared.lock()?;
        let st = &mut *guard;
        st.check_idle()?;
        match pull {
            Pull::Float => {}
            Pull::PullUp => return Err(FtdiError::Unsupported("I²C with internal pull-ups")),
            other => {
                return Err(FtdiError::InvalidParameter(format!(
                    "I²C pull must be PullUp or Float, got {}",
                    other
                )))
            }
        }
        MpsseI2c::setup(Arc::clone(&self.shared), st)
    }

    /// Drop the bus claims and reset the chip
    ///
    /// Every pin goes back to input. Open SPI connections and I2C buses
    /// fail with `Closed` afterwards; the pins stay usable.
    pub fn halt(&self) -> Result<()> {
        let mut guard = self.shared.lock()?;
        let st = &mut *guard;
        st.using_spi = false;
        st.using_i2c = false;
        st.epoch += 1;
        st.dbus.release();
        st.cbus.release();
        st.dbus.set(0, 0);
        st.cbus.set(0, 0);
        log::debug!("{}: halting", self.shared.name);
        st.transport.restart_mpsse()
    }
}

impl std::fmt::Debug for Ft232h {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ft232h")
            .field("name", &self.shared.name)
            .field("info", &self.shared.info)
            .finish()
    }
}

impl std::fmt::Display for Ft232h {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.shared.name)
    }
}

#[cfg(test)]
mod tests {
    use ftbridge_core::gpio::{Edge, PinIn, PinOut};
    use ftbridge_core::spi::{SpiMode, SpiPort};

    use super::*;
    use crate::config::DeviceConfig;
    use crate::protocol::DevType;
    use crate::testing::FakeHandle;

    fn open() -> (FakeHandle, Ft232h) {
        let fake = FakeHandle::new(DevType::Ft232H);
        fake.already_in_mpsse();
        let t = Transport::new(Box::new(fake.clone()), DeviceConfig::default()).unwrap();
        let dev = Ft232h::open(t, "FT232H").unwrap();
        fake.clear_log();
        (fake, dev)
    }

    #[test]
    fn test_header() {
        let (_fake, dev) = open();
        let names: Vec<_> = dev.header().iter().map(|p| p.name().to_string()).collect();
        assert_eq!(names.len(), 16);
        assert_eq!(names[0], "FT232H.D0");
        assert_eq!(names[15], "FT232H.C7");
        assert_eq!(dev.pin("C7").unwrap().default_pull(), Pull::PullDown);
        assert_eq!(dev.pin("D4").unwrap().default_pull(), Pull::PullUp);
        assert!(dev.pin("C8").is_none());
        assert_eq!(dev.info().dev_type, DevType::Ft232H);
        assert!(dev.info().opened);
    }

    #[test]
    fn test_pin_gpio() {
        let (fake, dev) = open();
        let c7 = dev.pin("C7").unwrap();
        c7.out(Level::High).unwrap();
        assert_eq!(fake.group(Group::C), (0x80, 0x80));
        assert_eq!(c7.function(), "Out/High");

        fake.set_inputs(Group::D, 0x10);
        let d4 = dev.pin("D4").unwrap();
        d4.set_input(Pull::PullNoChange, Edge::None).unwrap();
        assert_eq!(d4.read().unwrap(), Level::High);
        assert_eq!(d4.function(), "In/High");
        assert!(d4.set_input(Pull::PullDown, Edge::None).is_err());
        assert!(d4.set_input(Pull::PullUp, Edge::Both).is_err());
    }

    #[test]
    fn test_group_write() {
        let (fake, dev) = open();
        dev.cbus(0x0F, 0xFF).unwrap();
        assert_eq!(fake.group(Group::C), (0x0F, 0xFF));
        assert_eq!(dev.cbus_read().unwrap(), 0x0F);
        dev.dbus(0xF0, 0xF0).unwrap();
        fake.set_inputs(Group::D, 0x05);
        assert_eq!(dev.dbus_read().unwrap(), 0xF5);
        assert_eq!(dev.pin("D0").unwrap().function(), "In/High");
    }

    #[test]
    fn test_spi_i2c_exclusive() {
        let (_fake, dev) = open();
        let mut port = dev.spi().unwrap();
        port.connect(Frequency::from_mhz(1), SpiMode::MODE0, 8).unwrap();
        assert!(matches!(dev.i2c(Pull::Float), Err(FtdiError::Busy("SPI"))));
        assert!(matches!(dev.spi(), Err(FtdiError::Busy("SPI"))));
        assert!(matches!(dev.dbus(0, 0), Err(FtdiError::Busy("SPI"))));
        port.close().unwrap();

        let bus = dev.i2c(Pull::Float).unwrap();
        assert!(matches!(dev.spi(), Err(FtdiError::Busy("I²C"))));
        assert!(matches!(dev.i2c(Pull::Float), Err(FtdiError::Busy("I²C"))));
        bus.close().unwrap();

        assert!(dev.spi().is_ok());
    }

    #[test]
    fn test_second_port_cannot_connect() {
        let (_fake, dev) = open();
        let mut a = dev.spi().unwrap();
        let mut b = dev.spi().unwrap();
        a.connect(Frequency::from_mhz(1), SpiMode::MODE0, 8).unwrap();
        assert!(matches!(
            b.connect(Frequency::from_mhz(1), SpiMode::MODE0, 8),
            Err(FtdiError::Busy("SPI"))
        ));
        drop(a);
        assert!(b.connect(Frequency::from_mhz(1), SpiMode::MODE0, 8).is_ok());
    }

    #[test]
    fn test_i2c_pull() {
        let (fake, dev) = open();
        assert!(matches!(
            dev.i2c(Pull::PullUp),
            Err(FtdiError::Unsupported(_))
        ));
        assert!(matches!(
            dev.i2c(Pull::PullDown),
            Err(FtdiError::InvalidParameter(_))
        ));
        assert!(fake.raw_written().is_empty());
    }

    #[test]
    fn test_set_speed() {
        let (fake, dev) = open();
        assert_eq!(
            dev.set_speed(Frequency::from_mhz(100)).unwrap(),
            Frequency::from_mhz(30)
        );
        assert_eq!(fake.raw_written(), vec![0x8A, 0x86, 0x00, 0x00]);
        assert!(dev.set_speed(Frequency::from_hz(10)).is_err());
    }

    #[test]
    fn test_failed_pin_write_keeps_cache() {
        let (fake, dev) = open();
        let d5 = dev.pin("D5").unwrap();
        fake.fail_next("Write");
        assert!(d5.out(Level::High).is_err());
        assert_eq!(d5.function(), "In/Low");

        d5.out(Level::High).unwrap();
        fake.fail_next("Write");
        assert!(d5.set_input(Pull::PullNoChange, Edge::None).is_err());
        assert_eq!(d5.function(), "Out/High");
        // Neighbours are written from the committed registers.
        dev.pin("D6").unwrap().out(Level::Low).unwrap();
        assert_eq!(fake.group(Group::D), (0x20, 0x60));
    }

    #[test]
    fn test_set_speed_busy() {
        let (fake, dev) = open();
        let mut port = dev.spi().unwrap();
        port.connect(Frequency::from_mhz(1), SpiMode::MODE0, 8).unwrap();
        fake.clear_log();
        assert!(matches!(
            dev.set_speed(Frequency::from_mhz(10)),
            Err(FtdiError::Busy("SPI"))
        ));
        port.close().unwrap();

        let bus = dev.i2c(Pull::Float).unwrap();
        assert!(matches!(
            dev.set_speed(Frequency::from_mhz(10)),
            Err(FtdiError::Busy("I²C"))
        ));
        bus.close().unwrap();
        assert!(!fake.commands().contains(&vec![0x86, 0x02, 0x00]));
        assert!(dev.set_speed(Frequency::from_mhz(10)).is_ok());
    }

    #[test]
    fn test_halt() {
        let (fake, dev) = open();
        let mut port = dev.spi().unwrap();
        port.connect(Frequency::from_mhz(1), SpiMode::MODE0, 8).unwrap();
        dev.pin("C7").unwrap().out(Level::High).unwrap();
        let resets = fake.resets();

        dev.halt().unwrap();
        assert_eq!(fake.resets(), resets + 1);
        assert_eq!(fake.group(Group::C), (0, 0));
        assert_eq!(dev.pin("D0").unwrap().function(), "In/Low");
        assert_eq!(dev.pin("C7").unwrap().function(), "In/Low");
        // The chip is back in MPSSE mode and the buses are free.
        assert!(dev.i2c(Pull::Float).is_ok());
        drop(port);
    }
}
