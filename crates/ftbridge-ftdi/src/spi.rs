//! SPI over the MPSSE engine (FT232H, FT2232H)
//!
//! Pins: D0 clock, D1 MOSI, D2 MISO, D3 chip select (active low). Each
//! packet is bracketed by repeated GPIO set commands that assert and release
//! chip select; the repetition is what produces the setup and hold time.
//!
//! Data is written in chunks that fill one 512-byte USB packet. Reads trail
//! writes by one packet so the chip always has queued work and the USB
//! turnaround does not dominate throughput.

use std::sync::Arc;

use ftbridge_core::spi::{
    clamp_frequency, validate_bits_per_word, ModeConfig, Packet, SpiConn, SpiMode, SpiPort,
};
use ftbridge_core::{Duplex, Error as CoreError, ErrorType, Frequency};

use crate::error::{FtdiError, Result};
use crate::ft232h::Shared;
use crate::gpio::GpioGroup;
use crate::protocol::{data_cmd, transfer_op, BitOrder, ClockEdge, Group, MAX_TRANSFER, SEND_IMMEDIATE};

/// Fastest MPSSE clock
pub const MAX_SPEED: Frequency = Frequency::from_mhz(30);

/// Slowest clock accepted
pub const MIN_SPEED: Frequency = Frequency::from_hz(100);

const CLK: u8 = 1 << 0;
const MOSI: u8 = 1 << 1;
const MISO: u8 = 1 << 2;
const CS: u8 = 1 << 3;

/// High-speed USB packet size; writes are aligned on it
const PIPELINE: usize = 512;

/// Idle state of D0..D3 on top of the cached group, as `(value, direction)`
///
/// D4..D7 are left untouched. D3 is only driven when chip select is used.
fn idle_registers(dbus: &GpioGroup, cfg: &ModeConfig) -> (u8, u8) {
    let (mut value, mut direction) = (dbus.value(), dbus.direction());
    if cfg.no_cs {
        value &= !(MISO | MOSI | CLK);
        direction &= !(MISO | MOSI | CLK);
    } else {
        value = (value & 0xF0) | CS;
        direction = (direction & 0xF0) | CS;
    }
    direction |= MOSI | CLK;
    if cfg.clock_idle_high {
        value |= CLK;
    }
    (value, direction)
}

/// Write and read edges for a mode
fn edges(cfg: &ModeConfig) -> (ClockEdge, ClockEdge) {
    let (mut ew, mut er) = (ClockEdge::Falling, ClockEdge::Rising);
    if cfg.edge_invert {
        (ew, er) = (er, ew);
    }
    if cfg.clock_idle_high {
        (ew, er) = (er, ew);
    }
    (ew, er)
}

fn claim_pins(dbus: &mut GpioGroup, no_cs: bool) -> Result<()> {
    let bus = [(CLK, "SPI_CLK"), (MOSI, "SPI_MOSI"), (MISO, "SPI_MISO"), (CS, "SPI_CS")];
    let pins: Vec<_> = bus
        .iter()
        .filter(|&&(mask, _)| !(no_cs && mask == CS))
        .map(|&(mask, name)| (mask.trailing_zeros() as u8, name))
        .collect();
    dbus.claim(&pins)
}

/// SPI port on D0..D3 of an MPSSE device
///
/// Obtained from [`Ft232h::spi`](crate::Ft232h::spi). The bus is only
/// claimed once [`connect`](SpiPort::connect) succeeds.
pub struct MpsseSpiPort {
    shared: Arc<Shared>,
    max_freq: Frequency,
    connected: bool,
    epoch: u64,
}

impl MpsseSpiPort {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        MpsseSpiPort {
            shared,
            max_freq: Frequency::default(),
            connected: false,
            epoch: 0,
        }
    }

    /// Release the bus so I2C or GPIO can use the pins
    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if self.connected {
            let mut st = self.shared.lock()?;
            // After a halt the pins may belong to someone else.
            if st.epoch == self.epoch {
                st.using_spi = false;
                st.dbus.release();
                log::debug!("{}: SPI released", self.shared.name());
            }
        }
        self.connected = false;
        self.max_freq = Frequency::default();
        Ok(())
    }
}

impl Drop for MpsseSpiPort {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::warn!("Failed to release SPI port: {}", e);
        }
    }
}

impl ErrorType for MpsseSpiPort {
    type Error = FtdiError;
}

impl SpiPort for MpsseSpiPort {
    type Conn<'a> = MpsseSpiConn<'a>;

    fn connect(&mut self, freq: Frequency, mode: SpiMode, bits_per_word: u32) -> Result<MpsseSpiConn<'_>> {
        validate_bits_per_word(bits_per_word)?;
        let f = clamp_frequency(freq, MAX_SPEED, MIN_SPEED)?;
        let cfg = mode.decompose()?;
        if cfg.half_duplex {
            return Err(CoreError::HalfDuplexUnsupported.into());
        }

        let shared = Arc::clone(&self.shared);
        let mut guard = shared.lock()?;
        let st = &mut *guard;
        if st.using_i2c {
            return Err(FtdiError::Busy("I²C"));
        }
        if self.connected && st.epoch != self.epoch {
            // Halted since the last connect; the clock is back to default.
            self.connected = false;
            self.max_freq = Frequency::default();
        }
        if st.using_spi && !self.connected {
            return Err(FtdiError::Busy("SPI"));
        }
        st.dbus.release();
        claim_pins(&mut st.dbus, cfg.no_cs)?;

        let lower = self.max_freq.is_zero() || f < self.max_freq;
        let (value, direction) = idle_registers(&st.dbus, &cfg);
        let mut apply = || -> Result<()> {
            if lower {
                st.transport.mpsse_clock(f)?;
            }
            st.transport.mpsse_dbus(value, direction)
        };
        if let Err(e) = apply() {
            st.dbus.release();
            st.using_spi = false;
            self.connected = false;
            return Err(e);
        }
        st.dbus.set(value, direction);
        if lower {
            self.max_freq = f;
        }
        st.using_spi = true;
        self.connected = true;
        self.epoch = st.epoch;
        log::debug!(
            "{}: SPI connected at {} in mode {} ({:?})",
            shared.name(),
            f,
            mode.clock_mode(),
            cfg
        );
        drop(guard);
        Ok(MpsseSpiConn { port: self, cfg })
    }

    fn limit_speed(&mut self, freq: Frequency) -> Result<()> {
        let f = clamp_frequency(freq, MAX_SPEED, MIN_SPEED)?;
        let mut st = self.shared.lock()?;
        if st.using_i2c {
            return Err(FtdiError::Busy("I²C"));
        }
        if st.using_spi && !(self.connected && st.epoch == self.epoch) {
            return Err(FtdiError::Busy("SPI"));
        }
        if !self.max_freq.is_zero() && self.max_freq <= f {
            return Ok(());
        }
        st.transport.mpsse_clock(f)?;
        self.max_freq = f;
        Ok(())
    }
}

/// A connected MPSSE SPI bus
pub struct MpsseSpiConn<'a> {
    port: &'a mut MpsseSpiPort,
    cfg: ModeConfig,
}

impl MpsseSpiConn<'_> {
    /// Mode the connection was established with
    pub fn mode(&self) -> SpiMode {
        self.cfg.mode()
    }
}

impl ErrorType for MpsseSpiConn<'_> {
    type Error = FtdiError;
}

impl SpiConn for MpsseSpiConn<'_> {
    fn tx_packets(&mut self, packets: &mut [Packet<'_>]) -> Result<()> {
        for p in packets.iter() {
            p.validate(MAX_TRANSFER)?;
        }

        let mut guard = self.port.shared.lock()?;
        let st = &mut *guard;
        if st.epoch != self.port.epoch {
            return Err(FtdiError::Closed);
        }
        let (idle, dir) = idle_registers(&st.dbus, &self.cfg);
        let start1 = if self.cfg.no_cs { idle } else { idle & !CS };
        let (start2, stop) = if self.cfg.edge_invert {
            // Prime the clock, and keep it steady while chip select rises.
            (start1 ^ CLK, idle ^ CLK)
        } else {
            (start1, idle)
        };
        let (ew, er) = edges(&self.cfg);
        let order = if self.cfg.lsb_first {
            BitOrder::LsbFirst
        } else {
            BitOrder::MsbFirst
        };
        let repeats = st.transport.config().cs_setup_repeats();
        let gpio = |cmd: &mut Vec<u8>, value: u8| {
            for _ in 0..repeats {
                cmd.extend_from_slice(&Group::D.set_cmd(value, dir));
            }
        };

        let mut cmd = Vec::with_capacity(PIPELINE);
        for p in packets.iter_mut() {
            if p.is_empty() {
                continue;
            }
            gpio(&mut cmd, idle);
            gpio(&mut cmd, start1);
            if self.cfg.edge_invert {
                gpio(&mut cmd, start2);
            }

            let write = !p.w.is_empty();
            let read = !p.r.is_empty();
            let len = p.len();
            let op = transfer_op(write, read, ew, er, order);

            let mut sent = 0;
            let mut received = 0;
            let mut pending = 0;
            while sent < len {
                let chunk = PIPELINE.saturating_sub(3 + cmd.len()).max(1).min(len - sent);
                cmd.extend_from_slice(&data_cmd(op, chunk)?);
                if write {
                    cmd.extend_from_slice(&p.w[sent..sent + chunk]);
                }
                sent += chunk;
                st.transport.write(&cmd)?;
                cmd.clear();

                if read && pending >= PIPELINE {
                    let cancel = st.transport.read_deadline(PIPELINE as u64 * 8);
                    st.transport
                        .read_all(&cancel, &mut p.r[received..received + PIPELINE])?;
                    received += PIPELINE;
                    pending -= PIPELINE;
                }
                pending += chunk;
            }
            if read {
                cmd.push(SEND_IMMEDIATE);
                st.transport.write(&cmd)?;
                cmd.clear();
                let cancel = st.transport.read_deadline((len - received) as u64 * 8);
                st.transport.read_all(&cancel, &mut p.r[received..])?;
            }

            cmd.push(SEND_IMMEDIATE);
            gpio(&mut cmd, stop);
            gpio(&mut cmd, idle);
            st.transport.write(&cmd)?;
            cmd.clear();
        }
        Ok(())
    }

    fn duplex(&self) -> Duplex {
        Duplex::Full
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::ft232h::Ft232h;
    use crate::handle::Transport;
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

    fn gpio_d(value: u8, dir: u8) -> Vec<u8> {
        vec![0x80, value, dir]
    }

    #[test]
    fn test_edges() {
        let mode0 = SpiMode::MODE0.decompose().unwrap();
        assert_eq!(edges(&mode0), (ClockEdge::Falling, ClockEdge::Rising));
        let mode1 = SpiMode::MODE1.decompose().unwrap();
        assert_eq!(edges(&mode1), (ClockEdge::Rising, ClockEdge::Falling));
        let mode3 = SpiMode::MODE3.decompose().unwrap();
        assert_eq!(edges(&mode3), (ClockEdge::Falling, ClockEdge::Rising));
    }

    #[test]
    fn test_idle_registers() {
        let mut g = GpioGroup::new("FT232H", Group::D);
        g.set(0x57, 0x64);
        let mode0 = SpiMode::MODE0.decompose().unwrap();
        assert_eq!(idle_registers(&g, &mode0), (0x58, 0x6B));
        assert_eq!((g.value(), g.direction()), (0x57, 0x64));
        g.set(0x58, 0x6B);
        let mode2 = SpiMode::MODE2.decompose().unwrap();
        assert_eq!(idle_registers(&g, &mode2), (0x59, 0x6B));
        g.set(0x5F, 0x6F);
        let no_cs = (SpiMode::MODE0 | SpiMode::NO_CS).decompose().unwrap();
        assert_eq!(idle_registers(&g, &no_cs), (0x58, 0x6B));
    }

    #[test]
    fn test_claim_pins() {
        let mut g = GpioGroup::new("FT232H", Group::D);
        claim_pins(&mut g, false).unwrap();
        assert_eq!(g.claimed(), 0x0F);
        assert_eq!(g.function(2), "SPI_MISO");
        g.release();
        claim_pins(&mut g, true).unwrap();
        assert_eq!(g.claimed(), 0x07);
    }

    #[test]
    fn test_full_duplex_three_bytes() {
        let (fake, dev) = open();
        let mut port = dev.spi().unwrap();
        let mut conn = port.connect(Frequency::from_mhz(10), SpiMode::MODE0, 8).unwrap();
        let cmds = fake.commands();
        assert_eq!(cmds[0], vec![0x8A]);
        assert_eq!(cmds[1], vec![0x86, 0x02, 0x00]);
        assert_eq!(cmds[2], gpio_d(0x08, 0x0B));
        fake.clear_log();

        fake.queue_miso(&[0xAA, 0xBB, 0xCC]);
        let mut r = [0u8; 3];
        conn.tx(&[0x01, 0x02, 0x03], &mut r).unwrap();
        assert_eq!(r, [0xAA, 0xBB, 0xCC]);

        let cmds = fake.commands();
        let idle = gpio_d(0x08, 0x0B);
        let asserted = gpio_d(0x00, 0x0B);
        let data: Vec<_> = cmds.iter().filter(|c| c[0] & 0x80 == 0).collect();
        assert_eq!(data, vec![&vec![0x31, 0x02, 0x00, 0x01, 0x02, 0x03]]);
        let pos = cmds.iter().position(|c| c[0] == 0x31).unwrap();
        assert_eq!(&cmds[..5], vec![idle.clone(); 5].as_slice());
        assert_eq!(&cmds[5..10], vec![asserted.clone(); 5].as_slice());
        assert_eq!(pos, 10);
        assert_eq!(cmds.last().unwrap(), &idle);
        // Chip select is released after the data.
        assert!(cmds[pos..].contains(&idle));
    }

    #[test]
    fn test_mode1_primes_clock() {
        let (fake, dev) = open();
        let mut port = dev.spi().unwrap();
        let mut conn = port.connect(Frequency::from_mhz(1), SpiMode::MODE1, 8).unwrap();
        fake.clear_log();
        conn.tx(&[0x5A], &mut []).unwrap();
        let cmds = fake.commands();
        assert_eq!(cmds[10], gpio_d(0x01, 0x0B));
        assert_eq!(cmds[15], vec![0x10, 0x00, 0x00, 0x5A]);
        // Stop keeps the clock primed while CS rises.
        assert!(cmds.contains(&gpio_d(0x09, 0x0B)));
    }

    #[test]
    fn test_read_only_has_no_payload() {
        let (fake, dev) = open();
        let mut port = dev.spi().unwrap();
        let mut conn = port
            .connect(Frequency::from_mhz(1), SpiMode::MODE0 | SpiMode::NO_CS, 8)
            .unwrap();
        fake.clear_log();
        fake.queue_miso(&[1, 2, 3, 4]);
        let mut r = [0u8; 4];
        conn.tx_packets(&mut [Packet::read(&mut r)]).unwrap();
        assert_eq!(r, [1, 2, 3, 4]);
        let cmds = fake.commands();
        assert!(cmds.contains(&vec![0x20, 0x03, 0x00]));
        // No chip select toggling.
        assert!(cmds.iter().filter(|c| c[0] == 0x80).all(|c| c[1] & CS == 0));
    }

    #[test]
    fn test_large_transfer_pipelined() {
        let (fake, dev) = open();
        let mut port = dev.spi().unwrap();
        let mut conn = port.connect(Frequency::from_mhz(30), SpiMode::MODE0, 8).unwrap();
        fake.clear_log();
        let w: Vec<u8> = (0..5000u32).map(|i| i as u8).collect();
        fake.queue_miso(&w);
        let mut r = vec![0u8; w.len()];
        conn.tx(&w, &mut r).unwrap();
        assert_eq!(r, w);
        assert!(fake.write_calls().iter().all(|&n| n <= PIPELINE));
        let total: usize = fake
            .commands()
            .iter()
            .filter(|c| c[0] == 0x31)
            .map(|c| c.len() - 3)
            .sum();
        assert_eq!(total, 5000);
    }

    #[test]
    fn test_invalid_packet_no_io() {
        let (fake, dev) = open();
        let mut port = dev.spi().unwrap();
        let mut conn = port.connect(Frequency::from_mhz(1), SpiMode::MODE0, 8).unwrap();
        fake.clear_log();

        let w = [1u8, 2, 3];
        let mut r = [0u8; 2];
        let e = conn.tx(&w, &mut r).unwrap_err();
        assert!(e.is_protocol());

        let mut ok = [0u8; 3];
        let mut bad = Packet::write(&w);
        bad.keep_cs = true;
        let e = conn
            .tx_packets(&mut [Packet::new(&w, &mut ok), bad])
            .unwrap_err();
        assert!(matches!(e, FtdiError::Protocol(CoreError::KeepCsUnsupported)));

        let mut wide = Packet::write(&w);
        wide.bits_per_word = 16;
        assert!(conn.tx_packets(&mut [wide]).is_err());
        assert!(fake.raw_written().is_empty());
    }

    #[test]
    fn test_empty_packets_skipped() {
        let (fake, dev) = open();
        let mut port = dev.spi().unwrap();
        let mut conn = port.connect(Frequency::from_mhz(1), SpiMode::MODE0, 8).unwrap();
        fake.clear_log();
        conn.tx_packets(&mut [Packet::new(&[], &mut [])]).unwrap();
        assert!(fake.raw_written().is_empty());
    }

    #[test]
    fn test_connect_validation() {
        let (fake, dev) = open();
        let mut port = dev.spi().unwrap();
        assert!(port.connect(Frequency::from_mhz(1), SpiMode::MODE0, 16).is_err());
        assert!(port.connect(Frequency::from_hz(50), SpiMode::MODE0, 8).is_err());
        assert!(port
            .connect(Frequency::from_mhz(1), SpiMode::HALF_DUPLEX, 8)
            .is_err());
        assert!(port
            .connect(Frequency::from_mhz(1), SpiMode::from_bits_retain(0x40), 8)
            .is_err());
        assert!(fake.raw_written().is_empty());
    }

    #[test]
    fn test_clock_only_lowered() {
        let (fake, dev) = open();
        let mut port = dev.spi().unwrap();
        port.connect(Frequency::from_mhz(10), SpiMode::MODE0, 8).unwrap();
        fake.clear_log();
        port.connect(Frequency::from_mhz(20), SpiMode::MODE0, 8).unwrap();
        assert!(!fake.commands().iter().any(|c| c[0] == 0x86));
        port.connect(Frequency::from_mhz(5), SpiMode::MODE0, 8).unwrap();
        assert!(fake.commands().contains(&vec![0x86, 0x05, 0x00]));
        fake.clear_log();
        port.limit_speed(Frequency::from_mhz(6)).unwrap();
        assert!(fake.raw_written().is_empty());
        port.limit_speed(Frequency::from_mhz(3)).unwrap();
        assert_eq!(fake.raw_written(), vec![0x8A, 0x86, 0x09, 0x00]);
    }

    #[test]
    fn test_pins_claimed() {
        let (_fake, dev) = open();
        let mut port = dev.spi().unwrap();
        port.connect(Frequency::from_mhz(1), SpiMode::MODE0, 8).unwrap();
        let pins = dev.header();
        assert_eq!(pins[0].function(), "SPI_CLK");
        assert_eq!(pins[3].function(), "SPI_CS");
        assert!(matches!(
            ftbridge_core::gpio::PinOut::out(&pins[3], ftbridge_core::gpio::Level::High),
            Err(FtdiError::PinInUse { .. })
        ));
        port.close().unwrap();
        assert_eq!(pins[3].function(), "Out/High");
    }

    #[test]
    fn test_failed_connect_keeps_limit() {
        let (fake, dev) = open();
        let mut port = dev.spi().unwrap();
        port.connect(Frequency::from_mhz(10), SpiMode::MODE0, 8).unwrap();
        // The clock write goes through, the idle state write fails.
        fake.fail_after("Write", 1);
        assert!(port.connect(Frequency::from_mhz(5), SpiMode::MODE0, 8).is_err());
        fake.clear_log();
        port.connect(Frequency::from_mhz(8), SpiMode::MODE0, 8).unwrap();
        assert!(fake.commands().iter().any(|c| c[0] == 0x86));
    }

    #[test]
    fn test_failed_connect_leaves_cache() {
        let (fake, dev) = open();
        dev.dbus(0x00, 0xF0).unwrap();
        let mut port = dev.spi().unwrap();
        fake.fail_after("Write", 1);
        assert!(port.connect(Frequency::from_mhz(1), SpiMode::MODE0, 8).is_err());
        assert_eq!(dev.header()[3].function(), "In/Low");
        assert_eq!(dev.header()[4].function(), "Out/Low");
        // Nothing is claimed; the pins can still be driven.
        assert!(dev.dbus(0x10, 0xF0).is_ok());
    }

    #[test]
    fn test_halt_closes_connection() {
        let (fake, dev) = open();
        let mut port = dev.spi().unwrap();
        let mut conn = port.connect(Frequency::from_mhz(1), SpiMode::MODE0, 8).unwrap();
        dev.halt().unwrap();
        fake.clear_log();
        assert!(matches!(conn.tx(&[0x01], &mut []), Err(FtdiError::Closed)));
        assert!(fake.raw_written().is_empty());

        // The pins are free again and a fresh port can take them.
        let mut other = dev.spi().unwrap();
        other.connect(Frequency::from_mhz(1), SpiMode::MODE0, 8).unwrap();
        drop(port);
        assert_eq!(dev.header()[3].function(), "SPI_CS");
    }
}
