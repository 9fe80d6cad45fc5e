//! SPI over synchronous bit-bang (FT232R)
//!
//! Pins: D0 MOSI (TXD), D1 MISO (RXD), D2 clock (RTS), D3 chip select (CTS).
//!
//! There is no shift register: every bit becomes two samples, one per clock
//! phase, so a byte costs 16 samples. Each packet is framed by a chip select
//! sample and four settle samples on both sides. The sample stream that comes
//! back is decimated by taking the sample of the second phase of every bit.

use std::sync::Arc;

use ftbridge_core::spi::{
    clamp_frequency, validate_bits_per_word, ModeConfig, Packet, SpiConn, SpiMode, SpiPort,
};
use ftbridge_core::{Duplex, Error as CoreError, ErrorType, Frequency};

use crate::error::{FtdiError, Result};
use crate::ft232r::Shared;
use crate::gpio::GpioGroup;
use crate::protocol::MAX_TRANSFER;

/// Fastest SPI clock: two samples per clock at 3 MBaud
pub const MAX_SPEED: Frequency = Frequency::from_khz(1500);

/// Slowest clock accepted
pub const MIN_SPEED: Frequency = Frequency::from_hz(100);

const MOSI: u8 = 1 << 0;
const MISO: u8 = 1 << 1;
const CLK: u8 = 1 << 2;
const CS: u8 = 1 << 3;

/// Idle clock samples around the data
const SETTLE: usize = 4;

/// Samples before the first data bit
const PREAMBLE: usize = 1 + SETTLE;

/// Pin values used while expanding a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Levels {
    cs_idle: u8,
    clk_idle: u8,
    clk_active: u8,
}

impl Levels {
    /// `value` and `mask` are the cached D registers; D4..D7 keep their outputs
    fn new(value: u8, mask: u8, cfg: &ModeConfig) -> Self {
        let cs_active = value & mask & 0xF0;
        let mut cs_idle = if cfg.no_cs { cs_active } else { cs_active | CS };
        let mut clk_idle = cs_active;
        let mut clk_active = clk_idle | CLK;
        if cfg.clock_idle_high {
            std::mem::swap(&mut clk_idle, &mut clk_active);
            cs_idle |= CLK;
        }
        Levels {
            cs_idle,
            clk_idle,
            clk_active,
        }
    }
}

/// Number of samples a packet of `len` bytes expands to
fn expanded_len(len: usize) -> usize {
    len * 16 + 2 * PREAMBLE
}

/// Expand `len` bytes of `w` into bit-bang samples; missing bytes are zero
fn expand_packet(w: &[u8], len: usize, lv: Levels, cfg: &ModeConfig, out: &mut Vec<u8>) {
    out.reserve(expanded_len(len));
    out.push(lv.cs_idle);
    out.extend(std::iter::repeat(lv.clk_idle).take(SETTLE));
    for i in 0..len {
        let b = w.get(i).copied().unwrap_or(0);
        for j in 0..8 {
            let shift = if cfg.lsb_first { j } else { 7 - j };
            let d = if b >> shift & 1 != 0 { MOSI } else { 0 };
            if cfg.edge_invert {
                out.push(lv.clk_active | d);
                out.push(lv.clk_idle | d);
            } else {
                out.push(lv.clk_idle | d);
                out.push(lv.clk_active | d);
            }
        }
    }
    out.extend(std::iter::repeat(lv.clk_idle).take(SETTLE));
    out.push(lv.cs_idle);
}

/// Recover the bytes shifted in from the samples of one packet
///
/// A sample shows the pins just before its byte was applied, so the second
/// phase sample holds what the peripheral presented during the first phase.
fn decimate_packet(samples: &[u8], cfg: &ModeConfig, r: &mut [u8]) {
    for (i, byte) in r.iter_mut().enumerate() {
        let mut b = 0u8;
        for j in 0..8 {
            if samples[PREAMBLE + i * 16 + j * 2 + 1] & MISO != 0 {
                let shift = if cfg.lsb_first { j } else { 7 - j };
                b |= 1 << shift;
            }
        }
        *byte = b;
    }
}

fn claim_pins(dbus: &mut GpioGroup, no_cs: bool) -> Result<()> {
    if no_cs {
        dbus.claim(&[(0, "SPI_MOSI"), (1, "SPI_MISO"), (2, "SPI_CLK")])
    } else {
        dbus.claim(&[(0, "SPI_MOSI"), (1, "SPI_MISO"), (2, "SPI_CLK"), (3, "SPI_CS")])
    }
}

/// SPI port on D0..D3 of an FT232R
pub struct SyncSpiPort {
    shared: Arc<Shared>,
    max_freq: Frequency,
    connected: bool,
    epoch: u64,
}

impl SyncSpiPort {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        SyncSpiPort {
            shared,
            max_freq: Frequency::default(),
            connected: false,
            epoch: 0,
        }
    }

    /// Release the pins for GPIO use
    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if self.connected {
            let mut st = self.shared.lock()?;
            if st.epoch == self.epoch {
                st.using_spi = false;
                st.dbus.release();
            }
        }
        self.connected = false;
        self.max_freq = Frequency::default();
        Ok(())
    }
}

impl Drop for SyncSpiPort {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::warn!("Failed to release SPI port: {}", e);
        }
    }
}

impl ErrorType for SyncSpiPort {
    type Error = FtdiError;
}

impl SpiPort for SyncSpiPort {
    type Conn<'a> = SyncSpiConn<'a>;

    fn connect(&mut self, freq: Frequency, mode: SpiMode, bits_per_word: u32) -> Result<SyncSpiConn<'_>> {
        validate_bits_per_word(bits_per_word)?;
        let f = clamp_frequency(freq, MAX_SPEED, MIN_SPEED)?;
        let cfg = mode.decompose()?;
        if cfg.half_duplex {
            return Err(CoreError::HalfDuplexUnsupported.into());
        }

        let shared = Arc::clone(&self.shared);
        let mut guard = shared.lock()?;
        let st = &mut *guard;
        if self.connected && st.epoch != self.epoch {
            // Halted since the last connect; the rate is back to default.
            self.connected = false;
            self.max_freq = Frequency::default();
        }
        if st.using_spi && !self.connected {
            return Err(FtdiError::Busy("SPI"));
        }
        st.dbus.release();
        claim_pins(&mut st.dbus, cfg.no_cs)?;

        let lower = self.max_freq.is_zero() || f < self.max_freq;
        let mut apply = || -> Result<()> {
            if lower {
                st.transport.set_baud_rate(f.hz() as u32 * 2)?;
            }
            let cs = if cfg.no_cs { 0 } else { CS };
            let mask = MOSI | CLK | cs | (st.dbus.direction() & 0xF0);
            st.set_mask(mask)?;
            let mut value = (st.dbus.value() & 0xF0) | cs;
            if cfg.clock_idle_high {
                value |= CLK;
            }
            st.drive(value)?;
            Ok(())
        };
        if let Err(e) = apply() {
            st.dbus.release();
            st.using_spi = false;
            self.connected = false;
            return Err(e);
        }
        if lower {
            self.max_freq = f;
        }
        st.using_spi = true;
        self.connected = true;
        self.epoch = st.epoch;
        log::debug!(
            "{}: bit-bang SPI connected at {} in mode {}",
            shared.name(),
            f,
            mode.clock_mode()
        );
        drop(guard);
        Ok(SyncSpiConn { port: self, cfg })
    }

    fn limit_speed(&mut self, freq: Frequency) -> Result<()> {
        let f = clamp_frequency(freq, MAX_SPEED, MIN_SPEED)?;
        let mut st = self.shared.lock()?;
        if st.using_spi && !(self.connected && st.epoch == self.epoch) {
            return Err(FtdiError::Busy("SPI"));
        }
        if !self.max_freq.is_zero() && self.max_freq <= f {
            return Ok(());
        }
        st.transport.set_baud_rate(f.hz() as u32 * 2)?;
        self.max_freq = f;
        Ok(())
    }
}

/// A connected bit-bang SPI bus
pub struct SyncSpiConn<'a> {
    port: &'a mut SyncSpiPort,
    cfg: ModeConfig,
}

impl ErrorType for SyncSpiConn<'_> {
    type Error = FtdiError;
}

impl SpiConn for SyncSpiConn<'_> {
    fn tx_packets(&mut self, packets: &mut [Packet<'_>]) -> Result<()> {
        for p in packets.iter() {
            p.validate(MAX_TRANSFER)?;
        }

        let mut guard = self.port.shared.lock()?;
        let st = &mut *guard;
        if st.epoch != self.port.epoch {
            return Err(FtdiError::Closed);
        }
        let lv = Levels::new(st.dbus.value(), st.dbus.direction(), &self.cfg);

        let mut stream = Vec::new();
        let mut bases = Vec::new();
        for p in packets.iter().filter(|p| !p.is_empty()) {
            bases.push(stream.len());
            expand_packet(p.w, p.len(), lv, &self.cfg, &mut stream);
        }
        if stream.is_empty() {
            return Ok(());
        }
        let mut samples = vec![0u8; stream.len()];
        st.burst(&stream, &mut samples)?;

        for (p, base) in packets.iter_mut().filter(|p| !p.is_empty()).zip(bases) {
            if !p.r.is_empty() {
                decimate_packet(&samples[base..], &self.cfg, p.r);
            }
        }
        let direction = st.dbus.direction();
        st.dbus.set(lv.cs_idle, direction);
        if let Some(&last) = samples.last() {
            st.dbus.read(last);
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
    use crate::ft232r::Ft232r;
    use crate::handle::Transport;
    use crate::protocol::{BitMode, DevType};
    use crate::testing::FakeHandle;

    fn open() -> (FakeHandle, Ft232r) {
        let fake = FakeHandle::new(DevType::Ft232R);
        let t = Transport::new(Box::new(fake.clone()), DeviceConfig::default()).unwrap();
        let dev = Ft232r::open(t, "FT232R").unwrap();
        fake.clear_log();
        (fake, dev)
    }

    #[test]
    fn test_levels() {
        let mode0 = SpiMode::MODE0.decompose().unwrap();
        let lv = Levels::new(0x30, 0x1D, &mode0);
        assert_eq!(
            lv,
            Levels {
                cs_idle: 0x18,
                clk_idle: 0x10,
                clk_active: 0x14
            }
        );
        let mode2 = SpiMode::MODE2.decompose().unwrap();
        let lv = Levels::new(0, 0x0D, &mode2);
        assert_eq!(
            lv,
            Levels {
                cs_idle: 0x0C,
                clk_idle: 0x04,
                clk_active: 0x00
            }
        );
    }

    #[test]
    fn test_expand_mode0() {
        let cfg = SpiMode::MODE0.decompose().unwrap();
        let lv = Levels::new(0, 0x0D, &cfg);
        let mut out = Vec::new();
        expand_packet(&[0x80], 1, lv, &cfg, &mut out);
        assert_eq!(out.len(), expanded_len(1));
        assert_eq!(&out[..5], &[0x08, 0, 0, 0, 0]);
        assert_eq!(&out[5..7], &[0x01, 0x05]);
        assert_eq!(&out[7..9], &[0x00, 0x04]);
        assert_eq!(&out[21..], &[0, 0, 0, 0, 0x08]);
    }

    #[test]
    fn test_expand_lsb_cpha() {
        let cfg = (SpiMode::MODE1 | SpiMode::LSB_FIRST).decompose().unwrap();
        let lv = Levels::new(0, 0x0D, &cfg);
        let mut out = Vec::new();
        expand_packet(&[0x01], 1, lv, &cfg, &mut out);
        // Leading edge first when the phase is inverted
        assert_eq!(&out[5..7], &[0x05, 0x01]);
        assert_eq!(&out[7..9], &[0x04, 0x00]);
    }

    #[test]
    fn test_decimate() {
        let cfg = SpiMode::MODE0.decompose().unwrap();
        let mut samples = vec![0u8; expanded_len(2)];
        // 0xA0 then 0x01
        samples[PREAMBLE + 1] = MISO;
        samples[PREAMBLE + 2 * 2 + 1] = MISO;
        samples[PREAMBLE + 16 + 7 * 2 + 1] = MISO;
        let mut r = [0u8; 2];
        decimate_packet(&samples, &cfg, &mut r);
        assert_eq!(r, [0xA0, 0x01]);
        let lsb = (SpiMode::MODE0 | SpiMode::LSB_FIRST).decompose().unwrap();
        decimate_packet(&samples, &lsb, &mut r);
        assert_eq!(r, [0x05, 0x80]);
    }

    #[test]
    fn test_connect() {
        let (fake, dev) = open();
        let mut port = dev.spi().unwrap();
        port.connect(Frequency::from_mhz(10), SpiMode::MODE0, 8).unwrap();
        assert_eq!(fake.baud(), Some(3_000_000));
        assert_eq!(fake.bit_modes().last(), Some(&(0x0D, BitMode::SyncBitbang)));
        assert_eq!(fake.raw_written(), vec![0x08]);
        assert_eq!(dev.header()[2].function(), "SPI_CLK");
        assert_eq!(dev.header()[3].function(), "SPI_CS");

        port.limit_speed(Frequency::from_khz(500)).unwrap();
        assert_eq!(fake.baud(), Some(1_000_000));
    }

    #[test]
    fn test_loopback_round_trip() {
        let w = [0xA5, 0x3C, 0x01, 0xFF, 0x00, 0x80];
        for clock in [SpiMode::MODE0, SpiMode::MODE1, SpiMode::MODE2, SpiMode::MODE3] {
            for order in [SpiMode::empty(), SpiMode::LSB_FIRST] {
                let (fake, dev) = open();
                fake.set_sync_loopback(true);
                let mut port = dev.spi().unwrap();
                let mut conn = port.connect(Frequency::from_mhz(1), clock | order, 8).unwrap();
                let mut r = [0u8; 6];
                conn.tx(&w, &mut r).unwrap();
                assert_eq!(r, w, "mode {:?}", clock | order);
                assert_eq!(fake.rx_pending(), 0);
            }
        }
    }

    #[test]
    fn test_multiple_packets() {
        let (fake, dev) = open();
        fake.set_sync_loopback(true);
        let mut port = dev.spi().unwrap();
        let mut conn = port.connect(Frequency::from_mhz(1), SpiMode::MODE0, 8).unwrap();
        let mut a = [0u8; 1];
        let mut b = [0u8; 2];
        conn.tx_packets(&mut [
            Packet::new(&[0x12], &mut a),
            Packet::write(&[0xEE; 20]),
            Packet::new(&[], &mut []),
            Packet::new(&[0x34, 0x56], &mut b),
        ])
        .unwrap();
        assert_eq!(a, [0x12]);
        assert_eq!(b, [0x34, 0x56]);
        let total: usize = fake.write_calls().iter().sum();
        assert_eq!(total, 1 + expanded_len(1) + expanded_len(20) + expanded_len(2));
    }

    #[test]
    fn test_read_only_clocks_zeros() {
        let (fake, dev) = open();
        fake.set_sync_loopback(true);
        let mut port = dev.spi().unwrap();
        let mut conn = port.connect(Frequency::from_mhz(1), SpiMode::MODE0, 8).unwrap();
        let mut r = [0xFFu8; 3];
        conn.tx_packets(&mut [Packet::read(&mut r)]).unwrap();
        assert_eq!(r, [0, 0, 0]);
    }

    #[test]
    fn test_exclusive() {
        let (fake, dev) = open();
        let mut port = dev.spi().unwrap();
        port.connect(Frequency::from_mhz(1), SpiMode::MODE0, 8).unwrap();
        assert!(matches!(dev.spi(), Err(FtdiError::Busy("SPI"))));
        assert!(matches!(dev.tx(&[0], &mut []), Err(FtdiError::Busy("SPI"))));
        assert!(matches!(dev.set_dbus_mask(0xFF), Err(FtdiError::Busy("SPI"))));
        fake.clear_log();

        let mut bad = Packet::write(&[1]);
        bad.keep_cs = true;
        let mut conn = port.connect(Frequency::from_mhz(1), SpiMode::MODE0, 8).unwrap();
        assert!(conn.tx_packets(&mut [bad]).is_err());
        assert!(fake.raw_written().iter().all(|&b| b == 0x08));

        port.close().unwrap();
        assert_eq!(dev.header()[0].function(), "Out/Low");
        assert!(dev.spi().is_ok());
    }

    #[test]
    fn test_failed_connect_keeps_limit() {
        let (fake, dev) = open();
        let mut port = dev.spi().unwrap();
        port.connect(Frequency::from_mhz(1), SpiMode::MODE0, 8).unwrap();
        assert_eq!(fake.baud(), Some(2_000_000));
        // The rate changes, then driving the idle levels fails.
        fake.fail_next("Write");
        assert!(port.connect(Frequency::from_khz(500), SpiMode::MODE0, 8).is_err());
        assert_eq!(fake.baud(), Some(1_000_000));
        port.connect(Frequency::from_khz(800), SpiMode::MODE0, 8).unwrap();
        assert_eq!(fake.baud(), Some(1_600_000));
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
        assert_eq!(dev.header()[3].function(), "In/Low");
        assert!(dev.spi().is_ok());
    }
}
