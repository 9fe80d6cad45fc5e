//! In-memory FTDI device used by the unit tests
//!
//! `FakeHandle` interprets the MPSSE command stream the way the chip does:
//! GPIO commands update the pin groups, data commands consume scripted MISO
//! bytes, and unknown opcodes answer `[0xFA, op]`. In synchronous bit-bang
//! mode every written byte yields one pin sample, delayed by one byte.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{FtdiError, Result};
use crate::handle::{FtdiHandle, HandleInfo};
use crate::manager::Driver;
use crate::protocol::{
    BitMode, DevType, Group, BAD_COMMAND, FTDI_FT232H_PID, FTDI_FT232R_PID, FTDI_VID,
};

#[derive(Debug)]
struct Inner {
    dev_type: DevType,
    mode: BitMode,
    max_write: usize,
    written: Vec<u8>,
    write_calls: Vec<usize>,
    commands: Vec<Vec<u8>>,
    pending: Vec<u8>,
    rx: VecDeque<u8>,
    miso: VecDeque<u8>,
    d: (u8, u8),
    c: (u8, u8),
    d_inputs: u8,
    c_inputs: u8,
    loopback: bool,
    sync_loopback: bool,
    sync_prev: u8,
    mute: bool,
    fail: Option<(&'static str, usize)>,
    resets: usize,
    bit_modes: Vec<(u8, BitMode)>,
    baud: Option<u32>,
}

/// Simulated FTDI device; clones share state
#[derive(Debug, Clone)]
pub struct FakeHandle {
    inner: Arc<Mutex<Inner>>,
}

impl FakeHandle {
    /// A device of the given type in UART mode
    pub fn new(dev_type: DevType) -> Self {
        FakeHandle {
            inner: Arc::new(Mutex::new(Inner {
                dev_type,
                mode: BitMode::Reset,
                max_write: usize::MAX,
                written: Vec::new(),
                write_calls: Vec::new(),
                commands: Vec::new(),
                pending: Vec::new(),
                rx: VecDeque::new(),
                miso: VecDeque::new(),
                d: (0, 0),
                c: (0, 0),
                d_inputs: 0,
                c_inputs: 0,
                loopback: false,
                sync_loopback: false,
                sync_prev: 0,
                mute: false,
                fail: None,
                resets: 0,
                bit_modes: Vec::new(),
                baud: None,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    /// Pretend the chip was left in MPSSE mode by an earlier session
    pub fn already_in_mpsse(&self) {
        self.lock().mode = BitMode::Mpsse;
    }

    /// Record writes without ever answering
    pub fn set_mute(&self, on: bool) {
        self.lock().mute = on;
    }

    /// Accept at most `n` bytes per write call
    pub fn set_max_write(&self, n: usize) {
        self.lock().max_write = n;
    }

    /// Make the next call of the named operation fail
    pub fn fail_next(&self, op: &'static str) {
        self.fail_after(op, 0);
    }

    /// Let `skip` calls of the named operation through, then fail one
    pub fn fail_after(&self, op: &'static str, skip: usize) {
        self.lock().fail = Some((op, skip));
    }

    /// Queue raw bytes in the receive queue
    pub fn queue_rx(&self, b: &[u8]) {
        self.lock().rx.extend(b.iter().copied());
    }

    /// Script the bytes shifted in by MPSSE data reads; 0x00 once exhausted
    pub fn queue_miso(&self, b: &[u8]) {
        self.lock().miso.extend(b.iter().copied());
    }

    /// Echo MOSI (D0) on MISO (D1) in synchronous bit-bang mode
    pub fn set_sync_loopback(&self, on: bool) {
        self.lock().sync_loopback = on;
    }

    /// External levels seen on the input pins of a group
    pub fn set_inputs(&self, group: Group, levels: u8) {
        let mut s = self.lock();
        match group {
            Group::D => s.d_inputs = levels,
            Group::C => s.c_inputs = levels,
        }
    }

    /// Bytes waiting in the receive queue
    pub fn rx_pending(&self) -> usize {
        self.lock().rx.len()
    }

    /// Every byte the device accepted
    pub fn raw_written(&self) -> Vec<u8> {
        self.lock().written.clone()
    }

    /// Size of each write call
    pub fn write_calls(&self) -> Vec<usize> {
        self.lock().write_calls.clone()
    }

    /// MPSSE commands executed, one entry per command
    pub fn commands(&self) -> Vec<Vec<u8>> {
        self.lock().commands.clone()
    }

    /// Forget everything written so far
    pub fn clear_log(&self) {
        let mut s = self.lock();
        s.written.clear();
        s.write_calls.clear();
        s.commands.clear();
    }

    /// Number of device resets
    pub fn resets(&self) -> usize {
        self.lock().resets
    }

    /// Every SetBitMode call
    pub fn bit_modes(&self) -> Vec<(u8, BitMode)> {
        self.lock().bit_modes.clone()
    }

    /// Last baud rate set
    pub fn baud(&self) -> Option<u32> {
        self.lock().baud
    }

    /// Current `(value, direction)` of a group
    pub fn group(&self, group: Group) -> (u8, u8) {
        let s = self.lock();
        match group {
            Group::D => s.d,
            Group::C => s.c,
        }
    }
}

impl Inner {
    fn check(&mut self, op: &'static str) -> Result<()> {
        match self.fail {
            Some((name, 0)) if name == op => {
                self.fail = None;
                return Err(FtdiError::usb(op, "injected failure"));
            }
            Some((name, skip)) if name == op => self.fail = Some((name, skip - 1)),
            _ => {}
        }
        Ok(())
    }

    fn pins(&self, group: Group) -> u8 {
        let ((value, dir), inputs) = match group {
            Group::D => (self.d, self.d_inputs),
            Group::C => (self.c, self.c_inputs),
        };
        (value & dir) | (inputs & !dir)
    }

    /// Length of the command at the head of `pending`, if complete
    fn command_len(&self) -> Option<usize> {
        let p = &self.pending;
        let op = *p.first()?;
        let len = if op & 0xC0 == 0 {
            let write = op & 0x10 != 0;
            if op & 0x02 != 0 {
                2 + write as usize
            } else {
                if p.len() < 3 {
                    return None;
                }
                let n = (p[1] as usize | (p[2] as usize) << 8) + 1;
                3 + if write { n } else { 0 }
            }
        } else {
            match op {
                0x80 | 0x82 | 0x86 | 0x8F | 0x9E => 3,
                0x8E => 2,
                _ => 1,
            }
        };
        (p.len() >= len).then_some(len)
    }

    fn execute(&mut self, cmd: &[u8]) {
        let op = cmd[0];
        if op & 0xC0 == 0 {
            let write = op & 0x10 != 0;
            let read = op & 0x20 != 0;
            let (count, payload) = if op & 0x02 != 0 {
                (1, if write { &cmd[2..3] } else { &[][..] })
            } else {
                let n = (cmd[1] as usize | (cmd[2] as usize) << 8) + 1;
                (n, if write { &cmd[3..] } else { &[][..] })
            };
            if read {
                for i in 0..count {
                    let b = if self.loopback && write {
                        payload[i]
                    } else {
                        self.miso.pop_front().unwrap_or(0)
                    };
                    self.rx.push_back(b);
                }
            }
            return;
        }
        match op {
            0x80 => self.d = (cmd[1], cmd[2]),
            0x82 => self.c = (cmd[1], cmd[2]),
            0x81 => {
                let v = self.pins(Group::D);
                self.rx.push_back(v);
            }
            0x83 => {
                let v = self.pins(Group::C);
                self.rx.push_back(v);
            }
            0x84 => self.loopback = true,
            0x85 => self.loopback = false,
            0x86 | 0x87 | 0x8A..=0x8F | 0x96 | 0x97 | 0x9E => {}
            _ => {
                self.rx.push_back(BAD_COMMAND);
                self.rx.push_back(op);
            }
        }
    }

    fn feed_mpsse(&mut self, b: &[u8]) {
        self.pending.extend_from_slice(b);
        while let Some(len) = self.command_len() {
            let cmd: Vec<u8> = self.pending.drain(..len).collect();
            self.execute(&cmd);
            self.commands.push(cmd);
        }
    }

    fn feed_sync(&mut self, b: &[u8]) {
        for &out in b {
            let mut sample = self.sync_prev & !0x02;
            if self.sync_loopback {
                sample |= (self.sync_prev & 0x01) << 1;
            }
            self.rx.push_back(sample);
            self.sync_prev = out;
        }
    }
}

impl FtdiHandle for FakeHandle {
    fn device_info(&mut self) -> Result<HandleInfo> {
        let mut s = self.lock();
        s.check("GetDeviceInfo")?;
        let product_id = match s.dev_type {
            DevType::Ft232R => FTDI_FT232R_PID,
            _ => FTDI_FT232H_PID,
        };
        Ok(HandleInfo {
            dev_type: s.dev_type,
            vendor_id: FTDI_VID,
            product_id,
            serial: Some("FAKE0001".into()),
        })
    }

    fn reset(&mut self) -> Result<()> {
        let mut s = self.lock();
        s.check("Reset")?;
        s.resets += 1;
        s.mode = BitMode::Reset;
        s.pending.clear();
        Ok(())
    }

    fn set_usb_parameters(&mut self, _in_transfer_size: u32) -> Result<()> {
        self.lock().check("SetUSBParameters")
    }

    fn set_chars(&mut self, _: u8, _: bool, _: u8, _: bool) -> Result<()> {
        self.lock().check("SetChars")
    }

    fn set_timeouts(&mut self, _read: Duration, _write: Duration) -> Result<()> {
        self.lock().check("SetTimeouts")
    }

    fn set_latency_timer(&mut self, _ms: u8) -> Result<()> {
        self.lock().check("SetLatencyTimer")
    }

    fn set_flow_control(&mut self) -> Result<()> {
        self.lock().check("SetFlowControl")
    }

    fn set_bit_mode(&mut self, mask: u8, mode: BitMode) -> Result<()> {
        let mut s = self.lock();
        s.check("SetBitMode")?;
        s.bit_modes.push((mask, mode));
        s.mode = mode;
        s.pending.clear();
        match mode {
            BitMode::SyncBitbang | BitMode::AsyncBitbang => s.d.1 = mask,
            // Upper nibble directions, lower nibble values of C0..C3
            BitMode::CbusBitbang => s.c = (mask & 0x0F, mask >> 4),
            _ => {}
        }
        Ok(())
    }

    fn bit_mode(&mut self) -> Result<u8> {
        let mut s = self.lock();
        s.check("GetBitMode")?;
        if s.mode == BitMode::CbusBitbang {
            return Ok(s.pins(Group::C) & 0x0F);
        }
        Ok(s.pins(Group::D))
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        let mut s = self.lock();
        s.check("SetBaudRate")?;
        s.baud = Some(baud);
        Ok(())
    }

    fn queue_status(&mut self) -> Result<usize> {
        let mut s = self.lock();
        s.check("GetQueueStatus")?;
        Ok(s.rx.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut s = self.lock();
        s.check("Read")?;
        let n = s.rx.len().min(buf.len());
        for b in buf.iter_mut().take(n) {
            *b = s.rx.pop_front().unwrap_or(0);
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let mut s = self.lock();
        s.check("Write")?;
        let n = buf.len().min(s.max_write);
        let accepted = &buf[..n];
        s.written.extend_from_slice(accepted);
        s.write_calls.push(n);
        let mode = if s.mute { BitMode::Reset } else { s.mode };
        match mode {
            BitMode::Mpsse => s.feed_mpsse(accepted),
            BitMode::SyncBitbang => s.feed_sync(accepted),
            BitMode::AsyncBitbang => {
                if let Some(&last) = accepted.last() {
                    s.d.0 = last;
                }
            }
            _ => {}
        }
        Ok(n)
    }
}

/// Driver over a fixed list of simulated devices; `None` fails to open
pub struct FakeDriver {
    pub devices: Vec<Option<FakeHandle>>,
}

impl Driver for FakeDriver {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn num_devices(&self) -> Result<usize> {
        Ok(self.devices.len())
    }

    fn open(&self, index: usize) -> Result<Box<dyn FtdiHandle>> {
        match self.devices.get(index) {
            Some(Some(h)) => Ok(Box::new(h.clone())),
            Some(None) => Err(FtdiError::usb("Open", "device busy")),
            None => Err(FtdiError::DeviceNotFound),
        }
    }
}
