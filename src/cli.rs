//! CLI argument parsing

use clap::{Parser, Subcommand, ValueEnum};
use ftbridge_core::spi::SpiMode;
use ftbridge_core::Frequency;

/// Parse a string as a hex or decimal u8
pub fn parse_hex_u8(s: &str) -> Result<u8, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u8::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u8>().map_err(|e| format!("Invalid number: {}", e))
    }
}

/// Bytes given on the command line in hex
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HexBytes(pub Vec<u8>);

/// Parse a hex byte string such as `9f000000`, `9F 00 00` or `0x9f,0x00`
pub fn parse_hex_bytes(s: &str) -> Result<HexBytes, String> {
    let digits: String = s
        .split([' ', ',', ':'])
        .map(|tok| tok.trim_start_matches("0x").trim_start_matches("0X"))
        .collect();
    if digits.len() % 2 != 0 {
        return Err(format!("Odd number of hex digits in '{}'", s));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            digits
                .get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| format!("Invalid hex byte in '{}'", s))
        })
        .collect::<Result<_, _>>()
        .map(HexBytes)
}

/// Parse an SPI mode number 0..=3
fn parse_spi_mode(s: &str) -> Result<SpiMode, String> {
    match s {
        "0" => Ok(SpiMode::MODE0),
        "1" => Ok(SpiMode::MODE1),
        "2" => Ok(SpiMode::MODE2),
        "3" => Ok(SpiMode::MODE3),
        _ => Err(format!("SPI mode must be 0..3, got '{}'", s)),
    }
}

/// Split `key=value,key=value` device options
pub fn parse_option_string(s: &str) -> Vec<(&str, &str)> {
    s.split(',')
        .filter_map(|opt| opt.split_once('='))
        .collect()
}

#[derive(Parser)]
#[command(name = "ftbridge")]
#[command(author, version, about = "SPI, I2C and GPIO over FTDI USB bridges", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Device options: timeout, round_trip, latency, i2c_hold_ns, cs_setup_ns
    /// (e.g. -o timeout=500,latency=2)
    #[arg(short, long, global = true)]
    pub options: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Drive level for the gpio command
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum PinAction {
    /// Drive the pin high
    High,
    /// Drive the pin low
    Low,
    /// Make the pin an input and sample it
    In,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the enumerated devices
    List,

    /// Show a device and the state of its pins
    Info {
        /// Device name (e.g. FT232H, FT232R(1)) or enumeration index
        device: String,
    },

    /// Run one SPI transfer and print the bytes read back
    Spi {
        /// Device name or enumeration index
        #[arg(short, long, default_value = "0")]
        device: String,

        /// Clock frequency (e.g. 1M, 400k, 100000)
        #[arg(short, long, default_value = "1M")]
        freq: Frequency,

        /// SPI mode 0..3
        #[arg(short, long, default_value = "0", value_parser = parse_spi_mode)]
        mode: SpiMode,

        /// Leave chip select alone
        #[arg(long)]
        no_cs: bool,

        /// Shift the least significant bit first
        #[arg(long)]
        lsb: bool,

        /// Bytes to write, in hex
        #[arg(value_parser = parse_hex_bytes)]
        data: HexBytes,
    },

    /// Run one I2C transaction
    I2c {
        /// Device name or enumeration index
        #[arg(short, long, default_value = "0")]
        device: String,

        /// 7-bit target address
        #[arg(short, long, value_parser = parse_hex_u8)]
        addr: u8,

        /// Bus speed (default: 400k)
        #[arg(short, long)]
        freq: Option<Frequency>,

        /// Bytes to write, in hex
        #[arg(short, long, value_parser = parse_hex_bytes)]
        write: Option<HexBytes>,

        /// Number of bytes to read
        #[arg(short, long, default_value = "0")]
        read: usize,
    },

    /// Drive or sample a single pin
    Gpio {
        /// Device name or enumeration index
        #[arg(short, long, default_value = "0")]
        device: String,

        /// Pin name (e.g. D4, C7)
        pin: String,

        /// What to do with the pin
        #[arg(value_enum, default_value = "in")]
        action: PinAction,
    },

    /// Write or sample D0..D7 at once
    Dbus {
        /// Device name or enumeration index
        #[arg(short, long, default_value = "0")]
        device: String,

        /// Output value; sample the pins when omitted
        #[arg(long, value_parser = parse_hex_u8)]
        value: Option<u8>,

        /// Direction mask, 1 = output
        #[arg(long, value_parser = parse_hex_u8, default_value = "0xff")]
        dir: u8,
    },

    /// Write or sample the C pins at once (C0..C7 on FT232H, C0..C3 on FT232R)
    Cbus {
        /// Device name or enumeration index
        #[arg(short, long, default_value = "0")]
        device: String,

        /// Output value; sample the pins when omitted
        #[arg(long, value_parser = parse_hex_u8)]
        value: Option<u8>,

        /// Direction mask, 1 = output
        #[arg(long, value_parser = parse_hex_u8, default_value = "0xff")]
        dir: u8,
    },
}
