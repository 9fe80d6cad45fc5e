//! ftbridge - SPI, I2C and GPIO from the command line over FTDI bridges
//!
//! Every FTDI device on the bus is opened at startup and given a name
//! (`FT232H`, `FT232R(1)`, ...). Commands then address one device by name
//! or enumeration index:
//!
//! ```text
//! ftbridge list
//! ftbridge spi -d FT232H -f 10M 9f000000
//! ftbridge i2c -d FT232H -a 0x50 -w 00 -r 16
//! ftbridge gpio -d FT232H C7 high
//! ```

mod cli;
mod commands;

use clap::Parser;
use cli::{parse_option_string, Cli, Commands};
use commands::Bus;
use ftbridge_core::spi::SpiMode;
use ftbridge_ftdi::{parse_options, DeviceManager, Driver};

#[cfg(feature = "native")]
fn open_driver() -> Result<Box<dyn Driver>, Box<dyn std::error::Error>> {
    Ok(Box::new(ftbridge_ftdi::NativeDriver::new()?))
}

#[cfg(all(feature = "d2xx", not(feature = "native")))]
fn open_driver() -> Result<Box<dyn Driver>, Box<dyn std::error::Error>> {
    Ok(Box::new(ftbridge_ftdi::D2xxDriver::new()?))
}

#[cfg(not(any(feature = "native", feature = "d2xx")))]
fn open_driver() -> Result<Box<dyn Driver>, Box<dyn std::error::Error>> {
    Err("built without a USB backend; enable the `native` or `d2xx` feature".into())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let options = cli
        .options
        .as_deref()
        .map(parse_option_string)
        .unwrap_or_default();
    let config = parse_options(&options).map_err(|e| format!("Invalid device options: {}", e))?;

    let driver = open_driver()?;
    let mgr = DeviceManager::open_all(driver.as_ref(), &config)?;

    let result = match cli.command {
        Commands::List => {
            commands::list_devices(&mgr);
            Ok(())
        }
        Commands::Info { device } => {
            commands::show_info(mgr.lookup(&device)?);
            Ok(())
        }
        Commands::Spi {
            device,
            freq,
            mode,
            no_cs,
            lsb,
            data,
        } => {
            let mut mode = mode;
            mode.set(SpiMode::NO_CS, no_cs);
            mode.set(SpiMode::LSB_FIRST, lsb);
            commands::run_spi(mgr.lookup(&device)?, freq, mode, &data.0)
                .map(|r| println!("{}", commands::hex_string(&r)))
        }
        Commands::I2c {
            device,
            addr,
            freq,
            write,
            read,
        } => {
            let w = write.map(|w| w.0).unwrap_or_default();
            commands::run_i2c(mgr.lookup(&device)?, addr, freq, &w, read).map(|r| {
                if !r.is_empty() {
                    println!("{}", commands::hex_string(&r));
                }
            })
        }
        Commands::Gpio {
            device,
            pin,
            action,
        } => commands::run_gpio(mgr.lookup(&device)?, &pin, action).map(|level| {
            if let Some(level) = level {
                println!("{}: {}", pin, level);
            }
        }),
        Commands::Dbus { device, value, dir } => {
            commands::run_bus(mgr.lookup(&device)?, Bus::D, value, dir).map(|v| {
                if let Some(v) = v {
                    println!("D: 0x{:02x}", v);
                }
            })
        }
        Commands::Cbus { device, value, dir } => {
            commands::run_bus(mgr.lookup(&device)?, Bus::C, value, dir).map(|v| {
                if let Some(v) = v {
                    println!("C: 0x{:02x}", v);
                }
            })
        }
    };

    for dev in mgr.iter() {
        if let Err(e) = dev.halt() {
            log::warn!("{}: halt failed: {}", dev, e);
        }
    }

    Ok(result?)
}
