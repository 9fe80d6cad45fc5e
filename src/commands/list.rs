//! List and info commands

use ftbridge_ftdi::{Device, DeviceManager};

/// Print every enumerated device
pub fn list_devices(mgr: &DeviceManager) {
    if mgr.is_empty() {
        println!("No FTDI devices found");
        return;
    }

    println!("{:<4} {:<20} {:<10} {:>9}", "#", "Name", "Type", "VID:PID");
    println!("{}", "-".repeat(46));
    for (i, dev) in mgr.iter().enumerate() {
        match dev.info() {
            Some(info) => println!(
                "{:<4} {:<20} {:<10} {:04x}:{:04x}",
                i,
                dev.name(),
                info.dev_type.name(),
                info.vendor_id,
                info.product_id
            ),
            None => println!("{:<4} {}", i, dev.name()),
        }
    }
}

/// Print one device and its pin functions
pub fn show_info(dev: &Device) {
    println!("Device: {}", dev.name());
    if let Some(info) = dev.info() {
        println!("Type:   {}", info.dev_type.name());
        println!("USB:    {:04x}:{:04x}", info.vendor_id, info.product_id);
    }

    let header = match dev {
        Device::Ft232h(d) => d.header(),
        Device::Ft232r(d) => d.header(),
        Device::Generic(_) => {
            println!("No bus support for this device");
            return;
        }
        Device::Broken(_) => return,
    };
    println!();
    println!("{:<16} Function", "Pin");
    for pin in header {
        println!("{:<16} {}", pin.name(), pin.function());
    }
}
