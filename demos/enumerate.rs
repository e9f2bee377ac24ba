//! List attached 5VHiRab devices and print their capabilities.
//!
//! Runs against the built-in emulator; swap in a real transport backend to
//! enumerate hardware.

use std::sync::Arc;
use voxel3d::emulator::{EmulatedBackend, EmulatedDevice};
use voxel3d::SessionManager;

fn main() {
    env_logger::init();

    let backend = Arc::new(EmulatedBackend::new(vec![
        EmulatedDevice::new("5VX-0001"),
        EmulatedDevice::new("5VX-0002"),
    ]));
    let mut manager = SessionManager::new(backend);

    match manager.scan() {
        Ok(devices) => {
            println!("Found {} device(s):", devices.len());
            for (i, dev) in devices.iter().enumerate() {
                println!(
                    "  [{}] SN={}  Name={}  Depth={}x{}  Features={:?}",
                    i, dev.serial, dev.name, dev.resolution.width, dev.resolution.height,
                    dev.features
                );
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
