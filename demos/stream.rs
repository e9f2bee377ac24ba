//! Poll depth frames and print per-frame statistics.
//!
//! Usage: cargo run --example stream
//!
//! Runs against the built-in emulator, which is fed a moving synthetic
//! scene; swap in a real transport backend to stream hardware.

use std::sync::Arc;
use std::time::{Duration, Instant};
use voxel3d::emulator::{EmulatedBackend, EmulatedDevice};
use voxel3d::{Modality, SessionManager, TOF_DEPTH_PIXELS};

fn main() {
    env_logger::init();

    let device = EmulatedDevice::new("5VX-0001");
    let mut manager = SessionManager::new(Arc::new(EmulatedBackend::new(vec![device.clone()])));

    let session = match manager.acquire("", Modality::Tof) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to open device: {}", e);
            std::process::exit(1);
        }
    };

    println!("SN:       {}", session.serial());
    match session.fw_version() {
        Ok(v) => println!("Firmware: {}", v),
        Err(e) => eprintln!("Firmware version unavailable: {}", e),
    }
    println!();
    println!("Streaming depth for 30 frames...");

    let mut depth = vec![0u16; TOF_DEPTH_PIXELS];
    let mut ir = vec![0u16; TOF_DEPTH_PIXELS];
    let mut xyz = vec![0.0f32; TOF_DEPTH_PIXELS * 3];
    let start = Instant::now();
    let mut frames = 0u32;

    while frames < 30 {
        // A flat wall sweeping from 0.5 m to 3.5 m.
        let range_mm = 500 + (frames as u16 % 30) * 100;
        let plane = vec![range_mm; TOF_DEPTH_PIXELS];
        let conf = vec![4095u16; TOF_DEPTH_PIXELS];
        device.push_tof_frame(&plane, &plane, &conf);

        match session.tof_query_frame(&mut depth, &mut ir) {
            Ok(0) => {
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(count) => {
                frames = count;
                let valid = match session.tof_generate_point_cloud(&depth, &mut xyz) {
                    Ok(n) => n,
                    Err(e) => {
                        eprintln!("Point cloud error: {}", e);
                        break;
                    }
                };
                let center = depth[TOF_DEPTH_PIXELS / 2];
                println!(
                    "frame={:<4} center={:>5} mm  valid={}/{}",
                    count, center, valid, TOF_DEPTH_PIXELS
                );
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                break;
            }
        }
    }

    let elapsed = start.elapsed().as_secs_f64();
    println!(
        "\nTotal: {} frames in {:.2}s ({:.1} fps)",
        frames,
        elapsed,
        frames as f64 / elapsed.max(1e-9)
    );

    if let Err(e) = manager.release("", None) {
        eprintln!("Release failed: {}", e);
    }
}
