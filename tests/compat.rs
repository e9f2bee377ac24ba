//! The serial-keyed integer-code surface, driven end to end as a classic
//! voxel3d caller would. One test function: the module holds process-global
//! state, so the steps must not run in parallel.

use std::sync::Arc;
use voxel3d::compat::{self, CamDevInfo};
use voxel3d::emulator::{EmulatedBackend, EmulatedDevice};
use voxel3d::protocol::build_firmware_image;
use voxel3d::{CameraInfo, ImuSample, FLIR_PIXELS, TOF_DEPTH_PIXELS};

#[test]
fn compat_surface_end_to_end() {
    let mut info = CamDevInfo::default();

    // Nothing works before a backend is installed.
    assert_eq!(compat::scan(&mut info), -5);

    let device = EmulatedDevice::new("5VX-0042");
    compat::install_backend(Arc::new(EmulatedBackend::new(vec![device.clone()])));

    assert_eq!(compat::scan(&mut info), 1);
    assert_eq!(info.num_of_devices, 1);
    assert_eq!(info.product_sn, vec!["5VX-0042".to_string()]);
    assert_eq!(info.resolution[0].width, 640);

    // Query before init: -2 per the original convention.
    let mut depth = vec![0u16; TOF_DEPTH_PIXELS];
    let mut ir = vec![0u16; TOF_DEPTH_PIXELS];
    assert_eq!(compat::tof_queryframe("", &mut depth, &mut ir), -2);

    assert_eq!(compat::tof_init(""), 1);
    assert_eq!(compat::tof_get_conf_threshold(""), 20);

    // Out-of-range threshold fails and leaves the register alone.
    assert_eq!(compat::tof_set_conf_threshold("", 5000), -4);
    assert_eq!(compat::tof_get_conf_threshold(""), 20);
    assert_eq!(compat::tof_set_conf_threshold("", 64), 1);
    assert_eq!(compat::tof_get_conf_threshold(""), 64);

    let mut version = String::new();
    assert_eq!(compat::read_fw_version("", &mut version), 1);
    assert_eq!(version, "v2.1.0");
    let mut lib_version = String::new();
    assert_eq!(compat::read_lib_version(&mut lib_version), 1);
    assert!(!lib_version.is_empty());

    let hfov = compat::tof_get_depth_hfov("");
    assert!(hfov > 0.0 && hfov < std::f32::consts::PI);

    // Firmware upgrade before any streaming starts.
    let mut state = i32::MIN;
    let mut percent = 0u32;
    assert_eq!(compat::dev_fw_upgrade_state_poll("", &mut state, &mut percent), -1);
    assert_eq!(state, 0);

    // An unknown device also polls as -1; the `state` out-parameter is the
    // discriminator and is only written on a successful session lookup.
    let mut ghost_state = i32::MIN;
    assert_eq!(
        compat::dev_fw_upgrade_state_poll("GHOST", &mut ghost_state, &mut percent),
        -1
    );
    assert_eq!(ghost_state, i32::MIN);

    let payload = vec![0xA5u8; 6000];
    let image_path = std::env::temp_dir().join("voxel3d-compat-test.5vfw");
    std::fs::write(&image_path, build_firmware_image("v3.1.0", "2025-08-15", &payload)).unwrap();
    let mut states = Vec::new();
    let mut cb = |state: i32, percent: u32| states.push((state, percent));
    let path = image_path.to_string_lossy().into_owned();
    assert_eq!(compat::dev_fw_upgrade("", &path, Some(&mut cb)), 1);
    assert_eq!(states.first(), Some(&(1, 0)));
    assert_eq!(states.last(), Some(&(2, 100)));
    assert_eq!(compat::dev_fw_upgrade_state_poll("", &mut state, &mut percent), -1);
    assert_eq!(state, 2);
    assert_eq!(percent, 100);

    // Frame delivery and point cloud.
    let frame = vec![1000u16; TOF_DEPTH_PIXELS];
    let conf = vec![4095u16; TOF_DEPTH_PIXELS];
    device.push_tof_frame(&frame, &frame, &conf);
    assert_eq!(compat::tof_queryframe("", &mut depth, &mut ir), 1);
    assert_eq!(compat::tof_queryframe("", &mut depth, &mut ir), 0);

    let mut xyz = vec![0.0f32; TOF_DEPTH_PIXELS * 3];
    let count = compat::tof_generate_pointcloud("", &depth, &mut xyz);
    assert_eq!(count, TOF_DEPTH_PIXELS as i32);

    // Upgrade attempts are rejected while the stream is up.
    assert_eq!(compat::dev_fw_upgrade("", &path, None), -6);
    std::fs::remove_file(&image_path).unwrap();

    // IMU rides along with the active ToF session.
    let mut imu = ImuSample {
        timestamp_us: 0,
        accel: [0.0; 3],
        gyro: [0.0; 3],
    };
    assert_eq!(compat::read_imu_data("", &mut imu), 0);
    device.push_imu_sample(5000, [0.0, 0.0, 1.0], [0.0; 3]);
    assert_eq!(compat::read_imu_data("", &mut imu), 1);
    assert_eq!(imu.timestamp_us, 5000);

    // Thermal rectified onto the ToF grid.
    assert_eq!(compat::set_rectify_type("", 3), -4);
    assert_eq!(compat::set_rectify_type("", 2), 1);
    assert_eq!(compat::lepton3_init(""), 1);
    device.push_flir_frame(&vec![305.5f32; FLIR_PIXELS]);
    let mut thermal = vec![0.0f32; TOF_DEPTH_PIXELS];
    assert_eq!(compat::lepton3_queryframe("", &mut thermal), 1);
    assert_eq!(thermal[240 * 640 + 320], 305.5);
    compat::lepton3_release("");

    let mut cam = CameraInfo {
        focal_length_fx: 0.0,
        focal_length_fy: 0.0,
        principal_point_cx: 0.0,
        principal_point_cy: 0.0,
        k1: 0.0,
        k2: 0.0,
        p1: 0.0,
        p2: 0.0,
        k3: 0.0,
        k4: 0.0,
        k5: 0.0,
        k6: 0.0,
    };
    assert_eq!(compat::tof_read_camera_info("", &mut cam), 1);
    assert_eq!(cam.focal_length_fx, 500.0);

    compat::release_all("");
    assert_eq!(compat::tof_queryframe("", &mut depth, &mut ir), -2);

    compat::uninstall_backend();
    assert_eq!(compat::scan(&mut info), -5);
}
