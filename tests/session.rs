//! Session lifecycle: scan, serial resolution, acquire/release semantics.

use std::sync::Arc;
use voxel3d::emulator::{EmulatedBackend, EmulatedDevice};
use voxel3d::{Modality, SessionManager, Voxel3dError, TOF_DEPTH_PIXELS};

fn manager_with(serials: &[&str]) -> (Vec<EmulatedDevice>, SessionManager) {
    let devices: Vec<EmulatedDevice> = serials.iter().map(|s| EmulatedDevice::new(s)).collect();
    let manager = SessionManager::new(Arc::new(EmulatedBackend::new(devices.clone())));
    (devices, manager)
}

#[test]
fn session_handles_are_debuggable_by_serial() {
    let (_, mut manager) = manager_with(&["5VX-0001"]);
    let session = manager.acquire("", Modality::Tof).unwrap();
    assert!(format!("{:?}", session).contains("5VX-0001"));
}

#[test]
fn scan_reports_attached_devices() {
    let (_, mut manager) = manager_with(&["5VX-0001", "5VX-0002"]);
    let devices = manager.scan().unwrap();
    assert_eq!(devices.len(), 2);
    let serials: Vec<&str> = devices.iter().map(|d| d.serial.as_str()).collect();
    assert!(serials.contains(&"5VX-0001"));
    assert!(serials.contains(&"5VX-0002"));
}

#[test]
fn scan_with_no_devices_fails() {
    let mut manager = SessionManager::new(Arc::new(EmulatedBackend::empty()));
    assert!(matches!(
        manager.scan(),
        Err(Voxel3dError::DeviceNotFound { .. })
    ));
}

#[test]
fn empty_serial_selects_first_scanned_device() {
    let (_, mut manager) = manager_with(&["5VX-0001", "5VX-0002"]);
    manager.scan().unwrap();
    let session = manager.acquire("", Modality::Tof).unwrap();
    assert_eq!(session.serial(), "5VX-0001");
}

#[test]
fn unknown_serial_fails_with_device_not_found() {
    let (_, mut manager) = manager_with(&["5VX-0001"]);
    let err = manager.acquire("NOPE", Modality::Tof).unwrap_err();
    assert!(matches!(err, Voxel3dError::DeviceNotFound { .. }));
    assert_eq!(err.code(), -1);
}

#[test]
fn init_with_no_devices_fails_with_device_not_found() {
    let mut manager = SessionManager::new(Arc::new(EmulatedBackend::empty()));
    let err = manager.acquire("", Modality::Tof).unwrap_err();
    assert!(matches!(err, Voxel3dError::DeviceNotFound { .. }));
}

#[test]
fn acquire_is_idempotent_per_modality() {
    let (devices, mut manager) = manager_with(&["5VX-0001"]);
    let first = manager.acquire("", Modality::Tof).unwrap();
    first.tof_set_conf_threshold(321).unwrap();

    // Re-acquiring must return the same live session, not re-init it.
    let second = manager.acquire("5VX-0001", Modality::Tof).unwrap();
    assert_eq!(second.tof_conf_threshold().unwrap(), 321);
    assert_eq!(devices[0].conf_threshold(), 321);
}

#[test]
fn operations_before_acquire_fail_not_initialized() {
    let (_, mut manager) = manager_with(&["5VX-0001"]);
    manager.scan().unwrap();
    let err = manager.session("").unwrap_err();
    assert!(matches!(err, Voxel3dError::NotInitialized { .. }));
    assert_eq!(err.code(), -2);
}

#[test]
fn modalities_share_one_session_per_device() {
    let (_, mut manager) = manager_with(&["5VX-0001"]);
    let tof = manager.acquire("", Modality::Tof).unwrap();
    let rgb = manager.acquire("", Modality::Rgb).unwrap();
    assert_eq!(tof.serial(), rgb.serial());

    // Releasing just the ToF modality leaves the RGB engine alive.
    manager.release("", Some(Modality::Tof)).unwrap();
    let session = manager.session("").unwrap();
    assert!(session.rgb_camera_info().is_ok());
    assert!(matches!(
        session.tof_camera_info(),
        Err(Voxel3dError::NotInitialized { .. })
    ));
}

#[test]
fn release_is_idempotent() {
    let (_, mut manager) = manager_with(&["5VX-0001"]);
    let session = manager.acquire("", Modality::Tof).unwrap();

    manager.release("", None).unwrap();
    manager.release("", None).unwrap();

    // Stale handles observe the released state.
    let mut depth = vec![0u16; TOF_DEPTH_PIXELS];
    let mut ir = vec![0u16; TOF_DEPTH_PIXELS];
    assert!(matches!(
        session.tof_query_frame(&mut depth, &mut ir),
        Err(Voxel3dError::NotInitialized { .. })
    ));
}

#[test]
fn release_of_never_acquired_serial_is_a_no_op() {
    let (_, mut manager) = manager_with(&["5VX-0001"]);
    manager.release("5VX-0001", None).unwrap();
    manager.release("WHO-KNOWS", None).unwrap();
}

#[test]
fn transport_failure_forces_reinit() {
    let (devices, mut manager) = manager_with(&["5VX-0001"]);
    let session = manager.acquire("", Modality::Tof).unwrap();
    let mut depth = vec![0u16; TOF_DEPTH_PIXELS];
    let mut ir = vec![0u16; TOF_DEPTH_PIXELS];

    devices[0].set_transport_failure(true);
    assert!(matches!(
        session.tof_query_frame(&mut depth, &mut ir),
        Err(Voxel3dError::TransportFailure(_))
    ));
    // The engine dropped back to Uninit, so the next call is NotInitialized.
    assert!(matches!(
        session.tof_query_frame(&mut depth, &mut ir),
        Err(Voxel3dError::NotInitialized { .. })
    ));

    // Re-init through the manager recovers the session.
    devices[0].set_transport_failure(false);
    let session = manager.acquire("", Modality::Tof).unwrap();
    assert_eq!(session.tof_query_frame(&mut depth, &mut ir).unwrap(), 0);
}

#[test]
fn fw_readers_require_active_tof_session() {
    let (_, mut manager) = manager_with(&["5VX-0001"]);
    let session = manager.acquire("", Modality::Rgb).unwrap();
    assert!(matches!(
        session.fw_version(),
        Err(Voxel3dError::NotInitialized { .. })
    ));

    let session = manager.acquire("", Modality::Tof).unwrap();
    assert_eq!(session.fw_version().unwrap(), "v2.1.0");
    assert_eq!(session.fw_build_date().unwrap(), "2025-03-02");
}

#[test]
fn imu_reads_only_while_tof_is_active() {
    let (devices, mut manager) = manager_with(&["5VX-0001"]);
    let session = manager.acquire("", Modality::Rgb).unwrap();
    assert!(matches!(
        session.read_imu(),
        Err(Voxel3dError::NotInitialized { .. })
    ));

    let session = manager.acquire("", Modality::Tof).unwrap();
    assert_eq!(session.read_imu().unwrap(), None);

    // Only the most recent sample is retained.
    devices[0].push_imu_sample(1000, [0.0, 0.0, 1.0], [0.0; 3]);
    devices[0].push_imu_sample(2000, [0.0, 0.0, 0.98], [0.1, 0.0, 0.0]);
    let sample = session.read_imu().unwrap().unwrap();
    assert_eq!(sample.timestamp_us, 2000);
    assert_eq!(sample.gyro[0], 0.1);
    assert_eq!(session.read_imu().unwrap(), None);
}
