//! Firmware upgrade over the emulator: state machine, progress reporting,
//! rejection paths, streaming exclusivity.

use std::sync::Arc;
use voxel3d::emulator::{EmulatedBackend, EmulatedDevice};
use voxel3d::protocol::build_firmware_image;
use voxel3d::{
    Modality, Session, SessionManager, UpgradeState, Voxel3dError, TOF_DEPTH_PIXELS,
};

fn tof_session() -> (EmulatedDevice, SessionManager, Session) {
    let device = EmulatedDevice::new("5VX-0001");
    let mut manager = SessionManager::new(Arc::new(EmulatedBackend::new(vec![device.clone()])));
    let session = manager.acquire("", Modality::Tof).unwrap();
    (device, manager, session)
}

fn image(payload_len: usize) -> Vec<u8> {
    let payload: Vec<u8> = (0..payload_len).map(|i| (i % 251) as u8).collect();
    build_firmware_image("v3.0.0", "2025-08-01", &payload)
}

#[test]
fn successful_upgrade_reports_every_transition() {
    let (device, _manager, session) = tof_session();
    let image = image(10_000);

    let mut seen = Vec::new();
    let mut cb = |state: UpgradeState, percent: u32| seen.push((state, percent));
    session.fw_upgrade(&image, Some(&mut cb)).unwrap();

    // 10000 bytes in 4096-byte chunks: 40%, 81%, then 99% held until the
    // commit ack lands.
    assert_eq!(
        seen,
        vec![
            (UpgradeState::Downloading, 0),
            (UpgradeState::Downloading, 40),
            (UpgradeState::Downloading, 81),
            (UpgradeState::Downloading, 99),
            (UpgradeState::Complete, 100),
        ]
    );
    assert_eq!(device.fw_received_len(), 10_000);
    assert!(device.fw_committed());
    assert_eq!(session.fw_upgrade_state(), (UpgradeState::Complete, 100));
}

#[test]
fn upgrade_works_without_a_callback() {
    let (device, _manager, session) = tof_session();
    session.fw_upgrade(&image(4096), None).unwrap();
    assert!(device.fw_committed());
}

#[test]
fn malformed_image_is_rejected_before_state_changes() {
    let (device, _manager, session) = tof_session();
    assert_eq!(session.fw_upgrade_state(), (UpgradeState::Idle, 0));

    let err = session.fw_upgrade(b"not a firmware image", None).unwrap_err();
    assert!(matches!(err, Voxel3dError::UpgradeRejected(_)));
    assert_eq!(err.code(), -6);
    // Parse failure fires before the transfer: status untouched, no bytes.
    assert_eq!(session.fw_upgrade_state(), (UpgradeState::Idle, 0));
    assert_eq!(device.fw_received_len(), 0);

    // Corrupted payload fails the checksum.
    let mut corrupt = image(8192);
    let len = corrupt.len();
    corrupt[len - 10] ^= 0xFF;
    assert!(matches!(
        session.fw_upgrade(&corrupt, None),
        Err(Voxel3dError::UpgradeRejected(_))
    ));
    assert_eq!(session.fw_upgrade_state(), (UpgradeState::Idle, 0));
}

#[test]
fn device_nak_mid_transfer_lands_in_error_state() {
    let (device, _manager, session) = tof_session();
    device.reject_fw_after(1);

    let mut seen = Vec::new();
    let mut cb = |state: UpgradeState, percent: u32| seen.push((state, percent));
    let err = session.fw_upgrade(&image(10_000), Some(&mut cb)).unwrap_err();
    assert!(matches!(err, Voxel3dError::UpgradeRejected(_)));

    // One chunk landed (40%), the second was NAKed.
    assert_eq!(seen.last(), Some(&(UpgradeState::Error, 40)));
    assert_eq!(session.fw_upgrade_state(), (UpgradeState::Error, 40));
    assert!(!device.fw_committed());
}

#[test]
fn upgrade_is_rejected_while_streaming() {
    let (device, _manager, session) = tof_session();
    let depth_in = vec![100u16; TOF_DEPTH_PIXELS];
    let conf = vec![4095u16; TOF_DEPTH_PIXELS];
    device.push_tof_frame(&depth_in, &depth_in, &conf);

    let mut depth = vec![0u16; TOF_DEPTH_PIXELS];
    let mut ir = vec![0u16; TOF_DEPTH_PIXELS];
    assert_eq!(session.tof_query_frame(&mut depth, &mut ir).unwrap(), 1);

    let err = session.fw_upgrade(&image(4096), None).unwrap_err();
    assert!(matches!(err, Voxel3dError::UpgradeRejected(_)));
    assert_eq!(device.fw_received_len(), 0);

    // The stream survives the rejection.
    device.push_tof_frame(&depth_in, &depth_in, &conf);
    assert_eq!(session.tof_query_frame(&mut depth, &mut ir).unwrap(), 2);
}

#[test]
fn missing_image_file_is_a_rejection() {
    let (_device, _manager, session) = tof_session();
    let err = session
        .fw_upgrade_file("/nonexistent/fw.5vfw", None)
        .unwrap_err();
    assert!(matches!(err, Voxel3dError::UpgradeRejected(_)));
}

#[test]
fn status_handle_stays_valid_after_release() {
    let (device, mut manager, session) = tof_session();
    session.fw_upgrade(&image(4096), None).unwrap();
    assert!(device.fw_committed());

    manager.release("", None).unwrap();
    // Terminal state remains pollable from stale handles without a lock.
    assert_eq!(session.fw_upgrade_state(), (UpgradeState::Complete, 100));
}
