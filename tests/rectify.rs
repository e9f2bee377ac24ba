//! Rectified frame delivery end to end: mode exclusivity, buffer geometry,
//! rectified content over identity extrinsics.

use std::sync::Arc;
use voxel3d::emulator::{EmulatedBackend, EmulatedDevice};
use voxel3d::{
    Modality, RectifyMode, Session, SessionManager, Voxel3dError, FLIR_PIXELS, RGB_PIXELS,
    TOF_DEPTH_PIXELS, TOF_DEPTH_WIDTH,
};

fn session_with(modalities: &[Modality]) -> (EmulatedDevice, SessionManager, Session) {
    let device = EmulatedDevice::new("5VX-0001");
    let mut manager = SessionManager::new(Arc::new(EmulatedBackend::new(vec![device.clone()])));
    let mut session = None;
    for &m in modalities {
        session = Some(manager.acquire("", m).unwrap());
    }
    let session = session.expect("at least one modality");
    (device, manager, session)
}

#[test]
fn modes_are_mutually_exclusive() {
    let (_, _, session) = session_with(&[Modality::Rgb]);
    session.set_rectify_mode(RectifyMode::Rgb2Tof).unwrap();
    assert_eq!(session.rectify_mode().unwrap(), RectifyMode::Rgb2Tof);

    // Selecting the other mode replaces it rather than stacking.
    session.set_rectify_mode(RectifyMode::Flir2Tof).unwrap();
    assert_eq!(session.rectify_mode().unwrap(), RectifyMode::Flir2Tof);

    session.set_rectify_mode(RectifyMode::None).unwrap();
    assert_eq!(session.rectify_mode().unwrap(), RectifyMode::None);
}

#[test]
fn rgb_buffer_geometry_follows_mode() {
    let (device, _, session) = session_with(&[Modality::Tof, Modality::Rgb]);
    let native = vec![42u8; RGB_PIXELS * 3];

    // Native mode wants the full 1920x1080x3 buffer.
    device.push_rgb_frame(&native);
    let mut out = vec![0u8; RGB_PIXELS * 3];
    assert_eq!(session.rgb_query_frame(&mut out).unwrap(), 1);
    assert_eq!(out[0], 42);

    // RGB2TOF shrinks the expected buffer to the ToF grid; the native-size
    // buffer is now invalid and vice versa.
    session.set_rectify_mode(RectifyMode::Rgb2Tof).unwrap();
    assert!(matches!(
        session.rgb_query_frame(&mut out),
        Err(Voxel3dError::InvalidParameter(_))
    ));
    device.push_rgb_frame(&native);
    let mut rectified = vec![0u8; TOF_DEPTH_PIXELS * 3];
    assert_eq!(session.rgb_query_frame(&mut rectified).unwrap(), 2);

    // Back to None: the rectified buffer no longer fits.
    session.set_rectify_mode(RectifyMode::None).unwrap();
    assert!(matches!(
        session.rgb_query_frame(&mut rectified),
        Err(Voxel3dError::InvalidParameter(_))
    ));
    device.push_rgb_frame(&native);
    assert_eq!(session.rgb_query_frame(&mut out).unwrap(), 3);
}

#[test]
fn rectified_rgb_resamples_source_content() {
    let (device, _, session) = session_with(&[Modality::Tof, Modality::Rgb]);
    session.set_rectify_mode(RectifyMode::Rgb2Tof).unwrap();

    // Uniform source: every mapped destination pixel carries the source
    // value, while ToF rays outside the RGB frame read back 0. The
    // emulator's RGB camera has a narrower vertical field of view than the
    // ToF, so the top and bottom ToF rows fall outside it.
    let native = vec![42u8; RGB_PIXELS * 3];
    device.push_rgb_frame(&native);
    let mut out = vec![7u8; TOF_DEPTH_PIXELS * 3];
    assert_eq!(session.rgb_query_frame(&mut out).unwrap(), 1);
    let center = (240 * TOF_DEPTH_WIDTH + 320) * 3;
    assert_eq!(&out[center..center + 3], &[42, 42, 42]);
    assert_eq!(&out[0..3], &[0, 0, 0]);
    assert!(out.iter().all(|&b| b == 42 || b == 0));
}

#[test]
fn rectified_rgb_requires_tof_calibration() {
    let (device, _, session) = session_with(&[Modality::Rgb]);
    session.set_rectify_mode(RectifyMode::Rgb2Tof).unwrap();
    device.push_rgb_frame(&vec![0u8; RGB_PIXELS * 3]);
    let mut out = vec![0u8; TOF_DEPTH_PIXELS * 3];
    assert!(matches!(
        session.rgb_query_frame(&mut out),
        Err(Voxel3dError::NotInitialized { .. })
    ));
}

#[test]
fn rectified_thermal_resamples_onto_tof_grid() {
    let (device, _, session) = session_with(&[Modality::Tof, Modality::Thermal]);

    // Native first.
    let native = vec![300.25f32; FLIR_PIXELS];
    device.push_flir_frame(&native);
    let mut out = vec![0.0f32; FLIR_PIXELS];
    assert_eq!(session.thermal_query_frame(&mut out).unwrap(), 1);
    assert_eq!(out[0], 300.25);

    session.set_rectify_mode(RectifyMode::Flir2Tof).unwrap();
    device.push_flir_frame(&native);
    let mut rectified = vec![0.0f32; TOF_DEPTH_PIXELS];
    assert_eq!(session.thermal_query_frame(&mut rectified).unwrap(), 2);
    assert!(rectified.iter().all(|&v| v == 300.25));
}

#[test]
fn thermal_poll_without_frame_returns_zero() {
    let (_, _, session) = session_with(&[Modality::Thermal]);
    let mut out = vec![f32::NAN; FLIR_PIXELS];
    assert_eq!(session.thermal_query_frame(&mut out).unwrap(), 0);
    assert!(out[0].is_nan());
}
