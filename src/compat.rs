//! Serial-number-keyed compatibility surface.
//!
//! Mirrors the classic `voxel3d_*` C API shape over a process-global
//! [`SessionManager`]: every function takes the device serial (empty string
//! selects the first scanned device) and returns the original three-way
//! integer convention: `>0` success/count, `0` no new data (frame queries
//! only), `<0` the stable error code from [`Voxel3dError::code`].
//!
//! Library consumers should prefer the typed [`crate::session`] API; this
//! module exists for ports of existing voxel3d callers.

use crate::firmware::ProgressFn;
use crate::session::{Session, SessionManager};
use crate::transport::Backend;
use crate::types::{
    CamResolution, CameraInfo, ImuSample, Modality, RectifyMode, UpgradeState,
    MAX_FW_BUILD_DATE_LEN, MAX_FW_VER_LEN, MAX_SUPPORTED_CAMERA_MODULE,
};
use crate::{Result, Voxel3dError};
use std::sync::{Arc, Mutex, OnceLock};

/// Scan result in the original header's shape, capped at
/// [`MAX_SUPPORTED_CAMERA_MODULE`] entries.
#[derive(Debug, Default)]
pub struct CamDevInfo {
    pub num_of_devices: i32,
    pub product_sn: Vec<String>,
    pub dev_name: Vec<String>,
    pub resolution: Vec<CamResolution>,
}

static MANAGER: OnceLock<Mutex<Option<SessionManager>>> = OnceLock::new();

fn slot() -> &'static Mutex<Option<SessionManager>> {
    MANAGER.get_or_init(|| Mutex::new(None))
}

/// Install the transport backend the global manager enumerates through.
/// Must be called once before any other function in this module.
pub fn install_backend(backend: Arc<dyn Backend>) {
    let mut guard = slot().lock().unwrap_or_else(|p| p.into_inner());
    *guard = Some(SessionManager::new(backend));
}

/// Tear down the global manager and every session it owns.
pub fn uninstall_backend() {
    let mut guard = slot().lock().unwrap_or_else(|p| p.into_inner());
    if let Some(manager) = guard.as_mut() {
        let _ = manager.release("", None);
    }
    *guard = None;
}

fn with<T>(f: impl FnOnce(&mut SessionManager) -> Result<T>) -> Result<T> {
    let mut guard = slot().lock().unwrap_or_else(|p| p.into_inner());
    let manager = guard
        .as_mut()
        .ok_or_else(|| Voxel3dError::TransportFailure("no backend installed".into()))?;
    f(manager)
}

fn session(serial: &str) -> Result<Session> {
    with(|m| m.session(serial))
}

fn code(result: Result<i32>) -> i32 {
    result.unwrap_or_else(|e| e.code())
}

fn frame_code(result: Result<u32>) -> i64 {
    match result {
        Ok(count) => count as i64,
        Err(e) => e.code() as i64,
    }
}

/// Scan for attached devices, filling `info`. Returns the device count, or
/// a negative code when none are found.
pub fn scan(info: &mut CamDevInfo) -> i32 {
    *info = CamDevInfo::default();
    code(with(|m| {
        let devices = m.scan()?;
        for device in devices.iter().take(MAX_SUPPORTED_CAMERA_MODULE) {
            info.product_sn.push(device.serial.clone());
            info.dev_name.push(device.name.clone());
            info.resolution.push(device.resolution);
        }
        info.num_of_devices = info.product_sn.len() as i32;
        Ok(info.num_of_devices)
    }))
}

fn init(serial: &str, modality: Modality) -> i32 {
    code(with(|m| m.acquire(serial, modality).map(|_| 1)))
}

fn release(serial: &str, modality: Option<Modality>) {
    let _ = with(|m| m.release(serial, modality));
}

pub fn tof_init(serial: &str) -> i32 {
    init(serial, Modality::Tof)
}

/// Returns the frame count (`1..=u32::MAX` widened to i64), 0 when no new
/// frame is queued, or a negative code.
pub fn tof_queryframe(serial: &str, depth: &mut [u16], ir: &mut [u16]) -> i64 {
    frame_code(session(serial).and_then(|s| s.tof_query_frame(depth, ir)))
}

pub fn tof_generate_pointcloud(serial: &str, depth: &[u16], xyz: &mut [f32]) -> i32 {
    code(session(serial).and_then(|s| s.tof_generate_point_cloud(depth, xyz).map(|n| n as i32)))
}

pub fn tof_release(serial: &str) {
    release(serial, Some(Modality::Tof));
}

pub fn rgb_init(serial: &str) -> i32 {
    init(serial, Modality::Rgb)
}

pub fn rgb_queryframe(serial: &str, rgb: &mut [u8]) -> i64 {
    frame_code(session(serial).and_then(|s| s.rgb_query_frame(rgb)))
}

pub fn rgb_release(serial: &str) {
    release(serial, Some(Modality::Rgb));
}

pub fn lepton3_init(serial: &str) -> i32 {
    init(serial, Modality::Thermal)
}

pub fn lepton3_queryframe(serial: &str, thermal: &mut [f32]) -> i64 {
    frame_code(session(serial).and_then(|s| s.thermal_query_frame(thermal)))
}

pub fn lepton3_release(serial: &str) {
    release(serial, Some(Modality::Thermal));
}

/// Release every modality of the device in one shot.
pub fn release_all(serial: &str) {
    release(serial, None);
}

/// Returns 1 and fills `imu` when a sample is available, 0 when none is
/// queued, or a negative code.
pub fn read_imu_data(serial: &str, imu: &mut ImuSample) -> i32 {
    code(session(serial).and_then(|s| s.read_imu()).map(|sample| match sample {
        Some(sample) => {
            *imu = sample;
            1
        }
        None => 0,
    }))
}

pub fn tof_read_camera_info(serial: &str, info: &mut CameraInfo) -> i32 {
    code(session(serial).and_then(|s| s.tof_camera_info()).map(|i| {
        *info = i;
        1
    }))
}

pub fn rgb_read_camera_info(serial: &str, info: &mut CameraInfo) -> i32 {
    code(session(serial).and_then(|s| s.rgb_camera_info()).map(|i| {
        *info = i;
        1
    }))
}

pub fn lepton3_read_camera_info(serial: &str, info: &mut CameraInfo) -> i32 {
    code(session(serial).and_then(|s| s.thermal_camera_info()).map(|i| {
        *info = i;
        1
    }))
}

/// Returns the current threshold (>= 0) or a negative code.
pub fn tof_get_conf_threshold(serial: &str) -> i32 {
    code(session(serial).and_then(|s| s.tof_conf_threshold()).map(|t| t as i32))
}

pub fn tof_set_conf_threshold(serial: &str, threshold: u32) -> i32 {
    code(session(serial).and_then(|s| {
        let threshold = u16::try_from(threshold).map_err(|_| {
            Voxel3dError::InvalidParameter(format!("confidence threshold {} out of range", threshold))
        })?;
        s.tof_set_conf_threshold(threshold)?;
        Ok(1)
    }))
}

pub fn tof_set_auto_exposure_mode(serial: &str, enable: u32) -> i32 {
    code(session(serial).and_then(|s| s.tof_set_auto_exposure_mode(enable != 0).map(|_| 1)))
}

/// Horizontal FoV in radians, or the error code cast to f32 (<= 0).
pub fn tof_get_depth_hfov(serial: &str) -> f32 {
    match session(serial).and_then(|s| s.tof_depth_hfov()) {
        Ok(fov) => fov,
        Err(e) => e.code() as f32,
    }
}

/// Vertical FoV in radians, or the error code cast to f32 (<= 0).
pub fn tof_get_depth_vfov(serial: &str) -> f32 {
    match session(serial).and_then(|s| s.tof_depth_vfov()) {
        Ok(fov) => fov,
        Err(e) => e.code() as f32,
    }
}

pub fn set_rectify_type(serial: &str, input_type: i32) -> i32 {
    code(session(serial).and_then(|s| {
        let mode = RectifyMode::from_code(input_type).ok_or_else(|| {
            Voxel3dError::InvalidParameter(format!("rectify type {} unknown", input_type))
        })?;
        s.set_rectify_mode(mode)?;
        Ok(1)
    }))
}

pub fn read_fw_version(serial: &str, out: &mut String) -> i32 {
    code(session(serial).and_then(|s| s.fw_version()).map(|mut v| {
        v.truncate(MAX_FW_VER_LEN - 1);
        *out = v;
        1
    }))
}

pub fn read_fw_build_date(serial: &str, out: &mut String) -> i32 {
    code(session(serial).and_then(|s| s.fw_build_date()).map(|mut v| {
        v.truncate(MAX_FW_BUILD_DATE_LEN - 1);
        *out = v;
        1
    }))
}

pub fn read_lib_version(out: &mut String) -> i32 {
    *out = crate::lib_version().to_string();
    1
}

pub fn read_lib_build_date(out: &mut String) -> i32 {
    *out = crate::lib_build_date().to_string();
    1
}

/// Transfer a firmware image file. The callback sees
/// `(state_code, percent_complete)` with the header's state codes.
pub fn dev_fw_upgrade(
    serial: &str,
    file_path: &str,
    mut callback: Option<&mut dyn FnMut(i32, u32)>,
) -> i32 {
    code(session(serial).and_then(|s| {
        let mut bridge = |state: UpgradeState, percent: u32| {
            if let Some(cb) = callback.as_mut() {
                cb(state.compat_code(), percent);
            }
        };
        let progress: ProgressFn<'_> = &mut bridge;
        s.fw_upgrade_file(file_path, Some(progress))?;
        Ok(1)
    }))
}

/// Poll the upgrade state. Returns 1 while a transfer is downloading,
/// negative otherwise; `state` then distinguishes never-started (0),
/// complete (2), and error (-1).
///
/// The idle return value -1 is inherited from the original header and
/// collides with the `DeviceNotFound` code; callers must consult `state`
/// (only written on a successful session lookup) to tell the two apart.
pub fn dev_fw_upgrade_state_poll(serial: &str, state: &mut i32, percent_complete: &mut u32) -> i32 {
    match session(serial) {
        Ok(s) => {
            let (upgrade_state, percent) = s.fw_upgrade_state();
            *state = upgrade_state.compat_code();
            *percent_complete = percent;
            if upgrade_state == UpgradeState::Downloading {
                1
            } else {
                -1
            }
        }
        Err(e) => e.code(),
    }
}
