//! Session ownership and lifecycle.
//!
//! The [`SessionManager`] is the only registry of live device state: a map
//! from serial number to one [`DeviceSession`] holding the per-modality
//! engines, the rectify coordinator, and the firmware upgrader, all behind a
//! per-session mutex. The empty-serial convention of the C API ("" means the
//! first scanned device) is resolved here.

use crate::firmware::{FirmwareUpgrader, ProgressFn, UpgradeStatus};
use crate::protocol;
use crate::rectify::RectifyCoordinator;
use crate::registry::DeviceRegistry;
use crate::rgb::RgbEngine;
use crate::thermal::ThermalEngine;
use crate::tof::{EngineState, ToFEngine};
use crate::transport::{Backend, ControlLink, StreamKind};
use crate::types::{
    CameraInfo, DeviceInfo, ImuSample, Modality, RectifyMode, UpgradeState, MAX_PRODUCT_SN_LEN,
};
use crate::{Result, Voxel3dError};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Per-device state: engines share one transport through [`ControlLink`].
pub struct DeviceSession {
    serial: String,
    link: ControlLink,
    tof: ToFEngine,
    rgb: RgbEngine,
    thermal: ThermalEngine,
    rectify: RectifyCoordinator,
    firmware: FirmwareUpgrader,
}

impl DeviceSession {
    fn new(serial: String, link: ControlLink) -> Self {
        Self {
            tof: ToFEngine::new(serial.clone(), link.clone()),
            rgb: RgbEngine::new(serial.clone(), link.clone()),
            thermal: ThermalEngine::new(serial.clone(), link.clone()),
            rectify: RectifyCoordinator::new(),
            firmware: FirmwareUpgrader::new(serial.clone(), link.clone()),
            link,
            serial,
        }
    }

    fn all_released(&self) -> bool {
        self.tof.state() == EngineState::Uninit
            && self.rgb.state() == EngineState::Uninit
            && self.thermal.state() == EngineState::Uninit
    }

    fn any_streaming(&self) -> bool {
        self.tof.state() == EngineState::Streaming
            || self.rgb.state() == EngineState::Streaming
            || self.thermal.state() == EngineState::Streaming
    }
}

/// Cloneable handle to one device session. Every method serializes against
/// the session mutex, so concurrent callers cannot interleave transport
/// traffic (firmware polling is the one lock-free exception).
#[derive(Clone)]
pub struct Session {
    serial: String,
    inner: Arc<Mutex<DeviceSession>>,
    fw_status: Arc<UpgradeStatus>,
}

// The engines behind the mutex carry no useful Debug output; the serial is
// what identifies a session.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("serial", &self.serial)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Serial number this session is bound to.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    fn lock(&self) -> Result<MutexGuard<'_, DeviceSession>> {
        self.inner
            .lock()
            .map_err(|_| Voxel3dError::TransportFailure("session mutex poisoned".into()))
    }

    // -- ToF --

    pub fn tof_query_frame(&self, depth: &mut [u16], ir: &mut [u16]) -> Result<u32> {
        self.lock()?.tof.query_frame(depth, ir)
    }

    pub fn tof_generate_point_cloud(&self, depth: &[u16], xyz: &mut [f32]) -> Result<usize> {
        self.lock()?.tof.generate_point_cloud(depth, xyz)
    }

    pub fn tof_camera_info(&self) -> Result<CameraInfo> {
        self.lock()?.tof.camera_info()
    }

    pub fn tof_conf_threshold(&self) -> Result<u16> {
        self.lock()?.tof.conf_threshold()
    }

    pub fn tof_set_conf_threshold(&self, threshold: u16) -> Result<()> {
        self.lock()?.tof.set_conf_threshold(threshold)
    }

    pub fn tof_set_auto_exposure_mode(&self, enable: bool) -> Result<()> {
        self.lock()?.tof.set_auto_exposure_mode(enable)
    }

    pub fn tof_depth_hfov(&self) -> Result<f32> {
        self.lock()?.tof.depth_hfov()
    }

    pub fn tof_depth_vfov(&self) -> Result<f32> {
        self.lock()?.tof.depth_vfov()
    }

    // -- RGB / thermal --

    pub fn rgb_query_frame(&self, out: &mut [u8]) -> Result<u32> {
        let mut guard = self.lock()?;
        let DeviceSession {
            tof, rgb, rectify, ..
        } = &mut *guard;
        rgb.query_frame(out, rectify, tof.camera_info_opt())
    }

    pub fn rgb_camera_info(&self) -> Result<CameraInfo> {
        self.lock()?.rgb.camera_info()
    }

    pub fn thermal_query_frame(&self, out: &mut [f32]) -> Result<u32> {
        let mut guard = self.lock()?;
        let DeviceSession {
            tof,
            thermal,
            rectify,
            ..
        } = &mut *guard;
        thermal.query_frame(out, rectify, tof.camera_info_opt())
    }

    pub fn thermal_camera_info(&self) -> Result<CameraInfo> {
        self.lock()?.thermal.camera_info()
    }

    // -- Session-wide controls --

    /// Select the alignment mode. A non-`None` mode implicitly clears the
    /// other one; takes effect on the next frame query.
    pub fn set_rectify_mode(&self, mode: RectifyMode) -> Result<()> {
        self.lock()?.rectify.set_mode(mode);
        Ok(())
    }

    pub fn rectify_mode(&self) -> Result<RectifyMode> {
        Ok(self.lock()?.rectify.mode())
    }

    /// Read the most recent IMU sample, if any is queued. Only valid while
    /// the ToF session is active; the stream is not buffered beyond the
    /// newest sample.
    pub fn read_imu(&self) -> Result<Option<ImuSample>> {
        let guard = self.lock()?;
        if guard.tof.state() == EngineState::Uninit {
            return Err(Voxel3dError::not_initialized(&guard.serial, "ToF"));
        }
        let mut latest = None;
        while let Some(packet) = guard.link.poll_stream(StreamKind::Imu)? {
            latest = Some(packet);
        }
        match latest {
            Some(packet) => Ok(Some(protocol::parse_imu_packet(&packet)?)),
            None => Ok(None),
        }
    }

    /// Device firmware version string. Requires an active ToF session.
    pub fn fw_version(&self) -> Result<String> {
        let guard = self.lock()?;
        if guard.tof.state() == EngineState::Uninit {
            return Err(Voxel3dError::not_initialized(&guard.serial, "ToF"));
        }
        guard.link.read_fw_version()
    }

    /// Device firmware build date string. Requires an active ToF session.
    pub fn fw_build_date(&self) -> Result<String> {
        let guard = self.lock()?;
        if guard.tof.state() == EngineState::Uninit {
            return Err(Voxel3dError::not_initialized(&guard.serial, "ToF"));
        }
        guard.link.read_fw_build_date()
    }

    // -- Firmware upgrade --

    /// Transfer a firmware image to the device.
    ///
    /// Mutually exclusive with frame streaming: fails fast with
    /// `UpgradeRejected` while any modality is streaming, leaving the
    /// streams untouched. See [`crate::firmware`] for the state machine.
    pub fn fw_upgrade(&self, image: &[u8], progress: Option<ProgressFn<'_>>) -> Result<()> {
        let mut guard = self.lock()?;
        if guard.any_streaming() {
            return Err(Voxel3dError::UpgradeRejected(
                "frame streaming is active; release or stop streams first".into(),
            ));
        }
        guard.firmware.upgrade(image, progress)
    }

    /// Read a firmware image from disk and transfer it.
    pub fn fw_upgrade_file(
        &self,
        path: impl AsRef<Path>,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<()> {
        let image = std::fs::read(path.as_ref()).map_err(|e| {
            Voxel3dError::UpgradeRejected(format!(
                "cannot read image '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;
        self.fw_upgrade(&image, progress)
    }

    /// Poll the upgrade state without taking the session lock, so it works
    /// from another thread while a transfer is in flight.
    pub fn fw_upgrade_state(&self) -> (UpgradeState, u32) {
        self.fw_status.snapshot()
    }
}

/// Owns every live [`DeviceSession`], keyed by serial number.
pub struct SessionManager {
    registry: DeviceRegistry,
    last_scan: Vec<DeviceInfo>,
    sessions: HashMap<String, Session>,
}

impl SessionManager {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            registry: DeviceRegistry::new(backend),
            last_scan: Vec::new(),
            sessions: HashMap::new(),
        }
    }

    /// Scan for attached devices and remember the result for empty-serial
    /// resolution.
    pub fn scan(&mut self) -> Result<Vec<DeviceInfo>> {
        let devices = self.registry.scan()?;
        self.last_scan = devices.clone();
        Ok(devices)
    }

    /// Resolve an empty-or-exact serial number against the most recent scan.
    /// Scans first if no scan has happened yet.
    pub fn resolve(&mut self, serial: &str) -> Result<String> {
        if serial.len() > MAX_PRODUCT_SN_LEN {
            return Err(Voxel3dError::InvalidParameter(format!(
                "serial number exceeds {} bytes",
                MAX_PRODUCT_SN_LEN
            )));
        }
        if self.last_scan.is_empty() {
            self.last_scan = self.registry.scan()?;
        }
        if serial.is_empty() {
            // First scanned device by convention.
            return match self.last_scan.first() {
                Some(device) => Ok(device.serial.clone()),
                None => Err(Voxel3dError::device_not_found("")),
            };
        }
        if self.last_scan.iter().any(|d| d.serial == serial) {
            Ok(serial.to_string())
        } else {
            Err(Voxel3dError::device_not_found(serial))
        }
    }

    /// Acquire a session for `(serial, modality)`, initializing the modality
    /// engine. Idempotent: re-acquiring an active modality returns the
    /// existing session.
    pub fn acquire(&mut self, serial: &str, modality: Modality) -> Result<Session> {
        let resolved = self.resolve(serial)?;

        if !self.sessions.contains_key(&resolved) {
            let transport = self.registry.backend().open(&resolved)?;
            let inner = DeviceSession::new(resolved.clone(), ControlLink::new(transport));
            let fw_status = inner.firmware.status_handle();
            self.sessions.insert(
                resolved.clone(),
                Session {
                    serial: resolved.clone(),
                    inner: Arc::new(Mutex::new(inner)),
                    fw_status,
                },
            );
            log::info!("Opened session for '{}'", resolved);
        }

        // Presence guaranteed by the insert above.
        let session = match self.sessions.get(&resolved) {
            Some(s) => s.clone(),
            None => return Err(Voxel3dError::device_not_found(&resolved)),
        };

        {
            let mut guard = session.lock()?;
            match modality {
                Modality::Tof => guard.tof.init()?,
                Modality::Rgb => guard.rgb.init()?,
                Modality::Thermal => guard.thermal.init()?,
            }
            // Fresh calibration may differ from what a cached map was built
            // against.
            guard.rectify.invalidate();
        }
        Ok(session)
    }

    /// Look up an existing session without initializing anything.
    pub fn session(&mut self, serial: &str) -> Result<Session> {
        let resolved = self.resolve(serial)?;
        self.sessions
            .get(&resolved)
            .cloned()
            .ok_or_else(|| Voxel3dError::not_initialized(&resolved, "device"))
    }

    /// Release one modality, or every modality when `modality` is `None`.
    /// No-op for serials without a live session.
    pub fn release(&mut self, serial: &str, modality: Option<Modality>) -> Result<()> {
        let resolved = match self.resolve(serial) {
            Ok(resolved) => resolved,
            // Releasing something that was never acquired is a no-op.
            Err(_) => return Ok(()),
        };
        let Some(session) = self.sessions.get(&resolved) else {
            return Ok(());
        };

        let drop_entry = {
            let mut guard = session.lock()?;
            match modality {
                Some(Modality::Tof) => guard.tof.release(),
                Some(Modality::Rgb) => guard.rgb.release(),
                Some(Modality::Thermal) => guard.thermal.release(),
                None => {
                    guard.tof.release();
                    guard.rgb.release();
                    guard.thermal.release();
                }
            }
            guard.all_released()
        };

        if drop_entry {
            self.sessions.remove(&resolved);
            log::info!("Closed session for '{}'", resolved);
        }
        Ok(())
    }
}
