//! ToF depth/IR engine.
//!
//! Per-session state machine `Uninit -> Ready -> Streaming`. `init` reads the
//! factory intrinsics and writes the device defaults (confidence threshold,
//! auto exposure); the device forgets both on power cycle, so cached values
//! are never trusted across a re-open. Frame polling is non-blocking: 0 means
//! no new frame was queued since the last call.

use crate::protocol;
use crate::transport::{ControlLink, StreamKind};
use crate::types::{
    CameraInfo, MAX_CONF_THRESHOLD, TOF_DEPTH_HEIGHT, TOF_DEPTH_PIXELS, TOF_DEPTH_WIDTH,
    TOF_IR_PIXELS,
};
use crate::{Result, Voxel3dError};

/// Device default confidence threshold, written on every init.
pub const DEFAULT_CONF_THRESHOLD: u16 = 20;
/// Device default auto-exposure mode, written on every init.
pub const DEFAULT_AUTO_EXPOSURE: bool = true;

/// Undistortion iterations for the inverse rational model.
const UNDISTORT_ITERATIONS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EngineState {
    Uninit,
    Ready,
    Streaming,
}

pub struct ToFEngine {
    serial: String,
    link: ControlLink,
    state: EngineState,
    camera_info: Option<CameraInfo>,
    conf_threshold: u16,
    frame_count: u32,
    /// Per-pixel undistorted unit-depth ray (x, y), built on first use.
    rays: Option<Vec<[f32; 2]>>,
}

impl ToFEngine {
    pub(crate) fn new(serial: String, link: ControlLink) -> Self {
        Self {
            serial,
            link,
            state: EngineState::Uninit,
            camera_info: None,
            conf_threshold: DEFAULT_CONF_THRESHOLD,
            frame_count: 0,
            rays: None,
        }
    }

    pub(crate) fn state(&self) -> EngineState {
        self.state
    }

    fn require_init(&self) -> Result<()> {
        if self.state == EngineState::Uninit {
            return Err(Voxel3dError::not_initialized(&self.serial, "ToF"));
        }
        Ok(())
    }

    /// `Uninit -> Ready`. Re-initializing an active engine is a no-op.
    pub fn init(&mut self) -> Result<()> {
        if self.state != EngineState::Uninit {
            return Ok(());
        }
        let info = self.link.read_camera_info(protocol::CMD_CAMERA_INFO_TOF)?;
        self.link.set_conf_threshold(DEFAULT_CONF_THRESHOLD)?;
        self.link.set_auto_exposure(DEFAULT_AUTO_EXPOSURE)?;
        self.camera_info = Some(info);
        self.conf_threshold = DEFAULT_CONF_THRESHOLD;
        self.rays = None;
        self.state = EngineState::Ready;
        log::info!("ToF init on '{}': fx={:.1} fy={:.1}", self.serial,
            info.focal_length_fx, info.focal_length_fy);
        Ok(())
    }

    /// Poll for the next depth/IR frame.
    ///
    /// Returns 0 when the device has queued nothing since the last call, in
    /// which case the output buffers are left untouched. Otherwise fills both
    /// buffers and returns a frame counter that increases monotonically,
    /// wraps at `u32::MAX`, and is never 0. Depth pixels whose confidence is
    /// below the configured threshold read as 0.
    pub fn query_frame(&mut self, depth: &mut [u16], ir: &mut [u16]) -> Result<u32> {
        self.require_init()?;
        if depth.len() != TOF_DEPTH_PIXELS {
            return Err(Voxel3dError::InvalidParameter(format!(
                "depth buffer holds {} pixels, need {}",
                depth.len(),
                TOF_DEPTH_PIXELS
            )));
        }
        if ir.len() != TOF_IR_PIXELS {
            return Err(Voxel3dError::InvalidParameter(format!(
                "IR buffer holds {} pixels, need {}",
                ir.len(),
                TOF_IR_PIXELS
            )));
        }

        if self.state == EngineState::Ready {
            self.checked(|e| e.link.stream_start(StreamKind::Tof))?;
            self.state = EngineState::Streaming;
        }

        let packet = match self.checked(|e| e.link.poll_stream(StreamKind::Tof))? {
            Some(packet) => packet,
            None => return Ok(0),
        };

        let planes = protocol::parse_tof_frame(&packet)?;
        let threshold = self.conf_threshold;
        for i in 0..TOF_DEPTH_PIXELS {
            let d = protocol::read_u16_le(planes.depth, i * 2);
            let c = protocol::read_u16_le(planes.confidence, i * 2);
            depth[i] = if c < threshold { 0 } else { d };
            ir[i] = protocol::read_u16_le(planes.ir, i * 2);
        }

        self.frame_count = advance_frame_count(self.frame_count);
        Ok(self.frame_count)
    }

    /// Run a transport operation; a transport failure mid-session forces the
    /// engine back to `Uninit` (the caller must re-init).
    fn checked<T>(&mut self, op: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        match op(self) {
            Err(e @ Voxel3dError::TransportFailure(_)) => {
                log::warn!("ToF transport failure on '{}': {}", self.serial, e);
                self.reset();
                Err(e)
            }
            other => other,
        }
    }

    /// Project a depth frame into metric (x, y, z) triplets.
    ///
    /// Zero-depth pixels map to (0, 0, 0) and are excluded from the returned
    /// count. Depth is millimeters on the wire; output is meters.
    pub fn generate_point_cloud(&mut self, depth: &[u16], xyz: &mut [f32]) -> Result<usize> {
        self.require_init()?;
        if depth.len() != TOF_DEPTH_PIXELS || xyz.len() != TOF_DEPTH_PIXELS * 3 {
            return Err(Voxel3dError::InvalidParameter(format!(
                "point cloud buffers: depth {} / xyz {} (need {} / {})",
                depth.len(),
                xyz.len(),
                TOF_DEPTH_PIXELS,
                TOF_DEPTH_PIXELS * 3
            )));
        }
        let info = self
            .camera_info
            .ok_or_else(|| Voxel3dError::not_initialized(&self.serial, "ToF"))?;
        let rays = self.rays.get_or_insert_with(|| build_ray_table(&info));

        let mut count = 0usize;
        for (i, &d) in depth.iter().enumerate() {
            let out = &mut xyz[i * 3..i * 3 + 3];
            if d == 0 {
                out.fill(0.0);
                continue;
            }
            let z = d as f32 * 1e-3;
            out[0] = rays[i][0] * z;
            out[1] = rays[i][1] * z;
            out[2] = z;
            count += 1;
        }
        Ok(count)
    }

    /// Read the current confidence threshold from the device register.
    pub fn conf_threshold(&mut self) -> Result<u16> {
        self.require_init()?;
        self.checked(|e| e.link.get_conf_threshold())
    }

    /// Set the confidence threshold (0..=4095). Out-of-range values fail
    /// without touching the stored threshold.
    pub fn set_conf_threshold(&mut self, threshold: u16) -> Result<()> {
        self.require_init()?;
        if threshold > MAX_CONF_THRESHOLD {
            return Err(Voxel3dError::InvalidParameter(format!(
                "confidence threshold {} exceeds {}",
                threshold, MAX_CONF_THRESHOLD
            )));
        }
        self.checked(|e| e.link.set_conf_threshold(threshold))?;
        self.conf_threshold = threshold;
        Ok(())
    }

    /// Toggle device-side auto exposure.
    pub fn set_auto_exposure_mode(&mut self, enable: bool) -> Result<()> {
        self.require_init()?;
        self.checked(|e| e.link.set_auto_exposure(enable))
    }

    pub fn camera_info(&self) -> Result<CameraInfo> {
        self.require_init()?;
        self.camera_info
            .ok_or_else(|| Voxel3dError::not_initialized(&self.serial, "ToF"))
    }

    pub(crate) fn camera_info_opt(&self) -> Option<CameraInfo> {
        match self.state {
            EngineState::Uninit => None,
            _ => self.camera_info,
        }
    }

    /// Horizontal field of view in radians, derived from the intrinsics.
    pub fn depth_hfov(&self) -> Result<f32> {
        let info = self.camera_info()?;
        Ok(fov(TOF_DEPTH_WIDTH, info.focal_length_fx))
    }

    /// Vertical field of view in radians, derived from the intrinsics.
    pub fn depth_vfov(&self) -> Result<f32> {
        let info = self.camera_info()?;
        Ok(fov(TOF_DEPTH_HEIGHT, info.focal_length_fy))
    }

    fn reset(&mut self) {
        self.state = EngineState::Uninit;
        self.camera_info = None;
        self.rays = None;
    }

    /// `* -> Uninit`. Safe to call at any state, any number of times.
    pub fn release(&mut self) {
        if self.state == EngineState::Streaming {
            if let Err(e) = self.link.stream_stop(StreamKind::Tof) {
                log::warn!("ToF stream stop on '{}' failed: {}", self.serial, e);
            }
        }
        if self.state != EngineState::Uninit {
            log::info!("ToF released on '{}'", self.serial);
        }
        self.reset();
    }
}

fn fov(dimension: usize, focal_length: f32) -> f32 {
    2.0 * (dimension as f32 / (2.0 * focal_length)).atan()
}

/// Next frame counter value. Wraps at `u32::MAX` and skips 0, which is
/// reserved for "no new frame".
pub(crate) fn advance_frame_count(count: u32) -> u32 {
    match count.wrapping_add(1) {
        0 => 1,
        n => n,
    }
}

/// Undistort one pixel into a normalized unit-depth ray using the inverse of
/// the rational distortion model (fixed-point iteration).
pub(crate) fn undistort_pixel(info: &CameraInfo, u: f32, v: f32) -> [f32; 2] {
    let xd = (u - info.principal_point_cx) / info.focal_length_fx;
    let yd = (v - info.principal_point_cy) / info.focal_length_fy;
    let (mut x, mut y) = (xd, yd);
    for _ in 0..UNDISTORT_ITERATIONS {
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let num = 1.0 + info.k1 * r2 + info.k2 * r4 + info.k3 * r6;
        let den = 1.0 + info.k4 * r2 + info.k5 * r4 + info.k6 * r6;
        if num.abs() < f32::EPSILON {
            break;
        }
        let icdist = den / num;
        let dx = 2.0 * info.p1 * x * y + info.p2 * (r2 + 2.0 * x * x);
        let dy = info.p1 * (r2 + 2.0 * y * y) + 2.0 * info.p2 * x * y;
        x = (xd - dx) * icdist;
        y = (yd - dy) * icdist;
    }
    [x, y]
}

/// Forward rational distortion: normalized ray -> distorted normalized
/// coordinates. Used by the rectify map builder.
pub(crate) fn distort_point(info: &CameraInfo, x: f32, y: f32) -> [f32; 2] {
    let r2 = x * x + y * y;
    let r4 = r2 * r2;
    let r6 = r4 * r2;
    let num = 1.0 + info.k1 * r2 + info.k2 * r4 + info.k3 * r6;
    let den = 1.0 + info.k4 * r2 + info.k5 * r4 + info.k6 * r6;
    let radial = if den.abs() < f32::EPSILON { 1.0 } else { num / den };
    [
        x * radial + 2.0 * info.p1 * x * y + info.p2 * (r2 + 2.0 * x * x),
        y * radial + info.p1 * (r2 + 2.0 * y * y) + 2.0 * info.p2 * x * y,
    ]
}

fn build_ray_table(info: &CameraInfo) -> Vec<[f32; 2]> {
    let mut rays = Vec::with_capacity(TOF_DEPTH_PIXELS);
    for v in 0..TOF_DEPTH_HEIGHT {
        for u in 0..TOF_DEPTH_WIDTH {
            rays.push(undistort_pixel(info, u as f32, v as f32));
        }
    }
    rays
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pinhole() -> CameraInfo {
        CameraInfo {
            focal_length_fx: 500.0,
            focal_length_fy: 500.0,
            principal_point_cx: 319.5,
            principal_point_cy: 239.5,
            k1: 0.0,
            k2: 0.0,
            p1: 0.0,
            p2: 0.0,
            k3: 0.0,
            k4: 0.0,
            k5: 0.0,
            k6: 0.0,
        }
    }

    #[test]
    fn undistort_is_identity_without_distortion() {
        let info = pinhole();
        let ray = undistort_pixel(&info, info.principal_point_cx, info.principal_point_cy);
        assert!(ray[0].abs() < 1e-6 && ray[1].abs() < 1e-6);

        let ray = undistort_pixel(&info, 419.5, 239.5);
        assert!((ray[0] - 0.2).abs() < 1e-6);
        assert!(ray[1].abs() < 1e-6);
    }

    #[test]
    fn undistort_inverts_distortion() {
        let mut info = pinhole();
        info.k1 = 0.08;
        info.k2 = -0.03;
        info.p1 = 0.001;
        info.p2 = -0.0015;

        // Round-trip a handful of rays through forward distortion and back.
        for &(x, y) in &[(0.0, 0.0), (0.1, -0.2), (-0.3, 0.25), (0.4, 0.4)] {
            let d = distort_point(&info, x, y);
            let u = info.focal_length_fx * d[0] + info.principal_point_cx;
            let v = info.focal_length_fy * d[1] + info.principal_point_cy;
            let back = undistort_pixel(&info, u, v);
            assert!((back[0] - x).abs() < 1e-3, "x: {} vs {}", back[0], x);
            assert!((back[1] - y).abs() < 1e-3, "y: {} vs {}", back[1], y);
        }
    }

    #[test]
    fn frame_counter_wraps_past_zero() {
        assert_eq!(advance_frame_count(0), 1);
        assert_eq!(advance_frame_count(41), 42);
        assert_eq!(advance_frame_count(u32::MAX), 1);
    }

    #[test]
    fn fov_matches_closed_form() {
        let hfov = fov(640, 500.0);
        assert!((hfov - 2.0 * (0.64f32).atan()).abs() < 1e-6);
    }
}
