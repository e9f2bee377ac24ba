//! Geometric alignment of secondary modalities onto the ToF pixel grid.
//!
//! One [`RectifyCoordinator`] per session holds the single active
//! [`RectifyMode`]; selecting a non-`None` mode implicitly clears the other
//! one. The resampling map is rebuilt lazily on the first rectified frame
//! after a mode or calibration change and cached afterwards.

use crate::tof::{distort_point, undistort_pixel};
use crate::types::{
    CameraInfo, Extrinsics, RectifyMode, TOF_DEPTH_HEIGHT, TOF_DEPTH_PIXELS, TOF_DEPTH_WIDTH,
};

/// Range assumed when reprojecting ToF rays into the source camera. The
/// secondary sensors sit millimeters from the ToF aperture, so a fixed
/// nominal range keeps the parallax error below a pixel.
const NOMINAL_RANGE_M: f32 = 1.0;

/// Nearest-neighbor source index per ToF pixel, or -1 when the ToF ray falls
/// outside the source frame.
pub(crate) struct RectifyMap {
    mode: RectifyMode,
    indices: Vec<i32>,
}

pub struct RectifyCoordinator {
    mode: RectifyMode,
    map: Option<RectifyMap>,
}

impl Default for RectifyCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl RectifyCoordinator {
    pub fn new() -> Self {
        Self {
            mode: RectifyMode::None,
            map: None,
        }
    }

    pub fn mode(&self) -> RectifyMode {
        self.mode
    }

    /// Select the alignment mode for the whole session. Any cached map is
    /// dropped; the replacement is built on the next rectified frame.
    pub fn set_mode(&mut self, mode: RectifyMode) {
        if self.mode != mode {
            log::info!("Rectify mode {:?} -> {:?}", self.mode, mode);
            self.mode = mode;
            self.map = None;
        }
    }

    /// Drop the cached map after a calibration change.
    pub(crate) fn invalidate(&mut self) {
        self.map = None;
    }

    /// Map for `mode`, building it from the calibration pair on first use.
    pub(crate) fn map_for(
        &mut self,
        mode: RectifyMode,
        tof: &CameraInfo,
        source: &CameraInfo,
        extrinsics: &Extrinsics,
        source_width: usize,
        source_height: usize,
    ) -> &RectifyMap {
        if matches!(&self.map, Some(map) if map.mode != mode) {
            self.map = None;
        }
        self.map.get_or_insert_with(|| {
            log::trace!("Building rectify map for {:?}", mode);
            build_map(mode, tof, source, extrinsics, source_width, source_height)
        })
    }
}

fn build_map(
    mode: RectifyMode,
    tof: &CameraInfo,
    source: &CameraInfo,
    extrinsics: &Extrinsics,
    source_width: usize,
    source_height: usize,
) -> RectifyMap {
    let r = &extrinsics.rotation;
    let t = &extrinsics.translation;
    let mut indices = Vec::with_capacity(TOF_DEPTH_PIXELS);

    for v in 0..TOF_DEPTH_HEIGHT {
        for u in 0..TOF_DEPTH_WIDTH {
            let ray = undistort_pixel(tof, u as f32, v as f32);
            // ToF-frame point at the nominal range.
            let p = [ray[0] * NOMINAL_RANGE_M, ray[1] * NOMINAL_RANGE_M, NOMINAL_RANGE_M];
            let q = [
                r[0][0] * p[0] + r[0][1] * p[1] + r[0][2] * p[2] + t[0],
                r[1][0] * p[0] + r[1][1] * p[1] + r[1][2] * p[2] + t[1],
                r[2][0] * p[0] + r[2][1] * p[1] + r[2][2] * p[2] + t[2],
            ];
            if q[2] <= 0.0 {
                indices.push(-1);
                continue;
            }
            let d = distort_point(source, q[0] / q[2], q[1] / q[2]);
            let us = source.focal_length_fx * d[0] + source.principal_point_cx;
            let vs = source.focal_length_fy * d[1] + source.principal_point_cy;
            let (us, vs) = (us.round() as i64, vs.round() as i64);
            if us < 0 || vs < 0 || us >= source_width as i64 || vs >= source_height as i64 {
                indices.push(-1);
            } else {
                indices.push((vs * source_width as i64 + us) as i32);
            }
        }
    }

    RectifyMap { mode, indices }
}

/// Resample a scalar source frame onto the ToF grid. Unmapped pixels read 0.
pub(crate) fn resample_scalar<T: Copy + Default>(map: &RectifyMap, source: &[T], out: &mut [T]) {
    for (dst, &idx) in out.iter_mut().zip(&map.indices) {
        *dst = if idx < 0 {
            T::default()
        } else {
            source[idx as usize]
        };
    }
}

/// Resample an interleaved 3-channel source frame onto the ToF grid.
pub(crate) fn resample_rgb(map: &RectifyMap, source: &[u8], out: &mut [u8]) {
    for (i, &idx) in map.indices.iter().enumerate() {
        let dst = &mut out[i * 3..i * 3 + 3];
        if idx < 0 {
            dst.fill(0);
        } else {
            let at = idx as usize * 3;
            dst.copy_from_slice(&source[at..at + 3]);
        }
    }
}
