//! RGB engine.
//!
//! Same `Uninit -> Ready -> Streaming` shape as the ToF engine, minus the
//! confidence/exposure controls. Output geometry follows the session's
//! rectify mode: native 1920x1080x3 normally, 640x480x3 when RGB2TOF is
//! active.

use crate::protocol;
use crate::rectify::{resample_rgb, RectifyCoordinator};
use crate::tof::{advance_frame_count, EngineState};
use crate::transport::{ControlLink, StreamKind};
use crate::types::{CameraInfo, Extrinsics, RectifyMode, RGB_HEIGHT, RGB_PIXELS, RGB_WIDTH,
    TOF_DEPTH_PIXELS};
use crate::{Result, Voxel3dError};

pub struct RgbEngine {
    serial: String,
    link: ControlLink,
    state: EngineState,
    camera_info: Option<CameraInfo>,
    extrinsics: Option<Extrinsics>,
    frame_count: u32,
}

impl RgbEngine {
    pub(crate) fn new(serial: String, link: ControlLink) -> Self {
        Self {
            serial,
            link,
            state: EngineState::Uninit,
            camera_info: None,
            extrinsics: None,
            frame_count: 0,
        }
    }

    pub(crate) fn state(&self) -> EngineState {
        self.state
    }

    fn require_init(&self) -> Result<()> {
        if self.state == EngineState::Uninit {
            return Err(Voxel3dError::not_initialized(&self.serial, "RGB"));
        }
        Ok(())
    }

    fn checked<T>(&mut self, op: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        match op(self) {
            Err(e @ Voxel3dError::TransportFailure(_)) => {
                log::warn!("RGB transport failure on '{}': {}", self.serial, e);
                self.reset();
                Err(e)
            }
            other => other,
        }
    }

    pub fn init(&mut self) -> Result<()> {
        if self.state != EngineState::Uninit {
            return Ok(());
        }
        self.camera_info = Some(self.link.read_camera_info(protocol::CMD_CAMERA_INFO_RGB)?);
        self.extrinsics = Some(self.link.read_extrinsics(protocol::CMD_EXTRINSICS_RGB)?);
        self.state = EngineState::Ready;
        log::info!("RGB init on '{}'", self.serial);
        Ok(())
    }

    /// Poll for the next RGB frame. Returns 0 when nothing is queued.
    ///
    /// `tof_info` is the ToF intrinsics of the same session, required only
    /// while RGB2TOF is active.
    pub fn query_frame(
        &mut self,
        out: &mut [u8],
        rectify: &mut RectifyCoordinator,
        tof_info: Option<CameraInfo>,
    ) -> Result<u32> {
        self.require_init()?;
        let rectified = rectify.mode() == RectifyMode::Rgb2Tof;
        let expected = if rectified {
            TOF_DEPTH_PIXELS * 3
        } else {
            RGB_PIXELS * 3
        };
        if out.len() != expected {
            return Err(Voxel3dError::InvalidParameter(format!(
                "RGB buffer is {} bytes, current mode needs {}",
                out.len(),
                expected
            )));
        }

        if self.state == EngineState::Ready {
            self.checked(|e| e.link.stream_start(StreamKind::Rgb))?;
            self.state = EngineState::Streaming;
        }

        let packet = match self.checked(|e| e.link.poll_stream(StreamKind::Rgb))? {
            Some(packet) => packet,
            None => return Ok(0),
        };
        let (_, payload) = protocol::parse_rgb_frame(&packet)?;

        if rectified {
            let tof = tof_info
                .ok_or_else(|| Voxel3dError::not_initialized(&self.serial, "ToF"))?;
            let (info, ext) = match (self.camera_info, self.extrinsics) {
                (Some(info), Some(ext)) => (info, ext),
                _ => return Err(Voxel3dError::not_initialized(&self.serial, "RGB")),
            };
            let map = rectify.map_for(RectifyMode::Rgb2Tof, &tof, &info, &ext, RGB_WIDTH, RGB_HEIGHT);
            resample_rgb(map, payload, out);
        } else {
            out.copy_from_slice(payload);
        }

        self.frame_count = advance_frame_count(self.frame_count);
        Ok(self.frame_count)
    }

    pub fn camera_info(&self) -> Result<CameraInfo> {
        self.require_init()?;
        self.camera_info
            .ok_or_else(|| Voxel3dError::not_initialized(&self.serial, "RGB"))
    }

    fn reset(&mut self) {
        self.state = EngineState::Uninit;
        self.camera_info = None;
        self.extrinsics = None;
    }

    /// Idempotent; safe at any state.
    pub fn release(&mut self) {
        if self.state == EngineState::Streaming {
            if let Err(e) = self.link.stream_stop(StreamKind::Rgb) {
                log::warn!("RGB stream stop on '{}' failed: {}", self.serial, e);
            }
        }
        self.reset();
    }
}
