//! FLIR Lepton 3.5 thermal engine.
//!
//! Native output is 160x120 float32; with FLIR2TOF active the frame is
//! resampled onto the 640x480 ToF grid.

use crate::protocol;
use crate::rectify::{resample_scalar, RectifyCoordinator};
use crate::tof::{advance_frame_count, EngineState};
use crate::transport::{ControlLink, StreamKind};
use crate::types::{CameraInfo, Extrinsics, RectifyMode, FLIR_HEIGHT, FLIR_PIXELS, FLIR_WIDTH,
    TOF_DEPTH_PIXELS};
use crate::{Result, Voxel3dError};

pub struct ThermalEngine {
    serial: String,
    link: ControlLink,
    state: EngineState,
    camera_info: Option<CameraInfo>,
    extrinsics: Option<Extrinsics>,
    frame_count: u32,
    /// Native-resolution scratch frame reused between rectified polls.
    native: Vec<f32>,
}

impl ThermalEngine {
    pub(crate) fn new(serial: String, link: ControlLink) -> Self {
        Self {
            serial,
            link,
            state: EngineState::Uninit,
            camera_info: None,
            extrinsics: None,
            frame_count: 0,
            native: Vec::new(),
        }
    }

    pub(crate) fn state(&self) -> EngineState {
        self.state
    }

    fn require_init(&self) -> Result<()> {
        if self.state == EngineState::Uninit {
            return Err(Voxel3dError::not_initialized(&self.serial, "thermal"));
        }
        Ok(())
    }

    fn checked<T>(&mut self, op: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        match op(self) {
            Err(e @ Voxel3dError::TransportFailure(_)) => {
                log::warn!("Thermal transport failure on '{}': {}", self.serial, e);
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
        self.camera_info = Some(self.link.read_camera_info(protocol::CMD_CAMERA_INFO_FLIR)?);
        self.extrinsics = Some(self.link.read_extrinsics(protocol::CMD_EXTRINSICS_FLIR)?);
        self.state = EngineState::Ready;
        log::info!("Thermal init on '{}'", self.serial);
        Ok(())
    }

    /// Poll for the next thermal frame. Returns 0 when nothing is queued.
    pub fn query_frame(
        &mut self,
        out: &mut [f32],
        rectify: &mut RectifyCoordinator,
        tof_info: Option<CameraInfo>,
    ) -> Result<u32> {
        self.require_init()?;
        let rectified = rectify.mode() == RectifyMode::Flir2Tof;
        let expected = if rectified { TOF_DEPTH_PIXELS } else { FLIR_PIXELS };
        if out.len() != expected {
            return Err(Voxel3dError::InvalidParameter(format!(
                "thermal buffer holds {} pixels, current mode needs {}",
                out.len(),
                expected
            )));
        }

        if self.state == EngineState::Ready {
            self.checked(|e| e.link.stream_start(StreamKind::Flir))?;
            self.state = EngineState::Streaming;
        }

        let packet = match self.checked(|e| e.link.poll_stream(StreamKind::Flir))? {
            Some(packet) => packet,
            None => return Ok(0),
        };
        let (_, payload) = protocol::parse_flir_frame(&packet)?;

        if rectified {
            let tof = tof_info
                .ok_or_else(|| Voxel3dError::not_initialized(&self.serial, "ToF"))?;
            let (info, ext) = match (self.camera_info, self.extrinsics) {
                (Some(info), Some(ext)) => (info, ext),
                _ => return Err(Voxel3dError::not_initialized(&self.serial, "thermal")),
            };
            self.native.resize(FLIR_PIXELS, 0.0);
            decode_f32_frame(payload, &mut self.native);
            let map =
                rectify.map_for(RectifyMode::Flir2Tof, &tof, &info, &ext, FLIR_WIDTH, FLIR_HEIGHT);
            resample_scalar(map, &self.native, out);
        } else {
            decode_f32_frame(payload, out);
        }

        self.frame_count = advance_frame_count(self.frame_count);
        Ok(self.frame_count)
    }

    pub fn camera_info(&self) -> Result<CameraInfo> {
        self.require_init()?;
        self.camera_info
            .ok_or_else(|| Voxel3dError::not_initialized(&self.serial, "thermal"))
    }

    fn reset(&mut self) {
        self.state = EngineState::Uninit;
        self.camera_info = None;
        self.extrinsics = None;
    }

    /// Idempotent; safe at any state.
    pub fn release(&mut self) {
        if self.state == EngineState::Streaming {
            if let Err(e) = self.link.stream_stop(StreamKind::Flir) {
                log::warn!("Thermal stream stop on '{}' failed: {}", self.serial, e);
            }
        }
        self.reset();
    }
}

fn decode_f32_frame(payload: &[u8], out: &mut [f32]) {
    for (i, px) in out.iter_mut().enumerate() {
        let at = i * 4;
        *px = f32::from_le_bytes([payload[at], payload[at + 1], payload[at + 2], payload[at + 3]]);
    }
}
