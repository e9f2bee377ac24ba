//! Abstract device transport.
//!
//! A [`Transport`] is one duplex channel to a physical 5VHiRab unit: control
//! transactions plus non-blocking stream polling. Concrete USB plumbing lives
//! behind this trait (the in-tree [`crate::emulator`] is one implementation);
//! the engines only ever talk to [`ControlLink`].

use crate::protocol;
use crate::types::{DeviceInfo, Modality};
use crate::{Result, Voxel3dError};
use std::sync::{Arc, Mutex};

/// Stream endpoints multiplexed over one device transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Tof,
    Rgb,
    Flir,
    Imu,
}

impl StreamKind {
    /// Endpoint selector byte used in stream start/stop commands.
    pub fn selector(self) -> u8 {
        match self {
            StreamKind::Tof => 0x01,
            StreamKind::Rgb => 0x02,
            StreamKind::Flir => 0x03,
            StreamKind::Imu => 0x04,
        }
    }
}

impl From<Modality> for StreamKind {
    fn from(m: Modality) -> StreamKind {
        match m {
            Modality::Tof => StreamKind::Tof,
            Modality::Rgb => StreamKind::Rgb,
            Modality::Thermal => StreamKind::Flir,
        }
    }
}

/// One duplex channel to a physical device.
pub trait Transport: Send {
    /// Execute a control transaction: send the request, return the raw
    /// response (prefix + command echo + payload).
    fn control(&mut self, request: &[u8]) -> Result<Vec<u8>>;

    /// Poll a stream endpoint for the next queued packet. Returns `None`
    /// immediately when nothing is queued; must never block.
    fn poll_stream(&mut self, stream: StreamKind) -> Result<Option<Vec<u8>>>;
}

/// Enumerates attached devices and opens transports to them.
pub trait Backend: Send + Sync {
    fn enumerate(&self) -> Result<Vec<DeviceInfo>>;
    fn open(&self, serial: &str) -> Result<Box<dyn Transport>>;
}

/// Transport shared by the per-modality engines of one session.
pub type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

/// Typed command helpers over a shared transport.
///
/// Every method is one control round trip: build the command, validate the
/// response prefix and command echo, decode the payload.
#[derive(Clone)]
pub struct ControlLink {
    transport: SharedTransport,
}

impl ControlLink {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport: Arc::new(Mutex::new(transport)),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Box<dyn Transport>>> {
        self.transport
            .lock()
            .map_err(|_| Voxel3dError::TransportFailure("transport mutex poisoned".into()))
    }

    /// Send a command with payload and return the response payload bytes.
    pub fn transaction(&self, cmd: &[u8], payload: &[u8]) -> Result<Vec<u8>> {
        let request = protocol::build_command(cmd, payload);
        let response = self.lock()?.control(&request)?;
        let offset = protocol::validate_response(&response, cmd)?;
        Ok(response[offset..].to_vec())
    }

    /// Send a set-style command and check the status byte ack.
    fn command_ack(&self, cmd: &[u8], payload: &[u8]) -> Result<()> {
        let response = self.transaction(cmd, payload)?;
        protocol::parse_status(&response)
    }

    pub fn poll_stream(&self, stream: StreamKind) -> Result<Option<Vec<u8>>> {
        self.lock()?.poll_stream(stream)
    }

    pub fn read_fw_version(&self) -> Result<String> {
        let payload = self.transaction(protocol::CMD_FW_VERSION, &[])?;
        Ok(protocol::extract_string(&payload))
    }

    pub fn read_fw_build_date(&self) -> Result<String> {
        let payload = self.transaction(protocol::CMD_FW_BUILD_DATE, &[])?;
        Ok(protocol::extract_string(&payload))
    }

    pub fn read_camera_info(&self, cmd: &'static [u8]) -> Result<crate::types::CameraInfo> {
        let payload = self.transaction(cmd, &[])?;
        protocol::parse_camera_info(&payload)
    }

    pub fn read_extrinsics(&self, cmd: &'static [u8]) -> Result<crate::types::Extrinsics> {
        let payload = self.transaction(cmd, &[])?;
        protocol::parse_extrinsics(&payload)
    }

    pub fn get_conf_threshold(&self) -> Result<u16> {
        let payload = self.transaction(protocol::CMD_GET_CONF_THRESHOLD, &[])?;
        if payload.len() < 2 {
            return Err(Voxel3dError::DataError(
                "threshold payload too short".into(),
            ));
        }
        Ok(protocol::read_u16_le(&payload, 0))
    }

    pub fn set_conf_threshold(&self, threshold: u16) -> Result<()> {
        self.command_ack(protocol::CMD_SET_CONF_THRESHOLD, &threshold.to_le_bytes())
    }

    pub fn set_auto_exposure(&self, enable: bool) -> Result<()> {
        self.command_ack(protocol::CMD_SET_AUTO_EXPOSURE, &[enable as u8])
    }

    pub fn stream_start(&self, stream: StreamKind) -> Result<()> {
        log::trace!("stream start ({:?})", stream);
        self.command_ack(protocol::CMD_STREAM_START, &[stream.selector()])
    }

    pub fn stream_stop(&self, stream: StreamKind) -> Result<()> {
        log::trace!("stream stop ({:?})", stream);
        self.command_ack(protocol::CMD_STREAM_STOP, &[stream.selector()])
    }

    pub fn fw_upgrade_begin(&self, total_len: u32) -> Result<()> {
        self.command_ack(protocol::CMD_FW_UPGRADE_BEGIN, &total_len.to_le_bytes())
    }

    pub fn fw_upgrade_data(&self, chunk: &[u8]) -> Result<()> {
        self.command_ack(protocol::CMD_FW_UPGRADE_DATA, chunk)
    }

    pub fn fw_upgrade_commit(&self) -> Result<()> {
        self.command_ack(protocol::CMD_FW_UPGRADE_COMMIT, &[])
    }
}
