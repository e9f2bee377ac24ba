//! In-memory 5VHiRab device emulator.
//!
//! Implements [`Transport`] and [`Backend`] against a scriptable device
//! model: control registers, factory calibration, firmware acceptance, and
//! per-stream frame queues fed through bounded channels. The test-suite and
//! the demo binaries run the full stack over this emulator; real USB
//! plumbing plugs in through the same traits.

use crate::protocol;
use crate::transport::{Backend, StreamKind, Transport};
use crate::types::{
    CamResolution, CameraInfo, DeviceInfo, Extrinsics, Features, FLIR_PIXELS, RGB_PIXELS,
    TOF_DEPTH_HEIGHT, TOF_DEPTH_PIXELS, TOF_DEPTH_WIDTH,
};
use crate::{Result, Voxel3dError};
use crossbeam_channel::{Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};

const STREAM_QUEUE_DEPTH: usize = 8;

/// Scriptable device registers and firmware receiver state.
struct DeviceModel {
    fw_version: String,
    fw_build_date: String,
    tof_info: CameraInfo,
    rgb_info: CameraInfo,
    flir_info: CameraInfo,
    rgb_extrinsics: Extrinsics,
    flir_extrinsics: Extrinsics,
    conf_threshold: u16,
    auto_exposure: bool,
    /// Force every transport operation to fail (unplug simulation).
    fail_transport: bool,
    /// NAK firmware data chunks after this many accepted ones.
    fw_reject_after_chunks: Option<usize>,
    fw_expected_len: u32,
    fw_received: Vec<u8>,
    fw_committed: bool,
}

struct StreamQueues {
    tof: (Sender<Vec<u8>>, Receiver<Vec<u8>>),
    rgb: (Sender<Vec<u8>>, Receiver<Vec<u8>>),
    flir: (Sender<Vec<u8>>, Receiver<Vec<u8>>),
    imu: (Sender<Vec<u8>>, Receiver<Vec<u8>>),
}

impl StreamQueues {
    fn new() -> Self {
        let q = || crossbeam_channel::bounded(STREAM_QUEUE_DEPTH);
        Self {
            tof: q(),
            rgb: q(),
            flir: q(),
            imu: q(),
        }
    }

    fn sender(&self, stream: StreamKind) -> &Sender<Vec<u8>> {
        match stream {
            StreamKind::Tof => &self.tof.0,
            StreamKind::Rgb => &self.rgb.0,
            StreamKind::Flir => &self.flir.0,
            StreamKind::Imu => &self.imu.0,
        }
    }

    fn receiver(&self, stream: StreamKind) -> &Receiver<Vec<u8>> {
        match stream {
            StreamKind::Tof => &self.tof.1,
            StreamKind::Rgb => &self.rgb.1,
            StreamKind::Flir => &self.flir.1,
            StreamKind::Imu => &self.imu.1,
        }
    }
}

/// One emulated device, sharable between a backend and the test driving it.
#[derive(Clone)]
pub struct EmulatedDevice {
    serial: String,
    model: Arc<Mutex<DeviceModel>>,
    queues: Arc<StreamQueues>,
    device_seq: Arc<Mutex<u32>>,
}

fn default_tof_info() -> CameraInfo {
    CameraInfo {
        focal_length_fx: 500.0,
        focal_length_fy: 500.0,
        principal_point_cx: (TOF_DEPTH_WIDTH as f32 - 1.0) / 2.0,
        principal_point_cy: (TOF_DEPTH_HEIGHT as f32 - 1.0) / 2.0,
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

impl EmulatedDevice {
    pub fn new(serial: &str) -> Self {
        let tof = default_tof_info();
        let rgb = CameraInfo {
            focal_length_fx: 1500.0,
            focal_length_fy: 1500.0,
            principal_point_cx: 959.5,
            principal_point_cy: 539.5,
            ..tof
        };
        let flir = CameraInfo {
            focal_length_fx: 125.0,
            focal_length_fy: 125.0,
            principal_point_cx: 79.5,
            principal_point_cy: 59.5,
            ..tof
        };
        Self {
            serial: serial.to_string(),
            model: Arc::new(Mutex::new(DeviceModel {
                fw_version: "v2.1.0".to_string(),
                fw_build_date: "2025-03-02".to_string(),
                tof_info: tof,
                rgb_info: rgb,
                flir_info: flir,
                rgb_extrinsics: Extrinsics::IDENTITY,
                flir_extrinsics: Extrinsics::IDENTITY,
                conf_threshold: 0,
                auto_exposure: false,
                fail_transport: false,
                fw_reject_after_chunks: None,
                fw_expected_len: 0,
                fw_received: Vec::new(),
                fw_committed: false,
            })),
            queues: Arc::new(StreamQueues::new()),
            device_seq: Arc::new(Mutex::new(0)),
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    fn model(&self) -> MutexGuard<'_, DeviceModel> {
        self.model.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn next_seq(&self) -> u32 {
        let mut seq = self.device_seq.lock().unwrap_or_else(|p| p.into_inner());
        *seq = seq.wrapping_add(1);
        *seq
    }

    fn push(&self, stream: StreamKind, packet: Vec<u8>) {
        let sender = self.queues.sender(stream);
        if let Err(crossbeam_channel::TrySendError::Full(packet)) = sender.try_send(packet) {
            // Latest-wins: drop the oldest queued packet.
            let _ = self.queues.receiver(stream).try_recv();
            let _ = sender.try_send(packet);
        }
    }

    /// Queue a depth/IR/confidence frame (each plane one u16 per pixel).
    pub fn push_tof_frame(&self, depth: &[u16], ir: &[u16], confidence: &[u16]) {
        assert_eq!(depth.len(), TOF_DEPTH_PIXELS);
        assert_eq!(ir.len(), TOF_DEPTH_PIXELS);
        assert_eq!(confidence.len(), TOF_DEPTH_PIXELS);
        let mut packet = Vec::with_capacity(protocol::TOF_FRAME_PACKET_LEN);
        packet.extend_from_slice(&protocol::FRAME_HEADER_TOF);
        packet.extend_from_slice(&self.next_seq().to_le_bytes());
        for plane in [depth, ir, confidence] {
            for &px in plane {
                packet.extend_from_slice(&px.to_le_bytes());
            }
        }
        self.push(StreamKind::Tof, packet);
    }

    /// Queue a native-resolution thermal frame.
    pub fn push_flir_frame(&self, pixels: &[f32]) {
        assert_eq!(pixels.len(), FLIR_PIXELS);
        let mut packet = Vec::with_capacity(protocol::FLIR_FRAME_PACKET_LEN);
        packet.extend_from_slice(&protocol::FRAME_HEADER_FLIR);
        packet.extend_from_slice(&self.next_seq().to_le_bytes());
        for &px in pixels {
            packet.extend_from_slice(&px.to_le_bytes());
        }
        self.push(StreamKind::Flir, packet);
    }

    /// Queue a native-resolution interleaved RGB frame.
    pub fn push_rgb_frame(&self, pixels: &[u8]) {
        assert_eq!(pixels.len(), RGB_PIXELS * 3);
        let mut packet = Vec::with_capacity(protocol::RGB_FRAME_PACKET_LEN);
        packet.extend_from_slice(&protocol::FRAME_HEADER_RGB);
        packet.extend_from_slice(&self.next_seq().to_le_bytes());
        packet.extend_from_slice(pixels);
        self.push(StreamKind::Rgb, packet);
    }

    /// Queue an IMU sample.
    pub fn push_imu_sample(&self, timestamp_us: u32, accel: [f32; 3], gyro: [f32; 3]) {
        let mut packet = Vec::with_capacity(protocol::IMU_PACKET_LEN);
        packet.extend_from_slice(&protocol::FRAME_HEADER_IMU);
        packet.extend_from_slice(&self.next_seq().to_le_bytes());
        packet.extend_from_slice(&timestamp_us.to_le_bytes());
        for v in accel.iter().chain(gyro.iter()) {
            packet.extend_from_slice(&v.to_le_bytes());
        }
        self.push(StreamKind::Imu, packet);
    }

    /// Current confidence threshold register.
    pub fn conf_threshold(&self) -> u16 {
        self.model().conf_threshold
    }

    /// Current auto-exposure register.
    pub fn auto_exposure(&self) -> bool {
        self.model().auto_exposure
    }

    /// Firmware payload bytes accepted so far.
    pub fn fw_received_len(&self) -> usize {
        self.model().fw_received.len()
    }

    /// Whether the last transfer was committed.
    pub fn fw_committed(&self) -> bool {
        self.model().fw_committed
    }

    /// NAK firmware data chunks after `chunks` accepted ones.
    pub fn reject_fw_after(&self, chunks: usize) {
        self.model().fw_reject_after_chunks = Some(chunks);
    }

    /// Simulate an unplug: every transport operation fails until cleared.
    pub fn set_transport_failure(&self, fail: bool) {
        self.model().fail_transport = fail;
    }

    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            serial: self.serial.clone(),
            name: "HE-2 ToF Decoder".to_string(),
            resolution: CamResolution {
                width: TOF_DEPTH_WIDTH as u32,
                height: TOF_DEPTH_HEIGHT as u32,
            },
            features: Features::TOF | Features::RGB | Features::THERMAL | Features::IMU,
        }
    }
}

/// Backend over a fixed set of emulated devices.
pub struct EmulatedBackend {
    devices: Vec<EmulatedDevice>,
}

impl EmulatedBackend {
    pub fn new(devices: Vec<EmulatedDevice>) -> Self {
        Self { devices }
    }

    /// Backend with no attached devices (scan failure paths).
    pub fn empty() -> Self {
        Self {
            devices: Vec::new(),
        }
    }
}

impl Backend for EmulatedBackend {
    fn enumerate(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self.devices.iter().map(|d| d.info()).collect())
    }

    fn open(&self, serial: &str) -> Result<Box<dyn Transport>> {
        let device = self
            .devices
            .iter()
            .find(|d| d.serial == serial)
            .ok_or_else(|| Voxel3dError::device_not_found(serial))?;
        Ok(Box::new(EmulatedTransport {
            device: device.clone(),
        }))
    }
}

/// Transport endpoint bound to one emulated device.
struct EmulatedTransport {
    device: EmulatedDevice,
}

impl EmulatedTransport {
    fn respond(cmd: &[u8], payload: &[u8]) -> Vec<u8> {
        let mut response = Vec::with_capacity(1 + cmd.len() + payload.len());
        response.push(protocol::PREFIX_DEVICE_TO_HOST);
        response.extend_from_slice(cmd);
        response.extend_from_slice(payload);
        response
    }

    fn respond_string(cmd: &[u8], value: &str, max_len: usize) -> Vec<u8> {
        let mut field = vec![0u8; max_len];
        let n = value.len().min(max_len - 1);
        field[..n].copy_from_slice(&value.as_bytes()[..n]);
        Self::respond(cmd, &field)
    }
}

impl Transport for EmulatedTransport {
    fn control(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        if self.device.model().fail_transport {
            return Err(Voxel3dError::TransportFailure("device unplugged".into()));
        }
        if request.len() < 3 || request[0] != protocol::PREFIX_HOST_TO_DEVICE {
            return Err(Voxel3dError::DataError("malformed control request".into()));
        }
        let cmd = &request[1..3];
        let payload = &request[3..];
        let mut model = self.device.model();

        let response = match cmd {
            c if c == protocol::CMD_FW_VERSION => {
                Self::respond_string(c, &model.fw_version, crate::types::MAX_FW_VER_LEN)
            }
            c if c == protocol::CMD_FW_BUILD_DATE => {
                Self::respond_string(c, &model.fw_build_date, crate::types::MAX_FW_BUILD_DATE_LEN)
            }
            c if c == protocol::CMD_CAMERA_INFO_TOF => {
                Self::respond(c, &protocol::encode_camera_info(&model.tof_info))
            }
            c if c == protocol::CMD_CAMERA_INFO_RGB => {
                Self::respond(c, &protocol::encode_camera_info(&model.rgb_info))
            }
            c if c == protocol::CMD_CAMERA_INFO_FLIR => {
                Self::respond(c, &protocol::encode_camera_info(&model.flir_info))
            }
            c if c == protocol::CMD_EXTRINSICS_RGB => {
                Self::respond(c, &protocol::encode_extrinsics(&model.rgb_extrinsics))
            }
            c if c == protocol::CMD_EXTRINSICS_FLIR => {
                Self::respond(c, &protocol::encode_extrinsics(&model.flir_extrinsics))
            }
            c if c == protocol::CMD_GET_CONF_THRESHOLD => {
                Self::respond(c, &model.conf_threshold.to_le_bytes())
            }
            c if c == protocol::CMD_SET_CONF_THRESHOLD => {
                if payload.len() < 2 {
                    Self::respond(c, &[1])
                } else {
                    model.conf_threshold = protocol::read_u16_le(payload, 0);
                    Self::respond(c, &[0])
                }
            }
            c if c == protocol::CMD_SET_AUTO_EXPOSURE => {
                model.auto_exposure = payload.first().copied().unwrap_or(0) != 0;
                Self::respond(c, &[0])
            }
            c if c == protocol::CMD_STREAM_START || c == protocol::CMD_STREAM_STOP => {
                Self::respond(c, &[0])
            }
            c if c == protocol::CMD_FW_UPGRADE_BEGIN => {
                if payload.len() < 4 {
                    Self::respond(c, &[1])
                } else {
                    model.fw_expected_len = protocol::read_u32_le(payload, 0);
                    model.fw_received.clear();
                    model.fw_committed = false;
                    Self::respond(c, &[0])
                }
            }
            c if c == protocol::CMD_FW_UPGRADE_DATA => {
                let accepted = model.fw_received.len() / protocol::FW_CHUNK_SIZE;
                match model.fw_reject_after_chunks {
                    Some(limit) if accepted >= limit => Self::respond(c, &[1]),
                    _ => {
                        model.fw_received.extend_from_slice(payload);
                        Self::respond(c, &[0])
                    }
                }
            }
            c if c == protocol::CMD_FW_UPGRADE_COMMIT => {
                if model.fw_received.len() as u32 == model.fw_expected_len {
                    model.fw_committed = true;
                    Self::respond(c, &[0])
                } else {
                    Self::respond(c, &[1])
                }
            }
            c => {
                log::warn!("Emulator: unknown command {:02x?}", c);
                return Err(Voxel3dError::DataError(format!(
                    "unknown command {:02x?}",
                    c
                )));
            }
        };
        Ok(response)
    }

    fn poll_stream(&mut self, stream: StreamKind) -> Result<Option<Vec<u8>>> {
        if self.device.model().fail_transport {
            return Err(Voxel3dError::TransportFailure("device unplugged".into()));
        }
        Ok(self.device.queues.receiver(stream).try_recv().ok())
    }
}
