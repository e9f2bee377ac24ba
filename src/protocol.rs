//! Wire protocol for the 5VHiRab control and stream channels.
//!
//! The transport is an abstract duplex channel (see [`crate::transport`]);
//! this module owns the byte layout on both directions: control commands,
//! response validation, stream frame packets, and the firmware image
//! container.

use crate::types::{
    CameraInfo, Extrinsics, ImuSample, FLIR_PIXELS, RGB_PIXELS, TOF_DEPTH_PIXELS,
};
use crate::{Result, Voxel3dError};

// -- USB identifiers (matched by backends during enumeration) --
pub const VID: u16 = 0x3558;
pub const PID: u16 = 0x1006;

// -- Direction prefixes --
pub const PREFIX_HOST_TO_DEVICE: u8 = 0x02;
pub const PREFIX_DEVICE_TO_HOST: u8 = 0x01;

// -- Command bytes (after the 0x02 prefix) --
pub const CMD_FW_VERSION: &[u8] = &[0x10, 0x01];
pub const CMD_FW_BUILD_DATE: &[u8] = &[0x10, 0x02];
pub const CMD_CAMERA_INFO_TOF: &[u8] = &[0x21, 0x01];
pub const CMD_CAMERA_INFO_RGB: &[u8] = &[0x21, 0x02];
pub const CMD_CAMERA_INFO_FLIR: &[u8] = &[0x21, 0x03];
pub const CMD_EXTRINSICS_RGB: &[u8] = &[0x22, 0x01];
pub const CMD_EXTRINSICS_FLIR: &[u8] = &[0x22, 0x02];
pub const CMD_GET_CONF_THRESHOLD: &[u8] = &[0x23, 0x01];
pub const CMD_SET_CONF_THRESHOLD: &[u8] = &[0x23, 0x02];
pub const CMD_SET_AUTO_EXPOSURE: &[u8] = &[0x24, 0x01];
pub const CMD_STREAM_START: &[u8] = &[0x40, 0x01];
pub const CMD_STREAM_STOP: &[u8] = &[0x40, 0x02];
pub const CMD_FW_UPGRADE_BEGIN: &[u8] = &[0x50, 0x01];
pub const CMD_FW_UPGRADE_DATA: &[u8] = &[0x50, 0x02];
pub const CMD_FW_UPGRADE_COMMIT: &[u8] = &[0x50, 0x03];

// -- Stream packet headers: [0x01, 0x60, kind] --
pub const FRAME_HEADER_TOF: [u8; 3] = [PREFIX_DEVICE_TO_HOST, 0x60, 0x01];
pub const FRAME_HEADER_RGB: [u8; 3] = [PREFIX_DEVICE_TO_HOST, 0x60, 0x02];
pub const FRAME_HEADER_FLIR: [u8; 3] = [PREFIX_DEVICE_TO_HOST, 0x60, 0x03];
pub const FRAME_HEADER_IMU: [u8; 3] = [PREFIX_DEVICE_TO_HOST, 0x60, 0x04];

/// Stream packet layout: 3-byte header + u32 LE device sequence + payload.
pub const FRAME_PREAMBLE_LEN: usize = 7;

/// ToF stream payload: depth, IR, confidence planes, each u16 LE per pixel.
pub const TOF_FRAME_PACKET_LEN: usize = FRAME_PREAMBLE_LEN + TOF_DEPTH_PIXELS * 6;
/// Thermal stream payload: one f32 LE per native pixel.
pub const FLIR_FRAME_PACKET_LEN: usize = FRAME_PREAMBLE_LEN + FLIR_PIXELS * 4;
/// RGB stream payload: 3 bytes per native pixel.
pub const RGB_FRAME_PACKET_LEN: usize = FRAME_PREAMBLE_LEN + RGB_PIXELS * 3;
/// IMU packet: u32 LE timestamp + 6x f32 LE (accel, gyro).
pub const IMU_PACKET_LEN: usize = FRAME_PREAMBLE_LEN + 4 + 6 * 4;

// -- Firmware image container --
pub const FW_IMAGE_MAGIC: &[u8; 4] = b"5VFW";
pub const FW_IMAGE_HEADER_LEN: usize = 4 + 1 + 16 + 16 + 4;
pub const FW_CHUNK_SIZE: usize = 4096;

/// Build a control command buffer: `[0x02, cmd..., payload...]`.
pub fn build_command(cmd: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + cmd.len() + payload.len());
    buf.push(PREFIX_HOST_TO_DEVICE);
    buf.extend_from_slice(cmd);
    buf.extend_from_slice(payload);
    buf
}

/// Validate a control response and return the payload start offset.
/// Response format: `[0x01, cmd_echo..., payload...]`.
pub fn validate_response(response: &[u8], expected_cmd: &[u8]) -> Result<usize> {
    match response.first() {
        Some(&PREFIX_DEVICE_TO_HOST) => {}
        other => {
            return Err(Voxel3dError::DataError(format!(
                "bad response prefix 0x{:02x}",
                other.copied().unwrap_or(0)
            )))
        }
    }
    let cmd_len = expected_cmd.len();
    if response.len() < 1 + cmd_len || &response[1..1 + cmd_len] != expected_cmd {
        return Err(Voxel3dError::DataError("command echo mismatch".into()));
    }
    Ok(1 + cmd_len)
}

/// Parse the single status byte acknowledging a set-style command.
pub fn parse_status(payload: &[u8]) -> Result<()> {
    match payload.first() {
        Some(0) => Ok(()),
        Some(&code) => Err(Voxel3dError::DataError(format!(
            "device rejected command (status 0x{:02x})",
            code
        ))),
        None => Err(Voxel3dError::DataError("empty status payload".into())),
    }
}

/// Extract a null-terminated string from a byte slice.
pub fn extract_string(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).to_string()
}

fn read_f32_le(data: &[u8], at: usize) -> f32 {
    f32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

pub fn read_u16_le(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

pub fn read_u32_le(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

/// Parse a 48-byte intrinsics payload: 12x f32 LE in header field order.
pub fn parse_camera_info(payload: &[u8]) -> Result<CameraInfo> {
    if payload.len() < 48 {
        return Err(Voxel3dError::DataError(format!(
            "camera info payload too short ({} bytes)",
            payload.len()
        )));
    }
    let f = |i: usize| read_f32_le(payload, i * 4);
    Ok(CameraInfo {
        focal_length_fx: f(0),
        focal_length_fy: f(1),
        principal_point_cx: f(2),
        principal_point_cy: f(3),
        k1: f(4),
        k2: f(5),
        p1: f(6),
        p2: f(7),
        k3: f(8),
        k4: f(9),
        k5: f(10),
        k6: f(11),
    })
}

/// Serialize intrinsics back to the 48-byte wire layout (emulator side).
pub fn encode_camera_info(info: &CameraInfo) -> [u8; 48] {
    let fields = [
        info.focal_length_fx,
        info.focal_length_fy,
        info.principal_point_cx,
        info.principal_point_cy,
        info.k1,
        info.k2,
        info.p1,
        info.p2,
        info.k3,
        info.k4,
        info.k5,
        info.k6,
    ];
    let mut buf = [0u8; 48];
    for (i, v) in fields.iter().enumerate() {
        buf[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
    }
    buf
}

/// Parse a 48-byte extrinsics payload: 9x f32 rotation (row-major) + 3x f32
/// translation.
pub fn parse_extrinsics(payload: &[u8]) -> Result<Extrinsics> {
    if payload.len() < 48 {
        return Err(Voxel3dError::DataError(format!(
            "extrinsics payload too short ({} bytes)",
            payload.len()
        )));
    }
    let mut rotation = [[0.0f32; 3]; 3];
    for r in 0..3 {
        for c in 0..3 {
            rotation[r][c] = read_f32_le(payload, (r * 3 + c) * 4);
        }
    }
    let mut translation = [0.0f32; 3];
    for (i, t) in translation.iter_mut().enumerate() {
        *t = read_f32_le(payload, 36 + i * 4);
    }
    Ok(Extrinsics {
        rotation,
        translation,
    })
}

/// Serialize extrinsics to the 48-byte wire layout (emulator side).
pub fn encode_extrinsics(ext: &Extrinsics) -> [u8; 48] {
    let mut buf = [0u8; 48];
    for r in 0..3 {
        for c in 0..3 {
            let at = (r * 3 + c) * 4;
            buf[at..at + 4].copy_from_slice(&ext.rotation[r][c].to_le_bytes());
        }
    }
    for i in 0..3 {
        buf[36 + i * 4..36 + i * 4 + 4].copy_from_slice(&ext.translation[i].to_le_bytes());
    }
    buf
}

/// Validate a stream packet header and return `(device_seq, payload)`.
fn split_frame(packet: &[u8], header: &[u8; 3], expected_len: usize) -> Result<(u32, usize)> {
    if packet.len() != expected_len {
        return Err(Voxel3dError::DataError(format!(
            "frame packet length {} (expected {})",
            packet.len(),
            expected_len
        )));
    }
    if packet[..3] != header[..] {
        return Err(Voxel3dError::DataError(format!(
            "frame header {:02x?} (expected {:02x?})",
            &packet[..3],
            header
        )));
    }
    Ok((read_u32_le(packet, 3), FRAME_PREAMBLE_LEN))
}

/// Byte planes of a ToF stream packet.
pub struct TofFramePlanes<'a> {
    pub device_seq: u32,
    pub depth: &'a [u8],
    pub ir: &'a [u8],
    pub confidence: &'a [u8],
}

/// Split a ToF packet into its depth / IR / confidence planes (u16 LE each).
pub fn parse_tof_frame(packet: &[u8]) -> Result<TofFramePlanes<'_>> {
    let (device_seq, at) = split_frame(packet, &FRAME_HEADER_TOF, TOF_FRAME_PACKET_LEN)?;
    let plane = TOF_DEPTH_PIXELS * 2;
    Ok(TofFramePlanes {
        device_seq,
        depth: &packet[at..at + plane],
        ir: &packet[at + plane..at + 2 * plane],
        confidence: &packet[at + 2 * plane..at + 3 * plane],
    })
}

/// Split a thermal packet into its f32 LE payload bytes.
pub fn parse_flir_frame(packet: &[u8]) -> Result<(u32, &[u8])> {
    let (seq, at) = split_frame(packet, &FRAME_HEADER_FLIR, FLIR_FRAME_PACKET_LEN)?;
    Ok((seq, &packet[at..]))
}

/// Split an RGB packet into its interleaved 8-bit payload.
pub fn parse_rgb_frame(packet: &[u8]) -> Result<(u32, &[u8])> {
    let (seq, at) = split_frame(packet, &FRAME_HEADER_RGB, RGB_FRAME_PACKET_LEN)?;
    Ok((seq, &packet[at..]))
}

/// Parse an IMU packet.
pub fn parse_imu_packet(packet: &[u8]) -> Result<ImuSample> {
    let (_, at) = split_frame(packet, &FRAME_HEADER_IMU, IMU_PACKET_LEN)?;
    let timestamp_us = read_u32_le(packet, at);
    let v = |i: usize| read_f32_le(packet, at + 4 + i * 4);
    Ok(ImuSample {
        timestamp_us,
        accel: [v(0), v(1), v(2)],
        gyro: [v(3), v(4), v(5)],
    })
}

/// Parsed view of a firmware image container.
#[derive(Debug)]
pub struct FirmwareImage<'a> {
    pub version: String,
    pub build_date: String,
    pub payload: &'a [u8],
}

/// Additive checksum over the firmware payload.
pub fn fw_checksum(payload: &[u8]) -> u32 {
    payload.iter().fold(0u32, |acc, &b| acc.wrapping_add(b as u32))
}

/// Parse and validate a firmware image container.
///
/// Layout: `"5VFW"` magic, u8 container version, 16-byte version string,
/// 16-byte build date string, u32 LE payload length, payload, u32 LE
/// additive checksum.
pub fn parse_firmware_image(image: &[u8]) -> Result<FirmwareImage<'_>> {
    if image.len() < FW_IMAGE_HEADER_LEN + 4 {
        return Err(Voxel3dError::UpgradeRejected(
            "image shorter than container header".into(),
        ));
    }
    if &image[..4] != FW_IMAGE_MAGIC {
        return Err(Voxel3dError::UpgradeRejected("bad image magic".into()));
    }
    if image[4] != 1 {
        return Err(Voxel3dError::UpgradeRejected(format!(
            "unsupported container version {}",
            image[4]
        )));
    }
    let version = extract_string(&image[5..21]);
    let build_date = extract_string(&image[21..37]);
    let payload_len = read_u32_le(image, 37) as usize;
    if image.len() != FW_IMAGE_HEADER_LEN + payload_len + 4 {
        return Err(Voxel3dError::UpgradeRejected(format!(
            "payload length {} disagrees with image size {}",
            payload_len,
            image.len()
        )));
    }
    let payload = &image[FW_IMAGE_HEADER_LEN..FW_IMAGE_HEADER_LEN + payload_len];
    let stored = read_u32_le(image, FW_IMAGE_HEADER_LEN + payload_len);
    if fw_checksum(payload) != stored {
        return Err(Voxel3dError::UpgradeRejected("checksum mismatch".into()));
    }
    Ok(FirmwareImage {
        version,
        build_date,
        payload,
    })
}

/// Build a firmware image container (emulator/test side).
pub fn build_firmware_image(version: &str, build_date: &str, payload: &[u8]) -> Vec<u8> {
    let mut image = Vec::with_capacity(FW_IMAGE_HEADER_LEN + payload.len() + 4);
    image.extend_from_slice(FW_IMAGE_MAGIC);
    image.push(1);
    let mut field = [0u8; 16];
    let n = version.len().min(15);
    field[..n].copy_from_slice(&version.as_bytes()[..n]);
    image.extend_from_slice(&field);
    let mut field = [0u8; 16];
    let n = build_date.len().min(15);
    field[..n].copy_from_slice(&build_date.as_bytes()[..n]);
    image.extend_from_slice(&field);
    image.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    image.extend_from_slice(payload);
    image.extend_from_slice(&fw_checksum(payload).to_le_bytes());
    image
}
