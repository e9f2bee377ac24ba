//! Public data model: frame geometry, calibration, device descriptors.

/// Depth frame width in pixels. IR shares the same geometry.
pub const TOF_DEPTH_WIDTH: usize = 640;
/// Depth frame height in pixels.
pub const TOF_DEPTH_HEIGHT: usize = 480;
pub const TOF_DEPTH_PIXELS: usize = TOF_DEPTH_WIDTH * TOF_DEPTH_HEIGHT;
pub const TOF_IR_PIXELS: usize = TOF_DEPTH_PIXELS;

/// Native FLIR Lepton 3.5 thermal frame geometry (float32 pixels).
pub const FLIR_WIDTH: usize = 160;
pub const FLIR_HEIGHT: usize = 120;
pub const FLIR_PIXELS: usize = FLIR_WIDTH * FLIR_HEIGHT;

/// Native RGB frame geometry (3 bytes per pixel).
pub const RGB_WIDTH: usize = 1920;
pub const RGB_HEIGHT: usize = 1080;
pub const RGB_PIXELS: usize = RGB_WIDTH * RGB_HEIGHT;

/// Upper bound on concurrently attached camera modules.
pub const MAX_SUPPORTED_CAMERA_MODULE: usize = 12;
/// Upper bound on a product serial number, in bytes.
pub const MAX_PRODUCT_SN_LEN: usize = 128;
/// Wire-side bound on the firmware version string.
pub const MAX_FW_VER_LEN: usize = 16;
/// Wire-side bound on the firmware build date string.
pub const MAX_FW_BUILD_DATE_LEN: usize = 16;

/// Confidence threshold values are 12-bit.
pub const MAX_CONF_THRESHOLD: u16 = 4095;

/// Camera intrinsics and distortion coefficients, read from the device
/// calibration blob after init. Read-only for the session lifetime.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraInfo {
    pub focal_length_fx: f32,
    pub focal_length_fy: f32,
    pub principal_point_cx: f32,
    pub principal_point_cy: f32,
    pub k1: f32,
    pub k2: f32,
    pub p1: f32,
    pub p2: f32,
    pub k3: f32,
    pub k4: f32,
    pub k5: f32,
    pub k6: f32,
}

/// Rigid transform from a secondary camera (RGB/FLIR) into the ToF frame.
/// Part of the opaque factory calibration; applied, never derived.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extrinsics {
    /// 3x3 row-major rotation matrix.
    pub rotation: [[f32; 3]; 3],
    /// Translation in meters.
    pub translation: [f32; 3],
}

impl Extrinsics {
    pub const IDENTITY: Extrinsics = Extrinsics {
        rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        translation: [0.0, 0.0, 0.0],
    };
}

/// Sensor resolution as reported by the scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CamResolution {
    pub width: u32,
    pub height: u32,
}

/// One discovered 5VHiRab device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub serial: String,
    pub name: String,
    pub resolution: CamResolution,
    pub features: Features,
}

bitflags::bitflags! {
    /// Sensor capability bitmap reported in the device descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Features: u32 {
        const TOF     = 1 << 0;
        const RGB     = 1 << 1;
        const THERMAL = 1 << 2;
        const IMU     = 1 << 3;
    }
}

/// Sensor modality within one physical device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modality {
    Tof,
    Rgb,
    Thermal,
}

impl Modality {
    pub fn label(self) -> &'static str {
        match self {
            Modality::Tof => "ToF",
            Modality::Rgb => "RGB",
            Modality::Thermal => "thermal",
        }
    }
}

/// Geometric alignment mode for secondary modalities onto the ToF grid.
/// At most one non-`None` mode is active per session.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RectifyMode {
    #[default]
    None = 0,
    Rgb2Tof = 1,
    Flir2Tof = 2,
}

impl RectifyMode {
    /// Decode the C API integer. Unknown values are rejected by the caller.
    pub fn from_code(code: i32) -> Option<RectifyMode> {
        match code {
            0 => Some(RectifyMode::None),
            1 => Some(RectifyMode::Rgb2Tof),
            2 => Some(RectifyMode::Flir2Tof),
            _ => None,
        }
    }
}

/// One IMU reading. The device keeps only the most recent sample; reads are
/// on-demand while the ToF session is active.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuSample {
    /// Device timestamp in microseconds.
    pub timestamp_us: u32,
    /// Accelerometer [x, y, z] in g.
    pub accel: [f32; 3],
    /// Gyroscope [x, y, z] in rad/s.
    pub gyro: [f32; 3],
}

/// Firmware upgrade state machine.
///
/// `Idle` (never started since session creation) and `Error` (previous
/// upgrade failed) are distinct states; the original header folded both into
/// a negative poll return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeState {
    Idle,
    Downloading,
    Complete,
    Error,
}

impl UpgradeState {
    /// State code written to the C API out-parameter:
    /// <0 error, 0 initial, 1 downloading, 2 complete.
    pub fn compat_code(self) -> i32 {
        match self {
            UpgradeState::Idle => 0,
            UpgradeState::Downloading => 1,
            UpgradeState::Complete => 2,
            UpgradeState::Error => -1,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> UpgradeState {
        match tag {
            1 => UpgradeState::Downloading,
            2 => UpgradeState::Complete,
            3 => UpgradeState::Error,
            _ => UpgradeState::Idle,
        }
    }

    pub(crate) fn tag(self) -> u8 {
        match self {
            UpgradeState::Idle => 0,
            UpgradeState::Downloading => 1,
            UpgradeState::Complete => 2,
            UpgradeState::Error => 3,
        }
    }
}
