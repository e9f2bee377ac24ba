/// Errors that can occur when interacting with a 5VHiRab device.
///
/// Each variant maps to a stable negative integer code so the classic
/// `>0 / 0 / <0` return convention of the C API can be reproduced at the
/// compatibility boundary (see [`crate::compat`]).
#[derive(Debug, thiserror::Error)]
pub enum Voxel3dError {
    #[error("Device not found (VID=3558 PID=1006)")]
    DeviceNotFound { serial: String },

    #[error("{modality} not initialized on device '{serial}'")]
    NotInitialized {
        serial: String,
        modality: &'static str,
    },

    #[error("Malformed device response: {0}")]
    DataError(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Transport I/O failure: {0}")]
    TransportFailure(String),

    #[error("Firmware upgrade rejected: {0}")]
    UpgradeRejected(String),
}

impl Voxel3dError {
    pub fn device_not_found(serial: &str) -> Self {
        Voxel3dError::DeviceNotFound {
            serial: serial.to_string(),
        }
    }

    pub fn not_initialized(serial: &str, modality: &'static str) -> Self {
        Voxel3dError::NotInitialized {
            serial: serial.to_string(),
            modality,
        }
    }

    /// Stable negative integer code matching the original C return convention.
    pub fn code(&self) -> i32 {
        match self {
            Voxel3dError::DeviceNotFound { .. } => -1,
            Voxel3dError::NotInitialized { .. } => -2,
            Voxel3dError::DataError(_) => -3,
            Voxel3dError::InvalidParameter(_) => -4,
            Voxel3dError::TransportFailure(_) => -5,
            Voxel3dError::UpgradeRejected(_) => -6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_negative_and_distinct() {
        let errs = [
            Voxel3dError::device_not_found(""),
            Voxel3dError::not_initialized("sn", "ToF"),
            Voxel3dError::DataError("x".into()),
            Voxel3dError::InvalidParameter("x".into()),
            Voxel3dError::TransportFailure("x".into()),
            Voxel3dError::UpgradeRejected("x".into()),
        ];
        let mut codes: Vec<i32> = errs.iter().map(|e| e.code()).collect();
        assert!(codes.iter().all(|&c| c < 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errs.len());
    }
}
