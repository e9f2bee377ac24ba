//! Device discovery.

use crate::transport::Backend;
use crate::types::{DeviceInfo, MAX_PRODUCT_SN_LEN, MAX_SUPPORTED_CAMERA_MODULE};
use crate::{Result, Voxel3dError};
use std::sync::Arc;

/// Enumerates attached 5VHiRab units through a [`Backend`].
///
/// Discovery order is whatever the backend reports; callers must not rely on
/// a stable ordering across scans.
pub struct DeviceRegistry {
    backend: Arc<dyn Backend>,
}

impl DeviceRegistry {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Scan for attached devices.
    ///
    /// Units with an out-of-contract serial number are skipped with a
    /// warning, and at most [`MAX_SUPPORTED_CAMERA_MODULE`] units are
    /// reported. Fails with `DeviceNotFound` when nothing matches.
    pub fn scan(&self) -> Result<Vec<DeviceInfo>> {
        let mut devices = Vec::new();
        for info in self.backend.enumerate()? {
            if info.serial.is_empty() || info.serial.len() > MAX_PRODUCT_SN_LEN {
                log::warn!(
                    "Skipping device '{}': serial length {} out of contract",
                    info.name,
                    info.serial.len()
                );
                continue;
            }
            if devices.len() == MAX_SUPPORTED_CAMERA_MODULE {
                log::warn!(
                    "More than {} devices attached, ignoring the rest",
                    MAX_SUPPORTED_CAMERA_MODULE
                );
                break;
            }
            devices.push(info);
        }

        if devices.is_empty() {
            return Err(Voxel3dError::device_not_found(""));
        }
        log::info!("Scan found {} device(s)", devices.len());
        Ok(devices)
    }
}
