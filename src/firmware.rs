//! Firmware upgrade.
//!
//! Chunked image transfer with a state machine of
//! `Idle -> Downloading -> Complete | Error`. Progress is observable two
//! ways, and both see identical transitions: a caller-supplied callback
//! invoked after every chunk, and a lock-free status handle pollable from
//! other threads while the transfer holds the session lock. Terminal state
//! and percentage stay queryable until the next upgrade starts.
//!
//! The device must be power cycled after a completed upgrade for the new
//! firmware to take effect; the upgrader does not do that.

use crate::protocol;
use crate::transport::ControlLink;
use crate::types::UpgradeState;
use crate::{Result, Voxel3dError};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Progress observer: `(state, percent_complete)` after every transition.
pub type ProgressFn<'a> = &'a mut dyn FnMut(UpgradeState, u32);

/// Upgrade state shared between the transfer and pollers on other threads.
pub struct UpgradeStatus {
    state: AtomicU8,
    percent: AtomicU8,
}

impl UpgradeStatus {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(UpgradeState::Idle.tag()),
            percent: AtomicU8::new(0),
        }
    }

    fn set(&self, state: UpgradeState, percent: u32) {
        self.percent.store(percent.min(100) as u8, Ordering::Relaxed);
        self.state.store(state.tag(), Ordering::Release);
    }

    /// Current `(state, percent_complete)`.
    pub fn snapshot(&self) -> (UpgradeState, u32) {
        let state = UpgradeState::from_tag(self.state.load(Ordering::Acquire));
        (state, self.percent.load(Ordering::Relaxed) as u32)
    }
}

pub struct FirmwareUpgrader {
    serial: String,
    link: ControlLink,
    status: Arc<UpgradeStatus>,
}

impl FirmwareUpgrader {
    pub(crate) fn new(serial: String, link: ControlLink) -> Self {
        Self {
            serial,
            link,
            status: Arc::new(UpgradeStatus::new()),
        }
    }

    /// Shared handle for callback-free polling (see [`UpgradeStatus`]).
    pub fn status_handle(&self) -> Arc<UpgradeStatus> {
        self.status.clone()
    }

    /// Validate the firmware image container and transfer it in chunks.
    ///
    /// Fails with `UpgradeRejected` before touching the status when the
    /// image container is malformed; a mid-transfer rejection or transport
    /// failure leaves the status in `Error` with the last percentage.
    pub fn upgrade(&mut self, image: &[u8], mut progress: Option<ProgressFn<'_>>) -> Result<()> {
        let parsed = protocol::parse_firmware_image(image)?;
        log::info!(
            "FW upgrade on '{}': image {} ({}, {} bytes)",
            self.serial,
            parsed.version,
            parsed.build_date,
            parsed.payload.len()
        );

        self.report(UpgradeState::Downloading, 0, &mut progress);
        match self.transfer(parsed.payload, &mut progress) {
            Ok(()) => {
                self.report(UpgradeState::Complete, 100, &mut progress);
                log::info!("FW upgrade on '{}' complete; power cycle required", self.serial);
                Ok(())
            }
            Err(e) => {
                let (_, percent) = self.status.snapshot();
                self.report(UpgradeState::Error, percent, &mut progress);
                log::warn!("FW upgrade on '{}' failed: {}", self.serial, e);
                Err(e)
            }
        }
    }

    fn transfer(&mut self, payload: &[u8], progress: &mut Option<ProgressFn<'_>>) -> Result<()> {
        self.link
            .fw_upgrade_begin(payload.len() as u32)
            .map_err(as_rejection)?;

        let total = payload.len();
        let mut sent = 0usize;
        for chunk in payload.chunks(protocol::FW_CHUNK_SIZE) {
            self.link.fw_upgrade_data(chunk).map_err(as_rejection)?;
            sent += chunk.len();
            // Hold 100% for the commit ack.
            let percent = (sent * 100 / total).min(99) as u32;
            self.report(UpgradeState::Downloading, percent, progress);
        }

        self.link.fw_upgrade_commit().map_err(as_rejection)
    }

    fn report(&self, state: UpgradeState, percent: u32, progress: &mut Option<ProgressFn<'_>>) {
        self.status.set(state, percent);
        if let Some(cb) = progress {
            cb(state, percent);
        }
    }
}

/// A device-side NAK during the transfer is a rejection, not a codec bug.
fn as_rejection(e: Voxel3dError) -> Voxel3dError {
    match e {
        Voxel3dError::DataError(msg) => Voxel3dError::UpgradeRejected(msg),
        other => other,
    }
}
