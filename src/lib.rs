//! # voxel3d - Rust SDK core for the 5Voxel 5VHiRab multi-sensor camera
//!
//! Device session and frame-acquisition engine for the 5VHiRab: ToF depth/IR
//! with confidence gating and point-cloud projection, RGB and FLIR thermal
//! frames with optional rectification onto the ToF grid, IMU sampling, and a
//! resumable-state firmware upgrader. The USB layer is abstract: anything
//! implementing [`transport::Transport`]/[`transport::Backend`] plugs in, and
//! an in-memory [`emulator`] ships with the crate.
//!
//! ## Quick Start
//! ```
//! use std::sync::Arc;
//! use voxel3d::emulator::{EmulatedBackend, EmulatedDevice};
//! use voxel3d::{Modality, SessionManager, TOF_DEPTH_PIXELS};
//!
//! let device = EmulatedDevice::new("5VX-0001");
//! let backend = Arc::new(EmulatedBackend::new(vec![device.clone()]));
//! let mut manager = SessionManager::new(backend);
//!
//! let session = manager.acquire("", Modality::Tof).unwrap();
//! let mut depth = vec![0u16; TOF_DEPTH_PIXELS];
//! let mut ir = vec![0u16; TOF_DEPTH_PIXELS];
//! // 0 means no frame queued yet; poll again next tick.
//! let count = session.tof_query_frame(&mut depth, &mut ir).unwrap();
//! assert_eq!(count, 0);
//! ```

pub mod error;
pub mod types;
pub mod protocol;
pub mod transport;
pub mod registry;
pub mod rectify;
pub mod tof;
pub mod rgb;
pub mod thermal;
pub mod firmware;
pub mod session;
pub mod emulator;
pub mod compat;

pub use error::Voxel3dError;
pub use registry::DeviceRegistry;
pub use session::{Session, SessionManager};
pub use types::*;

/// Result type alias for voxel3d operations.
pub type Result<T> = std::result::Result<T, Voxel3dError>;

/// Library version string.
pub fn lib_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Library build date, stamped at compile time.
pub fn lib_build_date() -> &'static str {
    env!("VOXEL3D_BUILD_DATE")
}
