//! v4l2-diag: frame-acquisition diagnostics for V4L2 cameras
//!
//! This library measures frame delivery rate, verifies captured frames
//! against a reference on background workers, and talks to the capture
//! driver's private control extension (I2C register passthrough and stream
//! statistics).

pub mod bcrm;
pub mod config;
pub mod control;
pub mod device;
pub mod deviation;
pub mod diagnostics;
pub mod fps;
pub mod thread;
pub mod traits;

#[cfg(test)]
pub mod mock;

pub use config::DiagnosticsConfig;
pub use control::{RegisterRequest, StreamStatistics};
pub use device::V4L2Device;
pub use deviation::{
    count_unequal_bytes, Deviation, DeviationCalculator, DeviationScan, FrameTable,
    ReferenceFrame, ScanEvent, ScanSummary,
};
pub use diagnostics::FrameDiagnostics;
pub use fps::{FpsCalculator, FPS_WINDOW_CAPACITY};
pub use thread::{JoinStatus, WorkerThread};
pub use traits::{
    CameraDevice, CaptureStream, DeviceCapabilities, DeviceControl, DiagError, Frame,
    FrameMetadata, Result,
};
