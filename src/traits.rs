//! Core traits and types for the diagnostics core.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::control::{RegisterRequest, StreamStatistics};

/// Device capability flags.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming.
    pub can_stream: bool,
}

/// Metadata for a captured frame.
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    /// Frame sequence number.
    pub sequence: u32,
    /// Capture timestamp as reported by the driver.
    pub timestamp: Duration,
    /// Actual bytes used in the frame buffer.
    pub bytes_used: u32,
}

impl FrameMetadata {
    /// Driver timestamp in whole microseconds, saturating at `u64::MAX`.
    #[must_use]
    pub fn timestamp_us(&self) -> u64 {
        u64::try_from(self.timestamp.as_micros()).unwrap_or(u64::MAX)
    }
}

/// A captured video frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw frame data.
    pub data: Vec<u8>,
    /// Frame metadata.
    pub metadata: FrameMetadata,
}

impl Frame {
    /// Frame payload as a byte slice.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Length of the payload in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the frame carries no payload.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Error type for diagnostics operations.
#[derive(Debug, Error)]
pub enum DiagError {
    /// Device with given index was not found.
    #[error("Device {0} not found")]
    DeviceNotFound(u32),
    /// Failed to open device.
    #[error("Failed to open device: {0}")]
    DeviceOpenFailed(String),
    /// Error during streaming operation.
    #[error("Stream error: {0}")]
    StreamError(String),
    /// A private ioctl round-trip with the driver failed.
    ///
    /// The OS error is kept as reported; callers decide whether to retry.
    #[error("Device I/O failed during {operation}: {source}")]
    DeviceIo {
        /// Name of the request that failed.
        operation: &'static str,
        /// Error reported by the driver.
        #[source]
        source: io::Error,
    },
    /// The OS refused to create a worker thread.
    #[error("Failed to create thread: {0}")]
    ThreadCreation(#[source] io::Error),
    /// A worker thread terminated by panicking.
    #[error("Thread panicked: {0}")]
    ThreadPanicked(String),
    /// An argument was rejected before any work was attempted.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl DiagError {
    /// Wrap an ioctl failure for the named request.
    pub(crate) const fn device_io(operation: &'static str, source: io::Error) -> Self {
        Self::DeviceIo { operation, source }
    }
}

/// Result type for diagnostics operations.
pub type Result<T> = std::result::Result<T, DiagError>;

/// Abstraction over camera device operations.
pub trait CameraDevice {
    /// The stream type returned by `create_stream`.
    type Stream<'a>: CaptureStream
    where
        Self: 'a;

    /// Get device capabilities.
    fn capabilities(&self) -> &DeviceCapabilities;

    /// Create a capture stream with the specified number of buffers.
    fn create_stream(&mut self, buffer_count: u32) -> Result<Self::Stream<'_>>;
}

/// Abstraction over capture stream operations.
pub trait CaptureStream {
    /// Capture the next frame from the stream.
    fn next_frame(&mut self) -> Result<Frame>;
}

/// Private control extension exposed by the capture driver.
///
/// Every call is one synchronous round-trip to the device. Failures are
/// reported as [`DiagError::DeviceIo`] and never retried here, since a
/// register access is not guaranteed to be idempotent.
pub trait DeviceControl {
    /// Read `buffer.len()` bytes starting at the requested register.
    fn read_register(&self, request: &RegisterRequest, buffer: &mut [u8]) -> Result<()>;

    /// Write `buffer` starting at the requested register.
    fn write_register(&self, request: &RegisterRequest, buffer: &[u8]) -> Result<()>;

    /// Fetch the driver's streaming counters.
    fn stream_statistics(&self) -> Result<StreamStatistics>;
}
