//! V4L2 device implementation using the v4l crate.

use std::path::Path;
use std::time::Duration;

use tracing::debug;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream as V4lCaptureStream;
use v4l::Device;

use crate::control::{self, RegisterRequest, StreamStatistics};
use crate::traits::{
    CameraDevice, CaptureStream, DeviceCapabilities, DeviceControl, DiagError, Frame,
    FrameMetadata, Result,
};

/// V4L2 device implementation wrapping the v4l crate.
///
/// Besides streaming, the device answers the driver's private control
/// requests on the same file descriptor.
pub struct V4L2Device {
    device: Device,
    capabilities: DeviceCapabilities,
}

impl V4L2Device {
    /// Open a V4L2 device by index (e.g., 0 for /dev/video0).
    pub fn open(index: u32) -> Result<Self> {
        let device = Device::new(index as usize).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                DiagError::DeviceNotFound(index)
            } else {
                DiagError::DeviceOpenFailed(err.to_string())
            }
        })?;
        Self::from_device(device)
    }

    /// Open a V4L2 device by path (e.g., /dev/video2).
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        let device = Device::with_path(path.as_ref())
            .map_err(|err| DiagError::DeviceOpenFailed(err.to_string()))?;
        Self::from_device(device)
    }

    fn from_device(device: Device) -> Result<Self> {
        let caps = device
            .query_caps()
            .map_err(|err| DiagError::DeviceOpenFailed(err.to_string()))?;

        let capabilities = DeviceCapabilities {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            can_capture: caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE),
            can_stream: caps.capabilities.contains(v4l::capability::Flags::STREAMING),
        };
        debug!(
            driver = %capabilities.driver,
            card = %capabilities.card,
            "Opened V4L2 device"
        );

        Ok(Self {
            device,
            capabilities,
        })
    }

    fn fd(&self) -> std::os::unix::io::RawFd {
        self.device.handle().fd()
    }
}

impl CameraDevice for V4L2Device {
    type Stream<'a> = V4L2Stream<'a>;

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn create_stream(&mut self, buffer_count: u32) -> Result<Self::Stream<'_>> {
        let stream = Stream::with_buffers(&self.device, Type::VideoCapture, buffer_count)
            .map_err(|err| DiagError::StreamError(err.to_string()))?;

        Ok(V4L2Stream { stream })
    }
}

impl DeviceControl for V4L2Device {
    fn read_register(&self, request: &RegisterRequest, buffer: &mut [u8]) -> Result<()> {
        control::read_register(self.fd(), request, buffer)
    }

    fn write_register(&self, request: &RegisterRequest, buffer: &[u8]) -> Result<()> {
        control::write_register(self.fd(), request, buffer)
    }

    fn stream_statistics(&self) -> Result<StreamStatistics> {
        control::stream_statistics(self.fd())
    }
}

/// V4L2 capture stream wrapping mmap-based streaming.
pub struct V4L2Stream<'a> {
    stream: Stream<'a>,
}

impl CaptureStream for V4L2Stream<'_> {
    fn next_frame(&mut self) -> Result<Frame> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|err| DiagError::StreamError(err.to_string()))?;

        // Safe conversions: V4L2 timestamps are always non-negative in practice
        #[allow(clippy::cast_sign_loss)]
        let secs = meta.timestamp.sec.max(0) as u64;
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let nanos = (meta.timestamp.usec.max(0) as u32).saturating_mul(1000);

        // Comparisons must not see stale bytes past the payload.
        let used = match meta.bytesused as usize {
            0 => buf.len(),
            n => n.min(buf.len()),
        };
        let data = buf.get(..used).unwrap_or(buf).to_vec();

        Ok(Frame {
            data,
            metadata: FrameMetadata {
                sequence: meta.sequence,
                timestamp: Duration::new(secs, nanos),
                bytes_used: meta.bytesused,
            },
        })
    }
}
