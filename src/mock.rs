//! Mock device implementation for testing without hardware.

use std::collections::HashMap;
use std::io;
use std::time::Duration;

use parking_lot::Mutex;

use crate::control::{RegisterRequest, StreamStatistics};
use crate::traits::{
    CameraDevice, CaptureStream, DeviceCapabilities, DeviceControl, DiagError, Frame,
    FrameMetadata, Result,
};

/// Mock device for testing without hardware.
///
/// Registers are byte-addressed: a transfer of `n` bytes at `address`
/// touches `address..address + n`. Unwritten bytes read as zero.
pub struct MockDevice {
    capabilities: DeviceCapabilities,
    frame_size: usize,
    frame_count: u32,
    registers: Mutex<HashMap<u32, u8>>,
    statistics: Mutex<StreamStatistics>,
    failure: Mutex<Option<i32>>,
    last_request: Mutex<Option<RegisterRequest>>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// Create a new mock device with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            capabilities: DeviceCapabilities {
                driver: "mock".to_owned(),
                card: "Mock Camera".to_owned(),
                bus_info: "mock:0".to_owned(),
                can_capture: true,
                can_stream: true,
            },
            frame_size: 64 * 48 * 2,
            frame_count: 0,
            registers: Mutex::new(HashMap::new()),
            statistics: Mutex::new(StreamStatistics::default()),
            failure: Mutex::new(None),
            last_request: Mutex::new(None),
        }
    }

    /// Set the payload size of generated frames.
    #[must_use]
    pub fn with_frame_size(mut self, frame_size: usize) -> Self {
        self.frame_size = frame_size;
        self
    }

    /// Set the counters returned by the statistics query.
    #[must_use]
    pub fn with_statistics(self, statistics: StreamStatistics) -> Self {
        *self.statistics.lock() = statistics;
        self
    }

    /// Make every control call fail with the given errno.
    pub fn fail_with(&self, errno: i32) {
        *self.failure.lock() = Some(errno);
    }

    /// Store raw bytes starting at `address`.
    pub fn set_register_bytes(&self, address: u32, bytes: &[u8]) {
        let mut registers = self.registers.lock();
        for (offset, byte) in (0u32..).zip(bytes) {
            registers.insert(address + offset, *byte);
        }
    }

    /// Raw bytes stored starting at `address`.
    pub fn register_bytes(&self, address: u32, len: u32) -> Vec<u8> {
        let registers = self.registers.lock();
        (address..address + len)
            .map(|addr| registers.get(&addr).copied().unwrap_or(0))
            .collect()
    }

    /// The most recent register request seen by the device.
    pub fn last_request(&self) -> Option<RegisterRequest> {
        *self.last_request.lock()
    }

    fn check_failure(&self, operation: &'static str) -> Result<()> {
        match *self.failure.lock() {
            Some(errno) => Err(DiagError::device_io(
                operation,
                io::Error::from_raw_os_error(errno),
            )),
            None => Ok(()),
        }
    }
}

impl DeviceControl for MockDevice {
    fn read_register(&self, request: &RegisterRequest, buffer: &mut [u8]) -> Result<()> {
        *self.last_request.lock() = Some(*request);
        self.check_failure("VIDIOC_R_I2C")?;

        let registers = self.registers.lock();
        for (addr, byte) in (request.address..).zip(buffer.iter_mut()) {
            *byte = registers.get(&addr).copied().unwrap_or(0);
        }
        Ok(())
    }

    fn write_register(&self, request: &RegisterRequest, buffer: &[u8]) -> Result<()> {
        *self.last_request.lock() = Some(*request);
        self.check_failure("VIDIOC_W_I2C")?;
        self.set_register_bytes(request.address, buffer);
        Ok(())
    }

    fn stream_statistics(&self) -> Result<StreamStatistics> {
        self.check_failure("VIDIOC_STREAMSTAT")?;
        Ok(*self.statistics.lock())
    }
}

impl CameraDevice for MockDevice {
    type Stream<'a> = MockStream<'a>;

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn create_stream(&mut self, _buffer_count: u32) -> Result<Self::Stream<'_>> {
        Ok(MockStream {
            device: self,
            pattern: TestPattern::Ramp,
        })
    }
}

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// Bytes counting up from zero, wrapping at 256.
    Ramp,
    /// Every byte set to the given value.
    Solid(u8),
}

/// Mock capture stream for testing.
pub struct MockStream<'a> {
    device: &'a mut MockDevice,
    pattern: TestPattern,
}

impl MockStream<'_> {
    /// Set the test pattern for frame generation.
    #[must_use]
    pub const fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }
}

impl CaptureStream for MockStream<'_> {
    fn next_frame(&mut self) -> Result<Frame> {
        let data = generate_test_frame(self.device.frame_size, self.pattern);

        let seq = self.device.frame_count;
        self.device.frame_count += 1;

        #[allow(clippy::cast_possible_truncation)]
        let bytes_used = data.len() as u32;

        Ok(Frame {
            data,
            metadata: FrameMetadata {
                sequence: seq,
                timestamp: Duration::from_millis(u64::from(seq) * 40), // 25fps
                bytes_used,
            },
        })
    }
}

/// Generate test frame data based on pattern.
fn generate_test_frame(size: usize, pattern: TestPattern) -> Vec<u8> {
    match pattern {
        #[allow(clippy::cast_possible_truncation)]
        TestPattern::Ramp => (0..size).map(|i| i as u8).collect(),
        TestPattern::Solid(value) => vec![value; size],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_device_creation() {
        let device = MockDevice::new();
        assert_eq!(device.capabilities().driver, "mock");
        assert!(device.capabilities().can_capture);
        assert!(device.capabilities().can_stream);
    }

    #[test]
    fn test_mock_stream_capture() {
        let mut device = MockDevice::new().with_frame_size(16);
        let mut stream = device.create_stream(4).expect("create_stream should succeed");

        let frame1 = stream.next_frame().expect("next_frame should succeed");
        assert_eq!(frame1.metadata.sequence, 0);
        assert_eq!(frame1.len(), 16);

        let frame2 = stream.next_frame().expect("next_frame should succeed");
        assert_eq!(frame2.metadata.sequence, 1);
        assert_eq!(frame2.metadata.timestamp_us(), 40_000);
        assert_eq!(frame1.data, frame2.data);
    }

    #[test]
    fn test_solid_pattern() {
        let data = generate_test_frame(8, TestPattern::Solid(0xAB));
        assert!(data.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn test_register_storage() {
        let device = MockDevice::new();
        device
            .write_register(&RegisterRequest::new(0x10), &[1, 2, 3])
            .expect("write should succeed");

        let mut buffer = [0u8; 4];
        device
            .read_register(&RegisterRequest::new(0x10), &mut buffer)
            .expect("read should succeed");
        assert_eq!(buffer, [1, 2, 3, 0]);
    }

    #[test]
    fn test_injected_failure() {
        let device = MockDevice::new();
        device.fail_with(libc::ENODEV);

        let result = device.stream_statistics();
        match result {
            Err(DiagError::DeviceIo { operation, source }) => {
                assert_eq!(operation, "VIDIOC_STREAMSTAT");
                assert_eq!(source.raw_os_error(), Some(libc::ENODEV));
            }
            other => unreachable!("expected DeviceIo, got {other:?}"),
        }
    }
}
