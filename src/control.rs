//! Private ioctl extension of the capture driver.
//!
//! The driver beneath the standard V4L2 API exposes three private requests:
//! an I2C register read, an I2C register write and a stream statistics
//! query. The request structures and codes below mirror the driver header
//! bit-for-bit; changing field order or widths breaks compatibility.
//!
//! Request codes use the generic Linux `_IOC` encoding
//! (`dir << 30 | size << 16 | type << 8 | nr`), which is the layout on
//! x86, x86_64, arm and aarch64.

use std::fmt;
use std::os::unix::io::RawFd;
use std::time::Duration;

use tracing::{trace, warn};

use crate::traits::{DeviceControl, DiagError, Result};

/// First ioctl number reserved for driver-private requests.
pub const BASE_VIDIOC_PRIVATE: u32 = 192;

/// Register address width used by the camera's control registers.
pub const DEFAULT_REGISTER_SIZE: u32 = 2;

const IOC_WRITE: u32 = 1;
const IOC_READ: u32 = 2;

#[allow(clippy::cast_possible_truncation)]
const fn ioc(dir: u32, nr: u32, size: usize) -> u32 {
    (dir << 30) | ((size as u32) << 16) | ((b'V' as u32) << 8) | nr
}

/// I2C register read, `_IOWR('V', BASE_VIDIOC_PRIVATE + 0, struct v4l2_i2c)`.
pub const VIDIOC_R_I2C: u32 = ioc(
    IOC_READ | IOC_WRITE,
    BASE_VIDIOC_PRIVATE,
    std::mem::size_of::<V4l2I2c>(),
);

/// I2C register write, `_IOWR('V', BASE_VIDIOC_PRIVATE + 1, struct v4l2_i2c)`.
pub const VIDIOC_W_I2C: u32 = ioc(
    IOC_READ | IOC_WRITE,
    BASE_VIDIOC_PRIVATE + 1,
    std::mem::size_of::<V4l2I2c>(),
);

/// Stream statistics, `_IOR('V', BASE_VIDIOC_PRIVATE + 5, struct v4l2_stats_t)`.
pub const VIDIOC_STREAMSTAT: u32 = ioc(
    IOC_READ,
    BASE_VIDIOC_PRIVATE + 5,
    std::mem::size_of::<V4l2Stats>(),
);

/// `struct v4l2_i2c`
#[repr(C)]
#[derive(Debug)]
struct V4l2I2c {
    register_address: u32,
    timeout: u32,
    buffer: *const libc::c_char,
    register_size: u32,
    num_bytes: u32,
}

/// `struct v4l2_stats_t`
#[repr(C)]
#[derive(Debug, Default)]
struct V4l2Stats {
    frames_count: u64,
    packet_crc_error: u64,
    frames_underrun: u64,
    frames_incomplete: u64,
    current_frame_count: u64,
    current_frame_interval: u64,
}

/// Addressing part of an I2C register transfer.
///
/// The byte count is taken from the buffer handed to the transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterRequest {
    /// Register address.
    pub address: u32,
    /// Width of the register address in bytes.
    pub address_width: u32,
    /// Transfer timeout passed through to the driver, in milliseconds.
    pub timeout_ms: u32,
}

impl RegisterRequest {
    /// Request for `address` with the default address width and the
    /// driver's default timeout.
    #[must_use]
    pub const fn new(address: u32) -> Self {
        Self {
            address,
            address_width: DEFAULT_REGISTER_SIZE,
            timeout_ms: 0,
        }
    }

    /// Override the register address width.
    #[must_use]
    pub const fn with_address_width(mut self, address_width: u32) -> Self {
        self.address_width = address_width;
        self
    }

    /// Set the transfer timeout, saturating at `u32::MAX` milliseconds.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        self
    }

    fn encode(&self, buffer: *const u8, len: usize) -> Result<V4l2I2c> {
        if len == 0 {
            return Err(DiagError::InvalidArgument(
                "register transfer needs at least one byte".to_owned(),
            ));
        }
        let num_bytes = u32::try_from(len).map_err(|_| {
            DiagError::InvalidArgument(format!("register transfer of {len} bytes is too large"))
        })?;

        Ok(V4l2I2c {
            register_address: self.address,
            timeout: self.timeout_ms,
            buffer: buffer.cast(),
            register_size: self.address_width,
            num_bytes,
        })
    }
}

/// Point-in-time snapshot of the driver's streaming counters.
///
/// Values are passed through as reported. The per-interval pair is reset
/// by the device at the start of each interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStatistics {
    /// Total number of frames received.
    pub frames_count: u64,
    /// Number of packets with CRC errors.
    pub packet_crc_errors: u64,
    /// Frames dropped because of buffer underrun.
    pub frames_underrun: u64,
    /// Frames that were not completed.
    pub frames_incomplete: u64,
    /// Frames received within the current interval.
    pub current_frame_count: u64,
    /// Length of the current interval in microseconds.
    pub current_frame_interval_us: u64,
}

impl StreamStatistics {
    /// Frame rate the driver observed over its current interval.
    ///
    /// Returns 0.0 while the interval is empty.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn current_frame_rate(&self) -> f64 {
        if self.current_frame_interval_us == 0 {
            return 0.0;
        }
        self.current_frame_count as f64 / (self.current_frame_interval_us as f64 / 1_000_000.0)
    }
}

impl From<V4l2Stats> for StreamStatistics {
    fn from(raw: V4l2Stats) -> Self {
        Self {
            frames_count: raw.frames_count,
            packet_crc_errors: raw.packet_crc_error,
            frames_underrun: raw.frames_underrun,
            frames_incomplete: raw.frames_incomplete,
            current_frame_count: raw.current_frame_count,
            current_frame_interval_us: raw.current_frame_interval,
        }
    }
}

impl fmt::Display for StreamStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frames={} crc_errors={} underrun={} incomplete={} driver_fps={:.2}",
            self.frames_count,
            self.packet_crc_errors,
            self.frames_underrun,
            self.frames_incomplete,
            self.current_frame_rate()
        )
    }
}

#[allow(unsafe_code)]
fn ioctl<T>(fd: RawFd, operation: &'static str, request: u32, arg: &mut T) -> Result<()> {
    #[allow(clippy::cast_possible_wrap, clippy::useless_conversion)]
    let request = request as libc::Ioctl;
    // SAFETY: `arg` is a live `#[repr(C)]` struct matching the layout the
    // driver expects for `request`; any buffer it points to outlives the call.
    let ret = unsafe { libc::ioctl(fd, request, std::ptr::from_mut(arg)) };
    if ret < 0 {
        let err = std::io::Error::last_os_error();
        warn!(fd, operation, ?err, "Private ioctl failed");
        return Err(DiagError::device_io(operation, err));
    }
    Ok(())
}

/// Read `buffer.len()` bytes from a device register through the I2C passthrough.
pub fn read_register(fd: RawFd, request: &RegisterRequest, buffer: &mut [u8]) -> Result<()> {
    let mut raw = request.encode(buffer.as_mut_ptr(), buffer.len())?;
    ioctl(fd, "VIDIOC_R_I2C", VIDIOC_R_I2C, &mut raw)?;
    trace!(fd, address = request.address, bytes = buffer.len(), "Register read");
    Ok(())
}

/// Write `buffer` to a device register through the I2C passthrough.
pub fn write_register(fd: RawFd, request: &RegisterRequest, buffer: &[u8]) -> Result<()> {
    let mut raw = request.encode(buffer.as_ptr(), buffer.len())?;
    ioctl(fd, "VIDIOC_W_I2C", VIDIOC_W_I2C, &mut raw)?;
    trace!(fd, address = request.address, bytes = buffer.len(), "Register write");
    Ok(())
}

/// Query the driver's stream statistics.
pub fn stream_statistics(fd: RawFd) -> Result<StreamStatistics> {
    let mut raw = V4l2Stats::default();
    ioctl(fd, "VIDIOC_STREAMSTAT", VIDIOC_STREAMSTAT, &mut raw)?;
    Ok(raw.into())
}

/// Read a big-endian register value into host byte order.
///
/// Multi-byte register values are stored big-endian on the device; on a
/// little-endian host the buffer is reversed after the read.
pub fn read_register_be<D: DeviceControl + ?Sized>(
    device: &D,
    request: &RegisterRequest,
    buffer: &mut [u8],
) -> Result<()> {
    device.read_register(request, buffer)?;
    if cfg!(target_endian = "little") {
        buffer.reverse();
    }
    Ok(())
}

/// Write a host-order value to a big-endian register.
pub fn write_register_be<D: DeviceControl + ?Sized>(
    device: &D,
    request: &RegisterRequest,
    buffer: &[u8],
) -> Result<()> {
    let mut swapped = buffer.to_vec();
    if cfg!(target_endian = "little") {
        swapped.reverse();
    }
    device.write_register(request, &swapped)
}
