//! Camera identity registers reached through the I2C passthrough.
//!
//! The control register map (BCRM) sits at a device-specific base address
//! published in the CCI register block. Values in the map are big-endian.

use std::fmt;

use crate::control::RegisterRequest;
use crate::traits::{DeviceControl, Result};

/// CCI register holding the BCRM base address.
pub const CCI_BCRM_REG: u32 = 0x0014;
/// CCI register holding the NUL-terminated serial number.
pub const CCI_DEVICE_SERIAL_NUMBER: u32 = 0x0198;
/// BCRM offset of the 64-bit firmware version.
pub const BCRM_DEV_FW_VERSION: u32 = 0x0010;
/// BCRM offset of the device temperature.
pub const BCRM_DEV_TEMPERATURE: u32 = 0x0310;

const SERIAL_NUMBER_LEN: usize = 64;

/// Firmware version as packed in `BCRM_DEV_FW_VERSION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVersion {
    /// Special build number (bits 0..8).
    pub special: u8,
    /// Major version (bits 8..16).
    pub major: u8,
    /// Minor version (bits 16..32).
    pub minor: u16,
    /// Patch level (bits 32..64).
    pub patch: u32,
}

impl From<u64> for FirmwareVersion {
    #[allow(clippy::cast_possible_truncation)]
    fn from(raw: u64) -> Self {
        Self {
            special: raw as u8,
            major: (raw >> 8) as u8,
            minor: (raw >> 16) as u16,
            patch: (raw >> 32) as u32,
        }
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.special, self.major, self.minor, self.patch
        )
    }
}

/// Device temperature in tenths of a degree Celsius.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Temperature(pub i32);

impl Temperature {
    /// Value in degrees Celsius.
    #[must_use]
    pub fn celsius(self) -> f64 {
        f64::from(self.0) / 10.0
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1} °C", self.celsius())
    }
}

/// Identity fields read in one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Firmware version.
    pub firmware: FirmwareVersion,
    /// Device temperature.
    pub temperature: Temperature,
    /// Serial number.
    pub serial_number: String,
}

/// Base address of the BCRM register map.
pub fn bcrm_base<D: DeviceControl + ?Sized>(device: &D) -> Result<u32> {
    let mut buf = [0u8; 2];
    device.read_register(&RegisterRequest::new(CCI_BCRM_REG), &mut buf)?;
    Ok(u32::from(u16::from_be_bytes(buf)))
}

/// Firmware version of the camera.
pub fn firmware_version<D: DeviceControl + ?Sized>(device: &D) -> Result<FirmwareVersion> {
    let base = bcrm_base(device)?;
    let mut buf = [0u8; 8];
    device.read_register(&RegisterRequest::new(base + BCRM_DEV_FW_VERSION), &mut buf)?;
    Ok(FirmwareVersion::from(u64::from_be_bytes(buf)))
}

/// Device temperature, a big-endian count of tenths of a degree.
pub fn device_temperature<D: DeviceControl + ?Sized>(device: &D) -> Result<Temperature> {
    let base = bcrm_base(device)?;
    let mut buf = [0u8; 4];
    device.read_register(&RegisterRequest::new(base + BCRM_DEV_TEMPERATURE), &mut buf)?;
    Ok(Temperature(i32::from_be_bytes(buf)))
}

/// Serial number string.
///
/// The register is a raw byte string; NUL padding is dropped wherever it
/// appears.
pub fn serial_number<D: DeviceControl + ?Sized>(device: &D) -> Result<String> {
    let mut buf = [0u8; SERIAL_NUMBER_LEN];
    device.read_register(&RegisterRequest::new(CCI_DEVICE_SERIAL_NUMBER), &mut buf)?;
    let bytes: Vec<u8> = buf.into_iter().filter(|&c| c != 0).collect();
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Read firmware version, temperature and serial number.
pub fn read_identity<D: DeviceControl + ?Sized>(device: &D) -> Result<DeviceIdentity> {
    Ok(DeviceIdentity {
        firmware: firmware_version(device)?,
        temperature: device_temperature(device)?,
        serial_number: serial_number(device)?,
    })
}
