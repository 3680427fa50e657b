//! Runtime settings for the diagnostics core.

use std::time::Duration;

use crate::deviation::DEFAULT_EVENT_CAPACITY;

/// Diagnostics configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticsConfig {
    /// Device index (e.g., 0 for /dev/video0)
    pub device_index: u32,
    /// Number of mmap buffers requested for capture
    pub buffer_count: u32,
    /// Undelivered events a deviation scan may buffer
    pub scan_event_capacity: usize,
    /// Timeout passed to register transfers; zero leaves the driver default
    pub register_timeout: Duration,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            buffer_count: 4,
            scan_event_capacity: DEFAULT_EVENT_CAPACITY,
            register_timeout: Duration::ZERO,
        }
    }
}

impl DiagnosticsConfig {
    /// Device node path for the configured index.
    #[must_use]
    pub fn device_path(&self) -> String {
        format!("/dev/video{}", self.device_index)
    }
}
