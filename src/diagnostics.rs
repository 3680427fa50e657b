//! Collaborator-facing entry point.
//!
//! [`FrameDiagnostics`] ties the frame rate estimator, deviation scans and
//! the driver's control channel to one device. The capture path calls
//! [`FrameDiagnostics::on_frame`] for every delivered frame; everything else
//! is requested on demand by the owner.

use std::sync::Arc;

use tracing::debug;

use crate::config::DiagnosticsConfig;
use crate::control::{RegisterRequest, StreamStatistics};
use crate::deviation::{DeviationCalculator, DeviationScan, FrameTable, ReferenceFrame};
use crate::fps::FpsCalculator;
use crate::traits::{DeviceControl, Frame, Result};

/// Diagnostics for one capture device.
pub struct FrameDiagnostics<D> {
    device: D,
    fps: FpsCalculator,
    config: DiagnosticsConfig,
}

impl<D: DeviceControl> FrameDiagnostics<D> {
    /// Wrap the control side of `device`.
    pub fn new(device: D, config: DiagnosticsConfig) -> Self {
        Self {
            device,
            fps: FpsCalculator::new(),
            config,
        }
    }

    /// The wrapped device.
    pub const fn device(&self) -> &D {
        &self.device
    }

    /// Active configuration.
    pub const fn config(&self) -> &DiagnosticsConfig {
        &self.config
    }

    /// Record a frame arrival at the current time.
    pub fn on_frame_arrived(&self) {
        self.fps.trigger();
    }

    /// Record a delivered frame using its driver timestamp.
    pub fn on_frame(&self, frame: &Frame) {
        self.fps.trigger_at(frame.metadata.timestamp_us());
    }

    /// Current delivery rate in frames per second, 0.0 if unknown.
    pub fn query_fps(&self) -> f64 {
        self.fps.fps()
    }

    /// Forget rate history, e.g. when the stream stops or restarts.
    pub fn reset_stream(&self) {
        debug!("Resetting frame rate window");
        self.fps.clear();
    }

    /// Start comparing `table` against `reference` in the background.
    pub fn start_deviation_scan(
        &self,
        reference: ReferenceFrame,
        table: Arc<FrameTable>,
    ) -> Result<DeviationScan> {
        DeviationCalculator::new(reference, table)
            .with_event_capacity(self.config.scan_event_capacity)
            .start()
    }

    /// Request for `address` carrying the configured timeout.
    pub fn register_request(&self, address: u32) -> RegisterRequest {
        RegisterRequest::new(address).with_timeout(self.config.register_timeout)
    }

    /// Read a device register through the I2C passthrough.
    pub fn read_device_register(&self, request: &RegisterRequest, buffer: &mut [u8]) -> Result<()> {
        self.device.read_register(request, buffer)
    }

    /// Write a device register through the I2C passthrough.
    pub fn write_device_register(&self, request: &RegisterRequest, buffer: &[u8]) -> Result<()> {
        self.device.write_register(request, buffer)
    }

    /// Snapshot of the driver's stream counters.
    pub fn query_stream_statistics(&self) -> Result<StreamStatistics> {
        self.device.stream_statistics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deviation::{Deviation, ScanEvent};
    use crate::mock::MockDevice;
    use crate::traits::{CameraDevice, CaptureStream, DiagError};
    use std::time::Duration;

    fn diagnostics() -> FrameDiagnostics<MockDevice> {
        FrameDiagnostics::new(MockDevice::new(), DiagnosticsConfig::default())
    }

    #[test]
    fn test_frames_drive_fps() {
        let mut device = MockDevice::new().with_frame_size(8);
        let diag = diagnostics();
        let mut stream = device.create_stream(4).expect("create_stream failed");

        for _ in 0..8 {
            let frame = stream.next_frame().expect("next_frame failed");
            diag.on_frame(&frame);
        }
        // Mock frames are 40ms apart.
        assert!((diag.query_fps() - 25.0).abs() < 1e-9);

        diag.reset_stream();
        assert!(diag.query_fps().abs() < f64::EPSILON);
    }

    #[test]
    fn test_deviation_scan_through_facade() {
        let diag = diagnostics();
        let reference: ReferenceFrame = Arc::from(vec![1u8, 2, 3, 4]);
        let mut table = FrameTable::new();
        table.insert(
            0,
            Frame {
                data: vec![1, 2, 3],
                metadata: crate::traits::FrameMetadata {
                    sequence: 0,
                    timestamp: Duration::ZERO,
                    bytes_used: 3,
                },
            },
        );

        let mut scan = diag
            .start_deviation_scan(reference, Arc::new(table))
            .expect("scan failed to start");
        assert_eq!(
            scan.recv(),
            Some(ScanEvent::Progress {
                row: 0,
                deviation: Deviation::SizeMismatch
            })
        );
        assert!(scan.recv().is_some_and(|event| event.is_done()));
    }

    #[test]
    fn test_register_round_trip_uses_configured_timeout() {
        let config = DiagnosticsConfig {
            register_timeout: Duration::from_millis(500),
            ..DiagnosticsConfig::default()
        };
        let diag = FrameDiagnostics::new(MockDevice::new(), config);

        let request = diag.register_request(0x0200);
        diag.write_device_register(&request, &[0xAA, 0xBB])
            .expect("write failed");

        let mut buffer = [0u8; 2];
        diag.read_device_register(&request, &mut buffer)
            .expect("read failed");
        assert_eq!(buffer, [0xAA, 0xBB]);
        assert_eq!(
            diag.device().last_request().map(|r| r.timeout_ms),
            Some(500)
        );
    }

    #[test]
    fn test_statistics_pass_through_and_errors() {
        let stats = StreamStatistics {
            frames_count: 100,
            packet_crc_errors: 1,
            ..StreamStatistics::default()
        };
        let diag = FrameDiagnostics::new(
            MockDevice::new().with_statistics(stats),
            DiagnosticsConfig::default(),
        );
        assert_eq!(diag.query_stream_statistics().expect("query failed"), stats);

        diag.device().fail_with(libc::ENODEV);
        assert!(matches!(
            diag.query_stream_statistics(),
            Err(DiagError::DeviceIo { .. })
        ));
    }
}
