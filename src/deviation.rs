//! Frame integrity checks against a known-good reference.
//!
//! A [`DeviationCalculator`] compares every row of a [`FrameTable`] with a
//! reference frame on its own worker thread. Results stream back through a
//! bounded channel as [`ScanEvent`]s: one `Progress` per row in ascending row
//! order, then exactly one `Finished`. Nothing is delivered after
//! `Finished`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;

use tracing::{debug, info};

use crate::thread::WorkerThread;
use crate::traits::{Frame, Result};

/// Known-good frame bytes, shared read-only with every scan.
pub type ReferenceFrame = Arc<[u8]>;

/// Raw value reported for rows whose size differs from the reference.
pub const INCOMPARABLE: i64 = -1;

/// Default number of undelivered events a scan buffers before it waits for
/// the consumer.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Captured frames keyed by table row.
///
/// Frames are reference counted so building a table and handing it to a
/// scan never copies frame bytes.
#[derive(Debug, Clone, Default)]
pub struct FrameTable {
    rows: BTreeMap<u32, Arc<Frame>>,
}

impl FrameTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Place `frame` at `row`, returning the frame it replaces.
    pub fn insert<F: Into<Arc<Frame>>>(&mut self, row: u32, frame: F) -> Option<Arc<Frame>> {
        self.rows.insert(row, frame.into())
    }

    /// Frame stored at `row`.
    #[must_use]
    pub fn get(&self, row: u32) -> Option<&Arc<Frame>> {
        self.rows.get(&row)
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &Arc<Frame>)> {
        self.rows.iter().map(|(row, frame)| (*row, frame))
    }
}

impl FromIterator<(u32, Frame)> for FrameTable {
    fn from_iter<I: IntoIterator<Item = (u32, Frame)>>(iter: I) -> Self {
        Self {
            rows: iter
                .into_iter()
                .map(|(row, frame)| (row, Arc::new(frame)))
                .collect(),
        }
    }
}

/// Result of comparing one frame with the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deviation {
    /// Sizes match; this many byte positions differ (0 means identical).
    UnequalBytes(usize),
    /// Sizes differ, so the buffers cannot be compared.
    SizeMismatch,
}

impl Deviation {
    /// Unequal byte count, or [`INCOMPARABLE`] for a size mismatch.
    #[must_use]
    pub fn as_raw(self) -> i64 {
        match self {
            Self::UnequalBytes(count) => i64::try_from(count).unwrap_or(i64::MAX),
            Self::SizeMismatch => INCOMPARABLE,
        }
    }

    /// Whether the frame matched the reference bit for bit.
    #[must_use]
    pub const fn is_identical(self) -> bool {
        matches!(self, Self::UnequalBytes(0))
    }
}

impl fmt::Display for Deviation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnequalBytes(count) => write!(f, "{count} unequal bytes"),
            Self::SizeMismatch => write!(f, "size mismatch"),
        }
    }
}

/// Compare two buffers byte by byte.
///
/// Buffers of different length are incomparable; that is a valid outcome
/// (a truncated frame, for instance), not an error.
#[must_use]
pub fn count_unequal_bytes(reference: &[u8], candidate: &[u8]) -> Deviation {
    if reference.len() != candidate.len() {
        return Deviation::SizeMismatch;
    }
    Deviation::UnequalBytes(
        reference
            .iter()
            .zip(candidate)
            .filter(|(a, b)| a != b)
            .count(),
    )
}

/// Totals for one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Rows compared before the scan ended.
    pub rows_compared: usize,
    /// Rows identical to the reference.
    pub identical_rows: usize,
    /// Rows whose size differed from the reference.
    pub incomparable_rows: usize,
    /// Whether the scan stopped before the last row.
    pub cancelled: bool,
}

impl ScanSummary {
    fn record(&mut self, deviation: Deviation) {
        self.rows_compared += 1;
        match deviation {
            Deviation::UnequalBytes(0) => self.identical_rows += 1,
            Deviation::SizeMismatch => self.incomparable_rows += 1,
            Deviation::UnequalBytes(_) => {}
        }
    }
}

/// Notification delivered from a running scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEvent {
    /// One row was compared.
    Progress {
        /// Table row.
        row: u32,
        /// Comparison result for the row.
        deviation: Deviation,
    },
    /// The scan is over; no further events follow.
    Finished(ScanSummary),
}

impl ScanEvent {
    /// Whether this is the terminal event.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self, Self::Finished(_))
    }
}

/// One deviation scan, not yet started.
///
/// Consumed by [`DeviationCalculator::start`]; a calculator scans once.
#[derive(Debug)]
pub struct DeviationCalculator {
    reference: ReferenceFrame,
    table: Arc<FrameTable>,
    event_capacity: usize,
}

impl DeviationCalculator {
    /// Prepare a scan of `table` against `reference`.
    ///
    /// Neither buffer may be mutated while the scan runs; shared ownership
    /// makes that hold by construction.
    #[must_use]
    pub fn new(reference: ReferenceFrame, table: Arc<FrameTable>) -> Self {
        Self {
            reference,
            table,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Bound on undelivered events before the worker waits for the consumer.
    #[must_use]
    pub fn with_event_capacity(mut self, event_capacity: usize) -> Self {
        self.event_capacity = event_capacity;
        self
    }

    /// Start the scan on a dedicated worker thread.
    ///
    /// Returns as soon as the thread is running. Fails only when the
    /// thread cannot be created.
    pub fn start(self) -> Result<DeviationScan> {
        let (sender, events) = mpsc::sync_channel(self.event_capacity);
        let cancel = Arc::new(AtomicBool::new(false));
        let worker_cancel = Arc::clone(&cancel);

        info!(
            rows = self.table.len(),
            reference_bytes = self.reference.len(),
            "Starting deviation scan"
        );
        let worker = WorkerThread::start("deviation-scan", move || {
            self.run(&sender, &worker_cancel)
        })?;

        Ok(DeviationScan {
            worker,
            events,
            cancel,
            done: false,
        })
    }

    fn run(&self, events: &SyncSender<ScanEvent>, cancel: &AtomicBool) -> ScanSummary {
        let mut summary = ScanSummary::default();

        for (row, frame) in self.table.iter() {
            if cancel.load(Ordering::Relaxed) {
                summary.cancelled = true;
                break;
            }

            let deviation = count_unequal_bytes(&self.reference, frame.bytes());
            summary.record(deviation);

            if events.send(ScanEvent::Progress { row, deviation }).is_err() {
                debug!(row, "Scan consumer went away, stopping");
                summary.cancelled = summary.rows_compared < self.table.len();
                return summary;
            }
        }

        if events.send(ScanEvent::Finished(summary)).is_err() {
            debug!("Scan consumer went away before completion");
        }
        info!(
            rows = summary.rows_compared,
            identical = summary.identical_rows,
            incomparable = summary.incomparable_rows,
            cancelled = summary.cancelled,
            "Deviation scan finished"
        );
        summary
    }
}

/// Handle to a running deviation scan.
///
/// Events are drained by the owner on its own schedule. Dropping the handle
/// detaches the worker, which stops at its next delivery attempt.
pub struct DeviationScan {
    worker: WorkerThread<ScanSummary>,
    events: Receiver<ScanEvent>,
    cancel: Arc<AtomicBool>,
    done: bool,
}

impl DeviationScan {
    /// Identity of the worker thread.
    pub const fn identity(&self) -> ThreadId {
        self.worker.identity()
    }

    /// Ask the worker to stop before its next row.
    ///
    /// The terminal event is still delivered and reports the scan as
    /// cancelled unless every row had already been compared.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Whether the terminal event has been received.
    pub const fn is_done(&self) -> bool {
        self.done
    }

    /// Block for the next event. `None` once the scan is over.
    pub fn recv(&mut self) -> Option<ScanEvent> {
        if self.done {
            return None;
        }
        let event = self.events.recv().ok();
        self.observe(event)
    }

    /// Next event if one is ready.
    pub fn try_recv(&mut self) -> Option<ScanEvent> {
        if self.done {
            return None;
        }
        match self.events.try_recv() {
            Ok(event) => self.observe(Some(event)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => self.observe(None),
        }
    }

    /// Wait up to `timeout` for the next event.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<ScanEvent> {
        if self.done {
            return None;
        }
        match self.events.recv_timeout(timeout) {
            Ok(event) => self.observe(Some(event)),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => self.observe(None),
        }
    }

    /// Blocking iterator over the remaining events, ending after `Finished`.
    pub fn iter(&mut self) -> impl Iterator<Item = ScanEvent> + '_ {
        std::iter::from_fn(move || self.recv())
    }

    /// Wait for the scan to end and return its totals.
    ///
    /// Events not yet received are discarded.
    pub fn join(mut self) -> Result<ScanSummary> {
        while self.recv().is_some() {}
        self.worker.join()
    }

    fn observe(&mut self, event: Option<ScanEvent>) -> Option<ScanEvent> {
        match event {
            Some(event) => {
                self.done = event.is_done();
                Some(event)
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}
