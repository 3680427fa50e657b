//! Sliding-window frame rate estimation.

use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::Mutex;

/// Number of arrival timestamps kept by [`FpsCalculator`].
///
/// Once warmed up the rate is averaged over the 5 most recent intervals.
pub const FPS_WINDOW_CAPACITY: usize = 6;

#[derive(Debug)]
struct FpsState {
    window: VecDeque<u64>,
    fps: f64,
}

impl FpsState {
    #[allow(clippy::cast_precision_loss)]
    fn push(&mut self, timestamp_us: u64) {
        self.window.push_back(timestamp_us);

        if self.window.len() >= 2 {
            if let (Some(&oldest), Some(&newest)) = (self.window.front(), self.window.back()) {
                let span = newest.saturating_sub(oldest);
                if span > 0 {
                    let intervals = (self.window.len() - 1) as f64;
                    self.fps = 1_000_000.0 * intervals / span as f64;
                }
            }

            if self.window.len() == FPS_WINDOW_CAPACITY {
                self.window.pop_front();
            }
        }
    }
}

/// Thread-safe frame rate estimator fed with frame-arrival timestamps.
///
/// Every call takes the internal lock once for its whole duration, so a
/// reader never observes a half-updated window.
#[derive(Debug)]
pub struct FpsCalculator {
    epoch: Instant,
    state: Mutex<FpsState>,
}

impl Default for FpsCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl FpsCalculator {
    /// Create an empty calculator reporting 0.0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            state: Mutex::new(FpsState {
                window: VecDeque::with_capacity(FPS_WINDOW_CAPACITY),
                fps: 0.0,
            }),
        }
    }

    /// Record a frame arrival at the current monotonic time.
    ///
    /// The clock is read under the lock, so concurrent callers enter the
    /// window in timestamp order.
    pub fn trigger(&self) {
        let mut state = self.state.lock();
        let now = u64::try_from(self.epoch.elapsed().as_micros()).unwrap_or(u64::MAX);
        state.push(now);
    }

    /// Record a frame arrival at `timestamp_us` microseconds.
    ///
    /// Timestamps are expected to be monotonic. The rate is computed over
    /// the window including the new sample; a full window then drops its
    /// oldest entry. A window spanning zero time keeps the previous rate.
    pub fn trigger_at(&self, timestamp_us: u64) {
        self.state.lock().push(timestamp_us);
    }

    /// Last computed rate in frames per second, 0.0 if unknown.
    pub fn fps(&self) -> f64 {
        self.state.lock().fps
    }

    /// Forget all samples; the next trigger starts a fresh window.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.fps = 0.0;
        state.window.clear();
    }

    #[cfg(test)]
    fn window_len(&self) -> usize {
        self.state.lock().window.len()
    }

    #[cfg(test)]
    fn window(&self) -> Vec<u64> {
        self.state.lock().window.iter().copied().collect()
    }
}
