//! Tick timing
//!
//! [`ProfilerScope`] times a region and reports it at trace level on drop.
//! [`FrameTimer`] aggregates tick durations for hosts that display them.

use std::time::Instant;
use tracing::trace;

/// Wall-clock timer for one named region
#[derive(Debug)]
pub struct ProfilerScope {
    label: &'static str,
    started: Instant,
}

impl ProfilerScope {
    /// Start timing `label`
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            started: Instant::now(),
        }
    }

    /// Milliseconds since [`new`](Self::new)
    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1e3
    }
}

impl Drop for ProfilerScope {
    fn drop(&mut self) {
        trace!("{} took {:.3}ms", self.label, self.elapsed_ms());
    }
}

/// Running statistics over tick durations
#[derive(Debug, Clone, Default)]
pub struct FrameTimer {
    frames: u64,
    last_ms: f64,
    mean_ms: f64,
    peak_ms: f64,
}

impl FrameTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one tick duration
    pub fn record(&mut self, time_ms: f64) {
        self.frames += 1;
        self.last_ms = time_ms;
        self.peak_ms = self.peak_ms.max(time_ms);
        // Incremental mean
        self.mean_ms += (time_ms - self.mean_ms) / self.frames as f64;
    }

    pub fn last_frame_time_ms(&self) -> f64 {
        self.last_ms
    }

    pub fn mean_frame_time_ms(&self) -> f64 {
        self.mean_ms
    }

    /// Slowest tick recorded
    pub fn peak_frame_time_ms(&self) -> f64 {
        self.peak_ms
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
