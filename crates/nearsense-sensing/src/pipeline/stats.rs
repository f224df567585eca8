//! Frame rate bookkeeping for the detection loop.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

const FPS_WINDOW: Duration = Duration::from_secs(1);

/// Tracks `fps` (frames per rolling one-second window) and `actual_fps`
/// (reciprocal of the mean interval between the last N frames).
#[derive(Debug, Clone)]
pub struct FrameStats {
    window_start: Instant,
    window_count: u32,
    fps: u32,
    last_frame: Instant,
    intervals: VecDeque<f64>,
    capacity: usize,
    actual_fps: u32,
}

impl FrameStats {
    pub fn new(capacity: usize, now: Instant) -> Self {
        let capacity = capacity.max(1);
        Self {
            window_start: now,
            window_count: 0,
            fps: 0,
            last_frame: now,
            intervals: VecDeque::with_capacity(capacity),
            capacity,
            actual_fps: 0,
        }
    }

    /// Record a completed frame and return `(fps, actual_fps)`.
    pub fn record(&mut self, now: Instant) -> (u32, u32) {
        self.window_count += 1;
        if now.saturating_duration_since(self.window_start) >= FPS_WINDOW {
            self.fps = self.window_count;
            self.window_count = 0;
            self.window_start = now;
        }

        if self.intervals.len() >= self.capacity {
            self.intervals.pop_front();
        }
        self.intervals
            .push_back(now.saturating_duration_since(self.last_frame).as_secs_f64());
        self.last_frame = now;

        let mean = self.intervals.iter().sum::<f64>() / self.intervals.len() as f64;
        self.actual_fps = if mean > 0.0 { (1.0 / mean) as u32 } else { 0 };

        (self.fps, self.actual_fps)
    }
}
