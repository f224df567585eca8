//! Monocular distance estimation.
//!
//! Similar triangles: a person of known height `H` whose bounding box is
//! `h` pixels tall stands at `H * f / h` from a camera with focal length
//! `f` (pixels). Per-track output is smoothed in two stages, a moving
//! average over the last `smoothing_window` raw values followed by an
//! exponential moving average for display.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use nearsense_models::DistanceConfig;
use tracing::debug;

use crate::error::{SensingError, SensingResult};

/// Boxes with h/w below this are treated as sitting.
const SITTING_RATIO: f64 = 1.5;

/// Smoothing state for one track.
#[derive(Debug, Clone)]
struct TrackState {
    history: VecDeque<f64>,
    ema: Option<f64>,
    last_seen: Instant,
}

impl TrackState {
    fn new(window: usize, now: Instant) -> Self {
        Self {
            history: VecDeque::with_capacity(window),
            ema: None,
            last_seen: now,
        }
    }
}

/// Distance calculator with per-track smoothing.
#[derive(Debug)]
pub struct DistanceCalculator {
    config: DistanceConfig,
    tracks: HashMap<u32, TrackState>,
}

impl DistanceCalculator {
    pub fn new(config: DistanceConfig) -> Self {
        Self {
            config,
            tracks: HashMap::new(),
        }
    }

    pub fn config(&self) -> &DistanceConfig {
        &self.config
    }

    pub fn focal_length(&self) -> f64 {
        self.config.focal_length
    }

    /// Distance in centimeters for a box of the given pixel size.
    ///
    /// Returns 0 for a non-positive height without touching track state.
    pub fn calculate_distance(
        &mut self,
        box_height: f64,
        box_width: f64,
        track_id: Option<u32>,
    ) -> f64 {
        self.calculate_distance_at(box_height, box_width, track_id, Instant::now())
    }

    /// Same as [`calculate_distance`](Self::calculate_distance) with an explicit clock.
    pub fn calculate_distance_at(
        &mut self,
        box_height: f64,
        box_width: f64,
        track_id: Option<u32>,
        now: Instant,
    ) -> f64 {
        if box_height <= 0.0 {
            return 0.0;
        }

        let person_height = self.effective_height(box_height, box_width);
        let mut distance = person_height * self.config.focal_length / box_height;

        let Some(track_id) = track_id else {
            return distance;
        };
        if !self.config.use_smoothing && !self.config.use_display_smoothing {
            return distance;
        }

        let window = self.config.smoothing_window.max(1);
        let state = self
            .tracks
            .entry(track_id)
            .or_insert_with(|| TrackState::new(window, now));
        state.last_seen = now;

        if self.config.use_smoothing {
            if state.history.len() >= window {
                state.history.pop_front();
            }
            state.history.push_back(distance);
            distance = state.history.iter().sum::<f64>() / state.history.len() as f64;
        }

        if self.config.use_display_smoothing {
            let alpha = self.config.display_smooth_factor;
            let smoothed = match state.ema {
                Some(prev) => alpha * distance + (1.0 - alpha) * prev,
                None => distance,
            };
            state.ema = Some(smoothed);
            distance = smoothed;
        }

        distance
    }

    /// Person height adjusted for posture, judged from the box aspect ratio.
    fn effective_height(&self, box_height: f64, box_width: f64) -> f64 {
        let height = self.config.real_person_height;
        if !self.config.use_adaptive_height {
            return height;
        }

        let aspect_ratio = if box_width > 0.0 {
            box_height / box_width
        } else {
            self.config.standing_ratio
        };

        let factor = if aspect_ratio >= self.config.standing_ratio {
            1.0
        } else if aspect_ratio < SITTING_RATIO {
            self.config.sitting_height_factor
        } else {
            self.config.crouching_height_factor
        };
        height * factor
    }

    /// Derive the focal length from one subject at a known distance.
    ///
    /// The subject is assumed to be standing.
    pub fn calibrate_focal_length(
        &mut self,
        box_height: f64,
        known_distance: f64,
    ) -> SensingResult<f64> {
        if box_height <= 0.0 || known_distance <= 0.0 {
            return Err(SensingError::calibration(
                "box height and distance must be positive",
            ));
        }
        let focal = box_height * known_distance / self.config.real_person_height;
        self.config.focal_length = focal;
        debug!(focal_length = focal, "Focal length calibrated");
        Ok(focal)
    }

    /// Average the focal length over several `(box_height, distance)` samples.
    ///
    /// Returns `(mean, population standard deviation)` and adopts the mean.
    pub fn multi_point_calibration(
        &mut self,
        measurements: &[(f64, f64)],
    ) -> SensingResult<(f64, f64)> {
        if measurements.is_empty() {
            return Err(SensingError::calibration("no measurements given"));
        }
        if measurements.iter().any(|&(h, d)| h <= 0.0 || d <= 0.0) {
            return Err(SensingError::calibration(
                "box heights and distances must be positive",
            ));
        }

        let person_height = self.config.real_person_height;
        let focals: Vec<f64> = measurements
            .iter()
            .map(|&(h, d)| h * d / person_height)
            .collect();

        let n = focals.len() as f64;
        let mean = focals.iter().sum::<f64>() / n;
        let variance = focals.iter().map(|f| (f - mean).powi(2)).sum::<f64>() / n;
        let std_dev = variance.sqrt();

        self.config.focal_length = mean;
        debug!(
            focal_length = mean,
            std_dev,
            points = measurements.len(),
            "Multi-point calibration complete"
        );
        Ok((mean, std_dev))
    }

    /// Forget smoothing state for one track, or for all when `None`.
    pub fn clear_history(&mut self, track_id: Option<u32>) {
        match track_id {
            Some(id) => {
                self.tracks.remove(&id);
            }
            None => self.tracks.clear(),
        }
    }

    /// Drop tracks not seen within the configured TTL. Returns how many were removed.
    pub fn evict_stale(&mut self, now: Instant) -> usize {
        if self.config.track_ttl_ms == 0 {
            return 0;
        }
        let ttl = Duration::from_millis(self.config.track_ttl_ms);
        let before = self.tracks.len();
        self.tracks
            .retain(|_, state| now.saturating_duration_since(state.last_seen) < ttl);
        before - self.tracks.len()
    }

    /// Number of tracks with smoothing state.
    pub fn tracked_count(&self) -> usize {
        self.tracks.len()
    }
}
