//! Graceful degradation of the live distance signal.
//!
//! When the subject leaves, the last distance is held for
//! `deactivation_delay_ms`, then eased out toward
//! `recovery_target_distance` over `recovery_duration_ms`. One instance
//! lives in each live WebSocket session.

use std::time::Instant;

use nearsense_models::{round1, RecoveryConfig};

/// Phase of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPhase {
    /// A valid detection was just observed
    Active,
    /// Subject absent, within the deactivation delay
    Holding,
    /// Subject absent beyond the delay, easing toward the target
    Recovering,
    /// Subject absent with recovery disabled
    Idle,
}

/// Value emitted for one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecoveryOutput {
    /// Distance in centimeters, one decimal place
    pub distance: f64,
    pub is_recovering: bool,
    pub phase: RecoveryPhase,
}

/// Per-session recovery state.
#[derive(Debug, Clone)]
pub struct RecoveryState {
    config: RecoveryConfig,
    /// Start distance used when no subject was ever seen
    fallback_distance: f64,
    last_detection_time: Option<Instant>,
    is_recovering: bool,
    recovery_start_time: Option<Instant>,
    recovery_start_distance: f64,
    last_valid_distance: f64,
}

impl RecoveryState {
    /// `fallback_distance` is the distance-mapping minimum.
    pub fn new(config: RecoveryConfig, fallback_distance: f64) -> Self {
        Self {
            config,
            fallback_distance,
            last_detection_time: None,
            is_recovering: false,
            recovery_start_time: None,
            recovery_start_distance: 0.0,
            last_valid_distance: 0.0,
        }
    }

    pub fn is_recovering(&self) -> bool {
        self.is_recovering
    }

    pub fn last_valid_distance(&self) -> f64 {
        self.last_valid_distance
    }

    /// Feed one observation and get the distance to publish.
    pub fn update(&mut self, total_count: usize, raw_distance: f64, now: Instant) -> RecoveryOutput {
        if total_count > 0 && raw_distance > 0.0 {
            self.last_detection_time = Some(now);
            self.last_valid_distance = raw_distance;
            self.is_recovering = false;
            self.recovery_start_time = None;
            return self.output(raw_distance, RecoveryPhase::Active);
        }

        if !self.config.enabled {
            self.is_recovering = false;
            return self.output(0.0, RecoveryPhase::Idle);
        }

        let since_detection_ms = self
            .last_detection_time
            .map(|t| now.saturating_duration_since(t).as_millis());
        let holding = matches!(
            since_detection_ms,
            Some(ms) if ms < u128::from(self.config.deactivation_delay_ms)
        );
        if holding {
            return self.output(self.last_valid_distance, RecoveryPhase::Holding);
        }

        let start_time = match self.recovery_start_time {
            Some(t) if self.is_recovering => t,
            _ => {
                self.is_recovering = true;
                self.recovery_start_time = Some(now);
                self.recovery_start_distance = if self.last_valid_distance > 0.0 {
                    self.last_valid_distance
                } else {
                    self.fallback_distance
                };
                now
            }
        };

        let elapsed_ms = now.saturating_duration_since(start_time).as_secs_f64() * 1000.0;
        let progress = if self.config.recovery_duration_ms == 0 {
            1.0
        } else {
            (elapsed_ms / self.config.recovery_duration_ms as f64).clamp(0.0, 1.0)
        };
        let eased = 1.0 - (1.0 - progress).powi(2);

        let start = self.recovery_start_distance;
        let target = self.config.recovery_target_distance;
        self.output(start + (target - start) * eased, RecoveryPhase::Recovering)
    }

    fn output(&self, distance: f64, phase: RecoveryPhase) -> RecoveryOutput {
        RecoveryOutput {
            distance: round1(distance),
            is_recovering: self.is_recovering,
            phase,
        }
    }
}
