use serde::{Deserialize, Serialize};

use crate::fix::LocationFix;
use crate::flight_mode::{FlightMode, SpeedThresholds, basic_mode};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub speeds: SpeedThresholds,

    /// rise rate of the deploy confidence per fix
    pub deploy_alpha: f64,
    pub deploy_threshold: f64,
    /// sustained horizontal speed a wingsuit flight must reach before a
    /// drop below it counts as a deployment (m/s)
    pub wingsuit_established_speed: f64,
    /// sustained sink rate below which freefall counts as deployed (m/s)
    pub freefall_deploy_sink: f64,

    /// rise rate of the landing confidence per slow update
    pub landing_alpha: f64,
    /// fraction of `landing_alpha` the confidence decays by when not landing
    pub landing_decay: f64,
    pub landing_threshold: f64,
    pub landing_max_ground_speed: f64,
    pub landing_max_climb: f64,
    /// altitude span that must be covered before a landing is believed (m)
    pub min_jump_height_m: f64,

    pub slow_period_ms: i64,
    pub slow_alpha: f64,
    pub slow_threshold: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            speeds: SpeedThresholds::default(),
            deploy_alpha: 0.3,
            deploy_threshold: 0.6,
            wingsuit_established_speed: 19.0,
            freefall_deploy_sink: 33.0,
            landing_alpha: 0.25,
            landing_decay: 0.3,
            landing_threshold: 0.5,
            landing_max_ground_speed: 7.0,
            landing_max_climb: 3.0,
            min_jump_height_m: 60.0,
            slow_period_ms: 1000,
            slow_alpha: 0.1,
            slow_threshold: 0.7,
        }
    }
}

/// Gated flight phase state machine.
///
/// Every fix runs the fast path: an instantaneous basic mode plus the deploy
/// detector. At most once per `slow_period_ms` of fix time the slow path runs:
/// altitude span tracking, a smoothed basic mode and the landing detector.
/// The published mode only moves along [`FlightMode::successors`], which is
/// what keeps noisy basic modes from flipping the phase back and forth.
#[derive(Debug, Clone)]
pub struct FlightModeClassifier {
    config: ClassifierConfig,
    mode: FlightMode,

    fast_mode: FlightMode,
    slow_mode: FlightMode,
    slow_confidence: f64,

    deploy_confidence: f64,
    deploy_detected: bool,
    wingsuit_established: bool,

    landing_confidence: f64,
    landing_detected: bool,
    /// (min, max) altitude seen during this jump
    altitude_range: Option<(f64, f64)>,

    last_slow_update_ms: Option<i64>,
    last_fix_ms: Option<i64>,
}

impl Default for FlightModeClassifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}

impl FlightModeClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            config,
            mode: FlightMode::Unknown,
            fast_mode: FlightMode::Unknown,
            slow_mode: FlightMode::Unknown,
            slow_confidence: 0.0,
            deploy_confidence: 0.0,
            deploy_detected: false,
            wingsuit_established: false,
            landing_confidence: 0.0,
            landing_detected: false,
            altitude_range: None,
            last_slow_update_ms: None,
            last_fix_ms: None,
        }
    }

    /// Feeds one fix and returns the resulting mode.
    ///
    /// `sustained` is the estimator's `(vxs, vys)`; without it the fix's own
    /// ground speed and climb stand in.
    pub fn update(&mut self, fix: &LocationFix, sustained: Option<(f64, f64)>) -> FlightMode {
        if self.last_fix_ms.is_some_and(|last| fix.timestamp_ms < last) {
            return self.mode;
        }
        self.last_fix_ms = Some(fix.timestamp_ms);

        let sustained = sustained.unwrap_or((fix.ground_speed(), fix.climb));
        self.update_fast(fix, sustained);

        let slow_due = self
            .last_slow_update_ms
            .is_none_or(|last| {
                fix.timestamp_ms.saturating_sub(last) >= self.config.slow_period_ms
            });
        if slow_due {
            self.last_slow_update_ms = Some(fix.timestamp_ms);
            self.update_slow(fix);
        }

        let next = self.gate(fix);
        if next != self.mode {
            log_info!("flight mode: {} -> {}", self.mode, next);
            debug_assert!(self.mode.can_transition_to(next));
            self.mode = next;
        }
        self.mode
    }

    fn update_fast(&mut self, fix: &LocationFix, (vxs, vys): (f64, f64)) {
        let c = &self.config;
        self.fast_mode = basic_mode(fix, &c.speeds);

        let rising = match self.mode {
            FlightMode::Wingsuit => {
                if vxs > c.wingsuit_established_speed {
                    self.wingsuit_established = true;
                }
                self.wingsuit_established && 0.0 < vxs && vxs < c.wingsuit_established_speed
            }
            FlightMode::Freefall => -c.freefall_deploy_sink < vys && vys < 0.0,
            // already deployed, hold until the canopy is confirmed
            FlightMode::Deploy => return,
            _ => {
                self.deploy_confidence = 0.0;
                self.deploy_detected = false;
                self.wingsuit_established = false;
                return;
            }
        };

        if rising {
            self.deploy_confidence += (1.0 - self.deploy_confidence) * c.deploy_alpha;
        } else {
            self.deploy_confidence *= 1.0 - c.deploy_alpha;
        }
        self.deploy_detected = self.deploy_confidence > c.deploy_threshold;
        log_trace!(
            "deploy confidence {} (vxs={}, vys={})",
            self.deploy_confidence,
            vxs,
            vys
        );
    }

    fn update_slow(&mut self, fix: &LocationFix) {
        let c = &self.config;
        let altitude = fix.alt;
        if altitude.is_finite() {
            self.altitude_range = Some(match self.altitude_range {
                Some((min, max)) => (min.min(altitude), max.max(altitude)),
                None => (altitude, altitude),
            });
        }

        if self.fast_mode == self.slow_mode {
            self.slow_confidence += (1.0 - self.slow_confidence) * c.slow_alpha * 2.0;
        } else {
            self.slow_confidence *= 1.0 - c.slow_alpha;
            if self.slow_confidence < 1.0 - c.slow_threshold {
                self.slow_mode = self.fast_mode;
                self.slow_confidence = 0.5;
            }
        }

        if !matches!(self.mode, FlightMode::Canopy | FlightMode::Landing) {
            self.landing_confidence = 0.0;
            self.landing_detected = false;
            return;
        }

        let on_ground = self.fast_mode == FlightMode::Ground;
        let slow_and_level = fix.ground_speed() < c.landing_max_ground_speed
            && fix.climb.abs() < c.landing_max_climb;
        let span = self
            .altitude_range
            .filter(|(min, max)| max - min > c.min_jump_height_m && altitude.is_finite());

        match span {
            Some((min, max)) if on_ground || slow_and_level => {
                // closer to the lowest point of the jump is more likely landed
                let normalized = (altitude - min) / (max - min);
                self.landing_confidence +=
                    (1.0 - self.landing_confidence) * (1.0 - normalized) * c.landing_alpha;
            }
            _ => {
                self.landing_confidence *= 1.0 - c.landing_alpha * c.landing_decay;
            }
        }
        self.landing_detected = self.landing_confidence > c.landing_threshold;
        log_trace!("landing confidence {}", self.landing_confidence);
    }

    fn gate(&mut self, fix: &LocationFix) -> FlightMode {
        use FlightMode::*;

        if self.mode == Ground
            && self
                .config
                .speeds
                .is_stationary(fix.ground_speed(), fix.climb)
        {
            return Ground;
        }

        let fast = self.fast_mode;
        let current = self.mode;
        match current {
            Ground => match fast {
                Plane | Wingsuit | Freefall => fast,
                _ => Ground,
            },
            Plane => match fast {
                Wingsuit | Freefall | Ground => fast,
                _ => Plane,
            },
            Wingsuit if self.deploy_detected => Deploy,
            // recovering from a false exit
            Wingsuit if fast == Plane => Plane,
            Wingsuit => Wingsuit,
            Freefall if self.deploy_detected => Deploy,
            Freefall if fast == Wingsuit => Wingsuit,
            Freefall => Freefall,
            Deploy if fast == Canopy => Canopy,
            Deploy => Deploy,
            Canopy if self.landing_detected => Landing,
            Canopy => Canopy,
            Landing if fast == Ground && self.landing_detected => {
                self.reset_jump_state();
                Ground
            }
            Landing => Landing,
            // a canopy has to be entered through deploy
            Unknown => match fast {
                Canopy => Unknown,
                other => other,
            },
        }
    }

    fn reset_jump_state(&mut self) {
        self.altitude_range = None;
        self.deploy_confidence = 0.0;
        self.deploy_detected = false;
        self.wingsuit_established = false;
        self.landing_confidence = 0.0;
        self.landing_detected = false;
        self.slow_confidence = 0.0;
    }

    /// Back to the ground with all detectors cleared.
    pub fn reset(&mut self) {
        self.mode = FlightMode::Ground;
        self.fast_mode = FlightMode::Unknown;
        self.slow_mode = FlightMode::Unknown;
        self.reset_jump_state();
        self.last_slow_update_ms = None;
        self.last_fix_ms = None;
    }

    /// Forces a mode, bypassing the gates once. For tests and manual override.
    pub fn set_mode(&mut self, mode: FlightMode) {
        if mode != self.mode {
            log_info!("flight mode forced: {} -> {}", self.mode, mode);
            self.mode = mode;
            self.slow_mode = mode.to_basic();
            self.fast_mode = self.slow_mode;
            self.slow_confidence = 1.0;
        }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn mode(&self) -> FlightMode {
        self.mode
    }

    pub fn mode_str(&self) -> &'static str {
        self.mode.as_str()
    }

    pub fn is_flight(&self) -> bool {
        self.mode.is_flight()
    }

    /// Instantaneous basic mode of the last fix.
    pub fn fast_mode(&self) -> FlightMode {
        self.fast_mode
    }

    /// Basic mode smoothed over the slow updates.
    pub fn slow_mode(&self) -> FlightMode {
        self.slow_mode
    }

    pub fn deploy_confidence(&self) -> f64 {
        self.deploy_confidence
    }

    pub fn landing_confidence(&self) -> f64 {
        self.landing_confidence
    }

    pub fn altitude_range(&self) -> Option<(f64, f64)> {
        self.altitude_range
    }
}
