//! Motion estimation from GPS fixes.
//!
//! An estimator is corrected by [`MotionEstimator::update`] once per fix and
//! queried by [`MotionEstimator::predict`] once per rendered frame. Prediction
//! never touches the committed state, the only thing a query may write is the
//! single-slot [`PredictionCache`].

use core::cell::Cell;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::fix::LocationFix;

mod kalman;
mod simple;
pub mod wse;

pub use kalman::{KalmanConfig, KalmanFilter3D};
pub use simple::{SimpleEstimator, SimpleEstimatorConfig};
pub use wse::WseParams;

/// Snapshot of the estimated motion at `timestamp_ms`.
///
/// Vectors are `(east, up, north)` relative to the estimator's first fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KFState {
    pub timestamp_ms: i64,
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
    pub acceleration: Vector3<f64>,
    /// air mass velocity, subtracted from `velocity` to get airspeed
    pub wind: Vector3<f64>,
    pub wse: WseParams,
}

impl KFState {
    /// The degenerate state returned before an estimator has enough fixes.
    pub fn zero(timestamp_ms: i64) -> Self {
        Self {
            timestamp_ms,
            position: Vector3::zeros(),
            velocity: Vector3::zeros(),
            acceleration: Vector3::zeros(),
            wind: Vector3::zeros(),
            wse: WseParams::new(0.0, 0.0, 0.0),
        }
    }

    pub fn airspeed(&self) -> Vector3<f64> {
        self.velocity - self.wind
    }

    pub fn ground_speed(&self) -> f64 {
        self.velocity.x.hypot(self.velocity.z)
    }

    pub fn climb(&self) -> f64 {
        self.velocity.y
    }

    pub fn sustained_speeds(&self) -> Option<(f64, f64)> {
        self.wse.sustained_speeds()
    }
}

/// How far ahead a prediction is trusted.
///
/// Up to `full_s` past the last fix the estimator's own model is integrated.
/// Past that, acceleration is dropped and velocity decays with time constant
/// `decay_tau_s`, so total drift stays finite however stale the fix gets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionHorizon {
    pub full_s: f64,
    pub decay_tau_s: f64,
}

impl Default for PredictionHorizon {
    fn default() -> Self {
        Self {
            full_s: 3.0,
            decay_tau_s: 2.0,
        }
    }
}

impl PredictionHorizon {
    /// Splits an elapsed time into the fully modelled part and the decayed tail.
    pub fn split(&self, dt: f64) -> (f64, f64) {
        let dt = dt.max(0.0);
        let full = dt.min(self.full_s);
        (full, dt - full)
    }

    /// Continues `state` for `tail_s` seconds with exponentially decaying
    /// velocity and no acceleration.
    pub fn decay(&self, state: &mut KFState, tail_s: f64) {
        if tail_s <= 0.0 {
            return;
        }
        let (travel, remaining) = self.decay_factors(tail_s);
        state.position += state.velocity * travel;
        state.velocity *= remaining;
        state.acceleration = Vector3::zeros();
    }

    /// Seconds of travel at constant velocity that a linear extrapolation of
    /// `dt` seconds amounts to once the tail is decayed.
    pub fn linear_travel(&self, dt: f64) -> f64 {
        let (full, tail) = self.split(dt);
        full + self.decay_factors(tail).0
    }

    fn decay_factors(&self, tail_s: f64) -> (f64, f64) {
        if tail_s <= 0.0 || self.decay_tau_s <= 0.0 {
            return (0.0, 1.0);
        }
        let remaining = (-tail_s / self.decay_tau_s).exp();
        (self.decay_tau_s * (1.0 - remaining), remaining)
    }
}

/// Single-slot memo of the most recent prediction.
///
/// Render loops query the same instant several times per frame, so one slot
/// keyed by query time is enough. A new fix must [`invalidate`](Self::invalidate) it.
#[derive(Debug, Clone, Default)]
pub struct PredictionCache {
    slot: Cell<Option<KFState>>,
}

impl PredictionCache {
    pub fn get(&self, query_ms: i64) -> Option<KFState> {
        self.slot.get().filter(|s| s.timestamp_ms == query_ms)
    }

    pub fn store(&self, state: KFState) {
        self.slot.set(Some(state));
    }

    pub fn invalidate(&self) {
        self.slot.set(None);
    }

    pub fn get_or_insert_with(&self, query_ms: i64, f: impl FnOnce() -> KFState) -> KFState {
        if let Some(hit) = self.get(query_ms) {
            return hit;
        }
        let state = f();
        self.store(state);
        state
    }
}

pub trait MotionEstimator {
    /// Corrects the committed state with a new fix. Fixes older than the last
    /// accepted one are dropped.
    fn update(&mut self, fix: &LocationFix);

    fn last_update(&self) -> Option<&LocationFix>;

    /// Number of accepted fixes since construction or [`reset`](Self::reset).
    fn fix_count(&self) -> u32;

    /// Bumped on every accepted fix, lets readers detect that a prediction
    /// computed from a snapshot has gone stale.
    fn revision(&self) -> u64;

    /// The state as of the last accepted fix.
    fn committed(&self) -> KFState;

    /// Extrapolates the committed state to `query_ms` without caching.
    /// Queries before the last fix are treated as at the last fix.
    fn extrapolate(&self, query_ms: i64) -> KFState;

    fn prediction_cache(&self) -> &PredictionCache;

    fn reset(&mut self);

    /// Whether predictions carry information, needs at least two fixes.
    fn is_warm(&self) -> bool {
        self.fix_count() >= 2
    }

    /// Cached [`extrapolate`](Self::extrapolate). Bit-identical for repeated
    /// queries of the same instant until the next fix.
    fn predict(&self, query_ms: i64) -> KFState {
        self.prediction_cache()
            .get_or_insert_with(query_ms, || self.extrapolate(query_ms))
    }

    /// How far the body has moved between the last fix and `query_ms`, i.e.
    /// the shift to apply to geometry positioned relative to that fix.
    /// Zero until the estimator is warm.
    fn predict_delta(&self, query_ms: i64) -> Vector3<f64> {
        self.delta_from(&self.predict(query_ms))
    }

    /// [`predict_delta`](Self::predict_delta) for a prediction the caller
    /// already holds. Does no extrapolation of its own.
    fn delta_from(&self, predicted: &KFState) -> Vector3<f64>;
}
