use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use super::wse::{WseParams, wingsuit_parameters};
use super::{KFState, MotionEstimator, PredictionCache, PredictionHorizon};
use crate::fix::LocationFix;
use crate::geo::{LatLonAlt, offset_meters};

/// Blend weights of the complementary filter, 0 trusts the prediction and
/// 1 trusts the GPS sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimpleEstimatorConfig {
    pub position_weight: f64,
    pub velocity_weight: f64,
    pub acceleration_weight: f64,
    pub horizon: PredictionHorizon,
}

impl Default for SimpleEstimatorConfig {
    fn default() -> Self {
        Self {
            position_weight: 0.2,
            velocity_weight: 0.9,
            acceleration_weight: 0.2,
            horizon: PredictionHorizon::default(),
        }
    }
}

/// Constant-acceleration complementary filter. Cheap, no covariance, used
/// when the Kalman filter is not wanted or not warmed up yet.
#[derive(Debug, Clone)]
pub struct SimpleEstimator {
    config: SimpleEstimatorConfig,
    origin: Option<LatLonAlt>,
    position: Vector3<f64>,
    velocity: Vector3<f64>,
    acceleration: Vector3<f64>,
    wse: WseParams,
    /// filtered position minus measured position at the last fix
    position_delta: Vector3<f64>,
    last_fix: Option<LocationFix>,
    fix_count: u32,
    revision: u64,
    cache: PredictionCache,
}

impl Default for SimpleEstimator {
    fn default() -> Self {
        Self::new(SimpleEstimatorConfig::default())
    }
}

impl SimpleEstimator {
    pub fn new(config: SimpleEstimatorConfig) -> Self {
        Self {
            config,
            origin: None,
            position: Vector3::zeros(),
            velocity: Vector3::zeros(),
            acceleration: Vector3::zeros(),
            wse: WseParams::default(),
            position_delta: Vector3::zeros(),
            last_fix: None,
            fix_count: 0,
            revision: 0,
            cache: PredictionCache::default(),
        }
    }

    pub fn config(&self) -> &SimpleEstimatorConfig {
        &self.config
    }

    pub fn origin(&self) -> Option<&LatLonAlt> {
        self.origin.as_ref()
    }

    pub fn wse_params(&self) -> &WseParams {
        &self.wse
    }

    fn accept(&mut self, fix: &LocationFix) {
        self.last_fix = Some(*fix);
        self.fix_count = self.fix_count.saturating_add(1);
        self.revision = self.revision.wrapping_add(1);
        self.cache.invalidate();
    }
}

impl MotionEstimator for SimpleEstimator {
    fn update(&mut self, fix: &LocationFix) {
        if !fix.is_finite() {
            log_warn!("simple estimator: dropping non-finite fix at {}ms", fix.timestamp_ms);
            return;
        }

        let (Some(origin), Some(last)) = (self.origin, self.last_fix) else {
            self.origin = Some(fix.lat_lon_alt());
            self.position = Vector3::zeros();
            self.velocity = fix.velocity_enu();
            self.acceleration = Vector3::zeros();
            self.position_delta = Vector3::zeros();
            self.accept(fix);
            return;
        };

        let dt_ms = fix.timestamp_ms.saturating_sub(last.timestamp_ms);
        if dt_ms <= 0 {
            log_debug!(
                "simple estimator: dropping fix at {}ms, last accepted at {}ms",
                fix.timestamp_ms,
                last.timestamp_ms
            );
            return;
        }
        let dt = dt_ms as f64 * 1e-3;
        let SimpleEstimatorConfig {
            position_weight: alpha,
            velocity_weight: beta,
            acceleration_weight: gamma,
            ..
        } = self.config;

        let measured_position = offset_meters(&origin, &fix.lat_lon_alt());
        let measured_velocity = fix.velocity_enu();
        let measured_acceleration = (measured_velocity - self.velocity) / dt;

        let previous_acceleration = self.acceleration;
        self.acceleration = previous_acceleration * (1.0 - gamma) + measured_acceleration * gamma;

        // trapezoidal propagation from the previous state
        let predicted_velocity =
            self.velocity + (previous_acceleration + self.acceleration) * (dt / 2.0);
        let predicted_position = self.position + (self.velocity + predicted_velocity) * (dt / 2.0);

        self.velocity = predicted_velocity * (1.0 - beta) + measured_velocity * beta;
        self.position = predicted_position * (1.0 - alpha) + measured_position * alpha;
        self.wse = wingsuit_parameters(&self.velocity, &self.acceleration, &self.wse);
        self.position_delta = self.position - measured_position;

        log_trace!(
            "simple estimator: dt={}s position={:?} velocity={:?}",
            dt,
            self.position,
            self.velocity
        );
        self.accept(fix);
    }

    fn last_update(&self) -> Option<&LocationFix> {
        self.last_fix.as_ref()
    }

    fn fix_count(&self) -> u32 {
        self.fix_count
    }

    fn revision(&self) -> u64 {
        self.revision
    }

    fn committed(&self) -> KFState {
        KFState {
            timestamp_ms: self.last_fix.map_or(0, |f| f.timestamp_ms),
            position: self.position,
            velocity: self.velocity,
            acceleration: self.acceleration,
            wind: Vector3::zeros(),
            wse: self.wse,
        }
    }

    fn extrapolate(&self, query_ms: i64) -> KFState {
        if !self.is_warm() {
            return KFState::zero(query_ms);
        }
        let mut state = self.committed();
        let dt = query_ms.saturating_sub(state.timestamp_ms) as f64 * 1e-3;
        let (full, tail) = self.config.horizon.split(dt);

        state.position += state.velocity * full + state.acceleration * (0.5 * full * full);
        state.velocity += state.acceleration * full;
        state.timestamp_ms = query_ms;
        self.config.horizon.decay(&mut state, tail);
        state
    }

    fn prediction_cache(&self) -> &PredictionCache {
        &self.cache
    }

    fn reset(&mut self) {
        *self = Self::new(self.config);
    }

    fn delta_from(&self, predicted: &KFState) -> Vector3<f64> {
        if !self.is_warm() {
            return Vector3::zeros();
        }
        predicted.position - self.position + self.position_delta
    }
}
