use nalgebra::{SMatrix, SVector, Vector3};
use serde::{Deserialize, Serialize};

use super::wse::{GRAVITY, WseParams, wingsuit_acceleration, wingsuit_parameters};
use super::{KFState, MotionEstimator, PredictionCache, PredictionHorizon};
use crate::fix::LocationFix;
use crate::geo::{LatLonAlt, offset_meters};
use crate::utils::density_ratio;

const N: usize = 15;
const POS: usize = 0;
const VEL: usize = 3;
const ACC: usize = 6;
const KL: usize = 9;
const KD: usize = 10;
const ROLL: usize = 11;
const WIND: usize = 12;

type StateVector = SVector<f64, N>;
type StateMatrix = SMatrix<f64, N, N>;
type MeasurementMatrix = SMatrix<f64, 6, N>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KalmanConfig {
    /// longest single integration step (s)
    pub max_step_s: f64,
    /// per-axis acceleration above which the wingsuit model is not trusted (m/s^2)
    pub acceleration_limit: f64,

    // process noise, per second
    pub position_process_noise: f64,
    pub velocity_process_noise: f64,
    pub acceleration_process_noise: f64,
    pub wse_process_noise: f64,
    pub roll_process_noise: f64,
    /// scale acceleration noise with air density, thin air gives less aerodynamic authority
    pub density_scaled_noise: bool,

    // measurement noise, used when the fix carries no accuracy
    pub position_measurement_noise: f64,
    pub velocity_measurement_noise: f64,

    /// rate (Hz) over which the last correction is blended into predictions, 0 disables
    pub step_smoothing_hz: f64,
    /// a gap longer than this re-seeds the kinematic states from the next fix (s)
    pub reseed_after_gap_s: f64,
    pub horizon: PredictionHorizon,
}

impl Default for KalmanConfig {
    fn default() -> Self {
        Self {
            max_step_s: 0.1,
            acceleration_limit: 3.0 * GRAVITY,
            position_process_noise: 0.04,
            velocity_process_noise: 0.4226,
            acceleration_process_noise: 68.5,
            wse_process_noise: 0.01,
            roll_process_noise: 0.001,
            density_scaled_noise: true,
            position_measurement_noise: 1.2,
            velocity_measurement_noise: 2.25,
            step_smoothing_hz: 20.0,
            reseed_after_gap_s: 10.0,
            horizon: PredictionHorizon::default(),
        }
    }
}

/// Extended Kalman filter over position, velocity, acceleration and wingsuit
/// coefficients, flying through a known wind.
///
/// State x (15):
///     [0..3)   position      (east, up, north) m, relative to the first fix
///     [3..6)   velocity      m/s
///     [6..9)   acceleration  m/s^2
///     [9]      kl
///     [10]     kd
///     [11]     roll          rad
///     [12..15) wind          m/s
/// Measurement z (6) = GPS position and velocity.
///
/// GPS alone cannot tell wind apart from the fitted coefficients, so wind is
/// an input: it carries no covariance, the correction never moves it and only
/// [`KalmanFilter3D::set_wind`] changes it.
///
/// Between fixes the state is integrated in steps of at most `max_step_s`:
///     p += v·dt,  v += a·dt,  a = wse(v - wind)
/// and the covariance is propagated with the linear part of that model.
#[derive(Debug, Clone)]
pub struct KalmanFilter3D {
    config: KalmanConfig,
    x: StateVector,
    p: StateMatrix,
    origin: Option<LatLonAlt>,
    last_fix: Option<LocationFix>,
    fix_count: u32,
    revision: u64,
    /// finite difference of the last two GPS velocities
    measured_acceleration: Vector3<f64>,
    /// position part of the last correction
    kalman_step: Vector3<f64>,
    cache: PredictionCache,
}

impl Default for KalmanFilter3D {
    fn default() -> Self {
        Self::new(KalmanConfig::default())
    }
}

impl KalmanFilter3D {
    pub fn new(config: KalmanConfig) -> Self {
        let mut x = StateVector::zeros();
        let wse = WseParams::default();
        x[KL] = wse.kl;
        x[KD] = wse.kd;
        x[ROLL] = wse.roll;

        Self {
            config,
            x,
            p: initial_covariance(),
            origin: None,
            last_fix: None,
            fix_count: 0,
            revision: 0,
            measured_acceleration: Vector3::zeros(),
            kalman_step: Vector3::zeros(),
            cache: PredictionCache::default(),
        }
    }

    pub fn config(&self) -> &KalmanConfig {
        &self.config
    }

    /// position of the first fix, all states are relative to it
    pub fn origin(&self) -> Option<&LatLonAlt> {
        self.origin.as_ref()
    }

    pub fn measured_acceleration(&self) -> Vector3<f64> {
        self.measured_acceleration
    }

    /// acceleration the wingsuit model predicts for the committed state
    pub fn wse_acceleration(&self) -> Vector3<f64> {
        let state = self.committed();
        wingsuit_acceleration(&state.airspeed(), &state.wse)
    }

    pub fn kalman_step(&self) -> Vector3<f64> {
        self.kalman_step
    }

    /// 1 sigma position uncertainty per axis (m)
    pub fn position_uncertainty(&self) -> Vector3<f64> {
        Vector3::new(self.p[(0, 0)], self.p[(1, 1)], self.p[(2, 2)]).map(f64::sqrt)
    }

    /// Sets the wind the suit is flying through, e.g. from a forecast or a
    /// winds aloft report. The filter keeps it until the next call or reset.
    pub fn set_wind(&mut self, wind: Vector3<f64>) {
        if !wind.iter().all(|w| w.is_finite()) {
            return;
        }
        self.x.fixed_rows_mut::<3>(WIND).copy_from(&wind);
        self.cache.invalidate();
    }

    fn seed(&mut self, fix: &LocationFix, position: Vector3<f64>) {
        let wind: Vector3<f64> = self.x.fixed_rows::<3>(WIND).into_owned();
        let wse = self.wse_params();
        self.x = StateVector::zeros();
        self.x.fixed_rows_mut::<3>(POS).copy_from(&position);
        self.x.fixed_rows_mut::<3>(VEL).copy_from(&fix.velocity_enu());
        self.x.fixed_rows_mut::<3>(WIND).copy_from(&wind);
        self.x[KL] = wse.kl;
        self.x[KD] = wse.kd;
        self.x[ROLL] = wse.roll;
        self.p = initial_covariance();
        self.kalman_step = Vector3::zeros();
    }

    fn wse_params(&self) -> WseParams {
        WseParams::new(self.x[KL], self.x[KD], self.x[ROLL])
    }

    /// Propagates the committed state and covariance `dt` seconds.
    fn propagate(&mut self, dt: f64, altitude: f64) {
        integrate(&mut self.x, dt, &self.config);

        let f = transition_jacobian(dt);
        let q = self.process_noise(altitude) * dt;
        self.p = f * self.p * f.transpose() + q;
        self.p = 0.5 * (self.p + self.p.transpose()); // keep symmetric
    }

    fn process_noise(&self, altitude: f64) -> StateMatrix {
        let c = &self.config;
        let acceleration_noise = if c.density_scaled_noise {
            c.acceleration_process_noise * density_ratio(altitude)
        } else {
            c.acceleration_process_noise
        };

        let mut diagonal = StateVector::zeros();
        diagonal.fixed_rows_mut::<3>(POS).fill(c.position_process_noise);
        diagonal.fixed_rows_mut::<3>(VEL).fill(c.velocity_process_noise);
        diagonal.fixed_rows_mut::<3>(ACC).fill(acceleration_noise);
        diagonal[KL] = c.wse_process_noise;
        diagonal[KD] = c.wse_process_noise;
        diagonal[ROLL] = c.roll_process_noise;
        StateMatrix::from_diagonal(&diagonal)
    }

    fn measurement_noise(&self, fix: &LocationFix) -> SMatrix<f64, 6, 6> {
        let floor = self.config.position_measurement_noise;
        let variance = |accuracy: Option<f64>| {
            accuracy
                .filter(|a| a.is_finite())
                .map_or(floor, |a| (a * a).max(floor))
        };
        let horizontal = variance(fix.horizontal_accuracy);
        let vertical = variance(fix.vertical_accuracy);
        let v = self.config.velocity_measurement_noise;
        SMatrix::<f64, 6, 6>::from_diagonal(&SVector::<f64, 6>::from([
            horizontal, vertical, horizontal, v, v, v,
        ]))
    }

    /// Refits kl, kd and roll from the corrected airspeed and acceleration.
    fn update_wingsuit_parameters(&mut self) {
        let velocity: Vector3<f64> = self.x.fixed_rows::<3>(VEL).into_owned();
        if velocity.norm() < 1.0 {
            return;
        }
        let wind: Vector3<f64> = self.x.fixed_rows::<3>(WIND).into_owned();
        let acceleration: Vector3<f64> = self.x.fixed_rows::<3>(ACC).into_owned();
        let fitted = wingsuit_parameters(&(velocity - wind), &acceleration, &self.wse_params());
        self.x[KL] = fitted.kl;
        self.x[KD] = fitted.kd;
        self.x[ROLL] = fitted.roll;
    }

    fn to_state(&self, x: &StateVector, timestamp_ms: i64) -> KFState {
        KFState {
            timestamp_ms,
            position: x.fixed_rows::<3>(POS).into_owned(),
            velocity: x.fixed_rows::<3>(VEL).into_owned(),
            acceleration: x.fixed_rows::<3>(ACC).into_owned(),
            wind: x.fixed_rows::<3>(WIND).into_owned(),
            wse: WseParams::new(x[KL], x[KD], x[ROLL]),
        }
    }

    fn accept(&mut self, fix: &LocationFix) {
        self.last_fix = Some(*fix);
        self.fix_count = self.fix_count.saturating_add(1);
        self.revision = self.revision.wrapping_add(1);
        self.cache.invalidate();
    }
}

impl MotionEstimator for KalmanFilter3D {
    fn update(&mut self, fix: &LocationFix) {
        if !fix.is_finite() {
            log_warn!("kalman: dropping non-finite fix at {}ms", fix.timestamp_ms);
            return;
        }

        let (Some(origin), Some(last)) = (self.origin, self.last_fix) else {
            self.origin = Some(fix.lat_lon_alt());
            self.seed(fix, Vector3::zeros());
            self.accept(fix);
            log_debug!("kalman: origin set at {:?}", fix.lat_lon_alt());
            return;
        };

        let dt_ms = fix.timestamp_ms.saturating_sub(last.timestamp_ms);
        if dt_ms < 0 {
            log_warn!(
                "kalman: dropping out of order fix at {}ms, last accepted at {}ms",
                fix.timestamp_ms,
                last.timestamp_ms
            );
            return;
        }
        let dt = dt_ms as f64 * 1e-3;
        let measured_position = offset_meters(&origin, &fix.lat_lon_alt());
        let measured_velocity = fix.velocity_enu();

        if dt > self.config.reseed_after_gap_s {
            log_info!("kalman: {}s without a fix, re-seeding from GPS", dt);
            self.seed(fix, measured_position);
            self.measured_acceleration = Vector3::zeros();
            self.accept(fix);
            return;
        }

        // a repeated timestamp is a correction with no elapsed time
        if dt > 0.0 {
            self.measured_acceleration = (measured_velocity - last.velocity_enu()) / dt;
            self.propagate(dt, fix.alt);
        }

        let mut z = SVector::<f64, 6>::zeros();
        z.fixed_rows_mut::<3>(0).copy_from(&measured_position);
        z.fixed_rows_mut::<3>(3).copy_from(&measured_velocity);

        let h = measurement_matrix();
        let r = self.measurement_noise(fix);
        let y = z - h * self.x;
        let s = h * self.p * h.transpose() + r;
        let Some(s_inv) = s.try_inverse() else {
            log_warn!("kalman: innovation covariance is singular, skipping correction");
            self.accept(fix);
            return;
        };
        let k = self.p * h.transpose() * s_inv;
        let correction = k * y;

        self.x += correction;
        self.kalman_step = correction.fixed_rows::<3>(POS).into_owned();
        self.p = (StateMatrix::identity() - k * h) * self.p;
        self.p = 0.5 * (self.p + self.p.transpose());

        self.update_wingsuit_parameters();
        self.accept(fix);

        log_trace!(
            "kalman: t={} p={:?} v={:?} a={:?} kl={} kd={} roll={}",
            fix.timestamp_ms,
            self.x.fixed_rows::<3>(POS),
            self.x.fixed_rows::<3>(VEL),
            self.x.fixed_rows::<3>(ACC),
            self.x[KL],
            self.x[KD],
            self.x[ROLL].to_degrees()
        );
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
        self.to_state(&self.x, self.last_fix.map_or(0, |f| f.timestamp_ms))
    }

    fn extrapolate(&self, query_ms: i64) -> KFState {
        let Some(last) = self.last_fix.filter(|_| self.is_warm()) else {
            return KFState::zero(query_ms);
        };
        let dt = query_ms.saturating_sub(last.timestamp_ms) as f64 * 1e-3;
        let (full, tail) = self.config.horizon.split(dt);

        let mut x = self.x;
        integrate(&mut x, full, &self.config);
        let mut state = self.to_state(&x, query_ms);
        self.config.horizon.decay(&mut state, tail);
        state
    }

    fn prediction_cache(&self) -> &PredictionCache {
        &self.cache
    }

    fn reset(&mut self) {
        *self = Self::new(self.config);
    }

    /// Predicted position minus the committed one. The last correction is
    /// faded in over `1 / step_smoothing_hz` seconds so a fix does not make
    /// the rendered scene jump.
    fn delta_from(&self, predicted: &KFState) -> Vector3<f64> {
        let Some(last) = self.last_fix.filter(|_| self.is_warm()) else {
            return Vector3::zeros();
        };
        let committed: Vector3<f64> = self.x.fixed_rows::<3>(POS).into_owned();
        let delta = predicted.position - committed;

        let hz = self.config.step_smoothing_hz;
        if hz <= 0.0 {
            return delta;
        }
        let elapsed_ms = predicted.timestamp_ms.saturating_sub(last.timestamp_ms);
        let dt = (elapsed_ms as f64 * 1e-3).max(0.0);
        let fade = (1.0 - dt * hz).clamp(0.0, 1.0);
        delta - self.kalman_step * fade
    }
}

fn initial_covariance() -> StateMatrix {
    let mut diagonal = StateVector::zeros();
    diagonal.fixed_rows_mut::<9>(POS).fill(1000.0);
    diagonal[KL] = 0.1;
    diagonal[KD] = 0.1;
    diagonal[ROLL] = 0.005;
    // wind is an input, see KalmanFilter3D
    StateMatrix::from_diagonal(&diagonal)
}

fn measurement_matrix() -> MeasurementMatrix {
    let mut h = MeasurementMatrix::zeros();
    h.fixed_view_mut::<6, 6>(0, 0).fill_with_identity();
    h
}

/// Linearised transition over `dt`: position follows velocity, velocity
/// follows acceleration, everything else is a random walk. Wind rows stay
/// identity and carry no covariance.
fn transition_jacobian(dt: f64) -> StateMatrix {
    let mut f = StateMatrix::identity();
    for i in 0..3 {
        f[(POS + i, VEL + i)] = dt;
        f[(VEL + i, ACC + i)] = dt;
    }
    f
}

/// Integrates `x` forward `dt` seconds in sub-steps of at most `max_step_s`.
fn integrate(x: &mut StateVector, dt: f64, config: &KalmanConfig) {
    let max_step = if config.max_step_s > 0.0 { config.max_step_s } else { 0.1 };
    let mut remaining = dt;
    while remaining > 0.0 {
        let step = remaining.min(max_step);
        integrate_step(x, step, config.acceleration_limit);
        remaining -= step;
    }
}

fn integrate_step(x: &mut StateVector, dt: f64, acceleration_limit: f64) {
    let position: Vector3<f64> = x.fixed_rows::<3>(POS).into_owned();
    let velocity: Vector3<f64> = x.fixed_rows::<3>(VEL).into_owned();
    let acceleration: Vector3<f64> = x.fixed_rows::<3>(ACC).into_owned();
    let wind: Vector3<f64> = x.fixed_rows::<3>(WIND).into_owned();
    let params = WseParams::new(x[KL], x[KD], x[ROLL]);

    let next_velocity = velocity + acceleration * dt;
    let mut next_acceleration = wingsuit_acceleration(&(next_velocity - wind), &params);
    // the model blows up on bad coefficients, hold the last acceleration instead
    if !next_acceleration.iter().all(|a| a.abs() <= acceleration_limit) {
        next_acceleration = acceleration;
    }

    x.fixed_rows_mut::<3>(POS).copy_from(&(position + velocity * dt));
    x.fixed_rows_mut::<3>(VEL).copy_from(&next_velocity);
    x.fixed_rows_mut::<3>(ACC).copy_from(&next_acceleration);
}
