//! Wingsuit equation: a lift/drag model of a flying body parameterised by
//! lift coefficient `kl`, drag coefficient `kd` (both already divided by mass,
//! so they carry units of 1/m) and a roll angle.
//!
//! All vectors are `(east, up, north)`. Internally the equations are written in
//! north/east/down, which is where the signs below come from.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

pub const GRAVITY: f64 = 9.81;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WseParams {
    pub kl: f64,
    pub kd: f64,
    /// radians, positive banks the lift vector to the right of travel
    pub roll: f64,
}

impl Default for WseParams {
    fn default() -> Self {
        Self {
            kl: 0.01,
            kd: 0.01,
            roll: 0.0,
        }
    }
}

impl WseParams {
    pub const fn new(kl: f64, kd: f64, roll: f64) -> Self {
        Self { kl, kd, roll }
    }

    /// glide ratio, `None` without drag
    pub fn lift_drag_ratio(&self) -> Option<f64> {
        if self.kd == 0.0 {
            None
        } else {
            Some(self.kl / self.kd)
        }
    }

    /// Steady-state horizontal and vertical speed `(vxs, vys)` these
    /// coefficients settle to in still air. `vys` is negative (sinking).
    pub fn sustained_speeds(&self) -> Option<(f64, f64)> {
        let denominator = (self.kl * self.kl + self.kd * self.kd).powf(0.75);
        if !(denominator > 0.0) || !denominator.is_finite() {
            return None;
        }
        let vxs = self.kl / denominator;
        let vys = -self.kd / denominator;
        (vxs.is_finite() && vys.is_finite()).then_some((vxs, vys))
    }
}

/// Acceleration produced by gravity, lift and drag at the given airspeed.
///
/// Near-zero airspeed or ground speed leaves the model undefined, in that case
/// the body is assumed to be at rest and zero is returned.
pub fn wingsuit_acceleration(airspeed: &Vector3<f64>, params: &WseParams) -> Vector3<f64> {
    let v_north = airspeed.z;
    let v_east = airspeed.x;
    let v_down = -airspeed.y;

    let v = airspeed.norm();
    if v < 0.1 {
        return Vector3::zeros();
    }
    let ground_speed = v_north.hypot(v_east);
    if ground_speed < 0.1 {
        return Vector3::zeros();
    }

    let WseParams { kl, kd, roll } = *params;
    let (sin_roll, cos_roll) = roll.sin_cos();

    let a_north = GRAVITY
        * (kl * v / ground_speed * (v_north * v_down * cos_roll - v_east * v * sin_roll)
            - kd * v_north * v);
    let a_down = GRAVITY * (1.0 - kl * v * ground_speed * cos_roll - kd * v_down * v);
    let a_east = GRAVITY
        * (kl * v / ground_speed * (v_east * v_down * cos_roll + v_north * v * sin_roll)
            - kd * v_east * v);

    Vector3::new(a_east, -a_down, a_north)
}

/// Inverse of [`wingsuit_acceleration`]: recovers `kl`, `kd` and roll from an
/// observed airspeed and acceleration.
///
/// Below 1 m/s, or when the fit is not finite, `previous` is kept.
pub fn wingsuit_parameters(
    airspeed: &Vector3<f64>,
    acceleration: &Vector3<f64>,
    previous: &WseParams,
) -> WseParams {
    let v = airspeed.norm();
    if v < 1.0 {
        return *previous;
    }

    // acceleration minus gravity, in the same (east, up, north) frame
    let aero = acceleration + Vector3::new(0.0, GRAVITY, 0.0);

    // drag is the projection onto the airspeed, lift the rejection
    let projection = aero.dot(airspeed) / v;
    let drag = airspeed * (projection / v);
    let drag_sign = -(drag.dot(airspeed)).signum();
    let accel_drag = drag_sign * drag.norm();
    let lift = aero - drag;
    let accel_lift = lift.norm();

    let kl = accel_lift / GRAVITY / v / v;
    let kd = accel_drag / GRAVITY / v / v;

    let mut roll = previous.roll;
    let ground_speed = airspeed.z.hypot(airspeed.x);
    if ground_speed > 1.0 {
        let v_down = -airspeed.y;
        let a_down = -acceleration.y;
        let cos_roll = (1.0 - a_down / GRAVITY - kd * v * v_down) / (kl * ground_speed * v);
        let magnitude = cos_roll.acos();
        // which side of the track the lift points to
        let side = lift.z * -airspeed.x + lift.x * airspeed.z;
        let candidate = side.signum() * magnitude;
        if candidate.is_finite() {
            roll = candidate;
        }
    }

    if !kl.is_finite() || !kd.is_finite() {
        return WseParams::new(previous.kl, previous.kd, roll);
    }
    WseParams::new(kl, kd, roll)
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn parameters_invert_acceleration() {
        let params = WseParams::new(0.0045, 0.0032, 0.2);
        let airspeed = Vector3::new(20.0, -25.0, 35.0);
        let accel = wingsuit_acceleration(&airspeed, &params);

        let recovered = wingsuit_parameters(&airspeed, &accel, &WseParams::default());
        assert_relative_eq!(recovered.kl, params.kl, epsilon = 1e-9);
        assert_relative_eq!(recovered.kd, params.kd, epsilon = 1e-9);
        assert_relative_eq!(recovered.roll, params.roll, epsilon = 1e-6);
    }

    #[test]
    fn at_rest_is_zero() {
        let params = WseParams::default();
        assert_eq!(
            wingsuit_acceleration(&Vector3::new(0.01, 0.0, 0.0), &params),
            Vector3::zeros()
        );
        // straight down has no defined heading
        assert_eq!(
            wingsuit_acceleration(&Vector3::new(0.0, -50.0, 0.0), &params),
            Vector3::zeros()
        );
    }

    #[test]
    fn slow_keeps_previous() {
        let previous = WseParams::new(0.003, 0.004, -0.1);
        let recovered = wingsuit_parameters(
            &Vector3::new(0.2, 0.1, 0.3),
            &Vector3::new(5.0, 5.0, 5.0),
            &previous,
        );
        assert_eq!(recovered, previous);
    }

    #[test]
    fn sustained_speeds() {
        let params = WseParams::new(0.0045, 0.0032, 0.0);
        let (vxs, vys) = params.sustained_speeds().unwrap();
        assert!(vxs > 0.0);
        assert!(vys < 0.0);
        assert_relative_eq!(vxs / -vys, params.lift_drag_ratio().unwrap(), epsilon = 1e-12);

        // steady glide at the sustained speeds has no acceleration
        let glide = Vector3::new(0.0, vys, vxs);
        let accel = wingsuit_acceleration(&glide, &params);
        assert_relative_eq!(accel.norm(), 0.0, epsilon = 1e-9);

        assert!(WseParams::new(0.0, 0.0, 0.0).sustained_speeds().is_none());
        assert!(WseParams::new(0.01, 0.0, 0.0).lift_drag_ratio().is_none());
    }
}
