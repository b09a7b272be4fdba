use core::fmt::Debug;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::estimator::{KFState, MotionEstimator, PredictionHorizon};
use crate::fix::LocationFix;
use crate::geo::{LatLonAlt, offset_meters};
use crate::utils::normalize_angle;

/// User alignment of the rendered scene against the real world.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Adjustment {
    /// heading correction (rad), kept in [0, 2π)
    pub yaw: f64,
    pub north: f64,
    pub east: f64,
}

impl Adjustment {
    pub fn new(yaw: f64, north: f64, east: f64) -> Self {
        Self { yaw, north, east }.normalized()
    }

    pub fn normalized(self) -> Self {
        Self {
            yaw: normalize_angle(self.yaw),
            north: if self.north.is_finite() { self.north } else { 0.0 },
            east: if self.east.is_finite() { self.east } else { 0.0 },
        }
    }

    /// Translation of the scene, `(east, 0, north)`.
    pub fn scene_offset(&self) -> Vector3<f64> {
        Vector3::new(self.east, 0.0, self.north)
    }
}

/// Somewhere an [`Adjustment`] survives restarts.
pub trait AdjustmentStore {
    type Error: Debug;

    fn load(&mut self) -> Result<Option<Adjustment>, Self::Error>;
    fn save(&mut self, adjustment: &Adjustment) -> Result<(), Self::Error>;
}

/// Keeps the adjustment in memory, for tests and hosts without storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore(pub Option<Adjustment>);

impl AdjustmentStore for MemoryStore {
    type Error = core::convert::Infallible;

    fn load(&mut self) -> Result<Option<Adjustment>, Self::Error> {
        Ok(self.0)
    }

    fn save(&mut self, adjustment: &Adjustment) -> Result<(), Self::Error> {
        self.0 = Some(*adjustment);
        Ok(())
    }
}

/// Maps geographic positions into the render frame centred on the user.
///
/// The frame is `(east, up, north)` meters from the most recent fix, rotated by
/// the yaw adjustment. Between fixes the user keeps moving, so the world is
/// shifted back by however far the motion estimator says the user has gone.
#[derive(Debug, Clone, Default)]
pub struct CoordinateTransform {
    initial_origin: Option<LocationFix>,
    last_origin: Option<LocationFix>,
    adjustment: Adjustment,
    horizon: PredictionHorizon,
}

impl CoordinateTransform {
    pub fn new(adjustment: Adjustment) -> Self {
        Self {
            adjustment: adjustment.normalized(),
            ..Default::default()
        }
    }

    /// Loads the adjustment from `store`, starting unadjusted if that fails.
    pub fn from_store<S: AdjustmentStore>(store: &mut S) -> Self {
        let adjustment = match store.load() {
            Ok(adjustment) => adjustment.unwrap_or_default(),
            Err(_e) => {
                log_warn!("could not load adjustment, starting unadjusted: {:?}", _e);
                Adjustment::default()
            }
        };
        log_debug!("loaded adjustment {:?}", adjustment);
        Self::new(adjustment)
    }

    pub fn with_horizon(mut self, horizon: PredictionHorizon) -> Self {
        self.horizon = horizon;
        self
    }

    /// Moves the frame to `fix`. The very first origin is remembered for the
    /// lifetime of the transform.
    pub fn set_origin(&mut self, fix: LocationFix) {
        if self.initial_origin.is_none() {
            log_debug!("initial origin {:?}", fix.lat_lon_alt());
            self.initial_origin = Some(fix);
        }
        self.last_origin = Some(fix);
    }

    pub fn initial_origin(&self) -> Option<&LocationFix> {
        self.initial_origin.as_ref()
    }

    pub fn last_origin(&self) -> Option<&LocationFix> {
        self.last_origin.as_ref()
    }

    pub fn adjustment(&self) -> &Adjustment {
        &self.adjustment
    }

    pub fn set_adjustment(&mut self, adjustment: Adjustment) {
        self.adjustment = adjustment.normalized();
    }

    /// Turns the scene by `delta` radians on top of the current yaw.
    pub fn rotate_yaw(&mut self, delta: f64) {
        self.adjustment.yaw = normalize_angle(self.adjustment.yaw + delta);
    }

    pub fn save_adjustment<S: AdjustmentStore>(&mut self, store: &mut S) -> Result<(), S::Error> {
        self.adjustment = self.adjustment.normalized();
        store.save(&self.adjustment)?;
        log_debug!("saved adjustment, yaw {} deg", self.adjustment.yaw.to_degrees());
        Ok(())
    }

    /// Plain offset from the last origin, no extrapolation and no yaw.
    /// Zero before the first origin.
    pub fn to_local(&self, lat: f64, lon: f64, alt: f64) -> Vector3<f64> {
        match &self.last_origin {
            Some(origin) => offset_meters(&origin.lat_lon_alt(), &LatLonAlt::new(lat, lon, alt)),
            None => Vector3::zeros(),
        }
    }

    /// Render-frame position of a point at render time `now_ms`.
    ///
    /// Uses `estimator` when it is warm and its last fix is this transform's
    /// origin. Otherwise the origin fix's own velocity is extrapolated under
    /// the same horizon as the estimators.
    pub fn to_local_at(
        &self,
        lat: f64,
        lon: f64,
        alt: f64,
        now_ms: i64,
        estimator: Option<&dyn MotionEstimator>,
    ) -> Vector3<f64> {
        self.locate(lat, lon, alt, |origin| match self.synced(origin, estimator) {
            Some(estimator) => estimator.predict_delta(now_ms),
            None => self.linear_drift(origin, now_ms),
        })
    }

    /// Same as [`to_local_at`](Self::to_local_at) at `predicted.timestamp_ms`,
    /// reusing a prediction `estimator` already made instead of asking it for one.
    pub fn to_local_predicted(
        &self,
        lat: f64,
        lon: f64,
        alt: f64,
        estimator: &dyn MotionEstimator,
        predicted: &KFState,
    ) -> Vector3<f64> {
        self.locate(lat, lon, alt, |origin| match self.synced(origin, Some(estimator)) {
            Some(estimator) => estimator.delta_from(predicted),
            None => self.linear_drift(origin, predicted.timestamp_ms),
        })
    }

    fn locate(
        &self,
        lat: f64,
        lon: f64,
        alt: f64,
        drift: impl FnOnce(&LocationFix) -> Vector3<f64>,
    ) -> Vector3<f64> {
        let Some(origin) = &self.last_origin else {
            return Vector3::zeros();
        };
        let base = offset_meters(&origin.lat_lon_alt(), &LatLonAlt::new(lat, lon, alt));
        let local = base - drift(origin);
        let local = if local.iter().all(|c| c.is_finite()) {
            local
        } else {
            base
        };
        rotate_yaw(&local, self.adjustment.yaw)
    }

    fn synced<'a>(
        &self,
        origin: &LocationFix,
        estimator: Option<&'a dyn MotionEstimator>,
    ) -> Option<&'a dyn MotionEstimator> {
        estimator.filter(|e| {
            e.is_warm() && e.last_update().map(|f| f.timestamp_ms) == Some(origin.timestamp_ms)
        })
    }

    fn linear_drift(&self, origin: &LocationFix, now_ms: i64) -> Vector3<f64> {
        let dt = now_ms.saturating_sub(origin.timestamp_ms) as f64 * 1e-3;
        if dt <= 0.0 {
            return Vector3::zeros();
        }
        origin.velocity_enu() * self.horizon.linear_travel(dt)
    }
}

/// Rotates the horizontal part of an `(east, up, north)` vector so that a yaw
/// adjustment of `yaw` radians turns the world against it.
pub fn rotate_yaw(v: &Vector3<f64>, yaw: f64) -> Vector3<f64> {
    if yaw == 0.0 {
        return *v;
    }
    let (sin, cos) = (-yaw).sin_cos();
    Vector3::new(v.x * cos - v.z * sin, v.y, v.x * sin + v.z * cos)
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;
    use core::f64::consts::{FRAC_PI_2, PI, TAU};

    use super::*;
    use crate::estimator::{KalmanFilter3D, SimpleEstimator};
    use crate::tests::FixStream;

    #[test]
    fn zero_before_origin() {
        let transform = CoordinateTransform::default();
        assert_eq!(transform.to_local(47.0, -123.0, 100.0), Vector3::zeros());
        let estimator = SimpleEstimator::default();
        assert_eq!(
            transform.to_local_at(47.0, -123.0, 100.0, 1000, Some(&estimator)),
            Vector3::zeros()
        );
    }

    #[test]
    fn origins() {
        let mut transform = CoordinateTransform::default();
        let first = LocationFix::new(1000, 47.0, -123.0, 100.0, 0.0, 0.0, 0.0);
        let second = LocationFix::new(2000, 47.001, -123.0, 100.0, 0.0, 0.0, 0.0);
        transform.set_origin(first);
        transform.set_origin(second);
        assert_eq!(transform.initial_origin(), Some(&first));
        assert_eq!(transform.last_origin(), Some(&second));

        let local = transform.to_local(47.0, -123.0, 100.0);
        assert_relative_eq!(local.z, -111.19, epsilon = 0.01);
    }

    #[test]
    fn yaw_is_normalized() {
        for (yaw, expected) in [(-FRAC_PI_2, 1.5 * PI), (5.0 * PI, PI), (TAU, 0.0), (0.25, 0.25)] {
            let adjustment = Adjustment::new(yaw, 0.0, 0.0);
            assert!((0.0..TAU).contains(&adjustment.yaw));
            assert_relative_eq!(adjustment.yaw, expected, epsilon = 1e-12);
        }

        let mut transform = CoordinateTransform::default();
        transform.rotate_yaw(-0.5);
        transform.rotate_yaw(-TAU);
        assert_relative_eq!(transform.adjustment().yaw, TAU - 0.5, epsilon = 1e-12);

        let mut store = MemoryStore::default();
        transform.save_adjustment(&mut store).unwrap();
        let restored = CoordinateTransform::from_store(&mut store);
        assert_eq!(restored.adjustment(), transform.adjustment());
    }

    #[test]
    fn yaw_rotation() {
        let mut transform = CoordinateTransform::new(Adjustment::new(FRAC_PI_2, 0.0, 0.0));
        transform.set_origin(LocationFix::new(0, 47.0, -123.0, 0.0, 0.0, 0.0, 0.0));
        // a point due north ends up due east after turning the scene a quarter
        let local = transform.to_local_at(47.001, -123.0, 0.0, 0, None);
        assert_relative_eq!(local.x, 111.19, epsilon = 0.01);
        assert_relative_eq!(local.z, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn linear_fallback_is_bounded() {
        let mut transform = CoordinateTransform::default();
        let origin = LocationFix::new(10_000, 47.0, -123.0, 1000.0, 30.0, 0.0, -10.0);
        transform.set_origin(origin);

        let at = |ms| transform.to_local_at(47.0, -123.0, 1000.0, ms, None);
        // half a second later the origin point is 15m behind
        assert_relative_eq!(at(10_500).z, -15.0, epsilon = 1e-9);
        assert_relative_eq!(at(10_500).y, 5.0, epsilon = 1e-9);
        // past the cap drift stops growing beyond |v|·(cap + tau)
        let far = at(10_000 + 3_600_000);
        assert_relative_eq!(far.z, -30.0 * 5.0, epsilon = 1e-6);
        // render time before the fix does not extrapolate backwards
        assert_eq!(at(9_000), Vector3::zeros());
    }

    #[test]
    fn estimator_drift_is_used_when_in_sync() {
        let mut transform = CoordinateTransform::default();
        let mut filter = KalmanFilter3D::default();
        let mut stream = FixStream::new(47.0, -123.0, 2000.0).velocity(40.0, 0.0, -20.0);
        for fix in stream.take_fixes(30, 200) {
            filter.update(&fix);
            transform.set_origin(fix);
        }
        let origin = *transform.last_origin().unwrap();
        let now = origin.timestamp_ms + 500;

        let target = (origin.lat, origin.lon, origin.alt);
        let with = transform.to_local_at(target.0, target.1, target.2, now, Some(&filter));
        assert_relative_eq!(with, -filter.predict_delta(now), epsilon = 1e-9);

        // an estimator lagging behind the origin is ignored
        let lagging = KalmanFilter3D::default();
        let without = transform.to_local_at(target.0, target.1, target.2, now, Some(&lagging));
        assert_relative_eq!(without, -origin.velocity_enu() * 0.5, epsilon = 1e-9);
    }

    #[test]
    fn held_prediction_matches_a_fresh_one() {
        let mut transform = CoordinateTransform::default();
        let mut filter = KalmanFilter3D::default();
        let mut stream = FixStream::new(47.0, -123.0, 2000.0).velocity(40.0, 0.0, -20.0);
        for fix in stream.take_fixes(30, 200) {
            filter.update(&fix);
            transform.set_origin(fix);
        }
        let origin = *transform.last_origin().unwrap();
        let now = origin.timestamp_ms + 30;
        let predicted = filter.extrapolate(now);

        let held = transform.to_local_predicted(47.0, -123.0, 2000.0, &filter, &predicted);
        let fresh = transform.to_local_at(47.0, -123.0, 2000.0, now, Some(&filter));
        assert_relative_eq!(held, fresh, epsilon = 1e-12);

        // a prediction from before the current origin falls back to the origin's velocity
        let stale = KalmanFilter3D::default();
        let held = transform.to_local_predicted(47.0, -123.0, 2000.0, &stale, &predicted);
        let linear = transform.to_local_at(47.0, -123.0, 2000.0, now, None);
        assert_relative_eq!(held, linear, epsilon = 1e-12);
    }

    #[test]
    fn extreme_render_times() {
        let mut transform = CoordinateTransform::default();
        let mut filter = KalmanFilter3D::default();
        let mut stream = FixStream::new(47.0, -123.0, 2000.0).velocity(40.0, 0.0, -20.0);
        for fix in stream.take_fixes(30, 200) {
            filter.update(&fix);
            transform.set_origin(fix);
        }
        let mut simple = SimpleEstimator::default();
        for fix in stream.take_fixes(30, 200) {
            simple.update(&fix);
        }

        for now in [i64::MAX, i64::MIN, i64::MAX - 1, i64::MIN + 1] {
            let state = filter.predict(now);
            assert!(state.position.iter().all(|p| p.is_finite()));
            assert!(filter.predict_delta(now).iter().all(|p| p.is_finite()));
            assert!(simple.predict(now).position.iter().all(|p| p.is_finite()));
            assert!(simple.predict_delta(now).iter().all(|p| p.is_finite()));

            let local = transform.to_local_at(47.0, -123.0, 2000.0, now, Some(&filter));
            assert!(local.iter().all(|c| c.is_finite()));
            let local = transform.to_local_at(47.0, -123.0, 2000.0, now, None);
            assert!(local.iter().all(|c| c.is_finite()));
        }

        // far future drift stays within |v|·(cap + tau)
        let origin = *transform.last_origin().unwrap();
        let far = transform.to_local_at(origin.lat, origin.lon, origin.alt, i64::MAX, None);
        assert!(far.norm() <= origin.velocity_enu().norm() * 5.0 + 1e-6);
        // the far past does not extrapolate backwards
        let past = transform.to_local_at(origin.lat, origin.lon, origin.alt, i64::MIN, None);
        assert_eq!(past, Vector3::zeros());
    }

    #[test]
    fn scene_offset() {
        let adjustment = Adjustment::new(0.0, 12.0, -3.0);
        assert_eq!(adjustment.scene_offset(), Vector3::new(-3.0, 0.0, 12.0));
        let cleaned = Adjustment::new(f64::NAN, f64::INFINITY, 1.0);
        assert_eq!(cleaned, Adjustment::new(0.0, 0.0, 1.0));
    }
}
