//! One tracked jump: estimator, classifier and transform wired together.
//!
//! [`Session`] is the single-threaded pipeline. [`SharedSession`] wraps it for
//! one GPS writer and any number of render readers.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::{Mutex as BlockingMutex, raw::RawMutex};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::classifier::{ClassifierConfig, FlightModeClassifier};
use crate::estimator::{
    KFState, KalmanConfig, KalmanFilter3D, MotionEstimator, SimpleEstimator, SimpleEstimatorConfig,
};
use crate::fix::LocationFix;
use crate::flight_mode::FlightMode;
use crate::freshness::{Freshness, FreshnessConfig};
use crate::transform::{Adjustment, AdjustmentStore, CoordinateTransform};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorKind {
    #[default]
    Kalman,
    Simple,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub estimator: EstimatorKind,
    pub kalman: KalmanConfig,
    pub simple: SimpleEstimatorConfig,
    pub classifier: ClassifierConfig,
    pub freshness: FreshnessConfig,
}

#[derive(Debug, Clone)]
pub struct Session<E> {
    estimator: E,
    classifier: FlightModeClassifier,
    transform: CoordinateTransform,
    freshness: FreshnessConfig,
}

impl Session<KalmanFilter3D> {
    pub fn kalman(config: &SessionConfig, adjustment: Adjustment) -> Self {
        let transform = CoordinateTransform::new(adjustment).with_horizon(config.kalman.horizon);
        Self::new(
            KalmanFilter3D::new(config.kalman),
            FlightModeClassifier::new(config.classifier),
            transform,
            config.freshness,
        )
    }
}

impl Session<SimpleEstimator> {
    pub fn simple(config: &SessionConfig, adjustment: Adjustment) -> Self {
        let transform = CoordinateTransform::new(adjustment).with_horizon(config.simple.horizon);
        Self::new(
            SimpleEstimator::new(config.simple),
            FlightModeClassifier::new(config.classifier),
            transform,
            config.freshness,
        )
    }
}

impl<E: MotionEstimator> Session<E> {
    pub fn new(
        estimator: E,
        classifier: FlightModeClassifier,
        transform: CoordinateTransform,
        freshness: FreshnessConfig,
    ) -> Self {
        Self {
            estimator,
            classifier,
            transform,
            freshness,
        }
    }

    /// Runs a fix through the estimator, then the classifier, then moves the
    /// render origin to it. A fix the estimator drops changes nothing.
    pub fn ingest(&mut self, fix: &LocationFix) -> FlightMode {
        let revision = self.estimator.revision();
        self.estimator.update(fix);
        if self.estimator.revision() == revision {
            log_debug!("session: fix at {}ms not accepted", fix.timestamp_ms);
            return self.classifier.mode();
        }

        let sustained = if self.estimator.is_warm() {
            self.estimator.committed().sustained_speeds()
        } else {
            None
        };
        let mode = self.classifier.update(fix, sustained);
        self.transform.set_origin(*fix);
        mode
    }

    pub fn predict(&self, now_ms: i64) -> KFState {
        self.estimator.predict(now_ms)
    }

    /// Render-frame position of a geographic point at `now_ms`.
    pub fn to_local(&self, lat: f64, lon: f64, alt: f64, now_ms: i64) -> Vector3<f64> {
        self.transform
            .to_local_at(lat, lon, alt, now_ms, Some(&self.estimator))
    }

    /// [`to_local`](Self::to_local) with a prediction `estimator` already made,
    /// which may be a copy of this session's estimator.
    fn to_local_predicted(
        &self,
        lat: f64,
        lon: f64,
        alt: f64,
        estimator: &E,
        predicted: &KFState,
    ) -> Vector3<f64> {
        self.transform
            .to_local_predicted(lat, lon, alt, estimator, predicted)
    }

    pub fn mode(&self) -> FlightMode {
        self.classifier.mode()
    }

    pub fn mode_str(&self) -> &'static str {
        self.classifier.mode_str()
    }

    pub fn freshness(&self, now_ms: i64) -> Freshness {
        let last = self.estimator.last_update().map(|f| f.timestamp_ms);
        self.freshness.classify(last, now_ms)
    }

    /// Fade of the GPS indicator, 0 while fresh and 1 when fully faded or without fix.
    pub fn freshness_fade(&self, now_ms: i64) -> f64 {
        match self.freshness(now_ms).age_ms() {
            Some(age_ms) => self.freshness.fade(age_ms),
            None => 1.0,
        }
    }

    pub fn rotate_yaw(&mut self, delta: f64) {
        self.transform.rotate_yaw(delta);
    }

    pub fn save_adjustment<S: AdjustmentStore>(&mut self, store: &mut S) -> Result<(), S::Error> {
        self.transform.save_adjustment(store)
    }

    /// Starts a new jump. The render origin is kept so the scene does not
    /// jump before the next fix.
    pub fn reset(&mut self) {
        log_info!("session reset");
        self.estimator.reset();
        self.classifier.reset();
    }

    pub fn estimator(&self) -> &E {
        &self.estimator
    }

    pub fn classifier(&self) -> &FlightModeClassifier {
        &self.classifier
    }

    pub fn classifier_mut(&mut self) -> &mut FlightModeClassifier {
        &mut self.classifier
    }

    pub fn transform(&self) -> &CoordinateTransform {
        &self.transform
    }
}

enum Lookup<R, E> {
    Hit(R),
    Miss(E),
}

/// A [`Session`] behind a blocking mutex.
///
/// The GPS thread calls [`ingest`](Self::ingest), render threads call
/// [`predict`](Self::predict) and [`to_local`](Self::to_local). The lock is only
/// held to copy state in or out: a reader clones the estimator, extrapolates
/// without the lock, and publishes into the prediction cache only if no fix
/// arrived in the meantime.
pub struct SharedSession<M: RawMutex, E> {
    session: BlockingMutex<M, RefCell<Session<E>>>,
}

impl<M: RawMutex, E: MotionEstimator + Clone> SharedSession<M, E> {
    pub fn new(session: Session<E>) -> Self {
        Self {
            session: BlockingMutex::new(RefCell::new(session)),
        }
    }

    pub fn ingest(&self, fix: &LocationFix) -> FlightMode {
        self.session.lock(|session| session.borrow_mut().ingest(fix))
    }

    /// Runs `read_fn` under the lock with the prediction for `now_ms` and the
    /// estimator it came from. A cache miss is extrapolated on a copy of the
    /// estimator outside the lock, `read_fn` then gets that copy.
    fn with_prediction<R>(
        &self,
        now_ms: i64,
        read_fn: impl Fn(&Session<E>, &E, &KFState) -> R,
    ) -> R {
        let lookup = self.session.lock(|session| {
            let session = session.borrow();
            match session.estimator.prediction_cache().get(now_ms) {
                Some(state) => Lookup::Hit(read_fn(&*session, &session.estimator, &state)),
                None => Lookup::Miss(session.estimator.clone()),
            }
        });
        let snapshot = match lookup {
            Lookup::Hit(result) => return result,
            Lookup::Miss(snapshot) => snapshot,
        };

        let state = snapshot.extrapolate(now_ms);
        self.session.lock(|session| {
            let session = session.borrow();
            if session.estimator.revision() == snapshot.revision() {
                session.estimator.prediction_cache().store(state);
            } else {
                log_trace!("session: prediction for {}ms is stale, not cached", now_ms);
            }
            read_fn(&*session, &snapshot, &state)
        })
    }

    pub fn predict(&self, now_ms: i64) -> KFState {
        self.with_prediction(now_ms, |_, _, state| *state)
    }

    /// Render-frame position of a geographic point at `now_ms`. Never
    /// extrapolates while holding the lock.
    pub fn to_local(&self, lat: f64, lon: f64, alt: f64, now_ms: i64) -> Vector3<f64> {
        self.with_prediction(now_ms, |session, estimator, state| {
            session.to_local_predicted(lat, lon, alt, estimator, state)
        })
    }

    pub fn mode(&self) -> FlightMode {
        self.session.lock(|session| session.borrow().mode())
    }

    pub fn freshness(&self, now_ms: i64) -> Freshness {
        self.session.lock(|session| session.borrow().freshness(now_ms))
    }

    pub fn read<R>(&self, read_fn: impl FnOnce(&Session<E>) -> R) -> R {
        self.session.lock(|session| read_fn(&session.borrow()))
    }

    pub fn update<R>(&self, update_fn: impl FnOnce(&mut Session<E>) -> R) -> R {
        self.session.lock(|session| update_fn(&mut session.borrow_mut()))
    }
}
