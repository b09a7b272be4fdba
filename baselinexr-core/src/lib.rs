mod fmt;

pub mod classifier;
pub mod estimator;
pub mod fix;
pub mod flight_mode;
pub mod freshness;
pub mod geo;
pub mod session;
pub mod transform;
mod utils;

pub use classifier::{ClassifierConfig, FlightModeClassifier};
pub use estimator::{
    KFState, KalmanConfig, KalmanFilter3D, MotionEstimator, PredictionHorizon, SimpleEstimator,
    SimpleEstimatorConfig, WseParams,
};
pub use fix::LocationFix;
pub use flight_mode::{FlightMode, SpeedThresholds};
pub use freshness::{Freshness, FreshnessConfig};
pub use geo::LatLonAlt;
pub use session::{EstimatorKind, Session, SessionConfig, SharedSession};
pub use transform::{Adjustment, AdjustmentStore, CoordinateTransform, MemoryStore};
pub use utils::{density_ratio, isa_air_density, normalize_angle};

#[cfg(test)]
mod tests;
