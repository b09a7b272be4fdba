use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::geo::LatLonAlt;

/// One GPS sample as delivered by the receiver.
///
/// Velocities are in m/s, `climb` is positive up. Timestamps are the receiver's
/// monotonic milliseconds and are the only clock the estimators look at.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub timestamp_ms: i64,
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    pub v_north: f64,
    pub v_east: f64,
    pub climb: f64,
    /// horizontal accuracy, 1 sigma (m)
    #[serde(default)]
    pub horizontal_accuracy: Option<f64>,
    /// vertical accuracy, 1 sigma (m)
    #[serde(default)]
    pub vertical_accuracy: Option<f64>,
}

impl LocationFix {
    pub fn new(
        timestamp_ms: i64,
        lat: f64,
        lon: f64,
        alt: f64,
        v_north: f64,
        v_east: f64,
        climb: f64,
    ) -> Self {
        Self {
            timestamp_ms,
            lat,
            lon,
            alt,
            v_north,
            v_east,
            climb,
            horizontal_accuracy: None,
            vertical_accuracy: None,
        }
    }

    pub fn with_accuracy(mut self, horizontal: f64, vertical: f64) -> Self {
        self.horizontal_accuracy = Some(horizontal);
        self.vertical_accuracy = Some(vertical);
        self
    }

    pub fn lat_lon_alt(&self) -> LatLonAlt {
        LatLonAlt::new(self.lat, self.lon, self.alt)
    }

    /// velocity as `(east, up, north)`
    pub fn velocity_enu(&self) -> Vector3<f64> {
        Vector3::new(self.v_east, self.climb, self.v_north)
    }

    pub fn ground_speed(&self) -> f64 {
        self.v_north.hypot(self.v_east)
    }

    pub fn is_finite(&self) -> bool {
        self.lat_lon_alt().is_finite() && self.velocity_enu().iter().all(|v| v.is_finite())
    }
}
