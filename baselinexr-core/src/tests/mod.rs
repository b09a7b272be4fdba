#[cfg(feature = "log")]
use log::LevelFilter;
use nalgebra::Vector3;

use crate::fix::LocationFix;
use crate::geo::{LatLonAlt, apply_offset};


pub fn init_logger() {
    #[cfg(feature = "log")]
    let _ = env_logger::builder()
        .filter_level(LevelFilter::Warn)
        .filter(Some("baselinexr_core"), LevelFilter::Trace)
        .is_test(true)
        .try_init();
}

/// Synthetic receiver flying at a piecewise constant velocity.
pub struct FixStream {
    position: LatLonAlt,
    timestamp_ms: i64,
    /// (east, up, north)
    velocity: Vector3<f64>,
}

impl FixStream {
    pub fn new(lat: f64, lon: f64, alt: f64) -> Self {
        Self {
            position: LatLonAlt::new(lat, lon, alt),
            timestamp_ms: 1000,
            velocity: Vector3::zeros(),
        }
    }

    pub fn velocity(mut self, v_north: f64, v_east: f64, climb: f64) -> Self {
        self.set_velocity(v_north, v_east, climb);
        self
    }

    pub fn set_velocity(&mut self, v_north: f64, v_east: f64, climb: f64) {
        self.velocity = Vector3::new(v_east, climb, v_north);
    }

    pub fn fix(&self) -> LocationFix {
        LocationFix::new(
            self.timestamp_ms,
            self.position.lat,
            self.position.lon,
            self.position.alt,
            self.velocity.z,
            self.velocity.x,
            self.velocity.y,
        )
    }

    /// `n` fixes `period_ms` apart, continuing where the last call stopped.
    pub fn take_fixes(&mut self, n: usize, period_ms: i64) -> Vec<LocationFix> {
        (0..n)
            .map(|_| {
                let fix = self.fix();
                let dt = period_ms as f64 * 1e-3;
                self.position = apply_offset(&self.position, &[self.velocity * dt]);
                self.timestamp_ms += period_ms;
                fix
            })
            .collect()
    }
}
