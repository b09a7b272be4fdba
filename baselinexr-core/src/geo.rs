//! Spherical-earth geodesy in the local east/up/north frame.
//!
//! Every local vector in this crate is laid out as `(east, up, north)` in meters,
//! matching the render frame where y points up.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::utils::wrap_pi;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// latitude or longitude difference (radians) above which the flat-earth
/// approximation is replaced by the haversine distance
pub const LONG_DISTANCE_THRESHOLD_RAD: f64 = 0.01;

/// corrections applied when inverting the long-distance offset
const DIRECTION_ITERATIONS: usize = 8;

/// A geographic position. Latitude and longitude in degrees, altitude in meters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LatLonAlt {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
}

impl LatLonAlt {
    pub const fn new(lat: f64, lon: f64, alt: f64) -> Self {
        Self { lat, lon, alt }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite() && self.alt.is_finite()
    }
}

fn is_long_distance(d_lat: f64, d_lon: f64) -> bool {
    d_lat.abs() > LONG_DISTANCE_THRESHOLD_RAD || d_lon.abs() > LONG_DISTANCE_THRESHOLD_RAD
}

fn haversine_rad(lat1: f64, lat2: f64, d_lat: f64, d_lon: f64) -> f64 {
    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * a.sqrt().atan2((1.0 - a).max(0.0).sqrt())
}

fn initial_bearing_rad(lat1: f64, lat2: f64, d_lon: f64) -> f64 {
    let y = d_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();
    y.atan2(x)
}

/// Great-circle distance in meters, ignoring altitude.
pub fn distance(from: &LatLonAlt, to: &LatLonAlt) -> f64 {
    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();
    let d_lon = wrap_pi((to.lon - from.lon).to_radians());
    EARTH_RADIUS_M * haversine_rad(lat1, lat2, lat2 - lat1, d_lon)
}

/// Initial great-circle bearing in radians, clockwise from true north.
pub fn bearing(from: &LatLonAlt, to: &LatLonAlt) -> f64 {
    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();
    let d_lon = wrap_pi((to.lon - from.lon).to_radians());
    initial_bearing_rad(lat1, lat2, d_lon)
}

/// Direction of a displacement in the tangent plane at the mean latitude,
/// clockwise from north. The flat-earth step points the same way.
fn local_direction_rad(lat1: f64, lat2: f64, d_lon: f64) -> f64 {
    (d_lon * ((lat1 + lat2) / 2.0).cos()).atan2(lat2 - lat1)
}

fn destination_rad(lat1: f64, lon1: f64, angular: f64, bearing: f64) -> (f64, f64) {
    let lat2 = (lat1.sin() * angular.cos() + lat1.cos() * angular.sin() * bearing.cos()).asin();
    let lon2 = lon1
        + (bearing.sin() * angular.sin() * lat1.cos()).atan2(angular.cos() - lat1.sin() * lat2.sin());
    (lat2, lon2)
}

/// Offset of `to` relative to `from` as `(east, up, north)` meters.
///
/// Small separations use the flat-earth approximation at the mean latitude.
/// Once either angular difference exceeds [`LONG_DISTANCE_THRESHOLD_RAD`] the
/// horizontal length becomes the haversine distance, still pointing along the
/// flat-earth direction so both sides of the threshold agree.
///
/// Returns `None` when any input or component is not finite.
pub fn try_offset_meters(from: &LatLonAlt, to: &LatLonAlt) -> Option<Vector3<f64>> {
    if !from.is_finite() || !to.is_finite() {
        return None;
    }
    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();
    let d_lat = lat2 - lat1;
    let d_lon = wrap_pi((to.lon - from.lon).to_radians());

    let (east, north) = if is_long_distance(d_lat, d_lon) {
        let direction = local_direction_rad(lat1, lat2, d_lon);
        let distance = EARTH_RADIUS_M * haversine_rad(lat1, lat2, d_lat, d_lon);
        (distance * direction.sin(), distance * direction.cos())
    } else {
        let mean_lat = (lat1 + lat2) / 2.0;
        (EARTH_RADIUS_M * d_lon * mean_lat.cos(), EARTH_RADIUS_M * d_lat)
    };

    let offset = Vector3::new(east, to.alt - from.alt, north);
    offset.iter().all(|c| c.is_finite()).then_some(offset)
}

/// Same as [`try_offset_meters`] but degrades to a zero vector instead of
/// letting NaN reach the renderer.
pub fn offset_meters(from: &LatLonAlt, to: &LatLonAlt) -> Vector3<f64> {
    try_offset_meters(from, to).unwrap_or_else(Vector3::zeros)
}

/// Moves `base` by the sum of `offsets` (each `(east, up, north)` meters).
///
/// Inverse of [`try_offset_meters`]. Short moves invert the flat-earth step.
/// Long moves walk the great circle for the offset's length, correcting the
/// initial bearing until the destination lies along the offset's direction.
/// Returns `None` at the poles or on non-finite input.
pub fn try_apply_offset(base: &LatLonAlt, offsets: &[Vector3<f64>]) -> Option<LatLonAlt> {
    let total: Vector3<f64> = offsets.iter().fold(Vector3::zeros(), |acc, o| acc + o);
    if !base.is_finite() || !total.iter().all(|c| c.is_finite()) {
        return None;
    }
    let (east, up, north) = (total.x, total.y, total.z);

    let lat1 = base.lat.to_radians();
    let lon1 = base.lon.to_radians();

    let d_lat = north / EARTH_RADIUS_M;
    let lat2 = lat1 + d_lat;
    let d_lon = east / (EARTH_RADIUS_M * ((lat1 + lat2) / 2.0).cos());

    let (lat2, lon2) = if is_long_distance(d_lat, d_lon) {
        let angular = east.hypot(north) / EARTH_RADIUS_M;
        let direction = east.atan2(north);
        let mut bearing = direction;
        let mut moved = destination_rad(lat1, lon1, angular, bearing);
        for _ in 0..DIRECTION_ITERATIONS {
            let (lat2, lon2) = moved;
            let error = wrap_pi(direction - local_direction_rad(lat1, lat2, wrap_pi(lon2 - lon1)));
            if error.abs() < 1e-12 {
                break;
            }
            bearing += error;
            moved = destination_rad(lat1, lon1, angular, bearing);
        }
        moved
    } else {
        (lat2, lon1 + d_lon)
    };

    let moved = LatLonAlt::new(
        lat2.to_degrees(),
        wrap_pi(lon2).to_degrees(),
        base.alt + up,
    );
    moved.is_finite().then_some(moved)
}

/// Same as [`try_apply_offset`] but keeps `base` when the result is not finite.
pub fn apply_offset(base: &LatLonAlt, offsets: &[Vector3<f64>]) -> LatLonAlt {
    try_apply_offset(base, offsets).unwrap_or(*base)
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn one_milli_degree_north() {
        let from = LatLonAlt::new(47.0, -123.0, 100.0);
        let to = LatLonAlt::new(47.001, -123.0, 100.0);

        let offset = offset_meters(&from, &to);
        assert_relative_eq!(offset.x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(offset.y, 0.0, epsilon = 1e-9);
        assert_relative_eq!(offset.z, 111.19, epsilon = 0.01);

        let back = apply_offset(&from, &[offset]);
        assert_relative_eq!(back.lat, 47.001, epsilon = 1e-5);
        assert_relative_eq!(back.lon, -123.0, epsilon = 1e-5);
        assert_relative_eq!(back.alt, 100.0, epsilon = 1e-9);
    }

    #[test]
    fn short_round_trip() {
        let base = LatLonAlt::new(47.0, -123.0, 1200.0);
        for (east, up, north) in [
            (350.0, -20.0, -120.0),
            (-900.0, 40.0, 800.0),
            (5.0, 0.0, -5.0),
            (2000.0, -1100.0, 3000.0),
        ] {
            let target = apply_offset(&base, &[Vector3::new(east, up, north)]);
            let offset = offset_meters(&base, &target);
            assert_relative_eq!(offset.x, east, epsilon = 0.1);
            assert_relative_eq!(offset.y, up, epsilon = 0.1);
            assert_relative_eq!(offset.z, north, epsilon = 0.1);

            let back = apply_offset(&base, &[offset]);
            assert_relative_eq!(back.lat, target.lat, epsilon = 1e-6);
            assert_relative_eq!(back.lon, target.lon, epsilon = 1e-6);
        }
    }

    #[test]
    fn long_round_trip() {
        let base = LatLonAlt::new(47.0, -123.0, 0.0);
        for to in [
            LatLonAlt::new(47.7, -123.2, 0.0),
            LatLonAlt::new(46.8, -123.5, 300.0),
            LatLonAlt::new(47.0, -122.4, 0.0),
        ] {
            let offset = offset_meters(&base, &to);
            let back = apply_offset(&base, &[offset]);
            // 1m expressed in degrees of latitude
            assert_relative_eq!(back.lat, to.lat, epsilon = 1.0 / 111_000.0);
            assert_relative_eq!(back.lon, to.lon, epsilon = 1.0 / 75_000.0);
            assert_relative_eq!(back.alt, to.alt, epsilon = 1e-6);
        }
    }

    #[test]
    fn offsets_are_summed() {
        let base = LatLonAlt::new(10.0, 20.0, 0.0);
        let one = apply_offset(&base, &[Vector3::new(30.0, 1.0, 40.0)]);
        let split = apply_offset(
            &base,
            &[Vector3::new(10.0, 0.5, 15.0), Vector3::new(20.0, 0.5, 25.0)],
        );
        assert_relative_eq!(one.lat, split.lat, epsilon = 1e-12);
        assert_relative_eq!(one.lon, split.lon, epsilon = 1e-12);
        assert_relative_eq!(one.alt, split.alt, epsilon = 1e-12);
    }

    #[test]
    fn bearing_and_distance() {
        let from = LatLonAlt::new(0.0, 0.0, 0.0);
        let east = LatLonAlt::new(0.0, 1.0, 0.0);
        assert_relative_eq!(bearing(&from, &east), core::f64::consts::FRAC_PI_2, epsilon = 1e-9);
        assert_relative_eq!(distance(&from, &east), 111_194.9, epsilon = 0.5);
        assert_relative_eq!(distance(&from, &from), 0.0);
    }

    #[test]
    fn non_finite_input_degrades_to_zero() {
        let from = LatLonAlt::new(47.0, -123.0, 0.0);
        let to = LatLonAlt::new(f64::NAN, -123.0, 0.0);
        assert!(try_offset_meters(&from, &to).is_none());
        assert_eq!(offset_meters(&from, &to), Vector3::zeros());

        let pole = LatLonAlt::new(90.0, 0.0, 0.0);
        assert_eq!(apply_offset(&pole, &[Vector3::new(f64::NAN, 0.0, 0.0)]), pole);
    }

    #[test]
    fn nan_longitude_is_not_an_offset() {
        let from = LatLonAlt::new(47.0, -123.0, 0.0);
        let to = LatLonAlt::new(47.0, f64::NAN, 10.0);
        assert!(try_offset_meters(&from, &to).is_none());
        assert_eq!(offset_meters(&from, &to), Vector3::zeros());
        assert!(try_offset_meters(&to, &from).is_none());
        assert!(distance(&from, &to).is_nan());

        assert!(try_apply_offset(&from, &[Vector3::new(f64::NAN, 0.0, 0.0)]).is_none());
        assert!(try_apply_offset(&to, &[Vector3::new(10.0, 0.0, 0.0)]).is_none());
        assert_eq!(apply_offset(&from, &[Vector3::new(0.0, f64::INFINITY, 0.0)]), from);
    }

    #[test]
    fn round_trip_across_the_threshold() {
        for base in [
            LatLonAlt::new(47.0, -123.0, 0.0),
            LatLonAlt::new(70.0, 20.0, 0.0),
            LatLonAlt::new(-33.0, 151.0, 0.0),
            LatLonAlt::new(0.0, 179.9, 0.0),
        ] {
            let mut east = -60_000.0;
            while east <= 60_000.0 {
                let mut north = -50_000.0;
                while north <= 50_000.0 {
                    let offset = Vector3::new(east, 0.0, north);
                    let target = try_apply_offset(&base, &[offset]).unwrap();
                    let back = offset_meters(&base, &target);
                    assert!(
                        (back - offset).norm() < 1.0,
                        "{:?} from {:?} came back as {:?}",
                        offset,
                        base,
                        back
                    );

                    let again = apply_offset(&base, &[back]);
                    assert!(offset_meters(&target, &again).norm() < 1.0);
                    north += 2_000.0;
                }
                east += 250.0;
            }
        }
    }

    #[test]
    fn offset_is_continuous_at_the_threshold() {
        let base = LatLonAlt::new(47.0, -123.0, 0.0);
        let threshold_deg = LONG_DISTANCE_THRESHOLD_RAD.to_degrees();
        for d_lat in [-0.2, -0.1, 0.0, 0.1, 0.2] {
            let short = LatLonAlt::new(base.lat + d_lat, base.lon + threshold_deg - 1e-9, 0.0);
            let long = LatLonAlt::new(base.lat + d_lat, base.lon + threshold_deg + 1e-9, 0.0);
            let jump = offset_meters(&base, &long) - offset_meters(&base, &short);
            assert!(jump.norm() < 1.0, "{} m jump at d_lat {}", jump.norm(), d_lat);
        }
    }
}
