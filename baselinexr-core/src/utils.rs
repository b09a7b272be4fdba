use core::f64::consts::TAU;

/// sea level air density of the international standard atmosphere (kg/m^3)
pub const SEA_LEVEL_AIR_DENSITY: f64 = 1.225;

const SEA_LEVEL_TEMPERATURE: f64 = 288.15; // K
const SEA_LEVEL_PRESSURE: f64 = 101_325.0; // Pa
const TEMPERATURE_LAPSE_RATE: f64 = 0.0065; // K/m
const GAS_CONSTANT: f64 = 8.314_462_618;
const MOLAR_MASS_AIR: f64 = 0.028_964_4;
const STANDARD_GRAVITY: f64 = 9.806_65;

/// returns air density (kg/m^3) at altitude (m) from the troposphere model of the
/// international standard atmosphere.
/// altitude is clamped to the range the model is valid for.
pub fn isa_air_density(altitude_asl: f64) -> f64 {
    let altitude = if altitude_asl.is_finite() {
        altitude_asl.clamp(-1_000.0, 11_000.0)
    } else {
        0.0
    };
    let temperature = SEA_LEVEL_TEMPERATURE - TEMPERATURE_LAPSE_RATE * altitude;
    let exponent = STANDARD_GRAVITY * MOLAR_MASS_AIR / (GAS_CONSTANT * TEMPERATURE_LAPSE_RATE);
    let pressure = SEA_LEVEL_PRESSURE * (temperature / SEA_LEVEL_TEMPERATURE).powf(exponent);
    pressure * MOLAR_MASS_AIR / (GAS_CONSTANT * temperature)
}

/// air density at altitude relative to sea level, 1.0 at 0m and falling with height
pub fn density_ratio(altitude_asl: f64) -> f64 {
    isa_air_density(altitude_asl) / SEA_LEVEL_AIR_DENSITY
}

/// wraps an angle in radians into [0, 2π). non-finite input maps to 0
pub fn normalize_angle(radians: f64) -> f64 {
    if !radians.is_finite() {
        return 0.0;
    }
    let wrapped = radians.rem_euclid(TAU);
    // rem_euclid can round up to exactly TAU for tiny negative inputs
    if wrapped >= TAU { 0.0 } else { wrapped }
}

/// wraps an angle in radians into [-π, π). non-finite input stays NaN
pub fn wrap_pi(radians: f64) -> f64 {
    if !radians.is_finite() {
        return f64::NAN;
    }
    normalize_angle(radians + core::f64::consts::PI) - core::f64::consts::PI
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;
    use core::f64::consts::PI;

    use super::*;

    #[test]
    fn isa_density_test() {
        assert_relative_eq!(isa_air_density(0.0), 1.225, epsilon = 0.001);
        assert_relative_eq!(isa_air_density(3000.0), 0.9093, epsilon = 0.001);
        assert_relative_eq!(isa_air_density(5000.0), 0.7364, epsilon = 0.001);
        assert_relative_eq!(density_ratio(0.0), 1.0, epsilon = 0.001);
        assert!(density_ratio(4000.0) < 1.0);
        // clamped outside the troposphere
        assert_relative_eq!(isa_air_density(50_000.0), isa_air_density(11_000.0));
        assert_relative_eq!(isa_air_density(f64::NAN), 1.225, epsilon = 0.001);
    }

    #[test]
    fn normalize_angle_test() {
        assert_relative_eq!(normalize_angle(-PI / 2.0), 1.5 * PI, epsilon = 1e-12);
        assert_relative_eq!(normalize_angle(5.0 * PI), PI, epsilon = 1e-12);
        assert_eq!(normalize_angle(TAU), 0.0);
        assert_eq!(normalize_angle(-1e-18), 0.0);
        assert_eq!(normalize_angle(f64::INFINITY), 0.0);
        assert_relative_eq!(wrap_pi(1.5 * PI), -0.5 * PI, epsilon = 1e-12);
        // a bad longitude must not turn into a valid one
        assert!(wrap_pi(f64::NAN).is_nan());
        assert!(wrap_pi(f64::NEG_INFINITY).is_nan());
    }
}
