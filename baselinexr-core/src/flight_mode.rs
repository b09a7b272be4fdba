use core::fmt;

use serde::{Deserialize, Serialize};

use crate::fix::LocationFix;

/// Phase of a jump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FlightMode {
    #[default]
    Unknown,
    Ground,
    Plane,
    Wingsuit,
    Freefall,
    Deploy,
    Canopy,
    Landing,
}

impl FlightMode {
    pub const ALL: [FlightMode; 8] = [
        FlightMode::Unknown,
        FlightMode::Ground,
        FlightMode::Plane,
        FlightMode::Wingsuit,
        FlightMode::Freefall,
        FlightMode::Deploy,
        FlightMode::Canopy,
        FlightMode::Landing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FlightMode::Unknown => "Unknown",
            FlightMode::Ground => "Ground",
            FlightMode::Plane => "Plane",
            FlightMode::Wingsuit => "Wingsuit",
            FlightMode::Freefall => "Freefall",
            FlightMode::Deploy => "Deploy",
            FlightMode::Canopy => "Canopy",
            FlightMode::Landing => "Landing",
        }
    }

    /// Airborne, including the canopy phases.
    pub fn is_flight(&self) -> bool {
        !matches!(self, FlightMode::Unknown | FlightMode::Ground)
    }

    /// Collapses the deploy and landing phases into [`FlightMode::Canopy`],
    /// the vocabulary of [`classify_speeds`].
    pub fn to_basic(self) -> FlightMode {
        match self {
            FlightMode::Deploy | FlightMode::Canopy | FlightMode::Landing => FlightMode::Canopy,
            other => other,
        }
    }

    /// Modes reachable from `self` in one gated step, `self` included.
    pub fn successors(self) -> &'static [FlightMode] {
        use FlightMode::*;
        match self {
            Unknown => &[Unknown, Ground, Plane, Wingsuit, Freefall],
            Ground => &[Ground, Plane, Wingsuit, Freefall],
            Plane => &[Plane, Wingsuit, Freefall, Ground],
            Wingsuit => &[Wingsuit, Deploy, Plane],
            Freefall => &[Freefall, Deploy, Wingsuit],
            Deploy => &[Deploy, Canopy],
            Canopy => &[Canopy, Landing],
            Landing => &[Landing, Ground],
        }
    }

    pub fn can_transition_to(self, next: FlightMode) -> bool {
        self.successors().contains(&next)
    }
}

impl fmt::Display for FlightMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The tunable corners of the speed polygon used by [`classify_speeds`] (m/s).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedThresholds {
    /// planes fly faster than this
    pub plane_min_ground_speed: f64,
    /// freefall moves slower than this horizontally
    pub freefall_max_ground_speed: f64,
    /// freefall sinks faster than this
    pub freefall_min_sink: f64,
    /// any body sinking faster than this is flying a wingsuit at least
    pub wingsuit_min_sink: f64,
    /// ground speed plus vertical deviation from 1 m/s below this is standing still
    pub ground_tolerance: f64,
}

impl Default for SpeedThresholds {
    fn default() -> Self {
        Self {
            plane_min_ground_speed: 33.0,
            freefall_max_ground_speed: 19.0,
            freefall_min_sink: 13.0,
            wingsuit_min_sink: 17.0,
            ground_tolerance: 5.0,
        }
    }
}

impl SpeedThresholds {
    pub fn is_stationary(&self, ground_speed: f64, climb: f64) -> bool {
        ground_speed + (climb - 1.0).abs() < self.ground_tolerance
    }
}

/// Instantaneous mode from horizontal speed and climb rate (m/s, climb positive up).
///
/// Only ever returns Unknown, Ground, Plane, Wingsuit, Freefall or Canopy.
/// Regions are checked in order, the first match wins.
pub fn classify_speeds(ground_speed: f64, climb: f64, t: &SpeedThresholds) -> FlightMode {
    let gs = ground_speed;
    if -0.3 * gs + 7.0 < climb && t.plane_min_ground_speed < gs {
        FlightMode::Plane
    } else if climb < -t.freefall_min_sink && climb < -gs - 10.0 && gs < t.freefall_max_ground_speed
    {
        FlightMode::Freefall
    } else if climb < gs - 32.0 && climb < -0.3 * gs + 5.5 {
        FlightMode::Wingsuit
    } else if climb < -t.wingsuit_min_sink {
        FlightMode::Wingsuit
    } else if -18.0 < climb
        && climb < -1.1
        && gs - 31.0 < climb
        && climb < gs - 4.0
        && 1.1 < gs
        && gs < 23.5
        && climb < -gs + 20.0
    {
        FlightMode::Canopy
    } else if t.is_stationary(gs, climb) || (-1.0 < climb && climb < 2.0 && !(gs > 10.0)) {
        FlightMode::Ground
    } else {
        FlightMode::Unknown
    }
}

/// [`classify_speeds`] on a fix's own ground speed and climb.
pub fn basic_mode(fix: &LocationFix, t: &SpeedThresholds) -> FlightMode {
    classify_speeds(fix.ground_speed(), fix.climb, t)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn speed_polygon() {
        let t = SpeedThresholds::default();
        assert_eq!(classify_speeds(0.0, 0.0, &t), FlightMode::Ground);
        assert_eq!(classify_speeds(40.0, 5.0, &t), FlightMode::Plane);
        assert_eq!(classify_speeds(60.0, -2.0, &t), FlightMode::Plane);
        assert_eq!(classify_speeds(5.0, -50.0, &t), FlightMode::Freefall);
        assert_eq!(classify_speeds(20.0, -15.0, &t), FlightMode::Wingsuit);
        assert_eq!(classify_speeds(35.0, -20.0, &t), FlightMode::Wingsuit);
        assert_eq!(classify_speeds(10.0, -5.0, &t), FlightMode::Canopy);
        assert_eq!(classify_speeds(15.0, 4.0, &t), FlightMode::Unknown);
        // NaN falls through every region
        assert_eq!(classify_speeds(f64::NAN, f64::NAN, &t), FlightMode::Unknown);
    }

    #[test]
    fn basic_mode_uses_ground_speed() {
        let t = SpeedThresholds::default();
        // 3-4-5 triangle, 5 m/s over ground at walking sink rate
        let walking = LocationFix::new(0, 0.0, 0.0, 0.0, 3.0, 4.0, 0.5);
        assert_eq!(basic_mode(&walking, &t), FlightMode::Ground);
        let canopy = LocationFix::new(0, 0.0, 0.0, 0.0, 6.0, 8.0, -5.0);
        assert_eq!(basic_mode(&canopy, &t), FlightMode::Canopy);
    }

    #[test]
    fn transition_table() {
        use FlightMode::*;
        assert!(Ground.can_transition_to(Plane));
        assert!(!Ground.can_transition_to(Deploy));
        assert!(!Ground.can_transition_to(Canopy));
        assert!(Wingsuit.can_transition_to(Plane));
        assert!(!Wingsuit.can_transition_to(Freefall));
        assert!(Freefall.can_transition_to(Wingsuit));
        assert!(!Deploy.can_transition_to(Landing));
        assert!(!Canopy.can_transition_to(Ground));
        assert!(!Unknown.can_transition_to(Canopy));
        for mode in FlightMode::ALL {
            assert!(mode.can_transition_to(mode));
        }
    }

    #[test]
    fn basic_and_strings() {
        assert_eq!(FlightMode::Deploy.to_basic(), FlightMode::Canopy);
        assert_eq!(FlightMode::Landing.to_basic(), FlightMode::Canopy);
        assert_eq!(FlightMode::Wingsuit.to_basic(), FlightMode::Wingsuit);
        assert!(FlightMode::Landing.is_flight());
        assert!(!FlightMode::Ground.is_flight());
        assert_eq!(FlightMode::Freefall.to_string(), "Freefall");
        assert_eq!(FlightMode::default(), FlightMode::Unknown);
    }
}
