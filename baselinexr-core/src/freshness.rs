use serde::{Deserialize, Serialize};

/// Age of the newest fix as seen from the render clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    NoFix,
    Fresh { age_ms: i64 },
    Stale { age_ms: i64 },
}

impl Freshness {
    pub fn age_ms(&self) -> Option<i64> {
        match self {
            Freshness::NoFix => None,
            Freshness::Fresh { age_ms } | Freshness::Stale { age_ms } => Some(*age_ms),
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Freshness::Fresh { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FreshnessConfig {
    pub stale_after_ms: i64,
    /// indicator starts fading at this age
    pub fade_start_ms: i64,
    /// and is fully faded at this one
    pub fade_end_ms: i64,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            stale_after_ms: 3000,
            fade_start_ms: 1000,
            fade_end_ms: 6000,
        }
    }
}

impl FreshnessConfig {
    /// A last fix stamped in the future (clock skew) counts as brand new.
    pub fn classify(&self, last_fix_ms: Option<i64>, now_ms: i64) -> Freshness {
        let Some(last) = last_fix_ms else {
            return Freshness::NoFix;
        };
        let age_ms = now_ms.saturating_sub(last).max(0);
        if age_ms > self.stale_after_ms {
            Freshness::Stale { age_ms }
        } else {
            Freshness::Fresh { age_ms }
        }
    }

    /// Indicator fade for a fix of the given age, 0 = fresh and 1 = fully faded.
    pub fn fade(&self, age_ms: i64) -> f64 {
        if age_ms <= self.fade_start_ms {
            return 0.0;
        }
        if age_ms >= self.fade_end_ms || self.fade_end_ms <= self.fade_start_ms {
            return 1.0;
        }
        (age_ms - self.fade_start_ms) as f64 / (self.fade_end_ms - self.fade_start_ms) as f64
    }
}
