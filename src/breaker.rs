//! Breaker thermal model
//!
//! Maps an overcurrent ratio (actual current over fuse rating) to the longest
//! time a miniature circuit breaker tolerates it before it may trip. The
//! built-in tables follow the earliest-trip envelope of IEC 60898 B and C
//! characteristic breakers: conventional non-tripping at 1.13 In for an hour,
//! a thermal region up to 2.55 In, and the magnetic (instantaneous) region
//! starting at 3 In (B) or 5 In (C).

use crate::config::{BreakerCurveConfig, CurvePointConfig};
use crate::error::{FuseguardError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Breaker trip characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BreakerCharacteristic {
    #[default]
    B,
    C,
}

/// One breakpoint of a trip curve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakerCurvePoint {
    pub overcurrent_ratio: f64,
    pub max_dwell: Duration,
}

// (ratio, seconds)
const B_CURVE: [(f64, f64); 5] = [
    (1.13, 3600.0),
    (1.45, 120.0),
    (2.0, 20.0),
    (2.55, 5.0),
    (3.0, 0.01),
];

const C_CURVE: [(f64, f64); 6] = [
    (1.13, 3600.0),
    (1.45, 120.0),
    (2.0, 20.0),
    (2.55, 5.0),
    (4.0, 1.5),
    (5.0, 0.01),
];

/// Immutable trip-curve lookup shared by all phases
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerThermalModel {
    points: Vec<BreakerCurvePoint>,
}

impl BreakerThermalModel {
    /// Model for a built-in characteristic
    pub fn for_characteristic(characteristic: BreakerCharacteristic) -> Self {
        let table: &[(f64, f64)] = match characteristic {
            BreakerCharacteristic::B => &B_CURVE,
            BreakerCharacteristic::C => &C_CURVE,
        };
        Self {
            points: table
                .iter()
                .map(|&(ratio, secs)| BreakerCurvePoint {
                    overcurrent_ratio: ratio,
                    max_dwell: Duration::from_secs_f64(secs),
                })
                .collect(),
        }
    }

    /// Model from configuration; custom points take precedence
    pub fn from_config(config: &BreakerCurveConfig) -> Result<Self> {
        match &config.points {
            Some(points) => {
                validate_points(points)?;
                Ok(Self {
                    points: points
                        .iter()
                        .map(|p| BreakerCurvePoint {
                            overcurrent_ratio: p.ratio,
                            max_dwell: Duration::from_secs_f64(p.dwell_secs),
                        })
                        .collect(),
                })
            }
            None => Ok(Self::for_characteristic(config.characteristic)),
        }
    }

    pub fn points(&self) -> &[BreakerCurvePoint] {
        &self.points
    }

    /// Longest tolerated dwell at `overcurrent_ratio`.
    ///
    /// Returns `Duration::MAX` for ratios at or below 1 (and for NaN).
    /// Ratios outside the table clamp to its first or last breakpoint;
    /// between breakpoints the dwell is interpolated linearly in log-time.
    pub fn dwell_allowed(&self, overcurrent_ratio: f64) -> Duration {
        if overcurrent_ratio.is_nan() || overcurrent_ratio <= 1.0 {
            return Duration::MAX;
        }
        let (first, last) = match (self.points.first(), self.points.last()) {
            (Some(f), Some(l)) => (f, l),
            _ => return Duration::MAX,
        };
        if overcurrent_ratio <= first.overcurrent_ratio {
            return first.max_dwell;
        }
        if overcurrent_ratio >= last.overcurrent_ratio {
            return last.max_dwell;
        }

        for pair in self.points.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            if overcurrent_ratio < hi.overcurrent_ratio {
                let t = (overcurrent_ratio - lo.overcurrent_ratio)
                    / (hi.overcurrent_ratio - lo.overcurrent_ratio);
                let ln_lo = lo.max_dwell.as_secs_f64().ln();
                let ln_hi = hi.max_dwell.as_secs_f64().ln();
                return Duration::from_secs_f64((ln_lo + t * (ln_hi - ln_lo)).exp());
            }
        }
        last.max_dwell
    }

    /// Fraction of the trip budget consumed by spending `tick` at `overcurrent_ratio`
    pub fn risk_increment(&self, overcurrent_ratio: f64, tick: Duration) -> f64 {
        let dwell = self.dwell_allowed(overcurrent_ratio);
        if dwell == Duration::MAX {
            return 0.0;
        }
        let dwell_secs = dwell.as_secs_f64().max(f64::MIN_POSITIVE);
        tick.as_secs_f64() / dwell_secs
    }
}

/// Check configured breakpoints: ordered, finite, ratio above 1, dwell
/// positive and strictly decreasing
pub fn validate_points(points: &[CurvePointConfig]) -> Result<()> {
    if points.is_empty() {
        return Err(FuseguardError::validation(
            "balancer.breaker_curve.points",
            "Must contain at least one point",
        ));
    }
    for p in points {
        if !p.ratio.is_finite() || p.ratio <= 1.0 {
            return Err(FuseguardError::validation(
                "balancer.breaker_curve.points",
                "Ratios must be finite and above 1.0",
            ));
        }
        if p.dwell_secs <= 0.0 || Duration::try_from_secs_f64(p.dwell_secs).is_err() {
            return Err(FuseguardError::validation(
                "balancer.breaker_curve.points",
                "Dwell times must be positive and representable",
            ));
        }
    }
    for pair in points.windows(2) {
        if pair[1].ratio <= pair[0].ratio || pair[1].dwell_secs >= pair[0].dwell_secs {
            return Err(FuseguardError::validation(
                "balancer.breaker_curve.points",
                "Ratios must increase and dwell times decrease",
            ));
        }
    }
    Ok(())
}
