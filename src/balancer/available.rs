use crate::error::{FuseguardError, Result};
use crate::meter::PhaseSample;

/// Headroom left on a phase: fuse rating minus net current draw.
///
/// Negative means overcurrent. A sample without a usable voltage cannot be
/// converted to a current and is reported as `MeterUnavailable`.
pub fn available_current(sample: &PhaseSample, fuse_rating_amps: f64) -> Result<f64> {
    if !sample.voltage.is_finite() || sample.voltage <= 0.0 {
        return Err(FuseguardError::meter_unavailable(
            sample.phase,
            format!("cannot derive current from {:.1} V", sample.voltage),
        ));
    }
    let available = fuse_rating_amps - sample.net_current();
    if available.is_finite() {
        Ok(available)
    } else {
        Err(FuseguardError::meter_unavailable(
            sample.phase,
            "non-finite current",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Phase;
    use chrono::Utc;

    fn sample(voltage: f64, consumption_w: f64, production_w: f64) -> PhaseSample {
        PhaseSample {
            phase: Phase::L1,
            voltage,
            consumption_w,
            production_w,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn headroom_is_rating_minus_net_draw() {
        let a = available_current(&sample(230.0, 4600.0, 0.0), 25.0).unwrap();
        assert!((a - 5.0).abs() < 1e-9);
    }

    #[test]
    fn overcurrent_is_negative() {
        let a = available_current(&sample(230.0, 28.0 * 230.0, 0.0), 25.0).unwrap();
        assert!((a + 3.0).abs() < 1e-9);
    }

    #[test]
    fn production_adds_headroom() {
        let a = available_current(&sample(230.0, 2300.0, 4600.0), 25.0).unwrap();
        assert!((a - 35.0).abs() < 1e-9);
    }

    #[test]
    fn zero_voltage_is_meter_unavailable() {
        let err = available_current(&sample(0.0, 100.0, 0.0), 25.0).unwrap_err();
        assert!(matches!(err, FuseguardError::MeterUnavailable { .. }));
    }
}
